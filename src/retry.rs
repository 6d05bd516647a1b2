//! Bounded exponential backoff used at every dependency boundary
//! (secret reads, message fetches, alert writes).

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

/// `attempts` total tries; the delay before try `n + 1` is `base_ms * 2^(n - 1)`, capped at `cap_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Backoff {
    pub attempts: u32,
    pub base_ms: u64,
    pub cap_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_ms: 200,
            cap_ms: 2_000,
        }
    }
}

impl Backoff {
    pub const fn new(attempts: u32, base_ms: u64, cap_ms: u64) -> Self {
        Self {
            attempts,
            base_ms,
            cap_ms,
        }
    }

    /// At least one attempt is always made.
    pub fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Delay after the failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
        let ms = self.base_ms.saturating_mul(exp).min(self.cap_ms);
        Duration::from_millis(ms)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the budget is spent.
/// `on_retry` sees the failed attempt number and its error before each sleep.
pub async fn retry<T, E, F, Fut>(
    policy: &Backoff,
    is_transient: impl Fn(&E) -> bool,
    mut on_retry: impl FnMut(u32, &E),
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max = policy.max_attempts();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max && is_transient(&e) => {
                on_retry(attempt, &e);
                tokio::time::sleep(policy.delay(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
