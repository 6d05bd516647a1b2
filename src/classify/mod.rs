// src/classify/mod.rs
//! Classification contract.
//!
//! The pipeline only sees [`Classifier`]. Every verdict passes through
//! [`Classification::validated`], and [`classify_guarded`] turns a panicking strategy into
//! the conservative `UNKNOWN` verdict, so classification can never block record creation.

pub mod rules;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::{ClassifierConfig, ClassifierStrategy};
use crate::gmail::RawMessage;

pub use rules::{RuleClassifier, RuleSet};

/// Trade-alert taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Buy,
    Sell,
    Exit,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Buy => "BUY",
            Category::Sell => "SELL",
            Category::Exit => "EXIT",
            Category::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    /// Ticker symbol, uppercase.
    pub subject: Option<String>,
    /// Always within `[0.0, 1.0]`; exactly `0.0` for `UNKNOWN`.
    pub confidence: f32,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            category: Category::Unknown,
            subject: None,
            confidence: 0.0,
        }
    }

    pub fn new(category: Category, subject: Option<String>, confidence: f32) -> Self {
        Self {
            category,
            subject,
            confidence,
        }
        .validated()
    }

    pub fn is_unknown(&self) -> bool {
        self.category == Category::Unknown
    }

    /// Enforce the verdict invariants:
    /// non-finite confidence degrades to `UNKNOWN`, confidence is clamped to `[0, 1]`,
    /// subjects are trimmed and uppercased, and `UNKNOWN` carries no subject and zero confidence.
    pub fn validated(self) -> Self {
        if !self.confidence.is_finite() || self.category == Category::Unknown {
            return Self::unknown();
        }
        let subject = self
            .subject
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty());
        Self {
            category: self.category,
            subject,
            confidence: self.confidence.clamp(0.0, 1.0),
        }
    }
}

impl Default for Classification {
    fn default() -> Self {
        Self::unknown()
    }
}

/// A classification strategy. Implementations must be pure: same message, same verdict.
pub trait Classifier: Send + Sync {
    fn classify(&self, message: &RawMessage) -> Classification;
    fn name(&self) -> &'static str;
}

pub type DynClassifier = Arc<dyn Classifier>;

/// Always answers `UNKNOWN`; leaves classification to a downstream reviewer.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownClassifier;

impl Classifier for UnknownClassifier {
    fn classify(&self, _message: &RawMessage) -> Classification {
        Classification::unknown()
    }

    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Run `classifier`, validate its verdict, and degrade to `UNKNOWN` if it panics.
pub fn classify_guarded(classifier: &dyn Classifier, message: &RawMessage) -> Classification {
    match catch_unwind(AssertUnwindSafe(|| classifier.classify(message))) {
        Ok(c) => c.validated(),
        Err(_) => {
            tracing::error!(
                target: "classify",
                classifier = classifier.name(),
                message_id = %message.id,
                "classifier panicked; recording UNKNOWN"
            );
            Classification::unknown()
        }
    }
}

/// Build the configured strategy.
pub fn build_classifier(cfg: &ClassifierConfig) -> Result<DynClassifier> {
    match cfg.strategy {
        ClassifierStrategy::Unknown => Ok(Arc::new(UnknownClassifier)),
        ClassifierStrategy::Rules => {
            let c = match &cfg.rules_path {
                Some(p) => RuleClassifier::from_path(p)?,
                None => RuleClassifier::builtin()?,
            };
            tracing::info!(target: "classify", rules = c.rule_count(), "rule classifier loaded");
            Ok(Arc::new(c))
        }
    }
}
