//! Rule-based classifier (loaded from `config/classifier_rules.json`).
//!
//! Minimal JSON DSL over the message text (case-insensitive, whole-phrase):
//! - `any_contains`: match if ANY of phrases appears
//! - `all_contains`: match if ALL of phrases appear
//! - `not_contains`: match if NONE of phrases appear
//! - `min_len`:      match if text length >= min_len (chars)
//!
//! When a rule matches it sets `category` and `confidence`. Rules are evaluated in file
//! order and the first match wins. The ticker is taken from the first cashtag (`$AAPL`),
//! else from an action verb followed by an uppercase symbol (`Buy AAPL`).
//!
//! Rules are loaded once; a running classifier never changes its answers.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::{Category, Classification, Classifier};
use crate::gmail::RawMessage;

const BUILTIN_RULES: &str = include_str!("../../config/classifier_rules.json");

/// Longest text considered, in chars.
const MAX_TEXT_CHARS: usize = 4_000;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Uppercase words that look like tickers but are not.
    #[serde(default)]
    pub ignore_tickers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub name: Option<String>,
    #[serde(default)]
    pub when: When,
    pub then: Then,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct When {
    pub any_contains: Option<Vec<String>>,
    pub all_contains: Option<Vec<String>>,
    pub not_contains: Option<Vec<String>>,
    pub min_len: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Then {
    pub category: Category,
    pub confidence: f32,
}

#[derive(Debug)]
struct CompiledRule {
    name: String,
    any: Vec<Regex>,
    all: Vec<Regex>,
    not: Vec<Regex>,
    min_len: Option<usize>,
    category: Category,
    confidence: f32,
}

impl CompiledRule {
    fn matches(&self, text: &str) -> bool {
        if let Some(min) = self.min_len {
            if text.chars().count() < min {
                return false;
            }
        }
        if !self.any.is_empty() && !self.any.iter().any(|r| r.is_match(text)) {
            return false;
        }
        if !self.all.iter().all(|r| r.is_match(text)) {
            return false;
        }
        !self.not.iter().any(|r| r.is_match(text))
    }
}

#[derive(Debug)]
pub struct RuleClassifier {
    rules: Vec<CompiledRule>,
    ignore: HashSet<String>,
}

impl RuleClassifier {
    /// The rule set shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_RULES).context("parsing built-in classifier rules")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading classifier rules from {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("parsing classifier rules from {}", path.display()))
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let set: RuleSet = serde_json::from_str(s)?;
        Self::compile(set)
    }

    pub fn compile(set: RuleSet) -> Result<Self> {
        let mut rules = Vec::with_capacity(set.rules.len());
        for (i, r) in set.rules.into_iter().enumerate() {
            let name = r.name.unwrap_or_else(|| format!("rule#{i}"));
            let c = r.then.confidence;
            if !c.is_finite() || !(0.0..=1.0).contains(&c) {
                bail!("rule `{name}`: confidence {c} outside [0, 1]");
            }
            rules.push(CompiledRule {
                any: phrases(r.when.any_contains)?,
                all: phrases(r.when.all_contains)?,
                not: phrases(r.when.not_contains)?,
                min_len: r.when.min_len,
                category: r.then.category,
                confidence: c,
                name,
            });
        }
        let ignore = set
            .ignore_tickers
            .into_iter()
            .map(|t| t.trim().to_ascii_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        Ok(Self { rules, ignore })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Name of the first rule matching `text`, for diagnostics.
    pub fn matching_rule(&self, text: &str) -> Option<&str> {
        let t = normalize_text(text);
        self.rules
            .iter()
            .find(|r| r.matches(&t))
            .map(|r| r.name.as_str())
    }

    fn extract_ticker(&self, text: &str) -> Option<String> {
        static CASHTAG: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"\$([A-Za-z]{1,5})\b").expect("cashtag regex"));
        static VERB_TICKER: Lazy<Regex> = Lazy::new(|| {
            Regex::new(
                r"(?i:\b(?:buy|buying|bought|sell|selling|sold|short|shorting|cover|covering|trim|trimming|exit|exiting|close|closing|stopped\s+out\s+of|out\s+of)\b)\s+(?:(?i:shares\s+of|some|more)\s+)?\$?([A-Z]{1,5})\b",
            )
            .expect("verb ticker regex")
        });

        for re in [&*CASHTAG, &*VERB_TICKER] {
            for caps in re.captures_iter(text) {
                if let Some(m) = caps.get(1) {
                    let t = m.as_str().to_ascii_uppercase();
                    if !self.ignore.contains(&t) {
                        return Some(t);
                    }
                }
            }
        }
        None
    }
}

impl Classifier for RuleClassifier {
    fn classify(&self, message: &RawMessage) -> Classification {
        let text = normalize_text(&message.text_for_classification());
        if text.is_empty() {
            return Classification::unknown();
        }
        for rule in &self.rules {
            if rule.matches(&text) {
                let subject = match rule.category {
                    Category::Unknown => None,
                    _ => self.extract_ticker(&text),
                };
                return Classification::new(rule.category, subject, rule.confidence);
            }
        }
        Classification::unknown()
    }

    fn name(&self) -> &'static str {
        "rules"
    }
}

/// Compile phrases into whole-phrase, case- and whitespace-insensitive matchers.
fn phrases(list: Option<Vec<String>>) -> Result<Vec<Regex>> {
    let mut out = Vec::new();
    for p in list.unwrap_or_default() {
        let words: Vec<String> = p.split_whitespace().map(regex::escape).collect();
        if words.is_empty() {
            continue;
        }
        let pattern = format!(r"(?i)(?:^|\W){}(?:\W|$)", words.join(r"\s+"));
        out.push(Regex::new(&pattern).with_context(|| format!("phrase `{p}`"))?);
    }
    Ok(out)
}

/// Decode HTML entities, strip tags, normalize quotes, collapse whitespace, cap length.
/// Case is preserved so tickers stay recognizable.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = RE_TAGS.replace_all(&out, " ").to_string();

    // 3) Normalize curly quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
    out = RE_WS.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }
    out
}
