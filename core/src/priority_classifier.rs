//! Priority classifier: keyword tiers over the complaint text.
//!
//! Pure and deterministic: lower-cased substring match over
//! `title + " " + description`. Tiers are checked in severity order and
//! the first tier with any hit wins; there is no scoring. `low` is never
//! produced here.

use crate::complaint::Priority;
use serde::{Deserialize, Serialize};

/// Keyword lists as they appear in configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordSets {
    pub urgent: Vec<String>,
    pub high: Vec<String>,
}

impl Default for KeywordSets {
    fn default() -> Self {
        Self {
            urgent: ["urgent", "critical", "emergency", "immediate"]
                .map(String::from)
                .to_vec(),
            high: ["important", "asap", "quickly"].map(String::from).to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PriorityClassifier {
    urgent: Vec<String>,
    high: Vec<String>,
}

impl PriorityClassifier {
    pub fn new<U, H>(urgent: U, high: H) -> Self
    where
        U: IntoIterator,
        U::Item: AsRef<str>,
        H: IntoIterator,
        H::Item: AsRef<str>,
    {
        Self {
            urgent: normalize(urgent),
            high: normalize(high),
        }
    }

    pub fn from_keywords(sets: &KeywordSets) -> Self {
        Self::new(&sets.urgent, &sets.high)
    }

    pub fn classify(&self, title: &str, description: &str) -> Priority {
        let text = format!("{title} {description}").to_lowercase();
        if self.urgent.iter().any(|k| text.contains(k.as_str())) {
            Priority::Critical
        } else if self.high.iter().any(|k| text.contains(k.as_str())) {
            Priority::High
        } else {
            Priority::Medium
        }
    }
}

impl Default for PriorityClassifier {
    fn default() -> Self {
        Self::from_keywords(&KeywordSets::default())
    }
}

// An empty keyword would match every text.
fn normalize<I>(keywords: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    keywords
        .into_iter()
        .map(|k| k.as_ref().trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}
