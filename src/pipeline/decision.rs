//! Per-sender keep/delete decisions.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SweepError};
use crate::group::SenderGroups;
use crate::model::Message;

/// What to do with every message from one sender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Leave the messages in the mailbox.
    #[default]
    #[serde(alias = "skip")]
    Keep,
    /// Archive locally, then move to the trash.
    #[serde(alias = "trash", alias = "remove")]
    Delete,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Delete => "delete",
        }
    }

    /// Interpret an interactive answer. Empty input means keep.
    ///
    /// Returns `None` for anything unrecognized so the caller can re-prompt.
    pub fn from_answer(answer: &str) -> Option<Self> {
        let answer = answer.trim();
        if answer.is_empty() {
            return Some(Self::Keep);
        }
        answer.parse().ok()
    }
}

impl FromStr for Decision {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "keep" | "k" | "skip" | "s" => Ok(Self::Keep),
            "delete" | "d" | "trash" | "t" | "remove" => Ok(Self::Delete),
            other => Err(SweepError::InvalidDecision(format!(
                "'{other}' (expected keep or delete)"
            ))),
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decisions keyed by sender key. Senders without an entry are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionSet {
    decisions: BTreeMap<String, Decision>,
}

impl DecisionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decision for a sender key.
    pub fn set(&mut self, sender_key: impl Into<String>, decision: Decision) {
        self.decisions.insert(sender_key.into(), decision);
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, sender_key: impl Into<String>, decision: Decision) -> Self {
        self.set(sender_key, decision);
        self
    }

    /// Effective decision for a sender: explicit entry, else `Keep`.
    pub fn get(&self, sender_key: &str) -> Decision {
        self.decisions.get(sender_key).copied().unwrap_or_default()
    }

    /// Explicit entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Decision)> {
        self.decisions.iter().map(|(k, d)| (k.as_str(), *d))
    }

    /// Number of senders explicitly marked for deletion.
    pub fn delete_count(&self) -> usize {
        self.decisions.values().filter(|d| **d == Decision::Delete).count()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    /// Load decisions from a JSON (`.json`) or TOML file.
    ///
    /// Both map sender keys to `"keep"` or `"delete"`:
    ///
    /// ```toml
    /// "deals@shop.com" = "delete"
    /// "friend@example.org" = "keep"
    /// ```
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| SweepError::io(path, e))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&contents)
                .map_err(|e| SweepError::InvalidDecision(format!("{}: {e}", path.display())))
        } else {
            toml::from_str(&contents)
                .map_err(|e| SweepError::InvalidDecision(format!("{}: {e}", path.display())))
        }
    }
}

impl FromIterator<(String, Decision)> for DecisionSet {
    fn from_iter<I: IntoIterator<Item = (String, Decision)>>(iter: I) -> Self {
        Self {
            decisions: iter.into_iter().collect(),
        }
    }
}

/// Supplies decisions once groups are known.
///
/// Implemented by front-ends (interactive prompts, decision files) and by
/// [`DecisionSet`] itself for fixed answers.
pub trait DecisionProvider {
    fn decide(&mut self, groups: &SenderGroups, messages: &[Message]) -> Result<DecisionSet>;
}

impl DecisionProvider for DecisionSet {
    fn decide(&mut self, _groups: &SenderGroups, _messages: &[Message]) -> Result<DecisionSet> {
        Ok(self.clone())
    }
}

impl<F> DecisionProvider for F
where
    F: FnMut(&SenderGroups, &[Message]) -> Result<DecisionSet>,
{
    fn decide(&mut self, groups: &SenderGroups, messages: &[Message]) -> Result<DecisionSet> {
        self(groups, messages)
    }
}
