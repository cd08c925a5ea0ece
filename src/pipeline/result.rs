//! Outcome of a cleanup run, per message, per sender, and in aggregate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::decision::Decision;

/// What happened to one message in a delete group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MessageOutcome {
    /// Archived, then moved to the trash.
    Trashed,
    /// Archived; the source reported the message already gone.
    AlreadyGone,
    /// Archived, but the trash call failed. The inbox still has it.
    ArchivedNotTrashed { reason: String },
    /// The archive write failed. The message was not touched.
    ArchiveFailed { reason: String },
    /// Skipped because the run was cancelled or aborted first.
    NotAttempted { reason: String },
}

impl MessageOutcome {
    /// Whether a durable archive record exists after this outcome.
    pub fn is_archived(&self) -> bool {
        matches!(
            self,
            Self::Trashed | Self::AlreadyGone | Self::ArchivedNotTrashed { .. }
        )
    }

    /// Whether the message is out of the inbox.
    pub fn is_removed(&self) -> bool {
        matches!(self, Self::Trashed | Self::AlreadyGone)
    }

    /// Failure reason, if the message did not reach the trash.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::ArchivedNotTrashed { reason }
            | Self::ArchiveFailed { reason }
            | Self::NotAttempted { reason } => Some(reason),
            Self::Trashed | Self::AlreadyGone => None,
        }
    }

    /// Short label for tables and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Trashed => "trashed",
            Self::AlreadyGone => "already gone",
            Self::ArchivedNotTrashed { .. } => "archived, not trashed",
            Self::ArchiveFailed { .. } => "archive failed",
            Self::NotAttempted { .. } => "not attempted",
        }
    }
}

/// A message that did not end fully cleaned, or that raised an anomaly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFailure {
    pub id: String,
    pub reason: String,
}

/// Per-sender tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderReport {
    pub sender_key: String,
    pub decision: Decision,
    /// Messages in the group.
    pub messages: usize,
    /// Messages with a durable archive record.
    pub archived: usize,
    /// Messages out of the inbox (includes `already_gone`).
    pub trashed: usize,
    pub already_gone: usize,
    pub archived_not_trashed: usize,
    pub archive_failed: usize,
    pub not_attempted: usize,
    pub failures: Vec<MessageFailure>,
    /// Archive records that replaced different content for the same id.
    pub anomalies: Vec<MessageFailure>,
}

impl SenderReport {
    /// Report for a group that was left alone.
    pub fn kept(sender_key: impl Into<String>, messages: usize) -> Self {
        Self {
            messages,
            ..Self::empty(sender_key, Decision::Keep)
        }
    }

    /// Empty report for a delete group, filled in by [`record`](Self::record).
    pub fn deleting(sender_key: impl Into<String>) -> Self {
        Self::empty(sender_key, Decision::Delete)
    }

    fn empty(sender_key: impl Into<String>, decision: Decision) -> Self {
        Self {
            sender_key: sender_key.into(),
            decision,
            messages: 0,
            archived: 0,
            trashed: 0,
            already_gone: 0,
            archived_not_trashed: 0,
            archive_failed: 0,
            not_attempted: 0,
            failures: Vec::new(),
            anomalies: Vec::new(),
        }
    }

    /// Fold one message outcome into the tally.
    pub fn record(&mut self, id: &str, outcome: &MessageOutcome, anomaly: Option<String>) {
        self.messages += 1;
        if outcome.is_archived() {
            self.archived += 1;
        }
        if outcome.is_removed() {
            self.trashed += 1;
        }
        match outcome {
            MessageOutcome::AlreadyGone => self.already_gone += 1,
            MessageOutcome::ArchivedNotTrashed { .. } => self.archived_not_trashed += 1,
            MessageOutcome::ArchiveFailed { .. } => self.archive_failed += 1,
            MessageOutcome::NotAttempted { .. } => self.not_attempted += 1,
            MessageOutcome::Trashed => {}
        }
        if let Some(reason) = outcome.reason() {
            self.failures.push(MessageFailure {
                id: id.to_string(),
                reason: reason.to_string(),
            });
        }
        if let Some(reason) = anomaly {
            self.anomalies.push(MessageFailure {
                id: id.to_string(),
                reason,
            });
        }
    }
}

/// Aggregate counts for the end-of-run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub senders: usize,
    pub messages: usize,
    /// Messages in groups decided (or defaulted) to keep.
    pub kept: usize,
    pub archived: usize,
    /// Fully cleaned: archived and out of the inbox.
    pub trashed: usize,
    pub already_gone: usize,
    /// Safe but still in the inbox; retry later.
    pub archived_not_trashed: usize,
    /// Untouched because the archive write failed.
    pub archive_failed: usize,
    pub not_attempted: usize,
    pub anomalies: usize,
}

impl Summary {
    /// Sum the per-sender reports.
    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a SenderReport>) -> Self {
        let mut summary = Self::default();
        for r in reports {
            summary.senders += 1;
            summary.messages += r.messages;
            if r.decision == Decision::Keep {
                summary.kept += r.messages;
            }
            summary.archived += r.archived;
            summary.trashed += r.trashed;
            summary.already_gone += r.already_gone;
            summary.archived_not_trashed += r.archived_not_trashed;
            summary.archive_failed += r.archive_failed;
            summary.not_attempted += r.not_attempted;
            summary.anomalies += r.anomalies.len();
        }
        summary
    }
}

/// Accumulated outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub run_id: String,
    pub senders: BTreeMap<String, SenderReport>,
    pub summary: Summary,
    /// Reason the apply stage stopped early, if it did.
    pub aborted: Option<String>,
}

impl CleanupResult {
    /// Build a result from per-sender reports.
    pub fn new(run_id: impl Into<String>, reports: Vec<SenderReport>, aborted: Option<String>) -> Self {
        let summary = Summary::from_reports(&reports);
        let senders = reports
            .into_iter()
            .map(|r| (r.sender_key.clone(), r))
            .collect();
        Self {
            run_id: run_id.into(),
            senders,
            summary,
            aborted,
        }
    }

    /// Result of a run that fetched nothing.
    pub fn empty(run_id: impl Into<String>) -> Self {
        Self::new(run_id, Vec::new(), None)
    }

    pub fn sender(&self, sender_key: &str) -> Option<&SenderReport> {
        self.senders.get(sender_key)
    }

    /// Whether every delete-group message ended archived and trashed.
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none()
            && self.summary.archived_not_trashed == 0
            && self.summary.archive_failed == 0
            && self.summary.not_attempted == 0
    }
}
