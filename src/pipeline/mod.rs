//! Cleanup pipeline: fetch, group, decide, then archive-and-trash.
//!
//! A run moves through explicit stages:
//!
//! ```text
//! Fetching ─► Grouped ─► AwaitingDecisions ─► Applying ─► Completed
//!                 │                               │
//!                 └─(nothing fetched)─► Completed └─► AbortedPartial
//! ```
//!
//! The caller owns the [`PipelineRun`] between stages; it is plain data and
//! can be written to disk while a human makes up their mind.
//!
//! Within `Applying`, every message in a delete group goes through
//! `archive.save` and only after that returns `Ok` through
//! `source.move_to_trash`. Groups are spread over a bounded pool of scoped
//! worker threads; each group is handled by one worker in fetch order.

pub mod decision;
pub mod event;
pub mod result;

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive::store::atomic_write;
use crate::archive::{Archive, Saved};
use crate::error::{Result, SweepError};
use crate::group::{self, SenderGroup, SenderGroups};
use crate::model::Message;
use crate::retry::{compute_delay, exhausted, with_retry, RetryConfig};
use crate::source::MailSource;

pub use decision::{Decision, DecisionProvider, DecisionSet};
pub use event::{EventSink, PipelineEvent};
pub use result::{CleanupResult, MessageFailure, MessageOutcome, SenderReport, Summary};

/// Prefix of generated run ids.
pub const RUN_PREFIX: &str = "sweep-";

/// Default number of apply workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default number of archive write attempts per message.
pub const DEFAULT_SAVE_ATTEMPTS: u32 = 2;

const CANCELLED: &str = "cancelled";

/// Stage of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetching,
    Grouped,
    AwaitingDecisions,
    Applying,
    Completed,
    AbortedPartial,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Grouped => "grouped",
            Self::AwaitingDecisions => "awaiting_decisions",
            Self::Applying => "applying",
            Self::Completed => "completed",
            Self::AbortedPartial => "aborted_partial",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::AbortedPartial)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one run, owned by the caller between stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// Requested fetch size.
    pub limit: usize,
    stage: Stage,
    messages: Vec<Message>,
    groups: SenderGroups,
    /// Ids listed by the source but gone before they could be fetched.
    missing: Vec<String>,
    /// Messages the source returned but that could not be read.
    #[serde(default)]
    unreadable: Vec<MessageFailure>,
    decisions: Option<DecisionSet>,
    result: Option<CleanupResult>,
}

impl PipelineRun {
    /// A fresh run in the `Fetching` stage.
    pub fn new(limit: usize) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: format!("{RUN_PREFIX}{}", started_at.format("%Y%m%d-%H%M%S")),
            started_at,
            limit,
            stage: Stage::Fetching,
            messages: Vec::new(),
            groups: SenderGroups::default(),
            missing: Vec::new(),
            unreadable: Vec::new(),
            decisions: None,
            result: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Fetched messages, in fetch order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn groups(&self) -> &SenderGroups {
        &self.groups
    }

    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    /// Messages skipped because their content could not be parsed. They
    /// are left in the mailbox untouched.
    pub fn unreadable(&self) -> &[MessageFailure] {
        &self.unreadable
    }

    /// Decisions of the last apply, if any.
    pub fn decisions(&self) -> Option<&DecisionSet> {
        self.decisions.as_ref()
    }

    /// Final result once the run reached a terminal stage.
    pub fn result(&self) -> Option<&CleanupResult> {
        self.result.as_ref()
    }

    /// Messages of one sender group, in fetch order.
    pub fn group_messages(&self, sender_key: &str) -> Vec<&Message> {
        self.groups
            .get(sender_key)
            .map(|g| g.messages(&self.messages).collect())
            .unwrap_or_default()
    }

    /// Write the run as JSON, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| SweepError::Config(format!("cannot serialize run: {e}")))?;
        atomic_write(path, &json)
    }

    /// Read a run written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| SweepError::io(path, e))?;
        serde_json::from_slice(&data)
            .map_err(|e| SweepError::Config(format!("{} is not a saved run: {e}", path.display())))
    }
}

/// Shared flag a front-end can flip to stop a run between messages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// First unrecoverable error seen by any worker during `Applying`.
#[derive(Debug, Default)]
struct Halt(Mutex<Option<String>>);

impl Halt {
    fn stop(&self, reason: String) {
        let mut slot = self.0.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(reason);
        }
    }

    fn reason(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// Drives runs against one mail source and one archive.
pub struct Pipeline<S, A> {
    source: S,
    archive: A,
    retry: RetryConfig,
    save_attempts: u32,
    workers: usize,
    cancel: CancelToken,
    events: Option<EventSink>,
}

impl<S: MailSource, A: Archive> Pipeline<S, A> {
    pub fn new(source: S, archive: A) -> Self {
        Self {
            source,
            archive,
            retry: RetryConfig::default(),
            save_attempts: DEFAULT_SAVE_ATTEMPTS,
            workers: DEFAULT_WORKERS,
            cancel: CancelToken::new(),
            events: None,
        }
    }

    /// Retry policy for source calls.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Archive write attempts per message (at least 1).
    pub fn with_save_attempts(mut self, attempts: u32) -> Self {
        self.save_attempts = attempts.max(1);
        self
    }

    /// Size of the apply worker pool (at least 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    /// Token that cancels runs driven by this pipeline.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn archive(&self) -> &A {
        &self.archive
    }

    /// Fetch, group, and stop at `AwaitingDecisions`.
    ///
    /// An empty mailbox yields a run that is already `Completed`. Any source
    /// failure that survives the retry policy aborts the run here, before
    /// anything has been archived or trashed.
    pub fn fetch(&self, limit: usize) -> Result<PipelineRun> {
        let mut run = PipelineRun::new(limit);
        info!(run = %run.run_id, limit, source = %self.source.name(), "Fetching messages");
        self.check_cancelled()?;

        let attempts = self.retry.max_retries + 1;
        let listed = with_retry(&self.retry, "list", || self.source.list_recent(limit))
            .map_err(|e| exhausted(e, attempts))?;

        let mut seen = HashSet::new();
        let ids: Vec<String> = listed
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        let total = ids.len();

        for (i, id) in ids.iter().enumerate() {
            self.check_cancelled()?;
            let what = format!("fetch {id}");
            match with_retry(&self.retry, &what, || self.source.fetch_full(id)) {
                Ok(message) => run.messages.push(message),
                Err(SweepError::MessageNotFound(_)) => {
                    warn!(id = %id, "Message vanished before it could be fetched");
                    run.missing.push(id.clone());
                }
                Err(SweepError::InvalidMessage(reason)) => {
                    warn!(id = %id, reason = %reason, "Skipping unreadable message");
                    run.unreadable.push(MessageFailure {
                        id: id.clone(),
                        reason,
                    });
                }
                Err(e) => return Err(exhausted(e, attempts)),
            }
            self.emit(PipelineEvent::FetchProgress {
                done: i + 1,
                total,
            });
        }

        run.groups = group::group(&run.messages);
        run.stage = Stage::Grouped;
        info!(
            run = %run.run_id,
            messages = run.messages.len(),
            senders = run.groups.len(),
            "Grouped by sender"
        );
        self.emit(PipelineEvent::GroupsReady {
            senders: run.groups.len(),
            messages: run.messages.len(),
        });

        if run.messages.is_empty() {
            let result = CleanupResult::empty(run.run_id.clone());
            self.emit(PipelineEvent::Finished {
                summary: &result.summary,
            });
            run.result = Some(result);
            run.stage = Stage::Completed;
        } else {
            run.stage = Stage::AwaitingDecisions;
        }
        Ok(run)
    }

    /// Apply decisions to a run in `AwaitingDecisions`.
    ///
    /// A run left in `AbortedPartial` may be applied again: messages already
    /// archived are recognized by content, and messages already trashed come
    /// back as `AlreadyGone`.
    pub fn apply(&self, run: &mut PipelineRun, decisions: &DecisionSet) -> Result<CleanupResult> {
        if !matches!(run.stage, Stage::AwaitingDecisions | Stage::AbortedPartial) {
            return Err(SweepError::InvalidState {
                expected: Stage::AwaitingDecisions.as_str(),
                found: run.stage.as_str(),
            });
        }
        self.check_cancelled()?;

        for (key, decision) in decisions.iter() {
            if run.groups.get(key).is_none() {
                debug!(sender = %key, decision = %decision, "Decision for a sender not in this run");
            }
        }

        run.stage = Stage::Applying;
        run.decisions = Some(decisions.clone());

        let mut reports = Vec::with_capacity(run.groups.len());
        let mut plan: Vec<&SenderGroup> = Vec::new();
        for group in run.groups.iter() {
            match decisions.get(&group.sender_key) {
                Decision::Keep => reports.push(SenderReport::kept(&group.sender_key, group.len())),
                Decision::Delete => plan.push(group),
            }
        }

        let planned: usize = plan.iter().map(|g| g.len()).sum();
        info!(
            run = %run.run_id,
            senders = plan.len(),
            messages = planned,
            workers = self.workers.min(plan.len()).max(1),
            "Applying decisions"
        );
        self.emit(PipelineEvent::ApplyStarted {
            senders: plan.len(),
            messages: planned,
        });

        let halt = Halt::default();
        let applied = self.apply_groups(&run.messages, &plan, &halt);
        reports.extend(applied);

        let aborted = self.halt_reason(&halt);
        let result = CleanupResult::new(run.run_id.clone(), reports, aborted.clone());
        run.stage = match &aborted {
            Some(reason) => {
                warn!(run = %run.run_id, reason = %reason, "Run stopped before finishing");
                Stage::AbortedPartial
            }
            None => Stage::Completed,
        };
        info!(
            run = %run.run_id,
            archived = result.summary.archived,
            trashed = result.summary.trashed,
            kept = result.summary.kept,
            archived_not_trashed = result.summary.archived_not_trashed,
            archive_failed = result.summary.archive_failed,
            "Run finished"
        );
        self.emit(PipelineEvent::Finished {
            summary: &result.summary,
        });
        run.result = Some(result.clone());
        Ok(result)
    }

    /// Fetch, ask `provider` for decisions, and apply them.
    pub fn run(&self, limit: usize, provider: &mut dyn DecisionProvider) -> Result<CleanupResult> {
        let mut run = self.fetch(limit)?;
        if let Some(result) = run.result() {
            return Ok(result.clone());
        }
        let decisions = provider.decide(run.groups(), run.messages())?;
        self.apply(&mut run, &decisions)
    }

    /// Spread delete groups over the worker pool.
    fn apply_groups(&self, messages: &[Message], plan: &[&SenderGroup], halt: &Halt) -> Vec<SenderReport> {
        let cursor = AtomicUsize::new(0);
        let workers = self.workers.min(plan.len()).max(1);

        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for _ in 0..workers {
                let cursor = &cursor;
                handles.push(scope.spawn(move || {
                    let mut done = Vec::new();
                    while let Some(group) = plan.get(cursor.fetch_add(1, Ordering::Relaxed)) {
                        done.push(self.apply_group(messages, group, halt));
                    }
                    done
                }));
            }
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        })
    }

    fn apply_group(&self, messages: &[Message], group: &SenderGroup, halt: &Halt) -> SenderReport {
        let mut report = SenderReport::deleting(&group.sender_key);
        for message in group.messages(messages) {
            let (outcome, anomaly) = match self.halt_reason(halt) {
                Some(reason) => (MessageOutcome::NotAttempted { reason }, None),
                None => self.apply_message(message, halt),
            };
            debug!(
                sender = %group.sender_key,
                id = %message.id,
                outcome = outcome.label(),
                "Message applied"
            );
            self.emit(PipelineEvent::MessageApplied {
                sender_key: &group.sender_key,
                id: &message.id,
                outcome: &outcome,
            });
            report.record(&message.id, &outcome, anomaly);
        }
        report
    }

    /// Archive one message, then trash it. Trash is never attempted unless
    /// the save returned `Ok`.
    fn apply_message(&self, message: &Message, halt: &Halt) -> (MessageOutcome, Option<String>) {
        let saved = match self.save_with_retry(message) {
            Ok(saved) => saved,
            Err(e) => {
                warn!(id = %message.id, error = %e, "Archive failed; leaving message in place");
                return (
                    MessageOutcome::ArchiveFailed {
                        reason: e.to_string(),
                    },
                    None,
                );
            }
        };
        let anomaly = saved.anomaly(&message.id).map(|e| e.to_string());

        // Archived but not yet trashed is a safe place to stop.
        if let Some(reason) = self.halt_reason(halt) {
            return (MessageOutcome::ArchivedNotTrashed { reason }, anomaly);
        }

        let what = format!("trash {}", message.id);
        let outcome = match with_retry(&self.retry, &what, || self.source.move_to_trash(&message.id)) {
            Ok(()) => MessageOutcome::Trashed,
            Err(SweepError::MessageNotFound(_)) => MessageOutcome::AlreadyGone,
            Err(e) => {
                let e = exhausted(e, self.retry.max_retries + 1);
                warn!(id = %message.id, error = %e, "Trash failed; message is archived and still in the inbox");
                if matches!(e, SweepError::SourceUnavailable { retryable: false, .. }) {
                    halt.stop(e.to_string());
                }
                MessageOutcome::ArchivedNotTrashed {
                    reason: e.to_string(),
                }
            }
        };
        (outcome, anomaly)
    }

    fn save_with_retry(&self, message: &Message) -> Result<Saved> {
        let mut attempt = 0;
        loop {
            match self.archive.save(message) {
                Ok(saved) => return Ok(saved),
                Err(e) if attempt + 1 < self.save_attempts => {
                    warn!(id = %message.id, attempt, error = %e, "Archive write failed, retrying");
                    let delay = compute_delay(&self.retry, attempt);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn halt_reason(&self, halt: &Halt) -> Option<String> {
        if self.cancel.is_cancelled() {
            return Some(CANCELLED.to_string());
        }
        halt.reason()
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SweepError::Cancelled);
        }
        Ok(())
    }

    fn emit(&self, event: PipelineEvent<'_>) {
        if let Some(sink) = &self.events {
            sink(&event);
        }
    }
}
