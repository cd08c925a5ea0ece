//! Integration tests for the cleanup pipeline: ordering, isolation, resume.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use assert_fs::prelude::*;
use chrono::{TimeZone, Utc};
use predicates::prelude::*;

use sendersweep::archive::{Archive, ArchiveStore, SaveOutcome, Saved};
use sendersweep::error::{Result, SweepError};
use sendersweep::model::{EmailAddress, Header, Message, MessageBody};
use sendersweep::pipeline::{
    CancelToken, Decision, DecisionSet, Pipeline, PipelineEvent, PipelineRun, Stage,
};
use sendersweep::retry::RetryConfig;
use sendersweep::source::maildir::MaildirSource;
use sendersweep::source::memory::{Call, FaultKind, MemorySource, Op};
use sendersweep::source::MailSource;

fn msg(id: &str, from: &str) -> Message {
    Message {
        id: id.into(),
        sender: EmailAddress::parse(from),
        headers: vec![
            Header::new("From", from),
            Header::new("Subject", format!("Message {id}")),
        ],
        body: MessageBody {
            text: Some(format!("Body of message {id}")),
            html: None,
        },
        attachments: Vec::new(),
        received_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    }
}

/// Three messages from a@x.com and two from b@y.com, interleaved.
fn messages() -> Vec<Message> {
    vec![
        msg("a1", "A <a@x.com>"),
        msg("b1", "b@y.com"),
        msg("a2", "a@X.com"),
        msg("b2", "Bee <b@y.com>"),
        msg("a3", "a@x.com"),
    ]
}

fn mailbox() -> MemorySource {
    MemorySource::new(messages())
}

fn trash_calls(source: &MemorySource) -> Vec<String> {
    source
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Trash(id) => Some(id),
            _ => None,
        })
        .collect()
}

/// Archive that fails for chosen ids and checks every message it is asked
/// to save is still in the inbox.
struct CheckedArchive<'a> {
    inner: ArchiveStore,
    source: &'a MemorySource,
    fail_ids: HashSet<String>,
    attempts: AtomicUsize,
}

impl<'a> CheckedArchive<'a> {
    fn new(inner: ArchiveStore, source: &'a MemorySource) -> Self {
        Self {
            inner,
            source,
            fail_ids: HashSet::new(),
            attempts: AtomicUsize::new(0),
        }
    }

    fn failing(mut self, id: &str) -> Self {
        self.fail_ids.insert(id.to_string());
        self
    }
}

impl Archive for CheckedArchive<'_> {
    fn save(&self, message: &Message) -> Result<Saved> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        assert!(
            self.source.inbox_ids().contains(&message.id),
            "{} was trashed before it was archived",
            message.id
        );
        if self.fail_ids.contains(&message.id) {
            return Err(SweepError::ArchiveWrite {
                id: message.id.clone(),
                reason: "disk full".into(),
            });
        }
        self.inner.save(message)
    }
}

fn delete_a() -> DecisionSet {
    DecisionSet::new()
        .with("a@x.com", Decision::Delete)
        .with("b@y.com", Decision::Keep)
}

// ─── Scenarios ──────────────────────────────────────────────────────

#[test]
fn test_delete_one_sender_keep_another() {
    let dir = assert_fs::TempDir::new().unwrap();
    let source = mailbox();
    let store = ArchiveStore::open(dir.path()).unwrap();
    let pipeline = Pipeline::new(&source, store.clone()).with_retry(RetryConfig::none());

    let result = pipeline.run(10, &mut delete_a()).unwrap();

    assert_eq!(result.summary.archived, 3);
    assert_eq!(result.summary.trashed, 3);
    assert_eq!(result.summary.kept, 2);
    assert!(result.is_clean());

    let mut trashed = trash_calls(&source);
    trashed.sort();
    assert_eq!(trashed, vec!["a1", "a2", "a3"]);
    assert_eq!(source.inbox_ids(), vec!["b1", "b2"]);

    for id in ["a1", "a2", "a3"] {
        let record = store.load(id).unwrap().expect("archived");
        assert_eq!(record.sender_key, "a@x.com");
        let original = messages().into_iter().find(|m| m.id == id).unwrap();
        assert_eq!(record.message, original);
    }
    dir.child("b1.json").assert(predicate::path::missing());
    dir.child("b2.json").assert(predicate::path::missing());
}

#[test]
fn test_trash_failure_after_save_is_partial_success() {
    let dir = assert_fs::TempDir::new().unwrap();
    let source = mailbox();
    source.fail_always(Op::Trash, Some("a2"), FaultKind::Transient);
    let pipeline = Pipeline::new(&source, ArchiveStore::open(dir.path()).unwrap())
        .with_retry(RetryConfig::immediate(2));

    let mut run = pipeline.fetch(10).unwrap();
    let result = pipeline.apply(&mut run, &delete_a()).unwrap();

    assert_eq!(run.stage(), Stage::Completed);
    assert!(result.aborted.is_none());
    assert_eq!(result.summary.archived, 3);
    assert_eq!(result.summary.trashed, 2);
    assert_eq!(result.summary.archived_not_trashed, 1);

    let report = result.sender("a@x.com").unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, "a2");
    assert!(report.failures[0].reason.contains("after 3 attempts"));
    assert!(source.inbox_ids().contains(&"a2".to_string()));
    dir.child("a2.json").assert(predicate::path::exists());
}

// ─── Properties ─────────────────────────────────────────────────────

#[test]
fn test_nothing_is_trashed_without_an_archive_record() {
    let dir = assert_fs::TempDir::new().unwrap();
    let source = mailbox();
    let store = ArchiveStore::open(dir.path()).unwrap();
    let archive = CheckedArchive::new(store.clone(), &source).failing("a2");
    let decisions = DecisionSet::new()
        .with("a@x.com", Decision::Delete)
        .with("b@y.com", Decision::Delete);
    let pipeline = Pipeline::new(&source, archive)
        .with_retry(RetryConfig::none())
        .with_workers(3);

    pipeline.run(10, &mut decisions.clone()).unwrap();

    for id in source.trashed_ids() {
        let record = store.load(&id).unwrap().expect("trashed message must be archived");
        assert_eq!(record.message.id, id);
        assert!(record.validate().is_ok());
    }
    assert!(!trash_calls(&source).contains(&"a2".to_string()));
}

#[test]
fn test_unspecified_sender_is_untouched() {
    let dir = assert_fs::TempDir::new().unwrap();
    let source = mailbox();
    let pipeline = Pipeline::new(&source, ArchiveStore::open(dir.path()).unwrap());

    let only_a = DecisionSet::new().with("a@x.com", Decision::Delete);
    let result = pipeline.run(10, &mut only_a.clone()).unwrap();

    let b = result.sender("b@y.com").unwrap();
    assert_eq!(b.decision, Decision::Keep);
    assert_eq!(b.archived, 0);
    assert_eq!(b.trashed, 0);
    assert!(trash_calls(&source).iter().all(|id| id.starts_with('a')));
    dir.child("b1.json").assert(predicate::path::missing());
}

#[test]
fn test_archive_failure_is_isolated() {
    let dir = assert_fs::TempDir::new().unwrap();
    let source = mailbox();
    let archive = CheckedArchive::new(ArchiveStore::open(dir.path()).unwrap(), &source).failing("a1");
    let pipeline = Pipeline::new(&source, &archive)
        .with_retry(RetryConfig::none())
        .with_save_attempts(2);

    let result = pipeline.run(10, &mut delete_a()).unwrap();

    let a = result.sender("a@x.com").unwrap();
    assert_eq!(a.archive_failed, 1);
    assert_eq!(a.trashed, 2);
    assert_eq!(result.summary.archive_failed, 1);
    assert!(source.inbox_ids().contains(&"a1".to_string()));
    assert!(!trash_calls(&source).contains(&"a1".to_string()));
    // a1 was tried twice, a2 and a3 once each.
    assert_eq!(archive.attempts.load(Ordering::SeqCst), 4);
}

#[test]
fn test_already_gone_counts_as_removed() {
    let dir = assert_fs::TempDir::new().unwrap();
    let source = mailbox();
    let pipeline = Pipeline::new(&source, ArchiveStore::open(dir.path()).unwrap());

    let mut run = pipeline.fetch(10).unwrap();
    source.remove_out_of_band("a3");
    let result = pipeline.apply(&mut run, &delete_a()).unwrap();

    let a = result.sender("a@x.com").unwrap();
    assert_eq!(a.trashed, 3);
    assert_eq!(a.already_gone, 1);
    assert!(a.failures.is_empty());
    assert!(result.is_clean());
}

#[test]
fn test_vanished_during_fetch_is_skipped() {
    let dir = assert_fs::TempDir::new().unwrap();
    let source = mailbox();
    source.fail_always(Op::Fetch, Some("b2"), FaultKind::NotFound);
    let pipeline = Pipeline::new(&source, ArchiveStore::open(dir.path()).unwrap());

    let run = pipeline.fetch(10).unwrap();
    assert_eq!(run.messages().len(), 4);
    assert_eq!(run.missing(), ["b2".to_string()]);
    assert_eq!(run.groups().get("b@y.com").unwrap().len(), 1);
}

#[test]
fn test_fetch_failure_aborts_before_any_change() {
    let dir = assert_fs::TempDir::new().unwrap();
    let source = mailbox();
    source.fail_always(Op::Fetch, Some("a2"), FaultKind::Transient);
    let pipeline = Pipeline::new(&source, ArchiveStore::open(dir.path()).unwrap())
        .with_retry(RetryConfig::immediate(1));

    let err = pipeline.run(10, &mut delete_a()).unwrap_err();
    assert!(matches!(err, SweepError::SourceUnavailable { retryable: true, .. }));
    assert!(trash_calls(&source).is_empty());
    assert_eq!(source.inbox_ids().len(), 5);
    dir.child("a1.json").assert(predicate::path::missing());
}

#[test]
fn test_transient_list_failure_is_retried() {
    let dir = assert_fs::TempDir::new().unwrap();
    let source = mailbox();
    source.fail_next(Op::List, None, FaultKind::Transient, 2);
    let pipeline = Pipeline::new(&source, ArchiveStore::open(dir.path()).unwrap())
        .with_retry(RetryConfig::immediate(3));

    let run = pipeline.fetch(10).unwrap();
    assert_eq!(run.messages().len(), 5);
    let lists = source.calls().iter().filter(|c| matches!(c, Call::List(_))).count();
    assert_eq!(lists, 3);
}

#[test]
fn test_permanent_trash_failure_aborts_partial() {
    let dir = assert_fs::TempDir::new().unwrap();
    let source = mailbox();
    source.fail_always(Op::Trash, None, FaultKind::Permanent);
    let pipeline = Pipeline::new(&source, ArchiveStore::open(dir.path()).unwrap())
        .with_retry(RetryConfig::immediate(3))
        .with_workers(1);

    let mut run = pipeline.fetch(10).unwrap();
    let result = pipeline.apply(&mut run, &delete_a()).unwrap();

    assert_eq!(run.stage(), Stage::AbortedPartial);
    assert!(result.aborted.is_some());
    // First message archived, trash refused once, the rest never started.
    assert_eq!(trash_calls(&source), vec!["a1"]);
    assert_eq!(result.summary.archived, 1);
    assert_eq!(result.summary.archived_not_trashed, 1);
    assert_eq!(result.summary.not_attempted, 2);
    assert_eq!(source.inbox_ids().len(), 5);
}

#[test]
fn test_aborted_run_can_be_resumed() {
    let dir = assert_fs::TempDir::new().unwrap();
    let source = mailbox();
    source.fail_next(Op::Trash, None, FaultKind::Permanent, 1);
    let store = ArchiveStore::open(dir.path()).unwrap();
    let pipeline = Pipeline::new(&source, store.clone())
        .with_retry(RetryConfig::none())
        .with_workers(1);

    let mut run = pipeline.fetch(10).unwrap();
    pipeline.apply(&mut run, &delete_a()).unwrap();
    assert_eq!(run.stage(), Stage::AbortedPartial);

    // Persist and pick the run up again.
    let run_file = dir.child("run.json");
    run.save(run_file.path()).unwrap();
    let mut resumed = PipelineRun::load(run_file.path()).unwrap();
    let result = pipeline.apply(&mut resumed, &delete_a()).unwrap();

    assert_eq!(resumed.stage(), Stage::Completed);
    assert_eq!(result.summary.trashed, 3);
    assert_eq!(result.summary.anomalies, 0);
    assert_eq!(source.inbox_ids(), vec!["b1", "b2"]);
    assert_eq!(store.list().unwrap().len(), 3);
}

#[test]
fn test_rearchiving_same_content_is_noop() {
    let dir = assert_fs::TempDir::new().unwrap();
    let store = ArchiveStore::open(dir.path()).unwrap();
    let m = msg("a1", "a@x.com");

    let first = store.save(&m).unwrap();
    let before = std::fs::read(&first.path).unwrap();
    let second = store.save(&m).unwrap();

    assert_eq!(second.outcome, SaveOutcome::Unchanged);
    assert_eq!(std::fs::read(&second.path).unwrap(), before);
    assert_eq!(store.list().unwrap().len(), 1);
}

#[test]
fn test_changed_content_is_reported_as_anomaly() {
    let dir = assert_fs::TempDir::new().unwrap();
    let store = ArchiveStore::open(dir.path()).unwrap();
    store.save(&msg("a1", "a@x.com")).unwrap();

    let mut changed = msg("a1", "a@x.com");
    changed.body.text = Some("edited".into());
    let source = MemorySource::new(vec![changed]);
    let pipeline = Pipeline::new(&source, store.clone());

    let result = pipeline
        .run(10, &mut DecisionSet::new().with("a@x.com", Decision::Delete))
        .unwrap();

    assert_eq!(result.summary.anomalies, 1);
    assert_eq!(result.summary.trashed, 1);
    assert_eq!(store.load("a1").unwrap().unwrap().message.body.text.as_deref(), Some("edited"));
    assert_eq!(store.verify().unwrap().superseded, 1);
}

#[test]
fn test_cancel_before_apply_changes_nothing() {
    let dir = assert_fs::TempDir::new().unwrap();
    let source = mailbox();
    let cancel = CancelToken::new();
    let pipeline = Pipeline::new(&source, ArchiveStore::open(dir.path()).unwrap()).with_cancel(cancel.clone());

    let mut run = pipeline.fetch(10).unwrap();
    cancel.cancel();
    assert!(matches!(pipeline.apply(&mut run, &delete_a()), Err(SweepError::Cancelled)));
    assert_eq!(run.stage(), Stage::AwaitingDecisions);
    assert!(trash_calls(&source).is_empty());
}

#[test]
fn test_cancel_during_apply_never_trashes_unarchived() {
    let dir = assert_fs::TempDir::new().unwrap();
    let source = mailbox();
    let store = ArchiveStore::open(dir.path()).unwrap();
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let pipeline = Pipeline::new(&source, store.clone())
        .with_cancel(cancel)
        .with_workers(1)
        .with_events(Box::new(move |event: &PipelineEvent<'_>| {
            if let PipelineEvent::MessageApplied { .. } = event {
                trigger.cancel();
            }
        }));

    let mut run = pipeline.fetch(10).unwrap();
    let result = pipeline.apply(&mut run, &delete_a()).unwrap();

    assert_eq!(run.stage(), Stage::AbortedPartial);
    assert_eq!(result.aborted.as_deref(), Some("cancelled"));
    assert_eq!(result.summary.trashed, 1);
    assert_eq!(result.summary.not_attempted, 2);
    for id in source.trashed_ids() {
        assert!(store.contains(&id));
    }
}

#[test]
fn test_events_cover_every_stage() {
    let dir = assert_fs::TempDir::new().unwrap();
    let source = mailbox();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let pipeline = Pipeline::new(&source, ArchiveStore::open(dir.path()).unwrap()).with_events(Box::new(
        move |event: &PipelineEvent<'_>| {
            let label = match event {
                PipelineEvent::FetchProgress { .. } => "fetch".to_string(),
                PipelineEvent::GroupsReady { senders, .. } => format!("groups:{senders}"),
                PipelineEvent::ApplyStarted { messages, .. } => format!("apply:{messages}"),
                PipelineEvent::MessageApplied { outcome, .. } => outcome.label().to_string(),
                PipelineEvent::Finished { summary } => format!("done:{}", summary.trashed),
            };
            sink.lock().unwrap().push(label);
        },
    ));

    pipeline.run(10, &mut delete_a()).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.iter().filter(|s| *s == "fetch").count(), 5);
    assert!(seen.contains(&"groups:2".to_string()));
    assert!(seen.contains(&"apply:3".to_string()));
    assert_eq!(seen.iter().filter(|s| *s == "trashed").count(), 3);
    assert_eq!(seen.last().map(String::as_str), Some("done:3"));
}

#[test]
fn test_group_order_follows_fetch_order() {
    let dir = assert_fs::TempDir::new().unwrap();
    let source = mailbox();
    let pipeline = Pipeline::new(&source, ArchiveStore::open(dir.path()).unwrap()).with_workers(4);

    pipeline.run(10, &mut delete_a()).unwrap();
    assert_eq!(trash_calls(&source), vec!["a1", "a2", "a3"]);
}

#[test]
fn test_decision_provider_sees_groups() {
    let dir = assert_fs::TempDir::new().unwrap();
    let source = mailbox();
    let pipeline = Pipeline::new(&source, ArchiveStore::open(dir.path()).unwrap());

    let mut provider = |groups: &sendersweep::group::SenderGroups, messages: &[Message]| -> Result<DecisionSet> {
        assert_eq!(messages.len(), 5);
        let biggest = groups.by_size()[0].sender_key.clone();
        Ok(DecisionSet::new().with(biggest, Decision::Delete))
    };
    let result = pipeline.run(10, &mut provider).unwrap();
    assert_eq!(result.sender("a@x.com").unwrap().trashed, 3);
}

// ─── Maildir end to end ─────────────────────────────────────────────

fn write_mail(dir: &assert_fs::TempDir, name: &str, from: &str, subject: &str) {
    dir.child(format!("cur/{name}:2,S"))
        .write_str(&format!(
            "From: {from}\r\nTo: me@home.org\r\nSubject: {subject}\r\nDate: Fri, 1 Mar 2024 12:00:00 +0000\r\n\r\nHello from {from}\r\n"
        ))
        .unwrap();
}

#[test]
fn test_maildir_end_to_end() {
    let mail = assert_fs::TempDir::new().unwrap();
    let archive_dir = assert_fs::TempDir::new().unwrap();
    mail.child("new").create_dir_all().unwrap();
    write_mail(&mail, "1001.x", "Deals <deals@shop.com>", "Sale");
    write_mail(&mail, "1002.x", "deals@SHOP.com", "Another sale");
    write_mail(&mail, "1003.x", "Friend <friend@home.org>", "Lunch?");

    let source = MaildirSource::open(mail.path()).unwrap();
    let store = ArchiveStore::open(archive_dir.path()).unwrap();
    let pipeline = Pipeline::new(&source, store.clone());

    let mut run = pipeline.fetch(10).unwrap();
    assert_eq!(run.groups().len(), 2);
    assert_eq!(run.group_messages("deals@shop.com").len(), 2);

    let decisions = DecisionSet::new().with("deals@shop.com", Decision::Delete);
    let result = pipeline.apply(&mut run, &decisions).unwrap();
    assert_eq!(result.summary.trashed, 2);

    mail.child("cur/1001.x:2,S").assert(predicate::path::missing());
    mail.child(".Trash/cur/1001.x:2,S").assert(predicate::path::exists());
    mail.child("cur/1003.x:2,S").assert(predicate::path::exists());
    archive_dir
        .child("1001.x.json")
        .assert(predicate::str::contains("\"sender_key\": \"deals@shop.com\""));

    let record = store.load("1002.x").unwrap().unwrap();
    assert_eq!(record.message.subject(), "Another sale");
    assert_eq!(source.list_recent(10).unwrap(), vec!["1003.x".to_string()]);
    assert!(result.sender("deals@shop.com").unwrap().failures.is_empty());
}

#[test]
fn test_maildir_skips_unreadable_file() {
    let mail = assert_fs::TempDir::new().unwrap();
    let archive_dir = assert_fs::TempDir::new().unwrap();
    mail.child("new").create_dir_all().unwrap();
    write_mail(&mail, "good1", "Deals <deals@shop.com>", "Sale");
    write_mail(&mail, "good2", "deals@shop.com", "Another sale");
    mail.child("cur/empty").touch().unwrap();

    let source = MaildirSource::open(mail.path()).unwrap();
    let pipeline = Pipeline::new(&source, ArchiveStore::open(archive_dir.path()).unwrap());

    let mut run = pipeline.fetch(10).unwrap();
    assert_eq!(run.stage(), Stage::AwaitingDecisions);
    assert_eq!(run.messages().len(), 2);
    assert_eq!(run.group_messages("deals@shop.com").len(), 2);
    assert_eq!(run.unreadable().len(), 1);
    assert_eq!(run.unreadable()[0].id, "empty");

    let decisions = DecisionSet::new().with("deals@shop.com", Decision::Delete);
    let result = pipeline.apply(&mut run, &decisions).unwrap();
    assert_eq!(result.summary.trashed, 2);
    mail.child("cur/empty").assert(predicate::path::exists());
    archive_dir.child("empty.json").assert(predicate::path::missing());
}
