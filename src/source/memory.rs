//! In-memory mailbox.
//!
//! Holds messages in a `Vec` (index 0 is the newest) and records every call
//! made against it. Faults can be injected per operation and per id, which
//! makes it the workhorse for pipeline tests and for embedding front-ends
//! that want a dry run.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, SweepError};
use crate::model::Message;

use super::MailSource;

/// Which adapter operation a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Fetch,
    Trash,
}

/// Kind of error an injected fault produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// `SourceUnavailable` with `retryable = true`.
    Transient,
    /// `SourceUnavailable` with `retryable = false`.
    Permanent,
    /// `MessageNotFound`.
    NotFound,
    /// `InvalidMessage`.
    Malformed,
}

#[derive(Debug, Clone)]
struct Fault {
    kind: FaultKind,
    /// `None` means the fault never clears.
    remaining: Option<u32>,
}

/// A recorded adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List(usize),
    Fetch(String),
    Trash(String),
}

#[derive(Debug, Default)]
struct State {
    inbox: Vec<Message>,
    trash: Vec<Message>,
    faults: HashMap<(Op, Option<String>), Fault>,
    calls: Vec<Call>,
}

/// Thread-safe in-memory [`MailSource`].
#[derive(Debug, Default)]
pub struct MemorySource {
    state: Mutex<State>,
}

impl MemorySource {
    /// Create a mailbox holding `messages`, newest first.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            state: Mutex::new(State {
                inbox: messages,
                ..State::default()
            }),
        }
    }

    /// Fail the next `times` calls of `op` (for `id`, or any id if `None`).
    pub fn fail_next(&self, op: Op, id: Option<&str>, kind: FaultKind, times: u32) {
        self.lock().faults.insert(
            (op, id.map(String::from)),
            Fault {
                kind,
                remaining: Some(times),
            },
        );
    }

    /// Fail every call of `op` (for `id`, or any id if `None`).
    pub fn fail_always(&self, op: Op, id: Option<&str>, kind: FaultKind) {
        self.lock().faults.insert(
            (op, id.map(String::from)),
            Fault {
                kind,
                remaining: None,
            },
        );
    }

    /// Remove a message behind the pipeline's back.
    pub fn remove_out_of_band(&self, id: &str) {
        self.lock().inbox.retain(|m| m.id != id);
    }

    /// Ids still in the inbox, newest first.
    pub fn inbox_ids(&self) -> Vec<String> {
        self.lock().inbox.iter().map(|m| m.id.clone()).collect()
    }

    /// Ids moved to the trash, in the order they were trashed.
    pub fn trashed_ids(&self) -> Vec<String> {
        self.lock().trash.iter().map(|m| m.id.clone()).collect()
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl State {
    /// Consume a matching fault, preferring an id-specific one.
    fn take_fault(&mut self, op: Op, id: Option<&str>) -> Option<SweepError> {
        let specific = id.map(|i| (op, Some(i.to_string())));
        let key = match specific {
            Some(k) if self.faults.contains_key(&k) => k,
            _ => (op, None),
        };
        let fault = self.faults.get_mut(&key)?;
        match fault.remaining.as_mut() {
            Some(0) => return None,
            Some(n) => *n -= 1,
            None => {}
        }
        let what = id.unwrap_or("mailbox");
        Some(match fault.kind {
            FaultKind::Transient => SweepError::transient(format!("injected rate limit on {what}")),
            FaultKind::Permanent => SweepError::permanent(format!("injected auth failure on {what}")),
            FaultKind::NotFound => SweepError::MessageNotFound(what.to_string()),
            FaultKind::Malformed => SweepError::InvalidMessage(format!("{what}: empty message")),
        })
    }
}

impl MailSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<String>> {
        let mut state = self.lock();
        state.calls.push(Call::List(limit));
        if let Some(err) = state.take_fault(Op::List, None) {
            return Err(err);
        }
        Ok(state.inbox.iter().take(limit).map(|m| m.id.clone()).collect())
    }

    fn fetch_full(&self, id: &str) -> Result<Message> {
        let mut state = self.lock();
        state.calls.push(Call::Fetch(id.to_string()));
        if let Some(err) = state.take_fault(Op::Fetch, Some(id)) {
            return Err(err);
        }
        state
            .inbox
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| SweepError::MessageNotFound(id.to_string()))
    }

    fn move_to_trash(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call::Trash(id.to_string()));
        if let Some(err) = state.take_fault(Op::Trash, Some(id)) {
            return Err(err);
        }
        let pos = state
            .inbox
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| SweepError::MessageNotFound(id.to_string()))?;
        let msg = state.inbox.remove(pos);
        state.trash.push(msg);
        Ok(())
    }
}
