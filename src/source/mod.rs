//! Mail source adapters.
//!
//! The pipeline consumes a mailbox only through [`MailSource`]. Credentials
//! and token refresh live outside this crate: adapters are handed an
//! already-authorized handle.

pub mod gmail;
pub mod maildir;
pub mod memory;

use crate::error::Result;
use crate::model::Message;

/// Capability interface over a remote or local mailbox.
///
/// Error contract:
/// - `SourceUnavailable` with `retryable = true` for rate limits and
///   transport errors, `retryable = false` for permanent failures.
/// - `MessageNotFound` when the id no longer exists.
///
/// Implementations must be safe to call from several worker threads at once.
pub trait MailSource: Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Ids of the most recent inbox messages, newest first.
    ///
    /// Returns fewer than `limit` ids when the mailbox is smaller.
    fn list_recent(&self, limit: usize) -> Result<Vec<String>>;

    /// Full content of one message.
    fn fetch_full(&self, id: &str) -> Result<Message>;

    /// Move one message out of the inbox into the trash.
    fn move_to_trash(&self, id: &str) -> Result<()>;
}

impl<S: MailSource + ?Sized> MailSource for &S {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<String>> {
        (**self).list_recent(limit)
    }

    fn fetch_full(&self, id: &str) -> Result<Message> {
        (**self).fetch_full(id)
    }

    fn move_to_trash(&self, id: &str) -> Result<()> {
        (**self).move_to_trash(id)
    }
}

impl<S: MailSource + ?Sized> MailSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<String>> {
        (**self).list_recent(limit)
    }

    fn fetch_full(&self, id: &str) -> Result<Message> {
        (**self).fetch_full(id)
    }

    fn move_to_trash(&self, id: &str) -> Result<()> {
        (**self).move_to_trash(id)
    }
}
