//! Local archive of messages slated for removal.

pub mod format;
pub mod store;

use std::path::PathBuf;

use crate::error::{Result, SweepError};
use crate::model::Message;

pub use format::ArchiveRecord;
pub use store::{ArchiveStore, VerifyReport};

/// What a successful save did on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new record was published.
    Written,
    /// An identical record already existed; nothing was written.
    Unchanged,
    /// A record with different content existed. It was moved aside to
    /// `superseded_path` and the new content published under the id.
    Replaced {
        previous_digest: String,
        superseded_path: PathBuf,
    },
}

/// Successful save: where the record lives and what happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saved {
    pub path: PathBuf,
    /// Content digest of the saved message.
    pub digest: String,
    pub outcome: SaveOutcome,
}

impl Saved {
    /// The integrity anomaly to surface, if this save replaced different content.
    pub fn anomaly(&self, id: &str) -> Option<SweepError> {
        match &self.outcome {
            SaveOutcome::Replaced {
                previous_digest, ..
            } => Some(SweepError::IntegrityAnomaly {
                id: id.to_string(),
                expected: self.digest.clone(),
                found: previous_digest.clone(),
            }),
            _ => None,
        }
    }
}

/// Durable per-message storage used before any remote removal.
///
/// `save` must only return `Ok` once the record is durable and readable.
/// Failures are reported as `ArchiveWrite`.
pub trait Archive: Sync {
    fn save(&self, message: &Message) -> Result<Saved>;
}

impl<A: Archive + ?Sized> Archive for &A {
    fn save(&self, message: &Message) -> Result<Saved> {
        (**self).save(message)
    }
}
