//! On-disk archive record format.
//!
//! One pretty-printed JSON document per archived message, named after the
//! message id:
//!
//! ```text
//! {
//!   "format": "sendersweep-archive",
//!   "version": 1,
//!   "message_id": "18c1…",
//!   "sender_key": "deals@shop.com",
//!   "decision": "delete",
//!   "content_digest": "<sha256 of the message JSON>",
//!   "archived_at": "2024-01-02T10:00:00Z",
//!   "message": { "id", "sender", "headers", "body", "attachments", "received_at" }
//! }
//! ```
//!
//! The document is readable with any JSON tool; nothing in it depends on
//! this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::Message;

/// Value of the `format` field.
pub const FORMAT: &str = "sendersweep-archive";

/// Current record format version.
pub const VERSION: u32 = 1;

/// File extension for published records.
pub const EXTENSION: &str = "json";

/// Decision recorded on every archived message.
pub const DECISION_DELETE: &str = "delete";

/// A durable copy of one message slated for removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub format: String,
    pub version: u32,
    pub message_id: String,
    pub sender_key: String,
    pub decision: String,
    /// Hex SHA-256 of the serialized message; identifies the content.
    pub content_digest: String,
    pub archived_at: DateTime<Utc>,
    pub message: Message,
}

impl ArchiveRecord {
    /// Wrap `message` in a new record stamped `archived_at`.
    pub fn new(message: &Message, archived_at: DateTime<Utc>) -> Self {
        Self {
            format: FORMAT.to_string(),
            version: VERSION,
            message_id: message.id.clone(),
            sender_key: message.sender_key(),
            decision: DECISION_DELETE.to_string(),
            content_digest: content_digest(message),
            archived_at,
            message: message.clone(),
        }
    }

    /// Check the envelope fields and that the digest matches the content.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.format != FORMAT {
            return Err(format!("unknown format '{}'", self.format));
        }
        if self.version != VERSION {
            return Err(format!(
                "incompatible version: expected {VERSION}, found {}",
                self.version
            ));
        }
        if self.message_id != self.message.id {
            return Err(format!(
                "record id '{}' does not match message id '{}'",
                self.message_id, self.message.id
            ));
        }
        let actual = content_digest(&self.message);
        if actual != self.content_digest {
            return Err(format!(
                "content digest mismatch: recorded {}, computed {actual}",
                self.content_digest
            ));
        }
        Ok(())
    }
}

/// Hex SHA-256 over the canonical JSON form of a message.
pub fn content_digest(message: &Message) -> String {
    // Serializing plain structs, strings and vectors cannot fail.
    let bytes = serde_json::to_vec(message).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}
