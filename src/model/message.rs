//! Fetched mail message and its parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::address::EmailAddress;
use super::attachment::AttachmentMeta;

/// Subject shown for messages without a `Subject` header.
pub const NO_SUBJECT: &str = "(no subject)";

/// Number of characters kept in a body preview.
pub const PREVIEW_CHARS: usize = 140;

/// A single header line. Names are not unique within a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Decoded body representations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    /// Plain-text body (from the `text/plain` part).
    pub text: Option<String>,
    /// HTML body (from the `text/html` part, if present).
    pub html: Option<String>,
}

/// One fetched mail item.
///
/// Created by a [`MailSource`](crate::source::MailSource) on fetch and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque identifier assigned by the mail service, unique per mailbox.
    pub id: String,
    /// Parsed `From` identity.
    pub sender: EmailAddress,
    /// Headers in original order.
    pub headers: Vec<Header>,
    pub body: MessageBody,
    /// Attachment metadata only; binary content is not fetched.
    pub attachments: Vec<AttachmentMeta>,
    /// Used for display and ordering only.
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// The grouping key for this message's sender.
    pub fn sender_key(&self) -> String {
        self.sender.sender_key()
    }

    /// First header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Subject line, or [`NO_SUBJECT`].
    pub fn subject(&self) -> &str {
        match self.header("subject") {
            Some(s) if !s.trim().is_empty() => s,
            _ => NO_SUBJECT,
        }
    }

    /// Short single-line body preview, ellipsized past [`PREVIEW_CHARS`].
    pub fn preview(&self) -> String {
        let text = self.body.text.as_deref().unwrap_or_default();
        let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if flat.chars().count() > PREVIEW_CHARS {
            let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
            format!("{cut}…")
        } else {
            flat
        }
    }
}
