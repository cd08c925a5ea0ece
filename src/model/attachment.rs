//! Attachment metadata.
//!
//! Only metadata is archived. Attachment bodies never leave the mail service.

/// Metadata about an email attachment.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AttachmentMeta {
    /// Filename of the attachment. Generated if missing from the headers.
    pub filename: String,

    /// MIME content type (e.g. `"image/jpeg"`, `"application/pdf"`).
    pub mime_type: String,

    /// Decoded size in bytes as reported by the source.
    pub size: u64,
}
