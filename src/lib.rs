//! `sendersweep`: bulk inbox cleanup by sender, archive first.
//!
//! Recent messages are fetched from a mail source, grouped by normalized
//! sender, and reviewed one sender at a time. Every message from a sender
//! marked for deletion is written to a local archive and only then moved to
//! the trash. A failed archive write leaves the message where it is.

pub mod archive;
pub mod config;
pub mod error;
pub mod group;
pub mod model;
pub mod parse;
pub mod pipeline;
pub mod retry;
pub mod source;
