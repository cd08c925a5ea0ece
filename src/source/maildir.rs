//! Local Maildir mailbox.
//!
//! Messages live in `new/` and `cur/`. The message id is the Maildir unique
//! name (the file name up to the `:` info separator). Trashing moves the file
//! into the Maildir++ `.Trash/cur/` folder, the same place mail clients look.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Result, SweepError};
use crate::model::Message;
use crate::parse;

use super::MailSource;

/// Sub-folders scanned for inbox messages.
const INBOX_DIRS: [&str; 2] = ["new", "cur"];

/// Maildir++ trash folder, relative to the Maildir root.
pub const TRASH_DIR: &str = ".Trash";

/// A Maildir on the local filesystem.
#[derive(Debug, Clone)]
pub struct MaildirSource {
    root: PathBuf,
}

struct Entry {
    id: String,
    path: PathBuf,
    modified: SystemTime,
}

impl MaildirSource {
    /// Open a Maildir. The root must contain `cur/` or `new/`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !INBOX_DIRS.iter().any(|d| root.join(d).is_dir()) {
            return Err(SweepError::Config(format!(
                "'{}' is not a Maildir (no cur/ or new/)",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// The Maildir root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory trashed messages are moved into.
    pub fn trash_dir(&self) -> PathBuf {
        self.root.join(TRASH_DIR).join("cur")
    }

    fn scan(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for dir in INBOX_DIRS {
            let dir = self.root.join(dir);
            if !dir.is_dir() {
                continue;
            }
            let read = std::fs::read_dir(&dir).map_err(|e| unavailable(&dir, e))?;
            for item in read {
                let item = item.map_err(|e| unavailable(&dir, e))?;
                let path = item.path();
                if !path.is_file() {
                    continue;
                }
                let file_name = item.file_name().to_string_lossy().into_owned();
                if file_name.starts_with('.') {
                    continue;
                }
                let modified = item
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                entries.push(Entry {
                    id: unique_name(&file_name).to_string(),
                    path,
                    modified,
                });
            }
        }
        // Newest first; ties broken by id for a stable listing.
        entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    fn locate(&self, id: &str) -> Result<Entry> {
        self.scan()?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| SweepError::MessageNotFound(id.to_string()))
    }
}

impl MailSource for MaildirSource {
    fn name(&self) -> &str {
        "maildir"
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<String>> {
        Ok(self
            .scan()?
            .into_iter()
            .take(limit)
            .map(|e| e.id)
            .collect())
    }

    fn fetch_full(&self, id: &str) -> Result<Message> {
        let entry = self.locate(id)?;
        let raw = std::fs::read(&entry.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SweepError::MessageNotFound(id.to_string())
            } else {
                unavailable(&entry.path, e)
            }
        })?;
        let fallback: DateTime<Utc> = entry.modified.into();
        parse::parse_message(id, &raw, fallback)
    }

    fn move_to_trash(&self, id: &str) -> Result<()> {
        let entry = self.locate(id)?;
        let trash = self.trash_dir();
        std::fs::create_dir_all(&trash).map_err(|e| unavailable(&trash, e))?;
        let file_name = entry
            .path
            .file_name()
            .ok_or_else(|| SweepError::MessageNotFound(id.to_string()))?;
        let target = trash.join(file_name);
        std::fs::rename(&entry.path, &target).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SweepError::MessageNotFound(id.to_string())
            } else {
                unavailable(&entry.path, e)
            }
        })?;
        debug!(id = %id, target = %target.display(), "Moved to Maildir trash");
        Ok(())
    }
}

/// Maildir unique name: everything before the `:2,FLAGS` info suffix.
fn unique_name(file_name: &str) -> &str {
    file_name.split(':').next().unwrap_or(file_name)
}

/// Local I/O failures are not worth retrying.
fn unavailable(path: &Path, e: std::io::Error) -> SweepError {
    SweepError::permanent(format!("{}: {e}", path.display()))
}
