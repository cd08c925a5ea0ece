//! Archive store: durable, idempotent, one JSON record per message id.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::archive::format::{content_digest, ArchiveRecord, EXTENSION};
use crate::archive::{Archive, SaveOutcome, Saved};
use crate::error::{Result, SweepError};
use crate::model::Message;

/// Marker inserted in the file name of a record displaced by a conflicting save.
const SUPERSEDED_MARKER: &str = ".superseded-";

/// Prefix of in-flight temporary files; never read as records.
const TMP_PREFIX: &str = ".tmp-";

/// Maximum length of the id-derived part of a record file name.
const MAX_STEM: usize = 150;

/// Archive rooted at a local directory.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    root: PathBuf,
}

/// Result of [`ArchiveStore::verify`].
#[derive(Debug, Default)]
pub struct VerifyReport {
    /// Records whose envelope and digest check out.
    pub valid: usize,
    /// Records that could not be read or failed validation.
    pub invalid: Vec<(PathBuf, String)>,
    /// Displaced records kept after a conflicting save.
    pub superseded: usize,
    /// Leftover temporary files from interrupted writes.
    pub leftover_tmp: usize,
}

impl ArchiveStore {
    /// Open (and create if needed) an archive directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| SweepError::io(&root, e))?;
        Ok(Self { root })
    }

    /// The archive directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the published record for `id`.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.{EXTENSION}", record_stem(id)))
    }

    /// Whether a record for `id` has been published.
    pub fn contains(&self, id: &str) -> bool {
        self.path_for(id).is_file()
    }

    /// Load the record for `id`, if any.
    pub fn load(&self, id: &str) -> Result<Option<ArchiveRecord>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        read_record(&path).map(Some)
    }

    /// Load every published record (superseded copies excluded), sorted by
    /// archive time.
    pub fn list(&self) -> Result<Vec<ArchiveRecord>> {
        let mut records = Vec::new();
        for path in self.record_paths()? {
            match read_record(&path) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
            }
        }
        records.sort_by(|a, b| {
            a.archived_at
                .cmp(&b.archived_at)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        Ok(records)
    }

    /// Re-read every record and check its digest.
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        let read = fs::read_dir(&self.root).map_err(|e| SweepError::io(&self.root, e))?;
        for item in read {
            let item = item.map_err(|e| SweepError::io(&self.root, e))?;
            let name = item.file_name().to_string_lossy().into_owned();
            if name.starts_with(TMP_PREFIX) {
                report.leftover_tmp += 1;
            } else if name.contains(SUPERSEDED_MARKER) {
                report.superseded += 1;
            }
        }
        for path in self.record_paths()? {
            let checked = read_record(&path).and_then(|record| {
                record.validate().map_err(|reason| SweepError::IntegrityAnomaly {
                    id: record.message_id.clone(),
                    expected: record.content_digest.clone(),
                    found: reason,
                })
            });
            match checked {
                Ok(()) => report.valid += 1,
                Err(e) => report.invalid.push((path, e.to_string())),
            }
        }
        Ok(report)
    }

    /// Paths of published records.
    fn record_paths(&self) -> Result<Vec<PathBuf>> {
        let read = fs::read_dir(&self.root).map_err(|e| SweepError::io(&self.root, e))?;
        let mut paths = Vec::new();
        for item in read {
            let item = item.map_err(|e| SweepError::io(&self.root, e))?;
            let name = item.file_name().to_string_lossy().into_owned();
            let is_record = name.ends_with(&format!(".{EXTENSION}"))
                && !name.starts_with('.')
                && !name.contains(SUPERSEDED_MARKER);
            if is_record {
                paths.push(item.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn save_inner(&self, message: &Message) -> Result<Saved> {
        let path = self.path_for(&message.id);
        let digest = content_digest(message);

        let outcome = if path.exists() {
            let previous = read_record(&path)
                .map(|r| r.content_digest)
                .unwrap_or_else(|e| {
                    warn!(path = %path.display(), error = %e, "Existing record unreadable");
                    "unreadable".to_string()
                });
            if previous == digest {
                debug!(id = %message.id, "Archive record already present");
                return Ok(Saved {
                    path,
                    digest,
                    outcome: SaveOutcome::Unchanged,
                });
            }
            // Keep the displaced copy; the archive never deletes content.
            let superseded = self.superseded_path(&message.id, &previous);
            fs::rename(&path, &superseded).map_err(|e| SweepError::io(&path, e))?;
            warn!(
                id = %message.id,
                previous = %previous,
                current = %digest,
                kept = %superseded.display(),
                "Archive content changed for an existing id"
            );
            SaveOutcome::Replaced {
                previous_digest: previous,
                superseded_path: superseded,
            }
        } else {
            SaveOutcome::Written
        };

        let record = ArchiveRecord::new(message, Utc::now());
        let json = serde_json::to_vec_pretty(&record).map_err(|e| SweepError::ArchiveWrite {
            id: message.id.clone(),
            reason: e.to_string(),
        })?;
        atomic_write(&path, &json)?;
        info!(id = %message.id, path = %path.display(), "Archived message");

        Ok(Saved {
            path,
            digest,
            outcome,
        })
    }

    fn superseded_path(&self, id: &str, previous_digest: &str) -> PathBuf {
        let short: String = previous_digest.chars().take(12).collect();
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.f");
        self.root.join(format!(
            "{}{SUPERSEDED_MARKER}{short}-{stamp}.{EXTENSION}",
            record_stem(id)
        ))
    }
}

impl Archive for ArchiveStore {
    fn save(&self, message: &Message) -> Result<Saved> {
        self.save_inner(message).map_err(|e| match e {
            SweepError::ArchiveWrite { .. } => e,
            other => SweepError::ArchiveWrite {
                id: message.id.clone(),
                reason: other.to_string(),
            },
        })
    }
}

/// Read and parse one record file.
fn read_record(path: &Path) -> Result<ArchiveRecord> {
    let data = fs::read(path).map_err(|e| SweepError::io(path, e))?;
    serde_json::from_slice(&data).map_err(|e| SweepError::IntegrityAnomaly {
        id: path.display().to_string(),
        expected: "archive record".to_string(),
        found: e.to_string(),
    })
}

/// Write bytes to `path` via a temp file in the same directory, fsync, then
/// rename. Readers see either the old file, no file, or the complete new one.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let parent = path.parent().unwrap_or(Path::new("."));
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_path = parent.join(format!("{TMP_PREFIX}{}-{seq}", std::process::id()));

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        sync_dir(parent);
        Ok(())
    };
    write().map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        SweepError::io(path, e)
    })
}

/// Persist the directory entry created by a rename.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// File-name stem for a message id.
///
/// Safe ids are used verbatim. Anything else is sanitized and suffixed with
/// a short hash of the original id so distinct ids never share a file.
fn record_stem(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '@' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM)
        .collect();

    let verbatim = sanitized == id && !id.is_empty() && !id.starts_with('.');
    if verbatim {
        return sanitized;
    }
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    let base = sanitized.trim_start_matches('.');
    let base = if base.is_empty() { "message" } else { base };
    format!("{base}-{}", &hash[..12])
}
