use chrono::{DateTime, Days, NaiveDate, Utc};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::manifest::Manifest;
use super::SnapshotError;
use crate::games::TodaySnapshot;

const DEFAULT_RETENTION_DAYS: i64 = 14;
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Whether a snapshot write touched the snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Bytes on disk already matched; only the manifest was refreshed.
    Unchanged,
}

/// Persists dated snapshots and keeps `manifest.json` in step with them.
///
/// Not internally synchronised: concurrent writes for the *same* date need
/// external serialisation. Writes for different dates are safe.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    base_path: PathBuf,
    retention_days: i64,
}

impl SnapshotWriter {
    /// A non-positive `retention_days` falls back to 14.
    pub fn new(base_path: impl Into<PathBuf>, retention_days: i64) -> Self {
        SnapshotWriter {
            base_path: base_path.into(),
            retention_days: if retention_days > 0 {
                retention_days
            } else {
                DEFAULT_RETENTION_DAYS
            },
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn retention_days(&self) -> i64 {
        self.retention_days
    }

    pub fn snapshot_path(&self, date: &str) -> PathBuf {
        self.base_path.join("games").join(format!("{date}.json"))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.base_path.join("manifest.json")
    }

    /// Plain stat of the snapshot file; the manifest is not consulted.
    pub fn snapshot_exists(&self, date: &str) -> bool {
        self.snapshot_path(date).is_file()
    }

    /// Write `snapshot` for `date`, then add the date to the manifest and prune
    /// snapshots older than the retention window.
    pub fn write_games_snapshot(
        &self,
        date: &str,
        snapshot: TodaySnapshot,
    ) -> Result<WriteOutcome, SnapshotError> {
        self.write_games_snapshot_at(date, snapshot, Utc::now())
    }

    fn write_games_snapshot_at(
        &self,
        date: &str,
        mut snapshot: TodaySnapshot,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome, SnapshotError> {
        validate_date(date)?;
        if snapshot.date.is_empty() {
            snapshot.date = date.to_string();
        }
        snapshot.games.sort_by(|a, b| a.id.cmp(&b.id));

        let path = self.snapshot_path(date);
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|source| SnapshotError::Encode {
            what: "snapshot",
            source,
        })?;

        let outcome = match std::fs::read(&path) {
            Ok(existing) if existing == bytes => {
                debug!(date, "snapshot unchanged, skipping write");
                WriteOutcome::Unchanged
            }
            _ => {
                write_atomic(&path, &bytes)?;
                WriteOutcome::Written
            }
        };

        self.update_manifest(date, now)?;
        Ok(outcome)
    }

    /// Read back the snapshot for `date`. `Ok(None)` when no file exists.
    pub fn read_snapshot(&self, date: &str) -> Result<Option<TodaySnapshot>, SnapshotError> {
        validate_date(date)?;
        let path = self.snapshot_path(date);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SnapshotError::io(path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SnapshotError::Corrupt { path, source })
    }

    /// Current manifest, or a fresh one (plus the load error) when it is missing or corrupt.
    pub fn read_manifest(&self) -> (Manifest, Option<SnapshotError>) {
        Manifest::load(&self.manifest_path(), self.retention_days)
    }

    fn update_manifest(&self, date: &str, now: DateTime<Utc>) -> Result<(), SnapshotError> {
        let (mut manifest, load_err) = self.read_manifest();
        if let Some(e) = load_err {
            warn!(error = %e, "manifest unreadable, rebuilding from scratch");
        }

        manifest.retention.games_days = self.retention_days;
        manifest.games.dates.insert(date.to_string());
        self.prune(&mut manifest, now);
        manifest.games.last_refreshed = Some(now);
        manifest.generated_at = now;

        let bytes = serde_json::to_vec_pretty(&manifest).map_err(|source| SnapshotError::Encode {
            what: "manifest",
            source,
        })?;
        write_atomic(&self.manifest_path(), &bytes)
    }

    /// Drop dates strictly before `today - retention` from disk and from the manifest.
    /// Unparseable dates and files that fail to delete are kept.
    fn prune(&self, manifest: &mut Manifest, now: DateTime<Utc>) {
        let today = now.date_naive();
        let Some(cutoff) = today.checked_sub_days(Days::new(self.retention_days.unsigned_abs()))
        else {
            return;
        };

        let expired: Vec<String> = manifest
            .games
            .dates
            .iter()
            .filter(|d| {
                NaiveDate::parse_from_str(d, DATE_FORMAT)
                    .map(|day| day < cutoff)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        for date in expired {
            let path = self.snapshot_path(&date);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(date = %date, path = %path.display(), error = %e, "Failed to prune snapshot");
                    continue;
                }
            }
            manifest.games.dates.remove(&date);
            info!(date = %date, "Pruned expired snapshot");
        }
    }
}

fn validate_date(date: &str) -> Result<(), SnapshotError> {
    if date.is_empty() {
        return Err(SnapshotError::EmptyDate);
    }
    if date.contains(['/', '\\']) || date.contains("..") {
        return Err(SnapshotError::InvalidDate(date.to_string()));
    }
    Ok(())
}

/// Write `bytes` to a temp sibling of `path`, fsync it, and rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| SnapshotError::io(dir, e))?;

    let prefix = format!(
        "{}.",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| SnapshotError::io(dir, e))?;

    let synced = tmp
        .write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all());
    if let Err(e) = synced {
        return Err(SnapshotError::io(tmp.path(), e));
    }

    tmp.persist(path)
        .map_err(|e| SnapshotError::io(path, e.error))?;
    Ok(())
}
