use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::Path;

use super::SnapshotError;

pub const MANIFEST_VERSION: u32 = 1;

/// Index of the snapshot dates present on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub retention: Retention,
    pub games: GamesIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retention {
    pub games_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamesIndex {
    /// `YYYY-MM-DD` strings, kept sorted
    pub dates: BTreeSet<String>,
    pub last_refreshed: Option<DateTime<Utc>>,
}

impl Manifest {
    pub fn new(retention_days: i64, now: DateTime<Utc>) -> Self {
        Manifest {
            version: MANIFEST_VERSION,
            generated_at: now,
            retention: Retention {
                games_days: retention_days,
            },
            games: GamesIndex {
                dates: BTreeSet::new(),
                last_refreshed: None,
            },
        }
    }

    /// Read the manifest at `path`.
    ///
    /// A missing file yields a fresh manifest and no error. An unreadable or
    /// undecodable file yields a fresh manifest *and* the error, so callers
    /// can keep going while still reporting the corruption.
    pub fn load(path: &Path, retention_days: i64) -> (Manifest, Option<SnapshotError>) {
        let fresh = || Manifest::new(retention_days, Utc::now());
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return (fresh(), None),
            Err(e) => return (fresh(), Some(SnapshotError::io(path, e))),
        };
        match serde_json::from_slice::<Manifest>(&bytes) {
            Ok(m) => (m, None),
            Err(source) => (
                fresh(),
                Some(SnapshotError::Corrupt {
                    path: path.to_path_buf(),
                    source,
                }),
            ),
        }
    }
}
