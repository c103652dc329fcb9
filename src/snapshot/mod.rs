//! Dated on-disk snapshots of the schedule.
//!
//! ```text
//! {base}/games/{YYYY-MM-DD}.json   TodaySnapshot, pretty-printed
//! {base}/manifest.json             Manifest, pretty-printed
//! ```
//!
//! Every file is written to a `.tmp` sibling and renamed into place, so
//! readers never observe a partial document.

pub mod manifest;
pub mod syncer;
pub mod writer;

pub use manifest::Manifest;
pub use syncer::{SnapshotSyncer, SyncConfig};
pub use writer::{SnapshotWriter, WriteOutcome};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot date is required")]
    EmptyDate,

    #[error("invalid snapshot date {0:?}")]
    InvalidDate(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt JSON at {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl SnapshotError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SnapshotError::Io {
            path: path.into(),
            source,
        }
    }
}
