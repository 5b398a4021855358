//! Per-round snapshot persistence.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rubric_core::{Item, RoundStats};
use thiserror::Error;

/// Errors from writing or reading snapshots.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Receives the full item list after every round.
pub trait SnapshotSink: Send + Sync {
    /// Persist round `round` (1-based).
    fn persist(&self, round: usize, items: &[Item], stats: &RoundStats) -> Result<(), SnapshotError>;
}

/// Writes `round_<n>.json` and `round_<n>_stats.json` into a directory.
#[derive(Debug, Clone)]
pub struct DirectorySnapshots {
    dir: PathBuf,
}

impl DirectorySnapshots {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn snapshot_path(&self, round: usize) -> PathBuf {
        self.dir.join(format!("round_{round}.json"))
    }

    pub fn stats_path(&self, round: usize) -> PathBuf {
        self.dir.join(format!("round_{round}_stats.json"))
    }
}

impl SnapshotSink for DirectorySnapshots {
    fn persist(&self, round: usize, items: &[Item], stats: &RoundStats) -> Result<(), SnapshotError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.snapshot_path(round), serde_json::to_string_pretty(items)?)?;
        fs::write(self.stats_path(round), serde_json::to_string_pretty(stats)?)?;
        tracing::debug!(round, dir = %self.dir.display(), "Snapshot written");
        Ok(())
    }
}

/// One persisted round held in memory.
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    pub round: usize,
    pub items: Vec<Item>,
    pub stats: RoundStats,
}

/// Keeps snapshots in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySnapshots {
    records: Mutex<Vec<SnapshotRecord>>,
}

impl MemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SnapshotRecord> {
        self.records.lock().clone()
    }

    pub fn rounds(&self) -> Vec<usize> {
        self.records.lock().iter().map(|r| r.round).collect()
    }
}

impl SnapshotSink for MemorySnapshots {
    fn persist(&self, round: usize, items: &[Item], stats: &RoundStats) -> Result<(), SnapshotError> {
        self.records.lock().push(SnapshotRecord { round, items: items.to_vec(), stats: stats.clone() });
        Ok(())
    }
}

/// Read a snapshot file back into items.
pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Vec<Item>, SnapshotError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rubric_core::{CapabilityTree, Constraint, EvalMethod, Verdict};

    fn items() -> Vec<Item> {
        let mut constraint = Constraint::new(1, "Is it short?").with_capability("Length");
        constraint.resolve(Verdict::Pass, "ok", EvalMethod::Rule);
        vec![Item::new("Say hi").with_response("hi").with_constraint(constraint)]
    }

    #[test]
    fn test_directory_snapshots_round_trip() {
        let dir = std::env::temp_dir().join(format!("rubric-snapshots-{}", std::process::id()));
        let sink = DirectorySnapshots::new(&dir);
        let items = items();
        let stats = RoundStats::from_items(1, &items, &CapabilityTree::default());

        sink.persist(1, &items, &stats).unwrap();

        assert!(sink.stats_path(1).exists());
        let loaded = load_snapshot(sink.snapshot_path(1)).unwrap();
        assert_eq!(loaded, items);

        let rebuilt = RoundStats::from_items(1, &loaded, &CapabilityTree::default());
        assert_eq!(rebuilt.score, stats.score);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_memory_snapshots_record_rounds() {
        let sink = MemorySnapshots::new();
        let items = items();
        let stats = RoundStats::from_items(1, &items, &CapabilityTree::empty());
        sink.persist(1, &items, &stats).unwrap();
        sink.persist(2, &items, &stats).unwrap();
        assert_eq!(sink.rounds(), vec![1, 2]);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = load_snapshot("/nonexistent/round_1.json").unwrap_err();
        assert!(matches!(err, SnapshotError::Io(_)));
    }
}
