//! JSON event artifacts on disk

use super::events::{EventKind, RegistryEvent};
use crate::error::{ToolError, ToolResult};

use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::info;

/// Directory of `<kind>_events_<timestamp>_block_<n>.json` files
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(kind: EventKind, timestamp: DateTime<Local>, block: u64) -> String {
        format!(
            "{}_events_{}_block_{}.json",
            kind,
            timestamp.format("%Y-%m-%d_%H-%M-%S"),
            block
        )
    }

    /// Write `events` as a pretty-printed JSON array and return the file path
    pub fn write(&self, kind: EventKind, events: &[RegistryEvent], block: u64) -> ToolResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let path = self.dir.join(Self::file_name(kind, Local::now(), block));
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, events)?;

        info!("Wrote {} {} events to {}", events.len(), kind, path.display());
        Ok(path)
    }

    /// Most recently modified artifact of `kind`
    pub fn latest(&self, kind: EventKind) -> ToolResult<PathBuf> {
        let prefix = format!("{}_events_", kind);
        let mut newest: Option<(SystemTime, PathBuf)> = None;

        let entries = fs::read_dir(&self.dir).map_err(|e| {
            ToolError::Artifact(format!("Failed to list {}: {}", self.dir.display(), e))
        })?;

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(&prefix) || !name.ends_with(".json") {
                continue;
            }

            let modified = entry.metadata()?.modified()?;
            if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
                newest = Some((modified, entry.path()));
            }
        }

        newest.map(|(_, path)| path).ok_or_else(|| {
            ToolError::Artifact(format!("No {} event files found in {}", kind, self.dir.display()))
        })
    }

    /// Events from the most recent artifact of `kind`
    pub fn read_latest(&self, kind: EventKind) -> ToolResult<Vec<RegistryEvent>> {
        let path = self.latest(kind)?;
        info!("Using artifact file: {}", path.display());

        let reader = BufReader::new(File::open(&path)?);
        serde_json::from_reader(reader).map_err(|e| {
            ToolError::Artifact(format!("Failed to decode events from {}: {}", path.display(), e))
        })
    }
}
