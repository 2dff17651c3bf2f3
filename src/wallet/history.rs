//! Transfer history ledger
//!
//! A JSON array of [`HistoryEntry`] values, rewritten in full on every
//! append. Only one transfer runs at a time per wallet, which is the only
//! thing protecting the read-modify-write.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::types::HistoryEntry;

/// Aggregate view of the ledger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySummary {
    pub count: usize,
    /// Sum of all recorded amounts, in ZEC
    pub total_sent: f64,
    pub last_transfer: Option<DateTime<Utc>>,
}

/// Append-only record of completed transfers
#[derive(Debug, Clone)]
pub struct HistoryLedger {
    path: PathBuf,
}

impl HistoryLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one entry
    ///
    /// An existing file that cannot be parsed is left untouched and the
    /// append fails.
    pub async fn append(&self, entry: HistoryEntry) -> Result<()> {
        let mut entries = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str::<Vec<HistoryEntry>>(&content).map_err(|e| {
                Error::Persistence(format!(
                    "refusing to overwrite unreadable history {}: {}",
                    self.path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        entries.push(entry);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::Persistence(format!("failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let content = serde_json::to_string_pretty(&entries)?;
        tokio::fs::write(&self.path, content).await.map_err(|e| {
            Error::Persistence(format!("failed to write {}: {}", self.path.display(), e))
        })?;

        debug!(
            "Recorded transfer in {} ({} entries)",
            self.path.display(),
            entries.len()
        );
        Ok(())
    }

    /// Every recorded entry, oldest first
    ///
    /// A missing or unreadable file reads as empty.
    pub async fn entries(&self) -> Vec<HistoryEntry> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Failed to read history {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to parse history {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    /// The most recent `limit` entries, oldest first
    pub async fn query(&self, limit: usize) -> Vec<HistoryEntry> {
        let mut entries = self.entries().await;
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
        entries
    }

    pub async fn summary(&self) -> HistorySummary {
        let entries = self.entries().await;
        HistorySummary {
            count: entries.len(),
            total_sent: entries.iter().map(|e| e.amount).sum(),
            last_transfer: entries.last().map(|e| e.timestamp),
        }
    }
}
