//! Hour-keyed history of controller outcomes
//!
//! One entry per hour. Writing an entry for an hour that already has one
//! replaces it, so repeated cycles within the hour leave only the latest
//! outcome. Entries are never pruned here.

use crate::clock::truncate_to_hour;
use crate::error::Result;
use crate::logging::get_logger;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Recorded outcome of the decision cycle for one hour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StateLogEntry {
    /// Hour start
    pub time: NaiveDateTime,
    /// Relay output after the cycle; `None` when the relay was unreachable
    pub relay_on: Option<bool>,
    /// Control mode label in effect
    pub mode: String,
    /// State held by an active override
    pub override_state: Option<bool>,
    /// Price of the hour, when known
    pub price: Option<f64>,
}

/// Flat-file (or in-memory) state log
pub struct StateLog {
    path: Option<PathBuf>,
    entries: BTreeMap<NaiveDateTime, StateLogEntry>,
    logger: crate::logging::StructuredLogger,
}

impl StateLog {
    /// Log that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
            logger: get_logger("state_log"),
        }
    }

    /// Open a JSON-backed log, loading existing entries
    ///
    /// A missing file starts an empty log; an unreadable one is logged and
    /// also starts empty (it is overwritten on the next write).
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let logger = get_logger("state_log");
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Vec<StateLogEntry>>(&contents) {
                Ok(list) => list.into_iter().map(|e| (e.time, e)).collect(),
                Err(e) => {
                    logger.warn(&format!(
                        "Ignoring unreadable state log {}: {}",
                        path.display(),
                        e
                    ));
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                logger.warn(&format!(
                    "Cannot read state log {}: {}",
                    path.display(),
                    e
                ));
                BTreeMap::new()
            }
        };
        Self {
            path: Some(path),
            entries,
            logger,
        }
    }

    /// Insert or replace the entry for the entry's hour, then flush
    pub fn upsert_hour(&mut self, mut entry: StateLogEntry) -> Result<()> {
        entry.time = truncate_to_hour(entry.time);
        self.entries.insert(entry.time, entry);
        self.flush()
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Vec<StateLogEntry> {
        self.entries.values().cloned().collect()
    }

    /// The newest `limit` entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<StateLogEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.values().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let list: Vec<&StateLogEntry> = self.entries.values().collect();
        std::fs::write(path, serde_json::to_string_pretty(&list)?)?;
        self.logger.trace("State log flushed");
        Ok(())
    }
}
