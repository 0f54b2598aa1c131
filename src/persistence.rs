//! Persistence of controller state across restarts
//!
//! Only the override countdown is kept. The last confirmed relay state is not
//! stored, so a restarted controller begins without a baseline. Prices are
//! re-fetched and settings live in their own file.

use crate::error::Result;
use crate::logging::get_logger;
use crate::override_tracker::OverrideState;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persistent state structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistentState {
    /// Cycles of suspended automatic control left
    #[serde(default)]
    pub override_hours_left: u32,

    /// State held by the active override
    #[serde(default)]
    pub override_state: Option<bool>,

    /// Wall-clock time of the last save
    pub saved_at: Option<chrono::NaiveDateTime>,
}

/// Persistence manager
pub struct PersistenceManager {
    file_path: PathBuf,
    state: PersistentState,
    logger: crate::logging::StructuredLogger,
}

impl PersistenceManager {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            state: PersistentState::default(),
            logger: get_logger("persistence"),
        }
    }

    /// Load state from disk; a missing file keeps defaults
    pub fn load(&mut self) -> Result<()> {
        if !self.file_path.exists() {
            self.logger
                .info("No persistent state file found, using defaults");
            return Ok(());
        }

        let contents = std::fs::read_to_string(&self.file_path)?;
        self.state = serde_json::from_str(&contents)?;
        self.logger.info(&format!(
            "Loaded persistent state from disk (override_hours_left={})",
            self.state.override_hours_left
        ));
        Ok(())
    }

    /// Save state to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self
            .file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.file_path, contents)?;
        self.logger.debug("Saved persistent state to disk");
        Ok(())
    }

    /// Persisted countdown; the baseline is always unknown
    pub fn overrides(&self) -> OverrideState {
        OverrideState {
            override_hours_left: self.state.override_hours_left,
            override_state: self.state.override_state,
            last_commanded: None,
        }
    }

    /// Replace the override countdown and save if it changed
    pub fn store_overrides(&mut self, overrides: OverrideState, now: chrono::NaiveDateTime) -> Result<()> {
        let unchanged = self.state.override_hours_left == overrides.override_hours_left
            && self.state.override_state == overrides.override_state;
        if unchanged && self.state.saved_at.is_some() {
            return Ok(());
        }
        self.state.override_hours_left = overrides.override_hours_left;
        self.state.override_state = overrides.override_state;
        self.state.saved_at = Some(now);
        self.save()
    }
}
