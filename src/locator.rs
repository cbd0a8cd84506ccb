//! Resolves which on-disk dataset file backs a request.

use std::path::PathBuf;
use tracing::debug;

use crate::config::{DatasetSlot, StoreConfig};
use crate::error::{StoreError, StoreResult};

/// Which dataset a caller needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    /// Complete, authoritative feature collection
    Master,
    /// Dataset answering nearby queries (the master or an extract)
    Active,
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetKind::Master => write!(f, "master"),
            DatasetKind::Active => write!(f, "active"),
        }
    }
}

/// Read-only filesystem probe over the configured dataset slots.
#[derive(Debug, Clone)]
pub struct DatasetLocator {
    active: DatasetSlot,
    master: DatasetSlot,
}

impl DatasetLocator {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            active: config.active.clone(),
            master: config.master.clone(),
        }
    }

    /// Resolve the dataset path for `kind`.
    ///
    /// An explicit override must exist; it never falls back to the
    /// candidate list.
    pub fn resolve(&self, kind: DatasetKind) -> StoreResult<PathBuf> {
        let slot = match kind {
            DatasetKind::Master => &self.master,
            DatasetKind::Active => &self.active,
        };

        if let Some(path) = &slot.override_path {
            if path.exists() {
                debug!(%kind, path = %path.display(), "Dataset resolved from override");
                return Ok(path.clone());
            }
            return Err(StoreError::DatasetNotFound(format!(
                "Dataset specified by {} not found: {}",
                slot.env_var,
                path.display()
            )));
        }

        if let Some(path) = slot.candidates.iter().find(|p| p.exists()) {
            debug!(%kind, path = %path.display(), "Dataset resolved from search path");
            return Ok(path.clone());
        }

        Err(StoreError::DatasetNotFound(format!(
            "Unable to locate {}. Set {} to the absolute dataset path.",
            slot.default_name, slot.env_var
        )))
    }

    pub fn active(&self) -> StoreResult<PathBuf> {
        self.resolve(DatasetKind::Active)
    }

    pub fn master(&self) -> StoreResult<PathBuf> {
        self.resolve(DatasetKind::Master)
    }
}
