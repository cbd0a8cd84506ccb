//! Startup configuration for dataset locations.
//!
//! Resolved once (optional TOML file, then environment overrides) and handed
//! to each component constructor.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};

pub const ACTIVE_DB_ENV: &str = "GEOLITE_ACTIVE_DB";
pub const MASTER_DB_ENV: &str = "GEOLITE_MASTER_DB";
pub const CATALOG_ENV: &str = "GEOLITE_CATALOG";
pub const CONFIG_ENV: &str = "GEOLITE_CONFIG";

pub const DEFAULT_ACTIVE_NAME: &str = "geonames-lite-us-wa.db";
pub const DEFAULT_MASTER_NAME: &str = "geonames_all_countries_latest.db";
pub const DEFAULT_CATALOG_PATH: &str = "configs/geonames-datasets.json";
pub const DEFAULT_SAMPLE_PATH: &str = "assets/data/geonames-sample.db";

/// Where one kind of dataset may live on disk.
#[derive(Debug, Clone)]
pub struct DatasetSlot {
    /// Environment variable that overrides the search order
    pub env_var: &'static str,
    /// Value of `env_var` captured at startup
    pub override_path: Option<PathBuf>,
    pub default_name: String,
    /// Probed in order when no override is set
    pub candidates: Vec<PathBuf>,
}

impl DatasetSlot {
    fn with_defaults(base_dir: &Path, env_var: &'static str, default_name: &str) -> Self {
        Self {
            env_var,
            override_path: None,
            default_name: default_name.to_string(),
            candidates: vec![
                base_dir.join("data").join(default_name),
                base_dir.join("assets").join("data").join(default_name),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root for every relative path in the configuration and the catalog
    pub base_dir: PathBuf,
    pub active: DatasetSlot,
    pub master: DatasetSlot,
    pub catalog_path: PathBuf,
    pub sample_path: PathBuf,
}

/// Optional on-disk settings, all fields optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    base_dir: Option<PathBuf>,
    catalog_path: Option<PathBuf>,
    sample_path: Option<PathBuf>,
    active_candidates: Vec<PathBuf>,
    master_candidates: Vec<PathBuf>,
}

impl StoreConfig {
    /// Defaults rooted at `base_dir`, ignoring the environment.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            active: DatasetSlot::with_defaults(&base_dir, ACTIVE_DB_ENV, DEFAULT_ACTIVE_NAME),
            master: DatasetSlot::with_defaults(&base_dir, MASTER_DB_ENV, DEFAULT_MASTER_NAME),
            catalog_path: base_dir.join(DEFAULT_CATALOG_PATH),
            sample_path: base_dir.join(DEFAULT_SAMPLE_PATH),
            base_dir,
        }
    }

    /// Load the optional TOML file, then apply process environment overrides.
    pub fn load(config_file: Option<&Path>) -> StoreResult<Self> {
        let env_file = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let file = config_file.map(Path::to_path_buf).or(env_file);

        let base_dir = std::env::current_dir()?;
        let mut config = match file {
            Some(path) => Self::from_file(&path, &base_dir)?,
            None => Self::with_base_dir(base_dir),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path, cwd: &Path) -> StoreResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            StoreError::Configuration(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&content, cwd)
    }

    /// Build from TOML text; relative paths resolve against `base_dir`.
    pub fn from_toml(content: &str, cwd: &Path) -> StoreResult<Self> {
        let file: FileConfig = toml::from_str(content)
            .map_err(|e| StoreError::Configuration(format!("Failed to parse config file: {e}")))?;

        let base_dir = match file.base_dir {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => cwd.join(dir),
            None => cwd.to_path_buf(),
        };
        let mut config = Self::with_base_dir(base_dir);

        if let Some(path) = file.catalog_path {
            config.catalog_path = config.resolve(&path);
        }
        if let Some(path) = file.sample_path {
            config.sample_path = config.resolve(&path);
        }
        let mut active: Vec<PathBuf> = file.active_candidates.iter().map(|p| config.resolve(p)).collect();
        active.append(&mut config.active.candidates);
        config.active.candidates = active;

        let mut master: Vec<PathBuf> = file.master_candidates.iter().map(|p| config.resolve(p)).collect();
        master.append(&mut config.master.candidates);
        config.master.candidates = master;

        Ok(config)
    }

    /// Apply environment-style overrides read through `lookup`.
    ///
    /// Blank values count as unset.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };

        if let Some(path) = read(ACTIVE_DB_ENV) {
            self.active.override_path = Some(self.resolve(&path));
        }
        if let Some(path) = read(MASTER_DB_ENV) {
            self.master.override_path = Some(self.resolve(&path));
        }
        if let Some(path) = read(CATALOG_ENV) {
            self.catalog_path = self.resolve(&path);
        }
    }

    /// Absolute paths pass through; relative ones are joined onto `base_dir`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}
