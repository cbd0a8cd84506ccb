//! Catalog of downloadable datasets.
//!
//! The persisted list is regenerated wholesale; availability and size are
//! resolved every time it is read.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use hashbrown::HashSet;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::locator::DatasetLocator;
use crate::models::{DatasetDescriptor, DatasetSource, RegionDescriptor};
use crate::regions::{RegionScanner, ScanOptions};

const SIZE_UNITS: &[&str] = &["KB", "MB", "GB", "TB"];

/// Human-readable size: bytes below 1 KiB, then one decimal below 10 units.
pub fn format_size(size: u64) -> String {
    if size < 1024 {
        return format!("{size} B");
    }
    let mut value = size as f64 / 1024.0;
    let mut index = 0;
    while value >= 1024.0 && index < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        index += 1;
    }
    if value < 10.0 {
        format!("{value:.1} {}", SIZE_UNITS[index])
    } else {
        format!("{value:.0} {}", SIZE_UNITS[index])
    }
}

pub struct CatalogManager {
    config: StoreConfig,
    locator: DatasetLocator,
}

impl CatalogManager {
    pub fn new(config: &StoreConfig, locator: DatasetLocator) -> Self {
        Self {
            config: config.clone(),
            locator,
        }
    }

    pub fn catalog_path(&self) -> &Path {
        &self.config.catalog_path
    }

    /// Built-in entries: the active dataset and the bundled sample.
    pub fn default_catalog(&self) -> Vec<DatasetDescriptor> {
        vec![self.active_entry(), self.sample_entry()]
    }

    fn active_entry(&self) -> DatasetDescriptor {
        let mut entry = DatasetDescriptor::new("active", "Active Dataset", DatasetSource::Active);
        entry.description = Some("Dataset currently answering nearby searches.".to_string());
        entry
    }

    fn sample_entry(&self) -> DatasetDescriptor {
        let mut entry =
            DatasetDescriptor::new("sample", "Sample Dataset (Tiny)", DatasetSource::Static);
        entry.description = Some("Mini dataset for testing search locally.".to_string());
        entry.path = Some(self.config.sample_path.display().to_string());
        entry
    }

    /// Resolved catalog entries, in persisted order.
    ///
    /// Per-entry problems are reported on the entry; only an unreadable or
    /// malformed catalog file fails the whole call.
    pub fn load_catalog(&self) -> StoreResult<Vec<DatasetDescriptor>> {
        let resolved = self
            .load_entries()?
            .iter()
            .map(|raw| {
                self.resolve_entry(raw).unwrap_or_else(|e| {
                    warn!(error = %e, "Catalog entry could not be resolved");
                    failed_entry(raw, &e)
                })
            })
            .collect();
        Ok(resolved)
    }

    /// Raw entry objects, or the defaults when the file is absent or empty.
    fn load_entries(&self) -> StoreResult<Vec<Value>> {
        let path = &self.config.catalog_path;
        if !path.exists() {
            debug!(path = %path.display(), "No catalog file, using defaults");
            return self.default_values();
        }

        let content = fs::read_to_string(path)?;
        let raw: Value = serde_json::from_str(&content).map_err(|e| {
            StoreError::Configuration(format!("Invalid dataset catalog JSON: {e}"))
        })?;

        let entries = match raw {
            Value::Object(mut object) => object.remove("datasets").unwrap_or(Value::Array(vec![])),
            other => other,
        };
        let Value::Array(entries) = entries else {
            return Err(StoreError::Configuration(
                "Dataset catalog must be a list or contain a 'datasets' list".to_string(),
            ));
        };

        let entries: Vec<Value> = entries.into_iter().filter(Value::is_object).collect();
        if entries.is_empty() {
            return self.default_values();
        }
        Ok(entries)
    }

    fn default_values(&self) -> StoreResult<Vec<Value>> {
        self.default_catalog()
            .into_iter()
            .map(|entry| {
                serde_json::to_value(entry)
                    .map_err(|e| StoreError::Configuration(format!("Invalid default entry: {e}")))
            })
            .collect()
    }

    fn resolve_entry(&self, raw: &Value) -> StoreResult<DatasetDescriptor> {
        let has_id = raw
            .get("id")
            .and_then(Value::as_str)
            .is_some_and(|id| !id.trim().is_empty());
        if !has_id {
            return Err(StoreError::Configuration(
                "Dataset entry is missing required 'id'".to_string(),
            ));
        }

        let mut entry: DatasetDescriptor = serde_json::from_value(raw.clone())
            .map_err(|e| StoreError::Configuration(format!("Invalid dataset entry: {e}")))?;
        if entry.label.is_empty() {
            entry.label = entry.id.clone();
        }

        let mut available = true;
        let mut error = None;

        match self.backing_file(&entry) {
            Ok(Some(file)) => {
                if entry.file_name.is_none() {
                    entry.file_name = file.file_name().map(|n| n.to_string_lossy().into_owned());
                }
                match fs::metadata(&file) {
                    Ok(meta) => {
                        entry.size_bytes = Some(meta.len());
                        if entry.approx_size.is_none() {
                            entry.approx_size = Some(format_size(meta.len()));
                        }
                    }
                    Err(e) => {
                        available = false;
                        error = Some(e.to_string());
                    }
                }
            }
            Ok(None) => {
                if entry.source == DatasetSource::Static && entry.url.is_none() {
                    available = false;
                    error = Some(format!("Dataset '{}' has no path or url", entry.id));
                }
            }
            Err(e) => {
                available = false;
                error = Some(e.to_string());
            }
        }

        if entry.url.is_none() {
            if let Some(file_name) = &entry.file_name {
                entry.url = Some(format!("/datasets/{file_name}"));
            }
        }
        entry.available = Some(available);
        entry.error = error;
        Ok(entry)
    }

    /// File on disk behind an entry; generated entries have none.
    fn backing_file(&self, entry: &DatasetDescriptor) -> StoreResult<Option<PathBuf>> {
        match entry.source {
            DatasetSource::Active => self.locator.active().map(Some),
            DatasetSource::Static => {
                let Some(raw) = entry.path.as_deref() else {
                    return Ok(None);
                };
                let path = self.config.resolve(Path::new(raw));
                if path.exists() {
                    Ok(Some(path))
                } else {
                    Err(StoreError::DatasetNotFound(format!(
                        "Dataset file not found: {}",
                        path.display()
                    )))
                }
            }
            DatasetSource::Generated => Ok(None),
        }
    }

    /// Path of the available on-disk dataset published as `file_name`.
    pub fn find_download(&self, file_name: &str) -> StoreResult<Option<PathBuf>> {
        for entry in self.load_catalog()? {
            if entry.file_name.as_deref() != Some(file_name) || !entry.is_available() {
                continue;
            }
            if let Ok(Some(path)) = self.backing_file(&entry) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    /// Scan the master dataset and persist a fresh catalog.
    ///
    /// Pinned entries come first, then one generated entry per region.
    pub async fn generate_catalog(
        &self,
        options: &ScanOptions,
        include_sample: bool,
    ) -> StoreResult<Vec<DatasetDescriptor>> {
        let scanner = RegionScanner::new(self.locator.clone());
        let regions = scanner.scan(options).await?;

        // Distinct names can share a slug ("King County" and "King_County")
        let mut seen = HashSet::new();
        let mut generated = Vec::with_capacity(regions.len());
        for region in &regions {
            let entry = region_entry(region);
            if seen.insert(entry.id.clone()) {
                generated.push(entry);
            } else {
                warn!(id = %entry.id, label = %entry.label, "Skipping region with duplicate id");
            }
        }
        generated.sort_by_key(|entry| {
            let lower = |v: &Option<String>| v.as_deref().unwrap_or("").to_lowercase();
            (
                lower(&entry.country),
                lower(&entry.admin1),
                lower(&entry.admin2),
                entry.label.to_lowercase(),
            )
        });

        let mut catalog = vec![self.active_entry()];
        if include_sample {
            catalog.push(self.sample_entry());
        }
        catalog.extend(generated);

        self.save_catalog(&catalog)?;
        info!(
            path = %self.config.catalog_path.display(),
            entries = catalog.len(),
            regions = regions.len(),
            "Dataset catalog generated"
        );
        Ok(catalog)
    }

    /// Replace the persisted catalog.
    pub fn save_catalog(&self, entries: &[DatasetDescriptor]) -> StoreResult<()> {
        let path = &self.config.catalog_path;
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(parent)?;

        let persisted: Vec<DatasetDescriptor> = entries
            .iter()
            .cloned()
            .map(DatasetDescriptor::without_resolution)
            .collect();
        let body = serde_json::to_string_pretty(&json!({ "datasets": persisted }))
            .map_err(|e| StoreError::Configuration(format!("Failed to encode catalog: {e}")))?;

        // Same directory so the rename stays atomic; dropped unpersisted on error
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(body.as_bytes())?;
        tmp.persist(path).map_err(|e| StoreError::StorageIo(e.error))?;
        Ok(())
    }
}

/// Catalog entry that invokes an on-demand build of `region`.
fn region_entry(region: &RegionDescriptor) -> DatasetDescriptor {
    let slug = region.slug();
    let label = region.label();

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair("country", &region.country);
    query.append_pair("admin1", &region.admin1);
    if let Some(admin2) = &region.admin2 {
        query.append_pair("admin2", admin2);
    }
    query.append_pair("label", &label);

    let mut entry = DatasetDescriptor::new(&slug, &label, DatasetSource::Generated);
    entry.description = Some(format!(
        "{} features within lat {:.3}..{:.3}, lng {:.3}..{:.3}",
        region.feature_count,
        region.bounds.lat_min,
        region.bounds.lat_max,
        region.bounds.lng_min,
        region.bounds.lng_max
    ));
    entry.file_name = Some(format!("geonames-lite-{slug}.db"));
    entry.url = Some(format!("/api/geonames/lite?{}", query.finish()));
    entry.country = Some(region.country.clone());
    entry.admin1 = Some(region.admin1.clone());
    entry.admin2 = region.admin2.clone();
    entry.feature_count = Some(region.feature_count);
    entry.bounds = Some(region.bounds);
    entry
}

/// Stand-in for an entry that failed to resolve.
fn failed_entry(raw: &Value, error: &StoreError) -> DatasetDescriptor {
    let text = |key: &str| raw.get(key).and_then(Value::as_str).map(String::from);
    let source = raw
        .get("source")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let mut entry = DatasetDescriptor::new(
        &text("id").unwrap_or_else(|| "unknown".to_string()),
        &text("label").unwrap_or_else(|| "GeoNames Dataset".to_string()),
        source,
    );
    entry.description = Some(text("description").unwrap_or_default());
    entry.available = Some(false);
    entry.error = Some(error.to_string());
    entry
}
