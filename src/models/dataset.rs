//! Catalog entries describing downloadable datasets.

use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// Where a catalog entry's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSource {
    /// The dataset currently served by the locator
    Active,
    /// A pre-shipped file on disk
    #[default]
    Static,
    /// Region extract built on demand
    Generated,
}

impl std::fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetSource::Active => write!(f, "active"),
            DatasetSource::Static => write!(f, "static"),
            DatasetSource::Generated => write!(f, "generated"),
        }
    }
}

/// One downloadable dataset in the catalog.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    #[serde(default)]
    pub id: String,
    /// Falls back to `id` when blank
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub source: DatasetSource,
    /// Backing file for static entries, relative to the base directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Download locator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BoundingBox>,

    // Resolved at read time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approx_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DatasetDescriptor {
    pub fn new(id: &str, label: &str, source: DatasetSource) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            source,
            ..Default::default()
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.unwrap_or(false)
    }

    /// Strip everything computed at read time before persisting.
    pub fn without_resolution(mut self) -> Self {
        self.size_bytes = None;
        self.approx_size = None;
        self.available = None;
        self.error = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_defaults_to_static() {
        let descriptor: DatasetDescriptor =
            serde_json::from_str(r#"{"id": "x", "label": "X"}"#).unwrap();
        assert_eq!(descriptor.source, DatasetSource::Static);
        assert!(!descriptor.is_available());
    }

    #[test]
    fn test_resolution_fields_not_persisted() {
        let mut descriptor = DatasetDescriptor::new("us-wa", "Washington", DatasetSource::Generated);
        descriptor.available = Some(true);
        descriptor.size_bytes = Some(10);

        let json = serde_json::to_value(descriptor.without_resolution()).unwrap();
        assert_eq!(json["source"], "generated");
        assert!(json.get("available").is_none());
        assert!(json.get("size_bytes").is_none());
    }
}
