//! Geolite - embedded geospatial feature store
//!
//! Shared modules for the `serve` and `extract` binaries: dataset location,
//! nearby search, region scanning, subset extraction and the download catalog.

pub mod catalog;
pub mod config;
pub mod error;
pub mod geometry;
pub mod locator;
pub mod models;
pub mod regions;
pub mod search;
pub mod sql;
pub mod store;
pub mod subset;

pub use catalog::CatalogManager;
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use locator::{DatasetKind, DatasetLocator};
pub use models::{AdminLevel, DatasetDescriptor, Feature, NearbyFeature, RegionDescriptor};
pub use regions::{RegionScanner, ScanOptions};
pub use search::{NearbyQuery, NearbySearch};
pub use subset::{SubsetBuilder, SubsetFilter, SubsetOptions};
