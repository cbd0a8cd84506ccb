//! Core data models shared by the dataset components.

pub mod dataset;
pub mod feature;
pub mod region;

pub use dataset::{DatasetDescriptor, DatasetSource};
pub use feature::{
    parse_feature_classes, parse_feature_codes, AlternateName, Feature, FeatureRecord,
    NearbyFeature,
};
pub use region::{AdminLevel, RegionDescriptor};
