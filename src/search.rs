//! Nearby feature search over the active dataset.
//!
//! Candidates come from a bounding-box range scan; exact haversine distance
//! then filters, ranks and truncates them.

use std::collections::BTreeMap;
use std::path::Path;

use futures::TryStreamExt;
use geo::Point;
use serde::Serialize;
use sqlx::{Connection, FromRow};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::geometry::{bounding_box, haversine_km};
use crate::locator::DatasetLocator;
use crate::models::feature::SEARCH_COLUMNS;
use crate::models::{Feature, NearbyFeature};
use crate::sql::{bind_all, Predicates, COMPOUND_CODE_EXPR};
use crate::store;

pub const MAX_LIMIT: usize = 200;

/// A point + radius query.
#[derive(Debug, Clone)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: f64,
    pub limit: usize,
    /// `CLASS.CODE` allow-list; empty means every class and code
    pub feature_codes: Vec<String>,
}

impl NearbyQuery {
    pub fn new(lat: f64, lng: f64, radius_km: f64, limit: usize) -> Self {
        Self {
            lat,
            lng,
            radius_km,
            limit,
            feature_codes: Vec::new(),
        }
    }

    pub fn with_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feature_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> StoreResult<()> {
        if !(self.radius_km > 0.0) || !self.radius_km.is_finite() {
            return Err(StoreError::invalid("radius_km must be positive"));
        }
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(StoreError::invalid(format!(
                "limit must be within [1, {MAX_LIMIT}]"
            )));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(StoreError::invalid("lat must be within [-90, 90]"));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(StoreError::invalid("lng must be within [-180, 180]"));
        }
        Ok(())
    }

    /// Range predicate over the bounding box plus the optional code filter.
    fn predicates(&self) -> Predicates {
        let bbox = bounding_box(self.lat, self.lng, self.radius_km);
        let mut predicates = Predicates::new();
        predicates
            .between("latitude", bbox.lat_min, bbox.lat_max)
            .between("longitude", bbox.lng_min, bbox.lng_max)
            .in_list(COMPOUND_CODE_EXPR, self.feature_codes.iter().map(String::as_str));
        predicates
    }
}

/// Features within `query.radius_km` of the query point, nearest first.
///
/// Rows with unreadable or out-of-range coordinates are skipped.
pub async fn fetch_nearby(path: &Path, query: &NearbyQuery) -> StoreResult<Vec<NearbyFeature>> {
    query.validate()?;

    let predicates = query.predicates();
    let sql = format!(
        "SELECT {} FROM features WHERE {} ORDER BY geoname_id",
        SEARCH_COLUMNS.join(", "),
        predicates.where_sql()
    );
    debug!(%sql, "Nearby query");

    let origin = Point::new(query.lng, query.lat);
    let mut conn = store::open_readonly(path).await?;
    let mut features = Vec::new();
    let mut skipped = 0usize;
    {
        let mut rows = bind_all(sqlx::query(&sql), predicates.params()).fetch(&mut conn);
        while let Some(row) = rows.try_next().await? {
            let feature = match Feature::from_row(&row) {
                Ok(feature) if feature.has_valid_coordinates() => feature,
                Ok(feature) => {
                    warn!(
                        geoname_id = feature.geoname_id,
                        lat = feature.latitude,
                        lng = feature.longitude,
                        "Skipping feature with out-of-range coordinates"
                    );
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable feature row");
                    skipped += 1;
                    continue;
                }
            };

            let distance_km =
                haversine_km(origin, Point::new(feature.longitude, feature.latitude));
            if distance_km <= query.radius_km {
                features.push(NearbyFeature {
                    feature,
                    distance_km,
                });
            }
        }
    }
    let _ = conn.close().await;

    // Stable: equal distances keep identifier order
    features.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    features.truncate(query.limit);

    debug!(
        results = features.len(),
        skipped,
        "Nearby query complete"
    );
    Ok(features)
}

/// Search result together with the dataset that answered it.
#[derive(Debug, Clone, Serialize)]
pub struct NearbyResult {
    /// File name of the dataset
    pub dataset: String,
    pub metadata: BTreeMap<String, String>,
    pub features: Vec<NearbyFeature>,
}

/// Answers nearby queries from whichever dataset is active.
#[derive(Debug, Clone)]
pub struct NearbySearch {
    locator: DatasetLocator,
}

impl NearbySearch {
    pub fn new(locator: DatasetLocator) -> Self {
        Self { locator }
    }

    pub async fn search(&self, query: &NearbyQuery) -> StoreResult<NearbyResult> {
        query.validate()?;
        let path = self.locator.active()?;
        let features = fetch_nearby(&path, query).await?;
        let metadata = store::dataset_metadata(&path).await?;

        Ok(NearbyResult {
            dataset: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            metadata,
            features,
        })
    }
}
