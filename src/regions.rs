//! Region aggregation over the master dataset.
//!
//! Full-table scan; meant for offline catalog generation, not request paths.

use std::path::Path;

use sqlx::{Connection, Row};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::geometry::BoundingBox;
use crate::locator::DatasetLocator;
use crate::models::{AdminLevel, RegionDescriptor};
use crate::sql::{bind_all, Predicates, SqlParam};
use crate::store;

/// Parameters of a region scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub level: AdminLevel,
    pub country: Option<String>,
    /// Groups with fewer features are dropped
    pub min_count: u64,
    pub limit: usize,
}

impl ScanOptions {
    pub fn new(level: AdminLevel) -> Self {
        Self {
            level,
            country: None,
            min_count: 1,
            limit: 1000,
        }
    }
}

/// Per-region counts and extents, largest first.
pub async fn scan_regions(path: &Path, options: &ScanOptions) -> StoreResult<Vec<RegionDescriptor>> {
    let columns = options.level.group_columns();

    let mut predicates = Predicates::new();
    for column in columns {
        predicates.raw(&format!("{column} IS NOT NULL AND {column} <> ''"));
    }
    predicates.eq_opt("country", options.country.as_deref());

    let group_by = columns.join(", ");
    let sql = format!(
        "SELECT {group_by}, COUNT(*) AS feature_count, \
         MIN(latitude) AS lat_min, MAX(latitude) AS lat_max, \
         MIN(longitude) AS lng_min, MAX(longitude) AS lng_max \
         FROM features WHERE {} \
         GROUP BY {group_by} \
         HAVING COUNT(*) >= ? \
         ORDER BY feature_count DESC, {group_by} \
         LIMIT ?",
        predicates.where_sql()
    );
    debug!(%sql, "Region scan query");

    let min_count = i64::try_from(options.min_count)
        .map_err(|_| StoreError::invalid("min_count is out of range"))?;
    let limit =
        i64::try_from(options.limit).map_err(|_| StoreError::invalid("limit is out of range"))?;

    let mut params = predicates.params().to_vec();
    params.push(SqlParam::Integer(min_count));
    params.push(SqlParam::Integer(limit));

    let mut conn = store::open_readonly(path).await?;
    let rows = bind_all(sqlx::query(&sql), &params)
        .fetch_all(&mut conn)
        .await?;
    let _ = conn.close().await;

    let mut regions = Vec::with_capacity(rows.len());
    for row in rows {
        let admin2 = match options.level {
            AdminLevel::Admin2 => Some(row.try_get::<String, _>("admin2")?),
            AdminLevel::Admin1 => None,
        };
        let extent: (Option<f64>, Option<f64>, Option<f64>, Option<f64>) = (
            row.try_get("lat_min")?,
            row.try_get("lat_max")?,
            row.try_get("lng_min")?,
            row.try_get("lng_max")?,
        );
        // Groups whose members all lack coordinates have no extent
        let (Some(lat_min), Some(lat_max), Some(lng_min), Some(lng_max)) = extent else {
            continue;
        };

        regions.push(RegionDescriptor {
            country: row.try_get("country")?,
            admin1: row.try_get("admin1")?,
            admin2,
            feature_count: row.try_get::<i64, _>("feature_count")? as u64,
            bounds: BoundingBox::new(lat_min, lat_max, lng_min, lng_max),
        });
    }

    info!(
        level = %options.level,
        country = options.country.as_deref().unwrap_or("*"),
        regions = regions.len(),
        "Region scan complete"
    );
    Ok(regions)
}

/// Scans whichever dataset the locator reports as master.
#[derive(Debug, Clone)]
pub struct RegionScanner {
    locator: DatasetLocator,
}

impl RegionScanner {
    pub fn new(locator: DatasetLocator) -> Self {
        Self { locator }
    }

    pub async fn scan(&self, options: &ScanOptions) -> StoreResult<Vec<RegionDescriptor>> {
        let path = self.locator.master()?;
        scan_regions(&path, options).await
    }
}
