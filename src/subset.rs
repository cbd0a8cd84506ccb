//! Filtered extracts of the master dataset.
//!
//! A build always produces a fresh file: schema, a single streamed copy of the
//! matching features, their alternate names, provenance metadata, then VACUUM
//! once the write transaction is committed.
//!
//! Two builds targeting the same output path must be serialized by the caller.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use futures::TryStreamExt;
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::locator::DatasetLocator;
use crate::models::feature::{ALTERNATE_NAME_COLUMNS, FEATURE_COLUMNS};
use crate::models::{AlternateName, FeatureRecord};
use crate::sql::{bind_all_as, chunked, placeholders, Predicates, SqlParam, COMPOUND_CODE_EXPR};
use crate::store;

/// Parent ids per `IN (...)` lookup when copying alternate names.
pub const ALTERNATE_NAME_CHUNK_SIZE: usize = 800;

/// Which master rows an extract keeps. Absent fields impose no constraint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubsetFilter {
    pub country: Option<String>,
    pub admin1: Option<String>,
    pub admin2: Option<String>,
    /// `CLASS.CODE` allow-list
    pub feature_codes: Vec<String>,
    pub feature_classes: Vec<String>,
    /// Keep at most this many rows (sampling); zero means no cap
    pub limit: Option<u64>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl SubsetFilter {
    pub fn region(country: &str, admin1: Option<&str>, admin2: Option<&str>) -> Self {
        Self {
            country: Some(country.to_string()),
            admin1: admin1.map(String::from),
            admin2: admin2.map(String::from),
            ..Default::default()
        }
    }

    pub fn predicates(&self) -> Predicates {
        let mut predicates = Predicates::new();
        predicates
            .eq_opt("country", present(&self.country))
            .eq_opt("admin1", present(&self.admin1))
            .eq_opt("admin2", present(&self.admin2))
            .in_list(COMPOUND_CODE_EXPR, self.feature_codes.iter().map(String::as_str))
            .in_list("feature_class", self.feature_classes.iter().map(String::as_str));
        predicates
    }

    fn row_limit(&self) -> Option<u64> {
        self.limit.filter(|limit| *limit > 0)
    }

    /// Row cap as bound into `LIMIT ?`.
    pub fn sql_limit(&self) -> StoreResult<Option<i64>> {
        self.row_limit()
            .map(|limit| {
                i64::try_from(limit)
                    .map_err(|_| StoreError::invalid(format!("limit {limit} is out of range")))
            })
            .transpose()
    }

    /// `country=US;admin1=WA;codes=H.LK,T.TRL`, or `all` with no constraint.
    pub fn description(&self) -> String {
        let mut parts = Vec::new();
        if let Some(country) = present(&self.country) {
            parts.push(format!("country={country}"));
        }
        if let Some(admin1) = present(&self.admin1) {
            parts.push(format!("admin1={admin1}"));
        }
        if let Some(admin2) = present(&self.admin2) {
            parts.push(format!("admin2={admin2}"));
        }
        if !self.feature_codes.is_empty() {
            parts.push(format!("codes={}", self.feature_codes.join(",")));
        }
        if !self.feature_classes.is_empty() {
            parts.push(format!("classes={}", self.feature_classes.join(",")));
        }
        if let Some(limit) = self.row_limit() {
            parts.push(format!("limit={limit}"));
        }

        if parts.is_empty() {
            "all".to_string()
        } else {
            parts.join(";")
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubsetOptions {
    /// Free-form label recorded in the metadata
    pub label: Option<String>,
    /// Create and fill the `alternate_names` table
    pub alternate_names: bool,
}

impl Default for SubsetOptions {
    fn default() -> Self {
        Self {
            label: None,
            alternate_names: true,
        }
    }
}

/// Outcome of a finished build.
#[derive(Debug, Clone)]
pub struct SubsetReport {
    pub output: PathBuf,
    pub source: PathBuf,
    pub features: u64,
    pub alternate_names: u64,
    /// On-disk size after compaction
    pub size_bytes: u64,
}

/// Builds extracts from the master dataset the locator resolves.
#[derive(Debug, Clone)]
pub struct SubsetBuilder {
    locator: DatasetLocator,
}

impl SubsetBuilder {
    pub fn new(locator: DatasetLocator) -> Self {
        Self { locator }
    }

    pub async fn build(
        &self,
        output: &Path,
        filter: &SubsetFilter,
        options: &SubsetOptions,
    ) -> StoreResult<SubsetReport> {
        let source = self.locator.master()?;
        build_subset(&source, output, filter, options).await
    }
}

/// Materialize the rows of `source` matching `filter` into `output`.
///
/// Any partially written output is removed when the build fails.
pub async fn build_subset(
    source: &Path,
    output: &Path,
    filter: &SubsetFilter,
    options: &SubsetOptions,
) -> StoreResult<SubsetReport> {
    // Checked before the existing output is touched
    if !source.exists() {
        return Err(StoreError::DatasetNotFound(format!(
            "Source dataset not found: {}",
            source.display()
        )));
    }
    filter.sql_limit()?;
    prepare_output(output)?;

    match copy_subset(source, output, filter, options).await {
        Ok(report) => {
            info!(
                output = %output.display(),
                filter = %filter.description(),
                features = report.features,
                alternate_names = report.alternate_names,
                size_bytes = report.size_bytes,
                "Subset dataset built"
            );
            Ok(report)
        }
        Err(e) => {
            warn!(output = %output.display(), error = %e, "Subset build failed, removing output");
            remove_output(output);
            Err(e)
        }
    }
}

fn prepare_output(output: &Path) -> StoreResult<()> {
    if output.exists() {
        debug!(path = %output.display(), "Replacing existing output");
        fs::remove_file(output)?;
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn remove_output(output: &Path) {
    let journal = PathBuf::from(format!("{}-journal", output.display()));
    for path in [output.to_path_buf(), journal] {
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove partial output");
            }
        }
    }
}

async fn copy_subset(
    source: &Path,
    output: &Path,
    filter: &SubsetFilter,
    options: &SubsetOptions,
) -> StoreResult<SubsetReport> {
    let mut src = store::open_readonly(source).await?;
    let mut dest = store::open_writable(output).await?;

    let copy_alternates = if options.alternate_names {
        let exists = store::table_exists(&mut src, "alternate_names").await?;
        if !exists {
            warn!(source = %source.display(), "Master has no alternate_names table");
        }
        exists
    } else {
        false
    };
    store::create_schema(&mut dest, options.alternate_names).await?;

    let predicates = filter.predicates();
    let mut sql = format!(
        "SELECT {} FROM features WHERE {} ORDER BY geoname_id",
        FEATURE_COLUMNS.join(", "),
        predicates.where_sql()
    );
    let mut params = predicates.params().to_vec();
    if let Some(limit) = filter.sql_limit()? {
        sql.push_str(" LIMIT ?");
        params.push(SqlParam::Integer(limit));
    }
    debug!(%sql, "Subset feature query");

    let mut tx = dest.begin().await?;

    let mut copied_ids: Vec<i64> = Vec::new();
    {
        let mut rows =
            bind_all_as(sqlx::query_as::<_, FeatureRecord>(&sql), &params).fetch(&mut src);
        while let Some(record) = rows.try_next().await? {
            store::insert_feature(&mut tx, &record).await?;
            copied_ids.push(record.geoname_id);
        }
    }

    let alternate_names = if copy_alternates {
        copy_alternate_names(&mut src, &mut tx, &copied_ids).await?
    } else {
        0
    };

    let mut metadata = store::read_metadata(&mut src).await?;
    metadata.extend(derived_metadata(source, filter, options, copied_ids.len()));
    store::write_metadata(&mut tx, &metadata).await?;

    tx.commit().await?;
    let _ = src.close().await;

    // VACUUM cannot run inside a transaction
    sqlx::query("VACUUM").execute(&mut dest).await?;
    dest.close().await?;

    let size_bytes = fs::metadata(output)?.len();
    Ok(SubsetReport {
        output: output.to_path_buf(),
        source: source.to_path_buf(),
        features: copied_ids.len() as u64,
        alternate_names,
        size_bytes,
    })
}

async fn copy_alternate_names(
    src: &mut SqliteConnection,
    dest: &mut SqliteConnection,
    ids: &[i64],
) -> StoreResult<u64> {
    let mut copied = 0u64;
    for chunk in chunked(ids, ALTERNATE_NAME_CHUNK_SIZE) {
        let sql = format!(
            "SELECT {} FROM alternate_names WHERE geoname_id IN ({}) ORDER BY geoname_id, rowid",
            ALTERNATE_NAME_COLUMNS.join(", "),
            placeholders(chunk.len())
        );
        let params: Vec<SqlParam> = chunk.iter().map(|id| SqlParam::Integer(*id)).collect();
        let rows = bind_all_as(sqlx::query_as::<_, AlternateName>(&sql), &params)
            .fetch_all(&mut *src)
            .await?;
        for alternate in &rows {
            store::insert_alternate_name(dest, alternate).await?;
        }
        copied += rows.len() as u64;
    }
    Ok(copied)
}

fn derived_metadata(
    source: &Path,
    filter: &SubsetFilter,
    options: &SubsetOptions,
    feature_count: usize,
) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::from([
        (
            "lite_generated_at".to_string(),
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        ),
        ("lite_filter".to_string(), filter.description()),
        ("lite_source_db".to_string(), source.display().to_string()),
        ("lite_feature_count".to_string(), feature_count.to_string()),
    ]);
    if let Some(label) = options.label.as_deref().filter(|l| !l.trim().is_empty()) {
        entries.insert("lite_label".to_string(), label.trim().to_string());
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::search::{fetch_nearby, NearbyQuery};
    use crate::store::testing::{alternate, create_dataset, pacific_northwest};
    use tempfile::TempDir;

    async fn master() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.db");
        let alternates = vec![
            alternate(5809844, "Emerald City", false),
            alternate(5809844, "Seattle", true),
            alternate(5746545, "Rose City", false),
        ];
        create_dataset(
            &path,
            &pacific_northwest(),
            &alternates,
            &[("source", "geonames"), ("lite_filter", "stale")],
        )
        .await;
        (dir, path)
    }

    async fn read_features(path: &Path) -> Vec<FeatureRecord> {
        let mut conn = store::open_readonly(path).await.unwrap();
        let sql = format!(
            "SELECT {} FROM features ORDER BY rowid",
            FEATURE_COLUMNS.join(", ")
        );
        let rows = sqlx::query_as::<_, FeatureRecord>(&sql)
            .fetch_all(&mut conn)
            .await
            .unwrap();
        conn.close().await.unwrap();
        rows
    }

    async fn count(path: &Path, table: &str) -> i64 {
        let mut conn = store::open_readonly(path).await.unwrap();
        let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&mut conn)
            .await
            .unwrap();
        conn.close().await.unwrap();
        n
    }

    #[test]
    fn test_description_field_order() {
        assert_eq!(SubsetFilter::default().description(), "all");

        let mut filter = SubsetFilter::region("US", Some("WA"), Some("King County"));
        filter.feature_codes = vec!["H.LK".into(), "T.TRL".into()];
        assert_eq!(
            filter.description(),
            "country=US;admin1=WA;admin2=King County;codes=H.LK,T.TRL"
        );

        let codes_only = SubsetFilter {
            feature_codes: vec!["P.PPL".into()],
            admin1: Some(" ".into()),
            ..Default::default()
        };
        assert_eq!(codes_only.description(), "codes=P.PPL");
    }

    #[tokio::test]
    async fn test_region_subset_round_trip() {
        let (dir, source) = master().await;
        let output = dir.path().join("out/us-wa.db");
        let filter = SubsetFilter::region("US", Some("WA"), None);
        let report = build_subset(&source, &output, &filter, &SubsetOptions::default())
            .await
            .unwrap();

        assert_eq!(report.features, 4);
        assert_eq!(report.size_bytes, fs::metadata(&output).unwrap().len());

        let results = fetch_nearby(&output, &NearbyQuery::new(47.0, -122.5, 500.0, 200))
            .await
            .unwrap();
        assert_eq!(results.len(), 4);
        for result in &results {
            assert_eq!(result.feature.country.as_deref(), Some("US"));
            assert_eq!(result.feature.admin1.as_deref(), Some("WA"));
        }
    }

    #[tokio::test]
    async fn test_alternate_names_follow_parents() {
        let (dir, source) = master().await;
        let output = dir.path().join("wa.db");
        let filter = SubsetFilter::region("US", Some("WA"), None);
        let report = build_subset(&source, &output, &filter, &SubsetOptions::default())
            .await
            .unwrap();

        // Rose City belongs to Portland, which is not in the extract
        assert_eq!(report.alternate_names, 2);
        assert_eq!(count(&output, "alternate_names").await, 2);
    }

    #[tokio::test]
    async fn test_alternate_names_across_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("master.db");
        let features: Vec<FeatureRecord> = (1..=1700)
            .map(|i| {
                let country = if i % 2 == 0 { "US" } else { "CA" };
                FeatureRecord::new(i, "f", 45.0, -120.0).with_admin(country, "XX", None)
            })
            .collect();
        let alternates: Vec<AlternateName> =
            (1..=1700).map(|i| alternate(i, "alt", false)).collect();
        create_dataset(&source, &features, &alternates, &[]).await;

        let output = dir.path().join("us.db");
        let filter = SubsetFilter::region("US", None, None);
        let report = build_subset(&source, &output, &filter, &SubsetOptions::default())
            .await
            .unwrap();

        assert_eq!(report.features, 850);
        assert_eq!(report.alternate_names, 850);
    }

    #[tokio::test]
    async fn test_metadata_merges_master_entries() {
        let (dir, source) = master().await;
        let output = dir.path().join("wa.db");
        let options = SubsetOptions {
            label: Some("Washington".into()),
            ..Default::default()
        };
        build_subset(&source, &output, &SubsetFilter::region("US", Some("WA"), None), &options)
            .await
            .unwrap();

        let metadata = store::dataset_metadata(&output).await.unwrap();
        assert_eq!(metadata["source"], "geonames");
        assert_eq!(metadata["lite_filter"], "country=US;admin1=WA");
        assert_eq!(metadata["lite_label"], "Washington");
        assert_eq!(metadata["lite_feature_count"], "4");
        assert_eq!(metadata["lite_source_db"], source.display().to_string());
        assert!(metadata["lite_generated_at"].ends_with('Z'));
    }

    #[tokio::test]
    async fn test_rebuild_is_identical() {
        let (dir, source) = master().await;
        let output = dir.path().join("wa.db");
        let filter = SubsetFilter::region("US", Some("WA"), None);

        build_subset(&source, &output, &filter, &SubsetOptions::default())
            .await
            .unwrap();
        let first = read_features(&output).await;

        build_subset(&source, &output, &filter, &SubsetOptions::default())
            .await
            .unwrap();
        let second = read_features(&output).await;

        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[tokio::test]
    async fn test_existing_output_is_replaced() {
        let (dir, source) = master().await;
        let output = dir.path().join("wa.db");
        fs::write(&output, b"not a database").unwrap();

        let filter = SubsetFilter {
            feature_codes: vec!["H.LK".into()],
            ..Default::default()
        };
        let report = build_subset(&source, &output, &filter, &SubsetOptions::default())
            .await
            .unwrap();
        assert_eq!(report.features, 1);
    }

    #[tokio::test]
    async fn test_hostile_filter_value_is_inert() {
        let (dir, source) = master().await;
        let output = dir.path().join("evil.db");
        let filter = SubsetFilter::region("US", Some("WA"), Some("x' OR '1'='1"));
        let report = build_subset(&source, &output, &filter, &SubsetOptions::default())
            .await
            .unwrap();

        assert_eq!(report.features, 0);
        assert_eq!(count(&source, "features").await, 6);
    }

    #[tokio::test]
    async fn test_limit_and_classes() {
        let (dir, source) = master().await;
        let output = dir.path().join("sample.db");
        let filter = SubsetFilter {
            feature_classes: vec!["P".into()],
            limit: Some(2),
            ..Default::default()
        };
        let report = build_subset(&source, &output, &filter, &SubsetOptions::default())
            .await
            .unwrap();
        assert_eq!(report.features, 2);

        let metadata = store::dataset_metadata(&output).await.unwrap();
        assert_eq!(metadata["lite_filter"], "classes=P;limit=2");
    }

    #[tokio::test]
    async fn test_zero_limit_means_no_cap() {
        let (dir, source) = master().await;
        let output = dir.path().join("all.db");
        let filter = SubsetFilter {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(filter.description(), "all");

        let report = build_subset(&source, &output, &filter, &SubsetOptions::default())
            .await
            .unwrap();
        assert_eq!(report.features, 6);
    }

    #[tokio::test]
    async fn test_oversized_limit_is_rejected() {
        let (dir, source) = master().await;
        let output = dir.path().join("huge.db");
        fs::write(&output, b"previous extract").unwrap();
        let filter = SubsetFilter {
            limit: Some(u64::MAX),
            ..Default::default()
        };

        let err = build_subset(&source, &output, &filter, &SubsetOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert_eq!(fs::read(&output).unwrap(), b"previous extract");
    }

    #[tokio::test]
    async fn test_missing_source_keeps_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("nope.db");
        let output = dir.path().join("existing.db");
        fs::write(&output, b"previous extract").unwrap();

        let err = build_subset(&source, &output, &SubsetFilter::default(), &SubsetOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_dataset_not_found());
        assert!(err.to_string().contains("nope.db"));
        assert_eq!(fs::read(&output).unwrap(), b"previous extract");
    }

    #[tokio::test]
    async fn test_without_alternate_names_table() {
        let (dir, source) = master().await;
        let output = dir.path().join("plain.db");
        let options = SubsetOptions {
            alternate_names: false,
            ..Default::default()
        };
        build_subset(&source, &output, &SubsetFilter::default(), &options)
            .await
            .unwrap();

        let mut conn = store::open_readonly(&output).await.unwrap();
        assert!(!store::table_exists(&mut conn, "alternate_names").await.unwrap());
        assert!(store::table_exists(&mut conn, "features").await.unwrap());
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_build_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("garbage.db");
        fs::write(&source, vec![0x42u8; 4096]).unwrap();
        let output = dir.path().join("out.db");

        let err = build_subset(&source, &output, &SubsetFilter::default(), &SubsetOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_storage());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_builder_requires_master() {
        let dir = tempfile::tempdir().unwrap();
        let builder = SubsetBuilder::new(DatasetLocator::new(&StoreConfig::with_base_dir(dir.path())));
        let output = dir.path().join("out.db");

        let err = builder
            .build(&output, &SubsetFilter::default(), &SubsetOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_dataset_not_found());
        assert!(!output.exists());
    }
}
