//! Dataset file access: connections, canonical schema, metadata.

use std::collections::BTreeMap;
use std::path::Path;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteSynchronous,
};
use sqlx::ConnectOptions;
use tracing::debug;

use crate::error::StoreResult;
use crate::models::{AlternateName, FeatureRecord};

const SCHEMA_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS features (
        geoname_id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        name_ascii TEXT,
        feature_class TEXT,
        feature_code TEXT,
        latitude REAL,
        longitude REAL,
        country TEXT,
        admin1 TEXT,
        admin2 TEXT,
        population INTEGER,
        elevation REAL,
        timezone TEXT,
        modification_date TEXT,
        search_tokens TEXT,
        grid_lat INTEGER,
        grid_lng INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_features_latlng ON features(latitude, longitude)",
    "CREATE INDEX IF NOT EXISTS idx_features_class_code ON features(feature_class, feature_code)",
    "CREATE INDEX IF NOT EXISTS idx_features_country ON features(country)",
    "CREATE INDEX IF NOT EXISTS idx_features_grid ON features(grid_lat, grid_lng)",
];

const SCHEMA_ALTERNATE_NAMES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS alternate_names (
        geoname_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        name_ascii TEXT,
        is_preferred INTEGER DEFAULT 0,
        FOREIGN KEY(geoname_id) REFERENCES features(geoname_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_alt_names_geoname ON alternate_names(geoname_id)",
];

const INSERT_FEATURE_SQL: &str = r#"
    INSERT INTO features (
        geoname_id, name, name_ascii, feature_class, feature_code,
        latitude, longitude, country, admin1, admin2,
        population, elevation, timezone, modification_date, search_tokens,
        grid_lat, grid_lng
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const INSERT_ALTERNATE_NAME_SQL: &str =
    "INSERT INTO alternate_names (geoname_id, name, name_ascii, is_preferred) VALUES (?, ?, ?, ?)";

/// Short-lived read-only connection to an existing dataset file.
pub async fn open_readonly(path: &Path) -> StoreResult<SqliteConnection> {
    let conn = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .connect()
        .await?;
    debug!(path = %path.display(), "Opened dataset read-only");
    Ok(conn)
}

/// Writable connection, creating the file when missing.
///
/// Rollback journal rather than WAL, so a closed dataset is one file.
pub async fn open_writable(path: &Path) -> StoreResult<SqliteConnection> {
    let conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .connect()
        .await?;
    debug!(path = %path.display(), "Opened dataset for writing");
    Ok(conn)
}

/// Create the canonical tables and indexes.
pub async fn create_schema(conn: &mut SqliteConnection, alternate_names: bool) -> StoreResult<()> {
    let extra: &[&str] = if alternate_names {
        SCHEMA_ALTERNATE_NAMES
    } else {
        &[]
    };
    for statement in SCHEMA_TABLES.iter().chain(extra) {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

pub async fn table_exists(conn: &mut SqliteConnection, table: &str) -> StoreResult<bool> {
    let found: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(found.is_some())
}

/// Metadata key/value pairs; empty when the table is absent.
pub async fn read_metadata(conn: &mut SqliteConnection) -> StoreResult<BTreeMap<String, String>> {
    if !table_exists(conn, "metadata").await? {
        return Ok(BTreeMap::new());
    }
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM metadata")
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().collect())
}

/// Metadata of the dataset at `path`.
pub async fn dataset_metadata(path: &Path) -> StoreResult<BTreeMap<String, String>> {
    let mut conn = open_readonly(path).await?;
    let metadata = read_metadata(&mut conn).await;
    let _ = sqlx::Connection::close(conn).await;
    metadata
}

pub async fn write_metadata(
    conn: &mut SqliteConnection,
    entries: &BTreeMap<String, String>,
) -> StoreResult<()> {
    for (key, value) in entries {
        sqlx::query("INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)")
            .bind(key.as_str())
            .bind(value.as_str())
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn insert_feature(conn: &mut SqliteConnection, record: &FeatureRecord) -> StoreResult<()> {
    sqlx::query(INSERT_FEATURE_SQL)
        .bind(record.geoname_id)
        .bind(record.name.as_str())
        .bind(record.name_ascii.as_deref())
        .bind(record.feature_class.as_deref())
        .bind(record.feature_code.as_deref())
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(record.country.as_deref())
        .bind(record.admin1.as_deref())
        .bind(record.admin2.as_deref())
        .bind(record.population)
        .bind(record.elevation)
        .bind(record.timezone.as_deref())
        .bind(record.modification_date.as_deref())
        .bind(record.search_tokens.as_deref())
        .bind(record.grid_lat)
        .bind(record.grid_lng)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn insert_alternate_name(
    conn: &mut SqliteConnection,
    alternate: &AlternateName,
) -> StoreResult<()> {
    sqlx::query(INSERT_ALTERNATE_NAME_SQL)
        .bind(alternate.geoname_id)
        .bind(alternate.name.as_str())
        .bind(alternate.name_ascii.as_deref())
        .bind(alternate.is_preferred)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Fixtures for tests that need a dataset on disk.
#[cfg(test)]
pub mod testing {
    use super::*;
    use sqlx::Connection;

    /// Write a master-style dataset with the canonical schema.
    pub async fn create_dataset(
        path: &Path,
        features: &[FeatureRecord],
        alternate_names: &[AlternateName],
        metadata: &[(&str, &str)],
    ) {
        let mut conn = open_writable(path).await.unwrap();
        create_schema(&mut conn, true).await.unwrap();

        let mut tx = conn.begin().await.unwrap();
        for record in features {
            insert_feature(&mut tx, record).await.unwrap();
        }
        for alternate in alternate_names {
            insert_alternate_name(&mut tx, alternate).await.unwrap();
        }
        let entries: BTreeMap<String, String> = metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        write_metadata(&mut tx, &entries).await.unwrap();
        tx.commit().await.unwrap();
        conn.close().await.unwrap();
    }

    pub fn alternate(geoname_id: i64, name: &str, preferred: bool) -> AlternateName {
        AlternateName {
            geoname_id,
            name: name.to_string(),
            name_ascii: Some(name.to_ascii_lowercase()),
            is_preferred: Some(preferred as i64),
        }
    }

    /// Pacific Northwest sample: Seattle area, Portland, and Vancouver BC.
    pub fn pacific_northwest() -> Vec<FeatureRecord> {
        vec![
            FeatureRecord::new(5809844, "Seattle", 47.6062, -122.3321)
                .with_code("P", "PPLA2")
                .with_admin("US", "WA", Some("King County")),
            FeatureRecord::new(5799841, "Lake Union", 47.6390, -122.3337)
                .with_code("H", "LK")
                .with_admin("US", "WA", Some("King County")),
            FeatureRecord::new(5786882, "Bellevue", 47.6104, -122.2007)
                .with_code("P", "PPL")
                .with_admin("US", "WA", Some("King County")),
            FeatureRecord::new(5812944, "Tacoma", 47.2529, -122.4443)
                .with_code("P", "PPLA2")
                .with_admin("US", "WA", Some("Pierce County")),
            FeatureRecord::new(5746545, "Portland", 45.5234, -122.6762)
                .with_code("P", "PPLA2")
                .with_admin("US", "OR", Some("Multnomah County")),
            FeatureRecord::new(6173331, "Vancouver", 49.2497, -123.1193)
                .with_code("P", "PPLA2")
                .with_admin("CA", "02", None),
        ]
    }

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.db");
        create_dataset(&path, &pacific_northwest(), &[], &[("source", "test")]).await;

        let metadata = dataset_metadata(&path).await.unwrap();
        assert_eq!(metadata.get("source").map(String::as_str), Some("test"));
    }

    #[tokio::test]
    async fn test_metadata_missing_table_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.db");
        let mut conn = open_writable(&path).await.unwrap();
        sqlx::query("CREATE TABLE features (geoname_id INTEGER PRIMARY KEY, name TEXT)")
            .execute(&mut conn)
            .await
            .unwrap();
        conn.close().await.unwrap();

        assert!(dataset_metadata(&path).await.unwrap().is_empty());
    }
}
