//! HTTP server for nearby search, on-demand extracts and the dataset catalog.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use clap::Parser;
use futures::stream;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use geolite::search::NearbyResult;
use geolite::{
    CatalogManager, DatasetDescriptor, DatasetLocator, NearbySearch, StoreConfig, StoreError,
    SubsetBuilder,
};

mod params;
use params::{LiteParams, NearbyParams};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "serve")]
#[command(about = "Geospatial feature store server")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8000")]
    listen: String,

    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Application state shared across handlers
struct AppState {
    locator: DatasetLocator,
    search: NearbySearch,
    builder: SubsetBuilder,
    catalog: CatalogManager,
}

type ApiError = (StatusCode, String);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Geolite Server");
    let config = StoreConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let locator = DatasetLocator::new(&config);

    // Missing datasets are reported per request, not fatal at startup
    match locator.active() {
        Ok(path) => info!("Active dataset: {}", path.display()),
        Err(e) => warn!("{}", e),
    }
    match locator.master() {
        Ok(path) => info!("Master dataset: {}", path.display()),
        Err(e) => warn!("{}", e),
    }
    info!("Dataset catalog: {}", config.catalog_path.display());

    let state = Arc::new(AppState {
        search: NearbySearch::new(locator.clone()),
        builder: SubsetBuilder::new(locator.clone()),
        catalog: CatalogManager::new(&config, locator.clone()),
        locator,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/places/nearby", get(nearby_handler))
        .route("/api/geonames/lite", get(lite_handler))
        .route("/api/geonames/datasets", get(datasets_handler))
        .route("/datasets/{file_name}", get(download_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("Starting server on {}", args.listen);

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Map a library error onto a status code; the message becomes the body.
fn api_error(operation: &str, e: StoreError) -> ApiError {
    let status = match &e {
        StoreError::DatasetNotFound(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::BAD_REQUEST {
        warn!(error = %e, "{} rejected", operation);
    } else {
        error!(error = %e, "{} failed", operation);
    }
    (status, e.to_string())
}

/// Health check endpoint
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let active = state.locator.active().ok();

    Json(HealthResponse {
        status: if active.is_some() { "ok" } else { "degraded" },
        dataset: active
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned())),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    dataset: Option<String>,
}

/// Nearby search against the active dataset
async fn nearby_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NearbyParams>,
) -> Result<Json<NearbyResult>, ApiError> {
    let query = params
        .into_query()
        .map_err(|e| api_error("Nearby search", e))?;

    info!(
        lat = query.lat,
        lng = query.lng,
        radius_km = query.radius_km,
        limit = query.limit,
        codes = %query.feature_codes.join(","),
        "Nearby search"
    );

    let mut result = state
        .search
        .search(&query)
        .await
        .map_err(|e| api_error("Nearby search", e))?;

    for nearby in &mut result.features {
        nearby.distance_km = (nearby.distance_km * 1000.0).round() / 1000.0;
    }

    Ok(Json(result))
}

/// Build a filtered dataset from the master and hand back its bytes
async fn lite_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LiteParams>,
) -> Result<Response, ApiError> {
    let request = params
        .into_request()
        .map_err(|e| api_error("Lite build", e))?;

    info!(
        filter = %request.filter.description(),
        label = request.options.label.as_deref().unwrap_or(""),
        "Lite build requested"
    );

    // Removed on drop: on any early return here, or once the body is sent
    let workdir = tempfile::Builder::new()
        .prefix("geolite-")
        .tempdir()
        .map_err(|e| api_error("Lite build", e.into()))?;
    let output = workdir.path().join("subset.db");

    let report = state
        .builder
        .build(&output, &request.filter, &request.options)
        .await
        .map_err(|e| api_error("Lite build", e))?;

    let file = tokio::fs::File::open(&output)
        .await
        .map_err(|e| api_error("Lite build", e.into()))?;

    info!(
        file = %request.file_name,
        features = report.features,
        size = %geolite::catalog::format_size(report.size_bytes),
        "Lite build complete"
    );

    Ok(attachment(&request.file_name, file_body(file, workdir)))
}

#[derive(Serialize)]
struct DatasetList {
    datasets: Vec<DatasetDescriptor>,
}

/// Catalog of downloadable datasets
async fn datasets_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DatasetList>, ApiError> {
    let datasets = state
        .catalog
        .load_catalog()
        .map_err(|e| api_error("Dataset catalog", e))?;
    Ok(Json(DatasetList { datasets }))
}

/// Stream an on-disk catalog dataset
async fn download_handler(
    State(state): State<Arc<AppState>>,
    Path(file_name): Path<String>,
) -> Result<Response, ApiError> {
    let path = state
        .catalog
        .find_download(&file_name)
        .map_err(|e| api_error("Dataset download", e))?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("Dataset {file_name} not found on disk."),
            )
        })?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| api_error("Dataset download", e.into()))?;

    Ok(attachment(&file_name, file_body(file, ())))
}

/// Chunked body over `file`; `guard` is dropped with the stream.
fn file_body<G: Send + 'static>(file: tokio::fs::File, guard: G) -> Body {
    let chunks = stream::try_unfold((file, guard), |(mut file, guard)| async move {
        let mut buf = vec![0u8; DOWNLOAD_CHUNK_SIZE];
        let read = file.read(&mut buf).await?;
        if read == 0 {
            return Ok::<_, std::io::Error>(None);
        }
        buf.truncate(read);
        Ok(Some((Bytes::from(buf), (file, guard))))
    });
    Body::from_stream(chunks)
}

fn attachment(file_name: &str, body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_streamed_body_releases_guard() {
        let workdir = tempfile::tempdir().unwrap();
        let root = workdir.path().to_path_buf();
        let output = root.join("subset.db");
        let payload: Vec<u8> = (0..DOWNLOAD_CHUNK_SIZE * 2 + 17).map(|i| i as u8).collect();
        std::fs::write(&output, &payload).unwrap();

        let file = tokio::fs::File::open(&output).await.unwrap();
        let body = file_body(file, workdir);
        assert!(root.exists());

        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), payload.as_slice());
        assert!(!root.exists());
    }
}
