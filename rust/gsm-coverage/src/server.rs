use crate::{
    blob::FsBlobStore,
    config::AppConfig,
    db,
    error::{Result, ServiceError},
    ingest::{CoverageService, ScanPage, Upload},
    models::{CsvLinePatch, CsvLineView, GsmDataView, GsmScanView},
    pagination::PageRequest,
    state::AppState,
};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, Path, Query, Request, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub struct Server {
    config: Arc<AppConfig>,
    state: AppState,
}

impl Server {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let pool = db::connect_pool(&config).await?;
        if config.bootstrap_schema {
            db::ensure_schema(&pool).await?;
        }
        let config = Arc::new(config);
        let blobs = Arc::new(FsBlobStore::new(config.media_root.clone()));
        let coverage = CoverageService::new(pool, blobs, Arc::clone(&config));
        let state = AppState::new(Arc::clone(&config), coverage);

        Ok(Self { config, state })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, media_root = %self.config.media_root.display(), "GSM coverage listening");
        axum::serve(listener, router(self.state)).await?;
        Ok(())
    }
}

/// Builds the HTTP surface. Everything except `/healthz` sits behind the API key check.
pub fn router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes;

    let coverage = Router::new()
        .route("/gsm_coverage/gsm_scan/", get(list_scans).post(create_scan))
        .route("/gsm_coverage/gsm_scan/:id/", get(get_scan).patch(reingest_scan))
        .route("/gsm_coverage/gsm_scan/:id/file/", get(download_scan_file))
        .route("/gsm_coverage/csv_line/:id/", patch(update_csv_line))
        .route("/gsm_coverage/gsm_data/", get(list_gsm_data))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/healthz", get(health))
        .merge(coverage)
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    enforce_api_key(request.headers(), &state.config)?;
    Ok(next.run(request).await)
}

fn enforce_api_key(headers: &HeaderMap, config: &AppConfig) -> Result<()> {
    if let Some(expected) = &config.api_key {
        let provided = headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok());

        if provided != Some(expected.as_str()) {
            return Err(ServiceError::Auth);
        }
    }

    Ok(())
}

async fn create_scan(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<GsmScanView>)> {
    let multipart = multipart.map_err(rejected_form)?;
    let form = ScanForm::read(multipart).await?;
    let upload = form
        .file
        .ok_or_else(|| ServiceError::InvalidRequest("file is required".into()))?;
    let operator = form
        .operator
        .ok_or_else(|| ServiceError::InvalidRequest("operator is required".into()))?;

    let scan = state.coverage.ingest(upload, &operator).await?;
    Ok((StatusCode::CREATED, Json(scan)))
}

async fn list_scans(
    State(state): State<AppState>,
    Query(request): Query<PageRequest>,
) -> Result<Json<ScanPage>> {
    Ok(Json(state.coverage.list_scans(&request).await?))
}

async fn get_scan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GsmScanView>> {
    let id = parse_id(&id, "gsm scan")?;
    Ok(Json(state.coverage.scan(id).await?))
}

/// A non-multipart body, or a form without `file`, leaves the scan unchanged.
async fn reingest_scan(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<GsmScanView>> {
    let id = parse_id(&id, "gsm scan")?;
    let upload = match multipart {
        Ok(multipart) => ScanForm::read(multipart).await?.file,
        Err(rejection) => {
            debug!(scan_id = id, reason = %rejection, "re-ingest request carried no form");
            None
        }
    };
    Ok(Json(state.coverage.reingest(id, upload).await?))
}

async fn download_scan_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let id = parse_id(&id, "gsm scan")?;
    let (file_name, bytes) = state.coverage.scan_file(id).await?;

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        file_name.replace(['"', '\\'], "_")
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/csv")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn update_csv_line(
    State(state): State<AppState>,
    Path(id): Path<String>,
    patch: std::result::Result<Json<CsvLinePatch>, JsonRejection>,
) -> Result<Json<CsvLineView>> {
    let id = parse_id(&id, "csv line")?;
    let Json(patch) = patch.map_err(rejected_json)?;
    Ok(Json(state.coverage.update_line(id, patch).await?))
}

#[derive(Debug, Default, Deserialize)]
struct DataFilter {
    #[serde(default)]
    operator: Option<String>,
}

async fn list_gsm_data(
    State(state): State<AppState>,
    Query(filter): Query<DataFilter>,
) -> Result<Json<Vec<GsmDataView>>> {
    Ok(Json(
        state.coverage.list_data(filter.operator.as_deref()).await?,
    ))
}

/// Ids that are not integers cannot name a row.
fn parse_id(raw: &str, what: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| ServiceError::NotFound(format!("{what} {raw}")))
}

#[derive(Debug, Default)]
struct ScanForm {
    file: Option<Upload>,
    operator: Option<String>,
}

impl ScanForm {
    async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = ScanForm::default();
        while let Some(field) = multipart.next_field().await.map_err(invalid_form)? {
            match field.name() {
                Some("file") => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let bytes = field.bytes().await.map_err(invalid_form)?;
                    form.file = Some(Upload {
                        file_name,
                        bytes: bytes.to_vec(),
                    });
                }
                Some("operator") => {
                    form.operator = Some(field.text().await.map_err(invalid_form)?);
                }
                _ => {}
            }
        }
        Ok(form)
    }
}

fn invalid_form(err: MultipartError) -> ServiceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ServiceError::PayloadTooLarge(err.body_text());
    }
    ServiceError::InvalidRequest(format!("malformed multipart body: {}", err.body_text()))
}

fn rejected_form(rejection: MultipartRejection) -> ServiceError {
    ServiceError::InvalidRequest(format!(
        "expected a multipart/form-data body: {}",
        rejection.body_text()
    ))
}

fn rejected_json(rejection: JsonRejection) -> ServiceError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ServiceError::PayloadTooLarge(rejection.body_text());
    }
    ServiceError::InvalidRequest(rejection.body_text())
}
