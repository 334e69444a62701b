//! Upload ingestion and the read/update operations around it.

use crate::{
    blob::{BlobRef, BlobStore},
    config::AppConfig,
    db::{self, PgPool},
    error::{Result, ServiceError},
    models::{CsvLinePatch, CsvLineView, GsmDataView, GsmScanView},
    pagination::{Page, PageRequest, PaginationMeta},
    store::{lines, operators, scans, ResolvedOperator},
    table::parse_and_validate,
};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::AsyncConnection;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

const OPERATOR_NAME_MAX_LEN: usize = 150;

/// An uploaded file as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanPage {
    pub results: Vec<GsmScanView>,
    pub pagination: PaginationMeta,
}

#[derive(Clone)]
pub struct CoverageService {
    pool: PgPool,
    blobs: Arc<dyn BlobStore>,
    config: Arc<AppConfig>,
}

impl CoverageService {
    pub fn new(pool: PgPool, blobs: Arc<dyn BlobStore>, config: Arc<AppConfig>) -> Self {
        Self {
            pool,
            blobs,
            config,
        }
    }

    /// Validates `upload`, then stores it and its lines under `operator` in one transaction.
    pub async fn ingest(&self, upload: Upload, operator: &str) -> Result<GsmScanView> {
        let operator = normalize_operator(operator)?;
        let table = parse_and_validate(&upload.file_name, &upload.bytes)?;
        let blob = self
            .blobs
            .put(&upload.file_name, &upload.bytes)
            .await
            .map_err(ServiceError::Internal)?;

        let attempts = self.config.operator_resolve_attempts;
        let (blob_ref, table_ref) = (&blob, &table);
        let mut conn = match db::checkout(&self.pool).await {
            Ok(conn) => conn,
            Err(err) => {
                self.discard_blob(&blob).await;
                return Err(err);
            }
        };
        let outcome = conn
            .transaction::<_, ServiceError, _>(|conn| {
                async move {
                    let resolved = operators::resolve(conn, operator, attempts).await?;
                    let scan = scans::insert(conn, blob_ref).await?;
                    let lines = lines::insert_all(conn, scan.id, table_ref).await?;
                    operators::link_scan(conn, resolved.data.id, scan.id).await?;
                    Ok(GsmScanView::new(scan, lines))
                }
                .scope_boxed()
            })
            .await;

        match outcome {
            Ok(view) => {
                info!(
                    scan_id = view.pk,
                    operator,
                    rows = view.csv_lines.len(),
                    file = %blob.path,
                    "ingested scan"
                );
                Ok(view)
            }
            Err(err) => {
                self.discard_blob(&blob).await;
                Err(err)
            }
        }
    }

    /// Replaces the lines and file of an existing scan. Without a file the scan
    /// is returned untouched.
    pub async fn reingest(&self, scan_id: i64, upload: Option<Upload>) -> Result<GsmScanView> {
        let Some(upload) = upload else {
            return self.scan(scan_id).await;
        };

        {
            let mut conn = db::checkout(&self.pool).await?;
            if scans::find(&mut conn, scan_id).await?.is_none() {
                return Err(not_found_scan(scan_id));
            }
        }

        let table = parse_and_validate(&upload.file_name, &upload.bytes)?;
        let blob = self
            .blobs
            .put(&upload.file_name, &upload.bytes)
            .await
            .map_err(ServiceError::Internal)?;

        let (blob_ref, table_ref) = (&blob, &table);
        let mut conn = match db::checkout(&self.pool).await {
            Ok(conn) => conn,
            Err(err) => {
                self.discard_blob(&blob).await;
                return Err(err);
            }
        };
        let outcome = conn
            .transaction::<_, ServiceError, _>(|conn| {
                async move {
                    if scans::lock(conn, scan_id).await?.is_none() {
                        return Err(not_found_scan(scan_id));
                    }
                    let removed = lines::delete_for_scan(conn, scan_id).await?;
                    let lines = lines::insert_all(conn, scan_id, table_ref).await?;
                    let scan = scans::replace_file(conn, scan_id, blob_ref).await?;
                    Ok((GsmScanView::new(scan, lines), removed))
                }
                .scope_boxed()
            })
            .await;

        match outcome {
            Ok((view, removed)) => {
                info!(
                    scan_id,
                    removed,
                    rows = view.csv_lines.len(),
                    file = %blob.path,
                    "re-ingested scan"
                );
                Ok(view)
            }
            Err(err) => {
                self.discard_blob(&blob).await;
                Err(err)
            }
        }
    }

    pub async fn resolve_operator(&self, name: &str) -> Result<ResolvedOperator> {
        let name = normalize_operator(name)?;
        let mut conn = db::checkout(&self.pool).await?;
        operators::resolve(&mut conn, name, self.config.operator_resolve_attempts).await
    }

    pub async fn scan(&self, scan_id: i64) -> Result<GsmScanView> {
        let mut conn = db::checkout(&self.pool).await?;
        let scan = scans::find(&mut conn, scan_id)
            .await?
            .ok_or_else(|| not_found_scan(scan_id))?;
        let lines = lines::for_scan(&mut conn, scan_id).await?;
        Ok(GsmScanView::new(scan, lines))
    }

    pub async fn list_scans(&self, request: &PageRequest) -> Result<ScanPage> {
        let page = Page::from_request(&self.config, request)?;
        let mut conn = db::checkout(&self.pool).await?;
        let rows = scans::list(&mut conn, &page).await?;
        let mut lines_by_scan =
            lines::for_scans(&mut conn, rows.iter().map(|scan| scan.id).collect()).await?;

        let pagination = page.meta(rows.len());
        let results = rows
            .into_iter()
            .map(|scan| {
                let lines = lines_by_scan.remove(&scan.id).unwrap_or_default();
                GsmScanView::new(scan, lines)
            })
            .collect();
        Ok(ScanPage {
            results,
            pagination,
        })
    }

    /// Raw bytes of the file a scan was built from, with its original name.
    pub async fn scan_file(&self, scan_id: i64) -> Result<(String, Vec<u8>)> {
        let mut conn = db::checkout(&self.pool).await?;
        let scan = scans::find(&mut conn, scan_id)
            .await?
            .ok_or_else(|| not_found_scan(scan_id))?;
        drop(conn);

        let bytes = self
            .blobs
            .read(&scan.file_path)
            .await
            .map_err(ServiceError::Internal)?;
        Ok((scan.file_name, bytes))
    }

    pub async fn list_data(&self, operator: Option<&str>) -> Result<Vec<GsmDataView>> {
        let operator = operator.map(str::trim).filter(|name| !name.is_empty());
        let mut conn = db::checkout(&self.pool).await?;
        operators::list(&mut conn, operator).await
    }

    pub async fn update_line(&self, line_id: i64, patch: CsvLinePatch) -> Result<CsvLineView> {
        let mut conn = db::checkout(&self.pool).await?;
        let row = lines::update(&mut conn, line_id, patch).await?;
        Ok(CsvLineView::from(row))
    }

    async fn discard_blob(&self, blob: &BlobRef) {
        if let Err(err) = self.blobs.remove(&blob.path).await {
            warn!(error = ?err, file = %blob.path, "failed to remove blob after rollback");
        }
    }
}

fn normalize_operator(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::InvalidRequest("operator is required".into()));
    }
    if name.chars().count() > OPERATOR_NAME_MAX_LEN {
        return Err(ServiceError::InvalidRequest(format!(
            "operator is longer than {OPERATOR_NAME_MAX_LEN} characters"
        )));
    }
    Ok(name)
}

fn not_found_scan(scan_id: i64) -> ServiceError {
    ServiceError::NotFound(format!("gsm scan {scan_id}"))
}
