use axum::{
    body::{self, Body},
    http::{self, Request, StatusCode},
    Router,
};
use diesel_async::SimpleAsyncConnection;
use gsm_coverage::{
    blob::FsBlobStore,
    config::AppConfig,
    db::{self, PgPool},
    ingest::CoverageService,
    server,
    state::AppState,
};
use serde_json::Value;
use std::{env, future::Future, net::SocketAddr, path::Path, sync::Arc, sync::Once};
use tempfile::TempDir;
use tower::ServiceExt;

const API_KEY: &str = "test-api-key";
const BOUNDARY: &str = "gsm-coverage-test-boundary";
const RESET_SQL: &str = "DROP TRIGGER IF EXISTS gsm_test_reject_link ON gsm_data_scans;\n\
     TRUNCATE csv_lines, gsm_data_scans, gsm_scans, gsm_data, operators RESTART IDENTITY CASCADE";
const REJECT_LINKS_SQL: &str = r#"
CREATE OR REPLACE FUNCTION gsm_test_reject_link() RETURNS trigger AS $$
BEGIN
    RAISE EXCEPTION 'link rejected';
END;
$$ LANGUAGE plpgsql;
CREATE TRIGGER gsm_test_reject_link BEFORE INSERT ON gsm_data_scans
    FOR EACH ROW EXECUTE FUNCTION gsm_test_reject_link();
"#;

static TRACING_INIT: Once = Once::new();

pub const ORANGE_HEADER: &str =
    "time,lat,lon,alt,gps_fix,rat,mccmnc,cell_id,pci,band,earfcn,rsrp_dbm,rsrq_db,sinr_db";
pub const ORANGE_ROW: &str =
    "2024-01-01T00:00:00,48.85,2.35,35,3,LTE,20801,123456,10,B3,1575,-95,10.5,12.1";

/// Runs a test against a router wired to a freshly truncated database and an
/// empty media root. Skips when `GSM_TEST_DATABASE_URL` is not set.
pub async fn with_gsm_harness<F, Fut>(test: F)
where
    F: FnOnce(GsmTestHarness) -> Fut,
    Fut: Future<Output = ()>,
{
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });

    let Some(database_url) = env::var("GSM_TEST_DATABASE_URL")
        .ok()
        .filter(|url| !url.trim().is_empty())
    else {
        eprintln!("[gsm-test] skipping: GSM_TEST_DATABASE_URL is not set");
        return;
    };

    let media = TempDir::new().expect("failed to create media root");
    let config = Arc::new(test_config(database_url, media.path()));
    let pool = db::connect_pool(&config)
        .await
        .expect("failed to connect to test database");
    db::ensure_schema(&pool)
        .await
        .expect("failed to bootstrap coverage schema");
    reset_database(&pool).await;

    let blobs = Arc::new(FsBlobStore::new(media.path()));
    let coverage = CoverageService::new(pool.clone(), blobs, Arc::clone(&config));
    let router = server::router(AppState::new(Arc::clone(&config), coverage.clone()));

    let harness = GsmTestHarness {
        router,
        coverage,
        pool,
        media,
    };
    test(harness).await;
}

fn test_config(database_url: String, media_root: &Path) -> AppConfig {
    AppConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        database_url,
        max_pool_size: 8,
        pg_ssl_root_cert: env::var("PGSSLROOTCERT").ok(),
        pg_ssl_cert: env::var("PGSSLCERT").ok(),
        pg_ssl_key: env::var("PGSSLKEY").ok(),
        api_key: Some(API_KEY.to_string()),
        media_root: media_root.to_path_buf(),
        max_upload_bytes: 4 * 1024 * 1024,
        default_limit: 50,
        max_limit: 200,
        bootstrap_schema: true,
        operator_resolve_attempts: 5,
    }
}

async fn reset_database(pool: &PgPool) {
    let mut conn = pool.get().await.expect("failed to check out connection");
    conn.batch_execute(RESET_SQL)
        .await
        .expect("failed to truncate coverage tables");
}

#[allow(dead_code)]
pub struct GsmTestHarness {
    router: Router,
    pub coverage: CoverageService,
    pub pool: PgPool,
    media: TempDir,
}

#[allow(dead_code)]
impl GsmTestHarness {
    pub async fn upload(&self, file_name: &str, csv: &str, operator: &str) -> http::Response<Body> {
        let body = MultipartBody::new()
            .file(file_name, csv)
            .text("operator", operator)
            .finish();
        self.send("POST", "/gsm_coverage/gsm_scan/", Some(body), true)
            .await
    }

    pub async fn reingest(&self, id: i64, file_name: &str, csv: &str) -> http::Response<Body> {
        let body = MultipartBody::new().file(file_name, csv).finish();
        self.send("PATCH", &format!("/gsm_coverage/gsm_scan/{id}/"), Some(body), true)
            .await
    }

    pub async fn patch_json(&self, path: &str, payload: Value) -> http::Response<Body> {
        let request = Request::builder()
            .method("PATCH")
            .uri(path)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header("x-api-key", API_KEY)
            .body(Body::from(payload.to_string()))
            .expect("failed to build harness request");
        self.oneshot(request).await
    }

    pub async fn get(&self, path: &str) -> http::Response<Body> {
        self.send("GET", path, None, true).await
    }

    pub async fn get_without_api_key(&self, path: &str) -> http::Response<Body> {
        self.send("GET", path, None, false).await
    }

    pub async fn send(
        &self,
        method: &str,
        path: &str,
        multipart: Option<Vec<u8>>,
        include_api_key: bool,
    ) -> http::Response<Body> {
        let mut builder = Request::builder().method(method).uri(path);
        if include_api_key {
            builder = builder.header("x-api-key", API_KEY);
        }
        let body = match multipart {
            Some(bytes) => {
                builder = builder.header(
                    http::header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                );
                Body::from(bytes)
            }
            None => Body::empty(),
        };
        let request = builder.body(body).expect("failed to build harness request");
        self.oneshot(request).await
    }

    async fn oneshot(&self, request: Request<Body>) -> http::Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should handle harness request")
    }

    /// Absolute path of a blob given the relative `file` reported by the API.
    pub fn media_path(&self, relative: &str) -> std::path::PathBuf {
        self.media.path().join(relative)
    }

    /// Makes every scan-to-aggregate link fail, which is the last write of an
    /// ingest. The next harness run drops the trigger again.
    pub async fn reject_links(&self) {
        let mut conn = self.pool.get().await.expect("failed to check out connection");
        conn.batch_execute(REJECT_LINKS_SQL)
            .await
            .expect("failed to install link trigger");
    }

    pub fn stored_file_count(&self) -> usize {
        std::fs::read_dir(self.media.path().join("gsm_coverage/csv"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub async fn read_json(response: http::Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 4 * 1024 * 1024)
        .await
        .expect("response body should be readable");
    let value =
        serde_json::from_slice::<Value>(&bytes).expect("response body should be valid JSON");
    (status, value)
}

pub async fn read_bytes(response: http::Response<Body>) -> (StatusCode, Vec<u8>) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 4 * 1024 * 1024)
        .await
        .expect("response body should be readable");
    (status, bytes.to_vec())
}

pub fn orange_csv() -> String {
    format!("{ORANGE_HEADER}\n{ORANGE_ROW}\n")
}

/// Minimal `multipart/form-data` encoder for harness requests.
pub struct MultipartBody {
    bytes: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn file(mut self, file_name: &str, content: &str) -> Self {
        self.bytes.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: text/csv\r\n\r\n"
            )
            .as_bytes(),
        );
        self.bytes.extend_from_slice(content.as_bytes());
        self.bytes.extend_from_slice(b"\r\n");
        self
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.bytes.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.bytes
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.bytes
    }
}
