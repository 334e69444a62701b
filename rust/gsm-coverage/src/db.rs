use crate::{
    config::AppConfig,
    error::{Result as ServiceResult, ServiceError},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bb8::{ManageConnection, Pool, PooledConnection};
use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use std::fs::File;
use std::io::BufReader;
use tokio_postgres::{Config as PgConfig, NoTls};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{error, info};

pub type PgPool = Pool<PgConnectionManager>;
pub type PgConn<'a> = PooledConnection<'a, PgConnectionManager>;

const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");
const SCHEMA_LOCK_ID: i64 = 7_110_208;

pub async fn connect_pool(config: &AppConfig) -> Result<PgPool> {
    let tls = TlsFiles {
        root_cert: config.pg_ssl_root_cert.as_deref(),
        client_cert: config.pg_ssl_cert.as_deref(),
        client_key: config.pg_ssl_key.as_deref(),
    };
    let manager = PgConnectionManager::new(&config.database_url, &tls)?;
    let pool = Pool::builder()
        .max_size(config.max_pool_size)
        .build(manager)
        .await
        .context("failed to build PostgreSQL connection pool")?;

    match pool.get().await {
        Ok(_) => info!("database connectivity check succeeded"),
        Err(err) => error!(error = ?err, "initial database connectivity check failed"),
    }

    Ok(pool)
}

/// Checks a connection out of the pool for one request.
pub async fn checkout(pool: &PgPool) -> ServiceResult<PgConn<'_>> {
    pool.get().await.map_err(|err| {
        error!(error = ?err, "failed to acquire database connection");
        ServiceError::Internal(anyhow::anyhow!("{err:?}"))
    })
}

/// Creates the coverage tables and indexes when they are missing. Concurrent
/// starts serialize on an advisory lock so the DDL never races itself.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let mut conn = pool
        .get()
        .await
        .map_err(|err| anyhow::anyhow!("failed to acquire connection for schema bootstrap: {err:?}"))?;
    let script =
        format!("BEGIN;\nSELECT pg_advisory_xact_lock({SCHEMA_LOCK_ID});\n{SCHEMA_SQL}\nCOMMIT;");
    if let Err(err) = conn.batch_execute(&script).await {
        let _ = conn.batch_execute("ROLLBACK").await;
        return Err::<(), _>(err).context("failed to apply coverage schema");
    }
    info!("coverage schema is in place");
    Ok(())
}

struct TlsFiles<'a> {
    root_cert: Option<&'a str>,
    client_cert: Option<&'a str>,
    client_key: Option<&'a str>,
}

impl TlsFiles<'_> {
    fn connector(&self) -> Result<Option<MakeRustlsConnect>> {
        let Some(root_cert) = self.root_cert else {
            return Ok(None);
        };

        let mut root_store = RootCertStore::empty();
        for cert in read_certs(root_cert, "PGSSLROOTCERT")? {
            root_store
                .add(cert)
                .map_err(|_| anyhow::anyhow!("invalid certificate in PGSSLROOTCERT"))?;
        }

        let builder = ClientConfig::builder().with_root_certificates(root_store);
        let config = match (self.client_cert, self.client_key) {
            (None, None) => builder.with_no_client_auth(),
            (Some(cert), Some(key)) => {
                let chain = read_certs(cert, "PGSSLCERT")?;
                builder
                    .with_client_auth_cert(chain, read_key(key)?)
                    .with_context(|| format!("failed to build client TLS config for {root_cert}"))?
            }
            _ => anyhow::bail!("PGSSLCERT and PGSSLKEY must both be set (or neither)"),
        };

        Ok(Some(MakeRustlsConnect::new(config)))
    }
}

fn read_certs(path: &str, label: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("failed to open {label} file '{path}'"))?,
    );
    let chain = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse {label}"))?;
    if chain.is_empty() {
        anyhow::bail!("{label} contained no certificates");
    }
    Ok(chain)
}

fn read_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("failed to open PGSSLKEY file '{path}'"))?,
    );
    rustls_pemfile::private_key(&mut reader)
        .context("failed to parse PGSSLKEY")?
        .context("PGSSLKEY contained no private keys")
}

#[derive(Clone)]
pub struct PgConnectionManager {
    config: PgConfig,
    tls: Option<MakeRustlsConnect>,
}

impl PgConnectionManager {
    fn new(database_url: &str, tls: &TlsFiles<'_>) -> Result<Self> {
        let config = database_url
            .parse::<PgConfig>()
            .context("invalid database URL")?;
        Ok(Self {
            config,
            tls: tls.connector()?,
        })
    }
}

#[async_trait]
impl ManageConnection for PgConnectionManager {
    type Connection = AsyncPgConnection;
    type Error = anyhow::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let conn = match &self.tls {
            None => {
                let (client, connection) = self.config.connect(NoTls).await?;
                AsyncPgConnection::try_from_client_and_connection(client, connection).await
            }
            Some(connector) => {
                let (client, connection) = self.config.connect(connector.clone()).await?;
                AsyncPgConnection::try_from_client_and_connection(client, connection).await
            }
        };
        conn.map_err(|err| anyhow::anyhow!(err))
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.batch_execute("SELECT 1").await?;
        Ok(())
    }

    fn has_broken(&self, _: &mut Self::Connection) -> bool {
        false
    }
}
