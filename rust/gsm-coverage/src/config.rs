use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    env,
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    pub max_pool_size: u32,
    pub pg_ssl_root_cert: Option<String>,
    pub pg_ssl_cert: Option<String>,
    pub pg_ssl_key: Option<String>,
    pub api_key: Option<String>,
    pub media_root: PathBuf,
    pub max_upload_bytes: usize,
    pub default_limit: i64,
    pub max_limit: i64,
    pub bootstrap_schema: bool,
    pub operator_resolve_attempts: u32,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    gsm_listen_addr: Option<String>,
    #[serde(default)]
    gsm_listen_host: Option<String>,
    #[serde(default)]
    gsm_listen_port: Option<u16>,
    #[serde(default)]
    gsm_database_url: Option<String>,
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default = "default_pool_size")]
    gsm_max_pool_size: u32,
    #[serde(default)]
    gsm_api_key: Option<String>,
    #[serde(default)]
    gsm_media_root: Option<PathBuf>,
    #[serde(default = "default_max_upload_bytes")]
    gsm_max_upload_bytes: usize,
    #[serde(default = "default_limit")]
    gsm_default_limit: i64,
    #[serde(default = "default_max_limit")]
    gsm_max_limit: i64,
    #[serde(default = "default_bootstrap_schema")]
    gsm_bootstrap_schema: bool,
    #[serde(default = "default_resolve_attempts")]
    gsm_operator_resolve_attempts: u32,
}

const fn default_pool_size() -> u32 {
    10
}

const fn default_max_upload_bytes() -> usize {
    32 * 1024 * 1024
}

const fn default_limit() -> i64 {
    50
}

const fn default_max_limit() -> i64 {
    200
}

const fn default_bootstrap_schema() -> bool {
    true
}

const fn default_resolve_attempts() -> u32 {
    5
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig =
            envy::from_env().context("failed to parse GSM_* environment variables")?;

        let listen_addr =
            resolve_addr(raw.gsm_listen_addr, raw.gsm_listen_host, raw.gsm_listen_port)?;

        let database_url = raw
            .gsm_database_url
            .or(raw.database_url)
            .context("GSM_DATABASE_URL or DATABASE_URL must be set")?;

        let api_key = raw
            .gsm_api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Ok(Self {
            listen_addr,
            database_url,
            max_pool_size: raw.gsm_max_pool_size.max(1),
            pg_ssl_root_cert: non_empty_env("PGSSLROOTCERT"),
            pg_ssl_cert: non_empty_env("PGSSLCERT"),
            pg_ssl_key: non_empty_env("PGSSLKEY"),
            api_key,
            media_root: raw
                .gsm_media_root
                .unwrap_or_else(|| PathBuf::from("./media")),
            max_upload_bytes: raw.gsm_max_upload_bytes.max(1024),
            default_limit: raw.gsm_default_limit.max(1),
            max_limit: raw.gsm_max_limit.max(raw.gsm_default_limit.max(1)),
            bootstrap_schema: raw.gsm_bootstrap_schema,
            operator_resolve_attempts: raw.gsm_operator_resolve_attempts.max(1),
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn resolve_addr(
    addr: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<SocketAddr> {
    if let Some(addr) = addr {
        return addr
            .to_socket_addrs()
            .context("invalid GSM_LISTEN_ADDR value")?
            .next()
            .context("GSM_LISTEN_ADDR resolved to no addresses");
    }

    let host = host.unwrap_or_else(|| "0.0.0.0".to_string());
    let port = port.unwrap_or(8000);
    let combined = format!("{}:{}", host, port);
    combined
        .to_socket_addrs()
        .context("invalid GSM listen host/port combination")?
        .next()
        .context("listen address resolved to no targets")
}
