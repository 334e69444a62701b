//! Storage for the raw uploaded files.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};
use tokio::{
    fs,
    io::{AsyncWrite, AsyncWriteExt},
};
use tracing::warn;
use uuid::Uuid;

const UPLOAD_DIR: &str = "gsm_coverage/csv";

/// Handle to a stored upload. `path` is relative to the store root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub name: String,
    pub path: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<BlobRef>;
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn remove(&self, path: &str) -> Result<()>;
}

/// Writes uploads under `<root>/gsm_coverage/csv/`, never overwriting an existing file.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|part| !matches!(part, Component::Normal(_)));
        if escapes || path.is_empty() {
            anyhow::bail!("blob path '{path}' is not a plain relative path");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<BlobRef> {
        let dir = self.root.join(UPLOAD_DIR);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create upload directory {}", dir.display()))?;

        let base = sanitize_file_name(name);
        let mut candidate = base.clone();
        loop {
            let target = dir.join(&candidate);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .await
            {
                Ok(file) => {
                    write_or_discard(&target, file, bytes).await?;
                    return Ok(BlobRef {
                        name: name.to_string(),
                        path: format!("{UPLOAD_DIR}/{candidate}"),
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    candidate = suffixed(&base);
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to create {}", target.display()));
                }
            }
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve(path)?;
        fs::read(&target)
            .await
            .with_context(|| format!("failed to read {}", target.display()))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to remove {}", target.display())),
        }
    }
}

/// Fills a freshly created file; a failed write removes it again so no
/// partial upload is left behind.
async fn write_or_discard<W>(target: &Path, mut file: W, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;
    drop(file);

    if let Err(err) = written {
        if let Err(cleanup) = fs::remove_file(target).await {
            warn!(error = ?cleanup, file = %target.display(), "failed to remove partial upload");
        }
        return Err(err).with_context(|| format!("failed to write {}", target.display()));
    }
    Ok(())
}

fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload.csv".to_string()
    } else {
        cleaned.to_string()
    }
}

fn suffixed(base: &str) -> String {
    let token = Uuid::new_v4().simple().to_string();
    let token = &token[..8];
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{token}.{ext}"),
        _ => format!("{base}_{token}"),
    }
}
