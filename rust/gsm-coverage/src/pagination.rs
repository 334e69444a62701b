//! Opaque offset cursors for list endpoints.

use crate::{
    config::AppConfig,
    error::{Result, ServiceError},
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct CursorPayload {
    offset: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageRequest {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginationMeta {
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
    pub limit: i64,
}

impl Page {
    pub fn from_request(config: &AppConfig, request: &PageRequest) -> Result<Self> {
        let limit = request
            .limit
            .unwrap_or(config.default_limit)
            .clamp(1, config.max_limit);
        let offset = request
            .cursor
            .as_deref()
            .map(decode_cursor)
            .transpose()?
            .unwrap_or(0);
        Ok(Self { limit, offset })
    }

    pub fn meta(&self, fetched: usize) -> PaginationMeta {
        let next_cursor = if fetched as i64 >= self.limit {
            Some(encode_cursor(self.offset.saturating_add(self.limit)))
        } else {
            None
        };
        let prev_cursor = if self.offset > 0 {
            Some(encode_cursor(self.offset.saturating_sub(self.limit)))
        } else {
            None
        };
        PaginationMeta {
            next_cursor,
            prev_cursor,
            limit: self.limit,
        }
    }
}

pub fn decode_cursor(cursor: &str) -> Result<i64> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| ServiceError::InvalidRequest("invalid cursor".into()))?;
    let payload: CursorPayload = serde_json::from_slice(&bytes)
        .map_err(|_| ServiceError::InvalidRequest("invalid cursor payload".into()))?;
    Ok(payload.offset.max(0))
}

pub fn encode_cursor(offset: i64) -> String {
    let payload = CursorPayload {
        offset: offset.max(0),
    };
    URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap_or_default())
}
