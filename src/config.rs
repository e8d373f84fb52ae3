use anyhow::Context;

use crate::ingest::{IngestLimits, MAX_DIMENSION, MAX_UPLOAD_BYTES};

pub const DEFAULT_SCAN_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub database_url: String,
    /// Comma-separated list; `*` (the default) means permissive CORS.
    pub cors_origins: Vec<String>,
    /// Page size for scans and listings. Correctness degrades silently for
    /// datasets past this bound; a known scale limit carried over as-is.
    pub scan_limit: usize,
    pub limits: IngestLimits,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind = std::env::var("IMGLINK_BIND").unwrap_or_else(|_| "0.0.0.0:8000".into());
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let cors_origins: Vec<String> = std::env::var("IMGLINK_CORS_ORIGINS")
            .unwrap_or_else(|_| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let scan_limit: usize = std::env::var("IMGLINK_SCAN_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SCAN_LIMIT);
        let max_upload_bytes: usize = std::env::var("IMGLINK_MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(MAX_UPLOAD_BYTES);
        let max_dimension: u32 = std::env::var("IMGLINK_MAX_DIMENSION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(MAX_DIMENSION);

        Ok(Self {
            bind,
            database_url,
            cors_origins,
            scan_limit,
            limits: IngestLimits {
                max_upload_bytes,
                max_dimension,
            },
        })
    }
}
