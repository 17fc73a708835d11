//! Runtime configuration from environment variables.

use crate::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::url_validator::{validate_api_url, UrlValidationError};
use crate::{DEFAULT_BIND_ADDR, DEFAULT_FINDINGS_PATH, DEFAULT_PDF_PATH};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("Invalid GEMINI_BASE_URL: {0}")]
    BaseUrl(#[from] UrlValidationError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub pdf_path: PathBuf,
    pub findings_path: PathBuf,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: Url,
    pub gemini_timeout: Duration,
}

impl Config {
    /// Read configuration from the process environment (after loading `.env`
    /// if one exists).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from any variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bind_raw = var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "BIND_ADDR",
            value: bind_raw.clone(),
        })?;

        let timeout_secs = match var("GEMINI_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::Invalid {
                    name: "GEMINI_TIMEOUT_SECS",
                    value: raw,
                })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let base_url = validate_api_url(
            &var("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        )?;

        Ok(Self {
            bind_addr,
            pdf_path: PathBuf::from(var("EVIDENCE_PDF").unwrap_or_else(|| DEFAULT_PDF_PATH.to_string())),
            findings_path: PathBuf::from(
                var("EVIDENCE_FINDINGS").unwrap_or_else(|| DEFAULT_FINDINGS_PATH.to_string()),
            ),
            gemini_api_key: var("GEMINI_API_KEY").map(|k| k.trim().to_string()),
            gemini_model: var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            gemini_base_url: base_url,
            gemini_timeout: Duration::from_secs(timeout_secs),
        })
    }
}
