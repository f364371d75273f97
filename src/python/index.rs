//! Package index lookups.
//!
//! Used only to enrich package summaries. Lookups never fail the caller:
//! a failed lookup just leaves the package without a summary.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::package::normalize_name;

/// HTTP timeout for index requests.
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Index lookup failure.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The index has no such package.
    #[error("Package not found: {0}")]
    NotFound(String),

    /// Transport failure or unexpected status.
    #[error("Network error: {0}")]
    Network(String),

    /// Response body could not be decoded.
    #[error("Invalid response: {0}")]
    Parse(String),
}

/// Package data returned by an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    /// Canonical package name.
    pub name: String,
    /// Latest released version string.
    pub latest_version: Option<String>,
    /// One-line summary.
    pub summary: Option<String>,
}

/// Source of package metadata.
pub trait PackageIndex: Send + Sync {
    /// Looks up `name`.
    ///
    /// # Errors
    /// Returns `NotFound`, `Network` or `Parse`.
    fn lookup(&self, name: &str) -> Result<IndexRecord, IndexError>;
}

#[derive(Debug, Deserialize)]
struct PyPiResponse {
    info: PyPiInfo,
}

#[derive(Debug, Deserialize)]
struct PyPiInfo {
    name: String,
    version: Option<String>,
    summary: Option<String>,
}

/// JSON API client for PyPI-compatible indexes (`<base>/pypi/<name>/json`).
pub struct PyPiIndex {
    client: reqwest::blocking::Client,
    base_url: String,
    cache: Arc<RwLock<HashMap<String, IndexRecord>>>,
}

impl PyPiIndex {
    /// Creates a client for `base_url` (e.g. `https://pypi.org`).
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("bdepot/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// URL of the JSON document for `name`.
    #[must_use]
    pub fn url_for(&self, name: &str) -> String {
        format!("{}/pypi/{}/json", self.base_url, normalize_name(name))
    }
}

impl PackageIndex for PyPiIndex {
    fn lookup(&self, name: &str) -> Result<IndexRecord, IndexError> {
        let key = normalize_name(name);
        if let Ok(cache) = self.cache.read() {
            if let Some(record) = cache.get(&key) {
                return Ok(record.clone());
            }
        }

        let url = self.url_for(name);
        debug!("Package index GET {}", url);
        let start = Instant::now();

        let response = self.client.get(&url).send().map_err(|e| {
            warn!("Package index request failed: {}", e);
            IndexError::Network(e.to_string())
        })?;

        let status = response.status();
        debug!("Package index response: {} in {:?}", status, start.elapsed());
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(IndexError::NotFound(name.to_string()));
        }
        if !status.is_success() {
            return Err(IndexError::Network(format!("index returned {}", status)));
        }

        let body: PyPiResponse = response
            .json()
            .map_err(|e| IndexError::Parse(e.to_string()))?;
        let record = IndexRecord {
            name: body.info.name,
            latest_version: body.info.version,
            summary: body.info.summary.filter(|s| !s.trim().is_empty()),
        };

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, record.clone());
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_normalizes() {
        let index = PyPiIndex::new("https://pypi.org/");
        assert_eq!(index.url_for("Pillow"), "https://pypi.org/pypi/pillow/json");
        assert_eq!(
            index.url_for("typing_extensions"),
            "https://pypi.org/pypi/typing-extensions/json"
        );
    }

    #[test]
    fn test_response_decoding() {
        let json = r#"{"info": {"name": "numpy", "version": "1.26.2", "summary": "Fundamental package"}, "releases": {}}"#;
        let parsed: PyPiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.info.name, "numpy");
        assert_eq!(parsed.info.version.as_deref(), Some("1.26.2"));
        assert_eq!(parsed.info.summary.as_deref(), Some("Fundamental package"));
    }
}
