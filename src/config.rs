use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::apis::arxiv::{self, ArxivClient};
use crate::apis::{PaperSource, SourceError};
use crate::citation::gemini::{self, GeminiClient};
use crate::citation::CitationGenerator;
use crate::ratelimit::RateLimiter;

/// Identity used for every caller until the server grows authentication.
pub const DEFAULT_OWNER_ID: &str = "default_user";

const DEFAULT_RATE_LIMIT: usize = 10;
const DEFAULT_RATE_WINDOW_SECS: u64 = 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub google_api_key: Option<String>,
    pub gemini_model: String,
    pub arxiv_api_url: String,
    pub rate_limit: usize,
    pub rate_window: Duration,
    pub http_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("PAPER_LIBRARY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_or_default(&lookup).join(".paper-library"));

        let google_api_key = lookup("GOOGLE_API_KEY").filter(|k| !k.trim().is_empty());
        let gemini_model =
            lookup("GEMINI_MODEL").unwrap_or_else(|| gemini::DEFAULT_MODEL.to_string());
        let arxiv_api_url =
            lookup("ARXIV_API_URL").unwrap_or_else(|| arxiv::DEFAULT_BASE_URL.to_string());

        let rate_limit = parse_or(&lookup, "PAPER_LIBRARY_RATE_LIMIT", DEFAULT_RATE_LIMIT);
        let rate_window = Duration::from_secs(parse_or(
            &lookup,
            "PAPER_LIBRARY_RATE_WINDOW_SECS",
            DEFAULT_RATE_WINDOW_SECS,
        ));
        let http_timeout = Duration::from_secs(parse_or(
            &lookup,
            "PAPER_LIBRARY_HTTP_TIMEOUT_SECS",
            DEFAULT_HTTP_TIMEOUT_SECS,
        ));

        Self {
            data_dir,
            google_api_key,
            gemini_model,
            arxiv_api_url,
            rate_limit,
            rate_window,
            http_timeout,
        }
    }

    pub fn build_source(&self) -> Result<Arc<dyn PaperSource>, SourceError> {
        Ok(Arc::new(ArxivClient::new(
            self.arxiv_api_url.clone(),
            self.http_timeout,
        )?))
    }

    /// Build the citation generator if an API key is configured.
    pub fn build_citations(&self) -> Result<Option<CitationGenerator>, reqwest::Error> {
        let Some(key) = self.google_api_key.as_ref() else {
            tracing::warn!("Citation generation disabled: GOOGLE_API_KEY not set");
            return Ok(None);
        };
        let client = GeminiClient::new(key.clone(), self.gemini_model.clone(), self.http_timeout)?;
        Ok(Some(CitationGenerator::new(Arc::new(client))))
    }

    pub fn build_rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.rate_limit, self.rate_window)
    }

    pub fn status(&self) -> ConfigStatus {
        ConfigStatus {
            data_dir: self.data_dir.display().to_string(),
            citation_backend: if self.google_api_key.is_some() {
                format!("gemini ({})", self.gemini_model)
            } else {
                "disabled: GOOGLE_API_KEY not set".to_string()
            },
            bibliographic_source: self.arxiv_api_url.clone(),
            rate_limit: format!("{} calls per {}s", self.rate_limit, self.rate_window.as_secs()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigStatus {
    pub data_dir: String,
    pub citation_backend: String,
    pub bibliographic_source: String,
    pub rate_limit: String,
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        None => default,
    }
}

fn home_or_default(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("HOME", "/home/me")]);
        assert_eq!(cfg.data_dir, PathBuf::from("/home/me/.paper-library"));
        assert_eq!(cfg.google_api_key, None);
        assert_eq!(cfg.gemini_model, "gemini-2.5-flash");
        assert_eq!(cfg.arxiv_api_url, "https://export.arxiv.org/api/query");
        assert_eq!(cfg.rate_limit, 10);
        assert_eq!(cfg.rate_window, Duration::from_secs(60));
        assert_eq!(cfg.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("PAPER_LIBRARY_DATA_DIR", "/tmp/lib"),
            ("GOOGLE_API_KEY", "secret"),
            ("PAPER_LIBRARY_RATE_LIMIT", "3"),
            ("PAPER_LIBRARY_RATE_WINDOW_SECS", "10"),
        ]);
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/lib"));
        assert_eq!(cfg.google_api_key.as_deref(), Some("secret"));
        assert_eq!(cfg.rate_limit, 3);
        assert_eq!(cfg.rate_window, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let cfg = config(&[
            ("PAPER_LIBRARY_RATE_LIMIT", "lots"),
            ("PAPER_LIBRARY_HTTP_TIMEOUT_SECS", "-1"),
        ]);
        assert_eq!(cfg.rate_limit, 10);
        assert_eq!(cfg.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_blank_api_key_disables_citations() {
        let cfg = config(&[("GOOGLE_API_KEY", "  ")]);
        assert!(cfg.google_api_key.is_none());
        assert!(cfg.build_citations().unwrap().is_none());
        assert!(cfg.status().citation_backend.starts_with("disabled"));
    }
}
