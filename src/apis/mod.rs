pub mod arxiv;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Normalized paper metadata, shared by the bibliographic source and the library store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub external_id: String,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub publication_year: String,
    /// Empty when the paper has no DOI.
    pub doi: String,
    /// Empty for records that came straight from a bibliographic source.
    #[serde(default)]
    pub owner_id: String,
}

impl PaperRecord {
    /// Copy of this record owned by `owner_id`.
    pub fn owned_by(&self, owner_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Source unavailable: {0}")]
    Unavailable(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// A bibliographic search API that can look papers up by identifier or free text.
#[async_trait]
pub trait PaperSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_by_id(&self, external_id: &str) -> Result<Option<PaperRecord>, SourceError>;
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<PaperRecord>, SourceError>;
}

/// Whether two identifiers name the same paper, ignoring an `arxiv:` prefix,
/// the archive path of old-style ids, and a trailing `vN` version.
pub fn same_paper(a: &str, b: &str) -> bool {
    base_id(a).eq_ignore_ascii_case(base_id(b))
}

fn base_id(id: &str) -> &str {
    let id = id.trim();
    let id = id.strip_prefix("arxiv:").unwrap_or(id);
    let id = id.rsplit('/').next().unwrap_or(id);
    match id.rfind('v') {
        Some(pos)
            if pos > 0
                && pos + 1 < id.len()
                && id[pos + 1..].bytes().all(|b| b.is_ascii_digit()) =>
        {
            &id[..pos]
        }
        _ => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_paper_ignores_version_and_prefix() {
        assert!(same_paper("1706.03762", "1706.03762v7"));
        assert!(same_paper("arxiv:1706.03762v1", "1706.03762v7"));
        assert!(same_paper("hep-th/9901001", "9901001v2"));
        assert!(!same_paper("1706.03762", "1706.03763"));
        assert!(!same_paper("1706.03762", "1706.0376"));
    }
}
