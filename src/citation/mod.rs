//! Citation formatting through a generative-text backend.
//!
//! The backend's output is free text. Whatever it returns is stripped of
//! markdown code fences and trimmed before it is handed back as a citation.

pub mod gemini;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::apis::PaperRecord;

#[derive(Debug, Error)]
pub enum CitationError {
    #[error("Unsupported citation format '{0}' (supported: APA, MLA, Chicago, Harvard, IEEE, BibTeX)")]
    UnsupportedFormat(String),
    #[error("Citation generation failed: {0}")]
    GenerationFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CitationFormat {
    #[serde(rename = "APA")]
    Apa,
    #[serde(rename = "MLA")]
    Mla,
    Chicago,
    Harvard,
    #[serde(rename = "IEEE")]
    Ieee,
    #[serde(rename = "BibTeX")]
    Bibtex,
}

impl CitationFormat {
    pub const ALL: [CitationFormat; 6] = [
        Self::Apa,
        Self::Mla,
        Self::Chicago,
        Self::Harvard,
        Self::Ieee,
        Self::Bibtex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apa => "APA",
            Self::Mla => "MLA",
            Self::Chicago => "Chicago",
            Self::Harvard => "Harvard",
            Self::Ieee => "IEEE",
            Self::Bibtex => "BibTeX",
        }
    }
}

impl fmt::Display for CitationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CitationFormat {
    type Err = CitationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| CitationError::UnsupportedFormat(wanted.to_string()))
    }
}

/// A backend that turns one prompt into one text completion.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String, CitationError>;
}

#[derive(Clone)]
pub struct CitationGenerator {
    backend: Arc<dyn TextGenerator>,
}

impl CitationGenerator {
    pub fn new(backend: Arc<dyn TextGenerator>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Validate `format` and format `record` in it. An unknown format never reaches the backend.
    pub async fn generate(&self, record: &PaperRecord, format: &str) -> Result<String, CitationError> {
        let format: CitationFormat = format.parse()?;
        self.format_citation(record, format).await
    }

    async fn format_citation(
        &self,
        record: &PaperRecord,
        format: CitationFormat,
    ) -> Result<String, CitationError> {
        let prompt = build_prompt(record, format);
        tracing::debug!(
            "Requesting {} citation for {} from {}",
            format,
            record.external_id,
            self.backend.name()
        );
        let raw = self.backend.generate(&prompt).await?;
        let citation = strip_code_fences(&raw);
        if citation.is_empty() {
            return Err(CitationError::GenerationFailed(
                "backend returned an empty citation".to_string(),
            ));
        }
        Ok(citation)
    }
}

/// Build the instruction prompt for `record`. Same inputs always give the same prompt.
pub fn build_prompt(record: &PaperRecord, format: CitationFormat) -> String {
    let authors = if record.authors.is_empty() {
        "Unknown".to_string()
    } else {
        record.authors.join(", ")
    };
    let doi = if record.doi.is_empty() { "N/A" } else { record.doi.as_str() };
    let year = if record.publication_year.is_empty() {
        "n.d."
    } else {
        record.publication_year.as_str()
    };

    format!(
        "Generate a citation in {format} style for the following academic paper.\n\
         \n\
         Title: {title}\n\
         Authors: {authors}\n\
         Year: {year}\n\
         Source: {source}\n\
         DOI: {doi}\n\
         URL: {url}\n\
         \n\
         Respond with ONLY the {format} citation text. Do not wrap it in markdown or code \
         fences, and do not add any explanation, labels, or commentary.",
        format = format,
        title = record.title,
        authors = authors,
        year = year,
        source = source_label(&record.external_id),
        doi = doi,
        url = canonical_url(&record.external_id),
    )
}

fn looks_like_doi(external_id: &str) -> bool {
    external_id.starts_with("10.") && external_id.contains('/')
}

fn source_label(external_id: &str) -> &'static str {
    if looks_like_doi(external_id) {
        "DOI registered publication"
    } else {
        "arXiv preprint"
    }
}

pub fn canonical_url(external_id: &str) -> String {
    if looks_like_doi(external_id) {
        format!("https://doi.org/{}", external_id)
    } else {
        let id = external_id.strip_prefix("arxiv:").unwrap_or(external_id);
        format!("https://arxiv.org/abs/{}", id)
    }
}

/// Remove markdown code fences and surrounding whitespace. An opening fence may
/// carry a language tag (```` ```json ````, ```` ```bibtex ````), which goes with it.
pub fn strip_code_fences(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let (first_line, body) = rest.split_once('\n').unwrap_or((rest, ""));
        if is_fence_tag(first_line.trim()) {
            text = body;
        }
    }
    text.replace("```json", "").replace("```", "").trim().to_string()
}

fn is_fence_tag(tag: &str) -> bool {
    tag.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
}
