use std::time::Duration;

use super::{same_paper, PaperRecord, PaperSource, SourceError};
use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

pub const DEFAULT_BASE_URL: &str = "https://export.arxiv.org/api/query";

const ATOM_NS: &[u8] = b"http://www.w3.org/2005/Atom";
const ARXIV_NS: &[u8] = b"http://arxiv.org/schemas/atom";

const DOI_RESOLVERS: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
];

pub struct ArxivClient {
    client: reqwest::Client,
    base_url: String,
}

impl ArxivClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        Ok(Self {
            client: reqwest::Client::builder()
                .user_agent("paper-library/0.1")
                .timeout(timeout)
                .build()?,
            base_url: base_url.into(),
        })
    }

    async fn query(&self, params: &[(&str, String)]) -> Result<Vec<PaperRecord>, SourceError> {
        let resp = self.client.get(&self.base_url).query(params).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!("arXiv returned {}", status)));
        }
        let body = resp.text().await?;
        parse_feed(&body)
    }
}

#[async_trait]
impl PaperSource for ArxivClient {
    fn name(&self) -> &str {
        "arxiv"
    }

    async fn fetch_by_id(&self, external_id: &str) -> Result<Option<PaperRecord>, SourceError> {
        let arxiv_id = external_id.strip_prefix("arxiv:").unwrap_or(external_id);
        if !is_single_id(arxiv_id) {
            tracing::debug!("Not a single arXiv id: {:?}", external_id);
            return Ok(None);
        }
        let papers = self
            .query(&[("id_list", arxiv_id.to_string())])
            .await?;
        Ok(matching_entry(arxiv_id, papers))
    }

    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<PaperRecord>, SourceError> {
        self.query(&[
            ("search_query", format!("all:{}", query)),
            ("start", "0".to_string()),
            ("max_results", max_results.to_string()),
            ("sortBy", "relevance".to_string()),
            ("sortOrder", "descending".to_string()),
        ])
        .await
    }
}

/// `id_list` takes comma-separated ids; only one plain id may be looked up at a time.
fn is_single_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(',') && !id.chars().any(char::is_whitespace)
}

fn matching_entry(requested: &str, papers: Vec<PaperRecord>) -> Option<PaperRecord> {
    papers
        .into_iter()
        .find(|paper| same_paper(&paper.external_id, requested))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
    ArxivDoi,
}

#[derive(Default)]
struct EntryFields {
    id: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    published: Option<String>,
    authors: Vec<String>,
    doi_link: Option<String>,
    arxiv_doi: Option<String>,
}

impl EntryFields {
    fn set(&mut self, field: Field, text: String) {
        match field {
            Field::Id => self.id = Some(text),
            Field::Title => self.title = Some(text),
            Field::Summary => self.summary = Some(text),
            Field::Published => self.published = Some(text),
            Field::ArxivDoi => self.arxiv_doi = Some(text.trim().to_string()),
            Field::AuthorName => {
                let name = text.trim();
                if !name.is_empty() {
                    self.authors.push(name.to_string());
                }
            }
        }
    }

    /// `Ok(None)` for arXiv's own error entries (unknown or malformed ids).
    fn finish(self) -> Result<Option<PaperRecord>, SourceError> {
        let id = self.id.ok_or_else(|| missing("id"))?;
        if id.contains("/api/errors") {
            tracing::debug!("Skipping arXiv error entry {}", id.trim());
            return Ok(None);
        }
        let external_id = id
            .trim()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        if external_id.is_empty() {
            return Err(missing("id"));
        }

        let title = self.title.ok_or_else(|| missing("title"))?;
        let summary = self.summary.ok_or_else(|| missing("summary"))?;
        let published = self.published.ok_or_else(|| missing("published"))?;
        let publication_year = published
            .trim()
            .get(..4)
            .ok_or_else(|| SourceError::Parse(format!("Malformed published timestamp: {}", published)))?
            .to_string();

        let doi = self
            .doi_link
            .map(|link| strip_doi_resolver(&link))
            .or(self.arxiv_doi)
            .unwrap_or_default();

        Ok(Some(PaperRecord {
            external_id,
            title: title.split_whitespace().collect::<Vec<_>>().join(" "),
            authors: self.authors,
            abstract_text: summary.trim().to_string(),
            publication_year,
            doi,
            owner_id: String::new(),
        }))
    }
}

fn missing(field: &str) -> SourceError {
    SourceError::Parse(format!("Entry is missing <{}>", field))
}

fn strip_doi_resolver(link: &str) -> String {
    let link = link.trim();
    DOI_RESOLVERS
        .iter()
        .find_map(|prefix| link.strip_prefix(prefix))
        .unwrap_or(link)
        .to_string()
}

fn bound_to(ns: &ResolveResult, expected: &[u8]) -> bool {
    matches!(ns, ResolveResult::Bound(Namespace(n)) if *n == expected)
}

/// Returns the href of a `<link title="doi">` element.
fn doi_link_href(e: &BytesStart) -> Option<String> {
    let mut href = None;
    let mut is_doi = false;
    for attr in e.attributes().flatten() {
        let value = attr.unescape_value().ok()?.into_owned();
        match attr.key.local_name().as_ref() {
            b"href" => href = Some(value),
            b"title" => is_doi = value == "doi",
            _ => {}
        }
    }
    if is_doi { href } else { None }
}

/// Parse an arXiv Atom feed. Shared by id lookups and free-text search.
pub fn parse_feed(xml: &str) -> Result<Vec<PaperRecord>, SourceError> {
    let mut reader = NsReader::from_str(xml);
    let mut buf = Vec::new();
    let mut papers = Vec::new();
    let mut saw_feed = false;
    let mut entry: Option<EntryFields> = None;
    let mut in_author = false;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        let (ns, event) = reader
            .read_resolved_event_into(&mut buf)
            .map_err(|e| SourceError::Parse(format!("XML parse error: {}", e)))?;
        match event {
            Event::Start(e) => {
                let local = e.local_name();
                let is_atom = bound_to(&ns, ATOM_NS);
                match (local.as_ref(), entry.as_mut()) {
                    (b"feed", None) if is_atom => saw_feed = true,
                    (b"entry", None) if is_atom => entry = Some(EntryFields::default()),
                    (name, Some(current)) => {
                        field = if is_atom {
                            match name {
                                b"id" if !in_author => Some(Field::Id),
                                b"title" if !in_author => Some(Field::Title),
                                b"summary" => Some(Field::Summary),
                                b"published" => Some(Field::Published),
                                b"name" if in_author => Some(Field::AuthorName),
                                b"author" => {
                                    in_author = true;
                                    None
                                }
                                b"link" => {
                                    if let Some(href) = doi_link_href(&e) {
                                        current.doi_link = Some(href);
                                    }
                                    None
                                }
                                _ => None,
                            }
                        } else if bound_to(&ns, ARXIV_NS) && name == b"doi" {
                            Some(Field::ArxivDoi)
                        } else {
                            None
                        };
                        text.clear();
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if let Some(current) = entry.as_mut() {
                    if bound_to(&ns, ATOM_NS) && e.local_name().as_ref() == b"link" {
                        if let Some(href) = doi_link_href(&e) {
                            current.doi_link = Some(href);
                        }
                    }
                }
            }
            Event::Text(e) if field.is_some() => {
                let chunk = e
                    .unescape()
                    .map_err(|e| SourceError::Parse(format!("Bad text content: {}", e)))?;
                text.push_str(&chunk);
            }
            Event::CData(e) if field.is_some() => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Event::End(e) => {
                let local = e.local_name();
                let is_atom = bound_to(&ns, ATOM_NS);
                if is_atom && local.as_ref() == b"entry" {
                    if let Some(done) = entry.take() {
                        if let Some(paper) = done.finish()? {
                            papers.push(paper);
                        }
                    }
                    in_author = false;
                    field = None;
                } else if is_atom && local.as_ref() == b"author" {
                    in_author = false;
                } else if let (Some(f), Some(current)) = (field.take(), entry.as_mut()) {
                    current.set(f, std::mem::take(&mut text));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_feed {
        return Err(SourceError::Parse("Response is not an Atom feed".to_string()));
    }
    if entry.is_some() {
        return Err(SourceError::Parse("Unterminated <entry>".to_string()));
    }
    Ok(papers)
}
