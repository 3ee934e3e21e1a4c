//! Stub collaborators shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::apis::{PaperRecord, PaperSource, SourceError};
use crate::citation::{CitationError, TextGenerator};

pub fn sample_record(external_id: &str, owner_id: &str) -> PaperRecord {
    PaperRecord {
        external_id: external_id.to_string(),
        title: "Attention Is All You Need".to_string(),
        authors: vec!["Ashish Vaswani".to_string(), "Noam Shazeer".to_string()],
        abstract_text: "The dominant sequence transduction models.".to_string(),
        publication_year: "2017".to_string(),
        doi: "10.48550/arXiv.1706.03762".to_string(),
        owner_id: owner_id.to_string(),
    }
}

/// In-memory bibliographic source with call counters.
#[derive(Default)]
pub struct StubSource {
    papers: HashMap<String, PaperRecord>,
    search_results: Vec<PaperRecord>,
    unavailable: bool,
    fetches: AtomicUsize,
    searches: AtomicUsize,
    last_query: Mutex<Option<String>>,
}

impl StubSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_paper(mut self, record: PaperRecord) -> Self {
        self.papers.insert(record.external_id.clone(), record);
        self
    }

    pub fn with_search_results(mut self, results: Vec<PaperRecord>) -> Self {
        self.search_results = results;
        self
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<String> {
        self.last_query.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaperSource for StubSource {
    fn name(&self) -> &str {
        "stub"
    }

    async fn fetch_by_id(&self, external_id: &str) -> Result<Option<PaperRecord>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(SourceError::Unavailable("stub returned 503".to_string()));
        }
        Ok(self.papers.get(external_id).cloned())
    }

    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<PaperRecord>, SourceError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock().unwrap() = Some(query.to_string());
        if self.unavailable {
            return Err(SourceError::Unavailable("stub returned 503".to_string()));
        }
        Ok(self
            .search_results
            .iter()
            .take(max_results as usize)
            .cloned()
            .collect())
    }
}

/// Text backend that returns a canned reply and records every prompt.
pub struct StubGenerator {
    reply: Result<String, String>,
    prompts: Mutex<Vec<String>>,
}

impl StubGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TextGenerator for StubGenerator {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, prompt: &str) -> Result<String, CitationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply
            .clone()
            .map_err(CitationError::GenerationFailed)
    }
}
