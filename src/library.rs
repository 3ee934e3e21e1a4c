//! The operations the server exposes: search, the personal library, reading
//! lists, and citations.
//!
//! Calls that reach a billed or rate-limited upstream (search, source fetches,
//! citation generation) must be admitted by the rate limiter first. Lookups
//! distinguish "not yours" from "not anywhere"; deletes do not.

use std::sync::Arc;

use serde::Serialize;

use crate::apis::{same_paper, PaperRecord, PaperSource};
use crate::citation::{CitationFormat, CitationGenerator};
use crate::error::LibraryError;
use crate::ratelimit::RateLimiter;
use crate::resolve::{Origin, Resolver};
use crate::store::{self, DeleteOutcome, PaperStore, ReadingList, SaveOutcome, SavedPaper};

pub const DEFAULT_MAX_RESULTS: u32 = 10;
pub const DEFAULT_RELATED_RESULTS: u32 = 5;
pub const MAX_RESULTS_CAP: u32 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub external_id: String,
    pub format: CitationFormat,
    pub citation: String,
    pub resolved_from: Origin,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadingListDetail {
    #[serde(flatten)]
    pub list: ReadingList,
    pub papers: Vec<SavedPaper>,
}

pub struct Library {
    store: PaperStore,
    source: Arc<dyn PaperSource>,
    resolver: Resolver,
    citations: Option<CitationGenerator>,
    limiter: RateLimiter,
}

fn required_id(external_id: &str) -> Result<&str, LibraryError> {
    let external_id = external_id.trim();
    if external_id.is_empty() {
        return Err(LibraryError::Validation(
            "Paper id cannot be empty".to_string(),
        ));
    }
    Ok(external_id)
}

impl Library {
    pub fn new(
        store: PaperStore,
        source: Arc<dyn PaperSource>,
        citations: Option<CitationGenerator>,
        limiter: RateLimiter,
    ) -> Self {
        let resolver = Resolver::new(store.clone(), Arc::clone(&source));
        Self {
            store,
            source,
            resolver,
            citations,
            limiter,
        }
    }

    pub fn citations_enabled(&self) -> bool {
        self.citations.is_some()
    }

    fn admit(&self, client_id: &str) -> Result<(), LibraryError> {
        if self.limiter.admit(client_id) {
            return Ok(());
        }
        let retry_after_secs = self
            .limiter
            .retry_after(client_id)
            .unwrap_or_else(|| self.limiter.window())
            .as_secs_f64()
            .ceil() as u64;
        tracing::warn!(
            "Rate limited {} ({} calls per {:?})",
            client_id,
            self.limiter.threshold(),
            self.limiter.window()
        );
        Err(LibraryError::RateLimited { retry_after_secs })
    }

    pub async fn search(
        &self,
        client_id: &str,
        query: &str,
        max_results: Option<u32>,
    ) -> Result<Vec<PaperRecord>, LibraryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(LibraryError::Validation(
                "Search query cannot be empty".to_string(),
            ));
        }
        let max = max_results
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, MAX_RESULTS_CAP);
        self.admit(client_id)?;

        let results = self.source.search(query, max).await?;
        tracing::info!(
            "Search '{}' on {} returned {} papers",
            query,
            self.source.name(),
            results.len()
        );
        Ok(results)
    }

    /// Papers similar to `external_id`, found by searching the source on its title.
    /// The paper itself is left out.
    pub async fn related(
        &self,
        client_id: &str,
        owner_id: &str,
        external_id: &str,
        max_results: Option<u32>,
    ) -> Result<Vec<PaperRecord>, LibraryError> {
        let external_id = required_id(external_id)?;
        let max = max_results
            .unwrap_or(DEFAULT_RELATED_RESULTS)
            .clamp(1, MAX_RESULTS_CAP);
        self.admit(client_id)?;

        let resolution = self.resolver.resolve(external_id, owner_id).await?;
        let title = resolution.record.title.trim();
        if title.is_empty() {
            return Ok(Vec::new());
        }
        let mut results = self.source.search(title, max + 1).await?;
        results.retain(|paper| !same_paper(&paper.external_id, external_id));
        results.truncate(max as usize);
        tracing::info!("Found {} papers related to {}", results.len(), external_id);
        Ok(results)
    }

    /// Save `record` into `owner_id`'s library. The record's own owner field is ignored.
    pub async fn save(
        &self,
        owner_id: &str,
        record: &PaperRecord,
        reading_list_id: Option<i64>,
    ) -> Result<SaveOutcome, LibraryError> {
        let external_id = required_id(&record.external_id)?;
        if record.title.trim().is_empty() {
            return Err(LibraryError::Validation(
                "Paper title cannot be empty".to_string(),
            ));
        }
        self.check_reading_list(owner_id, reading_list_id).await?;

        let mut owned = record.owned_by(owner_id);
        owned.external_id = external_id.to_string();
        self.insert(owned, reading_list_id).await.map(|(outcome, _)| outcome)
    }

    async fn insert(
        &self,
        mut record: PaperRecord,
        reading_list_id: Option<i64>,
    ) -> Result<(SaveOutcome, PaperRecord), LibraryError> {
        record.authors = store::normalize_authors(&record.authors);
        let outcome = self.store.save(&record, reading_list_id).await?;
        tracing::info!(
            "Save {} for {}: {:?}",
            record.external_id,
            record.owner_id,
            outcome
        );
        Ok((outcome, record))
    }

    /// Save a paper known only by its identifier, fetching its metadata if needed.
    pub async fn save_by_id(
        &self,
        client_id: &str,
        owner_id: &str,
        external_id: &str,
        reading_list_id: Option<i64>,
    ) -> Result<(SaveOutcome, PaperRecord), LibraryError> {
        let external_id = required_id(external_id)?;
        self.check_reading_list(owner_id, reading_list_id).await?;

        if let Some(saved) = self.resolver.from_library(external_id, owner_id).await? {
            return Ok((SaveOutcome::AlreadyExists, saved.record));
        }
        self.admit(client_id)?;
        let resolution = self.resolver.from_source(external_id).await?;

        // Keep the id the caller asked for; the source may answer with a versioned one.
        let mut record = resolution.record.owned_by(owner_id);
        record.external_id = external_id.to_string();
        if record.title.trim().is_empty() {
            return Err(LibraryError::Validation(format!(
                "Paper {} has no title",
                external_id
            )));
        }
        self.insert(record, reading_list_id).await
    }

    pub async fn get(&self, owner_id: &str, external_id: &str) -> Result<PaperRecord, LibraryError> {
        let external_id = required_id(external_id)?;
        if let Some(record) = self.store.find(external_id, owner_id).await? {
            return Ok(record);
        }
        if self.store.find_any_owner(external_id).await? {
            return Err(LibraryError::Forbidden(format!(
                "Paper {} belongs to another user",
                external_id
            )));
        }
        Err(LibraryError::NotFound(format!(
            "Paper not found: {}",
            external_id
        )))
    }

    pub async fn list(
        &self,
        owner_id: &str,
        reading_list_id: Option<i64>,
    ) -> Result<Vec<SavedPaper>, LibraryError> {
        Ok(self.store.list_for_owner(owner_id, reading_list_id).await?)
    }

    pub async fn delete(&self, owner_id: &str, external_id: &str) -> Result<(), LibraryError> {
        let external_id = required_id(external_id)?;
        match self.store.delete(external_id, owner_id).await? {
            DeleteOutcome::Deleted => {
                tracing::info!("Deleted {} for {}", external_id, owner_id);
                Ok(())
            }
            DeleteOutcome::NotFoundOrForbidden => Err(LibraryError::NotFound(format!(
                "Paper not found in your library: {}",
                external_id
            ))),
        }
    }

    /// A paper can only be filed under a list its owner created.
    async fn check_reading_list(
        &self,
        owner_id: &str,
        reading_list_id: Option<i64>,
    ) -> Result<(), LibraryError> {
        let Some(list_id) = reading_list_id else {
            return Ok(());
        };
        match self.store.find_list(list_id).await? {
            Some(list) if list.owner_id == owner_id => Ok(()),
            _ => Err(LibraryError::Validation(format!(
                "Unknown reading list: {}",
                list_id
            ))),
        }
    }

    pub async fn create_reading_list(
        &self,
        owner_id: &str,
        name: &str,
        description: &str,
    ) -> Result<ReadingList, LibraryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LibraryError::Validation(
                "Reading list name cannot be empty".to_string(),
            ));
        }
        let list = self
            .store
            .create_list(owner_id, name, description.trim())
            .await?;
        tracing::info!("Created reading list {} '{}' for {}", list.id, list.name, owner_id);
        Ok(list)
    }

    pub async fn reading_lists(&self, owner_id: &str) -> Result<Vec<ReadingList>, LibraryError> {
        Ok(self.store.lists_for_owner(owner_id).await?)
    }

    /// A reading list with its papers. Another owner's list is Forbidden.
    pub async fn get_reading_list(
        &self,
        owner_id: &str,
        list_id: i64,
    ) -> Result<ReadingListDetail, LibraryError> {
        let list = self
            .store
            .find_list(list_id)
            .await?
            .ok_or_else(|| LibraryError::NotFound(format!("Reading list not found: {}", list_id)))?;
        if list.owner_id != owner_id {
            return Err(LibraryError::Forbidden(format!(
                "Reading list {} belongs to another user",
                list_id
            )));
        }
        let papers = self.store.list_for_owner(owner_id, Some(list_id)).await?;
        Ok(ReadingListDetail { list, papers })
    }

    pub async fn delete_reading_list(&self, owner_id: &str, list_id: i64) -> Result<(), LibraryError> {
        match self.store.delete_list(list_id, owner_id).await? {
            DeleteOutcome::Deleted => {
                tracing::info!("Deleted reading list {} for {}", list_id, owner_id);
                Ok(())
            }
            DeleteOutcome::NotFoundOrForbidden => Err(LibraryError::NotFound(format!(
                "Reading list not found: {}",
                list_id
            ))),
        }
    }

    /// Cite a paper from the caller's library, or from the bibliographic source if unsaved.
    pub async fn cite(
        &self,
        client_id: &str,
        owner_id: &str,
        external_id: &str,
        format: &str,
    ) -> Result<Citation, LibraryError> {
        let format: CitationFormat = format.parse()?;
        let external_id = required_id(external_id)?;
        let generator = self.citations.as_ref().ok_or_else(|| {
            LibraryError::Generation(
                "No citation backend configured. Set GOOGLE_API_KEY.".to_string(),
            )
        })?;
        self.admit(client_id)?;

        let resolution = self.resolver.resolve(external_id, owner_id).await?;
        let citation = generator
            .generate(&resolution.record, format.as_str())
            .await?;
        tracing::info!(
            "Generated {} citation for {} ({:?}) via {}",
            format,
            external_id,
            resolution.origin,
            generator.backend_name()
        );

        Ok(Citation {
            external_id: external_id.to_string(),
            format,
            citation,
            resolved_from: resolution.origin,
        })
    }

    pub fn formats(&self) -> Vec<&'static str> {
        CitationFormat::ALL.iter().map(|f| f.as_str()).collect()
    }
}
