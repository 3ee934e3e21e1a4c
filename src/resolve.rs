use std::sync::Arc;

use serde::Serialize;

use crate::apis::{PaperRecord, PaperSource};
use crate::error::LibraryError;
use crate::store::PaperStore;

/// Where a resolved record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Library,
    Source,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub record: PaperRecord,
    pub origin: Origin,
}

/// Looks papers up in the caller's library first, then in the bibliographic source.
/// Resolution never writes to the library.
#[derive(Clone)]
pub struct Resolver {
    store: PaperStore,
    source: Arc<dyn PaperSource>,
}

impl Resolver {
    pub fn new(store: PaperStore, source: Arc<dyn PaperSource>) -> Self {
        Self { store, source }
    }

    pub async fn resolve(
        &self,
        external_id: &str,
        owner_id: &str,
    ) -> Result<Resolution, LibraryError> {
        if let Some(resolution) = self.from_library(external_id, owner_id).await? {
            return Ok(resolution);
        }
        self.from_source(external_id).await
    }

    /// The caller's saved copy, if any. Never touches the source.
    pub async fn from_library(
        &self,
        external_id: &str,
        owner_id: &str,
    ) -> Result<Option<Resolution>, LibraryError> {
        let Some(record) = self.store.find(external_id, owner_id).await? else {
            return Ok(None);
        };
        tracing::debug!("Resolved {} from library of {}", external_id, owner_id);
        Ok(Some(Resolution {
            record,
            origin: Origin::Library,
        }))
    }

    pub async fn from_source(&self, external_id: &str) -> Result<Resolution, LibraryError> {
        match self.source.fetch_by_id(external_id).await? {
            Some(record) => {
                tracing::debug!("Resolved {} from {}", external_id, self.source.name());
                Ok(Resolution {
                    record,
                    origin: Origin::Source,
                })
            }
            None => Err(LibraryError::NotFound(format!(
                "Paper not found: {}",
                external_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::SourceError;
    use crate::testing::{sample_record, StubSource};

    #[tokio::test]
    async fn test_prefers_library_over_source() {
        let store = PaperStore::open_in_memory().unwrap();
        let stored = sample_record("1706.03762", "alice");
        store.save(&stored, None).await.unwrap();

        let mut remote = sample_record("1706.03762", "");
        remote.title = "Stale Remote Title".to_string();
        let source = Arc::new(StubSource::new().with_paper(remote));

        let resolver = Resolver::new(store, source.clone());
        let resolution = resolver.resolve("1706.03762", "alice").await.unwrap();
        assert_eq!(resolution.origin, Origin::Library);
        assert_eq!(resolution.record, stored);
        assert_eq!(source.fetches(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_source_without_saving() {
        let store = PaperStore::open_in_memory().unwrap();
        let source = Arc::new(StubSource::new().with_paper(sample_record("2301.00001", "")));
        let resolver = Resolver::new(store.clone(), source.clone());

        let resolution = resolver.resolve("2301.00001", "alice").await.unwrap();
        assert_eq!(resolution.origin, Origin::Source);
        assert_eq!(resolution.record.external_id, "2301.00001");
        assert_eq!(source.fetches(), 1);
        assert!(store.find("2301.00001", "alice").await.unwrap().is_none());
        assert!(!store.find_any_owner("2301.00001").await.unwrap());
    }

    #[tokio::test]
    async fn test_other_owners_copy_is_not_used() {
        let store = PaperStore::open_in_memory().unwrap();
        store.save(&sample_record("x", "bob"), None).await.unwrap();
        let resolver = Resolver::new(store, Arc::new(StubSource::new()));

        let err = resolver.resolve("x", "alice").await.unwrap_err();
        assert!(matches!(err, LibraryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_not_found_when_both_miss() {
        let store = PaperStore::open_in_memory().unwrap();
        let source = Arc::new(StubSource::new());
        let resolver = Resolver::new(store, source.clone());

        let err = resolver.resolve("0000.00000", "alice").await.unwrap_err();
        assert!(matches!(err, LibraryError::NotFound(_)));
        assert_eq!(err.status_code(), 404);
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_source_failure_propagates() {
        let store = PaperStore::open_in_memory().unwrap();
        let resolver = Resolver::new(store, Arc::new(StubSource::unavailable()));

        let err = resolver.resolve("1706.03762", "alice").await.unwrap_err();
        assert!(matches!(err, LibraryError::Source(SourceError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_library_lookup_never_calls_source() {
        let store = PaperStore::open_in_memory().unwrap();
        store.save(&sample_record("a", "alice"), None).await.unwrap();
        let source = Arc::new(StubSource::new().with_paper(sample_record("b", "")));
        let resolver = Resolver::new(store, source.clone());

        assert!(resolver.from_library("a", "alice").await.unwrap().is_some());
        assert!(resolver.from_library("b", "alice").await.unwrap().is_none());
        assert_eq!(source.fetches(), 0);
    }
}
