//! The external source adapter contract

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use pantry_records::{CanonicalRecord, EntityType};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SourceError};

/// One page of upstream records
#[derive(Debug, Clone)]
pub struct Page {
    /// Cursor this page was fetched with; `None` is the first page
    pub cursor: Option<String>,
    pub records: Vec<CanonicalRecord>,
    /// Cursor of the following page; `None` on the last page
    pub next_cursor: Option<String>,
}

/// Fetches records from an upstream API and maps them to canonical records
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable source name stored on records (`fsa`, `off`, `open_prices`)
    fn source(&self) -> &'static str;

    /// Entity types this adapter can fetch
    fn entity_types(&self) -> &[EntityType];

    /// `Ok(None)` means upstream confirmed the record does not exist
    async fn fetch_by_id(
        &self,
        entity_type: EntityType,
        identifier: &str,
    ) -> Result<Option<CanonicalRecord>>;

    async fn fetch_page(&self, entity_type: EntityType, cursor: Option<&str>) -> Result<Page>;

    fn unsupported(&self, entity_type: EntityType) -> SourceError {
        SourceError::Unsupported {
            source: self.source(),
            entity_type,
        }
    }
}

/// Every record of `entity_type`, page by page, starting at `since`.
///
/// The stream ends after the last page or the first error. To resume after
/// an error, start a new stream from the failed page's cursor.
pub fn fetch_all(
    adapter: Arc<dyn SourceAdapter>,
    entity_type: EntityType,
    since: Option<String>,
) -> BoxStream<'static, Result<Page>> {
    stream::try_unfold(Some(since), move |state| {
        next_page(Arc::clone(&adapter), entity_type, state)
    })
    .boxed()
}

/// Unfold step: `state` is `None` once the last page has been yielded
async fn next_page(
    adapter: Arc<dyn SourceAdapter>,
    entity_type: EntityType,
    state: Option<Option<String>>,
) -> Result<Option<(Page, Option<Option<String>>)>> {
    let Some(cursor) = state else {
        return Ok(None);
    };
    let page = adapter.fetch_page(entity_type, cursor.as_deref()).await?;
    let next = page.next_cursor.clone().map(Some);
    Ok(Some((page, next)))
}

/// Which adapter serves each entity type
#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: HashMap<EntityType, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` for every entity type it serves, replacing earlier ones
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> &mut Self {
        for entity_type in adapter.entity_types() {
            self.adapters.insert(*entity_type, Arc::clone(&adapter));
        }
        self
    }

    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, entity_type: EntityType) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&entity_type).cloned()
    }
}
