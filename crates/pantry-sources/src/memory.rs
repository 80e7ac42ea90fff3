//! Adapter over an in-process record list, for tests and local runs

use async_trait::async_trait;
use pantry_records::{CanonicalRecord, EntityType};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::adapter::{Page, SourceAdapter};
use crate::error::{Result, SourceError};

/// Serves a fixed list of records for one entity type. Cursors are offsets
/// into the list.
pub struct MemorySource {
    source: &'static str,
    entity_types: [EntityType; 1],
    page_size: usize,
    records: Mutex<Vec<CanonicalRecord>>,
    scripted: Mutex<VecDeque<SourceError>>,
    unavailable: AtomicBool,
    fail_from_page: AtomicUsize,
    delay_ms: AtomicU64,
    by_id_calls: AtomicU64,
    page_calls: AtomicU64,
}

impl MemorySource {
    pub fn new(source: &'static str, entity_type: EntityType, page_size: usize) -> Self {
        Self {
            source,
            entity_types: [entity_type],
            page_size: page_size.max(1),
            records: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            unavailable: AtomicBool::new(false),
            fail_from_page: AtomicUsize::new(usize::MAX),
            delay_ms: AtomicU64::new(0),
            by_id_calls: AtomicU64::new(0),
            page_calls: AtomicU64::new(0),
        }
    }

    pub async fn insert(&self, record: CanonicalRecord) {
        let mut records = self.records.lock().await;
        match records.iter_mut().find(|r| r.identifier == record.identifier) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    pub async fn insert_all(&self, records: impl IntoIterator<Item = CanonicalRecord>) {
        for record in records {
            self.insert(record).await;
        }
    }

    /// Queue an error returned by the next call instead of data
    pub async fn push_error(&self, error: SourceError) {
        self.scripted.lock().await.push_back(error);
    }

    /// Every call fails with `Unavailable` while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Pages with index `>= page` fail with `Unavailable`
    pub fn fail_from_page(&self, page: usize) {
        self.fail_from_page.store(page, Ordering::SeqCst);
    }

    pub fn clear_failures(&self) {
        self.fail_from_page.store(usize::MAX, Ordering::SeqCst);
        self.unavailable.store(false, Ordering::SeqCst);
    }

    /// Sleep before answering each call
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn by_id_calls(&self) -> u64 {
        self.by_id_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> u64 {
        self.page_calls.load(Ordering::SeqCst)
    }

    async fn before_call(&self, entity_type: EntityType) -> Result<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if let Some(err) = self.scripted.lock().await.pop_front() {
            return Err(err);
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable(format!("{} is down", self.source)));
        }
        if !self.entity_types.contains(&entity_type) {
            return Err(self.unsupported(entity_type));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceAdapter for MemorySource {
    fn source(&self) -> &'static str {
        self.source
    }

    fn entity_types(&self) -> &[EntityType] {
        &self.entity_types
    }

    async fn fetch_by_id(
        &self,
        entity_type: EntityType,
        identifier: &str,
    ) -> Result<Option<CanonicalRecord>> {
        self.by_id_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call(entity_type).await?;
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| r.identifier == identifier).cloned())
    }

    async fn fetch_page(&self, entity_type: EntityType, cursor: Option<&str>) -> Result<Page> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call(entity_type).await?;

        let offset = match cursor {
            None => 0,
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| SourceError::Malformed(format!("bad cursor '{}'", c)))?,
        };
        if offset / self.page_size >= self.fail_from_page.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable(format!(
                "{} failed at offset {}",
                self.source, offset
            )));
        }

        let records = self.records.lock().await;
        let start = offset.min(records.len());
        let end = (start + self.page_size).min(records.len());
        Ok(Page {
            cursor: cursor.map(str::to_string),
            records: records[start..end].to_vec(),
            next_cursor: (end < records.len()).then(|| end.to_string()),
        })
    }
}
