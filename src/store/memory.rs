use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::error;
use uuid::Uuid;

use super::StateRepository;
use crate::core::{LastEvent, MarkerRead, StateRecord};

/// In-process [`StateRepository`] with the same write semantics as the SQL
/// store.
///
/// Taking it offline makes every operation fail the way an unreachable
/// database does.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    rows: Mutex<HashMap<Uuid, StateRecord>>,
    offline: AtomicBool,
    marker_reads: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `record` as-is, bypassing the merge of [`StateRepository::write_record`].
    pub fn insert(&self, record: StateRecord) {
        self.rows().insert(record.id, record);
    }

    pub fn get(&self, id: Uuid) -> Option<StateRecord> {
        self.rows().get(&id).cloned()
    }

    pub fn set_marker(&self, id: Uuid, marker: LastEvent) -> bool {
        match self.rows().get_mut(&id) {
            Some(record) => {
                record.last_event = marker;
                true
            }
            None => false,
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn marker_reads(&self) -> usize {
        self.marker_reads.load(Ordering::SeqCst)
    }

    fn available(&self) -> bool {
        if self.offline.load(Ordering::SeqCst) {
            error!("Failed to acquire a database connection: target='memory' error='offline'");
            return false;
        }
        true
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<Uuid, StateRecord>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StateRepository for MemoryRepository {
    async fn read_marker(&self, id: Uuid) -> Option<MarkerRead> {
        self.marker_reads.fetch_add(1, Ordering::SeqCst);
        if !self.available() {
            return None;
        }

        Some(match self.rows().get(&id) {
            Some(record) => MarkerRead::Marker(record.last_event),
            None => MarkerRead::NoRow,
        })
    }

    async fn read_record(&self, id: Uuid) -> Option<Option<StateRecord>> {
        if !self.available() {
            return None;
        }
        Some(self.get(id))
    }

    async fn write_record(&self, mut record: StateRecord) -> bool {
        if !self.available() {
            return false;
        }

        let mut rows = self.rows();
        if let Some(stored) = rows.get(&record.id) {
            record.merge_missing_from(stored);
        }
        rows.insert(record.id, record);
        true
    }

    async fn mark_loaded(&self, id: Uuid) -> bool {
        self.available() && self.set_marker(id, LastEvent::Loaded)
    }
}
