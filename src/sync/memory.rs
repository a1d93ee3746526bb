use super::{RemoteMirror, TimeEntryApi};
use crate::error::SyncError;
use crate::models::{CreatedTimeEntry, EntryId, NewTimeEntry, RemoteSessionRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Зеркало в памяти процесса (офлайн-режим без API).
/// Учитывает поколения: запись со старшим generation не затирается младшим.
#[derive(Debug, Default)]
pub struct MemoryMirror {
    sessions: Mutex<HashMap<String, RemoteSessionRecord>>,
    entries: Mutex<Vec<NewTimeEntry>>,
    next_id: AtomicI64,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, user_id: &str) -> Option<RemoteSessionRecord> {
        self.sessions
            .lock()
            .ok()
            .and_then(|sessions| sessions.get(user_id).cloned())
    }

    pub fn set_session(&self, user_id: &str, record: RemoteSessionRecord) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(user_id.to_string(), record);
        }
    }

    pub fn entries(&self) -> Vec<NewTimeEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> SyncError {
    SyncError::Network(format!("mirror mutex poisoned: {}", e))
}

#[async_trait]
impl RemoteMirror for MemoryMirror {
    async fn hydrate(&self, user_id: &str) -> Result<Option<RemoteSessionRecord>, SyncError> {
        let sessions = self.sessions.lock().map_err(poisoned)?;
        Ok(sessions.get(user_id).cloned())
    }

    async fn upsert(&self, user_id: &str, record: &RemoteSessionRecord) -> Result<(), SyncError> {
        let mut sessions = self.sessions.lock().map_err(poisoned)?;
        let stored_generation = sessions.get(user_id).and_then(|r| r.generation);
        if let (Some(stored), Some(incoming)) = (stored_generation, record.generation) {
            if incoming < stored {
                debug!(
                    "[SYNC] Ignoring stale upsert for {}: generation {} < {}",
                    user_id, incoming, stored
                );
                return Ok(());
            }
        }
        sessions.insert(user_id.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<(), SyncError> {
        let mut sessions = self.sessions.lock().map_err(poisoned)?;
        sessions.remove(user_id);
        Ok(())
    }
}

#[async_trait]
impl TimeEntryApi for MemoryMirror {
    async fn create_entry(&self, entry: &NewTimeEntry) -> Result<CreatedTimeEntry, SyncError> {
        if entry.hours.is_zero() {
            return Err(SyncError::Http {
                status: 422,
                message: "hours must be greater than 0".into(),
            });
        }
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.push(entry.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CreatedTimeEntry {
            id: EntryId::Num(id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(elapsed: u64, generation: u64) -> RemoteSessionRecord {
        RemoteSessionRecord {
            elapsed_seconds: Some(elapsed),
            generation: Some(generation),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stale_generation_is_ignored() {
        let mirror = MemoryMirror::new();
        mirror.upsert("u1", &record(30, 2)).await.unwrap();
        mirror.upsert("u1", &record(15, 1)).await.unwrap();
        assert_eq!(mirror.session("u1").unwrap().elapsed_seconds, Some(30));

        mirror.upsert("u1", &record(45, 3)).await.unwrap();
        assert_eq!(mirror.session("u1").unwrap().elapsed_seconds, Some(45));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let mirror = MemoryMirror::new();
        mirror.upsert("u1", &record(30, 1)).await.unwrap();
        mirror.delete("u1").await.unwrap();
        mirror.delete("u1").await.unwrap();
        assert_eq!(mirror.hydrate("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sessions_are_per_user() {
        let mirror = MemoryMirror::new();
        mirror.upsert("u1", &record(30, 1)).await.unwrap();
        assert_eq!(mirror.hydrate("u2").await.unwrap(), None);
    }
}
