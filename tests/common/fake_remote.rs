//! Scriptable remote entity API
//!
//! Keeps entities in memory, applies updates like the real proxy, and can be told
//! to fail, hang or slow down so tests can drive every sync path.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use garage_sync::client::RemoteEntityApi;
use garage_sync::shared::{FieldMap, Result, SyncError};

/// An update the fake remote accepted
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUpdate {
    pub entity_type: String,
    pub entity_id: String,
    pub changes: FieldMap,
}

#[derive(Default)]
pub struct FakeRemote {
    entities: Mutex<HashMap<(String, String), FieldMap>>,
    failures: Mutex<VecDeque<SyncError>>,
    updates: Mutex<Vec<RecordedUpdate>>,
    hanging: AtomicBool,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_entity(&self, entity_type: &str, entity_id: &str, fields: FieldMap) {
        self.entities
            .lock()
            .unwrap()
            .insert((entity_type.to_string(), entity_id.to_string()), fields);
    }

    pub fn entity(&self, entity_type: &str, entity_id: &str) -> FieldMap {
        self.entities
            .lock()
            .unwrap()
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// The next call, read or write, fails with `error`
    pub fn fail_next(&self, error: SyncError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// Calls never answer until this is turned off
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    /// Every call takes `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn updates(&self) -> Vec<RecordedUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were waiting on the remote at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteEntityApi for FakeRemote {
    async fn get_entity(&self, entity_type: &str, entity_id: &str) -> Result<FieldMap> {
        self.enter().await?;
        Ok(self.entity(entity_type, entity_id))
    }

    async fn update_entity(&self, entity_type: &str, entity_id: &str, changes: &FieldMap) -> Result<FieldMap> {
        self.enter().await?;
        self.updates.lock().unwrap().push(RecordedUpdate {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            changes: changes.clone(),
        });

        let mut entities = self.entities.lock().unwrap();
        let entity = entities
            .entry((entity_type.to_string(), entity_id.to_string()))
            .or_default();
        entity.extend(changes.clone());
        Ok(entity.clone())
    }
}
