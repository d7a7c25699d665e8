use super::sensor::{SensorId, WorldId};
use crate::error_handling::types::ReactorError;
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::thread::JoinHandle;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorEntry {
    pub world: WorldId,
    pub name: String,
}

/// Process-wide map of sensor id to owning world. Reads and writes both take the lock.
#[derive(Debug)]
pub struct SensorRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<SensorId, SensorEntry>>,
}

impl SensorRegistry {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn global() -> &'static SensorRegistry {
        static REGISTRY: OnceLock<SensorRegistry> = OnceLock::new();
        REGISTRY.get_or_init(SensorRegistry::new)
    }

    /// Fresh id, never [`SensorId::WORLD`].
    pub fn allocate(&self) -> SensorId {
        SensorId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn insert(&self, id: SensorId, world: WorldId, name: &str) {
        lock(&self.entries).insert(
            id,
            SensorEntry {
                world,
                name: name.to_string(),
            },
        );
    }

    pub fn remove(&self, id: SensorId) -> Option<SensorEntry> {
        lock(&self.entries).remove(&id)
    }

    pub fn lookup(&self, id: SensorId) -> Option<SensorEntry> {
        lock(&self.entries).get(&id).cloned()
    }

    pub fn world_of(&self, id: SensorId) -> Option<WorldId> {
        lock(&self.entries).get(&id).map(|e| e.world)
    }

    pub fn count_in(&self, world: WorldId) -> usize {
        lock(&self.entries)
            .values()
            .filter(|e| e.world == world)
            .count()
    }
}

struct WorldEntry {
    name: String,
    thread: JoinHandle<i32>,
}

/// Threads of the spawned worlds, kept so they can be joined once they stop.
#[derive(Default)]
pub struct WorldDirectory {
    entries: Mutex<HashMap<WorldId, WorldEntry>>,
}

impl WorldDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: WorldId, name: String, thread: JoinHandle<i32>) {
        lock(&self.entries).insert(id, WorldEntry { name, thread });
    }

    pub fn contains(&self, id: WorldId) -> bool {
        lock(&self.entries).contains_key(&id)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.entries).values().map(|e| e.name.clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Joins a stopped world and forgets it. Returns its exit code, `None` if unknown.
    pub fn join(&self, id: WorldId) -> Result<Option<i32>, ReactorError> {
        let entry = lock(&self.entries).remove(&id);
        let Some(entry) = entry else {
            return Ok(None);
        };
        debug!("[reactor] Joining world {}", entry.name);
        entry
            .thread
            .join()
            .map(Some)
            .map_err(|_| ReactorError::JoinFailed(entry.name))
    }

    pub fn join_all(&self) -> Vec<(String, Result<i32, ReactorError>)> {
        let entries: Vec<WorldEntry> = lock(&self.entries).drain().map(|(_, e)| e).collect();
        entries
            .into_iter()
            .map(|entry| {
                let name = entry.name;
                let result = entry
                    .thread
                    .join()
                    .map_err(|_| ReactorError::JoinFailed(name.clone()));
                (name, result)
            })
            .collect()
    }
}
