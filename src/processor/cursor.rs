use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Tracks the number of processed entries per log in memory.
///
/// Shared by every poller through an `Arc`; each poller only writes its own
/// key, so a single lock around the map is enough.
#[derive(Debug, Default)]
pub struct CursorStore {
    cursors: RwLock<HashMap<Arc<str>, u64>>,
}

impl CursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last stored position for `log_id`, or 0 when nothing was stored yet.
    pub fn get(&self, log_id: &str) -> u64 {
        self.try_get(log_id).unwrap_or(0)
    }

    pub fn try_get(&self, log_id: &str) -> Option<u64> {
        let cursors = self.cursors.read().unwrap_or_else(PoisonError::into_inner);
        cursors.get(log_id).copied()
    }

    pub fn set(&self, log_id: &str, position: u64) {
        let mut cursors = self.cursors.write().unwrap_or_else(PoisonError::into_inner);
        match cursors.get_mut(log_id) {
            Some(current) => *current = position,
            None => {
                cursors.insert(Arc::from(log_id), position);
            }
        }
    }

    /// Sorted copy of every cursor.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let cursors = self.cursors.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries = cursors
            .iter()
            .map(|(id, position)| (id.to_string(), *position))
            .collect::<Vec<_>>();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.cursors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
