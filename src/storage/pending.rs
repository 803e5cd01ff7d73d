//! Coalescing buffer of writes accepted but not yet flushed.
//!
//! Each id maps to the latest pending value only. Values are shared as
//! `Arc`s so the flush can remove an entry by identity: a write that lands
//! while the flush is applying an older value keeps its slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::feature::StoreFeature;

/// A write waiting to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingValue {
    /// Encoded bytes and the single persisted feature tag.
    Data {
        bytes: Vec<u8>,
        feature: Option<StoreFeature>,
    },
    /// Tombstone: the id was cleared.
    Cleared,
}

/// Concurrent id → pending value map.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    entries: Mutex<HashMap<String, Arc<PendingValue>>>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<PendingValue>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, id: &str) -> Option<Arc<PendingValue>> {
        self.lock().get(id).cloned()
    }

    /// Install `value` unless an equal value is already pending.
    ///
    /// Returns true if the buffer changed and a flush is needed.
    pub fn put_if_changed(&self, id: &str, value: PendingValue) -> bool {
        let mut entries = self.lock();
        if entries.get(id).is_some_and(|current| **current == value) {
            return false;
        }
        entries.insert(id.to_string(), Arc::new(value));
        true
    }

    /// Remove the entry only if it is still the very value given.
    pub fn remove_if_same(&self, id: &str, value: &Arc<PendingValue>) -> bool {
        let mut entries = self.lock();
        match entries.get(id) {
            Some(current) if Arc::ptr_eq(current, value) => {
                entries.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Ids pending at this moment.
    pub fn ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(bytes: &[u8]) -> PendingValue {
        PendingValue::Data {
            bytes: bytes.to_vec(),
            feature: None,
        }
    }

    #[test]
    fn test_identical_put_is_noop() {
        let buffer = PendingBuffer::new();
        assert!(buffer.put_if_changed("k", data(b"v")));
        assert!(!buffer.put_if_changed("k", data(b"v")));
        assert!(buffer.put_if_changed("k", PendingValue::Cleared));
        assert!(!buffer.put_if_changed("k", PendingValue::Cleared));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_remove_is_by_identity() {
        let buffer = PendingBuffer::new();
        buffer.put_if_changed("k", data(b"v1"));
        let flushed = buffer.get("k").unwrap();

        // Overwritten mid-flush, then back to an equal value
        buffer.put_if_changed("k", data(b"v2"));
        buffer.put_if_changed("k", data(b"v1"));

        assert!(!buffer.remove_if_same("k", &flushed));
        assert_eq!(*buffer.get("k").unwrap(), data(b"v1"));

        let current = buffer.get("k").unwrap();
        assert!(buffer.remove_if_same("k", &current));
        assert!(buffer.is_empty());
    }
}
