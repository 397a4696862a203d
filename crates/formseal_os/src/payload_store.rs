#![forbid(unsafe_code)]

//! Decrypted payloads held inside the processor between `decrypt` and the
//! call that consumes them. Every exit path zeroes the values.

use std::collections::BTreeMap;

use formseal_contracts::form_payload::DecryptedFormPayload;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("retained payload limit {capacity} reached")]
pub struct StoreFull {
    pub capacity: usize,
}

#[derive(Debug)]
pub struct PayloadStore {
    capacity: usize,
    entries: BTreeMap<String, DecryptedFormPayload>,
}

impl PayloadStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_room(&self) -> bool {
        self.entries.len() < self.capacity
    }

    /// Retains the payload under a fresh opaque handle. A full store wipes
    /// the rejected payload before returning.
    pub fn insert(&mut self, mut payload: DecryptedFormPayload) -> Result<String, StoreFull> {
        if !self.has_room() {
            payload.wipe();
            return Err(StoreFull {
                capacity: self.capacity,
            });
        }
        let handle = Uuid::new_v4().to_string();
        self.entries.insert(handle.clone(), payload);
        Ok(handle)
    }

    /// Hands the payload to its single consumer; the handle is gone afterwards.
    pub fn take(&mut self, handle: &str) -> Option<DecryptedFormPayload> {
        self.entries.remove(handle)
    }

    pub fn wipe(&mut self, handle: &str) -> bool {
        match self.entries.remove(handle) {
            Some(mut payload) => {
                payload.wipe();
                true
            }
            None => false,
        }
    }

    pub fn wipe_all(&mut self) -> usize {
        let count = self.entries.len();
        for payload in self.entries.values_mut() {
            payload.wipe();
        }
        self.entries.clear();
        count
    }
}

impl Drop for PayloadStore {
    fn drop(&mut self) {
        self.wipe_all();
    }
}
