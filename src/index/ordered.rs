use super::{
    resolve, IndexEntry, IndexError, IndexUpdate, PrimaryKeyIndex, RecordLocation, Resolution,
    UpdateContext,
};
use crate::primary_key::HashedPrimaryKey;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// B-tree backend guarded by a single reader/writer lock.
#[derive(Debug, Default)]
pub struct OrderedIndex {
    state: RwLock<OrderedState>,
}

#[derive(Debug, Default)]
struct OrderedState {
    entries: BTreeMap<HashedPrimaryKey, IndexEntry>,
    closed: bool,
}

impl OrderedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> Vec<HashedPrimaryKey> {
        self.state.read().entries.keys().cloned().collect()
    }
}

impl PrimaryKeyIndex for OrderedIndex {
    fn apply(
        &self,
        key: HashedPrimaryKey,
        proposed: IndexEntry,
        ctx: &UpdateContext<'_>,
    ) -> Result<IndexUpdate, IndexError> {
        let mut state = self.state.write();
        if state.closed {
            return Err(IndexError::Closed);
        }
        let resolution = resolve(state.entries.get(&key), proposed, ctx)?;
        let outcome = resolution.outcome();
        match resolution {
            Resolution::Insert(entry) | Resolution::Supersede(entry) => {
                let displaced = state.entries.insert(key, entry);
                Ok(IndexUpdate::applied(outcome, displaced))
            }
            Resolution::Reject => Ok(IndexUpdate::rejected()),
        }
    }

    fn restore(
        &self,
        key: &HashedPrimaryKey,
        written: &RecordLocation,
        previous: Option<IndexEntry>,
    ) -> bool {
        let mut state = self.state.write();
        if !state
            .entries
            .get(key)
            .is_some_and(|entry| entry.location == *written)
        {
            return false;
        }
        match previous {
            Some(entry) => state.entries.insert(key.clone(), entry),
            None => state.entries.remove(key),
        };
        true
    }

    fn remove(&self, key: &HashedPrimaryKey, expected: &RecordLocation) -> bool {
        let mut state = self.state.write();
        match state.entries.get(key) {
            Some(entry) if entry.location == *expected => {
                state.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    fn remove_expired_before(&self, threshold: f64) -> usize {
        let mut state = self.state.write();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.time >= threshold);
        before - state.entries.len()
    }

    fn get(&self, key: &HashedPrimaryKey) -> Option<IndexEntry> {
        self.state.read().entries.get(key).cloned()
    }

    fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    fn close(&self) -> Result<(), IndexError> {
        self.state.write().closed = true;
        Ok(())
    }
}
