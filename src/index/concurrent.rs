use super::{
    resolve, IndexEntry, IndexError, IndexOutcome, IndexUpdate, PrimaryKeyIndex, RecordLocation,
    Resolution, UpdateContext,
};
use crate::primary_key::HashedPrimaryKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Sharded concurrent hash map; updates to one key serialize on its shard lock.
#[derive(Debug, Default)]
pub struct ConcurrentMapIndex {
    map: DashMap<HashedPrimaryKey, IndexEntry>,
    closed: AtomicBool,
}

impl ConcurrentMapIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PrimaryKeyIndex for ConcurrentMapIndex {
    fn apply(
        &self,
        key: HashedPrimaryKey,
        proposed: IndexEntry,
        ctx: &UpdateContext<'_>,
    ) -> Result<IndexUpdate, IndexError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IndexError::Closed);
        }
        match self.map.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(proposed);
                Ok(IndexUpdate::applied(IndexOutcome::Inserted, None))
            }
            Entry::Occupied(mut slot) => {
                let resolution = resolve(Some(slot.get()), proposed, ctx)?;
                let outcome = resolution.outcome();
                match resolution {
                    Resolution::Insert(entry) | Resolution::Supersede(entry) => {
                        let displaced = slot.insert(entry);
                        Ok(IndexUpdate::applied(outcome, Some(displaced)))
                    }
                    Resolution::Reject => Ok(IndexUpdate::rejected()),
                }
            }
        }
    }

    fn restore(
        &self,
        key: &HashedPrimaryKey,
        written: &RecordLocation,
        previous: Option<IndexEntry>,
    ) -> bool {
        match self.map.entry(key.clone()) {
            Entry::Occupied(mut slot) if slot.get().location == *written => {
                match previous {
                    Some(entry) => {
                        slot.insert(entry);
                    }
                    None => {
                        slot.remove();
                    }
                }
                true
            }
            _ => false,
        }
    }

    fn remove(&self, key: &HashedPrimaryKey, expected: &RecordLocation) -> bool {
        self.map
            .remove_if(key, |_, entry| entry.location == *expected)
            .is_some()
    }

    fn remove_expired_before(&self, threshold: f64) -> usize {
        let mut removed = 0;
        self.map.retain(|_, entry| {
            let keep = entry.time >= threshold;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    fn get(&self, key: &HashedPrimaryKey) -> Option<IndexEntry> {
        self.map.get(key).map(|entry| entry.value().clone())
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn close(&self) -> Result<(), IndexError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
