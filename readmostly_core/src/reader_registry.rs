use crate::reader::ReaderRecord;
use crate::telemetry::REGISTERED_READERS;
use crate::types::{ReaderId, ThreadToken};
use dashmap::DashMap;
use metrics::gauge;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Every reader record ever registered with one lock.
///
/// Membership is weak: the owning [`crate::ReaderHandle`] holds the only
/// strong reference, so a record whose handle is gone (its thread died or
/// dropped it) can no longer change and is safe to remove. Iteration runs
/// concurrently with registration; each shard is locked only while it is
/// being walked.
#[derive(Debug)]
pub struct ReaderRegistry {
    records: DashMap<ReaderId, Weak<ReaderRecord>>,
    next_id: AtomicU64,
}

/// Outcome of a wake scan in `write_unlock`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub woken: usize,
    pub collected: usize,
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(1), // Start from 1, reserve 0 for invalid
        }
    }

    /// Register a record and return its id
    pub fn register(&self, record: &Arc<ReaderRecord>) -> ReaderId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.records.insert(id, Arc::downgrade(record));
        gauge!(REGISTERED_READERS).set(self.records.len() as f64);
        id
    }

    /// Remove a record; false if it was already gone
    pub fn deregister(&self, id: ReaderId) -> bool {
        let removed = self.records.remove(&id).is_some();
        if removed {
            gauge!(REGISTERED_READERS).set(self.records.len() as f64);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: ReaderId) -> bool {
        self.records.contains_key(&id)
    }

    /// True when no live record has `read_requested` set.
    pub fn all_idle(&self) -> bool {
        self.records.iter().all(|entry| match entry.value().upgrade() {
            Some(record) => !record.is_read_requested(),
            None => true,
        })
    }

    /// Live record owned by `owner`, if any. There is at most one: the lock
    /// hands out the existing record when its owner registers again.
    pub fn find_by_owner(&self, owner: ThreadToken) -> Option<(ReaderId, Arc<ReaderRecord>)> {
        self.records
            .iter()
            .filter_map(|entry| entry.value().upgrade().map(|record| (*entry.key(), record)))
            .find(|(_, record)| record.owner() == owner)
    }

    /// Unpark every blocked reader; when `collect` is set, also drop the
    /// entries of readers whose handle is gone.
    pub fn wake_blocked(&self, collect: bool) -> ScanReport {
        let mut report = ScanReport::default();
        let mut dead = Vec::new();
        for entry in self.records.iter() {
            match entry.value().upgrade() {
                Some(record) => {
                    if record.is_blocked() {
                        record.thread().unpark();
                        report.woken += 1;
                    }
                }
                None if collect => dead.push(*entry.key()),
                None => {}
            }
        }
        report.collected = self.remove_dead(dead);
        report
    }

    /// Drop the entries of every reader whose handle is gone.
    pub fn collect_dead(&self) -> usize {
        let dead: Vec<ReaderId> = self
            .records
            .iter()
            .filter(|entry| entry.value().strong_count() == 0)
            .map(|entry| *entry.key())
            .collect();
        self.remove_dead(dead)
    }

    fn remove_dead(&self, ids: Vec<ReaderId>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        // A weak reference at zero strong count can never be upgraded again,
        // so the check inside remove_if is final.
        let removed = ids
            .into_iter()
            .filter(|id| {
                self.records
                    .remove_if(id, |_, weak| weak.strong_count() == 0)
                    .is_some()
            })
            .count();
        gauge!(REGISTERED_READERS).set(self.records.len() as f64);
        removed
    }
}
