//! # Upload Queue
//!
//! Scheduling policy for pending progress uploads. Holds no I/O and no
//! clock: callers pass the current [`Instant`], so every rule here is
//! testable with fixed instants.
//!
//! ## Rules
//!
//! - An item is due `debounce` after its last change, but never later than
//!   `max_delay` after its first unflushed change.
//! - A failed upload is retried after `base × 2^(failures-1)`.
//! - The `max_failures`th consecutive failure removes the item.
//! - A new change resets the retry count.
//! - An item claimed for upload is not handed out again until it completes
//!   or fails. A change while in flight re-queues it afterwards.

use crate::config::SyncConfig;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    session_id: Option<String>,
    first_change: Instant,
    last_change: Instant,
    retries: u32,
    retry_at: Option<Instant>,
    /// Bumped on every change; lets a finished upload tell whether it was
    /// overtaken.
    generation: u64,
    in_flight: bool,
}

impl Entry {
    fn due_at(&self, debounce: Duration, max_delay: Duration) -> Instant {
        match self.retry_at {
            Some(at) => at,
            None => (self.last_change + debounce).min(self.first_change + max_delay),
        }
    }
}

/// An item handed out for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub item_id: String,
    pub session_id: Option<String>,
    pub generation: u64,
}

/// What happens after a failed upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Scheduled again after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Removed from the queue after `failures` consecutive failures.
    Exhausted { failures: u32 },
    /// The item changed while uploading; it stays queued with a fresh count.
    Superseded,
}

/// Pending uploads keyed by item id.
#[derive(Debug)]
pub struct SyncQueue {
    entries: HashMap<String, Entry>,
    debounce: Duration,
    max_delay: Duration,
    retry_base: Duration,
    max_failures: u32,
}

impl SyncQueue {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            entries: HashMap::new(),
            debounce: config.debounce,
            max_delay: config.max_delay,
            retry_base: config.retry_base_delay,
            max_failures: config.max_failures,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.entries.contains_key(item_id)
    }

    /// Record a change. Returns `true` when the item was not queued before.
    ///
    /// A `None` session keeps the session id of an earlier change.
    pub fn enqueue(&mut self, item_id: &str, session_id: Option<String>, now: Instant) -> bool {
        match self.entries.get_mut(item_id) {
            Some(entry) => {
                entry.last_change = now;
                entry.retries = 0;
                entry.retry_at = None;
                entry.generation += 1;
                if session_id.is_some() {
                    entry.session_id = session_id;
                }
                false
            }
            None => {
                self.entries.insert(
                    item_id.to_string(),
                    Entry {
                        session_id,
                        first_change: now,
                        last_change: now,
                        retries: 0,
                        retry_at: None,
                        generation: 0,
                        in_flight: false,
                    },
                );
                true
            }
        }
    }

    /// Queue an item found unsynced in the store, leaving queued items alone.
    pub fn enqueue_if_absent(&mut self, item_id: &str, now: Instant) -> bool {
        if self.contains(item_id) {
            return false;
        }
        self.enqueue(item_id, None, now)
    }

    /// Items due at `now`, earliest first.
    ///
    /// `force` ignores debounce and backoff. `skip` names an item held back
    /// unless forced.
    pub fn ready(&self, now: Instant, force: bool, skip: Option<&str>) -> Vec<String> {
        let mut due: Vec<(Instant, &String)> = self
            .entries
            .iter()
            .filter(|(id, entry)| !entry.in_flight && (force || Some(id.as_str()) != skip))
            .map(|(id, entry)| (entry.due_at(self.debounce, self.max_delay), id))
            .filter(|(at, _)| force || *at <= now)
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id.clone()).collect()
    }

    /// Earliest instant at which some idle, non-skipped item becomes due.
    pub fn next_deadline(&self, skip: Option<&str>) -> Option<Instant> {
        self.entries
            .iter()
            .filter(|(id, entry)| !entry.in_flight && Some(id.as_str()) != skip)
            .map(|(_, entry)| entry.due_at(self.debounce, self.max_delay))
            .min()
    }

    /// Mark an item in flight and hand out what the uploader needs.
    pub fn claim(&mut self, item_id: &str) -> Option<Claim> {
        let entry = self.entries.get_mut(item_id)?;
        if entry.in_flight {
            return None;
        }
        entry.in_flight = true;
        Some(Claim {
            item_id: item_id.to_string(),
            session_id: entry.session_id.clone(),
            generation: entry.generation,
        })
    }

    /// Finish a successful upload.
    ///
    /// Returns `false` when the item changed during the upload and stays
    /// queued.
    pub fn complete(&mut self, claim: &Claim) -> bool {
        match self.entries.get_mut(&claim.item_id) {
            Some(entry) if entry.generation != claim.generation => {
                entry.in_flight = false;
                false
            }
            Some(_) => {
                self.entries.remove(&claim.item_id);
                true
            }
            None => true,
        }
    }

    /// Drop an item regardless of state.
    pub fn remove(&mut self, item_id: &str) -> bool {
        self.entries.remove(item_id).is_some()
    }

    /// Record a failed upload and schedule the retry.
    pub fn record_failure(&mut self, claim: &Claim, now: Instant) -> FailureOutcome {
        let Some(entry) = self.entries.get_mut(&claim.item_id) else {
            return FailureOutcome::Superseded;
        };
        entry.in_flight = false;

        if entry.generation != claim.generation {
            return FailureOutcome::Superseded;
        }

        entry.retries += 1;
        if entry.retries >= self.max_failures {
            let failures = entry.retries;
            self.entries.remove(&claim.item_id);
            return FailureOutcome::Exhausted { failures };
        }

        let delay = backoff(self.retry_base, entry.retries);
        entry.retry_at = Some(now + delay);
        FailureOutcome::Retry {
            attempt: entry.retries,
            delay,
        }
    }
}

/// `base × 2^(retries-1)`, saturating.
pub fn backoff(base: Duration, retries: u32) -> Duration {
    let factor = 2u32.saturating_pow(retries.saturating_sub(1));
    base.saturating_mul(factor)
}
