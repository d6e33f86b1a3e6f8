//! Pending ack table.
//!
//! Each emit that asks for an ack registers a one-shot handler under a fresh
//! message id. The handler is removed from the table before it runs, so
//! whichever of resolve, sweep, cancel or rollback removes it first is the
//! only one that invokes it.

use crate::error::{AckResult, SessionError};
use crate::stats::Counters;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sio_wire::Payload;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Shortest period the background sweeper runs at
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// One-shot ack handler
pub type AckHandler = Box<dyn FnOnce(AckResult) + Send + Sync>;

struct PendingAck {
    handler: AckHandler,
    deadline: Instant,
}

/// Entries plus the number of claimed slots; a slot is claimed before its
/// entry is inserted and released when the entry is removed
#[derive(Default)]
struct AckTable {
    entries: DashMap<i32, PendingAck>,
    slots: AtomicUsize,
}

impl AckTable {
    fn claim_slot(&self, capacity: usize) -> bool {
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < capacity).then_some(used + 1)
            })
            .is_ok()
    }

    fn release_slot(&self) {
        self.slots.fetch_sub(1, Ordering::AcqRel);
    }

    fn take(&self, msg_id: i32) -> Option<PendingAck> {
        let (_, pending) = self.entries.remove(&msg_id)?;
        self.release_slot();
        Some(pending)
    }

    fn take_expired(&self, msg_id: i32, now: Instant) -> Option<PendingAck> {
        let (_, pending) = self
            .entries
            .remove_if(&msg_id, |_, ack| ack.deadline <= now)?;
        self.release_slot();
        Some(pending)
    }
}

/// Correlates outbound message ids with their ack handlers
pub struct AckTracker {
    table: Arc<AckTable>,
    next_id: AtomicI32,
    capacity: usize,
    counters: Arc<Counters>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl AckTracker {
    /// Create a tracker holding at most `capacity` pending acks
    pub fn new(capacity: usize) -> Self {
        Self::with_counters(capacity, Arc::new(Counters::default()))
    }

    pub(crate) fn with_counters(capacity: usize, counters: Arc<Counters>) -> Self {
        Self {
            table: Arc::new(AckTable::default()),
            next_id: AtomicI32::new(0),
            capacity: capacity.max(1),
            counters,
            sweeper: Mutex::new(None),
        }
    }

    /// Register a handler and return its message id.
    ///
    /// When the table is full the handler is invoked with `AckCapacity` and
    /// the same error is returned.
    pub fn register(&self, handler: AckHandler, timeout: Duration) -> Result<i32, SessionError> {
        if !self.table.claim_slot(self.capacity) {
            warn!("Ack table full ({} pending)", self.capacity);
            handler(Err(SessionError::AckCapacity(self.capacity)));
            return Err(SessionError::AckCapacity(self.capacity));
        }

        let deadline = Instant::now() + timeout;
        let mut handler = Some(handler);

        // At most `capacity` ids are taken, so a free one turns up quickly
        loop {
            let id = self.allocate_id();
            if let Entry::Vacant(slot) = self.table.entries.entry(id) {
                if let Some(handler) = handler.take() {
                    slot.insert(PendingAck { handler, deadline });
                }
                debug!("Registered ack {} (timeout {:?})", id, timeout);
                return Ok(id);
            }
            debug!("Ack id {} still pending, skipping", id);
        }
    }

    fn allocate_id(&self) -> i32 {
        // Non-negative ids only; wraps back to zero
        self.next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                Some(if id == i32::MAX { 0 } else { id + 1 })
            })
            .unwrap_or(0)
    }

    /// Hand an inbound ack payload to its handler
    pub fn resolve(&self, msg_id: i32, payload: Payload) -> bool {
        match self.table.take(msg_id) {
            Some(pending) => {
                Counters::incr(&self.counters.acks_resolved);
                debug!("Resolved ack {}", msg_id);
                (pending.handler)(Ok(payload));
                true
            }
            None => {
                debug!("Discarding ack for unknown or expired id {}", msg_id);
                false
            }
        }
    }

    /// Time out every entry whose deadline is at or before `now`
    pub fn sweep(&self, now: Instant) -> usize {
        sweep_expired(&self.table, &self.counters, now)
    }

    /// Cancel every pending entry
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<i32> = self.table.entries.iter().map(|entry| *entry.key()).collect();

        let mut cancelled = 0;
        for id in ids {
            if let Some(pending) = self.table.take(id) {
                Counters::incr(&self.counters.acks_cancelled);
                (pending.handler)(Err(SessionError::Cancelled));
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            debug!("Cancelled {} pending acks", cancelled);
        }
        cancelled
    }

    /// Remove one entry and fail it with `error` (emit rollback)
    pub(crate) fn abort(&self, msg_id: i32, error: SessionError) -> bool {
        match self.table.take(msg_id) {
            Some(pending) => {
                Counters::incr(&self.counters.acks_cancelled);
                (pending.handler)(Err(error));
                true
            }
            None => false,
        }
    }

    /// Number of pending acks
    pub fn pending_count(&self) -> usize {
        self.table.entries.len()
    }

    /// Whether `msg_id` is still waiting for its ack
    pub fn is_pending(&self, msg_id: i32) -> bool {
        self.table.entries.contains_key(&msg_id)
    }

    /// Start the background sweeper (no-op when already running). `every` is
    /// raised to [`MIN_SWEEP_INTERVAL`].
    pub fn start_sweeper(&self, every: Duration) {
        let Ok(mut guard) = self.sweeper.lock() else {
            return;
        };
        if guard.is_some() {
            return;
        }

        let every = every.max(MIN_SWEEP_INTERVAL);
        let table = Arc::clone(&self.table);
        let counters = Arc::clone(&self.counters);

        *guard = Some(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                sweep_expired(&table, &counters, Instant::now());
            }
        }));
    }

    #[cfg(test)]
    pub(crate) fn sweeper_running(&self) -> bool {
        self.sweeper.lock().unwrap().is_some()
    }

    /// Stop the background sweeper
    pub fn stop_sweeper(&self) {
        if let Ok(mut guard) = self.sweeper.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

fn sweep_expired(table: &AckTable, counters: &Counters, now: Instant) -> usize {
    let expired: Vec<i32> = table
        .entries
        .iter()
        .filter(|entry| entry.value().deadline <= now)
        .map(|entry| *entry.key())
        .collect();

    let mut timed_out = 0;
    for id in expired {
        if let Some(ack) = table.take_expired(id, now) {
            Counters::incr(&counters.acks_timed_out);
            debug!("Ack {} timed out", id);
            (ack.handler)(Err(SessionError::Timeout));
            timed_out += 1;
        }
    }
    timed_out
}

impl fmt::Debug for AckTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckTracker")
            .field("pending", &self.table.entries.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Drop for AckTracker {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}
