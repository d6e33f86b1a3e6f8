//! Session counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of session statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames read from the link
    pub frames_received: u64,
    /// Frames written to the link
    pub frames_sent: u64,
    /// Event callback invocations
    pub events_delivered: u64,
    /// Inbound frames that failed to decode
    pub decode_errors: u64,
    /// Pending acks resolved by a reply
    pub acks_resolved: u64,
    /// Pending acks that expired
    pub acks_timed_out: u64,
    /// Pending acks cancelled at teardown or rolled back
    pub acks_cancelled: u64,
    /// Successful reconnections after a lost or failed link
    pub reconnects: u64,
}

/// Live counters shared by the session components
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub frames_received: AtomicU64,
    pub frames_sent: AtomicU64,
    pub events_delivered: AtomicU64,
    pub decode_errors: AtomicU64,
    pub acks_resolved: AtomicU64,
    pub acks_timed_out: AtomicU64,
    pub acks_cancelled: AtomicU64,
    pub reconnects: AtomicU64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            acks_resolved: self.acks_resolved.load(Ordering::Relaxed),
            acks_timed_out: self.acks_timed_out.load(Ordering::Relaxed),
            acks_cancelled: self.acks_cancelled.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
