use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

// ==============================================================================
// Id Sequences
// ==============================================================================
//
// Both sequences are explicitly owned and shared by cloning: every clone
// increments the same atomic, so sessions that share a sequence observe one
// monotonic order without any process-global state.

/// JSON-RPC request ids. Used only for node-side correlation; responses are
/// never demultiplexed by id since a session has one request in flight.
#[derive(Debug, Clone, Default)]
pub struct RequestIds(Arc<AtomicU64>);

impl RequestIds {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(first: u64) -> Self {
        Self(Arc::new(AtomicU64::new(first)))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Per-call transaction ids, seeded from wall-clock time so ids from
/// successive processes do not collide.
#[derive(Debug, Clone)]
pub struct TransactionIds(Arc<AtomicU64>);

impl TransactionIds {
    pub fn from_clock() -> Self {
        Self::starting_at(initial_transaction_id())
    }

    pub fn starting_at(first: u64) -> Self {
        Self(Arc::new(AtomicU64::new(first)))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for TransactionIds {
    fn default() -> Self {
        Self::from_clock()
    }
}

fn initial_transaction_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(1)
}
