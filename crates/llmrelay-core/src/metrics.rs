use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use serde::Serialize;

use crate::relay::RelayResult;

/// Process-wide relay counters shared by every session.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    active: AtomicU64,
    completed: AtomicU64,
    aborted: AtomicU64,
    bytes_forwarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub active_sessions: u64,
    pub completed_sessions: u64,
    pub aborted_sessions: u64,
    pub bytes_forwarded: u64,
}

impl RelayMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark a session active until the returned guard is dropped.
    pub fn begin_session(self: &Arc<Self>) -> SessionGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        SessionGuard {
            metrics: Arc::clone(self),
        }
    }

    pub fn record(&self, result: &RelayResult) {
        match result {
            RelayResult::Completed { total_bytes, .. } => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                self.bytes_forwarded.fetch_add(*total_bytes, Ordering::Relaxed);
            }
            RelayResult::Aborted { bytes_forwarded, .. } => {
                self.aborted.fetch_add(1, Ordering::Relaxed);
                self.bytes_forwarded.fetch_add(*bytes_forwarded, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_sessions: self.active.load(Ordering::Relaxed),
            completed_sessions: self.completed.load(Ordering::Relaxed),
            aborted_sessions: self.aborted.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the active-session count on drop, including when the relay
/// future is cancelled mid-flight.
#[derive(Debug)]
pub struct SessionGuard {
    metrics: Arc<RelayMetrics>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.metrics.active.fetch_sub(1, Ordering::Relaxed);
    }
}
