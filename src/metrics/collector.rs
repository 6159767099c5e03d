use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the authenticated request pipeline
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Requests handed to the pipeline
    requests: AtomicU64,

    /// First attempts rejected with 401
    auth_failures: AtomicU64,

    /// Identity service refresh calls issued
    refreshes_started: AtomicU64,
    refreshes_succeeded: AtomicU64,
    refreshes_failed: AtomicU64,

    /// Requests re-issued after recovery
    replays: AtomicU64,

    /// Recoveries that found the session already rotated and skipped the refresh
    direct_replays: AtomicU64,

    /// Session-ended notifications emitted
    sessions_ended: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub auth_failures: u64,
    pub refreshes_started: u64,
    pub refreshes_succeeded: u64,
    pub refreshes_failed: u64,
    pub replays: u64,
    pub direct_replays: u64,
    pub sessions_ended: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_started(&self) {
        self.refreshes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_end(&self, success: bool) {
        let counter = if success {
            &self.refreshes_succeeded
        } else {
            &self.refreshes_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_direct_replay(&self) {
        self.direct_replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_ended(&self) {
        self.sessions_ended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            refreshes_started: self.refreshes_started.load(Ordering::Relaxed),
            refreshes_succeeded: self.refreshes_succeeded.load(Ordering::Relaxed),
            refreshes_failed: self.refreshes_failed.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            direct_replays: self.direct_replays.load(Ordering::Relaxed),
            sessions_ended: self.sessions_ended.load(Ordering::Relaxed),
        }
    }
}
