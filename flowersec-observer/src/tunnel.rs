use std::time::Duration;

/// Outcome of an `Attach` attempt (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachResult {
    Ok,
    Rejected,
}

/// Outcome of a role-slot replace attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceResult {
    Replaced,
    RateLimited,
}

/// Every observable transition in the tunnel pairing server's lifecycle
/// (spec.md §4.3 "Metrics").
pub trait TunnelObserver: Send + Sync {
    /// Live WebSocket connection count changed.
    fn conn_count(&self, _count: u64) {}

    /// Live paired-channel count changed.
    fn channel_count(&self, _count: u64) {}

    /// An `Attach` flight completed, successfully or not.
    fn attach(&self, _result: AttachResult, _reason: &str) {}

    /// A role slot replace was attempted.
    fn replace(&self, _result: ReplaceResult) {}

    /// A channel closed, with its stable close-reason token.
    fn close(&self, _reason: &str) {}

    /// Time from first endpoint's attach to the channel becoming paired.
    fn pair_latency(&self, _latency: Duration) {}

    /// One encrypted record was relayed.
    fn encrypted(&self) {}
}

/// Default observer: every hook is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTunnelObserver;

impl TunnelObserver for NoopTunnelObserver {}
