//! Per-channel pairing state: role slots, pre-pair buffering, and the
//! bounded outbound write queue each paired endpoint drains into.
//!
//! Grounded in `sandbox_fc::network::pool::NetnsPool`'s pooled-resource
//! shape (a table of named resources behind one coarse mutex, each entry
//! independently acquired/released) and `vsock_host::VsockHost`'s
//! read-dispatch-cache loop, which buffers unsolicited events until the
//! caller that wants them arrives, then drains the cache before resuming
//! live dispatch — the same "buffer until the peer shows up, then drain in
//! order" shape this module uses for pre-pair frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use flowersec_token::Role;
use tokio::sync::mpsc;

use crate::error::{TunnelError, TunnelResult};

/// Outbound write-queue capacity, in messages. Byte volume is bounded
/// separately by `max_write_queue_bytes` via [`OutboundQueue`].
const OUTBOUND_QUEUE_MESSAGES: usize = 1024;

/// Minimum spacing between same-instance slot replacements (spec.md §4.3
/// "replace_rate_limited"). A fixed interval rather than a full token
/// bucket: replaces are a reconnect-storm guard, not a steady-rate budget.
const MIN_REPLACE_INTERVAL_MS: i64 = 1_000;

fn other_role(role: Role) -> Role {
    match role {
        Role::Client => Role::Server,
        Role::Server => Role::Client,
    }
}

/// A message handed to a connection's write task.
pub enum RelayMsg {
    Data(Vec<u8>),
    Close(&'static str),
}

/// The sending half of a connection's outbound write queue, with its own
/// byte-volume accounting so `max_write_queue_bytes` can be enforced without
/// the write task needing to inspect the channel's internal buffer.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<RelayMsg>,
    queued_bytes: std::sync::Arc<AtomicUsize>,
    max_write_queue_bytes: usize,
}

impl OutboundQueue {
    pub fn new(max_write_queue_bytes: usize) -> (Self, mpsc::Receiver<RelayMsg>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_MESSAGES);
        (Self { tx, queued_bytes: std::sync::Arc::new(AtomicUsize::new(0)), max_write_queue_bytes }, rx)
    }

    /// The write task calls this once a queued frame has actually been
    /// written (or dropped), freeing its share of `max_write_queue_bytes`.
    pub fn release(&self, len: usize) {
        self.queued_bytes.fetch_sub(len, Ordering::Relaxed);
    }

    pub fn enqueue_data(&self, frame: Vec<u8>) -> TunnelResult<()> {
        let len = frame.len();
        let reserved = self.queued_bytes.fetch_add(len, Ordering::Relaxed) + len;
        if reserved > self.max_write_queue_bytes {
            self.queued_bytes.fetch_sub(len, Ordering::Relaxed);
            return Err(TunnelError::WriteError("write queue full".into()));
        }
        self.tx.try_send(RelayMsg::Data(frame)).map_err(|_| {
            self.queued_bytes.fetch_sub(len, Ordering::Relaxed);
            TunnelError::WriteError("write queue full".into())
        })
    }

    pub fn enqueue_close(&self, reason: &'static str) {
        let _ = self.tx.try_send(RelayMsg::Close(reason));
    }
}

struct RoleSlot {
    instance_id: Vec<u8>,
    outbound: OutboundQueue,
}

#[derive(Default)]
struct PendingBuffers {
    to_client: VecDeque<Vec<u8>>,
    to_server: VecDeque<Vec<u8>>,
    bytes: usize,
}

impl PendingBuffers {
    fn queue_for_dest(&mut self, dest: Role) -> &mut VecDeque<Vec<u8>> {
        match dest {
            Role::Client => &mut self.to_client,
            Role::Server => &mut self.to_server,
        }
    }
}

/// Outcome of [`Channel::attach`].
pub struct AttachOutcome {
    /// `true` once both role slots are occupied after this attach.
    pub paired: bool,
    /// Frames that were buffered for this role before it attached, in
    /// arrival order, to be pushed onto its outbound queue immediately.
    pub drained: Vec<Vec<u8>>,
    /// Set when this attach replaced a same-instance connection already
    /// occupying the slot; the caller must close that old connection.
    pub replaced_old: Option<OutboundQueue>,
    /// Time from the channel's first attach to pairing, set only on the
    /// attach call that completes pairing.
    pub pair_latency_ms: Option<i64>,
}

/// Where a relayed frame should go.
pub enum Routed {
    ToPeer(OutboundQueue),
    Buffered,
}

/// One paired (or pairing) channel.
pub struct Channel {
    pub channel_id: String,
    pub init_exp: i64,
    pub idle_timeout_seconds: u64,
    client: Mutex<Option<RoleSlot>>,
    server: Mutex<Option<RoleSlot>>,
    pending: Mutex<PendingBuffers>,
    last_replace_ms: Mutex<i64>,
    /// Unix millis of the last frame relayed or slot attached, for the idle
    /// watchdog sweep.
    pub last_activity_ms: AtomicI64,
    /// Set once both roles have attached, for `pair_latency` reporting.
    paired_at_ms: Mutex<Option<i64>>,
    /// Timestamp of this channel's very first attach, for `pair_latency`.
    first_attach_ms: Mutex<Option<i64>>,
}

impl Channel {
    pub fn new(channel_id: String, init_exp: i64, idle_timeout_seconds: u64, now_ms: i64) -> Self {
        Self {
            channel_id,
            init_exp,
            idle_timeout_seconds,
            client: Mutex::new(None),
            server: Mutex::new(None),
            pending: Mutex::new(PendingBuffers::default()),
            last_replace_ms: Mutex::new(i64::MIN),
            last_activity_ms: AtomicI64::new(now_ms),
            paired_at_ms: Mutex::new(None),
            first_attach_ms: Mutex::new(None),
        }
    }

    fn slot_mutex(&self, role: Role) -> &Mutex<Option<RoleSlot>> {
        match role {
            Role::Client => &self.client,
            Role::Server => &self.server,
        }
    }

    pub fn touch(&self, now_ms: i64) {
        self.last_activity_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn is_idle(&self, now_ms: i64, idle_timeout_ms: i64) -> bool {
        now_ms.saturating_sub(self.last_activity_ms.load(Ordering::Relaxed)) >= idle_timeout_ms
    }

    pub fn is_role_present(&self, role: Role) -> bool {
        self.slot_mutex(role).lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn is_fully_paired(&self) -> bool {
        self.is_role_present(Role::Client) && self.is_role_present(Role::Server)
    }

    /// Attach `role`'s connection to this channel. `init_exp`/`idle_timeout`
    /// must match the channel's own (spec.md §4.3 `init_exp_mismatch` /
    /// `idle_timeout_mismatch`) — checked by the caller before calling this,
    /// since a fresh channel's values come from this attach's own token.
    /// Draining this role's pre-pair buffer releases its share of
    /// `global_pending_bytes`, mirroring [`Channel::detach`].
    pub fn attach(
        &self,
        role: Role,
        instance_id: Vec<u8>,
        outbound: OutboundQueue,
        now_ms: i64,
        global_pending_bytes: &AtomicUsize,
    ) -> TunnelResult<AttachOutcome> {
        {
            let mut first_attach = self.first_attach_ms.lock().unwrap_or_else(|e| e.into_inner());
            if first_attach.is_none() {
                *first_attach = Some(now_ms);
            }
        }
        let mut slot = self.slot_mutex(role).lock().unwrap_or_else(|e| e.into_inner());
        let replaced_old = match slot.take() {
            None => None,
            Some(existing) if existing.instance_id == instance_id => {
                let mut last_replace = self.last_replace_ms.lock().unwrap_or_else(|e| e.into_inner());
                if now_ms - *last_replace < MIN_REPLACE_INTERVAL_MS {
                    *slot = Some(existing);
                    return Err(TunnelError::ReplaceRateLimited);
                }
                *last_replace = now_ms;
                Some(existing.outbound)
            }
            Some(existing) => {
                *slot = Some(existing);
                return Err(TunnelError::RoleMismatch);
            }
        };
        *slot = Some(RoleSlot { instance_id, outbound });
        drop(slot);

        if let Some(old) = &replaced_old {
            old.enqueue_close("replaced");
        }

        let drained = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let queue = pending.queue_for_dest(role);
            let drained: Vec<Vec<u8>> = queue.drain(..).collect();
            let drained_bytes: usize = drained.iter().map(Vec::len).sum();
            pending.bytes = pending.bytes.saturating_sub(drained_bytes);
            global_pending_bytes.fetch_sub(drained_bytes, Ordering::Relaxed);
            drained
        };

        self.touch(now_ms);
        let paired = self.is_fully_paired();
        let mut pair_latency_ms = None;
        if paired {
            let mut paired_at = self.paired_at_ms.lock().unwrap_or_else(|e| e.into_inner());
            if paired_at.is_none() {
                *paired_at = Some(now_ms);
                let first = *self.first_attach_ms.lock().unwrap_or_else(|e| e.into_inner());
                pair_latency_ms = first.map(|f| now_ms - f);
            }
        }

        Ok(AttachOutcome { paired, drained, replaced_old, pair_latency_ms })
    }

    /// Route a frame `from_role` sent: straight to the peer's outbound queue
    /// if attached, otherwise buffer it (bounded by `max_pending_bytes` for
    /// this channel and `max_total_pending_bytes` across all channels).
    pub fn route(
        &self,
        from_role: Role,
        frame: Vec<u8>,
        max_pending_bytes: usize,
        global_pending_bytes: &AtomicUsize,
        max_total_pending_bytes: usize,
    ) -> TunnelResult<Routed> {
        let peer = other_role(from_role);
        {
            let slot = self.slot_mutex(peer).lock().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = &*slot {
                return Ok(Routed::ToPeer(existing.outbound.clone()));
            }
        }

        let frame_len = frame.len();
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.bytes.saturating_add(frame_len) > max_pending_bytes {
            return Err(TunnelError::PendingOverflow);
        }
        if global_pending_bytes.load(Ordering::Relaxed).saturating_add(frame_len) > max_total_pending_bytes {
            return Err(TunnelError::PendingOverflow);
        }
        pending.queue_for_dest(peer).push_back(frame);
        pending.bytes += frame_len;
        global_pending_bytes.fetch_add(frame_len, Ordering::Relaxed);
        Ok(Routed::Buffered)
    }

    /// Remove `role`'s slot (connection closed) and release that endpoint's
    /// share of global pending bytes if it never got drained.
    pub fn detach(&self, role: Role, global_pending_bytes: &AtomicUsize) {
        self.slot_mutex(role).lock().unwrap_or_else(|e| e.into_inner()).take();
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let dropped_bytes: usize = pending.queue_for_dest(role).iter().map(Vec::len).sum();
        pending.queue_for_dest(role).clear();
        pending.bytes = pending.bytes.saturating_sub(dropped_bytes);
        global_pending_bytes.fetch_sub(dropped_bytes, Ordering::Relaxed);
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).bytes
    }

    /// Close whichever role slots are currently occupied, for the idle/
    /// init-expired watchdog sweep.
    pub fn close_all(&self, reason: &'static str) {
        for role in [Role::Client, Role::Server] {
            if let Some(slot) = &*self.slot_mutex(role).lock().unwrap_or_else(|e| e.into_inner()) {
                slot.outbound.enqueue_close(reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(max_bytes: usize) -> (OutboundQueue, mpsc::Receiver<RelayMsg>) {
        OutboundQueue::new(max_bytes)
    }

    #[test]
    fn first_attach_is_not_paired_and_drains_nothing() {
        let chan = Channel::new("c1".into(), 1_000, 60, 0);
        let (out, _rx) = queue(1024);
        let global = AtomicUsize::new(0);
        let outcome = chan.attach(Role::Client, vec![1; 16], out, 0, &global).unwrap();
        assert!(!outcome.paired);
        assert!(outcome.drained.is_empty());
    }

    #[test]
    fn second_attach_pairs() {
        let chan = Channel::new("c1".into(), 1_000, 60, 0);
        let (out_c, _rx_c) = queue(1024);
        let (out_s, _rx_s) = queue(1024);
        let global = AtomicUsize::new(0);
        chan.attach(Role::Client, vec![1; 16], out_c, 0, &global).unwrap();
        let outcome = chan.attach(Role::Server, vec![2; 16], out_s, 1, &global).unwrap();
        assert!(outcome.paired);
    }

    #[test]
    fn different_instance_in_occupied_slot_is_role_mismatch() {
        let chan = Channel::new("c1".into(), 1_000, 60, 0);
        let (out_c, _rx) = queue(1024);
        let (out_c2, _rx2) = queue(1024);
        let global = AtomicUsize::new(0);
        chan.attach(Role::Client, vec![1; 16], out_c, 0, &global).unwrap();
        let err = chan.attach(Role::Client, vec![9; 16], out_c2, 1, &global).unwrap_err();
        assert!(matches!(err, TunnelError::RoleMismatch));
    }

    #[test]
    fn same_instance_replace_is_rate_limited() {
        let chan = Channel::new("c1".into(), 1_000, 60, 0);
        let (out_c, _rx) = queue(1024);
        let (out_c2, _rx2) = queue(1024);
        let global = AtomicUsize::new(0);
        chan.attach(Role::Client, vec![1; 16], out_c, 0, &global).unwrap();
        let err = chan.attach(Role::Client, vec![1; 16], out_c2, 10, &global).unwrap_err();
        assert!(matches!(err, TunnelError::ReplaceRateLimited));
    }

    #[test]
    fn same_instance_replace_succeeds_after_interval_and_closes_old() {
        let chan = Channel::new("c1".into(), 1_000, 60, 0);
        let (out_c, mut rx) = queue(1024);
        let (out_c2, _rx2) = queue(1024);
        let global = AtomicUsize::new(0);
        chan.attach(Role::Client, vec![1; 16], out_c, 0, &global).unwrap();
        let outcome = chan.attach(Role::Client, vec![1; 16], out_c2, MIN_REPLACE_INTERVAL_MS + 1, &global).unwrap();
        assert!(outcome.replaced_old.is_some());
        let msg = rx.try_recv().unwrap();
        assert!(matches!(msg, RelayMsg::Close("replaced")));
    }

    #[test]
    fn pre_pair_frames_buffer_and_drain_in_order() {
        let chan = Channel::new("c1".into(), 1_000, 60, 0);
        let global = AtomicUsize::new(0);
        chan.route(Role::Client, b"first".to_vec(), 1024, &global, 1024 * 1024).unwrap();
        chan.route(Role::Client, b"second".to_vec(), 1024, &global, 1024 * 1024).unwrap();
        assert_eq!(chan.pending_bytes(), 11);
        assert_eq!(global.load(Ordering::Relaxed), 11);

        let (out_s, _rx_s) = queue(1024);
        let outcome = chan.attach(Role::Server, vec![2; 16], out_s, 5, &global).unwrap();
        assert_eq!(outcome.drained, vec![b"first".to_vec(), b"second".to_vec()]);
        assert_eq!(chan.pending_bytes(), 0);
        assert_eq!(global.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn routing_to_an_attached_peer_does_not_buffer() {
        let chan = Channel::new("c1".into(), 1_000, 60, 0);
        let (out_s, mut rx_s) = queue(1024);
        let global = AtomicUsize::new(0);
        chan.attach(Role::Server, vec![2; 16], out_s, 0, &global).unwrap();

        match chan.route(Role::Client, b"hi".to_vec(), 1024, &global, 1024 * 1024).unwrap() {
            Routed::ToPeer(q) => q.enqueue_data(b"hi".to_vec()).unwrap(),
            Routed::Buffered => panic!("expected direct routing"),
        }
        assert_eq!(chan.pending_bytes(), 0);
        match rx_s.try_recv().unwrap() {
            RelayMsg::Data(d) => assert_eq!(d, b"hi"),
            RelayMsg::Close(_) => panic!("unexpected close"),
        }
    }

    #[test]
    fn pending_overflow_is_rejected_per_channel_limit() {
        let chan = Channel::new("c1".into(), 1_000, 60, 0);
        let global = AtomicUsize::new(0);
        chan.route(Role::Client, vec![0u8; 10], 15, &global, 1024).unwrap();
        let err = chan.route(Role::Client, vec![0u8; 10], 15, &global, 1024).unwrap_err();
        assert!(matches!(err, TunnelError::PendingOverflow));
    }

    #[test]
    fn outbound_queue_rejects_once_over_max_write_queue_bytes() {
        let (out, _rx) = queue(10);
        out.enqueue_data(vec![0u8; 8]).unwrap();
        let err = out.enqueue_data(vec![0u8; 8]).unwrap_err();
        assert!(matches!(err, TunnelError::WriteError(_)));
    }

    #[test]
    fn idle_detection_uses_last_activity() {
        let chan = Channel::new("c1".into(), 1_000, 60, 0);
        assert!(!chan.is_idle(100, 1_000));
        assert!(chan.is_idle(1_100, 1_000));
    }
}
