//! Per-stream state machine and flow control (spec.md §4.6).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::Notify;

use crate::error::{YamuxError, YamuxResult};

/// Default per-stream receive window (spec.md §4.6: "initially 256 KiB").
pub const DEFAULT_WINDOW: u32 = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    SynSent,
    SynReceived,
    Established,
    LocalClose,
    RemoteClose,
    Closed,
    Reset,
}

struct FlowState {
    /// Bytes the peer may still send before exhausting our receive window.
    recv_window: u32,
    /// Bytes consumed but not yet credited back to the peer via WINDOW_UPDATE.
    ungranted: u32,
    /// Bytes we may still send before blocking on the peer's window.
    send_window: u32,
}

/// One multiplexed stream. Shared between the session's reader task (which
/// dispatches inbound frames into it) and the caller-held handle (which
/// reads/writes through it).
pub struct Stream {
    pub(crate) id: u32,
    state: Mutex<StreamState>,
    flow: Mutex<FlowState>,
    recv_queue: Mutex<VecDeque<Vec<u8>>>,
    max_window: u32,
    /// Signalled whenever `recv_queue` gains data or the stream reaches EOF.
    pub(crate) recv_notify: Notify,
    /// Signalled on any state transition or send-window credit.
    pub(crate) state_notify: Notify,
    eof: std::sync::atomic::AtomicBool,
    reset_error_seen: AtomicU32,
}

impl Stream {
    pub(crate) fn new(id: u32, state: StreamState, max_window: u32) -> Self {
        Self {
            id,
            state: Mutex::new(state),
            flow: Mutex::new(FlowState { recv_window: max_window, ungranted: 0, send_window: max_window }),
            recv_queue: Mutex::new(VecDeque::new()),
            max_window,
            recv_notify: Notify::new(),
            state_notify: Notify::new(),
            eof: std::sync::atomic::AtomicBool::new(false),
            reset_error_seen: AtomicU32::new(0),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_flow(&self) -> std::sync::MutexGuard<'_, FlowState> {
        self.flow.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> StreamState {
        *self.lock_state()
    }

    pub(crate) fn set_state(&self, new_state: StreamState) {
        *self.lock_state() = new_state;
        self.state_notify.notify_waiters();
    }

    /// Inbound DATA: decrement `recv_window`, or signal a window violation.
    pub(crate) fn on_data(&self, payload: Vec<u8>) -> YamuxResult<()> {
        if matches!(self.state(), StreamState::Closed | StreamState::Reset | StreamState::RemoteClose) {
            return Err(YamuxError::UnknownStream(self.id));
        }
        {
            let mut flow = self.lock_flow();
            let len = payload.len() as u32;
            flow.recv_window = flow.recv_window.checked_sub(len).ok_or(YamuxError::WindowExceeded(self.id))?;
        }
        if !payload.is_empty() {
            self.recv_queue.lock().unwrap_or_else(|e| e.into_inner()).push_back(payload);
            self.recv_notify.notify_waiters();
        }
        Ok(())
    }

    pub(crate) fn on_fin(&self) {
        let mut state = self.lock_state();
        *state = match *state {
            StreamState::Established => StreamState::RemoteClose,
            StreamState::LocalClose => StreamState::Closed,
            other => other,
        };
        drop(state);
        self.eof.store(true, Ordering::SeqCst);
        self.recv_notify.notify_waiters();
        self.state_notify.notify_waiters();
    }

    pub(crate) fn on_reset(&self) {
        self.set_state(StreamState::Reset);
        self.recv_queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.reset_error_seen.store(1, Ordering::SeqCst);
        self.recv_notify.notify_waiters();
    }

    pub(crate) fn on_ack(&self) {
        let mut state = self.lock_state();
        if *state == StreamState::SynSent {
            *state = StreamState::Established;
        }
        drop(state);
        self.state_notify.notify_waiters();
    }

    /// Credit inbound `WINDOW_UPDATE(delta)` to our send window, waking any
    /// writer blocked on `send_window <= 0`.
    pub(crate) fn credit_send_window(&self, delta: u32) {
        {
            let mut flow = self.lock_flow();
            flow.send_window = flow.send_window.saturating_add(delta);
        }
        self.state_notify.notify_waiters();
    }

    /// Pop the oldest buffered chunk, if any. Returns `None` once the queue
    /// is drained and the peer has signalled FIN/RST.
    pub fn try_read(&self) -> Option<Vec<u8>> {
        self.recv_queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::SeqCst) && self.recv_queue.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    pub fn is_reset(&self) -> bool {
        self.reset_error_seen.load(Ordering::SeqCst) == 1
    }

    /// Record that `len` bytes were delivered to the application, returning
    /// a `WINDOW_UPDATE` delta to send if the ungranted credit has crossed
    /// half the max window (spec.md §4.6).
    pub(crate) fn consume_and_maybe_grant(&self, len: u32) -> Option<u32> {
        let mut flow = self.lock_flow();
        flow.ungranted = flow.ungranted.saturating_add(len);
        if flow.ungranted >= self.max_window / 2 {
            let delta = flow.ungranted;
            flow.ungranted = 0;
            flow.recv_window = flow.recv_window.saturating_add(delta);
            Some(delta)
        } else {
            None
        }
    }

    /// Reserve up to `len` bytes of send-window credit, blocking until at
    /// least one byte is available. Returns the number of bytes granted
    /// (may be less than `len`).
    pub(crate) async fn reserve_send_window(&self, len: u32) -> u32 {
        loop {
            {
                let mut flow = self.lock_flow();
                if flow.send_window > 0 {
                    let grant = flow.send_window.min(len);
                    flow.send_window -= grant;
                    return grant;
                }
            }
            self.state_notify.notified().await;
        }
    }
}
