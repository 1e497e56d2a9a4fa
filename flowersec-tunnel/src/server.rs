//! `TunnelServer`: accepts already-upgraded WebSocket connections, runs the
//! `Attach` flight, pairs role slots onto a channel, and relays binary
//! records between them until one side closes or the idle watchdog reaps
//! the channel.
//!
//! The HTTP upgrade itself is the embedder's job — this mirrors
//! `flowersec_e2ee::transport::WebSocketFrameTransport`'s choice to adapt an
//! already-constructed Sink+Stream rather than own the listener, so this
//! crate stays on the teacher's `tokio-tungstenite` dependency instead of
//! pulling in a full HTTP server framework.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use flowersec_observer::{AttachResult, NoopTunnelObserver, ObserverHandle, ReplaceResult, TunnelObserver};
use flowersec_token::{Keyset, Role, VerifyOptions, verify_token};
use flowersec_util::Cancellation;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, frame::coding::CloseCode};
use tracing::{debug, warn};

use crate::attach::parse_attach;
use crate::channel::{Channel, OutboundQueue, RelayMsg, Routed};
use crate::clock::{unix_now_ms, unix_now_s};
use crate::config::TunnelConfig;
use crate::error::{TunnelError, TunnelResult};
use crate::origin::is_origin_allowed;
use crate::replay::TokenUseCache;

/// The WebSocket tunnel pairing server (spec.md §4.3).
pub struct TunnelServer {
    config: TunnelConfig,
    channels: Mutex<HashMap<String, Arc<Channel>>>,
    replay: TokenUseCache,
    conns: Arc<Semaphore>,
    live_conns: AtomicUsize,
    global_pending_bytes: AtomicUsize,
    keys: Mutex<Arc<Keyset>>,
    observer: ObserverHandle<dyn TunnelObserver>,
}

impl TunnelServer {
    pub fn new(config: TunnelConfig) -> Arc<Self> {
        let conns = Arc::new(Semaphore::new(config.max_conns));
        let keys = Mutex::new(Arc::new(config.keyset.clone()));
        Arc::new(Self {
            config,
            channels: Mutex::new(HashMap::new()),
            replay: TokenUseCache::new(),
            conns,
            live_conns: AtomicUsize::new(0),
            global_pending_bytes: AtomicUsize::new(0),
            keys,
            observer: ObserverHandle::new(Arc::new(NoopTunnelObserver)),
        })
    }

    /// A handle callers can use to swap in an instrumented observer at
    /// runtime (spec.md §4.8).
    pub fn observer_handle(&self) -> ObserverHandle<dyn TunnelObserver> {
        self.observer.clone()
    }

    /// Atomically swap in a reloaded public keyset (spec.md §4.3 `ReloadKeys`).
    pub fn reload_keys(&self, keyset: Keyset) {
        *self.keys.lock().unwrap_or_else(|e| e.into_inner()) = Arc::new(keyset);
    }

    fn current_keyset(&self) -> Arc<Keyset> {
        Arc::clone(&self.keys.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn get_or_create_channel(&self, channel_id: &str, init_exp: i64, idle_timeout_seconds: u64) -> TunnelResult<Arc<Channel>> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = channels.get(channel_id) {
            return Ok(Arc::clone(existing));
        }
        if channels.len() >= self.config.max_channels {
            return Err(TunnelError::TooManyChannels);
        }
        let channel = Arc::new(Channel::new(channel_id.to_string(), init_exp, idle_timeout_seconds, unix_now_ms()));
        channels.insert(channel_id.to_string(), Arc::clone(&channel));
        Ok(channel)
    }

    /// Handle one already-upgraded WebSocket connection end to end: origin
    /// check, admission, Attach, pairing, relay, and cleanup. Returns once
    /// the connection closes, with the close reason that was sent.
    pub async fn handle_connection<T>(self: &Arc<Self>, stream: T, origin: Option<&str>)
    where
        T: Sink<Message, Error = WsError> + Stream<Item = Result<Message, WsError>> + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = stream.split();

        if !is_origin_allowed(origin, &self.config.allowed_origins, self.config.allow_no_origin) {
            self.observer.get().attach(AttachResult::Rejected, "invalid_attach");
            close_with(&mut sink, "invalid_attach").await;
            return;
        }

        let permit = match Arc::clone(&self.conns).try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                self.observer.get().attach(AttachResult::Rejected, "too_many_connections");
                close_with(&mut sink, "too_many_connections").await;
                return;
            }
        };
        self.live_conns.fetch_add(1, Ordering::Relaxed);
        self.observer.get().conn_count(self.live_conns.load(Ordering::Relaxed) as u64);

        let reason = match self.run_attached(&mut sink, &mut stream).await {
            Ok(reason) => reason,
            Err(err) => {
                self.observer.get().attach(AttachResult::Rejected, err.close_reason());
                err.close_reason()
            }
        };
        close_with(&mut sink, reason).await;

        drop(permit);
        self.live_conns.fetch_sub(1, Ordering::Relaxed);
        self.observer.get().conn_count(self.live_conns.load(Ordering::Relaxed) as u64);
        self.observer.get().close(reason);
    }

    async fn run_attached<Si, St>(self: &Arc<Self>, sink: &mut Si, stream: &mut St) -> TunnelResult<&'static str>
    where
        Si: Sink<Message, Error = WsError> + Unpin,
        St: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        let attach_text = read_attach_text(stream, self.config.max_attach_bytes).await?;
        let attach = parse_attach(&attach_text)?;

        let keyset = self.current_keyset();
        let now = unix_now_s();
        let opts = VerifyOptions {
            aud: self.config.tunnel_audience.clone(),
            iss: self.config.tunnel_issuer.clone(),
            now,
            skew_seconds: self.config.skew_seconds,
        };
        let payload = verify_token(&attach.token, &keyset, &opts)?;
        if payload.channel_id != attach.channel_id {
            return Err(TunnelError::ChannelMismatch);
        }
        if payload.role != attach.role {
            return Err(TunnelError::InvalidAttach("role does not match token".into()));
        }
        if !self.replay.check_and_record(&payload.token_id, payload.exp, now) {
            return Err(TunnelError::TokenReplay);
        }

        let channel = self.get_or_create_channel(&attach.channel_id, payload.init_exp, payload.idle_timeout_seconds)?;
        if channel.init_exp != payload.init_exp {
            return Err(TunnelError::InitExpMismatch);
        }
        if channel.idle_timeout_seconds != payload.idle_timeout_seconds {
            return Err(TunnelError::IdleTimeoutMismatch);
        }

        let (outbound, mut outbound_rx) = OutboundQueue::new(self.config.max_write_queue_bytes);
        let now_ms = unix_now_ms();
        let outcome = match channel.attach(
            attach.role,
            attach.endpoint_instance_id.clone(),
            outbound.clone(),
            now_ms,
            &self.global_pending_bytes,
        ) {
            Ok(outcome) => outcome,
            Err(err) => {
                if matches!(err, TunnelError::ReplaceRateLimited) {
                    self.observer.get().replace(ReplaceResult::RateLimited);
                }
                return Err(err);
            }
        };
        if outcome.replaced_old.is_some() {
            self.observer.get().replace(ReplaceResult::Replaced);
        }
        self.observer.get().attach(AttachResult::Ok, "ok");
        if let Some(latency_ms) = outcome.pair_latency_ms {
            self.observer.get().pair_latency(std::time::Duration::from_millis(latency_ms.max(0) as u64));
        }
        for frame in outcome.drained {
            let _ = outbound.enqueue_data(frame);
        }

        let reason = self.relay(sink, stream, &mut outbound_rx, &outbound, &channel, attach.role).await;

        channel.detach(attach.role, &self.global_pending_bytes);
        if !channel.is_role_present(Role::Client) && !channel.is_role_present(Role::Server) {
            self.channels.lock().unwrap_or_else(|e| e.into_inner()).remove(&channel.channel_id);
        }

        Ok(reason)
    }

    async fn relay<Si, St>(
        &self,
        sink: &mut Si,
        stream: &mut St,
        outbound_rx: &mut tokio::sync::mpsc::Receiver<RelayMsg>,
        outbound: &OutboundQueue,
        channel: &Arc<Channel>,
        role: Role,
    ) -> &'static str
    where
        Si: Sink<Message, Error = WsError> + Unpin,
        St: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        loop {
            tokio::select! {
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Binary(data))) => {
                            if data.len() > self.config.max_record_bytes {
                                return "record_too_large";
                            }
                            channel.touch(unix_now_ms());
                            match channel.route(
                                role,
                                data.to_vec(),
                                self.config.max_pending_bytes,
                                &self.global_pending_bytes,
                                self.config.max_total_pending_bytes,
                            ) {
                                Ok(Routed::ToPeer(peer_out)) => {
                                    if peer_out.enqueue_data(data.to_vec()).is_ok() {
                                        self.observer.get().encrypted();
                                    }
                                }
                                Ok(Routed::Buffered) => {}
                                Err(err) => return err.close_reason(),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return "peer_closed",
                        Some(Ok(_other)) => return "non_binary_frame",
                        Some(Err(_)) => return "peer_closed",
                    }
                }
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(RelayMsg::Data(frame)) => {
                            let len = frame.len();
                            let result = tokio::time::timeout(
                                self.config.write_timeout,
                                sink.send(Message::Binary(frame.into())),
                            ).await;
                            outbound.release(len);
                            if !matches!(result, Ok(Ok(()))) {
                                return "write_error";
                            }
                        }
                        Some(RelayMsg::Close(reason)) => return reason,
                        None => return "peer_closed",
                    }
                }
            }
        }
    }

    /// Periodic sweep closing channels past `init_exp` (unpaired) or
    /// `idle_timeout` (paired or not), grounded in the teacher's
    /// `cleanup_interval`-style periodic reclaim.
    pub async fn run_watchdog(self: Arc<Self>, cancel: Cancellation) {
        let mut ticker = tokio::time::interval(self.config.cleanup_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.sweep_once(),
            }
        }
    }

    fn sweep_once(&self) {
        let now_s = unix_now_s();
        let now_ms = unix_now_ms();
        let idle_timeout_ms = |c: &Channel| i64::try_from(c.idle_timeout_seconds).unwrap_or(i64::MAX).saturating_mul(1000);

        self.replay.sweep_expired(now_s);

        let expired: Vec<(String, Arc<Channel>, &'static str)> = {
            let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
            channels
                .values()
                .filter_map(|c| {
                    if c.is_idle(now_ms, idle_timeout_ms(c)) {
                        Some((c.channel_id.clone(), Arc::clone(c), "idle_timeout"))
                    } else if !c.is_fully_paired() && now_s > c.init_exp.saturating_add(self.config.skew_seconds) {
                        Some((c.channel_id.clone(), Arc::clone(c), "init_expired"))
                    } else {
                        None
                    }
                })
                .collect()
        };

        if expired.is_empty() {
            return;
        }
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        for (channel_id, channel, reason) in expired {
            channel.close_all(reason);
            channels.remove(&channel_id);
            self.observer.get().close(reason);
            debug!(channel_id, reason, "watchdog closed channel");
        }
        self.observer.get().channel_count(channels.len() as u64);
    }

    pub fn live_connection_count(&self) -> usize {
        self.live_conns.load(Ordering::Relaxed)
    }

    pub fn live_channel_count(&self) -> usize {
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

async fn read_attach_text<St>(stream: &mut St, max_bytes: usize) -> TunnelResult<String>
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    match stream.next().await {
        Some(Ok(Message::Text(text))) => {
            if text.len() > max_bytes {
                return Err(TunnelError::InvalidAttach("attach frame exceeds max_attach_bytes".into()));
            }
            Ok(text.to_string())
        }
        Some(Ok(_)) => Err(TunnelError::ExpectedAttach),
        Some(Err(err)) => Err(TunnelError::Transport(err)),
        None => Err(TunnelError::ExpectedAttach),
    }
}

async fn close_with<Si>(sink: &mut Si, reason: &'static str)
where
    Si: Sink<Message, Error = WsError> + Unpin,
{
    let frame = CloseFrame { code: CloseCode::Normal, reason: reason.into() };
    if let Err(err) = sink.send(Message::Close(Some(frame))).await {
        warn!(reason, error = %err, "failed to send close frame");
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use flowersec_token::{KeysetFile, PublicKeyEntry, TokenPayload, sign_token};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn keyset(signing: &SigningKey) -> Keyset {
        let file = KeysetFile {
            keys: vec![PublicKeyEntry {
                kid: "k1".into(),
                pubkey_b64u: flowersec_util::b64u::encode(signing.verifying_key().as_bytes()),
            }],
        };
        Keyset::from_file(&file).unwrap()
    }

    fn test_config(signing: &SigningKey) -> TunnelConfig {
        let mut config = TunnelConfig::new(keyset(signing), "flowersec-tunnel");
        config.allow_no_origin = true;
        config
    }

    fn attach_json(channel_id: &str, role: u8, token: &str) -> String {
        serde_json::json!({
            "v": 1,
            "channel_id": channel_id,
            "role": role,
            "token": token,
            "endpoint_instance_id": flowersec_util::b64u::encode(&[role; 16]),
        })
        .to_string()
    }

    fn make_token(signing: &SigningKey, channel_id: &str, role: Role, now: i64) -> (String, i64, u64) {
        let init_exp = now + 120;
        let payload = TokenPayload {
            kid: "k1".into(),
            aud: "flowersec-tunnel".into(),
            iss: None,
            channel_id: channel_id.to_string(),
            role,
            token_id: format!("tok-{role}-{now}"),
            init_exp,
            idle_timeout_seconds: 60,
            iat: now,
            exp: now + 60,
        };
        (sign_token(signing, &payload).unwrap(), init_exp, 60)
    }

    /// In-memory Sink+Stream pair standing in for a real WebSocket, mirroring
    /// `flowersec_e2ee::transport::ChannelTransport`.
    struct PairedWs {
        tx: mpsc::Sender<Message>,
        rx: mpsc::Receiver<Message>,
    }

    impl PairedWs {
        fn pair() -> (Self, Self) {
            let (tx_a, rx_b) = mpsc::channel(64);
            let (tx_b, rx_a) = mpsc::channel(64);
            (Self { tx: tx_a, rx: rx_a }, Self { tx: tx_b, rx: rx_b })
        }
    }

    impl Stream for PairedWs {
        type Item = Result<Message, WsError>;
        fn poll_next(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Option<Self::Item>> {
            self.rx.poll_recv(cx).map(|opt| opt.map(Ok))
        }
    }

    impl Sink<Message> for PairedWs {
        type Error = WsError;
        fn poll_ready(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }
        fn start_send(self: std::pin::Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            let _ = self.tx.try_send(item);
            Ok(())
        }
        fn poll_flush(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }
        fn poll_close(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn paired_endpoints_relay_binary_records() {
        let signing = SigningKey::from_bytes(&[1u8; 32]);
        let server = TunnelServer::new(test_config(&signing));
        let now = 1_700_000_000;

        let (client_ws, mut client_side) = PairedWs::pair();
        let (server_ws, mut server_side) = PairedWs::pair();

        let (client_token, _, _) = make_token(&signing, "chan_1", Role::Client, now);
        let (server_token, _, _) = make_token(&signing, "chan_1", Role::Server, now);

        client_side.tx.send(Message::Text(attach_json("chan_1", 1, &client_token).into())).await.unwrap();
        server_side.tx.send(Message::Text(attach_json("chan_1", 2, &server_token).into())).await.unwrap();

        let srv = Arc::clone(&server);
        let client_task = tokio::spawn(async move { srv.handle_connection(client_ws, None).await });
        let srv2 = Arc::clone(&server);
        let server_task = tokio::spawn(async move { srv2.handle_connection(server_ws, None).await });

        client_side.tx.send(Message::Binary(b"hello".to_vec().into())).await.unwrap();
        let relayed = tokio::time::timeout(Duration::from_secs(2), server_side.rx.recv()).await.unwrap().unwrap();
        assert_eq!(relayed, Message::Binary(b"hello".to_vec().into()));

        drop(client_side.tx);
        drop(server_side.tx);
        let _ = tokio::time::timeout(Duration::from_secs(2), client_task).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), server_task).await;
    }

    #[tokio::test]
    async fn pre_pair_frames_are_buffered_then_delivered() {
        let signing = SigningKey::from_bytes(&[2u8; 32]);
        let server = TunnelServer::new(test_config(&signing));
        let now = 1_700_000_000;

        let (client_ws, mut client_side) = PairedWs::pair();
        let (client_token, _, _) = make_token(&signing, "chan_2", Role::Client, now);
        client_side.tx.send(Message::Text(attach_json("chan_2", 1, &client_token).into())).await.unwrap();

        let srv = Arc::clone(&server);
        let client_task = tokio::spawn(async move { srv.handle_connection(client_ws, None).await });

        client_side.tx.send(Message::Binary(b"buffered".to_vec().into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let (server_ws, mut server_side) = PairedWs::pair();
        let (server_token, _, _) = make_token(&signing, "chan_2", Role::Server, now);
        server_side.tx.send(Message::Text(attach_json("chan_2", 2, &server_token).into())).await.unwrap();
        let srv2 = Arc::clone(&server);
        let server_task = tokio::spawn(async move { srv2.handle_connection(server_ws, None).await });

        let relayed = tokio::time::timeout(Duration::from_secs(2), server_side.rx.recv()).await.unwrap().unwrap();
        assert_eq!(relayed, Message::Binary(b"buffered".to_vec().into()));

        drop(client_side.tx);
        drop(server_side.tx);
        let _ = tokio::time::timeout(Duration::from_secs(2), client_task).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), server_task).await;
    }

    #[tokio::test]
    async fn token_replay_is_rejected() {
        let signing = SigningKey::from_bytes(&[3u8; 32]);
        let server = TunnelServer::new(test_config(&signing));
        let now = 1_700_000_000;
        let (token, _, _) = make_token(&signing, "chan_3", Role::Client, now);

        let (ws1, mut side1) = PairedWs::pair();
        side1.tx.send(Message::Text(attach_json("chan_3", 1, &token).into())).await.unwrap();
        let srv = Arc::clone(&server);
        tokio::spawn(async move { srv.handle_connection(ws1, None).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (ws2, mut side2) = PairedWs::pair();
        side2.tx.send(Message::Text(attach_json("chan_3", 1, &token).into())).await.unwrap();
        server.handle_connection(ws2, None).await;

        let close = tokio::time::timeout(Duration::from_secs(1), side2.rx.recv()).await.unwrap().unwrap();
        match close {
            Message::Close(Some(frame)) => assert_eq!(frame.reason, "token_replay"),
            other => panic!("expected a close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn origin_not_allowed_is_rejected_before_attach() {
        let signing = SigningKey::from_bytes(&[4u8; 32]);
        let mut config = test_config(&signing);
        config.allow_no_origin = false;
        config.allowed_origins = vec!["example.com".to_string()];
        let server = TunnelServer::new(config);

        let (ws, mut side) = PairedWs::pair();
        server.handle_connection(ws, Some("https://evil.example")).await;
        let close = tokio::time::timeout(Duration::from_secs(1), side.rx.recv()).await.unwrap().unwrap();
        match close {
            Message::Close(Some(frame)) => assert_eq!(frame.reason, "invalid_attach"),
            other => panic!("expected a close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn watchdog_closes_idle_paired_channel() {
        let signing = SigningKey::from_bytes(&[5u8; 32]);
        let mut config = test_config(&signing);
        config.idle_timeout = Duration::from_millis(150);
        config.cleanup_interval = Duration::from_millis(20);
        let server = TunnelServer::new(config);
        let now = 1_700_000_000;

        let (client_ws, mut client_side) = PairedWs::pair();
        let (server_ws, mut server_side) = PairedWs::pair();
        let (client_token, _, _) = make_token(&signing, "chan_4", Role::Client, now);
        let (server_token, _, _) = make_token(&signing, "chan_4", Role::Server, now);
        client_side.tx.send(Message::Text(attach_json("chan_4", 1, &client_token).into())).await.unwrap();
        server_side.tx.send(Message::Text(attach_json("chan_4", 2, &server_token).into())).await.unwrap();

        let srv = Arc::clone(&server);
        let client_task = tokio::spawn(async move { srv.handle_connection(client_ws, None).await });
        let srv2 = Arc::clone(&server);
        let server_task = tokio::spawn(async move { srv2.handle_connection(server_ws, None).await });

        let cancel = Cancellation::new();
        let watchdog_server = Arc::clone(&server);
        let watchdog_cancel = cancel.clone();
        let watchdog = tokio::spawn(async move { watchdog_server.run_watchdog(watchdog_cancel).await });

        let close = tokio::time::timeout(Duration::from_millis(400), client_side.rx.recv()).await.unwrap().unwrap();
        match close {
            Message::Close(Some(frame)) => assert_eq!(frame.reason, "idle_timeout"),
            other => panic!("expected a close frame, got {other:?}"),
        }

        cancel.cancel();
        let _ = watchdog.await;
        let _ = tokio::time::timeout(Duration::from_secs(1), client_task).await;
        let _ = tokio::time::timeout(Duration::from_secs(1), server_task).await;
    }
}
