//! Top-level facade: owns the signaling handshake, the peer registry, the
//! RTC manager, the retention buffer, and the observer registries. This is
//! the explicit, caller-owned handle the redesign notes call for in place
//! of the original's process-wide singleton state.

use std::io::Write;
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;

use crate::auth;
use crate::connection::{ConnectionInfo, Role};
use crate::delivery::Delivery;
use crate::error::SignalingError;
use crate::log_entry::LogEntry;
use crate::observer::{
    self, ConnectionHandler, ConnectionObserverRegistry, ConnectionUnsubscribe, LogHandler,
    LogObserverRegistry, LogUnsubscribe,
};
use crate::peer::{PeerInfo, PeerRegistry};
use crate::rtc::{ConnectionStateCallback, RtcManager};
use crate::signaling::{self, SignalingClient, SignalingMessage};
use crate::stream::{self, InterceptingWriter, LineReceiver};

/// Returns whether `sendLog` is allowed for `role`: only appenders
/// originate logs.
fn is_send_allowed(role: Role) -> bool {
    matches!(role, Role::Appender)
}

pub struct Manager {
    role: Role,
    key: String,
    public_token: Option<String>,
    default_fields: Option<Value>,
    peer_id: RwLock<Option<String>>,
    signaling: Arc<SignalingClient>,
    rtc: RwLock<Option<Arc<RtcManager>>>,
    peer_registry: RwLock<PeerRegistry>,
    delivery: Delivery,
    log_observers: LogObserverRegistry,
    connection_observers: ConnectionObserverRegistry,
    dispatch_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Manager {
    /// Resolves once the server has sent `auth_success`, or rejects on a
    /// socket error or a server-sent `error` frame. All further signaling
    /// traffic is handled on a background task for the manager's lifetime.
    pub async fn connect(info: ConnectionInfo) -> Result<Arc<Manager>, SignalingError> {
        Self::connect_with_default_fields(info, None).await
    }

    /// Like [`Manager::connect`], but also carries `default_fields` (spec.md
    /// §3's session-scoped `defaultFields`) to be appended to the outbound
    /// `auth` message.
    pub async fn connect_with_default_fields(
        info: ConnectionInfo,
        default_fields: Option<Value>,
    ) -> Result<Arc<Manager>, SignalingError> {
        let url = signaling::signaling_url(&info)?;
        let (signaling_client, mut inbound) = SignalingClient::connect(&url).await?;

        let manager = Arc::new(Manager {
            role: info.role,
            key: info.key,
            public_token: info.public_token,
            default_fields,
            peer_id: RwLock::new(None),
            signaling: signaling_client,
            rtc: RwLock::new(None),
            peer_registry: RwLock::new(PeerRegistry::new()),
            delivery: Delivery::new(),
            log_observers: LogObserverRegistry::new(),
            connection_observers: ConnectionObserverRegistry::new(),
            dispatch_task: StdMutex::new(None),
        });

        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), SignalingError>>();
        let dispatch_manager = manager.clone();
        let task = tokio::spawn(async move {
            let mut ready_tx = Some(ready_tx);
            while let Some(message) = inbound.recv().await {
                dispatch_manager.handle_signaling_message(message, &mut ready_tx).await;
            }
            // The inbound channel only closes when the signaling socket's
            // reader task exits, whether or not the handshake ever
            // completed; record it against the reconnection-attempt
            // counter the caller may consult (spec.md §4.2).
            dispatch_manager.signaling.record_attempt();
            if let Some(tx) = ready_tx.take() {
                let _ = tx.send(Err(SignalingError::ChannelClosed));
            }
        });
        *manager.dispatch_task.lock().unwrap() = Some(task);

        match ready_rx.await {
            Ok(Ok(())) => Ok(manager),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(SignalingError::ChannelClosed),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub async fn peer_id(&self) -> Option<String> {
        self.peer_id.read().await.clone()
    }

    /// The number of times the signaling socket has been recorded as lost
    /// (spec.md §4.2). The core tracks this counter but never reconnects
    /// automatically; a caller wanting retry behavior reads this to decide
    /// whether to give up, capped informationally at
    /// [`crate::signaling::MAX_RECONNECT_ATTEMPTS`].
    pub fn reconnect_attempts(&self) -> u32 {
        self.signaling.attempts()
    }

    /// Registers a handler invoked synchronously for every entry submitted
    /// to delivery. Returns an unregister handle.
    pub fn on_log(&self, handler: Arc<LogHandler>) -> LogUnsubscribe {
        self.log_observers.register(handler)
    }

    /// Registers a handler invoked with `(peerId, connected)` whenever a
    /// data channel opens or is torn down. Returns an unregister handle.
    pub fn on_connection(&self, handler: Arc<ConnectionHandler>) -> ConnectionUnsubscribe {
        self.connection_observers.register(handler)
    }

    /// No-op with a warning if `role != appender`; otherwise records the
    /// entry, notifies log observers, and broadcasts to open reader
    /// channels.
    pub async fn send_log(&self, entry: LogEntry) {
        self.submit_entry(entry).await;
    }

    /// Attaches line readers to a child process's stdout/stderr, submitting
    /// every parsed line the same way [`Manager::send_log`] does.
    pub fn forward_streams<R1, R2>(self: &Arc<Self>, stdout: R1, stderr: R2) -> JoinHandle<()>
    where
        R1: AsyncRead + Unpin + Send + 'static,
        R2: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = stream::line_channel();
        stream::forward_streams(stdout, stderr, tx);
        self.attach_stream_dispatch(rx)
    }

    /// Wraps the caller's own stdout/stderr writers so every write is
    /// mirrored unchanged and also submitted. Call `into_inner` on the
    /// returned writers to restore the originals.
    pub fn forward<WOut: Write, WErr: Write>(
        self: &Arc<Self>,
        stdout: WOut,
        stderr: WErr,
    ) -> (InterceptingWriter<WOut>, InterceptingWriter<WErr>, JoinHandle<()>) {
        let (tx, rx) = stream::line_channel();
        let (out, err) = stream::forward(stdout, stderr, tx);
        let task = self.attach_stream_dispatch(rx);
        (out, err, task)
    }

    fn attach_stream_dispatch(self: &Arc<Self>, mut receiver: LineReceiver) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(raw) = receiver.recv().await {
                if let Some(entry) = stream::filter_and_parse(raw) {
                    manager.submit_entry(entry).await;
                }
            }
        })
    }

    async fn submit_entry(&self, entry: LogEntry) {
        if !is_send_allowed(self.role) {
            tracing::warn!(target = "manager", "sendLog ignored: role is not appender");
            return;
        }
        let entry = self.delivery.record(entry).await;
        observer::notify_log(&self.log_observers, &entry);
        match serde_json::to_vec(&entry) {
            Ok(bytes) => {
                if let Some(rtc) = self.rtc.read().await.clone() {
                    rtc.send_to_reader_channels(&bytes).await;
                }
            }
            Err(err) => {
                tracing::warn!(target = "manager", %err, "failed to serialize log entry");
            }
        }
    }

    async fn replay_to(&self, peer_id: &str) {
        let snapshot = self.delivery.snapshot().await;
        let Some(rtc) = self.rtc.read().await.clone() else {
            return;
        };
        for entry in snapshot {
            match serde_json::to_vec(&entry) {
                Ok(bytes) => {
                    rtc.send_to_peer(peer_id, &bytes).await;
                }
                Err(err) => {
                    tracing::warn!(target = "manager", %err, "failed to serialize entry for replay");
                }
            }
        }
    }

    async fn handle_signaling_message(
        self: &Arc<Self>,
        message: SignalingMessage,
        ready_tx: &mut Option<oneshot::Sender<Result<(), SignalingError>>>,
    ) {
        match message {
            SignalingMessage::AuthChallenge { nonce, timestamp } => {
                let public_token = self.public_token.clone().unwrap_or_default();
                match auth::compute_proof(&self.key, &public_token, self.role, &nonce, timestamp) {
                    Ok(proof) => self.signaling.send(SignalingMessage::Auth {
                        role: self.role,
                        proof,
                        default_fields: self.default_fields.clone(),
                    }),
                    Err(err) => {
                        tracing::error!(target = "manager", %err, "failed to compute auth proof");
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(Err(err));
                        }
                    }
                }
            }
            SignalingMessage::AuthSuccess { peer_id } => {
                *self.peer_id.write().await = Some(peer_id.clone());

                let weak = Arc::downgrade(self);
                let on_connection_state: ConnectionStateCallback =
                    Arc::new(move |changed_peer_id, connected| {
                        let weak = weak.clone();
                        tokio::spawn(async move {
                            let Some(manager) = weak.upgrade() else {
                                return;
                            };
                            if connected {
                                manager.replay_to(&changed_peer_id).await;
                            }
                            observer::notify_connection(
                                &manager.connection_observers,
                                &changed_peer_id,
                                connected,
                            );
                        });
                    });

                let rtc = RtcManager::new(peer_id, self.role, self.signaling.clone(), on_connection_state);
                *self.rtc.write().await = Some(rtc);

                self.signaling.send(SignalingMessage::PeerDiscovery {});
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            SignalingMessage::Error { message } => {
                tracing::warn!(target = "manager", %message, "signaling reported error");
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Err(SignalingError::Rejected(message)));
                } else {
                    self.disconnect().await;
                }
            }
            SignalingMessage::PeerList { peers } => {
                let infos: Vec<PeerInfo> = peers
                    .into_iter()
                    .map(|p| PeerInfo {
                        peer_id: p.peer_id,
                        role: p.role,
                    })
                    .collect();
                {
                    let mut registry = self.peer_registry.write().await;
                    for info in &infos {
                        registry.insert(info.clone());
                    }
                }
                if let Some(rtc) = self.rtc.read().await.clone() {
                    // Correct any opportunistically-guessed role before
                    // election runs, so the role filter in §4.4 sees the
                    // resolved role rather than a stale guess.
                    for info in &infos {
                        rtc.correct_role(&info.peer_id, info.role).await;
                    }
                    rtc.on_peer_list(&infos).await;
                }
            }
            SignalingMessage::PeerJoined { peer_id, role } => {
                let info = PeerInfo {
                    peer_id: peer_id.clone(),
                    role,
                };
                self.peer_registry.write().await.insert(info.clone());
                if let Some(rtc) = self.rtc.read().await.clone() {
                    rtc.correct_role(&peer_id, role).await;
                    rtc.on_peer_joined(info).await;
                }
            }
            SignalingMessage::PeerDisconnected { peer_id } => {
                self.peer_registry.write().await.remove(&peer_id);
                if let Some(rtc) = self.rtc.read().await.clone() {
                    rtc.on_peer_disconnected(&peer_id).await;
                }
            }
            SignalingMessage::WebrtcOffer {
                from_peer_id: Some(from),
                offer,
                ..
            } => {
                let known_role = self.peer_registry.read().await.get(&from).map(|p| p.role);
                if let Some(rtc) = self.rtc.read().await.clone() {
                    if let Err(err) = rtc.handle_remote_offer(from, offer, known_role).await {
                        tracing::warn!(target = "manager", %err, "failed to handle remote offer");
                    }
                }
            }
            SignalingMessage::WebrtcAnswer {
                from_peer_id: Some(from),
                answer,
                ..
            } => {
                if let Some(rtc) = self.rtc.read().await.clone() {
                    if let Err(err) = rtc.handle_remote_answer(from, answer).await {
                        tracing::warn!(target = "manager", %err, "failed to handle remote answer");
                    }
                }
            }
            SignalingMessage::WebrtcIceCandidate {
                from_peer_id: Some(from),
                candidate,
                ..
            } => {
                if let Some(rtc) = self.rtc.read().await.clone() {
                    if let Err(err) = rtc.handle_remote_ice_candidate(from, candidate).await {
                        tracing::warn!(target = "manager", %err, "failed to apply remote ice candidate");
                    }
                }
            }
            // Outbound-only or malformed-bidirectional (missing fromPeerId) frames.
            SignalingMessage::PeerDiscovery {}
            | SignalingMessage::Auth { .. }
            | SignalingMessage::WebrtcOffer { .. }
            | SignalingMessage::WebrtcAnswer { .. }
            | SignalingMessage::WebrtcIceCandidate { .. } => {}
        }
    }

    /// Stops the stale-sweep timer, closes every channel and peer
    /// connection, clears the peer registry, and closes the signaling
    /// socket. Idempotent.
    pub async fn disconnect(self: &Arc<Self>) {
        if let Some(rtc) = self.rtc.write().await.take() {
            rtc.shutdown().await;
        }
        self.peer_registry.write().await.clear();
        self.signaling.close();
        *self.peer_id.write().await = None;
        if let Some(task) = self.dispatch_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_appenders_may_send() {
        assert!(is_send_allowed(Role::Appender));
        assert!(!is_send_allowed(Role::Reader));
    }
}
