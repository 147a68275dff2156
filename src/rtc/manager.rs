//! Per-peer connection lifecycle: initiator election, offer/answer/ICE
//! exchange, the stale-sweep safety net, and coordinated teardown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::connection::Role;
use crate::error::TransportError;
use crate::peer::{is_complementary, PeerInfo};
use crate::rtc::config::{rtc_configuration, DATA_CHANNEL_LABEL};
use crate::rtc::connection::{ConnectionState, RtcConnection};
use crate::signaling::{IceCandidateWire, SessionDescriptionWire, SignalingClient, SignalingMessage};

/// Invoked with `(peerId, connected)` whenever a data channel opens or its
/// connection is torn down. Fired exactly once per transition.
pub type ConnectionStateCallback = Arc<dyn Fn(String, bool) + Send + Sync>;

const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const JOIN_ELECTION_DELAY: Duration = Duration::from_secs(1);

pub struct RtcManager {
    own_peer_id: String,
    own_role: Role,
    signaling: Arc<SignalingClient>,
    connections: RwLock<HashMap<String, Arc<RtcConnection>>>,
    on_connection_state: ConnectionStateCallback,
    sweep_task: StdMutex<Option<JoinHandle<()>>>,
}

impl RtcManager {
    pub fn new(
        own_peer_id: String,
        own_role: Role,
        signaling: Arc<SignalingClient>,
        on_connection_state: ConnectionStateCallback,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            own_peer_id,
            own_role,
            signaling,
            connections: RwLock::new(HashMap::new()),
            on_connection_state,
            sweep_task: StdMutex::new(None),
        });

        let weak = Arc::downgrade(&manager);
        let sweep = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STALE_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.sweep_stale().await;
            }
        });
        *manager.sweep_task.lock().unwrap() = Some(sweep);

        manager
    }

    /// Election from a full `peer_list` snapshot is immediate.
    pub async fn on_peer_list(self: &Arc<Self>, peers: &[PeerInfo]) {
        for peer in peers {
            self.maybe_initiate(peer.clone(), Duration::ZERO).await;
        }
    }

    /// Election from `peer_joined` is delayed to let the newly joined peer
    /// settle.
    pub async fn on_peer_joined(self: &Arc<Self>, peer: PeerInfo) {
        self.maybe_initiate(peer, JOIN_ELECTION_DELAY).await;
    }

    pub async fn on_peer_disconnected(self: &Arc<Self>, peer_id: &str) {
        self.teardown(peer_id).await;
    }

    /// Corrects the guessed role of an opportunistically-created connection
    /// once the peer registry resolves it. If the resolved role turns out to
    /// be same-role, the connection should never have been accepted in the
    /// first place, so it is torn down per the role filter in §4.4.
    pub async fn correct_role(self: &Arc<Self>, peer_id: &str, role: Role) {
        let found = self.connections.read().await.get(peer_id).cloned();
        let Some(conn) = found else {
            return;
        };
        conn.set_remote_role(role).await;
        if !is_complementary(self.own_role, role) {
            tracing::warn!(
                target = "rtc",
                %peer_id,
                "corrected role reveals same-role peer; tearing down"
            );
            self.teardown(peer_id).await;
        }
    }

    pub async fn has_connection(&self, peer_id: &str) -> bool {
        self.connections.read().await.contains_key(peer_id)
    }

    async fn maybe_initiate(self: &Arc<Self>, peer: PeerInfo, delay: Duration) {
        if peer.peer_id == self.own_peer_id {
            return;
        }
        if !is_complementary(self.own_role, peer.role) {
            return;
        }
        if self.has_connection(&peer.peer_id).await {
            return;
        }
        // The lexicographically smaller peerId is the initiator.
        if self.own_peer_id >= peer.peer_id {
            return;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if manager.has_connection(&peer.peer_id).await {
                return;
            }
            if let Err(err) = manager.create_offer_connection(peer.peer_id.clone(), peer.role).await {
                tracing::warn!(
                    target = "rtc",
                    peer_id = %peer.peer_id,
                    %err,
                    "failed to create offer connection"
                );
            }
        });
    }

    async fn create_offer_connection(
        self: &Arc<Self>,
        peer_id: String,
        remote_role: Role,
    ) -> Result<(), TransportError> {
        let api = build_api()?;
        let pc = Arc::new(api.new_peer_connection(rtc_configuration()).await?);
        let conn = RtcConnection::new(peer_id.clone(), remote_role, pc.clone());

        register_peer_connection_handlers(self.clone(), conn.clone());

        let dc_init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = pc.create_data_channel(DATA_CHANNEL_LABEL, Some(dc_init)).await?;
        conn.set_data_channel(dc.clone()).await;
        register_data_channel_handlers(self.clone(), conn.clone(), dc);

        self.connections.write().await.insert(peer_id.clone(), conn.clone());

        let offer = pc.create_offer(None).await?;
        pc.set_local_description(offer).await?;
        wait_for_local_description(&pc).await?;
        conn.set_state(ConnectionState::Negotiating).await;

        let local_desc = pc
            .local_description()
            .await
            .ok_or_else(|| TransportError::Sdp("missing local description".into()))?;
        self.signaling.send(SignalingMessage::WebrtcOffer {
            target_peer_id: Some(peer_id),
            from_peer_id: None,
            offer: wire_from_description(&local_desc),
        });

        Ok(())
    }

    /// Incoming-offer path. If no connection exists for the offering peer,
    /// one is created opportunistically with `known_role` if the peer
    /// registry has already resolved it, falling back to a guessed `reader`
    /// role otherwise. An offer from a peer already known to be same-role is
    /// ignored outright per the role filter in §4.4; a guess that is later
    /// corrected to same-role is handled by [`RtcManager::correct_role`].
    pub async fn handle_remote_offer(
        self: &Arc<Self>,
        from_peer_id: String,
        offer: SessionDescriptionWire,
        known_role: Option<Role>,
    ) -> Result<(), TransportError> {
        if let Some(role) = known_role {
            if !is_complementary(self.own_role, role) {
                tracing::debug!(
                    target = "rtc",
                    peer_id = %from_peer_id,
                    "ignoring offer from same-role peer"
                );
                return Ok(());
            }
        }

        let existing = self.connections.read().await.get(&from_peer_id).cloned();
        let conn = match existing {
            Some(conn) => conn,
            None => {
                let api = build_api()?;
                let pc = Arc::new(api.new_peer_connection(rtc_configuration()).await?);
                let remote_role = known_role.unwrap_or(Role::Reader);
                let conn = RtcConnection::new(from_peer_id.clone(), remote_role, pc.clone());
                register_peer_connection_handlers(self.clone(), conn.clone());

                let manager = self.clone();
                let conn_for_dc = conn.clone();
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let manager = manager.clone();
                    let conn = conn_for_dc.clone();
                    Box::pin(async move {
                        conn.set_data_channel(dc.clone()).await;
                        register_data_channel_handlers(manager, conn, dc);
                    })
                }));

                self.connections
                    .write()
                    .await
                    .insert(from_peer_id.clone(), conn.clone());
                conn
            }
        };

        let desc = session_description_from_wire(offer)?;
        conn.peer_connection.set_remote_description(desc).await?;
        conn.mark_remote_description_set().await;
        self.flush_pending_ice(&conn).await;

        let answer = conn.peer_connection.create_answer(None).await?;
        conn.peer_connection.set_local_description(answer).await?;
        wait_for_local_description(&conn.peer_connection).await?;
        conn.set_state(ConnectionState::Negotiating).await;

        let local_desc = conn
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| TransportError::Sdp("missing local description".into()))?;
        self.signaling.send(SignalingMessage::WebrtcAnswer {
            target_peer_id: Some(from_peer_id),
            from_peer_id: None,
            answer: wire_from_description(&local_desc),
        });

        Ok(())
    }

    pub async fn handle_remote_answer(
        self: &Arc<Self>,
        from_peer_id: String,
        answer: SessionDescriptionWire,
    ) -> Result<(), TransportError> {
        let Some(conn) = self.connections.read().await.get(&from_peer_id).cloned() else {
            return Ok(());
        };
        let desc = session_description_from_wire(answer)?;
        conn.peer_connection.set_remote_description(desc).await?;
        conn.mark_remote_description_set().await;
        self.flush_pending_ice(&conn).await;
        Ok(())
    }

    pub async fn handle_remote_ice_candidate(
        self: &Arc<Self>,
        from_peer_id: String,
        candidate: IceCandidateWire,
    ) -> Result<(), TransportError> {
        let Some(conn) = self.connections.read().await.get(&from_peer_id).cloned() else {
            return Ok(());
        };
        let init = webrtc::ice_transport::ice_candidate::RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        if conn.remote_description_is_set().await {
            conn.peer_connection.add_ice_candidate(init).await?;
        } else {
            conn.pending_ice.lock().await.push(init);
        }
        Ok(())
    }

    async fn flush_pending_ice(&self, conn: &Arc<RtcConnection>) {
        let pending: Vec<_> = conn.pending_ice.lock().await.drain(..).collect();
        for init in pending {
            if let Err(err) = conn.peer_connection.add_ice_candidate(init).await {
                tracing::warn!(target = "rtc", peer_id = %conn.peer_id, %err, "failed to apply buffered ice candidate");
            }
        }
    }

    /// Sends `payload` to a single peer's data channel, used for replaying
    /// the retention buffer to a single newly-opened reader connection.
    /// Returns `false` if the peer has no open channel.
    pub async fn send_to_peer(&self, peer_id: &str, payload: &[u8]) -> bool {
        let Some(conn) = self.connections.read().await.get(peer_id).cloned() else {
            return false;
        };
        if !conn.is_open().await {
            return false;
        }
        let Some(dc) = conn.data_channel().await else {
            return false;
        };
        match dc.send(&Bytes::copy_from_slice(payload)).await {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(target = "rtc", %peer_id, %err, "replay send failed");
                false
            }
        }
    }

    /// Broadcasts `payload` to every currently-open connection whose remote
    /// role is `reader`. Per-channel failures are logged but do not remove
    /// the connection; teardown is driven by signaling or state
    /// transitions, not send failure. Returns the number of channels the
    /// send was submitted to successfully.
    pub async fn send_to_reader_channels(&self, payload: &[u8]) -> usize {
        let snapshot: Vec<Arc<RtcConnection>> = {
            let conns = self.connections.read().await;
            conns.values().cloned().collect()
        };

        let mut sent = 0usize;
        for conn in snapshot {
            if !matches!(conn.remote_role().await, Role::Reader) {
                continue;
            }
            if !conn.is_open().await {
                continue;
            }
            let Some(dc) = conn.data_channel().await else {
                continue;
            };
            match dc.send(&Bytes::copy_from_slice(payload)).await {
                Ok(_) => sent += 1,
                Err(err) => {
                    tracing::warn!(target = "rtc", peer_id = %conn.peer_id, %err, "data channel send failed");
                }
            }
        }
        sent
    }

    async fn teardown(self: &Arc<Self>, peer_id: &str) {
        let removed = self.connections.write().await.remove(peer_id);
        if let Some(conn) = removed {
            conn.close().await;
            (self.on_connection_state)(peer_id.to_string(), false);
        }
    }

    async fn sweep_stale(self: &Arc<Self>) {
        let stale: Vec<String> = {
            let conns = self.connections.read().await;
            conns
                .iter()
                .filter(|(_, conn)| {
                    matches!(
                        conn.peer_connection.connection_state(),
                        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                    )
                })
                .map(|(id, _)| id.clone())
                .collect()
        };
        for peer_id in stale {
            tracing::debug!(target = "rtc", %peer_id, "stale-sweep teardown");
            self.teardown(&peer_id).await;
        }
    }

    /// Stops the stale-sweep timer and closes every connection, best-effort.
    pub async fn shutdown(self: &Arc<Self>) {
        if let Some(task) = self.sweep_task.lock().unwrap().take() {
            task.abort();
        }
        let mut conns = self.connections.write().await;
        for conn in conns.values() {
            conn.close().await;
        }
        conns.clear();
    }
}

fn build_api() -> Result<API, TransportError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    Ok(APIBuilder::new()
        .with_setting_engine(SettingEngine::default())
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

async fn wait_for_local_description(pc: &Arc<RTCPeerConnection>) -> Result<(), TransportError> {
    if pc.local_description().await.is_some() {
        return Ok(());
    }
    let mut gather = pc.gathering_complete_promise().await;
    let _ = gather.recv().await;
    if pc.local_description().await.is_some() {
        Ok(())
    } else {
        Err(TransportError::Sdp("failed to gather local description".into()))
    }
}

fn wire_from_description(desc: &RTCSessionDescription) -> SessionDescriptionWire {
    SessionDescriptionWire {
        sdp_type: desc.sdp_type.to_string(),
        sdp: desc.sdp.clone(),
    }
}

fn session_description_from_wire(
    wire: SessionDescriptionWire,
) -> Result<RTCSessionDescription, TransportError> {
    match wire.sdp_type.as_str() {
        "offer" => RTCSessionDescription::offer(wire.sdp).map_err(|e| TransportError::Sdp(e.to_string())),
        "answer" => {
            RTCSessionDescription::answer(wire.sdp).map_err(|e| TransportError::Sdp(e.to_string()))
        }
        "pranswer" => {
            RTCSessionDescription::pranswer(wire.sdp).map_err(|e| TransportError::Sdp(e.to_string()))
        }
        other => Err(TransportError::Sdp(format!("unsupported sdp type {other}"))),
    }
}

fn register_peer_connection_handlers(manager: Arc<RtcManager>, conn: Arc<RtcConnection>) {
    let signaling = manager.signaling.clone();
    let ice_peer_id = conn.peer_id.clone();
    conn.peer_connection.on_ice_candidate(Box::new(move |candidate| {
        let signaling = signaling.clone();
        let peer_id = ice_peer_id.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                return;
            };
            let Ok(init) = candidate.to_json() else {
                return;
            };
            signaling.send(SignalingMessage::WebrtcIceCandidate {
                target_peer_id: Some(peer_id),
                from_peer_id: None,
                candidate: IceCandidateWire {
                    candidate: init.candidate,
                    sdp_mline_index: init.sdp_mline_index,
                    sdp_mid: init.sdp_mid,
                },
            });
        })
    }));

    let state_manager = manager.clone();
    let state_peer_id = conn.peer_id.clone();
    conn.peer_connection
        .on_peer_connection_state_change(Box::new(move |state| {
            let manager = state_manager.clone();
            let peer_id = state_peer_id.clone();
            Box::pin(async move {
                tracing::debug!(target = "rtc", %peer_id, ?state, "peer connection state changed");
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    manager.teardown(&peer_id).await;
                }
            })
        }));
}

/// Open is entered here (or by the peer-connection transitioning to
/// `connected`, tracked separately); the connection-state observer only
/// fires from here to avoid a duplicate notification for the same peer.
fn register_data_channel_handlers(
    manager: Arc<RtcManager>,
    conn: Arc<RtcConnection>,
    dc: Arc<RTCDataChannel>,
) {
    let open_conn = conn.clone();
    let open_manager = manager.clone();
    dc.on_open(Box::new(move || {
        let conn = open_conn.clone();
        let manager = open_manager.clone();
        Box::pin(async move {
            conn.set_state(ConnectionState::Open).await;
            tracing::info!(target = "rtc", peer_id = %conn.peer_id, "data channel open");
            (manager.on_connection_state)(conn.peer_id.clone(), true);
        })
    }));

    let close_manager = manager.clone();
    let close_peer_id = conn.peer_id.clone();
    dc.on_close(Box::new(move || {
        let manager = close_manager.clone();
        let peer_id = close_peer_id.clone();
        Box::pin(async move { manager.teardown(&peer_id).await })
    }));

    let error_peer_id = conn.peer_id.clone();
    dc.on_error(Box::new(move |err| {
        let peer_id = error_peer_id.clone();
        Box::pin(async move {
            tracing::warn!(target = "rtc", %peer_id, %err, "data channel error");
        })
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiator_election_is_antisymmetric() {
        let a = "aaa".to_string();
        let b = "bbb".to_string();
        assert!(a < b);
        assert!(!(b < a));
    }
}
