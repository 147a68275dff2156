//! Per-peer state machine: `Pending -> Negotiating -> Open -> Closed`.

use std::sync::Arc;

use tokio::sync::{Mutex as AsyncMutex, RwLock};
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::RTCPeerConnection;

use crate::connection::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Negotiating,
    Open,
    Closed,
}

/// Owned exclusively by the RTC manager; never shared across peers.
pub struct RtcConnection {
    pub peer_id: String,
    pub peer_connection: Arc<RTCPeerConnection>,
    remote_role: RwLock<Role>,
    data_channel: RwLock<Option<Arc<RTCDataChannel>>>,
    state: RwLock<ConnectionState>,
    remote_description_set: RwLock<bool>,
    pub pending_ice: AsyncMutex<Vec<RTCIceCandidateInit>>,
}

impl RtcConnection {
    pub fn new(peer_id: String, remote_role: Role, peer_connection: Arc<RTCPeerConnection>) -> Arc<Self> {
        Arc::new(Self {
            peer_id,
            peer_connection,
            remote_role: RwLock::new(remote_role),
            data_channel: RwLock::new(None),
            state: RwLock::new(ConnectionState::Pending),
            remote_description_set: RwLock::new(false),
            pending_ice: AsyncMutex::new(Vec::new()),
        })
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    pub async fn is_open(&self) -> bool {
        self.state().await == ConnectionState::Open
    }

    pub async fn remote_role(&self) -> Role {
        *self.remote_role.read().await
    }

    /// Corrects the role guessed at opportunistic-connection time once the
    /// peer registry resolves it.
    pub async fn set_remote_role(&self, role: Role) {
        *self.remote_role.write().await = role;
    }

    pub async fn set_data_channel(&self, dc: Arc<RTCDataChannel>) {
        *self.data_channel.write().await = Some(dc);
    }

    pub async fn data_channel(&self) -> Option<Arc<RTCDataChannel>> {
        self.data_channel.read().await.clone()
    }

    pub async fn mark_remote_description_set(&self) {
        *self.remote_description_set.write().await = true;
    }

    pub async fn remote_description_is_set(&self) -> bool {
        *self.remote_description_set.read().await
    }

    /// Closes the data channel and peer connection, suppressing errors, and
    /// moves the state machine to its terminal state. Idempotent.
    pub async fn close(&self) {
        if self.state().await == ConnectionState::Closed {
            return;
        }
        if let Some(dc) = self.data_channel().await {
            let _ = dc.close().await;
        }
        let _ = self.peer_connection.close().await;
        self.set_state(ConnectionState::Closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::api::APIBuilder;
    use webrtc::peer_connection::configuration::RTCConfiguration;

    #[tokio::test]
    async fn starts_pending_and_tracks_role_correction() {
        let api = APIBuilder::new().build();
        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration::default())
                .await
                .unwrap(),
        );
        let conn = RtcConnection::new("peer-a".into(), Role::Reader, pc);
        assert_eq!(conn.state().await, ConnectionState::Pending);
        assert!(matches!(conn.remote_role().await, Role::Reader));

        conn.set_remote_role(Role::Appender).await;
        assert!(matches!(conn.remote_role().await, Role::Appender));

        conn.set_state(ConnectionState::Open).await;
        assert!(conn.is_open().await);

        conn.close().await;
        assert_eq!(conn.state().await, ConnectionState::Closed);
        conn.close().await; // idempotent
    }
}
