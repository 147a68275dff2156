//! WebSocket lifecycle for the signaling control plane: connect, encode
//! outbound frames, decode and dispatch inbound ones, track reconnection
//! accounting. The auth handshake itself lives in [`crate::auth`] and
//! [`crate::manager`]; this module only owns the socket.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector;
use url::Url;

use crate::connection::ConnectionInfo;
use crate::error::SignalingError;
use crate::signaling::messages::SignalingMessage;

/// Fixed reconnection-attempt ceiling. The client tracks attempts but never
/// performs automatic reconnection itself; losing the socket triggers full
/// cleanup in the manager.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Builds the signaling URL `wss://<host>/<publicToken?>` from a parsed
/// connection string.
pub fn signaling_url(info: &ConnectionInfo) -> Result<Url, SignalingError> {
    let path = info.public_token.as_deref().unwrap_or("");
    let raw = format!("wss://{}/{path}", info.host);
    Url::parse(&raw).map_err(|err| SignalingError::Connect(err.to_string()))
}

fn is_loopback_host(host: &str) -> bool {
    let bare = host.split(':').next().unwrap_or(host);
    bare == "localhost" || bare == "127.0.0.1" || bare == "::1"
}

pub struct SignalingClient {
    send_tx: mpsc::UnboundedSender<SignalingMessage>,
    is_open: Arc<AtomicBool>,
    attempts: AtomicU32,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SignalingClient {
    /// Opens the websocket and spawns the reader/writer tasks. Returns the
    /// client plus a receiver of decoded inbound frames.
    pub async fn connect(
        url: &Url,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SignalingMessage>), SignalingError> {
        let connector = if is_loopback_host(url.host_str().unwrap_or_default()) {
            let tls = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .build()
                .map_err(|err| SignalingError::Connect(err.to_string()))?;
            Some(Connector::NativeTls(tls))
        } else {
            None
        };

        let (ws_stream, _) =
            tokio_tungstenite::connect_async_tls_with_config(url.as_str(), None, false, connector)
                .await
                .map_err(|err| SignalingError::Connect(err.to_string()))?;
        tracing::debug!(target = "signaling", url = %url, "signaling websocket connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<SignalingMessage>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<SignalingMessage>();

        let is_open = Arc::new(AtomicBool::new(true));

        let writer_handle = tokio::spawn(async move {
            while let Some(message) = send_rx.recv().await {
                match serde_json::to_string(&message) {
                    Ok(text) => {
                        if ws_write.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(target = "signaling", %err, "failed to encode outbound frame");
                    }
                }
            }
        });

        let reader_open = is_open.clone();
        let reader_handle = tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<SignalingMessage>(&text) {
                            Ok(decoded) => {
                                if inbound_tx.send(decoded).is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(target = "signaling", %err, "failed to decode inbound frame");
                            }
                        }
                    }
                    Ok(Message::Binary(data)) => {
                        if let Ok(text) = String::from_utf8(data) {
                            if let Ok(decoded) = serde_json::from_str::<SignalingMessage>(&text) {
                                if inbound_tx.send(decoded).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        tracing::debug!(target = "signaling", %err, "signaling websocket closed");
                        break;
                    }
                }
            }
            reader_open.store(false, Ordering::SeqCst);
        });

        Ok((
            Arc::new(SignalingClient {
                send_tx,
                is_open,
                attempts: AtomicU32::new(0),
                tasks: Mutex::new(vec![writer_handle, reader_handle]),
            }),
            inbound_rx,
        ))
    }

    /// Enqueues `message` for transmission. Drops silently when the socket
    /// is not open.
    pub fn send(&self, message: SignalingMessage) {
        if !self.is_open.load(Ordering::SeqCst) {
            tracing::debug!(target = "signaling", "dropped outbound frame: socket not open");
            return;
        }
        let _ = self.send_tx.send(message);
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Records a reconnection attempt, capped informationally at
    /// [`MAX_RECONNECT_ATTEMPTS`]; the caller decides whether to give up.
    pub fn record_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Closes the socket and aborts the reader/writer tasks. Idempotent.
    pub fn close(&self) {
        self.is_open.store(false, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Role;

    #[test]
    fn loopback_detection() {
        assert!(is_loopback_host("localhost"));
        assert!(is_loopback_host("127.0.0.1:4000"));
        assert!(!is_loopback_host("session.example.com"));
    }

    #[test]
    fn signaling_url_includes_public_token() {
        let info = ConnectionInfo::parse("openpull://appender:ab@example.com:9000/tok123").unwrap();
        let url = signaling_url(&info).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("example.com"));
        assert_eq!(url.port(), Some(9000));
        assert_eq!(url.path(), "/tok123");
    }

    #[test]
    fn signaling_url_without_public_token() {
        let info = ConnectionInfo::parse("openpull://reader:ab@example.com").unwrap();
        let url = signaling_url(&info).unwrap();
        assert_eq!(url.path(), "/");
        let _ = Role::Reader;
    }
}
