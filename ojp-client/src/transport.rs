//! A single RPC connection to one proxy endpoint (§5 suspension point iii).
//!
//! Grounded on the donor's `Connection` (TCP socket + codec + sequence
//! numbers), retargeted from the donor's ad hoc `Request`/`Response` to
//! `ojp_proto`'s wire envelope types.

use ojp_proto::{Message, MessageCodec, MessageType, OjpError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// One TCP connection to a proxy node, carrying the bincode+CRC32 frame
/// codec and a monotonically advancing sequence number.
pub struct Transport {
    socket: TcpStream,
    codec: MessageCodec,
    sequence_number: AtomicU64,
}

impl Transport {
    pub async fn connect(addr: &str, connect_timeout_ms: u64) -> Result<Self, OjpError> {
        let socket = timeout(Duration::from_millis(connect_timeout_ms), TcpStream::connect(addr))
            .await
            .map_err(|_| OjpError::TransportUnavailable {
                endpoint: addr.to_string(),
                details: "connect timed out".to_string(),
            })?
            .map_err(|e| OjpError::TransportUnavailable {
                endpoint: addr.to_string(),
                details: e.to_string(),
            })?;

        socket.set_nodelay(true).map_err(|e| OjpError::TransportUnavailable {
            endpoint: addr.to_string(),
            details: format!("failed to set TCP_NODELAY: {e}"),
        })?;

        Ok(Self {
            socket,
            codec: MessageCodec::new(),
            sequence_number: AtomicU64::new(0),
        })
    }

    fn next_sequence_number(&self) -> u64 {
        self.sequence_number.fetch_add(1, Ordering::SeqCst)
    }

    /// Sends a request and waits for its response, both framed as `Message`.
    pub async fn send_request(
        &mut self,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> Result<Message, OjpError> {
        let seq = self.next_sequence_number();
        let timestamp = chrono::Utc::now().timestamp_millis();
        let request = Message::new(seq, timestamp, message_type, payload);
        self.codec.write_message(&mut self.socket, &request).await?;
        self.codec.read_message(&mut self.socket).await
    }

    /// Reads one further frame on a connection already mid-stream (e.g. the
    /// row chunks following `executeQuery`'s column-header frame), without
    /// writing a new request.
    pub async fn read_next_frame(&mut self) -> Result<Message, OjpError> {
        self.codec.read_message(&mut self.socket).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_closed_port_fails_as_transport_unavailable() {
        // Port 0 never accepts; the OS refuses immediately.
        let result = Transport::connect("127.0.0.1:0", 500).await;
        assert!(matches!(result, Err(OjpError::TransportUnavailable { .. })));
    }
}
