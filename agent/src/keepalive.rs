//! Liveness handling for the relay connection.
//!
//! Two layers exist: envelope-level `ping`/`pong` frames, and WebSocket
//! control pings. Neither keeps any state beyond the connection.

use anyhow::Result;
use futures_util::{Sink, SinkExt};
use relay_agent_shared::Envelope;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::session::send_envelope;

/// Write deadline for answering a WebSocket control ping
pub const TRANSPORT_PONG_DEADLINE: Duration = Duration::from_secs(10);

/// The one envelope sent back for a `ping`.
pub fn pong_for(_ping: &Envelope) -> Envelope {
    Envelope::pong()
}

/// Answer an envelope-level ping. A write failure ends the session.
pub async fn answer_ping<S>(sink: &mut S, ping: &Envelope) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    debug!("Received ping");
    send_envelope(sink, &pong_for(ping)).await
}

/// Echo a WebSocket control ping. Failures are only logged; a dead
/// connection shows up on the next read or write.
pub async fn answer_transport_ping<S>(sink: &mut S, payload: Vec<u8>)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    match tokio::time::timeout(TRANSPORT_PONG_DEADLINE, sink.send(Message::Pong(payload))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Failed to answer transport ping"),
        Err(_) => debug!("Timed out answering transport ping"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_agent_shared::MessageType;

    #[test]
    fn test_pong_has_no_other_fields() {
        let mut ping = Envelope::ping();
        ping.app_id = "app_1".into();
        ping.req_id = "r-1".into();

        let pong = pong_for(&ping);
        assert_eq!(pong.kind, MessageType::Pong);
        assert_eq!(pong, Envelope::new(MessageType::Pong));
    }

    #[tokio::test]
    async fn test_answer_ping_writes_exactly_one_pong() {
        let (mut tx, mut rx) = futures_channel::mpsc::unbounded::<Message>();
        answer_ping(&mut tx, &Envelope::ping()).await.unwrap();
        drop(tx);

        let sent: Vec<Message> = futures_util::StreamExt::collect(&mut rx).await;
        assert_eq!(sent.len(), 1);
        let pong = Envelope::decode(&sent[0].clone().into_data()).unwrap();
        assert_eq!(pong, Envelope::pong());
    }

    #[tokio::test]
    async fn test_answer_transport_ping_echoes_payload() {
        let (mut tx, mut rx) = futures_channel::mpsc::unbounded::<Message>();
        answer_transport_ping(&mut tx, b"hb".to_vec()).await;
        drop(tx);

        let sent: Vec<Message> = futures_util::StreamExt::collect(&mut rx).await;
        assert_eq!(sent, vec![Message::Pong(b"hb".to_vec())]);
    }
}
