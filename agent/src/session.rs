//! One live relay connection
//!
//! A session reads frames one at a time and handles each before reading
//! the next. Responses therefore go out in the order their requests
//! arrived, and a slow local call holds up everything behind it.

use anyhow::{bail, Context, Result};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use relay_agent_shared::{Envelope, MessageType};
use std::time::Duration;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info};

use crate::forwarder::Forwarder;
use crate::keepalive;

/// How long a read may sit idle before the deadline is pushed back
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-session counters, logged when the session ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub requests: u64,
    pub pings: u64,
    pub transport_pings: u64,
    pub idle_polls: u64,
    pub ignored: u64,
}

pub struct Session<S> {
    ws: S,
    forwarder: Forwarder,
    idle_timeout: Duration,
    stats: SessionStats,
}

impl<S> Session<S>
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    pub fn new(ws: S, forwarder: Forwarder, idle_timeout: Duration) -> Self {
        Self {
            ws,
            forwarder,
            idle_timeout,
            stats: SessionStats::default(),
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Hand the connection back, e.g. to close it.
    pub fn into_inner(self) -> S {
        self.ws
    }

    /// Run the read/dispatch loop until the connection ends.
    ///
    /// Returns `Ok` when the relay closed the connection with a close
    /// frame and `Err` on any other read or write failure. Idle periods
    /// never end the session.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let message = match tokio::time::timeout(self.idle_timeout, self.ws.next()).await {
                Err(_) => {
                    self.stats.idle_polls += 1;
                    debug!("No frame for {:?}, extending read deadline", self.idle_timeout);
                    continue;
                }
                Ok(None) => bail!("Connection closed by relay"),
                Ok(Some(Err(e))) => return Err(e).context("Failed to read from relay"),
                Ok(Some(Ok(message))) => message,
            };

            let payload = match message {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(data) => data,
                Message::Ping(data) => {
                    self.stats.transport_pings += 1;
                    keepalive::answer_transport_ping(&mut self.ws, data).await;
                    continue;
                }
                Message::Close(frame) => {
                    info!("Relay closed the connection: {:?}", frame);
                    return Ok(());
                }
                Message::Pong(_) | Message::Frame(_) => continue,
            };

            self.dispatch(&payload).await?;
        }
    }

    async fn dispatch(&mut self, payload: &[u8]) -> Result<()> {
        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.ignored += 1;
                debug!(error = %e, "Ignoring undecodable frame");
                return Ok(());
            }
        };

        match envelope.kind {
            MessageType::Ping => {
                self.stats.pings += 1;
                keepalive::answer_ping(&mut self.ws, &envelope)
                    .await
                    .context("Failed to answer ping")?;
            }
            MessageType::Request => {
                self.stats.requests += 1;
                let response = self.forwarder.forward(&envelope).await;
                send_envelope(&mut self.ws, &response)
                    .await
                    .context("Failed to write response")?;
            }
            other => {
                self.stats.ignored += 1;
                debug!(kind = other.as_str(), req_id = %envelope.req_id, "Ignoring unexpected frame");
            }
        }

        Ok(())
    }
}

/// Encode an envelope and write it as one text frame.
pub(crate) async fn send_envelope<S>(sink: &mut S, envelope: &Envelope) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let text = envelope.encode_text()?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}
