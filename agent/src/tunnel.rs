//! WebSocket tunnel to the relay

use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::config::AgentConfig;
use crate::forwarder::Forwarder;
use crate::manager::Tunnel;
use crate::session::Session;

/// Header carrying the relay token on the WebSocket handshake
pub const AUTH_HEADER: &str = "relay-authorization";

/// Upper bound on TCP connect plus the WebSocket upgrade
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(45);

/// `bearer <token>`, as sent in [`AUTH_HEADER`].
pub fn auth_value(token: &str) -> std::result::Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!("bearer {}", token))
}

pub type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials the relay and runs one [`Session`] per connection.
pub struct RelayTunnel {
    dial_url: Url,
    token: String,
    access_url: String,
    forwarder: Forwarder,
    idle_timeout: Duration,
    handshake_timeout: Duration,
}

impl RelayTunnel {
    pub fn new(config: &AgentConfig, forwarder: Forwarder) -> Result<Self> {
        Ok(Self {
            dial_url: config.endpoint.dial_url(&config.app_id)?,
            token: config.token.clone(),
            access_url: config.access_url(),
            forwarder,
            idle_timeout: config.idle_timeout,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        })
    }

    pub fn dial_url(&self) -> &Url {
        &self.dial_url
    }

    /// Handshake request with the bearer token attached.
    fn connect_request(&self) -> Result<Request> {
        let mut request = self
            .dial_url
            .as_str()
            .into_client_request()
            .context("Failed to build relay handshake request")?;

        if !self.token.is_empty() {
            let value = auth_value(&self.token)
                .context("Relay token is not a valid header value")?;
            request
                .headers_mut()
                .insert(HeaderName::from_static(AUTH_HEADER), value);
        }

        Ok(request)
    }
}

impl Tunnel for RelayTunnel {
    type Conn = RelayStream;

    async fn dial(&mut self) -> Result<RelayStream> {
        debug!(relay = %self.dial_url, "Dialing relay");
        let request = self.connect_request()?;
        let (ws, _) = tokio::time::timeout(self.handshake_timeout, connect_async(request))
            .await
            .map_err(|_| {
                anyhow!(
                    "Handshake with relay {} timed out after {:?}",
                    self.dial_url,
                    self.handshake_timeout
                )
            })?
            .with_context(|| format!("Failed to connect to relay {}", self.dial_url))?;
        info!(relay = %self.dial_url, "Dialed relay");
        Ok(ws)
    }

    async fn serve(&mut self, conn: RelayStream) -> Result<()> {
        let mut session = Session::new(conn, self.forwarder.clone(), self.idle_timeout);
        let result = session.run().await;

        let stats = session.stats().clone();
        info!(
            requests = stats.requests,
            pings = stats.pings,
            transport_pings = stats.transport_pings,
            idle_polls = stats.idle_polls,
            ignored = stats.ignored,
            "Session finished"
        );

        let mut ws = session.into_inner();
        if let Err(e) = ws.close(None).await {
            debug!(error = %e, "Error closing relay connection");
        }
        result
    }

    fn access_url(&self) -> &str {
        &self.access_url
    }
}
