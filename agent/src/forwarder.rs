//! Local proxy for forwarding tunnelled requests
//!
//! Turns a `request` envelope into a real HTTP call against the local
//! service and wraps whatever comes back into a `response` envelope.
//! Failures never escape: they become a 502 response so the tunnel
//! itself survives a bad or unreachable local request.

use anyhow::{anyhow, Context, Result};
use relay_agent_shared::{Envelope, Headers};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use reqwest::{redirect, Client, Method, Url};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::endpoint::{canonical_header_name, target_url};

/// Total time budget for one local round trip
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the failure description on synthesized 502s
pub const ERROR_HEADER: &str = "X-Agent-Error";

/// Body of synthesized 502s
pub const ERROR_BODY: &[u8] = b"agent request error";

const BAD_GATEWAY: u16 = 502;

/// Forwards envelopes to one local base URL.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    base: Url,
}

impl Forwarder {
    pub fn new(base: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .redirect(redirect::Policy::none())
            .build()
            .context("Failed to build local HTTP client")?;

        Ok(Self { client, base })
    }

    /// Forward one request envelope and return its response envelope.
    pub async fn forward(&self, request: &Envelope) -> Envelope {
        let start = Instant::now();
        match self.try_forward(request).await {
            Ok(response) => {
                info!(
                    req_id = %request.req_id,
                    status = response.status,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "{} {}",
                    request.method,
                    request.path
                );
                response
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(
                    req_id = %request.req_id,
                    error = %reason,
                    "{} {} failed",
                    request.method,
                    request.path
                );
                error_response(request, &reason)
            }
        }
    }

    async fn try_forward(&self, request: &Envelope) -> Result<Envelope> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| anyhow!("invalid method {:?}", request.method))?;
        let url = target_url(&self.base, &request.path);
        debug!(req_id = %request.req_id, %url, "Forwarding to local target");

        let mut builder = self
            .client
            .request(method, url)
            .headers(outgoing_headers(&request.headers));
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = incoming_headers(response.headers());
        let body = response
            .bytes()
            .await
            .context("failed to read local response body")?;

        let mut envelope = Envelope::response_to(request, status);
        envelope.headers = headers;
        envelope.body = body.to_vec();
        Ok(envelope)
    }
}

/// 502 envelope describing why the local call failed.
pub fn error_response(request: &Envelope, reason: &str) -> Envelope {
    let mut envelope = Envelope::response_to(request, BAD_GATEWAY);
    envelope.add_header(ERROR_HEADER, reason);
    envelope.body = ERROR_BODY.to_vec();
    envelope
}

/// Copy envelope headers onto the outgoing request, appending repeats.
/// Framing headers are left to the HTTP client.
fn outgoing_headers(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, values) in headers {
        let header = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(header) => header,
            Err(_) => {
                debug!(header = %name, "Skipping invalid header name");
                continue;
            }
        };
        if header == HOST || header == CONTENT_LENGTH || header == TRANSFER_ENCODING {
            continue;
        }

        for value in values {
            match HeaderValue::from_bytes(value.as_bytes()) {
                Ok(value) => {
                    map.append(header.clone(), value);
                }
                Err(_) => debug!(header = %name, "Skipping invalid header value"),
            }
        }
    }
    map
}

fn incoming_headers(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        headers
            .entry(canonical_header_name(name.as_str()))
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    headers
}
