//! Envelope protocol spoken over the relay WebSocket.
//!
//! Every frame in either direction is a single JSON object. Fields are
//! keyed by name, empty fields are omitted, and unknown fields are
//! ignored, so newer relays can add fields without breaking older agents.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use crate::{Error, Result};

/// Status reported when a response envelope leaves `status` unset.
pub const DEFAULT_STATUS: u16 = 200;

/// Header name to every value it carries, in arrival order.
pub type Headers = HashMap<String, Vec<String>>;

/// Envelope kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Relay → agent: an HTTP request to forward
    Request,
    /// Agent → relay: the result of a forwarded request
    Response,
    /// Protocol-level liveness check
    Ping,
    /// Answer to a ping
    Pong,
    /// Any kind this agent does not understand
    #[default]
    #[serde(other)]
    Unknown,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Unknown => "unknown",
        }
    }
}

/// The single message type carried over the tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: MessageType,

    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub app_id: String,

    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub req_id: String,

    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub method: String,

    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub path: String,

    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "HashMap::is_empty")]
    pub headers: Headers,

    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "is_zero")]
    pub status: u16,

    #[serde(default, with = "body", skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<u8>,
}

impl Envelope {
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn ping() -> Self {
        Self::new(MessageType::Ping)
    }

    pub fn pong() -> Self {
        Self::new(MessageType::Pong)
    }

    /// Start a response correlated with `request`.
    pub fn response_to(request: &Envelope, status: u16) -> Self {
        Self {
            kind: MessageType::Response,
            app_id: request.app_id.clone(),
            req_id: request.req_id.clone(),
            status,
            ..Default::default()
        }
    }

    /// Effective HTTP status; zero means 200.
    pub fn status_or_default(&self) -> u16 {
        if self.status == 0 {
            DEFAULT_STATUS
        } else {
            self.status
        }
    }

    /// Append one value to a (possibly repeated) header.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.entry(name.into()).or_default().push(value.into());
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::Encode)
    }

    /// Encode for a WebSocket text frame.
    pub fn encode_text(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(Error::Decode)
    }
}

fn is_zero(status: &u16) -> bool {
    *status == 0
}

/// Treat an explicit JSON `null` like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Bodies travel as standard padded base64 strings.
mod body {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> Envelope {
        let mut env = Envelope::new(MessageType::Request);
        env.app_id = "app_F63GRnbJR6xINLyK".into();
        env.req_id = "r-1".into();
        env.method = "POST".into();
        env.path = "/api/items".into();
        env.add_header("X-Foo", "a");
        env.add_header("X-Foo", "b");
        env.add_header("Content-Type", "application/json");
        env.body = br#"{"name":"x"}"#.to_vec();
        env
    }

    #[test]
    fn test_round_trip_request() {
        let env = sample_request();
        let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(decoded.headers["X-Foo"], vec!["a", "b"]);
    }

    #[test]
    fn test_round_trip_message_shapes() {
        let mut bare_request = Envelope::new(MessageType::Request);
        bare_request.req_id = "r-2".into();
        bare_request.method = "GET".into();
        bare_request.path = "/".into();

        let mut binary = Envelope::response_to(&sample_request(), 200);
        binary.add_header("Content-Type", "application/octet-stream");
        binary.body = vec![0xff, 0x00, 0xfe, 0x80];

        let mut status_only = Envelope::new(MessageType::Response);
        status_only.status = 204;

        let cases = [
            ("ping", Envelope::ping()),
            ("pong", Envelope::pong()),
            ("request without headers", bare_request),
            ("binary body", binary),
            ("status only", status_only),
        ];

        for (name, env) in cases {
            let text = env.encode_text().unwrap();
            let decoded = Envelope::decode(text.as_bytes()).unwrap();
            assert_eq!(decoded, env, "{}: {}", name, text);
        }
    }

    #[test]
    fn test_round_trip_empty_body_response() {
        let mut env = Envelope::response_to(&sample_request(), 204);
        env.add_header("Set-Cookie", "a=1");
        env.add_header("Set-Cookie", "b=2");
        let decoded = Envelope::decode(env.encode_text().unwrap().as_bytes()).unwrap();
        assert_eq!(decoded, env);
        assert!(decoded.body.is_empty());
    }

    #[test]
    fn test_pong_encodes_type_only() {
        assert_eq!(Envelope::pong().encode_text().unwrap(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_body_is_base64() {
        let mut env = Envelope::new(MessageType::Response);
        env.body = b"hello".to_vec();
        let json: serde_json::Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        assert_eq!(json["body"], "aGVsbG8=");
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let raw = br#"{"type":"request","req_id":"7","method":"GET","path":"/","retry":true,"ts":1700000000}"#;
        let env = Envelope::decode(raw).unwrap();
        assert_eq!(env.kind, MessageType::Request);
        assert_eq!(env.req_id, "7");
        assert!(env.headers.is_empty());
        assert!(env.body.is_empty());
    }

    #[test]
    fn test_decode_null_fields() {
        let raw = br#"{"type":"request","headers":null,"body":null,"status":null}"#;
        let env = Envelope::decode(raw).unwrap();
        assert!(env.headers.is_empty());
        assert!(env.body.is_empty());
        assert_eq!(env.status, 0);
    }

    #[test]
    fn test_decode_unknown_kind() {
        let env = Envelope::decode(br#"{"type":"replay","req_id":"9"}"#).unwrap();
        assert_eq!(env.kind, MessageType::Unknown);
        let env = Envelope::decode(br#"{"req_id":"9"}"#).unwrap();
        assert_eq!(env.kind, MessageType::Unknown);
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(Envelope::decode(b"not json"), Err(Error::Decode(_))));
        assert!(matches!(
            Envelope::decode(br#"{"type":"request","body":"%%%"}"#),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_status_default() {
        let mut env = Envelope::new(MessageType::Response);
        assert_eq!(env.status_or_default(), 200);
        env.status = 404;
        assert_eq!(env.status_or_default(), 404);
    }

    #[test]
    fn test_response_to_correlates() {
        let req = sample_request();
        let resp = Envelope::response_to(&req, 502);
        assert_eq!(resp.kind, MessageType::Response);
        assert_eq!(resp.req_id, req.req_id);
        assert_eq!(resp.app_id, req.app_id);
        assert!(resp.method.is_empty() && resp.path.is_empty());
    }
}
