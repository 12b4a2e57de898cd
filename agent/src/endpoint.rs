//! Relay endpoint and URL helpers
//!
//! Derives the WebSocket dial URL and the operator-facing access URL from
//! the configured relay server, and builds local target URLs for
//! forwarded requests.

use relay_agent_shared::{Error, Result};
use reqwest::Url;

/// Path the agent dials on the relay
pub const RELAY_PATH: &str = "/platform/plugin_relay/app";

/// Path prefix the relay serves tunnelled traffic under
pub const DISPATCH_PATH: &str = "/platform/plugin_relay/app_dispatch";

/// The configured relay server, reduced to scheme and authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoint {
    scheme: String,
    host: String,
}

impl RelayEndpoint {
    /// Parse `http://host[:port]`, `https://host` or a bare `host[:port]`.
    /// A bare host is treated as https.
    pub fn parse(server: &str) -> Result<Self> {
        let server = server.trim();
        let with_scheme = if server.contains("://") {
            server.to_string()
        } else {
            format!("https://{}", server)
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| Error::Config(format!("invalid server address '{}': {}", server, e)))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::Config(format!("server address '{}' has no host", server)))?;

        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
        })
    }

    /// `ws` only when the server was declared as plain `http`.
    pub fn ws_scheme(&self) -> &'static str {
        if self.scheme == "http" {
            "ws"
        } else {
            "wss"
        }
    }

    pub fn dial_url(&self, app_id: &str) -> Result<Url> {
        let base = format!("{}://{}{}", self.ws_scheme(), self.host, RELAY_PATH);
        Url::parse_with_params(&base, &[("app_id", app_id)])
            .map_err(|e| Error::Config(format!("invalid relay url '{}': {}", base, e)))
    }

    pub fn access_url(&self, app_id: &str) -> String {
        format!("{}://{}{}/{}", self.scheme, self.host, DISPATCH_PATH, app_id)
    }
}

/// Base URL of the local service on loopback.
pub fn local_target(port: u16) -> Result<Url> {
    Url::parse(&format!("http://127.0.0.1:{}", port))
        .map_err(|e| Error::Config(format!("invalid target port {}: {}", port, e)))
}

/// Join two path segments with exactly one slash between them.
pub fn join_path(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Resolve a forwarded request path (optionally carrying `?query`)
/// against the local base URL.
pub fn target_url(base: &Url, path: &str) -> Url {
    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };

    let mut url = base.clone();
    url.set_path(&join_path(base.path(), path));
    url.set_query(query);
    url
}

/// MIME canonical header form: `content-type` → `Content-Type`.
/// Names containing non-token bytes are returned unchanged.
pub fn canonical_header_name(name: &str) -> String {
    if !name.bytes().all(is_token_byte) {
        return name.to_string();
    }

    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_url_mirrors_scheme() {
        let http = RelayEndpoint::parse("http://relay.local:8080").unwrap();
        assert_eq!(
            http.dial_url("app_1").unwrap().as_str(),
            "ws://relay.local:8080/platform/plugin_relay/app?app_id=app_1"
        );

        let https = RelayEndpoint::parse("https://relay.example.com").unwrap();
        assert_eq!(
            https.dial_url("app_1").unwrap().as_str(),
            "wss://relay.example.com/platform/plugin_relay/app?app_id=app_1"
        );
    }

    #[test]
    fn test_bare_host_defaults_to_https() {
        let ep = RelayEndpoint::parse("p8205-k3s-9.k3s-dev.example.net").unwrap();
        assert_eq!(ep.ws_scheme(), "wss");
        assert_eq!(
            ep.access_url("a"),
            "https://p8205-k3s-9.k3s-dev.example.net/platform/plugin_relay/app_dispatch/a"
        );

        let ep = RelayEndpoint::parse("relay.local:9000").unwrap();
        assert_eq!(
            ep.dial_url("a").unwrap().as_str(),
            "wss://relay.local:9000/platform/plugin_relay/app?app_id=a"
        );
    }

    #[test]
    fn test_access_url() {
        let ep = RelayEndpoint::parse("http://relay.local").unwrap();
        assert_eq!(
            ep.access_url("app_F63GRnbJR6xINLyK"),
            "http://relay.local/platform/plugin_relay/app_dispatch/app_F63GRnbJR6xINLyK"
        );
    }

    #[test]
    fn test_parse_rejects_missing_host() {
        assert!(matches!(RelayEndpoint::parse(""), Err(Error::Config(_))));
        assert!(matches!(RelayEndpoint::parse("http://"), Err(Error::Config(_))));
    }

    #[test]
    fn test_join_path() {
        for base in ["/bar", "/bar/"] {
            for path in ["/foo", "foo"] {
                assert_eq!(join_path(base, path), "/bar/foo", "{} + {}", base, path);
            }
        }
        assert_eq!(join_path("", "/foo"), "/foo");
        assert_eq!(join_path("/", "foo"), "/foo");
        assert_eq!(join_path("/bar", ""), "/bar/");
    }

    #[test]
    fn test_target_url() {
        let base = local_target(8082).unwrap();
        assert_eq!(target_url(&base, "/api/v1").as_str(), "http://127.0.0.1:8082/api/v1");
        assert_eq!(
            target_url(&base, "/search?q=a&n=2").as_str(),
            "http://127.0.0.1:8082/search?q=a&n=2"
        );

        let nested = Url::parse("http://127.0.0.1:8082/bar/").unwrap();
        assert_eq!(target_url(&nested, "/foo").as_str(), "http://127.0.0.1:8082/bar/foo");
    }

    #[test]
    fn test_canonical_header_name() {
        assert_eq!(canonical_header_name("content-type"), "Content-Type");
        assert_eq!(canonical_header_name("x-foo"), "X-Foo");
        assert_eq!(canonical_header_name("WWW-AUTHENTICATE"), "Www-Authenticate");
        assert_eq!(canonical_header_name("bad header"), "bad header");
    }
}
