/**
 * Connection handshake — endpoint parsing and the HTTP/1.1 upgrade.
 *
 * The collector URL is `ws[s]://host[:port][/path]`. After the TCP (and
 * TLS, for `wss`) connect, the client sends a GET with the upgrade
 * headers, a random 16-byte key, protocol version 13, and the api key
 * as a bearer credential. The upgrade succeeded iff the status line
 * carries 101.
 */
use base64::Engine as _;

use crate::error::{AgentError, Result};

// ---------------------------------------------------------------------------
// UrlParts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
}

/**
 * Splits a collector URL into connectable parts.
 *
 * `wss`/`https` imply TLS and default port 443; `ws`/`http` default to
 * port 80. A missing path becomes `/`.
 */
pub fn parse_url(url: &str) -> Result<UrlParts> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| AgentError::TransportConnect(format!("malformed url: {url}")))?;

    let secure = match scheme {
        "wss" | "https" => true,
        "ws" | "http" => false,
        other => {
            return Err(AgentError::TransportConnect(format!(
                "unsupported scheme: {other}"
            )))
        }
    };

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], rest[idx..].to_string()),
        None => (rest, "/".to_string()),
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().map_err(|_| {
                AgentError::TransportConnect(format!("invalid port in url: {url}"))
            })?;
            (host.to_string(), port)
        }
        None => (
            authority.to_string(),
            if secure { 443 } else { 80 },
        ),
    };

    if host.is_empty() {
        return Err(AgentError::TransportConnect(format!("missing host: {url}")));
    }

    Ok(UrlParts {
        secure,
        host,
        port,
        path,
    })
}

// ---------------------------------------------------------------------------
// Upgrade request / response
// ---------------------------------------------------------------------------

/// A fresh base64 nonce for the `Sec-WebSocket-Key` header.
pub fn upgrade_key() -> String {
    let nonce: [u8; 16] = rand::random();
    base64::engine::general_purpose::STANDARD.encode(nonce)
}

pub fn upgrade_request(parts: &UrlParts, key: &str, api_key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Authorization: Bearer {api_key}\r\n\
         \r\n",
        path = parts.path,
        host = parts.host,
    )
}

/// The upgrade was accepted iff the status line carries 101.
pub fn response_accepted(response: &str) -> bool {
    response
        .lines()
        .next()
        .is_some_and(|status| status.starts_with("HTTP/1.") && status.contains("101"))
}

#[cfg(test)]
mod tests {
    use super::*;

    /**
     * Secure and plain schemes pick their default ports; explicit ports
     * and paths survive.
     */
    #[test]
    fn test_parse_url() {
        let parts = parse_url("wss://api.aivory.net/ws/monitor/agent").unwrap();
        assert!(parts.secure);
        assert_eq!(parts.host, "api.aivory.net");
        assert_eq!(parts.port, 443);
        assert_eq!(parts.path, "/ws/monitor/agent");

        let parts = parse_url("ws://localhost:9010").unwrap();
        assert!(!parts.secure);
        assert_eq!(parts.port, 9010);
        assert_eq!(parts.path, "/");
    }

    #[test]
    fn test_parse_url_rejects_garbage() {
        assert!(parse_url("not a url").is_err());
        assert!(parse_url("ftp://example.com").is_err());
        assert!(parse_url("wss://:443/x").is_err());
        assert!(parse_url("ws://host:notaport/x").is_err());
    }

    /**
     * The request carries the upgrade headers, protocol version 13, and
     * the bearer credential.
     */
    #[test]
    fn test_upgrade_request_headers() {
        let parts = parse_url("wss://api.aivory.net/ws/monitor/agent").unwrap();
        let request = upgrade_request(&parts, "S2V5S2V5S2V5S2V5S2V5Sw==", "k-123");

        assert!(request.starts_with("GET /ws/monitor/agent HTTP/1.1\r\n"));
        assert!(request.contains("Host: api.aivory.net\r\n"));
        assert!(request.contains("Upgrade: websocket\r\n"));
        assert!(request.contains("Connection: Upgrade\r\n"));
        assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(request.contains("Authorization: Bearer k-123\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_upgrade_key_is_16_bytes_base64() {
        use base64::Engine as _;
        let key = upgrade_key();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&key)
            .unwrap();
        assert_eq!(decoded.len(), 16);
    }

    #[test]
    fn test_response_accepted() {
        assert!(response_accepted(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n"
        ));
        assert!(!response_accepted("HTTP/1.1 403 Forbidden\r\n\r\n"));
        assert!(!response_accepted(""));
    }
}
