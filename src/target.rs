//! Connection target identity

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

fn default_port() -> u16 {
    22
}

/// Identity of a remote shell endpoint.
///
/// `nickname` is the UI/dedup key; known-hosts lookups key on
/// `(hostname, port)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    /// Unique display key.
    pub nickname: String,
    /// Username for authentication.
    pub username: String,
    /// Remote host address.
    pub hostname: String,
    /// Remote port (default: 22).
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ConnectionTarget {
    pub fn new(
        nickname: impl Into<String>,
        username: impl Into<String>,
        hostname: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            nickname: nickname.into(),
            username: username.into(),
            hostname: hostname.into(),
            port,
        }
    }

    /// Parse a connection URI of the form `ssh://user@host:port/#nickname`.
    ///
    /// Port and nickname are optional; a missing nickname falls back to
    /// `user@host:port`.
    pub fn parse_uri(uri: &str) -> Result<Self, BridgeError> {
        let rest = uri
            .strip_prefix("ssh://")
            .ok_or_else(|| BridgeError::InvalidUri(format!("unsupported scheme in '{uri}'")))?;

        let (rest, fragment) = match rest.split_once('#') {
            Some((r, f)) if !f.is_empty() => (r, Some(f.to_string())),
            Some((r, _)) => (r, None),
            None => (rest, None),
        };

        // Drop any path component before the fragment.
        let authority = rest.split('/').next().unwrap_or(rest);

        let (username, hostpart) = authority
            .rsplit_once('@')
            .ok_or_else(|| BridgeError::InvalidUri(format!("missing username in '{uri}'")))?;

        if username.is_empty() {
            return Err(BridgeError::InvalidUri(format!("empty username in '{uri}'")));
        }

        let (hostname, port) = split_host_port(hostpart)
            .ok_or_else(|| BridgeError::InvalidUri(format!("bad host/port in '{uri}'")))?;

        if hostname.is_empty() {
            return Err(BridgeError::InvalidUri(format!("empty hostname in '{uri}'")));
        }

        let nickname =
            fragment.unwrap_or_else(|| format!("{}@{}:{}", username, hostname, port));

        Ok(Self {
            nickname,
            username: username.to_string(),
            hostname: hostname.to_string(),
            port,
        })
    }

    /// `user@host:port` form used in status lines.
    pub fn address(&self) -> String {
        format!("{}@{}:{}", self.username, self.hostname, self.port)
    }
}

/// Split `host`, `host:port` or `[v6]:port` into hostname and port.
fn split_host_port(s: &str) -> Option<(String, u16)> {
    if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None if tail.is_empty() => 22,
            None => return None,
        };
        return Some((host.to_string(), port));
    }
    match s.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((s.to_string(), 22)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_uri() {
        let t = ConnectionTarget::parse_uri("ssh://alice@example.com:2222/#work").unwrap();
        assert_eq!(t.nickname, "work");
        assert_eq!(t.username, "alice");
        assert_eq!(t.hostname, "example.com");
        assert_eq!(t.port, 2222);
    }

    #[test]
    fn parse_defaults_port_and_nickname() {
        let t = ConnectionTarget::parse_uri("ssh://bob@server").unwrap();
        assert_eq!(t.port, 22);
        assert_eq!(t.nickname, "bob@server:22");
    }

    #[test]
    fn parse_ipv6_host() {
        let t = ConnectionTarget::parse_uri("ssh://bob@[::1]:2200/#local").unwrap();
        assert_eq!(t.hostname, "::1");
        assert_eq!(t.port, 2200);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ConnectionTarget::parse_uri("http://x@y").is_err());
        assert!(ConnectionTarget::parse_uri("ssh://nohost").is_err());
        assert!(ConnectionTarget::parse_uri("ssh://user@host:notaport").is_err());
    }

    #[test]
    fn serde_round_trip_with_default_port() {
        let t = ConnectionTarget::new("work", "alice", "example.com", 2222);
        let json = serde_json::to_string(&t).unwrap();
        let back: ConnectionTarget = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);

        // Port may be omitted in stored records.
        let partial: ConnectionTarget = serde_json::from_str(
            r#"{"nickname":"w","username":"a","hostname":"h"}"#,
        )
        .unwrap();
        assert_eq!(partial.port, 22);
    }
}
