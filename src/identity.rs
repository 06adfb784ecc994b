//! Canonical peer identity, collapsing equivalent address representations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr as _;

/// Normalized key for a peer, derived from a raw network address.
///
/// Transport layers report the same endpoint in several shapes
/// (`ipv4:10.0.0.1:12345`, `[::1]:50051`, `localhost:50051`, a bare IP), and
/// the mesh must treat all of them as one participant. Loopback hosts keep
/// their port so that several instances on one machine stay distinct; every
/// other host is keyed by IP alone, because a peer's listen port and the
/// ephemeral port of its outbound connection never match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerIdentity(String);

const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1", "::", "0.0.0.0"];

impl PeerIdentity {
    /// Normalize a raw address into its canonical identity.
    pub fn normalize(raw: &str) -> Self {
        let mut addr = raw.trim();
        for prefix in ["ipv4:", "ipv6:"] {
            if let Some(rest) = addr.strip_prefix(prefix) {
                addr = rest;
            }
        }

        // Bracketed IPv6, with or without a port: `[::1]:50051`, `[2001:db8::2]`.
        if let Some(rest) = addr.strip_prefix('[') {
            if let Some((host, tail)) = rest.split_once(']') {
                let port = tail.strip_prefix(':').unwrap_or("0");
                return Self::from_host_port(host, port);
            }
        }

        // A bare IPv6 address has multiple colons and no port to split off.
        if let Ok(ip) = Ipv6Addr::from_str(addr) {
            return Self::from_host_port(&ip.to_string(), "0");
        }

        match addr.rsplit_once(':') {
            Some((host, port)) => Self::from_host_port(host, port),
            None => Self::from_host_port(addr, "0"),
        }
    }

    fn from_host_port(host: &str, port: &str) -> Self {
        let host = host.to_ascii_lowercase();
        if LOOPBACK_HOSTS.contains(&host.as_str()) {
            PeerIdentity(format!("localhost:{port}"))
        } else {
            PeerIdentity(host)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(raw: &str) -> String {
        PeerIdentity::normalize(raw).as_str().to_string()
    }

    #[test]
    fn loopback_forms_collapse_to_localhost_with_port() {
        assert_eq!(norm("ipv4:127.0.0.1:9"), "localhost:9");
        assert_eq!(norm("localhost:9"), "localhost:9");
        assert_eq!(norm("[::1]:9"), "localhost:9");
        assert_eq!(norm("[::]:9"), "localhost:9");
        assert_eq!(norm("ipv6:[::1]:9"), "localhost:9");
        assert_eq!(norm("0.0.0.0:9"), "localhost:9");
    }

    #[test]
    fn local_instances_on_different_ports_stay_distinct() {
        assert_ne!(norm("localhost:50051"), "localhost:50052");
        assert_ne!(norm("[::1]:50051"), norm("127.0.0.1:50052"));
    }

    #[test]
    fn remote_hosts_are_keyed_by_ip_ignoring_port() {
        assert_eq!(norm("ipv4:10.0.0.1:12345"), "10.0.0.1");
        assert_eq!(norm("10.0.0.1:50051"), "10.0.0.1");
        assert_eq!(norm("10.0.0.1:50051"), norm("10.0.0.1:9"));
        assert_ne!(norm("10.0.0.1:50051"), norm("10.0.0.2:50051"));
    }

    #[test]
    fn hostnames_are_lowercased() {
        assert_eq!(norm("Alpha.Example.Net:1234"), "alpha.example.net");
        assert_eq!(norm("alpha.example.net:9"), norm("ALPHA.example.NET:10"));
    }

    #[test]
    fn bare_ipv6_is_kept_whole() {
        assert_eq!(norm("[2001:db8::2]:50051"), "2001:db8::2");
        assert_eq!(norm("2001:db8::2"), "2001:db8::2");
    }
}
