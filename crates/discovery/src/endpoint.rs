//! Provider endpoint parsing.
//!
//! Providers advertise multiaddrs. Only `/<host>/tcp/<port>/<scheme>` is
//! usable by the HTTP transport, where host is `ip4`, `ip6`, `dns`, `dns4` or
//! `dns6` and scheme is `http` or `https`. Anything else is ignored.

use multiaddr::{Multiaddr, Protocol};

/// Base URL for a recognized endpoint multiaddr.
pub fn endpoint_to_url(raw: &str) -> Option<String> {
    let addr: Multiaddr = raw.trim().parse().ok()?;
    let mut parts = addr.iter();

    let host = match parts.next()? {
        Protocol::Ip4(ip) => ip.to_string(),
        Protocol::Ip6(ip) => format!("[{ip}]"),
        Protocol::Dns(name) | Protocol::Dns4(name) | Protocol::Dns6(name) => name.to_string(),
        _ => return None,
    };
    let Protocol::Tcp(port) = parts.next()? else {
        return None;
    };
    let scheme = match parts.next()? {
        Protocol::Http => "http",
        Protocol::Https => "https",
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }

    Some(format!("{scheme}://{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognized_forms() {
        assert_eq!(
            endpoint_to_url("/ip4/127.0.0.1/tcp/8080/http").as_deref(),
            Some("http://127.0.0.1:8080")
        );
        assert_eq!(
            endpoint_to_url("/ip6/::1/tcp/443/https").as_deref(),
            Some("https://[::1]:443")
        );
        assert_eq!(
            endpoint_to_url("/dns4/sp1.example.org/tcp/3333/http").as_deref(),
            Some("http://sp1.example.org:3333")
        );
    }

    #[test]
    fn test_unrecognized_forms() {
        assert_eq!(endpoint_to_url("/ip4/127.0.0.1/tcp/8080"), None);
        assert_eq!(endpoint_to_url("/ip4/127.0.0.1/udp/8080/http"), None);
        assert_eq!(endpoint_to_url("/ip4/127.0.0.1/tcp/8080/http/p2p-circuit"), None);
        assert_eq!(endpoint_to_url("http://127.0.0.1:8080"), None);
        assert_eq!(endpoint_to_url(""), None);
    }
}
