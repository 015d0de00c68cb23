/*!
 * Hostname Resolution
 *
 * Turns the client's host string into the single IPv4 socket address the
 * client will connect to. Literal dotted-decimal addresses bypass the
 * resolver entirely; hostnames go through a pluggable [`Resolve`]
 * implementation and only the first IPv4 candidate is ever used.
 */

use crate::error::{ClientError, Result};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

/// Blocking hostname lookup
///
/// Implementations return candidates in resolver order. The client never
/// retries across candidates, so order matters.
pub trait Resolve {
    fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Platform resolver (getaddrinfo / hosts file) via `ToSocketAddrs`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok((host, port).to_socket_addrs()?.collect())
    }
}

impl<R: Resolve + ?Sized> Resolve for &R {
    fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        (**self).resolve(host, port)
    }
}

/// Pick the destination address for `host:port`
///
/// # Returns
/// * The literal address if `host` parses as IPv4 (resolver untouched)
/// * Otherwise the first IPv4 address the resolver returns
/// * `ClientError::Resolve` / `ClientError::NoAddress` on lookup failure
pub fn destination<R: Resolve + ?Sized>(resolver: &R, host: &str, port: u16) -> Result<SocketAddr> {
    if let Some(ip) = parse_ipv4_literal(host) {
        return Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)));
    }

    let candidates = resolver.resolve(host, port).map_err(|source| {
        log::error!("gethostbyname {}: {}", host, source);
        ClientError::Resolve { host: host.to_string(), source }
    })?;

    // IPv4 stream sockets only; first hit wins, the rest are ignored
    let addr = candidates
        .into_iter()
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| {
            log::error!("failed to resolve hostname {}: no IPv4 address", host);
            ClientError::NoAddress { host: host.to_string() }
        })?;

    log::info!("{} resolved to {}", host, addr.ip());
    Ok(addr)
}

/// Parse an IPv4 literal in any of the `inet_aton` forms
///
/// Accepts `a.b.c.d`, `a.b.c` (c is 16 bits), `a.b` (b is 24 bits) and `a`
/// (32 bits). Each part may be decimal, octal with a leading `0`, or hex
/// with a leading `0x`.
pub fn parse_ipv4_literal(host: &str) -> Option<Ipv4Addr> {
    let parts: Vec<&str> = host.split('.').collect();
    if parts.is_empty() || parts.len() > 4 {
        return None;
    }

    let mut values = Vec::with_capacity(parts.len());
    for p in &parts {
        values.push(parse_inet_part(p)?);
    }

    let (last, leading) = values.split_last()?;
    if leading.iter().any(|&v| v > 0xff) {
        return None;
    }

    // The last part fills every byte not taken by the leading ones
    let tail_bits = 8 * (4 - leading.len()) as u32;
    if tail_bits < 32 && *last >> tail_bits != 0 {
        return None;
    }

    let head = leading
        .iter()
        .enumerate()
        .fold(0u32, |acc, (i, &v)| acc | (v << (24 - 8 * i as u32)));
    Some(Ipv4Addr::from(head | *last))
}

fn parse_inet_part(p: &str) -> Option<u32> {
    let (digits, radix) = if let Some(hex) = p.strip_prefix("0x").or_else(|| p.strip_prefix("0X")) {
        (hex, 16)
    } else if p.len() > 1 && p.starts_with('0') {
        (&p[1..], 8)
    } else {
        (p, 10)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u32::from_str_radix(digits, radix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Canned {
        calls: Cell<usize>,
        addrs: Vec<SocketAddr>,
    }

    impl Resolve for Canned {
        fn resolve(&self, _host: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.addrs.clone())
        }
    }

    #[test]
    fn literal_ipv4_skips_resolver() {
        let r = Canned { calls: Cell::new(0), addrs: vec![] };
        let addr = destination(&r, "10.1.2.3", 11211).unwrap();
        assert_eq!(addr, "10.1.2.3:11211".parse().unwrap());
        assert_eq!(r.calls.get(), 0);
    }

    #[test]
    fn shorthand_literals_skip_resolver() {
        let r = Canned { calls: Cell::new(0), addrs: vec![] };
        assert_eq!(destination(&r, "127.1", 80).unwrap(), "127.0.0.1:80".parse().unwrap());
        assert_eq!(destination(&r, "10.1.258", 80).unwrap(), "10.1.1.2:80".parse().unwrap());
        assert_eq!(destination(&r, "0x7f.0.0.01", 80).unwrap(), "127.0.0.1:80".parse().unwrap());
        assert_eq!(destination(&r, "2130706433", 80).unwrap(), "127.0.0.1:80".parse().unwrap());
        assert_eq!(r.calls.get(), 0);
    }

    #[test]
    fn malformed_literals_go_to_resolver() {
        for host in ["256.0.0.1", "1.2.3.4.5", "1..2", "", "08.0.0.1", "1.2.65536", "cache"] {
            assert_eq!(parse_ipv4_literal(host), None, "{:?}", host);
        }
    }

    #[test]
    fn first_ipv4_candidate_wins() {
        let r = Canned {
            calls: Cell::new(0),
            addrs: vec![
                "[::1]:7379".parse().unwrap(),
                "192.0.2.7:7379".parse().unwrap(),
                "192.0.2.8:7379".parse().unwrap(),
            ],
        };
        let addr = destination(&r, "cache.internal", 7379).unwrap();
        assert_eq!(addr, "192.0.2.7:7379".parse().unwrap());
        assert_eq!(r.calls.get(), 1);
    }

    #[test]
    fn ipv6_only_lookup_is_no_address() {
        let r = Canned { calls: Cell::new(0), addrs: vec!["[::1]:7379".parse().unwrap()] };
        let err = destination(&r, "v6only", 7379).unwrap_err();
        assert!(matches!(err, ClientError::NoAddress { ref host } if host == "v6only"));
    }
}
