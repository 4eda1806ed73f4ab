use std::net::{IpAddr, Ipv4Addr};

use ipnet::IpNet;

lazy_static::lazy_static! {
    // Addresses never usable as a client-facing endpoint.
    static ref RESERVED_RANGES: Vec<IpNet> = [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.0.0.0/24",
        "192.0.2.0/24",
        "192.168.0.0/16",
        "198.18.0.0/15",
        "198.51.100.0/24",
        "203.0.113.0/24",
        "224.0.0.0/4",
        "240.0.0.0/4",
        "::/128",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
        "ff00::/8",
    ]
    .iter()
    .filter_map(|net| net.parse().ok())
    .collect();
}

/// RFC 1918, loopback and link-local. This is the set the DNS pollution
/// heuristic treats as "should never come back for a public platform".
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();
            (octets[0] == 10) ||
            (octets[0] == 172 && octets[1] >= 16 && octets[1] <= 31) ||
            (octets[0] == 192 && octets[1] == 168) ||
            (octets[0] == 127) ||
            (octets[0] == 169 && octets[1] == 254)
        }
        IpAddr::V6(ipv6) => {
            ipv6.is_loopback() ||
            (ipv6.segments()[0] & 0xffc0) == 0xfe80 ||
            (ipv6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

/// Wider than `is_private_ip`: also CGNAT, documentation, benchmark,
/// multicast and unspecified ranges.
pub fn is_reserved_ip(ip: IpAddr) -> bool {
    RESERVED_RANGES.iter().any(|net| net.contains(&ip))
}

pub fn same_subnet_24(a: Ipv4Addr, b: Ipv4Addr) -> bool {
    a.octets()[..3] == b.octets()[..3]
}

/// A host candidate is usable for a share link when it is a hostname
/// (other than localhost) or a public IP literal.
pub fn is_public_host(host: &str) -> bool {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() || host.eq_ignore_ascii_case("localhost") {
        return false;
    }
    match host.parse::<IpAddr>() {
        Ok(ip) => !is_reserved_ip(ip),
        Err(_) => host.contains('.') && !host.ends_with(".local"),
    }
}

/// Split an endpoint into host and port.
///
/// Handles `1.2.3.4:443`, `[::1]:443`, `:443`, `example.com:443` and a bare
/// `443`. The host comes back empty when the endpoint only names a port.
pub fn split_host_port(endpoint: &str) -> Option<(String, u16)> {
    let endpoint = endpoint.trim();
    if let Ok(port) = endpoint.parse::<u16>() {
        return Some((String::new(), port));
    }
    if endpoint.starts_with('[') {
        let bracket_end = endpoint.find(']')?;
        let rest = endpoint.get(bracket_end + 1..)?;
        let port: u16 = rest.strip_prefix(':')?.parse().ok()?;
        return Some((endpoint[1..bracket_end].to_string(), port));
    }
    let last_colon = endpoint.rfind(':')?;
    let host = &endpoint[..last_colon];
    let port: u16 = endpoint[last_colon + 1..].parse().ok()?;
    // A bare IPv6 address without brackets has no port component.
    if host.contains(':') {
        return None;
    }
    Some((host.to_string(), port))
}

/// Format a host for use inside a URI authority.
pub fn uri_host(host: &str) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("[{}]", v6),
        _ => host.to_string(),
    }
}
