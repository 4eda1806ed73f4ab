// Listening-socket evidence from ss / netstat
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use super::results::{DetectedService, ServiceType};
use crate::exec::CommandRunner;

lazy_static::lazy_static! {
    static ref SS_USERS: Regex = Regex::new(r#"users:\(\("(.+?)",pid=(\d+),fd=(\d+)\)"#).unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListeningSocket {
    /// `tcp` or `udp`.
    pub transport: String,
    pub address: String,
    pub port: u16,
    pub process: Option<String>,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WellKnownPort {
    pub port: u16,
    pub service_type: ServiceType,
    pub protocol: &'static str,
    pub name: Option<&'static str>,
}

const fn well_known(
    port: u16,
    service_type: ServiceType,
    protocol: &'static str,
    name: Option<&'static str>,
) -> WellKnownPort {
    WellKnownPort {
        port,
        service_type,
        protocol,
        name,
    }
}

pub const WELL_KNOWN_PORTS: &[WellKnownPort] = &[
    well_known(80, ServiceType::Web, "http", None),
    well_known(8080, ServiceType::Web, "http", None),
    well_known(443, ServiceType::Web, "https", None),
    well_known(8443, ServiceType::Web, "https", None),
    well_known(3306, ServiceType::Database, "mysql", Some("MySQL")),
    well_known(5432, ServiceType::Database, "postgresql", Some("PostgreSQL")),
    well_known(6379, ServiceType::Database, "redis", Some("Redis")),
    well_known(27017, ServiceType::Database, "mongodb", Some("MongoDB")),
    well_known(1080, ServiceType::Proxy, "socks", None),
];

pub fn lookup_well_known(port: u16) -> Option<&'static WellKnownPort> {
    WELL_KNOWN_PORTS.iter().find(|w| w.port == port)
}

/// Local-address column: `0.0.0.0:80`, `*:80`, `[::]:443`, `:::8080`,
/// `127.0.0.53%lo:53`.
pub fn parse_local_address(column: &str) -> Option<(String, u16)> {
    let (host, port) = column.rsplit_once(':')?;
    let port = port.parse().ok()?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = host.split('%').next().unwrap_or(host);
    let host = match host {
        "" | "*" | "::" => "*",
        other => other,
    };
    Some((host.to_string(), port))
}

type SocketParser = fn(&str) -> Vec<ListeningSocket>;

/// Socket-table tools in preference order.
const PORT_TOOLS: &[(&str, &[&str], SocketParser)] = &[
    ("ss", &["-tulnp"], parse_ss_output),
    ("netstat", &["-tulnp"], parse_netstat_output),
];

/// `ss -tulnp`:
/// ```text
/// Netid State  Recv-Q Send-Q Local Address:Port Peer Address:Port Process
/// tcp   LISTEN 0      511    0.0.0.0:80         0.0.0.0:*         users:(("nginx",pid=812,fd=6))
/// ```
pub fn parse_ss_output(output: &str) -> Vec<ListeningSocket> {
    let mut sockets = Vec::new();

    for line in output.lines() {
        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() < 5 || columns[0] == "Netid" {
            continue;
        }
        let transport = columns[0].to_lowercase();
        if !transport.starts_with("tcp") && !transport.starts_with("udp") {
            continue;
        }
        if !matches!(columns[1], "LISTEN" | "UNCONN") {
            continue;
        }
        let Some((address, port)) = parse_local_address(columns[4]) else {
            continue;
        };

        let rest = columns[5..].join(" ");
        let (process, pid) = match SS_USERS.captures(&rest) {
            Some(caps) => (Some(caps[1].to_string()), caps[2].parse().ok()),
            None => (None, None),
        };

        sockets.push(ListeningSocket {
            transport: transport[..3].to_string(),
            address,
            port,
            process,
            pid,
        });
    }

    sockets
}

/// `netstat -tulnp`:
/// ```text
/// Proto Recv-Q Send-Q Local Address   Foreign Address State  PID/Program name
/// tcp        0      0 0.0.0.0:3306    0.0.0.0:*       LISTEN 901/mysqld
/// udp        0      0 0.0.0.0:443     0.0.0.0:*              1203/hysteria
/// ```
pub fn parse_netstat_output(output: &str) -> Vec<ListeningSocket> {
    let mut sockets = Vec::new();

    for line in output.lines() {
        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() < 5 {
            continue;
        }
        let transport = columns[0].to_lowercase();
        if !transport.starts_with("tcp") && !transport.starts_with("udp") {
            continue;
        }
        if transport.starts_with("tcp") && !columns.contains(&"LISTEN") {
            continue;
        }
        let Some((address, port)) = parse_local_address(columns[3]) else {
            continue;
        };

        let owner = columns.last().copied().unwrap_or("-");
        let (pid, process) = match owner.split_once('/') {
            Some((pid, name)) => (pid.parse().ok(), Some(name.to_string())),
            None => (None, None),
        };

        sockets.push(ListeningSocket {
            transport: transport[..3].to_string(),
            address,
            port,
            process,
            pid,
        });
    }

    sockets
}

/// First socket-table tool that yields anything wins.
pub async fn collect_listening_sockets(runner: &dyn CommandRunner, limit: Duration) -> Vec<ListeningSocket> {
    for (tool, args, parser) in PORT_TOOLS {
        match runner.run_ok(tool, args, limit).await {
            Ok(output) => {
                let sockets = parser(&output);
                if !sockets.is_empty() {
                    debug!(tool = %tool, count = sockets.len(), "listening sockets collected");
                    return sockets;
                }
            }
            Err(e) => debug!(tool = %tool, error = %e, "socket table tool unavailable"),
        }
    }
    Vec::new()
}

pub fn listening_ports(sockets: &[ListeningSocket]) -> BTreeSet<u16> {
    sockets.iter().map(|s| s.port).collect()
}

/// Generic records for well-known TCP ports no other source has claimed.
pub fn services_from_ports(sockets: &[ListeningSocket], claimed: &HashSet<u16>) -> Vec<DetectedService> {
    let mut seen = HashSet::new();
    let mut services = Vec::new();

    for socket in sockets {
        if socket.transport != "tcp" {
            continue;
        }
        if claimed.contains(&socket.port) || !seen.insert(socket.port) {
            continue;
        }
        let Some(known) = lookup_well_known(socket.port) else {
            continue;
        };

        let name = match (known.name, known.service_type) {
            (Some(name), _) => name.to_string(),
            (None, ServiceType::Proxy) => format!("Proxy Service (Port {})", socket.port),
            (None, _) => format!("Web Service (Port {})", socket.port),
        };
        let mut service = DetectedService::new(name, known.service_type)
            .with_port(socket.port)
            .with_protocol(known.protocol);
        service.details.process = socket.process.clone();
        services.push(service);
    }

    services
}
