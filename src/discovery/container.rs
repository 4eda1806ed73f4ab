// Container runtime evidence (docker CLI)
use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::results::{ContainerInfo, DetectedService, ServiceStatus, ServiceType};
use crate::error::{Error, Result};
use crate::exec::{CommandRunner, CONTAINER_TIMEOUT};

pub const PS_FORMAT: &str = "{{.ID}}\t{{.Names}}\t{{.Image}}\t{{.Status}}\t{{.Ports}}";
pub const INSPECT_FORMAT: &str = "{{json .Config.Labels}}\t{{json .Config.Env}}";

/// Where Nginx Proxy Manager keeps one generated config per proxy host.
const NPM_PROXY_HOST_DIR: &str = "/data/nginx/proxy_host";

lazy_static::lazy_static! {
    static ref TRAEFIK_HOST: Regex = Regex::new(r"Host\(([^)]*)\)").unwrap();
    static ref BACKTICKED: Regex = Regex::new(r"`([^`]+)`").unwrap();
    static ref SERVER_NAME: Regex = Regex::new(r"(?m)(?:^|[;{}])\s*server_name\s+([^;{}]+)").unwrap();
    static ref SET_SERVER: Regex = Regex::new(r#"(?m)(?:^|[;{}])\s*set\s+\$server\s+"?([^";{}\s]+)"?\s*;"#).unwrap();
    static ref SET_PORT: Regex = Regex::new(r"(?m)(?:^|[;{}])\s*set\s+\$port\s+(\d+)\s*;").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRow {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    pub ports: BTreeSet<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyTarget {
    pub forward_host: String,
    pub forward_port: u16,
}

/// What the container source contributes to one scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerScan {
    pub services: Vec<DetectedService>,
    /// Virtual-host domain to upstream, from a reverse-proxy container.
    pub proxy_hosts: BTreeMap<String, ProxyTarget>,
}

/// Host-side ports of a `docker ps` Ports column. Ranges expand; ports that
/// are exposed but not published are ignored.
pub fn parse_port_mappings(ports: &str) -> BTreeSet<u16> {
    let mut host_ports = BTreeSet::new();

    for mapping in ports.split(',') {
        let Some((host_side, _)) = mapping.trim().split_once("->") else {
            continue;
        };
        let Some((_, range)) = host_side.rsplit_once(':') else {
            continue;
        };
        let (start, end) = match range.split_once('-') {
            Some((start, end)) => (start.parse::<u16>(), end.parse::<u16>()),
            None => (range.parse::<u16>(), range.parse::<u16>()),
        };
        if let (Ok(start), Ok(end)) = (start, end) {
            if start <= end {
                host_ports.extend(start..=end);
            }
        }
    }

    host_ports
}

pub fn parse_ps_rows(output: &str) -> Vec<ContainerRow> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 4 || fields[0].trim().is_empty() {
                return None;
            }
            Some(ContainerRow {
                id: fields[0].trim().to_string(),
                name: fields[1].trim().to_string(),
                image: fields[2].trim().to_string(),
                status: fields[3].trim().to_string(),
                ports: fields.get(4).map(|p| parse_port_mappings(p)).unwrap_or_default(),
            })
        })
        .collect()
}

/// Labels and env of `docker inspect --format INSPECT_FORMAT`.
pub fn parse_inspect(output: &str) -> (BTreeMap<String, String>, Vec<String>) {
    let line = output.lines().next().unwrap_or("");
    let (labels_json, env_json) = line.split_once('\t').unwrap_or((line, "null"));
    let labels = serde_json::from_str::<Option<BTreeMap<String, String>>>(labels_json.trim())
        .ok()
        .flatten()
        .unwrap_or_default();
    let env = serde_json::from_str::<Option<Vec<String>>>(env_json.trim())
        .ok()
        .flatten()
        .unwrap_or_default();
    (labels, env)
}

pub fn domains_from_env(env: &[String]) -> Vec<String> {
    env.iter()
        .filter_map(|entry| entry.strip_prefix("VIRTUAL_HOST="))
        .flat_map(|hosts| hosts.split(','))
        .map(|host| host.trim().to_string())
        .filter(|host| !host.is_empty())
        .collect()
}

/// Domains from ``traefik.http.routers.<name>.rule=Host(`a`,`b`)`` labels.
pub fn domains_from_labels(labels: &BTreeMap<String, String>) -> Vec<String> {
    labels
        .iter()
        .filter(|(key, _)| key.starts_with("traefik.http.routers.") && key.ends_with(".rule"))
        .flat_map(|(_, rule)| {
            TRAEFIK_HOST
                .captures_iter(rule)
                .flat_map(|caps| {
                    BACKTICKED
                        .captures_iter(&caps[1])
                        .map(|c| c[1].to_string())
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Image fragments mapped to a service identity; first match wins, so
/// longer names come first.
const IMAGE_RULES: &[(&str, &str, ServiceType, Option<&str>)] = &[
    ("nginx-proxy-manager", "Nginx Proxy Manager", ServiceType::Web, Some("http")),
    ("nginx", "Nginx", ServiceType::Web, Some("http")),
    ("openresty", "Nginx", ServiceType::Web, Some("http")),
    ("caddy", "Caddy", ServiceType::Web, Some("http")),
    ("traefik", "Traefik", ServiceType::Web, Some("http")),
    ("httpd", "Apache", ServiceType::Web, Some("http")),
    ("apache", "Apache", ServiceType::Web, Some("http")),
    ("haproxy", "HAProxy", ServiceType::Web, Some("http")),
    ("mariadb", "MariaDB", ServiceType::Database, Some("mysql")),
    ("mysql", "MySQL", ServiceType::Database, Some("mysql")),
    ("postgres", "PostgreSQL", ServiceType::Database, Some("postgresql")),
    ("redis", "Redis", ServiceType::Database, Some("redis")),
    ("mongo", "MongoDB", ServiceType::Database, Some("mongodb")),
    ("hysteria", "Hysteria", ServiceType::Proxy, Some("hysteria")),
    ("xray", "Xray", ServiceType::Proxy, None),
    ("v2fly", "V2Ray", ServiceType::Proxy, None),
    ("v2ray", "V2Ray", ServiceType::Proxy, None),
    ("sing-box", "sing-box", ServiceType::Proxy, None),
    ("trojan", "Trojan", ServiceType::Proxy, Some("trojan")),
];

/// Service identity from image, then container name; env hints make an
/// unrecognised container a web service.
pub fn classify_container(image: &str, name: &str, env: &[String]) -> (String, ServiceType, Option<&'static str>) {
    let repository = image.rsplit_once(':').map(|(repo, _)| repo).unwrap_or(image).to_lowercase();
    let name_lower = name.to_lowercase();

    for haystack in [&repository, &name_lower] {
        if let Some((_, service, kind, protocol)) =
            IMAGE_RULES.iter().find(|(fragment, ..)| haystack.contains(fragment))
        {
            return (service.to_string(), *kind, *protocol);
        }
    }
    if !domains_from_env(env).is_empty() {
        return (name.to_string(), ServiceType::Web, Some("http"));
    }
    (name.to_string(), ServiceType::Container, None)
}

/// One Nginx Proxy Manager proxy-host file: its domains and upstream.
pub fn parse_proxy_host_config(content: &str) -> Option<(Vec<String>, ProxyTarget)> {
    let forward_host = SET_SERVER.captures(content)?[1].to_string();
    let forward_port = SET_PORT.captures(content)?[1].parse().ok()?;
    let domains: Vec<String> = SERVER_NAME
        .captures_iter(content)
        .flat_map(|caps| {
            caps[1]
                .split_whitespace()
                .filter(|name| *name != "_")
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect();
    if domains.is_empty() {
        return None;
    }
    Some((
        domains,
        ProxyTarget {
            forward_host,
            forward_port,
        },
    ))
}

/// Give web services the domains a reverse-proxy container routes to them,
/// matched by container name or by forwarded port.
pub fn attach_proxy_hosts(services: &mut [DetectedService], hosts: &BTreeMap<String, ProxyTarget>) {
    for service in services.iter_mut().filter(|s| s.service_type == ServiceType::Web) {
        let container_name = service.container_info.as_ref().map(|c| c.name.clone());
        let matched: Vec<String> = hosts
            .iter()
            .filter(|(_, target)| {
                container_name.as_deref() == Some(target.forward_host.as_str())
                    || service.port == Some(target.forward_port)
            })
            .map(|(domain, _)| domain.clone())
            .collect();
        service.add_domains(matched);
    }
}

fn is_permission_denied(text: &str) -> bool {
    text.to_lowercase().contains("permission denied")
}

pub struct ContainerInspector {
    docker: String,
}

impl ContainerInspector {
    pub fn new(docker: impl Into<String>) -> Self {
        Self { docker: docker.into() }
    }

    /// Never fails the scan. Permission problems are reported once and leave
    /// the source empty for this run.
    pub async fn collect(&self, runner: &dyn CommandRunner) -> ContainerScan {
        match self.try_collect(runner).await {
            Ok(scan) => scan,
            Err(Error::Permission(reason)) => {
                warn!(
                    reason = %reason,
                    "container runtime access denied; add the agent user to the docker group or mount /var/run/docker.sock"
                );
                ContainerScan::default()
            }
            Err(e) => {
                debug!(error = %e, "container runtime unavailable");
                ContainerScan::default()
            }
        }
    }

    async fn try_collect(&self, runner: &dyn CommandRunner) -> Result<ContainerScan> {
        let listing = self.docker_ok(runner, &["ps", "--format", PS_FORMAT]).await?;
        let mut scan = ContainerScan::default();

        for row in parse_ps_rows(&listing) {
            let (labels, env) = match self
                .docker_ok(runner, &["inspect", "--format", INSPECT_FORMAT, &row.id])
                .await
            {
                Ok(output) => parse_inspect(&output),
                Err(e) => {
                    debug!(container = %row.name, error = %e, "inspect failed");
                    (BTreeMap::new(), Vec::new())
                }
            };

            let (name, kind, protocol) = classify_container(&row.image, &row.name, &env);
            if name == "Nginx Proxy Manager" {
                scan.proxy_hosts.extend(self.proxy_hosts(runner, &row.id).await);
            }

            let mut service = DetectedService::new(name, kind);
            service.port = row.ports.iter().next().copied();
            service.protocol = protocol.map(str::to_string);
            service.status = if row.status.starts_with("Up") {
                ServiceStatus::Running
            } else {
                ServiceStatus::Stopped
            };
            service.container_info = Some(ContainerInfo {
                id: row.id.clone(),
                image: row.image.clone(),
                state: row.status.clone(),
                name: row.name.clone(),
            });
            service.add_domains(domains_from_env(&env));
            service.add_domains(domains_from_labels(&labels));
            service.details.ports = row.ports.iter().copied().collect();
            service.details.labels = labels;
            scan.services.push(service);
        }

        Ok(scan)
    }

    async fn proxy_hosts(&self, runner: &dyn CommandRunner, id: &str) -> BTreeMap<String, ProxyTarget> {
        let mut hosts = BTreeMap::new();
        let listing = match self.docker_ok(runner, &["exec", id, "ls", NPM_PROXY_HOST_DIR]).await {
            Ok(listing) => listing,
            Err(e) => {
                debug!(container = %id, error = %e, "cannot list proxy hosts");
                return hosts;
            }
        };

        for file in listing.split_whitespace().filter(|f| f.ends_with(".conf")) {
            let path = format!("{}/{}", NPM_PROXY_HOST_DIR, file);
            let Ok(content) = self.docker_ok(runner, &["exec", id, "cat", &path]).await else {
                continue;
            };
            if let Some((domains, target)) = parse_proxy_host_config(&content) {
                for domain in domains {
                    hosts.insert(domain, target.clone());
                }
            }
        }
        hosts
    }

    async fn docker_ok(&self, runner: &dyn CommandRunner, args: &[&str]) -> Result<String> {
        let output = runner.run(&self.docker, args, CONTAINER_TIMEOUT).await?;
        if output.success {
            return Ok(output.stdout);
        }
        if is_permission_denied(&output.stderr) {
            return Err(Error::Permission(output.stderr.trim().to_string()));
        }
        Err(Error::tool(&self.docker, output.stderr.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::testing::ScriptedCommands;

    const NPM_CONF: &str = r#"
server {
  set $forward_scheme http;
  set $server         "wordpress";
  set $port           8080;

  listen 80;
  listen 443 ssl http2;
  server_name blog.example.com www.blog.example.com;
}
"#;

    #[test]
    fn test_port_mapping_ranges() {
        let ports = parse_port_mappings("0.0.0.0:80-81->80-81/tcp");
        assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![80, 81]);

        let ports = parse_port_mappings("0.0.0.0:443->443/tcp, :::443->443/tcp, 8080/tcp, 127.0.0.1:5432->5432/tcp");
        assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![443, 5432]);
        assert!(parse_port_mappings("").is_empty());
    }

    #[test]
    fn test_parse_inspect() {
        let output = "{\"traefik.http.routers.web.rule\":\"Host(`a.example.com`) || Host(`b.example.com`,`c.example.com`)\"}\t[\"PATH=/usr/bin\",\"VIRTUAL_HOST=d.example.com, e.example.com\"]\n";
        let (labels, env) = parse_inspect(output);
        assert_eq!(
            domains_from_labels(&labels),
            vec!["a.example.com", "b.example.com", "c.example.com"]
        );
        assert_eq!(domains_from_env(&env), vec!["d.example.com", "e.example.com"]);

        let (labels, env) = parse_inspect("null\tnull");
        assert!(labels.is_empty() && env.is_empty());
    }

    #[test]
    fn test_classify_container() {
        let (name, kind, _) = classify_container("jc21/nginx-proxy-manager:latest", "npm", &[]);
        assert_eq!((name.as_str(), kind), ("Nginx Proxy Manager", ServiceType::Web));

        let (name, kind, protocol) = classify_container("postgres:16", "db", &[]);
        assert_eq!((name.as_str(), kind, protocol), ("PostgreSQL", ServiceType::Database, Some("postgresql")));

        let env = vec!["VIRTUAL_HOST=app.example.com".to_string()];
        let (name, kind, _) = classify_container("ghcr.io/acme/app:1.2", "acme-app", &env);
        assert_eq!((name.as_str(), kind), ("acme-app", ServiceType::Web));

        let (_, kind, _) = classify_container("ghcr.io/acme/worker:1.2", "worker", &[]);
        assert_eq!(kind, ServiceType::Container);
    }

    #[test]
    fn test_proxy_host_config() {
        let (domains, target) = parse_proxy_host_config(NPM_CONF).unwrap();
        assert_eq!(domains, vec!["blog.example.com", "www.blog.example.com"]);
        assert_eq!(target.forward_host, "wordpress");
        assert_eq!(target.forward_port, 8080);
    }

    #[test]
    fn test_one_line_proxy_host_config() {
        let conf = r#"server { set $forward_scheme http; set $server "api"; set $port 3000; listen 80; server_name api.example.com; }"#;
        let (domains, target) = parse_proxy_host_config(conf).unwrap();
        assert_eq!(domains, vec!["api.example.com"]);
        assert_eq!(target.forward_host, "api");
        assert_eq!(target.forward_port, 3000);

        let mut services = vec![DetectedService::new("api", ServiceType::Web).with_port(3000)];
        let hosts = BTreeMap::from([("api.example.com".to_string(), target)]);
        attach_proxy_hosts(&mut services, &hosts);
        assert_eq!(services[0].domains, vec!["api.example.com"]);
    }

    #[tokio::test]
    async fn test_collect_with_proxy_manager() {
        let ps = "a1\tnpm\tjc21/nginx-proxy-manager:latest\tUp 3 days\t0.0.0.0:80-81->80-81/tcp, 0.0.0.0:443->443/tcp\n\
b2\twordpress\twordpress:6\tExited (0) 2 hours ago\t\n";
        let runner = ScriptedCommands::new()
            .with(&format!("docker ps --format {}", PS_FORMAT), ps)
            .with(&format!("docker inspect --format {} a1", INSPECT_FORMAT), "{}\t[]")
            .with(
                &format!("docker inspect --format {} b2", INSPECT_FORMAT),
                "{}\t[\"VIRTUAL_HOST=wp.internal.example\"]",
            )
            .with("docker exec a1 ls /data/nginx/proxy_host", "1.conf\n2.conf\n")
            .with("docker exec a1 cat /data/nginx/proxy_host/1.conf", NPM_CONF)
            .with_output(
                "docker exec a1 cat /data/nginx/proxy_host/2.conf",
                CommandOutput::failed("No such file"),
            );

        let mut scan = ContainerInspector::new("docker").collect(&runner).await;
        assert_eq!(scan.services.len(), 2);

        let npm = &scan.services[0];
        assert_eq!(npm.service_name, "Nginx Proxy Manager");
        assert_eq!(npm.port, Some(80));
        assert_eq!(npm.details.ports, vec![80, 81, 443]);
        assert_eq!(npm.status, ServiceStatus::Running);

        let wordpress = &scan.services[1];
        assert_eq!(wordpress.service_type, ServiceType::Web);
        assert_eq!(wordpress.status, ServiceStatus::Stopped);
        assert_eq!(scan.proxy_hosts.len(), 2);

        attach_proxy_hosts(&mut scan.services, &scan.proxy_hosts.clone());
        assert_eq!(
            scan.services[1].domains,
            vec!["wp.internal.example", "blog.example.com", "www.blog.example.com"]
        );
    }

    #[tokio::test]
    async fn test_permission_denied_disables_source() {
        let runner = ScriptedCommands::new().with_output(
            &format!("docker ps --format {}", PS_FORMAT),
            CommandOutput::failed("permission denied while trying to connect to the Docker daemon socket at unix:///var/run/docker.sock"),
        );
        let scan = ContainerInspector::new("docker").collect(&runner).await;
        assert!(scan.services.is_empty());
        assert_eq!(runner.calls().len(), 1);
    }
}
