// Service discovery: collectors feed candidate records into fusion

pub mod container;
pub mod fusion;
pub mod hysteria;
pub mod ports;
pub mod process;
pub mod results;
pub mod rules;

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join3;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::AgentConfig;
use crate::exec::{CommandRunner, QUICK_TIMEOUT};
use crate::protocol::links::{substitute_host, HOST_PLACEHOLDER};
use crate::protocol::xray::parse_xray_path;
use crate::protocol::{push_unique, NginxConfigParser};
use crate::unlock::http::{HttpClient, HttpRequest};
use container::ContainerInspector;
use hysteria::{Flavor, HostContext};
use ports::{collect_listening_sockets, services_from_ports, ListeningSocket};
use process::ProcessCollector;
pub use results::{ContainerInfo, DetectedService, ServiceDetails, ServiceStatus, ServiceType};
use rules::{config_hash, executable_name, locate_config, match_process, parse_version, ConfigFormat, ProcessMatch};

/// Route lookup whose `src` field is the node's primary address.
const PRIMARY_ROUTE_ARGS: &[&str] = &["route", "get", "1.1.1.1"];

pub struct ServiceDiscovery {
    runner: Arc<dyn CommandRunner>,
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    processes: ProcessCollector,
    containers: ContainerInspector,
    extra_config_paths: HashMap<String, Vec<PathBuf>>,
    public_ip_url: String,
    node_name: String,
    command_timeout: Duration,
    public_ip: OnceCell<Option<String>>,
    primary_ip: OnceCell<Option<String>>,
    versions: Mutex<HashMap<String, Option<String>>>,
}

/// One matched process after config location, before protocol parsing.
struct Candidate {
    process: ProcessMatch,
    config: Option<PathBuf>,
}

impl ServiceDiscovery {
    pub fn new(
        config: &AgentConfig,
        runner: Arc<dyn CommandRunner>,
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            runner,
            http,
            clock,
            processes: ProcessCollector::new(config),
            containers: ContainerInspector::new(config.docker_binary.clone()),
            extra_config_paths: config
                .extra_config_paths
                .iter()
                .map(|(name, paths)| (name.to_lowercase(), paths.clone()))
                .collect(),
            public_ip_url: config.public_ip_url.clone(),
            node_name: config.resolved_node_name(),
            command_timeout: config.command_timeout(),
            public_ip: OnceCell::new(),
            primary_ip: OnceCell::new(),
            versions: Mutex::new(HashMap::new()),
        }
    }

    /// Forget memoised addresses and binary versions.
    pub fn reset(&mut self) {
        self.public_ip = OnceCell::new();
        self.primary_ip = OnceCell::new();
        if let Ok(versions) = self.versions.get_mut() {
            versions.clear();
        }
    }

    pub async fn discover(&self) -> Vec<DetectedService> {
        let runner = self.runner.as_ref();
        let (processes, containers, sockets) = join3(
            self.processes.collect(runner),
            self.containers.collect(runner),
            collect_listening_sockets(runner, self.command_timeout),
        )
        .await;
        debug!(
            processes = processes.len(),
            containers = containers.services.len(),
            sockets = sockets.len(),
            "evidence collected"
        );

        let mut candidates = Vec::new();
        let mut hysteria = Vec::new();
        for candidate in self.matched_processes(&processes) {
            if candidate.process.rule.config_format == ConfigFormat::Hysteria {
                hysteria.push(candidate);
            } else {
                candidates.push(self.process_service(&candidate, &sockets).await);
            }
        }
        candidates.extend(containers.services);

        // Hysteria may borrow any domain the other sources already found.
        let mut known_domains = Vec::new();
        for domain in candidates.iter().flat_map(|s| s.domains.iter()) {
            push_unique(&mut known_domains, domain.clone());
        }
        for candidate in &hysteria {
            let mut service = self.process_service(candidate, &sockets).await;
            self.enrich_hysteria(&mut service, candidate, &known_domains, &sockets).await;
            candidates.push(service);
        }

        container::attach_proxy_hosts(&mut candidates, &containers.proxy_hosts);

        let claimed: HashSet<u16> = candidates
            .iter()
            .flat_map(|s| s.port.into_iter().chain(s.details.ports.iter().copied()))
            .collect();
        candidates.extend(services_from_ports(&sockets, &claimed));

        let services = fusion::fuse(candidates);
        info!(count = services.len(), "service discovery finished");
        services
    }

    /// Rule matches with their config located, one per (service, config).
    fn matched_processes(&self, processes: &[String]) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        let mut matched = Vec::new();

        for line in processes {
            let Some(process) = match_process(line) else {
                continue;
            };
            let extra = self
                .extra_config_paths
                .get(&process.rule.name.to_lowercase())
                .map(Vec::as_slice)
                .unwrap_or_default();
            let config = locate_config(&process, extra);
            if seen.insert((process.rule.name, config.clone())) {
                matched.push(Candidate { process, config });
            }
        }
        matched
    }

    async fn process_service(&self, candidate: &Candidate, sockets: &[ListeningSocket]) -> DetectedService {
        let rule = candidate.process.rule;
        let mut service = DetectedService::new(rule.name, rule.service_type);
        service.port = rule.default_port;
        service.protocol = rule.protocol.map(str::to_string);
        service.details.process = Some(candidate.process.command_line.clone());
        service.details.version = self.version_of(&candidate.process).await;

        if let Some(path) = &candidate.config {
            service.config_path = Some(path.display().to_string());
            service.config_hash = config_hash(path);
            match rule.config_format {
                ConfigFormat::Inbounds => self.apply_inbounds(&mut service, path).await,
                ConfigFormat::Nginx => self.apply_nginx(&mut service, path).await,
                ConfigFormat::Hysteria | ConfigFormat::Opaque => {}
            }
        }

        if service.port.is_none() {
            service.port = socket_port_of(&candidate.process, sockets);
        }
        service
    }

    async fn apply_inbounds(&self, service: &mut DetectedService, path: &Path) {
        let Some(info) = parse_xray_path(path) else {
            return;
        };
        if service.protocol.is_none() {
            service.protocol = info.protocols.first().cloned();
        }
        service.port = info.ports.first().copied();
        service.add_domains(info.domains);

        if !info.share_links.is_empty() {
            let host = self.link_host().await;
            service.details.share_links = info
                .share_links
                .iter()
                .map(|link| substitute_host(link, &host))
                .collect();
        }
        service.details.ports = info.ports;
        service.details.protocols = info.protocols;
    }

    async fn apply_nginx(&self, service: &mut DetectedService, path: &Path) {
        let parser = NginxConfigParser::new(self.runner.as_ref(), self.clock.now());
        let Some(info) = parser.parse_with_includes(path).await else {
            return;
        };
        service.protocol = Some(if info.ssl_enabled { "https" } else { "http" }.to_string());
        service.port = info.ports.first().copied();
        service.add_domains(info.domains);
        service.details.ports = info.ports;
        service.details.protocols = info.protocols;
        service.details.ssl_certificates = info.ssl_certificates;
    }

    async fn enrich_hysteria(
        &self,
        service: &mut DetectedService,
        candidate: &Candidate,
        known_domains: &[String],
        sockets: &[ListeningSocket],
    ) {
        let evidence = hysteria::collect_evidence(candidate.config.as_deref(), service.details.version.as_deref());
        let findings = hysteria::reduce(evidence);
        let default_flavor = match candidate.process.rule.name {
            "Hysteria2" => Flavor::V2,
            _ => Flavor::V1,
        };
        let ctx = HostContext {
            known_domains: known_domains.to_vec(),
            primary_ip: self.primary_ip().await,
            public_ip: self.public_ip().await,
            node_name: self.node_name.clone(),
            default_flavor: Some(default_flavor),
        };
        let profile = hysteria::build_profile(&findings, &ctx);

        service.service_name = profile.flavor.service_name().to_string();
        service.protocol = Some(profile.flavor.scheme().to_string());
        service.port = profile.port.or_else(|| socket_port_of(&candidate.process, sockets));
        service.add_domains(profile.domains);
        service.details.share_links = profile.share_links;
        if let Some(sni) = profile.sni {
            service.details.extra.insert("sni".to_string(), sni.into());
        }
        if let Some(masquerade) = profile.masquerade {
            service.details.extra.insert("masquerade".to_string(), masquerade.into());
        }
        service
            .details
            .extra
            .insert("insecure".to_string(), profile.insecure.into());
    }

    async fn version_of(&self, process: &ProcessMatch) -> Option<String> {
        if let Ok(versions) = self.versions.lock() {
            if let Some(cached) = versions.get(&process.binary) {
                return cached.clone();
            }
        }

        let version = match self
            .runner
            .run(&process.binary, process.rule.version_args, QUICK_TIMEOUT)
            .await
        {
            Ok(output) => parse_version(&output.combined()),
            Err(e) => {
                debug!(binary = %process.binary, error = %e, "version command failed");
                None
            }
        };

        if let Ok(mut versions) = self.versions.lock() {
            versions.insert(process.binary.clone(), version.clone());
        }
        version
    }

    /// Host for generated links: public IP, then primary route address,
    /// then the placeholder.
    pub async fn link_host(&self) -> String {
        if let Some(ip) = self.public_ip().await {
            return ip;
        }
        self.primary_ip()
            .await
            .unwrap_or_else(|| HOST_PLACEHOLDER.to_string())
    }

    pub async fn public_ip(&self) -> Option<String> {
        self.public_ip
            .get_or_init(|| async {
                match self.http.send(HttpRequest::get(self.public_ip_url.as_str())).await {
                    Ok(response) if response.status == 200 => {
                        let text = response.text();
                        let candidate = text.trim();
                        candidate.parse::<IpAddr>().ok().map(|ip| ip.to_string())
                    }
                    Ok(response) => {
                        debug!(status = response.status, "public IP endpoint refused");
                        None
                    }
                    Err(e) => {
                        debug!(error = %e, "public IP lookup failed");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    pub async fn primary_ip(&self) -> Option<String> {
        self.primary_ip
            .get_or_init(|| async {
                match self.runner.run_ok("ip", PRIMARY_ROUTE_ARGS, QUICK_TIMEOUT).await {
                    Ok(output) => parse_route_source(&output),
                    Err(e) => {
                        debug!(error = %e, "primary route lookup failed");
                        None
                    }
                }
            })
            .await
            .clone()
    }
}

/// `src` address of `ip route get` output.
pub fn parse_route_source(output: &str) -> Option<String> {
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "src" {
            return tokens
                .next()
                .filter(|ip| ip.parse::<IpAddr>().is_ok())
                .map(str::to_string);
        }
    }
    None
}

/// Port of the first socket owned by a process with the same executable name.
fn socket_port_of(process: &ProcessMatch, sockets: &[ListeningSocket]) -> Option<u16> {
    let name = executable_name(&process.binary)?;
    sockets
        .iter()
        .find(|socket| socket.process.as_deref() == Some(name))
        .map(|socket| socket.port)
}
