// Hysteria share-link reconstruction from link files, client and server configs
//
// Each evidence step reads one source and returns what it found; `reduce`
// folds the findings and `build_profile` decides host, SNI, flavour and links.
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::network::{is_public_host, split_host_port};
use crate::protocol::links::{hysteria_link, link_endpoint, relabel};
use crate::protocol::push_unique;

lazy_static::lazy_static! {
    static ref MAJOR_VERSION: Regex = Regex::new(r"^v?(\d+)\.").unwrap();
}

pub const LINK_FILES: &[&str] = &["url.txt", "link.txt", "links.txt", "share_link.txt", "hy2_link.txt"];
pub const CLIENT_CONFIGS: &[&str] = &["client.json", "client.yaml", "client.yml"];
const V2_ONLY_KEYS: &[&str] = &["masquerade", "transport", "fastopen"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    V1,
    V2,
}

impl Flavor {
    pub fn service_name(self) -> &'static str {
        match self {
            Flavor::V1 => "Hysteria",
            Flavor::V2 => "Hysteria2",
        }
    }

    pub fn scheme(self) -> &'static str {
        match self {
            Flavor::V1 => "hysteria",
            Flavor::V2 => "hysteria2",
        }
    }

    fn from_scheme(link: &str) -> Option<Self> {
        if link.starts_with("hysteria2://") || link.starts_with("hy2://") {
            Some(Flavor::V2)
        } else if link.starts_with("hysteria://") {
            Some(Flavor::V1)
        } else {
            None
        }
    }
}

/// Lines of operator-written link files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkFileEvidence {
    pub links: Vec<String>,
}

impl LinkFileEvidence {
    /// A line with a full query string carrying `sni=` is taken as correct
    /// and only relabelled.
    pub fn authoritative(&self) -> Vec<&String> {
        self.links
            .iter()
            .filter(|link| link.contains('?') && link.contains("sni="))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientEvidence {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
    pub sni: Option<String>,
    pub insecure: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerEvidence {
    pub listen_host: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
    /// Decoy target for HTTP disguise; never an SNI.
    pub masquerade: Option<String>,
    pub sni: Option<String>,
    pub acme_domains: Vec<String>,
    pub has_v2_keys: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evidence {
    LinkFiles(LinkFileEvidence),
    Client(ClientEvidence),
    Server(ServerEvidence),
    Version(Flavor),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HysteriaFindings {
    pub links: LinkFileEvidence,
    pub client: Option<ClientEvidence>,
    pub server: Option<ServerEvidence>,
    pub version_flavor: Option<Flavor>,
}

/// Node facts the link host may come from, in addition to config evidence.
#[derive(Debug, Clone, Default)]
pub struct HostContext {
    pub known_domains: Vec<String>,
    pub primary_ip: Option<String>,
    pub public_ip: Option<String>,
    pub node_name: String,
    /// Flavour implied by the process name when no other signal exists.
    pub default_flavor: Option<Flavor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HysteriaProfile {
    pub flavor: Flavor,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub sni: Option<String>,
    pub insecure: bool,
    pub masquerade: Option<String>,
    pub domains: Vec<String>,
    pub share_links: Vec<String>,
}

fn load_document(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    let parsed = if path.extension().map_or(false, |ext| ext == "json") {
        serde_json::from_str::<Value>(&content).map_err(|e| e.to_string())
    } else {
        serde_yaml_ng::from_str::<Value>(&content).map_err(|e| e.to_string())
    };
    match parsed {
        Ok(value) if value.is_object() => Some(value),
        Ok(_) => None,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "unreadable hysteria config");
            None
        }
    }
}

fn text(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn flag(value: &Value, pointer: &str) -> Option<bool> {
    match value.pointer(pointer)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(matches!(s.as_str(), "true" | "1")),
        _ => None,
    }
}

pub fn link_file_step(dir: &Path) -> Option<Evidence> {
    let mut evidence = LinkFileEvidence::default();
    for name in LINK_FILES {
        let Ok(content) = std::fs::read_to_string(dir.join(name)) else {
            continue;
        };
        for line in content.lines().map(str::trim) {
            if Flavor::from_scheme(line).is_some() {
                push_unique(&mut evidence.links, line.to_string());
            }
        }
    }
    (!evidence.links.is_empty()).then_some(Evidence::LinkFiles(evidence))
}

pub fn client_config_step(dir: &Path) -> Option<Evidence> {
    let doc = CLIENT_CONFIGS.iter().find_map(|name| load_document(&dir.join(name)))?;

    // Port hopping (`host:443,20000-30000`) keeps the first port.
    let server = text(&doc, "/server").map(|s| s.split(',').next().unwrap_or_default().to_string());
    let (host, port) = match server.as_deref().and_then(split_host_port) {
        Some((host, port)) => ((!host.is_empty()).then_some(host), Some(port)),
        None => (None, None),
    };

    Some(Evidence::Client(ClientEvidence {
        host,
        port,
        password: text(&doc, "/auth").or_else(|| text(&doc, "/auth_str")),
        sni: text(&doc, "/tls/sni").or_else(|| text(&doc, "/server_name")),
        insecure: flag(&doc, "/tls/insecure").or_else(|| flag(&doc, "/insecure")),
    }))
}

pub fn server_config_step(path: &Path) -> Option<Evidence> {
    let doc = load_document(path)?;

    let (listen_host, port) = match text(&doc, "/listen").as_deref().and_then(split_host_port) {
        Some((host, port)) => ((!host.is_empty()).then_some(host), Some(port)),
        None => (None, None),
    };
    let password = text(&doc, "/auth/password")
        .or_else(|| text(&doc, "/auth"))
        .or_else(|| text(&doc, "/auth_str"))
        .or_else(|| text(&doc, "/auth/config/0"));
    let masquerade = text(&doc, "/masquerade/proxy/url")
        .or_else(|| text(&doc, "/masquerade/url"))
        .or_else(|| text(&doc, "/masquerade"));
    let acme_domains = doc
        .pointer("/acme/domains")
        .and_then(Value::as_array)
        .map(|domains| {
            domains
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let has_v2_keys = doc
        .as_object()
        .map_or(false, |map| V2_ONLY_KEYS.iter().any(|key| map.contains_key(*key)));

    Some(Evidence::Server(ServerEvidence {
        listen_host,
        port,
        password,
        masquerade,
        sni: text(&doc, "/sni").or_else(|| text(&doc, "/tls/sni")),
        acme_domains,
        has_v2_keys,
    }))
}

pub fn version_step(version: Option<&str>) -> Option<Evidence> {
    let caps = MAJOR_VERSION.captures(version?.trim())?;
    match &caps[1] {
        "1" => Some(Evidence::Version(Flavor::V1)),
        "2" => Some(Evidence::Version(Flavor::V2)),
        _ => None,
    }
}

/// Run every evidence step for one process.
pub fn collect_evidence(config_path: Option<&Path>, version: Option<&str>) -> Vec<Evidence> {
    let dir: Option<PathBuf> = config_path.map(|path| {
        if path.is_dir() {
            path.to_path_buf()
        } else {
            path.parent().map(Path::to_path_buf).unwrap_or_default()
        }
    });
    let server_file = config_path.filter(|path| path.is_file());

    [
        dir.as_deref().and_then(link_file_step),
        dir.as_deref().and_then(client_config_step),
        server_file.and_then(server_config_step),
        version_step(version),
    ]
    .into_iter()
    .flatten()
    .collect()
}

pub fn reduce(evidence: Vec<Evidence>) -> HysteriaFindings {
    evidence.into_iter().fold(HysteriaFindings::default(), |mut findings, item| {
        match item {
            Evidence::LinkFiles(links) => {
                for link in links.links {
                    push_unique(&mut findings.links.links, link);
                }
            }
            Evidence::Client(client) => findings.client = Some(client),
            Evidence::Server(server) => findings.server = Some(server),
            Evidence::Version(flavor) => findings.version_flavor = Some(flavor),
        }
        findings
    })
}

/// Version output, then link scheme, then v2-only config keys. Any v2
/// signal makes the result v2.
pub fn infer_flavor(findings: &HysteriaFindings, default: Option<Flavor>) -> Flavor {
    let signals = [
        findings.version_flavor,
        findings.links.links.iter().find_map(|l| Flavor::from_scheme(l)),
        findings
            .server
            .as_ref()
            .and_then(|s| s.has_v2_keys.then_some(Flavor::V2)),
        default,
    ];
    if signals.contains(&Some(Flavor::V2)) {
        return Flavor::V2;
    }
    signals.into_iter().flatten().next().unwrap_or(Flavor::V2)
}

fn force_scheme(link: &str, flavor: Flavor) -> String {
    let rest = link.split_once("://").map(|(_, rest)| rest).unwrap_or(link);
    format!("{}://{}", flavor.scheme(), rest)
}

fn is_hostname(host: &str) -> bool {
    host.parse::<std::net::IpAddr>().is_err()
}

/// Decide host, SNI, flavour and share links from folded findings.
pub fn build_profile(findings: &HysteriaFindings, ctx: &HostContext) -> HysteriaProfile {
    let flavor = infer_flavor(findings, ctx.default_flavor);
    let client = findings.client.clone().unwrap_or_default();
    let server = findings.server.clone().unwrap_or_default();

    let host = client
        .host
        .iter()
        .chain(ctx.known_domains.iter())
        .chain(server.acme_domains.iter())
        .chain(server.listen_host.iter())
        .chain(ctx.primary_ip.iter())
        .chain(ctx.public_ip.iter())
        .find(|candidate| is_public_host(candidate))
        .cloned();

    let sni = client
        .sni
        .clone()
        .or_else(|| server.sni.clone())
        .or_else(|| server.acme_domains.first().cloned())
        .or_else(|| host.clone().filter(|h| is_hostname(h)));
    let insecure = client.insecure.unwrap_or(server.acme_domains.is_empty());
    let port = server.port.or(client.port);
    let password = client.password.clone().or_else(|| server.password.clone());

    let mut share_links: Vec<String> = findings
        .links
        .authoritative()
        .into_iter()
        .map(|link| relabel(&force_scheme(link, flavor), &ctx.node_name))
        .collect();

    let host_represented = host.as_ref().map_or(true, |host| {
        share_links
            .iter()
            .any(|link| link_endpoint(link).map_or(false, |(h, _)| &h == host))
    });
    if !host_represented {
        if let (Some(host), Some(port), Some(password)) = (&host, port, &password) {
            let link = hysteria_link(
                flavor.scheme(),
                password,
                host,
                port,
                insecure,
                sni.as_deref().unwrap_or_default(),
                &ctx.node_name,
            );
            push_unique(&mut share_links, link);
        }
    }

    let mut domains = Vec::new();
    for domain in sni.iter().chain(server.acme_domains.iter()) {
        if is_hostname(domain) {
            push_unique(&mut domains, domain.clone());
        }
    }

    HysteriaProfile {
        flavor,
        port,
        host,
        sni,
        insecure,
        masquerade: server.masquerade,
        domains,
        share_links,
    }
}
