// Multi-inbound JSON proxy config parser (Xray / V2Ray / sing-box style)
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::links::{
    hysteria_link, shadowsocks_link, trojan_link, vless_link, vmess_link, LinkParams, VmessLink,
    HOST_PLACEHOLDER,
};
use super::push_unique;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XrayConfigInfo {
    pub protocols: Vec<String>,
    pub ports: Vec<u16>,
    pub domains: Vec<String>,
    pub share_links: Vec<String>,
}

impl XrayConfigInfo {
    fn absorb(&mut self, other: XrayConfigInfo) {
        for protocol in other.protocols {
            push_unique(&mut self.protocols, protocol);
        }
        for port in other.ports {
            push_unique(&mut self.ports, port);
        }
        for domain in other.domains {
            push_unique(&mut self.domains, domain);
        }
        for link in other.share_links {
            push_unique(&mut self.share_links, link);
        }
    }
}

/// Parse a config file, or every `*.json` file of a directory (link exports
/// excluded, sorted by name). Returns `None` when nothing parseable was found.
pub fn parse_xray_path(path: &Path) -> Option<XrayConfigInfo> {
    if path.is_dir() {
        let files = json_config_files(path);
        if files.is_empty() {
            return None;
        }
        let mut aggregated = XrayConfigInfo::default();
        let mut parsed_any = false;
        for file in files {
            if let Some(info) = parse_xray_file(&file) {
                aggregated.absorb(info);
                parsed_any = true;
            }
        }
        return parsed_any.then_some(aggregated);
    }
    parse_xray_file(path)
}

/// Config files of a confdir, sorted so aggregation is stable.
pub fn json_config_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .filter(|p| {
                let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
                name.ends_with(".json") && !name.to_lowercase().contains("link")
            })
            .collect(),
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "cannot list config directory");
            Vec::new()
        }
    };
    files.sort();
    files
}

pub fn parse_xray_file(path: &Path) -> Option<XrayConfigInfo> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot read proxy config");
            return None;
        }
    };
    match parse_xray_str(&content) {
        Some(info) => Some(info),
        None => {
            warn!(path = %path.display(), "proxy config is not valid JSON");
            None
        }
    }
}

pub fn parse_xray_str(content: &str) -> Option<XrayConfigInfo> {
    let root: Value = serde_json::from_str(content).ok()?;
    let mut info = XrayConfigInfo::default();

    let inbounds = root.get("inbounds").and_then(Value::as_array);
    for (index, inbound) in inbounds.into_iter().flatten().enumerate() {
        let protocol = inbound_protocol(inbound);
        if protocol.is_empty() {
            continue;
        }
        push_unique(&mut info.protocols, protocol.clone());

        if let Some(port) = inbound_port(inbound) {
            push_unique(&mut info.ports, port);
        }
        for domain in inbound_domains(inbound) {
            push_unique(&mut info.domains, domain);
        }

        // A bad inbound must not cost the rest of the file its links.
        match build_share_link(inbound, HOST_PLACEHOLDER) {
            Ok(Some(link)) => push_unique(&mut info.share_links, link),
            Ok(None) => {}
            Err(reason) => debug!(inbound = index, protocol = %protocol, reason = %reason, "share link skipped"),
        }
    }

    Some(info)
}

fn inbound_protocol(inbound: &Value) -> String {
    // sing-box spells it `type`
    str_at(inbound, &["protocol"])
        .or_else(|| str_at(inbound, &["type"]))
        .unwrap_or_default()
        .to_lowercase()
}

fn inbound_port(inbound: &Value) -> Option<u16> {
    let port = inbound.get("port").or_else(|| inbound.get("listen_port"))?;
    match port {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        // "443" or a range "1000-2000"; a range reports its first port
        Value::String(s) => s.split(&['-', ','][..]).next()?.trim().parse().ok(),
        _ => None,
    }
}

fn inbound_domains(inbound: &Value) -> Vec<String> {
    let stream = inbound.get("streamSettings").unwrap_or(&Value::Null);
    let mut domains = Vec::new();

    let candidates = [
        str_at(stream, &["tlsSettings", "serverName"]),
        str_at(stream, &["xtlsSettings", "serverName"]),
        str_at(stream, &["wsSettings", "headers", "Host"]),
        str_at(stream, &["wsSettings", "host"]),
        str_at(stream, &["httpupgradeSettings", "host"]),
        str_at(stream, &["xhttpSettings", "host"]),
        str_at(inbound, &["tls", "server_name"]),
    ];
    for candidate in candidates.into_iter().flatten() {
        push_unique(&mut domains, candidate.to_string());
    }
    for name in strings_at(stream, &["realitySettings", "serverNames"]) {
        push_unique(&mut domains, name);
    }
    for host in strings_at(stream, &["httpSettings", "host"]) {
        push_unique(&mut domains, host);
    }
    domains.retain(|d| !d.is_empty());
    domains
}

/// Transport and security settings shared by vless/trojan/vmess links.
#[derive(Debug, Clone, Default)]
struct StreamParams {
    network: String,
    security: String,
    sni: String,
    fingerprint: String,
    alpn: String,
    public_key: String,
    short_id: String,
    spider_x: String,
    path: String,
    host: String,
    service_name: String,
    mode: String,
    header_type: String,
    quic_security: String,
    key: String,
    seed: String,
}

impl StreamParams {
    fn from_inbound(inbound: &Value) -> Self {
        let stream = inbound.get("streamSettings").unwrap_or(&Value::Null);
        let network = str_at(stream, &["network"]).unwrap_or("tcp").to_string();
        let security = str_at(stream, &["security"]).unwrap_or("none").to_string();

        let mut params = StreamParams {
            network: network.clone(),
            security: security.clone(),
            ..Default::default()
        };

        match security.as_str() {
            "tls" | "xtls" => {
                let tls_key = if security == "xtls" { "xtlsSettings" } else { "tlsSettings" };
                params.sni = str_at(stream, &[tls_key, "serverName"]).unwrap_or_default().to_string();
                params.fingerprint = str_at(stream, &[tls_key, "fingerprint"]).unwrap_or_default().to_string();
                params.alpn = strings_at(stream, &[tls_key, "alpn"]).join(",");
            }
            "reality" => {
                params.sni = strings_at(stream, &["realitySettings", "serverNames"])
                    .into_iter()
                    .next()
                    .unwrap_or_default();
                params.fingerprint = str_at(stream, &["realitySettings", "fingerprint"])
                    .unwrap_or("chrome")
                    .to_string();
                params.public_key = str_at(stream, &["realitySettings", "publicKey"])
                    .unwrap_or_default()
                    .to_string();
                params.short_id = strings_at(stream, &["realitySettings", "shortIds"])
                    .into_iter()
                    .next()
                    .unwrap_or_default();
                params.spider_x = str_at(stream, &["realitySettings", "spiderX"])
                    .unwrap_or_default()
                    .to_string();
            }
            _ => {}
        }

        match network.as_str() {
            "ws" => {
                params.path = str_at(stream, &["wsSettings", "path"]).unwrap_or_default().to_string();
                params.host = str_at(stream, &["wsSettings", "headers", "Host"])
                    .or_else(|| str_at(stream, &["wsSettings", "host"]))
                    .unwrap_or_default()
                    .to_string();
            }
            "http" | "h2" => {
                params.path = str_at(stream, &["httpSettings", "path"]).unwrap_or_default().to_string();
                params.host = strings_at(stream, &["httpSettings", "host"]).join(",");
            }
            "grpc" => {
                params.service_name = str_at(stream, &["grpcSettings", "serviceName"])
                    .unwrap_or_default()
                    .to_string();
                if bool_at(stream, &["grpcSettings", "multiMode"]) {
                    params.mode = "multi".to_string();
                } else {
                    params.mode = "gun".to_string();
                }
            }
            "httpupgrade" => {
                params.path = str_at(stream, &["httpupgradeSettings", "path"]).unwrap_or_default().to_string();
                params.host = str_at(stream, &["httpupgradeSettings", "host"]).unwrap_or_default().to_string();
            }
            "xhttp" | "splithttp" => {
                let key = if network == "xhttp" { "xhttpSettings" } else { "splithttpSettings" };
                params.path = str_at(stream, &[key, "path"]).unwrap_or_default().to_string();
                params.host = str_at(stream, &[key, "host"]).unwrap_or_default().to_string();
                params.mode = str_at(stream, &[key, "mode"]).unwrap_or_default().to_string();
            }
            "tcp" | "raw" => {
                params.header_type = str_at(stream, &["tcpSettings", "header", "type"])
                    .unwrap_or_default()
                    .to_string();
                if params.header_type == "http" {
                    params.path = strings_at(stream, &["tcpSettings", "header", "request", "path"])
                        .into_iter()
                        .next()
                        .unwrap_or_default();
                }
            }
            "kcp" | "mkcp" => {
                params.header_type = str_at(stream, &["kcpSettings", "header", "type"])
                    .unwrap_or_default()
                    .to_string();
                params.seed = str_at(stream, &["kcpSettings", "seed"]).unwrap_or_default().to_string();
            }
            "quic" => {
                params.quic_security = str_at(stream, &["quicSettings", "security"])
                    .unwrap_or_default()
                    .to_string();
                params.key = str_at(stream, &["quicSettings", "key"]).unwrap_or_default().to_string();
                params.header_type = str_at(stream, &["quicSettings", "header", "type"])
                    .unwrap_or_default()
                    .to_string();
            }
            _ => {}
        }

        params
    }

    fn to_link_params(&self, encryption: Option<&str>, flow: &str) -> LinkParams {
        let mut params = LinkParams::new();
        if let Some(encryption) = encryption {
            params.set("encryption", encryption);
        }
        params
            .set("type", self.network.as_str())
            .set("security", self.security.as_str())
            .set("flow", flow)
            .set("sni", self.sni.as_str())
            .set("fp", self.fingerprint.as_str())
            .set("alpn", self.alpn.as_str())
            .set("pbk", self.public_key.as_str())
            .set("sid", self.short_id.as_str())
            .set("spx", self.spider_x.as_str())
            .set("path", self.path.as_str())
            .set("host", self.host.as_str())
            .set("serviceName", self.service_name.as_str())
            .set("mode", self.mode.as_str())
            .set("headerType", self.header_type.as_str())
            .set("quicSecurity", self.quic_security.as_str())
            .set("key", self.key.as_str())
            .set("seed", self.seed.as_str());
        params
    }
}

fn inbound_label(inbound: &Value, protocol: &str, port: u16) -> String {
    match str_at(inbound, &["tag"]).filter(|t| !t.is_empty()) {
        Some(tag) => tag.to_string(),
        None => format!("{}-{}", protocol, port),
    }
}

/// Synthesize one share link for an inbound. `Ok(None)` for protocols that
/// have no client link (dokodemo-door, socks, http, ...).
pub fn build_share_link(inbound: &Value, host: &str) -> Result<Option<String>, String> {
    let protocol = inbound_protocol(inbound);
    if !matches!(
        protocol.as_str(),
        "vmess" | "vless" | "trojan" | "shadowsocks" | "hysteria2" | "hysteria"
    ) {
        return Ok(None);
    }

    let port = inbound_port(inbound).ok_or("inbound has no usable port")?;
    let label = inbound_label(inbound, &protocol, port);
    let settings = inbound.get("settings").unwrap_or(&Value::Null);
    let first_client = settings
        .get("clients")
        .or_else(|| inbound.get("users"))
        .and_then(Value::as_array)
        .and_then(|clients| clients.first());
    let stream = StreamParams::from_inbound(inbound);

    let link = match protocol.as_str() {
        "vmess" => {
            let client = first_client.ok_or("vmess inbound has no clients")?;
            let id = str_at(client, &["id"]).ok_or("vmess client has no id")?;
            let aid = client.get("alterId").and_then(Value::as_u64).unwrap_or(0);
            let tls = if stream.security == "tls" { "tls" } else { "" };
            vmess_link(&VmessLink {
                v: "2".to_string(),
                ps: label,
                add: host.to_string(),
                port: port.to_string(),
                id: id.to_string(),
                aid: aid.to_string(),
                net: stream.network.clone(),
                header_type: if stream.header_type.is_empty() { "none".to_string() } else { stream.header_type.clone() },
                host: stream.host.clone(),
                path: if stream.service_name.is_empty() { stream.path.clone() } else { stream.service_name.clone() },
                tls: tls.to_string(),
                sni: Some(stream.sni.clone()).filter(|s| !s.is_empty()),
                fp: Some(stream.fingerprint.clone()).filter(|s| !s.is_empty()),
                alpn: Some(stream.alpn.clone()).filter(|s| !s.is_empty()),
            })
            .map_err(|e| e.to_string())?
        }
        "vless" => {
            let client = first_client.ok_or("vless inbound has no clients")?;
            let id = str_at(client, &["id"]).or_else(|| str_at(client, &["uuid"])).ok_or("vless client has no id")?;
            let flow = str_at(client, &["flow"]).unwrap_or_default();
            let encryption = str_at(settings, &["decryption"]).unwrap_or("none");
            let params = stream.to_link_params(Some(encryption), flow);
            vless_link(id, host, port, &params, &label)
        }
        "trojan" => {
            let client = first_client.ok_or("trojan inbound has no clients")?;
            let password = str_at(client, &["password"]).ok_or("trojan client has no password")?;
            let params = stream.to_link_params(None, "");
            trojan_link(password, host, port, &params, &label)
        }
        "shadowsocks" => {
            let method = str_at(settings, &["method"])
                .or_else(|| first_client.and_then(|c| str_at(c, &["method"])))
                .or_else(|| str_at(inbound, &["method"]))
                .ok_or("shadowsocks inbound has no method")?;
            let password = str_at(settings, &["password"])
                .or_else(|| first_client.and_then(|c| str_at(c, &["password"])))
                .or_else(|| str_at(inbound, &["password"]))
                .ok_or("shadowsocks inbound has no password")?;
            shadowsocks_link(method, password, host, port, &label)
        }
        _ => {
            let password = first_client
                .and_then(|c| str_at(c, &["password"]))
                .or_else(|| str_at(settings, &["password"]))
                .ok_or("hysteria inbound has no password")?;
            let sni = str_at(inbound, &["tls", "server_name"]).unwrap_or(stream.sni.as_str());
            hysteria_link(&protocol, password, host, port, false, sni, &label)
        }
    };

    Ok(Some(link))
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    current.as_str()
}

/// A string or array of strings at `path`, normalised to a vector.
fn strings_at(value: &Value, path: &[&str]) -> Vec<String> {
    let mut current = value;
    for key in path {
        match current.get(*key) {
            Some(next) => current = next,
            None => return Vec::new(),
        }
    }
    match current {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn bool_at(value: &Value, path: &[&str]) -> bool {
    let mut current = value;
    for key in path {
        match current.get(*key) {
            Some(next) => current = next,
            None => return false,
        }
    }
    current.as_bool().unwrap_or(false)
}
