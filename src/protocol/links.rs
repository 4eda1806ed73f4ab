// Client share-link synthesis (vmess, vless, trojan, ss, hysteria)
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;

use crate::network::uri_host;

/// Stands in for the host until the caller knows the node's public address.
pub const HOST_PLACEHOLDER: &str = "__HOST__";

/// Query keys in emission order. Each key is written at most once.
pub const LINK_PARAM_KEYS: &[&str] = &[
    "encryption",
    "type",
    "security",
    "flow",
    "sni",
    "fp",
    "alpn",
    "pbk",
    "sid",
    "spx",
    "path",
    "host",
    "serviceName",
    "mode",
    "headerType",
    "quicSecurity",
    "key",
    "seed",
];

/// Ordered query parameters restricted to `LINK_PARAM_KEYS`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkParams {
    values: Vec<(&'static str, String)>,
}

impl LinkParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter. Unknown keys and empty values are ignored; the first
    /// value for a key wins.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        if value.is_empty() {
            return self;
        }
        if let Some(known) = LINK_PARAM_KEYS.iter().find(|k| **k == key) {
            if !self.values.iter().any(|(k, _)| k == known) {
                self.values.push((*known, value));
            }
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn to_query(&self) -> String {
        LINK_PARAM_KEYS
            .iter()
            .filter_map(|key| {
                self.get(key)
                    .map(|value| format!("{}={}", key, urlencoding::encode(value)))
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct VmessLink {
    pub v: String,
    pub ps: String,
    pub add: String,
    pub port: String,
    pub id: String,
    pub aid: String,
    pub net: String,
    #[serde(rename = "type")]
    pub header_type: String,
    pub host: String,
    pub path: String,
    pub tls: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpn: Option<String>,
}

pub fn vmess_link(link: &VmessLink) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(link)?;
    Ok(format!("vmess://{}", STANDARD.encode(json)))
}

pub fn vless_link(uuid: &str, host: &str, port: u16, params: &LinkParams, label: &str) -> String {
    format!(
        "vless://{}@{}:{}?{}#{}",
        uuid,
        uri_host(host),
        port,
        params.to_query(),
        urlencoding::encode(label)
    )
}

pub fn trojan_link(password: &str, host: &str, port: u16, params: &LinkParams, label: &str) -> String {
    format!(
        "trojan://{}@{}:{}?{}#{}",
        urlencoding::encode(password),
        uri_host(host),
        port,
        params.to_query(),
        urlencoding::encode(label)
    )
}

pub fn shadowsocks_link(method: &str, password: &str, host: &str, port: u16, label: &str) -> String {
    let user_info = STANDARD.encode(format!("{}:{}", method, password));
    format!(
        "ss://{}@{}:{}#{}",
        user_info,
        uri_host(host),
        port,
        urlencoding::encode(label)
    )
}

/// `hysteria://` or `hysteria2://`; note the literal `/` before the query.
pub fn hysteria_link(
    scheme: &str,
    password: &str,
    host: &str,
    port: u16,
    insecure: bool,
    sni: &str,
    label: &str,
) -> String {
    format!(
        "{}://{}@{}:{}/?insecure={}&sni={}#{}",
        scheme,
        urlencoding::encode(password),
        uri_host(host),
        port,
        if insecure { 1 } else { 0 },
        urlencoding::encode(sni),
        urlencoding::encode(label)
    )
}

/// Replace the `#label` fragment of an existing link.
pub fn relabel(link: &str, label: &str) -> String {
    let base = link.split_once('#').map(|(base, _)| base).unwrap_or(link);
    format!("{}#{}", base, urlencoding::encode(label))
}

/// Substitute the placeholder host in a generated link.
///
/// vmess links carry the host inside base64 JSON, so they are decoded,
/// patched and re-encoded.
pub fn substitute_host(link: &str, host: &str) -> String {
    if let Some(payload) = link.strip_prefix("vmess://") {
        let patched = STANDARD
            .decode(payload)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .map(|json| json.replace(HOST_PLACEHOLDER, host));
        return match patched {
            Some(json) => format!("vmess://{}", STANDARD.encode(json)),
            None => link.to_string(),
        };
    }
    link.replace(HOST_PLACEHOLDER, &uri_host(host))
}

/// Host and port parsed back out of a `scheme://user@host:port...` link.
pub fn link_endpoint(link: &str) -> Option<(String, u16)> {
    let (_, rest) = link.split_once("://")?;
    let rest = rest.split(&['?', '#'][..]).next()?;
    let rest = rest.trim_end_matches('/');
    let authority = rest.rsplit_once('@').map(|(_, a)| a).unwrap_or(rest);
    let authority = authority.split('/').next()?;
    crate::network::split_host_port(authority).filter(|(host, _)| !host.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_emit_in_fixed_order_once() {
        let mut params = LinkParams::new();
        params
            .set("path", "/ws")
            .set("security", "tls")
            .set("type", "ws")
            .set("type", "grpc")
            .set("flow", "")
            .set("bogus", "x");
        assert_eq!(params.to_query(), "type=ws&security=tls&path=%2Fws");
    }

    #[test]
    fn test_trojan_link_encodes_password() {
        let mut params = LinkParams::new();
        params.set("security", "tls").set("sni", "example.com");
        let link = trojan_link("p@ss", "1.2.3.4", 443, &params, "node a");
        assert_eq!(link, "trojan://p%40ss@1.2.3.4:443?security=tls&sni=example.com#node%20a");
    }

    #[test]
    fn test_shadowsocks_link() {
        let link = shadowsocks_link("aes-256-gcm", "secret", "1.2.3.4", 8388, "ss");
        let encoded = STANDARD.encode("aes-256-gcm:secret");
        assert_eq!(link, format!("ss://{}@1.2.3.4:8388#ss", encoded));
    }

    #[test]
    fn test_hysteria_link_has_slash_before_query() {
        let link = hysteria_link("hysteria2", "pw", "vpn.example.com", 443, false, "vpn.example.com", "edge");
        assert_eq!(link, "hysteria2://pw@vpn.example.com:443/?insecure=0&sni=vpn.example.com#edge");
    }

    #[test]
    fn test_vmess_substitution_roundtrip() {
        let link = vmess_link(&VmessLink {
            v: "2".to_string(),
            ps: "vm".to_string(),
            add: HOST_PLACEHOLDER.to_string(),
            port: "10086".to_string(),
            id: "uuid".to_string(),
            aid: "0".to_string(),
            net: "tcp".to_string(),
            header_type: "none".to_string(),
            ..Default::default()
        })
        .unwrap();

        let patched = substitute_host(&link, "9.9.9.9");
        let payload = patched.strip_prefix("vmess://").unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&STANDARD.decode(payload).unwrap()).unwrap();
        assert_eq!(json["add"], "9.9.9.9");
        assert_eq!(json["type"], "none");
        assert!(json.get("sni").is_none());
    }

    #[test]
    fn test_relabel_and_endpoint() {
        let link = "hysteria2://pw@1.2.3.4:8443/?insecure=1&sni=a.com#old";
        assert_eq!(relabel(link, "new one"), "hysteria2://pw@1.2.3.4:8443/?insecure=1&sni=a.com#new%20one");
        assert_eq!(link_endpoint(link), Some(("1.2.3.4".to_string(), 8443)));
        assert_eq!(
            link_endpoint("vless://id@[2001:db8::1]:443?type=tcp#x"),
            Some(("2001:db8::1".to_string(), 443))
        );
    }
}
