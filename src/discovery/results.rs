use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::protocol::cert::CertificateInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    Proxy,
    Web,
    Database,
    Container,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub image: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// Protocol-specific extras. Known shapes are typed; `extra` carries
/// passthrough data with no fixed schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceDetails {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub share_links: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ssl_certificates: Vec<CertificateInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ServiceDetails {
    pub fn is_empty(&self) -> bool {
        *self == ServiceDetails::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedService {
    pub service_name: String,
    pub service_type: ServiceType,
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_info: Option<ContainerInfo>,
    #[serde(default)]
    pub details: ServiceDetails,
}

impl DetectedService {
    pub fn new(service_name: impl Into<String>, service_type: ServiceType) -> Self {
        Self {
            service_name: service_name.into(),
            service_type,
            status: ServiceStatus::Running,
            port: None,
            protocol: None,
            config_path: None,
            config_hash: None,
            domains: Vec::new(),
            container_info: None,
            details: ServiceDetails::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Dedup key used by fusion.
    pub fn key(&self) -> (String, Option<u16>) {
        (self.service_name.clone(), self.port)
    }

    pub fn add_domains<I, S>(&mut self, domains: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for domain in domains {
            let domain = domain.into();
            let domain = domain.trim();
            if !domain.is_empty() && !self.domains.iter().any(|d| d == domain) {
                self.domains.push(domain.to_string());
            }
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceType::Proxy => write!(f, "proxy"),
            ServiceType::Web => write!(f, "web"),
            ServiceType::Database => write!(f, "database"),
            ServiceType::Container => write!(f, "container"),
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_shape() {
        let mut service = DetectedService::new("Nginx", ServiceType::Web)
            .with_port(443)
            .with_protocol("https");
        service.add_domains(["a.example.com", "a.example.com", " "]);

        let json = serde_json::to_value(&service).unwrap();
        assert_eq!(json["serviceName"], "Nginx");
        assert_eq!(json["serviceType"], "WEB");
        assert_eq!(json["status"], "RUNNING");
        assert_eq!(json["port"], 443);
        assert_eq!(json["domains"], serde_json::json!(["a.example.com"]));
        assert!(json.get("configHash").is_none());
        assert_eq!(json["details"], serde_json::json!({}));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", ServiceStatus::Running), "running");
        assert_eq!(format!("{}", ServiceType::Database), "database");
    }
}
