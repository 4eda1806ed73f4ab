// Signed submission of scan results to the collector
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::unlock::http::{HttpClient, HttpRequest};

pub const SERVICES_PATH: &str = "/api/agent/services";
pub const STREAMING_PATH: &str = "/api/agent/streaming";

type HmacSha256 = Hmac<Sha256>;

/// Body plus the four authentication headers.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedRequest {
    pub body: String,
    pub api_key: String,
    pub timestamp: i64,
    pub nonce: String,
    pub signature: String,
}

impl SignedRequest {
    /// `X-Signature` is hex HMAC-SHA256 keyed by the API key over
    /// `"{timestamp}.{body}"`.
    pub fn sign(api_key: &str, body: String, now: DateTime<Utc>, nonce: [u8; 12]) -> Result<Self> {
        let timestamp = now.timestamp();
        let mut mac = HmacSha256::new_from_slice(api_key.as_bytes())
            .map_err(|e| Error::Config(format!("unusable API key: {}", e)))?;
        mac.update(format!("{}.{}", timestamp, body).as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(Self {
            body,
            api_key: api_key.to_string(),
            timestamp,
            nonce: hex::encode(nonce),
            signature,
        })
    }

    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-API-Key", self.api_key.clone()),
            ("X-Timestamp", self.timestamp.to_string()),
            ("X-Nonce", self.nonce.clone()),
            ("X-Signature", self.signature.clone()),
        ]
    }
}

pub fn random_nonce() -> [u8; 12] {
    let mut nonce = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

pub struct ReportClient {
    base_url: String,
    api_key: String,
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
}

impl ReportClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, http: Arc<dyn HttpClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
            clock,
        }
    }

    /// Needs both a collector URL and an API key.
    pub fn from_config(config: &AgentConfig, http: Arc<dyn HttpClient>, clock: Arc<dyn Clock>) -> Result<Self> {
        let base_url = config
            .collector_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| Error::Config("collectorUrl is not set".to_string()))?;
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::Config("apiKey is not set".to_string()))?;
        Ok(Self::new(base_url, api_key, http, clock))
    }

    pub async fn post<T: Serialize + ?Sized>(&self, path: &str, payload: &T) -> Result<()> {
        let body = serde_json::to_string(payload)?;
        let signed = SignedRequest::sign(&self.api_key, body, self.clock.now(), random_nonce())?;

        let url = format!("{}{}", self.base_url, path);
        let mut request = HttpRequest::post(url.as_str(), signed.body.clone())
            .header("Content-Type", "application/json");
        for (name, value) in signed.headers() {
            request = request.header(name, value);
        }

        debug!(url = %url, bytes = signed.body.len(), "submitting report");
        let response = self.http.send(request).await?;
        if !(200..300).contains(&response.status) {
            return Err(Error::Network(format!(
                "collector rejected {} with HTTP {}",
                path, response.status
            )));
        }
        info!(path = %path, status = response.status, "report accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedClock, ScriptedHttp};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_signature_covers_timestamp_and_body() {
        let signed = SignedRequest::sign("key", "[]".to_string(), now(), [0xab; 12]).unwrap();
        assert_eq!(signed.timestamp, 1_746_057_600);
        assert_eq!(signed.nonce, "abababababababababababab");

        let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
        mac.update(b"1746057600.[]");
        assert_eq!(signed.signature, hex::encode(mac.finalize().into_bytes()));
        assert_eq!(signed.signature.len(), 64);

        let other = SignedRequest::sign("key", "[1]".to_string(), now(), [0xab; 12]).unwrap();
        assert_ne!(signed.signature, other.signature);
    }

    #[test]
    fn test_nonces_differ() {
        assert_ne!(random_nonce(), random_nonce());
    }

    #[tokio::test]
    async fn test_post_sends_signed_headers() {
        let http = Arc::new(ScriptedHttp::new().on_text("https://collector.example.com/api/agent/services", 200, "{}"));
        let client = ReportClient::new("https://collector.example.com/", "key", http.clone(), Arc::new(FixedClock(now())));

        client.post(SERVICES_PATH, &Vec::<u8>::new()).await.unwrap();

        let sent = http.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body.as_deref(), Some("[]"));
        let header = |name: &str| {
            sent[0]
                .headers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(header("X-API-Key").as_deref(), Some("key"));
        assert_eq!(header("X-Timestamp").as_deref(), Some("1746057600"));
        assert_eq!(header("X-Nonce").map(|n| n.len()), Some(24));
    }

    #[tokio::test]
    async fn test_rejection_is_an_error() {
        let http = Arc::new(ScriptedHttp::new().on_text("https://c.example.com/api/agent/streaming", 401, ""));
        let client = ReportClient::new("https://c.example.com", "key", http, Arc::new(FixedClock(now())));
        assert!(client.post(STREAMING_PATH, &Vec::<u8>::new()).await.is_err());
    }

    #[test]
    fn test_from_config_requires_collector() {
        let config = AgentConfig::default();
        let http = Arc::new(ScriptedHttp::new());
        assert!(ReportClient::from_config(&config, http, Arc::new(FixedClock(now()))).is_err());
    }
}
