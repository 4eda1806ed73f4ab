// Per-platform unlock probes
// Each probe owns its request sequence and classification table.

pub mod amazon;
pub mod chatgpt;
pub mod disney;
pub mod netflix;
pub mod reddit;
pub mod tiktok;
pub mod youtube;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::debug;

use super::dns::{detect_unlock_type, DnsChecks, DnsResolver};
use super::http::{HttpClient, HttpRequest, HttpResponse};
use super::results::{Platform, StreamingResult, UnlockStatus, UnlockType};
use crate::error::Result;

pub const GEO_TRACE_URL: &str = "https://www.cloudflare.com/cdn-cgi/trace";

lazy_static::lazy_static! {
    static ref TRACE_LOC: Regex = Regex::new(r"(?m)^loc=([A-Za-z]{2})\s*$").unwrap();
    static ref COUNTRY_CODE: Regex = Regex::new(r#""countryCode"\s*:\s*"([A-Za-z]{2})""#).unwrap();
}

/// Everything a probe may touch during one run.
pub struct ProbeContext<'a> {
    pub http: &'a dyn HttpClient,
    pub dns: &'a dyn DnsResolver,
    pub dns_timeout: Duration,
    pub now: DateTime<Utc>,
    pub geo: &'a OnceCell<Option<String>>,
}

impl<'a> ProbeContext<'a> {
    pub async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.http.send(request).await
    }

    pub async fn unlock_type(&self, domains: &[&str], checks: DnsChecks) -> UnlockType {
        detect_unlock_type(self.dns, domains, checks, self.dns_timeout).await
    }

    /// Country of this host's egress address, looked up once per detector.
    pub async fn geo_region(&self) -> Option<String> {
        self.geo
            .get_or_init(|| async {
                match self.http.send(HttpRequest::get(GEO_TRACE_URL)).await {
                    Ok(response) => parse_trace_loc(&response.text()),
                    Err(e) => {
                        debug!(error = %e, "geolocation lookup failed");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    pub fn result(&self, platform: Platform, status: UnlockStatus) -> StreamingResult {
        StreamingResult::new(platform, status, self.now)
    }
}

#[async_trait]
pub trait PlatformProbe: Send + Sync {
    fn platform(&self) -> Platform;

    /// Errors are turned into a `failed` result by the caller.
    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StreamingResult>;
}

pub fn all_probes() -> Vec<Box<dyn PlatformProbe>> {
    vec![
        Box::new(netflix::NetflixProbe),
        Box::new(disney::DisneyProbe),
        Box::new(amazon::AmazonProbe),
        Box::new(youtube::YoutubeProbe),
        Box::new(tiktok::TiktokProbe),
        Box::new(reddit::RedditProbe),
        Box::new(chatgpt::ChatgptProbe),
    ]
}

/// `loc=XX` line of a Cloudflare trace body.
pub fn parse_trace_loc(body: &str) -> Option<String> {
    TRACE_LOC
        .captures(body)
        .map(|c| c[1].to_uppercase())
        .filter(|loc| loc != "XX")
}

pub fn country_code_marker(body: &str) -> Option<String> {
    capture_region(&COUNTRY_CODE, body)
}

pub(crate) fn capture_region(pattern: &Regex, body: &str) -> Option<String> {
    pattern.captures(body).map(|c| c[1].to_uppercase())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;

    pub fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap()
    }

    pub fn context<'a>(
        http: &'a dyn HttpClient,
        dns: &'a dyn DnsResolver,
        geo: &'a OnceCell<Option<String>>,
    ) -> ProbeContext<'a> {
        ProbeContext {
            http,
            dns,
            dns_timeout: Duration::from_secs(1),
            now: at(),
            geo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_loc() {
        let body = "fl=12f1\nh=www.cloudflare.com\nip=203.0.113.9\nloc=jp\ntls=TLSv1.3\n";
        assert_eq!(parse_trace_loc(body).as_deref(), Some("JP"));
        assert_eq!(parse_trace_loc("loc=XX\n"), None);
        assert_eq!(parse_trace_loc("nothing"), None);
    }

    #[test]
    fn test_country_code_marker() {
        assert_eq!(country_code_marker(r#"{"countryCode": "de"}"#).as_deref(), Some("DE"));
        assert!(country_code_marker("{}").is_none());
    }

    #[test]
    fn test_probe_order() {
        let order: Vec<Platform> = all_probes().iter().map(|p| p.platform()).collect();
        assert_eq!(order, Platform::ALL.to_vec());
    }
}
