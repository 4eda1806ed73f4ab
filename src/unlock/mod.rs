// Network-unlock classification: DNS heuristic plus per-platform probes

pub mod dns;
pub mod http;
pub mod platforms;
pub mod results;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::AgentConfig;
use dns::DnsResolver;
use http::HttpClient;
use platforms::{all_probes, PlatformProbe, ProbeContext};
pub use results::{Platform, StreamingResult, UnlockStatus, UnlockType};

pub struct UnlockDetector {
    http: Arc<dyn HttpClient>,
    dns: Arc<dyn DnsResolver>,
    clock: Arc<dyn Clock>,
    dns_timeout: Duration,
    probes: Vec<Box<dyn PlatformProbe>>,
    geo: OnceCell<Option<String>>,
}

impl UnlockDetector {
    pub fn new(
        config: &AgentConfig,
        http: Arc<dyn HttpClient>,
        dns: Arc<dyn DnsResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            dns,
            clock,
            dns_timeout: config.dns_timeout(),
            probes: all_probes(),
            geo: OnceCell::new(),
        }
    }

    /// Forget the memoised geolocation.
    pub fn reset(&mut self) {
        self.geo = OnceCell::new();
    }

    pub async fn detect_all(&self) -> Vec<StreamingResult> {
        self.detect(&Platform::ALL, |_| {}).await
    }

    /// Probes run one platform at a time; `on_result` sees each as it lands.
    pub async fn detect<F>(&self, platforms: &[Platform], mut on_result: F) -> Vec<StreamingResult>
    where
        F: FnMut(&StreamingResult),
    {
        let mut results = Vec::with_capacity(platforms.len());
        for probe in self.probes.iter().filter(|p| platforms.contains(&p.platform())) {
            let result = self.run_probe(probe.as_ref()).await;
            on_result(&result);
            results.push(result);
        }
        results
    }

    pub async fn detect_one(&self, platform: Platform) -> Option<StreamingResult> {
        let probe = self.probes.iter().find(|p| p.platform() == platform)?;
        Some(self.run_probe(probe.as_ref()).await)
    }

    async fn run_probe(&self, probe: &dyn PlatformProbe) -> StreamingResult {
        let ctx = ProbeContext {
            http: self.http.as_ref(),
            dns: self.dns.as_ref(),
            dns_timeout: self.dns_timeout,
            now: self.clock.now(),
            geo: &self.geo,
        };
        let platform = probe.platform();
        debug!(platform = %platform, "probing");

        match probe.probe(&ctx).await {
            Ok(result) => {
                info!(
                    platform = %platform,
                    status = %result.status,
                    region = result.region.as_deref().unwrap_or("-"),
                    "unlock probe finished"
                );
                result
            }
            Err(e) => {
                info!(platform = %platform, error = %e, "unlock probe failed");
                StreamingResult::failed(platform, e.to_string(), ctx.now)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedClock, ScriptedHttp, StaticDns};
    use chrono::TimeZone;

    fn detector(http: ScriptedHttp) -> UnlockDetector {
        let clock = FixedClock(chrono::Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap());
        UnlockDetector::new(
            &AgentConfig::default(),
            Arc::new(http),
            Arc::new(StaticDns::new()),
            Arc::new(clock),
        )
    }

    #[tokio::test]
    async fn test_every_platform_reports_even_when_offline() {
        let detector = detector(ScriptedHttp::new());
        let mut seen = 0;
        let results = detector.detect(&Platform::ALL, |_| seen += 1).await;

        assert_eq!(seen, 7);
        assert_eq!(results.len(), 7);
        assert!(results.iter().all(|r| r.status == UnlockStatus::Failed));
        assert!(results.iter().all(|r| r.error_msg.is_some()));
    }

    #[tokio::test]
    async fn test_subset_and_single_probe() {
        let http = ScriptedHttp::new().on_text(platforms::reddit::HOME_URL, 403, "");
        let detector = detector(http);

        let results = detector.detect(&[Platform::Reddit], |_| {}).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, UnlockStatus::No);

        let single = detector.detect_one(Platform::Reddit).await.unwrap();
        assert_eq!(single.service, Platform::Reddit);
    }

    #[tokio::test]
    async fn test_geolocation_is_memoised_until_reset() {
        let http = Arc::new(
            ScriptedHttp::new()
                .on_text(platforms::GEO_TRACE_URL, 200, "loc=NL\n")
                .on_text(platforms::netflix::GLOBAL_TITLE_URL, 200, "page")
                .on_text(platforms::netflix::ORIGINAL_TITLE_URL, 200, "page"),
        );
        let clock = FixedClock(chrono::Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap());
        let mut detector = UnlockDetector::new(
            &AgentConfig::default(),
            http.clone(),
            Arc::new(StaticDns::new()),
            Arc::new(clock),
        );

        let trace_calls = |http: &ScriptedHttp| {
            http.requests()
                .iter()
                .filter(|r| r.url == platforms::GEO_TRACE_URL)
                .count()
        };

        detector.detect_one(Platform::Netflix).await;
        detector.detect_one(Platform::Netflix).await;
        assert_eq!(trace_calls(&http), 1);

        detector.reset();
        let result = detector.detect_one(Platform::Netflix).await.unwrap();
        assert_eq!(result.region.as_deref(), Some("NL"));
        assert_eq!(trace_calls(&http), 2);
    }
}
