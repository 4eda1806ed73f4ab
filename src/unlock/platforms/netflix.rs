use async_trait::async_trait;
use futures::future::join;
use regex::Regex;

use super::{capture_region, PlatformProbe, ProbeContext};
use crate::error::Result;
use crate::unlock::dns::DnsChecks;
use crate::unlock::http::HttpRequest;
use crate::unlock::results::{Platform, StreamingResult, UnlockStatus};

/// Licensed title, available wherever the service is.
pub const GLOBAL_TITLE_URL: &str = "https://www.netflix.com/title/81280792";
/// Own production, available even on the originals-only catalogue.
pub const ORIGINAL_TITLE_URL: &str = "https://www.netflix.com/title/70143836";

const UNAVAILABLE_MARKER: &str = "Oh no!";

lazy_static::lazy_static! {
    static ref REQUEST_COUNTRY: Regex = Regex::new(r#""requestCountry"\s*:\s*\{\s*"id"\s*:\s*"([A-Za-z]{2})""#).unwrap();
    static ref DATA_COUNTRY: Regex = Regex::new(r#"data-country="([A-Za-z]{2})""#).unwrap();
    static ref COUNTRY_CODE: Regex = Regex::new(r#""countryCode"\s*:\s*"([A-Za-z]{2})""#).unwrap();
    static ref URL_REGION: Regex = Regex::new(r"netflix\.com/([a-z]{2})(?:-[a-z]{2})?/title").unwrap();
}

/// Both pages blocked: originals only. Either page open: unlocked.
/// The trailing `No` arm cannot be reached once the first two are checked.
pub fn classify(global_has_oh_no: bool, original_has_oh_no: bool) -> UnlockStatus {
    if global_has_oh_no && original_has_oh_no {
        UnlockStatus::Org
    } else if !global_has_oh_no || !original_has_oh_no {
        UnlockStatus::Yes
    } else {
        UnlockStatus::No
    }
}

pub fn region_from_markup(body: &str) -> Option<String> {
    capture_region(&REQUEST_COUNTRY, body)
        .or_else(|| capture_region(&DATA_COUNTRY, body))
        .or_else(|| capture_region(&COUNTRY_CODE, body))
}

/// `https://www.netflix.com/jp-en/title/...` style redirects name the region.
pub fn region_from_url(url: &str) -> Option<String> {
    capture_region(&URL_REGION, url)
}

pub struct NetflixProbe;

#[async_trait]
impl PlatformProbe for NetflixProbe {
    fn platform(&self) -> Platform {
        Platform::Netflix
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StreamingResult> {
        let (global, original) = join(
            ctx.fetch(HttpRequest::get(GLOBAL_TITLE_URL)),
            ctx.fetch(HttpRequest::get(ORIGINAL_TITLE_URL)),
        )
        .await;
        let (global, original) = (global?, original?);

        let global_body = global.text();
        let original_body = original.text();
        let status = classify(
            global_body.contains(UNAVAILABLE_MARKER),
            original_body.contains(UNAVAILABLE_MARKER),
        );

        let mut region = region_from_markup(&global_body).or_else(|| region_from_markup(&original_body));
        if region.is_none() {
            region = [&global, &original].iter().find_map(|response| {
                response
                    .header("location")
                    .and_then(region_from_url)
                    .or_else(|| region_from_url(&response.final_url))
            });
        }
        if region.is_none() {
            region = ctx.geo_region().await;
        }

        let mut result = ctx
            .result(Platform::Netflix, status)
            .with_region(region)
            .with_urls(&[GLOBAL_TITLE_URL, ORIGINAL_TITLE_URL]);
        if result.is_unlocked() {
            let unlock_type = ctx.unlock_type(&["netflix.com"], DnsChecks::ALL).await;
            result = result.with_unlock_type(unlock_type);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context;
    use super::*;
    use crate::testing::{ScriptedHttp, StaticDns};
    use crate::unlock::results::UnlockType;
    use tokio::sync::OnceCell;

    fn dns() -> StaticDns {
        StaticDns::new().with_a("netflix.com", &["54.74.73.31", "3.251.50.149", "54.155.178.5"])
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(classify(true, true), UnlockStatus::Org);
        assert_eq!(classify(true, false), UnlockStatus::Yes);
        assert_eq!(classify(false, true), UnlockStatus::Yes);
        assert_eq!(classify(false, false), UnlockStatus::Yes);
    }

    #[test]
    fn test_region_sources() {
        assert_eq!(
            region_from_markup(r#"{"requestCountry":{"id":"JP","supportedLocales":[]}}"#).as_deref(),
            Some("JP")
        );
        assert_eq!(region_from_markup(r#"<div data-country="SG">"#).as_deref(), Some("SG"));
        assert_eq!(
            region_from_url("https://www.netflix.com/tw-en/title/81280792").as_deref(),
            Some("TW")
        );
        assert!(region_from_url("https://www.netflix.com/title/81280792").is_none());
    }

    #[tokio::test]
    async fn test_both_pages_blocked_is_originals_only() {
        let http = ScriptedHttp::new()
            .on_text(GLOBAL_TITLE_URL, 200, "<h1>Oh no!</h1>")
            .on_text(ORIGINAL_TITLE_URL, 200, r#"Oh no! "requestCountry":{"id":"HK"}"#);
        let dns = dns();
        let geo = OnceCell::new();
        let result = NetflixProbe.probe(&context(&http, &dns, &geo)).await.unwrap();

        assert_eq!(result.status, UnlockStatus::Org);
        assert_eq!(result.region.as_deref(), Some("HK"));
        assert_eq!(result.unlock_type, Some(UnlockType::Native));
        assert_eq!(result.tested_urls.len(), 2);
    }

    #[tokio::test]
    async fn test_region_falls_back_to_geolocation() {
        let http = ScriptedHttp::new()
            .on_text(GLOBAL_TITLE_URL, 200, "<html>title page</html>")
            .on_text(ORIGINAL_TITLE_URL, 200, "<html>title page</html>")
            .on_text(super::super::GEO_TRACE_URL, 200, "ip=1.2.3.4\nloc=GB\n");
        let dns = dns();
        let geo = OnceCell::new();
        let result = NetflixProbe.probe(&context(&http, &dns, &geo)).await.unwrap();

        assert_eq!(result.status, UnlockStatus::Yes);
        assert_eq!(result.region.as_deref(), Some("GB"));
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let http = ScriptedHttp::new()
            .on_text(GLOBAL_TITLE_URL, 200, "ok")
            .fail(ORIGINAL_TITLE_URL, "connection reset");
        let dns = dns();
        let geo = OnceCell::new();
        assert!(NetflixProbe.probe(&context(&http, &dns, &geo)).await.is_err());
    }
}
