use async_trait::async_trait;
use regex::Regex;

use super::{capture_region, country_code_marker, PlatformProbe, ProbeContext};
use crate::error::{Error, Result};
use crate::unlock::dns::DnsChecks;
use crate::unlock::http::HttpRequest;
use crate::unlock::results::{Platform, StreamingResult, UnlockStatus};

pub const PREMIUM_URL: &str = "https://www.youtube.com/premium";

/// Consent and locale cookies; without them the page is an interstitial.
const PREMIUM_COOKIE: &str = "YSC=BiCUU3-5Gdk; CONSENT=YES+cb.20220301-11-p0.en+FX+700; GPS=1; VISITOR_INFO1_LIVE=4VwPMkB7W5A; PREF=tz=Asia.Shanghai; _gcl_au=1.1.1809531354.1646633279";

const CN_MARKER: &str = "www.google.cn";
const NOT_AVAILABLE_MARKER: &str = "Premium is not available in your country";

lazy_static::lazy_static! {
    static ref CONTEXT_GL: Regex = Regex::new(r#""INNERTUBE_CONTEXT_GL"\s*:\s*"([A-Za-z]{2})""#).unwrap();
}

pub fn classify(body: &str) -> Option<UnlockStatus> {
    if body.contains(CN_MARKER) {
        Some(UnlockStatus::Cn)
    } else if body.contains(NOT_AVAILABLE_MARKER) {
        Some(UnlockStatus::Noprem)
    } else if body.to_lowercase().contains("ad-free") {
        Some(UnlockStatus::Yes)
    } else {
        None
    }
}

pub fn page_region(body: &str) -> Option<String> {
    capture_region(&CONTEXT_GL, body).or_else(|| country_code_marker(body))
}

pub struct YoutubeProbe;

#[async_trait]
impl PlatformProbe for YoutubeProbe {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StreamingResult> {
        let response = ctx
            .fetch(
                HttpRequest::get(PREMIUM_URL)
                    .header("accept-language", "en")
                    .header("cookie", PREMIUM_COOKIE),
            )
            .await?;
        let body = response.text();
        let status = classify(&body)
            .ok_or_else(|| Error::Parse("premium page has no recognisable marker".to_string()))?;

        let region = match status {
            UnlockStatus::Cn => Some("CN".to_string()),
            _ => page_region(&body),
        };
        let mut result = ctx
            .result(Platform::Youtube, status)
            .with_region(region)
            .with_urls(&[PREMIUM_URL]);
        if result.is_unlocked() {
            let unlock_type = ctx.unlock_type(&["www.youtube.com"], DnsChecks::NO_COUNT).await;
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
    use tokio::sync::OnceCell;

    #[test]
    fn test_markers() {
        assert_eq!(classify("<a href=\"https://www.google.cn\">"), Some(UnlockStatus::Cn));
        assert_eq!(
            classify("YouTube Premium is not available in your country."),
            Some(UnlockStatus::Noprem)
        );
        assert_eq!(classify("Watch Ad-free, offline"), Some(UnlockStatus::Yes));
        assert_eq!(classify("<html>consent</html>"), None);
    }

    #[tokio::test]
    async fn test_premium_page_with_region() {
        let http = ScriptedHttp::new().on_text(
            PREMIUM_URL,
            200,
            r#"ad-free videos ... "INNERTUBE_CONTEXT_GL":"KR","INNERTUBE_CONTEXT_HL":"en""#,
        );
        let dns = StaticDns::new();
        let geo = OnceCell::new();
        let result = YoutubeProbe.probe(&context(&http, &dns, &geo)).await.unwrap();

        assert_eq!(result.status, UnlockStatus::Yes);
        assert_eq!(result.region.as_deref(), Some("KR"));
        let sent = http.requests();
        assert!(sent[0].headers.iter().any(|(k, v)| k == "cookie" && v.contains("CONSENT=YES")));
    }

    #[tokio::test]
    async fn test_unrecognised_page_is_error() {
        let http = ScriptedHttp::new().on_text(PREMIUM_URL, 200, "<html>before you continue</html>");
        let dns = StaticDns::new();
        let geo = OnceCell::new();
        assert!(YoutubeProbe.probe(&context(&http, &dns, &geo)).await.is_err());
    }
}
