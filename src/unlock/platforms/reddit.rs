use async_trait::async_trait;

use super::{country_code_marker, PlatformProbe, ProbeContext};
use crate::error::Result;
use crate::unlock::dns::DnsChecks;
use crate::unlock::http::HttpRequest;
use crate::unlock::results::{Platform, StreamingResult, UnlockStatus};

pub const HOME_URL: &str = "https://www.reddit.com/";

pub struct RedditProbe;

#[async_trait]
impl PlatformProbe for RedditProbe {
    fn platform(&self) -> Platform {
        Platform::Reddit
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StreamingResult> {
        let response = ctx.fetch(HttpRequest::get(HOME_URL)).await?;

        let result = match response.status {
            403 => ctx.result(Platform::Reddit, UnlockStatus::No),
            200 => {
                let region = country_code_marker(&response.text());
                let unlock_type = ctx.unlock_type(&["reddit.com"], DnsChecks::NO_COUNT).await;
                ctx.result(Platform::Reddit, UnlockStatus::Yes)
                    .with_region(region)
                    .with_unlock_type(unlock_type)
            }
            other => StreamingResult::failed(
                Platform::Reddit,
                format!("unexpected HTTP status {}", other),
                ctx.now,
            ),
        };
        Ok(result.with_urls(&[HOME_URL]).detail("httpStatus", response.status))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context;
    use super::*;
    use crate::testing::{ScriptedHttp, StaticDns};
    use crate::unlock::results::UnlockType;
    use tokio::sync::OnceCell;

    #[tokio::test]
    async fn test_forbidden_is_no() {
        let http = ScriptedHttp::new().on_text(HOME_URL, 403, "blocked");
        let dns = StaticDns::new();
        let geo = OnceCell::new();
        let result = RedditProbe.probe(&context(&http, &dns, &geo)).await.unwrap();
        assert_eq!(result.status, UnlockStatus::No);
        assert!(result.unlock_type.is_none());
    }

    #[tokio::test]
    async fn test_ok_without_marker_has_no_region() {
        let http = ScriptedHttp::new().on_text(HOME_URL, 200, "<html>reddit</html>");
        // Two answers would fail the count check; this platform skips it.
        let dns = StaticDns::new().with_a("reddit.com", &["151.101.1.140", "151.101.65.140"]);
        let geo = OnceCell::new();
        let result = RedditProbe.probe(&context(&http, &dns, &geo)).await.unwrap();
        assert_eq!(result.status, UnlockStatus::Yes);
        assert!(result.region.is_none());
        assert_eq!(result.unlock_type, Some(UnlockType::Native));
    }

    #[tokio::test]
    async fn test_other_status_is_failed() {
        let http = ScriptedHttp::new().on_text(HOME_URL, 503, "");
        let dns = StaticDns::new();
        let geo = OnceCell::new();
        let result = RedditProbe.probe(&context(&http, &dns, &geo)).await.unwrap();
        assert_eq!(result.status, UnlockStatus::Failed);
        assert_eq!(result.error_msg.as_deref(), Some("unexpected HTTP status 503"));
    }
}
