use async_trait::async_trait;
use futures::future::join3;

use super::{parse_trace_loc, PlatformProbe, ProbeContext};
use crate::error::Result;
use crate::unlock::dns::DnsChecks;
use crate::unlock::http::HttpRequest;
use crate::unlock::results::{Platform, StreamingResult, UnlockStatus, UnlockType};

pub const COMPLIANCE_URL: &str = "https://api.openai.com/compliance/cookie_requirements";
pub const IOS_URL: &str = "https://ios.chat.openai.com/";
pub const TRACE_URL: &str = "https://chat.openai.com/cdn-cgi/trace";

const UNSUPPORTED_MARKER: &str = "unsupported_country";
const VPN_MARKER: &str = "VPN";

/// Marker and transport outcome of the compliance and app endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChatgptSignals {
    pub unsupported_country: bool,
    pub vpn_blocked: bool,
    pub compliance_error: bool,
    pub app_error: bool,
}

pub fn classify(s: ChatgptSignals) -> UnlockStatus {
    if !s.vpn_blocked && !s.unsupported_country && !s.compliance_error && !s.app_error {
        UnlockStatus::Yes
    } else if s.vpn_blocked && s.unsupported_country {
        UnlockStatus::No
    } else if s.vpn_blocked && !s.unsupported_country && !s.compliance_error {
        UnlockStatus::Web
    } else if s.unsupported_country && !s.vpn_blocked && !s.app_error {
        UnlockStatus::App
    } else if s.compliance_error && s.vpn_blocked {
        UnlockStatus::No
    } else {
        UnlockStatus::Failed
    }
}

pub struct ChatgptProbe;

#[async_trait]
impl PlatformProbe for ChatgptProbe {
    fn platform(&self) -> Platform {
        Platform::Chatgpt
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StreamingResult> {
        let (compliance, app, trace) = join3(
            ctx.fetch(
                HttpRequest::get(COMPLIANCE_URL)
                    .header("authorization", "Bearer null")
                    .header("accept", "*/*"),
            ),
            ctx.fetch(HttpRequest::get(IOS_URL)),
            ctx.fetch(HttpRequest::get(TRACE_URL)),
        )
        .await;

        let signals = ChatgptSignals {
            unsupported_country: compliance
                .as_ref()
                .map(|r| r.text().contains(UNSUPPORTED_MARKER))
                .unwrap_or(false),
            vpn_blocked: app
                .as_ref()
                .map(|r| r.text().contains(VPN_MARKER))
                .unwrap_or(false),
            compliance_error: compliance.is_err(),
            app_error: app.is_err(),
        };
        let region = trace.ok().and_then(|r| parse_trace_loc(&r.text()));

        let status = classify(signals);
        let mut result = ctx
            .result(Platform::Chatgpt, status)
            .with_region(region)
            .with_urls(&[COMPLIANCE_URL, IOS_URL, TRACE_URL]);
        if status == UnlockStatus::Failed {
            let reason = match (&compliance, &app) {
                (Err(e), _) | (_, Err(e)) => e.to_string(),
                _ => "inconclusive endpoint responses".to_string(),
            };
            result.error_msg = Some(reason);
        }
        if result.is_unlocked() {
            let web = ctx
                .unlock_type(&["chat.openai.com", "ios.chat.openai.com"], DnsChecks::ALL)
                .await;
            let unlock_type = if web == UnlockType::Native {
                ctx.unlock_type(&["api.openai.com"], DnsChecks::NO_COUNT).await
            } else {
                web
            };
            result = result.with_unlock_type(unlock_type);
        }
        Ok(result)
    }
}
