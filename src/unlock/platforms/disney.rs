// Device registration -> token exchange -> session query, then a preview check.
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use super::{capture_region, PlatformProbe, ProbeContext};
use crate::error::{Error, Result};
use crate::unlock::dns::DnsChecks;
use crate::unlock::http::HttpRequest;
use crate::unlock::results::{Platform, StreamingResult, UnlockStatus};

pub const DEVICE_URL: &str = "https://disney.api.edge.bamgrid.com/devices";
pub const TOKEN_URL: &str = "https://disney.api.edge.bamgrid.com/token";
pub const GRAPHQL_URL: &str = "https://disney.api.edge.bamgrid.com/graph/v1/device/graphql";
pub const PREVIEW_URL: &str = "https://www.disneyplus.com";

/// Public browser client key.
const CLIENT_BEARER: &str =
    "ZGlzbmV5JmJyb3dzZXImMS4wLjA.Cu56AgSfBTDag5NiRA81oLHkDZfu5L3CKadnefEAY84";

const REFRESH_MUTATION: &str = "mutation refreshToken($input: RefreshTokenInput!) { refreshToken(refreshToken: $input) { activeSession { sessionId } } }";

lazy_static::lazy_static! {
    static ref ASSERTION: Regex = Regex::new(r#""assertion"\s*:\s*"([^"]+)""#).unwrap();
    static ref REFRESH_TOKEN: Regex = Regex::new(r#""refresh_token"\s*:\s*"([^"]+)""#).unwrap();
    static ref SESSION_COUNTRY: Regex = Regex::new(r#""countryCode"\s*:\s*"([A-Za-z]{2})""#).unwrap();
    static ref SUPPORTED: Regex = Regex::new(r#""inSupportedLocation"\s*:\s*(true|false)"#).unwrap();
}

/// What the session query and the preview redirect revealed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisneySession {
    pub region: Option<String>,
    pub in_supported_location: bool,
    pub preview_unavailable: bool,
}

pub fn classify(session: &DisneySession) -> UnlockStatus {
    match session.region.as_deref() {
        Some("JP") => UnlockStatus::Yes,
        Some(_) if !session.in_supported_location && !session.preview_unavailable => UnlockStatus::Pending,
        Some(_) if session.preview_unavailable => UnlockStatus::No,
        Some(_) if session.in_supported_location => UnlockStatus::Yes,
        _ => UnlockStatus::Failed,
    }
}

pub fn parse_session(body: &str) -> (Option<String>, bool) {
    let region = capture_region(&SESSION_COUNTRY, body);
    let supported = SUPPORTED
        .captures(body)
        .map(|c| &c[1] == "true")
        .unwrap_or(false);
    (region, supported)
}

fn token_rejected(status: u16, body: &str) -> bool {
    status == 403 || body.contains("forbidden-location")
}

fn capture(pattern: &Regex, body: &str, what: &str) -> Result<String> {
    pattern
        .captures(body)
        .map(|c| c[1].to_string())
        .ok_or_else(|| Error::Parse(format!("no {} in response", what)))
}

pub struct DisneyProbe;

#[async_trait]
impl PlatformProbe for DisneyProbe {
    fn platform(&self) -> Platform {
        Platform::DisneyPlus
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StreamingResult> {
        let urls = [DEVICE_URL, TOKEN_URL, GRAPHQL_URL, PREVIEW_URL];
        let bearer = format!("Bearer {}", CLIENT_BEARER);

        let device_body = json!({
            "deviceFamily": "browser",
            "applicationRuntime": "chrome",
            "deviceProfile": "windows",
            "attributes": {}
        });
        let device = ctx
            .fetch(
                HttpRequest::post(DEVICE_URL, device_body.to_string())
                    .header("authorization", bearer.as_str())
                    .header("content-type", "application/json; charset=UTF-8"),
            )
            .await?;
        let assertion = capture(&ASSERTION, &device.text(), "device assertion")?;

        let form = format!(
            "grant_type={}&latitude=0&longitude=0&platform=browser&subject_token={}&subject_token_type={}",
            urlencoding::encode("urn:ietf:params:oauth:grant-type:token-exchange"),
            urlencoding::encode(&assertion),
            urlencoding::encode("urn:bamtech:params:oauth:token-type:device"),
        );
        let token = ctx
            .fetch(
                HttpRequest::post(TOKEN_URL, form)
                    .header("authorization", bearer.as_str())
                    .header("content-type", "application/x-www-form-urlencoded"),
            )
            .await?;
        let token_body = token.text();
        if token_rejected(token.status, &token_body) {
            return Ok(ctx
                .result(Platform::DisneyPlus, UnlockStatus::No)
                .with_urls(&urls)
                .detail("reason", "forbidden-location"));
        }
        let refresh_token = capture(&REFRESH_TOKEN, &token_body, "refresh token")?;

        let query: Value = json!({
            "query": REFRESH_MUTATION,
            "variables": { "input": { "refreshToken": refresh_token } }
        });
        let session = ctx
            .fetch(
                HttpRequest::post(GRAPHQL_URL, query.to_string())
                    .header("authorization", CLIENT_BEARER)
                    .header("content-type", "application/json"),
            )
            .await?;
        let (region, in_supported_location) = parse_session(&session.text());

        // A failed preview fetch only loses the redirect signal.
        let preview_unavailable = match ctx.fetch(HttpRequest::get(PREVIEW_URL).no_redirect()).await {
            Ok(preview) => preview
                .header("location")
                .map(|location| location.contains("unavailable"))
                .unwrap_or(false),
            Err(_) => false,
        };

        let session = DisneySession {
            region,
            in_supported_location,
            preview_unavailable,
        };
        let status = classify(&session);
        let mut result = ctx
            .result(Platform::DisneyPlus, status)
            .with_region(session.region.clone())
            .with_urls(&urls)
            .detail("inSupportedLocation", session.in_supported_location);
        if status == UnlockStatus::Failed {
            result.error_msg = Some("session did not report a region".to_string());
        }
        if result.is_unlocked() {
            let unlock_type = ctx.unlock_type(&["disneyplus.com"], DnsChecks::NO_COUNT).await;
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
    use crate::unlock::http::HttpResponse;
    use tokio::sync::OnceCell;

    fn session(region: Option<&str>, supported: bool, unavailable: bool) -> DisneySession {
        DisneySession {
            region: region.map(str::to_string),
            in_supported_location: supported,
            preview_unavailable: unavailable,
        }
    }

    #[test]
    fn test_classification_order() {
        assert_eq!(classify(&session(Some("JP"), false, true)), UnlockStatus::Yes);
        assert_eq!(classify(&session(Some("US"), true, false)), UnlockStatus::Yes);
        assert_eq!(classify(&session(Some("TH"), false, false)), UnlockStatus::Pending);
        assert_eq!(classify(&session(Some("CN"), false, true)), UnlockStatus::No);
        assert_eq!(classify(&session(Some("CN"), true, true)), UnlockStatus::No);
        assert_eq!(classify(&session(None, true, false)), UnlockStatus::Failed);
    }

    #[test]
    fn test_parse_session() {
        let body = r#"{"extensions":{"sdk":{"session":{"inSupportedLocation":true,"location":{"countryCode":"US"}}}}}"#;
        assert_eq!(parse_session(body), (Some("US".to_string()), true));
        assert_eq!(parse_session("{}"), (None, false));
    }

    fn scripted(token: HttpResponse) -> ScriptedHttp {
        ScriptedHttp::new()
            .on_text(DEVICE_URL, 200, r#"{"grant_type":"x","assertion":"abc.def"}"#)
            .on(TOKEN_URL, token)
            .on_text(
                GRAPHQL_URL,
                200,
                r#"{"extensions":{"sdk":{"session":{"inSupportedLocation":true,"location":{"countryCode":"US"}}}}}"#,
            )
            .on(PREVIEW_URL, HttpResponse::new(200, "<html></html>"))
    }

    #[tokio::test]
    async fn test_forbidden_location_is_no() {
        let http = scripted(HttpResponse::new(
            400,
            r#"{"error":"forbidden-location","error_description":"unreachable"}"#,
        ));
        let dns = StaticDns::new();
        let geo = OnceCell::new();
        let result = DisneyProbe.probe(&context(&http, &dns, &geo)).await.unwrap();
        assert_eq!(result.status, UnlockStatus::No);
        assert!(result.unlock_type.is_none());
    }

    #[tokio::test]
    async fn test_supported_session_is_yes() {
        let http = scripted(HttpResponse::new(200, r#"{"refresh_token":"rt-1","access_token":"a"}"#));
        let dns = StaticDns::new().with_a("disneyplus.com", &["34.110.155.89"]);
        let geo = OnceCell::new();
        let result = DisneyProbe.probe(&context(&http, &dns, &geo)).await.unwrap();

        assert_eq!(result.status, UnlockStatus::Yes);
        assert_eq!(result.region.as_deref(), Some("US"));
        assert!(result.unlock_type.is_some());

        let sent = http.requests();
        assert_eq!(sent.len(), 4);
        assert!(sent[1].body.as_deref().unwrap_or("").contains("subject_token=abc.def"));
        assert!(sent[2].body.as_deref().unwrap_or("").contains("rt-1"));
        assert!(!sent[3].follow_redirects);
    }
}
