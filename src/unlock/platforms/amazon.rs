use async_trait::async_trait;
use regex::Regex;

use super::{capture_region, PlatformProbe, ProbeContext};
use crate::error::Result;
use crate::unlock::dns::DnsChecks;
use crate::unlock::http::HttpRequest;
use crate::unlock::results::{Platform, StreamingResult, UnlockStatus};

pub const HOME_URL: &str = "https://www.primevideo.com";

lazy_static::lazy_static! {
    static ref TERRITORY: Regex = Regex::new(r#""currentTerritory"\s*:\s*"([A-Za-z]{2})""#).unwrap();
}

pub fn current_territory(body: &str) -> Option<String> {
    capture_region(&TERRITORY, body)
}

pub struct AmazonProbe;

#[async_trait]
impl PlatformProbe for AmazonProbe {
    fn platform(&self) -> Platform {
        Platform::AmazonPrime
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StreamingResult> {
        let response = ctx.fetch(HttpRequest::get(HOME_URL)).await?;
        let territory = current_territory(&response.text());

        let status = if territory.is_some() {
            UnlockStatus::Yes
        } else {
            UnlockStatus::No
        };
        let mut result = ctx
            .result(Platform::AmazonPrime, status)
            .with_region(territory)
            .with_urls(&[HOME_URL]);
        if result.is_unlocked() {
            let unlock_type = ctx.unlock_type(&["primevideo.com"], DnsChecks::NO_COUNT).await;
            result = result.with_unlock_type(unlock_type);
        }
        Ok(result)
    }
}
