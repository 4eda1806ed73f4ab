use std::io::Read;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use regex::Regex;
use tracing::debug;

use super::{capture_region, PlatformProbe, ProbeContext};
use crate::error::{Error, Result};
use crate::unlock::dns::DnsChecks;
use crate::unlock::http::{HttpRequest, HttpResponse};
use crate::unlock::results::{Platform, StreamingResult, UnlockStatus};

pub const HOME_URL: &str = "https://www.tiktok.com/";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

lazy_static::lazy_static! {
    static ref REGION: Regex = Regex::new(r#""region"\s*:\s*"([A-Za-z]{2})""#).unwrap();
}

pub fn page_region(body: &str) -> Option<String> {
    capture_region(&REGION, body)
}

/// Body text, gunzipped by hand when the server honoured the gzip request.
pub fn decode_body(response: &HttpResponse) -> Result<String> {
    if !response.body.starts_with(&GZIP_MAGIC) {
        return Ok(response.text());
    }
    let mut decoder = GzDecoder::new(response.body.as_slice());
    let mut text = String::new();
    decoder
        .read_to_string(&mut text)
        .map_err(|e| Error::Parse(format!("gzip body: {}", e)))?;
    Ok(text)
}

pub struct TiktokProbe;

impl TiktokProbe {
    async fn plain_region(&self, ctx: &ProbeContext<'_>) -> Option<String> {
        match ctx.fetch(HttpRequest::get(HOME_URL)).await {
            Ok(response) => page_region(&response.text()),
            Err(e) => {
                debug!(error = %e, "plain fetch failed, retrying compressed");
                None
            }
        }
    }

    async fn compressed_region(&self, ctx: &ProbeContext<'_>) -> Result<Option<String>> {
        let response = ctx
            .fetch(
                HttpRequest::get(HOME_URL)
                    .header("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
                    .header("accept-encoding", "gzip")
                    .header("accept-language", "en"),
            )
            .await?;
        Ok(page_region(&decode_body(&response)?))
    }
}

#[async_trait]
impl PlatformProbe for TiktokProbe {
    fn platform(&self) -> Platform {
        Platform::Tiktok
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<StreamingResult> {
        let (status, region) = match self.plain_region(ctx).await {
            Some(region) => (UnlockStatus::Yes, region),
            None => match self.compressed_region(ctx).await? {
                Some(region) => (UnlockStatus::Idc, region),
                None => {
                    return Ok(StreamingResult::failed(
                        Platform::Tiktok,
                        "region marker not found",
                        ctx.now,
                    )
                    .with_urls(&[HOME_URL]));
                }
            },
        };

        let unlock_type = ctx.unlock_type(&["tiktok.com"], DnsChecks::NO_COUNT).await;
        Ok(ctx
            .result(Platform::Tiktok, status)
            .with_region(Some(region))
            .with_urls(&[HOME_URL])
            .with_unlock_type(unlock_type))
    }
}
