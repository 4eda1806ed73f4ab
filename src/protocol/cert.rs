// TLS certificate inspection through the openssl CLI
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::exec::{CommandRunner, QUICK_TIMEOUT};

/// Certificates closer than this to expiry raise a warning.
pub const EXPIRY_WARNING_DAYS: i64 = 30;

lazy_static::lazy_static! {
    static ref CN_PATTERN: Regex = Regex::new(r"CN\s*=\s*([^,/\n]+)").unwrap();
    static ref ORG_PATTERN: Regex = Regex::new(r"O\s*=\s*([^,/\n]+)").unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_until_expiry: Option<i64>,
    pub expiry_warning: bool,
}

impl CertificateInfo {
    pub fn unresolved(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            domain: None,
            issuer: None,
            expiry_date: None,
            days_until_expiry: None,
            expiry_warning: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct X509Summary {
    pub common_name: Option<String>,
    pub issuer: Option<String>,
    pub not_after: Option<DateTime<Utc>>,
}

/// Parse `openssl x509 -noout -subject -issuer -enddate` output.
pub fn parse_x509_output(output: &str) -> X509Summary {
    let mut summary = X509Summary::default();

    for line in output.lines() {
        let line = line.trim();
        if let Some(subject) = line.strip_prefix("subject=") {
            summary.common_name = CN_PATTERN
                .captures(subject)
                .map(|c| c[1].trim().to_string());
        } else if let Some(issuer) = line.strip_prefix("issuer=") {
            // Prefer the organisation, then the CN, then the raw line.
            let issuer = issuer.trim();
            summary.issuer = ORG_PATTERN
                .captures(issuer)
                .or_else(|| CN_PATTERN.captures(issuer))
                .map(|c| c[1].trim().to_string())
                .or_else(|| Some(issuer.to_string()).filter(|s| !s.is_empty()));
        } else if let Some(date) = line.strip_prefix("notAfter=") {
            summary.not_after = parse_openssl_date(date);
        }
    }

    summary
}

/// openssl prints dates like `Jan  1 00:00:00 2025 GMT`.
pub fn parse_openssl_date(raw: &str) -> Option<DateTime<Utc>> {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let without_zone = normalized.trim_end_matches(" GMT");
    NaiveDateTime::parse_from_str(without_zone, "%b %d %H:%M:%S %Y")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Whole days until expiry and whether that falls in the warning window.
/// Expired certificates do not warn.
pub fn expiry_status(not_after: DateTime<Utc>, now: DateTime<Utc>) -> (i64, bool) {
    let days = (not_after - now).num_days();
    (days, days > 0 && days < EXPIRY_WARNING_DAYS)
}

pub fn build_certificate_info(path: &str, summary: X509Summary, now: DateTime<Utc>) -> CertificateInfo {
    let mut info = CertificateInfo::unresolved(path);
    info.domain = summary.common_name;
    info.issuer = summary.issuer;
    if let Some(not_after) = summary.not_after {
        let (days, warning) = expiry_status(not_after, now);
        info.expiry_date = Some(not_after);
        info.days_until_expiry = Some(days);
        info.expiry_warning = warning;
    }
    info
}

/// Resolve a certificate path: existence check, then openssl interrogation.
/// Any failure leaves a path-only record.
pub async fn inspect_certificate(
    runner: &dyn CommandRunner,
    path: &str,
    now: DateTime<Utc>,
) -> CertificateInfo {
    if !Path::new(path).is_file() {
        debug!(path = %path, "certificate path does not exist");
        return CertificateInfo::unresolved(path);
    }

    let args = ["x509", "-in", path, "-noout", "-subject", "-issuer", "-enddate"];
    match runner.run_ok("openssl", &args, QUICK_TIMEOUT).await {
        Ok(output) => build_certificate_info(path, parse_x509_output(&output), now),
        Err(e) => {
            debug!(path = %path, error = %e, "openssl inspection failed");
            CertificateInfo::unresolved(path)
        }
    }
}
