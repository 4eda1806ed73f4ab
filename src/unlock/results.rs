use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Netflix,
    DisneyPlus,
    AmazonPrime,
    Youtube,
    Tiktok,
    Reddit,
    Chatgpt,
}

impl Platform {
    /// Probe order.
    pub const ALL: [Platform; 7] = [
        Platform::Netflix,
        Platform::DisneyPlus,
        Platform::AmazonPrime,
        Platform::Youtube,
        Platform::Tiktok,
        Platform::Reddit,
        Platform::Chatgpt,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Platform::Netflix => "netflix",
            Platform::DisneyPlus => "disney_plus",
            Platform::AmazonPrime => "amazon_prime",
            Platform::Youtube => "youtube",
            Platform::Tiktok => "tiktok",
            Platform::Reddit => "reddit",
            Platform::Chatgpt => "chatgpt",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Netflix => "Netflix",
            Platform::DisneyPlus => "Disney+",
            Platform::AmazonPrime => "Amazon Prime Video",
            Platform::Youtube => "YouTube Premium",
            Platform::Tiktok => "TikTok",
            Platform::Reddit => "Reddit",
            Platform::Chatgpt => "ChatGPT",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace(&['-', '+'][..], "_");
        let wanted = wanted.trim_end_matches('_');
        Platform::ALL
            .iter()
            .copied()
            .find(|p| {
                p.id() == wanted
                    || (wanted == "disney" && *p == Platform::DisneyPlus)
                    || (wanted == "prime" && *p == Platform::AmazonPrime)
                    || (wanted == "openai" && *p == Platform::Chatgpt)
            })
            .ok_or_else(|| format!("unknown platform '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnlockStatus {
    Yes,
    No,
    /// Only the platform's own originals are available.
    Org,
    /// Site reachable, premium tier not offered in the region.
    Noprem,
    /// Region detected but the service has not launched there yet.
    Pending,
    /// Mainland China variant of the site.
    Cn,
    /// Only the mobile app works.
    App,
    /// Only the web client works.
    Web,
    /// Reachable, but the platform treats the address as a datacenter.
    Idc,
    Failed,
    Unknown,
}

impl fmt::Display for UnlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            UnlockStatus::Yes => "yes",
            UnlockStatus::No => "no",
            UnlockStatus::Org => "org",
            UnlockStatus::Noprem => "noprem",
            UnlockStatus::Pending => "pending",
            UnlockStatus::Cn => "cn",
            UnlockStatus::App => "app",
            UnlockStatus::Web => "web",
            UnlockStatus::Idc => "idc",
            UnlockStatus::Failed => "failed",
            UnlockStatus::Unknown => "unknown",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnlockType {
    Native,
    Dns,
    Unknown,
}

impl fmt::Display for UnlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnlockType::Native => write!(f, "native"),
            UnlockType::Dns => write!(f, "dns"),
            UnlockType::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingResult {
    pub service: Platform,
    pub status: UnlockStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlock_type: Option<UnlockType>,
    #[serde(default)]
    pub tested_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub tested_at: DateTime<Utc>,
}

impl StreamingResult {
    pub fn new(service: Platform, status: UnlockStatus, tested_at: DateTime<Utc>) -> Self {
        Self {
            service,
            status,
            region: None,
            unlock_type: None,
            tested_urls: Vec::new(),
            details: BTreeMap::new(),
            error_msg: None,
            tested_at,
        }
    }

    pub fn failed(service: Platform, error: impl Into<String>, tested_at: DateTime<Utc>) -> Self {
        let mut result = Self::new(service, UnlockStatus::Failed, tested_at);
        result.error_msg = Some(error.into());
        result
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region.map(|r| r.to_uppercase());
        self
    }

    pub fn with_unlock_type(mut self, unlock_type: UnlockType) -> Self {
        self.unlock_type = Some(unlock_type);
        self
    }

    pub fn with_urls(mut self, urls: &[&str]) -> Self {
        self.tested_urls = urls.iter().map(|u| u.to_string()).collect();
        self
    }

    pub fn detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Reachable in some form; these get a DNS classification.
    pub fn is_unlocked(&self) -> bool {
        matches!(
            self.status,
            UnlockStatus::Yes
                | UnlockStatus::Org
                | UnlockStatus::Noprem
                | UnlockStatus::App
                | UnlockStatus::Web
                | UnlockStatus::Idc
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_platform_parsing() {
        assert_eq!("netflix".parse::<Platform>().unwrap(), Platform::Netflix);
        assert_eq!("disney+".parse::<Platform>().unwrap(), Platform::DisneyPlus);
        assert_eq!("Disney-Plus".parse::<Platform>().unwrap(), Platform::DisneyPlus);
        assert_eq!("prime".parse::<Platform>().unwrap(), Platform::AmazonPrime);
        assert!("hulu".parse::<Platform>().is_err());
    }

    #[test]
    fn test_serialized_shape() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let result = StreamingResult::new(Platform::DisneyPlus, UnlockStatus::Noprem, at)
            .with_region(Some("us".to_string()))
            .with_unlock_type(UnlockType::Native)
            .with_urls(&["https://www.disneyplus.com"]);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["service"], "disney_plus");
        assert_eq!(json["status"], "noprem");
        assert_eq!(json["region"], "US");
        assert_eq!(json["unlockType"], "native");
        assert!(json.get("errorMsg").is_none());
        assert!(json.get("details").is_none());
    }

    #[test]
    fn test_failed_carries_message() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let result = StreamingResult::failed(Platform::Reddit, "timeout", at);
        assert_eq!(result.status, UnlockStatus::Failed);
        assert_eq!(result.error_msg.as_deref(), Some("timeout"));
        assert!(!result.is_unlocked());
    }
}
