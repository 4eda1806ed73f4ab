// DNS pollution heuristic and the resolver seam behind it
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::proto::rr::RecordType;
use trust_dns_resolver::TokioAsyncResolver;

use super::results::UnlockType;
use crate::error::{Error, Result};
use crate::network::{is_private_ip, same_subnet_24};

#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// IPv4 answers for `domain`. A non-existent name is `Ok(vec![])`.
    async fn lookup_a(&self, domain: &str) -> Result<Vec<Ipv4Addr>>;

    /// Number of CNAME records in the answer for `domain`.
    async fn count_cname(&self, domain: &str) -> Result<usize>;

    async fn count_a(&self, domain: &str) -> Result<usize> {
        Ok(self.lookup_a(domain).await?.len())
    }

    /// First resolver configured on this machine.
    fn primary_nameserver(&self) -> Option<IpAddr>;
}

pub struct SystemDnsResolver {
    resolver: TokioAsyncResolver,
    nameserver: Option<IpAddr>,
}

impl SystemDnsResolver {
    /// Built from the system resolv.conf, or public defaults when it cannot be read.
    pub fn new() -> Self {
        let (config, opts) = match trust_dns_resolver::system_conf::read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                debug!(error = %e, "cannot read system resolver config, using defaults");
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        let nameserver = config.name_servers().first().map(|ns| ns.socket_addr.ip());
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
            nameserver,
        }
    }
}

impl Default for SystemDnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DnsResolver for SystemDnsResolver {
    async fn lookup_a(&self, domain: &str) -> Result<Vec<Ipv4Addr>> {
        match self.resolver.lookup_ip(domain).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .filter_map(|ip| match ip {
                    IpAddr::V4(v4) => Some(v4),
                    IpAddr::V6(_) => None,
                })
                .collect()),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(Error::Network(format!("resolving {}: {}", domain, e))),
        }
    }

    async fn count_cname(&self, domain: &str) -> Result<usize> {
        match self.resolver.lookup(domain, RecordType::CNAME).await {
            Ok(lookup) => Ok(lookup
                .records()
                .iter()
                .filter(|r| r.record_type() == RecordType::CNAME)
                .count()),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(0),
            Err(e) => Err(Error::Network(format!("resolving CNAME {}: {}", domain, e))),
        }
    }

    fn primary_nameserver(&self) -> Option<IpAddr> {
        self.nameserver
    }
}

/// Which optional checks to run; check 1 always runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsChecks {
    pub answer_count: bool,
    pub wildcard: bool,
}

impl DnsChecks {
    pub const ALL: DnsChecks = DnsChecks {
        answer_count: true,
        wildcard: true,
    };
    /// Skips the answer-count check.
    pub const NO_COUNT: DnsChecks = DnsChecks {
        answer_count: false,
        wildcard: true,
    };
}

async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(limit.as_millis() as u64)),
    }
}

/// Check 1: the first A answer must be public and outside the local
/// resolver's /24.
pub async fn check_private_or_same_subnet(resolver: &dyn DnsResolver, domain: &str) -> Result<bool> {
    let answers = resolver.lookup_a(domain).await?;
    let first = *answers
        .first()
        .ok_or_else(|| Error::Network(format!("{} has no A record", domain)))?;

    if is_private_ip(IpAddr::V4(first)) {
        return Ok(false);
    }
    if let Some(IpAddr::V4(nameserver)) = resolver.primary_nameserver() {
        if same_subnet_24(first, nameserver) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Check 2: CNAME plus A answers must exceed two records.
pub async fn check_answer_count(resolver: &dyn DnsResolver, domain: &str) -> Result<bool> {
    let cnames = resolver.count_cname(domain).await.unwrap_or(0);
    let a_records = resolver.count_a(domain).await?;
    Ok(cnames + a_records > 2)
}

pub fn random_subdomain(domain: &str) -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{}{}.{}",
        rng.gen_range(100_000u32..1_000_000),
        rng.gen_range(100_000u32..1_000_000),
        domain
    )
}

/// Check 3: a random label under the domain must not resolve.
pub async fn check_wildcard(resolver: &dyn DnsResolver, domain: &str) -> Result<bool> {
    let probe = random_subdomain(domain);
    match resolver.lookup_a(&probe).await {
        Ok(answers) => Ok(answers.is_empty()),
        Err(e) => {
            debug!(domain = %probe, error = %e, "random subdomain did not resolve");
            Ok(true)
        }
    }
}

/// Runs the requested checks domain by domain. The first failing check
/// decides `Dns`, the first error decides `Unknown`.
pub async fn detect_unlock_type(
    resolver: &dyn DnsResolver,
    domains: &[&str],
    checks: DnsChecks,
    limit: Duration,
) -> UnlockType {
    match run_checks(resolver, domains, checks, limit).await {
        Ok(true) => UnlockType::Native,
        Ok(false) => UnlockType::Dns,
        Err(e) => {
            debug!(domains = ?domains, error = %e, "dns heuristic inconclusive");
            UnlockType::Unknown
        }
    }
}

async fn run_checks(
    resolver: &dyn DnsResolver,
    domains: &[&str],
    checks: DnsChecks,
    limit: Duration,
) -> Result<bool> {
    for domain in domains {
        if !bounded(limit, check_private_or_same_subnet(resolver, domain)).await? {
            return Ok(false);
        }
        if checks.answer_count && !bounded(limit, check_answer_count(resolver, domain)).await? {
            return Ok(false);
        }
        if checks.wildcard && !bounded(limit, check_wildcard(resolver, domain)).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticDns;

    const LIMIT: Duration = Duration::from_secs(1);

    fn healthy() -> StaticDns {
        StaticDns::new()
            .with_nameserver("10.0.0.2".parse().unwrap())
            .with_a("netflix.com", &["54.74.73.31", "3.251.50.149", "54.155.178.5"])
            .with_cname("www.netflix.com", 1)
            .with_a("www.netflix.com", &["54.74.73.31", "3.251.50.149"])
    }

    #[tokio::test]
    async fn test_private_answer_fails_check1() {
        let dns = StaticDns::new().with_a("reddit.com", &["192.168.1.10"]);
        assert!(!check_private_or_same_subnet(&dns, "reddit.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_same_subnet_as_resolver_fails_check1() {
        let dns = StaticDns::new()
            .with_nameserver("203.0.113.53".parse().unwrap())
            .with_a("tiktok.com", &["203.0.113.7"]);
        assert!(!check_private_or_same_subnet(&dns, "tiktok.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_answer_count_threshold() {
        let dns = healthy();
        assert!(check_answer_count(&dns, "netflix.com").await.unwrap());
        assert!(check_answer_count(&dns, "www.netflix.com").await.unwrap());

        let thin = StaticDns::new().with_a("netflix.com", &["54.74.73.31", "3.251.50.149"]);
        assert!(!check_answer_count(&thin, "netflix.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_wildcard_check() {
        assert!(check_wildcard(&healthy(), "netflix.com").await.unwrap());

        let wildcard = StaticDns::new().with_wildcard("netflix.com", "1.2.3.4".parse().unwrap());
        assert!(!check_wildcard(&wildcard, "netflix.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_detect_unlock_type() {
        let dns = healthy();
        assert_eq!(
            detect_unlock_type(&dns, &["netflix.com"], DnsChecks::ALL, LIMIT).await,
            UnlockType::Native
        );

        // Two records are fine once the count check is skipped.
        let thin = StaticDns::new().with_a("reddit.com", &["151.101.1.140", "151.101.65.140"]);
        assert_eq!(
            detect_unlock_type(&thin, &["reddit.com"], DnsChecks::NO_COUNT, LIMIT).await,
            UnlockType::Native
        );
        assert_eq!(
            detect_unlock_type(&thin, &["reddit.com"], DnsChecks::ALL, LIMIT).await,
            UnlockType::Dns
        );

        assert_eq!(
            detect_unlock_type(&dns, &["netflix.com", "missing.example"], DnsChecks::NO_COUNT, LIMIT).await,
            UnlockType::Unknown
        );

        let failing = StaticDns::new().with_failure("reddit.com");
        assert_eq!(
            detect_unlock_type(&failing, &["reddit.com"], DnsChecks::NO_COUNT, LIMIT).await,
            UnlockType::Unknown
        );
    }
}
