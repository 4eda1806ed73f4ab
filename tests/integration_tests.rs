use std::sync::Arc;
use std::time::Duration;

use chrono::TimeZone;
use serde_json::json;

use hostscope::discovery::container::parse_port_mappings;
use hostscope::discovery::fusion::fuse;
use hostscope::discovery::rules::config_hash;
use hostscope::discovery::{DetectedService, ServiceStatus, ServiceType};
use hostscope::protocol::links::{substitute_host, HOST_PLACEHOLDER};
use hostscope::protocol::xray::{build_share_link, parse_xray_str};
use hostscope::protocol::NginxConfigParser;
use hostscope::testing::{FixedClock, ScriptedCommands, ScriptedHttp, StaticDns};
use hostscope::unlock::dns::{detect_unlock_type, DnsChecks};
use hostscope::unlock::platforms::{netflix, reddit};
use hostscope::unlock::{Platform, UnlockDetector, UnlockStatus, UnlockType};
use hostscope::AgentConfig;

fn clock() -> FixedClock {
    FixedClock(chrono::Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap())
}

fn detector(http: ScriptedHttp, dns: StaticDns) -> UnlockDetector {
    UnlockDetector::new(&AgentConfig::default(), Arc::new(http), Arc::new(dns), Arc::new(clock()))
}

#[test]
fn test_docker_port_ranges_expand() {
    let ports = parse_port_mappings("0.0.0.0:80-81->80-81/tcp, :::80-81->80-81/tcp, 3306/tcp");
    assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![80, 81]);
}

#[test]
fn test_fusion_is_order_independent() {
    let mut from_process = DetectedService::new("Xray", ServiceType::Proxy).with_port(443);
    from_process.details.version = Some("1.8.4".to_string());
    from_process.add_domains(["a.example.com"]);

    let mut from_port = DetectedService::new("Xray", ServiceType::Proxy)
        .with_port(443)
        .with_protocol("vless");
    from_port.status = ServiceStatus::Stopped;
    from_port.add_domains(["b.example.com"]);

    let forward = fuse(vec![from_process.clone(), from_port.clone()]);
    let backward = fuse(vec![from_port, from_process]);
    assert_eq!(forward, backward);
    assert_eq!(forward.len(), 1);
    assert_eq!(forward[0].status, ServiceStatus::Running);
    assert_eq!(forward[0].protocol.as_deref(), Some("vless"));
    assert_eq!(forward[0].domains.len(), 2);
}

#[tokio::test]
async fn test_nginx_parse_and_hash_are_stable() {
    let dir = tempfile::tempdir().unwrap();
    let conf = dir.path().join("nginx.conf");
    std::fs::write(
        &conf,
        "http {\n  server {\n    listen 80;\n    server_name shop.example.com;\n  }\n}\n",
    )
    .unwrap();

    let runner = ScriptedCommands::new();
    let parser = NginxConfigParser::new(&runner, clock().0);
    let first = parser.parse_with_includes(&conf).await.unwrap();
    let second = parser.parse_with_includes(&conf).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.domains, vec!["shop.example.com"]);
    assert_eq!(config_hash(&conf), config_hash(&conf));
    assert_eq!(config_hash(&conf).map(|h| h.len()), Some(16));
}

#[test]
fn test_xray_trojan_ws_tls_link() {
    let config = json!({
        "inbounds": [{
            "tag": "edge",
            "protocol": "trojan",
            "port": 443,
            "settings": {"clients": [{"password": "p@ss"}]},
            "streamSettings": {
                "network": "ws",
                "security": "tls",
                "wsSettings": {"path": "/ws"},
                "tlsSettings": {"serverName": "example.com"}
            }
        }]
    });

    let info = parse_xray_str(&config.to_string()).unwrap();
    assert_eq!(info.ports, vec![443]);
    let link = substitute_host(&info.share_links[0], "45.77.10.20");
    assert!(link.starts_with("trojan://p%40ss@45.77.10.20:443?"), "{}", link);
    assert!(!link.contains(HOST_PLACEHOLDER));

    let direct = build_share_link(&config["inbounds"][0], "45.77.10.20").unwrap().unwrap();
    assert_eq!(direct, link);
}

#[tokio::test]
async fn test_dns_heuristic_outcomes() {
    let limit = Duration::from_secs(1);
    let native = StaticDns::new().with_a("reddit.com", &["151.101.1.140"]);
    assert_eq!(
        detect_unlock_type(&native, &["reddit.com"], DnsChecks::NO_COUNT, limit).await,
        UnlockType::Native
    );

    let polluted = StaticDns::new().with_a("reddit.com", &["10.8.0.1"]);
    assert_eq!(
        detect_unlock_type(&polluted, &["reddit.com"], DnsChecks::NO_COUNT, limit).await,
        UnlockType::Dns
    );

    let wildcard = StaticDns::new()
        .with_a("reddit.com", &["151.101.1.140"])
        .with_wildcard("reddit.com", "151.101.1.140".parse().unwrap());
    assert_eq!(
        detect_unlock_type(&wildcard, &["reddit.com"], DnsChecks::NO_COUNT, limit).await,
        UnlockType::Dns
    );

    let broken = StaticDns::new().with_failure("reddit.com");
    assert_eq!(
        detect_unlock_type(&broken, &["reddit.com"], DnsChecks::NO_COUNT, limit).await,
        UnlockType::Unknown
    );
}

#[tokio::test]
async fn test_netflix_full_catalogue_with_native_dns() {
    let page = r#"<script>netflix.reactContext = {"requestCountry":{"id":"US"}}</script>"#;
    let http = ScriptedHttp::new()
        .on_text(netflix::GLOBAL_TITLE_URL, 200, page)
        .on_text(netflix::ORIGINAL_TITLE_URL, 200, page);
    let dns = StaticDns::new().with_a("netflix.com", &["54.74.73.31", "3.251.50.149", "54.155.178.5"]);

    let result = detector(http, dns).detect_one(Platform::Netflix).await.unwrap();
    assert_eq!(result.status, UnlockStatus::Yes);
    assert_eq!(result.region.as_deref(), Some("US"));
    assert_eq!(result.unlock_type, Some(UnlockType::Native));
}

#[tokio::test]
async fn test_netflix_originals_only() {
    let http = ScriptedHttp::new()
        .on_text(netflix::GLOBAL_TITLE_URL, 200, "<h1>Oh no!</h1>")
        .on_text(netflix::ORIGINAL_TITLE_URL, 200, "<h1>Oh no!</h1>");
    let result = detector(http, StaticDns::new())
        .detect_one(Platform::Netflix)
        .await
        .unwrap();
    assert_eq!(result.status, UnlockStatus::Org);
}

#[tokio::test]
async fn test_reddit_reports_through_callback() {
    let http = ScriptedHttp::new().on_text(reddit::HOME_URL, 200, "<html></html>");
    let dns = StaticDns::new().with_a("reddit.com", &["192.168.0.9"]);
    let detector = detector(http, dns);

    let mut seen = Vec::new();
    let results = detector
        .detect(&[Platform::Reddit], |r| seen.push(r.service))
        .await;
    assert_eq!(seen, vec![Platform::Reddit]);
    assert_eq!(results[0].status, UnlockStatus::Yes);
    assert_eq!(results[0].unlock_type, Some(UnlockType::Dns));
    assert!(results[0].is_unlocked());
}

#[tokio::test]
async fn test_unreachable_platforms_fail_softly() {
    let results = detector(ScriptedHttp::new(), StaticDns::new()).detect_all().await;
    assert_eq!(results.len(), Platform::ALL.len());
    for result in results {
        assert_eq!(result.status, UnlockStatus::Failed);
        assert!(!result.is_unlocked());
    }
}
