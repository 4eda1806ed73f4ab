// Process-name rules: identity, version command, config location, fingerprint
use std::path::{Path, PathBuf};

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::results::ServiceType;

lazy_static::lazy_static! {
    static ref SEMVER: Regex = Regex::new(r"\d+\.\d+\.\d+").unwrap();
    static ref ANSI: Regex = Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap();
}

/// Which protocol parser understands the service's config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON inbounds (xray, v2ray, sing-box).
    Inbounds,
    Nginx,
    Hysteria,
    Opaque,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceRule {
    /// Matched against the start of the executable's basename.
    pub pattern: &'static str,
    pub name: &'static str,
    pub service_type: ServiceType,
    pub protocol: Option<&'static str>,
    pub default_port: Option<u16>,
    pub version_args: &'static [&'static str],
    pub config_format: ConfigFormat,
    /// Appended to a `-p <prefix>` argument.
    pub prefix_config: Option<&'static str>,
    pub default_configs: &'static [&'static str],
}

const HYSTERIA_CONFIGS: &[&str] = &[
    "/etc/hysteria/config.yaml",
    "/etc/hysteria/config.json",
    "/etc/hysteria2/config.yaml",
    "/usr/local/etc/hysteria/config.yaml",
];

const fn rule(
    pattern: &'static str,
    name: &'static str,
    service_type: ServiceType,
    protocol: Option<&'static str>,
    version_args: &'static [&'static str],
    config_format: ConfigFormat,
    default_configs: &'static [&'static str],
) -> ServiceRule {
    ServiceRule {
        pattern,
        name,
        service_type,
        protocol,
        default_port: None,
        version_args,
        config_format,
        prefix_config: None,
        default_configs,
    }
}

const fn with_port(mut rule: ServiceRule, port: u16) -> ServiceRule {
    rule.default_port = Some(port);
    rule
}

/// Longer and more specific patterns precede the generic ones they share a
/// prefix with.
pub const SERVICE_RULES: &[ServiceRule] = &[
    rule("hysteria2", "Hysteria2", ServiceType::Proxy, Some("hysteria2"), &["version"], ConfigFormat::Hysteria, HYSTERIA_CONFIGS),
    rule("hy2", "Hysteria2", ServiceType::Proxy, Some("hysteria2"), &["version"], ConfigFormat::Hysteria, HYSTERIA_CONFIGS),
    rule("hysteria", "Hysteria", ServiceType::Proxy, Some("hysteria"), &["version"], ConfigFormat::Hysteria, HYSTERIA_CONFIGS),
    rule("xray", "Xray", ServiceType::Proxy, None, &["version"], ConfigFormat::Inbounds, &[
        "/usr/local/etc/xray/config.json",
        "/etc/xray/config.json",
        "/usr/local/etc/xray",
    ]),
    rule("v2ray", "V2Ray", ServiceType::Proxy, None, &["version"], ConfigFormat::Inbounds, &[
        "/usr/local/etc/v2ray/config.json",
        "/etc/v2ray/config.json",
    ]),
    rule("sing-box", "sing-box", ServiceType::Proxy, None, &["version"], ConfigFormat::Inbounds, &[
        "/etc/sing-box/config.json",
        "/usr/local/etc/sing-box/config.json",
    ]),
    rule("trojan-go", "Trojan-Go", ServiceType::Proxy, Some("trojan"), &["-version"], ConfigFormat::Opaque, &[
        "/etc/trojan-go/config.json",
    ]),
    rule("trojan", "Trojan", ServiceType::Proxy, Some("trojan"), &["--version"], ConfigFormat::Opaque, &[
        "/usr/local/etc/trojan/config.json",
        "/etc/trojan/config.json",
    ]),
    rule("ss-server", "Shadowsocks", ServiceType::Proxy, Some("shadowsocks"), &["-h"], ConfigFormat::Opaque, &[
        "/etc/shadowsocks-libev/config.json",
    ]),
    rule("ssserver", "Shadowsocks", ServiceType::Proxy, Some("shadowsocks"), &["--version"], ConfigFormat::Opaque, &[
        "/etc/shadowsocks-rust/config.json",
    ]),
    ServiceRule {
        prefix_config: Some("conf/nginx.conf"),
        ..rule("nginx", "Nginx", ServiceType::Web, Some("http"), &["-v"], ConfigFormat::Nginx, &[
            "/etc/nginx/nginx.conf",
            "/usr/local/nginx/conf/nginx.conf",
            "/usr/local/etc/nginx/nginx.conf",
        ])
    },
    rule("caddy", "Caddy", ServiceType::Web, Some("http"), &["version"], ConfigFormat::Opaque, &["/etc/caddy/Caddyfile"]),
    rule("apache2", "Apache", ServiceType::Web, Some("http"), &["-v"], ConfigFormat::Opaque, &["/etc/apache2/apache2.conf"]),
    rule("httpd", "Apache", ServiceType::Web, Some("http"), &["-v"], ConfigFormat::Opaque, &["/etc/httpd/conf/httpd.conf"]),
    rule("haproxy", "HAProxy", ServiceType::Web, Some("http"), &["-v"], ConfigFormat::Opaque, &["/etc/haproxy/haproxy.cfg"]),
    with_port(rule("mariadbd", "MariaDB", ServiceType::Database, Some("mysql"), &["--version"], ConfigFormat::Opaque, &["/etc/mysql/my.cnf", "/etc/my.cnf"]), 3306),
    with_port(rule("mysqld", "MySQL", ServiceType::Database, Some("mysql"), &["--version"], ConfigFormat::Opaque, &["/etc/mysql/my.cnf", "/etc/my.cnf"]), 3306),
    with_port(rule("postgres", "PostgreSQL", ServiceType::Database, Some("postgresql"), &["--version"], ConfigFormat::Opaque, &[]), 5432),
    with_port(rule("redis-server", "Redis", ServiceType::Database, Some("redis"), &["--version"], ConfigFormat::Opaque, &["/etc/redis/redis.conf", "/etc/redis.conf"]), 6379),
    with_port(rule("mongod", "MongoDB", ServiceType::Database, Some("mongodb"), &["--version"], ConfigFormat::Opaque, &["/etc/mongod.conf"]), 27017),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessMatch {
    pub rule: &'static ServiceRule,
    /// First token of the command line, e.g. `/usr/local/bin/xray`.
    pub binary: String,
    pub command_line: String,
}

/// Executable basename of a command line; `nginx: master process` style
/// titles lose their colon.
pub fn executable_name(command_line: &str) -> Option<&str> {
    let first = command_line.split_whitespace().next()?;
    let base = first.rsplit('/').next().unwrap_or(first);
    Some(base.trim_end_matches(':'))
}

pub fn match_process(command_line: &str) -> Option<ProcessMatch> {
    let name = executable_name(command_line)?;
    let rule = SERVICE_RULES.iter().find(|r| name.starts_with(r.pattern))?;
    let binary = command_line
        .split_whitespace()
        .next()
        .map(|b| b.trim_end_matches(':').to_string())
        .unwrap_or_default();
    Some(ProcessMatch {
        rule,
        binary,
        command_line: command_line.to_string(),
    })
}

/// Version text from a version command's output. Shell noise is discarded;
/// a dotted triple is preferred over the raw line.
pub fn parse_version(output: &str) -> Option<String> {
    let cleaned = ANSI.replace_all(output, "");
    let line = cleaned.lines().map(str::trim).find(|l| !l.is_empty())?;
    let lower = line.to_lowercase();
    if lower.contains("not found") || lower.contains("no such file") || lower.contains("permission denied") {
        return None;
    }
    if let Some(found) = SEMVER.find(&cleaned) {
        return Some(found.as_str().to_string());
    }
    Some(line.chars().take(64).collect())
}

const CONFIG_FLAGS: &[&str] = &["-c", "--config", "-config", "-confdir", "--confdir", "-C"];

/// Config path named on the command line, if any.
pub fn config_from_flags(command_line: &str, rule: &ServiceRule) -> Option<PathBuf> {
    let tokens: Vec<&str> = command_line.split_whitespace().collect();
    let mut explicit = None;
    let mut prefix = None;

    for (i, token) in tokens.iter().enumerate() {
        if let Some((flag, value)) = token.split_once('=') {
            if CONFIG_FLAGS.contains(&flag) && !value.is_empty() {
                explicit = Some(value.to_string());
            }
            continue;
        }
        let next = tokens.get(i + 1).map(|t| t.trim_end_matches(';'));
        if CONFIG_FLAGS.contains(token) {
            if let Some(next) = next {
                explicit = Some(next.to_string());
            }
        } else if *token == "-p" {
            prefix = next.map(str::to_string);
        }
    }

    match (explicit, prefix) {
        (Some(path), Some(prefix)) if !Path::new(&path).is_absolute() => Some(Path::new(&prefix).join(path)),
        (Some(path), _) => Some(PathBuf::from(path)),
        (None, Some(prefix)) => rule.prefix_config.map(|suffix| Path::new(&prefix).join(suffix)),
        (None, None) => None,
    }
}

/// Command-line flag, then configured extra paths, then the defaults; the
/// first that exists wins.
pub fn locate_config(process: &ProcessMatch, extra: &[PathBuf]) -> Option<PathBuf> {
    if let Some(path) = config_from_flags(&process.command_line, process.rule) {
        if path.exists() {
            return Some(path);
        }
        debug!(path = %path.display(), "config named on command line does not exist");
    }
    extra
        .iter()
        .cloned()
        .chain(process.rule.default_configs.iter().map(PathBuf::from))
        .find(|path| path.exists())
}

/// Content fingerprint: sha256 truncated to 16 hex chars. A directory hashes
/// the name and content of each regular file in name order.
pub fn config_hash(path: &Path) -> Option<String> {
    let mut hasher = Sha256::new();

    if path.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(path)
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        for file in files {
            let content = std::fs::read(&file).ok()?;
            if let Some(name) = file.file_name() {
                hasher.update(name.to_string_lossy().as_bytes());
            }
            hasher.update(&content);
        }
    } else {
        hasher.update(std::fs::read(path).ok()?);
    }

    let digest = hex::encode(hasher.finalize());
    Some(digest[..16].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specific_patterns_win() {
        let m = match_process("/usr/local/bin/hysteria2 server -c /etc/hysteria/config.yaml").unwrap();
        assert_eq!(m.rule.name, "Hysteria2");
        let m = match_process("/usr/bin/trojan-go -config /etc/trojan-go/config.json").unwrap();
        assert_eq!(m.rule.name, "Trojan-Go");
        let m = match_process("nginx: master process /usr/sbin/nginx -g daemon off;").unwrap();
        assert_eq!(m.rule.name, "Nginx");
        assert_eq!(m.binary, "nginx");
        let m = match_process("/usr/sbin/mariadbd --user=mysql").unwrap();
        assert_eq!(m.rule.default_port, Some(3306));
        assert!(match_process("/usr/sbin/sshd -D").is_none());
        assert!(match_process("").is_none());
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("nginx version: nginx/1.24.0\n").as_deref(), Some("1.24.0"));
        assert_eq!(
            parse_version("Xray 1.8.4 (Xray, Penetrates Everything.) Custom (go1.21.1 linux/amd64)").as_deref(),
            Some("1.8.4")
        );
        assert_eq!(parse_version("\x1b[32mv2\x1b[0m-dev build").as_deref(), Some("v2-dev build"));
        assert_eq!(parse_version("sh: 1: hysteria: not found"), None);
        assert_eq!(parse_version("  \n"), None);
    }

    #[test]
    fn test_config_from_flags() {
        let xray = match_process("/usr/local/bin/xray run -c /etc/xray/config.json").unwrap();
        assert_eq!(
            config_from_flags(&xray.command_line, xray.rule),
            Some(PathBuf::from("/etc/xray/config.json"))
        );

        let v2 = match_process("v2ray run -confdir /etc/v2ray/conf.d").unwrap();
        assert_eq!(config_from_flags(&v2.command_line, v2.rule), Some(PathBuf::from("/etc/v2ray/conf.d")));

        let hy = match_process("hysteria server --config=/opt/hy/server.yaml").unwrap();
        assert_eq!(config_from_flags(&hy.command_line, hy.rule), Some(PathBuf::from("/opt/hy/server.yaml")));

        let nginx = match_process("nginx: master process /opt/openresty/nginx/sbin/nginx -p /opt/openresty/nginx/").unwrap();
        assert_eq!(
            config_from_flags(&nginx.command_line, nginx.rule),
            Some(PathBuf::from("/opt/openresty/nginx/conf/nginx.conf"))
        );

        let redis = match_process("redis-server *:6379").unwrap();
        assert_eq!(config_from_flags(&redis.command_line, redis.rule), None);
    }

    #[test]
    fn test_locate_config_prefers_existing_flag_then_extra() {
        let dir = tempfile::tempdir().unwrap();
        let extra = dir.path().join("custom.json");
        std::fs::write(&extra, "{}").unwrap();

        let missing_flag = match_process("xray run -c /nonexistent/xray.json").unwrap();
        assert_eq!(locate_config(&missing_flag, &[extra.clone()]), Some(extra.clone()));

        let flag = format!("xray run -c {}", extra.display());
        let with_flag = match_process(&flag).unwrap();
        assert_eq!(locate_config(&with_flag, &[]), Some(extra));
    }

    #[test]
    fn test_config_hash_is_stable_and_order_independent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), "{\"b\":1}").unwrap();
        std::fs::write(dir.path().join("a.json"), "{\"a\":1}").unwrap();

        let first = config_hash(dir.path()).unwrap();
        let second = config_hash(dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 16);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));

        std::fs::write(dir.path().join("a.json"), "{\"a\":2}").unwrap();
        assert_ne!(config_hash(dir.path()).unwrap(), first);
        assert!(config_hash(&dir.path().join("missing")).is_none());
    }
}
