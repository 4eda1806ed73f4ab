// Directive-based reverse-proxy config parser (nginx style)
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::cert::{inspect_certificate, CertificateInfo};
use super::push_unique;
use crate::exec::CommandRunner;

/// Includes nested deeper than this are ignored; guards against include cycles
/// that the visited set cannot see (symlinks, relative aliases).
const MAX_INCLUDE_DEPTH: usize = 8;

lazy_static::lazy_static! {
    static ref SERVER_OPEN: Regex = Regex::new(r"(^|[\s;{}])server\s*\{").unwrap();
    // Directives start after a statement boundary, not necessarily a new line.
    // The terminating `;` is left unconsumed so it can open the next match.
    static ref LISTEN: Regex = Regex::new(r"(?m)(?:^|[;{}])\s*listen\s+([^;{}]+)").unwrap();
    static ref SERVER_NAME: Regex = Regex::new(r"(?m)(?:^|[;{}])\s*server_name\s+([^;{}]+)").unwrap();
    static ref SSL_CERTIFICATE: Regex = Regex::new(r"(?m)(?:^|[;{}])\s*ssl_certificate\s+([^;{}]+)").unwrap();
    static ref INCLUDE: Regex = Regex::new(r"(?m)(?:^|[;{}])\s*include\s+([^;{}]+)").unwrap();
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NginxConfigInfo {
    pub protocols: Vec<String>,
    pub ports: Vec<u16>,
    pub domains: Vec<String>,
    pub ssl_enabled: bool,
    pub ssl_certificates: Vec<CertificateInfo>,
}

/// What one `server { ... }` block declares, before certificates are resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerBlock {
    pub ports: Vec<u16>,
    pub ssl: bool,
    pub server_names: Vec<String>,
    pub certificate_paths: Vec<String>,
}

pub fn strip_comments(content: &str) -> String {
    content
        .lines()
        .map(|line| match line.find('#') {
            Some(idx) => &line[..idx],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract the bodies of balanced `server { ... }` blocks by brace depth.
pub fn extract_server_blocks(content: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut search_from = 0;

    while let Some(found) = SERVER_OPEN.find_at(content, search_from) {
        let open = found.end() - 1;
        let bytes = content.as_bytes();
        let mut depth = 0usize;
        let mut close = None;
        for (offset, byte) in bytes[open..].iter().enumerate() {
            match byte {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(open + offset);
                        break;
                    }
                }
                _ => {}
            }
        }
        match close {
            Some(close) => {
                blocks.push(content[open + 1..close].to_string());
                search_from = close + 1;
            }
            // Unbalanced tail; nothing more to extract.
            None => break,
        }
    }

    blocks
}

fn listen_port(directive: &str) -> Option<u16> {
    let first = directive.split_whitespace().next()?;
    if first.starts_with("unix:") {
        return None;
    }
    let port_part = match first.rfind(':') {
        Some(idx) => &first[idx + 1..],
        None => first,
    };
    port_part.parse().ok()
}

pub fn parse_server_block(block: &str) -> ServerBlock {
    let mut server = ServerBlock::default();

    for caps in LISTEN.captures_iter(block) {
        let directive = caps[1].trim();
        if let Some(port) = listen_port(directive) {
            push_unique(&mut server.ports, port);
            if port == 443 || directive.split_whitespace().any(|t| t == "ssl") {
                server.ssl = true;
            }
        }
    }

    for caps in SERVER_NAME.captures_iter(block) {
        for name in caps[1].split_whitespace() {
            if name == "_" || name.starts_with('#') {
                continue;
            }
            push_unique(&mut server.server_names, name.to_string());
        }
    }

    for caps in SSL_CERTIFICATE.captures_iter(block) {
        let path = caps[1].trim().trim_matches(|c| c == '"' || c == '\'').to_string();
        if !path.is_empty() {
            push_unique(&mut server.certificate_paths, path);
        }
    }

    server
}

/// Everything in `content` that does not need the filesystem or a tool.
pub fn parse_blocks(content: &str) -> Vec<ServerBlock> {
    extract_server_blocks(&strip_comments(content))
        .iter()
        .map(|block| parse_server_block(block))
        .collect()
}

pub struct NginxConfigParser<'a> {
    runner: &'a dyn CommandRunner,
    now: DateTime<Utc>,
}

impl<'a> NginxConfigParser<'a> {
    pub fn new(runner: &'a dyn CommandRunner, now: DateTime<Utc>) -> Self {
        Self { runner, now }
    }

    /// Parse a single file without following includes.
    pub async fn parse(&self, path: &Path) -> Option<NginxConfigInfo> {
        let content = read_config(path)?;
        Some(self.info_from_blocks(parse_blocks(&content)).await)
    }

    /// Parse a file and everything it includes, then de-duplicate.
    pub async fn parse_with_includes(&self, path: &Path) -> Option<NginxConfigInfo> {
        let mut visited = HashSet::new();
        let mut files = Vec::new();
        collect_include_tree(path, 0, &mut visited, &mut files);
        if files.is_empty() {
            return None;
        }

        let mut info = NginxConfigInfo::default();
        for (_, content) in files {
            let partial = self.info_from_blocks(parse_blocks(&content)).await;
            merge_info(&mut info, partial);
        }
        Some(info)
    }

    async fn info_from_blocks(&self, blocks: Vec<ServerBlock>) -> NginxConfigInfo {
        let mut info = NginxConfigInfo::default();
        let mut cert_paths = Vec::new();

        for block in blocks {
            for port in &block.ports {
                push_unique(&mut info.ports, *port);
            }
            for name in block.server_names {
                push_unique(&mut info.domains, name);
            }
            let protocol = if block.ssl { "https" } else { "http" };
            if !block.ports.is_empty() {
                push_unique(&mut info.protocols, protocol.to_string());
            }
            info.ssl_enabled |= block.ssl;
            for path in block.certificate_paths {
                push_unique(&mut cert_paths, path);
            }
        }

        for path in cert_paths {
            let cert = inspect_certificate(self.runner, &path, self.now).await;
            info.ssl_certificates.push(cert);
        }
        info.ssl_enabled |= !info.ssl_certificates.is_empty();
        info
    }
}

fn merge_info(target: &mut NginxConfigInfo, other: NginxConfigInfo) {
    for protocol in other.protocols {
        push_unique(&mut target.protocols, protocol);
    }
    for port in other.ports {
        push_unique(&mut target.ports, port);
    }
    for domain in other.domains {
        push_unique(&mut target.domains, domain);
    }
    for cert in other.ssl_certificates {
        if !target.ssl_certificates.iter().any(|c| c.path == cert.path) {
            target.ssl_certificates.push(cert);
        }
    }
    target.ssl_enabled |= other.ssl_enabled;
}

fn read_config(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot read web server config");
            None
        }
    }
}

/// Resolve one `include` argument relative to the including file.
pub fn resolve_include(pattern: &str, including_file: &Path) -> Vec<PathBuf> {
    let pattern = pattern.trim().trim_matches(|c| c == '"' || c == '\'');
    let base = including_file.parent().unwrap_or_else(|| Path::new("/"));
    let full = if Path::new(pattern).is_absolute() {
        PathBuf::from(pattern)
    } else {
        base.join(pattern)
    };

    let full_str = full.to_string_lossy().to_string();
    if full_str.contains(['*', '?', '['].as_slice()) {
        let mut matches: Vec<PathBuf> = match glob::glob(&full_str) {
            Ok(paths) => paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect(),
            Err(e) => {
                debug!(pattern = %full_str, error = %e, "bad include pattern");
                Vec::new()
            }
        };
        matches.sort();
        return matches;
    }

    if full.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&full)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| p.is_file())
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        return files;
    }

    if full.is_file() {
        vec![full]
    } else {
        Vec::new()
    }
}

fn collect_include_tree(
    path: &Path,
    depth: usize,
    visited: &mut HashSet<PathBuf>,
    files: &mut Vec<(PathBuf, String)>,
) {
    if depth > MAX_INCLUDE_DEPTH || !visited.insert(path.to_path_buf()) {
        return;
    }
    let Some(content) = read_config(path) else {
        return;
    };
    let stripped = strip_comments(&content);
    let includes: Vec<String> = INCLUDE
        .captures_iter(&stripped)
        .map(|caps| caps[1].to_string())
        .collect();
    files.push((path.to_path_buf(), content));

    for include in includes {
        for included in resolve_include(&include, path) {
            collect_include_tree(&included, depth + 1, visited, files);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCommands;
    use chrono::TimeZone;

    const SITE: &str = r#"
# default site
server {
    listen 80;
    server_name _;
    return 301 https://$host$request_uri;
}

upstream backend { server 127.0.0.1:8080; }

server {
    listen 443 ssl http2;   # tls
    listen [::]:8443 ssl;
    server_name example.com www.example.com;
    ssl_certificate /nonexistent/fullchain.pem;
    ssl_certificate_key /nonexistent/privkey.pem;
    location / {
        proxy_pass http://backend;
    }
}
"#;

    #[test]
    fn test_extract_balanced_blocks() {
        let blocks = extract_server_blocks(&strip_comments(SITE));
        assert_eq!(blocks.len(), 2);
        assert!(blocks[1].contains("location /"));
    }

    #[test]
    fn test_parse_blocks() {
        let blocks = parse_blocks(SITE);
        assert_eq!(blocks[0].ports, vec![80]);
        assert!(!blocks[0].ssl);
        assert!(blocks[0].server_names.is_empty());

        assert_eq!(blocks[1].ports, vec![443, 8443]);
        assert!(blocks[1].ssl);
        assert_eq!(blocks[1].server_names, vec!["example.com", "www.example.com"]);
        assert_eq!(blocks[1].certificate_paths, vec!["/nonexistent/fullchain.pem"]);
    }

    #[test]
    fn test_single_line_server_block() {
        let blocks = parse_blocks("server { listen 443 ssl; server_name api.example.com; ssl_certificate /etc/c.pem; }");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].ports, vec![443]);
        assert!(blocks[0].ssl);
        assert_eq!(blocks[0].server_names, vec!["api.example.com"]);
        assert_eq!(blocks[0].certificate_paths, vec!["/etc/c.pem"]);
    }

    #[test]
    fn test_directives_sharing_lines() {
        let conf = "server { listen 80; listen 8080;\n    server_name a.example.com; ssl_certificate \"/etc/ssl/a.pem\"; ssl_certificate_key /etc/ssl/a.key;\n}";
        let blocks = parse_blocks(conf);
        assert_eq!(blocks[0].ports, vec![80, 8080]);
        assert_eq!(blocks[0].server_names, vec!["a.example.com"]);
        assert_eq!(blocks[0].certificate_paths, vec!["/etc/ssl/a.pem"]);
    }

    #[tokio::test]
    async fn test_inline_include_is_followed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("site.conf"),
            "server { listen 8443 ssl; server_name inline.example.com; }",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("nginx.conf"),
            "events { } http { sendfile on; include site.conf; }",
        )
        .unwrap();

        let runner = ScriptedCommands::new();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let info = NginxConfigParser::new(&runner, now)
            .parse_with_includes(&dir.path().join("nginx.conf"))
            .await
            .unwrap();
        assert_eq!(info.ports, vec![8443]);
        assert_eq!(info.domains, vec!["inline.example.com"]);
        assert_eq!(info.protocols, vec!["https"]);
    }

    #[test]
    fn test_commented_server_is_ignored() {
        let blocks = parse_blocks("# server { listen 81; }\nserver { listen 82; }");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].ports, vec![82]);
    }

    #[tokio::test]
    async fn test_parse_with_includes_unions_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let sites = dir.path().join("sites-enabled");
        std::fs::create_dir_all(&sites).unwrap();
        std::fs::write(sites.join("a.conf"), SITE).unwrap();
        std::fs::write(
            sites.join("b.conf"),
            "server { listen 80; server_name api.example.com example.com; }",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("nginx.conf"),
            "http {\n  include sites-enabled/*.conf;\n  include nginx.conf;\n}\n",
        )
        .unwrap();

        let runner = ScriptedCommands::new();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let parser = NginxConfigParser::new(&runner, now);
        let info = parser
            .parse_with_includes(&dir.path().join("nginx.conf"))
            .await
            .unwrap();

        assert_eq!(info.ports, vec![80, 443, 8443]);
        assert_eq!(info.domains, vec!["example.com", "www.example.com", "api.example.com"]);
        assert_eq!(info.protocols, vec!["http", "https"]);
        assert!(info.ssl_enabled);
        assert_eq!(info.ssl_certificates.len(), 1);
        assert!(info.ssl_certificates[0].domain.is_none());

        let again = parser
            .parse_with_includes(&dir.path().join("nginx.conf"))
            .await
            .unwrap();
        assert_eq!(info, again);
    }
}
