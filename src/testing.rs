//! Deterministic fakes for the injected seams.
//!
//! Every command, HTTP exchange and DNS answer a test needs is scripted up
//! front; anything unscripted fails the way a missing tool or an unreachable
//! host would.
//!
//! ```ignore
//! let runner = ScriptedCommands::new()
//!     .with("ss -tulnp", SS_OUTPUT)
//!     .with_missing("netstat");
//! let http = ScriptedHttp::new().on("https://www.reddit.com/", HttpResponse::new(403, ""));
//! let dns = StaticDns::new().with_a("reddit.com", &["151.101.1.140"]);
//! ```

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

pub use crate::clock::FixedClock;
use crate::error::{Error, Result};
use crate::exec::{CommandOutput, CommandRunner};
use crate::unlock::dns::DnsResolver;
use crate::unlock::http::{HttpClient, HttpRequest, HttpResponse};

#[derive(Debug, Clone)]
enum Scripted {
    Output(CommandOutput),
    Denied,
}

/// `CommandRunner` answering from a table keyed by the full command line
/// (`program` and arguments joined by single spaces).
#[derive(Debug, Default)]
pub struct ScriptedCommands {
    exact: HashMap<String, Scripted>,
    prefixes: Vec<(String, Scripted)>,
    missing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, command_line: &str, stdout: &str) -> Self {
        self.with_output(command_line, CommandOutput::ok(stdout))
    }

    pub fn with_output(mut self, command_line: &str, output: CommandOutput) -> Self {
        self.exact.insert(command_line.to_string(), Scripted::Output(output));
        self
    }

    /// Matches any command line starting with `prefix`; exact entries win.
    pub fn with_prefix(mut self, prefix: &str, stdout: &str) -> Self {
        self.prefixes
            .push((prefix.to_string(), Scripted::Output(CommandOutput::ok(stdout))));
        self
    }

    pub fn with_denied(mut self, prefix: &str) -> Self {
        self.prefixes.push((prefix.to_string(), Scripted::Denied));
        self
    }

    /// Every invocation of `program` fails as not installed.
    pub fn with_missing(mut self, program: &str) -> Self {
        self.missing.insert(program.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn lookup(&self, line: &str) -> Option<Scripted> {
        if let Some(found) = self.exact.get(line) {
            return Some(found.clone());
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, scripted)| scripted.clone())
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommands {
    async fn run(&self, program: &str, args: &[&str], _limit: Duration) -> Result<CommandOutput> {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(line.clone());
        }

        if self.missing.contains(program) {
            return Err(Error::tool(program, "not installed"));
        }
        match self.lookup(&line) {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::Denied) => Err(Error::Permission(format!(
                "{}: permission denied while trying to connect to the daemon socket",
                program
            ))),
            None => Err(Error::tool(program, "not scripted")),
        }
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Response(HttpResponse),
    Failure(String),
}

/// `HttpClient` answering by URL. A URL scripted several times replies in
/// order and then keeps repeating its last reply. A rule ending in `*`
/// matches by prefix.
#[derive(Debug, Default)]
pub struct ScriptedHttp {
    rules: Mutex<Vec<(String, Vec<Reply>)>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, url: &str, response: HttpResponse) -> Self {
        self.push(url, Reply::Response(response));
        self
    }

    pub fn on_text(self, url: &str, status: u16, body: &str) -> Self {
        self.on(url, HttpResponse::new(status, body))
    }

    pub fn fail(self, url: &str, message: &str) -> Self {
        self.push(url, Reply::Failure(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn push(&self, url: &str, reply: Reply) {
        if let Ok(mut rules) = self.rules.lock() {
            match rules.iter_mut().find(|(u, _)| u == url) {
                Some((_, replies)) => replies.push(reply),
                None => rules.push((url.to_string(), vec![reply])),
            }
        }
    }

    fn next_reply(&self, url: &str) -> Option<Reply> {
        let mut rules = self.rules.lock().ok()?;
        let (_, replies) = rules.iter_mut().find(|(rule, _)| {
            rule == url
                || rule
                    .strip_suffix('*')
                    .map(|prefix| url.starts_with(prefix))
                    .unwrap_or(false)
        })?;
        if replies.len() > 1 {
            Some(replies.remove(0))
        } else {
            replies.first().cloned()
        }
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        match self.next_reply(&url) {
            Some(Reply::Response(mut response)) => {
                if response.final_url.is_empty() {
                    response.final_url = url;
                }
                Ok(response)
            }
            Some(Reply::Failure(message)) => Err(Error::Network(message)),
            None => Err(Error::Network(format!("connection refused: {}", url))),
        }
    }
}

/// `DnsResolver` with fixed answers. Unknown names do not exist.
#[derive(Debug, Default, Clone)]
pub struct StaticDns {
    a: HashMap<String, Vec<Ipv4Addr>>,
    cname: HashMap<String, usize>,
    wildcards: Vec<(String, Ipv4Addr)>,
    failures: HashSet<String>,
    nameserver: Option<IpAddr>,
}

impl StaticDns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_a(mut self, domain: &str, addresses: &[&str]) -> Self {
        let parsed = addresses.iter().filter_map(|a| a.parse().ok()).collect();
        self.a.insert(domain.to_string(), parsed);
        self
    }

    pub fn with_cname(mut self, domain: &str, count: usize) -> Self {
        self.cname.insert(domain.to_string(), count);
        self
    }

    /// Every subdomain of `domain` resolves to `address`.
    pub fn with_wildcard(mut self, domain: &str, address: Ipv4Addr) -> Self {
        self.wildcards.push((format!(".{}", domain), address));
        self
    }

    /// Lookups of `domain` error out instead of answering.
    pub fn with_failure(mut self, domain: &str) -> Self {
        self.failures.insert(domain.to_string());
        self
    }

    pub fn with_nameserver(mut self, nameserver: IpAddr) -> Self {
        self.nameserver = Some(nameserver);
        self
    }
}

#[async_trait]
impl DnsResolver for StaticDns {
    async fn lookup_a(&self, domain: &str) -> Result<Vec<Ipv4Addr>> {
        if self.failures.contains(domain) {
            return Err(Error::Network(format!("SERVFAIL for {}", domain)));
        }
        if let Some(addresses) = self.a.get(domain) {
            return Ok(addresses.clone());
        }
        Ok(self
            .wildcards
            .iter()
            .filter(|(suffix, _)| domain.ends_with(suffix.as_str()))
            .map(|(_, address)| *address)
            .collect())
    }

    async fn count_cname(&self, domain: &str) -> Result<usize> {
        if self.failures.contains(domain) {
            return Err(Error::Network(format!("SERVFAIL for {}", domain)));
        }
        Ok(self.cname.get(domain).copied().unwrap_or(0))
    }

    fn primary_nameserver(&self) -> Option<IpAddr> {
        self.nameserver
    }
}
