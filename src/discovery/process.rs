// Process command-line evidence across full hosts and minimal containers
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::AgentConfig;
use crate::exec::{CommandRunner, QUICK_TIMEOUT};

type ListingParser = fn(&str) -> Vec<String>;

/// Process-listing invocations in preference order. The first one that
/// yields any command line is used.
const PROCESS_TOOLS: &[(&str, &[&str], ListingParser)] = &[
    ("ps", &["-eo", "args"], parse_args_listing),
    ("ps", &["-e", "-o", "args="], parse_args_listing),
    ("busybox", &["ps", "-o", "args"], parse_args_listing),
    ("ps", &["aux"], parse_ps_aux),
];

const LISTING_HEADERS: &[&str] = &["COMMAND", "ARGS", "CMD"];

const CGROUP_MARKERS: &[&str] = &["docker", "kubepods", "containerd", "lxc", "libpod"];

/// One command line per row, header row dropped.
pub fn parse_args_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !LISTING_HEADERS.contains(line))
        .map(str::to_string)
        .collect()
}

/// `ps aux`: the command starts at the eleventh column.
pub fn parse_ps_aux(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| !line.trim_start().starts_with("USER"))
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            (columns.len() > 10).then(|| columns[10..].join(" "))
        })
        .collect()
}

pub fn cgroup_indicates_container(cgroup: &str) -> bool {
    CGROUP_MARKERS.iter().any(|marker| cgroup.contains(marker))
}

/// Command line of one `/proc/<pid>` entry: cmdline, then comm, then the
/// exe link target.
pub fn read_process_entry(dir: &Path) -> Option<String> {
    if let Ok(raw) = std::fs::read(dir.join("cmdline")) {
        let joined = raw
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.trim().is_empty() {
            return Some(joined.trim().to_string());
        }
    }
    if let Ok(comm) = std::fs::read_to_string(dir.join("comm")) {
        if !comm.trim().is_empty() {
            return Some(comm.trim().to_string());
        }
    }
    std::fs::read_link(dir.join("exe"))
        .ok()
        .map(|target| target.to_string_lossy().trim().to_string())
        .filter(|target| !target.is_empty())
}

/// Every numeric entry of a proc tree, in PID order.
pub fn read_proc_tree(root: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %root.display(), error = %e, "cannot read proc tree");
            return Vec::new();
        }
    };

    let mut pids: Vec<(u32, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let pid = entry.file_name().to_str()?.parse::<u32>().ok()?;
            Some((pid, entry.path()))
        })
        .collect();
    pids.sort_by_key(|(pid, _)| *pid);

    pids.iter()
        .filter_map(|(_, dir)| read_process_entry(dir))
        .collect()
}

pub struct ProcessCollector {
    pub proc_path: PathBuf,
    pub host_proc_path: PathBuf,
    pub dockerenv_path: PathBuf,
}

impl ProcessCollector {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            proc_path: config.proc_path.clone(),
            host_proc_path: config.host_proc_path.clone(),
            dockerenv_path: PathBuf::from("/.dockerenv"),
        }
    }

    pub fn in_container(&self) -> bool {
        if self.dockerenv_path.exists() {
            return true;
        }
        std::fs::read_to_string(self.proc_path.join("1").join("cgroup"))
            .map(|cgroup| cgroup_indicates_container(&cgroup))
            .unwrap_or(false)
    }

    /// Union of the host proc tree (inside a container), the first working
    /// listing tool and the local proc tree, de-duplicated.
    pub async fn collect(&self, runner: &dyn CommandRunner) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut processes = Vec::new();
        let mut absorb = |lines: Vec<String>| {
            for line in lines {
                let line = line.trim().to_string();
                if !line.is_empty() && seen.insert(line.clone()) {
                    processes.push(line);
                }
            }
        };

        if self.in_container() && self.host_proc_path.is_dir() {
            let host = read_proc_tree(&self.host_proc_path);
            debug!(count = host.len(), "host proc tree read");
            absorb(host);
        }

        absorb(self.from_tools(runner).await);
        absorb(read_proc_tree(&self.proc_path));
        processes
    }

    async fn from_tools(&self, runner: &dyn CommandRunner) -> Vec<String> {
        for (tool, args, parser) in PROCESS_TOOLS {
            match runner.run_ok(tool, args, QUICK_TIMEOUT).await {
                Ok(output) => {
                    let lines = parser(&output);
                    if !lines.is_empty() {
                        return lines;
                    }
                }
                Err(e) => debug!(tool = %tool, args = ?args, error = %e, "process listing failed"),
            }
        }
        Vec::new()
    }
}
