use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::unlock::Platform;

#[derive(Parser, Debug)]
#[command(name = "hostscope")]
#[command(version)]
#[command(about = "Discovers proxy, web and database services on this host and classifies streaming unlock status", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short = 'c', long, global = true, help = "Agent config file (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Submit results to the configured collector")]
    pub report: bool,

    #[arg(short = 'o', long, value_enum, global = true, default_value = "human", help = "Output format")]
    pub output_format: OutputFormat,

    #[arg(short = 'f', long, global = true, help = "Output file path")]
    pub output_file: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Discover services running on this host
    Services,
    /// Probe streaming and AI platforms for network unlock
    Unlock {
        #[arg(long, value_delimiter = ',', help = "Only probe these platforms, e.g. netflix,disney_plus")]
        only: Vec<Platform>,
    },
    /// Service discovery followed by unlock probing
    Scan,
}

impl Command {
    pub fn runs_discovery(&self) -> bool {
        matches!(self, Command::Services | Command::Scan)
    }

    pub fn runs_unlock(&self) -> bool {
        matches!(self, Command::Unlock { .. } | Command::Scan)
    }

    /// Platforms to probe; every platform unless narrowed with `--only`.
    pub fn platforms(&self) -> Vec<Platform> {
        match self {
            Command::Unlock { only } if !only.is_empty() => only.clone(),
            _ => Platform::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum OutputFormat {
    #[value(name = "human", help = "Human-readable output")]
    Human,
    #[value(name = "json", help = "JSON output")]
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlock_only_list() {
        let cli = Cli::parse_from(["hostscope", "unlock", "--only", "netflix,chatgpt", "-o", "json"]);
        assert_eq!(cli.command.platforms(), vec![Platform::Netflix, Platform::Chatgpt]);
        assert_eq!(cli.output_format, OutputFormat::Json);
        assert!(cli.command.runs_unlock());
        assert!(!cli.command.runs_discovery());
    }

    #[test]
    fn test_scan_defaults() {
        let cli = Cli::parse_from(["hostscope", "scan", "--report", "-v"]);
        assert!(cli.report && cli.verbose);
        assert_eq!(cli.command.platforms().len(), 7);
        assert!(cli.command.runs_discovery() && cli.command.runs_unlock());
    }
}
