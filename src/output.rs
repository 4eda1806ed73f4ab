use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::*;
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::discovery::{DetectedService, ServiceStatus};
use crate::unlock::{StreamingResult, UnlockStatus};

/// Everything one CLI run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub node: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<DetectedService>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming: Option<Vec<StreamingResult>>,
}

pub struct OutputWriter {
    format: OutputFormat,
    file: Option<PathBuf>,
}

impl OutputWriter {
    pub fn new(format: OutputFormat, file: Option<PathBuf>) -> Self {
        Self { format, file }
    }

    pub fn write(&self, report: &ScanReport) -> Result<()> {
        let output = self.render(report)?;

        match &self.file {
            Some(path) => {
                let file = File::create(path)?;
                let mut writer = BufWriter::new(file);
                writer.write_all(output.as_bytes())?;
                writer.flush()?;
            }
            None => {
                print!("{}", output);
                io::stdout().flush()?;
            }
        }

        Ok(())
    }

    pub fn render(&self, report: &ScanReport) -> Result<String> {
        Ok(match self.format {
            OutputFormat::Human => format_human(report),
            OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(report)?),
        })
    }
}

fn format_human(report: &ScanReport) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "\n{} {} {}\n\n",
        "HOSTSCOPE".truecolor(0, 255, 65).bold(),
        "•".truecolor(64, 64, 64),
        report.node.truecolor(255, 255, 255).bold()
    ));

    if let Some(services) = &report.services {
        output.push_str(&format_services(services));
    }
    if let Some(streaming) = &report.streaming {
        output.push_str(&format_streaming(streaming));
    }

    output.push_str(&format!(
        "{} {}\n",
        "⚡".truecolor(0, 255, 65).bold(),
        format!(
            "finished in {}ms",
            (report.finished_at - report.started_at).num_milliseconds()
        )
        .truecolor(128, 128, 128)
    ));
    output
}

fn format_services(services: &[DetectedService]) -> String {
    let mut output = format!(
        "{} {}\n",
        "▶".truecolor(0, 255, 65).bold(),
        format!("{} services", services.len()).truecolor(0, 212, 255).bold()
    );

    if services.is_empty() {
        output.push_str(&format!(
            "  {} {}\n",
            "⚠".truecolor(255, 140, 0).bold(),
            "nothing recognised on this host".truecolor(128, 128, 128)
        ));
    }

    for service in services {
        let port = service
            .port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let state = match service.status {
            ServiceStatus::Running => "running".truecolor(0, 255, 65),
            ServiceStatus::Stopped => "stopped".truecolor(255, 140, 0),
        };
        let mut line = format!(
            "  {:>5} {} {} {} [{}]",
            port.truecolor(255, 255, 255).bold(),
            "●".truecolor(0, 255, 65),
            state,
            service.service_name.truecolor(255, 255, 255),
            service.service_type.to_string().truecolor(191, 64, 191)
        );
        if let Some(version) = &service.details.version {
            line.push_str(&format!(" {}", version.truecolor(128, 128, 128)));
        }
        if !service.domains.is_empty() {
            line.push_str(&format!(" {}", service.domains.join(",").truecolor(0, 212, 255)));
        }
        output.push_str(&line);
        output.push('\n');

        for link in &service.details.share_links {
            output.push_str(&format!("        {}\n", link.truecolor(128, 128, 128)));
        }
    }
    output.push('\n');
    output
}

fn format_streaming(results: &[StreamingResult]) -> String {
    let mut output = format!(
        "{} {}\n",
        "▶".truecolor(0, 255, 65).bold(),
        "network unlock".truecolor(0, 212, 255).bold()
    );

    for result in results {
        let status = result.status.to_string();
        let status = if result.is_unlocked() {
            status.truecolor(0, 255, 65).bold()
        } else if result.status == UnlockStatus::Failed {
            status.truecolor(255, 140, 0).bold()
        } else {
            status.truecolor(255, 64, 64).bold()
        };
        let mut line = format!(
            "  {:<20} {:<8}",
            result.service.display_name().truecolor(255, 255, 255),
            status
        );
        if let Some(region) = &result.region {
            line.push_str(&format!(" {}", region.truecolor(191, 64, 191)));
        }
        if let Some(unlock_type) = &result.unlock_type {
            line.push_str(&format!(" {}", unlock_type.to_string().truecolor(128, 128, 128)));
        }
        if let Some(error) = &result.error_msg {
            line.push_str(&format!(" ({})", error.truecolor(128, 128, 128)));
        }
        output.push_str(&line);
        output.push('\n');
    }
    output.push('\n');
    output
}
