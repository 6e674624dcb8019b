#![warn(missing_docs)]
//! VecBench Report - Run Reporting
//!
//! Output formats for a finished run:
//! - JSON (machine-readable)
//! - Human-readable terminal output

mod human;
mod json;
mod report;

pub use human::format_human_output;
pub use json::generate_json_report;
pub use report::{
    ArtifactEntry, ReportConfig, ReportMeta, RunReport, RunSummary, SCHEMA_VERSION,
    SamplerCounts, StopReason, SystemInfo, VerificationCounts,
};

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// Human-readable terminal output
    Human,
}

impl OutputFormat {
    /// Render `report` in this format
    pub fn render(&self, report: &RunReport) -> Result<String, serde_json::Error> {
        match self {
            OutputFormat::Json => generate_json_report(report),
            OutputFormat::Human => Ok(format_human_output(report)),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" | "text" => Ok(OutputFormat::Human),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}
