//! Job reports.
//!
//! The aggregator turns the outcomes of one job into the JSON result, the
//! plain-text connection report and, on request, per-device transcripts.
//! Every device appears in the report, including those that never connected.

use chrono::{DateTime, Local};

use crate::command::CommandList;
use crate::device::DeviceTypeResolution;
use crate::error::OutputError;
use crate::scheduler::{JobOutcome, JobResult};
use crate::worker::DeviceOutcome;

const NO_TYPE: &str = "None";
const FAILED_TYPE: &str = "Failed";
const COLUMNS: [&str; 5] = [
    "IP",
    "Hostname",
    "Input Device Type",
    "Detected Device Type",
    "Connection status",
];

/// One line of the connection report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub ip: String,
    pub hostname: String,
    pub input_type: String,
    pub detected_type: String,
    pub status: String,
}

impl ReportRow {
    fn from_outcome(outcome: &DeviceOutcome) -> Self {
        let detected_type = match outcome.resolution() {
            Some(DeviceTypeResolution::Declared(t)) | Some(DeviceTypeResolution::Detected(t)) => {
                t.clone()
            }
            Some(DeviceTypeResolution::DetectionFailed) | None => FAILED_TYPE.to_string(),
        };
        Self {
            ip: outcome.ip().to_string(),
            hostname: outcome.hostname().to_string(),
            input_type: outcome
                .declared_type()
                .as_declared()
                .unwrap_or(NO_TYPE)
                .to_string(),
            detected_type,
            status: outcome.status().as_str().to_string(),
        }
    }

    fn cells(&self) -> [&str; 5] {
        [
            self.ip.as_str(),
            self.hostname.as_str(),
            self.input_type.as_str(),
            self.detected_type.as_str(),
            self.status.as_str(),
        ]
    }
}

/// Aggregated view of one finished job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: String,
    pub generated_at: DateTime<Local>,
    pub rows: Vec<ReportRow>,
    pub result: JobResult,
}

pub struct ReportAggregator;

impl ReportAggregator {
    pub fn aggregate(job: &str, generated_at: DateTime<Local>, outcome: &JobOutcome) -> JobReport {
        JobReport {
            job: job.to_string(),
            generated_at,
            rows: outcome.outcomes.iter().map(ReportRow::from_outcome).collect(),
            result: outcome.result.clone(),
        }
    }

    /// Per-device transcript: planned commands, then each output in order.
    pub fn transcript(outcome: &DeviceOutcome, planned: &CommandList) -> String {
        let mut text = format!(
            "##### OUTPUT FOR {} {}\n##### WILL EXECUTE:\n",
            outcome.ip(),
            outcome.hostname()
        );
        for command in planned {
            text.push_str(command);
            text.push('\n');
        }
        for (command, result) in outcome.commands().iter() {
            text.push_str(&format!("##### EXECUTE CMD: {command}\n{}\n\n", result.rendered()));
        }
        text
    }
}

impl JobReport {
    pub fn device_count(&self) -> usize {
        self.rows.len()
    }

    /// Pretty-printed `ip -> {command -> output}` document.
    pub fn to_json(&self) -> Result<String, OutputError> {
        Ok(serde_json::to_string_pretty(&self.result)?)
    }

    /// Plain-text connection table with a header block.
    pub fn connection_table(&self) -> String {
        let mut widths = COLUMNS.map(str::len);
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row.cells()) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut text = format!(
            "Connection report: {}\nGenerated at: {}\nDevices: {}\n\n",
            self.job,
            self.generated_at.format("%Y-%m-%d %H:%M:%S"),
            self.device_count()
        );

        push_row(&mut text, &COLUMNS, &widths);
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        let rule: Vec<&str> = rule.iter().map(String::as_str).collect();
        push_row(&mut text, &rule, &widths);
        for row in &self.rows {
            push_row(&mut text, &row.cells(), &widths);
        }
        text
    }
}

fn push_row(text: &mut String, cells: &[&str], widths: &[usize]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}", width = *width))
        .collect::<Vec<_>>()
        .join("  ");
    text.push_str(line.trim_end());
    text.push('\n');
}
