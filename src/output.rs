use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{Outcome, ProgressEvent, ProgressSink, RunReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Log,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress to the tracing subscriber.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

impl LogSink {
    pub fn summarize(report: &RunReport) {
        let mut completed = 0;
        let mut skipped = 0;
        for item in &report.items {
            match &item.outcome {
                Outcome::Completed { .. } => completed += 1,
                Outcome::Skipped => skipped += 1,
                Outcome::Failed { reason } => {
                    tracing::warn!(fips = %item.fips, step = ?item.step, "failed: {reason}")
                }
            }
        }
        info!(
            fips_codes = report.fips_codes.len(),
            completed,
            skipped,
            failed = report.failures(),
            "census data complete"
        );
    }
}
