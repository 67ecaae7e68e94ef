// File: report.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::aggregate::AggregateResult;
use crate::job::Job;
use crate::pipeline::RunOutcome;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::*;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const FALSE_POSITIVES_FILE: &str = "false_positives.csv";
pub const FALSE_NEGATIVES_FILE: &str = "false_negatives.csv";
const CSV_HEADER: &str = "FilePath,IsBlocked,StatusCode,Error";

/// One misclassified case as written to the report files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseReport {
    pub file_path: String,
    pub is_blocked: bool,
    pub status_code: u16,
    pub error: String,
}

impl CaseReport {
    pub fn from_job(job: &Job) -> Self {
        let result = job.result();
        Self {
            file_path: job.identifier().to_string(),
            is_blocked: result.verdict().is_some_and(|v| v.is_blocked()),
            status_code: result.status_code().unwrap_or(0),
            error: result
                .failure()
                .map(ToString::to_string)
                .unwrap_or_default(),
        }
    }

    fn csv_row(&self) -> String {
        format!(
            "{},{},{},{}",
            quote(&self.file_path),
            self.is_blocked,
            self.status_code,
            quote(&self.error)
        )
    }
}

#[derive(Debug, Serialize)]
struct JsonSummary<'a> {
    target: &'a str,
    block_status_code: u16,
    aggregate: &'a AggregateResult,
    detection_rate: Option<f64>,
    false_positive_rate: Option<f64>,
    accuracy: Option<f64>,
    average_elapsed_ms: Option<f64>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    cancelled: bool,
    false_positives: &'a [CaseReport],
    false_negatives: &'a [CaseReport],
}

pub struct Reporter;

impl Reporter {
    fn rows(outcome: &RunOutcome) -> Vec<(&'static str, String)> {
        let aggregate = &outcome.aggregate;
        vec![
            ("Total", aggregate.total().to_string()),
            ("Success", aggregate.completed().to_string()),
            ("Error", aggregate.failed().to_string()),
            (
                "Detection rate",
                format!(
                    "{} (TP {} / FN {})",
                    percent(aggregate.detection_rate()),
                    aggregate.true_positives(),
                    aggregate.false_negatives()
                ),
            ),
            (
                "False positive rate",
                format!(
                    "{} (FP {} / TN {})",
                    percent(aggregate.false_positive_rate()),
                    aggregate.false_positives(),
                    aggregate.true_negatives()
                ),
            ),
            ("Accuracy", percent(aggregate.accuracy())),
            (
                "Average latency",
                aggregate
                    .average_elapsed()
                    .map(|d| format!("{:.2}ms", d.as_secs_f64() * 1000.0))
                    .unwrap_or_else(|| "n/a".to_string()),
            ),
            ("Started", outcome.started_at.to_rfc3339()),
            ("Finished", outcome.finished_at.to_rfc3339()),
        ]
    }

    /// Plain text summary, one `Label: value` per line.
    pub fn summary(outcome: &RunOutcome) -> String {
        let mut text = String::new();
        for (label, value) in Self::rows(outcome) {
            text.push_str(&format!("{}: {}\n", label, value));
        }
        if outcome.cancelled {
            text.push_str("Run was stopped before all cases were dispatched\n");
        }
        text
    }

    pub fn print_summary(outcome: &RunOutcome) {
        println!();
        println!("{}", "WAF benchmark summary".bold().underline());
        for (label, value) in Self::rows(outcome) {
            let value = match label {
                "Error" if outcome.aggregate.failed() > 0 => value.red().to_string(),
                "Detection rate" => value.green().to_string(),
                "False positive rate" if outcome.aggregate.false_positives() > 0 => {
                    value.yellow().to_string()
                }
                _ => value,
            };
            println!("{:>20}: {}", label.cyan(), value);
        }
        if outcome.cancelled {
            println!(
                "{} run was stopped before all cases were dispatched",
                "⚠".yellow().bold()
            );
        }
    }

    /// Writes both misclassification files into `dir` and returns their paths.
    pub fn write_reports(dir: &Path, outcome: &RunOutcome) -> Result<(PathBuf, PathBuf)> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create report directory {}", dir.display()))?;
        let fp_path = dir.join(FALSE_POSITIVES_FILE);
        let fn_path = dir.join(FALSE_NEGATIVES_FILE);
        Self::write_csv(&fp_path, &outcome.false_positives)?;
        Self::write_csv(&fn_path, &outcome.false_negatives)?;
        Ok((fp_path, fn_path))
    }

    pub fn write_csv(path: &Path, rows: &[CaseReport]) -> Result<()> {
        let mut file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writeln!(file, "{}", CSV_HEADER)?;
        for row in rows {
            writeln!(file, "{}", row.csv_row())?;
        }
        Ok(())
    }

    pub fn write_json(
        path: &Path,
        target: &str,
        block_status_code: u16,
        outcome: &RunOutcome,
    ) -> Result<()> {
        let aggregate = &outcome.aggregate;
        let summary = JsonSummary {
            target,
            block_status_code,
            aggregate,
            detection_rate: aggregate.detection_rate(),
            false_positive_rate: aggregate.false_positive_rate(),
            accuracy: aggregate.accuracy(),
            average_elapsed_ms: aggregate
                .average_elapsed()
                .map(|d| d.as_secs_f64() * 1000.0),
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
            cancelled: outcome.cancelled,
            false_positives: &outcome.false_positives,
            false_negatives: &outcome.false_negatives,
        };
        let json = serde_json::to_string_pretty(&summary)?;
        let mut file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writeln!(file, "{}", json)?;
        Ok(())
    }
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn percent(ratio: Option<f64>) -> String {
    ratio
        .map(|r| format!("{:.2}%", r * 100.0))
        .unwrap_or_else(|| "n/a".to_string())
}
