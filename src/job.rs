// File: job.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::classify::{classify, Bucket, Label, Verdict};
use crate::error::ReplayError;
use crate::testcases::TestCase;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Pending,
    Failed(ReplayError),
    Completed {
        status_code: u16,
        elapsed: Duration,
        verdict: Verdict,
    },
}

impl JobResult {
    pub fn completed(&self) -> bool {
        matches!(self, JobResult::Completed { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, JobResult::Pending)
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            JobResult::Completed { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            JobResult::Completed { elapsed, .. } => Some(*elapsed),
            _ => None,
        }
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            JobResult::Completed { verdict, .. } => Some(*verdict),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&ReplayError> {
        match self {
            JobResult::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// One test case in flight.
#[derive(Debug, Clone)]
pub struct Job {
    case: TestCase,
    result: JobResult,
}

impl Job {
    pub fn new(case: TestCase) -> Self {
        Self {
            case,
            result: JobResult::Pending,
        }
    }

    pub fn case(&self) -> &TestCase {
        &self.case
    }

    pub fn identifier(&self) -> &str {
        self.case.identifier()
    }

    pub fn result(&self) -> &JobResult {
        &self.result
    }

    pub fn complete(&mut self, status_code: u16, elapsed: Duration, verdict: Verdict) {
        debug_assert!(self.result.is_pending(), "job finished twice");
        self.result = JobResult::Completed {
            status_code,
            elapsed,
            verdict,
        };
    }

    pub fn fail(&mut self, reason: ReplayError) {
        debug_assert!(self.result.is_pending(), "job finished twice");
        self.result = JobResult::Failed(reason);
    }

    /// Confusion bucket of a completed job.
    pub fn bucket(&self) -> Option<Bucket> {
        self.result
            .verdict()
            .map(|verdict| classify(self.case.label(), verdict))
    }

    pub fn record(&self) -> JobRecord {
        JobRecord {
            identifier: self.identifier().to_string(),
            label: self.case.label(),
            completed: self.result.completed(),
            status_code: self.result.status_code(),
            blocked: self.result.verdict().map(Verdict::is_blocked),
            elapsed_ms: self.result.elapsed().map(|d| d.as_secs_f64() * 1000.0),
            bucket: self.bucket(),
            error: self.result.failure().map(ToString::to_string),
        }
    }
}

/// Immutable summary of a finished job, handed to sinks and reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub identifier: String,
    pub label: Label,
    pub completed: bool,
    pub status_code: Option<u16>,
    pub blocked: Option<bool>,
    pub elapsed_ms: Option<f64>,
    pub bucket: Option<Bucket>,
    pub error: Option<String>,
}
