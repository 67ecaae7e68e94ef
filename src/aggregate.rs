// File: aggregate.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::classify::Bucket;
use crate::job::{Job, JobRecord};
use serde::Serialize;
use std::time::Duration;

/// Running counters of a replay run.
///
/// Snapshots handed to sinks are copies of this value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateResult {
    total: u64,
    completed: u64,
    failed: u64,
    true_positives: u64,
    false_positives: u64,
    true_negatives: u64,
    false_negatives: u64,
    elapsed_ns: u64,
}

impl AggregateResult {
    pub fn new(total: u64) -> AggregateResult {
        AggregateResult {
            total,
            ..Default::default()
        }
    }

    /// Counts a finished job. Pending jobs are ignored.
    pub fn record(&mut self, job: &Job) -> Option<Bucket> {
        let result = job.result();
        if result.is_pending() {
            return None;
        }
        if !result.completed() {
            self.failed += 1;
            return None;
        }

        self.completed += 1;
        let elapsed = result.elapsed().unwrap_or_default();
        self.elapsed_ns = self
            .elapsed_ns
            .saturating_add(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));

        let bucket = job.bucket()?;
        match bucket {
            Bucket::TruePositive => self.true_positives += 1,
            Bucket::FalsePositive => self.false_positives += 1,
            Bucket::TrueNegative => self.true_negatives += 1,
            Bucket::FalseNegative => self.false_negatives += 1,
        }
        debug_assert!(self.is_consistent());
        Some(bucket)
    }

    pub fn is_consistent(&self) -> bool {
        self.completed
            == self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
            && self.completed + self.failed <= self.total
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    pub fn true_positives(&self) -> u64 {
        self.true_positives
    }

    pub fn false_positives(&self) -> u64 {
        self.false_positives
    }

    pub fn true_negatives(&self) -> u64 {
        self.true_negatives
    }

    pub fn false_negatives(&self) -> u64 {
        self.false_negatives
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns)
    }

    fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
        (denominator > 0).then(|| numerator as f64 / denominator as f64)
    }

    /// TP / (TP + FN)
    pub fn detection_rate(&self) -> Option<f64> {
        Self::ratio(
            self.true_positives,
            self.true_positives + self.false_negatives,
        )
    }

    /// FP / (TN + FP)
    pub fn false_positive_rate(&self) -> Option<f64> {
        Self::ratio(
            self.false_positives,
            self.true_negatives + self.false_positives,
        )
    }

    /// (TP + TN) / (TP + TN + FP + FN)
    pub fn accuracy(&self) -> Option<f64> {
        Self::ratio(
            self.true_positives + self.true_negatives,
            self.true_positives + self.true_negatives + self.false_positives + self.false_negatives,
        )
    }

    pub fn average_elapsed(&self) -> Option<Duration> {
        (self.completed > 0).then(|| Duration::from_nanos(self.elapsed_ns / self.completed))
    }
}

/// What a result sink receives after each finished job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSnapshot {
    pub aggregate: AggregateResult,
    pub job: JobRecord,
}
