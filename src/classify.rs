// File: classify.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifiers ending with this suffix are benign traffic.
pub const BENIGN_SUFFIX: &str = "white";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Benign,
    Malicious,
}

impl Label {
    pub fn from_identifier(identifier: &str) -> Self {
        if identifier.ends_with(BENIGN_SUFFIX) {
            Label::Benign
        } else {
            Label::Malicious
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Blocked,
    Passed,
}

impl Verdict {
    pub fn from_status(status_code: u16, block_status_code: u16) -> Self {
        if status_code == block_status_code {
            Verdict::Blocked
        } else {
            Verdict::Passed
        }
    }

    pub fn is_blocked(self) -> bool {
        self == Verdict::Blocked
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bucket {
    TruePositive,
    FalsePositive,
    TrueNegative,
    FalseNegative,
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::TruePositive => write!(f, "TP"),
            Bucket::FalsePositive => write!(f, "FP"),
            Bucket::TrueNegative => write!(f, "TN"),
            Bucket::FalseNegative => write!(f, "FN"),
        }
    }
}

pub fn classify(label: Label, verdict: Verdict) -> Bucket {
    match (label, verdict) {
        (Label::Benign, Verdict::Passed) => Bucket::TrueNegative,
        (Label::Benign, Verdict::Blocked) => Bucket::FalsePositive,
        (Label::Malicious, Verdict::Passed) => Bucket::FalseNegative,
        (Label::Malicious, Verdict::Blocked) => Bucket::TruePositive,
    }
}
