// File: error.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use thiserror::Error;

/// Errors raised while replaying test cases.
///
/// The per-job variants end a single job as failed; the pipeline keeps
/// running. `EmptyCorpus`, `InvalidTarget`, `InvalidConfig` and
/// `AlreadyStarted` are raised before any job is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("connect to {addr} failed after {attempts} attempts: {reason}")]
    DialFailure {
        addr: String,
        attempts: u32,
        reason: String,
    },

    #[error("malformed request template: {0}")]
    MalformedTemplate(String),

    #[error("send request failed: {0}")]
    WriteFailure(String),

    #[error("read response timed out")]
    ReadTimeout,

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("test case not found: {0}")]
    NotFound(String),

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("no test case found")]
    EmptyCorpus,

    #[error("invalid target {0}, example: http://example.com:9443")]
    InvalidTarget(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("pipeline already started")]
    AlreadyStarted,
}

impl ReplayError {
    pub(crate) fn io(path: &str, error: &std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_string())
        } else {
            Self::Io {
                path: path.to_string(),
                reason: error.to_string(),
            }
        }
    }
}

pub type ReplayResult<T> = Result<T, ReplayError>;
