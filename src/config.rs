// File: config.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::{ReplayError, ReplayResult};
use std::num::NonZeroU32;
use std::path::PathBuf;
use url::Url;

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_BLOCK_STATUS: u16 = 403;
/// Total dial attempts per job, retried immediately.
pub const CONNECT_ATTEMPTS: u32 = 4;

/// Where request templates are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Embedded,
    Path(PathBuf),
}

/// Target parsed from a `http://` or `https://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: String,
    addr: String,
    use_tls: bool,
}

impl Target {
    pub fn parse(target: &str) -> ReplayResult<Self> {
        let parsed = Url::parse(target).map_err(|_| ReplayError::InvalidTarget(target.into()))?;
        let use_tls = match parsed.scheme() {
            "https" => true,
            "http" => false,
            _ => return Err(ReplayError::InvalidTarget(target.into())),
        };
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ReplayError::InvalidTarget(target.into()))?;

        let addr = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self {
            url: target.trim_end_matches('/').to_string(),
            addr,
            use_tls,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `host[:port]` as written in the URL; the port is only present when
    /// it is not the scheme default.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn use_tls(&self) -> bool {
        self.use_tls
    }
}

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    addr: String,
    use_tls: bool,
    concurrency: usize,
    timeout_ms: u64,
    block_status_code: u16,
    host_override: Option<String>,
    one_request_per_connection: bool,
    template_source: TemplateSource,
    filter: Option<String>,
    rate_limit: Option<NonZeroU32>,
    output_dir: PathBuf,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self::new("", false)
    }
}

impl ReplayConfig {
    pub fn new(addr: &str, use_tls: bool) -> Self {
        Self {
            addr: addr.to_string(),
            use_tls,
            concurrency: DEFAULT_CONCURRENCY,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            block_status_code: DEFAULT_BLOCK_STATUS,
            host_override: None,
            one_request_per_connection: true,
            template_source: TemplateSource::Embedded,
            filter: None,
            rate_limit: None,
            output_dir: PathBuf::from("."),
        }
    }

    pub fn from_target(target: &Target) -> Self {
        Self::new(target.addr(), target.use_tls())
    }

    /// Rejects configurations that cannot start a run.
    pub fn validate(&self) -> ReplayResult<()> {
        if self.addr.trim().is_empty() || self.addr.contains(['\r', '\n', ' ', '/']) {
            return Err(ReplayError::InvalidTarget(self.addr.clone()));
        }
        if self.concurrency == 0 {
            return Err(ReplayError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ReplayError::InvalidConfig(
                "timeout must be at least 1 ms".to_string(),
            ));
        }
        if let Some(host) = &self.host_override {
            if host.contains(['\r', '\n']) {
                return Err(ReplayError::InvalidConfig(
                    "host override contains line breaks".to_string(),
                ));
            }
        }
        if let Some(filter) = &self.filter {
            regex::Regex::new(filter)
                .map_err(|e| ReplayError::InvalidConfig(format!("filter: {}", e)))?;
        }
        Ok(())
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn set_concurrency(&mut self, concurrency: usize) {
        self.concurrency = concurrency;
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn set_timeout_ms(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
    }

    pub fn connect_attempts(&self) -> u32 {
        CONNECT_ATTEMPTS
    }

    pub fn block_status_code(&self) -> u16 {
        self.block_status_code
    }

    pub fn set_block_status_code(&mut self, code: u16) {
        self.block_status_code = code;
    }

    pub fn host_override(&self) -> Option<&str> {
        self.host_override.as_deref()
    }

    pub fn set_host_override(&mut self, host: Option<String>) {
        self.host_override = host.filter(|h| !h.is_empty());
    }

    /// Value written to the `Host` header of every replayed request.
    pub fn request_host(&self) -> &str {
        self.host_override().unwrap_or(&self.addr)
    }

    pub fn one_request_per_connection(&self) -> bool {
        self.one_request_per_connection
    }

    pub fn set_one_request_per_connection(&mut self, enabled: bool) {
        self.one_request_per_connection = enabled;
    }

    pub fn template_source(&self) -> &TemplateSource {
        &self.template_source
    }

    pub fn set_template_source(&mut self, source: TemplateSource) {
        self.template_source = source;
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn set_filter(&mut self, filter: Option<String>) {
        self.filter = filter;
    }

    pub fn rate_limit(&self) -> Option<NonZeroU32> {
        self.rate_limit
    }

    pub fn set_rate_limit(&mut self, rate_limit: Option<NonZeroU32>) {
        self.rate_limit = rate_limit;
    }

    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    pub fn set_output_dir(&mut self, output_dir: PathBuf) {
        self.output_dir = output_dir;
    }
}
