// File: cli.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::config::{ReplayConfig, Target, TemplateSource, DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT_MS};
use crate::error::ReplayResult;
use clap::{ArgAction, Parser};
use std::num::NonZeroU32;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[arg(
        short = 't',
        long = "target",
        help = "Target URL, e.g. http://127.0.0.1:8080 or https://waf.example"
    )]
    pub target: String,

    #[arg(short = 'c', long = "concurrency", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    #[arg(
        long = "timeout",
        default_value_t = DEFAULT_TIMEOUT_MS,
        help = "Write timeout in milliseconds; reads may take twice as long"
    )]
    pub timeout: u64,

    #[arg(short = 'H', long = "host", help = "Override the Host header")]
    pub host: Option<String>,

    #[arg(
        long = "rps",
        default_value_t = true,
        action = ArgAction::Set,
        help = "Send one request per connection (Connection: close)"
    )]
    pub rps: bool,

    #[arg(
        short = 'g',
        long = "testcases",
        help = "Directory or file of request templates; the built-in sample corpus is used if absent"
    )]
    pub testcases: Option<PathBuf>,

    #[arg(long = "filter", help = "Only replay test cases whose path matches this regex")]
    pub filter: Option<String>,

    #[arg(
        long = "block-status",
        help = "Status code the WAF answers with when blocking; probed when absent"
    )]
    pub block_status: Option<u16>,

    #[arg(long = "rate-limit", help = "Maximum requests per second")]
    pub rate_limit: Option<NonZeroU32>,

    #[arg(short = 'o', long = "output-dir", default_value = ".")]
    pub output_dir: PathBuf,

    #[arg(long = "json", help = "Write a JSON run summary to this file")]
    pub json: Option<PathBuf>,

    #[arg(long = "log-level", default_value = "warn")]
    pub log_level: String,

    #[arg(
        short = 'q',
        long = "quiet",
        help = "Hide the progress bar"
    )]
    pub quiet: bool,
}

impl Cli {
    pub fn parse_target(&self) -> ReplayResult<Target> {
        Target::parse(&self.target)
    }

    /// Builds the replay configuration. The block status code is left at
    /// its default when `--block-status` is absent.
    pub fn to_config(&self, target: &Target) -> ReplayConfig {
        let mut config = ReplayConfig::from_target(target);
        config.set_concurrency(self.concurrency);
        config.set_timeout_ms(self.timeout);
        config.set_host_override(self.host.clone());
        config.set_one_request_per_connection(self.rps);
        if let Some(path) = &self.testcases {
            config.set_template_source(TemplateSource::Path(path.clone()));
        }
        config.set_filter(self.filter.clone());
        if let Some(code) = self.block_status {
            config.set_block_status_code(code);
        }
        config.set_rate_limit(self.rate_limit);
        config.set_output_dir(self.output_dir.clone());
        config
    }
}
