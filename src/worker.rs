// File: worker.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::classify::Verdict;
use crate::config::ReplayConfig;
use crate::connect::ConnectionFactory;
use crate::error::ReplayResult;
use crate::job::Job;
use crate::request::RequestBuilder;
use crate::response::ResponseReader;
use crate::testcases::TestCaseSource;
use log::debug;
use std::time::{Duration, Instant};

/// Executes one request/response exchange per job.
#[derive(Clone)]
pub struct Replayer {
    source: TestCaseSource,
    factory: ConnectionFactory,
    builder: RequestBuilder,
    block_status_code: u16,
}

impl Replayer {
    pub fn new(config: &ReplayConfig, source: TestCaseSource) -> Self {
        Self {
            source,
            factory: ConnectionFactory::new(
                config.addr(),
                config.use_tls(),
                config.timeout_ms(),
                config.connect_attempts(),
            ),
            builder: RequestBuilder::new(
                config.request_host(),
                config.one_request_per_connection(),
            ),
            block_status_code: config.block_status_code(),
        }
    }

    pub async fn execute(&self, job: &mut Job) {
        match self.exchange(job).await {
            Ok((status_code, elapsed)) => {
                let verdict = Verdict::from_status(status_code, self.block_status_code);
                debug!(
                    "{} -> {} ({:?}) in {:.2}ms",
                    job.identifier(),
                    status_code,
                    verdict,
                    elapsed.as_secs_f64() * 1000.0
                );
                job.complete(status_code, elapsed, verdict);
            }
            Err(e) => {
                debug!("{} failed against {}: {}", job.identifier(), self.factory.addr(), e);
                job.fail(e);
            }
        }
    }

    async fn exchange(&self, job: &Job) -> ReplayResult<(u16, Duration)> {
        let raw = self.source.read(job.case())?;
        let request = self.builder.prepare(&raw)?;
        let wire = request.to_bytes();

        let start = Instant::now();
        let mut conn = self.factory.connect().await?;
        conn.write_all(&wire).await?;
        let status = ResponseReader::new(request.is_head())
            .read_status(&mut conn)
            .await?;
        let elapsed = start.elapsed();
        conn.close().await;

        Ok((status, elapsed))
    }
}
