// File: pipeline.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Producer → worker pool → aggregator.
//!
//! The producer walks the test case set in order and feeds a bounded job
//! queue. `concurrency` workers take jobs from the queue, each running one
//! full exchange against the target, and pass the finished job to the
//! aggregator, which is the only owner of the counters. A job counts as
//! dispatched once a worker takes it. `stop()` only prevents new
//! dispatches: whatever a worker already holds runs to completion, and jobs
//! still waiting in the queue are dropped without ever reaching the target
//! or the counters.

use crate::aggregate::{AggregateResult, ResultSnapshot};
use crate::classify::Bucket;
use crate::config::ReplayConfig;
use crate::error::{ReplayError, ReplayResult};
use crate::job::Job;
use crate::report::CaseReport;
use crate::testcases::TestCaseSource;
use crate::worker::Replayer;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
    Done,
}

/// Receives dispatch progress. Best effort.
pub trait ProgressSink: Send + Sync {
    fn advance(&self, n: u64);
}

impl ProgressSink for indicatif::ProgressBar {
    fn advance(&self, n: u64) {
        self.inc(n);
    }
}

/// Receives a copy of the counters after every finished job.
pub trait ResultSink: Send + Sync {
    fn publish(&self, snapshot: ResultSnapshot);
}

impl ResultSink for mpsc::UnboundedSender<ResultSnapshot> {
    fn publish(&self, snapshot: ResultSnapshot) {
        let _ = self.send(snapshot);
    }
}

/// Terminal output of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub aggregate: AggregateResult,
    pub false_positives: Vec<CaseReport>,
    pub false_negatives: Vec<CaseReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
}

struct Tally {
    aggregate: AggregateResult,
    false_positives: Vec<CaseReport>,
    false_negatives: Vec<CaseReport>,
}

pub struct ReplayPipeline {
    replayer: Replayer,
    source: TestCaseSource,
    concurrency: usize,
    rate_limit: Option<NonZeroU32>,
    cancel: CancellationToken,
    state: watch::Sender<PipelineState>,
    progress: Option<Arc<dyn ProgressSink>>,
    results: Option<Arc<dyn ResultSink>>,
}

impl ReplayPipeline {
    pub fn new(config: &ReplayConfig, source: TestCaseSource) -> ReplayResult<Self> {
        config.validate()?;
        if source.is_empty() {
            return Err(ReplayError::EmptyCorpus);
        }
        let (state, _) = watch::channel(PipelineState::Idle);
        Ok(Self {
            replayer: Replayer::new(config, source.clone()),
            source,
            concurrency: config.concurrency(),
            rate_limit: config.rate_limit(),
            cancel: CancellationToken::new(),
            state,
            progress: None,
            results: None,
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_result_sink(mut self, results: Arc<dyn ResultSink>) -> Self {
        self.results = Some(results);
        self
    }

    pub fn total(&self) -> usize {
        self.source.len()
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Stops dispatching new jobs. In-flight jobs still finish.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Token that stops this pipeline when cancelled, for use from other tasks.
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops this pipeline on Ctrl-C, or on SIGTERM where the platform has it.
    /// Must be called from within the runtime.
    pub fn stop_on_signals(&self) -> std::io::Result<JoinHandle<()>> {
        #[cfg(unix)]
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let stop = self.stop_handle();
        Ok(tokio::spawn(async move {
            #[cfg(unix)]
            let terminated = terminate.recv();
            #[cfg(not(unix))]
            let terminated = std::future::pending::<Option<()>>();
            tokio::select! {
                _ = stop.cancelled() => return,
                Ok(()) = signal::ctrl_c() => warn!("interrupted, waiting for in-flight requests"),
                _ = terminated => warn!("terminated, waiting for in-flight requests"),
            }
            stop.cancel();
        }))
    }

    pub async fn run(&self) -> ReplayResult<RunOutcome> {
        let started = self.state.send_if_modified(|state| {
            if *state == PipelineState::Idle {
                *state = PipelineState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(ReplayError::AlreadyStarted);
        }

        let started_at = Utc::now();
        let total = self.source.len() as u64;
        info!(
            "replaying {} test cases with {} workers",
            total, self.concurrency
        );

        let (job_tx, job_rx) = mpsc::channel::<Job>(self.concurrency);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, result_rx) = mpsc::channel::<Job>(self.concurrency);
        let dispatch = self.cancel.child_token();

        let aggregator = tokio::spawn(aggregate(result_rx, total, self.results.clone()));

        let limiter = self
            .rate_limit
            .map(|rate| DirectLimiter::direct(Quota::per_second(rate)));
        let producer = tokio::spawn(produce(
            self.source.clone(),
            job_tx,
            dispatch.clone(),
            limiter,
        ));

        let workers = (0..self.concurrency).map(|id| {
            tokio::spawn(work(
                id,
                self.replayer.clone(),
                Arc::clone(&job_rx),
                result_tx.clone(),
                self.cancel.clone(),
                self.progress.clone(),
            ))
        });
        for joined in join_all(workers).await {
            if let Err(e) = joined {
                error!("worker task ended abnormally: {}", e);
            }
        }

        // Unblocks the producer if no worker is left to take its next job.
        dispatch.cancel();
        if let Err(e) = producer.await {
            error!("producer task ended abnormally: {}", e);
        }

        let mut queue = job_rx.lock().await;
        let mut dropped = 0;
        while let Some(job) = queue.recv().await {
            debug!("{} was queued but never started", job.identifier());
            dropped += 1;
        }
        drop(queue);
        if dropped > 0 {
            info!("stopped with {} queued test cases not sent", dropped);
        }
        drop(result_tx);
        self.state.send_replace(PipelineState::Draining);
        debug!("all workers finished, draining results");

        let tally = match aggregator.await {
            Ok(tally) => tally,
            Err(e) => {
                error!("aggregator task ended abnormally: {}", e);
                Tally {
                    aggregate: AggregateResult::new(total),
                    false_positives: Vec::new(),
                    false_negatives: Vec::new(),
                }
            }
        };
        self.state.send_replace(PipelineState::Done);

        let aggregate = tally.aggregate;
        info!(
            "replay done: {}/{} processed, {} failed",
            aggregate.processed(),
            aggregate.total(),
            aggregate.failed()
        );

        Ok(RunOutcome {
            aggregate,
            false_positives: tally.false_positives,
            false_negatives: tally.false_negatives,
            started_at,
            finished_at: Utc::now(),
            cancelled: self.cancel.is_cancelled(),
        })
    }
}

async fn produce(
    source: TestCaseSource,
    jobs: mpsc::Sender<Job>,
    cancel: CancellationToken,
    limiter: Option<DirectLimiter>,
) {
    for case in source.cases() {
        if cancel.is_cancelled() {
            debug!("producer stopped before {}", case.identifier());
            break;
        }
        if let Some(limiter) = &limiter {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = limiter.until_ready() => {}
            }
        }
        let job = Job::new(case.clone());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = jobs.send(job) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

async fn work(
    id: usize,
    replayer: Replayer,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    results: mpsc::Sender<Job>,
    cancel: CancellationToken,
    progress: Option<Arc<dyn ProgressSink>>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            job = async { jobs.lock().await.recv().await } => job,
        };
        let Some(mut job) = next else {
            break;
        };
        if let Some(progress) = &progress {
            progress.advance(1);
        }

        replayer.execute(&mut job).await;
        if results.send(job).await.is_err() {
            error!("worker {}: result queue closed early", id);
            break;
        }
    }
    debug!("worker {} exiting", id);
}

async fn aggregate(
    mut results: mpsc::Receiver<Job>,
    total: u64,
    sink: Option<Arc<dyn ResultSink>>,
) -> Tally {
    let mut tally = Tally {
        aggregate: AggregateResult::new(total),
        false_positives: Vec::new(),
        false_negatives: Vec::new(),
    };

    while let Some(job) = results.recv().await {
        if let Some(reason) = job.result().failure() {
            warn!("{} failed: {}", job.identifier(), reason);
        }
        let bucket = tally.aggregate.record(&job);
        if let Some(bucket) = bucket {
            debug!("{} classified as {}", job.identifier(), bucket);
        }
        match bucket {
            Some(Bucket::FalsePositive) => tally.false_positives.push(CaseReport::from_job(&job)),
            Some(Bucket::FalseNegative) => tally.false_negatives.push(CaseReport::from_job(&job)),
            _ => {}
        }
        if let Some(sink) = &sink {
            sink.publish(ResultSnapshot {
                aggregate: tally.aggregate,
                job: job.record(),
            });
        }
    }
    tally
}
