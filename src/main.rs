// File: main.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;
use std::fmt::Write;
use std::str::FromStr;
use std::sync::Arc;
use wafprobe::cli::Cli;
use wafprobe::pipeline::ReplayPipeline;
use wafprobe::probe::WafProbe;
use wafprobe::report::Reporter;
use wafprobe::testcases::TestCaseSource;

fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

fn init_logger(level: &str) {
    let level = LevelFilter::from_str(level).unwrap_or(LevelFilter::Warn);
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("Failed to initialize logger: {}", e);
    }
}

fn progress_bar(len: u64, quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
        )
        .context("Invalid progress bar template")?
        .with_key("eta", |state: &ProgressState, w: &mut dyn Write| {
            let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
        })
        .progress_chars("█▉▊▋▌▍▎▏  "),
    );
    Ok(pb)
}

async fn run(cli: Cli) -> Result<()> {
    let target = cli.parse_target()?;
    let mut config = cli.to_config(&target);
    config.validate()?;

    if cli.block_status.is_none() {
        let probe = WafProbe::new(&target, config.host_override(), config.timeout_ms() * 2)?;
        let outcome = probe.detect().await?;
        match outcome.block_status() {
            Some(code) => {
                print_info(&format!("WAF detected, block status code is {}", code));
                config.set_block_status_code(code);
            }
            None => bail!(
                "no WAF detected at {} (both probes returned {})",
                target.url(),
                outcome.normal_status
            ),
        }
    }

    let source = TestCaseSource::from_config(config.template_source(), config.filter())?;
    let pb = progress_bar(source.len() as u64, cli.quiet)?;
    let pipeline = ReplayPipeline::new(&config, source)?.with_progress(Arc::new(pb.clone()));

    pipeline
        .stop_on_signals()
        .context("failed to install signal handlers")?;

    let outcome = pipeline.run().await?;
    pb.finish();
    info!("run finished in {}ms", (outcome.finished_at - outcome.started_at).num_milliseconds());

    Reporter::print_summary(&outcome);

    let (fp_path, fn_path) = Reporter::write_reports(config.output_dir(), &outcome)?;
    print_success(&format!(
        "Reports written to {} and {}",
        fp_path.display(),
        fn_path.display()
    ));

    if let Some(path) = &cli.json {
        Reporter::write_json(path, target.url(), config.block_status_code(), &outcome)?;
        print_success(&format!("JSON summary written to {}", path.display()));
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logger(&cli.log_level);

    if let Err(e) = run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
