// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Concurrent load
//!
//! Every worker shares one plugin and one channel. The run fails if any
//! worker's plugin observed the wrong `test_var` or any echo came back wrong.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use callcred_core::application::load::{run_echo_load, LoadPlan};
use callcred_core::domain::config::ClientConfigManifest;
use callcred_core::{AmbientContext, SchedulingMode, Snapshot};

use super::{Harness, ECHO_METHOD, ECHO_SERVICE, TEST_VAR};

#[derive(Args)]
pub struct LoadArgs {
    /// Concurrent workers (default: configured)
    #[arg(long)]
    workers: Option<usize>,

    /// Calls issued by each worker (default: configured)
    #[arg(long)]
    calls: Option<usize>,

    /// Where the plugin runs: blocking-pool, task or thread
    #[arg(long)]
    scheduling: Option<SchedulingMode>,

    /// Value bound to `test_var` by the controller
    #[arg(long, default_value_t = 24601)]
    value: i64,

    /// Serve Prometheus metrics on this address while the run lasts
    #[arg(long, value_name = "ADDR")]
    metrics_addr: Option<SocketAddr>,
}

pub async fn execute(args: LoadArgs, mut manifest: ClientConfigManifest) -> Result<()> {
    if let Some(workers) = args.workers {
        manifest.spec.load.workers = workers;
    }
    if let Some(calls) = args.calls {
        manifest.spec.load.calls_per_worker = calls;
    }
    manifest.validate().context("Configuration validation failed")?;

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(%addr, "Serving metrics");
    }

    let scheduling = args.scheduling.unwrap_or(manifest.spec.invoker.scheduling);
    let plan = LoadPlan::from_manifest(&manifest, ECHO_SERVICE, ECHO_METHOD);
    let harness = Harness::start("load", &manifest, scheduling, args.value).await?;

    let outcome = AmbientContext::scope(Snapshot::empty(), async {
        TEST_VAR.set(args.value);
        run_echo_load(&harness.channel, &plan).await
    })
    .await;
    let invocations = harness.plugin.invocations();
    harness.server.shutdown().await;

    let report = match outcome {
        Ok(report) => report,
        Err(failure) => {
            for other in &failure.rest {
                eprintln!("{}", format!("  {}", other).red());
            }
            return Err(failure).context("Load run failed");
        }
    };

    let per_second = report.calls_completed as f64 / report.elapsed.as_secs_f64().max(f64::EPSILON);
    println!(
        "{}",
        format!(
            "✓ {} workers x {} calls completed in {:?} ({:.0} calls/s, {} scheduling)",
            report.workers, plan.calls_per_worker, report.elapsed, per_second, scheduling
        )
        .green()
    );
    println!("  Plugin invocations: {}", invocations);
    Ok(())
}
