// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Single-call probe
//!
//! Binds `test_var`, issues one echo call and checks both that the plugin
//! observed the value and that the payload came back unchanged.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Args;
use colored::Colorize;
use std::time::Instant;

use callcred_core::domain::config::ClientConfigManifest;
use callcred_core::infrastructure::transport::CallOptions;
use callcred_core::{AmbientContext, SchedulingMode, Snapshot};

use super::{Harness, ECHO_METHOD, ECHO_SERVICE, TEST_VAR};

#[derive(Args)]
pub struct ProbeArgs {
    /// Value bound to `test_var` before the call
    #[arg(long, default_value_t = 24601)]
    value: i64,

    /// Request payload (default: configured load payload)
    #[arg(long)]
    payload: Option<String>,

    /// Where the plugin runs: blocking-pool, task or thread
    #[arg(long)]
    scheduling: Option<SchedulingMode>,
}

pub async fn execute(args: ProbeArgs, manifest: ClientConfigManifest) -> Result<()> {
    let scheduling = args.scheduling.unwrap_or(manifest.spec.invoker.scheduling);
    let payload = Bytes::from(
        args.payload
            .unwrap_or_else(|| manifest.spec.load.payload.clone())
            .into_bytes(),
    );
    let options = CallOptions {
        timeout: manifest.spec.transport.call_timeout(),
    };

    let harness = Harness::start("probe", &manifest, scheduling, args.value).await?;
    let started = Instant::now();
    let response = AmbientContext::scope(Snapshot::empty(), async {
        TEST_VAR.set(args.value);
        harness
            .channel
            .unary_call(ECHO_SERVICE, ECHO_METHOD, payload.clone(), options)
            .await
    })
    .await;
    let elapsed = started.elapsed();
    harness.server.shutdown().await;

    let response = response.context("Probe call failed")?;
    anyhow::ensure!(
        response == payload,
        "Server echoed {:?}, expected {:?}",
        response,
        payload
    );

    println!(
        "{}",
        format!(
            "✓ Plugin observed test_var={} ({} scheduling), payload echoed in {:?}",
            args.value, scheduling, elapsed
        )
        .green()
    );
    Ok(())
}
