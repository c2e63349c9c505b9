// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the callcred CLI

pub mod config;
pub mod load;
pub mod probe;

pub use self::config::ConfigCommand;
pub use self::load::LoadArgs;
pub use self::probe::ProbeArgs;

use std::sync::Arc;

use anyhow::{Context, Result};
use callcred_core::domain::config::ClientConfigManifest;
use callcred_core::infrastructure::plugins::AmbientEchoPlugin;
use callcred_core::infrastructure::transport::{
    CallCredentials, Channel, ChannelCredentials, ConnectOptions, CredentialPolicy, EchoHandler,
    RunningServer, Server, SocketAddress,
};
use callcred_core::{ContextKey, SchedulingMode};

pub const ECHO_SERVICE: &str = "test";
pub const ECHO_METHOD: &str = "UnaryUnary";

/// Ambient value the harness plugin must observe on every invocation.
pub static TEST_VAR: ContextKey<i64> = ContextKey::new("test_var");

const DEFAULT_METADATA_KEY: &str = "x-test-var";

/// An echo server plus a channel whose call credentials check `TEST_VAR`.
pub struct Harness {
    pub server: RunningServer,
    pub channel: Channel,
    pub plugin: Arc<AmbientEchoPlugin<i64>>,
}

impl Harness {
    pub async fn start(
        name: &str,
        manifest: &ClientConfigManifest,
        scheduling: SchedulingMode,
        expected: i64,
    ) -> Result<Self> {
        let transport = &manifest.spec.transport;
        let address = match &transport.socket_path {
            Some(path) => SocketAddress::at(path),
            None => SocketAddress::temporary(name).context("Failed to create socket directory")?,
        };

        // Emit under the key the server demands, if any, so the policy is satisfied
        // exactly when the plugin saw the value.
        let metadata_key = transport
            .require_metadata_key
            .clone()
            .unwrap_or_else(|| DEFAULT_METADATA_KEY.to_string());
        let policy = CredentialPolicy::from(transport.require_metadata_key.clone());

        let server = Server::new()
            .register_handler(ECHO_SERVICE, ECHO_METHOD, EchoHandler)
            .serve(&address, policy)
            .await
            .with_context(|| format!("Failed to serve on {}", address))?;

        let plugin = Arc::new(AmbientEchoPlugin::new(&TEST_VAR, metadata_key).expecting(expected));
        let credentials = ChannelCredentials::local()
            .with_call_credentials(CallCredentials::from_plugin(plugin.clone(), "ambient-echo"));
        let options = ConnectOptions::from_manifest(manifest).with_scheduling(scheduling);
        let channel = Channel::connect(&address, credentials, options)
            .await
            .with_context(|| format!("Failed to connect to {}", address))?;

        Ok(Self {
            server,
            channel,
            plugin,
        })
    }
}
