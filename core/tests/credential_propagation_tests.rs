// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use bytes::Bytes;
use callcred_core::application::load::{run_concurrently, run_echo_load, LoadPlan};
use callcred_core::infrastructure::plugins::{AmbientEchoPlugin, FailingPlugin, FnPlugin};
use callcred_core::infrastructure::transport::{
    CallCredentials, CallError, CallOptions, Channel, ChannelCredentials, ConnectOptions,
    CredentialPolicy, EchoHandler, RunningServer, Server, SocketAddress, StatusCode,
    UnaryHandler, UnaryRequest, Status,
};
use callcred_core::{
    AmbientContext, AuthMetadata, CallContext, ContextKey, CredentialError, CredentialPlugin,
    MetadataCallback, SchedulingMode, Snapshot,
};
use std::sync::Arc;
use std::time::Duration;

const SERVICE: &str = "test";
const METHOD: &str = "UnaryUnary";
const PAYLOAD: &[u8] = b"0000";

static TEST_VAR: ContextKey<i64> = ContextKey::new("test_var");
static TENANT: ContextKey<String> = ContextKey::new("tenant");

/// Answers with the value of one request metadata entry.
struct MetadataEchoHandler {
    key: &'static str,
}

#[async_trait]
impl UnaryHandler for MetadataEchoHandler {
    async fn handle(&self, request: UnaryRequest) -> Result<Bytes, Status> {
        request
            .metadata
            .get(self.key)
            .map(|value| Bytes::from(value.to_string()))
            .ok_or_else(|| Status::invalid_argument(format!("missing {}", self.key)))
    }
}

async fn start_server(name: &str, policy: CredentialPolicy) -> (SocketAddress, RunningServer) {
    let address = SocketAddress::temporary(name).unwrap();
    let server = Server::new()
        .register_handler(SERVICE, METHOD, EchoHandler)
        .register_handler(SERVICE, "Tenant", MetadataEchoHandler { key: "x-tenant" })
        .serve(&address, policy)
        .await
        .unwrap();
    (address, server)
}

async fn connect(
    address: &SocketAddress,
    plugin: Option<Arc<dyn CredentialPlugin>>,
    mode: SchedulingMode,
) -> Channel {
    let mut credentials = ChannelCredentials::local();
    if let Some(plugin) = plugin {
        let call_credentials = CallCredentials::from_plugin(plugin, "test-plugin");
        credentials = credentials.with_call_credentials(call_credentials);
    }
    Channel::connect(address, credentials, ConnectOptions::default().with_scheduling(mode))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_single_call_propagates_ambient_value() {
    let policy = CredentialPolicy::require_metadata("x-test-var");
    let (address, server) = start_server("single", policy).await;
    let plugin = Arc::new(AmbientEchoPlugin::new(&TEST_VAR, "x-test-var").expecting(24601));
    let shared: Arc<dyn CredentialPlugin> = plugin.clone();
    let channel = connect(&address, Some(shared), SchedulingMode::default()).await;

    let response = AmbientContext::scope(Snapshot::empty(), async {
        TEST_VAR.set(24601);
        channel
            .unary_call(SERVICE, METHOD, PAYLOAD, CallOptions::default())
            .await
    })
    .await
    .unwrap();

    assert_eq!(&response[..], PAYLOAD);
    assert_eq!(plugin.invocations(), 1);
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_scheduling_mode_over_the_wire() {
    let (address, _server) = start_server("modes", CredentialPolicy::Local).await;
    let plugin: Arc<dyn CredentialPlugin> =
        Arc::new(AmbientEchoPlugin::new(&TEST_VAR, "x-test-var").expecting(24601));

    for mode in [SchedulingMode::BlockingPool, SchedulingMode::Task, SchedulingMode::Thread] {
        let channel = connect(&address, Some(plugin.clone()), mode).await;
        let response = AmbientContext::scope(Snapshot::empty(), async {
            TEST_VAR.set(24601);
            channel.unary_call(SERVICE, METHOD, PAYLOAD, CallOptions::default()).await
        })
        .await;
        assert_eq!(&response.unwrap()[..], PAYLOAD, "mode {}", mode);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_load_with_shared_plugin_and_channel() {
    let (address, server) = start_server("load", CredentialPolicy::Local).await;
    let plugin = Arc::new(AmbientEchoPlugin::new(&TEST_VAR, "x-test-var").expecting(24601));
    let shared: Arc<dyn CredentialPlugin> = plugin.clone();
    let channel = connect(&address, Some(shared), SchedulingMode::BlockingPool).await;

    let plan = LoadPlan {
        workers: 32,
        calls_per_worker: 32,
        service: SERVICE.to_string(),
        method: METHOD.to_string(),
        payload: Bytes::from_static(PAYLOAD),
        call_options: CallOptions::with_timeout(Duration::from_secs(30)),
    };

    let report = AmbientContext::scope(Snapshot::empty(), async {
        TEST_VAR.set(24601);
        run_echo_load(&channel, &plan).await
    })
    .await
    .unwrap();

    assert_eq!(report.calls_completed, 32 * 32);
    assert_eq!(plugin.invocations(), 32 * 32);
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_do_not_see_each_others_values() {
    let (address, _server) = start_server("isolation", CredentialPolicy::Local).await;
    let plugin: Arc<dyn CredentialPlugin> = Arc::new(AmbientEchoPlugin::new(&TENANT, "x-tenant"));
    let channel = connect(&address, Some(plugin), SchedulingMode::Task).await;

    run_concurrently(16, |worker| {
        let channel = channel.clone();
        async move {
            let tenant = format!("tenant-{}", worker.id.0);
            TENANT.set(tenant.clone());
            for _ in 0..8 {
                let response = channel
                    .unary_call(SERVICE, "Tenant", PAYLOAD, CallOptions::default())
                    .await?;
                anyhow::ensure!(response == tenant.as_bytes(), "{} saw {:?}", worker.id, response);
            }
            Ok(())
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_plugin_failure_fails_the_call() {
    let (address, _server) = start_server("failure", CredentialPolicy::Local).await;
    let plugin: Arc<dyn CredentialPlugin> = Arc::new(FailingPlugin::new("token expired"));
    let channel = connect(&address, Some(plugin), SchedulingMode::default()).await;

    let error = channel
        .unary_call(SERVICE, METHOD, PAYLOAD, CallOptions::default())
        .await
        .unwrap_err();

    match error {
        CallError::Credentials(CredentialError::PluginFailure(message)) => {
            assert_eq!(message, "token expired")
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_plugin_failure_in_one_worker_surfaces_after_join() {
    let (address, _server) = start_server("worker-failure", CredentialPolicy::Local).await;
    let plugin: Arc<dyn CredentialPlugin> =
        Arc::new(AmbientEchoPlugin::new(&TENANT, "x-tenant").expecting("ok".to_string()));
    let channel = connect(&address, Some(plugin), SchedulingMode::default()).await;

    let failure = run_concurrently(4, |worker| {
        let channel = channel.clone();
        async move {
            let tenant = if worker.id.0 == 2 { "wrong" } else { "ok" };
            TENANT.set(tenant.to_string());
            channel.unary_call(SERVICE, METHOD, PAYLOAD, CallOptions::default()).await?;
            Ok(())
        }
    })
    .await
    .unwrap_err();

    assert_eq!(failure.total, 1);
    assert_eq!(failure.first.worker.0, 2);
    let error = failure.first.error.downcast_ref::<CallError>().unwrap();
    assert!(matches!(error, CallError::Credentials(CredentialError::PropagationViolation(_))));
}

#[tokio::test]
async fn test_server_rejects_calls_without_required_metadata() {
    let policy = CredentialPolicy::require_metadata("authorization");
    let (address, _server) = start_server("policy", policy).await;
    let channel = connect(&address, None, SchedulingMode::default()).await;

    let error = channel
        .unary_call(SERVICE, METHOD, PAYLOAD, CallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        CallError::Status(ref status) if status.code == StatusCode::Unauthenticated
    ));

    let error = channel
        .unary_call(SERVICE, "Missing", PAYLOAD, CallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(error, CallError::Status(_)));
}

#[tokio::test]
async fn test_slow_plugin_hits_the_call_deadline() {
    let (address, _server) = start_server("deadline", CredentialPolicy::Local).await;
    let slow = FnPlugin::new("slow", |_context: CallContext, callback: MetadataCallback| {
        std::thread::sleep(Duration::from_millis(300));
        callback.succeed(AuthMetadata::new());
        Ok(())
    });
    let slow: Arc<dyn CredentialPlugin> = Arc::new(slow);
    let channel = connect(&address, Some(slow), SchedulingMode::Thread).await;

    let error = channel
        .unary_call(SERVICE, METHOD, PAYLOAD, CallOptions::with_timeout(Duration::from_millis(30)))
        .await
        .unwrap_err();
    assert!(matches!(error, CallError::DeadlineExceeded));
}

#[tokio::test]
async fn test_calls_fail_once_the_server_is_gone() {
    let (address, server) = start_server("gone", CredentialPolicy::Local).await;
    let channel = connect(&address, None, SchedulingMode::default()).await;
    channel
        .unary_call(SERVICE, METHOD, PAYLOAD, CallOptions::default())
        .await
        .unwrap();

    server.shutdown().await;
    assert!(!address.path().exists());

    tokio::time::timeout(Duration::from_secs(5), async {
        while !channel.is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("channel did not observe the closed connection");

    let error = channel
        .unary_call(SERVICE, METHOD, PAYLOAD, CallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(error, CallError::ConnectionClosed));
}

#[tokio::test]
async fn test_wait_for_ready_connects_once_the_server_appears() {
    let address = SocketAddress::temporary("late").unwrap();
    let connecting = {
        let address = address.clone();
        tokio::spawn(async move {
            Channel::connect(&address, ChannelCredentials::local(), ConnectOptions::default()).await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let _server = Server::new()
        .register_handler(SERVICE, METHOD, EchoHandler)
        .serve(&address, CredentialPolicy::Local)
        .await
        .unwrap();

    let channel = connecting.await.unwrap().unwrap();
    let response = channel
        .unary_call(SERVICE, METHOD, PAYLOAD, CallOptions::default())
        .await
        .unwrap();
    assert_eq!(&response[..], PAYLOAD);
}
