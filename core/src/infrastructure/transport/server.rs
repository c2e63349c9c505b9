// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Unary Server
//!
//! Accepts connections on a Unix socket and dispatches each request frame
//! to the handler registered for its method path. Requests on one
//! connection are handled concurrently; a per-connection writer task
//! serializes the responses back onto the socket.
//!
//! A handler that panics answers its call with `Internal`. Handlers still
//! running when the server shuts down answer with `Unavailable`.

use std::collections::HashMap;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::address::SocketAddress;
use super::credentials::CredentialPolicy;
use super::frame::{method_path, RequestFrame, ResponseFrame, Status};
use crate::application::invoker::panic_message;
use crate::domain::plugin::AuthMetadata;

/// Responses queued per connection before handlers wait on the writer.
const RESPONSE_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone)]
pub struct UnaryRequest {
    pub path: String,
    pub metadata: AuthMetadata,
    pub payload: Bytes,
}

#[async_trait]
pub trait UnaryHandler: Send + Sync {
    async fn handle(&self, request: UnaryRequest) -> Result<Bytes, Status>;
}

/// Returns the request payload unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

#[async_trait]
impl UnaryHandler for EchoHandler {
    async fn handle(&self, request: UnaryRequest) -> Result<Bytes, Status> {
        Ok(request.payload)
    }
}

type Handlers = HashMap<String, Arc<dyn UnaryHandler>>;

#[derive(Default)]
pub struct Server {
    handlers: Handlers,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(
        mut self,
        service: &str,
        method: &str,
        handler: impl UnaryHandler + 'static,
    ) -> Self {
        self.handlers
            .insert(method_path(service, method), Arc::new(handler));
        self
    }

    /// Bind `address` and start accepting connections in the background.
    ///
    /// A stale socket file left at the path is replaced.
    pub async fn serve(
        self,
        address: &SocketAddress,
        policy: CredentialPolicy,
    ) -> io::Result<RunningServer> {
        let path = address.path();
        if path.exists() {
            debug!(path = %path.display(), "Removing stale socket");
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;

        let mut methods: Vec<_> = self.handlers.keys().cloned().collect();
        methods.sort();
        info!(address = %address, ?policy, ?methods, "Unary server listening");

        let shutdown = CancellationToken::new();
        let accept = tokio::spawn(accept_loop(
            listener,
            Arc::new(self.handlers),
            Arc::new(policy),
            shutdown.clone(),
        ));

        Ok(RunningServer {
            address: address.clone(),
            shutdown,
            accept: Some(accept),
        })
    }
}

/// Handle to a serving [`Server`]. Dropping it stops the server and removes
/// the socket file.
pub struct RunningServer {
    address: SocketAddress,
    shutdown: CancellationToken,
    accept: Option<JoinHandle<()>>,
}

impl RunningServer {
    pub fn address(&self) -> &SocketAddress {
        &self.address
    }

    /// Stop accepting, close open connections and wait for the accept loop.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(accept) = self.accept.take() {
            if let Err(e) = accept.await {
                warn!(error = %e, "Accept loop ended abnormally");
            }
        }
        remove_socket(&self.address);
        info!(address = %self.address, "Unary server stopped");
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        remove_socket(&self.address);
    }
}

fn remove_socket(address: &SocketAddress) {
    match std::fs::remove_file(address.path()) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(address = %address, error = %e, "Failed to remove socket file"),
    }
}

async fn accept_loop(
    listener: UnixListener,
    handlers: Arc<Handlers>,
    policy: Arc<CredentialPolicy>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, _)) => {
                match stream.peer_cred() {
                    Ok(cred) => debug!(pid = ?cred.pid(), uid = cred.uid(), "Accepted connection"),
                    Err(e) => debug!(error = %e, "Accepted connection without peer credentials"),
                }
                tokio::spawn(serve_connection(
                    stream,
                    handlers.clone(),
                    policy.clone(),
                    shutdown.child_token(),
                ));
            }
            Err(e) => warn!(error = %e, "Failed to accept connection"),
        }
    }
}

async fn serve_connection(
    stream: UnixStream,
    handlers: Arc<Handlers>,
    policy: Arc<CredentialPolicy>,
    shutdown: CancellationToken,
) {
    let (mut sink, mut frames) = Framed::new(stream, LengthDelimitedCodec::new()).split();
    let (responses, mut queued) = mpsc::channel::<ResponseFrame>(RESPONSE_QUEUE_DEPTH);

    let writer = tokio::spawn(async move {
        while let Some(response) = queued.recv().await {
            let bytes = match response.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(id = response.id, error = %e, "Failed to encode response");
                    continue;
                }
            };
            if let Err(e) = sink.send(bytes).await {
                debug!(error = %e, "Connection closed while writing response");
                break;
            }
        }
    });

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = frames.next() => next,
        };
        let bytes = match next {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                warn!(error = %e, "Failed to read request frame");
                break;
            }
            None => break,
        };
        let request = match RequestFrame::decode(&bytes) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Malformed request frame, closing connection");
                break;
            }
        };

        let handlers = handlers.clone();
        let policy = policy.clone();
        let responses = responses.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let response = respond(&handlers, &policy, request, &shutdown).await;
            // The writer only goes away once the peer is gone.
            let _ = responses.send(response).await;
        });
    }

    drop(responses);
    let _ = writer.await;
    debug!("Connection closed");
}

async fn respond(
    handlers: &Handlers,
    policy: &CredentialPolicy,
    request: RequestFrame,
    shutdown: &CancellationToken,
) -> ResponseFrame {
    let id = request.id;
    let handled = AssertUnwindSafe(dispatch(handlers, policy, request)).catch_unwind();
    let outcome = tokio::select! {
        handled = handled => handled.unwrap_or_else(|panic| {
            let message = panic_message(&*panic);
            warn!(id, %message, "Handler panicked");
            Err(Status::internal(format!("handler panicked: {}", message)))
        }),
        _ = shutdown.cancelled() => Err(Status::unavailable("server is shutting down")),
    };
    ResponseFrame { id, outcome }
}

async fn dispatch(
    handlers: &Handlers,
    policy: &CredentialPolicy,
    request: RequestFrame,
) -> Result<Vec<u8>, Status> {
    policy.check(&request.metadata)?;
    let handler = handlers
        .get(&request.path)
        .cloned()
        .ok_or_else(|| Status::unimplemented(format!("no handler for {}", request.path)))?;

    let response = handler
        .handle(UnaryRequest {
            path: request.path,
            metadata: request.metadata,
            payload: Bytes::from(request.payload),
        })
        .await?;
    Ok(response.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::channel::{
        CallError, CallOptions, Channel, ConnectOptions,
    };
    use crate::infrastructure::transport::credentials::ChannelCredentials;
    use crate::infrastructure::transport::frame::StatusCode;
    use tokio::sync::Notify;

    struct PanickingHandler;

    #[async_trait]
    impl UnaryHandler for PanickingHandler {
        async fn handle(&self, _request: UnaryRequest) -> Result<Bytes, Status> {
            panic!("echo backend crashed");
        }
    }

    /// Never answers; signals once a request is being handled.
    struct StalledHandler {
        entered: Arc<Notify>,
    }

    #[async_trait]
    impl UnaryHandler for StalledHandler {
        async fn handle(&self, _request: UnaryRequest) -> Result<Bytes, Status> {
            self.entered.notify_one();
            std::future::pending().await
        }
    }

    fn echo_request(id: u64, path: &str) -> RequestFrame {
        RequestFrame {
            id,
            path: path.to_string(),
            metadata: AuthMetadata::new(),
            payload: b"0000".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_shutdown_removes_socket_file() {
        let address = SocketAddress::temporary("shutdown").unwrap();
        let server = Server::new()
            .register_handler("test", "UnaryUnary", EchoHandler)
            .serve(&address, CredentialPolicy::Local)
            .await
            .unwrap();
        assert!(address.path().exists());

        server.shutdown().await;
        assert!(!address.path().exists());
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let address = SocketAddress::temporary("stale").unwrap();
        std::fs::write(address.path(), b"").unwrap();

        let server = Server::new()
            .serve(&address, CredentialPolicy::Local)
            .await
            .unwrap();
        drop(server);
        assert!(!address.path().exists());
    }

    #[tokio::test]
    async fn test_dispatch_checks_policy_before_routing() {
        let mut handlers: Handlers = HashMap::new();
        handlers.insert(method_path("test", "UnaryUnary"), Arc::new(EchoHandler));
        let request = |path: &str, metadata: AuthMetadata| RequestFrame {
            id: 1,
            path: path.to_string(),
            metadata,
            payload: b"0000".to_vec(),
        };
        let policy = CredentialPolicy::require_metadata("authorization");

        let status = dispatch(&handlers, &policy, request("/missing/Method", AuthMetadata::new()))
            .await
            .unwrap_err();
        assert_eq!(status.code, StatusCode::Unauthenticated);

        let metadata = AuthMetadata::new().with("authorization", "Bearer x");
        let status = dispatch(&handlers, &policy, request("/missing/Method", metadata.clone()))
            .await
            .unwrap_err();
        assert_eq!(status.code, StatusCode::Unimplemented);

        let echoed = dispatch(&handlers, &policy, request("/test/UnaryUnary", metadata))
            .await
            .unwrap();
        assert_eq!(echoed, b"0000".to_vec());
    }

    #[tokio::test]
    async fn test_panicking_handler_answers_internal() {
        let mut handlers: Handlers = HashMap::new();
        handlers.insert(method_path("test", "Crash"), Arc::new(PanickingHandler));

        let response = respond(
            &handlers,
            &CredentialPolicy::Local,
            echo_request(7, "/test/Crash"),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(response.id, 7);
        let status = response.outcome.unwrap_err();
        assert_eq!(status.code, StatusCode::Internal);
        assert!(status.message.contains("echo backend crashed"), "{}", status.message);
    }

    #[tokio::test]
    async fn test_shutdown_answers_in_flight_calls_unavailable() {
        let address = SocketAddress::temporary("in-flight").unwrap();
        let entered = Arc::new(Notify::new());
        let server = Server::new()
            .register_handler(
                "test",
                "Stall",
                StalledHandler {
                    entered: entered.clone(),
                },
            )
            .serve(&address, CredentialPolicy::Local)
            .await
            .unwrap();
        let channel =
            Channel::connect(&address, ChannelCredentials::local(), ConnectOptions::default())
                .await
                .unwrap();

        let call = tokio::spawn(async move {
            channel
                .unary_call("test", "Stall", &b"0000"[..], CallOptions::default())
                .await
        });
        entered.notified().await;
        server.shutdown().await;

        let error = tokio::time::timeout(std::time::Duration::from_secs(5), call)
            .await
            .expect("in-flight call was not answered")
            .unwrap()
            .unwrap_err();
        match error {
            CallError::Status(status) => assert_eq!(status.code, StatusCode::Unavailable),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
