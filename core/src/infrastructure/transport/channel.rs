// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Client Channel
//!
//! One multiplexed connection shared by any number of concurrent callers.
//! Every [`Channel::unary_call`] obtains its metadata through exactly one
//! [`CredentialInvoker::invoke`] before its request frame is written, so the
//! plugin sees the ambient snapshot of the task that issued the call.
//!
//! A background reader routes response frames to callers by id. When the
//! connection ends, every call still waiting fails with
//! [`CallError::ConnectionClosed`].

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::UnixStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::address::SocketAddress;
use super::credentials::ChannelCredentials;
use super::frame::{method_path, RequestFrame, ResponseFrame, Status};
use crate::application::invoker::CredentialInvoker;
use crate::domain::config::{ClientConfigManifest, SchedulingMode};
use crate::domain::error::CredentialError;
use crate::domain::plugin::{AuthMetadata, CallContext};

type FrameSink = SplitSink<Framed<UnixStream, LengthDelimitedCodec>, Bytes>;
type FrameStream = SplitStream<Framed<UnixStream, LengthDelimitedCodec>>;
type ResponseSlot = oneshot::Sender<Result<Vec<u8>, Status>>;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("call credentials failed: {0}")]
    Credentials(#[from] CredentialError),

    #[error("call failed with status {0}")]
    Status(#[from] Status),

    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("connection closed before the response arrived")]
    ConnectionClosed,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Retry while the socket does not exist or refuses connections.
    pub wait_for_ready: bool,
    pub connect_timeout: Duration,
    pub retry_interval: Duration,
    /// Where call credential plugins run.
    pub scheduling: SchedulingMode,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            wait_for_ready: true,
            connect_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(20),
            scheduling: SchedulingMode::default(),
        }
    }
}

impl ConnectOptions {
    pub fn from_manifest(manifest: &ClientConfigManifest) -> Self {
        let transport = &manifest.spec.transport;
        Self {
            wait_for_ready: transport.wait_for_ready,
            connect_timeout: transport.connect_timeout(),
            retry_interval: transport.connect_retry(),
            scheduling: manifest.spec.invoker.scheduling,
        }
    }

    pub fn with_scheduling(mut self, scheduling: SchedulingMode) -> Self {
        self.scheduling = scheduling;
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Deadline for the whole call, credential acquisition included.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Cheaply cloneable handle; clones share the connection.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    address: SocketAddress,
    credentials: ChannelCredentials,
    invoker: CredentialInvoker,
    next_id: AtomicU64,
    sink: Mutex<FrameSink>,
    router: Arc<ResponseRouter>,
    reader: JoinHandle<()>,
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        self.router.closed.cancel();
        self.reader.abort();
    }
}

#[derive(Default)]
struct ResponseRouter {
    pending: DashMap<u64, ResponseSlot>,
    closed: CancellationToken,
}

impl ResponseRouter {
    fn route(&self, frame: ResponseFrame) {
        match self.pending.remove(&frame.id) {
            Some((_, slot)) => {
                // The caller may have given up (deadline) in the meantime.
                let _ = slot.send(frame.outcome);
            }
            None => debug!(id = frame.id, "Dropping response for abandoned call"),
        }
    }

    /// Fail everything in flight. Dropping the slots wakes their callers.
    fn close(&self) {
        self.closed.cancel();
        self.pending.clear();
    }
}

/// Removes the pending slot when the call finishes or is abandoned.
struct Registration<'a> {
    router: &'a ResponseRouter,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.router.pending.remove(&self.id);
    }
}

impl Channel {
    pub async fn connect(
        address: &SocketAddress,
        credentials: ChannelCredentials,
        options: ConnectOptions,
    ) -> Result<Self, CallError> {
        let stream = open(address, &options).await?;
        let (sink, frames) = Framed::new(stream, LengthDelimitedCodec::new()).split();

        let router = Arc::new(ResponseRouter::default());
        let reader = tokio::spawn(read_responses(frames, router.clone()));
        debug!(
            address = %address,
            scheduling = %options.scheduling,
            call_credentials = credentials.call_credentials().map(|c| c.name()),
            "Channel connected"
        );

        Ok(Self {
            inner: Arc::new(ChannelInner {
                address: address.clone(),
                credentials,
                invoker: CredentialInvoker::new(options.scheduling),
                next_id: AtomicU64::new(1),
                sink: Mutex::new(sink),
                router,
                reader,
            }),
        })
    }

    pub fn address(&self) -> &SocketAddress {
        &self.inner.address
    }

    /// Whether the connection has ended.
    pub fn is_closed(&self) -> bool {
        self.inner.router.closed.is_cancelled()
    }

    /// Issue one unary call and wait for its response.
    pub async fn unary_call(
        &self,
        service: &str,
        method: &str,
        payload: impl Into<Bytes>,
        options: CallOptions,
    ) -> Result<Bytes, CallError> {
        let call = self.call(service, method, payload.into());
        match options.timeout {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| CallError::DeadlineExceeded)?,
            None => call.await,
        }
    }

    async fn call(&self, service: &str, method: &str, payload: Bytes) -> Result<Bytes, CallError> {
        let inner = &self.inner;
        let metadata = match inner.credentials.call_credentials() {
            Some(call_credentials) => {
                let service_url = format!("{}/{}", inner.address.uri(), service);
                let context = CallContext::new(service_url, method);
                inner
                    .invoker
                    .invoke(Arc::clone(call_credentials.plugin()), context)
                    .await?
            }
            None => AuthMetadata::new(),
        };

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = RequestFrame {
            id,
            path: method_path(service, method),
            metadata,
            payload: payload.to_vec(),
        }
        .encode()?;

        let (slot, response) = oneshot::channel();
        inner.router.pending.insert(id, slot);
        let _registration = Registration {
            router: &inner.router,
            id,
        };
        // The reader cancels before clearing, so a slot inserted after the
        // clear is caught here.
        if inner.router.closed.is_cancelled() {
            return Err(CallError::ConnectionClosed);
        }

        inner.sink.lock().await.send(frame).await?;

        let outcome = response.await.map_err(|_| CallError::ConnectionClosed)?;
        Ok(Bytes::from(outcome?))
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("address", &self.inner.address)
            .field("credentials", &self.inner.credentials)
            .field("in_flight", &self.inner.router.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn open(address: &SocketAddress, options: &ConnectOptions) -> Result<UnixStream, CallError> {
    let deadline = Instant::now() + options.connect_timeout;
    loop {
        match UnixStream::connect(address.path()).await {
            Ok(stream) => return Ok(stream),
            Err(e) if options.wait_for_ready && is_not_ready(&e) && Instant::now() < deadline => {
                debug!(address = %address, error = %e, "Server not ready, retrying");
                tokio::time::sleep(options.retry_interval).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn is_not_ready(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
    )
}

async fn read_responses(mut frames: FrameStream, router: Arc<ResponseRouter>) {
    loop {
        let next = tokio::select! {
            _ = router.closed.cancelled() => break,
            next = frames.next() => next,
        };
        match next {
            Some(Ok(bytes)) => match ResponseFrame::decode(&bytes) {
                Ok(frame) => router.route(frame),
                Err(e) => {
                    warn!(error = %e, "Malformed response frame, closing channel");
                    break;
                }
            },
            Some(Err(e)) => {
                warn!(error = %e, "Failed to read response frame");
                break;
            }
            None => {
                debug!("Server closed the connection");
                break;
            }
        }
    }
    router.close();
}
