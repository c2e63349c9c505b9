// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Unix-Socket Unary Transport
//!
//! Minimal unary RPC over a Unix domain socket, enough to drive credential
//! plugins from a real call path.
//!
//! Each frame on the wire is a `u32` length prefix followed by a
//! `bincode`-encoded [`RequestFrame`] or [`ResponseFrame`]. Many calls share
//! one connection; responses are matched to callers by frame id.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`address`] | `SocketAddress` |
//! | [`frame`] | `RequestFrame`, `ResponseFrame`, `Status`, `StatusCode` |
//! | [`credentials`] | `CallCredentials`, `ChannelCredentials`, `CredentialPolicy` |
//! | [`server`] | `Server`, `RunningServer`, `UnaryHandler`, `EchoHandler` |
//! | [`channel`] | `Channel`, `ConnectOptions`, `CallOptions`, `CallError` |

pub mod address;
pub mod channel;
pub mod credentials;
pub mod frame;
pub mod server;

pub use address::SocketAddress;
pub use channel::{CallError, CallOptions, Channel, ConnectOptions};
pub use credentials::{CallCredentials, ChannelCredentials, CredentialPolicy};
pub use frame::{method_path, RequestFrame, ResponseFrame, Status, StatusCode};
pub use server::{EchoHandler, RunningServer, Server, UnaryHandler, UnaryRequest};
