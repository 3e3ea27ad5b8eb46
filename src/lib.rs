// Copyright 2026 The Callio Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

//! Callio: the per-RPC Call state machine that mediates between an
//! application issuing asynchronous batched operations and a layered
//! transport stack below it.
//!
//! The heart of the crate is [`call::Call`] -- everything else here is the
//! ambient plumbing a binding built around it needs: an [`env::Environment`]
//! of completion-queue poll threads, a [`channel::Channel`] that supplies
//! per-channel defaults and acts as the `Call` factory, and an
//! [`error::Error`] taxonomy tying the two together.

pub mod batch;
pub mod call;
pub mod cancel;
pub mod channel;
pub mod combiner;
pub mod completion;
pub mod compression;
pub mod context;
pub mod env;
pub mod error;
pub mod message;
pub mod metadata;
pub mod recv_order;
pub mod server;
pub mod status;
pub mod transport;
pub mod tree;

pub use call::{Call, CallArgs, Method, MethodType, PropagationMask};
pub use channel::{CallCredentials, CallOption, Channel, ChannelBuilder};
pub use env::{CompletionQueue, EnvBuilder, Environment};
pub use error::{CallError, Error, Result, RpcError, RpcStatus, RpcStatusCode};
pub use server::{Server, ServerBuilder};
