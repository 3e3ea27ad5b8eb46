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

//! The transport/filter-stack seam (spec §1: "out of scope... invoked to
//! execute a batch").
//!
//! `Transport` is the entire contract the Call needs from whatever sits
//! below it: execute a bundle of ops, and cancel the stream. Everything
//! about framing, compression, and wire I/O happens on the other side of
//! this trait. A real binding crate would implement this against a native
//! gRPC-C-core call or an HTTP/2 stack; `ScriptedTransport` is a synchronous,
//! in-memory test double used by this crate's own tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{RpcError, RpcStatus};
use crate::metadata::MetadataBatch;

/// A callback invoked exactly once with the outcome of one asynchronous
/// sub-operation.
pub type OnReady<T> = Box<dyn FnOnce(Result<T, RpcError>) + Send>;

/// One transport-level batch: the union of whichever of the six op kinds
/// the caller included, plus the always-present completion callback.
pub struct TransportBatch {
    pub send_initial_metadata: Option<MetadataBatch>,
    pub send_message: Option<(Vec<u8>, u32)>,
    pub send_close_from_client: bool,
    pub send_status_from_server: Option<(RpcStatus, MetadataBatch)>,
    pub recv_initial_metadata: Option<OnReady<MetadataBatch>>,
    pub recv_message: Option<OnReady<Option<Vec<u8>>>>,
    pub recv_status_on_client: Option<OnReady<(RpcStatus, MetadataBatch)>>,
    pub recv_close_on_server: Option<OnReady<bool>>,
    pub on_complete: OnReady<()>,
}

impl TransportBatch {
    pub fn empty(on_complete: OnReady<()>) -> TransportBatch {
        TransportBatch {
            send_initial_metadata: None,
            send_message: None,
            send_close_from_client: false,
            send_status_from_server: None,
            recv_initial_metadata: None,
            recv_message: None,
            recv_status_on_client: None,
            recv_close_on_server: None,
            on_complete,
        }
    }
}

/// The contract the Call needs from the layer below it.
pub trait Transport: Send + Sync {
    fn execute_batch(&self, batch: TransportBatch);

    /// Issue a cancel-stream op; `on_complete` fires once it has been
    /// acknowledged by the transport.
    fn cancel(&self, error: RpcError, on_complete: OnReady<()>);
}

#[derive(Default)]
struct ScriptedInner {
    initial_metadata: Option<MetadataBatch>,
    messages: VecDeque<Option<Vec<u8>>>,
    status_on_client: Option<(RpcStatus, MetadataBatch)>,
    close_on_server: Option<bool>,

    sent_initial_metadata: Option<MetadataBatch>,
    sent_messages: Vec<Vec<u8>>,
    sent_close_from_client: bool,
    sent_status: Option<(RpcStatus, MetadataBatch)>,
    cancelled_with: Option<RpcError>,
}

/// A fully synchronous, in-process `Transport` stand-in: every sub-callback
/// fires before `execute_batch` returns, driven off a small script configured
/// up front. Good enough to drive every scenario in spec §8 without any real
/// networking or FFI.
#[derive(Default)]
pub struct ScriptedTransport {
    inner: Mutex<ScriptedInner>,
}

impl ScriptedTransport {
    pub fn new() -> ScriptedTransport {
        ScriptedTransport::default()
    }

    pub fn script_initial_metadata(&self, metadata: MetadataBatch) {
        self.inner.lock().unwrap().initial_metadata = Some(metadata);
    }

    /// Queue one message to be yielded by the next `RECV_MESSAGE`. `None`
    /// signals end of stream.
    pub fn script_message(&self, message: Option<Vec<u8>>) {
        self.inner.lock().unwrap().messages.push_back(message);
    }

    pub fn script_status_on_client(&self, status: RpcStatus, trailing: MetadataBatch) {
        self.inner.lock().unwrap().status_on_client = Some((status, trailing));
    }

    pub fn script_close_on_server(&self, cancelled: bool) {
        self.inner.lock().unwrap().close_on_server = Some(cancelled);
    }

    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().sent_messages.clone()
    }

    pub fn sent_initial_metadata(&self) -> Option<MetadataBatch> {
        self.inner.lock().unwrap().sent_initial_metadata.clone()
    }

    pub fn sent_status(&self) -> Option<(RpcStatus, MetadataBatch)> {
        self.inner.lock().unwrap().sent_status.clone()
    }

    pub fn was_cancelled(&self) -> bool {
        self.inner.lock().unwrap().cancelled_with.is_some()
    }
}

impl Transport for ScriptedTransport {
    fn execute_batch(&self, batch: TransportBatch) {
        let mut inner = self.inner.lock().unwrap();

        if let Some(md) = batch.send_initial_metadata {
            inner.sent_initial_metadata = Some(md);
        }
        if let Some((payload, _flags)) = batch.send_message {
            inner.sent_messages.push(payload);
        }
        if batch.send_close_from_client {
            inner.sent_close_from_client = true;
        }
        if let Some(status) = batch.send_status_from_server {
            inner.sent_status = Some(status);
        }

        if let Some(cb) = batch.recv_initial_metadata {
            let md = inner.initial_metadata.take().unwrap_or_default();
            cb(Ok(md));
        }
        if let Some(cb) = batch.recv_message {
            let msg = inner.messages.pop_front().unwrap_or(None);
            cb(Ok(msg));
        }
        if let Some(cb) = batch.recv_status_on_client {
            let (status, trailing) = inner
                .status_on_client
                .take()
                .unwrap_or_else(|| (RpcStatus::ok(), MetadataBatch::new()));
            cb(Ok((status, trailing)));
        }
        if let Some(cb) = batch.recv_close_on_server {
            let cancelled = inner.close_on_server.take().unwrap_or(false);
            cb(Ok(cancelled));
        }

        (batch.on_complete)(Ok(()));
    }

    fn cancel(&self, error: RpcError, on_complete: OnReady<()>) {
        self.inner.lock().unwrap().cancelled_with = Some(error);
        on_complete(Ok(()));
    }
}
