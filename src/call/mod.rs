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

//! The Call state machine (spec §3, §4): the per-RPC object mediating
//! between application batches and the transport seam.
//!
//! Unlike the FFI-bound original this crate is adapted from, client- and
//! server-role calls share one type: every op the planner admits is already
//! gated by `is_client`, so there is nothing left for separate `client`/
//! `server` submodules to add.

use std::result::Result as StdResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use futures::sync::oneshot;
use futures::{Future, Poll};

use crate::batch::planner::{self, BatchState, Op};
use crate::batch::{BatchControl, CallBack, OpKind};
use crate::cancel::{self, CancelTarget};
use crate::combiner::CallCombiner;
use crate::completion::{self, BatchOutcome};
use crate::compression::{AcceptEncodingSet, CompressionAlgorithm, CompressionLevel};
use crate::context::ContextScratch;
use crate::error::{CallError, Error, RpcError, RpcStatus};
use crate::message::{self, MessageFraming, RawMessage};
use crate::metadata::{self, AcceptEncodingCache, MetadataBatch, StatusCodeCache};
use crate::recv_order::{RecvOrder, RecvOrderOutcome};
use crate::status::{StatusRegister, StatusSource};
use crate::transport::{OnReady, Transport, TransportBatch};
use crate::tree::{ChildLink, ParentSide};

/// The RPC's shape, carried on the method descriptor (spec §3: "method
/// descriptor" is part of what a call is created with).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MethodType {
    Unary,
    ClientStreaming,
    ServerStreaming,
    Duplex,
}

pub struct Method {
    pub ty: MethodType,
    pub name: &'static str,
}

impl Method {
    pub fn new(ty: MethodType, name: &'static str) -> Method {
        Method { ty, name }
    }
}

/// Negotiated/derived metadata state, mutated under one lock so the batch
/// planner's "already done" checks and the header filters' memoized caches
/// stay consistent with each other.
struct MetadataState {
    flags: BatchState,
    recv_compression: CompressionAlgorithm,
    accepted_by_peer: AcceptEncodingSet,
    accept_encoding_cache: AcceptEncodingCache,
    status_code_cache: StatusCodeCache,
}

impl MetadataState {
    fn new(is_client: bool) -> MetadataState {
        MetadataState {
            flags: BatchState {
                is_client,
                invoked: is_client,
                send_initial_metadata_sent: false,
                send_message_pending: false,
                send_final_sent: false,
                recv_initial_metadata_requested: false,
                recv_message_pending: false,
                recv_final_requested: false,
            },
            recv_compression: CompressionAlgorithm::Identity,
            accepted_by_peer: AcceptEncodingSet::identity_only(),
            accept_encoding_cache: AcceptEncodingCache::default(),
            status_code_cache: StatusCodeCache::default(),
        }
    }
}

/// Which of a parent call's attributes a child inherits (spec §6
/// "propagation mask"). Census tracing/stats bits are omitted: they gate
/// propagation of tracing/stats contexts, and "API-level tracing and
/// statistics counters" are out of scope (spec §1).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PropagationMask {
    pub deadline: bool,
    pub cancellation: bool,
}

impl PropagationMask {
    pub fn none() -> PropagationMask {
        PropagationMask::default()
    }

    pub fn all() -> PropagationMask {
        PropagationMask {
            deadline: true,
            cancellation: true,
        }
    }
}

/// Arguments to [`CallInner::create`] (spec §4.1 "create").
pub struct CallArgs {
    pub is_client: bool,
    pub method: &'static str,
    pub method_type: MethodType,
    pub host: Option<String>,
    pub peer: Option<String>,
    pub compression_level: CompressionLevel,
    pub transport: Arc<dyn Transport>,
    pub parent: Option<Call>,
    pub propagation: PropagationMask,
    /// User-supplied absolute deadline, if any. The call's effective
    /// deadline is the earlier of this and the parent's (spec §3
    /// `send_deadline`: "min(user-supplied, parent-inherited)").
    pub deadline: Option<Instant>,
}

/// The Call state machine. Cheap to clone (an `Arc` clone); dropping the
/// last handle tears down everything the call owns.
pub struct CallInner {
    is_client: bool,
    method: &'static str,
    method_type: MethodType,
    host: Option<String>,
    peer: Option<String>,
    compression_level: CompressionLevel,

    status: StatusRegister,
    combiner: CallCombiner,
    recv_order: RecvOrder,
    context: Mutex<ContextScratch>,
    metadata: Mutex<MetadataState>,
    transport: Arc<dyn Transport>,

    children: ParentSide<CallInner>,
    child_link: Mutex<Option<ChildLink<CallInner>>>,

    start_time: Instant,
    send_deadline: Option<Instant>,

    /// Set once the first `RECV_STATUS_ON_CLIENT`/`RECV_CLOSE_ON_SERVER`
    /// batch has resolved (spec §4.9: final status also gets computed here,
    /// not only at batch completion, so a late-arriving cancel doesn't
    /// change an already-observed terminal status).
    finished: AtomicBool,
}

/// Cheaply-cloned handle to a [`CallInner`].
#[derive(Clone)]
pub struct Call {
    inner: Arc<CallInner>,
}

impl CallBack for CallInner {
    fn combiner(&self) -> &CallCombiner {
        &self.combiner
    }
    fn status(&self) -> &StatusRegister {
        &self.status
    }
    fn is_client(&self) -> bool {
        self.is_client
    }
}

impl CancelTarget for CallInner {
    fn combiner(&self) -> &CallCombiner {
        &self.combiner
    }
    fn status(&self) -> &StatusRegister {
        &self.status
    }
    fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }
    fn children(&self) -> Vec<Arc<dyn CancelTarget>> {
        self.children
            .snapshot()
            .into_iter()
            .map(|c| c as Arc<dyn CancelTarget>)
            .collect()
    }
}

/// Resolves to the outcome of one `start_batch` call.
pub struct BatchFuture {
    rx: oneshot::Receiver<BatchOutcome>,
}

impl Future for BatchFuture {
    type Item = BatchOutcome;
    type Error = Error;

    fn poll(&mut self) -> Poll<BatchOutcome, Error> {
        self.rx.poll().map_err(|_| Error::QueueShutdown)
    }
}

impl Call {
    /// Create a new call (spec §4.1 "create"). If `args.parent` is set,
    /// attributes named in `args.propagation` are inherited: a shorter
    /// deadline is adopted, and cancellation attachment links this call into
    /// the parent's child ring so a later parent cancellation reaches it
    /// (spec §4.8: "a child may only be linked if it is a client call and
    /// the parent is a server call").
    pub fn create(args: CallArgs) -> Call {
        let start_time = Instant::now();
        let parent_deadline = args
            .parent
            .as_ref()
            .filter(|_| args.propagation.deadline)
            .and_then(|p| p.inner.send_deadline);
        let send_deadline = match (args.deadline, parent_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };

        let inner = Arc::new(CallInner {
            is_client: args.is_client,
            method: args.method,
            method_type: args.method_type,
            host: args.host,
            peer: args.peer,
            compression_level: args.compression_level,
            status: StatusRegister::new(),
            combiner: CallCombiner::new(),
            recv_order: RecvOrder::new(),
            context: Mutex::new(ContextScratch::new()),
            metadata: Mutex::new(MetadataState::new(args.is_client)),
            transport: args.transport,
            children: ParentSide::new(),
            child_link: Mutex::new(None),
            start_time,
            send_deadline,
            finished: AtomicBool::new(false),
        });

        if let Some(parent) = args.parent {
            if args.propagation.cancellation {
                debug_assert!(args.is_client && !parent.inner.is_client, "a child may only attach to a server-role parent");
                let link = parent.inner.children.attach(inner.clone());
                *inner.child_link.lock().unwrap() = Some(link);

                // Spec §4.7: "at child-creation time if the parent is already
                // final" -- the parent's own trailing-metadata-driven cancel
                // sweep will never see this child since it attached too late.
                if parent.inner.finished.load(Ordering::Acquire) {
                    let target: Arc<dyn CancelTarget> = inner.clone();
                    cancel::cancel_with_error(&target, RpcError::cancelled("parent call already finished"));
                }
            }
        }

        Call { inner }
    }

    /// Monotonic instant this call was created.
    pub fn start_time(&self) -> Instant {
        self.inner.start_time
    }

    /// Effective send deadline: min(user-supplied, parent-inherited).
    pub fn send_deadline(&self) -> Option<Instant> {
        self.inner.send_deadline
    }

    pub fn is_client(&self) -> bool {
        self.inner.is_client
    }

    pub fn method(&self) -> &'static str {
        self.inner.method
    }

    pub fn method_type(&self) -> MethodType {
        self.inner.method_type
    }

    pub fn get_peer(&self) -> Option<&str> {
        self.inner.peer.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.inner.host.as_deref()
    }

    /// Resolve the application's requested compression level against
    /// whatever the peer has declared it accepts so far (spec §4.3
    /// "compression-level processing").
    pub fn compression_algorithm(&self) -> CompressionAlgorithm {
        let state = self.inner.metadata.lock().unwrap();
        crate::compression::algorithm_for_level(self.inner.compression_level, state.accepted_by_peer)
    }

    pub fn context_set(&self, slot: u32, value: Box<dyn std::any::Any + Send>) {
        self.inner.context.lock().unwrap().set(slot, value);
    }

    pub fn context_get_downcast<T: 'static>(&self, slot: u32) -> Option<T>
    where
        T: Clone,
    {
        self.inner
            .context
            .lock()
            .unwrap()
            .get_downcast::<T>(slot)
            .cloned()
    }

    /// Cancel this call and every child attached to it right now (spec
    /// §4.7).
    pub fn cancel(&self, error: RpcError) {
        let target: Arc<dyn CancelTarget> = self.inner.clone();
        cancel::cancel_with_error(&target, error);
    }

    pub fn cancel_with_status(&self, status: RpcStatus) {
        let target: Arc<dyn CancelTarget> = self.inner.clone();
        cancel::cancel_with_status(&target, status);
    }

    fn batch_state(&self) -> BatchState {
        let state = self.inner.metadata.lock().unwrap();
        BatchState {
            is_client: state.flags.is_client,
            invoked: state.flags.invoked,
            send_initial_metadata_sent: state.flags.send_initial_metadata_sent,
            send_message_pending: state.flags.send_message_pending,
            send_final_sent: state.flags.send_final_sent,
            recv_initial_metadata_requested: state.flags.recv_initial_metadata_requested,
            recv_message_pending: state.flags.recv_message_pending,
            recv_final_requested: state.flags.recv_final_requested,
        }
    }

    fn mark_pending(&self, ops: &[Op]) {
        let mut state = self.inner.metadata.lock().unwrap();
        for op in ops {
            match op.kind() {
                OpKind::SendInitialMetadata => state.flags.send_initial_metadata_sent = true,
                OpKind::SendMessage => state.flags.send_message_pending = true,
                OpKind::SendFinal => state.flags.send_final_sent = true,
                OpKind::RecvInitialMetadata => state.flags.recv_initial_metadata_requested = true,
                OpKind::RecvMessage => state.flags.recv_message_pending = true,
                OpKind::RecvFinal => state.flags.recv_final_requested = true,
            }
        }
    }

    fn clear_send_message_pending(&self) {
        self.inner.metadata.lock().unwrap().flags.send_message_pending = false;
    }

    fn clear_recv_message_pending(&self) {
        self.inner.metadata.lock().unwrap().flags.recv_message_pending = false;
    }

    /// Submit a batch of operations (spec §4.1 `start_batch`, §4.3 the
    /// planner that validates it). Returns synchronously with a
    /// [`CallError`] if the batch is malformed or illegal for this call's
    /// current state; otherwise returns a future that resolves once every
    /// op in the batch has completed.
    pub fn start_batch(&self, ops: Vec<Op>) -> result::Result<BatchFuture, CallError> {
        let state = self.batch_state();
        let plan = planner::validate(&ops, &state).map_err(|err| {
            log::warn!("rejecting batch of {} ops: {}", ops.len(), err);
            err
        })?;

        let (tx, rx) = oneshot::channel();

        if plan.steps == 0 {
            let _ = tx.send(BatchOutcome {
                ok: true,
                status: RpcStatus::ok(),
            });
            return Ok(BatchFuture { rx });
        }

        self.mark_pending(&ops);

        let wants_final_status = ops
            .iter()
            .any(|op| matches!(op, Op::RecvStatusOnClient | Op::RecvCloseOnServer));
        let recv_steps = ops
            .iter()
            .filter(|op| {
                matches!(
                    op.kind(),
                    OpKind::RecvInitialMetadata | OpKind::RecvMessage | OpKind::RecvFinal
                )
            })
            .count();

        let call_back: Weak<dyn CallBack> = Arc::downgrade(&self.inner);
        let inner_for_finish = self.inner.clone();
        let finished_flag = self.inner.clone();
        let bctl = Arc::new(BatchControl::new(
            call_back,
            plan.ops_mask,
            recv_steps + 1,
            Box::new(move |errors| {
                let outcome = completion::finish_batch(
                    &inner_for_finish.status,
                    inner_for_finish.is_client,
                    errors,
                    wants_final_status,
                );
                if wants_final_status {
                    finished_flag.finished.store(true, Ordering::Release);
                    // Spec scenario §8.4: once a server call's trailing
                    // metadata/close has been observed, whatever children are
                    // still attached at that moment get cancelled -- the same
                    // recursive walk a direct `cancel()` would do.
                    if !finished_flag.is_client {
                        for child in finished_flag.children() {
                            cancel::cancel_with_error(&child, RpcError::cancelled("parent call finished"));
                        }
                    }
                }
                let _ = tx.send(outcome);
            }),
        ));

        let transport_batch = self.build_transport_batch(ops, bctl.clone());
        let transport = self.inner.transport.clone();
        let call_clone = self.clone();
        self.inner.combiner.start(move || {
            let _ = &call_clone;
            transport.execute_batch(transport_batch);
        });

        Ok(BatchFuture { rx })
    }

    fn build_transport_batch(&self, ops: Vec<Op>, bctl: Arc<BatchControl>) -> TransportBatch {
        let mut batch = TransportBatch::empty(Self::on_transport_complete(bctl.clone()));

        for op in ops {
            match op {
                Op::SendInitialMetadata(mut md) => {
                    if !self.inner.is_client {
                        metadata::filter_send_initial_metadata(&mut md, self.compression_algorithm());
                    }
                    batch.send_initial_metadata = Some(md);
                }
                Op::SendMessage(payload) => batch.send_message = Some((payload, 0)),
                Op::SendCloseFromClient => batch.send_close_from_client = true,
                Op::SendStatusFromServer(status, md) => {
                    batch.send_status_from_server = Some((status, md))
                }
                Op::RecvInitialMetadata => {
                    batch.recv_initial_metadata = Some(self.on_recv_initial_metadata(bctl.clone()))
                }
                Op::RecvMessage => batch.recv_message = Some(self.on_recv_message(bctl.clone())),
                Op::RecvStatusOnClient => {
                    batch.recv_status_on_client = Some(self.on_recv_status_on_client(bctl.clone()))
                }
                Op::RecvCloseOnServer => {
                    batch.recv_close_on_server = Some(self.on_recv_close_on_server(bctl.clone()))
                }
            }
        }

        batch
    }

    fn on_transport_complete(bctl: Arc<BatchControl>) -> OnReady<()> {
        Box::new(move |result: std::result::Result<(), RpcError>| {
            if let Err(e) = result {
                bctl.record_error(e);
            }
            bctl.step_done();
        })
    }

    fn on_recv_initial_metadata(&self, bctl: Arc<BatchControl>) -> OnReady<MetadataBatch> {
        let call = self.clone();
        Box::new(move |result| {
            match result {
                Ok(mut md) => {
                    let mut state = call.inner.metadata.lock().unwrap();
                    let filtered =
                        metadata::filter_recv_initial_metadata(&mut md, &mut state.accept_encoding_cache);
                    state.recv_compression = filtered.message_compression;
                    state.accepted_by_peer = filtered.accepted_by_peer;
                    drop(state);

                    if let RecvOrderOutcome::ResumeStashed(stashed) = call.inner.recv_order.initial_metadata_ready()
                    {
                        call.resume_stashed_message(&stashed);
                    }
                }
                Err(e) => bctl.record_error(e),
            }
            bctl.step_done();
        })
    }

    fn on_recv_message(&self, bctl: Arc<BatchControl>) -> OnReady<Option<Vec<u8>>> {
        let call = self.clone();
        Box::new(move |result| {
            call.clear_recv_message_pending();
            match result {
                Ok(Some(bytes)) => {
                    let raw = RawMessage {
                        bytes,
                        framing: MessageFraming::Literal,
                    };
                    match call.inner.recv_order.message_ready(&bctl) {
                        RecvOrderOutcome::Deferred => {
                            bctl.stash_message(raw);
                            return;
                        }
                        RecvOrderOutcome::ProcessNow => call.finish_message(&bctl, raw),
                        RecvOrderOutcome::ResumeStashed(_) => unreachable!(
                            "message_ready never returns ResumeStashed; only initial_metadata_ready does"
                        ),
                    }
                }
                Ok(None) => {}
                Err(e) => bctl.record_error(e),
            }
            bctl.step_done();
        })
    }

    fn finish_message(&self, bctl: &Arc<BatchControl>, raw: RawMessage) {
        let negotiated = self.inner.metadata.lock().unwrap().recv_compression;
        if let message::AssembledMessage::Rejected = message::assemble(raw, negotiated) {
            bctl.record_error(RpcError::new(
                crate::error::RpcStatusCode::Internal,
                "compressed message received on an identity-negotiated stream",
            ));
        }
    }

    fn resume_stashed_message(&self, bctl: &Arc<BatchControl>) {
        if let Some(raw) = bctl.take_message() {
            self.finish_message(bctl, raw);
        }
        bctl.step_done();
    }

    fn on_recv_status_on_client(&self, bctl: Arc<BatchControl>) -> OnReady<(RpcStatus, MetadataBatch)> {
        let call = self.clone();
        Box::new(move |result| {
            match result {
                Ok((status, mut trailing)) => {
                    let mut state = call.inner.metadata.lock().unwrap();
                    let filtered =
                        metadata::filter_recv_trailing_metadata(&mut trailing, &mut state.status_code_cache);
                    drop(state);
                    if let Some(err) = filtered.wire_error {
                        call.inner.status.set(StatusSource::Wire, err);
                    } else if let Some(err) = status.into_error() {
                        call.inner.status.set(StatusSource::ServerStatus, err);
                    } else {
                        call.inner
                            .status
                            .set(StatusSource::ServerStatus, RpcError::new(crate::error::RpcStatusCode::Ok, ""));
                    }
                }
                Err(e) => bctl.record_error(e),
            }
            bctl.step_done();
        })
    }

    fn on_recv_close_on_server(&self, bctl: Arc<BatchControl>) -> OnReady<bool> {
        let call = self.clone();
        Box::new(move |result| {
            match result {
                Ok(true) => {
                    call.inner
                        .status
                        .set(StatusSource::Wire, RpcError::cancelled("client closed the stream"));
                }
                Ok(false) => {}
                Err(e) => bctl.record_error(e),
            }
            bctl.step_done();
        })
    }
}

use std::result;
