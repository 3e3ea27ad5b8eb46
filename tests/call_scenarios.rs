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

//! End-to-end scenarios driven entirely against `ScriptedTransport`: no
//! sockets, no process spawning, everything resolves on the calling thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::Future;

use callio::batch::planner::Op;
use callio::compression::CompressionLevel;
use callio::error::{RpcError, RpcStatus, RpcStatusCode};
use callio::metadata::{MetadataBatch, MetadataEntry, GRPC_INTERNAL_ENCODING_REQUEST};
use callio::transport::ScriptedTransport;
use callio::{CallArgs, CallOption, Channel, ChannelBuilder, Environment, Method, MethodType, PropagationMask};

fn unary_method() -> Method {
    Method::new(MethodType::Unary, "/test.Echo/Say")
}

fn test_channel(transport: Arc<dyn callio::transport::Transport>) -> Channel {
    let env = Arc::new(Environment::new(1));
    ChannelBuilder::new(env).connect("test-peer:0", transport)
}

#[test]
fn happy_client_unary() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script_initial_metadata(MetadataBatch::new());
    transport.script_message(Some(b"ok".to_vec()));
    transport.script_status_on_client(RpcStatus::ok(), MetadataBatch::new());

    let channel = test_channel(transport.clone());
    let call = channel.create_call(&unary_method(), &CallOption::new());

    let outcome = call
        .start_batch(vec![
            Op::SendInitialMetadata(MetadataBatch::new()),
            Op::SendMessage(b"hi".to_vec()),
            Op::SendCloseFromClient,
            Op::RecvInitialMetadata,
            Op::RecvMessage,
            Op::RecvStatusOnClient,
        ])
        .expect("batch accepted")
        .wait()
        .expect("batch resolves");

    assert!(outcome.ok);
    assert_eq!(outcome.status.code, RpcStatusCode::Ok);
    assert_eq!(transport.sent_messages(), vec![b"hi".to_vec()]);
}

#[test]
fn wire_error_surfaces_as_final_status() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script_initial_metadata(MetadataBatch::new());
    transport.script_message(Some(b"ignored".to_vec()));
    let trailing = MetadataBatch::from_entries(vec![
        MetadataEntry::new("grpc-status", "5"),
        MetadataEntry::new("grpc-message", "not found"),
    ]);
    transport.script_status_on_client(RpcStatus::ok(), trailing);

    let channel = test_channel(transport);
    let call = channel.create_call(&unary_method(), &CallOption::new());

    let outcome = call
        .start_batch(vec![
            Op::SendInitialMetadata(MetadataBatch::new()),
            Op::SendCloseFromClient,
            Op::RecvInitialMetadata,
            Op::RecvMessage,
            Op::RecvStatusOnClient,
        ])
        .expect("batch accepted")
        .wait()
        .expect("batch resolves");

    assert!(!outcome.ok);
    assert_eq!(outcome.status.code, RpcStatusCode::NotFound);
    assert_eq!(outcome.status.details.as_deref(), Some("not found"));
}

#[test]
fn user_cancel_mid_flight_wins_over_a_later_wire_status() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script_initial_metadata(MetadataBatch::new());

    let channel = test_channel(transport.clone());
    let call = channel.create_call(&unary_method(), &CallOption::new());

    call.start_batch(vec![Op::SendInitialMetadata(MetadataBatch::new())])
        .expect("batch accepted")
        .wait()
        .expect("batch resolves");

    call.cancel_with_status(RpcStatus::new(RpcStatusCode::DeadlineExceeded, Some("deadline".to_owned())));

    // A wire status scripted after the cancel must not override it.
    transport.script_status_on_client(
        RpcStatus::new(RpcStatusCode::NotFound, Some("too late".to_owned())),
        MetadataBatch::new(),
    );

    let outcome = call
        .start_batch(vec![Op::RecvStatusOnClient])
        .expect("batch accepted")
        .wait()
        .expect("batch resolves");

    assert_eq!(outcome.status.code, RpcStatusCode::DeadlineExceeded);
    assert_eq!(outcome.status.details.as_deref(), Some("deadline"));
    assert!(transport.was_cancelled());
}

#[test]
fn parent_cancellation_propagates_to_a_child_and_its_deadline() {
    let env = Arc::new(Environment::new(1));
    let server_transport = Arc::new(ScriptedTransport::new());
    let parent_deadline = Instant::now() + Duration::from_secs(10);

    let parent = CallArgs {
        is_client: false,
        method: unary_method().name,
        method_type: MethodType::Unary,
        host: None,
        peer: Some("client-peer:0".to_owned()),
        compression_level: CompressionLevel::None,
        transport: server_transport.clone(),
        parent: None,
        propagation: PropagationMask::none(),
        deadline: Some(parent_deadline),
    };
    let parent_call = callio::Call::create(parent);

    let child_transport = Arc::new(ScriptedTransport::new());
    let channel = ChannelBuilder::new(env).connect("downstream:0", child_transport.clone());
    let child = channel.create_child_call(
        &unary_method(),
        &CallOption::new().timeout(Duration::from_secs(60)),
        &parent_call,
        PropagationMask::all(),
    );

    assert_eq!(child.send_deadline(), Some(parent_deadline));
    assert!(!child_transport.was_cancelled());

    // The parent's close-on-server batch resolves: the child, still
    // attached, is cancelled as a side effect of the parent finishing.
    server_transport.script_close_on_server(false);
    parent_call
        .start_batch(vec![Op::RecvCloseOnServer])
        .expect("batch accepted")
        .wait()
        .expect("batch resolves");

    assert!(child_transport.was_cancelled());
}

#[test]
fn server_resolves_compression_level_and_requests_it_on_the_wire() {
    let env = Arc::new(Environment::new(1));
    let transport = Arc::new(ScriptedTransport::new());
    let accept_encoding = MetadataBatch::from_entries(vec![MetadataEntry::new("grpc-accept-encoding", "gzip,identity")]);
    transport.script_initial_metadata(accept_encoding);

    let method = unary_method();
    let server = callio::ServerBuilder::new(env)
        .bind("0.0.0.0", 0)
        .register_method(&method)
        .build()
        .unwrap();
    let call = server
        .accept_call(&method, None, CompressionLevel::High, None, transport.clone())
        .unwrap();

    call.start_batch(vec![Op::RecvInitialMetadata])
        .expect("batch accepted")
        .wait()
        .expect("batch resolves");

    assert_eq!(call.compression_algorithm(), callio::compression::CompressionAlgorithm::Gzip);

    call.start_batch(vec![Op::SendInitialMetadata(MetadataBatch::new())])
        .expect("batch accepted")
        .wait()
        .expect("batch resolves");

    let sent = transport.sent_initial_metadata().expect("initial metadata sent");
    let header = sent.iter().find(|e| e.key == GRPC_INTERNAL_ENCODING_REQUEST).expect("encoding header present");
    assert_eq!(header.value_str(), Some("gzip"));
}

/// `ScriptedTransport` always resolves `recv_initial_metadata` before
/// `recv_message`, so exercising the opposite race (spec scenario 6) needs a
/// transport that deliberately fires them in the other order.
struct ReversedRecvOrderTransport {
    message: Option<Vec<u8>>,
    initial_metadata: MetadataBatch,
}

impl callio::transport::Transport for ReversedRecvOrderTransport {
    fn execute_batch(&self, batch: callio::transport::TransportBatch) {
        if let Some(cb) = batch.recv_message {
            cb(Ok(self.message.clone()));
        }
        if let Some(cb) = batch.recv_initial_metadata {
            cb(Ok(self.initial_metadata.clone()));
        }
        (batch.on_complete)(Ok(()));
    }

    fn cancel(&self, _error: RpcError, on_complete: callio::transport::OnReady<()>) {
        on_complete(Ok(()));
    }
}

#[test]
fn message_before_initial_metadata_is_processed_once_both_are_known() {
    let transport = Arc::new(ReversedRecvOrderTransport {
        message: Some(b"raced".to_vec()),
        initial_metadata: MetadataBatch::new(),
    });

    let channel = test_channel(transport);
    let call = channel.create_call(&unary_method(), &CallOption::new());

    let outcome = call
        .start_batch(vec![Op::RecvMessage, Op::RecvInitialMetadata])
        .expect("batch accepted")
        .wait()
        .expect("batch resolves");

    assert!(outcome.ok);
}
