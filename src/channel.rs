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

//! Channel configuration and the `Call` factory (SPEC_FULL §10.2, §10.4).
//!
//! A `ChannelBuilder` collects the per-channel defaults a binding would
//! otherwise pass down as native channel args; `Channel::create_call` is
//! where those defaults meet a per-call `CallOption` override and become a
//! [`CallArgs`] for [`Call::create`]. The actual connection -- what the
//! original builds with `grpc_insecure_channel_create` -- is out of scope
//! here (spec §1), so a `Channel` is handed its [`Transport`] rather than
//! dialing one itself.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::call::{Call, CallArgs, Method, PropagationMask};
use crate::compression::CompressionLevel;
use crate::env::{CompletionQueue, Environment};
use crate::transport::Transport;

fn format_user_agent_string(agent: &str) -> String {
    let version = env!("CARGO_PKG_VERSION");
    let trimmed = agent.trim();
    if trimmed.is_empty() {
        format!("callio/{}", version)
    } else {
        format!("{} callio/{}", trimmed, version)
    }
}

fn dur_to_ms(dur: Duration) -> usize {
    let millis = dur.as_secs() * 1000 + u64::from(dur.subsec_millis());
    millis.min(usize::MAX as u64) as usize
}

#[derive(Clone, Debug)]
enum ChannelOpt {
    Integer(usize),
    String(String),
}

const OPT_DEFAULT_AUTHORITY: &str = "grpc.default_authority";
const OPT_MAX_CONCURRENT_STREAMS: &str = "grpc.max_concurrent_streams";
const OPT_MAX_RECEIVE_MESSAGE_LENGTH: &str = "grpc.max_receive_message_length";
const OPT_MAX_SEND_MESSAGE_LENGTH: &str = "grpc.max_send_message_length";
const OPT_MAX_RECONNECT_BACKOFF_MS: &str = "grpc.max_reconnect_backoff_ms";
const OPT_INITIAL_RECONNECT_BACKOFF_MS: &str = "grpc.initial_reconnect_backoff_ms";
const OPT_SO_REUSE_PORT: &str = "grpc.so_reuseport";
const OPT_SSL_TARGET_NAME_OVERRIDE: &str = "grpc.ssl_target_name_override";
const PRIMARY_USER_AGENT_STRING: &str = "grpc.primary_user_agent";

/// Per-channel configuration, mirroring `grpcio::ChannelBuilder`'s surface
/// without the native channel-args translation underneath it.
pub struct ChannelBuilder {
    env: Arc<Environment>,
    options: HashMap<&'static str, ChannelOpt>,
    default_compression_level: CompressionLevel,
}

impl ChannelBuilder {
    pub fn new(env: Arc<Environment>) -> ChannelBuilder {
        ChannelBuilder {
            env,
            options: HashMap::new(),
            default_compression_level: CompressionLevel::None,
        }
    }

    /// Default authority to pass if none specified on call construction.
    pub fn default_authority(mut self, authority: impl Into<String>) -> ChannelBuilder {
        self.options
            .insert(OPT_DEFAULT_AUTHORITY, ChannelOpt::String(authority.into()));
        self
    }

    pub fn max_concurrent_stream(mut self, num: usize) -> ChannelBuilder {
        self.options
            .insert(OPT_MAX_CONCURRENT_STREAMS, ChannelOpt::Integer(num));
        self
    }

    /// Maximum message length the channel can receive. `usize::MAX` means unlimited.
    pub fn max_receive_message_len(mut self, len: usize) -> ChannelBuilder {
        self.options
            .insert(OPT_MAX_RECEIVE_MESSAGE_LENGTH, ChannelOpt::Integer(len));
        self
    }

    pub fn max_send_message_len(mut self, len: usize) -> ChannelBuilder {
        self.options
            .insert(OPT_MAX_SEND_MESSAGE_LENGTH, ChannelOpt::Integer(len));
        self
    }

    pub fn max_reconnect_backoff(mut self, backoff: Duration) -> ChannelBuilder {
        self.options
            .insert(OPT_MAX_RECONNECT_BACKOFF_MS, ChannelOpt::Integer(dur_to_ms(backoff)));
        self
    }

    pub fn initial_reconnect_backoff(mut self, backoff: Duration) -> ChannelBuilder {
        self.options.insert(
            OPT_INITIAL_RECONNECT_BACKOFF_MS,
            ChannelOpt::Integer(dur_to_ms(backoff)),
        );
        self
    }

    pub fn primary_user_agent(mut self, agent: &str) -> ChannelBuilder {
        self.options.insert(
            PRIMARY_USER_AGENT_STRING,
            ChannelOpt::String(format_user_agent_string(agent)),
        );
        self
    }

    /// Allow SO_REUSEPORT if available (default true).
    pub fn reuse_port(mut self, reuse: bool) -> ChannelBuilder {
        self.options
            .insert(OPT_SO_REUSE_PORT, ChannelOpt::Integer(if reuse { 1 } else { 0 }));
        self
    }

    /// Overrides the name used for TLS host-name checking. Testing only.
    pub fn override_ssl_target(mut self, target: impl Into<String>) -> ChannelBuilder {
        self.options
            .insert(OPT_SSL_TARGET_NAME_OVERRIDE, ChannelOpt::String(target.into()));
        self
    }

    /// Default compression level used for calls that don't set their own via
    /// `CallOption` (spec §4.3's compression-level resolution needs a
    /// starting point somewhere; per-channel is where grpcio puts it).
    pub fn default_compression_level(mut self, level: CompressionLevel) -> ChannelBuilder {
        self.default_compression_level = level;
        self
    }

    /// Finish building against `transport`: the in-process or wire
    /// connection itself is out of scope, so the caller supplies whatever
    /// already executes batches for `target`.
    pub fn connect(mut self, target: &str, transport: Arc<dyn Transport>) -> Channel {
        if let Entry::Vacant(e) = self.options.entry(PRIMARY_USER_AGENT_STRING) {
            e.insert(ChannelOpt::String(format_user_agent_string("")));
        }
        let default_authority = self.options.get(OPT_DEFAULT_AUTHORITY).and_then(|opt| match opt {
            ChannelOpt::String(s) => Some(s.clone()),
            ChannelOpt::Integer(_) => None,
        });

        Channel {
            inner: Arc::new(ChannelInner {
                target: target.to_owned(),
                default_authority,
                default_compression_level: self.default_compression_level,
                options: self.options,
                transport,
            }),
            cq: self.env.pick_cq(),
            env: self.env,
        }
    }
}

struct ChannelInner {
    target: String,
    default_authority: Option<String>,
    default_compression_level: CompressionLevel,
    options: HashMap<&'static str, ChannelOpt>,
    transport: Arc<dyn Transport>,
}

/// Placeholder for a per-call credentials override. Real credential
/// material (certificates, call tokens) is transport-layer territory and
/// out of scope here; this only reserves the slot `CallOption` would plumb
/// through to it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallCredentials(pub String);

/// Per-call overrides of the channel's defaults (spec §10.4: timeout, write
/// flags, compression, credentials).
#[derive(Clone, Default)]
pub struct CallOption {
    timeout: Option<Duration>,
    write_flags: u32,
    call_compression_level: Option<CompressionLevel>,
    credentials: Option<CallCredentials>,
}

impl CallOption {
    pub fn new() -> CallOption {
        CallOption::default()
    }

    pub fn credentials(mut self, creds: CallCredentials) -> CallOption {
        self.credentials = Some(creds);
        self
    }

    pub fn get_credentials(&self) -> Option<&CallCredentials> {
        self.credentials.as_ref()
    }

    pub fn timeout(mut self, timeout: Duration) -> CallOption {
        self.timeout = Some(timeout);
        self
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn write_flags(mut self, flags: u32) -> CallOption {
        self.write_flags = flags;
        self
    }

    pub fn get_write_flags(&self) -> u32 {
        self.write_flags
    }

    pub fn call_compression_level(mut self, level: CompressionLevel) -> CallOption {
        self.call_compression_level = Some(level);
        self
    }

    pub fn get_call_compression_level(&self) -> Option<CompressionLevel> {
        self.call_compression_level
    }
}

/// Creates client-role `Call`s against one logical destination.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
    env: Arc<Environment>,
    cq: Arc<CompletionQueue>,
}

impl Channel {
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    pub fn cq(&self) -> &Arc<CompletionQueue> {
        &self.cq
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    /// Create a top-level client call (spec §4.1 "create", no parent).
    pub fn create_call(&self, method: &Method, opt: &CallOption) -> Call {
        self.create_call_with_parent(method, opt, None, PropagationMask::none())
    }

    /// Create a client call that is a child of `parent` (spec §4.7/§4.8),
    /// inheriting whichever attributes `propagation` names.
    pub fn create_child_call(
        &self,
        method: &Method,
        opt: &CallOption,
        parent: &Call,
        propagation: PropagationMask,
    ) -> Call {
        self.create_call_with_parent(method, opt, Some(parent.clone()), propagation)
    }

    fn create_call_with_parent(
        &self,
        method: &Method,
        opt: &CallOption,
        parent: Option<Call>,
        propagation: PropagationMask,
    ) -> Call {
        let compression_level = opt
            .call_compression_level
            .unwrap_or(self.inner.default_compression_level);
        let deadline = opt.timeout.map(|d| Instant::now() + d);

        Call::create(CallArgs {
            is_client: true,
            method: method.name,
            method_type: method.ty,
            host: self.inner.default_authority.clone(),
            peer: Some(self.inner.target.clone()),
            compression_level,
            transport: self.inner.transport.clone(),
            parent,
            propagation,
            deadline,
        })
    }
}
