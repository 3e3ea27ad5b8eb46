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

//! Server-side call acceptance (SPEC_FULL §10.4).
//!
//! A full server is an accept loop dispatching onto registered service
//! handlers over a native listener -- out of scope here (spec §1: "full RPC
//! service dispatch" is not this crate's job). What belongs to the Call
//! spec is the one step just inside that loop: turning an inbound method
//! name into a server-role [`Call`] (spec §4.1 `create`, `is_client: false`).
//! `ServerBuilder`/`Server` give that step the same config surface a real
//! accept loop would sit behind -- bound addresses, a registered-method
//! table -- so a binding crate can build the rest around it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::call::{Call, CallArgs, Method, MethodType};
use crate::compression::CompressionLevel;
use crate::env::{CompletionQueue, Environment};
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Configures a [`Server`]: bound addresses and the registered method table.
pub struct ServerBuilder {
    env: Arc<Environment>,
    addrs: Vec<(String, u16)>,
    methods: HashMap<&'static str, MethodType>,
}

impl ServerBuilder {
    pub fn new(env: Arc<Environment>) -> ServerBuilder {
        ServerBuilder {
            env,
            addrs: Vec::new(),
            methods: HashMap::new(),
        }
    }

    pub fn bind(mut self, host: impl Into<String>, port: u16) -> ServerBuilder {
        self.addrs.push((host.into(), port));
        self
    }

    /// Declare that `method` is handled by this server, so `accept_call` can
    /// be validated against it the way a real dispatcher would reject an
    /// unrecognized method before ever building a `Call`.
    pub fn register_method(mut self, method: &Method) -> ServerBuilder {
        self.methods.insert(method.name, method.ty);
        self
    }

    /// Build the server. Fails if no address was bound, matching the
    /// `BindFailure` a real listener would report for the same mistake.
    pub fn build(self) -> Result<Server> {
        if self.addrs.is_empty() {
            return Err(Error::BindFailure("no address bound".to_owned()));
        }
        Ok(Server {
            inner: Arc::new(ServerInner {
                env: self.env,
                bind_addrs: self.addrs,
                methods: self.methods,
                shutdown: AtomicBool::new(false),
            }),
        })
    }
}

struct ServerInner {
    env: Arc<Environment>,
    bind_addrs: Vec<(String, u16)>,
    methods: HashMap<&'static str, MethodType>,
    shutdown: AtomicBool,
}

/// Accepts inbound calls for whatever methods it was built with.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn bind_addrs(&self) -> &[(String, u16)] {
        &self.inner.bind_addrs
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.inner.env
    }

    pub fn cq(&self) -> Arc<CompletionQueue> {
        self.inner.env.pick_cq()
    }

    pub fn registered_method_type(&self, method: &str) -> Option<MethodType> {
        self.inner.methods.get(method).copied()
    }

    /// Accept one inbound call for `method` (spec §4.1 `create`,
    /// `is_client: false`). `deadline` is whatever the request's own timeout
    /// decoded to, if any -- a server call can have a `send_deadline` of its
    /// own, which its children (spec scenario §8.4) then inherit from.
    /// Rejects methods the server was never told about, mirroring a real
    /// dispatcher's pre-call routing check.
    pub fn accept_call(
        &self,
        method: &Method,
        peer: Option<String>,
        compression_level: CompressionLevel,
        deadline: Option<Instant>,
        transport: Arc<dyn Transport>,
    ) -> Result<Call> {
        match self.inner.methods.get(method.name) {
            Some(ty) if *ty == method.ty => {}
            Some(_) => return Err(Error::BindFailure(format!("method type mismatch for {}", method.name))),
            None => return Err(Error::BindFailure(format!("unregistered method {}", method.name))),
        }
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(Error::ShutdownFailed);
        }

        Ok(Call::create(CallArgs {
            is_client: false,
            method: method.name,
            method_type: method.ty,
            host: None,
            peer,
            compression_level,
            transport,
            parent: None,
            propagation: crate::call::PropagationMask::none(),
            deadline,
        }))
    }

    /// Mark the server as no longer accepting new calls. Calls already
    /// accepted keep running; this only gates `accept_call` going forward.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }
}
