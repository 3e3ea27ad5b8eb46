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

//! Error taxonomy for the call state machine.
//!
//! Three layers are distinguished, matching the status-source priority
//! order in `status.rs`: API-level misuse (returned synchronously as a
//! [`CallError`]), wire-level RPC failure ([`RpcStatus`] carried as a
//! [`RpcError`]), and internal/transport failure (also an [`RpcError`],
//! tagged with a different `StatusSource`).

use std::fmt;

/// The status code vocabulary carried on the wire in `grpc-status`.
///
/// Values match the gRPC status code space bit-for-bit so that
/// `code as u32` round-trips through the wire header.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RpcStatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl RpcStatusCode {
    /// Decode a numeric code, mapping anything outside the known range to `Unknown`.
    pub fn from_u32(code: u32) -> RpcStatusCode {
        use RpcStatusCode::*;
        match code {
            0 => Ok,
            1 => Cancelled,
            2 => Unknown,
            3 => InvalidArgument,
            4 => DeadlineExceeded,
            5 => NotFound,
            6 => AlreadyExists,
            7 => PermissionDenied,
            8 => ResourceExhausted,
            9 => FailedPrecondition,
            10 => Aborted,
            11 => OutOfRange,
            12 => Unimplemented,
            13 => Internal,
            14 => Unavailable,
            15 => DataLoss,
            16 => Unauthenticated,
            _ => Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        use RpcStatusCode::*;
        match *self {
            Ok => "OK",
            Cancelled => "CANCELLED",
            Unknown => "UNKNOWN",
            InvalidArgument => "INVALID_ARGUMENT",
            DeadlineExceeded => "DEADLINE_EXCEEDED",
            NotFound => "NOT_FOUND",
            AlreadyExists => "ALREADY_EXISTS",
            PermissionDenied => "PERMISSION_DENIED",
            ResourceExhausted => "RESOURCE_EXHAUSTED",
            FailedPrecondition => "FAILED_PRECONDITION",
            Aborted => "ABORTED",
            OutOfRange => "OUT_OF_RANGE",
            Unimplemented => "UNIMPLEMENTED",
            Internal => "INTERNAL",
            Unavailable => "UNAVAILABLE",
            DataLoss => "DATA_LOSS",
            Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for RpcStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A wire/internal-layer error: a status code plus an optional human message.
///
/// This is what gets recorded into a [`crate::status::StatusRegister`] slot
/// and what the completion dispatcher consolidates across sub-callbacks.
#[derive(Clone, Debug)]
pub struct RpcError {
    pub code: RpcStatusCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: RpcStatusCode, message: impl Into<String>) -> RpcError {
        RpcError {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> RpcError {
        RpcError::new(RpcStatusCode::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> RpcError {
        RpcError::new(RpcStatusCode::Internal, message)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for RpcError {}

/// The status a server hands to `SEND_STATUS_FROM_SERVER`, or that a client
/// observes on `RECV_STATUS_ON_CLIENT`.
#[derive(Clone, Debug)]
pub struct RpcStatus {
    pub code: RpcStatusCode,
    pub details: Option<String>,
}

impl RpcStatus {
    pub fn new(code: RpcStatusCode, details: Option<String>) -> RpcStatus {
        RpcStatus { code, details }
    }

    pub fn ok() -> RpcStatus {
        RpcStatus::new(RpcStatusCode::Ok, None)
    }

    pub fn into_error(self) -> Option<RpcError> {
        if matches!(self.code, RpcStatusCode::Ok) {
            None
        } else {
            Some(RpcError::new(self.code, self.details.unwrap_or_default()))
        }
    }
}

/// Synchronous misuse codes returned by `start_batch` and friends.
///
/// Corresponds to the API-level layer of the error taxonomy: these never
/// touch the wire, they reject a batch before it is ever handed to the
/// transport.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallError {
    Ok,
    Error,
    NotOnClient,
    NotOnServer,
    AlreadyAccepted,
    AlreadyInvoked,
    AlreadyFinished,
    TooManyOperations,
    InvalidFlags,
    InvalidMetadata,
    InvalidMessage,
    NotServerCompletionQueue,
    BatchTooBig,
    PayloadTypeMismatch,
    CompletionQueueShutdown,
    NotInvoked,
}

impl CallError {
    pub fn name(&self) -> &'static str {
        use CallError::*;
        match *self {
            Ok => "OK",
            Error => "ERROR",
            NotOnClient => "NOT_ON_CLIENT",
            NotOnServer => "NOT_ON_SERVER",
            AlreadyAccepted => "ALREADY_ACCEPTED",
            AlreadyInvoked => "ALREADY_INVOKED",
            AlreadyFinished => "ALREADY_FINISHED",
            TooManyOperations => "TOO_MANY_OPERATIONS",
            InvalidFlags => "INVALID_FLAGS",
            InvalidMetadata => "INVALID_METADATA",
            InvalidMessage => "INVALID_MESSAGE",
            NotServerCompletionQueue => "NOT_SERVER_COMPLETION_QUEUE",
            BatchTooBig => "BATCH_TOO_BIG",
            PayloadTypeMismatch => "PAYLOAD_TYPE_MISMATCH",
            CompletionQueueShutdown => "COMPLETION_QUEUE_SHUTDOWN",
            NotInvoked => "NOT_INVOKED",
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::error::Error for CallError {}

/// The crate-wide error type surfaced by fallible public entry points that
/// are not batch validation (environment/channel/queue plumbing).
#[derive(Debug)]
pub enum Error {
    /// A batch was rejected synchronously; see `CallError` for the reason.
    CallFailure(CallError),
    /// The batch completed, but the RPC itself failed.
    RpcFailure(RpcStatus),
    /// The peer closed the stream before the local side finished using it.
    RemoteStopped,
    /// The completion queue this call (or environment) depends on has shut down.
    QueueShutdown,
    /// Server failed to bind the requested address.
    BindFailure(String),
    /// Server shutdown was requested but did not complete cleanly.
    ShutdownFailed,
    /// A future tied to a batch was polled again after resolving.
    FutureStale,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CallFailure(e) => write!(f, "call failure: {}", e),
            Error::RpcFailure(status) => write!(
                f,
                "rpc failure: {} ({})",
                status.code,
                status.details.as_deref().unwrap_or("")
            ),
            Error::RemoteStopped => write!(f, "remote stopped"),
            Error::QueueShutdown => write!(f, "completion queue shutdown"),
            Error::BindFailure(addr) => write!(f, "failed to bind {}", addr),
            Error::ShutdownFailed => write!(f, "shutdown failed"),
            Error::FutureStale => write!(f, "future polled after completion"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
