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

//! Message assembly (spec §4.6): a received message arrives from the
//! transport as a (possibly compressed) byte buffer, tagged with whether it
//! was compressed on the wire.
//!
//! Decompression itself lives below the transport seam (spec §1 says
//! framing/codec work is out of scope for the Call); what the Call owns is
//! deciding, from the negotiated algorithm and the per-message flag, whether
//! the bytes it was handed need to be decompressed before the application
//! sees them.

use crate::compression::CompressionAlgorithm;

/// Per-message compression flag, set independently of the stream-level
/// `grpc-encoding` header (a stream can carry a mix of compressed and
/// literal messages; spec §4.6 "flagged independently per message").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageFraming {
    Literal,
    Compressed,
}

/// A message buffer as handed up from the transport, not yet resolved
/// against the negotiated algorithm.
pub struct RawMessage {
    pub bytes: Vec<u8>,
    pub framing: MessageFraming,
}

/// What the application should be handed for one `RECV_MESSAGE` batch.
pub enum AssembledMessage {
    /// The buffer requires no further processing (it was sent literally, or
    /// decompression is the transport layer's job below this seam and has
    /// already happened).
    Ready(Vec<u8>),
    /// The message's framing claims compression but the negotiated
    /// algorithm for this stream is `identity` -- a protocol violation.
    Rejected,
}

/// Resolve a raw received message against the stream's negotiated receive
/// algorithm (spec §4.6: "a message flagged compressed when the stream
/// negotiated `identity` is a protocol error, not a no-op").
pub fn assemble(raw: RawMessage, negotiated: CompressionAlgorithm) -> AssembledMessage {
    match raw.framing {
        MessageFraming::Literal => AssembledMessage::Ready(raw.bytes),
        MessageFraming::Compressed => {
            if negotiated == CompressionAlgorithm::Identity {
                AssembledMessage::Rejected
            } else {
                AssembledMessage::Ready(raw.bytes)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_message_passes_through() {
        let raw = RawMessage {
            bytes: vec![1, 2, 3],
            framing: MessageFraming::Literal,
        };
        match assemble(raw, CompressionAlgorithm::Identity) {
            AssembledMessage::Ready(bytes) => assert_eq!(bytes, vec![1, 2, 3]),
            AssembledMessage::Rejected => panic!("expected ready"),
        }
    }

    #[test]
    fn compressed_message_rejected_when_stream_negotiated_identity() {
        let raw = RawMessage {
            bytes: vec![1, 2, 3],
            framing: MessageFraming::Compressed,
        };
        match assemble(raw, CompressionAlgorithm::Identity) {
            AssembledMessage::Rejected => {}
            AssembledMessage::Ready(_) => panic!("expected rejected"),
        }
    }

    #[test]
    fn compressed_message_accepted_when_negotiated() {
        let raw = RawMessage {
            bytes: vec![9, 9],
            framing: MessageFraming::Compressed,
        };
        match assemble(raw, CompressionAlgorithm::Gzip) {
            AssembledMessage::Ready(bytes) => assert_eq!(bytes, vec![9, 9]),
            AssembledMessage::Rejected => panic!("expected ready"),
        }
    }
}
