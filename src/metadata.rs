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

//! Metadata Store & Header Filters (spec §4.2).
//!
//! `CallMetadata` holds the four batches indexed by (receiving?, trailing?).
//! The recv-initial and recv-trailing filters strip the handful of headers
//! the Call itself interprets (compression negotiation, status) and leave
//! the remainder for the application.

use std::collections::HashMap;

use crate::compression::{AcceptEncodingSet, CompressionAlgorithm};
use crate::error::{RpcError, RpcStatusCode};

pub const CONTENT_ENCODING: &str = "content-encoding";
pub const GRPC_ENCODING: &str = "grpc-encoding";
pub const GRPC_ACCEPT_ENCODING: &str = "grpc-accept-encoding";
pub const ACCEPT_ENCODING: &str = "accept-encoding";
pub const GRPC_STATUS: &str = "grpc-status";
pub const GRPC_MESSAGE: &str = "grpc-message";
pub const GRPC_INTERNAL_ENCODING_REQUEST: &str = "grpc-internal-encoding-request";

/// A single metadata element. `value` is a byte string because `-bin`
/// suffixed keys carry opaque binary payloads.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MetadataEntry {
    pub key: String,
    pub value: Vec<u8>,
}

impl MetadataEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> MetadataEntry {
        MetadataEntry {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn is_binary_key(&self) -> bool {
        self.key.ends_with("-bin")
    }

    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }

    /// Header-validity rule (spec §4.3): legal key syntax, legal non-binary
    /// value syntax for non-binary keys.
    pub fn is_valid(&self) -> bool {
        if self.key.is_empty() {
            return false;
        }
        let key_ok = self
            .key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_' || b == b'.');
        if !key_ok {
            return false;
        }
        if self.is_binary_key() {
            true
        } else {
            self.value.iter().all(|&b| (0x20..=0x7e).contains(&b))
        }
    }
}

/// An ordered list of metadata entries, supporting the strip/prepend/append
/// operations the header filters need.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MetadataBatch {
    entries: Vec<MetadataEntry>,
}

impl MetadataBatch {
    pub fn new() -> MetadataBatch {
        MetadataBatch { entries: Vec::new() }
    }

    pub fn from_entries(entries: Vec<MetadataEntry>) -> MetadataBatch {
        MetadataBatch { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MetadataEntry> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<MetadataEntry> {
        self.entries
    }

    pub fn push_back(&mut self, entry: MetadataEntry) {
        self.entries.push(entry);
    }

    pub fn push_front(&mut self, entry: MetadataEntry) {
        self.entries.insert(0, entry);
    }

    /// Remove and return the first entry matching `key`, case-sensitively
    /// (gRPC metadata keys are always lowercase on the wire).
    pub fn take(&mut self, key: &str) -> Option<MetadataEntry> {
        let pos = self.entries.iter().position(|e| e.key == key)?;
        Some(self.entries.remove(pos))
    }

    pub fn all_valid(&self) -> bool {
        self.entries.iter().all(MetadataEntry::is_valid)
    }
}

/// The result of filtering a freshly received initial-metadata batch.
pub struct InitialMetadataFilterResult {
    pub stream_compression: CompressionAlgorithm,
    pub message_compression: CompressionAlgorithm,
    pub accepted_by_peer: AcceptEncodingSet,
}

/// Memoizes the last parsed accept-encoding header so repeated identical
/// header text (the common case: every call on a channel sends the same
/// list) isn't re-split/re-matched every time (spec §4.2 "memoized on the
/// header value").
#[derive(Default)]
pub struct AcceptEncodingCache {
    last: Option<(Vec<u8>, AcceptEncodingSet)>,
}

impl AcceptEncodingCache {
    pub fn resolve(&mut self, raw: &[u8]) -> AcceptEncodingSet {
        if let Some((cached_raw, cached_set)) = &self.last {
            if cached_raw.as_slice() == raw {
                return *cached_set;
            }
        }
        let text = String::from_utf8_lossy(raw);
        let set = AcceptEncodingSet::parse(&text);
        self.last = Some((raw.to_vec(), set));
        set
    }
}

/// Memoizes `grpc-status` header decode. Fast paths the three overwhelmingly
/// common byte strings; anything else falls back to a parse, cached by raw
/// bytes so a second occurrence of the identical (unparsed) header text does
/// not reparse (spec §8 round-trip law).
#[derive(Default)]
pub struct StatusCodeCache {
    cache: HashMap<Vec<u8>, RpcStatusCode>,
    // Exposed for tests to assert the cache, not the parser, served a repeat lookup.
    pub parses: usize,
}

impl StatusCodeCache {
    pub fn decode(&mut self, raw: &[u8]) -> RpcStatusCode {
        match raw {
            b"0" => return RpcStatusCode::Ok,
            b"1" => return RpcStatusCode::Cancelled,
            b"2" => return RpcStatusCode::Unknown,
            _ => {}
        }
        if let Some(code) = self.cache.get(raw) {
            return *code;
        }
        self.parses += 1;
        let text = String::from_utf8_lossy(raw);
        let code = text
            .trim()
            .parse::<u32>()
            .map(RpcStatusCode::from_u32)
            .unwrap_or(RpcStatusCode::Unknown);
        self.cache.insert(raw.to_vec(), code);
        code
    }
}

/// Prepend `grpc-internal-encoding-request` to an outgoing initial-metadata
/// batch once a non-identity algorithm has been resolved against the peer's
/// accept-encoding (spec §4.3 "compression-level processing"). A no-op for
/// identity, which never needs to be requested explicitly.
pub fn filter_send_initial_metadata(batch: &mut MetadataBatch, algorithm: CompressionAlgorithm) {
    if algorithm == CompressionAlgorithm::Identity {
        return;
    }
    batch.push_front(MetadataEntry::new(GRPC_INTERNAL_ENCODING_REQUEST, algorithm.name()));
}

/// Strip the compression/accept-encoding headers off a just-received initial
/// metadata batch, leaving the rest for the application.
pub fn filter_recv_initial_metadata(
    batch: &mut MetadataBatch,
    cache: &mut AcceptEncodingCache,
) -> InitialMetadataFilterResult {
    let stream_compression = batch
        .take(CONTENT_ENCODING)
        .and_then(|e| e.value_str().and_then(CompressionAlgorithm::parse))
        .unwrap_or(CompressionAlgorithm::Identity);

    let message_compression = batch
        .take(GRPC_ENCODING)
        .and_then(|e| e.value_str().and_then(CompressionAlgorithm::parse))
        .unwrap_or(CompressionAlgorithm::Identity);

    let mut accepted = AcceptEncodingSet::identity_only();
    if let Some(entry) = batch.take(GRPC_ACCEPT_ENCODING) {
        for alg_bit in cache_union(&mut accepted, &entry.value, cache) {
            accepted.insert(alg_bit);
        }
    }
    if let Some(entry) = batch.take(ACCEPT_ENCODING) {
        for alg_bit in cache_union(&mut accepted, &entry.value, cache) {
            accepted.insert(alg_bit);
        }
    }

    InitialMetadataFilterResult {
        stream_compression,
        message_compression,
        accepted_by_peer: accepted,
    }
}

fn cache_union(
    _running: &mut AcceptEncodingSet,
    raw: &[u8],
    cache: &mut AcceptEncodingCache,
) -> Vec<CompressionAlgorithm> {
    let set = cache.resolve(raw);
    [
        CompressionAlgorithm::Identity,
        CompressionAlgorithm::Deflate,
        CompressionAlgorithm::Gzip,
    ]
    .into_iter()
    .filter(|alg| set.contains(*alg))
    .collect()
}

/// The outcome of filtering just-received trailing metadata.
pub struct TrailingMetadataFilterResult {
    pub wire_error: Option<RpcError>,
}

/// Strip `grpc-status`/`grpc-message` off a just-received trailing metadata
/// batch, synthesizing a `WIRE`-sourced error if the status was non-zero.
pub fn filter_recv_trailing_metadata(
    batch: &mut MetadataBatch,
    cache: &mut StatusCodeCache,
) -> TrailingMetadataFilterResult {
    let code = batch
        .take(GRPC_STATUS)
        .map(|e| cache.decode(&e.value))
        .unwrap_or(RpcStatusCode::Ok);
    let message = batch
        .take(GRPC_MESSAGE)
        .and_then(|e| e.value_str().map(|s| s.to_owned()))
        .unwrap_or_default();

    let wire_error = if !matches!(code, RpcStatusCode::Ok) {
        Some(RpcError::new(code, message))
    } else {
        None
    };

    TrailingMetadataFilterResult { wire_error }
}
