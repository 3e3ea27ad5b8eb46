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

//! Compression algorithm/level vocabulary and the accept-encoding bitset
//! used by the metadata filters (spec §4.2) and the server-side compression
//! level resolution (spec §4.3).

use std::fmt;

/// Message/stream level compression algorithm, as named on the wire in
/// `grpc-encoding` / `content-encoding`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CompressionAlgorithm {
    Identity,
    Deflate,
    Gzip,
}

impl CompressionAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::Identity => "identity",
            CompressionAlgorithm::Deflate => "deflate",
            CompressionAlgorithm::Gzip => "gzip",
        }
    }

    pub fn parse(name: &str) -> Option<CompressionAlgorithm> {
        match name {
            "identity" => Some(CompressionAlgorithm::Identity),
            "deflate" => Some(CompressionAlgorithm::Deflate),
            "gzip" => Some(CompressionAlgorithm::Gzip),
            _ => None,
        }
    }

    fn bit(&self) -> u32 {
        match self {
            CompressionAlgorithm::Identity => 1 << 0,
            CompressionAlgorithm::Deflate => 1 << 1,
            CompressionAlgorithm::Gzip => 1 << 2,
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The application-requested compression aggressiveness for
/// `SEND_INITIAL_METADATA`, resolved down to a concrete algorithm against
/// what the peer declared it can accept.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompressionLevel {
    None,
    Low,
    Medium,
    High,
}

/// Union of the `grpc-accept-encoding`/`accept-encoding` header lists,
/// always including `identity` (a peer that sends nothing is assumed to
/// tolerate uncompressed messages).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AcceptEncodingSet(u32);

impl AcceptEncodingSet {
    pub fn identity_only() -> AcceptEncodingSet {
        AcceptEncodingSet(CompressionAlgorithm::Identity.bit())
    }

    /// Parse a comma-separated list (whitespace around entries tolerated),
    /// logging and ignoring unknown entries. `identity` is implicitly
    /// included regardless of what was sent.
    pub fn parse(list: &str) -> AcceptEncodingSet {
        let mut bits = CompressionAlgorithm::Identity.bit();
        for entry in list.split(',') {
            let trimmed = entry.trim();
            if trimmed.is_empty() {
                continue;
            }
            match CompressionAlgorithm::parse(trimmed) {
                Some(alg) => bits |= alg.bit(),
                None => log::debug!("ignoring unknown accept-encoding entry {:?}", trimmed),
            }
        }
        AcceptEncodingSet(bits)
    }

    pub fn contains(&self, alg: CompressionAlgorithm) -> bool {
        self.0 & alg.bit() != 0
    }

    pub fn insert(&mut self, alg: CompressionAlgorithm) {
        self.0 |= alg.bit();
    }

    /// Format back to the comma-separated wire form; round-trips through
    /// `parse` (spec §8 round-trip law).
    pub fn format(&self) -> String {
        [
            CompressionAlgorithm::Identity,
            CompressionAlgorithm::Deflate,
            CompressionAlgorithm::Gzip,
        ]
        .iter()
        .filter(|alg| self.contains(**alg))
        .map(|alg| alg.name())
        .collect::<Vec<_>>()
        .join(",")
    }
}

impl Default for AcceptEncodingSet {
    fn default() -> AcceptEncodingSet {
        AcceptEncodingSet::identity_only()
    }
}

/// Resolve a requested compression level against what the peer accepts,
/// picking the strongest accepted algorithm at-or-below the level
/// (spec §4.3 "Compression-level processing").
pub fn algorithm_for_level(
    level: CompressionLevel,
    accepted: AcceptEncodingSet,
) -> CompressionAlgorithm {
    if level == CompressionLevel::None {
        return CompressionAlgorithm::Identity;
    }
    // Strongest to weakest; `high` starts at the top, `low` starts at the bottom.
    const PREFERENCE: [CompressionAlgorithm; 2] =
        [CompressionAlgorithm::Gzip, CompressionAlgorithm::Deflate];
    let start = match level {
        CompressionLevel::High => 0,
        CompressionLevel::Medium => PREFERENCE.len() / 2,
        CompressionLevel::Low => PREFERENCE.len() - 1,
        CompressionLevel::None => unreachable!(),
    };
    PREFERENCE[start..]
        .iter()
        .copied()
        .find(|alg| accepted.contains(*alg))
        .unwrap_or(CompressionAlgorithm::Identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_format_round_trip() {
        let set = AcceptEncodingSet::parse("gzip, deflate");
        let formatted = set.format();
        let reparsed = AcceptEncodingSet::parse(&formatted);
        assert_eq!(set, reparsed);
        assert!(reparsed.contains(CompressionAlgorithm::Identity));
        assert!(reparsed.contains(CompressionAlgorithm::Gzip));
        assert!(reparsed.contains(CompressionAlgorithm::Deflate));
    }

    #[test]
    fn unknown_entries_ignored() {
        let set = AcceptEncodingSet::parse("gzip, snappy-turbo");
        assert!(set.contains(CompressionAlgorithm::Gzip));
        assert!(!set.contains(CompressionAlgorithm::Deflate));
    }

    #[test]
    fn level_resolution_picks_strongest_accepted() {
        let accepted = AcceptEncodingSet::parse("gzip,identity");
        assert_eq!(
            algorithm_for_level(CompressionLevel::High, accepted),
            CompressionAlgorithm::Gzip
        );
        let deflate_only = AcceptEncodingSet::parse("deflate");
        assert_eq!(
            algorithm_for_level(CompressionLevel::High, deflate_only),
            CompressionAlgorithm::Deflate
        );
        assert_eq!(
            algorithm_for_level(CompressionLevel::None, accepted),
            CompressionAlgorithm::Identity
        );
    }
}
