// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! `Group`: the immutable per-epoch committee snapshot (`spec.md §3`).
//!
//! Group files are TOML-encoded on disk (`spec.md §6`); the wire/persisted
//! round-trip is a bijection on valid inputs (`spec.md §8`).

use crate::identity::Participant;
use serde::{Deserialize, Serialize};
use std::convert::TryInto;
use thiserror::Error;

/// Errors constructing or validating a `Group`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("threshold {threshold} is below the minimum of ceil(n/2)+1 = {minimum} for n={n}")]
    ThresholdTooLow {
        threshold: usize,
        minimum: usize,
        n: usize,
    },
    #[error("threshold {threshold} exceeds the number of participants {n}")]
    ThresholdTooHigh { threshold: usize, n: usize },
    #[error("period must be greater than zero")]
    NonPositivePeriod,
    #[error("duplicate participant address: {0}")]
    DuplicateAddress(String),
    #[error("duplicate participant public key for address {0}")]
    DuplicatePublicKey(String),
    #[error("failed to decode TOML group file: {0}")]
    Decode(String),
    #[error("failed to encode group as TOML: {0}")]
    Encode(String),
}

/// The distributed public key produced by a completed DKG: a list of
/// polynomial coefficients, the constant term being the master public key.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DistPublicKey {
    /// Coefficient commitments, index 0 is the master public key.
    pub coefficients: Vec<bls::PublicKey>,
}

impl DistPublicKey {
    pub fn from_public_key_set(pks: &bls::PublicKeySet) -> Self {
        // blsttc does not expose raw coefficients directly; the constant term
        // (the group public key) is what every consumer of this type needs.
        Self {
            coefficients: vec![pks.public_key()],
        }
    }

    /// The master public key: constant term of the polynomial.
    pub fn master(&self) -> &bls::PublicKey {
        &self.coefficients[0]
    }
}

impl std::fmt::Debug for DistPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DistPublicKey({})", hex::encode(self.master().to_bytes()))
    }
}

/// Immutable snapshot of a committee for one epoch (`spec.md §3`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Group {
    /// Ordered participants; index in this vec is the stable DKG index.
    pub nodes: Vec<Participant>,
    pub threshold: usize,
    /// Beacon production period, seconds.
    pub period_secs: u32,
    /// Catchup retry period, seconds.
    pub catchup_period_secs: u32,
    pub genesis_time: u64,
    /// Unset for the initial (epoch 1) group.
    pub transition_time: Option<u64>,
    #[serde(with = "serde_bytes_as_hex")]
    pub genesis_seed: Vec<u8>,
    pub scheme_id: String,
    /// Present once the DKG producing this group has completed.
    pub public_key: Option<DistPublicKey>,
}

mod serde_bytes_as_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// `⌈n/2⌉ + 1` (`spec.md §3`/`§7`). `n / 2 + 1` only agrees with this for
/// even `n`; `(n + 1) / 2` is the integer form of `⌈n/2⌉`.
fn minimum_threshold(n: usize) -> usize {
    (n + 1) / 2 + 1
}

impl Group {
    /// Validates and builds a `Group`. Enforces the invariants in `spec.md §3`:
    /// `t ≥ ⌈n/2⌉+1`, `P > 0`, participants unique by address and by public key.
    pub fn new(
        nodes: Vec<Participant>,
        threshold: usize,
        period_secs: u32,
        catchup_period_secs: u32,
        genesis_time: u64,
        transition_time: Option<u64>,
        genesis_seed: Vec<u8>,
        scheme_id: String,
    ) -> Result<Self, Error> {
        let n = nodes.len();
        let minimum = minimum_threshold(n);
        if threshold < minimum {
            return Err(Error::ThresholdTooLow {
                threshold,
                minimum,
                n,
            });
        }
        if threshold > n {
            return Err(Error::ThresholdTooHigh { threshold, n });
        }
        if period_secs == 0 {
            return Err(Error::NonPositivePeriod);
        }

        let mut seen_addrs = std::collections::HashSet::new();
        let mut seen_keys = std::collections::HashSet::new();
        for node in &nodes {
            if !seen_addrs.insert(node.address.clone()) {
                return Err(Error::DuplicateAddress(node.address.clone()));
            }
            if !seen_keys.insert(node.public_key.as_bytes().to_vec()) {
                return Err(Error::DuplicatePublicKey(node.address.clone()));
            }
        }

        Ok(Self {
            nodes,
            threshold,
            period_secs,
            catchup_period_secs,
            genesis_time,
            transition_time,
            genesis_seed,
            scheme_id,
            public_key: None,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn position(&self, address: &str) -> Option<usize> {
        self.nodes.iter().position(|p| p.address == address)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.position(address).is_some()
    }

    /// Round `r`'s scheduled wall-clock time.
    pub fn round_time(&self, round: u64) -> u64 {
        self.genesis_time + round * self.period_secs as u64
    }

    /// Stable chain hash (`spec.md §6`): requires the public key to be set,
    /// i.e. this is only meaningful once the group has a completed DKG.
    pub fn chain_hash(&self) -> Option<String> {
        let pk = self.public_key.as_ref()?;
        let digest = crate::hashing::chain_hash(
            self.period_secs,
            self.genesis_time,
            &pk.master().to_bytes(),
            &self.genesis_seed,
            &self.scheme_id,
        );
        Some(crate::hashing::to_hex(&digest))
    }

    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Encode(e.to_string()))
    }

    pub fn from_toml(s: &str) -> Result<Self, Error> {
        toml::from_str(s).map_err(|e| Error::Decode(e.to_string()))
    }
}

#[allow(dead_code)]
fn assert_index_fits(index: usize) -> u32 {
    index.try_into().expect("group too large for u32 index")
}
