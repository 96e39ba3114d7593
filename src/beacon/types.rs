// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

use serde::{Deserialize, Serialize};

/// A chain entry (`spec.md §3`). Round 0 is the genesis seed:
/// `previous_signature = genesis_seed`, `signature` empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub round: u64,
    pub previous_signature: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Beacon {
    pub fn genesis(genesis_seed: Vec<u8>) -> Self {
        Self {
            round: 0,
            previous_signature: genesis_seed,
            signature: Vec::new(),
        }
    }

    /// `randomness = H(signature)`; undefined (empty) at round 0 (`spec.md §8`).
    pub fn randomness(&self) -> Option<crate::hashing::Digest32> {
        if self.round == 0 {
            None
        } else {
            Some(crate::hashing::randomness(&self.signature))
        }
    }

    /// The message this round's signature was computed over:
    /// `H(previous_signature ‖ round)`.
    pub fn message(&self) -> crate::hashing::Digest32 {
        crate::hashing::round_message(&self.previous_signature, self.round)
    }
}

/// An in-flight contribution toward a round's signature (`spec.md §3`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartialBeacon {
    pub round: u64,
    pub previous_signature: Vec<u8>,
    pub partial_signature: Vec<u8>,
    pub index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_round_has_no_randomness() {
        let genesis = Beacon::genesis(vec![1, 2, 3]);
        assert_eq!(genesis.round, 0);
        assert!(genesis.randomness().is_none());
    }

    #[test]
    fn round_one_randomness_is_hash_of_signature() {
        let beacon = Beacon {
            round: 1,
            previous_signature: vec![1, 2, 3],
            signature: vec![9, 9, 9],
        };
        assert_eq!(beacon.randomness(), Some(crate::hashing::randomness(&[9, 9, 9])));
    }
}
