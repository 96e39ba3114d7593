// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Ephemeral per-round partial-signature cache (`spec.md §4.4`-`§4.5`).
//! Partials never touch the durable chain store; once a round is finalized
//! or superseded its entry is dropped. Keyed the way `dkg::broadcast`'s
//! `ContentCounter` keys per-issuer contributions, reused here per-round.

use super::types::PartialBeacon;
use super::Error;
use dashmap::DashMap;
use std::collections::HashMap;

/// Holds at most one partial per issuer index for a single round.
#[derive(Default)]
struct RoundEntry {
    previous_signature: Vec<u8>,
    partials: HashMap<usize, PartialBeacon>,
}

/// Partial-signature staging area shared by the beacon handler.
pub struct PartialCache {
    rounds: DashMap<u64, RoundEntry>,
}

impl PartialCache {
    pub fn new() -> Self {
        Self {
            rounds: DashMap::new(),
        }
    }

    /// Records `partial`, rejecting one whose `previous_signature` conflicts
    /// with a partial already cached for the same round (`spec.md §4.4`,
    /// fork-of-partials guard). Returns the number of distinct issuers now
    /// cached for this round.
    pub fn insert(&self, partial: PartialBeacon) -> Result<usize, Error> {
        let mut entry = self.rounds.entry(partial.round).or_insert_with(|| RoundEntry {
            previous_signature: partial.previous_signature.clone(),
            partials: HashMap::new(),
        });

        if entry.partials.is_empty() {
            entry.previous_signature = partial.previous_signature.clone();
        } else if entry.previous_signature != partial.previous_signature {
            return Err(Error::PreviousSignatureMismatch { round: partial.round });
        }

        entry.partials.insert(partial.index, partial);
        Ok(entry.partials.len())
    }

    /// Number of distinct issuers cached for `round`.
    pub fn count(&self, round: u64) -> usize {
        self.rounds.get(&round).map(|e| e.partials.len()).unwrap_or(0)
    }

    /// Removes and returns every partial cached for `round`, e.g. once
    /// aggregation succeeds.
    pub fn drain(&self, round: u64) -> Vec<PartialBeacon> {
        self.rounds
            .remove(&round)
            .map(|(_, entry)| entry.partials.into_values().collect())
            .unwrap_or_default()
    }

    /// Drops every cached round strictly below `round`, since a round that
    /// has already been finalized will never need its stragglers again.
    pub fn prune_below(&self, round: u64) {
        self.rounds.retain(|r, _| *r >= round);
    }
}

impl Default for PartialCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(round: u64, index: usize, prev: &[u8]) -> PartialBeacon {
        PartialBeacon {
            round,
            previous_signature: prev.to_vec(),
            partial_signature: vec![index as u8],
            index,
        }
    }

    #[test]
    fn dedups_by_issuer_index() {
        let cache = PartialCache::new();
        assert_eq!(cache.insert(partial(5, 1, b"p")).unwrap(), 1);
        assert_eq!(cache.insert(partial(5, 1, b"p")).unwrap(), 1);
        assert_eq!(cache.insert(partial(5, 2, b"p")).unwrap(), 2);
        assert_eq!(cache.count(5), 2);
    }

    #[test]
    fn rejects_conflicting_previous_signature() {
        let cache = PartialCache::new();
        cache.insert(partial(5, 1, b"p")).unwrap();
        let err = cache.insert(partial(5, 2, b"q")).unwrap_err();
        assert_eq!(err, Error::PreviousSignatureMismatch { round: 5 });
    }

    #[test]
    fn drain_removes_round_entirely() {
        let cache = PartialCache::new();
        cache.insert(partial(5, 1, b"p")).unwrap();
        let drained = cache.drain(5);
        assert_eq!(drained.len(), 1);
        assert_eq!(cache.count(5), 0);
    }

    #[test]
    fn prune_below_drops_stale_rounds_only() {
        let cache = PartialCache::new();
        cache.insert(partial(3, 1, b"p")).unwrap();
        cache.insert(partial(7, 1, b"p")).unwrap();
        cache.prune_below(5);
        assert_eq!(cache.count(3), 0);
        assert_eq!(cache.count(7), 1);
    }
}
