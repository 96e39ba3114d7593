// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Append-only ordered beacon store (`spec.md §4.5`). Backends are
//! interchangeable behind the [`ChainStore`] trait; the handler never reads
//! the backend on the hot aggregation path (that's [`super::cache`]).

use super::types::Beacon;
use super::Error;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Contract every backend (on-disk `sled`, in-memory) satisfies identically.
pub trait ChainStore: Send + Sync {
    /// Appends `beacon`. Must be `round = Last + 1`, except when the store
    /// is empty, in which case any round is accepted (bootstrap, `spec.md §4.5`).
    fn put(&self, beacon: Beacon) -> Result<(), Error>;
    fn last(&self) -> Result<Option<Beacon>, Error>;
    fn get(&self, round: u64) -> Result<Option<Beacon>, Error>;
    /// Beacons in `[from, last]`, in round order, for streaming sync.
    fn range_from(&self, from: u64) -> Result<Vec<Beacon>, Error>;
}

fn round_key(round: u64) -> [u8; 8] {
    round.to_be_bytes()
}

/// `sled`-backed implementation, rooted at `<beaconID>/db/`.
pub struct SledChainStore {
    tree: sled::Tree,
}

impl SledChainStore {
    pub fn open(path: &std::path::Path) -> Result<Self, Error> {
        let db = sled::open(path).map_err(|e| Error::Storage(e.to_string()))?;
        let tree = db.open_tree("beacons").map_err(|e| Error::Storage(e.to_string()))?;
        Ok(Self { tree })
    }

    fn decode(bytes: &[u8]) -> Result<Beacon, Error> {
        bincode::deserialize(bytes).map_err(|e| Error::Storage(e.to_string()))
    }
}

impl ChainStore for SledChainStore {
    fn put(&self, beacon: Beacon) -> Result<(), Error> {
        let last = self.last()?;
        match &last {
            Some(last) if beacon.round != last.round + 1 => {
                return Err(Error::NonSequentialRound {
                    last: last.round,
                    attempted: beacon.round,
                })
            }
            _ => {}
        }
        let bytes = bincode::serialize(&beacon).map_err(|e| Error::Storage(e.to_string()))?;
        self.tree
            .insert(round_key(beacon.round), bytes)
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    fn last(&self) -> Result<Option<Beacon>, Error> {
        match self.tree.last().map_err(|e| Error::Storage(e.to_string()))? {
            Some((_, bytes)) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get(&self, round: u64) -> Result<Option<Beacon>, Error> {
        match self
            .tree
            .get(round_key(round))
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn range_from(&self, from: u64) -> Result<Vec<Beacon>, Error> {
        let mut out = Vec::new();
        for entry in self.tree.range(round_key(from)..) {
            let (_, bytes) = entry.map_err(|e| Error::Storage(e.to_string()))?;
            out.push(Self::decode(&bytes)?);
        }
        Ok(out)
    }
}

/// In-memory backend used by tests (`test-utils`-style swap, `spec.md §4.5`).
#[derive(Default)]
pub struct MemoryChainStore {
    beacons: RwLock<BTreeMap<u64, Beacon>>,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainStore for MemoryChainStore {
    fn put(&self, beacon: Beacon) -> Result<(), Error> {
        let mut map = self.beacons.write().unwrap();
        if let Some((&last_round, _)) = map.iter().next_back() {
            if beacon.round != last_round + 1 {
                return Err(Error::NonSequentialRound {
                    last: last_round,
                    attempted: beacon.round,
                });
            }
        }
        map.insert(beacon.round, beacon);
        Ok(())
    }

    fn last(&self) -> Result<Option<Beacon>, Error> {
        Ok(self.beacons.read().unwrap().values().next_back().cloned())
    }

    fn get(&self, round: u64) -> Result<Option<Beacon>, Error> {
        Ok(self.beacons.read().unwrap().get(&round).cloned())
    }

    fn range_from(&self, from: u64) -> Result<Vec<Beacon>, Error> {
        Ok(self
            .beacons
            .read()
            .unwrap()
            .range(from..)
            .map(|(_, b)| b.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon(round: u64) -> Beacon {
        Beacon {
            round,
            previous_signature: vec![0],
            signature: vec![round as u8],
        }
    }

    #[test]
    fn memory_store_enforces_monotone_append() {
        let store = MemoryChainStore::new();
        store.put(beacon(1)).unwrap();
        let err = store.put(beacon(3)).unwrap_err();
        assert_eq!(
            err,
            Error::NonSequentialRound {
                last: 1,
                attempted: 3
            }
        );
        store.put(beacon(2)).unwrap();
        assert_eq!(store.last().unwrap().unwrap().round, 2);
    }

    #[test]
    fn memory_store_bootstraps_from_any_first_round() {
        let store = MemoryChainStore::new();
        store.put(beacon(10)).unwrap();
        assert_eq!(store.last().unwrap().unwrap().round, 10);
    }

    #[test]
    fn range_from_returns_round_ordered_slice() {
        let store = MemoryChainStore::new();
        store.put(beacon(1)).unwrap();
        store.put(beacon(2)).unwrap();
        store.put(beacon(3)).unwrap();
        let range = store.range_from(2).unwrap();
        let rounds: Vec<u64> = range.iter().map(|b| b.round).collect();
        assert_eq!(rounds, vec![2, 3]);
    }

    #[test]
    fn sled_store_round_trips_and_enforces_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledChainStore::open(dir.path()).unwrap();
        store.put(beacon(1)).unwrap();
        store.put(beacon(2)).unwrap();
        assert_eq!(store.get(1).unwrap().unwrap().round, 1);
        assert_eq!(store.last().unwrap().unwrap().round, 2);
        let err = store.put(beacon(1)).unwrap_err();
        assert!(matches!(err, Error::NonSequentialRound { .. }));
    }
}
