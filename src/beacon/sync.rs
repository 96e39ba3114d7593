// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Catchup: querying peers in parallel for their chain tip, then either
//! racing every peer for a small gap or streaming and verifying a single
//! peer's beacons from `fromRound` for a large one (`spec.md §4.6`). The
//! parallel-fan-out shape mirrors how the teacher's `routing` layer gathers
//! responses from several elders with `futures::stream::FuturesUnordered`
//! before committing to one.

use super::chain_store::ChainStore;
use super::types::Beacon;
use super::Error;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::convert::TryInto;
use std::sync::Arc;
use tracing::{debug, warn};

/// A peer this node can ask for chain state (`spec.md §6`, `ChainInfo` /
/// `SyncChain` RPCs). Implemented over the real transport in `crate::net`.
#[async_trait]
pub trait SyncPeer: Send + Sync {
    fn address(&self) -> &str;
    async fn last_beacon(&self) -> Result<Beacon, Error>;
    /// Returns beacons in `[from, ..]`, in round order. A real
    /// implementation streams these; batching here is an implementation
    /// detail, not part of the contract.
    async fn beacons_from(&self, from: u64) -> Result<Vec<Beacon>, Error>;
}

/// Queries every peer's chain tip concurrently and returns the one with the
/// highest round, preferring whichever answers sooner on ties.
pub async fn find_most_advanced_peer(peers: &[Arc<dyn SyncPeer>]) -> Option<(Arc<dyn SyncPeer>, Beacon)> {
    let mut pending = FuturesUnordered::new();
    for peer in peers {
        let peer = peer.clone();
        pending.push(async move {
            let result = peer.last_beacon().await;
            (peer, result)
        });
    }

    let mut best: Option<(Arc<dyn SyncPeer>, Beacon)> = None;
    while let Some((peer, result)) = pending.next().await {
        match result {
            Ok(beacon) => {
                let better = match &best {
                    Some((_, current)) => beacon.round > current.round,
                    None => true,
                };
                if better {
                    best = Some((peer, beacon));
                }
            }
            Err(error) => warn!(peer = peer.address(), %error, "sync peer query failed"),
        }
    }
    best
}

/// Verifies that `beacons` form an unbroken, correctly signed chain
/// continuing from `after`, appending each to `store` as it's accepted
/// (`spec.md §4.6`, "each beacon verified before being appended").
pub fn verify_and_append(
    store: &dyn ChainStore,
    public_key_set: &bls::PublicKeySet,
    after: &Beacon,
    beacons: &[Beacon],
) -> Result<u64, Error> {
    let mut previous = after.clone();
    let mut appended = 0;
    for beacon in beacons {
        if beacon.round != previous.round + 1 {
            return Err(Error::NonSequentialRound {
                last: previous.round,
                attempted: beacon.round,
            });
        }
        if beacon.previous_signature != previous.signature {
            return Err(Error::PreviousSignatureMismatch { round: beacon.round });
        }
        let signature_bytes: [u8; bls::SIG_SIZE] = beacon
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidSignature(beacon.round))?;
        let signature = bls::Signature::from_bytes(signature_bytes)
            .map_err(|_| Error::InvalidSignature(beacon.round))?;
        if !public_key_set
            .public_key()
            .verify(&signature, &beacon.message())
        {
            return Err(Error::InvalidSignature(beacon.round));
        }
        store.put(beacon.clone())?;
        appended += 1;
        previous = beacon.clone();
    }
    debug!(appended, through_round = previous.round, "sync appended beacons");
    Ok(appended)
}

/// Gap size, in rounds, at or below which catchup races every peer in
/// parallel rather than committing to a single peer's stream (`spec.md
/// §4.6`). Small gaps are cheap to fetch redundantly and the race avoids
/// stalling on one slow or stale peer; larger gaps stream from whichever
/// peer is already known to be most advanced.
const SMALL_GAP_ROUNDS: u64 = 3;

/// Drives catchup from the local chain tip (or genesis) up to whatever the
/// most advanced reachable peer holds.
pub async fn catchup(
    store: &dyn ChainStore,
    public_key_set: &bls::PublicKeySet,
    genesis: &Beacon,
    peers: &[Arc<dyn SyncPeer>],
) -> Result<u64, Error> {
    let local_tip = store.last()?.unwrap_or_else(|| genesis.clone());
    let (peer, remote_tip) = match find_most_advanced_peer(peers).await {
        Some(found) => found,
        None => return Ok(0),
    };
    if remote_tip.round <= local_tip.round {
        return Ok(0);
    }

    if remote_tip.round - local_tip.round <= SMALL_GAP_ROUNDS {
        return Ok(race_small_gap(store, public_key_set, &local_tip, peers).await);
    }

    let missing = peer.beacons_from(local_tip.round + 1).await?;
    verify_and_append(store, public_key_set, &local_tip, &missing)
}

/// Queries every peer for `[local_tip.round + 1, ..]` concurrently and
/// appends whichever response is the first to verify, ignoring peers that
/// error, return nothing, or return a chain that fails verification.
async fn race_small_gap(
    store: &dyn ChainStore,
    public_key_set: &bls::PublicKeySet,
    local_tip: &Beacon,
    peers: &[Arc<dyn SyncPeer>],
) -> u64 {
    let from = local_tip.round + 1;
    let mut pending = FuturesUnordered::new();
    for peer in peers {
        let peer = peer.clone();
        pending.push(async move { (peer.address().to_string(), peer.beacons_from(from).await) });
    }

    while let Some((address, result)) = pending.next().await {
        let beacons = match result {
            Ok(beacons) if !beacons.is_empty() => beacons,
            Ok(_) => continue,
            Err(error) => {
                warn!(peer = %address, %error, "small-gap sync peer query failed");
                continue;
            }
        };
        match verify_and_append(store, public_key_set, local_tip, &beacons) {
            Ok(appended) if appended > 0 => return appended,
            Ok(_) => continue,
            Err(error) => {
                warn!(peer = %address, %error, "small-gap sync peer response failed verification");
                continue;
            }
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::chain_store::MemoryChainStore;
    use bls::SecretKeySet;

    struct StaticPeer {
        address: String,
        tip: Beacon,
        chain: Vec<Beacon>,
    }

    #[async_trait]
    impl SyncPeer for StaticPeer {
        fn address(&self) -> &str {
            &self.address
        }

        async fn last_beacon(&self) -> Result<Beacon, Error> {
            Ok(self.tip.clone())
        }

        async fn beacons_from(&self, from: u64) -> Result<Vec<Beacon>, Error> {
            Ok(self.chain.iter().filter(|b| b.round >= from).cloned().collect())
        }
    }

    fn chain(pks: &bls::PublicKeySet, sks: &bls::SecretKeySet, genesis: &Beacon, upto: u64) -> Vec<Beacon> {
        let _ = pks;
        let mut beacons = Vec::new();
        let mut previous = genesis.clone();
        for round in 1..=upto {
            let message = crate::hashing::round_message(&previous.signature, round);
            let sig = sks.secret_key().sign(&message);
            let beacon = Beacon {
                round,
                previous_signature: previous.signature.clone(),
                signature: sig.to_bytes().to_vec(),
            };
            previous = beacon.clone();
            beacons.push(beacon);
        }
        beacons
    }

    #[tokio::test]
    async fn catchup_appends_verified_beacons_from_most_advanced_peer() {
        let mut rng = rand::thread_rng();
        let sks = SecretKeySet::random(1, &mut rng);
        let pks = sks.public_keys();
        let genesis = Beacon::genesis(vec![7, 7, 7]);
        let full_chain = chain(&pks, &sks, &genesis, 3);

        let lagging = Arc::new(StaticPeer {
            address: "lagging".into(),
            tip: full_chain[0].clone(),
            chain: full_chain[..1].to_vec(),
        });
        let advanced = Arc::new(StaticPeer {
            address: "advanced".into(),
            tip: full_chain[2].clone(),
            chain: full_chain.clone(),
        });

        let store = MemoryChainStore::new();
        store.put(genesis.clone()).unwrap();
        let peers: Vec<Arc<dyn SyncPeer>> = vec![lagging, advanced];
        let appended = catchup(&store, &pks, &genesis, &peers).await.unwrap();
        assert_eq!(appended, 3);
        assert_eq!(store.last().unwrap().unwrap().round, 3);
    }

    #[tokio::test]
    async fn catchup_races_peers_for_a_small_gap_and_skips_bad_responses() {
        let mut rng = rand::thread_rng();
        let sks = SecretKeySet::random(1, &mut rng);
        let pks = sks.public_keys();
        let genesis = Beacon::genesis(vec![7, 7, 7]);
        let full_chain = chain(&pks, &sks, &genesis, 1);
        let good_round_1 = full_chain[0].clone();

        let mut corrupted_round_1 = good_round_1.clone();
        corrupted_round_1.previous_signature = b"not-genesis".to_vec();

        let bad = Arc::new(StaticPeer {
            address: "bad".into(),
            tip: corrupted_round_1.clone(),
            chain: vec![corrupted_round_1],
        });
        let good = Arc::new(StaticPeer {
            address: "good".into(),
            tip: good_round_1.clone(),
            chain: vec![good_round_1.clone()],
        });

        let store = MemoryChainStore::new();
        store.put(genesis.clone()).unwrap();
        let peers: Vec<Arc<dyn SyncPeer>> = vec![bad, good];
        let appended = catchup(&store, &pks, &genesis, &peers).await.unwrap();
        assert_eq!(appended, 1);
        assert_eq!(store.last().unwrap().unwrap().signature, good_round_1.signature);
    }

    #[tokio::test]
    async fn catchup_is_noop_when_no_peer_is_ahead() {
        let mut rng = rand::thread_rng();
        let sks = SecretKeySet::random(1, &mut rng);
        let pks = sks.public_keys();
        let genesis = Beacon::genesis(vec![7, 7, 7]);
        let store = MemoryChainStore::new();
        store.put(genesis.clone()).unwrap();

        let peer = Arc::new(StaticPeer {
            address: "peer".into(),
            tip: genesis.clone(),
            chain: vec![],
        });
        let peers: Vec<Arc<dyn SyncPeer>> = vec![peer];
        let appended = catchup(&store, &pks, &genesis, &peers).await.unwrap();
        assert_eq!(appended, 0);
    }
}
