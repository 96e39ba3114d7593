// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Round scheduling, partial signing, and aggregation (`spec.md §4.4`).
//! Wires the group's threshold public key set over an injectable clock the
//! same way the teacher keeps timing out of `routing::dkg::voter` and
//! behind a trait so tests don't sleep real wall-clock seconds.

use super::cache::PartialCache;
use super::chain_store::ChainStore;
use super::types::{Beacon, PartialBeacon};
use super::Error;
use crate::group::Group;
use std::convert::TryInto;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Abstraction over wall-clock time so round scheduling is deterministic in
/// tests (`spec.md §4.4`, "scheduling against an injectable clock").
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Receives every beacon this node finalizes, fanning it out to local
/// subscribers (`spec.md §2`, the callback/streaming component).
pub trait BeaconCallback: Send + Sync {
    fn on_beacon(&self, beacon: &Beacon);
}

/// Computes the round due at `now`, given a genesis time and period
/// (`spec.md §4.4`). Round 0 is the genesis beacon itself; round 1 is due
/// at `genesis_time + period`.
pub fn current_round(genesis_time: u64, period: Duration, now: u64) -> u64 {
    if now <= genesis_time {
        return 0;
    }
    let elapsed = now - genesis_time;
    elapsed / period.as_secs().max(1) + 1
}

/// Round production and chain-append engine for one beacon (`spec.md §4.4`).
///
/// The full threshold `PublicKeySet` (needed to verify individual partials
/// via `public_key_share(index)`) is kept here rather than on [`Group`]:
/// `blsttc` doesn't expose polynomial coefficients, so the persisted/wire
/// `Group` only ever carries the master public key (`group::DistPublicKey`).
pub struct BeaconHandler {
    beacon_id: String,
    group: Group,
    public_key_set: bls::PublicKeySet,
    self_index: usize,
    share: bls::SecretKeyShare,
    clock: Arc<dyn Clock>,
    store: Arc<dyn ChainStore>,
    cache: PartialCache,
    callbacks: std::sync::Mutex<Vec<Arc<dyn BeaconCallback>>>,
    last_round_started: AtomicU64,
    /// How many rounds ahead of "due" a partial may still be accepted for
    /// (`spec.md §4.4`, catchup horizon bound against amplification).
    catchup_horizon: u64,
}

impl BeaconHandler {
    pub fn new(
        beacon_id: String,
        group: Group,
        public_key_set: bls::PublicKeySet,
        self_index: usize,
        share: bls::SecretKeyShare,
        clock: Arc<dyn Clock>,
        store: Arc<dyn ChainStore>,
        catchup_horizon: u64,
    ) -> Self {
        Self {
            beacon_id,
            group,
            public_key_set,
            self_index,
            share,
            clock,
            store,
            cache: PartialCache::new(),
            callbacks: std::sync::Mutex::new(Vec::new()),
            last_round_started: AtomicU64::new(0),
            catchup_horizon,
        }
    }

    pub fn beacon_id(&self) -> &str {
        &self.beacon_id
    }

    /// The chain store this handler appends finalized rounds to, for
    /// callers driving catchup (`spec.md §4.6`) against it directly.
    pub fn store(&self) -> Arc<dyn ChainStore> {
        self.store.clone()
    }

    /// The full threshold public key set, needed to verify a sync peer's
    /// beacons before appending them (`spec.md §4.6`).
    pub fn public_key_set(&self) -> &bls::PublicKeySet {
        &self.public_key_set
    }

    pub fn subscribe(&self, callback: Arc<dyn BeaconCallback>) {
        self.callbacks.lock().unwrap().push(callback);
    }

    fn notify(&self, beacon: &Beacon) {
        for callback in self.callbacks.lock().unwrap().iter() {
            callback.on_beacon(beacon);
        }
    }

    /// The round currently due, per the injected clock (`spec.md §4.4`).
    pub fn due_round(&self) -> u64 {
        current_round(
            self.group.genesis_time,
            Duration::from_secs(self.group.period_secs as u64),
            self.clock.now_unix(),
        )
    }

    /// Signs this node's partial for `round`, building on `previous`.
    /// Caches it locally but does not broadcast — the caller (daemon
    /// process loop) owns the transport (`spec.md §6`).
    pub fn start_round(&self, round: u64, previous: &Beacon) -> Result<PartialBeacon, Error> {
        if round != previous.round + 1 {
            return Err(Error::NonSequentialRound {
                last: previous.round,
                attempted: round,
            });
        }
        let message = crate::hashing::round_message(&previous.signature, round);
        let signature = self.share.sign(&message);
        let partial = PartialBeacon {
            round,
            previous_signature: previous.signature.clone(),
            partial_signature: signature.to_bytes().to_vec(),
            index: self.self_index,
        };
        self.cache.insert(partial.clone())?;
        self.last_round_started.store(round, Ordering::SeqCst);
        debug!(beacon = %self.beacon_id, round, "started round");
        Ok(partial)
    }

    /// Validates and caches a peer's partial, reconstructing and appending
    /// the round's beacon once `threshold` distinct partials agree
    /// (`spec.md §4.4`-`§4.5`).
    pub fn handle_partial(&self, partial: PartialBeacon) -> Result<Option<Beacon>, Error> {
        let due = self.due_round();
        if partial.round > due + self.catchup_horizon {
            return Err(Error::BeyondHorizon {
                round: partial.round,
                horizon: self.catchup_horizon,
            });
        }
        if let Some(last) = self.store.last()? {
            if partial.round <= last.round {
                return Err(Error::RoundAlreadyFinalized { round: partial.round });
            }
        }

        // Cross-check against the canonical chain, not just against other
        // partials for the same round (`PartialCache::insert` only catches
        // disagreement within one round's partials): an equivocating
        // quorum that agrees among itself on a stale or forked
        // previous_signature must not be allowed to fork the chain.
        if let Some(canonical_previous) = self.store.get(partial.round.saturating_sub(1))? {
            if partial.previous_signature != canonical_previous.signature {
                return Err(Error::PreviousSignatureMismatch { round: partial.round });
            }
        }

        let share_key = self.public_key_set.public_key_share(partial.index);
        let message = crate::hashing::round_message(&partial.previous_signature, partial.round);
        let partial_signature_bytes: [u8; bls::SIG_SIZE] = partial
            .partial_signature
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidSignature(partial.round))?;
        let signature = bls::SignatureShare::from_bytes(partial_signature_bytes)
            .map_err(|_| Error::InvalidSignature(partial.round))?;
        if !share_key.verify(&signature, &message) {
            warn!(beacon = %self.beacon_id, round = partial.round, issuer = partial.index, "rejected invalid partial");
            return Err(Error::InvalidSignature(partial.round));
        }

        let round = partial.round;
        let previous_signature = partial.previous_signature.clone();
        self.cache.insert(partial)?;

        if self.cache.count(round) < self.group.threshold {
            return Ok(None);
        }

        let partials = self.cache.drain(round);
        let shares: Vec<(usize, bls::SignatureShare)> = partials
            .iter()
            .map(|p| {
                let bytes: [u8; bls::SIG_SIZE] = p
                    .partial_signature
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::InvalidSignature(round))?;
                Ok((
                    p.index,
                    bls::SignatureShare::from_bytes(bytes)
                        .map_err(|_| Error::InvalidSignature(round))?,
                ))
            })
            .collect::<Result<_, Error>>()?;
        let shares_ref: Vec<(usize, &bls::SignatureShare)> =
            shares.iter().map(|(i, s)| (*i, s)).collect();

        let combined = self
            .public_key_set
            .combine_signatures(shares_ref)
            .map_err(|_| Error::InsufficientPartials)?;

        if !self
            .public_key_set
            .public_key()
            .verify(&combined, message_bytes(&previous_signature, round))
        {
            return Err(Error::InvalidSignature(round));
        }

        let beacon = Beacon {
            round,
            previous_signature,
            signature: combined.to_bytes().to_vec(),
        };
        self.store.put(beacon.clone())?;
        self.cache.prune_below(round + 1);
        info!(beacon = %self.beacon_id, round, "beacon finalized");
        self.notify(&beacon);
        Ok(Some(beacon))
    }
}

fn message_bytes(previous_signature: &[u8], round: u64) -> Vec<u8> {
    crate::hashing::round_message(previous_signature, round).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::chain_store::MemoryChainStore;
    use crate::group::Group;
    use bls::SecretKeySet;

    struct FixedClock(std::sync::atomic::AtomicU64);

    impl Clock for FixedClock {
        fn now_unix(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn harness(n: usize, t: usize) -> (Group, Vec<bls::SecretKeyShare>, bls::PublicKeySet) {
        use crate::identity::{LongTermKey, Participant};

        let mut rng = rand::thread_rng();
        let sks = SecretKeySet::random(t - 1, &mut rng);
        let pks = sks.public_keys();
        let shares: Vec<_> = (0..n).map(|i| sks.secret_key_share(i)).collect();
        let nodes = (0..n)
            .map(|i| {
                let key = LongTermKey::generate();
                Participant::new_self_signed(format!("node-{}", i), false, &key)
            })
            .collect();
        let group = Group::new(
            nodes,
            t,
            30,
            60,
            1_700_000_000,
            None,
            vec![9, 9, 9],
            "bls-unchained".into(),
        )
        .unwrap();
        (group, shares, pks)
    }

    #[test]
    fn due_round_is_zero_before_genesis() {
        let (group, shares, pks) = harness(5, 4);
        let clock = Arc::new(FixedClock(std::sync::atomic::AtomicU64::new(1_700_000_000)));
        let store = Arc::new(MemoryChainStore::new());
        let handler = BeaconHandler::new(
            "beacon".into(),
            group,
            pks,
            0,
            shares[0].clone(),
            clock,
            store,
            100,
        );
        assert_eq!(handler.due_round(), 0);
    }

    #[test]
    fn quorum_of_partials_finalizes_round() {
        let (group, shares, pks) = harness(5, 4);
        let genesis = Beacon::genesis(vec![9, 9, 9]);
        let clock = Arc::new(FixedClock(std::sync::atomic::AtomicU64::new(1_700_000_030)));
        let store = Arc::new(MemoryChainStore::new());
        store.put(genesis.clone()).unwrap();

        let handlers: Vec<_> = (0..5)
            .map(|i| {
                BeaconHandler::new(
                    "beacon".into(),
                    group.clone(),
                    pks.clone(),
                    i,
                    shares[i].clone(),
                    clock.clone() as Arc<dyn Clock>,
                    store.clone() as Arc<dyn ChainStore>,
                    100,
                )
            })
            .collect();

        // Threshold is 4 of 5; handler 3 collects partials from the other
        // four and finalizes on the fourth one received.
        let p0 = handlers[0].start_round(1, &genesis).unwrap();
        let p1 = handlers[1].start_round(1, &genesis).unwrap();
        let p2 = handlers[2].start_round(1, &genesis).unwrap();
        let p4 = handlers[4].start_round(1, &genesis).unwrap();

        assert!(handlers[3].handle_partial(p0).unwrap().is_none());
        assert!(handlers[3].handle_partial(p1).unwrap().is_none());
        assert!(handlers[3].handle_partial(p2).unwrap().is_none());
        let finalized = handlers[3].handle_partial(p4).unwrap().unwrap();
        assert_eq!(finalized.round, 1);
        let finalized_signature_bytes: [u8; bls::SIG_SIZE] =
            finalized.signature.as_slice().try_into().unwrap();
        assert!(pks.public_key().verify(
            &bls::Signature::from_bytes(finalized_signature_bytes).unwrap(),
            &finalized.message()
        ));
    }

    #[test]
    fn rejects_partial_for_already_finalized_round() {
        let (group, shares, pks) = harness(5, 4);
        let genesis = Beacon::genesis(vec![9, 9, 9]);
        let clock = Arc::new(FixedClock(std::sync::atomic::AtomicU64::new(1_700_000_030)));
        let store = Arc::new(MemoryChainStore::new());
        store.put(genesis.clone()).unwrap();
        store
            .put(Beacon {
                round: 1,
                previous_signature: genesis.signature.clone(),
                signature: vec![1],
            })
            .unwrap();

        let handler = BeaconHandler::new(
            "beacon".into(),
            group,
            pks,
            0,
            shares[0].clone(),
            clock,
            store,
            100,
        );
        let stale = PartialBeacon {
            round: 1,
            previous_signature: genesis.signature,
            partial_signature: vec![0],
            index: 1,
        };
        let err = handler.handle_partial(stale).unwrap_err();
        assert_eq!(err, Error::RoundAlreadyFinalized { round: 1 });
    }
}
