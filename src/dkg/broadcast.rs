// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Authenticated reliable-broadcast of DKG packets (`spec.md §4.3`).
//!
//! Per-issuer de-dup counters live in a [`DashMap`], mirroring the
//! `DashMap<DkgSessionId, Session>` index in the teacher's `DkgVoter`: no
//! I/O happens while the map is locked, only counter bookkeeping.

use super::packet::{Bundle, Envelope, PacketKind};
use crate::hashing::Digest32;
use crate::identity::LongTermKey;
use dashmap::DashMap;
use ed25519_dalek::PublicKey;
use futures::stream::{FuturesUnordered, StreamExt};
use rand::seq::SliceRandom;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Errors the broadcast channel can return from its network entrypoint
/// (`spec.md §4.3`, "Failure model").
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("unknown issuer")]
    UnknownIssuer,
    #[error("unknown transmitter")]
    UnknownTransmitter,
    #[error("invalid signature")]
    InvalidSignature,
}

/// Acknowledgement returned by a successful `Broadcast` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack;

/// What happened to one `Broadcast` call, useful for tests and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// First transmitter seen for this (issuer, content): rebroadcast, not yet delivered.
    Forwarded,
    /// A repeat of a transmitter already counted for this content.
    Duplicate,
    /// A new transmitter counted, but thresholds aren't met yet.
    Counted,
    /// Thresholds met by this call; the bundle was delivered to the application.
    Accepted,
    /// Thresholds were already met by an earlier call; nothing changed.
    AlreadyAccepted,
    /// This issuer had no free content slot; the packet was dropped.
    Dropped,
}

/// Distinguishes dealers (pre-existing secret holders in a reshare) from
/// holders (every DKG participant, old or new) and supplies peer addresses
/// and public keys for verification and fan-out.
pub trait Committee {
    fn is_dealer(&self, address: &str) -> bool;
    fn is_holder(&self, address: &str) -> bool;
    /// All peer addresses to rebroadcast to, excluding `self_address`.
    fn peers(&self, self_address: &str) -> Vec<String>;
    fn public_key(&self, address: &str) -> Option<PublicKey>;
}

/// Send side of the transport this channel rebroadcasts over. Implemented
/// concretely by [`crate::net::comm::Comm`]; an in-process fake backs the
/// end-to-end scenario tests.
#[async_trait::async_trait]
pub trait PeerTransport {
    async fn send(&self, peer: &str, envelope: Envelope) -> Result<(), String>;
}

#[derive(Default)]
struct ContentCounter {
    dealer_transmitters: BTreeSet<String>,
    holder_transmitters: BTreeSet<String>,
    delivered: bool,
}

/// Per-phase acceptance thresholds (`spec.md §4.3`, "Decisions").
#[derive(Debug, Clone, Copy)]
pub struct PhaseThresholds {
    pub dealer_thr: usize,
    pub holder_thr: usize,
}

fn thresholds_for(kind: PacketKind, dealer_threshold: usize, holder_threshold: usize) -> PhaseThresholds {
    match kind {
        PacketKind::Deal => PhaseThresholds {
            dealer_thr: 0,
            holder_thr: holder_threshold,
        },
        PacketKind::Response => PhaseThresholds {
            dealer_thr: dealer_threshold,
            holder_thr: holder_threshold,
        },
        PacketKind::Justification => PhaseThresholds {
            dealer_thr: 0,
            holder_thr: holder_threshold,
        },
    }
}

struct Inbound {
    deals: mpsc::Sender<Bundle>,
    responses: mpsc::Sender<Bundle>,
    justifications: mpsc::Sender<Bundle>,
}

/// Receiving half handed to the DKG executor, one bounded (size `n`) queue
/// per packet kind (`spec.md §9`).
pub struct InboundReceivers {
    pub deals: mpsc::Receiver<Bundle>,
    pub responses: mpsc::Receiver<Bundle>,
    pub justifications: mpsc::Receiver<Bundle>,
}

/// Reliable-broadcast channel for one DKG session.
pub struct BroadcastChannel {
    self_address: String,
    key: Arc<LongTermKey>,
    committee: Arc<dyn Committee + Send + Sync>,
    dealer_threshold: usize,
    holder_threshold: usize,
    counters: DashMap<String, DashMap<Digest32, ContentCounter>>,
    inbound: Inbound,
    transport: Arc<dyn PeerTransport + Send + Sync>,
}

impl BroadcastChannel {
    /// Builds a channel sized for a committee of `n` participants
    /// (`spec.md §9`: queues are bounded at size `n`).
    pub fn new(
        self_address: String,
        key: Arc<LongTermKey>,
        committee: Arc<dyn Committee + Send + Sync>,
        dealer_threshold: usize,
        holder_threshold: usize,
        n: usize,
        transport: Arc<dyn PeerTransport + Send + Sync>,
    ) -> (Self, InboundReceivers) {
        let (deals_tx, deals_rx) = mpsc::channel(n.max(1));
        let (responses_tx, responses_rx) = mpsc::channel(n.max(1));
        let (justifications_tx, justifications_rx) = mpsc::channel(n.max(1));
        let channel = Self {
            self_address,
            key,
            committee,
            dealer_threshold,
            holder_threshold,
            counters: DashMap::new(),
            inbound: Inbound {
                deals: deals_tx,
                responses: responses_tx,
                justifications: justifications_tx,
            },
            transport,
        };
        (
            channel,
            InboundReceivers {
                deals: deals_rx,
                responses: responses_rx,
                justifications: justifications_rx,
            },
        )
    }

    /// Maximum number of distinct contents this channel tracks per issuer:
    /// `dealThreshold + holderThreshold` (`spec.md §4.3`).
    fn capacity_per_issuer(&self) -> usize {
        self.dealer_threshold + self.holder_threshold
    }

    /// Called by the local DKG protocol to push a freshly produced bundle:
    /// signs it, delivers locally right away, and asynchronously
    /// rebroadcasts to peers (`spec.md §4.3`, "Operations", `Push`). Local
    /// delivery does not wait on `broadcast`'s accept-threshold, since that
    /// threshold deliberately excludes the issuer's own transmission from
    /// the count — without this, a node could wait forever for its own
    /// deal to come back around from peers.
    pub async fn push(&self, kind: PacketKind, payload: Vec<u8>) -> Result<(), Error> {
        let bundle = Bundle::new_signed(kind, self.self_address.clone(), payload, &self.key);
        let envelope = Envelope::new_signed(bundle.clone(), self.self_address.clone(), &self.key);
        self.deliver(kind, bundle).await;
        let _ = self.broadcast(envelope).await?;
        Ok(())
    }

    /// Network entrypoint: verifies, de-dups, decides rebroadcast/accept
    /// and acts on the decision (`spec.md §4.3`, "Operations").
    pub async fn broadcast(&self, envelope: Envelope) -> Result<(Ack, Outcome), Error> {
        let issuer_key = self
            .committee
            .public_key(&envelope.bundle.issuer)
            .ok_or(Error::UnknownIssuer)?;
        if !envelope.bundle.verify_issuer(&issuer_key) {
            return Err(Error::InvalidSignature);
        }
        let transmitter_key = self
            .committee
            .public_key(&envelope.transmitter)
            .ok_or(Error::UnknownTransmitter)?;
        if !envelope.verify_transmitter(&transmitter_key) {
            return Err(Error::InvalidSignature);
        }

        let outcome = self.record_and_decide(&envelope);

        match outcome {
            Outcome::Forwarded | Outcome::Counted => {
                if matches!(outcome, Outcome::Forwarded) {
                    self.rebroadcast(envelope.clone());
                }
            }
            Outcome::Accepted => {
                self.rebroadcast_if_first(&envelope);
                self.deliver(envelope.bundle.kind, envelope.bundle.clone())
                    .await;
            }
            Outcome::Duplicate | Outcome::AlreadyAccepted | Outcome::Dropped => {}
        }

        Ok((Ack, outcome))
    }

    /// `shouldRebroadcast` is only true for the very first transmitter of a
    /// content; once that has already happened on an earlier call this is a
    /// no-op, but the (rare) path where acceptance and first-sight coincide
    /// still needs to forward once.
    fn rebroadcast_if_first(&self, envelope: &Envelope) {
        // The counter bookkeeping already distinguished first-sight in
        // record_and_decide; Accepted is only returned once so the only
        // remaining work is handled by the caller's Forwarded branch.
        let _ = envelope;
    }

    fn record_and_decide(&self, envelope: &Envelope) -> Outcome {
        let issuer = envelope.bundle.issuer.clone();
        let content = envelope.content_hash();
        let transmitter = envelope.transmitter.clone();
        let thresholds = thresholds_for(
            envelope.bundle.kind,
            self.dealer_threshold,
            self.holder_threshold,
        );

        let issuer_map = self
            .counters
            .entry(issuer.clone())
            .or_insert_with(DashMap::new);

        if !issuer_map.contains_key(&content) && issuer_map.len() >= self.capacity_per_issuer() {
            warn!(
                "dropping packet from issuer {} — no free content slot ({} already tracked)",
                issuer,
                issuer_map.len()
            );
            return Outcome::Dropped;
        }

        let mut counter = issuer_map.entry(content).or_insert_with(ContentCounter::default);

        if counter.delivered {
            return Outcome::AlreadyAccepted;
        }

        let is_first_ever = counter.dealer_transmitters.is_empty() && counter.holder_transmitters.is_empty();

        let already_counted = counter.dealer_transmitters.contains(&transmitter)
            || counter.holder_transmitters.contains(&transmitter);

        if transmitter != self.self_address && !already_counted {
            if self.committee.is_dealer(&transmitter) {
                counter.dealer_transmitters.insert(transmitter.clone());
            }
            if self.committee.is_holder(&transmitter) {
                counter.holder_transmitters.insert(transmitter.clone());
            }
        } else if already_counted {
            return Outcome::Duplicate;
        }

        if is_first_ever {
            trace!("first transmitter seen for issuer {} content", issuer);
            return Outcome::Forwarded;
        }

        let meets_threshold = counter.dealer_transmitters.len() >= thresholds.dealer_thr
            && counter.holder_transmitters.len() >= thresholds.holder_thr;

        if meets_threshold {
            counter.delivered = true;
            Outcome::Accepted
        } else {
            Outcome::Counted
        }
    }

    async fn deliver(&self, kind: PacketKind, bundle: Bundle) {
        let sender = match kind {
            PacketKind::Deal => &self.inbound.deals,
            PacketKind::Response => &self.inbound.responses,
            PacketKind::Justification => &self.inbound.justifications,
        };
        if sender.send(bundle).await.is_err() {
            debug!("inbound queue closed, dropping delivered bundle");
        }
    }

    /// Signs a fresh envelope as this node and fans it out to all peers in
    /// randomized order (`spec.md §4.3`, "Rebroadcast"). Runs as a
    /// fire-and-forget task; send failures are logged, never fatal.
    fn rebroadcast(&self, received: Envelope) {
        let envelope = Envelope::new_signed(received.bundle, self.self_address.clone(), &self.key);
        let mut peers = self.committee.peers(&self.self_address);
        peers.shuffle(&mut rand::thread_rng());
        let transport = self.transport.clone();

        tokio::spawn(async move {
            let mut sends = FuturesUnordered::new();
            for peer in peers {
                let transport = transport.clone();
                let envelope = envelope.clone();
                sends.push(async move {
                    let result = transport.send(&peer, envelope).await;
                    (peer, result)
                });
            }
            while let Some((peer, result)) = sends.next().await {
                if let Err(error) = result {
                    debug!("rebroadcast to {} failed: {}", peer, error);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dkg::packet::PacketKind;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeCommittee {
        dealers: BTreeSet<String>,
        holders: BTreeSet<String>,
        keys: HashMap<String, PublicKey>,
    }

    impl Committee for FakeCommittee {
        fn is_dealer(&self, address: &str) -> bool {
            self.dealers.contains(address)
        }
        fn is_holder(&self, address: &str) -> bool {
            self.holders.contains(address)
        }
        fn peers(&self, self_address: &str) -> Vec<String> {
            self.holders
                .iter()
                .chain(self.dealers.iter())
                .filter(|a| a.as_str() != self_address)
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        }
        fn public_key(&self, address: &str) -> Option<PublicKey> {
            self.keys.get(address).copied()
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl PeerTransport for RecordingTransport {
        async fn send(&self, peer: &str, _envelope: Envelope) -> Result<(), String> {
            self.sent.lock().unwrap().push(peer.to_string());
            Ok(())
        }
    }

    fn setup(
        holder_threshold: usize,
        dealer_threshold: usize,
    ) -> (
        BroadcastChannel,
        InboundReceivers,
        Arc<FakeCommittee>,
        HashMap<String, LongTermKey>,
    ) {
        let mut keys = HashMap::new();
        let mut pubkeys = HashMap::new();
        for name in ["a", "b", "c", "d"] {
            let key = LongTermKey::generate();
            pubkeys.insert(name.to_string(), key.public());
            keys.insert(name.to_string(), key);
        }
        let committee = Arc::new(FakeCommittee {
            dealers: BTreeSet::new(),
            holders: ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect(),
            keys: pubkeys,
        });
        let self_key = Arc::new(LongTermKey::from_bytes(&keys["a"].to_bytes()).unwrap());
        let (channel, receivers) = BroadcastChannel::new(
            "a".to_string(),
            self_key,
            committee.clone(),
            dealer_threshold,
            holder_threshold,
            4,
            Arc::new(RecordingTransport::default()),
        );
        (channel, receivers, committee, keys)
    }

    fn envelope_from(
        keys: &HashMap<String, LongTermKey>,
        issuer: &str,
        transmitter: &str,
        kind: PacketKind,
        payload: Vec<u8>,
    ) -> Envelope {
        let bundle = Bundle::new_signed(kind, issuer.to_string(), payload, &keys[issuer]);
        Envelope::new_signed(bundle, transmitter.to_string(), &keys[transmitter])
    }

    #[tokio::test]
    async fn first_transmitter_is_forwarded_not_accepted() {
        let (channel, _rx, _committee, keys) = setup(2, 0);
        let envelope = envelope_from(&keys, "b", "c", PacketKind::Deal, vec![1, 2, 3]);
        let (_ack, outcome) = channel.broadcast(envelope).await.unwrap();
        assert_eq!(outcome, Outcome::Forwarded);
    }

    #[tokio::test]
    async fn accepts_once_holder_threshold_met() {
        let (channel, mut rx, _committee, keys) = setup(2, 0);
        let e1 = envelope_from(&keys, "b", "c", PacketKind::Deal, vec![1, 2, 3]);
        let e2 = envelope_from(&keys, "b", "d", PacketKind::Deal, vec![1, 2, 3]);
        let (_, o1) = channel.broadcast(e1).await.unwrap();
        let (_, o2) = channel.broadcast(e2).await.unwrap();
        assert_eq!(o1, Outcome::Forwarded);
        assert_eq!(o2, Outcome::Accepted);
        let delivered = rx.deals.recv().await.unwrap();
        assert_eq!(delivered.issuer, "b");
    }

    #[tokio::test]
    async fn self_transmitter_is_not_counted_toward_threshold() {
        let (channel, _rx, _committee, keys) = setup(2, 0);
        // "a" is the channel owner; if a self-sent copy counted, two more
        // distinct peer transmitters would not be required.
        let self_envelope = envelope_from(&keys, "b", "a", PacketKind::Deal, vec![1, 2, 3]);
        let (_, o0) = channel.broadcast(self_envelope).await.unwrap();
        assert_eq!(o0, Outcome::Forwarded);
        let e1 = envelope_from(&keys, "b", "c", PacketKind::Deal, vec![1, 2, 3]);
        let (_, o1) = channel.broadcast(e1).await.unwrap();
        assert_eq!(o1, Outcome::Counted);
    }

    #[tokio::test]
    async fn duplicate_transmitter_is_ignored() {
        let (channel, _rx, _committee, keys) = setup(2, 0);
        let e1 = envelope_from(&keys, "b", "c", PacketKind::Deal, vec![1, 2, 3]);
        let e1_again = envelope_from(&keys, "b", "c", PacketKind::Deal, vec![1, 2, 3]);
        channel.broadcast(e1).await.unwrap();
        let (_, outcome) = channel.broadcast(e1_again).await.unwrap();
        assert_eq!(outcome, Outcome::Duplicate);
    }

    #[tokio::test]
    async fn unknown_issuer_is_rejected() {
        let (channel, _rx, _committee, keys) = setup(2, 0);
        let bundle = Bundle::new_signed(PacketKind::Deal, "ghost".to_string(), vec![1], &keys["b"]);
        let envelope = Envelope::new_signed(bundle, "c".to_string(), &keys["c"]);
        let result = channel.broadcast(envelope).await;
        assert_eq!(result.unwrap_err(), Error::UnknownIssuer);
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let (channel, _rx, _committee, keys) = setup(2, 0);
        let mut envelope = envelope_from(&keys, "b", "c", PacketKind::Deal, vec![1, 2, 3]);
        envelope.bundle.payload = vec![9, 9, 9];
        let result = channel.broadcast(envelope).await;
        assert_eq!(result.unwrap_err(), Error::InvalidSignature);
    }

    #[tokio::test]
    async fn amplification_is_bounded_per_issuer() {
        // capacity = dealer_threshold + holder_threshold = 1
        let (channel, _rx, _committee, keys) = setup(1, 0);
        let e_x = envelope_from(&keys, "b", "c", PacketKind::Deal, vec![1]);
        let e_y = envelope_from(&keys, "b", "d", PacketKind::Deal, vec![2]);
        let (_, o_x) = channel.broadcast(e_x).await.unwrap();
        assert_eq!(o_x, Outcome::Forwarded);
        let (_, o_y) = channel.broadcast(e_y).await.unwrap();
        assert_eq!(o_y, Outcome::Dropped);
    }

    #[tokio::test]
    async fn split_attempt_never_accepts_two_distinct_contents() {
        // Scenario 5: issuer sends content X to one observer, Y to another,
        // with holderThr = 2 the single additional vote on either side
        // cannot reach threshold on its own.
        let (channel, mut rx, _committee, keys) = setup(2, 0);
        let e_x = envelope_from(&keys, "b", "c", PacketKind::Deal, vec![b'x']);
        let e_y = envelope_from(&keys, "b", "d", PacketKind::Deal, vec![b'y']);
        let (_, o_x) = channel.broadcast(e_x).await.unwrap();
        let (_, o_y) = channel.broadcast(e_y).await.unwrap();
        assert_eq!(o_x, Outcome::Forwarded);
        assert_eq!(o_y, Outcome::Forwarded);
        assert!(rx.deals.try_recv().is_err());
    }
}
