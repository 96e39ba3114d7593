// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Drives the cryptographic DKG protocol once a record reaches `Executing`
//! (`spec.md §4.2`). Instantiates `bls_dkg::key_gen::KeyGen` the way the
//! teacher's `DkgVoter::start` does, and advances it through
//! `deal -> response -> justification -> finish` on a bounded timer.

use super::broadcast::{BroadcastChannel, InboundReceivers};
use super::packet::PacketKind;
use super::Error;
use bls_dkg::key_gen::{message::Message as DkgMessage, KeyGen};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, trace};
use xor_name::XorName;

/// Phase of the time-phaser (`spec.md §4.2`).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Phase {
    Deal,
    Response,
    Justification,
    Finish,
}

/// Drives phase transitions at bounded intervals, independent of how many
/// messages have arrived — matching the teacher's reliance on a timer
/// token (`routing/dkg/voter.rs`, `handle_timeout`) rather than message
/// counting to advance a DKG session.
pub struct Phaser {
    phase: Phase,
    phase_started: Instant,
    phase_duration: Duration,
}

impl Phaser {
    pub fn new(phase_duration: Duration) -> Self {
        Self {
            phase: Phase::Deal,
            phase_started: Instant::now(),
            phase_duration,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Advances to the next phase if `phase_duration` has elapsed since the
    /// last transition. Returns `true` if a transition happened.
    pub fn maybe_advance(&mut self) -> bool {
        if self.phase == Phase::Finish || self.phase_started.elapsed() < self.phase_duration {
            return false;
        }
        self.phase = match self.phase {
            Phase::Deal => Phase::Response,
            Phase::Response => Phase::Justification,
            Phase::Justification => Phase::Finish,
            Phase::Finish => Phase::Finish,
        };
        self.phase_started = Instant::now();
        true
    }
}

/// Output of a completed DKG run: this node's share and the qualified set
/// of participant addresses (`spec.md §4.2`).
pub struct DkgOutcome {
    pub share: bls::SecretKeyShare,
    pub public_key_set: bls::PublicKeySet,
    pub index: usize,
    pub qualified: BTreeSet<String>,
}

fn to_xor_name(address: &str) -> XorName {
    XorName::from_content(address.as_bytes())
}

/// Wraps `bls_dkg::key_gen::KeyGen` for one execution of the protocol.
pub struct Executor {
    key_gen: KeyGen,
    name_by_address: std::collections::BTreeMap<XorName, String>,
    self_address: String,
    phaser: Phaser,
}

impl Executor {
    /// Initializes the underlying key generator for `participants`
    /// (joining ∪ remaining), mirroring `KeyGen::initialize` in
    /// `routing/dkg/voter.rs`.
    pub fn initialize(
        self_address: String,
        threshold: usize,
        participants: &BTreeSet<String>,
        phase_duration: Duration,
    ) -> Result<(Self, DkgMessage), Error> {
        let name = to_xor_name(&self_address);
        let mut name_by_address = std::collections::BTreeMap::new();
        let mut xor_participants = BTreeSet::new();
        for address in participants {
            let xor = to_xor_name(address);
            name_by_address.insert(xor, address.clone());
            xor_participants.insert(xor);
        }

        let (key_gen, initial_message) = KeyGen::initialize(name, threshold, xor_participants)
            .map_err(|e| Error::UnexpectedError(format!("dkg init failed: {:?}", e)))?;

        Ok((
            Self {
                key_gen,
                name_by_address,
                self_address,
                phaser: Phaser::new(phase_duration),
            },
            initial_message,
        ))
    }

    pub fn phase(&self) -> Phase {
        self.phaser.phase()
    }

    fn kind_for_phase(phase: Phase) -> PacketKind {
        match phase {
            Phase::Deal => PacketKind::Deal,
            Phase::Response => PacketKind::Response,
            Phase::Justification | Phase::Finish => PacketKind::Justification,
        }
    }

    /// Pushes `message` (our own, or one produced while processing a peer's
    /// message) onto the broadcast channel tagged with the current phase.
    async fn push_message(&self, channel: &BroadcastChannel, message: &DkgMessage) -> Result<(), Error> {
        let payload = bincode::serialize(message)
            .map_err(|e| Error::UnexpectedError(format!("encode dkg message: {}", e)))?;
        let kind = Self::kind_for_phase(self.phaser.phase());
        channel
            .push(kind, payload)
            .await
            .map_err(|e| Error::UnexpectedError(format!("broadcast push failed: {:?}", e)))
    }

    /// Broadcasts the message produced by `initialize`.
    pub async fn start(&self, channel: &BroadcastChannel, initial_message: DkgMessage) -> Result<(), Error> {
        self.push_message(channel, &initial_message).await
    }

    /// Decodes and feeds one received bundle payload into the key generator,
    /// pushing any resulting response messages back onto the channel.
    async fn handle_payload(&mut self, channel: &BroadcastChannel, payload: &[u8]) -> Result<(), Error> {
        let message: DkgMessage = bincode::deserialize(payload)
            .map_err(|e| Error::UnexpectedError(format!("decode dkg message: {}", e)))?;
        let mut rng = rand::thread_rng();
        match self.key_gen.handle_message(&mut rng, message) {
            Ok(responses) => {
                for response in responses {
                    self.push_message(channel, &response).await?;
                }
                Ok(())
            }
            Err(error) => {
                trace!("dkg message rejected: {:?}", error);
                Ok(())
            }
        }
    }

    /// Drains one inbound queue matching the current phase and drives the
    /// phaser; returns `Some(outcome)` once the protocol has completed.
    pub async fn step(
        &mut self,
        channel: &BroadcastChannel,
        inbound: &mut InboundReceivers,
    ) -> Result<Option<DkgOutcome>, Error> {
        self.phaser.maybe_advance();

        let received = match self.phaser.phase() {
            Phase::Deal => inbound.deals.try_recv().ok(),
            Phase::Response => inbound.responses.try_recv().ok(),
            Phase::Justification | Phase::Finish => inbound.justifications.try_recv().ok(),
        };

        if let Some(bundle) = received {
            self.handle_payload(channel, &bundle.payload).await?;
        }

        if self.phaser.phase() != Phase::Finish {
            return Ok(None);
        }

        match self.key_gen.generate_keys() {
            Some((names, outcome)) => {
                let index = self
                    .name_by_address
                    .keys()
                    .position(|n| *n == to_xor_name(&self.self_address))
                    .unwrap_or(0);
                let qualified = names.iter().map(|n| self.resolve(*n)).collect();
                info!("dkg completed for {}", self.self_address);
                Ok(Some(DkgOutcome {
                    share: outcome.secret_key_share,
                    public_key_set: outcome.public_key_set,
                    index,
                    qualified,
                }))
            }
            None => {
                error!("dkg did not qualify any participants");
                Err(Error::UnexpectedError("dkg qualification failed".to_string()))
            }
        }
    }

    fn resolve(&self, name: XorName) -> String {
        self.name_by_address
            .get(&name)
            .cloned()
            .unwrap_or_else(|| hex::encode(name.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phaser_advances_after_duration_elapses() {
        let mut phaser = Phaser::new(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(phaser.maybe_advance());
        assert_eq!(phaser.phase(), Phase::Response);
    }

    #[test]
    fn phaser_does_not_advance_past_finish() {
        let mut phaser = Phaser::new(Duration::from_millis(1));
        for _ in 0..4 {
            std::thread::sleep(Duration::from_millis(2));
            phaser.maybe_advance();
        }
        assert_eq!(phaser.phase(), Phase::Finish);
        std::thread::sleep(Duration::from_millis(2));
        assert!(!phaser.maybe_advance());
    }
}
