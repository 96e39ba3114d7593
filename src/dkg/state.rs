// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! The DKG lifecycle state machine core: pure functions over `DKGDetails`,
//! with no I/O (`spec.md §9`, "State machine as pure function"). The
//! persistence wrapper in [`super::store`] is the sole impure layer.

use super::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Tagged DKG lifecycle states (`spec.md §4.1`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum State {
    Fresh,
    Proposing,
    Proposed,
    Accepted,
    Rejected,
    Joined,
    Left,
    Executing,
    Complete,
    Aborted,
    TimedOut,
}

/// Returns whether `to` is a permitted next state from `from`, per the
/// transition table in `spec.md §4.1`.
pub fn allowed_transition(from: State, to: State) -> bool {
    use State::*;
    matches!(
        (from, to),
        (Fresh, Joined)
            | (Fresh, Proposing)
            | (Fresh, Proposed)
            | (Joined, Left)
            | (Joined, Executing)
            | (Joined, Aborted)
            | (Joined, TimedOut)
            | (Left, Joined)
            | (Left, Aborted)
            | (Proposing, Executing)
            | (Proposing, Aborted)
            | (Proposing, TimedOut)
            | (Proposed, Accepted)
            | (Proposed, Rejected)
            | (Proposed, Aborted)
            | (Proposed, TimedOut)
            | (Proposed, Left)
            | (Accepted, Executing)
            | (Accepted, Aborted)
            | (Accepted, TimedOut)
            | (Rejected, Aborted)
            | (Rejected, TimedOut)
            | (Executing, Complete)
            | (Executing, TimedOut)
            | (Complete, Proposing)
            | (Complete, Proposed)
            | (Aborted, Proposing)
            | (Aborted, Proposed)
            | (TimedOut, Proposing)
            | (TimedOut, Proposed)
    )
}

fn require_transition(from: State, to: State) -> Result<(), Error> {
    if allowed_transition(from, to) {
        Ok(())
    } else {
        Err(Error::InvalidStateChange { from, to })
    }
}

/// Per-beacon lifecycle record (`spec.md §3`, "DKGDetails").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DKGDetails {
    pub beacon_id: String,
    /// Monotonic, starts at 1.
    pub epoch: u32,
    pub state: State,
    pub threshold: usize,
    pub leader: String,
    pub remaining: BTreeSet<String>,
    pub joining: BTreeSet<String>,
    pub leaving: BTreeSet<String>,
    pub acceptors: BTreeSet<String>,
    pub rejectors: BTreeSet<String>,
    /// Set on `Complete`.
    pub final_group: Option<Vec<String>>,
    /// Unix time after which this record times out.
    pub deadline: u64,
}

/// The role a participant plays with respect to a freshly received proposal,
/// determining which state `Fresh` transitions to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProposalRole {
    Leader,
    /// In `Remaining` or in `Leaving`: both land in `Proposed` and diverge
    /// afterwards (vote, or acknowledge departure via the `Left` event).
    Voter,
    /// In `Joining`, of any epoch: opts in implicitly, no vote required.
    Joiner,
}

impl DKGDetails {
    /// A brand-new, not-yet-proposed record for `beacon_id`.
    pub fn fresh(beacon_id: String) -> Self {
        Self {
            beacon_id,
            epoch: 0,
            state: State::Fresh,
            threshold: 0,
            leader: String::new(),
            remaining: BTreeSet::new(),
            joining: BTreeSet::new(),
            leaving: BTreeSet::new(),
            acceptors: BTreeSet::new(),
            rejectors: BTreeSet::new(),
            final_group: None,
            deadline: 0,
        }
    }

    fn candidate_count(&self) -> usize {
        self.joining.len() + self.remaining.len()
    }

    /// Validates a proposal against the current record, per the six checks
    /// in `spec.md §4.1`. Does not mutate anything; callers use the result
    /// to decide whether to adopt `proposal` as the new current record.
    pub fn validate_proposal(
        current: &DKGDetails,
        proposal: &DKGDetails,
        previous_final_group: Option<&[String]>,
        now: u64,
    ) -> Result<(), Error> {
        if proposal.beacon_id != current.beacon_id {
            return Err(Error::InvalidBeaconID);
        }
        if proposal.deadline <= now {
            return Err(Error::TimeoutReached);
        }
        if proposal.threshold > proposal.candidate_count() {
            return Err(Error::ThresholdHigherThanNodeCount);
        }

        let epoch_exempt = matches!(current.state, State::Fresh | State::Left);
        if proposal.epoch <= current.epoch {
            return Err(Error::InvalidEpoch {
                proposed: proposal.epoch,
                current: current.epoch,
            });
        }
        if !epoch_exempt && proposal.epoch != current.epoch + 1 {
            return Err(Error::InvalidEpoch {
                proposed: proposal.epoch,
                current: current.epoch,
            });
        }

        if proposal.epoch == 1 {
            if !proposal.leaving.is_empty() || !proposal.remaining.is_empty() {
                return Err(Error::OnlyJoinersAllowedForFirstEpoch);
            }
            if !proposal.joining.contains(&proposal.leader) {
                return Err(Error::LeaderNotJoining);
            }
        } else {
            if !proposal.remaining.contains(&proposal.leader) {
                return Err(Error::LeaderNotRemaining);
            }
            if proposal.joining.contains(&proposal.leader)
                || proposal.leaving.contains(&proposal.leader)
            {
                return Err(Error::LeaderJoiningOrLeaving);
            }
            if proposal.remaining.is_empty() {
                return Err(Error::EmptyRemaining);
            }
            if let Some(prev_group) = previous_final_group {
                for member in &proposal.remaining {
                    if !prev_group.iter().any(|m| m == member) {
                        return Err(Error::NotInPreviousGroup(member.clone()));
                    }
                }
            }
        }

        Ok(())
    }

    /// Determines which role `self_address` plays in `proposal`, or `None`
    /// if it isn't a participant at all (the proposal is simply ignored).
    pub fn role_in(proposal: &DKGDetails, self_address: &str) -> Option<ProposalRole> {
        if proposal.leader == self_address {
            Some(ProposalRole::Leader)
        } else if proposal.remaining.contains(self_address)
            || proposal.leaving.contains(self_address)
        {
            Some(ProposalRole::Voter)
        } else if proposal.joining.contains(self_address) {
            Some(ProposalRole::Joiner)
        } else {
            None
        }
    }

    /// Adopts `proposal` as the new current record for this node, given its
    /// `role`. The resulting state is whichever `Fresh`-reachable state
    /// matches the role: `Proposing` for the leader, `Proposed` for voters
    /// (remaining or leaving), `Joined` for joiners of any epoch.
    pub fn adopt_proposal(proposal: &DKGDetails, role: ProposalRole) -> Result<DKGDetails, Error> {
        let target = match role {
            ProposalRole::Leader => State::Proposing,
            ProposalRole::Voter => State::Proposed,
            ProposalRole::Joiner => State::Joined,
        };
        require_transition(State::Fresh, target)?;
        let mut record = proposal.clone();
        record.state = target;
        Ok(record)
    }

    /// Re-proposes from a terminal state (`Complete`, `Aborted`, `TimedOut`).
    pub fn re_propose(
        current: &DKGDetails,
        proposal: &DKGDetails,
        role: ProposalRole,
    ) -> Result<DKGDetails, Error> {
        let target = match role {
            ProposalRole::Leader => State::Proposing,
            ProposalRole::Voter => State::Proposed,
            ProposalRole::Joiner => {
                // The transition table only allows re-proposals to land in
                // Proposing/Proposed; a fresh committee bootstrap (the only
                // case producing Joiners) never starts from a terminal state.
                return Err(Error::InvalidStateChange {
                    from: current.state,
                    to: State::Joined,
                });
            }
        };
        require_transition(current.state, target)?;
        let mut record = proposal.clone();
        record.state = target;
        Ok(record)
    }

    /// Leader-side vote tally update. Only valid when `self` is `Proposing`
    /// and `sender` is in `Remaining`; migrates the sender atomically
    /// between the acceptor/rejector sets (no double votes).
    pub fn record_vote(&self, sender: &str, accept: bool, is_self_leader: bool) -> Result<DKGDetails, Error> {
        if self.state != State::Proposing {
            return Err(Error::InvalidStateChange {
                from: self.state,
                to: if accept { State::Accepted } else { State::Rejected },
            });
        }
        if !is_self_leader {
            return Err(Error::NotLeader);
        }
        if !self.remaining.contains(sender) {
            return Err(Error::NotInRemaining);
        }

        let mut record = self.clone();
        record.acceptors.remove(sender);
        record.rejectors.remove(sender);
        if accept {
            record.acceptors.insert(sender.to_string());
        } else {
            record.rejectors.insert(sender.to_string());
        }
        Ok(record)
    }

    /// A voter's own local bookkeeping transition after it casts its vote.
    pub fn cast_own_vote(&self, accept: bool) -> Result<DKGDetails, Error> {
        let target = if accept { State::Accepted } else { State::Rejected };
        require_transition(self.state, target)?;
        let mut record = self.clone();
        record.state = target;
        Ok(record)
    }

    /// A leaving participant acknowledges departure: `Proposed -> Left`.
    pub fn acknowledge_left(&self) -> Result<DKGDetails, Error> {
        require_transition(self.state, State::Left)?;
        let mut record = self.clone();
        record.state = State::Left;
        Ok(record)
    }

    /// Leader or accepted participant starts the cryptographic DKG:
    /// `Proposing|Accepted|Joined -> Executing`.
    pub fn execute(&self) -> Result<DKGDetails, Error> {
        require_transition(self.state, State::Executing)?;
        let mut record = self.clone();
        record.state = State::Executing;
        Ok(record)
    }

    /// DKG executor reports success: `Executing -> Complete`, persisting `final_group`.
    pub fn complete(&self, final_group: Vec<String>) -> Result<DKGDetails, Error> {
        require_transition(self.state, State::Complete)?;
        let mut record = self.clone();
        record.state = State::Complete;
        record.final_group = Some(final_group);
        Ok(record)
    }

    /// Leader-initiated cancellation, permitted from any non-terminal state in the table.
    pub fn abort(&self) -> Result<DKGDetails, Error> {
        require_transition(self.state, State::Aborted)?;
        let mut record = self.clone();
        record.state = State::Aborted;
        Ok(record)
    }

    /// Checks the deadline: `now >= deadline` fires a transition to `TimedOut`
    /// (inclusive boundary, `spec.md §8`). Returns `None` if the deadline
    /// hasn't passed or the current state has no `TimedOut` edge.
    pub fn check_timeout(&self, now: u64) -> Option<DKGDetails> {
        if now < self.deadline {
            return None;
        }
        if !allowed_transition(self.state, State::TimedOut) {
            return None;
        }
        let mut record = self.clone();
        record.state = State::TimedOut;
        Some(record)
    }

    /// A `Left` participant re-joins a later epoch's proposal. Per the open
    /// question in `spec.md §9`, this requires an explicit operator
    /// confirmation; `confirmed` stands in for that gate.
    pub fn rejoin(&self, confirmed: bool) -> Result<DKGDetails, Error> {
        if !confirmed {
            return Err(Error::InvalidStateChange {
                from: self.state,
                to: State::Joined,
            });
        }
        require_transition(self.state, State::Joined)?;
        let mut record = self.clone();
        record.state = State::Joined;
        Ok(record)
    }
}
