// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! The DKG lifecycle state machine (`spec.md §4.1`), its executor
//! (`§4.2`), the authenticated reliable-broadcast layer (`§4.3`), and the
//! packet/envelope types they share.

pub mod broadcast;
pub mod executor;
pub mod packet;
pub mod state;
pub mod store;

pub use state::{DKGDetails, State};

use thiserror::Error;

/// Validation and lifecycle errors for the DKG state machine, enumerated
/// exactly as `spec.md §4.1` and §7 name them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A transition outside the table in `spec.md §4.1` was attempted.
    #[error("invalid state change from {from:?} to {to:?}")]
    InvalidStateChange { from: State, to: State },
    /// Proposal's `BeaconID` doesn't match the current record.
    #[error("proposal beacon id does not match the current record")]
    InvalidBeaconID,
    /// Proposal's deadline is not strictly in the future.
    #[error("deadline has already passed")]
    TimeoutReached,
    /// `threshold > |Joining| + |Remaining|`.
    #[error("threshold is higher than the number of candidate nodes")]
    ThresholdHigherThanNodeCount,
    /// Epoch isn't exactly `current.epoch + 1` (or isn't `> current.epoch` from a terminal state).
    #[error("invalid epoch: proposed {proposed}, current {current}")]
    InvalidEpoch { proposed: u32, current: u32 },
    /// Epoch 1 proposal carries a non-empty Leaving or Remaining set.
    #[error("only joiners are allowed in the first epoch")]
    OnlyJoinersAllowedForFirstEpoch,
    /// Epoch 1 proposal's leader is not in the Joining set.
    #[error("leader must be one of the joiners in the first epoch")]
    LeaderNotJoining,
    /// Epoch>1 proposal's leader is not a member of Remaining.
    #[error("leader must be a remaining member for a reshare")]
    LeaderNotRemaining,
    /// Epoch>1 proposal's leader also appears in Joining or Leaving.
    #[error("leader cannot simultaneously be joining or leaving")]
    LeaderJoiningOrLeaving,
    /// Epoch>1 proposal has an empty Remaining set.
    #[error("remaining set must be non-empty for a reshare")]
    EmptyRemaining,
    /// A member of Remaining was not part of the prior epoch's final group.
    #[error("remaining participant {0} was not part of the previous final group")]
    NotInPreviousGroup(String),
    /// Acceptance/Rejection received by a node that isn't the proposal's leader.
    #[error("only the leader may receive acceptance or rejection votes")]
    NotLeader,
    /// Acceptance/Rejection sender is not in the proposal's Remaining set.
    #[error("vote sender is not in the remaining set")]
    NotInRemaining,
    /// A storage operation backing the transition failed; the transition was rolled back.
    #[error("unexpected storage error: {0}")]
    UnexpectedError(String),
    /// No in-flight record exists for this beacon.
    #[error("no current dkg record for this beacon")]
    NoCurrentRecord,
}
