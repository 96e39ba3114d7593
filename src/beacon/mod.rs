// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Beacon production and chain transitions (`spec.md §4.4`-`§4.6`).

pub mod cache;
pub mod chain_store;
pub mod handler;
pub mod sync;
pub mod types;

pub use types::{Beacon, PartialBeacon};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("round {attempted} is not the successor of the last stored round {last}")]
    NonSequentialRound { last: u64, attempted: u64 },
    #[error("round {0} not found")]
    RoundNotFound(u64),
    #[error("partial signature is for a round already finalized ({round})")]
    RoundAlreadyFinalized { round: u64 },
    #[error("partial signature round {round} is beyond the catchup horizon ({horizon})")]
    BeyondHorizon { round: u64, horizon: u64 },
    #[error("partial signature's previous signature does not match the locally known round {round} signature")]
    PreviousSignatureMismatch { round: u64 },
    #[error("signature failed verification against the group public key at round {0}")]
    InvalidSignature(u64),
    #[error("not enough valid partials to reconstruct a signature yet")]
    InsufficientPartials,
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
