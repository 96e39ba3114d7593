// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

use crate::beacon;
use crate::dkg;
use crate::net;
use std::result;
use thiserror::Error;

/// A specialised `Result` type for the crate.
pub type Result<T> = result::Result<T, Error>;

/// Top-level error, composed from the per-layer error types.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Error raised by the DKG lifecycle state machine or executor.
    #[error("dkg: {0}")]
    Dkg(#[from] dkg::Error),
    /// Error raised by the beacon handler, chain store or sync.
    #[error("beacon: {0}")]
    Beacon(#[from] beacon::Error),
    /// Error raised by the wire/gateway layer.
    #[error("net: {0}")]
    Net(#[from] net::Error),
    /// Storage backend failure (sled, file I/O) that isn't more specifically typed.
    #[error("storage failure: {0}")]
    Storage(String),
    /// A beaconID referenced in a request does not correspond to any loaded beacon process.
    #[error("unknown beacon id: {0}")]
    UnknownBeaconId(String),
    /// The on-disk layout is corrupted or internally inconsistent; the process should exit.
    #[error("corrupted store: {0}")]
    CorruptedStore(String),
    /// Configuration is internally inconsistent (e.g. control port already bound elsewhere).
    #[error("configuration error: {0}")]
    Config(String),
    /// Legacy single-beacon layout migration failed; rolled back.
    #[error("migration failed: {0}")]
    Migration(String),
    /// Generic I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
