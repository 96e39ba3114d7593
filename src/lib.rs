// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! A node in a distributed randomness beacon network: the DKG lifecycle
//! state machine, an authenticated reliable-broadcast layer, and
//! threshold-BLS beacon production, wired under one daemon supervisor.

pub mod beacon;
pub mod config;
pub mod daemon;
pub mod dkg;
pub mod error;
pub mod group;
pub mod hashing;
pub mod identity;
pub mod net;

pub use error::{Error, Result};
