// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Wire types, the peer connection cache, and request demultiplexing
//! (`spec.md §6`). Transport code generation itself (HTTP/gRPC) is out of
//! scope; this module specifies the semantic surface the daemon and
//! gateways consume, the way `spec.md §1` frames it as an external
//! collaborator.

pub mod comm;
pub mod gateway;
pub mod wire;

pub use wire::{Metadata, NodeVersion};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("peer {0} is running an incompatible node version")]
    IncompatibleVersion(String),
    #[error("no route to peer {0}")]
    UnknownPeer(String),
    #[error("request metadata names neither a known chain hash nor a known beacon id")]
    UnresolvedBeacon,
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("transport failure: {0}")]
    Transport(String),
}
