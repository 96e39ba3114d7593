// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Metadata carried by every RPC and the version-compatibility interceptor
//! (`spec.md §6`).

use super::Error;
use serde::{Deserialize, Serialize};

/// This node's build version; compared against a peer's on every inbound
/// call (`spec.md §6`, "rejects requests from incompatible node versions").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl NodeVersion {
    pub const CURRENT: NodeVersion = NodeVersion {
        major: 0,
        minor: 1,
        patch: 0,
    };

    /// Two nodes are wire-compatible iff their major versions match.
    pub fn compatible_with(&self, other: &NodeVersion) -> bool {
        self.major == other.major
    }
}

impl std::fmt::Display for NodeVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Carried by every RPC request (`spec.md §6`); routing uses `chain_hash`
/// when present, falling back to `beacon_id`, then the daemon's default.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Metadata {
    pub beacon_id: Option<String>,
    pub chain_hash: Option<String>,
    pub node_version: NodeVersion,
}

/// The version interceptor: rejects calls from a peer running an
/// incompatible major version before any request-specific handling runs.
pub fn check_version(peer_address: &str, metadata: &Metadata) -> Result<(), Error> {
    if NodeVersion::CURRENT.compatible_with(&metadata.node_version) {
        Ok(())
    } else {
        Err(Error::IncompatibleVersion(peer_address.to_string()))
    }
}
