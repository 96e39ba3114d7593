// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Demultiplexes an inbound request's `Metadata` to a `beaconID`
//! (`spec.md §4.7`): chain hash wins when present, then the explicit
//! beacon id, then the daemon's configured default. Gateways never touch
//! beacon state directly — this module only resolves the routing key.

use super::wire::Metadata;
use super::Error;
use std::collections::HashMap;

/// Resolves `metadata` to a `beaconID` using the daemon's two indices plus
/// its configured default, in the priority order `spec.md §4.7` specifies.
pub fn resolve_beacon_id(
    metadata: &Metadata,
    chain_hash_to_beacon_id: &HashMap<String, String>,
    default_beacon_id: Option<&str>,
) -> Result<String, Error> {
    if let Some(chain_hash) = &metadata.chain_hash {
        return chain_hash_to_beacon_id
            .get(chain_hash)
            .cloned()
            .ok_or(Error::UnresolvedBeacon);
    }
    if let Some(beacon_id) = &metadata.beacon_id {
        return Ok(beacon_id.clone());
    }
    default_beacon_id
        .map(str::to_string)
        .ok_or(Error::UnresolvedBeacon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::wire::NodeVersion;

    fn metadata(beacon_id: Option<&str>, chain_hash: Option<&str>) -> Metadata {
        Metadata {
            beacon_id: beacon_id.map(str::to_string),
            chain_hash: chain_hash.map(str::to_string),
            node_version: NodeVersion::CURRENT,
        }
    }

    #[test]
    fn chain_hash_takes_priority_over_beacon_id() {
        let mut index = HashMap::new();
        index.insert("hash-a".to_string(), "beacon-a".to_string());
        let metadata = metadata(Some("beacon-b"), Some("hash-a"));
        assert_eq!(
            resolve_beacon_id(&metadata, &index, None).unwrap(),
            "beacon-a"
        );
    }

    #[test]
    fn falls_back_to_beacon_id_when_chain_hash_absent() {
        let metadata = metadata(Some("beacon-b"), None);
        assert_eq!(
            resolve_beacon_id(&metadata, &HashMap::new(), None).unwrap(),
            "beacon-b"
        );
    }

    #[test]
    fn falls_back_to_default_when_both_absent() {
        let metadata = metadata(None, None);
        assert_eq!(
            resolve_beacon_id(&metadata, &HashMap::new(), Some("default")).unwrap(),
            "default"
        );
    }

    #[test]
    fn unresolved_chain_hash_is_an_error_even_with_a_default() {
        let metadata = metadata(None, Some("unknown-hash"));
        let err = resolve_beacon_id(&metadata, &HashMap::new(), Some("default")).unwrap_err();
        assert_eq!(err, Error::UnresolvedBeacon);
    }
}
