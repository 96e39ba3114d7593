// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Multiplexes every beacon process the daemon hosts, keyed both by
//! `beaconID` and by chain hash, and drives graceful shutdown
//! (`spec.md §4.7`).

use super::process::BeaconProcess;
use crate::error::{Error, Result};
use crate::net::wire::Metadata;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const PER_BEACON_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns every `BeaconProcess` this daemon hosts and the two routing
/// indices RPC requests are resolved against.
pub struct Supervisor {
    by_id: DashMap<String, Arc<BeaconProcess>>,
    default_beacon_id: Option<String>,
    /// This node's own address, used to self-identify when hot-loading a
    /// beacon process from disk.
    self_address: String,
    /// `multibeacon/` root this daemon was started against, used to hot-load
    /// a beacon's persisted directory on demand (`spec.md §6`, `LoadBeaconFromDisk`).
    base_dir: PathBuf,
}

impl Supervisor {
    pub fn new(default_beacon_id: Option<String>, self_address: String, base_dir: PathBuf) -> Self {
        Self {
            by_id: DashMap::new(),
            default_beacon_id,
            self_address,
            base_dir,
        }
    }

    /// Opens `<base_dir>/<beacon_id>` from disk and hot-adds the resulting
    /// process (`spec.md §6`, `LoadBeaconFromDisk`).
    pub fn load_beacon(&self, beacon_id: &str) -> Result<Arc<BeaconProcess>> {
        let process = Arc::new(BeaconProcess::open(
            beacon_id.to_string(),
            self.self_address.clone(),
            &self.beacon_dir(beacon_id),
        )?);
        self.add(process.clone());
        Ok(process)
    }

    pub fn beacon_dir(&self, beacon_id: &str) -> PathBuf {
        self.base_dir.join(beacon_id)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Hot-adds a beacon process (`spec.md §4.7`, `LoadBeaconFromDisk`).
    pub fn add(&self, process: Arc<BeaconProcess>) {
        info!(beacon = process.beacon_id(), "beacon process loaded");
        self.by_id.insert(process.beacon_id().to_string(), process);
    }

    /// Hot-removes a beacon process by id. The caller is responsible for
    /// tearing down any HTTP handler bound to its chain hash.
    pub fn remove(&self, beacon_id: &str) -> Option<Arc<BeaconProcess>> {
        let removed = self.by_id.remove(beacon_id).map(|(_, process)| process);
        if removed.is_some() {
            info!(beacon = beacon_id, "beacon process removed");
        }
        removed
    }

    pub fn get(&self, beacon_id: &str) -> Option<Arc<BeaconProcess>> {
        self.by_id.get(beacon_id).map(|entry| entry.clone())
    }

    pub fn list(&self) -> Vec<String> {
        self.by_id.iter().map(|entry| entry.key().clone()).collect()
    }

    fn chain_hash_index(&self) -> HashMap<String, String> {
        self.by_id
            .iter()
            .filter_map(|entry| entry.value().chain_hash().map(|hash| (hash, entry.key().clone())))
            .collect()
    }

    /// Resolves inbound request metadata to the matching beacon process
    /// (`spec.md §4.7`: chain hash, then beacon id, then the default).
    pub fn resolve(&self, metadata: &Metadata) -> Result<Arc<BeaconProcess>> {
        let index = self.chain_hash_index();
        let beacon_id =
            crate::net::gateway::resolve_beacon_id(metadata, &index, self.default_beacon_id.as_deref())?;
        self.get(&beacon_id).ok_or(Error::UnknownBeaconId(beacon_id))
    }

    /// Stops every beacon process with a per-beacon grace period, in the
    /// order `spec.md §4.7` prescribes: beacons first, gateways and the
    /// control listener are the caller's responsibility afterwards.
    pub async fn shutdown_all(&self) {
        let beacon_ids = self.list();
        for beacon_id in beacon_ids {
            match tokio::time::timeout(PER_BEACON_SHUTDOWN_GRACE, self.shutdown_one(&beacon_id)).await {
                Ok(()) => info!(beacon = %beacon_id, "beacon stopped cleanly"),
                Err(_) => warn!(beacon = %beacon_id, "beacon shutdown exceeded grace period"),
            }
        }
    }

    async fn shutdown_one(&self, beacon_id: &str) {
        self.remove(beacon_id);
    }
}
