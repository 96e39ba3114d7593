// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! One beacon's runtime: its persisted DKG record, its live beacon handler
//! once a group exists, and the callback fan-out, all under one exclusive
//! lock (`spec.md §3`, "Lifecycle ownership").

use crate::beacon::sync::SyncPeer;
use crate::beacon::handler::BeaconHandler;
use crate::beacon::{Beacon, PartialBeacon};
use crate::daemon::callback::CallbackManager;
use crate::dkg::state::{DKGDetails, ProposalRole};
use crate::dkg::store::DkgStore;
use crate::error::{Error, Result};
use crate::group::Group;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::info;

/// A live `(Group, BeaconHandler)` pair, installed once a DKG completes.
struct LiveBeacon {
    group: Group,
    handler: Arc<BeaconHandler>,
}

/// Couples a `DKGStateMachine` (persisted) with the `BeaconHandler` and
/// `CallbackManager` for one `beaconID` (`spec.md §2`, `BeaconProcess`).
pub struct BeaconProcess {
    beacon_id: String,
    self_address: String,
    dkg_store: Arc<DkgStore>,
    live: RwLock<Option<LiveBeacon>>,
    sync_peers: RwLock<Vec<Arc<dyn SyncPeer>>>,
    pub callbacks: Arc<CallbackManager>,
}

impl BeaconProcess {
    pub fn new(beacon_id: String, self_address: String, dkg_store: Arc<DkgStore>) -> Self {
        Self {
            beacon_id,
            self_address,
            dkg_store,
            live: RwLock::new(None),
            sync_peers: RwLock::new(Vec::new()),
            callbacks: Arc::new(CallbackManager::new()),
        }
    }

    /// Opens (creating if absent) the persisted `<beacon_dir>/dkg` store for
    /// `beacon_id` and builds the process around it (`spec.md §6`,
    /// `LoadBeaconFromDisk`).
    pub fn open(beacon_id: String, self_address: String, beacon_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(beacon_dir)?;
        let dkg_store = Arc::new(DkgStore::open(&beacon_dir.join("dkg"))?);
        Ok(Self::new(beacon_id, self_address, dkg_store))
    }

    pub fn beacon_id(&self) -> &str {
        &self.beacon_id
    }

    /// Chain hash of the currently live group, if any (`spec.md §4.7`,
    /// the daemon's `chainHashHex -> beaconID` index entry for this process).
    pub fn chain_hash(&self) -> Option<String> {
        self.live.read().unwrap().as_ref().and_then(|l| l.group.chain_hash())
    }

    pub fn is_live(&self) -> bool {
        self.live.read().unwrap().is_some()
    }

    /// The currently installed group, if a DKG has completed
    /// (`spec.md §4.2` -> `§4.4` handoff).
    pub fn group(&self) -> Option<Group> {
        self.live.read().unwrap().as_ref().map(|l| l.group.clone())
    }

    pub fn current_dkg(&self) -> Result<Option<DKGDetails>> {
        Ok(self.dkg_store.get_current(&self.beacon_id)?)
    }

    /// Validates and adopts an inbound proposal under this beacon's
    /// exclusive lock, persisting the result before returning
    /// (`spec.md §4.1`, "validate-then-persist").
    pub async fn adopt_proposal(
        &self,
        proposal: DKGDetails,
        previous_final_group: Option<&[String]>,
        now: u64,
    ) -> Result<DKGDetails> {
        let _guard = self.dkg_store.lock(&self.beacon_id).await;
        let current = self
            .dkg_store
            .get_current(&self.beacon_id)?
            .unwrap_or_else(|| DKGDetails::fresh(self.beacon_id.clone()));

        DKGDetails::validate_proposal(&current, &proposal, previous_final_group, now)?;

        let role = DKGDetails::role_in(&proposal, &self.self_address);
        let record = match role {
            Some(role) => self.adopt_for_role(&current, &proposal, role)?,
            None => return Err(Error::UnknownBeaconId(self.beacon_id.clone())),
        };

        self.dkg_store.put_current(&record)?;
        info!(beacon = %self.beacon_id, epoch = record.epoch, state = ?record.state, "adopted dkg proposal");
        Ok(record)
    }

    fn adopt_for_role(
        &self,
        current: &DKGDetails,
        proposal: &DKGDetails,
        role: ProposalRole,
    ) -> Result<DKGDetails> {
        let is_terminal_or_fresh = matches!(
            current.state,
            crate::dkg::state::State::Fresh
                | crate::dkg::state::State::Complete
                | crate::dkg::state::State::Aborted
                | crate::dkg::state::State::TimedOut
        );
        let record = if current.state == crate::dkg::state::State::Fresh {
            DKGDetails::adopt_proposal(proposal, role)?
        } else if is_terminal_or_fresh {
            DKGDetails::re_propose(current, proposal, role)?
        } else {
            return Err(Error::Dkg(crate::dkg::Error::InvalidStateChange {
                from: current.state,
                to: crate::dkg::state::State::Proposed,
            }));
        };
        Ok(record)
    }

    /// Installs the group and beacon handler produced by a completed DKG
    /// (`spec.md §4.2` -> `§4.4` handoff).
    pub fn install_group(&self, group: Group, handler: Arc<BeaconHandler>) {
        *self.live.write().unwrap() = Some(LiveBeacon { group, handler });
    }

    pub fn handler(&self) -> Option<Arc<BeaconHandler>> {
        self.live.read().unwrap().as_ref().map(|l| l.handler.clone())
    }

    /// Registers the peers `start_sync` queries, replacing any previous set.
    pub fn set_sync_peers(&self, peers: Vec<Arc<dyn SyncPeer>>) {
        *self.sync_peers.write().unwrap() = peers;
    }

    /// Drives catchup against the registered sync peers (`spec.md §4.6`),
    /// appending verified beacons to this beacon's chain store. Returns the
    /// number appended; `0` if no peer is reachable or ahead.
    pub async fn start_sync(&self) -> Result<u64> {
        let handler = self
            .handler()
            .ok_or_else(|| Error::UnknownBeaconId(self.beacon_id.clone()))?;
        let group = self
            .group()
            .ok_or_else(|| Error::UnknownBeaconId(self.beacon_id.clone()))?;
        let genesis = Beacon::genesis(group.genesis_seed.clone());
        let peers = self.sync_peers.read().unwrap().clone();
        let appended = crate::beacon::sync::catchup(
            handler.store().as_ref(),
            handler.public_key_set(),
            &genesis,
            &peers,
        )
        .await?;
        Ok(appended)
    }

    pub fn handle_partial(&self, partial: PartialBeacon) -> Result<Option<Beacon>> {
        let handler = self
            .handler()
            .ok_or_else(|| Error::UnknownBeaconId(self.beacon_id.clone()))?;
        Ok(handler.handle_partial(partial)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dkg::state::State;

    fn dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn joiner_proposal(threshold: usize, joining: &[&str], deadline: u64) -> DKGDetails {
        let mut d = DKGDetails::fresh("beacon-1".to_string());
        d.epoch = 1;
        d.leader = joining[0].to_string();
        d.joining = joining.iter().map(|s| s.to_string()).collect();
        d.threshold = threshold;
        d.deadline = deadline;
        d
    }

    #[tokio::test]
    async fn leader_adopts_epoch1_proposal_into_proposing() {
        let store = Arc::new(DkgStore::open(dir().path()).unwrap());
        let process = BeaconProcess::new("beacon-1".into(), "a".into(), store);
        let proposal = joiner_proposal(2, &["a", "b", "c"], 1_000);
        let record = process.adopt_proposal(proposal, None, 0).await.unwrap();
        assert_eq!(record.state, State::Proposing);
    }

    #[tokio::test]
    async fn joiner_adopts_epoch1_proposal_into_joined() {
        let store = Arc::new(DkgStore::open(dir().path()).unwrap());
        let process = BeaconProcess::new("beacon-1".into(), "b".into(), store);
        let proposal = joiner_proposal(2, &["a", "b", "c"], 1_000);
        let record = process.adopt_proposal(proposal, None, 0).await.unwrap();
        assert_eq!(record.state, State::Joined);
    }

    #[tokio::test]
    async fn non_participant_is_rejected() {
        let store = Arc::new(DkgStore::open(dir().path()).unwrap());
        let process = BeaconProcess::new("beacon-1".into(), "zzz".into(), store);
        let proposal = joiner_proposal(2, &["a", "b", "c"], 1_000);
        let err = process.adopt_proposal(proposal, None, 0).await.unwrap_err();
        assert!(matches!(err, Error::UnknownBeaconId(_)));
    }

    #[test]
    fn chain_hash_is_absent_before_a_group_is_installed() {
        let store = Arc::new(DkgStore::open(dir().path()).unwrap());
        let process = BeaconProcess::new("beacon-1".into(), "a".into(), store);
        assert!(!process.is_live());
        assert!(process.chain_hash().is_none());
    }
}
