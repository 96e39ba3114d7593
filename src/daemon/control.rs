// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Local control-socket verbs (`spec.md §6`, "Control surface"). The
//! listener's transport (a Unix socket in production) is out of this
//! crate's scope; this module is the request/response contract and the
//! dispatcher against a [`Supervisor`].

use super::supervisor::Supervisor;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ControlRequest {
    Status,
    ListBeacons,
    LoadBeacon { beacon_id: String },
    ShutdownBeacon { beacon_id: String },
    ShutdownAll,
    BackupDatabase { beacon_id: String },
    StartSync { beacon_id: String, from_round: u64 },
    CheckSync { beacon_id: String },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControlResponse {
    Status { beacons: Vec<String> },
    BeaconList(Vec<String>),
    Loaded { beacon_id: String },
    Stopped { beacon_id: String },
    StoppedAll,
    BackupStarted { beacon_id: String },
    SyncStarted { beacon_id: String, from_round: u64 },
    SyncStatus { beacon_id: String, caught_up: bool },
}

/// Handles one control request. `LoadBeacon` hot-loads a beacon process from
/// `<multibeacon_root>/<beacon_id>`; `BackupDatabase` duplicates that same
/// directory (its persisted `sled` files) under `<multibeacon_root>/backups/`;
/// `StartSync` drives catchup against whatever peers the process has been
/// given via `BeaconProcess::set_sync_peers`. `from_round` is accepted for
/// wire compatibility but unused: `catchup` always resumes from the local
/// chain tip (`spec.md §4.6`).
pub async fn handle(supervisor: Arc<Supervisor>, request: ControlRequest) -> Result<ControlResponse> {
    match request {
        ControlRequest::Status => Ok(ControlResponse::Status {
            beacons: supervisor.list(),
        }),
        ControlRequest::ListBeacons => Ok(ControlResponse::BeaconList(supervisor.list())),
        ControlRequest::LoadBeacon { beacon_id } => {
            supervisor.load_beacon(&beacon_id)?;
            Ok(ControlResponse::Loaded { beacon_id })
        }
        ControlRequest::ShutdownBeacon { beacon_id } => {
            supervisor
                .remove(&beacon_id)
                .ok_or_else(|| Error::UnknownBeaconId(beacon_id.clone()))?;
            Ok(ControlResponse::Stopped { beacon_id })
        }
        ControlRequest::ShutdownAll => {
            supervisor.shutdown_all().await;
            Ok(ControlResponse::StoppedAll)
        }
        ControlRequest::BackupDatabase { beacon_id } => {
            supervisor
                .get(&beacon_id)
                .ok_or_else(|| Error::UnknownBeaconId(beacon_id.clone()))?;
            let source = supervisor.beacon_dir(&beacon_id);
            let destination = supervisor.base_dir().join("backups").join(&beacon_id);
            super::migrate::copy_dir_recursive(&source, &destination)?;
            Ok(ControlResponse::BackupStarted { beacon_id })
        }
        ControlRequest::StartSync { beacon_id, from_round } => {
            let process = supervisor
                .get(&beacon_id)
                .ok_or_else(|| Error::UnknownBeaconId(beacon_id.clone()))?;
            process.start_sync().await?;
            Ok(ControlResponse::SyncStarted { beacon_id, from_round })
        }
        ControlRequest::CheckSync { beacon_id } => {
            let process = supervisor
                .get(&beacon_id)
                .ok_or_else(|| Error::UnknownBeaconId(beacon_id.clone()))?;
            Ok(ControlResponse::SyncStatus {
                beacon_id,
                caught_up: process.is_live(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dkg::store::DkgStore;
    use crate::daemon::process::BeaconProcess;

    fn supervisor_with_one_beacon() -> Arc<Supervisor> {
        let supervisor = Arc::new(Supervisor::new(None, "a".to_string(), tempfile::tempdir().unwrap().into_path()));
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DkgStore::open(dir.path()).unwrap());
        supervisor.add(Arc::new(BeaconProcess::new("beacon-1".into(), "a".into(), store)));
        supervisor
    }

    #[tokio::test]
    async fn list_beacons_reports_loaded_processes() {
        let supervisor = supervisor_with_one_beacon();
        let response = handle(supervisor, ControlRequest::ListBeacons).await.unwrap();
        assert_eq!(response, ControlResponse::BeaconList(vec!["beacon-1".to_string()]));
    }

    #[tokio::test]
    async fn shutdown_beacon_removes_it_from_the_supervisor() {
        let supervisor = supervisor_with_one_beacon();
        handle(
            supervisor.clone(),
            ControlRequest::ShutdownBeacon {
                beacon_id: "beacon-1".into(),
            },
        )
        .await
        .unwrap();
        assert!(supervisor.list().is_empty());
    }

    #[tokio::test]
    async fn shutdown_unknown_beacon_is_an_error() {
        let supervisor = supervisor_with_one_beacon();
        let err = handle(
            supervisor,
            ControlRequest::ShutdownBeacon {
                beacon_id: "ghost".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::UnknownBeaconId(_)));
    }

    #[tokio::test]
    async fn load_beacon_opens_and_registers_a_process_from_disk() {
        let base_dir = tempfile::tempdir().unwrap().into_path();
        let supervisor = Arc::new(Supervisor::new(None, "a".to_string(), base_dir.clone()));
        let response = handle(
            supervisor.clone(),
            ControlRequest::LoadBeacon {
                beacon_id: "beacon-1".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(response, ControlResponse::Loaded { beacon_id: "beacon-1".into() });
        assert_eq!(supervisor.list(), vec!["beacon-1".to_string()]);
        assert!(base_dir.join("beacon-1").join("dkg").exists());
    }

    #[tokio::test]
    async fn backup_database_copies_the_beacon_directory() {
        let base_dir = tempfile::tempdir().unwrap().into_path();
        let supervisor = Arc::new(Supervisor::new(None, "a".to_string(), base_dir.clone()));
        handle(
            supervisor.clone(),
            ControlRequest::LoadBeacon {
                beacon_id: "beacon-1".into(),
            },
        )
        .await
        .unwrap();

        let response = handle(
            supervisor,
            ControlRequest::BackupDatabase {
                beacon_id: "beacon-1".into(),
            },
        )
        .await
        .unwrap();

        assert_eq!(response, ControlResponse::BackupStarted { beacon_id: "beacon-1".into() });
        assert!(base_dir.join("backups").join("beacon-1").join("dkg").exists());
    }

    #[tokio::test]
    async fn backup_unknown_beacon_is_an_error() {
        let supervisor = supervisor_with_one_beacon();
        let err = handle(
            supervisor,
            ControlRequest::BackupDatabase {
                beacon_id: "ghost".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::UnknownBeaconId(_)));
    }

    #[tokio::test]
    async fn start_sync_without_a_live_group_is_an_error() {
        let supervisor = supervisor_with_one_beacon();
        let err = handle(
            supervisor,
            ControlRequest::StartSync {
                beacon_id: "beacon-1".into(),
                from_round: 0,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::UnknownBeaconId(_)));
    }
}
