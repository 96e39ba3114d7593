// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Daemon configuration, parsed from the command line the way the
//! teacher's binary does (`structopt`), with a data directory that
//! defaults into the user's local data dir via `dirs-next`.

use std::path::PathBuf;
use structopt::StructOpt;

fn default_data_dir() -> PathBuf {
    dirs_next::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("drb")
}

/// A node in a distributed randomness beacon network.
#[derive(Clone, Debug, StructOpt)]
#[structopt(name = "drb_node")]
pub struct Config {
    /// This node's own address, as it appears in group and proposal
    /// participant lists (`spec.md §3`).
    #[structopt(long)]
    pub self_address: String,

    /// Base directory holding one subfolder per beaconID under
    /// `multibeacon/`; defaults to the platform local-data directory.
    #[structopt(long, parse(from_os_str))]
    pub data_dir: Option<PathBuf>,

    /// Path to the local control socket.
    #[structopt(long, parse(from_os_str))]
    pub control_socket: Option<PathBuf>,

    /// BeaconID used when a request's metadata names neither a beacon id
    /// nor a chain hash (`spec.md §4.7`).
    #[structopt(long)]
    pub default_beacon: Option<String>,

    /// Directory for rolling log files; stderr only when unset.
    #[structopt(long, parse(from_os_str))]
    pub log_dir: Option<PathBuf>,

    /// Emit structured JSON logs instead of the default compact format.
    #[structopt(long)]
    pub json_logs: bool,

    /// Repeatable; raises log verbosity (`-v`, `-vv`, `-vvv`).
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u8,
}

impl Config {
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn multibeacon_root(&self) -> PathBuf {
        self.resolved_data_dir().join("multibeacon")
    }

    pub fn control_socket_path(&self) -> PathBuf {
        self.control_socket
            .clone()
            .unwrap_or_else(|| self.resolved_data_dir().join("control.sock"))
    }
}
