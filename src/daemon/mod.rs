// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! The daemon supervisor: multiplexes beacon processes, the local control
//! surface, and startup migration (`spec.md §4.7`).

pub mod callback;
pub mod control;
pub mod migrate;
pub mod process;
pub mod supervisor;

pub use process::BeaconProcess;
pub use supervisor::Supervisor;
