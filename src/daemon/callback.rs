// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Fans out every finalized beacon to local subscribers — `PublicRandStream`
//! callers and anything else watching a beacon process (`spec.md §2`).

use crate::beacon::handler::BeaconCallback;
use crate::beacon::Beacon;
use tokio::sync::broadcast;
use tracing::warn;

/// Bounded so a slow subscriber can't hold unbounded history in memory; a
/// lagging receiver just misses older rounds and resumes from the newest.
const CHANNEL_CAPACITY: usize = 256;

pub struct CallbackManager {
    sender: broadcast::Sender<Beacon>,
}

impl CallbackManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Beacon> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for CallbackManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BeaconCallback for CallbackManager {
    fn on_beacon(&self, beacon: &Beacon) {
        // No receivers is the common case between subscribers; not an error.
        if self.sender.send(beacon.clone()).is_err() {
            warn!(round = beacon.round, "no active subscribers for finalized beacon");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon(round: u64) -> Beacon {
        Beacon {
            round,
            previous_signature: vec![0],
            signature: vec![round as u8],
        }
    }

    #[tokio::test]
    async fn subscriber_receives_finalized_beacons_in_order() {
        let manager = CallbackManager::new();
        let mut receiver = manager.subscribe();
        manager.on_beacon(&beacon(1));
        manager.on_beacon(&beacon(2));
        assert_eq!(receiver.recv().await.unwrap().round, 1);
        assert_eq!(receiver.recv().await.unwrap().round, 2);
    }

    #[test]
    fn reports_correct_subscriber_count() {
        let manager = CallbackManager::new();
        assert_eq!(manager.subscriber_count(), 0);
        let _a = manager.subscribe();
        let _b = manager.subscribe();
        assert_eq!(manager.subscriber_count(), 2);
    }
}
