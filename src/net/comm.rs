// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Outbound peer connection cache, adapted from the teacher's `Comm`: keep
//! one live handle per peer address and reuse it, dropping and
//! re-establishing on failure rather than retrying the same handle forever.
//! Unlike the teacher we key the cache with `DashMap` rather than an LRU —
//! the peer set here is bounded by group size, not by an open-ended mesh,
//! so eviction isn't needed.

use super::Error;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A single outbound handle to a peer. Concrete implementations live
/// outside this crate's scope (`spec.md §1`, transport code generation);
/// this trait is the seam the gateway and sync layer call through.
#[async_trait]
pub trait Peer: Send + Sync {
    fn address(&self) -> &str;
    async fn send(&self, payload: Bytes) -> Result<Bytes, Error>;
}

/// Something that can establish a fresh handle to a named peer, given its
/// address — the dial side of the cache.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, address: &str) -> Result<Arc<dyn Peer>, Error>;
}

/// Caches live peer handles by address, dialing lazily and redialing once
/// on a failed send (`spec.md §5`, suspension points on network I/O).
pub struct PeerDirectory {
    dialer: Arc<dyn Dialer>,
    cache: DashMap<String, Arc<dyn Peer>>,
}

impl PeerDirectory {
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self {
            dialer,
            cache: DashMap::new(),
        }
    }

    async fn connection_to(&self, address: &str) -> Result<Arc<dyn Peer>, Error> {
        if let Some(peer) = self.cache.get(address) {
            return Ok(peer.clone());
        }
        let peer = self.dialer.dial(address).await?;
        self.cache.insert(address.to_string(), peer.clone());
        Ok(peer)
    }

    /// Sends `payload` to `address`, redialing once if the cached handle
    /// has gone stale.
    pub async fn send(&self, address: &str, payload: Bytes) -> Result<Bytes, Error> {
        let peer = self.connection_to(address).await?;
        match peer.send(payload.clone()).await {
            Ok(reply) => Ok(reply),
            Err(error) => {
                warn!(address, %error, "cached peer handle failed, redialing");
                self.cache.remove(address);
                let peer = self.connection_to(address).await?;
                peer.send(payload).await
            }
        }
    }

    pub fn evict(&self, address: &str) {
        if self.cache.remove(address).is_some() {
            debug!(address, "evicted peer handle");
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
