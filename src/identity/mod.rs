// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! Node identity: long-term ed25519 keypair and the `Participant` record
//! (`spec.md §3`) that other nodes verify group membership against.
//!
//! Loading the long-term keypair from disk is treated as an external
//! collaborator per `spec.md §1`; [`LongTermKey::generate`] and
//! [`LongTermKey::from_bytes`] are the seam a concrete key-file loader would
//! call into.

use ed25519_dalek::{Keypair, PublicKey, Signature, Signer, Verifier};
use serde::{Deserialize, Serialize};
use std::fmt;

/// This node's long-term signing key, distinct from the BLS group share.
pub struct LongTermKey {
    keypair: Keypair,
}

impl LongTermKey {
    /// Generates a fresh keypair. Exposed for tests and for first-run bootstrap.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng {};
        Self {
            keypair: Keypair::generate(&mut csprng),
        }
    }

    /// Reconstructs a keypair from its 64-byte secret+public encoding, as read from `key/`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ed25519_dalek::SignatureError> {
        Ok(Self {
            keypair: Keypair::from_bytes(bytes)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.keypair.to_bytes()
    }

    pub fn public(&self) -> PublicKey {
        self.keypair.public
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }
}

/// Identity of a node as carried in a `Group` (`spec.md §3`).
///
/// Equality is defined over address, TLS flag, and exact public-key and
/// signature bytes, matching the invariant in the spec — two `Participant`s
/// that differ only in, say, field order must still compare equal.
#[derive(Clone, Serialize, Deserialize)]
pub struct Participant {
    pub address: String,
    pub tls: bool,
    pub public_key: PublicKey,
    /// Self-signature over `public_key ‖ address`, proving the node controls
    /// the long-term key it is publishing under this address.
    pub signature: Signature,
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("address", &self.address)
            .field("tls", &self.tls)
            .field("public_key", &hex::encode(self.public_key.as_bytes()))
            .finish()
    }
}

impl PartialEq for Participant {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.tls == other.tls
            && self.public_key.as_bytes() == other.public_key.as_bytes()
            && self.signature.to_bytes()[..] == other.signature.to_bytes()[..]
    }
}

impl Eq for Participant {}

impl std::hash::Hash for Participant {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.tls.hash(state);
        self.public_key.as_bytes().hash(state);
    }
}

impl PartialOrd for Participant {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Participant {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.address.cmp(&other.address)
    }
}

impl Participant {
    fn signed_payload(address: &str, public_key: &PublicKey) -> Vec<u8> {
        let mut payload = Vec::with_capacity(address.len() + 32);
        payload.extend_from_slice(public_key.as_bytes());
        payload.extend_from_slice(address.as_bytes());
        payload
    }

    /// Builds a self-signed `Participant` record for `address` using `key`.
    pub fn new_self_signed(address: String, tls: bool, key: &LongTermKey) -> Self {
        let payload = Self::signed_payload(&address, &key.public());
        let signature = key.sign(&payload);
        Self {
            address,
            tls,
            public_key: key.public(),
            signature,
        }
    }

    /// Verifies the embedded self-signature; called whenever a `Group` file is loaded or a
    /// `GetIdentity` response is received from a peer.
    pub fn verify_self_signature(&self) -> bool {
        let payload = Self::signed_payload(&self.address, &self.public_key);
        self.public_key.verify(&payload, &self.signature).is_ok()
    }
}
