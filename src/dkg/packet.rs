// Copyright 2021 drb contributors.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF
// ANY KIND, either express or implied. Please review the Licences for the specific language
// governing permissions and limitations relating to use of the software.

//! DKG packets and the broadcast envelope (`spec.md §3`, "Broadcast packet
//! envelope"). Packet bodies carry opaque bytes for the underlying
//! cryptographic DKG message (produced/consumed by [`crate::dkg::executor`]);
//! this layer only needs to sign, hash and dispatch on the tag.

use crate::identity::LongTermKey;
use ed25519_dalek::{PublicKey, Signature, Verifier};
use serde::{Deserialize, Serialize};

/// Tag distinguishing the three DKG packet kinds (`spec.md §9`, "Tagged
/// variants replace interface dispatch").
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    Deal,
    Response,
    Justification,
}

/// An inner DKG packet: the cryptographic payload plus the issuer's signature over it.
#[derive(Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub kind: PacketKind,
    pub issuer: String,
    /// Opaque bincode-encoded `bls_dkg` protocol message.
    pub payload: Vec<u8>,
    pub issuer_signature: Signature,
}

impl Bundle {
    fn signed_payload(kind: PacketKind, issuer: &str, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(payload.len() + issuer.len() + 1);
        buf.push(kind as u8);
        buf.extend_from_slice(issuer.as_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    /// Builds and self-signs a new bundle as its issuer.
    pub fn new_signed(kind: PacketKind, issuer: String, payload: Vec<u8>, key: &LongTermKey) -> Self {
        let to_sign = Self::signed_payload(kind, &issuer, &payload);
        let issuer_signature = key.sign(&to_sign);
        Self {
            kind,
            issuer,
            payload,
            issuer_signature,
        }
    }

    /// Verifies the issuer's signature over this bundle's content.
    pub fn verify_issuer(&self, issuer_public_key: &PublicKey) -> bool {
        let to_sign = Self::signed_payload(self.kind, &self.issuer, &self.payload);
        issuer_public_key
            .verify(&to_sign, &self.issuer_signature)
            .is_ok()
    }

    /// `H(payload ‖ kind ‖ issuer)`, used as `bundle.Hash()` in the content-hash
    /// computation (`spec.md §4.3`).
    pub fn hash(&self) -> crate::hashing::Digest32 {
        let to_hash = Self::signed_payload(self.kind, &self.issuer, &self.payload);
        crate::hashing::broadcast_content_hash(&to_hash, self.issuer_signature.as_ref())
    }
}

/// The authenticated envelope carried over the wire (`spec.md §3`):
/// a `Bundle` plus the transmitter's signature over
/// `H(bundle.hash() ‖ bundle.signature) ‖ transmitter`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub bundle: Bundle,
    pub transmitter: String,
    pub transmitter_signature: Signature,
}

impl Envelope {
    fn signed_payload(bundle: &Bundle, transmitter: &str) -> Vec<u8> {
        let mut buf = bundle.hash().to_vec();
        buf.extend_from_slice(transmitter.as_bytes());
        buf
    }

    /// Wraps `bundle` in a fresh envelope, signed by this node as transmitter.
    pub fn new_signed(bundle: Bundle, transmitter: String, key: &LongTermKey) -> Self {
        let to_sign = Self::signed_payload(&bundle, &transmitter);
        let transmitter_signature = key.sign(&to_sign);
        Self {
            bundle,
            transmitter,
            transmitter_signature,
        }
    }

    pub fn verify_transmitter(&self, transmitter_public_key: &PublicKey) -> bool {
        let to_sign = Self::signed_payload(&self.bundle, &self.transmitter);
        transmitter_public_key
            .verify(&to_sign, &self.transmitter_signature)
            .is_ok()
    }

    /// The content hash used to key the per-issuer de-dup table:
    /// `H(bundle.Hash() ‖ bundle.Signature)`.
    pub fn content_hash(&self) -> crate::hashing::Digest32 {
        crate::hashing::broadcast_content_hash(
            &self.bundle.hash(),
            self.bundle.issuer_signature.as_ref(),
        )
    }
}
