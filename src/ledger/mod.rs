//! Shared ledger data model.
//!
//! The types here are the vocabulary every other module speaks:
//! - [`TxId`] - transaction identifier
//! - [`StateRef`] - one consumable resource, `(transaction id, output index)`
//! - [`Party`] - a requesting party's identity
//! - [`ConflictReport`] - the losing refs and their winning transactions
//!
//! A `StateRef` is globally unique by construction and immutable. Once a
//! commit record binds a `StateRef` to a consuming transaction, that binding
//! is permanent.

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A transaction identifier: a 32-byte digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    /// Derive a transaction id from arbitrary payload bytes.
    pub fn digest(payload: &[u8]) -> Self {
        let mut h = Sha256::new();
        h.update(payload);
        Self(h.finalize().into())
    }

    /// Parse a transaction id from a 64-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = <[u8; 32]>::try_from(hex::decode(s).ok()?).ok()?;
        Some(Self(bytes))
    }

    /// Hex form of the id.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form for logs; full form available via to_hex().
        write!(f, "{}", &self.to_hex()[..12])
    }
}

impl std::fmt::Debug for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TxId({})", self.to_hex())
    }
}

/// A reference to one consumable resource: an output of a prior transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateRef {
    /// The transaction that produced the resource.
    pub tx_id: TxId,

    /// The output index within that transaction.
    pub index: u32,
}

impl StateRef {
    /// Create a state reference.
    pub fn new(tx_id: TxId, index: u32) -> Self {
        Self { tx_id, index }
    }

    /// Stable serialized key form, used by the commit store index.
    ///
    /// Fixed-width big-endian index so lexicographic key order matches
    /// `(tx_id, index)` order.
    pub fn to_key(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(36);
        out.extend_from_slice(&self.tx_id.0);
        out.extend_from_slice(&self.index.to_be_bytes());
        out
    }

    /// Parse a state reference back from its key form.
    pub fn from_key(key: &[u8]) -> Option<Self> {
        if key.len() != 36 {
            return None;
        }
        let tx_id = TxId(<[u8; 32]>::try_from(&key[..32]).ok()?);
        let index = u32::from_be_bytes(<[u8; 4]>::try_from(&key[32..]).ok()?);
        Some(Self { tx_id, index })
    }
}

impl std::fmt::Display for StateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.tx_id, self.index)
    }
}

/// Identity of a requesting party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// Human-readable name, used in logs and audit records.
    pub name: String,

    /// The party's signing public key, hex-encoded on the wire.
    pub public_key_hex: String,
}

impl Party {
    /// Create a party from a name and verifying key.
    pub fn new(name: impl Into<String>, key: &VerifyingKey) -> Self {
        Self {
            name: name.into(),
            public_key_hex: hex::encode(key.to_bytes()),
        }
    }

    /// Create a party with a name only (no key material), for callers that
    /// identify themselves out of band.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            public_key_hex: String::new(),
        }
    }

    /// Decode the party's verifying key, if present and well-formed.
    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        let bytes = <[u8; 32]>::try_from(hex::decode(&self.public_key_hex).ok()?).ok()?;
        VerifyingKey::from_bytes(&bytes).ok()
    }
}

impl std::fmt::Display for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// One losing state reference and the transaction that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// The contested resource.
    pub state_ref: StateRef,

    /// The transaction it is already committed to.
    pub consuming_tx: TxId,
}

/// The full set of conflicts for a rejected commit attempt.
///
/// Lists every requested ref already held by another transaction, including
/// refs that would otherwise have succeeded - the batch is all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConflictReport {
    /// Losing refs with their winners.
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one conflicting ref.
    pub fn push(&mut self, state_ref: StateRef, consuming_tx: TxId) {
        self.conflicts.push(Conflict {
            state_ref,
            consuming_tx,
        });
    }

    /// Whether any conflicts were recorded.
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Number of conflicting refs.
    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    /// The winning transaction for a given ref, if it conflicted.
    pub fn winner_of(&self, state_ref: &StateRef) -> Option<TxId> {
        self.conflicts
            .iter()
            .find(|c| c.state_ref == *state_ref)
            .map(|c| c.consuming_tx)
    }
}

impl std::fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} conflicting ref(s)", self.conflicts.len())?;
        for c in &self.conflicts {
            write!(f, "; {} held by {}", c.state_ref, c.consuming_tx)?;
        }
        Ok(())
    }
}
