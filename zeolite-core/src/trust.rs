//! Trust decisions.
//!
//! The handshake authenticates the peer's long-term key but does not
//! decide whether that key is welcome; that decision belongs to the
//! caller. A [`TrustPolicy`] is consulted exactly once per handshake,
//! after the peer's key has been received and before any ephemeral or
//! symmetric key material is exchanged. Rejection or an error aborts the
//! handshake with [`Error::Trust`](crate::Error::Trust).
//!
//! The policy may have side effects (logging the peer key is common) but
//! must not touch the transport.

use std::collections::BTreeSet;

use crate::crypto::SignPublicKey;

/// Error type a trust policy may surface. Any error means rejection.
pub type TrustError = Box<dyn std::error::Error + Send + Sync>;

/// A caller-supplied decision on a peer's long-term public key.
pub trait TrustPolicy {
    /// Accept (`Ok(true)`) or reject (`Ok(false)` or `Err`) the peer.
    fn check(&mut self, peer: &SignPublicKey) -> Result<bool, TrustError>;
}

impl<F> TrustPolicy for F
where
    F: FnMut(&SignPublicKey) -> Result<bool, TrustError>,
{
    fn check(&mut self, peer: &SignPublicKey) -> Result<bool, TrustError> {
        self(peer)
    }
}

/// Accept every peer. An explicit opt-out of trust checking.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustAny;

impl TrustPolicy for TrustAny {
    fn check(&mut self, _peer: &SignPublicKey) -> Result<bool, TrustError> {
        Ok(true)
    }
}

/// A membership list of trusted peers, keyed by their base64 form.
///
/// An empty set denies everyone: trusting all comers is [`TrustAny`]'s
/// job and must be chosen deliberately.
#[derive(Debug, Clone, Default)]
pub struct TrustSet {
    ids: BTreeSet<String>,
}

impl TrustSet {
    /// An empty set (which denies all peers).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a base64-encoded peer id.
    pub fn insert(&mut self, id: impl Into<String>) {
        self.ids.insert(id.into());
    }

    /// Whether the set holds no ids at all.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of trusted ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the given peer is in the set.
    pub fn contains(&self, peer: &SignPublicKey) -> bool {
        self.ids.contains(&peer.to_base64())
    }
}

impl TrustPolicy for TrustSet {
    fn check(&mut self, peer: &SignPublicKey) -> Result<bool, TrustError> {
        Ok(self.contains(peer))
    }
}
