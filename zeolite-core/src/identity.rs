//! Long-term identities.
//!
//! An identity is an Ed25519 keypair that names a peer across sessions.
//! It persists as the raw 96-byte blob `public || secret`, or for humans
//! as `base64(public) "-" base64(secret)` with standard padded base64.
//!
//! No cryptographic self-check is performed on load; a malformed secret
//! key surfaces as [`Error::Sign`] at the first handshake.

use std::fmt;
use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::crypto::{self, SignPublicKey, SignSecretKey, SIGN_PUBLIC_KEY_LEN, SIGN_SECRET_KEY_LEN};
use crate::error::Error;
use crate::handshake;
use crate::stream::Stream;
use crate::trust::TrustPolicy;

/// Raw persisted identity length: public key followed by secret key.
pub const IDENTITY_LEN: usize = SIGN_PUBLIC_KEY_LEN + SIGN_SECRET_KEY_LEN;

/// A long-term identity: an Ed25519 keypair.
///
/// The secret half never leaves this struct; it is zeroized on drop and
/// the type is deliberately not `Clone`. Share an identity across
/// threads behind an `Arc` instead.
pub struct Identity {
    public: SignPublicKey,
    secret: SignSecretKey,
}

impl Identity {
    /// Generate a fresh identity from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Keygen`] if the primitive reports failure.
    pub fn generate() -> Result<Self, Error> {
        let (public, secret) = crypto::sign_keypair()?;
        Ok(Self { public, secret })
    }

    /// Load an identity from its raw persisted form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] unless the blob is exactly
    /// [`IDENTITY_LEN`] bytes. The key material itself is not validated.
    pub fn from_raw(blob: &[u8]) -> Result<Self, Error> {
        if blob.len() != IDENTITY_LEN {
            return Err(Error::Parse);
        }

        let mut public = [0u8; SIGN_PUBLIC_KEY_LEN];
        let mut secret = [0u8; SIGN_SECRET_KEY_LEN];
        public.copy_from_slice(&blob[..SIGN_PUBLIC_KEY_LEN]);
        secret.copy_from_slice(&blob[SIGN_PUBLIC_KEY_LEN..]);

        Ok(Self {
            public: SignPublicKey::from_bytes(public),
            secret: SignSecretKey::from_bytes(secret),
        })
    }

    /// The raw persisted form: public key followed by secret key.
    pub fn to_raw(&self) -> [u8; IDENTITY_LEN] {
        let mut blob = [0u8; IDENTITY_LEN];
        blob[..SIGN_PUBLIC_KEY_LEN].copy_from_slice(self.public.as_bytes());
        blob[SIGN_PUBLIC_KEY_LEN..].copy_from_slice(self.secret.as_bytes());
        blob
    }

    /// Parse the human form `base64(public) "-" base64(secret)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the separator is missing, either half
    /// fails to decode, or the decoded lengths are wrong.
    pub fn from_base64(pair: &str) -> Result<Self, Error> {
        let (public_b64, secret_b64) = pair.split_once('-').ok_or(Error::Parse)?;
        let public = STANDARD.decode(public_b64).map_err(|_| Error::Parse)?;
        let secret = STANDARD.decode(secret_b64).map_err(|_| Error::Parse)?;

        let mut blob = Vec::with_capacity(IDENTITY_LEN);
        blob.extend_from_slice(&public);
        blob.extend_from_slice(&secret);
        Self::from_raw(&blob)
    }

    /// The human form `base64(public) "-" base64(secret)`.
    pub fn to_base64(&self) -> String {
        format!(
            "{}-{}",
            STANDARD.encode(self.public.as_bytes()),
            STANDARD.encode(self.secret.as_bytes())
        )
    }

    /// The public half, as announced to peers during the handshake.
    pub fn public(&self) -> &SignPublicKey {
        &self.public
    }

    pub(crate) fn secret(&self) -> &SignSecretKey {
        &self.secret
    }

    /// Run the mirrored handshake over a connected transport.
    ///
    /// Both peers call this with their own identity; the steps are
    /// identical on both sides. The trust predicate is consulted exactly
    /// once, after the peer's public key arrives and before any key
    /// material is exchanged. On success the returned [`Stream`] owns
    /// the transport.
    ///
    /// # Errors
    ///
    /// Any transport or cryptographic failure aborts the handshake; see
    /// [`Error`] for the kinds. The transport should be closed by the
    /// caller afterwards.
    pub fn handshake<T, P>(&self, transport: T, trust: P) -> Result<Stream<T>, Error>
    where
        T: Read + Write,
        P: TrustPolicy,
    {
        handshake::run(self, transport, trust)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The secret half stays out of debug output.
        f.debug_struct("Identity").field("public", &self.public).finish()
    }
}

impl SignPublicKey {
    /// Encode as standard padded base64, the form used in trust lists.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.as_bytes())
    }

    /// Decode from standard padded base64.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] on a decode failure or wrong length.
    pub fn from_base64(id: &str) -> Result<Self, Error> {
        let bytes = STANDARD.decode(id).map_err(|_| Error::Parse)?;
        let raw: [u8; SIGN_PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| Error::Parse)?;
        Ok(Self::from_bytes(raw))
    }
}

impl fmt::Display for SignPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}
