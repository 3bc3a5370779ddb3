//! Crypto primitives façade.
//!
//! Thin, typed wrappers over the fixed cipher suite: Ed25519 combined-mode
//! signing, Curve25519 boxes (X25519 + XSalsa20-Poly1305), and the
//! XChaCha20-Poly1305 secretstream construction. There is no negotiation;
//! every artifact on the wire has one of the fixed sizes below.
//!
//! # Security Properties
//!
//! - Secret-bearing types zeroize their memory on drop and are not `Clone`
//! - [`SendState`] and [`RecvState`] are not `Clone`: duplicating a
//!   secretstream state would reuse nonces
//! - Any cryptographic failure is terminal; there are no retries

use crypto_box::aead::Aead;
use crypto_box::{Nonce, SalsaBox};
use crypto_secretstream::{Header, Key, PullStream, PushStream, Tag};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::{OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::Error;

/// Long-term (sign) public key length.
pub const SIGN_PUBLIC_KEY_LEN: usize = 32;
/// Long-term (sign) secret key length: 32-byte seed followed by the
/// 32-byte public key, the layout libsodium persists.
pub const SIGN_SECRET_KEY_LEN: usize = 64;
/// Detached Ed25519 signature length.
pub const SIGNATURE_LEN: usize = 64;
/// Ephemeral (box) public key length.
pub const BOX_PUBLIC_KEY_LEN: usize = 32;
/// Ephemeral (box) secret key length.
pub const BOX_SECRET_KEY_LEN: usize = 32;
/// Box nonce length.
pub const BOX_NONCE_LEN: usize = 24;
/// Box authentication tag length.
pub const BOX_MAC_LEN: usize = 16;
/// Symmetric stream key length.
pub const STREAM_KEY_LEN: usize = 32;
/// Secretstream header length.
pub const STREAM_HEADER_LEN: usize = 24;
/// Per-message secretstream overhead: 16-byte MAC plus the 1-byte tag.
pub const STREAM_OVERHEAD: usize = 17;
/// Combined signed message carrying an ephemeral public key:
/// signature followed by the key itself.
pub const SIGNED_EPHEMERAL_LEN: usize = SIGNATURE_LEN + BOX_PUBLIC_KEY_LEN;
/// A stream key sealed to the peer: nonce, box MAC, then the key.
pub const SEALED_STREAM_KEY_LEN: usize = BOX_NONCE_LEN + BOX_MAC_LEN + STREAM_KEY_LEN;

/// Long-term Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SignPublicKey([u8; SIGN_PUBLIC_KEY_LEN]);

impl SignPublicKey {
    /// Wrap raw public key bytes. No validation; a key that is not a
    /// valid curve point fails later at [`open_ephemeral`].
    pub fn from_bytes(bytes: [u8; SIGN_PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw public key bytes, as written to the wire in the identity
    /// exchange.
    pub fn as_bytes(&self) -> &[u8; SIGN_PUBLIC_KEY_LEN] {
        &self.0
    }
}

/// Long-term Ed25519 secret key.
///
/// Held as raw bytes: the signing key object is rebuilt at each signing
/// operation, so a malformed loaded secret surfaces as [`Error::Sign`]
/// there rather than at load time.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SignSecretKey([u8; SIGN_SECRET_KEY_LEN]);

impl SignSecretKey {
    /// Wrap raw secret key bytes. No validation beyond length.
    pub fn from_bytes(bytes: [u8; SIGN_SECRET_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw secret key bytes, for persistence.
    pub fn as_bytes(&self) -> &[u8; SIGN_SECRET_KEY_LEN] {
        &self.0
    }
}

/// Ephemeral Curve25519 public key, published once per handshake.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BoxPublicKey([u8; BOX_PUBLIC_KEY_LEN]);

impl BoxPublicKey {
    /// Raw key bytes, the signed payload of the ephemeral exchange.
    pub fn as_bytes(&self) -> &[u8; BOX_PUBLIC_KEY_LEN] {
        &self.0
    }
}

/// Ephemeral Curve25519 secret key. Never leaves the process; dropped
/// (and zeroized) before the handshake returns.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct BoxSecretKey([u8; BOX_SECRET_KEY_LEN]);

/// Symmetric secretstream key, one per direction per session.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct StreamKey([u8; STREAM_KEY_LEN]);

impl StreamKey {
    /// Generate a fresh key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; STREAM_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn from_bytes(bytes: [u8; STREAM_KEY_LEN]) -> Self {
        Self(bytes)
    }
}

/// Secretstream header, transmitted in the clear to initialize the
/// peer's receiving state.
#[derive(Clone, Copy, Debug)]
pub struct StreamHeader([u8; STREAM_HEADER_LEN]);

impl StreamHeader {
    /// Wrap raw header bytes received from the peer.
    pub fn from_bytes(bytes: [u8; STREAM_HEADER_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw header bytes, as written to the wire.
    pub fn as_bytes(&self) -> &[u8; STREAM_HEADER_LEN] {
        &self.0
    }
}

/// Sending secretstream state. Monotonic: every push advances the
/// internal nonce, so use is strictly sequential.
pub struct SendState {
    inner: PushStream,
}

/// Receiving secretstream state. Monotonic, like [`SendState`].
pub struct RecvState {
    inner: PullStream,
}

/// Generate a fresh long-term signing keypair from the OS CSPRNG.
///
/// # Errors
///
/// Returns [`Error::Keygen`] if the primitive reports failure.
pub fn sign_keypair() -> Result<(SignPublicKey, SignSecretKey), Error> {
    let signing = SigningKey::generate(&mut OsRng);
    let public = SignPublicKey(signing.verifying_key().to_bytes());
    let secret = SignSecretKey(signing.to_keypair_bytes());
    Ok((public, secret))
}

/// Generate a fresh ephemeral box keypair from the OS CSPRNG.
pub fn box_keypair() -> (BoxPublicKey, BoxSecretKey) {
    let mut secret_bytes = [0u8; BOX_SECRET_KEY_LEN];
    OsRng.fill_bytes(&mut secret_bytes);
    let secret = crypto_box::SecretKey::from(secret_bytes);
    let public = BoxPublicKey(*secret.public_key().as_bytes());
    (public, BoxSecretKey(secret_bytes))
}

/// Sign an ephemeral public key with a long-term secret, producing the
/// combined message `signature || key` written to the wire.
///
/// # Errors
///
/// Returns [`Error::Sign`] if the secret key bytes do not form a valid
/// signing key (e.g. a truncated or corrupted identity load).
pub fn sign_ephemeral(
    ephemeral: &BoxPublicKey,
    secret: &SignSecretKey,
) -> Result<[u8; SIGNED_EPHEMERAL_LEN], Error> {
    let signing = SigningKey::from_keypair_bytes(&secret.0).map_err(|_| Error::Sign)?;
    let signature: Signature = signing.sign(&ephemeral.0);

    let mut combined = [0u8; SIGNED_EPHEMERAL_LEN];
    combined[..SIGNATURE_LEN].copy_from_slice(&signature.to_bytes());
    combined[SIGNATURE_LEN..].copy_from_slice(&ephemeral.0);
    Ok(combined)
}

/// Verify a combined `signature || key` message under the signer's
/// long-term public key and extract the ephemeral key.
///
/// # Errors
///
/// Returns [`Error::Verify`] if the signer key is invalid or the
/// signature does not check out.
pub fn open_ephemeral(
    combined: &[u8; SIGNED_EPHEMERAL_LEN],
    signer: &SignPublicKey,
) -> Result<BoxPublicKey, Error> {
    let verifying = VerifyingKey::from_bytes(&signer.0).map_err(|_| Error::Verify)?;

    let mut signature_bytes = [0u8; SIGNATURE_LEN];
    signature_bytes.copy_from_slice(&combined[..SIGNATURE_LEN]);
    let signature = Signature::from_bytes(&signature_bytes);

    let message = &combined[SIGNATURE_LEN..];
    verifying
        .verify_strict(message, &signature)
        .map_err(|_| Error::Verify)?;

    let mut key = [0u8; BOX_PUBLIC_KEY_LEN];
    key.copy_from_slice(message);
    Ok(BoxPublicKey(key))
}

/// Seal a stream key to the peer's ephemeral key, producing
/// `nonce || box(key)` with a fresh random nonce.
///
/// # Errors
///
/// Returns [`Error::Encrypt`] if the box primitive rejects.
pub fn seal_stream_key(
    key: &StreamKey,
    peer: &BoxPublicKey,
    secret: &BoxSecretKey,
) -> Result<[u8; SEALED_STREAM_KEY_LEN], Error> {
    let peer_key = crypto_box::PublicKey::from(peer.0);
    let secret_key = crypto_box::SecretKey::from(secret.0);
    let salsa_box = SalsaBox::new(&peer_key, &secret_key);

    let mut nonce_bytes = [0u8; BOX_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = salsa_box
        .encrypt(nonce, key.0.as_ref())
        .map_err(|_| Error::Encrypt)?;

    let mut sealed = [0u8; SEALED_STREAM_KEY_LEN];
    sealed[..BOX_NONCE_LEN].copy_from_slice(&nonce_bytes);
    sealed[BOX_NONCE_LEN..].copy_from_slice(&cipher);
    Ok(sealed)
}

/// Open a sealed `nonce || box(key)` message from the peer and recover
/// the stream key it carries.
///
/// # Errors
///
/// Returns [`Error::Decrypt`] on authentication failure or wrong keys.
pub fn open_stream_key(
    sealed: &[u8; SEALED_STREAM_KEY_LEN],
    peer: &BoxPublicKey,
    secret: &BoxSecretKey,
) -> Result<StreamKey, Error> {
    let peer_key = crypto_box::PublicKey::from(peer.0);
    let secret_key = crypto_box::SecretKey::from(secret.0);
    let salsa_box = SalsaBox::new(&peer_key, &secret_key);

    let nonce = Nonce::from_slice(&sealed[..BOX_NONCE_LEN]);
    let mut plain = salsa_box
        .decrypt(nonce, &sealed[BOX_NONCE_LEN..])
        .map_err(|_| Error::Decrypt)?;

    if plain.len() != STREAM_KEY_LEN {
        plain.zeroize();
        return Err(Error::Decrypt);
    }

    let mut key = [0u8; STREAM_KEY_LEN];
    key.copy_from_slice(&plain);
    plain.zeroize();
    Ok(StreamKey::from_bytes(key))
}

/// Initialize a sending secretstream state from a key. The returned
/// header must reach the peer before any frame can be decrypted.
pub fn init_send(key: &StreamKey) -> (StreamHeader, SendState) {
    let (header, inner) = PushStream::init(&mut OsRng, &Key::from(key.0));
    let mut header_bytes = [0u8; STREAM_HEADER_LEN];
    header_bytes.copy_from_slice(header.as_ref());
    (StreamHeader(header_bytes), SendState { inner })
}

/// Initialize a receiving secretstream state from a key and the header
/// the peer published.
pub fn init_recv(key: &StreamKey, header: &StreamHeader) -> RecvState {
    let inner = PullStream::init(Header::from(header.0), &Key::from(key.0));
    RecvState { inner }
}

impl SendState {
    /// Encrypt one message, advancing the stream state. Output is
    /// [`STREAM_OVERHEAD`] bytes longer than the input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encrypt`] if the AEAD rejects.
    pub fn push(&mut self, message: &[u8]) -> Result<Vec<u8>, Error> {
        let mut buffer = message.to_vec();
        self.inner
            .push(&mut buffer, &[], Tag::Message)
            .map_err(|_| Error::Encrypt)?;
        Ok(buffer)
    }
}

impl RecvState {
    /// Decrypt one message, advancing the stream state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decrypt`] on authentication failure, reordering,
    /// or a wrong key. The state is then out of sync with the sender for
    /// good; no later frame on this direction can be decoded.
    pub fn pull(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        if ciphertext.len() < STREAM_OVERHEAD {
            return Err(Error::Decrypt);
        }
        let mut buffer = ciphertext.to_vec();
        self.inner
            .pull(&mut buffer, &[])
            .map_err(|_| Error::Decrypt)?;
        Ok(buffer)
    }
}
