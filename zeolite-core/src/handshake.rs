//! The mirrored lockstep handshake.
//!
//! Both peers execute the same six phases in the same order; there is no
//! initiator/responder asymmetry. Each phase writes a fixed-size
//! artifact, flushes, then reads the peer's artifact of identical size,
//! so the exchange cannot deadlock on an ordered duplex transport.
//!
//! ```text
//! | 8  | protocol tag "zeolite1"
//! | 32 | long-term public key (Ed25519)
//! | 96 | signature || ephemeral box public key
//! | 72 | nonce || box(stream key)
//! | 24 | secretstream header
//! ```
//!
//! 232 bytes per side. Any failure is terminal: no key material survives
//! an aborted handshake, and the transport should be closed.

use std::io::{Read, Write};

use crate::crypto::{
    self, SignPublicKey, StreamKey, SEALED_STREAM_KEY_LEN, SIGNED_EPHEMERAL_LEN,
    SIGN_PUBLIC_KEY_LEN, STREAM_HEADER_LEN,
};
use crate::error::Error;
use crate::identity::Identity;
use crate::stream::Stream;
use crate::trust::TrustPolicy;

/// Length of the protocol tag.
pub const PROTOCOL_LEN: usize = 8;

/// The protocol tag both peers must present before anything else.
pub const PROTOCOL: &[u8; PROTOCOL_LEN] = b"zeolite1";

/// Run the handshake and produce an established stream.
///
/// Ephemeral secrets and local stream-key copies are zeroized when this
/// function returns, success or not.
pub(crate) fn run<T, P>(identity: &Identity, mut transport: T, mut trust: P) -> Result<Stream<T>, Error>
where
    T: Read + Write,
    P: TrustPolicy,
{
    // Protocol tag.
    let mut tag = [0u8; PROTOCOL_LEN];
    exchange(&mut transport, PROTOCOL, &mut tag)?;
    if &tag != PROTOCOL {
        return Err(Error::Proto);
    }

    // Long-term identities.
    let mut peer_bytes = [0u8; SIGN_PUBLIC_KEY_LEN];
    exchange(&mut transport, identity.public().as_bytes(), &mut peer_bytes)?;
    let peer = SignPublicKey::from_bytes(peer_bytes);

    match trust.check(&peer) {
        Ok(true) => {}
        Ok(false) | Err(_) => return Err(Error::Trust),
    }

    // Fresh ephemeral keypair, published under our long-term signature.
    let (ephemeral_public, ephemeral_secret) = crypto::box_keypair();
    let signed = crypto::sign_ephemeral(&ephemeral_public, identity.secret())?;

    let mut peer_signed = [0u8; SIGNED_EPHEMERAL_LEN];
    exchange(&mut transport, &signed, &mut peer_signed)?;
    let peer_ephemeral = crypto::open_ephemeral(&peer_signed, &peer)?;

    // Our send-direction key, sealed to the peer's ephemeral key.
    let send_key = StreamKey::generate();
    let sealed = crypto::seal_stream_key(&send_key, &peer_ephemeral, &ephemeral_secret)?;

    let mut peer_sealed = [0u8; SEALED_STREAM_KEY_LEN];
    exchange(&mut transport, &sealed, &mut peer_sealed)?;
    let recv_key = crypto::open_stream_key(&peer_sealed, &peer_ephemeral, &ephemeral_secret)?;

    // Stream headers. The send state mints ours; the peer's header plus
    // the key it chose initialize our receive state.
    let (header, send_state) = crypto::init_send(&send_key);

    let mut peer_header = [0u8; STREAM_HEADER_LEN];
    exchange(&mut transport, header.as_bytes(), &mut peer_header)?;
    let recv_state = crypto::init_recv(&recv_key, &crypto::StreamHeader::from_bytes(peer_header));

    Ok(Stream::new(transport, peer, send_state, recv_state))
}

/// Write our artifact, flush, then read the peer's artifact of the same
/// phase. Short reads and writes are errors.
fn exchange<T>(transport: &mut T, ours: &[u8], theirs: &mut [u8]) -> Result<(), Error>
where
    T: Read + Write,
{
    transport.write_all(ours).map_err(Error::Send)?;
    transport.flush().map_err(Error::Send)?;
    transport.read_exact(theirs).map_err(Error::Recv)?;
    Ok(())
}
