//! Zeolite Protocol Core
//!
//! A symmetric, peer-to-peer secure channel over any ordered, reliable
//! byte transport (TCP, Unix domain sockets). The handshake is
//! *mirrored*: both peers execute the same six lockstep phases, so
//! there is no client or server role in the cryptographic state
//! machine. A successful handshake yields a [`Stream`]: an
//! authenticated, confidential, length-framed message channel with
//! perfect forward secrecy.
//!
//! This crate provides:
//! - Long-term identities and their raw/base64 persistence forms
//! - The caller-supplied trust boundary ([`TrustPolicy`])
//! - The lockstep handshake engine
//! - The framed record layer with strict bounds checking
//!
//! # Security Invariants & Defense-in-Depth
//!
//! - A single fixed cipher suite; no negotiation, no fallback
//! - Any protocol, bounds, or cryptographic violation is terminal
//! - Ephemeral secrets never outlive the handshake call
//! - Secret key material is zeroized on drop
//! - Secretstream states have exactly one owner per direction
//! - Direct use of `unsafe` is forbidden (#![forbid(unsafe_code)])
//! - No retries, no recovery, no partial processing

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod crypto;
pub mod error;
mod handshake;
pub mod identity;
pub mod stream;
pub mod trust;

pub use crypto::SignPublicKey;
pub use error::{Error, ErrorKind};
pub use handshake::{PROTOCOL, PROTOCOL_LEN};
pub use identity::{Identity, IDENTITY_LEN};
pub use stream::{RecvHalf, SendHalf, Stream, TryClone, DEFAULT_MAX_FRAME_LEN};
pub use trust::{TrustAny, TrustError, TrustPolicy, TrustSet};
