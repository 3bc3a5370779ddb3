//! Protocol errors.
//!
//! All errors are terminal for the operation that raised them. The
//! handshake is all-or-nothing: a `Stream` is never returned partially
//! initialized. On a `Stream`, an error poisons the affected direction;
//! the opposite direction stays usable until it fails on its own.

use std::fmt;
use std::io;

/// All possible protocol errors.
///
/// Transport failures carry the underlying [`io::Error`] so callers can
/// inspect the cause; every other variant is a bare kind, matching the
/// wire-level fact it reports.
#[derive(Debug)]
pub enum Error {
    /// A keypair generation primitive reported failure.
    Keygen,

    /// Transport write failed or was short.
    Send(io::Error),

    /// Transport read failed or was short.
    Recv(io::Error),

    /// Clean end of stream at a frame boundary.
    Eos,

    /// Protocol violation: tag mismatch or frame length over the bound.
    Proto,

    /// Trust predicate rejected the peer or returned an error.
    Trust,

    /// Signing primitive failed.
    Sign,

    /// Signature check failed.
    Verify,

    /// AEAD encryption failed.
    Encrypt,

    /// AEAD decryption failed: authentication failure or wrong key.
    Decrypt,

    /// Identity or base64 input malformed.
    Parse,
}

/// Discriminant of [`Error`], without the attached cause.
///
/// Used to poison a stream direction after its first failure and to match
/// on error classes in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`Error::Keygen`].
    Keygen,
    /// See [`Error::Send`].
    Send,
    /// See [`Error::Recv`].
    Recv,
    /// See [`Error::Eos`].
    Eos,
    /// See [`Error::Proto`].
    Proto,
    /// See [`Error::Trust`].
    Trust,
    /// See [`Error::Sign`].
    Sign,
    /// See [`Error::Verify`].
    Verify,
    /// See [`Error::Encrypt`].
    Encrypt,
    /// See [`Error::Decrypt`].
    Decrypt,
    /// See [`Error::Parse`].
    Parse,
}

impl Error {
    /// The kind of this error, independent of any attached cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Keygen => ErrorKind::Keygen,
            Self::Send(_) => ErrorKind::Send,
            Self::Recv(_) => ErrorKind::Recv,
            Self::Eos => ErrorKind::Eos,
            Self::Proto => ErrorKind::Proto,
            Self::Trust => ErrorKind::Trust,
            Self::Sign => ErrorKind::Sign,
            Self::Verify => ErrorKind::Verify,
            Self::Encrypt => ErrorKind::Encrypt,
            Self::Decrypt => ErrorKind::Decrypt,
            Self::Parse => ErrorKind::Parse,
        }
    }

    /// Reconstruct an error of the given kind for a poisoned direction.
    ///
    /// The original transport cause is gone by then; `Send`/`Recv` get a
    /// synthetic cause naming the poisoning.
    pub(crate) fn from_kind(kind: ErrorKind) -> Self {
        fn poisoned() -> io::Error {
            io::Error::new(io::ErrorKind::Other, "stream direction already failed")
        }
        match kind {
            ErrorKind::Keygen => Self::Keygen,
            ErrorKind::Send => Self::Send(poisoned()),
            ErrorKind::Recv => Self::Recv(poisoned()),
            ErrorKind::Eos => Self::Eos,
            ErrorKind::Proto => Self::Proto,
            ErrorKind::Trust => Self::Trust,
            ErrorKind::Sign => Self::Sign,
            ErrorKind::Verify => Self::Verify,
            ErrorKind::Encrypt => Self::Encrypt,
            ErrorKind::Decrypt => Self::Decrypt,
            ErrorKind::Parse => Self::Parse,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Deliberately terse. Do not leak details.
        match self {
            Self::Keygen => write!(f, "key generation failed"),
            Self::Send(e) => write!(f, "could not send: {}", e),
            Self::Recv(e) => write!(f, "could not receive: {}", e),
            Self::Eos => write!(f, "end of stream reached"),
            Self::Proto => write!(f, "protocol violation"),
            Self::Trust => write!(f, "no trust"),
            Self::Sign => write!(f, "could not sign"),
            Self::Verify => write!(f, "could not verify"),
            Self::Encrypt => write!(f, "could not encrypt"),
            Self::Decrypt => write!(f, "could not decrypt"),
            Self::Parse => write!(f, "malformed identity"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Send(e) | Self::Recv(e) => Some(e),
            _ => None,
        }
    }
}
