//! The framed record layer.
//!
//! After the handshake, every message travels as one frame:
//!
//! ```text
//! | 4      | little-endian u32 length n
//! | n + 17 | secretstream ciphertext (payload + authenticated framing)
//! ```
//!
//! Frames are strictly ordered per direction by the secretstream state.
//! A zero-length frame is legal: it carries no payload but still
//! advances and authenticates the stream, which makes it usable as a
//! keepalive.
//!
//! # Invariants
//!
//! - The [`Stream`] owns the transport; nothing else reads or writes it
//! - Each direction's state is advanced by exactly one owner, and none
//!   of these types implement `Clone`
//! - An error poisons its direction: later calls return the same kind
//!   without touching the transport

use std::io::{self, Read, Write};

use crate::crypto::{RecvState, SendState, SignPublicKey, STREAM_OVERHEAD};
use crate::error::{Error, ErrorKind};

/// Length prefix size of a frame.
const FRAME_PREFIX_LEN: usize = 4;

/// Default cap on an incoming frame's payload length.
///
/// The length field could name anything up to `u32::MAX`; bounding it
/// keeps a hostile peer from forcing a giant allocation. Adjust with
/// [`Stream::set_max_frame_len`] if a protocol on top needs more.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A transport handle that can be duplicated, so the two directions of a
/// [`Stream`] can be driven from separate threads.
///
/// Both handles refer to the same underlying connection; sockets
/// tolerate a concurrent reader and writer.
pub trait TryClone: Sized {
    /// Duplicate the handle.
    ///
    /// # Errors
    ///
    /// Propagates the OS error if duplication fails.
    fn try_clone(&self) -> io::Result<Self>;
}

impl TryClone for std::net::TcpStream {
    fn try_clone(&self) -> io::Result<Self> {
        std::net::TcpStream::try_clone(self)
    }
}

#[cfg(unix)]
impl TryClone for std::os::unix::net::UnixStream {
    fn try_clone(&self) -> io::Result<Self> {
        std::os::unix::net::UnixStream::try_clone(self)
    }
}

/// Sending direction: secretstream state plus poison latch.
struct TxDir {
    state: SendState,
    poisoned: Option<ErrorKind>,
}

impl TxDir {
    fn send<W: Write>(&mut self, transport: &mut W, message: &[u8]) -> Result<(), Error> {
        if let Some(kind) = self.poisoned {
            return Err(Error::from_kind(kind));
        }
        let result = self.send_inner(transport, message);
        if let Err(ref e) = result {
            self.poisoned = Some(e.kind());
        }
        result
    }

    fn send_inner<W: Write>(&mut self, transport: &mut W, message: &[u8]) -> Result<(), Error> {
        let length = u32::try_from(message.len()).map_err(|_| Error::Proto)?;
        let cipher = self.state.push(message)?;

        // One combined write: the length prefix never travels without
        // its body.
        let mut frame = Vec::with_capacity(FRAME_PREFIX_LEN + cipher.len());
        frame.extend_from_slice(&length.to_le_bytes());
        frame.extend_from_slice(&cipher);

        transport.write_all(&frame).map_err(Error::Send)?;
        transport.flush().map_err(Error::Send)?;
        Ok(())
    }
}

/// Receiving direction: secretstream state, frame bound, poison latch.
struct RxDir {
    state: RecvState,
    max_frame_len: usize,
    poisoned: Option<ErrorKind>,
}

impl RxDir {
    fn recv<R: Read>(&mut self, transport: &mut R) -> Result<Vec<u8>, Error> {
        if let Some(kind) = self.poisoned {
            return Err(Error::from_kind(kind));
        }
        let result = self.recv_inner(transport);
        if let Err(ref e) = result {
            self.poisoned = Some(e.kind());
        }
        result
    }

    fn recv_inner<R: Read>(&mut self, transport: &mut R) -> Result<Vec<u8>, Error> {
        let mut prefix = [0u8; FRAME_PREFIX_LEN];
        read_prefix(transport, &mut prefix)?;

        let length = u32::from_le_bytes(prefix) as usize;
        if length > self.max_frame_len {
            return Err(Error::Proto);
        }

        let mut cipher = vec![0u8; length + STREAM_OVERHEAD];
        transport.read_exact(&mut cipher).map_err(Error::Recv)?;

        self.state.pull(&cipher)
    }
}

/// Read the 4-byte length prefix, distinguishing a clean end of stream
/// (EOF before any prefix byte, [`Error::Eos`]) from a truncated frame
/// (EOF after some bytes, [`Error::Recv`]).
fn read_prefix<R: Read>(transport: &mut R, prefix: &mut [u8]) -> Result<(), Error> {
    let mut filled = 0;
    while filled < prefix.len() {
        match transport.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Err(Error::Eos),
            Ok(0) => {
                return Err(Error::Recv(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "transport closed inside a frame header",
                )))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::Recv(e)),
        }
    }
    Ok(())
}

/// An established secure channel over a transport.
///
/// Produced by [`Identity::handshake`](crate::Identity::handshake); owns
/// the transport and both directions' secretstream states. Sending and
/// receiving are independent; to drive them from separate threads, use
/// [`Stream::into_split`].
pub struct Stream<T> {
    transport: T,
    peer: SignPublicKey,
    tx: TxDir,
    rx: RxDir,
}

impl<T> Stream<T> {
    pub(crate) fn new(transport: T, peer: SignPublicKey, send: SendState, recv: RecvState) -> Self {
        Self {
            transport,
            peer,
            tx: TxDir {
                state: send,
                poisoned: None,
            },
            rx: RxDir {
                state: recv,
                max_frame_len: DEFAULT_MAX_FRAME_LEN,
                poisoned: None,
            },
        }
    }

    /// The peer's long-term public key, for audit and logging.
    pub fn peer_public_key(&self) -> &SignPublicKey {
        &self.peer
    }

    /// Adjust the cap on incoming frame payload length.
    pub fn set_max_frame_len(&mut self, limit: usize) {
        self.rx.max_frame_len = limit;
    }

    /// Split into independently owned halves over duplicated transport
    /// handles, one per direction.
    ///
    /// # Errors
    ///
    /// Propagates the OS error if the transport cannot be duplicated.
    pub fn into_split(self) -> io::Result<(SendHalf<T>, RecvHalf<T>)>
    where
        T: TryClone,
    {
        let write_handle = self.transport.try_clone()?;
        Ok((
            SendHalf {
                transport: write_handle,
                tx: self.tx,
            },
            RecvHalf {
                transport: self.transport,
                peer: self.peer,
                rx: self.rx,
            },
        ))
    }
}

impl<T: Read + Write> Stream<T> {
    /// Encrypt and send one message as one frame.
    ///
    /// Returns only after the whole frame has been handed to the
    /// transport.
    ///
    /// # Errors
    ///
    /// [`Error::Encrypt`] if the AEAD rejects, [`Error::Send`] if the
    /// transport fails, [`Error::Proto`] if the message cannot fit a
    /// frame. Any error poisons the sending direction.
    pub fn send(&mut self, message: &[u8]) -> Result<(), Error> {
        self.tx.send(&mut self.transport, message)
    }

    /// Receive and decrypt exactly one frame.
    ///
    /// # Errors
    ///
    /// [`Error::Eos`] on clean EOF at a frame boundary, [`Error::Recv`]
    /// on transport failure or EOF mid-frame, [`Error::Proto`] if the
    /// announced length exceeds the bound, [`Error::Decrypt`] if
    /// authentication fails. Any error poisons the receiving direction.
    pub fn recv(&mut self) -> Result<Vec<u8>, Error> {
        self.rx.recv(&mut self.transport)
    }

    /// Drain incoming frames into a byte sink, one sink write per frame
    /// so message boundaries survive (a pipe to a record-oriented
    /// subprocess sees one write per record).
    ///
    /// Returns the total payload bytes delivered once the peer closes
    /// cleanly.
    ///
    /// # Errors
    ///
    /// Any error other than a clean end of stream, after delivering all
    /// prior frames to the sink.
    pub fn copy_blocks<W: io::Write>(&mut self, sink: &mut W) -> Result<u64, Error> {
        copy_blocks_inner(&mut self.rx, &mut self.transport, sink)
    }
}

/// Each `write` call sends the chunk as exactly one frame, so callers
/// pick the message boundaries; `io::copy` from a reader frames each
/// read it performs.
impl<T: Read + Write> Write for Stream<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf).map_err(io_error)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.transport.flush()
    }
}

/// The sending direction of a split [`Stream`].
pub struct SendHalf<T> {
    transport: T,
    tx: TxDir,
}

impl<T: Write> SendHalf<T> {
    /// Encrypt and send one message as one frame.
    ///
    /// # Errors
    ///
    /// As [`Stream::send`].
    pub fn send(&mut self, message: &[u8]) -> Result<(), Error> {
        self.tx.send(&mut self.transport, message)
    }
}

impl<T: Write> Write for SendHalf<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf).map_err(io_error)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.transport.flush()
    }
}

/// The receiving direction of a split [`Stream`].
pub struct RecvHalf<T> {
    transport: T,
    peer: SignPublicKey,
    rx: RxDir,
}

impl<T> RecvHalf<T> {
    /// The peer's long-term public key, for audit and logging.
    pub fn peer_public_key(&self) -> &SignPublicKey {
        &self.peer
    }

    /// Adjust the cap on incoming frame payload length.
    pub fn set_max_frame_len(&mut self, limit: usize) {
        self.rx.max_frame_len = limit;
    }
}

impl<T: Read> RecvHalf<T> {
    /// Receive and decrypt exactly one frame.
    ///
    /// # Errors
    ///
    /// As [`Stream::recv`].
    pub fn recv(&mut self) -> Result<Vec<u8>, Error> {
        self.rx.recv(&mut self.transport)
    }

    /// Drain incoming frames into a byte sink; see
    /// [`Stream::copy_blocks`].
    ///
    /// # Errors
    ///
    /// As [`Stream::copy_blocks`].
    pub fn copy_blocks<W: io::Write>(&mut self, sink: &mut W) -> Result<u64, Error> {
        copy_blocks_inner(&mut self.rx, &mut self.transport, sink)
    }
}

fn copy_blocks_inner<R: Read, W: io::Write>(
    rx: &mut RxDir,
    transport: &mut R,
    sink: &mut W,
) -> Result<u64, Error> {
    let mut total = 0u64;
    loop {
        let message = match rx.recv(transport) {
            Ok(message) => message,
            Err(e) if e.kind() == ErrorKind::Eos => return Ok(total),
            Err(e) => return Err(e),
        };
        sink.write_all(&message).map_err(Error::Send)?;
        total += message.len() as u64;
    }
}

fn io_error(e: Error) -> io::Error {
    match e {
        Error::Send(inner) | Error::Recv(inner) => inner,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}
