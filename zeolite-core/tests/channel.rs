//! End-to-end tests over loopback TCP: one OS thread per peer, both
//! running the same mirrored handshake.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use rand_core::{OsRng, RngCore};
use zeolite_core::{ErrorKind, Identity, SignPublicKey, TrustAny, TrustError};

/// Byte length of one side's handshake output.
const HANDSHAKE_LEN: u64 = 8 + 32 + 96 + 72 + 24;
/// Offset of the combined signed message (signature, then ephemeral key)
/// inside one side's handshake output.
const SIGNED_OFFSET: usize = 8 + 32;
/// Offset of the ephemeral public key itself.
const EPHEMERAL_OFFSET: usize = SIGNED_OFFSET + 64;

fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let connector = thread::spawn(move || TcpStream::connect(addr).expect("connect"));
    let (accepted, _) = listener.accept().expect("accept");
    (accepted, connector.join().expect("connector thread"))
}

/// Flips one bit of the byte at a fixed offset in this side's write
/// sequence. Reads pass through untouched.
struct Tamper<T> {
    inner: T,
    written: usize,
    flip_at: usize,
}

impl<T> Tamper<T> {
    fn new(inner: T, flip_at: usize) -> Self {
        Self {
            inner,
            written: 0,
            flip_at,
        }
    }
}

impl<T: Write> Write for Tamper<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut owned = buf.to_vec();
        if self.written <= self.flip_at && self.flip_at < self.written + owned.len() {
            owned[self.flip_at - self.written] ^= 0x01;
        }
        let n = self.inner.write(&owned)?;
        self.written += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<T: Read> Read for Tamper<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Counts every byte this side hands to the transport.
struct Counting<T> {
    inner: T,
    written: Arc<AtomicU64>,
}

impl<T: Write> Write for Counting<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<T: Read> Read for Counting<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Records every byte this side writes.
struct Recording<T> {
    inner: T,
    log: Arc<Mutex<Vec<u8>>>,
}

impl<T: Write> Write for Recording<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.log.lock().expect("log lock").extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<T: Read> Read for Recording<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[test]
fn happy_path_round_trip() {
    let alice = Identity::generate().unwrap();
    let bob = Identity::generate().unwrap();
    let alice_key = *alice.public();
    let bob_key = *bob.public();
    let (transport_a, transport_b) = tcp_pair();

    let peer = thread::spawn(move || {
        let mut stream = bob.handshake(transport_b, TrustAny).expect("bob handshake");
        let message = stream.recv().expect("bob recv");
        stream.send(&[]).expect("bob send empty");
        (message, *stream.peer_public_key())
    });

    let mut stream = alice.handshake(transport_a, TrustAny).expect("alice handshake");
    assert_eq!(stream.peer_public_key(), &bob_key);

    stream.send(b"hello world").expect("alice send");
    // The zero-length reply still authenticates and arrives as a frame.
    assert_eq!(stream.recv().expect("alice recv"), Vec::<u8>::new());

    let (message, observed) = peer.join().expect("peer thread");
    assert_eq!(message, b"hello world");
    assert_eq!(observed, alice_key);
}

#[test]
fn ordering_is_preserved_per_direction() {
    let alice = Identity::generate().unwrap();
    let bob = Identity::generate().unwrap();
    let (transport_a, transport_b) = tcp_pair();

    let peer = thread::spawn(move || {
        let stream = bob.handshake(transport_b, TrustAny).expect("bob handshake");
        let (mut tx, mut rx) = stream.into_split().expect("split");

        let sender = thread::spawn(move || {
            for i in 0..50u32 {
                tx.send(format!("bob-{i}").as_bytes()).expect("bob send");
            }
        });

        let mut seen = Vec::new();
        for _ in 0..50 {
            seen.push(rx.recv().expect("bob recv"));
        }
        sender.join().expect("bob sender");
        seen
    });

    let stream = alice.handshake(transport_a, TrustAny).expect("alice handshake");
    let (mut tx, mut rx) = stream.into_split().expect("split");

    let sender = thread::spawn(move || {
        for i in 0..50u32 {
            tx.send(format!("alice-{i}").as_bytes()).expect("alice send");
        }
    });

    let mut seen = Vec::new();
    for _ in 0..50 {
        seen.push(rx.recv().expect("alice recv"));
    }
    sender.join().expect("alice sender");

    let bob_seen = peer.join().expect("peer thread");
    for (i, message) in seen.iter().enumerate() {
        assert_eq!(message.as_slice(), format!("bob-{i}").as_bytes());
    }
    for (i, message) in bob_seen.iter().enumerate() {
        assert_eq!(message.as_slice(), format!("alice-{i}").as_bytes());
    }
}

#[test]
fn rejecting_peer_aborts_both_sides() {
    let alice = Identity::generate().unwrap();
    let bob = Identity::generate().unwrap();
    let (transport_a, transport_b) = tcp_pair();

    let peer = thread::spawn(move || {
        bob.handshake(transport_b, TrustAny)
            .map(|_| ())
            .expect_err("bob must fail")
    });

    let deny = |_: &SignPublicKey| -> Result<bool, TrustError> { Ok(false) };
    let err = alice
        .handshake(transport_a, deny)
        .map(|_| ())
        .expect_err("alice must fail");
    assert_eq!(err.kind(), ErrorKind::Trust);

    // Bob's own predicate accepted, so he learns of the rejection only
    // when the transport dies under him.
    let bob_err = peer.join().expect("peer thread");
    assert!(
        matches!(bob_err.kind(), ErrorKind::Recv | ErrorKind::Send),
        "unexpected kind: {:?}",
        bob_err.kind()
    );
}

#[test]
fn erroring_predicate_reads_as_rejection() {
    let alice = Identity::generate().unwrap();
    let bob = Identity::generate().unwrap();
    let (transport_a, transport_b) = tcp_pair();

    let peer = thread::spawn(move || {
        let _ = bob.handshake(transport_b, TrustAny);
    });

    let failing = |_: &SignPublicKey| -> Result<bool, TrustError> { Err("registry down".into()) };
    let err = alice
        .handshake(transport_a, failing)
        .map(|_| ())
        .expect_err("alice must fail");
    assert_eq!(err.kind(), ErrorKind::Trust);
    peer.join().expect("peer thread");
}

#[test]
fn wrong_protocol_tag_aborts() {
    let alice = Identity::generate().unwrap();
    let (transport_a, mut transport_b) = tcp_pair();

    let peer = thread::spawn(move || {
        transport_b.write_all(b"xeolite1").expect("fake tag");
        // Consume the honest side's tag so its write cannot fail first.
        let mut sink = [0u8; 8];
        let _ = transport_b.read_exact(&mut sink);
    });

    let err = alice
        .handshake(transport_a, TrustAny)
        .map(|_| ())
        .expect_err("alice must fail");
    assert_eq!(err.kind(), ErrorKind::Proto);
    peer.join().expect("peer thread");
}

#[test]
fn truncated_handshake_is_a_transport_error() {
    let alice = Identity::generate().unwrap();
    let (transport_a, mut transport_b) = tcp_pair();

    let peer = thread::spawn(move || {
        transport_b.write_all(b"zeolite1").expect("tag");
        // Half a public key, then hang up.
        transport_b.write_all(&[0u8; 16]).expect("partial key");
        let mut sink = [0u8; 40];
        let _ = transport_b.read_exact(&mut sink);
    });

    let err = alice
        .handshake(transport_a, TrustAny)
        .map(|_| ())
        .expect_err("alice must fail");
    assert!(
        matches!(err.kind(), ErrorKind::Recv | ErrorKind::Send),
        "unexpected kind: {:?}",
        err.kind()
    );
    peer.join().expect("peer thread");
}

#[test]
fn tampered_ephemeral_signature_fails_verification() {
    let alice = Identity::generate().unwrap();
    let bob = Identity::generate().unwrap();
    let (transport_a, transport_b) = tcp_pair();

    let peer = thread::spawn(move || {
        bob.handshake(transport_b, TrustAny)
            .map(|_| ())
            .expect_err("bob must fail")
    });

    // Flip a signature bit inside alice's combined signed message.
    let tampered = Tamper::new(transport_a, SIGNED_OFFSET + 5);
    assert!(alice.handshake(tampered, TrustAny).is_err());

    let bob_err = peer.join().expect("peer thread");
    assert_eq!(bob_err.kind(), ErrorKind::Verify);
}

#[test]
fn large_frame_round_trip_with_exact_wire_size() {
    let alice = Identity::generate().unwrap();
    let bob = Identity::generate().unwrap();
    let (transport_a, transport_b) = tcp_pair();

    let payload_len = 1 << 20;
    let mut payload = vec![0u8; payload_len];
    OsRng.fill_bytes(&mut payload);
    let expected = payload.clone();

    let peer = thread::spawn(move || {
        let mut stream = bob.handshake(transport_b, TrustAny).expect("bob handshake");
        stream.recv().expect("bob recv")
    });

    let written = Arc::new(AtomicU64::new(0));
    let counting = Counting {
        inner: transport_a,
        written: written.clone(),
    };

    let mut stream = alice.handshake(counting, TrustAny).expect("alice handshake");
    assert_eq!(written.load(Ordering::SeqCst), HANDSHAKE_LEN);

    stream.send(&payload).expect("alice send");
    assert_eq!(
        written.load(Ordering::SeqCst),
        HANDSHAKE_LEN + 4 + payload_len as u64 + 17
    );

    assert_eq!(peer.join().expect("peer thread"), expected);
}

#[test]
fn tampered_frame_poisons_the_direction() {
    let alice = Identity::generate().unwrap();
    let bob = Identity::generate().unwrap();
    let (transport_a, transport_b) = tcp_pair();

    let peer = thread::spawn(move || {
        let mut stream = bob.handshake(transport_b, TrustAny).expect("bob handshake");
        let first = stream.recv().expect_err("tampered frame must fail").kind();
        let second = stream.recv().expect_err("direction must stay dead").kind();
        (first, second)
    });

    // First data frame: 4-byte prefix at HANDSHAKE_LEN, ciphertext after.
    let tampered = Tamper::new(transport_a, HANDSHAKE_LEN as usize + 4 + 2);
    let mut stream = alice.handshake(tampered, TrustAny).expect("alice handshake");
    stream.send(b"attack at dawn").expect("first send");
    stream.send(b"fall back").expect("second send");

    let (first, second) = peer.join().expect("peer thread");
    assert_eq!(first, ErrorKind::Decrypt);
    assert_eq!(second, ErrorKind::Decrypt);
}

#[test]
fn ephemeral_keys_are_unique_per_session() {
    let alice = Identity::generate().unwrap();

    let mut observed = Vec::new();
    for _ in 0..2 {
        let bob = Identity::generate().unwrap();
        let (transport_a, transport_b) = tcp_pair();

        let peer = thread::spawn(move || {
            let _ = bob.handshake(transport_b, TrustAny).expect("bob handshake");
        });

        let log = Arc::new(Mutex::new(Vec::new()));
        let recording = Recording {
            inner: transport_a,
            log: log.clone(),
        };
        let _stream = alice.handshake(recording, TrustAny).expect("alice handshake");
        peer.join().expect("peer thread");

        let bytes = log.lock().expect("log lock");
        observed.push(bytes[EPHEMERAL_OFFSET..EPHEMERAL_OFFSET + 32].to_vec());
    }

    assert_ne!(observed[0], observed[1], "ephemeral keys must not repeat");
}

#[test]
fn clean_shutdown_reads_as_end_of_stream() {
    let alice = Identity::generate().unwrap();
    let bob = Identity::generate().unwrap();
    let (transport_a, transport_b) = tcp_pair();

    let peer = thread::spawn(move || {
        let mut stream = bob.handshake(transport_b, TrustAny).expect("bob handshake");
        stream.send(b"parting words").expect("bob send");
        // Dropping the stream closes the socket.
    });

    let mut stream = alice.handshake(transport_a, TrustAny).expect("alice handshake");
    let mut sink = Vec::new();
    let total = stream.copy_blocks(&mut sink).expect("copy to eos");
    assert_eq!(total, 13);
    assert_eq!(sink, b"parting words");
    peer.join().expect("peer thread");
}
