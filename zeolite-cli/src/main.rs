use std::env;
use std::fs;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use zeolite_core::{Identity, SignPublicKey, Stream, TrustError, TrustPolicy, TrustSet, TryClone};

#[derive(Parser, Debug)]
#[command(name = "zeolite", version, about = "Encrypted, authenticated pipes over TCP or Unix sockets")]
struct Args {
    /// Environment variable holding a base64-encoded identity
    #[arg(short = 'i', value_name = "VAR")]
    identity_env: Option<String>,

    /// File holding a raw identity (96 bytes: public then secret)
    #[arg(short = 'I', value_name = "FILE")]
    identity_file: Option<PathBuf>,

    /// Disable trust checking: accept any peer
    #[arg(short = 'k')]
    no_check: bool,

    /// Trust this base64-encoded peer id (repeatable)
    #[arg(short = 't', value_name = "ID")]
    trust_ids: Vec<String>,

    /// Trust every id listed in this file, one per line (repeatable)
    #[arg(short = 'T', value_name = "FILE")]
    trust_files: Vec<PathBuf>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Generate a new identity: raw form to stdout, base64 to stderr
    Gen,
    /// Connect to an address; stdin is sent, received data goes to stdout
    Client {
        /// Peer address, e.g. tcp://host:port or unix://path
        addr: String,
    },
    /// Accept a single connection; stdin is sent, received data goes to stdout
    Single {
        /// Listen address, e.g. tcp://host:port or unix://path
        addr: String,
    },
    /// Accept connections and spawn a command per client, wired to its stdio
    Multi {
        /// Listen address, e.g. tcp://host:port or unix://path
        addr: String,
        /// Command to run per connection
        cmd: String,
        /// Arguments for the command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

/// Where an address points after scheme parsing.
#[derive(Debug, PartialEq, Eq)]
enum Endpoint {
    Tcp(Vec<SocketAddr>),
    Unix(PathBuf),
}

/// The assembled trust decision for this run.
#[derive(Clone)]
enum Trust {
    Any,
    Set(TrustSet),
}

impl TrustPolicy for Trust {
    fn check(&mut self, peer: &SignPublicKey) -> Result<bool, TrustError> {
        info!(peer = %peer, "peer identity");
        match self {
            Trust::Any => Ok(true),
            Trust::Set(set) => set.check(peer),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let identity = load_identity(&args)?;

    if let Mode::Gen = args.mode {
        // Raw form to stdout for piping into a file, readable form to
        // the diagnostic channel.
        io::stdout().write_all(&identity.to_raw())?;
        eprintln!("{}", identity.to_base64());
        return Ok(());
    }

    let trust = build_trust(args.no_check, &args.trust_ids, &args.trust_files)?;
    info!(identity = %identity.public(), "local identity");

    match &args.mode {
        Mode::Gen => unreachable!("handled above"),
        Mode::Client { addr } => run_client(&identity, addr, trust),
        Mode::Single { addr } => run_single(&identity, addr, trust),
        Mode::Multi { addr, cmd, args: cmd_args } => {
            run_multi(Arc::new(identity), addr, trust, cmd.clone(), cmd_args.clone())
        }
    }
}

/// Identity precedence: environment variable, then file, then a fresh
/// throwaway keypair.
fn load_identity(args: &Args) -> Result<Identity> {
    if let Some(var) = &args.identity_env {
        let value = env::var(var).with_context(|| format!("reading identity from ${var}"))?;
        return Identity::from_base64(value.trim())
            .with_context(|| format!("decoding identity from ${var}"));
    }
    if let Some(path) = &args.identity_file {
        let blob = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        return Identity::from_raw(&blob)
            .with_context(|| format!("decoding identity from {}", path.display()));
    }
    Ok(Identity::generate()?)
}

/// Assemble the trust decision. Without `-k`, at least one trust anchor
/// is required: an empty list denies everyone.
fn build_trust(no_check: bool, ids: &[String], files: &[PathBuf]) -> Result<Trust> {
    if no_check {
        return Ok(Trust::Any);
    }

    let mut set = TrustSet::new();
    for id in ids {
        set.insert(id.trim());
    }
    for path in files {
        let listing =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        for line in listing.lines() {
            let line = line.trim();
            if !line.is_empty() {
                set.insert(line);
            }
        }
    }

    if set.is_empty() {
        bail!("no trust anchors given; pass -t/-T, or -k to accept any peer");
    }
    Ok(Trust::Set(set))
}

/// Parse `scheme://value` into an endpoint.
fn parse_addr(addr: &str) -> Result<Endpoint> {
    let (scheme, value) = addr
        .split_once("://")
        .ok_or_else(|| anyhow!("invalid address {addr:?}, expected scheme://value"))?;

    let resolve = |value: &str| -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = value
            .to_socket_addrs()
            .with_context(|| format!("resolving {value:?}"))?
            .collect();
        Ok(addrs)
    };

    let endpoint = match scheme {
        "tcp" => Endpoint::Tcp(resolve(value)?),
        "tcp4" => Endpoint::Tcp(resolve(value)?.into_iter().filter(SocketAddr::is_ipv4).collect()),
        "tcp6" => Endpoint::Tcp(resolve(value)?.into_iter().filter(SocketAddr::is_ipv6).collect()),
        "unix" => Endpoint::Unix(PathBuf::from(value)),
        other => bail!("unknown address scheme {other:?}"),
    };

    if let Endpoint::Tcp(addrs) = &endpoint {
        if addrs.is_empty() {
            bail!("{addr:?} resolved to no usable address");
        }
    }
    Ok(endpoint)
}

fn run_client(identity: &Identity, addr: &str, trust: Trust) -> Result<()> {
    match parse_addr(addr)? {
        Endpoint::Tcp(addrs) => {
            let transport = TcpStream::connect(&addrs[..])
                .with_context(|| format!("connecting to {addr}"))?;
            pump_stdio(identity, transport, trust)
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let transport = UnixStream::connect(&path)
                .with_context(|| format!("connecting to {}", path.display()))?;
            pump_stdio(identity, transport, trust)
        }
        #[cfg(not(unix))]
        Endpoint::Unix(_) => bail!("unix sockets are not available on this platform"),
    }
}

fn run_single(identity: &Identity, addr: &str, trust: Trust) -> Result<()> {
    match parse_addr(addr)? {
        Endpoint::Tcp(addrs) => {
            let listener =
                TcpListener::bind(&addrs[..]).with_context(|| format!("binding {addr}"))?;
            let (transport, from) = listener.accept().context("accepting connection")?;
            info!(%from, "connection accepted");
            pump_stdio(identity, transport, trust)
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let listener = UnixListener::bind(&path)
                .with_context(|| format!("binding {}", path.display()))?;
            let (transport, _) = listener.accept().context("accepting connection")?;
            info!("connection accepted");
            pump_stdio(identity, transport, trust)
        }
        #[cfg(not(unix))]
        Endpoint::Unix(_) => bail!("unix sockets are not available on this platform"),
    }
}

fn run_multi(
    identity: Arc<Identity>,
    addr: &str,
    trust: Trust,
    cmd: String,
    cmd_args: Vec<String>,
) -> Result<()> {
    match parse_addr(addr)? {
        Endpoint::Tcp(addrs) => {
            let listener =
                TcpListener::bind(&addrs[..]).with_context(|| format!("binding {addr}"))?;
            loop {
                let (transport, from) = listener.accept().context("accepting connection")?;
                info!(%from, "connection accepted");
                spawn_handler(identity.clone(), transport, trust.clone(), cmd.clone(), cmd_args.clone());
            }
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let listener = UnixListener::bind(&path)
                .with_context(|| format!("binding {}", path.display()))?;
            loop {
                let (transport, _) = listener.accept().context("accepting connection")?;
                info!("connection accepted");
                spawn_handler(identity.clone(), transport, trust.clone(), cmd.clone(), cmd_args.clone());
            }
        }
        #[cfg(not(unix))]
        Endpoint::Unix(_) => bail!("unix sockets are not available on this platform"),
    }
}

fn spawn_handler<T>(identity: Arc<Identity>, transport: T, trust: Trust, cmd: String, args: Vec<String>)
where
    T: Read + Write + TryClone + Send + 'static,
{
    thread::spawn(move || {
        if let Err(e) = serve_connection(&identity, transport, trust, &cmd, &args) {
            error!(error = %e, "handler failed");
        }
    });
}

/// One connection of the `multi` server: handshake, spawn the command,
/// wire the stream to its stdio.
fn serve_connection<T>(
    identity: &Identity,
    transport: T,
    trust: Trust,
    cmd: &str,
    args: &[String],
) -> Result<()>
where
    T: Read + Write + TryClone + Send + 'static,
{
    let stream = identity.handshake(transport, trust)?;
    info!(peer = %stream.peer_public_key(), "session established");

    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawning {cmd}"))?;

    let mut child_in = child.stdin.take().ok_or_else(|| anyhow!("child stdin missing"))?;
    let mut child_out = child.stdout.take().ok_or_else(|| anyhow!("child stdout missing"))?;
    let mut child_err = child.stderr.take().ok_or_else(|| anyhow!("child stderr missing"))?;

    let (mut tx, mut rx) = stream.into_split().context("splitting stream")?;

    // Child output becomes frames; child diagnostics pass through.
    let forward = thread::spawn(move || {
        let _ = io::copy(&mut child_out, &mut tx);
    });
    let diagnostics = thread::spawn(move || {
        let _ = io::copy(&mut child_err, &mut io::stderr());
    });

    // Frames become child input, one write per record.
    let copied = rx.copy_blocks(&mut child_in);
    drop(child_in);

    let _ = forward.join();
    let _ = diagnostics.join();
    let status = child.wait().context("waiting for handler process")?;
    let received = copied?;
    info!(bytes = received, %status, "session finished");
    Ok(())
}

/// Interactive pumping: stdin is framed onto the wire while received
/// frames land on stdout.
fn pump_stdio<T>(identity: &Identity, transport: T, trust: Trust) -> Result<()>
where
    T: Read + Write + TryClone + Send + 'static,
{
    let stream = identity.handshake(transport, trust)?;
    info!(peer = %stream.peer_public_key(), "session established");
    pump(stream, io::stdin(), io::stdout())
}

fn pump<T, R, W>(stream: Stream<T>, mut input: R, mut output: W) -> Result<()>
where
    T: Read + Write + TryClone + Send + 'static,
    R: Read + Send + 'static,
    W: Write,
{
    let (mut tx, mut rx) = stream.into_split().context("splitting stream")?;

    // Each chunk read from the input travels as one frame.
    thread::spawn(move || {
        let _ = io::copy(&mut input, &mut tx);
    });

    let received = rx.copy_blocks(&mut output)?;
    info!(bytes = received, "stream closed by peer");
    Ok(())
}
