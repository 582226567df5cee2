//! Time sources and the datagram transport abstraction.
//!
//! The client engine never touches sockets or clocks directly. It drives a [`Transport`]
//! for I/O and a [`TimeSource`] for wall-clock and tick readings, which keeps the state
//! machine testable and lets embedders swap in their platform's networking stack. The
//! [`UdpTransport`] provided here wraps `std::net::UdpSocket` for hosted targets.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::debug;

use crate::error::Error;
use crate::event::{Event, EventHandle};
use crate::protocol::NtpTimestamp;
use crate::unix_time;

/// A clock the engine reads for timestamps and timeouts.
///
/// `unix_micros` stamps protocol events; `tick_ms` is a free-running monotonic
/// millisecond counter used for timeouts and the request nonce. The two need not be
/// related and `tick_ms` is expected to wrap.
pub trait TimeSource: Send + Sync {
    /// Current time in microseconds since the Unix epoch.
    fn unix_micros(&self) -> u64;

    /// A free-running millisecond tick counter. Wrapping is fine; consumers compare
    /// ticks with wrapping arithmetic.
    fn tick_ms(&self) -> u32;

    /// The local clock as an NTP timestamp, if the platform keeps one.
    fn local_sntp_time(&self) -> Option<NtpTimestamp> {
        None
    }
}

/// A [`TimeSource`] backed by the operating system clock.
///
/// The tick counter measures elapsed time from the first reading, so early-session tick
/// values stay far from the wrap point.
#[derive(Debug, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    /// Creates a system-clock time source.
    pub fn new() -> Self {
        SystemTimeSource
    }
}

static TICK_ORIGIN: OnceLock<Instant> = OnceLock::new();

impl TimeSource for SystemTimeSource {
    fn unix_micros(&self) -> u64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_micros() as u64,
            // Clock set before 1970; treat as the epoch.
            Err(_) => 0,
        }
    }

    fn tick_ms(&self) -> u32 {
        let origin = TICK_ORIGIN.get_or_init(Instant::now);
        origin.elapsed().as_millis() as u32
    }

    fn local_sntp_time(&self) -> Option<NtpTimestamp> {
        let (seconds, fraction) = unix_time::unix_micros_to_ntp(self.unix_micros());
        Some(NtpTimestamp { seconds, fraction })
    }
}

/// How the transport should behave while a datagram is outstanding.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TimeoutPolicy {
    /// Non-blocking I/O; the engine polls until the timeout elapses on its tick clock.
    #[default]
    Polling,
    /// Blocking I/O with OS-level send and receive timeouts.
    Blocking,
}

/// Parameters handed to [`Transport::open`].
#[derive(Clone, Copy, Debug)]
pub struct TransportConfig {
    /// The server to exchange datagrams with.
    pub server: SocketAddr,
    /// Round-trip budget in milliseconds.
    pub timeout_ms: u32,
    /// Polling or blocking behaviour.
    pub policy: TimeoutPolicy,
    /// Network interface index to bind, for stacks that route per interface. The
    /// standard-library UDP transport has no portable way to honour this and ignores it.
    pub interface: Option<u32>,
}

/// A connectionless datagram endpoint the engine can drive.
///
/// `send` and `recv` report would-block and timed-out conditions through the usual
/// `io::ErrorKind` values; the engine maps them onto its timeout handling.
pub trait Transport {
    /// Opens (or reopens) the endpoint toward the configured server.
    fn open(&mut self, config: &TransportConfig) -> Result<(), Error>;

    /// Sends one datagram toward the server.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Receives one datagram from the server.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Releases the endpoint. Idempotent.
    fn close(&mut self);

    /// Whether the endpoint is currently open.
    fn is_open(&self) -> bool;
}

/// A [`Transport`] over `std::net::UdpSocket`.
///
/// When built via [`UdpTransport::with_notifier`], every successfully received datagram is
/// announced through the event handle, which captures the arrival timestamp the way a
/// hardware receive-completion interrupt would.
#[derive(Debug, Default)]
pub struct UdpTransport<S> {
    socket: Option<UdpSocket>,
    server: Option<SocketAddr>,
    notifier: Option<EventHandle<S>>,
}

impl<S> UdpTransport<S>
where
    S: TimeSource,
{
    /// Creates a closed transport.
    pub fn new() -> Self {
        UdpTransport {
            socket: None,
            server: None,
            notifier: None,
        }
    }

    /// Attaches an event handle that is pumped on every received datagram.
    pub fn with_notifier(mut self, notifier: EventHandle<S>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

impl<S> Transport for UdpTransport<S>
where
    S: TimeSource,
{
    fn open(&mut self, config: &TransportConfig) -> Result<(), Error> {
        self.close();
        let socket = UdpSocket::bind(bind_addr_for(&config.server)).map_err(Error::TransportCreate)?;
        match config.policy {
            TimeoutPolicy::Polling => {
                socket.set_nonblocking(true).map_err(Error::TransportConfigure)?;
            }
            TimeoutPolicy::Blocking => {
                let timeout = std::time::Duration::from_millis(u64::from(config.timeout_ms.max(1)));
                socket
                    .set_read_timeout(Some(timeout))
                    .and_then(|()| socket.set_write_timeout(Some(timeout)))
                    .map_err(Error::TransportConfigure)?;
            }
        }
        debug!("opened udp transport toward {}", config.server);
        self.socket = Some(socket);
        self.server = Some(config.server);
        Ok(())
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let socket = self.socket.as_ref().ok_or(io::ErrorKind::NotConnected)?;
        let server = self.server.ok_or(io::ErrorKind::NotConnected)?;
        socket.send_to(buf, server)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let socket = self.socket.as_ref().ok_or(io::ErrorKind::NotConnected)?;
        let server = self.server.ok_or(io::ErrorKind::NotConnected)?;
        let (len, src) = socket.recv_from(buf)?;
        if src.ip() != server.ip() {
            debug!("dropping datagram from unexpected source {src}");
            return Err(io::ErrorKind::WouldBlock.into());
        }
        if let Some(notifier) = &self.notifier {
            // A failed pump means nothing was armed; the engine reports that through the
            // missing arrival timestamp instead.
            let _ = notifier.pump(Event::ReceiveComplete);
        }
        Ok(len)
    }

    fn close(&mut self) {
        self.socket = None;
        self.server = None;
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }
}

/// The wildcard bind address matching the address family of `addr`.
fn bind_addr_for(addr: &SocketAddr) -> &'static str {
    if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }
}

/// Resolves `host` (a `host:port` string) to the first socket address it yields.
pub fn resolve_host(host: &str) -> Result<SocketAddr, Error> {
    host.to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| Error::NameResolution {
            host: host.to_string(),
        })
}
