//! The SNTP client state machine.
//!
//! [`SntpClient`] drives one request/response exchange at a time through an explicit
//! [`State`] value: open the transport, send the request, wait for the response, validate
//! it, done. [`SntpClient::run_exchange`] steps the machine until it either completes with
//! a [`TimestampSet`] or fails; on failure the transport is torn down and the machine
//! returns to [`State::Open`] so the next call starts clean, while success leaves the
//! transport open and the machine parked in [`State::Sending`] for the next round.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{Error, InvalidReason};
use crate::event::{Event, EventHandle, EventRegister};
use crate::protocol::{
    self, ConstPackedSizeBytes, KissOfDeath, NtpTimestamp, Packet, WriteBytes, MAX_MESSAGE_SIZE,
};
use crate::transport::{TimeSource, TimeoutPolicy, Transport, TransportConfig};
use crate::validate::validate_response;

/// Round-trip budget applied until [`SntpClient::set_timeout`] overrides it.
pub const DEFAULT_TIMEOUT_MS: u32 = 3000;

/// Where the exchange state machine currently stands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// No transport open; the next exchange starts by opening one.
    Open,
    /// Transport open; the next step sends a request.
    Sending,
    /// Request sent; waiting for the response datagram.
    Receiving,
    /// Response received; checking it against the request.
    ValidatingResponse,
    /// The exchange produced a validated timestamp set.
    Complete,
}

/// The four protocol timestamps of a completed exchange, both as raw wire stamps and as
/// microseconds since the Unix epoch.
///
/// In RFC terms: T1 is when the request left the client, T2 when it reached the server,
/// T3 when the response left the server, and T4 when it reached the client.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimestampSet {
    /// The server's reference timestamp, raw.
    pub reference: NtpTimestamp,
    /// The originate timestamp echoed by the server, raw.
    pub originate: NtpTimestamp,
    /// The server receive timestamp, raw.
    pub receive: NtpTimestamp,
    /// The server transmit timestamp, raw.
    pub transmit: NtpTimestamp,
    /// T1: request departure, client clock.
    pub client_send_micros: u64,
    /// T2: request arrival, server clock.
    pub server_receive_micros: u64,
    /// T3: response departure, server clock.
    pub server_transmit_micros: u64,
    /// T4: response arrival, client clock.
    pub client_receive_micros: u64,
}

impl TimestampSet {
    /// Derives the clock offset and round-trip delay in microseconds.
    ///
    /// Offset is `((T2 - T1) + (T3 - T4)) / 2`, the estimated amount the client clock
    /// lags the server. Delay is `(T4 - T1) - (T3 - T2)`, the time the datagrams spent
    /// on the wire.
    pub fn offset_and_delay_micros(&self) -> (i64, i64) {
        let t1 = self.client_send_micros as i64;
        let t2 = self.server_receive_micros as i64;
        let t3 = self.server_transmit_micros as i64;
        let t4 = self.client_receive_micros as i64;
        let offset = ((t2 - t1) + (t3 - t4)) / 2;
        let delay = (t4 - t1) - (t3 - t2);
        (offset, delay)
    }
}

/// An SNTP client bound to a transport `T` and time source `S`.
///
/// The client owns its receive buffer and the [`EventRegister`] through which arrival
/// timestamps are delivered; [`SntpClient::event_handle`] exposes a handle for whatever
/// pumps datagrams on the platform.
pub struct SntpClient<T, S> {
    transport: T,
    time: Arc<S>,
    events: Arc<EventRegister>,
    server: Option<SocketAddr>,
    timeout_ms: u32,
    policy: TimeoutPolicy,
    interface: Option<u32>,
    state: State,
    buf: [u8; MAX_MESSAGE_SIZE],
    buf_len: usize,
    expected_origin_fraction: u32,
    kiss_code: u32,
}

impl<T, S> SntpClient<T, S>
where
    T: Transport,
    S: TimeSource,
{
    /// Creates a client with a fresh event register.
    pub fn new(transport: T, time: Arc<S>) -> Self {
        Self::with_events(transport, time, Arc::new(EventRegister::new()))
    }

    /// Creates a client over a shared event register, for platforms where the register
    /// is wired into a completion handler before the client exists.
    pub fn with_events(transport: T, time: Arc<S>, events: Arc<EventRegister>) -> Self {
        SntpClient {
            transport,
            time,
            events,
            server: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            policy: TimeoutPolicy::default(),
            interface: None,
            state: State::Open,
            buf: [0u8; MAX_MESSAGE_SIZE],
            buf_len: 0,
            expected_origin_fraction: 0,
            kiss_code: 0,
        }
    }

    /// A handle for delivering completion events into this client's register.
    pub fn event_handle(&self) -> EventHandle<S> {
        EventHandle::new(Arc::clone(&self.events), Arc::clone(&self.time))
    }

    /// Sets the server to exchange with. Resets the machine so the next exchange opens a
    /// fresh transport toward the new address.
    pub fn set_server_address(&mut self, server: SocketAddr) {
        self.server = Some(server);
        self.transport.close();
        self.state = State::Open;
    }

    /// Sets the round-trip budget in milliseconds.
    pub fn set_timeout(&mut self, timeout_ms: u32) {
        self.timeout_ms = timeout_ms;
    }

    /// Switches between polling and blocking I/O. Resets the machine so the transport is
    /// reopened with the new policy.
    pub fn set_timeout_policy(&mut self, policy: TimeoutPolicy) {
        self.policy = policy;
        self.transport.close();
        self.state = State::Open;
    }

    /// Requests that the transport bind to a specific network interface when it next
    /// opens. Transports without per-interface routing ignore this.
    pub fn bind_to_interface(&mut self, interface: u32) {
        self.interface = Some(interface);
        self.transport.close();
        self.state = State::Open;
    }

    /// The machine's current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// The raw kiss code from the most recent rejected exchange, or zero.
    pub fn kiss_code(&self) -> u32 {
        self.kiss_code
    }

    /// The most recent kiss code, if it is one of the codes that demands a reaction.
    pub fn kiss_of_death(&self) -> Option<KissOfDeath> {
        KissOfDeath::try_from(self.kiss_code).ok()
    }

    /// Tears the exchange down: disarms events, closes the transport, clears the buffer
    /// and parks the machine in [`State::Open`].
    pub fn close(&mut self) {
        self.events.unregister(Event::ReceiveComplete);
        self.events.unregister(Event::SendComplete);
        self.transport.close();
        self.buf = [0u8; MAX_MESSAGE_SIZE];
        self.buf_len = 0;
        self.state = State::Open;
    }

    /// Runs one full request/response exchange.
    ///
    /// Steps the state machine from wherever it stands until a validated [`TimestampSet`]
    /// is produced or a step fails. On success the transport stays open and the machine
    /// parks in [`State::Sending`], so consecutive calls reuse the socket. On failure the
    /// transport is closed and the machine returns to [`State::Open`].
    pub fn run_exchange(&mut self) -> Result<TimestampSet, Error> {
        match self.drive() {
            Ok(set) => {
                self.state = State::Sending;
                Ok(set)
            }
            Err(err) => {
                warn!("sntp exchange failed: {err}");
                self.events.unregister(Event::ReceiveComplete);
                self.transport.close();
                self.state = State::Open;
                Err(err)
            }
        }
    }

    fn drive(&mut self) -> Result<TimestampSet, Error> {
        let mut out = TimestampSet::default();
        loop {
            match self.state {
                State::Open => self.open_transport()?,
                State::Sending => self.send_request(&mut out)?,
                State::Receiving => self.receive_response(&mut out)?,
                State::ValidatingResponse => self.handle_response(&mut out)?,
                State::Complete => return Ok(out),
            }
        }
    }

    fn open_transport(&mut self) -> Result<(), Error> {
        let server = self.server.ok_or(Error::NotInitialized)?;
        let config = TransportConfig {
            server,
            timeout_ms: self.timeout_ms,
            policy: self.policy,
            interface: self.interface,
        };
        self.transport.open(&config)?;
        self.state = State::Sending;
        Ok(())
    }

    fn send_request(&mut self, out: &mut TimestampSet) -> Result<(), Error> {
        let nonce = self.time.tick_ms();
        self.expected_origin_fraction = nonce;
        {
            let mut cursor = &mut self.buf[..];
            cursor
                .write_bytes(protocol::build_request(nonce))
                .map_err(Error::Send)?;
        }
        self.buf_len = Packet::PACKED_SIZE_BYTES;
        debug!("sending request with nonce {nonce:#010x}");

        // T1 is stamped just before the datagram goes out.
        out.client_send_micros = self.time.unix_micros();
        let written = {
            let transport = &mut self.transport;
            let buf = &self.buf[..self.buf_len];
            match self.policy {
                TimeoutPolicy::Polling => {
                    poll_io(self.time.as_ref(), self.timeout_ms, || transport.send(buf))
                }
                TimeoutPolicy::Blocking => transport.send(buf),
            }
        };
        let written = match written {
            Ok(n) => n,
            Err(e) if is_would_block(&e) => return Err(Error::Timeout),
            Err(e) => return Err(Error::Send(e)),
        };
        if written != self.buf_len {
            let e = io::Error::new(io::ErrorKind::WriteZero, "short datagram write");
            return Err(Error::Send(e));
        }
        self.buf = [0u8; MAX_MESSAGE_SIZE];
        self.buf_len = 0;
        self.state = State::Receiving;
        Ok(())
    }

    fn receive_response(&mut self, out: &mut TimestampSet) -> Result<(), Error> {
        self.events.register(Event::ReceiveComplete, None);
        let received = {
            let transport = &mut self.transport;
            let buf = &mut self.buf;
            match self.policy {
                TimeoutPolicy::Polling => poll_io(self.time.as_ref(), self.timeout_ms, || {
                    transport.recv(&mut buf[..])
                }),
                TimeoutPolicy::Blocking => transport.recv(&mut buf[..]),
            }
        };
        let received = match received {
            Ok(n) => n,
            Err(e) if is_would_block(&e) => return Err(Error::Timeout),
            Err(e) => return Err(Error::Receive(e)),
        };

        // T4 comes from the event register, stamped by whatever pumped the datagram in.
        let arrival = self.events.captured_micros();
        self.events.unregister(Event::ReceiveComplete);
        if arrival == 0 {
            return Err(Error::InvalidMessage(InvalidReason::MissingArrivalTimestamp));
        }
        out.client_receive_micros = arrival;
        self.buf_len = received.min(self.buf.len());
        debug!("received {} byte response", self.buf_len);
        self.state = State::ValidatingResponse;
        Ok(())
    }

    fn handle_response(&mut self, out: &mut TimestampSet) -> Result<(), Error> {
        self.kiss_code = 0;
        let stamps = validate_response(&self.buf[..self.buf_len], self.expected_origin_fraction)
            .inspect_err(|err| {
                if let Error::RequestRejected { kiss_code } = err {
                    self.kiss_code = *kiss_code;
                }
            })?;
        out.reference = stamps.packet.reference_timestamp;
        out.originate = stamps.packet.originate_timestamp;
        out.receive = stamps.packet.receive_timestamp;
        out.transmit = stamps.packet.transmit_timestamp;
        out.server_receive_micros = stamps.server_receive_micros;
        out.server_transmit_micros = stamps.server_transmit_micros;
        self.state = State::Complete;
        Ok(())
    }
}

// Retries a non-blocking operation until it completes or `timeout_ms` elapses on the
// tick clock. Tick comparisons wrap, so a counter rollover mid-wait is harmless.
fn poll_io<S>(
    time: &S,
    timeout_ms: u32,
    mut op: impl FnMut() -> io::Result<usize>,
) -> io::Result<usize>
where
    S: TimeSource + ?Sized,
{
    let start = time.tick_ms();
    loop {
        match op() {
            Err(e) if is_would_block(&e) => {
                if time.tick_ms().wrapping_sub(start) >= timeout_ms {
                    return Err(e);
                }
                thread::sleep(Duration::from_millis(1));
            }
            other => return other,
        }
    }
}

fn is_would_block(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
