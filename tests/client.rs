use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sntp::event::{Event, EventHandle, EventRegister};
use sntp::transport::{TimeSource, Transport, TransportConfig};
use sntp::unix_time::EPOCH_DELTA;
use sntp::{Error, InvalidReason, KissOfDeath, SntpClient, State};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A deterministic clock: every tick reading advances 250 ms and every wall-clock
/// reading advances 1 ms, so polling loops and timestamps both make progress.
struct MockTime {
    tick: AtomicU32,
    micros: AtomicU64,
}

impl MockTime {
    fn new() -> Self {
        MockTime {
            tick: AtomicU32::new(1),
            micros: AtomicU64::new(1_000_000_000),
        }
    }
}

impl TimeSource for MockTime {
    fn unix_micros(&self) -> u64 {
        self.micros.fetch_add(1_000, Ordering::SeqCst)
    }

    fn tick_ms(&self) -> u32 {
        self.tick.fetch_add(250, Ordering::SeqCst)
    }
}

type ResponseFn = Box<dyn Fn(&[u8]) -> Vec<u8> + Send>;

enum RecvAction {
    /// Answer the most recent request through the given builder.
    Respond(ResponseFn),
    /// Pretend no datagram is ready yet.
    WouldBlock,
    /// Fail outright.
    Fail(io::ErrorKind),
}

struct Inner {
    open: bool,
    opens: usize,
    sent: Vec<Vec<u8>>,
    script: VecDeque<RecvAction>,
    calls: Vec<&'static str>,
    notifier: Option<EventHandle<MockTime>>,
}

/// A scripted transport. Each `recv` consumes the next action from the script; an empty
/// script behaves like a silent network.
#[derive(Clone)]
struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl Transport for MockTransport {
    fn open(&mut self, _config: &TransportConfig) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.open = true;
        inner.opens += 1;
        inner.calls.push("open");
        Ok(())
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.open {
            return Err(io::ErrorKind::NotConnected.into());
        }
        inner.calls.push("send");
        inner.sent.push(buf.to_vec());
        Ok(buf.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.open {
            return Err(io::ErrorKind::NotConnected.into());
        }
        inner.calls.push("recv");
        match inner.script.pop_front() {
            Some(RecvAction::Respond(build)) => {
                let request = inner.sent.last().cloned().unwrap_or_default();
                let response = build(&request);
                let len = response.len().min(buf.len());
                buf[..len].copy_from_slice(&response[..len]);
                if let Some(notifier) = &inner.notifier {
                    let _ = notifier.pump(Event::ReceiveComplete);
                }
                Ok(len)
            }
            Some(RecvAction::WouldBlock) | None => Err(io::ErrorKind::WouldBlock.into()),
            Some(RecvAction::Fail(kind)) => Err(kind.into()),
        }
    }

    fn close(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.open {
            inner.calls.push("close");
        }
        inner.open = false;
    }

    fn is_open(&self) -> bool {
        self.inner.lock().unwrap().open
    }
}

/// A well-formed stratum-2 server response echoing the request nonce.
fn echo_response(request: &[u8]) -> Vec<u8> {
    let mut response = vec![0u8; 48];
    response[0] = 0x24; // LI 0, VN 4, mode server
    response[1] = 2;
    // Originate: seconds 0, fraction copied from the request transmit fraction.
    response[28..32].copy_from_slice(&request[44..48]);
    // Server stamps 10 and 11 seconds past the Unix epoch.
    response[32..36].copy_from_slice(&(EPOCH_DELTA as u32 + 10).to_be_bytes());
    response[40..44].copy_from_slice(&(EPOCH_DELTA as u32 + 11).to_be_bytes());
    response
}

fn make_client(
    script: Vec<RecvAction>,
    notify: bool,
) -> (SntpClient<MockTransport, MockTime>, Arc<Mutex<Inner>>) {
    let time = Arc::new(MockTime::new());
    let events = Arc::new(EventRegister::new());
    let notifier = notify.then(|| EventHandle::new(Arc::clone(&events), Arc::clone(&time)));
    let inner = Arc::new(Mutex::new(Inner {
        open: false,
        opens: 0,
        sent: Vec::new(),
        script: script.into(),
        calls: Vec::new(),
        notifier,
    }));
    let transport = MockTransport {
        inner: Arc::clone(&inner),
    };
    let mut client = SntpClient::with_events(transport, time, events);
    client.set_server_address("127.0.0.1:123".parse().unwrap());
    client.set_timeout(500);
    (client, inner)
}

#[test]
fn successful_exchange() {
    init_logs();
    let (mut client, inner) =
        make_client(vec![RecvAction::Respond(Box::new(echo_response))], true);

    let stamps = client.run_exchange().expect("exchange succeeds");
    assert_eq!(stamps.server_receive_micros, 10_000_000);
    assert_eq!(stamps.server_transmit_micros, 11_000_000);
    assert!(stamps.client_send_micros > 0);
    assert!(stamps.client_receive_micros > 0);
    assert_eq!(stamps.receive.seconds, EPOCH_DELTA as u32 + 10);

    // Success parks the machine ready to send again over the open transport.
    assert_eq!(client.state(), State::Sending);
    let inner = inner.lock().unwrap();
    assert!(inner.open);
    assert_eq!(inner.opens, 1);
    assert_eq!(inner.calls, ["open", "send", "recv"]);
}

#[test]
fn consecutive_exchanges_reuse_transport() {
    let (mut client, inner) = make_client(
        vec![
            RecvAction::Respond(Box::new(echo_response)),
            RecvAction::Respond(Box::new(echo_response)),
        ],
        true,
    );

    client.run_exchange().expect("first exchange");
    client.run_exchange().expect("second exchange");
    assert_eq!(inner.lock().unwrap().opens, 1);
}

#[test]
fn each_exchange_uses_a_fresh_nonce() {
    let (mut client, inner) = make_client(
        vec![
            RecvAction::Respond(Box::new(echo_response)),
            RecvAction::Respond(Box::new(echo_response)),
        ],
        true,
    );

    client.run_exchange().expect("first exchange");
    client.run_exchange().expect("second exchange");
    let inner = inner.lock().unwrap();
    assert_eq!(inner.sent.len(), 2);
    assert_ne!(inner.sent[0][44..48], inner.sent[1][44..48]);
}

#[test]
fn silent_server_times_out() {
    init_logs();
    let (mut client, inner) = make_client(Vec::new(), true);

    match client.run_exchange() {
        Err(Error::Timeout) => (),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(client.state(), State::Open);
    assert!(!inner.lock().unwrap().open);

    // The next exchange reopens the transport and can succeed.
    inner
        .lock()
        .unwrap()
        .script
        .push_back(RecvAction::Respond(Box::new(echo_response)));
    client.run_exchange().expect("recovery exchange");
    assert_eq!(inner.lock().unwrap().opens, 2);
}

#[test]
fn receive_error_is_reported() {
    let (mut client, _inner) =
        make_client(vec![RecvAction::Fail(io::ErrorKind::ConnectionReset)], true);

    match client.run_exchange() {
        Err(Error::Receive(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(client.state(), State::Open);
}

#[test]
fn kiss_of_death_rejection() {
    let deny = |request: &[u8]| {
        let mut response = echo_response(request);
        response[1] = 0; // stratum 0
        response[12..16].copy_from_slice(b"DENY");
        response
    };
    let (mut client, inner) = make_client(vec![RecvAction::Respond(Box::new(deny))], true);

    match client.run_exchange() {
        Err(Error::RequestRejected { kiss_code }) => {
            assert_eq!(kiss_code, u32::from_be_bytes(*b"DENY"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(client.kiss_code(), u32::from_be_bytes(*b"DENY"));
    assert_eq!(client.kiss_of_death(), Some(KissOfDeath::Deny));
    assert_eq!(client.state(), State::Open);
    assert!(!inner.lock().unwrap().open);
}

#[test]
fn unknown_kiss_code_is_kept_raw() {
    let mysterious = |request: &[u8]| {
        let mut response = echo_response(request);
        response[1] = 0;
        response[12..16].copy_from_slice(b"XMYS");
        response
    };
    let (mut client, _inner) = make_client(vec![RecvAction::Respond(Box::new(mysterious))], true);

    assert!(client.run_exchange().is_err());
    assert_eq!(client.kiss_code(), u32::from_be_bytes(*b"XMYS"));
    assert_eq!(client.kiss_of_death(), None);
}

#[test]
fn stale_origin_echo_is_rejected() {
    let stale = |request: &[u8]| {
        let mut response = echo_response(request);
        // Corrupt one nonce byte, as a response to some earlier request would.
        response[31] ^= 0xff;
        response
    };
    let (mut client, _inner) = make_client(vec![RecvAction::Respond(Box::new(stale))], true);

    match client.run_exchange() {
        Err(Error::InvalidMessage(InvalidReason::OriginEchoMismatch)) => (),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn zero_version_is_rejected() {
    let ancient = |request: &[u8]| {
        let mut response = echo_response(request);
        response[0] = 0x04; // VN 0, mode server
        response
    };
    let (mut client, _inner) = make_client(vec![RecvAction::Respond(Box::new(ancient))], true);

    match client.run_exchange() {
        Err(Error::InvalidMessage(InvalidReason::ZeroVersion)) => (),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn broadcast_mode_is_accepted() {
    let broadcast = |request: &[u8]| {
        let mut response = echo_response(request);
        response[0] = 0x25;
        response
    };
    let (mut client, _inner) = make_client(vec![RecvAction::Respond(Box::new(broadcast))], true);
    client.run_exchange().expect("broadcast accepted");
}

#[test]
fn truncated_datagram_is_rejected() {
    let truncated = |request: &[u8]| echo_response(request)[..20].to_vec();
    let (mut client, _inner) = make_client(vec![RecvAction::Respond(Box::new(truncated))], true);

    match client.run_exchange() {
        Err(Error::InvalidMessage(InvalidReason::ResponseTooShort { received: 20 })) => (),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn missing_arrival_timestamp_is_rejected() {
    // No notifier pumps the event register, so no arrival time is ever captured.
    let (mut client, _inner) =
        make_client(vec![RecvAction::Respond(Box::new(echo_response))], false);

    match client.run_exchange() {
        Err(Error::InvalidMessage(InvalidReason::MissingArrivalTimestamp)) => (),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn exchange_without_server_fails() {
    let time = Arc::new(MockTime::new());
    let inner = Arc::new(Mutex::new(Inner {
        open: false,
        opens: 0,
        sent: Vec::new(),
        script: VecDeque::new(),
        calls: Vec::new(),
        notifier: None,
    }));
    let transport = MockTransport {
        inner: Arc::clone(&inner),
    };
    let mut client = SntpClient::new(transport, time);

    match client.run_exchange() {
        Err(Error::NotInitialized) => (),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(inner.lock().unwrap().opens, 0);
}

#[test]
fn close_resets_the_machine() {
    let (mut client, inner) =
        make_client(vec![RecvAction::Respond(Box::new(echo_response))], true);

    client.run_exchange().expect("exchange succeeds");
    assert_eq!(client.state(), State::Sending);

    client.close();
    assert_eq!(client.state(), State::Open);
    assert!(!inner.lock().unwrap().open);
}
