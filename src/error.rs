//! Error types for the SNTP client engine.
//!
//! Errors are plain enums with `Display` and `std::error::Error` implementations. A
//! `From<Error> for io::Error` conversion is provided so callers embedding the client in
//! `io::Result` plumbing can use `?` directly; the original [`Error`] stays reachable via
//! `io::Error::get_ref()` and downcasting.

use std::fmt;
use std::io;

/// Why a received datagram was rejected during response validation.
#[derive(Debug)]
pub enum InvalidReason {
    /// Fewer than the 48 header bytes arrived.
    ResponseTooShort {
        /// Number of bytes received.
        received: usize,
    },
    /// The version field was zero.
    ZeroVersion,
    /// The server transmit timestamp was zero, meaning the server never stamped the reply.
    ZeroTransmitTimestamp,
    /// The mode was neither server nor broadcast.
    UnexpectedMode {
        /// The raw mode value from the header.
        mode: u8,
    },
    /// The originate timestamp did not echo the nonce the request carried.
    OriginEchoMismatch,
    /// No arrival timestamp was captured for the datagram.
    MissingArrivalTimestamp,
}

/// Errors that can occur while running an SNTP exchange.
#[derive(Debug)]
pub enum Error {
    /// The client was asked to act before a server address was configured, or an event
    /// fired that nothing had registered for.
    NotInitialized,
    /// A host name resolved to no socket addresses.
    NameResolution {
        /// The host that failed to resolve.
        host: String,
    },
    /// Creating the transport endpoint failed.
    TransportCreate(io::Error),
    /// Configuring the transport (timeouts, blocking mode) failed.
    TransportConfigure(io::Error),
    /// Sending the request datagram failed.
    Send(io::Error),
    /// Receiving the response datagram failed.
    Receive(io::Error),
    /// No valid response arrived within the configured timeout.
    Timeout,
    /// A response arrived but failed validation.
    InvalidMessage(InvalidReason),
    /// The server answered with a Kiss-o'-Death packet instead of a time.
    RequestRejected {
        /// The raw kiss code from the reference identifier field.
        kiss_code: u32,
    },
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::ResponseTooShort { received } => {
                write!(f, "response too short ({received} bytes)")
            }
            InvalidReason::ZeroVersion => write!(f, "version field is zero"),
            InvalidReason::ZeroTransmitTimestamp => {
                write!(f, "server transmit timestamp is zero")
            }
            InvalidReason::UnexpectedMode { mode } => {
                write!(f, "unexpected mode {mode} (expected server or broadcast)")
            }
            InvalidReason::OriginEchoMismatch => {
                write!(f, "originate timestamp does not echo our request")
            }
            InvalidReason::MissingArrivalTimestamp => {
                write!(f, "no arrival timestamp captured for the response")
            }
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotInitialized => write!(f, "client is not initialized"),
            Error::NameResolution { host } => {
                write!(f, "host resolved to no socket addresses: {host}")
            }
            Error::TransportCreate(e) => write!(f, "failed to create transport: {e}"),
            Error::TransportConfigure(e) => write!(f, "failed to configure transport: {e}"),
            Error::Send(e) => write!(f, "failed to send request: {e}"),
            Error::Receive(e) => write!(f, "failed to receive response: {e}"),
            Error::Timeout => write!(f, "request timed out"),
            Error::InvalidMessage(reason) => write!(f, "invalid response: {reason}"),
            Error::RequestRejected { kiss_code } => {
                write!(f, "server rejected request (kiss code {})", code_str(*kiss_code))
            }
        }
    }
}

impl std::error::Error for InvalidReason {}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::TransportCreate(e)
            | Error::TransportConfigure(e)
            | Error::Send(e)
            | Error::Receive(e) => Some(e),
            Error::InvalidMessage(reason) => Some(reason),
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        let kind = match &err {
            Error::NotInitialized => io::ErrorKind::NotConnected,
            Error::NameResolution { .. } => io::ErrorKind::InvalidInput,
            Error::Timeout => io::ErrorKind::TimedOut,
            Error::InvalidMessage(_) => io::ErrorKind::InvalidData,
            Error::RequestRejected { .. } => io::ErrorKind::ConnectionRefused,
            Error::TransportCreate(e)
            | Error::TransportConfigure(e)
            | Error::Send(e)
            | Error::Receive(e) => e.kind(),
        };
        io::Error::new(kind, err)
    }
}

// Render a kiss code for display, falling back to hex when it is not printable ASCII.
fn code_str(code: u32) -> String {
    let bytes = code.to_be_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == 0) {
        String::from_utf8_lossy(&bytes).trim_end_matches('\0').to_string()
    } else {
        format!("{code:#010x}")
    }
}
