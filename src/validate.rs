//! Response validation.
//!
//! A received datagram passes through a fixed sequence of sanity checks before its
//! timestamps are trusted: enough bytes for the header, a nonzero version, a nonzero
//! server transmit timestamp, an acceptable mode, the origin echo of our nonce, and
//! finally the stratum-0 Kiss-o'-Death check. The first failing check decides the error,
//! so callers see the most fundamental problem with a bad datagram.

use crate::error::{Error, InvalidReason};
use crate::protocol::{ConstPackedSizeBytes, Mode, Packet, ReadBytes};
use crate::unix_time::ntp_to_unix_micros;

/// A validated response: the decoded header plus the server-side timestamps converted to
/// microseconds since the Unix epoch.
#[derive(Debug)]
pub struct ServerTimestamps {
    /// The decoded response header.
    pub packet: Packet,
    /// When the request arrived at the server (T2).
    pub server_receive_micros: u64,
    /// When the response left the server (T3).
    pub server_transmit_micros: u64,
}

/// Validates a received datagram against the request identified by
/// `expected_origin_fraction` (the nonce the request carried in its transmit timestamp
/// fraction).
///
/// Returns the decoded header and converted server timestamps on success. A stratum-0
/// response is reported as [`Error::RequestRejected`] carrying the raw kiss code; every
/// other failure is an [`Error::InvalidMessage`] naming the first check that failed.
pub fn validate_response(
    buf: &[u8],
    expected_origin_fraction: u32,
) -> Result<ServerTimestamps, Error> {
    if buf.len() < Packet::PACKED_SIZE_BYTES {
        return Err(Error::InvalidMessage(InvalidReason::ResponseTooShort {
            received: buf.len(),
        }));
    }
    let packet: Packet = (&buf[..Packet::PACKED_SIZE_BYTES])
        .read_bytes()
        .map_err(|_| {
            Error::InvalidMessage(InvalidReason::ResponseTooShort {
                received: buf.len(),
            })
        })?;

    if packet.version.raw() == 0 {
        return Err(Error::InvalidMessage(InvalidReason::ZeroVersion));
    }
    if packet.transmit_timestamp.is_zero() {
        return Err(Error::InvalidMessage(InvalidReason::ZeroTransmitTimestamp));
    }
    match packet.mode {
        Mode::Server | Mode::Broadcast => (),
        mode => {
            return Err(Error::InvalidMessage(InvalidReason::UnexpectedMode {
                mode: mode as u8,
            }));
        }
    }
    if packet.originate_timestamp.seconds != 0
        || packet.originate_timestamp.fraction != expected_origin_fraction
    {
        return Err(Error::InvalidMessage(InvalidReason::OriginEchoMismatch));
    }
    if packet.stratum == 0 {
        return Err(Error::RequestRejected {
            kiss_code: packet.reference_id,
        });
    }

    let server_receive_micros = ntp_to_unix_micros(
        packet.receive_timestamp.seconds,
        packet.receive_timestamp.fraction,
    );
    let server_transmit_micros = ntp_to_unix_micros(
        packet.transmit_timestamp.seconds,
        packet.transmit_timestamp.fraction,
    );
    Ok(ServerTimestamps {
        packet,
        server_receive_micros,
        server_transmit_micros,
    })
}
