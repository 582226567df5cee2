//! On-wire types and constants for the SNTP message header.
//!
//! Provides `ReadBytes` and `WriteBytes` implementations which extend the byteorder crate
//! `WriteBytesExt` and `ReadBytesExt` traits with the ability to read and write the protocol
//! header types in network byte order.
//!
//! All multi-byte fields are big-endian. The header is a fixed 48 bytes; optional extension
//! fields and MACs that may trail it are not modelled here, receive buffers simply allow for
//! [`MAX_MESSAGE_SIZE`] bytes.

use byteorder::{BE, ReadBytesExt, WriteBytesExt};
use std::{fmt, io};

/// The well-known NTP/SNTP UDP port.
pub const PORT: u16 = 123;

/// Largest datagram the client will accept: the 48-byte header plus room for a trailing
/// key identifier and digest fragment.
pub const MAX_MESSAGE_SIZE: usize = 68;

/// Poll exponent advertised in client requests (2^6 = 64 s).
pub const REQUEST_POLL: u8 = 0x06;

/// Clock precision exponent advertised in client requests (2^-20 s, about one microsecond).
pub const REQUEST_PRECISION: i8 = -20;

/// A trait for writing any of the protocol header types to network-endian bytes.
///
/// A blanket implementation is provided for all types that implement `byteorder::WriteBytesExt`.
pub trait WriteBytes {
    /// Writes a protocol type to this writer in network byte order.
    fn write_bytes<P: WriteToBytes>(&mut self, protocol: P) -> io::Result<()>;
}

/// A trait for reading any of the protocol header types from network-endian bytes.
///
/// A blanket implementation is provided for all types that implement `byteorder::ReadBytesExt`.
pub trait ReadBytes {
    /// Reads a protocol type from this reader in network byte order.
    fn read_bytes<P: ReadFromBytes>(&mut self) -> io::Result<P>;
}

/// Protocol header types that may be written to network endian bytes.
pub trait WriteToBytes {
    /// Write the type to bytes.
    fn write_to_bytes<W: WriteBytesExt>(&self, writer: W) -> io::Result<()>;
}

/// Protocol header types that may be read from network endian bytes.
pub trait ReadFromBytes: Sized {
    /// Read the type from bytes.
    fn read_from_bytes<R: ReadBytesExt>(reader: R) -> io::Result<Self>;
}

/// Types that have a constant size when written to or read from bytes.
pub trait ConstPackedSizeBytes {
    /// The constant size in bytes when this type is packed for network transmission.
    const PACKED_SIZE_BYTES: usize;
}

/// A 64-bit NTP timestamp: a 32-bit unsigned count of seconds since 1900-01-01 00:00:00 UTC
/// and a 32-bit binary fraction of a second.
///
/// ### Layout
///
/// ```ignore
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                            Seconds                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                            Fraction                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NtpTimestamp {
    /// Seconds since 1900-01-01 00:00:00 UTC.
    pub seconds: u32,
    /// Fractional seconds in units of 1/2^32.
    pub fraction: u32,
}

impl NtpTimestamp {
    /// Returns true if both the seconds and fraction fields are zero.
    ///
    /// A zero timestamp is the on-wire convention for "unknown or unavailable".
    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.fraction == 0
    }
}

/// A 2-bit integer warning of an impending leap second to be inserted or deleted in the last
/// minute of the current month.
///
/// Note that this field is packed in the actual header.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum LeapIndicator {
    /// No leap required.
    #[default]
    NoWarning = 0,
    /// Last minute of the day has 61 seconds.
    AddOne = 1,
    /// Last minute of the day has 59 seconds.
    SubOne = 2,
    /// Clock unsynchronized.
    Unknown = 3,
}

impl TryFrom<u8> for LeapIndicator {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LeapIndicator::NoWarning),
            1 => Ok(LeapIndicator::AddOne),
            2 => Ok(LeapIndicator::SubOne),
            3 => Ok(LeapIndicator::Unknown),
            _ => Err(()),
        }
    }
}

/// A 3-bit integer representing the protocol version number, currently 4.
///
/// Note that while this struct is 8-bits, this field is packed to 3 in the actual header.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Version(u8);

impl Version {
    /// NTP version 1.
    pub const V1: Self = Version(1);
    /// NTP version 2.
    pub const V2: Self = Version(2);
    /// NTP version 3.
    pub const V3: Self = Version(3);
    /// NTP version 4 (current standard).
    pub const V4: Self = Version(4);

    /// The raw version number.
    pub fn raw(&self) -> u8 {
        self.0
    }

    /// Whether or not the version is a known, valid version.
    pub fn is_known(&self) -> bool {
        self.0 >= 1 && self.0 <= 4
    }
}

/// A 3-bit integer representing the association mode.
///
/// Note that while this struct is 8-bits, this field is packed to 3 in the actual header.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Mode {
    /// Reserved mode (value 0).
    Reserved = 0,
    /// Symmetric active mode (value 1).
    SymmetricActive = 1,
    /// Symmetric passive mode (value 2).
    SymmetricPassive = 2,
    /// Client mode (value 3).
    Client = 3,
    /// Server mode (value 4).
    Server = 4,
    /// Broadcast mode (value 5).
    Broadcast = 5,
    /// NTP control message mode (value 6).
    NtpControlMessage = 6,
    /// Reserved for private use (value 7).
    ReservedForPrivateUse = 7,
}

impl TryFrom<u8> for Mode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Mode::Reserved),
            1 => Ok(Mode::SymmetricActive),
            2 => Ok(Mode::SymmetricPassive),
            3 => Ok(Mode::Client),
            4 => Ok(Mode::Server),
            5 => Ok(Mode::Broadcast),
            6 => Ok(Mode::NtpControlMessage),
            7 => Ok(Mode::ReservedForPrivateUse),
            _ => Err(()),
        }
    }
}

// Convert an ascii string to a big-endian u32.
macro_rules! code_to_u32 {
    ($w:expr) => {
        (($w[3] as u32) << 0)
            | (($w[2] as u32) << 8)
            | (($w[1] as u32) << 16)
            | (($w[0] as u32) << 24)
            | ((*$w as [u8; 4])[0] as u32 * 0)
    };
}

/// If the Stratum field is 0, the Reference Identifier field carries a four-character ASCII
/// "kiss code" used for status reporting and access control. Such responses are called
/// **Kiss-o'-Death** packets; a server sends one instead of a time answer when it wants the
/// client to back off or go away.
///
/// These are the kiss codes that require a specific client reaction. Any other stratum-0
/// reference identifier is reported as its raw 32-bit value.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KissOfDeath {
    /// Access denied: stop sending packets to this server.
    Deny = code_to_u32!(b"DENY"),
    /// Access restricted: stop sending packets to this server.
    Rstr = code_to_u32!(b"RSTR"),
    /// Rate exceeded: reduce the polling interval.
    Rate = code_to_u32!(b"RATE"),
}

impl TryFrom<u32> for KissOfDeath {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            v if v == code_to_u32!(b"DENY") => Ok(KissOfDeath::Deny),
            v if v == code_to_u32!(b"RSTR") => Ok(KissOfDeath::Rstr),
            v if v == code_to_u32!(b"RATE") => Ok(KissOfDeath::Rate),
            _ => Err(()),
        }
    }
}

impl fmt::Display for KissOfDeath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bytes = be_u32_to_bytes(*self as u32);
        let s = String::from_utf8_lossy(&bytes);
        write!(f, "{}", s)
    }
}

/// The fixed 48-byte message header shared by requests and responses.
///
/// ### Format
///
/// ```ignore
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |LI | VN  |Mode |    Stratum     |     Poll      |  Precision   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         Root Delay                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         Root Dispersion                       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Reference ID                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                     Reference Timestamp (64)                  +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                      Originate Timestamp (64)                 +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                      Receive Timestamp (64)                   +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// +                      Transmit Timestamp (64)                  +
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// In a response, the originate timestamp echoes the transmit timestamp the client sent, the
/// receive timestamp is when the request hit the server, and the transmit timestamp is when
/// the response left it.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Packet {
    /// Leap indicator warning of impending leap second.
    pub leap_indicator: LeapIndicator,
    /// Protocol version number (1-4).
    pub version: Version,
    /// Association mode (client, server, broadcast, etc.).
    pub mode: Mode,
    /// Stratum level of the time source. 0 marks a Kiss-o'-Death response.
    pub stratum: u8,
    /// Maximum interval between successive messages, in log2 seconds.
    pub poll: u8,
    /// Precision of the system clock, in log2 seconds.
    pub precision: i8,
    /// Total round-trip delay to the reference clock, raw 16.16 fixed point.
    pub root_delay: u32,
    /// Total dispersion to the reference clock, raw 16.16 fixed point.
    pub root_dispersion: u32,
    /// Reference identifier. For stratum 0 this is the kiss code.
    pub reference_id: u32,
    /// Time when the server clock was last set or corrected.
    pub reference_timestamp: NtpTimestamp,
    /// Echo of the client's transmit timestamp.
    pub originate_timestamp: NtpTimestamp,
    /// Time at the server when the request arrived.
    pub receive_timestamp: NtpTimestamp,
    /// Time at the server when the response departed.
    pub transmit_timestamp: NtpTimestamp,
}

/// The consecutive types within the first packed byte of the header.
pub type PacketByte1 = (LeapIndicator, Version, Mode);

/// Builds a version-4 client request.
///
/// Every field is zero except the version, mode, poll and precision constants and the
/// transmit timestamp fraction, which carries `nonce_fraction`. The server echoes the
/// transmit timestamp back in the originate field of its response, so the nonce lets the
/// client reject datagrams that do not answer the request it actually sent.
pub fn build_request(nonce_fraction: u32) -> Packet {
    Packet {
        leap_indicator: LeapIndicator::NoWarning,
        version: Version::V4,
        mode: Mode::Client,
        stratum: 0,
        poll: REQUEST_POLL,
        precision: REQUEST_PRECISION,
        root_delay: 0,
        root_dispersion: 0,
        reference_id: 0,
        reference_timestamp: NtpTimestamp::default(),
        originate_timestamp: NtpTimestamp::default(),
        receive_timestamp: NtpTimestamp::default(),
        transmit_timestamp: NtpTimestamp {
            seconds: 0,
            fraction: nonce_fraction,
        },
    }
}

// Size implementations.

impl ConstPackedSizeBytes for NtpTimestamp {
    const PACKED_SIZE_BYTES: usize = 8;
}

impl ConstPackedSizeBytes for PacketByte1 {
    const PACKED_SIZE_BYTES: usize = 1;
}

impl ConstPackedSizeBytes for Packet {
    const PACKED_SIZE_BYTES: usize =
        PacketByte1::PACKED_SIZE_BYTES + 3 + 4 * 3 + NtpTimestamp::PACKED_SIZE_BYTES * 4;
}

// Writer implementations.

impl<W> WriteBytes for W
where
    W: WriteBytesExt,
{
    fn write_bytes<P: WriteToBytes>(&mut self, protocol: P) -> io::Result<()> {
        protocol.write_to_bytes(self)
    }
}

impl<P> WriteToBytes for &P
where
    P: WriteToBytes,
{
    fn write_to_bytes<W: WriteBytesExt>(&self, writer: W) -> io::Result<()> {
        (*self).write_to_bytes(writer)
    }
}

impl WriteToBytes for NtpTimestamp {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<BE>(self.seconds)?;
        writer.write_u32::<BE>(self.fraction)?;
        Ok(())
    }
}

impl WriteToBytes for (LeapIndicator, Version, Mode) {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        let (li, vn, mode) = *self;
        let mut li_vn_mode = 0;
        li_vn_mode |= (li as u8) << 6;
        li_vn_mode |= vn.0 << 3;
        li_vn_mode |= mode as u8;
        writer.write_u8(li_vn_mode)?;
        Ok(())
    }
}

impl WriteToBytes for Packet {
    fn write_to_bytes<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        let li_vn_mode = (self.leap_indicator, self.version, self.mode);
        writer.write_bytes(li_vn_mode)?;
        writer.write_u8(self.stratum)?;
        writer.write_u8(self.poll)?;
        writer.write_i8(self.precision)?;
        writer.write_u32::<BE>(self.root_delay)?;
        writer.write_u32::<BE>(self.root_dispersion)?;
        writer.write_u32::<BE>(self.reference_id)?;
        writer.write_bytes(self.reference_timestamp)?;
        writer.write_bytes(self.originate_timestamp)?;
        writer.write_bytes(self.receive_timestamp)?;
        writer.write_bytes(self.transmit_timestamp)?;
        Ok(())
    }
}

// Reader implementations.

impl<R> ReadBytes for R
where
    R: ReadBytesExt,
{
    fn read_bytes<P: ReadFromBytes>(&mut self) -> io::Result<P> {
        P::read_from_bytes(self)
    }
}

impl ReadFromBytes for NtpTimestamp {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let seconds = reader.read_u32::<BE>()?;
        let fraction = reader.read_u32::<BE>()?;
        let timestamp = NtpTimestamp { seconds, fraction };
        Ok(timestamp)
    }
}

impl ReadFromBytes for (LeapIndicator, Version, Mode) {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let li_vn_mode = reader.read_u8()?;
        let li_u8 = li_vn_mode >> 6;
        let vn_u8 = (li_vn_mode >> 3) & 0b111;
        let mode_u8 = li_vn_mode & 0b111;
        let li = match LeapIndicator::try_from(li_u8).ok() {
            Some(li) => li,
            None => {
                let err_msg = "unknown leap indicator";
                return Err(io::Error::new(io::ErrorKind::InvalidData, err_msg));
            }
        };
        let vn = Version(vn_u8);
        let mode = match Mode::try_from(mode_u8).ok() {
            Some(mode) => mode,
            None => {
                let err_msg = "unknown association mode";
                return Err(io::Error::new(io::ErrorKind::InvalidData, err_msg));
            }
        };
        Ok((li, vn, mode))
    }
}

impl ReadFromBytes for Packet {
    fn read_from_bytes<R: ReadBytesExt>(mut reader: R) -> io::Result<Self> {
        let (leap_indicator, version, mode) = reader.read_bytes()?;
        let stratum = reader.read_u8()?;
        let poll = reader.read_u8()?;
        let precision = reader.read_i8()?;
        let root_delay = reader.read_u32::<BE>()?;
        let root_dispersion = reader.read_u32::<BE>()?;
        let reference_id = reader.read_u32::<BE>()?;
        let reference_timestamp = reader.read_bytes()?;
        let originate_timestamp = reader.read_bytes()?;
        let receive_timestamp = reader.read_bytes()?;
        let transmit_timestamp = reader.read_bytes()?;
        Ok(Packet {
            leap_indicator,
            version,
            mode,
            stratum,
            poll,
            precision,
            root_delay,
            root_dispersion,
            reference_id,
            reference_timestamp,
            originate_timestamp,
            receive_timestamp,
            transmit_timestamp,
        })
    }
}

// Utility functions.

fn be_u32_to_bytes(u: u32) -> [u8; 4] {
    [
        (u >> 24 & 0xff) as u8,
        (u >> 16 & 0xff) as u8,
        (u >> 8 & 0xff) as u8,
        (u & 0xff) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header_byte() {
        let mut bytes = Vec::new();
        bytes
            .write_bytes(build_request(0xdead_beef))
            .expect("write to vec");
        assert_eq!(bytes.len(), Packet::PACKED_SIZE_BYTES);
        // LI 0, VN 4, mode 3.
        assert_eq!(bytes[0], 0x23);
        assert_eq!(bytes[1], 0);
        assert_eq!(bytes[2], REQUEST_POLL);
        assert_eq!(bytes[3], REQUEST_PRECISION as u8);
        // Nonce lands in the transmit timestamp fraction, big-endian.
        assert_eq!(&bytes[44..48], &[0xde, 0xad, 0xbe, 0xef]);
        // Everything between is zero.
        assert!(bytes[4..44].iter().all(|&b| b == 0));
    }

    #[test]
    fn kiss_codes() {
        assert_eq!(KissOfDeath::try_from(0x44454e59), Ok(KissOfDeath::Deny));
        assert_eq!(KissOfDeath::try_from(0x52535452), Ok(KissOfDeath::Rstr));
        assert_eq!(KissOfDeath::try_from(0x52415445), Ok(KissOfDeath::Rate));
        assert_eq!(KissOfDeath::try_from(0x494e4954), Err(()));
        assert_eq!(KissOfDeath::Deny.to_string(), "DENY");
    }

    #[test]
    fn zero_timestamp() {
        assert!(NtpTimestamp::default().is_zero());
        assert!(
            !NtpTimestamp {
                seconds: 0,
                fraction: 1
            }
            .is_zero()
        );
    }
}
