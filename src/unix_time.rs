//! Conversion between the 64-bit fixed-point NTP timestamp representation and
//! microsecond-resolution Unix time.
//!
//! An NTP timestamp is a 32-bit unsigned count of seconds since
//! 1900-01-01 00:00:00 UTC plus a 32-bit binary fraction of a second. The
//! engine reports times as 64-bit microsecond counts since the Unix epoch, so
//! the fraction has to be rescaled from units of 1/2^32 to 1/10^6.
//!
//! Two fraction conversions are provided. [`frac_to_micros`] is the classic
//! shift-and-accumulate form used by embedded NTP stacks: it walks the
//! fraction in five 6-bit segments and accumulates `segment * 15625`
//! (15625 = 10^6 / 2^6) with a rounding carry. [`frac_to_micros_exact`] is
//! the plain 64-bit multiply-and-shift. They agree to within a few
//! microseconds; the engine uses the legacy form so results are bit-for-bit
//! comparable with the firmware implementations it interoperates with.

/// The number of seconds from 1st January 1900 UTC to the start of the Unix epoch.
pub const EPOCH_DELTA: u64 = 2_208_988_800;

/// Convert an NTP timestamp (seconds since 1900 plus binary fraction) to
/// microseconds since the Unix epoch.
///
/// The arithmetic is 64-bit throughout. Timestamps before the Unix epoch
/// (seconds < [`EPOCH_DELTA`]) saturate to the epoch itself.
///
/// # Example
///
/// ```
/// use sntp::unix_time::{ntp_to_unix_micros, EPOCH_DELTA};
///
/// // 100 seconds after the Unix epoch.
/// assert_eq!(ntp_to_unix_micros(EPOCH_DELTA as u32 + 100, 0), 100_000_000);
/// ```
pub fn ntp_to_unix_micros(seconds: u32, fraction: u32) -> u64 {
    let secs = u64::from(seconds).saturating_sub(EPOCH_DELTA);
    secs * 1_000_000 + u64::from(frac_to_micros(fraction))
}

/// Convert a 32-bit NTP binary fraction to microseconds using the legacy
/// five-segment accumulation.
///
/// The fraction is consumed as 6-bit segments starting at bit 2, with the
/// running value shifted down 6 bits per step and a +1 carry whenever the
/// bits shifted out were >= half a segment. The result can differ from the
/// exact quotient `fraction * 10^6 / 2^32` by a few microseconds.
pub fn frac_to_micros(fraction: u32) -> u32 {
    let mut value: u32 = 0;
    let mut index = 2;
    while index < 32 {
        let segment = (fraction >> index) & 0x3f;
        let carry = u32::from((value & 0x3f) >= 32);
        value = (value >> 6) + segment * 15_625 + carry;
        index += 6;
    }
    value
}

/// Convert a 32-bit NTP binary fraction to microseconds exactly:
/// `fraction * 10^6 / 2^32`, truncated.
pub fn frac_to_micros_exact(fraction: u32) -> u32 {
    ((u64::from(fraction) * 1_000_000) >> 32) as u32
}

/// Convert microseconds since the Unix epoch back to an NTP timestamp
/// (seconds since 1900, binary fraction).
///
/// The inverse of [`ntp_to_unix_micros`] up to the documented fraction
/// conversion epsilon. Seconds truncate to 32 bits on era rollover, matching
/// the on-wire format.
pub fn unix_micros_to_ntp(micros: u64) -> (u32, u32) {
    let seconds = (micros / 1_000_000 + EPOCH_DELTA) as u32;
    let fraction = (((micros % 1_000_000) << 32) / 1_000_000) as u32;
    (seconds, fraction)
}
