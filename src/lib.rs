/*!
An SNTP (RFC 4330) client engine.

The crate separates the protocol state machine from the platform: [`SntpClient`] drives
request/response exchanges over a [`transport::Transport`] and reads clocks through a
[`transport::TimeSource`], while arrival timestamps flow in asynchronously through an
[`event::EventRegister`]. On hosted targets the provided [`transport::UdpTransport`] and
[`transport::SystemTimeSource`] wire the whole thing to `std::net` and the system clock.

# Example

Fetch the current time from a public server and print the local clock offset.

```rust,no_run
use std::sync::Arc;

use sntp::event::EventRegister;
use sntp::transport::{resolve_host, SystemTimeSource, UdpTransport};
use sntp::SntpClient;

fn main() -> Result<(), sntp::Error> {
    let time = Arc::new(SystemTimeSource::new());
    let events = Arc::new(EventRegister::new());
    let handle = sntp::event::EventHandle::new(Arc::clone(&events), Arc::clone(&time));
    let transport = UdpTransport::new().with_notifier(handle);

    let mut client = SntpClient::with_events(transport, time, events);
    client.set_server_address(resolve_host("pool.ntp.org:123")?);

    let stamps = client.run_exchange()?;
    let (offset, delay) = stamps.offset_and_delay_micros();
    println!("offset {offset} us, round-trip delay {delay} us");
    Ok(())
}
```
*/

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The exchange state machine and its timestamp results.
pub mod client;
pub mod error;
/// Completion events and the mailbox that delivers arrival timestamps.
pub mod event;
pub mod protocol;
/// Time sources and datagram transports.
pub mod transport;
/// NTP timestamp to Unix microsecond conversion.
pub mod unix_time;
/// Response sanity checks and timestamp extraction.
pub mod validate;

pub use client::{SntpClient, State, TimestampSet, DEFAULT_TIMEOUT_MS};
pub use error::{Error, InvalidReason};
pub use protocol::KissOfDeath;
