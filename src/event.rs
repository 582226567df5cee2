//! Asynchronous completion events and the shared mailbox that carries them.
//!
//! Network hardware (or any other datagram pump) signals send and receive completion out of
//! band from the state machine driving an exchange. The [`EventRegister`] is the mailbox
//! between the two: the pump side marks an event pending and stamps the arrival time, the
//! client side consumes the pending bit and reads the timestamp back when validating the
//! response.
//!
//! All mailbox state is atomic so [`EventRegister::pump`] is safe to call from a completion
//! handler or interrupt shim while the client thread is mid-exchange. The optional callback
//! is guarded by a `try_lock` so the pump path never blocks.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::transport::TimeSource;

/// A completion event raised by the datagram pump.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    /// A response datagram arrived.
    ReceiveComplete,
    /// The request datagram left the interface.
    SendComplete,
}

impl Event {
    fn bit(self) -> u8 {
        match self {
            Event::ReceiveComplete => 1 << 0,
            Event::SendComplete => 1 << 1,
        }
    }
}

/// Notification hook invoked after an event has been consumed.
pub type EventCallback = fn(Event);

/// The mailbox shared between the datagram pump and the client state machine.
///
/// Holds which events are armed, the capture timestamp of the most recent receive
/// completion, and an optional user callback.
#[derive(Debug, Default)]
pub struct EventRegister {
    armed: AtomicU8,
    timestamp_micros: AtomicU64,
    callback: Mutex<Option<EventCallback>>,
}

impl EventRegister {
    /// Creates an empty register with no events armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `event` so the next matching pump call is accepted, and installs `callback`
    /// (if any) to be invoked once the event is consumed.
    pub fn register(&self, event: Event, callback: Option<EventCallback>) {
        if let Ok(mut slot) = self.callback.lock() {
            *slot = callback;
        }
        self.armed.fetch_or(event.bit(), Ordering::AcqRel);
    }

    /// Disarms `event` and clears the captured timestamp and callback.
    pub fn unregister(&self, event: Event) {
        self.armed.fetch_and(!event.bit(), Ordering::AcqRel);
        self.timestamp_micros.store(0, Ordering::Release);
        if let Ok(mut slot) = self.callback.lock() {
            *slot = None;
        }
    }

    /// Whether `event` is currently armed.
    pub fn armed(&self, event: Event) -> bool {
        self.armed.load(Ordering::Acquire) & event.bit() != 0
    }

    /// The arrival timestamp captured by the most recent receive completion, in
    /// microseconds since the Unix epoch. Zero means nothing has been captured.
    pub fn captured_micros(&self) -> u64 {
        self.timestamp_micros.load(Ordering::Acquire)
    }

    /// Delivers `event` from the pump side.
    ///
    /// Consumes the armed bit, stamps the current time from `time` for receive
    /// completions, and invokes the installed callback. Returns
    /// [`Error::NotInitialized`] when the event was not armed, including the case where a
    /// concurrent pump call consumed it first.
    pub fn pump<S>(&self, event: Event, time: &S) -> Result<(), Error>
    where
        S: TimeSource + ?Sized,
    {
        let bit = event.bit();
        let prior = self.armed.fetch_and(!bit, Ordering::AcqRel);
        if prior & bit == 0 {
            return Err(Error::NotInitialized);
        }
        if event == Event::ReceiveComplete {
            self.timestamp_micros
                .store(time.unix_micros(), Ordering::Release);
        }
        // try_lock keeps the pump path non-blocking; a contended lock means the client
        // side is swapping the callback, in which case delivery is skipped.
        if let Ok(slot) = self.callback.try_lock() {
            if let Some(callback) = *slot {
                callback(event);
            }
        }
        Ok(())
    }
}

/// A cloneable handle pairing an [`EventRegister`] with the [`TimeSource`] used to stamp
/// receive completions. This is what gets handed to the transport or completion handler.
#[derive(Debug)]
pub struct EventHandle<S> {
    register: Arc<EventRegister>,
    time: Arc<S>,
}

impl<S> Clone for EventHandle<S> {
    fn clone(&self) -> Self {
        EventHandle {
            register: Arc::clone(&self.register),
            time: Arc::clone(&self.time),
        }
    }
}

impl<S> EventHandle<S>
where
    S: TimeSource,
{
    /// Creates a handle over a shared register and time source.
    pub fn new(register: Arc<EventRegister>, time: Arc<S>) -> Self {
        EventHandle { register, time }
    }

    /// Delivers `event` through the underlying register.
    pub fn pump(&self, event: Event) -> Result<(), Error> {
        self.register.pump(event, self.time.as_ref())
    }
}
