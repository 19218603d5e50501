//! Interrupt to worker notification bridge
//!
//! Interrupt handlers only acknowledge the hardware flag and post a notification bit. All
//! stateful work happens in the channel worker, which consumes the accumulated bits.

use core::future::poll_fn;
use core::sync::atomic::{AtomicU8, Ordering};
use core::task::Poll;
use dmaserial_hal::Cause;
use embassy_futures::select::{Either, select};
use embassy_sync::waitqueue::AtomicWaker;
use embassy_time::{Duration, Timer};

/// Set of pending worker notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Events(u8);

impl Events {
    const MASK: u8 = 0x0f;

    pub const NONE: Self = Self(0);

    /// New bytes may have arrived in the receive region
    pub const RECEIVE: Self = Self(1 << 0);

    /// Bytes were queued for transmission
    pub const TRANSMIT: Self = Self(1 << 1);

    /// The transmitter finished the in-flight run
    pub const TRANSMIT_COMPLETE: Self = Self(1 << 2);

    /// The schedule changed and the wait time needs recomputing
    pub const SCHEDULE: Self = Self(1 << 3);

    pub const ALL: Self = Self(Self::MASK);

    pub const fn from_bits_truncating(bits: u8) -> Self {
        Self(bits & Self::MASK)
    }

    pub const fn into_bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == Self::NONE.0
    }

    pub const fn contains(&self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Events) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Events) {
        self.0 &= !other.0;
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<Cause> for Events {
    fn from(cause: Cause) -> Self {
        if cause.is_receive() {
            Events::RECEIVE
        } else {
            Events::TRANSMIT_COMPLETE
        }
    }
}

impl core::ops::Not for Events {
    type Output = Events;
    fn not(self) -> Self::Output {
        Self::from_bits_truncating(!self.0)
    }
}

impl core::ops::BitAnd for Events {
    type Output = Events;
    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl core::ops::BitOr for Events {
    type Output = Events;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Single-consumer wait primitive carrying an event bitset
///
/// Posting is lock-free with respect to the channel state and safe from interrupt context.
/// A post that precedes the wait call is never lost: the bits accumulate until taken.
pub struct Notifier {
    pending: AtomicU8,
    waker: AtomicWaker,
}

impl Notifier {
    pub const fn new() -> Self {
        Self {
            pending: AtomicU8::new(0),
            waker: AtomicWaker::new(),
        }
    }

    /// Posts events and wakes the worker. Never blocks.
    pub fn post(&self, events: Events) {
        self.pending.fetch_or(events.into_bits(), Ordering::Release);
        self.waker.wake();
    }

    /// Interrupt entry point. Call after acknowledging the hardware flag.
    pub fn on_interrupt(&self, cause: Cause) {
        self.post(cause.into());
    }

    /// Takes and clears all pending events.
    pub fn take(&self) -> Events {
        Events::from_bits_truncating(self.pending.swap(0, Ordering::Acquire))
    }

    /// Waits for at least one event or the timeout, whichever comes first.
    ///
    /// Returns the taken events, possibly none after a timeout.
    pub async fn wait(&self, timeout: Duration) -> Events {
        // Timer always yields on first poll. Skip it explicitly if there is nothing to wait for
        if timeout == Duration::from_ticks(0) {
            return self.take();
        }

        match select(self.wait_any(), Timer::after(timeout)).await {
            Either::First(events) => events,
            Either::Second(()) => self.take(),
        }
    }

    async fn wait_any(&self) -> Events {
        poll_fn(|cx| {
            self.waker.register(cx.waker());

            // Check after the waker is set
            let events = self.take();
            if events.is_empty() {
                Poll::Pending
            } else {
                Poll::Ready(events)
            }
        })
        .await
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel-indexed interrupt dispatcher
///
/// Maps a platform channel index to the notifier of its driver instance. Interrupt handlers
/// shared by several channels report through it without reaching any channel state.
pub struct Bridge<'a, const N: usize> {
    notifiers: [&'a Notifier; N],
}

impl<'a, const N: usize> Bridge<'a, N> {
    pub const fn new(notifiers: [&'a Notifier; N]) -> Self {
        Self { notifiers }
    }

    pub fn on_interrupt(&self, channel: usize, cause: Cause) {
        match self.notifiers.get(channel) {
            Some(notifier) => notifier.on_interrupt(cause),
            None => warn!("Interrupt for unknown channel {}", channel),
        }
    }

    pub fn notifier(&self, channel: usize) -> Option<&'a Notifier> {
        self.notifiers.get(channel).copied()
    }
}
