//! Asynchronous DMA byte-stream transport for serial channels
//!
//! A [`Channel`] moves bytes between a higher-level protocol stack and a serial peripheral
//! whose receiver and transmitter are fed by DMA. Users enqueue bytes with [`Channel::send`]
//! from any thread; a single worker task ([`Runner`]) hands contiguous runs of the transmit
//! ring to the hardware, delivers received bytes to the registered [`Receiver`] and fires
//! deferred callbacks registered through [`ScheduleApi`].
//!
//! Interrupt handlers never touch channel state. They acknowledge the hardware flag and
//! report the [`Cause`] through a [`Notifier`], directly or through a channel-indexed
//! [`Bridge`].
//!
//! # Usage
//!
//! ```ignore
//! static CHANNEL: Channel<'static, CriticalSectionRawMutex> = Channel::new(Config::new());
//!
//! #[embassy_executor::task]
//! async fn serial_task(hardware: Usart1) -> ! {
//!     CHANNEL.start(hardware).run().await
//! }
//!
//! #[interrupt]
//! fn USART1() {
//!     let cause = acknowledge_usart1();
//!     CHANNEL.notifier().on_interrupt(cause);
//! }
//! ```
//!
//! Received slices are physically contiguous and valid for the duration of the callback only.
//! A receive burst crossing the end of the circular region arrives as two calls.
#![no_std]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

mod channel;
mod config;
mod notify;
mod ring_buffer;
mod rx;
mod schedule;
mod tx;

pub use channel::{Channel, Receiver, ReceiverRef, Runner, Transport};
pub use config::{Config, DEFAULT_EVENT_COUNT, DEFAULT_RX_SIZE, DEFAULT_TX_SIZE};
pub use dmaserial_hal::{Cause, Hardware};
pub use notify::{Bridge, Events, Notifier};
pub use ring_buffer::RingBuffer;
pub use schedule::{Event, EventId, ScheduleApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Not enough space in a fixed-capacity store. Retry later.
    NotEnoughMemory,
    /// The request can never succeed in its current form.
    InvalidParameter,
}
