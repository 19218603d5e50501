//! Dmaserial hardware interface
//!
//! The crate provides the contract between a serial peripheral with DMA support and the
//! `dmaserial` driver. Limited scope facilitates compatibility across versions.
//! Platform crates should depend on this crate. Driver users should depend on the `dmaserial`
//! crate instead.
//!
//! A platform provides two things:
//! * a [`Hardware`] implementation per physical channel, owned by the channel worker;
//! * interrupt handlers that acknowledge the hardware flag and report the [`Cause`] to the
//!   driver's interrupt bridge.
//!
//! The receive path runs a circular DMA transfer over a driver-owned region. The driver never
//! acknowledges received data: it derives the hardware write position from the remaining-count
//! register on every wakeup. The transmit path runs one-shot DMA transfers over contiguous runs
//! of the driver's transmit ring.
//!
//! Interrupt handlers must not touch driver buffers. They only clear the hardware flag and post
//! a notification, so they may run at any priority above the worker.
#![no_std]

/// Hardware interrupt source reported by a platform interrupt handler
///
/// Several sources share one driver notification: the receive pipeline re-derives its progress
/// from the position counter, so it does not matter which of them fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cause {
    /// Receive DMA reached the middle of the circular region
    HalfTransfer,
    /// Receive DMA reached the end of the circular region and restarted
    TransferComplete,
    /// The receive line went idle after a character
    LineIdle,
    /// No character was received for the configured timeout
    ReceiveTimeout,
    /// Transmit DMA finished the current run
    TransmitComplete,
}

impl Cause {
    pub const fn is_receive(self) -> bool {
        match self {
            Cause::HalfTransfer | Cause::TransferComplete => true,
            Cause::LineIdle | Cause::ReceiveTimeout => true,
            Cause::TransmitComplete => false,
        }
    }
}

/// DMA-capable serial channel
///
/// The driver calls these methods from the channel worker only. Interrupt handlers use
/// their own register access to acknowledge flags.
pub trait Hardware {
    /// Configures the peripheral and both DMA channels. Called once before any other method.
    fn init(&mut self);

    /// Starts a circular receive transfer over `length` bytes at `buffer`.
    ///
    /// # Safety
    ///
    /// The region must stay valid for the rest of the program. Hardware may write any byte
    /// of it at any time.
    unsafe fn start_circular_receive(&mut self, buffer: *mut u8, length: usize);

    /// Number of bytes left before the receive transfer wraps. The write position is
    /// `length - remaining`.
    fn remaining_count(&self) -> u32;

    /// Starts a one-shot transmit transfer of `length` bytes at `data`.
    ///
    /// # Safety
    ///
    /// The bytes must stay valid and unmodified until the transfer completes.
    unsafe fn start_transmit(&mut self, data: *const u8, length: usize);

    /// Whether the transmit DMA still has bytes left to move, i.e. its remaining count is
    /// non-zero.
    ///
    /// Must not reflect the channel enable bit, which stays set after a one-shot transfer, nor
    /// the serial shifter still sending the final byte. The driver only uses it for diagnostics:
    /// the transmit complete notification alone releases the in-flight run.
    fn transmit_is_active(&self) -> bool;

    /// Clears stale transmit complete, half-transfer and error flags before a new transfer.
    fn clear_transmit_flags(&mut self);

    fn enable_line_idle_interrupt(&mut self);

    fn enable_receive_timeout_interrupt(&mut self);
}

impl<H: Hardware + ?Sized> Hardware for &mut H {
    fn init(&mut self) {
        (**self).init()
    }

    unsafe fn start_circular_receive(&mut self, buffer: *mut u8, length: usize) {
        unsafe { (**self).start_circular_receive(buffer, length) }
    }

    fn remaining_count(&self) -> u32 {
        (**self).remaining_count()
    }

    unsafe fn start_transmit(&mut self, data: *const u8, length: usize) {
        unsafe { (**self).start_transmit(data, length) }
    }

    fn transmit_is_active(&self) -> bool {
        (**self).transmit_is_active()
    }

    fn clear_transmit_flags(&mut self) {
        (**self).clear_transmit_flags()
    }

    fn enable_line_idle_interrupt(&mut self) {
        (**self).enable_line_idle_interrupt()
    }

    fn enable_receive_timeout_interrupt(&mut self) {
        (**self).enable_receive_timeout_interrupt()
    }
}
