//! Transmit pipeline draining the ring buffer into DMA runs

use crate::Error;
use crate::ring_buffer::RingBuffer;

/// Transmit ring with the length of the run owned by hardware
///
/// While `in_flight > 0`, the bytes `[tail, tail + in_flight)` belong to the transmitter and
/// stay untouched until [`Transmit::complete`].
pub struct Transmit<const N: usize> {
    ring: RingBuffer<N>,
    in_flight: usize,
}

impl<const N: usize> Transmit<N> {
    pub const fn new() -> Self {
        Self {
            ring: RingBuffer::new(),
            in_flight: 0,
        }
    }

    /// Enqueues all bytes or none of them.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if bytes.is_empty() || bytes.len() >= N {
            return Err(Error::InvalidParameter);
        }
        if self.ring.add(bytes) {
            Ok(())
        } else {
            Err(Error::NotEnoughMemory)
        }
    }

    pub fn free_space(&self) -> usize {
        self.ring.free_space()
    }

    #[cfg(test)]
    pub fn queued(&self) -> usize {
        self.ring.occupied_length()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight == 0
    }

    /// Selects the next run to hand to the transmitter.
    ///
    /// A non-wrapping run shorter than `min_size` is deferred to wait for more data.
    /// A wrapping occupied region always yields the run up to the physical end of storage,
    /// since waiting cannot make that run any longer.
    /// The returned run is recorded as in flight.
    pub fn start_next(&mut self, min_size: usize) -> Option<&[u8]> {
        debug_assert!(self.is_idle(), "Transmit started twice");
        if self.ring.is_empty() {
            return None;
        }

        let run = self.ring.tail_run();
        if !self.ring.is_wrapped() && run.len() < min_size {
            return None;
        }
        self.in_flight = run.len();
        Some(run)
    }

    /// Releases the in-flight run after the transmitter finished it.
    pub fn complete(&mut self) {
        unwrap!(self.ring.discard(self.in_flight));
        self.in_flight = 0;
    }
}

impl<const N: usize> Default for Transmit<N> {
    fn default() -> Self {
        Self::new()
    }
}
