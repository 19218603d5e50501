//! Receive pipeline over a hardware-written circular region

use core::cell::UnsafeCell;
use core::ops::Range;

/// Memory region written by the receive DMA
///
/// The driver owns the memory but never writes it. Hardware rewrites it from the start after
/// reaching the end.
pub(crate) struct DmaRegion<const N: usize> {
    bytes: UnsafeCell<[u8; N]>,
}

// Safety: software only reads the region, and only from the single channel runner
unsafe impl<const N: usize> Sync for DmaRegion<N> {}

impl<const N: usize> DmaRegion<N> {
    pub const fn new() -> Self {
        Self {
            bytes: UnsafeCell::new([0; N]),
        }
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.bytes.get().cast()
    }

    // Safety: hardware must have written the span and must not rewrite it while the slice lives
    pub unsafe fn span(&self, span: Range<usize>) -> &[u8] {
        debug_assert!(span.start <= span.end && span.end <= N);
        unsafe { core::slice::from_raw_parts(self.as_mut_ptr().add(span.start), span.len()) }
    }
}

/// Delivery progress over a circular region of `N` bytes
///
/// `[consumed, write_position)` modulo `N` has been written by hardware but not yet delivered.
#[derive(Debug, Default, Clone)]
pub struct Receive<const N: usize> {
    consumed: usize,
}

impl<const N: usize> Receive<N> {
    pub const fn new() -> Self {
        Self { consumed: 0 }
    }

    #[cfg(test)]
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Translates the DMA remaining-count register into a write offset.
    ///
    /// A zero count is the reload instant and maps to offset 0, like a count of `N`.
    pub fn write_position(remaining: u32) -> usize {
        let remaining = usize::try_from(remaining).unwrap_or(N).min(N);
        (N - remaining) % N
    }

    /// Next physically contiguous span to deliver.
    ///
    /// The span never crosses the end of the region: a wrapped write position first yields
    /// the remainder up to the end, then the prefix from the start on the following call.
    /// Returns `None` once everything up to `write_position` was delivered.
    pub fn next_span(&mut self, write_position: usize) -> Option<Range<usize>> {
        debug_assert!(write_position < N);
        if write_position == self.consumed {
            return None;
        }

        let span = if write_position > self.consumed {
            self.consumed..write_position
        } else {
            self.consumed..N
        };
        self.consumed = span.end % N;
        Some(span)
    }
}
