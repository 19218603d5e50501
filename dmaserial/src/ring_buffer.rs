//! Fixed-capacity circular byte store

use crate::Error;

/// Circular byte buffer with one sacrificed slot
///
/// `head` is the next write position, `tail` the next read position. `head == tail` means
/// empty, so at most `N - 1` bytes are occupied.
pub struct RingBuffer<const N: usize> {
    storage: [u8; N],
    head: usize,
    tail: usize,
}

impl<const N: usize> RingBuffer<N> {
    const _ASSERT: () = core::assert!(N >= 2, "Ring buffer needs at least two slots");

    pub const fn new() -> Self {
        let () = Self::_ASSERT;
        Self {
            storage: [0; N],
            head: 0,
            tail: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// The occupied region crosses the physical end of storage
    pub fn is_wrapped(&self) -> bool {
        self.tail > self.head
    }

    pub fn occupied_length(&self) -> usize {
        if self.head >= self.tail {
            self.head - self.tail
        } else {
            N - self.tail + self.head
        }
    }

    pub fn free_space(&self) -> usize {
        N - 1 - self.occupied_length()
    }

    /// Appends all bytes or none of them.
    pub fn add(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.free_space() {
            return false;
        }

        let first = bytes.len().min(N - self.head);
        let (front, back) = bytes.split_at(first);
        self.storage[self.head..self.head + first].copy_from_slice(front);
        self.storage[..back.len()].copy_from_slice(back);
        self.head = (self.head + bytes.len()) % N;
        true
    }

    /// Releases `count` bytes from the tail.
    pub fn discard(&mut self, count: usize) -> Result<(), Error> {
        if count > self.occupied_length() {
            return Err(Error::InvalidParameter);
        }
        self.tail = (self.tail + count) % N;
        Ok(())
    }

    /// Contiguous occupied run starting at the tail.
    ///
    /// Stops at the physical end of storage when the occupied region wraps. Call again after
    /// discarding it to get the remainder.
    pub fn tail_run(&self) -> &[u8] {
        if self.is_wrapped() {
            &self.storage[self.tail..]
        } else {
            &self.storage[self.tail..self.head]
        }
    }

    /// Address of the next byte to be read
    pub fn occupied_tail_pointer(&self) -> *const u8 {
        self.storage[self.tail..].as_ptr()
    }

    /// Address one past the last occupied byte, where the next write goes
    pub fn occupied_head_pointer(&self) -> *const u8 {
        self.storage[self.head..].as_ptr()
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
