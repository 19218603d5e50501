#![allow(dead_code)]

use dmaserial::Hardware;
use embassy_time::{Duration, Instant};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::vec::Vec;

pub fn ts(ms: u64) -> Instant {
    Instant::MIN.saturating_add(Duration::from_millis(ms))
}

#[derive(Default)]
struct State {
    initialized: bool,
    idle_interrupt: bool,
    timeout_interrupt: bool,
    rx: Option<(*mut u8, usize)>,
    rx_position: usize,
    tx: Option<(*const u8, usize)>,
    tx_starts: usize,
    tx_busy: bool,
    flag_clears: usize,
    transmitted: Vec<u8>,
    runs: Vec<usize>,
}

/// Serial peripheral model: memory copies stand in for DMA transfers
#[derive(Clone, Default)]
pub struct SimHardware {
    state: Rc<RefCell<State>>,
}

impl SimHardware {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn is_initialized(&self) -> bool {
        let state = self.state.borrow();
        state.initialized && state.idle_interrupt && state.timeout_interrupt
    }

    pub fn rx_length(&self) -> Option<usize> {
        self.state.borrow().rx.map(|(_, length)| length)
    }

    /// Writes bytes at the receive write position, wrapping at the region end.
    pub fn receive(&self, bytes: &[u8]) {
        let mut state = self.state.borrow_mut();
        let (buffer, length) = state.rx.expect("Receive not started");
        for &byte in bytes {
            unsafe { buffer.add(state.rx_position).write(byte) };
            state.rx_position = (state.rx_position + 1) % length;
        }
    }

    /// Length of the run handed to the transmitter, if any.
    pub fn in_flight(&self) -> Option<usize> {
        self.state.borrow().tx.map(|(_, length)| length)
    }

    /// Finishes the in-flight run and returns its length.
    pub fn finish_transmit(&self) -> usize {
        let mut state = self.state.borrow_mut();
        let (data, length) = state.tx.take().expect("No transmit in flight");
        let bytes = unsafe { std::slice::from_raw_parts(data, length) };
        state.transmitted.extend_from_slice(bytes);
        state.runs.push(length);
        length
    }

    /// Makes the transmitter report bytes left regardless of the in-flight run.
    pub fn set_transmit_busy(&self, busy: bool) {
        self.state.borrow_mut().tx_busy = busy;
    }

    pub fn transmit_starts(&self) -> usize {
        self.state.borrow().tx_starts
    }

    pub fn transmitted(&self) -> Vec<u8> {
        self.state.borrow().transmitted.clone()
    }

    pub fn runs(&self) -> Vec<usize> {
        self.state.borrow().runs.clone()
    }

    pub fn flag_clears(&self) -> usize {
        self.state.borrow().flag_clears
    }
}

impl Hardware for SimHardware {
    fn init(&mut self) {
        self.state.borrow_mut().initialized = true;
    }

    unsafe fn start_circular_receive(&mut self, buffer: *mut u8, length: usize) {
        let mut state = self.state.borrow_mut();
        assert!(state.initialized, "Receive started before init");
        state.rx = Some((buffer, length));
        state.rx_position = 0;
    }

    fn remaining_count(&self) -> u32 {
        let state = self.state.borrow();
        let length = state.rx.map_or(0, |(_, length)| length);
        (length - state.rx_position) as u32
    }

    unsafe fn start_transmit(&mut self, data: *const u8, length: usize) {
        let mut state = self.state.borrow_mut();
        assert!(state.tx.is_none(), "Transmit started while active");
        assert!(length > 0, "Empty transmit");
        state.tx = Some((data, length));
        state.tx_starts += 1;
    }

    fn transmit_is_active(&self) -> bool {
        let state = self.state.borrow();
        state.tx.is_some() || state.tx_busy
    }

    fn clear_transmit_flags(&mut self) {
        self.state.borrow_mut().flag_clears += 1;
    }

    fn enable_line_idle_interrupt(&mut self) {
        self.state.borrow_mut().idle_interrupt = true;
    }

    fn enable_receive_timeout_interrupt(&mut self) {
        self.state.borrow_mut().timeout_interrupt = true;
    }
}

/// Receive consumer recording every delivered slice
#[derive(Clone, Default)]
pub struct Chunks(Arc<Mutex<Vec<Vec<u8>>>>);

impl Chunks {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn consumer(&self) -> &'static mut (dyn dmaserial::Receiver + Send) {
        let chunks = self.0.clone();
        Box::leak(Box::new(move |data: &[u8]| {
            chunks.lock().unwrap().push(data.to_vec())
        }))
    }

    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().clone()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().concat()
    }
}
