use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering, compiler_fence};
use dmaserial_hal::Hardware;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Instant};

use crate::Error;
use crate::config::{self, Config};
use crate::notify::{Events, Notifier};
use crate::rx::{DmaRegion, Receive};
use crate::schedule::{Event, EventId, Schedule, ScheduleApi};
use crate::tx::Transmit;

/// Consumer of received bytes
///
/// Called on the channel worker with the channel mutex held. Every slice is physically
/// contiguous and must be consumed before returning: hardware will eventually overwrite it.
pub trait Receiver {
    fn on_receive(&mut self, data: &[u8]);
}

impl<F> Receiver for F
where
    F: FnMut(&[u8]),
{
    fn on_receive(&mut self, data: &[u8]) {
        self(data)
    }
}

pub type ReceiverRef<'a> = &'a mut (dyn Receiver + Send);

/// Channel API for layers riding on top of the byte stream
///
/// Object-safe, so a protocol stack can address any channel through an index table without
/// knowing its buffer sizes or mutex type.
pub trait Transport<'a> {
    fn send(&self, bytes: &[u8]) -> Result<(), Error>;
    fn send_available(&self) -> usize;
    fn register_receive(
        &self,
        receiver: ReceiverRef<'a>,
    ) -> Result<Option<ReceiverRef<'a>>, Error>;
    fn unregister_receive(&self) -> Result<Option<ReceiverRef<'a>>, Error>;
    /// Runs `f` inside the channel's synchronization domain.
    fn with_lock(&self, f: &mut dyn FnMut());
    fn schedule_api(&self) -> &dyn ScheduleApi<'a>;
}

struct Shared<'a, const TX: usize, const EV: usize> {
    tx: RefCell<Transmit<TX>>,
    receiver: RefCell<Option<ReceiverRef<'a>>>,
    schedule: RefCell<Schedule<'a, EV>>,
}

/// One DMA serial channel
///
/// Owns the transmit ring, the circular receive region, the schedule and the notifier of its
/// worker. A channel lives for the rest of the program: create it in a static cell, start it
/// once and run the produced [`Runner`] in a dedicated task.
///
/// All mutable state sits behind a single mutex of type `M`. The receive consumer and event
/// callbacks run with that mutex held and may call back into the channel.
/// `CriticalSectionRawMutex` lets users run at different interrupt levels at the cost of
/// callbacks running in a critical section. `ThreadModeRawMutex` keeps interrupts enabled
/// but requires every user to run in thread mode.
pub struct Channel<
    'a,
    M: RawMutex,
    const TX: usize = { config::DEFAULT_TX_SIZE },
    const RX: usize = { config::DEFAULT_RX_SIZE },
    const EV: usize = { config::DEFAULT_EVENT_COUNT },
> {
    config: Config,
    notifier: Notifier,
    shared: Mutex<M, Shared<'a, TX, EV>>,
    region: DmaRegion<RX>,
    started: AtomicBool,
}

impl<'a, M: RawMutex, const TX: usize, const RX: usize, const EV: usize> Channel<'a, M, TX, RX, EV> {
    pub const fn new(config: Config) -> Self {
        Self {
            config,
            notifier: Notifier::new(),
            shared: Mutex::new(Shared {
                tx: RefCell::new(Transmit::new()),
                receiver: RefCell::new(None),
                schedule: RefCell::new(Schedule::new()),
            }),
            region: DmaRegion::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Notification handle for the interrupt handlers of this channel
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Binds the hardware and produces the worker.
    ///
    /// A channel has exactly one worker. Starting it twice leaves two workers racing over the
    /// same hardware, which is unrecoverable: the call halts.
    pub fn start<H: Hardware>(&self, hardware: H) -> Runner<'_, 'a, M, H, TX, RX, EV> {
        if self.started.swap(true, Ordering::AcqRel) {
            error!("Channel worker already exists");
            panic!("Channel already started");
        }

        Runner {
            channel: self,
            hardware,
            receive: Receive::new(),
            min_chunk: self.config.min_chunk(TX),
            initialized: false,
        }
    }

    /// Queues bytes for transmission, all or nothing.
    ///
    /// Fails with [`Error::NotEnoughMemory`] when the ring lacks space; retry once
    /// [`Channel::send_available`] reports enough room. Empty and never-fitting slices are
    /// rejected with [`Error::InvalidParameter`].
    pub fn send(&self, bytes: &[u8]) -> Result<(), Error> {
        self.shared.lock(|shared| {
            let result = shared.tx.borrow_mut().push(bytes);
            match result {
                Ok(()) => self.notifier.post(Events::TRANSMIT),
                Err(err) => trace!("Send of {} bytes rejected: {:?}", bytes.len(), err),
            }
            result
        })
    }

    /// Free space in the transmit ring. A send of at most this many bytes succeeds until
    /// someone else sends.
    pub fn send_available(&self) -> usize {
        self.shared.lock(|shared| shared.tx.borrow().free_space())
    }

    /// Replaces the receive consumer and hands back the previous one.
    ///
    /// Fails with [`Error::InvalidParameter`] when called from within the consumer itself.
    pub fn register_receive(
        &self,
        receiver: ReceiverRef<'a>,
    ) -> Result<Option<ReceiverRef<'a>>, Error> {
        self.replace_receiver(Some(receiver))
    }

    /// Removes the receive consumer. Received bytes are dropped until the next registration.
    pub fn unregister_receive(&self) -> Result<Option<ReceiverRef<'a>>, Error> {
        self.replace_receiver(None)
    }

    fn replace_receiver(
        &self,
        receiver: Option<ReceiverRef<'a>>,
    ) -> Result<Option<ReceiverRef<'a>>, Error> {
        self.shared.lock(|shared| {
            let mut slot = shared
                .receiver
                .try_borrow_mut()
                .map_err(|_| Error::InvalidParameter)?;
            Ok(core::mem::replace(&mut *slot, receiver))
        })
    }

    /// Runs `f` with the channel mutex held.
    ///
    /// Brackets multi-step operations against the worker and other users. Channel methods
    /// may be called from within `f`.
    pub fn lock<R>(&self, f: impl FnOnce() -> R) -> R {
        self.shared.lock(|_| f())
    }

    /// Schedules `event` to run on the worker at `due`.
    pub fn schedule(
        &self,
        due: Instant,
        event: &'a (dyn Event + Sync),
    ) -> Result<EventId, Error> {
        let result = self
            .shared
            .lock(|shared| shared.schedule.borrow_mut().insert(due, event));
        match result {
            Ok(_) => self.notifier.post(Events::SCHEDULE),
            Err(_) => warn!("Schedule is full"),
        }
        result
    }

    /// Removes a pending event. Fails with [`Error::InvalidParameter`] if the event already
    /// fired or never existed.
    pub fn cancel(&self, id: EventId) -> Result<(), Error> {
        self.shared
            .lock(|shared| shared.schedule.borrow_mut().cancel(id))?;
        self.notifier.post(Events::SCHEDULE);
        Ok(())
    }

    /// Worker sleep time: until the nearest due event, at most the service ceiling.
    pub fn next_wait(&self, now: Instant) -> Duration {
        self.shared.lock(|shared| {
            shared
                .schedule
                .borrow()
                .next_wait(now, self.config.service_ceiling)
        })
    }

    /// Fires all events due at `now` in due order.
    ///
    /// Events inserted during the pass wait for the next one, so a callback rescheduling
    /// itself at `now` does not spin.
    fn process_schedule(&self, now: Instant) {
        self.shared.lock(|shared| {
            let mark = shared.schedule.borrow().mark();
            loop {
                let due = shared.schedule.borrow_mut().pop_due(now, mark);
                let Some(due) = due else {
                    break;
                };

                let Some(next) = due.event.on_event(due.id, now) else {
                    continue;
                };
                let result = shared
                    .schedule
                    .borrow_mut()
                    .reinsert(due.id, next, due.event);
                if result.is_err() {
                    warn!("Schedule is full, event {} retired", due.id.into_u32());
                }
            }
        });
    }
}

impl<'a, M, const TX: usize, const RX: usize, const EV: usize> ScheduleApi<'a>
    for Channel<'a, M, TX, RX, EV>
where
    M: RawMutex,
{
    fn schedule(&self, due: Instant, event: &'a (dyn Event + Sync)) -> Result<EventId, Error> {
        Channel::schedule(self, due, event)
    }

    fn cancel(&self, id: EventId) -> Result<(), Error> {
        Channel::cancel(self, id)
    }
}

impl<'a, M, const TX: usize, const RX: usize, const EV: usize> Transport<'a>
    for Channel<'a, M, TX, RX, EV>
where
    M: RawMutex,
{
    fn send(&self, bytes: &[u8]) -> Result<(), Error> {
        Channel::send(self, bytes)
    }

    fn send_available(&self) -> usize {
        Channel::send_available(self)
    }

    fn register_receive(
        &self,
        receiver: ReceiverRef<'a>,
    ) -> Result<Option<ReceiverRef<'a>>, Error> {
        Channel::register_receive(self, receiver)
    }

    fn unregister_receive(&self) -> Result<Option<ReceiverRef<'a>>, Error> {
        Channel::unregister_receive(self)
    }

    fn with_lock(&self, f: &mut dyn FnMut()) {
        self.lock(f)
    }

    fn schedule_api(&self) -> &dyn ScheduleApi<'a> {
        self
    }
}

/// Channel worker
///
/// Run this task for proper channel operation. Each wake cycle reconciles a finished
/// transmission before starting a new one, services transmission before reception, and
/// reception before scheduled events.
pub struct Runner<'c, 'a, M: RawMutex, H: Hardware, const TX: usize, const RX: usize, const EV: usize>
{
    channel: &'c Channel<'a, M, TX, RX, EV>,
    hardware: H,
    receive: Receive<RX>,
    min_chunk: usize,
    initialized: bool,
}

impl<'c, 'a, M, H, const TX: usize, const RX: usize, const EV: usize> Runner<'c, 'a, M, H, TX, RX, EV>
where
    M: RawMutex,
    H: Hardware,
{
    pub async fn run(&mut self) -> ! {
        self.init();
        loop {
            let timeout = self.channel.next_wait(Instant::now());
            let events = self.channel.notifier.wait(timeout).await;
            self.service(events, Instant::now());
        }
    }

    /// Initializes the hardware and starts circular reception. Runs once.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;

        self.hardware.init();
        // Safety: the region lives as long as the channel, and software only reads it
        unsafe {
            self.hardware
                .start_circular_receive(self.channel.region.as_mut_ptr(), RX)
        };
        self.hardware.enable_line_idle_interrupt();
        self.hardware.enable_receive_timeout_interrupt();
        info!("Channel started: rx region {} bytes, tx ring {} bytes", RX, TX);
    }

    /// One wake cycle for the given events.
    ///
    /// An empty event set is a timeout: reception is still drained in case an interrupt
    /// got coalesced away, and due events fire.
    pub fn service(&mut self, events: Events, now: Instant) {
        let channel = self.channel;
        channel.shared.lock(|shared| {
            let mut tx = shared.tx.borrow_mut();
            if events.contains(Events::TRANSMIT_COMPLETE) {
                self.reconcile_transmit(&mut tx);
            }
            if tx.is_idle() {
                self.start_transmit(&mut tx, self.min_chunk);
            }
            drop(tx);

            if events.contains(Events::RECEIVE) || events.is_empty() {
                self.drain_receive(&mut shared.receiver.borrow_mut());
            }
        });

        channel.process_schedule(now);

        channel.shared.lock(|shared| {
            let mut tx = shared.tx.borrow_mut();
            if tx.is_idle() {
                self.start_transmit(&mut tx, 0);
            }
        });
    }

    /// Platform access, e.g. for reconfiguration between wake cycles
    pub fn hardware(&mut self) -> &mut H {
        &mut self.hardware
    }

    fn reconcile_transmit(&mut self, tx: &mut Transmit<TX>) {
        if tx.is_idle() {
            return;
        }
        // The interrupt fires once per run, so the notification alone releases it
        if self.hardware.transmit_is_active() {
            warn!("Transmit complete posted with transmit DMA bytes left");
        }
        trace!("Transmitted {} bytes", tx.in_flight());
        tx.complete();
    }

    fn start_transmit(&mut self, tx: &mut Transmit<TX>, min_size: usize) {
        let Some(run) = tx.start_next(min_size) else {
            return;
        };
        let (data, length) = (run.as_ptr(), run.len());
        self.hardware.clear_transmit_flags();
        // Safety: the run stays in flight, and thus untouched, until `Transmit::complete`
        unsafe { self.hardware.start_transmit(data, length) };
        trace!("Transmit started: {} bytes", length);
    }

    fn drain_receive(&mut self, receiver: &mut Option<ReceiverRef<'a>>) {
        let position = Receive::<RX>::write_position(self.hardware.remaining_count());
        // Bytes below the sampled position are written before the counter moved past them
        compiler_fence(Ordering::Acquire);

        while let Some(span) = self.receive.next_span(position) {
            // Safety: hardware returns to the span only after a full wrap
            let data = unsafe { self.channel.region.span(span) };
            match receiver.as_mut() {
                Some(receiver) => receiver.on_receive(data),
                None => trace!("Dropped {} received bytes", data.len()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use std::boxed::Box;
    use std::vec::Vec;

    type TestChannel = Channel<'static, CriticalSectionRawMutex, 16, 8, 4>;

    fn make_channel() -> &'static TestChannel {
        Box::leak(Box::new(Channel::new(Config::default())))
    }

    #[test]
    fn test_send_posts_transmit() {
        let channel = make_channel();
        assert_eq!(channel.send(&[1, 2, 3]), Ok(()));
        assert_eq!(channel.notifier().take(), Events::TRANSMIT);
        assert_eq!(channel.send_available(), 12);
    }

    #[test]
    fn test_rejected_send_does_not_post() {
        let channel = make_channel();
        assert_eq!(channel.send(&[]), Err(Error::InvalidParameter));
        assert_eq!(channel.send(&[0; 16]), Err(Error::InvalidParameter));
        channel.send(&[0; 10]).unwrap();
        channel.notifier().take();

        assert_eq!(channel.send(&[0; 8]), Err(Error::NotEnoughMemory));
        assert_eq!(channel.notifier().take(), Events::NONE);
        assert_eq!(channel.send_available(), 5);
    }

    #[test]
    fn test_register_replaces() {
        let channel = make_channel();
        let first = Box::leak(Box::new(|_: &[u8]| {}));
        let second = Box::leak(Box::new(|_: &[u8]| {}));

        assert!(channel.register_receive(first).unwrap().is_none());
        assert!(channel.register_receive(second).unwrap().is_some());
        assert!(channel.unregister_receive().unwrap().is_some());
        assert!(channel.unregister_receive().unwrap().is_none());
    }

    #[test]
    fn test_schedule_posts_and_bounds_wait() {
        let channel = make_channel();
        let nop: &'static _ = Box::leak(Box::new(|_: EventId, _: Instant| -> Option<Instant> {
            None
        }));
        let now = Instant::MIN.saturating_add(Duration::from_millis(100));

        assert_eq!(channel.next_wait(now), Duration::from_millis(500));
        let id = channel
            .schedule(now + Duration::from_millis(20), nop)
            .unwrap();
        assert_eq!(channel.notifier().take(), Events::SCHEDULE);
        assert_eq!(channel.next_wait(now), Duration::from_millis(20));

        channel.cancel(id).unwrap();
        assert_eq!(channel.notifier().take(), Events::SCHEDULE);
        assert_eq!(channel.cancel(id), Err(Error::InvalidParameter));
        assert_eq!(channel.next_wait(now), Duration::from_millis(500));
    }

    #[test]
    fn test_lock_is_reentrant_for_channel_calls() {
        let channel = make_channel();
        let available = channel.lock(|| {
            channel.send(&[1, 2]).unwrap();
            channel.send_available()
        });
        assert_eq!(available, 13);
    }

    #[test]
    fn test_transport_table() {
        let first = make_channel();
        let second = make_channel();
        let table: [&dyn Transport<'static>; 2] = [first, second];

        table[1].send(&[5; 4]).unwrap();
        assert_eq!(table[0].send_available(), 15);
        assert_eq!(table[1].send_available(), 11);

        let mut calls = Vec::new();
        table[0].with_lock(&mut || calls.push(()));
        assert_eq!(calls.len(), 1);
    }
}
