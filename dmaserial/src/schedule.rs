//! Deadline scheduler served by the channel worker

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::Error;

/// Handle of a scheduled event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventId(u32);

impl EventId {
    pub const fn into_u32(self) -> u32 {
        self.0
    }
}

/// Deferred callback running on the channel worker
///
/// Returning a due time fires the event again under the same id. Returning `None` retires it.
pub trait Event {
    fn on_event(&self, id: EventId, now: Instant) -> Option<Instant>;
}

impl<F> Event for F
where
    F: Fn(EventId, Instant) -> Option<Instant>,
{
    fn on_event(&self, id: EventId, now: Instant) -> Option<Instant> {
        self(id, now)
    }
}

/// Scheduling access for layers running on top of a channel
///
/// Callable from any thread and from event callbacks themselves.
pub trait ScheduleApi<'a> {
    fn schedule(&self, due: Instant, event: &'a (dyn Event + Sync)) -> Result<EventId, Error>;
    fn cancel(&self, id: EventId) -> Result<(), Error>;
}

/// Event taken from the schedule for firing
pub struct Due<'a> {
    pub id: EventId,
    pub event: &'a (dyn Event + Sync),
}

struct Entry<'a> {
    due: Instant,
    seq: u64,
    id: EventId,
    event: &'a (dyn Event + Sync),
}

/// Events ordered by due time, ties in insertion order
pub struct Schedule<'a, const N: usize> {
    entries: Vec<Entry<'a>, N>,
    next_id: u32,
    next_seq: u64,
}

impl<'a, const N: usize> Schedule<'a, N> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
            next_seq: 0,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(
        &mut self,
        due: Instant,
        event: &'a (dyn Event + Sync),
    ) -> Result<EventId, Error> {
        let id = EventId(self.next_id);
        self.reinsert(id, due, event)?;
        self.next_id = self.next_id.wrapping_add(1);
        Ok(id)
    }

    /// Inserts an event under an existing id.
    pub fn reinsert(
        &mut self,
        id: EventId,
        due: Instant,
        event: &'a (dyn Event + Sync),
    ) -> Result<(), Error> {
        if self.entries.is_full() {
            return Err(Error::NotEnoughMemory);
        }
        let seq = self.next_seq;
        self.next_seq += 1;

        let idx = self.entries.partition_point(|entry| entry.due <= due);
        let entry = Entry {
            due,
            seq,
            id,
            event,
        };
        if self.entries.insert(idx, entry).is_err() {
            unreachable!();
        }
        Ok(())
    }

    pub fn cancel(&mut self, id: EventId) -> Result<(), Error> {
        let idx = self
            .entries
            .iter()
            .position(|entry| entry.id == id)
            .ok_or(Error::InvalidParameter)?;
        self.entries.remove(idx);
        Ok(())
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.entries.first().map(|entry| entry.due)
    }

    /// Time until the nearest due event, bounded by `ceiling`.
    pub fn next_wait(&self, now: Instant, ceiling: Duration) -> Duration {
        match self.next_due() {
            Some(due) => due.saturating_duration_since(now).min(ceiling),
            None => ceiling,
        }
    }

    /// Marker separating events inserted so far from later insertions.
    ///
    /// Pass it to [`Schedule::pop_due`] so that a processing pass terminates even when
    /// callbacks keep inserting already expired events.
    pub fn mark(&self) -> u64 {
        self.next_seq
    }

    /// Removes the earliest event due at `now` that was inserted before `mark`.
    pub fn pop_due(&mut self, now: Instant, mark: u64) -> Option<Due<'a>> {
        let idx = self
            .entries
            .iter()
            .take_while(|entry| entry.due <= now)
            .position(|entry| entry.seq < mark)?;
        let entry = self.entries.remove(idx);
        Some(Due {
            id: entry.id,
            event: entry.event,
        })
    }
}

impl<'a, const N: usize> Default for Schedule<'a, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use std::sync::Mutex;
    use std::vec::Vec;

    fn ts(ms: u64) -> Instant {
        Instant::MIN.saturating_add(Duration::from_millis(ms))
    }

    fn process<const N: usize>(schedule: &mut Schedule<'_, N>, now: Instant) {
        let mark = schedule.mark();
        while let Some(due) = schedule.pop_due(now, mark) {
            if let Some(next) = due.event.on_event(due.id, now) {
                schedule.reinsert(due.id, next, due.event).unwrap();
            }
        }
    }

    #[test]
    fn test_empty_wait_is_ceiling() {
        let schedule = Schedule::<4>::new();
        assert_eq!(
            schedule.next_wait(ts(10), Duration::from_millis(500)),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_next_wait() {
        let nop = |_: EventId, _: Instant| -> Option<Instant> { None };
        let mut schedule = Schedule::<4>::new();
        schedule.insert(ts(120), &nop).unwrap();
        schedule.insert(ts(40), &nop).unwrap();

        let ceiling = Duration::from_millis(500);
        assert_eq!(schedule.next_wait(ts(10), ceiling), Duration::from_millis(30));
        assert_eq!(schedule.next_wait(ts(50), ceiling), Duration::from_ticks(0));
        assert_eq!(
            schedule.next_wait(ts(10), Duration::from_millis(20)),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn test_fire_in_due_order() {
        let log = Mutex::new(Vec::new());
        let record = |id: EventId, _: Instant| -> Option<Instant> {
            log.lock().unwrap().push(id);
            None
        };

        let mut schedule = Schedule::<4>::new();
        let t2 = schedule.insert(ts(20), &record).unwrap();
        let t3 = schedule.insert(ts(30), &record).unwrap();
        let t1 = schedule.insert(ts(10), &record).unwrap();

        process(&mut schedule, ts(5));
        assert!(log.lock().unwrap().is_empty());

        process(&mut schedule, ts(30));
        assert_eq!(*log.lock().unwrap(), [t1, t2, t3]);
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_ties_in_insertion_order() {
        let log = Mutex::new(Vec::new());
        let record = |id: EventId, _: Instant| -> Option<Instant> {
            log.lock().unwrap().push(id);
            None
        };

        let mut schedule = Schedule::<4>::new();
        let a = schedule.insert(ts(10), &record).unwrap();
        let b = schedule.insert(ts(10), &record).unwrap();
        let c = schedule.insert(ts(5), &record).unwrap();
        let d = schedule.insert(ts(10), &record).unwrap();

        process(&mut schedule, ts(10));
        assert_eq!(*log.lock().unwrap(), [c, a, b, d]);
    }

    #[test]
    fn test_only_due_events_fire() {
        let count = Mutex::new(0);
        let counter = |_: EventId, _: Instant| -> Option<Instant> {
            *count.lock().unwrap() += 1;
            None
        };

        let mut schedule = Schedule::<4>::new();
        schedule.insert(ts(10), &counter).unwrap();
        schedule.insert(ts(11), &counter).unwrap();

        process(&mut schedule, ts(10));
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(schedule.next_due(), Some(ts(11)));
    }

    #[test]
    fn test_periodic_event() {
        let fired = Mutex::new(Vec::new());
        let periodic = |_: EventId, now: Instant| -> Option<Instant> {
            fired.lock().unwrap().push(now);
            Some(now)
        };

        let mut schedule = Schedule::<2>::new();
        let id = schedule.insert(ts(10), &periodic).unwrap();

        // Rescheduling at `now` must not fire twice in one pass
        process(&mut schedule, ts(10));
        assert_eq!(*fired.lock().unwrap(), [ts(10)]);

        process(&mut schedule, ts(15));
        assert_eq!(*fired.lock().unwrap(), [ts(10), ts(15)]);

        schedule.cancel(id).unwrap();
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_cancel() {
        let nop = |_: EventId, _: Instant| -> Option<Instant> { None };
        let mut schedule = Schedule::<4>::new();
        let first = schedule.insert(ts(10), &nop).unwrap();
        let second = schedule.insert(ts(20), &nop).unwrap();

        assert_eq!(schedule.cancel(first), Ok(()));
        assert_eq!(schedule.cancel(first), Err(Error::InvalidParameter));
        assert_eq!(schedule.next_due(), Some(ts(20)));
        assert_eq!(schedule.cancel(second), Ok(()));
        assert_eq!(schedule.next_due(), None);
    }

    #[test]
    fn test_full() {
        let nop = |_: EventId, _: Instant| -> Option<Instant> { None };
        let mut schedule = Schedule::<2>::new();
        schedule.insert(ts(10), &nop).unwrap();
        schedule.insert(ts(20), &nop).unwrap();
        assert_eq!(schedule.insert(ts(30), &nop), Err(Error::NotEnoughMemory));
        assert_eq!(schedule.len(), 2);
    }
}
