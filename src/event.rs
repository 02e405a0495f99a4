//! Timed event queue.
//!
//! Events are kept sorted by their next fire time. [`EventQueue::run`] is
//! called once per clock tick from the main loop; it fires every due event
//! in order and re-schedules the recurring ones relative to the current
//! time. Calling it again within the same second does nothing.
//!
//! An event added with jitter fires somewhere in the last third of its
//! nominal period, re-drawn on every re-schedule, so that many servers
//! started together do not sweep in lockstep.

use crate::security::Timestamp;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Event callback. Receives the context and the current time.
pub type EventHandler<C> = Box<dyn FnMut(&mut C, Timestamp)>;

/// A schedulable event.
pub struct Event<C> {
    pub name: &'static str,
    /// Nominal period in seconds.
    pub interval: u64,
    pub oneshot: bool,
    pub jitter: bool,
    handler: EventHandler<C>,
}

impl<C> Event<C> {
    /// A recurring event.
    pub fn recurring<F>(name: &'static str, interval: u64, handler: F) -> Self
    where
        F: FnMut(&mut C, Timestamp) + 'static,
    {
        Self {
            name,
            interval,
            oneshot: false,
            jitter: false,
            handler: Box::new(handler),
        }
    }

    /// An event that fires once and is then dropped.
    pub fn oneshot<F>(name: &'static str, delay: u64, handler: F) -> Self
    where
        F: FnMut(&mut C, Timestamp) + 'static,
    {
        Self {
            oneshot: true,
            ..Self::recurring(name, delay, handler)
        }
    }

    /// Enable jitter for this event.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

impl<C> std::fmt::Debug for Event<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("oneshot", &self.oneshot)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

struct Scheduled<C> {
    next: Timestamp,
    event: Event<C>,
}

/// Queue of events sorted by next fire time.
pub struct EventQueue<C> {
    events: Vec<Scheduled<C>>,
    last_run: Option<Timestamp>,
    rng: StdRng,
}

impl<C> Default for EventQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> EventQueue<C> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Queue with a deterministic jitter source.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            events: Vec::new(),
            last_run: None,
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Schedule an event relative to `now`, replacing any event with the
    /// same name.
    pub fn add(&mut self, event: Event<C>, now: Timestamp) {
        self.delete(event.name);
        self.schedule(event, now);
    }

    /// Remove an event. Returns whether it was scheduled.
    pub fn delete(&mut self, name: &str) -> bool {
        match self.events.iter().position(|s| s.event.name == name) {
            Some(pos) => {
                self.events.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Fire every event due at `now`.
    ///
    /// Returns the number of events run. Events added by a handler, and
    /// recurring events re-scheduled during this call, wait for a later
    /// tick.
    pub fn run(&mut self, ctx: &mut C, now: Timestamp) -> usize {
        if self.last_run == Some(now) {
            return 0;
        }
        self.last_run = Some(now);

        let mut len = self.events.len();
        let mut ran = 0;
        while len > 0 && !self.events.is_empty() {
            len -= 1;
            if self.events[0].next > now {
                break;
            }

            let Scheduled { mut event, .. } = self.events.remove(0);
            (event.handler)(ctx, now);
            ran += 1;

            if !event.oneshot {
                self.schedule(event, now);
            }
        }
        ran
    }

    /// Move every pending event earlier by `by` seconds, after the clock
    /// has jumped backwards.
    pub fn set_back(&mut self, by: i64) {
        for scheduled in &mut self.events {
            scheduled.next -= by;
        }
    }

    /// `(name, seconds until next fire)` for each event, soonest first.
    pub fn pending(&self, now: Timestamp) -> Vec<(&'static str, i64)> {
        self.events
            .iter()
            .map(|s| (s.event.name, s.next - now))
            .collect()
    }

    fn schedule(&mut self, event: Event<C>, now: Timestamp) {
        let delay = self.delay(&event);
        let next = now.saturating_add(i64::try_from(delay).unwrap_or(i64::MAX));
        // Insert after every event due at or before `next`
        let pos = self.events.partition_point(|s| s.next <= next);
        self.events.insert(pos, Scheduled { next, event });
    }

    fn delay(&mut self, event: &Event<C>) -> u64 {
        if event.jitter && event.interval >= 3 {
            let two_third = (2 * event.interval) / 3;
            self.rng.gen_range(two_third..=event.interval)
        } else {
            event.interval
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log {
        fired: Vec<(&'static str, Timestamp)>,
    }

    fn recorder(name: &'static str) -> impl FnMut(&mut Log, Timestamp) + 'static {
        move |log: &mut Log, now: Timestamp| log.fired.push((name, now))
    }

    #[test]
    fn runs_due_events_in_order() {
        let mut queue = EventQueue::with_seed(1);
        queue.add(Event::recurring("slow", 10, recorder("slow")), 0);
        queue.add(Event::recurring("fast", 5, recorder("fast")), 0);

        let mut log = Log::default();
        assert_eq!(queue.run(&mut log, 4), 0);
        assert_eq!(queue.run(&mut log, 10), 2);
        assert_eq!(log.fired, vec![("fast", 10), ("slow", 10)]);

        // Re-scheduled relative to the run time
        assert_eq!(queue.pending(10), vec![("fast", 5), ("slow", 10)]);
    }

    #[test]
    fn second_run_in_same_tick_is_noop() {
        let mut queue = EventQueue::with_seed(1);
        queue.add(Event::recurring("zero", 0, recorder("zero")), 0);

        let mut log = Log::default();
        assert_eq!(queue.run(&mut log, 0), 1);
        assert_eq!(queue.run(&mut log, 0), 0);
        assert_eq!(queue.run(&mut log, 1), 1);
    }

    #[test]
    fn oneshot_is_dropped_after_firing() {
        let mut queue = EventQueue::with_seed(1);
        queue.add(Event::oneshot("once", 3, recorder("once")), 0);
        let mut log = Log::default();
        queue.run(&mut log, 3);
        queue.run(&mut log, 6);
        assert_eq!(log.fired, vec![("once", 3)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn delete_and_replace() {
        let mut queue: EventQueue<Log> = EventQueue::with_seed(1);
        queue.add(Event::recurring("a", 10, recorder("a")), 0);
        queue.add(Event::recurring("a", 20, recorder("a")), 0);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending(0), vec![("a", 20)]);
        assert!(queue.delete("a"));
        assert!(!queue.delete("a"));
    }

    #[test]
    fn set_back_moves_events_earlier() {
        let mut queue = EventQueue::with_seed(1);
        queue.add(Event::recurring("a", 60, recorder("a")), 1000);
        queue.set_back(30);
        let mut log = Log::default();
        assert_eq!(queue.run(&mut log, 1030), 1);
    }

    #[test]
    fn jitter_stays_in_last_third() {
        let mut queue: EventQueue<Log> = EventQueue::with_seed(7);
        for _ in 0..200 {
            queue.add(Event::recurring("j", 60, recorder("j")).with_jitter(true), 0);
            let (_, delay) = queue.pending(0)[0];
            assert!((40..=60).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn short_intervals_are_not_jittered() {
        let mut queue: EventQueue<Log> = EventQueue::with_seed(7);
        queue.add(Event::recurring("j", 2, recorder("j")).with_jitter(true), 0);
        assert_eq!(queue.pending(0), vec![("j", 2)]);
    }
}
