//! Slotted timing wheel for recurring maintenance callbacks.
//!
//! `N` slots rotate every tick `Δ`; an event with delay `d` lands in slot
//! `(curr + ⌈d/Δ⌉) mod N`, so insert and tick are O(1) in the number of
//! slots. [`TimingWheel::execute`] advances by at most `K` ticks per call,
//! draining each advanced slot in insertion order and reinserting recurring
//! events.
//!
//! The wheel is single-threaded by design; the admin thread owns it and
//! drives it between event waits.

use std::time::{Duration, Instant};

use log::{debug, info};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WheelError {
    #[error("delay of zero is not schedulable")]
    ZeroDelay,
    #[error("delay exceeds the wheel horizon")]
    DelayTooLong,
    #[error("wheel is not running")]
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelState {
    Idle,
    Running,
    Stopped,
}

/// Token for cancelling a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutId(u64);

struct TimeoutEvent {
    id: TimeoutId,
    delay: Duration,
    recur: bool,
    cb: Box<dyn FnMut() + Send>,
}

pub struct TimingWheel {
    tick: Duration,
    slots: Vec<Vec<TimeoutEvent>>,
    curr: usize,
    max_ntick: usize,
    nevent: usize,
    next_id: u64,
    next_due: Option<Instant>,
    state: WheelState,
    nprocess: u64,
    ntick_total: u64,
}

impl TimingWheel {
    /// `tick`: slot interval; `nslot`: slot count; `max_ntick`: upper bound
    /// on ticks processed per [`execute`] call.
    pub fn new(tick: Duration, nslot: usize, max_ntick: usize) -> Self {
        assert!(!tick.is_zero());
        assert!(nslot > 1);
        info!(
            "create timing wheel: tick {:?} nslot {} max_ntick {}",
            tick, nslot, max_ntick
        );
        TimingWheel {
            tick,
            slots: (0..nslot).map(|_| Vec::new()).collect(),
            curr: 0,
            max_ntick,
            nevent: 0,
            next_id: 1,
            next_due: None,
            state: WheelState::Idle,
            nprocess: 0,
            ntick_total: 0,
        }
    }

    #[inline]
    pub fn tick(&self) -> Duration {
        self.tick
    }

    #[inline]
    pub fn state(&self) -> WheelState {
        self.state
    }

    #[inline]
    pub fn nevent(&self) -> usize {
        self.nevent
    }

    pub fn start(&mut self) {
        debug_assert_eq!(self.state, WheelState::Idle);
        self.state = WheelState::Running;
        self.next_due = Some(Instant::now() + self.tick);
    }

    pub fn stop(&mut self) {
        self.state = WheelState::Stopped;
    }

    fn nticks_for(&self, delay: Duration) -> usize {
        let d = delay.as_nanos();
        let t = self.tick.as_nanos();
        ((d + t - 1) / t) as usize
    }

    /// Schedule `cb` to fire after `delay`; with `recur`, it is reinserted
    /// at the same offset after every firing. Delays of zero, or at or past
    /// the wheel horizon `nslot * tick`, are rejected.
    pub fn insert(
        &mut self,
        delay: Duration,
        recur: bool,
        cb: Box<dyn FnMut() + Send>,
    ) -> Result<TimeoutId, WheelError> {
        if delay.is_zero() {
            return Err(WheelError::ZeroDelay);
        }
        if delay >= self.tick * self.slots.len() as u32 {
            return Err(WheelError::DelayTooLong);
        }

        let id = TimeoutId(self.next_id);
        self.next_id += 1;

        let slot = (self.curr + self.nticks_for(delay)) % self.slots.len();
        self.slots[slot].push(TimeoutEvent {
            id,
            delay,
            recur,
            cb,
        });
        self.nevent += 1;
        debug!("insert timeout {:?} delay {:?} into slot {}", id, delay, slot);

        Ok(id)
    }

    /// Remove an event before it fires. Returns whether it was found.
    pub fn cancel(&mut self, id: TimeoutId) -> bool {
        for slot in &mut self.slots {
            if let Some(i) = slot.iter().position(|ev| ev.id == id) {
                slot.remove(i);
                self.nevent -= 1;
                return true;
            }
        }
        false
    }

    /// Advance by up to `max_ntick` due ticks, firing the events in each
    /// advanced slot in insertion order. Returns the number of events fired.
    pub fn execute(&mut self) -> usize {
        if self.state != WheelState::Running {
            return 0;
        }

        let mut nfired = 0;
        let mut nticks = 0;
        let now = Instant::now();

        while nticks < self.max_ntick {
            let due = match self.next_due {
                Some(due) if due <= now => due,
                _ => break,
            };

            self.curr = (self.curr + 1) % self.slots.len();
            let mut fired = std::mem::take(&mut self.slots[self.curr]);
            self.nevent -= fired.len();
            for mut ev in fired.drain(..) {
                (ev.cb)();
                nfired += 1;
                if ev.recur {
                    let slot = (self.curr + self.nticks_for(ev.delay)) % self.slots.len();
                    self.slots[slot].push(ev);
                    self.nevent += 1;
                }
            }

            self.next_due = Some(due + self.tick);
            nticks += 1;
        }

        self.nprocess += 1;
        self.ntick_total += nticks as u64;
        nfired
    }

    /// Fire every remaining event regardless of slot, without reinsertion,
    /// and leave the wheel empty. Used at teardown.
    pub fn flush(&mut self) -> usize {
        let mut nfired = 0;
        let nslot = self.slots.len();
        for i in 0..nslot {
            let slot = (self.curr + 1 + i) % nslot;
            let mut fired = std::mem::take(&mut self.slots[slot]);
            for mut ev in fired.drain(..) {
                (ev.cb)();
                nfired += 1;
            }
        }
        self.nevent = 0;
        nfired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter_cb(n: &Arc<AtomicUsize>) -> Box<dyn FnMut() + Send> {
        let n = n.clone();
        Box::new(move || {
            n.fetch_add(1, Ordering::Relaxed);
        })
    }

    #[test]
    fn test_insert_rejects_zero_delay() {
        let mut w = TimingWheel::new(Duration::from_millis(10), 8, 4);
        let err = w.insert(Duration::ZERO, false, Box::new(|| {}));
        assert_eq!(err.unwrap_err(), WheelError::ZeroDelay);
    }

    #[test]
    fn test_insert_rejects_past_horizon() {
        let mut w = TimingWheel::new(Duration::from_millis(10), 8, 4);
        let err = w.insert(Duration::from_millis(80), false, Box::new(|| {}));
        assert_eq!(err.unwrap_err(), WheelError::DelayTooLong);
        // just under the horizon is fine
        w.insert(Duration::from_millis(79), false, Box::new(|| {}))
            .unwrap();
    }

    #[test]
    fn test_oneshot_fires_within_bound() {
        let mut w = TimingWheel::new(Duration::from_millis(5), 16, 16);
        let n = Arc::new(AtomicUsize::new(0));
        w.insert(Duration::from_millis(10), false, counter_cb(&n))
            .unwrap();
        w.start();

        let t0 = Instant::now();
        while n.load(Ordering::Relaxed) == 0 && t0.elapsed() < Duration::from_millis(200) {
            w.execute();
            std::thread::sleep(Duration::from_millis(1));
        }
        let elapsed = t0.elapsed();
        assert_eq!(n.load(Ordering::Relaxed), 1);
        // t + d <= t' < t + d + tick + jitter
        assert!(elapsed >= Duration::from_millis(10));
        assert!(elapsed < Duration::from_millis(100));
        assert_eq!(w.nevent(), 0);
    }

    #[test]
    fn test_recurring_fires_repeatedly() {
        let mut w = TimingWheel::new(Duration::from_millis(2), 16, 16);
        let n = Arc::new(AtomicUsize::new(0));
        w.insert(Duration::from_millis(4), true, counter_cb(&n))
            .unwrap();
        w.start();

        let t0 = Instant::now();
        while n.load(Ordering::Relaxed) < 3 && t0.elapsed() < Duration::from_millis(500) {
            w.execute();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(n.load(Ordering::Relaxed) >= 3);
        assert_eq!(w.nevent(), 1);
    }

    #[test]
    fn test_cancel_removes_event() {
        let mut w = TimingWheel::new(Duration::from_millis(10), 8, 4);
        let n = Arc::new(AtomicUsize::new(0));
        let id = w
            .insert(Duration::from_millis(20), false, counter_cb(&n))
            .unwrap();
        assert!(w.cancel(id));
        assert!(!w.cancel(id));
        assert_eq!(w.nevent(), 0);
        assert_eq!(w.flush(), 0);
    }

    #[test]
    fn test_flush_fires_everything() {
        let mut w = TimingWheel::new(Duration::from_millis(10), 8, 4);
        let n = Arc::new(AtomicUsize::new(0));
        for d in [10u64, 30, 50] {
            w.insert(Duration::from_millis(d), true, counter_cb(&n))
                .unwrap();
        }
        assert_eq!(w.flush(), 3);
        assert_eq!(n.load(Ordering::Relaxed), 3);
        assert_eq!(w.nevent(), 0);
    }

    #[test]
    fn test_execute_before_start_is_noop() {
        let mut w = TimingWheel::new(Duration::from_millis(1), 8, 4);
        let n = Arc::new(AtomicUsize::new(0));
        w.insert(Duration::from_millis(2), false, counter_cb(&n))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(w.execute(), 0);
        assert_eq!(n.load(Ordering::Relaxed), 0);
    }
}
