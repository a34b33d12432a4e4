//! A periodic tick source.
//!
//! Ticks follow an absolute schedule, `start + n * interval`, so a slow consumer does not make the
//! schedule drift.  A consumer that oversleeps by more than one interval skips the missed ticks
//! instead of receiving a burst of them.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::util::error::GcError;

pub struct Metronome {
    interval: Duration,
    sync: Mutex<MetronomeSync>,
    stopped_or_ticked: Condvar,
}

struct MetronomeSync {
    /// Time of the first tick.
    start: Option<Instant>,
    /// Schedule slots consumed, including skipped ones.
    slot: u32,
    /// Ticks delivered.
    nticks: u64,
    stopped: bool,
}

impl Metronome {
    /// A metronome ticking `hz` times per second.  Fails unless `hz` is between 1 and one
    /// billion.
    pub fn new(hz: u64) -> Result<Self, GcError> {
        if hz == 0 {
            return Err(GcError::InvalidOption {
                name: "director_hz",
                reason: "a metronome needs a positive frequency".to_string(),
            });
        }
        Self::with_interval(Duration::from_nanos(1_000_000_000 / hz))
    }

    /// A metronome ticking every `interval`, which must not be zero.
    pub fn with_interval(interval: Duration) -> Result<Self, GcError> {
        if interval.is_zero() {
            return Err(GcError::InvalidOption {
                name: "director_hz",
                reason: "a metronome needs a non-zero interval".to_string(),
            });
        }
        Ok(Self {
            interval,
            sync: Mutex::new(MetronomeSync {
                start: None,
                slot: 0,
                nticks: 0,
                stopped: false,
            }),
            stopped_or_ticked: Condvar::new(),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until the next tick.  The first call returns at once and starts the schedule.
    /// Return false if the metronome has been stopped, before or while waiting.
    pub fn wait_for_tick(&self) -> bool {
        let mut sync = self.sync.lock().unwrap();
        if sync.stopped {
            return false;
        }

        let start = match sync.start {
            Some(start) => start,
            None => {
                sync.start = Some(Instant::now());
                sync.nticks = 1;
                return true;
            }
        };

        sync.slot += 1;
        let next = start + self.interval * sync.slot;
        loop {
            if sync.stopped {
                return false;
            }
            let now = Instant::now();
            if now >= next {
                let overslept = now - next;
                if overslept > self.interval {
                    let missed = (overslept.as_nanos() / self.interval.as_nanos()) as u32;
                    trace!("Metronome skipped {} ticks", missed);
                    sync.slot += missed;
                }
                break;
            }
            sync = self
                .stopped_or_ticked
                .wait_timeout(sync, next - now)
                .unwrap()
                .0;
        }
        sync.nticks += 1;
        true
    }

    /// Stop the metronome and wake every waiter.  Stopping twice is harmless.
    pub fn stop(&self) {
        let mut sync = self.sync.lock().unwrap();
        sync.stopped = true;
        self.stopped_or_ticked.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.sync.lock().unwrap().stopped
    }

    /// Number of ticks delivered so far.
    pub fn nticks(&self) -> u64 {
        self.sync.lock().unwrap().nticks
    }
}
