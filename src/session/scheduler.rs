//! Tick scheduling.
//!
//! The pipeline's frame loop is driven by a scheduler it does not own the
//! clock of. Production uses a thread with a fixed interval; tests drive
//! ticks by hand so every timing-sensitive behavior is deterministic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::warn;

/// What the tick callback wants next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    /// The loop is done (end of stream, mode change). The scheduler stops
    /// calling back without anyone calling `stop`.
    Stop,
}

pub type TickFn = Box<dyn FnMut() -> TickFlow + Send>;

pub trait TickScheduler: Send {
    /// Begin invoking `tick` once per `interval`. Fails if already running.
    fn start(&mut self, interval: Duration, tick: TickFn) -> Result<()>;

    /// Stop and wait for any in-flight tick to finish. Idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Thread-backed scheduler used in production.
pub struct ThreadScheduler {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TickScheduler for ThreadScheduler {
    fn start(&mut self, interval: Duration, mut tick: TickFn) -> Result<()> {
        if self.is_running() {
            return Err(anyhow!("scheduler already running"));
        }
        self.cancel.store(false, Ordering::SeqCst);
        let cancel = Arc::clone(&self.cancel);
        self.handle = Some(thread::spawn(move || {
            while !cancel.load(Ordering::SeqCst) {
                if tick() == TickFlow::Stop {
                    break;
                }
                thread::sleep(interval);
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("tick thread panicked");
            }
        }
    }

    fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

type SharedTick = Arc<Mutex<Option<TickFn>>>;

/// Test scheduler: holds the callback and lets a `ManualTicker` fire it on
/// demand from the test body.
pub struct ManualScheduler {
    slot: SharedTick,
}

impl ManualScheduler {
    pub fn new() -> (Self, ManualTicker) {
        let slot: SharedTick = Arc::new(Mutex::new(None));
        (
            Self {
                slot: Arc::clone(&slot),
            },
            ManualTicker { slot },
        )
    }
}

impl TickScheduler for ManualScheduler {
    fn start(&mut self, _interval: Duration, tick: TickFn) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow!("tick slot poisoned"))?;
        if slot.is_some() {
            return Err(anyhow!("scheduler already running"));
        }
        *slot = Some(tick);
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }

    fn is_running(&self) -> bool {
        self.slot.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}

pub struct ManualTicker {
    slot: SharedTick,
}

impl ManualTicker {
    /// Fire one tick. Returns `None` if no loop is installed. A `Stop`
    /// result clears the callback, mirroring the thread scheduler's exit.
    pub fn tick(&self) -> Option<TickFlow> {
        let mut slot = self.slot.lock().ok()?;
        let flow = slot.as_mut().map(|tick| tick())?;
        if flow == TickFlow::Stop {
            *slot = None;
        }
        Some(flow)
    }

    /// Fire up to `n` ticks, stopping early if the loop ends.
    pub fn tick_n(&self, n: usize) -> usize {
        let mut fired = 0;
        for _ in 0..n {
            match self.tick() {
                Some(TickFlow::Continue) => fired += 1,
                Some(TickFlow::Stop) => {
                    fired += 1;
                    break;
                }
                None => break,
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn manual_scheduler_fires_on_demand_and_honors_stop() {
        let (mut sched, ticker) = ManualScheduler::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        sched
            .start(
                Duration::from_millis(1),
                Box::new(move || {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    if n >= 3 {
                        TickFlow::Stop
                    } else {
                        TickFlow::Continue
                    }
                }),
            )
            .unwrap();
        assert!(sched.is_running());
        assert_eq!(ticker.tick_n(10), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!sched.is_running());
        assert!(ticker.tick().is_none());
    }

    #[test]
    fn double_start_is_rejected() {
        let (mut sched, _ticker) = ManualScheduler::new();
        sched
            .start(Duration::from_millis(1), Box::new(|| TickFlow::Continue))
            .unwrap();
        assert!(sched
            .start(Duration::from_millis(1), Box::new(|| TickFlow::Continue))
            .is_err());
    }

    #[test]
    fn thread_scheduler_runs_and_joins() {
        let mut sched = ThreadScheduler::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        sched
            .start(
                Duration::from_millis(1),
                Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    TickFlow::Continue
                }),
            )
            .unwrap();
        while count.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        sched.stop();
        assert!(!sched.is_running());
        let settled = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(5));
        assert_eq!(count.load(Ordering::SeqCst), settled);
    }
}
