//! # ldlsim-clock
//!
//! Virtual time source for the simulator.
//!
//! A [`VirtualClock`] owns a monotonic tick counter and a delta list of pending
//! timers. Timers fire in ascending deadline order, ties in registration order,
//! and a callback always observes [`VirtualClock::time`] equal to its own
//! deadline, never a later value inflated by batch processing.
//!
//! ## Drive modes
//!
//! - **Real-time** ([`VirtualClock::new`]): a background thread converts elapsed
//!   wall time into ticks (scaled by [`ClockConfig::speed_multiplier`]) and
//!   fires whatever became due. Wall-clock jitter changes *when* a batch is
//!   processed, not the virtual times callbacks observe.
//! - **Stepped** ([`VirtualClock::stepped`]): no thread; [`VirtualClock::advance`]
//!   consumes ticks and fires callbacks on the caller's thread. Used by tests
//!   that need exact interleavings.
//!
//! ```rust
//! use ldlsim_clock::VirtualClock;
//! use std::sync::{Arc, Mutex};
//!
//! let clock = VirtualClock::stepped();
//! let fired = Arc::new(Mutex::new(Vec::new()));
//! for interval in [30, 10, 20] {
//!     let (c, f) = (clock.clone(), fired.clone());
//!     clock.on_timeout(interval, move || f.lock().unwrap().push(c.time().ticks()));
//! }
//! clock.advance(100).unwrap();
//! assert_eq!(*fired.lock().unwrap(), vec![10, 20, 30]);
//! ```

mod config;
mod delta;
mod error;

pub use config::ClockConfig;
pub use error::{ClockError, ClockResult};

use delta::DeltaList;
use ldlsim_common::{VirtualTime, TICKS_PER_SECOND};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Identifies a scheduled timer so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    RealTime,
    Stepped,
}

/// Where the wall clock was when the loop last (re)started.
#[derive(Debug, Clone, Copy)]
struct Epoch {
    wall: Instant,
    virtual_base: VirtualTime,
}

struct State {
    /// Virtual time the delta list is measured from.
    time: VirtualTime,
    queue: DeltaList<Callback>,
    next_id: u64,
    epoch: Option<Epoch>,
    stop_requested: bool,
    loop_thread: Option<ThreadId>,
}

struct Inner {
    state: Mutex<State>,
    wake: Condvar,
    mode: Mode,
    config: ClockConfig,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// A cloneable handle to one virtual time axis.
#[derive(Clone)]
pub struct VirtualClock {
    inner: Arc<Inner>,
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("VirtualClock")
            .field("mode", &self.inner.mode)
            .field("time", &state.time)
            .field("pending", &state.queue.len())
            .field("running", &state.epoch.is_some())
            .finish()
    }
}

impl VirtualClock {
    /// A real-time clock. Call [`start`](Self::start) to begin advancing.
    pub fn new(config: ClockConfig) -> ClockResult<Self> {
        config.validate()?;
        Ok(Self::with_mode(Mode::RealTime, config))
    }

    /// A clock advanced only by [`advance`](Self::advance).
    pub fn stepped() -> Self {
        Self::with_mode(Mode::Stepped, ClockConfig::default())
    }

    fn with_mode(mode: Mode, config: ClockConfig) -> Self {
        VirtualClock {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    time: VirtualTime::ZERO,
                    queue: DeltaList::default(),
                    next_id: 0,
                    epoch: None,
                    stop_requested: false,
                    loop_thread: None,
                }),
                wake: Condvar::new(),
                mode,
                config,
                worker: Mutex::new(None),
            }),
        }
    }

    /// Current virtual time.
    ///
    /// Inside a timer callback this is exactly that timer's deadline. Outside,
    /// on a running real-time clock, it also counts wall time elapsed since the
    /// loop last woke, but never passes the deadline of a timer that has not
    /// fired yet.
    pub fn time(&self) -> VirtualTime {
        let state = self.inner.state.lock();
        self.observed_time(&state)
    }

    fn observed_time(&self, state: &State) -> VirtualTime {
        let Some(epoch) = state.epoch else {
            return state.time;
        };
        if state.loop_thread == Some(thread::current().id()) {
            return state.time;
        }
        let live = epoch.virtual_base + self.real_to_ticks(epoch.wall.elapsed());
        let live = match state.queue.head_delta() {
            Some(delta) => live.min(state.time + delta),
            None => live,
        };
        live.max(state.time)
    }

    /// Run `callback` once `interval` ticks have elapsed from now.
    pub fn on_timeout<F>(&self, interval: u64, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        let deadline = self.observed_time(&state) + interval;
        self.insert_locked(&mut state, deadline, Box::new(callback))
    }

    /// Run `callback` at an absolute virtual time. A deadline already in the
    /// past fires on the next loop iteration, at the current time.
    pub fn on_timeout_at<F>(&self, deadline: VirtualTime, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        let deadline = deadline.max(self.observed_time(&state));
        self.insert_locked(&mut state, deadline, Box::new(callback))
    }

    /// Like [`on_timeout`](Self::on_timeout) with the interval in seconds.
    pub fn on_timeout_secs<F>(&self, seconds: f64, callback: F) -> ClockResult<TimerHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ClockError::InvalidInterval(seconds.to_string()));
        }
        let ticks = (seconds * TICKS_PER_SECOND as f64).round() as u64;
        Ok(self.on_timeout(ticks, callback))
    }

    fn insert_locked(&self, state: &mut State, deadline: VirtualTime, callback: Callback) -> TimerHandle {
        let id = state.next_id;
        state.next_id += 1;
        let delta = deadline.saturating_since(state.time);
        state.queue.insert(id, delta, callback);
        trace!("clock: scheduled timer#{} at {}", id, deadline);
        self.inner.wake.notify_all();
        TimerHandle(id)
    }

    /// Remove a pending timer. Its callback is guaranteed not to run.
    pub fn cancel(&self, handle: TimerHandle) -> ClockResult<()> {
        let removed = {
            let mut state = self.inner.state.lock();
            state.queue.remove(handle.0)
        };
        match removed {
            Some(callback) => {
                drop(callback);
                self.inner.wake.notify_all();
                Ok(())
            }
            None => Err(ClockError::NotPending(handle)),
        }
    }

    /// Block the calling thread for `interval` ticks of virtual time.
    pub fn wait(&self, interval: u64) -> ClockResult<()> {
        {
            let state = self.inner.state.lock();
            if state.loop_thread == Some(thread::current().id()) {
                return Err(ClockError::WaitOnClockThread);
            }
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.on_timeout(interval, move || {
            let _ = tx.send(());
        });
        // The sender is dropped unfired when `stop` discards the queue.
        rx.recv().map_err(|_| ClockError::Stopped)
    }

    /// Number of timers waiting to fire.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Whether the background loop is running.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().epoch.is_some()
    }

    /// Start the background loop. No-op on a stepped clock or if already running.
    pub fn start(&self) -> ClockResult<()> {
        if self.inner.mode == Mode::Stepped {
            return Ok(());
        }
        let mut worker = self.inner.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        {
            let mut state = self.inner.state.lock();
            state.stop_requested = false;
            state.epoch = Some(Epoch {
                wall: Instant::now(),
                virtual_base: state.time,
            });
        }
        let clock = self.clone();
        let handle = thread::Builder::new()
            .name("virtual-clock".to_string())
            .spawn(move || clock.run_loop())?;
        *worker = Some(handle);
        debug!("clock: started at {} (speed x{})", self.time(), self.inner.config.speed_multiplier);
        Ok(())
    }

    /// Stop the background loop and discard every pending timer.
    ///
    /// Threads blocked in [`wait`](Self::wait) return [`ClockError::Stopped`].
    pub fn stop(&self) {
        let discarded = {
            let mut state = self.inner.state.lock();
            state.stop_requested = true;
            state.queue.drain()
        };
        self.inner.wake.notify_all();

        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        {
            let mut state = self.inner.state.lock();
            // Keep time monotonic for observers that saw the live value.
            if let Some(epoch) = state.epoch.take() {
                let live = epoch.virtual_base + self.real_to_ticks(epoch.wall.elapsed());
                state.time = live.max(state.time);
            }
            state.loop_thread = None;
        }
        debug!("clock: stopped at {}, discarded {} timers", self.time(), discarded.len());
        drop(discarded);
    }

    /// Consume `ticks` of virtual time on the caller's thread, firing every
    /// timer that falls due. Only valid on a stepped clock.
    pub fn advance(&self, ticks: u64) -> ClockResult<()> {
        if self.inner.mode != Mode::Stepped {
            return Err(ClockError::NotStepped);
        }
        self.consume(ticks);
        Ok(())
    }

    /// Advance until no timer is due within `limit` ticks, or the queue is
    /// empty. Returns the ticks actually consumed.
    pub fn run_until_idle(&self, limit: u64) -> ClockResult<u64> {
        if self.inner.mode != Mode::Stepped {
            return Err(ClockError::NotStepped);
        }
        let mut consumed = 0;
        loop {
            let head = self.inner.state.lock().queue.head_delta();
            match head {
                Some(delta) if consumed + delta <= limit => {
                    self.consume(delta);
                    consumed += delta;
                }
                _ => return Ok(consumed),
            }
        }
    }

    /// Spend a tick budget: fire every timer that falls within it, one at a
    /// time with the lock released, then let the remainder elapse.
    fn consume(&self, budget: u64) {
        let mut remaining = budget;
        loop {
            let callback = {
                let mut state = self.inner.state.lock();
                match state.queue.pop_within(remaining) {
                    Some((delta, callback)) => {
                        remaining -= delta;
                        state.time += delta;
                        callback
                    }
                    None => {
                        state.queue.consume(remaining);
                        state.time += remaining;
                        return;
                    }
                }
            };
            callback();
        }
    }

    fn run_loop(&self) {
        self.inner.state.lock().loop_thread = Some(thread::current().id());
        loop {
            let budget = {
                let mut state = self.inner.state.lock();
                if state.stop_requested {
                    return;
                }
                let Some(epoch) = state.epoch else {
                    return;
                };
                match state.queue.head_delta() {
                    Some(delta) => {
                        let target = state.time.ticks() + delta - epoch.virtual_base.ticks();
                        let deadline = epoch.wall + self.ticks_to_real(target);
                        if Instant::now() < deadline {
                            self.inner.wake.wait_until(&mut state, deadline);
                        }
                    }
                    None => self.inner.wake.wait(&mut state),
                }
                if state.stop_requested {
                    return;
                }
                let due = epoch.virtual_base + self.real_to_ticks(epoch.wall.elapsed());
                due.saturating_since(state.time)
            };
            self.consume(budget);
        }
    }

    fn real_to_ticks(&self, elapsed: Duration) -> u64 {
        (elapsed.as_secs_f64() * self.inner.config.speed_multiplier * TICKS_PER_SECOND as f64) as u64
    }

    fn ticks_to_real(&self, ticks: u64) -> Duration {
        let secs = ticks as f64 / (self.inner.config.speed_multiplier * TICKS_PER_SECOND as f64);
        Duration::from_secs_f64(secs)
    }
}
