//! Background poll loop.
//!
//! The loop runs one cycle per period on a dedicated thread. The stop flag is checked at
//! the top of every cycle, and the inter-cycle sleep is a condition-variable wait, so a
//! stop request wakes the thread immediately instead of waiting out the period. A cycle
//! that is already running finishes before the thread exits.

use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of the poll loop: `Idle → Running → Stopped`.
///
/// `Stopped` is terminal; a stopped loop cannot be restarted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Running,
    Stopped,
}

struct StopSignal {
    requested: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn new() -> Self {
        Self {
            requested: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    fn request(&self) {
        *self.requested.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.wake.notify_all();
    }

    fn is_requested(&self) -> bool {
        *self.requested.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for up to `timeout`. Returns `true` if a stop was requested.
    fn wait(&self, timeout: Duration) -> bool {
        let guard = self.requested.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, timeout, |stop| !*stop)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

pub(crate) struct PollLoop {
    state: PollState,
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl PollLoop {
    pub(crate) fn new() -> Self {
        Self {
            state: PollState::Idle,
            signal: Arc::new(StopSignal::new()),
            handle: None,
        }
    }

    /// `Running` degrades to `Stopped` if the poll thread has exited on its own.
    pub(crate) fn state(&self) -> PollState {
        match &self.handle {
            Some(handle) if handle.is_finished() => PollState::Stopped,
            _ => self.state,
        }
    }

    /// Spawn the poll thread running `cycle` once per `config.poll_interval()`.
    pub(crate) fn start<F>(&mut self, config: &ManagerConfig, mut cycle: F) -> Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        match self.state {
            PollState::Idle => {}
            PollState::Running => return Err(Error::AlreadyStarted),
            PollState::Stopped => return Err(Error::Stopped),
        }

        let signal = Arc::clone(&self.signal);
        let period = config.poll_interval();
        let slow = config.slow_cycle_threshold();
        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run(&signal, period, slow, &mut cycle))
            .map_err(Error::Spawn)?;

        info!(thread = %config.thread_name, ?period, "poll loop started");
        self.handle = Some(handle);
        self.state = PollState::Running;
        Ok(())
    }

    /// Request a stop and block until the poll thread has exited. Idempotent.
    pub(crate) fn stop(&mut self) {
        if let Some(handle) = self.request_stop() {
            join(handle);
        }
    }

    /// Request a stop and hand back the thread to join, so the caller can wait without
    /// holding whatever lock guards this loop.
    pub(crate) fn request_stop(&mut self) -> Option<JoinHandle<()>> {
        self.state = PollState::Stopped;
        let handle = self.handle.take()?;
        self.signal.request();
        Some(handle)
    }
}

/// Wait for the poll thread to exit. Called from the poll thread itself (a handler
/// stopping its own manager) it returns at once; the current cycle is the last.
pub(crate) fn join(handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        debug!("stop requested from the poll thread; not joining");
        return;
    }
    if handle.join().is_err() {
        error!("poll thread panicked");
    }
    info!("poll loop stopped");
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(signal: &StopSignal, period: Duration, slow: Option<Duration>, cycle: &mut dyn FnMut()) {
    let mut cycles: u64 = 0;
    while !signal.is_requested() {
        let started = Instant::now();
        cycle();
        cycles += 1;

        let elapsed = started.elapsed();
        if let Some(limit) = slow {
            if elapsed > limit {
                warn!(?elapsed, ?limit, "poll cycle ran long; a device or handler may be stuck");
            }
        }
        trace!(cycle = cycles, ?elapsed, "poll cycle complete");

        if signal.wait(period.saturating_sub(elapsed)) {
            break;
        }
    }
    debug!(cycles, "poll thread exiting");
}
