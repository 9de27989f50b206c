//! The device manager.
//!
//! [`Manager`] owns the provider, a device table keyed by [`DeviceId`], the input
//! handler registry, and the background poll loop. The device table and the registry
//! sit behind one mutex, so a poll cycle (which touches both) never observes either of
//! them half-updated.
//!
//! Lifecycle is two-phase: [`Manager::new`] builds and enumerates, [`Manager::start`]
//! spawns the poll thread. Dropping the manager stops and joins the poll thread, then
//! releases every device handle, then the provider.
//!
//! A poll cycle holds the table for its whole duration. Handlers may call back into the
//! manager, but only for operations that do not need the table: metadata queries return
//! `None`, registering and creating devices fail with [`Error::Reentrant`], and a
//! [`Subscription`] dropped from a handler is removed when the cycle ends. Stopping or
//! dropping the manager from a handler ends polling after the current cycle.
//!
//! A device or handler that panics is caught per device and logged; the rest of the
//! table keeps being polled, and the panicking device is retried next cycle.
//!
//! # Example
//! ```no_run
//! use stickpoll::backends::virtual_input::VirtualProvider;
//! use stickpoll::{DeviceId, Manager};
//!
//! let pad = DeviceId::from_u128(1);
//! let provider = VirtualProvider::new().with_joystick(pad);
//! let mgr = Manager::new(provider);
//! mgr.start()?;
//! mgr.create_joysticks(&());
//! let _sub = mgr.register_handler(|dev: DeviceId, control: u32, value: u32| {
//!     println!("{dev}: {control} = {value}");
//! })?;
//! # Ok::<(), stickpoll::Error>(())
//! ```

use crate::config::ManagerConfig;
use crate::device::{Device, DeviceId};
use crate::error::{DeviceError, Error, Result};
use crate::eventbus::{HandlerRegistry, InputHandler, SubscriptionId};
use crate::metadata::{DeviceInfo, ObjectInfo};
use crate::poller::{self, PollLoop, PollState};
use crate::provider::DeviceProvider;
use std::any::Any;
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, warn};

thread_local! {
    /// Address of the `Shared` whose poll cycle this thread is running, 0 outside a cycle.
    static POLLING: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as inside a poll cycle until dropped (including on unwind).
struct CycleMarker;

impl CycleMarker {
    fn enter(shared: &Shared) -> Self {
        POLLING.with(|p| p.set(shared.key()));
        CycleMarker
    }
}

impl Drop for CycleMarker {
    fn drop(&mut self) {
        POLLING.with(|p| p.set(0));
    }
}

struct State {
    devices: BTreeMap<DeviceId, Box<dyn Device>>,
    handlers: HandlerRegistry,
}

struct Shared {
    state: Mutex<State>,
    /// Subscriptions dropped from inside a handler; removed when the cycle ends.
    deferred: Mutex<Vec<SubscriptionId>>,
    /// Keys of `state.devices`, readable while a cycle holds `state`.
    device_ids: Mutex<BTreeSet<DeviceId>>,
    handler_count: AtomicUsize,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(State {
                devices: BTreeMap::new(),
                handlers: HandlerRegistry::new(),
            }),
            deferred: Mutex::new(Vec::new()),
            device_ids: Mutex::new(BTreeSet::new()),
            handler_count: AtomicUsize::new(0),
        }
    }

    fn key(&self) -> usize {
        self as *const Shared as usize
    }

    /// `true` on the poll thread while it runs a cycle of this manager.
    fn in_cycle(&self) -> bool {
        POLLING.with(|p| p.get() == self.key())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the table unless this thread already holds it for a poll cycle.
    fn try_lock(&self) -> Option<MutexGuard<'_, State>> {
        if self.in_cycle() {
            return None;
        }
        Some(self.lock())
    }

    fn device_ids(&self) -> MutexGuard<'_, BTreeSet<DeviceId>> {
        self.device_ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_handler(&self, state: &mut State, id: SubscriptionId) {
        if state.handlers.remove(id) {
            self.handler_count.fetch_sub(1, Ordering::SeqCst);
            debug!(subscription = %id, "input handler unregistered");
        }
    }

    /// One poll cycle: drain every device in table order, fanning each change out to
    /// every registered handler. A device that fails or panics is skipped for this cycle.
    fn poll_cycle(&self) {
        let mut state = self.lock();
        {
            let _marker = CycleMarker::enter(self);
            let State { devices, handlers } = &mut *state;
            for (&id, device) in devices.iter_mut() {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    device.process_events(&mut |control, value| {
                        handlers.emit(id, control, value);
                    })
                }))
                .unwrap_or_else(|payload| {
                    Err(DeviceError::Panicked(panic_message(payload.as_ref())))
                });
                if let Err(e) = result {
                    warn!(device = %id, error = %e, "device failed; retrying next cycle");
                }
            }
        }

        let deferred =
            std::mem::take(&mut *self.deferred.lock().unwrap_or_else(PoisonError::into_inner));
        for id in deferred {
            self.remove_handler(&mut state, id);
        }
    }

    /// Insert a device, returning whatever it replaced so the caller can drop it after
    /// the lock is released.
    fn insert_device(
        &self,
        state: &mut State,
        id: DeviceId,
        device: Box<dyn Device>,
    ) -> Option<Box<dyn Device>> {
        self.device_ids().insert(id);
        state.devices.insert(id, device)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Registration token returned by [`Manager::register_handler`].
///
/// Dropping it unregisters the handler: no poll cycle that starts afterwards will call
/// it. A call already in flight on the poll thread is allowed to finish. Dropped from
/// inside a handler, the removal takes effect when the current cycle ends.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    id: SubscriptionId,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unregister now. Same as dropping the token.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        match shared.try_lock() {
            Some(mut state) => shared.remove_handler(&mut state, self.id),
            None => shared
                .deferred
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(self.id),
        };
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Keyboard/joystick manager with a background poll loop.
pub struct Manager<P: DeviceProvider> {
    shared: Arc<Shared>,
    poller: Mutex<PollLoop>,
    joysticks: Vec<DeviceId>,
    config: ManagerConfig,
    provider: P,
}

impl<P: DeviceProvider> Manager<P> {
    /// Build a manager with the default configuration. The poll loop is not started.
    pub fn new(provider: P) -> Self {
        Self::with_config(provider, ManagerConfig::default())
    }

    /// Build a manager and enumerate joystick identities once.
    ///
    /// Enumeration is best-effort: a failure is logged and leaves the list empty.
    pub fn with_config(provider: P, config: ManagerConfig) -> Self {
        let joysticks = match provider.enumerate_joysticks() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "joystick enumeration failed; continuing without joysticks");
                Vec::new()
            }
        };
        info!(joysticks = joysticks.len(), "device manager built");

        Self {
            shared: Arc::new(Shared::new()),
            poller: Mutex::new(PollLoop::new()),
            joysticks,
            config,
            provider,
        }
    }

    /// Acquire a provider with `init`, build, and start polling.
    ///
    /// Any acquisition failure is reported as [`Error::ProviderInit`]; nothing is built
    /// or spawned in that case.
    pub fn acquire<F>(init: F, config: ManagerConfig) -> Result<Self>
    where
        F: FnOnce() -> Result<P>,
    {
        let provider = init().map_err(|e| match e {
            Error::ProviderInit(_) => e,
            other => Error::ProviderInit(other.to_string()),
        })?;
        let manager = Self::with_config(provider, config);
        manager.start()?;
        Ok(manager)
    }

    /// Spawn the poll thread.
    ///
    /// Fails with [`Error::AlreadyStarted`] on a running manager and [`Error::Stopped`]
    /// after [`Manager::stop`].
    pub fn start(&self) -> Result<()> {
        self.config.validate()?;
        let shared = Arc::clone(&self.shared);
        self.lock_poller()
            .start(&self.config, move || shared.poll_cycle())
    }

    /// Stop the poll loop and wait for the poll thread to exit.
    ///
    /// Devices and handlers are kept. Once this returns no handler is invoked again.
    /// Called from inside a handler, it requests the stop without waiting; the current
    /// cycle is the last one.
    pub fn stop(&self) {
        // Join outside the poller lock so a handler can still query `poll_state`.
        let handle = self.lock_poller().request_stop();
        if let Some(handle) = handle {
            poller::join(handle);
        }
    }

    pub fn poll_state(&self) -> PollState {
        self.lock_poller().state()
    }

    /// Register a handler for every `(device, control, value)` change.
    ///
    /// Handlers run on the poll thread while the manager lock is held, so a slow handler
    /// delays input delivery for every device. From inside a handler the manager is
    /// read-mostly: registering or creating devices fails with [`Error::Reentrant`],
    /// metadata queries return `None`, and dropping a [`Subscription`] takes effect at
    /// the end of the cycle.
    pub fn register_handler<H>(&self, handler: H) -> Result<Subscription>
    where
        H: InputHandler + 'static,
    {
        let mut state = self.shared.try_lock().ok_or(Error::Reentrant)?;
        let id = state.handlers.insert(Box::new(handler))?;
        self.shared.handler_count.fetch_add(1, Ordering::SeqCst);
        drop(state);

        debug!(subscription = %id, "input handler registered");
        Ok(Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        })
    }

    pub fn handler_count(&self) -> usize {
        self.shared.handler_count.load(Ordering::SeqCst)
    }

    /// Open the system keyboard and store it under [`DeviceId::SYS_KEYBOARD`], replacing
    /// (and releasing) any keyboard created earlier. On failure nothing is inserted.
    pub fn create_keyboard(&self, window: &P::Window) -> Result<()> {
        if self.shared.in_cycle() {
            return Err(Error::Reentrant);
        }
        let device = self.provider.open_keyboard(window)?;
        let previous = {
            let mut state = self.shared.lock();
            self.shared.insert_device(&mut state, DeviceId::SYS_KEYBOARD, device)
        };
        if previous.is_some() {
            debug!(device = %DeviceId::SYS_KEYBOARD, "replaced existing keyboard handle");
        }
        info!(device = %DeviceId::SYS_KEYBOARD, "keyboard created");
        Ok(())
    }

    /// Open every joystick found at enumeration time.
    ///
    /// A joystick that fails to open is logged and skipped. Re-creating an identity
    /// replaces and releases its previous handle. Returns how many were opened.
    pub fn create_joysticks(&self, window: &P::Window) -> usize {
        if self.shared.in_cycle() {
            warn!("create_joysticks called from an input handler; ignored");
            return 0;
        }
        let mut opened = 0;
        for &id in &self.joysticks {
            let device = match self.provider.open_joystick(id, window) {
                Ok(device) => device,
                Err(e) => {
                    warn!(device = %id, error = %e, "skipping joystick");
                    continue;
                }
            };
            let previous = {
                let mut state = self.shared.lock();
                self.shared.insert_device(&mut state, id, device)
            };
            if previous.is_some() {
                debug!(device = %id, "replaced existing joystick handle");
            }
            opened += 1;
        }
        info!(opened, enumerated = self.joysticks.len(), "joysticks created");
        opened
    }

    /// Metadata for a created device, or `None` if `id` is not in the table (or when
    /// called from inside an input handler).
    pub fn device_info(&self, id: DeviceId) -> Option<DeviceInfo> {
        let state = self.shared.try_lock()?;
        state.devices.get(&id)?.info()
    }

    /// Metadata for one control of a created device. `None` if the device is not in the
    /// table or does not expose `object_id` (or when called from inside an input handler).
    pub fn object_info(&self, id: DeviceId, object_id: u32) -> Option<ObjectInfo> {
        let state = self.shared.try_lock()?;
        state.devices.get(&id)?.object_info(object_id)
    }

    /// Joystick identities found when the manager was built.
    pub fn joystick_instances(&self) -> &[DeviceId] {
        &self.joysticks
    }

    /// Identities currently in the device table, in poll order.
    pub fn devices(&self) -> Vec<DeviceId> {
        self.shared.device_ids().iter().copied().collect()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn lock_poller(&self) -> MutexGuard<'_, PollLoop> {
        self.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(feature = "hid")]
impl Manager<crate::backends::hid::HidProvider> {
    /// Acquire the HID provider, enumerate, and start polling.
    pub fn discover() -> Result<Self> {
        Self::acquire(crate::backends::hid::HidProvider::new, ManagerConfig::default())
    }
}

impl<P: DeviceProvider> Drop for Manager<P> {
    fn drop(&mut self) {
        // The poll thread must be gone before the table is cleared.
        self.stop();
        // Dropped from inside a handler the cycle still holds the table; the devices
        // then go with the last reference to it once the poll thread exits.
        let Some(mut state) = self.shared.try_lock() else {
            warn!("manager dropped from an input handler; devices released when polling ends");
            return;
        };
        let devices = std::mem::take(&mut state.devices);
        self.shared.device_ids().clear();
        drop(state);
        debug!(count = devices.len(), "releasing devices");
        drop(devices);
    }
}
