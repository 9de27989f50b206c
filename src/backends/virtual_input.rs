//! In-memory provider.
//!
//! [`VirtualProvider`] hands out devices whose input is injected through a
//! [`VirtualHandle`] instead of read from hardware. It is used by the demos and tests,
//! and by hosts that want to drive a [`Manager`](crate::Manager) from synthetic input.
//!
//! Joystick controls are laid out as four axes (`0..=3`, logical range `0..=255`)
//! followed by sixteen buttons (`4..=19`). Keyboard controls are HID key usages
//! (`0x00..=0xE7`).

use crate::device::{Device, DeviceId, DeviceKind};
use crate::error::{DeviceError, Error, Result};
use crate::metadata::{DeviceInfo, ObjectInfo, ObjectKind};
use crate::provider::DeviceProvider;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const AXES: u32 = 4;
const BUTTONS: u32 = 16;
const AXIS_NAMES: [&str; AXES as usize] = ["X", "Y", "Z", "Rz"];
const LAST_KEY_USAGE: u32 = 0xE7;

#[derive(Default)]
struct Channel {
    pending: VecDeque<(u32, u32)>,
    repeating: Vec<(u32, u32)>,
    faults: usize,
    panics: usize,
}

#[derive(Default)]
struct Hub {
    channels: Mutex<HashMap<DeviceId, Channel>>,
    live: AtomicUsize,
    opened: AtomicUsize,
}

impl Hub {
    fn channels(&self) -> MutexGuard<'_, HashMap<DeviceId, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type ProcessingHook = Arc<dyn Fn(DeviceId) + Send + Sync>;

/// Provider over scripted, in-memory devices.
#[derive(Default)]
pub struct VirtualProvider {
    joysticks: Vec<DeviceId>,
    unopenable: BTreeSet<DeviceId>,
    keyboard_fails: bool,
    enumeration_fails: bool,
    delay: Duration,
    hook: Option<ProcessingHook>,
    hub: Arc<Hub>,
}

impl VirtualProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `id` during enumeration.
    pub fn with_joystick(mut self, id: DeviceId) -> Self {
        self.joysticks.push(id);
        self
    }

    /// Report `id` during enumeration but fail to open it.
    pub fn with_unopenable_joystick(mut self, id: DeviceId) -> Self {
        self.joysticks.push(id);
        self.unopenable.insert(id);
        self
    }

    pub fn with_unopenable_keyboard(mut self) -> Self {
        self.keyboard_fails = true;
        self
    }

    pub fn with_failing_enumeration(mut self) -> Self {
        self.enumeration_fails = true;
        self
    }

    /// Make every device sleep for `delay` inside each `process_events` call.
    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Call `hook` with the device id at the start of every `process_events` call, on
    /// the poll thread. Lets a test observe, or hold, a cycle in progress.
    pub fn with_processing_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(DeviceId) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Handle for injecting input into devices this provider opens.
    pub fn handle(&self) -> VirtualHandle {
        VirtualHandle {
            hub: Arc::clone(&self.hub),
        }
    }

    fn open(&self, id: DeviceId, kind: DeviceKind, name: String) -> Box<dyn Device> {
        self.hub.live.fetch_add(1, Ordering::SeqCst);
        self.hub.opened.fetch_add(1, Ordering::SeqCst);
        Box::new(VirtualDevice {
            id,
            kind,
            name,
            delay: self.delay,
            hook: self.hook.clone(),
            hub: Arc::clone(&self.hub),
        })
    }
}

impl DeviceProvider for VirtualProvider {
    type Window = ();

    fn enumerate_joysticks(&self) -> Result<Vec<DeviceId>> {
        if self.enumeration_fails {
            return Err(Error::Enumeration("virtual enumeration disabled".into()));
        }
        Ok(self.joysticks.clone())
    }

    fn open_keyboard(&self, _window: &()) -> Result<Box<dyn Device>> {
        if self.keyboard_fails {
            return Err(Error::DeviceOpen {
                device: DeviceId::SYS_KEYBOARD,
                reason: "virtual keyboard unavailable".into(),
            });
        }
        Ok(self.open(DeviceId::SYS_KEYBOARD, DeviceKind::Keyboard, "Virtual Keyboard".into()))
    }

    fn open_joystick(&self, id: DeviceId, _window: &()) -> Result<Box<dyn Device>> {
        if self.unopenable.contains(&id) || !self.joysticks.contains(&id) {
            return Err(Error::DeviceOpen {
                device: id,
                reason: "virtual joystick unavailable".into(),
            });
        }
        let index = self.joysticks.iter().position(|j| *j == id).unwrap_or(0);
        Ok(self.open(id, DeviceKind::Joystick, format!("Virtual Joystick {index}")))
    }
}

/// Cloneable handle used to drive virtual devices from any thread.
#[derive(Clone)]
pub struct VirtualHandle {
    hub: Arc<Hub>,
}

impl VirtualHandle {
    /// Queue one change, reported on the device's next poll.
    pub fn feed(&self, device: DeviceId, control: u32, value: u32) {
        self.hub
            .channels()
            .entry(device)
            .or_default()
            .pending
            .push_back((control, value));
    }

    /// Report this change on every poll until [`VirtualHandle::clear_repeating`].
    pub fn repeat(&self, device: DeviceId, control: u32, value: u32) {
        self.hub
            .channels()
            .entry(device)
            .or_default()
            .repeating
            .push((control, value));
    }

    pub fn clear_repeating(&self, device: DeviceId) {
        if let Some(channel) = self.hub.channels().get_mut(&device) {
            channel.repeating.clear();
        }
    }

    /// Make the device's next `cycles` polls fail with a read error.
    pub fn fail_next(&self, device: DeviceId, cycles: usize) {
        self.hub.channels().entry(device).or_default().faults += cycles;
    }

    /// Make the device's next `cycles` polls panic inside `process_events`.
    pub fn panic_next(&self, device: DeviceId, cycles: usize) {
        self.hub.channels().entry(device).or_default().panics += cycles;
    }

    /// Convenience: set an axis (`0..=3`) to a raw value.
    pub fn set_axis(&self, device: DeviceId, axis: u32, value: u8) {
        self.feed(device, axis, u32::from(value));
    }

    pub fn press_button(&self, device: DeviceId, button: u32) {
        self.feed(device, AXES + button, 1);
    }

    pub fn release_button(&self, device: DeviceId, button: u32) {
        self.feed(device, AXES + button, 0);
    }

    /// Virtual devices currently open (opened and not yet dropped).
    pub fn live_devices(&self) -> usize {
        self.hub.live.load(Ordering::SeqCst)
    }

    /// Total number of devices ever opened.
    pub fn opened_devices(&self) -> usize {
        self.hub.opened.load(Ordering::SeqCst)
    }
}

struct VirtualDevice {
    id: DeviceId,
    kind: DeviceKind,
    name: String,
    delay: Duration,
    hook: Option<ProcessingHook>,
    hub: Arc<Hub>,
}

impl Device for VirtualDevice {
    fn process_events(&mut self, sink: &mut dyn FnMut(u32, u32)) -> Result<(), DeviceError> {
        if let Some(hook) = &self.hook {
            hook(self.id);
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        // Collect first so sinks (and injected panics) run without the hub lock held.
        let events: Option<Vec<(u32, u32)>> = {
            let mut channels = self.hub.channels();
            let channel = channels.entry(self.id).or_default();
            if channel.faults > 0 {
                channel.faults -= 1;
                return Err(DeviceError::Read("injected fault".into()));
            }
            if channel.panics > 0 {
                channel.panics -= 1;
                None
            } else {
                Some(
                    channel
                        .pending
                        .drain(..)
                        .chain(channel.repeating.iter().copied())
                        .collect(),
                )
            }
        };
        let Some(events) = events else {
            panic!("injected panic on {}", self.id);
        };

        for (control, value) in events {
            sink(control, value);
        }
        Ok(())
    }

    fn info(&self) -> Option<DeviceInfo> {
        let mut info = DeviceInfo::new(self.id, self.kind, self.name.clone());
        info.product_name = Some("StickPoll Virtual Device".into());
        info.path = Some(format!("virtual://{}", self.id));
        Some(info)
    }

    fn object_info(&self, object_id: u32) -> Option<ObjectInfo> {
        let (kind, name, logical_max) = match self.kind {
            DeviceKind::Keyboard if object_id <= LAST_KEY_USAGE => {
                (ObjectKind::Key, format!("Key 0x{object_id:02X}"), 1)
            }
            DeviceKind::Joystick if object_id < AXES => {
                (ObjectKind::Axis, AXIS_NAMES[object_id as usize].to_string(), 255)
            }
            DeviceKind::Joystick if object_id < AXES + BUTTONS => {
                (ObjectKind::Button, format!("Button {}", object_id - AXES), 1)
            }
            _ => return None,
        };
        Some(ObjectInfo {
            id: object_id,
            kind,
            name: Some(name),
            logical_min: 0,
            logical_max,
            usage_page: None,
            usage: None,
        })
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        self.hub.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_events_drain_once_and_repeats_persist() {
        let pad = DeviceId::from_u128(1);
        let provider = VirtualProvider::new().with_joystick(pad);
        let handle = provider.handle();
        let mut device = provider.open_joystick(pad, &()).unwrap();

        handle.press_button(pad, 2);
        handle.repeat(pad, 0, 128);

        let mut seen = Vec::new();
        device.process_events(&mut |c, v| seen.push((c, v))).unwrap();
        device.process_events(&mut |c, v| seen.push((c, v))).unwrap();

        assert_eq!(seen, vec![(6, 1), (0, 128), (0, 128)]);
    }

    #[test]
    fn injected_faults_fail_then_recover() {
        let pad = DeviceId::from_u128(1);
        let provider = VirtualProvider::new().with_joystick(pad);
        let handle = provider.handle();
        let mut device = provider.open_joystick(pad, &()).unwrap();

        handle.fail_next(pad, 1);
        handle.set_axis(pad, 1, 40);

        assert!(device.process_events(&mut |_, _| {}).is_err());
        let mut seen = Vec::new();
        device.process_events(&mut |c, v| seen.push((c, v))).unwrap();
        assert_eq!(seen, vec![(1, 40)]);
    }

    #[test]
    fn dropping_a_device_releases_it() {
        let provider = VirtualProvider::new();
        let handle = provider.handle();
        let keyboard = provider.open_keyboard(&()).unwrap();
        assert_eq!(handle.live_devices(), 1);
        drop(keyboard);
        assert_eq!(handle.live_devices(), 0);
        assert_eq!(handle.opened_devices(), 1);
    }

    #[test]
    fn object_layout() {
        let pad = DeviceId::from_u128(1);
        let provider = VirtualProvider::new().with_joystick(pad);
        let device = provider.open_joystick(pad, &()).unwrap();

        assert_eq!(device.object_info(1).unwrap().name.as_deref(), Some("Y"));
        assert_eq!(device.object_info(4).unwrap().kind, ObjectKind::Button);
        assert!(device.object_info(AXES + BUTTONS).is_none());
    }

    #[test]
    fn injected_panics_unwind_then_recover() {
        let pad = DeviceId::from_u128(1);
        let provider = VirtualProvider::new().with_joystick(pad);
        let handle = provider.handle();
        let mut device = provider.open_joystick(pad, &()).unwrap();

        handle.panic_next(pad, 1);
        handle.press_button(pad, 0);

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            device.process_events(&mut |_, _| {})
        }));
        assert!(unwound.is_err());
        assert_eq!(handle.live_devices(), 1);

        let mut seen = Vec::new();
        device.process_events(&mut |c, v| seen.push((c, v))).unwrap();
        assert_eq!(seen, vec![(4, 1)]);
    }

    #[test]
    fn processing_hook_sees_every_call() {
        let pad = DeviceId::from_u128(1);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&calls);
        let provider = VirtualProvider::new()
            .with_joystick(pad)
            .with_processing_hook(move |id| log.lock().unwrap().push(id));
        let mut device = provider.open_joystick(pad, &()).unwrap();

        device.process_events(&mut |_, _| {}).unwrap();
        device.process_events(&mut |_, _| {}).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![pad, pad]);
    }
}
