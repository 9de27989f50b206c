//! HID provider built on `hidapi`.
//!
//! [`HidProvider`] snapshots the HID device list once when it is created:
//! - Generic Desktop joystick (`0x04`), gamepad (`0x05`) and multi-axis (`0x08`)
//!   endpoints become joystick identities, keyed by a hash of their OS path.
//! - The first Generic Desktop keyboard (`0x06`) endpoint backs
//!   [`DeviceId::SYS_KEYBOARD`].
//!
//! Devices are opened non-blocking. Joysticks report raw report bytes: control id is the
//! byte offset, value is the byte, and only bytes that changed since the previous report
//! are reported. Keyboards are decoded as boot-protocol reports: control id is the HID
//! key usage, value is `1` on press and `0` on release.
//!
//! Many platforms reserve keyboards for the OS; expect `create_keyboard` to fail with
//! [`Error::DeviceOpen`] there.

use crate::device::{Device, DeviceId, DeviceKind};
use crate::error::{DeviceError, Error, Result};
use crate::metadata::{DeviceInfo, ObjectInfo, ObjectKind};
use crate::provider::DeviceProvider;
use hidapi::{HidApi, HidDevice};
use std::ffi::CString;
use tracing::{debug, info};

/// Maximum number of HID reports drained per `process_events()` call.
///
/// Keeps a chatty device from starving the rest of the poll cycle.
const MAX_REPORTS_PER_TICK: usize = 32;
const REPORT_LEN: usize = 64;

const GENERIC_DESKTOP: u16 = 0x01;
const USAGE_JOYSTICK: u16 = 0x04;
const USAGE_GAMEPAD: u16 = 0x05;
const USAGE_KEYBOARD: u16 = 0x06;
const USAGE_MULTI_AXIS: u16 = 0x08;

const KEYBOARD_PAGE: u16 = 0x07;
const FIRST_MODIFIER_USAGE: u32 = 0xE0;
const LAST_KEY_USAGE: u32 = 0xE7;
/// Usage reported in every key slot when too many keys are held.
const ROLLOVER_ERROR: u8 = 0x01;

struct HidEntry {
    path: CString,
    info: DeviceInfo,
}

impl HidEntry {
    fn new(dev: &hidapi::DeviceInfo, instance: DeviceId, kind: DeviceKind) -> Self {
        let product = dev.product_string().map(str::to_string);
        let mut info = DeviceInfo::new(
            instance,
            kind,
            product.clone().unwrap_or_else(|| "Unknown".to_string()),
        );
        info.product_name = product;
        info.vid = Some(dev.vendor_id());
        info.pid = Some(dev.product_id());
        info.serial_number = dev.serial_number().map(str::to_string);
        info.usage_page = Some(dev.usage_page());
        info.usage = Some(dev.usage());
        info.path = Some(dev.path().to_string_lossy().into_owned());
        Self {
            path: dev.path().to_owned(),
            info,
        }
    }
}

/// Provider over the host's HID devices.
pub struct HidProvider {
    api: HidApi,
    joysticks: Vec<HidEntry>,
    keyboard: Option<HidEntry>,
}

impl HidProvider {
    /// Initialize `hidapi` and snapshot the device list.
    pub fn new() -> Result<Self> {
        let api = HidApi::new().map_err(|e| Error::ProviderInit(e.to_string()))?;

        let mut joysticks: Vec<HidEntry> = Vec::new();
        let mut keyboard = None;
        for dev in api.device_list() {
            if dev.usage_page() != GENERIC_DESKTOP {
                continue;
            }
            match dev.usage() {
                USAGE_JOYSTICK | USAGE_GAMEPAD | USAGE_MULTI_AXIS => {
                    let id = DeviceId::derive(dev.path().to_bytes());
                    if joysticks.iter().any(|j| j.info.instance == id) {
                        continue;
                    }
                    debug!(device = %id, vid = dev.vendor_id(), pid = dev.product_id(), "found joystick");
                    joysticks.push(HidEntry::new(dev, id, DeviceKind::Joystick));
                }
                USAGE_KEYBOARD if keyboard.is_none() => {
                    keyboard = Some(HidEntry::new(dev, DeviceId::SYS_KEYBOARD, DeviceKind::Keyboard));
                }
                _ => {}
            }
        }

        info!(
            joysticks = joysticks.len(),
            keyboard = keyboard.is_some(),
            "hid provider initialized"
        );
        Ok(Self {
            api,
            joysticks,
            keyboard,
        })
    }

    fn open(&self, entry: &HidEntry) -> Result<Box<dyn Device>> {
        let open_err = |reason: String| Error::DeviceOpen {
            device: entry.info.instance,
            reason,
        };
        let raw = self
            .api
            .open_path(&entry.path)
            .map_err(|e| open_err(e.to_string()))?;
        raw.set_blocking_mode(false)
            .map_err(|e| open_err(e.to_string()))?;

        Ok(Box::new(HidInputDevice {
            raw,
            info: entry.info.clone(),
            buf: [0u8; REPORT_LEN],
            last: Vec::new(),
        }))
    }
}

impl DeviceProvider for HidProvider {
    /// HID devices are not bound to a window.
    type Window = ();

    fn enumerate_joysticks(&self) -> Result<Vec<DeviceId>> {
        Ok(self.joysticks.iter().map(|j| j.info.instance).collect())
    }

    fn open_keyboard(&self, _window: &()) -> Result<Box<dyn Device>> {
        let entry = self.keyboard.as_ref().ok_or_else(|| Error::DeviceOpen {
            device: DeviceId::SYS_KEYBOARD,
            reason: "no HID keyboard endpoint found".into(),
        })?;
        self.open(entry)
    }

    fn open_joystick(&self, id: DeviceId, _window: &()) -> Result<Box<dyn Device>> {
        let entry = self
            .joysticks
            .iter()
            .find(|j| j.info.instance == id)
            .ok_or_else(|| Error::DeviceOpen {
                device: id,
                reason: "not an enumerated joystick".into(),
            })?;
        self.open(entry)
    }
}

struct HidInputDevice {
    raw: HidDevice,
    info: DeviceInfo,
    buf: [u8; REPORT_LEN],
    last: Vec<u8>,
}

impl Device for HidInputDevice {
    fn process_events(&mut self, sink: &mut dyn FnMut(u32, u32)) -> Result<(), DeviceError> {
        for _ in 0..MAX_REPORTS_PER_TICK {
            let n = self
                .raw
                .read(&mut self.buf)
                .map_err(|e| DeviceError::Read(e.to_string()))?;
            if n == 0 {
                break; // nothing pending (non-blocking)
            }

            let report = &self.buf[..n];
            let accepted = match self.info.kind {
                DeviceKind::Joystick => {
                    diff_bytes(&self.last, report, sink);
                    true
                }
                DeviceKind::Keyboard => diff_boot_keyboard(&self.last, report, sink),
            };
            if accepted {
                self.last.clear();
                self.last.extend_from_slice(report);
            }
        }
        Ok(())
    }

    fn info(&self) -> Option<DeviceInfo> {
        Some(self.info.clone())
    }

    fn object_info(&self, object_id: u32) -> Option<ObjectInfo> {
        match self.info.kind {
            DeviceKind::Keyboard if object_id <= LAST_KEY_USAGE => Some(ObjectInfo {
                id: object_id,
                kind: ObjectKind::Key,
                name: Some(format!("Key 0x{object_id:02X}")),
                logical_min: 0,
                logical_max: 1,
                usage_page: Some(KEYBOARD_PAGE),
                usage: u16::try_from(object_id).ok(),
            }),
            DeviceKind::Joystick => {
                let len = if self.last.is_empty() { REPORT_LEN } else { self.last.len() };
                (usize::try_from(object_id).ok()? < len).then(|| ObjectInfo {
                    id: object_id,
                    kind: ObjectKind::Raw,
                    name: Some(format!("Byte {object_id}")),
                    logical_min: 0,
                    logical_max: 255,
                    usage_page: None,
                    usage: None,
                })
            }
            _ => None,
        }
    }
}

/// Report every byte of `report` that differs from `prev` (all of them on the first report).
fn diff_bytes(prev: &[u8], report: &[u8], sink: &mut dyn FnMut(u32, u32)) {
    for (offset, &byte) in report.iter().enumerate() {
        if prev.get(offset) != Some(&byte) {
            sink(offset as u32, u32::from(byte));
        }
    }
}

/// Decode a boot-protocol keyboard report (`[modifiers, reserved, key0..key5]`) against the
/// previous one. Returns `false` for reports that should not replace the previous state.
fn diff_boot_keyboard(prev: &[u8], report: &[u8], sink: &mut dyn FnMut(u32, u32)) -> bool {
    if report.len() < 3 {
        return false;
    }
    let keys = &report[2..];
    if keys.contains(&ROLLOVER_ERROR) {
        return false;
    }

    let prev_mods = prev.first().copied().unwrap_or(0);
    let mods = report[0];
    for bit in 0..8u32 {
        let mask = 1u8 << bit;
        if (prev_mods ^ mods) & mask != 0 {
            sink(FIRST_MODIFIER_USAGE + bit, u32::from(mods & mask != 0));
        }
    }

    let prev_keys = prev.get(2..).unwrap_or(&[]);
    for &key in prev_keys {
        if key != 0 && !keys.contains(&key) {
            sink(u32::from(key), 0);
        }
    }
    for &key in keys {
        if key != 0 && !prev_keys.contains(&key) {
            sink(u32::from(key), 1);
        }
    }
    true
}
