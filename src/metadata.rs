//! Device and control metadata.
//!
//! [`DeviceInfo`] and [`ObjectInfo`] are owned, cloneable copies handed out by
//! [`Manager::device_info`](crate::Manager::device_info) and
//! [`Manager::object_info`](crate::Manager::object_info). They never borrow from the
//! device table, so they stay valid after the device is replaced or the manager is
//! torn down.
//!
//! # Conventions
//! - `path` is an OS/topology path (opaque string) useful for diagnostics.
//! - HID-specific fields (`vid`, `pid`, `usage_page`, `usage`) are filled when the
//!   backend knows them; unknown fields remain `None`.
//! - Object ids are the same ids devices report as `control_id` to input handlers.

use crate::device::{DeviceId, DeviceKind};
use serde::{Deserialize, Serialize};

/// Snapshot of metadata describing a single device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Identity the device is stored under.
    pub instance: DeviceId,

    pub kind: DeviceKind,

    /// Instance name as reported by the provider.
    pub name: String,

    /// Human-readable product name from the driver/firmware.
    pub product_name: Option<String>,

    /// USB Vendor ID (VID), if known.
    pub vid: Option<u16>,

    /// USB Product ID (PID), if known.
    pub pid: Option<u16>,

    pub serial_number: Option<String>,

    /// HID Usage Page (e.g., `0x01` for Generic Desktop), if known.
    pub usage_page: Option<u16>,

    /// HID Usage within the page (e.g., `0x04` Joystick, `0x05` Gamepad), if known.
    pub usage: Option<u16>,

    /// OS/topological path to the device. Platform-specific; treat as opaque.
    pub path: Option<String>,
}

impl DeviceInfo {
    /// Minimal record with every optional field unset.
    pub fn new(instance: DeviceId, kind: DeviceKind, name: impl Into<String>) -> Self {
        Self {
            instance,
            kind,
            name: name.into(),
            product_name: None,
            vid: None,
            pid: None,
            serial_number: None,
            usage_page: None,
            usage: None,
            path: None,
        }
    }
}

/// Category of a control on a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Axis,
    Button,
    /// POV / D-pad.
    Hat,
    Key,
    /// A report byte whose meaning the backend does not decode.
    Raw,
}

/// Describes one control exposed by a device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Device-local control id.
    pub id: u32,
    pub kind: ObjectKind,
    /// Optional human-friendly name (e.g. `"X"`, `"Trigger"`, `"Key 0x04"`).
    pub name: Option<String>,
    /// Logical range of reported values. Not necessarily normalized.
    pub logical_min: i32,
    pub logical_max: i32,
    pub usage_page: Option<u16>,
    pub usage: Option<u16>,
}
