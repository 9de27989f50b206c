//! Device identity and the device capability.
//!
//! A [`DeviceId`] is a 128-bit identity, printed in the usual GUID text form. The
//! keyboard always uses the well-known [`DeviceId::SYS_KEYBOARD`]; joystick ids are
//! assigned by the provider when it enumerates.

use crate::error::DeviceError;
use crate::metadata::{DeviceInfo, ObjectInfo};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Opaque, process-stable identity of one physical input device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(u128);

impl DeviceId {
    /// Well-known identity of the system keyboard (`6F1D2B61-D5A0-11CF-BFC7-444553540000`).
    pub const SYS_KEYBOARD: DeviceId = DeviceId(0x6F1D2B61_D5A0_11CF_BFC7_444553540000);

    pub const fn from_u128(raw: u128) -> Self {
        DeviceId(raw)
    }

    pub const fn as_u128(self) -> u128 {
        self.0
    }

    /// Stable id derived from arbitrary bytes (e.g. an OS device path), FNV-1a 128.
    pub fn derive(bytes: &[u8]) -> Self {
        const OFFSET: u128 = 0x6c62272e_07bb0142_62b82175_6295c58d;
        const PRIME: u128 = 0x00000000_01000000_00000000_0000013B;
        let hash = bytes
            .iter()
            .fold(OFFSET, |h, b| (h ^ u128::from(*b)).wrapping_mul(PRIME));
        DeviceId(hash)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

/// Error returned when parsing a [`DeviceId`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid device id {0:?}: expected XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX")]
pub struct ParseDeviceIdError(String);

impl FromStr for DeviceId {
    type Err = ParseDeviceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseDeviceIdError(s.to_string());
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .unwrap_or(trimmed);

        let groups: Vec<&str> = inner.split('-').collect();
        let widths = [8usize, 4, 4, 4, 12];
        if groups.len() != widths.len() {
            return Err(err());
        }

        let mut raw: u128 = 0;
        for (group, width) in groups.iter().zip(widths) {
            if group.len() != width || !group.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(err());
            }
            let value = u64::from_str_radix(group, 16).map_err(|_| err())?;
            raw = (raw << (width * 4)) | u128::from(value);
        }
        Ok(DeviceId(raw))
    }
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// The closed set of device classes the manager creates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Keyboard,
    Joystick,
}

/// An opened device handle owned by the manager's device table.
///
/// Dropping the value releases the underlying OS handle.
pub trait Device: Send {
    /// Drain pending input and report every `(control_id, value)` change to `sink`.
    ///
    /// Called once per poll cycle on the poll thread. An error skips this device for
    /// the current cycle only.
    fn process_events(&mut self, sink: &mut dyn FnMut(u32, u32)) -> Result<(), DeviceError>;

    fn info(&self) -> Option<DeviceInfo>;

    /// Describe one control (`object_id` is the same id passed to `process_events` sinks).
    /// `None` for ids the device does not expose.
    fn object_info(&self, object_id: u32) -> Option<ObjectInfo>;
}
