//! Device provider seam.
//!
//! A provider is the driver binding the manager uses to discover and open devices.
//! It is acquired by the caller (acquisition failure is
//! [`Error::ProviderInit`](crate::Error::ProviderInit)) and then owned by the
//! [`Manager`](crate::Manager), which releases it after the poll loop has stopped and
//! every device handle has been dropped.

use crate::device::{Device, DeviceId};
use crate::error::Result;

pub trait DeviceProvider {
    /// Window/focus context devices are bound to when opened.
    type Window: ?Sized;

    /// Identities of attachable joysticks. Called once, when the manager is built.
    fn enumerate_joysticks(&self) -> Result<Vec<DeviceId>>;

    /// Open the system keyboard. Failure is
    /// [`Error::DeviceOpen`](crate::Error::DeviceOpen).
    fn open_keyboard(&self, window: &Self::Window) -> Result<Box<dyn Device>>;

    /// Open one enumerated joystick.
    fn open_joystick(&self, id: DeviceId, window: &Self::Window) -> Result<Box<dyn Device>>;
}
