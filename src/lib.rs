//! StickPoll: keyboard/joystick manager with a background poll loop.
//!
//! A [`Manager`] opens devices through a [`DeviceProvider`], keeps them in a device
//! table, polls every device on a fixed cadence from its own thread, and fans each
//! `(device, control, value)` change out to the registered [`InputHandler`]s.

pub mod backends;
pub mod config;
pub mod device;
pub mod error;
pub mod eventbus;
pub mod filtered_listener;
pub mod logger;
pub mod manager;
pub mod metadata;
pub mod poller;
pub mod provider;

pub use config::ManagerConfig;
pub use device::*;
pub use error::{DeviceError, Error, Result};
pub use eventbus::{InputHandler, SubscriptionId};
pub use filtered_listener::FilteredListener;
pub use logger::Logger;
pub use manager::*;
pub use metadata::*;
pub use poller::PollState;
pub use provider::DeviceProvider;
