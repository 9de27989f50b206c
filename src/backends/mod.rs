//! Device providers for `stickpoll`.
//!
//! Implementations of [`DeviceProvider`](crate::provider::DeviceProvider).
//!
//! # Feature flags
//! - **`hid`**: enables the `hidapi` backend ([`hid::HidProvider`]).
//!
//! The [`virtual_input`] provider is always available.

#[cfg(feature = "hid")]
#[cfg_attr(docsrs, doc(cfg(feature = "hid")))]
pub mod hid;

pub mod virtual_input;
