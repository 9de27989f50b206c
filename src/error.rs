//! Error types.
//!
//! [`Error`] covers everything that surfaces synchronously to the caller (provider
//! acquisition, device creation, lifecycle misuse, configuration). [`DeviceError`] is
//! what a single device reports from one poll cycle; the poll loop logs it and retries
//! the device on the next cycle.

use crate::device::DeviceId;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The device provider could not be acquired. No manager is built.
    #[error("device provider unavailable: {0}")]
    ProviderInit(String),

    /// Joystick enumeration failed. The manager treats this as an empty list.
    #[error("joystick enumeration failed: {0}")]
    Enumeration(String),

    #[error("failed to open device {device}: {reason}")]
    DeviceOpen { device: DeviceId, reason: String },

    #[error("poll loop already started")]
    AlreadyStarted,

    #[error("poll loop has been stopped and cannot be restarted")]
    Stopped,

    #[error("failed to spawn poll thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// A manager operation that needs the device table was called from inside one of
    /// its own input handlers, while the poll cycle holds the table.
    #[error("manager called from inside its own input handler")]
    Reentrant,

    /// Every `u32` subscription id has been handed out once.
    #[error("subscription ids exhausted")]
    SubscriptionsExhausted,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of one device during one poll cycle.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("read failed: {0}")]
    Read(String),

    #[error("device disconnected")]
    Disconnected,

    /// `process_events` (or a handler it fed) panicked. Caught by the poll loop.
    #[error("panicked: {0}")]
    Panicked(String),
}
