//! Input handler registry.
//!
//! Handlers are keyed by a [`SubscriptionId`] handed out from a counter that starts at 1
//! and only moves forward, so an id is never reused for the lifetime of the registry.
//! Dispatch walks handlers in id order, which is registration order.

use crate::device::DeviceId;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Trait for reacting to input changes from any device.
///
/// Handlers run synchronously on the poll thread while the manager's table is held, so
/// keep them fast and non-blocking. Calls back into the manager from a handler never
/// block: see the [`manager`](crate::manager) module docs for what they return.
pub trait InputHandler: Send + Sync {
    fn on_input(&self, device: DeviceId, control: u32, value: u32);
}

impl<F> InputHandler for F
where
    F: Fn(DeviceId, u32, u32) + Send + Sync,
{
    fn on_input(&self, device: DeviceId, control: u32, value: u32) {
        self(device, control, value)
    }
}

/// Id of one registered handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u32);

impl SubscriptionId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) struct HandlerRegistry {
    next_id: Option<u32>,
    handlers: BTreeMap<u32, Box<dyn InputHandler>>,
}

impl HandlerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: Some(1),
            handlers: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, handler: Box<dyn InputHandler>) -> Result<SubscriptionId> {
        let id = self.next_id.ok_or(Error::SubscriptionsExhausted)?;
        self.next_id = id.checked_add(1);
        self.handlers.insert(id, handler);
        Ok(SubscriptionId(id))
    }

    /// Returns `false` if `id` was not registered.
    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        self.handlers.remove(&id.0).is_some()
    }

    /// Invoke every registered handler with one change.
    pub(crate) fn emit(&self, device: DeviceId, control: u32, value: u32) {
        for handler in self.handlers.values() {
            handler.on_input(device, control, value);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }

    #[cfg(test)]
    fn with_next_id(next_id: u32) -> Self {
        Self {
            next_id: Some(next_id),
            handlers: BTreeMap::new(),
        }
    }
}
