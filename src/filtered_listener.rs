use crate::device::DeviceId;
use crate::eventbus::InputHandler;

/// Wraps a handler and forwards only the changes a predicate accepts.
pub struct FilteredListener {
    predicate: Box<dyn Fn(DeviceId, u32, u32) -> bool + Send + Sync>,
    inner: Box<dyn InputHandler>,
}

impl FilteredListener {
    pub fn new(
        predicate: impl Fn(DeviceId, u32, u32) -> bool + Send + Sync + 'static,
        inner: impl InputHandler + 'static,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            inner: Box::new(inner),
        }
    }

    /// Forward only changes coming from `device`.
    pub fn device(device: DeviceId, inner: impl InputHandler + 'static) -> Self {
        Self::new(move |from, _, _| from == device, inner)
    }
}

impl InputHandler for FilteredListener {
    fn on_input(&self, device: DeviceId, control: u32, value: u32) {
        if (self.predicate)(device, control, value) {
            self.inner.on_input(device, control, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn device_filter_drops_other_devices() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let pad = DeviceId::from_u128(7);
        let filtered = FilteredListener::device(pad, move |d: DeviceId, c: u32, v: u32| {
            sink.lock().unwrap().push((d, c, v));
        });

        filtered.on_input(DeviceId::SYS_KEYBOARD, 4, 1);
        filtered.on_input(pad, 2, 128);

        assert_eq!(*seen.lock().unwrap(), vec![(pad, 2, 128)]);
    }
}
