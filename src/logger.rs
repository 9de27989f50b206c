use crate::device::DeviceId;
use crate::eventbus::InputHandler;

/// A simple handler that logs every input change as a `debug` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct Logger;

impl Logger {
    pub fn new() -> Self {
        Logger
    }
}

impl InputHandler for Logger {
    fn on_input(&self, device: DeviceId, control: u32, value: u32) {
        tracing::debug!(target: "stickpoll::input", %device, control, value, "input");
    }
}
