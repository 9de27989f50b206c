use stickpoll::{DeviceId, Logger, Manager};
use tracing_subscriber::EnvFilter;

fn main() -> stickpoll::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let mgr = Manager::discover()?;
    let opened = mgr.create_joysticks(&());
    if let Err(e) = mgr.create_keyboard(&()) {
        eprintln!("keyboard unavailable: {e}");
    }

    println!("Devices ({opened} joystick(s)):");
    for id in mgr.devices() {
        if let Some(info) = mgr.device_info(id) {
            println!("- {} ({})", info.name, id);
        }
    }

    let _log = mgr.register_handler(Logger::new())?;
    let _print = mgr.register_handler(|dev: DeviceId, control: u32, value: u32| {
        println!("{dev}: {control} = {value}");
    })?;

    // Events arrive on the poll thread; park this one.
    loop {
        std::thread::park();
    }
}
