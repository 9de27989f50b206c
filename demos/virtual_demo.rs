use std::time::Duration;
use stickpoll::backends::virtual_input::VirtualProvider;
use stickpoll::{DeviceId, FilteredListener, Manager};

fn main() -> stickpoll::Result<()> {
    tracing_subscriber::fmt().init();

    let stick = DeviceId::from_u128(0x5354_4943_4B00_0001);
    let throttle = DeviceId::from_u128(0x5354_4943_4B00_0002);
    let provider = VirtualProvider::new()
        .with_joystick(stick)
        .with_joystick(throttle);
    let input = provider.handle();

    let mgr = Manager::new(provider);
    mgr.start()?;
    mgr.create_keyboard(&())?;
    mgr.create_joysticks(&());

    for id in mgr.devices() {
        let info = mgr.device_info(id).expect("device was just created");
        println!("{}", serde_json::to_string_pretty(&info).expect("metadata serializes"));
    }

    let _all = mgr.register_handler(|dev: DeviceId, control: u32, value: u32| {
        println!("(all)   {dev}: {control} = {value}");
    })?;
    let _stick_only = mgr.register_handler(FilteredListener::device(
        stick,
        |_: DeviceId, control: u32, value: u32| println!("(stick) {control} = {value}"),
    ))?;

    // Inject some sample input
    input.set_axis(stick, 0, 200);
    input.press_button(stick, 1);
    input.set_axis(throttle, 2, 64);
    input.feed(DeviceId::SYS_KEYBOARD, 0x04, 1);

    std::thread::sleep(Duration::from_millis(100));
    Ok(())
}
