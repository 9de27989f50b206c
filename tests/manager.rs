use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use stickpoll::backends::virtual_input::VirtualProvider;
use stickpoll::{
    DeviceId, DeviceKind, Error, FilteredListener, Logger, Manager, ManagerConfig, ObjectKind,
    PollState,
};

const J1: DeviceId = DeviceId::from_u128(0x1000);
const J2: DeviceId = DeviceId::from_u128(0x2000);

type Log = Arc<Mutex<Vec<(DeviceId, u32, u32)>>>;

fn fast_config() -> ManagerConfig {
    ManagerConfig {
        poll_interval_ms: 2,
        ..ManagerConfig::default()
    }
}

fn recorder(log: &Log) -> impl Fn(DeviceId, u32, u32) + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |dev, control, value| log.lock().unwrap().push((dev, control, value))
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn end_to_end_two_joysticks() {
    let provider = VirtualProvider::new().with_joystick(J1).with_joystick(J2);
    let input = provider.handle();
    let mgr = Manager::with_config(provider, fast_config());
    assert_eq!(mgr.joystick_instances(), &[J1, J2]);

    assert_eq!(mgr.create_joysticks(&()), 2);
    let log: Log = Arc::default();
    let _sub = mgr.register_handler(recorder(&log)).unwrap();

    // Queue both before the loop runs so they land in the same cycle.
    input.feed(J2, 7, 255);
    input.feed(J1, 3, 1);
    mgr.start().unwrap();

    assert!(wait_for(|| log.lock().unwrap().len() >= 2));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(*log.lock().unwrap(), vec![(J1, 3, 1), (J2, 7, 255)]);
}

#[test]
fn subscription_ids_strictly_increase() {
    let mgr = Manager::new(VirtualProvider::new());
    let mut last = 0;
    for _ in 0..50 {
        let sub = mgr.register_handler(|_: DeviceId, _: u32, _: u32| {}).unwrap();
        assert!(sub.id().get() > last);
        last = sub.id().get();
    }
    assert_eq!(last, 50);
    assert_eq!(mgr.handler_count(), 0);
}

#[test]
fn dropped_subscription_is_not_called_again() {
    let provider = VirtualProvider::new().with_joystick(J1);
    let input = provider.handle();
    let mgr = Manager::with_config(provider, fast_config());
    mgr.create_joysticks(&());
    mgr.start().unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let sub = mgr
        .register_handler(move |_: DeviceId, _: u32, _: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    input.repeat(J1, 0, 10);
    assert!(wait_for(|| calls.load(Ordering::SeqCst) > 0));

    sub.unsubscribe();
    assert_eq!(mgr.handler_count(), 0);
    let frozen = calls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(calls.load(Ordering::SeqCst), frozen);
}

#[test]
fn create_keyboard_twice_releases_first_handle() {
    let provider = VirtualProvider::new();
    let input = provider.handle();
    let mgr = Manager::new(provider);

    mgr.create_keyboard(&()).unwrap();
    mgr.create_keyboard(&()).unwrap();

    assert_eq!(input.opened_devices(), 2);
    assert_eq!(input.live_devices(), 1);
    assert_eq!(mgr.devices(), vec![DeviceId::SYS_KEYBOARD]);
}

#[test]
fn keyboard_open_failure_inserts_nothing() {
    let mgr = Manager::new(VirtualProvider::new().with_unopenable_keyboard());
    let err = mgr.create_keyboard(&()).unwrap_err();
    assert!(matches!(err, Error::DeviceOpen { device, .. } if device == DeviceId::SYS_KEYBOARD));
    assert!(mgr.devices().is_empty());
}

#[test]
fn one_bad_joystick_does_not_block_the_rest() {
    let bad = DeviceId::from_u128(0x1500);
    let provider = VirtualProvider::new()
        .with_joystick(J1)
        .with_unopenable_joystick(bad)
        .with_joystick(J2);
    let mgr = Manager::new(provider);

    assert_eq!(mgr.create_joysticks(&()), 2);
    assert_eq!(mgr.devices(), vec![J1, J2]);
}

#[test]
fn recreating_joysticks_replaces_handles() {
    let provider = VirtualProvider::new().with_joystick(J1).with_joystick(J2);
    let input = provider.handle();
    let mgr = Manager::new(provider);

    mgr.create_joysticks(&());
    mgr.create_joysticks(&());

    assert_eq!(input.opened_devices(), 4);
    assert_eq!(input.live_devices(), 2);
}

#[test]
fn failed_enumeration_leaves_no_joysticks() {
    let mgr = Manager::new(VirtualProvider::new().with_joystick(J1).with_failing_enumeration());
    assert!(mgr.joystick_instances().is_empty());
    assert_eq!(mgr.create_joysticks(&()), 0);
}

#[test]
fn metadata_queries() {
    let mgr = Manager::new(VirtualProvider::new().with_joystick(J1));
    assert!(mgr.device_info(J1).is_none());
    assert!(mgr.object_info(J1, 0).is_none());

    mgr.create_joysticks(&());
    mgr.create_keyboard(&()).unwrap();

    let info = mgr.device_info(J1).unwrap();
    assert_eq!(info.instance, J1);
    assert_eq!(info.kind, DeviceKind::Joystick);
    assert_eq!(mgr.object_info(J1, 0).unwrap().kind, ObjectKind::Axis);
    assert!(mgr.object_info(J1, 1_000).is_none());
    assert_eq!(mgr.object_info(DeviceId::SYS_KEYBOARD, 0x04).unwrap().kind, ObjectKind::Key);
    assert!(mgr.device_info(J2).is_none());

    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["kind"], "joystick");
}

#[test]
fn device_errors_are_retried_next_cycle() {
    let provider = VirtualProvider::new().with_joystick(J1).with_joystick(J2);
    let input = provider.handle();
    let mgr = Manager::with_config(provider, fast_config());
    mgr.create_joysticks(&());
    let log: Log = Arc::default();
    let _sub = mgr.register_handler(recorder(&log)).unwrap();

    input.fail_next(J1, 3);
    input.feed(J1, 1, 1);
    input.feed(J2, 2, 2);
    mgr.start().unwrap();

    assert!(wait_for(|| log.lock().unwrap().contains(&(J1, 1, 1))));
    assert!(log.lock().unwrap().contains(&(J2, 2, 2)));
}

#[test]
fn filtered_and_logging_handlers() {
    let provider = VirtualProvider::new().with_joystick(J1).with_joystick(J2);
    let input = provider.handle();
    let mgr = Manager::with_config(provider, fast_config());
    mgr.create_joysticks(&());
    let log: Log = Arc::default();
    let _only_j2 = mgr
        .register_handler(FilteredListener::device(J2, recorder(&log)))
        .unwrap();
    let _logger = mgr.register_handler(Logger::new()).unwrap();

    input.feed(J1, 0, 1);
    input.feed(J2, 0, 2);
    mgr.start().unwrap();

    assert!(wait_for(|| !log.lock().unwrap().is_empty()));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(*log.lock().unwrap(), vec![(J2, 0, 2)]);
}

#[test]
fn lifecycle_states() {
    let mgr = Manager::with_config(VirtualProvider::new(), fast_config());
    assert_eq!(mgr.poll_state(), PollState::Idle);
    mgr.start().unwrap();
    assert_eq!(mgr.poll_state(), PollState::Running);
    assert!(matches!(mgr.start(), Err(Error::AlreadyStarted)));
    mgr.stop();
    assert_eq!(mgr.poll_state(), PollState::Stopped);
    assert!(matches!(mgr.start(), Err(Error::Stopped)));
}

#[test]
fn invalid_config_refuses_to_start() {
    let config = ManagerConfig {
        poll_interval_ms: 0,
        ..ManagerConfig::default()
    };
    let mgr = Manager::with_config(VirtualProvider::new(), config);
    assert!(matches!(mgr.start(), Err(Error::Config(_))));
    assert_eq!(mgr.poll_state(), PollState::Idle);
}

#[test]
fn concurrent_registration_while_polling() {
    let provider = VirtualProvider::new().with_joystick(J1).with_joystick(J2);
    let input = provider.handle();
    let mgr = Arc::new(Manager::with_config(provider, fast_config()));
    mgr.create_joysticks(&());
    input.repeat(J1, 5, 50);
    input.repeat(J2, 6, 60);
    mgr.start().unwrap();

    let churners: Vec<_> = (0..4)
        .map(|_| {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || {
                for _ in 0..200 {
                    let sub = mgr.register_handler(|_: DeviceId, _: u32, _: u32| {}).unwrap();
                    drop(sub);
                }
            })
        })
        .collect();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let _stable = mgr
        .register_handler(move |dev: DeviceId, control: u32, value: u32| {
            if (dev, control, value) == (J1, 5, 50) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    for churner in churners {
        churner.join().unwrap();
    }
    assert!(wait_for(|| seen.load(Ordering::SeqCst) > 0));
    assert_eq!(mgr.handler_count(), 1);
    assert_eq!(mgr.devices(), vec![J1, J2]);
}

#[test]
fn teardown_mid_cycle_stops_delivery() {
    // The hook reports each cycle's entry and then holds the cycle until the gate opens.
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let gate_rx = Mutex::new(gate_rx);
    let provider = VirtualProvider::new()
        .with_joystick(J1)
        .with_processing_hook(move |_| {
            let _ = entered_tx.lock().unwrap().send(());
            let _ = gate_rx.lock().unwrap().recv_timeout(Duration::from_secs(5));
        });
    let input = provider.handle();
    let mgr = Manager::with_config(provider, fast_config());
    mgr.create_joysticks(&());
    input.repeat(J1, 1, 1);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let sub = mgr
        .register_handler(move |_: DeviceId, _: u32, _: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    mgr.start().unwrap();

    // The poll thread is now parked inside `process_events`, holding the table.
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let (dropping_tx, dropping_rx) = mpsc::channel::<()>();
    let teardown = thread::spawn(move || {
        dropping_tx.send(()).unwrap();
        drop(mgr);
    });
    dropping_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    // Teardown cannot finish while the cycle is held.
    thread::sleep(Duration::from_millis(10));
    assert!(!teardown.is_finished());
    assert_eq!(input.live_devices(), 1);
    drop(gate_tx);
    teardown.join().unwrap();

    // Nothing is delivered once the drop has returned.
    let after = calls.load(Ordering::SeqCst);
    assert_eq!(input.live_devices(), 0);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(calls.load(Ordering::SeqCst), after);

    // Outliving the manager is harmless.
    drop(sub);
}

#[test]
fn panicking_device_does_not_stop_other_devices() {
    let provider = VirtualProvider::new().with_joystick(J1).with_joystick(J2);
    let input = provider.handle();
    let mgr = Manager::with_config(provider, fast_config());
    mgr.create_joysticks(&());

    let log: Log = Arc::default();
    let _sub = mgr.register_handler(recorder(&log)).unwrap();
    input.panic_next(J1, 5);
    input.repeat(J2, 1, 1);
    mgr.start().unwrap();

    assert!(wait_for(|| log.lock().unwrap().iter().filter(|e| e.0 == J2).count() >= 10));
    assert_eq!(mgr.poll_state(), PollState::Running);

    // Once its panics are spent the device is polled normally again.
    input.feed(J1, 2, 9);
    assert!(wait_for(|| log.lock().unwrap().contains(&(J1, 2, 9))));
    assert_eq!(mgr.poll_state(), PollState::Running);
    assert_eq!(mgr.devices(), vec![J1, J2]);
}

#[test]
fn panicking_handler_does_not_stop_polling() {
    let provider = VirtualProvider::new().with_joystick(J1);
    let input = provider.handle();
    let mgr = Manager::with_config(provider, fast_config());
    mgr.create_joysticks(&());

    let _bad = mgr
        .register_handler(|_: DeviceId, control: u32, _: u32| {
            if control == 13 {
                panic!("handler rejects control 13");
            }
        })
        .unwrap();
    let log: Log = Arc::default();
    let _good = mgr.register_handler(recorder(&log)).unwrap();
    mgr.start().unwrap();

    input.feed(J1, 13, 1);
    input.feed(J1, 0, 77);
    // The first event is cut short by the panic; the next cycle picks up what follows.
    input.repeat(J1, 3, 3);
    assert!(wait_for(|| log.lock().unwrap().contains(&(J1, 3, 3))));
    assert_eq!(mgr.poll_state(), PollState::Running);
    assert!(mgr.device_info(J1).is_some());
}

#[test]
fn handlers_can_query_the_manager_without_blocking() {
    let provider = VirtualProvider::new().with_joystick(J1);
    let input = provider.handle();
    let mgr = Arc::new(Manager::with_config(provider, fast_config()));
    mgr.create_joysticks(&());

    let answers = Arc::new(Mutex::new(Vec::new()));
    let out = Arc::clone(&answers);
    let inner = Arc::downgrade(&mgr);
    let _sub = mgr
        .register_handler(move |dev: DeviceId, control: u32, _: u32| {
            let Some(mgr) = inner.upgrade() else { return };
            let registered = mgr.register_handler(|_: DeviceId, _: u32, _: u32| {});
            out.lock().unwrap().push((
                mgr.device_info(dev).is_none(),
                mgr.object_info(dev, control).is_none(),
                mgr.devices(),
                mgr.handler_count(),
                matches!(registered, Err(Error::Reentrant)),
                mgr.create_keyboard(&()).is_err(),
                mgr.create_joysticks(&()),
                mgr.poll_state(),
            ));
        })
        .unwrap();
    mgr.start().unwrap();
    input.feed(J1, 0, 1);

    assert!(wait_for(|| !answers.lock().unwrap().is_empty()));
    assert_eq!(
        answers.lock().unwrap()[0],
        (true, true, vec![J1], 1, true, true, 0, PollState::Running)
    );
    // Outside a handler the same queries see the table.
    assert!(mgr.device_info(J1).is_some());
    assert_eq!(mgr.handler_count(), 1);
}

#[test]
fn handler_dropping_its_own_subscription_is_removed_after_the_cycle() {
    let provider = VirtualProvider::new().with_joystick(J1);
    let input = provider.handle();
    let mgr = Manager::with_config(provider, fast_config());
    mgr.create_joysticks(&());

    let calls = Arc::new(AtomicUsize::new(0));
    let slot: Arc<Mutex<Option<stickpoll::Subscription>>> = Arc::default();
    let counter = Arc::clone(&calls);
    let own = Arc::clone(&slot);
    let sub = mgr
        .register_handler(move |_: DeviceId, _: u32, _: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            own.lock().unwrap().take();
        })
        .unwrap();
    *slot.lock().unwrap() = Some(sub);
    input.repeat(J1, 1, 1);
    mgr.start().unwrap();

    assert!(wait_for(|| mgr.handler_count() == 0));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let started = Instant::now();
    drop(mgr);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn handler_stopping_its_manager_ends_polling() {
    let provider = VirtualProvider::new().with_joystick(J1);
    let input = provider.handle();
    let mgr = Arc::new(Manager::with_config(provider, fast_config()));
    mgr.create_joysticks(&());

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let inner = Arc::downgrade(&mgr);
    let _sub = mgr
        .register_handler(move |_: DeviceId, _: u32, _: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(mgr) = inner.upgrade() {
                mgr.stop();
            }
        })
        .unwrap();
    input.repeat(J1, 1, 1);
    mgr.start().unwrap();

    assert!(wait_for(|| mgr.poll_state() == PollState::Stopped));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn provider_init_failure_builds_nothing() {
    let attempts = AtomicUsize::new(0);
    let result = Manager::<VirtualProvider>::acquire(
        || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::ProviderInit("no input subsystem".into()))
        },
        fast_config(),
    );
    assert!(matches!(result, Err(Error::ProviderInit(ref msg)) if msg == "no input subsystem"));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    // Other acquisition failures are reported the same way.
    let result = Manager::<VirtualProvider>::acquire(
        || Err(Error::Enumeration("bus reset".into())),
        fast_config(),
    );
    assert!(matches!(result, Err(Error::ProviderInit(ref msg)) if msg.contains("bus reset")));
}

#[test]
fn acquire_builds_and_starts() {
    let provider = VirtualProvider::new().with_joystick(J1);
    let input = provider.handle();
    let mgr = Manager::acquire(move || Ok(provider), fast_config()).unwrap();
    assert_eq!(mgr.poll_state(), PollState::Running);
    assert_eq!(mgr.joystick_instances(), &[J1]);

    mgr.create_joysticks(&());
    let log: Log = Arc::default();
    let _sub = mgr.register_handler(recorder(&log)).unwrap();
    input.feed(J1, 4, 1);
    assert!(wait_for(|| log.lock().unwrap().contains(&(J1, 4, 1))));
}
