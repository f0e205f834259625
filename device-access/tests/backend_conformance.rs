//! Conformance suite driving the exception dummy backend through the
//! cross-cutting contracts: catalogue consistency, the asynchronous
//! delivery path, fault fan-out and recovery.

use device_access::backend::dummy::ExceptionDummy;
use device_access::{
    AccessMode, AccessModeFlags, DataValidity, Device, DeviceBackend, Error, InterruptId,
    NDRegisterAccessorExt, RegisterAccess, RegisterCatalogue, RegisterInfo, RegisterPath,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn catalogue() -> RegisterCatalogue {
    let mut catalogue = RegisterCatalogue::new();
    catalogue.add_register(RegisterInfo::new("APP/VALUE", 0x00, 1));
    catalogue.add_register(RegisterInfo::new("APP/TABLE", 0x10, 8));
    catalogue.add_register(
        RegisterInfo::new("APP/COUNTER", 0x30, 1)
            .with_access(RegisterAccess::ReadOnly)
            .with_interrupt(InterruptId::new(0, 2)),
    );
    catalogue.add_register(
        RegisterInfo::new("APP/FLAGS", 0x34, 1).with_interrupt(InterruptId::new(0, 2)),
    );
    catalogue
}

fn open_device() -> (Arc<ExceptionDummy>, Device) {
    let backend = ExceptionDummy::new(catalogue());
    let device = Device::new(backend.clone());
    device.open().unwrap();
    (backend, device)
}

fn wait_flags() -> AccessModeFlags {
    AccessModeFlags::new([AccessMode::WaitForNewData])
}

#[test]
fn catalogue_matches_accessor_behaviour() {
    let (_backend, device) = open_device();
    for info in device.register_catalogue().iter() {
        let mut accessor = device
            .get_register_accessor::<i32>(info.path.clone(), 0, 0, AccessModeFlags::empty())
            .unwrap();
        assert_eq!(accessor.number_of_channels(), info.channels);
        assert_eq!(accessor.number_of_samples(), info.elements);
        assert_eq!(accessor.is_readable(), info.access.is_readable());
        assert_eq!(accessor.is_writeable(), info.access.is_writeable());
        if !info.access.is_readable() {
            assert!(matches!(accessor.read(), Err(Error::Logic(_))));
        }
        if !info.access.is_writeable() {
            assert!(matches!(accessor.write(), Err(Error::Logic(_))));
        }
        if !info.supported_flags.has(AccessMode::WaitForNewData) {
            assert!(device
                .get_register_accessor::<i32>(info.path.clone(), 0, 0, wait_flags())
                .is_err());
        }
    }
}

#[test]
fn async_subscription_delivers_in_order() {
    // S3
    let (backend, device) = open_device();
    backend
        .write_raw(&RegisterPath::new("APP/COUNTER"), &[100])
        .unwrap();
    device.activate_async_read();

    let mut subscriber = device
        .get_register_accessor::<i32>("APP/COUNTER", 1, 0, wait_flags())
        .unwrap();
    subscriber.read().unwrap();
    assert_eq!(subscriber.value(), 100);

    let dispatcher = backend
        .interrupt_dispatcher(InterruptId::new(0, 2))
        .unwrap();
    for value in [1, 2, 3] {
        backend
            .write_raw(&RegisterPath::new("APP/COUNTER"), &[value])
            .unwrap();
        dispatcher.trigger();
    }

    for expected in [1, 2, 3] {
        assert!(subscriber.read_non_blocking().unwrap());
        assert_eq!(subscriber.value(), expected);
    }
    // a fourth non-blocking read reports no new data and leaves the buffer
    assert!(!subscriber.read_non_blocking().unwrap());
    assert_eq!(subscriber.value(), 3);
}

#[test]
fn triggering_via_pseudo_register() {
    let (backend, device) = open_device();
    device.activate_async_read();
    let mut subscriber = device
        .get_register_accessor::<i32>("APP/COUNTER", 1, 0, wait_flags())
        .unwrap();
    subscriber.read().unwrap();

    backend
        .write_raw(&RegisterPath::new("APP/COUNTER"), &[41])
        .unwrap();
    let mut trigger = device
        .get_register_accessor::<i32>("DUMMY_INTERRUPT_0_2", 1, 0, AccessModeFlags::empty())
        .unwrap();
    trigger.write().unwrap();

    assert!(subscriber.read_non_blocking().unwrap());
    assert_eq!(subscriber.value(), 41);
}

#[test]
fn consistent_values_share_one_version() {
    // two accessors served by one dispatch cycle see the same version
    let (backend, device) = open_device();
    device.activate_async_read();
    let mut counter = device
        .get_register_accessor::<i32>("APP/COUNTER", 1, 0, wait_flags())
        .unwrap();
    let mut flags_register = device
        .get_register_accessor::<i32>("APP/FLAGS", 1, 0, wait_flags())
        .unwrap();
    counter.read().unwrap();
    flags_register.read().unwrap();

    let dispatcher = backend
        .interrupt_dispatcher(InterruptId::new(0, 2))
        .unwrap();
    dispatcher.trigger();

    counter.read().unwrap();
    flags_register.read().unwrap();
    assert_eq!(
        counter.state().version_number,
        flags_register.state().version_number
    );
    assert_eq!(counter.state().version_number, dispatcher.last_version());
}

#[test]
fn queue_overrun_keeps_the_most_recent_values() {
    let (backend, device) = open_device();
    device.activate_async_read();
    let mut subscriber = device
        .get_register_accessor::<i32>("APP/COUNTER", 1, 0, wait_flags())
        .unwrap();
    subscriber.read().unwrap();

    let dispatcher = backend
        .interrupt_dispatcher(InterruptId::new(0, 2))
        .unwrap();
    // push more values than the queue holds; the producer never blocks
    for value in 1..=6 {
        backend
            .write_raw(&RegisterPath::new("APP/COUNTER"), &[value])
            .unwrap();
        dispatcher.trigger();
    }

    // the consumer sees the latest values, FIFO over the queue depth
    let mut seen = Vec::new();
    while subscriber.read_non_blocking().unwrap() {
        seen.push(subscriber.value());
    }
    assert_eq!(seen, vec![4, 5, 6]);
}

#[test]
fn exception_fan_out_and_recovery() {
    // S4
    let (backend, device) = open_device();
    backend
        .write_raw(&RegisterPath::new("APP/COUNTER"), &[7])
        .unwrap();
    device.activate_async_read();

    let mut first = device
        .get_register_accessor::<i32>("APP/COUNTER", 1, 0, wait_flags())
        .unwrap();
    let mut second = device
        .get_register_accessor::<i32>("APP/COUNTER", 1, 0, wait_flags())
        .unwrap();
    first.read().unwrap();
    second.read().unwrap();
    let version_before = first.state().version_number;

    device.set_exception("down");
    for subscriber in [&mut first, &mut second] {
        match subscriber.read() {
            Err(Error::Runtime(message)) => assert_eq!(message, "down"),
            other => panic!("expected a runtime error, got {other:?}"),
        }
        // exactly one exception, then silence until recovery
        assert!(!subscriber.read_non_blocking().unwrap());
    }

    // repeated set_exception does not enqueue more notifications
    device.set_exception("still down");
    assert!(!first.read_non_blocking().unwrap());

    // recovery: reopen and activate
    device.open().unwrap();
    device.activate_async_read();
    for subscriber in [&mut first, &mut second] {
        subscriber.read().unwrap();
        assert_eq!(subscriber.value(), 7);
        assert!(subscriber.state().version_number > version_before);
    }
}

#[test]
fn faulty_backend_rejects_all_transfers() {
    let (_backend, device) = open_device();
    let mut accessor = device
        .get_register_accessor::<i32>("APP/VALUE", 1, 0, AccessModeFlags::empty())
        .unwrap();
    device.set_exception("bus failure");
    assert!(device.is_open());
    assert!(!device.is_functional());

    match accessor.read() {
        Err(Error::Runtime(message)) => assert_eq!(message, "bus failure"),
        other => panic!("expected a runtime error, got {other:?}"),
    }
    assert!(matches!(accessor.write(), Err(Error::Runtime(_))));

    device.open().unwrap();
    accessor.read().unwrap();
    accessor.write().unwrap();
}

#[test]
fn blocking_read_wakes_on_trigger() {
    let (backend, device) = open_device();
    device.activate_async_read();
    let mut subscriber = device
        .get_register_accessor::<i32>("APP/COUNTER", 1, 0, wait_flags())
        .unwrap();
    subscriber.read().unwrap();

    let producer = backend.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        producer
            .write_raw(&RegisterPath::new("APP/COUNTER"), &[55])
            .unwrap();
        producer
            .interrupt_dispatcher(InterruptId::new(0, 2))
            .unwrap()
            .trigger();
    });

    subscriber.read().unwrap();
    assert_eq!(subscriber.value(), 55);
    handle.join().unwrap();
}

#[test]
fn push_read_promotion() {
    let (backend, device) = open_device();
    backend
        .write_raw(&RegisterPath::new("APP/VALUE"), &[12])
        .unwrap();
    device.activate_async_read();

    let mut subscriber = device
        .get_register_accessor::<i32>("APP/VALUE.PUSH_READ", 1, 0, wait_flags())
        .unwrap();
    assert!(subscriber.is_read_only());
    subscriber.read().unwrap();
    assert_eq!(subscriber.value(), 12);

    backend
        .write_raw(&RegisterPath::new("APP/VALUE"), &[13])
        .unwrap();
    backend.trigger_push(&RegisterPath::new("APP/VALUE"));
    assert!(subscriber.read_non_blocking().unwrap());
    assert_eq!(subscriber.value(), 13);
    assert!(!subscriber.read_non_blocking().unwrap());
}

#[test]
fn push_read_exception_delivery() {
    let (backend, device) = open_device();
    device.activate_async_read();
    let mut subscriber = device
        .get_register_accessor::<i32>("APP/VALUE.PUSH_READ", 1, 0, wait_flags())
        .unwrap();
    subscriber.read().unwrap();

    backend.throw_exception_read.store(true, Ordering::Release);
    backend.trigger_push(&RegisterPath::new("APP/VALUE"));
    assert!(matches!(subscriber.read(), Err(Error::Runtime(_))));
    assert!(!backend.is_functional());
    assert!(!subscriber.read_non_blocking().unwrap());

    backend.throw_exception_read.store(false, Ordering::Release);
    backend.open().unwrap();
    backend.activate_async_read();
    subscriber.read().unwrap();
}

#[test]
fn dispatch_failure_deactivates_and_marks_the_backend() {
    // a runtime error in the grouped read reaches every subscriber once
    let (backend, device) = open_device();
    device.activate_async_read();
    let mut subscriber = device
        .get_register_accessor::<i32>("APP/COUNTER", 1, 0, wait_flags())
        .unwrap();
    subscriber.read().unwrap();

    backend.throw_exception_read.store(true, Ordering::Release);
    let dispatcher = backend
        .interrupt_dispatcher(InterruptId::new(0, 2))
        .unwrap();
    dispatcher.trigger();

    assert!(matches!(subscriber.read(), Err(Error::Runtime(_))));
    assert!(!backend.is_functional());
    assert!(!subscriber.read_non_blocking().unwrap());

    // triggering while deactivated delivers nothing further
    dispatcher.trigger();
    assert!(!subscriber.read_non_blocking().unwrap());
}

#[test]
fn unsubscribe_tears_down_the_shared_reader() {
    let (backend, device) = open_device();
    device.activate_async_read();
    let first = device
        .get_register_accessor::<i32>("APP/COUNTER", 1, 0, wait_flags())
        .unwrap();
    let second = device
        .get_register_accessor::<i32>("APP/COUNTER", 1, 0, wait_flags())
        .unwrap();
    drop(first);
    drop(second);

    // a fresh subscription still works after the teardown
    let mut third = device
        .get_register_accessor::<i32>("APP/COUNTER", 1, 0, wait_flags())
        .unwrap();
    third.read().unwrap();
    let dispatcher = backend
        .interrupt_dispatcher(InterruptId::new(0, 2))
        .unwrap();
    backend
        .write_raw(&RegisterPath::new("APP/COUNTER"), &[9])
        .unwrap();
    dispatcher.trigger();
    assert!(third.read_non_blocking().unwrap());
    assert_eq!(third.value(), 9);
}

#[test]
fn versions_after_reopen_exceed_all_previous() {
    let (_backend, device) = open_device();
    let mut accessor = device
        .get_register_accessor::<i32>("APP/VALUE", 1, 0, AccessModeFlags::empty())
        .unwrap();
    accessor.read().unwrap();
    let before = accessor.state().version_number;

    device.set_exception("glitch");
    assert!(accessor.read().is_err());
    device.open().unwrap();

    accessor.read().unwrap();
    assert!(accessor.state().version_number > before);
}

#[test]
fn writes_through_async_accessor() {
    // APP/FLAGS is read-write; its async accessor can write through the
    // inner write accessor
    let (backend, device) = open_device();
    device.activate_async_read();
    let mut accessor = device
        .get_register_accessor::<i32>("APP/FLAGS", 1, 0, wait_flags())
        .unwrap();
    assert!(accessor.is_writeable());
    accessor.read().unwrap();
    accessor.set_value(0x5a);
    accessor.write().unwrap();
    assert_eq!(
        backend.read_raw(&RegisterPath::new("APP/FLAGS")).unwrap(),
        vec![0x5a]
    );

    // the read-only register's async accessor cannot write
    let mut counter = device
        .get_register_accessor::<i32>("APP/COUNTER", 1, 0, wait_flags())
        .unwrap();
    assert!(counter.is_read_only());
    assert!(matches!(counter.write(), Err(Error::Logic(_))));
}

#[test]
fn data_validity_is_carried_through_the_queue() {
    let (backend, device) = open_device();
    device.activate_async_read();
    let mut subscriber = device
        .get_register_accessor::<i32>("APP/COUNTER", 1, 0, wait_flags())
        .unwrap();
    subscriber.read().unwrap();
    assert_eq!(subscriber.state().data_validity, DataValidity::Ok);

    let dispatcher = backend
        .interrupt_dispatcher(InterruptId::new(0, 2))
        .unwrap();
    dispatcher.trigger();
    subscriber.read().unwrap();
    assert_eq!(subscriber.state().data_validity, DataValidity::Ok);
    assert!(subscriber.state().version_number >= dispatcher.last_version());
}
