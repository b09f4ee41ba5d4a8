//! Integration tests for signals forwarding into other signals.

use std::sync::Arc;
use std::thread;

use collate_core::Signal;
use parking_lot::Mutex;

// Mirrors how a view relays source changes to its own observers.
struct Relay {
    changed: Signal<Vec<String>>,
    reset: Signal<()>,
}

#[test]
fn relays_through_a_weak_owner() {
    let relay = Arc::new(Relay {
        changed: Signal::new(),
        reset: Signal::new(),
    });
    let resets = Arc::new(Mutex::new(0));

    let weak = Arc::downgrade(&relay);
    relay.changed.connect(move |names| {
        if let Some(relay) = weak.upgrade()
            && names.iter().any(|name| name == "title")
        {
            relay.reset.emit(());
        }
    });
    let resets_clone = resets.clone();
    relay.reset.connect(move |_| *resets_clone.lock() += 1);

    relay.changed.emit(vec!["notes".to_string()]);
    relay.changed.emit(vec!["title".to_string(), "notes".to_string()]);

    assert_eq!(*resets.lock(), 1);
}

#[test]
fn slot_can_disconnect_itself() {
    let signal = Arc::new(Signal::<u32>::new());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let own_id = Arc::new(Mutex::new(None));

    let signal_clone = signal.clone();
    let calls_clone = calls.clone();
    let own_id_clone = own_id.clone();
    let id = signal.connect(move |&value| {
        calls_clone.lock().push(value);
        if let Some(id) = own_id_clone.lock().take() {
            signal_clone.disconnect(id);
        }
    });
    *own_id.lock() = Some(id);

    signal.emit(1);
    signal.emit(2);

    assert_eq!(*calls.lock(), vec![1]);
    assert_eq!(signal.connection_count(), 0);
}

#[test]
fn emits_from_other_threads() {
    let signal = Arc::new(Signal::<usize>::new());
    let total = Arc::new(Mutex::new(0));

    let total_clone = total.clone();
    signal.connect(move |&value| *total_clone.lock() += value);

    let handles: Vec<_> = (1..=4)
        .map(|n| {
            let signal = signal.clone();
            thread::spawn(move || signal.emit(n))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*total.lock(), 10);
}
