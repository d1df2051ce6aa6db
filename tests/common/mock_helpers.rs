//! Mock construction helpers

use crossbeam_channel::{unbounded, Receiver, Sender};
use exsync::log::LogRecord;
use exsync::{ConnectionState, CyclicDriver, DriverState, Link, LinkEvent};

/// Create a record channel for a standalone distributor
pub fn create_log_channel() -> (Sender<LogRecord>, Receiver<LogRecord>) {
    unbounded()
}

/// Install an event handler that forwards every event to a receiver
pub fn record_events(link: &mut Link) -> Receiver<LinkEvent> {
    let (tx, rx) = unbounded();
    link.set_event_handler(Box::new(move |event| {
        let _ = tx.send(event.clone());
    }));
    rx
}

/// Connect and process the acknowledgements
pub fn connect_and_ack(link: &mut Link) {
    link.connect().unwrap();
    link.process().unwrap();
    assert_eq!(link.state(), ConnectionState::Connected);
}

/// Cycle a fresh driver until it is running with an operational link
pub fn drive_to_operational(driver: &mut CyclicDriver) {
    for _ in 0..3 {
        driver.cycle(true, false);
    }
    let status = driver.cycle(true, true);
    assert!(status.operational, "link not operational: {:?}", status);
    assert_eq!(driver.state(), DriverState::Running);
}
