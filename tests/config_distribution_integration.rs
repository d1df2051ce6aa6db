//! Integration tests for log config distribution between modules

mod common;

use common::mock_helpers::create_log_channel;
use exsync::log::{Disposition, LogLevel, LogTypeMask, PENDING_CAPACITY};
use exsync::{ConfigDistributor, ErrorKind, LogFilterConfig, LogServer};
use std::sync::{Arc, Mutex};

fn debug_config() -> LogFilterConfig {
    LogFilterConfig {
        level: LogLevel::Debug,
        type_mask: LogTypeMask::all(),
        ..Default::default()
    }
}

#[test]
fn test_pending_queue_drops_oldest_and_flushes_in_order() {
    let (tx, rx) = create_log_channel();
    let mut dist = ConfigDistributor::new("gBufferFub_0", tx).unwrap();

    for i in 0..PENDING_CAPACITY + 20 {
        assert_eq!(
            dist.success(&format!("message {}", i), LogTypeMask::USER).unwrap(),
            Disposition::Buffered
        );
    }
    assert_eq!(dist.pending_count(), PENDING_CAPACITY);
    assert_eq!(dist.dropped_count(), 20);
    assert!(rx.try_recv().is_err());

    let flushed = dist.on_config_received(LogFilterConfig::default()).unwrap();
    assert_eq!(flushed, PENDING_CAPACITY);
    assert_eq!(dist.pending_count(), 0);

    let messages: Vec<String> = rx.try_iter().map(|r| r.message).collect();
    let expected: Vec<String> = (20..PENDING_CAPACITY + 20)
        .map(|i| format!("message {}", i))
        .collect();
    assert_eq!(messages, expected);
}

#[test]
fn test_flush_applies_filter() {
    let (tx, rx) = create_log_channel();
    let mut dist = ConfigDistributor::new("gBufferFub_0", tx).unwrap();

    dist.debug("too verbose", LogTypeMask::USER).unwrap();
    dist.error("kept").unwrap();
    dist.emit("system", LogLevel::Info, LogTypeMask::SYSTEM).unwrap();

    let config = LogFilterConfig {
        level: LogLevel::Info,
        type_mask: LogTypeMask::USER,
        ..Default::default()
    };
    assert_eq!(dist.on_config_received(config).unwrap(), 1);

    let records: Vec<_> = rx.try_iter().collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message, "kept");
    assert_eq!(records[0].level, LogLevel::Error);
}

#[test]
fn test_change_from_one_module_reaches_all() {
    let mut server = LogServer::new(LogFilterConfig::default()).unwrap();
    let mut first = server.subscribe("gBufferFub_0").unwrap();
    let mut second = server.subscribe("gSampleFub_0").unwrap();
    first.process().unwrap();
    second.process().unwrap();

    assert_eq!(second.info("hidden", LogTypeMask::USER).unwrap(), Disposition::Filtered);
    assert_eq!(second.success("shown", LogTypeMask::USER).unwrap(), Disposition::Forwarded);

    first.change_config(debug_config()).unwrap();
    // not applied until the server rebroadcasts
    assert_eq!(first.config().unwrap().level, LogLevel::Success);
    assert_eq!(server.process(), 1);
    assert_eq!(first.process().unwrap(), 1);
    assert_eq!(second.process().unwrap(), 1);

    assert_eq!(server.config(), &debug_config());
    assert_eq!(second.debug("visible", LogTypeMask::USER).unwrap(), Disposition::Forwarded);
    assert_eq!(first.verbose("visible too").unwrap(), Disposition::Forwarded);

    let modules: Vec<String> = server.drain_records().into_iter().map(|r| r.module).collect();
    assert_eq!(modules, vec!["gSampleFub_0", "gSampleFub_0", "gBufferFub_0"]);
}

#[test]
fn test_excluded_module_is_silenced() {
    let mut server = LogServer::new(LogFilterConfig::default()).unwrap();
    let mut sample = server.subscribe("gSampleFub_0").unwrap();
    let mut buffer = server.subscribe("gBufferFub_0").unwrap();

    server
        .broadcast(LogFilterConfig {
            excluded_module_names: vec!["gSampleFub_0".to_string()],
            ..Default::default()
        })
        .unwrap();
    // the initial config and the broadcast
    assert_eq!(sample.process().unwrap(), 2);
    assert_eq!(buffer.process().unwrap(), 2);

    assert!(sample.is_excluded());
    assert!(!buffer.is_excluded());
    assert_eq!(sample.error("dropped").unwrap(), Disposition::Filtered);
    assert_eq!(buffer.error("kept").unwrap(), Disposition::Forwarded);
    assert_eq!(server.drain_records().len(), 1);
}

#[test]
fn test_change_callback_sees_new_config() {
    let mut server = LogServer::new(LogFilterConfig::default()).unwrap();
    let mut dist = server.subscribe("gBufferFub_0").unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    dist.on_config_changed(Box::new(move |config| {
        seen_clone.lock().unwrap().push(config.level);
    }));

    dist.process().unwrap();
    server.broadcast(debug_config()).unwrap();
    dist.process().unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![LogLevel::Success, LogLevel::Debug]);
}

#[test]
fn test_invalid_configs_are_rejected() {
    let mut server = LogServer::new(LogFilterConfig::default()).unwrap();
    let dist = server.subscribe("gBufferFub_0").unwrap();

    let too_many = LogFilterConfig {
        excluded_module_names: (0..21).map(|i| format!("module{}", i)).collect(),
        ..Default::default()
    };
    assert_eq!(
        server.broadcast(too_many.clone()).unwrap_err().kind(),
        ErrorKind::Config
    );
    assert_eq!(
        dist.change_config(too_many).unwrap_err().kind(),
        ErrorKind::Config
    );

    let long_name = LogFilterConfig {
        excluded_module_names: vec!["x".repeat(36)],
        ..Default::default()
    };
    assert_eq!(
        server.broadcast(long_name).unwrap_err().kind(),
        ErrorKind::InvalidName
    );
    assert_eq!(
        server.subscribe("").unwrap_err().kind(),
        ErrorKind::InvalidName
    );
    assert_eq!(server.config(), &LogFilterConfig::default());
}

#[test]
fn test_server_drop_is_reported() {
    let mut server = LogServer::new(LogFilterConfig::default()).unwrap();
    let mut dist = server.subscribe("gBufferFub_0").unwrap();
    dist.process().unwrap();
    drop(server);

    assert_eq!(dist.process().unwrap_err().kind(), ErrorKind::Channel);
    // records can no longer be delivered
    assert_eq!(dist.error("lost").unwrap_err().kind(), ErrorKind::Channel);
}

#[test]
fn test_long_message_truncated() {
    let (tx, rx) = create_log_channel();
    let mut dist = ConfigDistributor::new("gBufferFub_0", tx).unwrap();
    dist.on_config_received(LogFilterConfig::default()).unwrap();

    dist.error(&"a".repeat(1000)).unwrap();
    let record = rx.try_recv().unwrap();
    assert_eq!(record.message.chars().count(), exsync::log::MAX_MESSAGE_LEN);
}
