//! Full-driver scenarios against the simulated adapter.
//!
//! Each test stands up a [`Driver`] over a mock transport with the
//! simulator answering on the far side, then exercises one slice of the
//! coordinator lifecycle end to end.

mod common;

use common::{SimOptions, Simulator, SIM_IEEE};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use znp_host::transport::MockTransport;
use znp_host::types::{Channels, Nwk};
use znp_host::{
    Config, DataRequest, Driver, DriverState, Event, FormConfig, StartMode,
};

fn test_config() -> Config {
    let mut config = Config::new("sim");
    // Keep test failures snappy
    config.timeouts.sreq_secs = 5;
    config.timeouts.arsp_secs = 5;
    config
}

fn open_driver(options: SimOptions) -> (Driver, Simulator) {
    let (transport, port) = MockTransport::new();
    let simulator = Simulator::spawn(port, options);
    let driver = Driver::open_with_transport(test_config(), Box::new(transport)).unwrap();
    (driver, simulator)
}

#[test]
fn test_cold_start_and_form() {
    let (driver, sim) = open_driver(SimOptions::default());

    assert_eq!(driver.state(), DriverState::Probing);

    driver
        .start(StartMode::Form(FormConfig {
            channel_mask: Some(Channels::from_channel(11)),
            ..Default::default()
        }))
        .unwrap();

    assert_eq!(driver.state(), DriverState::Running);

    let network = driver.network_info().unwrap();
    assert_eq!(network.channel, 11);
    assert_ne!(network.extended_pan_id.0, 0);

    let node = driver.node_info().unwrap();
    assert_eq!(node.ieee, SIM_IEEE);
    assert_eq!(node.nwk, Nwk::COORDINATOR);

    // The configured marker landed in the adapter's NVRAM
    assert_eq!(sim.legacy_nv(0x0060), Some(vec![0x55]));
}

#[test]
fn test_backup_after_forming() {
    let (driver, _sim) = open_driver(SimOptions::default());

    driver
        .start(StartMode::Form(FormConfig {
            channel_mask: Some(Channels::from_channel(11)),
            ..Default::default()
        }))
        .unwrap();

    let backup = driver.backup().unwrap();
    assert_eq!(backup.network.channel, 11);
    assert_ne!(backup.network.extended_pan_id, "0000000000000000");
    assert!(!backup.nvram.legacy.is_empty());

    // The document survives a JSON round trip unchanged
    let json = backup.to_json().unwrap();
    let parsed = znp_host::BackupDocument::from_json(&json).unwrap();
    assert_eq!(parsed, backup);
}

#[test]
fn test_restore_into_blank_adapter() {
    // Form once to get a realistic backup document
    let backup = {
        let (driver, _sim) = open_driver(SimOptions::default());
        driver
            .start(StartMode::Form(FormConfig {
                channel_mask: Some(Channels::from_channel(15)),
                ..Default::default()
            }))
            .unwrap();
        driver.backup().unwrap()
    };

    // Restore it onto a factory-fresh simulated adapter
    let (driver, _sim) = open_driver(SimOptions::default());
    driver
        .start(StartMode::Restore(Box::new(backup.clone())))
        .unwrap();

    assert_eq!(driver.state(), DriverState::Running);

    let network = driver.network_info().unwrap();
    assert_eq!(network.channel, 15);
    assert_eq!(network.pan_id.0, backup.network.pan_id);
    assert_eq!(
        network.network_key,
        backup.network.network_key().unwrap()
    );
}

#[test]
fn test_concurrent_data_requests_with_reversed_confirms() {
    let (driver, _sim) = open_driver(SimOptions { confirm_batch: 2 });

    driver
        .start(StartMode::Form(FormConfig::default()))
        .unwrap();

    let driver = Arc::new(driver);

    let first = {
        let driver = Arc::clone(&driver);
        thread::spawn(move || {
            driver.request_data(DataRequest::unicast(Nwk(0x1111), 0x0006, 1, vec![0x01]))
        })
    };

    let second = {
        let driver = Arc::clone(&driver);
        thread::spawn(move || {
            driver.request_data(DataRequest::unicast(Nwk(0x2222), 0x0006, 1, vec![0x02]))
        })
    };

    let first = first.join().unwrap().unwrap();
    let second = second.join().unwrap().unwrap();

    // The confirms came back in reverse order; each caller still got its own
    assert_ne!(first.tsn, second.tsn);
}

#[test]
fn test_permit_join_countdown() {
    let (driver, _sim) = open_driver(SimOptions::default());

    driver
        .start(StartMode::Form(FormConfig::default()))
        .unwrap();

    driver.permit_join(60, None).unwrap();

    let remaining = driver.permit_join_remaining();
    assert!(remaining <= Duration::from_secs(60));
    assert!(remaining > Duration::from_secs(58));

    thread::sleep(Duration::from_secs(2));
    let later = driver.permit_join_remaining();
    assert!(later < remaining);

    // Closing the network zeroes the countdown
    driver.permit_join(0, None).unwrap();
    assert_eq!(driver.permit_join_remaining(), Duration::ZERO);
}

#[test]
fn test_permit_join_event_emitted() {
    let (driver, _sim) = open_driver(SimOptions::default());

    driver
        .start(StartMode::Form(FormConfig::default()))
        .unwrap();

    let events = driver.events();
    driver.permit_join(30, None).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let mut saw_permit_event = false;
    while std::time::Instant::now() < deadline {
        match events.recv_timeout(Duration::from_millis(250)) {
            Ok(Event::PermitJoinChanged { remaining_secs }) => {
                assert!(remaining_secs == 30 || remaining_secs == 0);
                saw_permit_event = true;
                break;
            }
            Ok(_) => {}
            Err(_) => {}
        }
    }
    assert!(saw_permit_event);
}

#[test]
fn test_zdo_active_endpoints() {
    let (driver, _sim) = open_driver(SimOptions::default());

    driver
        .start(StartMode::Form(FormConfig::default()))
        .unwrap();

    let endpoints = driver.active_endpoints(Nwk(0x4522)).unwrap();
    assert_eq!(endpoints, vec![1]);
}

#[test]
fn test_data_request_requires_running_network() {
    let (driver, _sim) = open_driver(SimOptions::default());

    // Not started yet: the driver refuses data-plane work
    let err = driver
        .request_data(DataRequest::unicast(Nwk(0x1234), 0x0006, 1, vec![]))
        .unwrap_err();
    assert!(matches!(err, znp_host::Error::State(_)));
}

#[test]
fn test_close_returns_to_disconnected() {
    let (mut driver, _sim) = open_driver(SimOptions::default());

    driver
        .start(StartMode::Form(FormConfig::default()))
        .unwrap();
    assert_eq!(driver.state(), DriverState::Running);

    driver.close();
    assert_eq!(driver.state(), DriverState::Disconnected);

    // Everything fails fast afterwards
    assert!(driver.network_info().is_some());
    assert!(driver
        .request_data(DataRequest::unicast(Nwk(0x1234), 0x0006, 1, vec![]))
        .is_err());
}
