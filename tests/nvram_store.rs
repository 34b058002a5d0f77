//! NVRAM manager behaviour against the simulated adapter.

mod common;

use common::{SimOptions, Simulator};
use std::sync::Arc;
use znp_host::bus::{BusTimeouts, MtBus};
use znp_host::nvram::{ExNvId, Nvram, NvSysId, OsalNvId, ResetDepth};
use znp_host::transport::MockTransport;
use znp_host::types::Capabilities;
use znp_host::Error;

fn start_nvram() -> (Nvram, Simulator) {
    let (transport, port) = MockTransport::new();
    let simulator = Simulator::spawn(port, SimOptions::default());
    let bus = Arc::new(MtBus::start(Box::new(transport), BusTimeouts::default()).unwrap());
    let nvram = Nvram::new(bus, Capabilities::SYS | Capabilities::APP_CNF);
    (nvram, simulator)
}

#[test]
fn test_legacy_write_read_delete() {
    let (nvram, _sim) = start_nvram();

    let value = vec![0xAB; 16];
    nvram.osal_write(OsalNvId::PRECFGKEY, &value, true).unwrap();
    assert_eq!(nvram.osal_read(OsalNvId::PRECFGKEY).unwrap(), value);
    assert_eq!(nvram.osal_length(OsalNvId::PRECFGKEY).unwrap(), 16);

    assert!(nvram.osal_delete(OsalNvId::PRECFGKEY).unwrap());
    assert!(!nvram.osal_delete(OsalNvId::PRECFGKEY).unwrap());
    assert!(matches!(
        nvram.osal_read(OsalNvId::PRECFGKEY),
        Err(Error::NvramMissing { .. })
    ));
}

#[test]
fn test_write_is_idempotent() {
    let (nvram, _sim) = start_nvram();

    let value = vec![0x11, 0x22, 0x33];
    nvram.osal_write(OsalNvId::CHANLIST, &value, true).unwrap();
    let first_length = nvram.osal_length(OsalNvId::CHANLIST).unwrap();

    nvram.osal_write(OsalNvId::CHANLIST, &value, true).unwrap();
    assert_eq!(nvram.osal_length(OsalNvId::CHANLIST).unwrap(), first_length);
    assert_eq!(nvram.osal_read(OsalNvId::CHANLIST).unwrap(), value);
}

#[test]
fn test_write_resizes_existing_item() {
    let (nvram, _sim) = start_nvram();

    nvram.osal_write(OsalNvId::USERDESC, &[1, 2, 3], true).unwrap();
    nvram
        .osal_write(OsalNvId::USERDESC, &[9; 10], true)
        .unwrap();
    assert_eq!(nvram.osal_read(OsalNvId::USERDESC).unwrap(), vec![9; 10]);

    // Without create, a size change is refused
    assert!(nvram.osal_write(OsalNvId::USERDESC, &[1], false).is_err());
}

#[test]
fn test_large_item_chunking() {
    let (nvram, _sim) = start_nvram();

    // Five chunks worth of data
    let value: Vec<u8> = (0..1100).map(|i| (i % 251) as u8).collect();
    nvram
        .osal_write(OsalNvId::APS_LINK_KEY_TABLE, &value, true)
        .unwrap();
    assert_eq!(
        nvram.osal_read(OsalNvId::APS_LINK_KEY_TABLE).unwrap(),
        value
    );
}

#[test]
fn test_extended_store_round_trip() {
    let (nvram, _sim) = start_nvram();

    let value = vec![0xCD; 20];
    nvram
        .ex_write(NvSysId::ZSTACK, ExNvId::TCLK_TABLE, 3, &value)
        .unwrap();
    assert_eq!(
        nvram
            .ex_read(NvSysId::ZSTACK, ExNvId::TCLK_TABLE, 3)
            .unwrap(),
        value
    );
    assert_eq!(
        nvram
            .ex_length(NvSysId::ZSTACK, ExNvId::TCLK_TABLE, 3)
            .unwrap(),
        20
    );

    assert!(nvram
        .ex_delete(NvSysId::ZSTACK, ExNvId::TCLK_TABLE, 3)
        .unwrap());
}

#[test]
fn test_restore_of_backup_is_identity() {
    let (nvram, _sim) = start_nvram();

    nvram.osal_write(OsalNvId::PANID, &[0x62, 0xA1], true).unwrap();
    nvram
        .osal_write(OsalNvId::CHANLIST, &[0x00, 0x08, 0x00, 0x00], true)
        .unwrap();
    nvram
        .ex_write(NvSysId::ZSTACK, ExNvId::ADDRMGR, 0, &[0xEE; 12])
        .unwrap();

    let snapshot = nvram.backup(true).unwrap();
    assert!(snapshot.legacy.contains_key(&OsalNvId::PANID.0));

    // Clobber and restore
    nvram.osal_write(OsalNvId::PANID, &[0xFF, 0xFF], true).unwrap();
    nvram.restore(&snapshot).unwrap();

    assert_eq!(
        nvram.osal_read(OsalNvId::PANID).unwrap(),
        vec![0x62, 0xA1]
    );
    assert_eq!(nvram.backup(true).unwrap(), snapshot);
}

#[test]
fn test_factory_reset_empties_the_catalogue() {
    let (nvram, _sim) = start_nvram();

    nvram.osal_write(OsalNvId::PANID, &[0x62, 0xA1], true).unwrap();
    nvram
        .ex_write(NvSysId::ZSTACK, ExNvId::TCLK_TABLE, 0, &[0x01; 8])
        .unwrap();

    nvram.reset(ResetDepth::Factory, true).unwrap();

    let snapshot = nvram.backup(true).unwrap();
    assert!(snapshot.legacy.is_empty());
    assert!(snapshot.extended.is_empty());
}

#[test]
fn test_network_reset_clears_markers() {
    let (nvram, _sim) = start_nvram();

    nvram
        .osal_write(OsalNvId::HAS_CONFIGURED_ZSTACK3, &[0x55], true)
        .unwrap();
    nvram
        .osal_write(OsalNvId::BDBNODEISONANETWORK, &[0x01], true)
        .unwrap();
    nvram.osal_write(OsalNvId::PANID, &[0x62, 0xA1], true).unwrap();

    nvram.reset(ResetDepth::NetworkOnly, true).unwrap();

    assert!(matches!(
        nvram.osal_read(OsalNvId::HAS_CONFIGURED_ZSTACK3),
        Err(Error::NvramMissing { .. })
    ));
    assert!(matches!(
        nvram.osal_read(OsalNvId::BDBNODEISONANETWORK),
        Err(Error::NvramMissing { .. })
    ));

    // Startup options instruct the firmware to clear network state on boot
    assert_eq!(
        nvram.osal_read(OsalNvId::STARTUP_OPTION).unwrap(),
        vec![0x03]
    );

    // Non-network items survive
    assert_eq!(
        nvram.osal_read(OsalNvId::PANID).unwrap(),
        vec![0x62, 0xA1]
    );
}
