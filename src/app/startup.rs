//! Coordinator startup: stack settings, network formation, restoration and
//! the common "bring the stack up" sequence.
//!
//! Forming and restoring share one path. Z-Stack offers no way to write
//! network parameters directly into a blank NVRAM, so both first have the
//! firmware form a throwaway network on randomised settings (which lays out
//! every NV structure), then overwrite the freshly-built NIB and security
//! items with the desired values and reset again.

use super::adapter::Adapter;
use super::{NetworkInfo, NodeInfo};
use crate::commands::{af, app_config, zdo, MtCommand};
use crate::error::{ensure_success, Error, Result};
use crate::nvram::OsalNvId;
use crate::security;
use crate::types::{
    Channels, CommissioningMode, CommissioningStatus, DeviceState, Ieee, KeyData, LogicalType,
    LvList, Nib, NvStruct, NwkActiveKeyItems, NwkKeyDesc, Nwk, PanId, StartupOptions, Status,
    ZstackVersion,
};
use rand::RngCore;
use std::thread;
use std::time::{Duration, Instant};

/// Deadline for the firmware to finish forming or joining.
const COMMISSIONING_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to keep polling the NIB after formation before giving up on it
/// stabilising.
const NIB_SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Channels scanned while forming the throwaway network.
const STARTUP_CHANNELS: Channels = Channels::ALL;

/// Marker value Z-Stack tooling writes once configuration succeeded.
const CONFIGURED_MARKER: u8 = 0x55;

/// Settings for forming a new network. Unset identifiers are randomised.
#[derive(Debug, Clone, Default)]
pub struct FormConfig {
    /// Channels the device may pick from; a single-channel mask pins it
    pub channel_mask: Option<Channels>,
    pub pan_id: Option<PanId>,
    pub extended_pan_id: Option<Ieee>,
    pub network_key: Option<KeyData>,
}

impl FormConfig {
    /// Turn the partial configuration into concrete network settings.
    pub fn resolve(&self) -> NetworkInfo {
        let mut rng = rand::thread_rng();

        let network_key = self.network_key.unwrap_or_else(|| {
            let mut key = [0u8; 16];
            rng.fill_bytes(&mut key);
            KeyData(key)
        });

        let extended_pan_id = self.extended_pan_id.unwrap_or_else(|| {
            let mut epid = [0u8; 8];
            rng.fill_bytes(&mut epid);
            Ieee(u64::from_le_bytes(epid))
        });

        let pan_id = self.pan_id.unwrap_or_else(|| {
            // 0xFFFF and 0x0000 are reserved
            PanId((rng.next_u32() % 0xFFFE) as u16 + 1)
        });

        let channel_mask = self.channel_mask.unwrap_or(Channels::from_channel(15));
        let channel = channel_mask.iter().next().unwrap_or(15);

        let mut tclk_seed = [0u8; 16];
        rng.fill_bytes(&mut tclk_seed);

        NetworkInfo {
            pan_id,
            extended_pan_id,
            channel,
            channel_mask,
            nwk_update_id: 0,
            security_level: 5,
            network_key,
            key_sequence: 0,
            frame_counter: 0,
            tc_link_key: KeyData::default_tc_link_key(),
            tclk_seed: Some(KeyData(tclk_seed)),
        }
    }
}

/// Write the network-independent stack settings, returning whether any
/// value actually changed (a reset is only needed when one did).
pub fn write_stack_settings(adapter: &Adapter) -> Result<bool> {
    let settings: &[(OsalNvId, &[u8])] = &[
        (OsalNvId::LOGICAL_TYPE, &[LogicalType::Coordinator.raw()]),
        // Source routing: the coordinator is a many-to-one concentrator
        (OsalNvId::CONCENTRATOR_ENABLE, &[1]),
        (OsalNvId::CONCENTRATOR_DISCOVERY, &[120]),
        (OsalNvId::CONCENTRATOR_RC, &[1]),
        (OsalNvId::SRC_RTG_EXPIRY_TIME, &[255]),
        (OsalNvId::NWK_CHILD_AGE_ENABLE, &[0]),
        (OsalNvId::BCAST_DELIVERY_TIME, &[30]),
        // Deliver every ZDO callback to the host
        (OsalNvId::ZDO_DIRECT_CB, &[1]),
    ];

    let mut any_changed = false;

    for (id, value) in settings {
        let current = match adapter.nvram.osal_read(*id) {
            Ok(current) => Some(current),
            Err(Error::NvramMissing { .. }) => None,
            Err(e) => return Err(e),
        };

        if current.as_deref() != Some(*value) {
            adapter.nvram.osal_write(*id, value, true)?;
            any_changed = true;
        }
    }

    Ok(any_changed)
}

/// Load the formed network's parameters out of NVRAM.
pub fn load_network_info(adapter: &Adapter) -> Result<(NetworkInfo, NodeInfo)> {
    let nib = adapter.read_nib()?;

    let mut on_network = nib.is_on_network();

    if on_network && adapter.version.is_zstack3() {
        // BDB keeps its own flag; trust it over the NIB
        on_network = match adapter.nvram.osal_read(OsalNvId::BDBNODEISONANETWORK) {
            Ok(value) => value.first() == Some(&1),
            Err(Error::NvramMissing { .. }) => false,
            Err(e) => return Err(e),
        };
    }

    if !on_network {
        return Err(Error::State(
            "Device is not part of a network".to_string(),
        ));
    }

    let key_desc = match adapter.nvram.osal_read(OsalNvId::NWK_ACTIVE_KEY_INFO) {
        Ok(raw) => NwkKeyDesc::from_bytes(&raw, adapter.aligned).map_err(|_| {
            Error::NvramMismatch {
                item: OsalNvId::NWK_ACTIVE_KEY_INFO.to_string(),
            }
        })?,
        Err(Error::CommandStatus { .. }) => {
            // Z-Stack 1.2 hides the key info item; the preconfigured key
            // carries the same value
            let raw = adapter.nvram.osal_read(OsalNvId::PRECFGKEY)?;
            NwkKeyDesc {
                key_seq_num: 0,
                key: KeyData(raw.try_into().map_err(|_| Error::NvramMismatch {
                    item: OsalNvId::PRECFGKEY.to_string(),
                })?),
            }
        }
        Err(e) => return Err(e),
    };

    let tclk_seed = if adapter.version.is_zstack3() {
        let raw = adapter.nvram.osal_read(OsalNvId::TCLK_SEED)?;
        Some(KeyData(raw.try_into().map_err(|_| Error::NvramMismatch {
            item: OsalNvId::TCLK_SEED.to_string(),
        })?))
    } else {
        None
    };

    let frame_counter = security::read_tc_frame_counter(
        &adapter.nvram,
        adapter.version,
        adapter.aligned,
        nib.extended_pan_id,
    )?;

    let ieee_raw = adapter.nvram.osal_read(OsalNvId::EXTADDR)?;
    let ieee = Ieee(u64::from_le_bytes(ieee_raw.try_into().map_err(|_| {
        Error::NvramMismatch {
            item: OsalNvId::EXTADDR.to_string(),
        }
    })?));

    let logical_type = adapter
        .nvram
        .osal_read(OsalNvId::LOGICAL_TYPE)?
        .first()
        .map(|raw| LogicalType::from(*raw))
        .unwrap_or(LogicalType::Coordinator);

    let network = NetworkInfo {
        pan_id: PanId(nib.nwk_pan_id),
        extended_pan_id: nib.extended_pan_id,
        channel: nib.nwk_logical_channel,
        channel_mask: Channels(nib.channel_list),
        nwk_update_id: nib.nwk_update_id,
        security_level: nib.security_level,
        network_key: key_desc.key,
        key_sequence: key_desc.key_seq_num,
        frame_counter,
        tc_link_key: KeyData::default_tc_link_key(),
        tclk_seed,
    };

    let node = NodeInfo {
        ieee,
        nwk: nib.nwk_dev_address,
        logical_type,
    };

    Ok((network, node))
}

/// Write a complete network state into NVRAM, forming a scratch network
/// first to lay out every structure. Children and their keys are restored
/// with advanced frame counters.
pub fn write_network_info(
    adapter: &Adapter,
    network: &NetworkInfo,
    node: &NodeInfo,
    children: &[security::StoredDevice],
) -> Result<()> {
    let nvram = &adapter.nvram;

    // Drop the configured markers so the firmware reinitialises fully
    nvram.osal_delete(OsalNvId::HAS_CONFIGURED_ZSTACK1)?;
    nvram.osal_delete(OsalNvId::HAS_CONFIGURED_ZSTACK3)?;
    nvram.osal_delete(OsalNvId::BDBNODEISONANETWORK)?;

    let startup = StartupOptions::CLEAR_STATE | StartupOptions::CLEAR_CONFIG;
    nvram.osal_write(OsalNvId::STARTUP_OPTION, &[startup.0], true)?;

    adapter.reset()?;

    // Scratch-network settings: fully random so nothing collides
    let mut rng = rand::thread_rng();
    let mut scratch_epid = [0u8; 8];
    rng.fill_bytes(&mut scratch_epid);
    let mut scratch_key = [0u8; 16];
    rng.fill_bytes(&mut scratch_key);

    nvram.osal_write(OsalNvId::PANID, &0xFFFFu16.to_le_bytes(), true)?;
    nvram.osal_write(OsalNvId::APS_USE_EXT_PANID, &scratch_epid, true)?;
    nvram.osal_write(OsalNvId::PRECFGKEY, &scratch_key, true)?;
    nvram.osal_write(OsalNvId::PRECFGKEYS_ENABLE, &[0], true)?;
    nvram.osal_write(OsalNvId::CHANLIST, &STARTUP_CHANNELS.0.to_le_bytes(), true)?;

    if adapter.version.is_zstack3() {
        // Z-Stack 3 ignores CHANLIST in favour of the BDB masks
        let rsp = adapter.bus.request(&app_config::BdbSetChannel {
            is_primary: true,
            channel: STARTUP_CHANNELS,
        })?;
        ensure_success(app_config::BdbSetChannel::NAME, rsp.status)?;

        let rsp = adapter.bus.request(&app_config::BdbSetChannel {
            is_primary: false,
            channel: Channels::NONE,
        })?;
        ensure_success(app_config::BdbSetChannel::NAME, rsp.status)?;
    }

    log::debug!("Forming temporary network");
    form_scratch_network(adapter)?;

    log::debug!("Waiting for the NIB to stabilize");
    wait_for_nib(adapter)?;

    adapter.reset()?;

    log::debug!("Writing actual network settings");

    let mut nib = adapter.read_nib()?;
    nib.nwk_dev_address = node.nwk;
    nib.nwk_pan_id = network.pan_id.0;
    nib.extended_pan_id = network.extended_pan_id;
    nib.nwk_update_id = network.nwk_update_id;
    nib.nwk_logical_channel = network.channel;
    nib.channel_list = network.channel_mask.0;
    nib.security_level = network.security_level;
    nib.nwk_manager_addr = Nwk::COORDINATOR;
    nib.nwk_coord_address = Nwk::COORDINATOR;
    adapter.write_nib(&nib)?;

    let key_desc = NwkKeyDesc {
        key_seq_num: network.key_sequence,
        key: network.network_key,
    };
    let key_items = NwkActiveKeyItems {
        active: key_desc,
        frame_counter: network.frame_counter,
    };

    let epid = network.extended_pan_id.to_bytes();
    nvram.osal_write(OsalNvId::APS_USE_EXT_PANID, &epid, true)?;
    nvram.osal_write(OsalNvId::EXTENDED_PAN_ID, &epid, true)?;
    nvram.osal_write(OsalNvId::PRECFGKEY, &network.network_key.0, true)?;
    nvram.osal_write(
        OsalNvId::CHANLIST,
        &network.channel_mask.0.to_le_bytes(),
        true,
    )?;
    nvram.osal_write(OsalNvId::EXTADDR, &node.ieee.to_bytes(), true)?;
    nvram.osal_write(OsalNvId::LOGICAL_TYPE, &[node.logical_type.raw()], true)?;
    nvram.osal_write(
        OsalNvId::NWK_ACTIVE_KEY_INFO,
        &key_desc.to_bytes(adapter.aligned),
        true,
    )?;
    nvram.osal_write(
        OsalNvId::NWK_ALTERN_KEY_INFO,
        &NwkKeyDesc::default().to_bytes(adapter.aligned),
        true,
    )?;

    if adapter.version == ZstackVersion::Z1_2 {
        // The 1.2 firmware keeps the counter inside NWKKEY
        nvram.osal_write(
            OsalNvId::NWKKEY,
            &key_items.to_bytes(adapter.aligned),
            true,
        )?;
        nvram.osal_write(
            OsalNvId::TCLK_SEED,
            &KeyData::default_tc_link_key().0,
            true,
        )?;
    } else if let Some(seed) = network.tclk_seed {
        nvram.osal_write(OsalNvId::TCLK_SEED, &seed.0, true)?;
    }

    security::write_tc_frame_counter(
        nvram,
        adapter.version,
        adapter.aligned,
        network.frame_counter,
        network.extended_pan_id,
    )?;

    if !children.is_empty() {
        log::debug!("Writing {} children and their keys", children.len());
        let seed = network.tclk_seed.unwrap_or(KeyData::EMPTY);
        let used_seed = security::write_devices(
            nvram,
            adapter.version,
            adapter.aligned,
            children,
            seed,
            security::FRAME_COUNTER_INCREMENT,
        )?;

        if adapter.version.is_zstack3() && Some(used_seed) != network.tclk_seed {
            nvram.osal_write(OsalNvId::TCLK_SEED, &used_seed.0, true)?;
        }
    }

    let marker = if adapter.version == ZstackVersion::Z1_2 {
        OsalNvId::HAS_CONFIGURED_ZSTACK1
    } else {
        OsalNvId::HAS_CONFIGURED_ZSTACK3
    };
    nvram.osal_write(marker, &[CONFIGURED_MARKER], true)?;

    log::debug!("Network state written");
    Ok(())
}

/// Have the firmware form a network on whatever is in NVRAM right now.
fn form_scratch_network(adapter: &Adapter) -> Result<()> {
    let started =
        adapter
            .bus
            .wait_for(|ind: &zdo::StateChangeInd| ind.state == DeviceState::StartedAsCoordinator);

    if adapter.version.is_zstack3() {
        let notification_waiter =
            adapter
                .bus
                .wait_for(|n: &app_config::BdbCommissioningNotification| {
                    n.remaining_modes == CommissioningMode::NONE
                });

        let rsp = adapter.bus.request(&app_config::BdbStartCommissioning {
            mode: CommissioningMode::NWK_FORMATION,
        })?;
        ensure_success(app_config::BdbStartCommissioning::NAME, rsp.status)?;

        let notification = notification_waiter.wait(COMMISSIONING_TIMEOUT)?;

        match notification.status {
            CommissioningStatus::Success | CommissioningStatus::NetworkRestored => {}
            other => {
                return Err(Error::State(format!(
                    "Network formation failed: {:?}. The RF environment may be too \
                     noisy; shield the coordinator until a network is formed",
                    other
                )));
            }
        }
    } else {
        // Z-Stack 1.2's StartupFromApp actually forms the network
        let rsp = adapter.bus.request(&zdo::StartupFromApp { start_delay: 100 })?;
        if rsp.state == crate::types::StartupState::NotStarted {
            return Err(Error::State("Network formation refused".to_string()));
        }
    }

    started.wait(COMMISSIONING_TIMEOUT)?;
    Ok(())
}

/// The device reports "started" before `_NIB.nwkState` leaves its init
/// state; poll until the channel and PAN id become real.
fn wait_for_nib(adapter: &Adapter) -> Result<Nib> {
    let deadline = Instant::now() + NIB_SETTLE_TIMEOUT;

    loop {
        match adapter.read_nib() {
            Ok(nib) => {
                log::trace!(
                    "Current NIB: channel={} pan=0x{:04X}",
                    nib.nwk_logical_channel,
                    nib.nwk_pan_id
                );

                if nib.nwk_logical_channel != 0 && nib.nwk_pan_id != 0xFFFE {
                    return Ok(nib);
                }
            }
            Err(Error::NvramMissing { .. }) => {}
            Err(e) => return Err(e),
        }

        if Instant::now() >= deadline {
            return Err(Error::State("NIB never stabilized".to_string()));
        }

        thread::sleep(Duration::from_secs(1));
    }
}

/// Bring the stack up on the network already present in NVRAM.
pub fn start_coordinator(adapter: &Adapter) -> Result<()> {
    let started =
        adapter
            .bus
            .wait_for(|ind: &zdo::StateChangeInd| ind.state == DeviceState::StartedAsCoordinator);

    let rsp = adapter.bus.request(&zdo::StartupFromApp { start_delay: 100 })?;

    // On Z-Stack 3 the response is meaningless (it just kicks off BDB);
    // on 1.2 "not started" is a real failure.
    if adapter.version == ZstackVersion::Z1_2
        && rsp.state == crate::types::StartupState::NotStarted
    {
        return Err(Error::State("Stack refused to start".to_string()));
    }

    started.wait(COMMISSIONING_TIMEOUT)?;
    Ok(())
}

/// An application endpoint to register with the stack.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub device_version: u8,
    pub input_clusters: Vec<u16>,
    pub output_clusters: Vec<u16>,
}

impl Endpoint {
    /// The standard Zigbee Home Automation endpoint.
    pub fn zha() -> Self {
        Self {
            endpoint: 1,
            profile_id: 0x0104,
            device_id: 0x0005,
            device_version: 0,
            input_clusters: vec![],
            output_clusters: vec![],
        }
    }
}

/// Register the application endpoints and subscribe to ZDO callbacks.
pub fn register_endpoints(adapter: &Adapter, endpoints: &[Endpoint]) -> Result<()> {
    for ep in endpoints {
        let rsp = adapter.bus.request(&af::Register {
            endpoint: ep.endpoint,
            profile_id: ep.profile_id,
            device_id: ep.device_id,
            device_version: ep.device_version,
            latency_req: 0,
            input_clusters: LvList(ep.input_clusters.clone()),
            output_clusters: LvList(ep.output_clusters.clone()),
        })?;

        match rsp.status {
            Status::Success => {}
            // Already registered from a previous run
            Status::ApsDuplicateEntry => {}
            other => return Err(Error::command_status(af::Register::NAME, other)),
        }
    }

    // One wildcard registration routes every ZDO cluster callback to us
    let rsp = adapter
        .bus
        .request(&zdo::MsgCallbackRegister { cluster_id: 0xFFFF })?;
    ensure_success(zdo::MsgCallbackRegister::NAME, rsp.status)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_config_resolution_randomises_unset() {
        let a = FormConfig::default().resolve();
        let b = FormConfig::default().resolve();

        assert_ne!(a.network_key, b.network_key);
        assert_ne!(a.extended_pan_id, b.extended_pan_id);
        assert_ne!(a.pan_id.0, 0x0000);
        assert_ne!(a.pan_id.0, 0xFFFF);
        assert_eq!(a.channel, 15);
    }

    #[test]
    fn test_form_config_respects_fixed_settings() {
        let config = FormConfig {
            channel_mask: Some(Channels::from_channel(11)),
            pan_id: Some(PanId(0x1A62)),
            extended_pan_id: Some(Ieee(0xDDDDDDDDDDDDDDDD)),
            network_key: Some(KeyData([1; 16])),
        };

        let resolved = config.resolve();
        assert_eq!(resolved.channel, 11);
        assert_eq!(resolved.channel_mask.single(), Some(11));
        assert_eq!(resolved.pan_id, PanId(0x1A62));
        assert_eq!(resolved.network_key, KeyData([1; 16]));
    }
}
