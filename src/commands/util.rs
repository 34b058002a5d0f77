//! UTIL subsystem: device info, persistent network parameters, LEDs and
//! association table access.

use super::{mt_callback, mt_sreq};
use crate::types::{
    Bytes, Channels, DeviceState, Ieee, KeyData, LedMode, LvList, NodeRelation, Nwk, PanId, Status,
};

mt_sreq! {
    /// Read the device's addresses, type and state.
    Util/0x00 => GetDeviceInfo {} -> GetDeviceInfoRsp {
        pub status: Status,
        pub ieee: Ieee,
        pub nwk: Nwk,
        /// bit 0 coordinator, bit 1 router, bit 2 end device
        pub device_type: u8,
        pub device_state: DeviceState,
        pub associated_devices: LvList<Nwk>,
    }
}

mt_sreq! {
    /// Read the startup network parameters from NV.
    Util/0x01 => GetNvInfo {} -> GetNvInfoRsp {
        pub status: Status,
        pub ieee: Ieee,
        /// Stored big-endian by the firmware, unlike every other field
        pub scan_channels: u32,
        pub pan_id: PanId,
        pub security_level: u8,
        pub preconfig_key: KeyData,
    }
}

mt_sreq! {
    /// Store the PAN id to use on the next start.
    Util/0x02 => SetPanId {
        pub pan_id: PanId,
    } -> SetPanIdRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Store the channel mask to scan on the next start.
    Util/0x03 => SetChannels {
        pub channels: Channels,
    } -> SetChannelsRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Store the security level.
    Util/0x04 => SetSecurityLevel {
        pub security_level: u8,
    } -> SetSecurityLevelRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Store the preconfigured network key.
    Util/0x05 => SetPreConfigKey {
        pub preconfig_key: KeyData,
    } -> SetPreConfigKeyRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Subscribe or unsubscribe a whole subsystem's callbacks.
    Util/0x06 => CallbackSubCmd {
        pub subsystem_id: u16,
        pub action: bool,
    } -> CallbackSubCmdRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Inject a key event into the registered application.
    Util/0x07 => KeyEvent {
        pub keys: u8,
        pub shift: bool,
    } -> KeyEventRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Seconds since the last reset.
    Util/0x09 => TimeAlive {} -> TimeAliveRsp {
        pub seconds: u32,
    }
}

mt_sreq! {
    /// Drive a board LED (0xFF addresses all of them). Firmware compiled
    /// without LED support never answers this request.
    Util/0x0A => LedControl {
        pub led: u8,
        pub mode: LedMode,
    } -> LedControlRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Echo test through the MT interface.
    Util/0x10 => Loopback {
        pub data: Bytes,
    } -> LoopbackRsp {
        pub data: Bytes,
    }
}

mt_sreq! {
    /// Trigger a MAC MLME poll.
    Util/0x11 => DataReq {
        pub security_use: bool,
    } -> DataReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Enable source matching on the radio.
    Util/0x20 => SrcMatchEnable {} -> SrcMatchEnableRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Add an entry to the source-match table.
    Util/0x21 => SrcMatchAddEntry {
        pub addr_mode: u8,
        pub address: Ieee,
        pub pan_id: PanId,
    } -> SrcMatchAddEntryRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Remove an entry from the source-match table.
    Util/0x22 => SrcMatchDelEntry {
        pub addr_mode: u8,
        pub address: Ieee,
        pub pan_id: PanId,
    } -> SrcMatchDelEntryRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Look up the IEEE address for an address-manager index.
    Util/0x40 => AddrMgrExtAddrLookup {
        pub nwk: Nwk,
    } -> AddrMgrExtAddrLookupRsp {
        pub ieee: Ieee,
    }
}

mt_sreq! {
    /// Look up the short address for an IEEE address.
    Util/0x41 => AddrMgrNwkAddrLookup {
        pub ieee: Ieee,
    } -> AddrMgrNwkAddrLookupRsp {
        pub nwk: Nwk,
    }
}

mt_sreq! {
    /// Read APS link key data for a device.
    Util/0x44 => ApsmeLinkKeyDataGet {
        pub ieee: Ieee,
    } -> ApsmeLinkKeyDataGetRsp {
        pub status: Status,
        pub sec_key: KeyData,
        pub tx_frm_cntr: u32,
        pub rx_frm_cntr: u32,
    }
}

mt_sreq! {
    /// Find the NV id holding a device's APS link key.
    Util/0x45 => ApsmeLinkKeyNvIdGet {
        pub ieee: Ieee,
    } -> ApsmeLinkKeyNvIdGetRsp {
        pub status: Status,
        pub link_key_nv_id: u16,
    }
}

mt_sreq! {
    /// Request a key from the trust center.
    Util/0x4B => ApsmeRequestKeyCmd {
        pub partner_addr: Ieee,
    } -> ApsmeRequestKeyCmdRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Number of entries in the association table.
    Util/0x48 => AssocCount {
        pub start_relation: NodeRelation,
        pub end_relation: NodeRelation,
    } -> AssocCountRsp {
        pub count: u16,
    }
}

mt_sreq! {
    /// Read an association table entry by index. The device structure's
    /// layout depends on the chip's struct alignment, so it stays raw here.
    Util/0x49 => AssocFindDevice {
        pub index: u8,
    } -> AssocFindDeviceRsp {
        pub device: Bytes,
    }
}

mt_sreq! {
    /// Read an association table entry by address.
    Util/0x4A => AssocGetWithAddress {
        pub ieee: Ieee,
        pub nwk: Nwk,
    } -> AssocGetWithAddressRsp {
        pub device: Bytes,
    }
}

mt_sreq! {
    /// Remove an association table entry (Z-Stack 3.30+ builds only).
    Util/0x63 => AssocRemove {
        pub ieee: Ieee,
    } -> AssocRemoveRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Restore an association table entry.
    Util/0x64 => AssocAdd {
        pub nwk: Nwk,
        pub ieee: Ieee,
        pub node_relation: NodeRelation,
    } -> AssocAddRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Add an entry to the binding table.
    Util/0x4D => BindAddEntry {
        pub addr_mode: u8,
        pub dst_addr: Ieee,
        pub dst_endpoint: u8,
        pub cluster_ids: LvList<u16>,
    } -> BindAddEntryRsp {
        pub binding_entry: Bytes,
    }
}

mt_sreq! {
    /// Generate secure random bytes on the radio.
    Util/0x4C => SrngGen {} -> SrngGenRsp {
        pub random_numbers: [u8; 100],
    }
}

mt_callback! {
    /// Key establishment state change.
    Util/0xE1 => ZclKeyEstInd {
        pub task_id: u8,
        pub event: u8,
        pub status: Status,
        pub wait_time: u8,
        pub suite: u16,
    }
}

/// The association device structure's node relation.
///
/// The full structure layout differs between packed and aligned builds, but
/// the leading `shortAddr`/`addrIdx`/`nodeRelation` fields line up the same
/// way in both, so only those are extracted.
pub fn assoc_device_node_relation(device: &[u8]) -> Option<NodeRelation> {
    device.get(4).map(|raw| NodeRelation::from(*raw))
}

/// The association device structure's short address.
pub fn assoc_device_short_addr(device: &[u8]) -> Option<Nwk> {
    let bytes = device.get(0..2)?;
    Some(Nwk(u16::from_le_bytes(bytes.try_into().unwrap())))
}
