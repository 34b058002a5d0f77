//! MAC subsystem. The coordinator drives the MAC through the NWK layer, so
//! only the commands used for scans, resets and the confirms the firmware
//! volunteers are catalogued here.

use super::{mt_callback, mt_sreq};
use crate::types::{Bytes, Channels, Ieee, Nwk, PanId, Status};

mt_sreq! {
    /// Reset the MAC state machine.
    Mac/0x01 => ResetReq {
        pub set_default: bool,
    } -> ResetReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Initialise the MAC.
    Mac/0x02 => Init {} -> InitRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Start the device as a PAN coordinator or on an existing PAN.
    Mac/0x03 => StartReq {
        pub start_time: u32,
        pub pan_id: PanId,
        pub logical_channel: u8,
        pub channel_page: u8,
        pub beacon_order: u8,
        pub super_frame_order: u8,
        pub pan_coordinator: bool,
        pub battery_life_ext: bool,
        pub coord_realignment: bool,
        pub realign_key_source: [u8; 8],
        pub realign_security_level: u8,
        pub realign_key_id_mode: u8,
        pub realign_key_index: u8,
        pub beacon_key_source: [u8; 8],
        pub beacon_security_level: u8,
        pub beacon_key_id_mode: u8,
        pub beacon_key_index: u8,
    } -> StartReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Scan for beacons, energy or orphan realignments.
    Mac/0x0C => ScanReq {
        pub channels: Channels,
        /// 0 = energy, 1 = active, 2 = passive, 3 = orphan
        pub scan_type: u8,
        pub scan_duration: u8,
        pub channel_page: u8,
        pub max_results: u8,
        pub key_source: [u8; 8],
        pub security_level: u8,
        pub key_id_mode: u8,
        pub key_index: u8,
    } -> ScanReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Read a MAC PIB attribute.
    Mac/0x08 => GetReq {
        pub attribute: u8,
    } -> GetReqRsp {
        pub status: Status,
        pub data: [u8; 16],
    }
}

mt_sreq! {
    /// Write a MAC PIB attribute.
    Mac/0x09 => SetReq {
        pub attribute: u8,
        pub value: [u8; 16],
    } -> SetReqRsp {
        pub status: Status,
    }
}

mt_callback! {
    /// Beacon sync lost.
    Mac/0x80 => SyncLossInd {
        pub status: Status,
        pub pan_id: PanId,
        pub logical_channel: u8,
        pub channel_page: u8,
        pub key_source: [u8; 8],
        pub security_level: u8,
        pub key_id_mode: u8,
        pub key_index: u8,
    }
}

mt_callback! {
    /// A device requested association directly with the MAC.
    Mac/0x81 => AssociateInd {
        pub ieee: Ieee,
        pub capabilities: u8,
        pub key_source: [u8; 8],
        pub security_level: u8,
        pub key_id_mode: u8,
        pub key_index: u8,
    }
}

mt_callback! {
    /// Our own association attempt finished.
    Mac/0x82 => AssociateCnf {
        pub status: Status,
        pub nwk: Nwk,
        pub key_source: [u8; 8],
        pub security_level: u8,
        pub key_id_mode: u8,
        pub key_index: u8,
    }
}

mt_callback! {
    /// MAC data frame delivery result.
    Mac/0x84 => DataCnf {
        pub status: Status,
        pub handle: u8,
        pub timestamp: u32,
        pub timestamp2: u16,
    }
}

mt_callback! {
    /// Raw MAC data indication.
    Mac/0x85 => DataInd {
        pub data: Bytes,
    }
}

mt_callback! {
    /// An orphaned device announced itself.
    Mac/0x8A => OrphanInd {
        pub ieee: Ieee,
        pub key_source: [u8; 8],
        pub security_level: u8,
        pub key_id_mode: u8,
        pub key_index: u8,
    }
}

mt_callback! {
    /// A MAC scan finished. The result list layout depends on the scan
    /// type, so it stays raw.
    Mac/0x86 => ScanCnf {
        pub status: Status,
        pub ed_max_energy: u8,
        pub scan_type: u8,
        pub channel_page: u8,
        pub unscanned_channels: Channels,
        pub result_list_count: u8,
        pub result_list: Bytes,
    }
}

mt_callback! {
    /// Coordinator start finished.
    Mac/0x88 => StartCnf {
        pub status: Status,
    }
}

mt_callback! {
    /// Communication status, e.g. a security failure on receive.
    Mac/0x8D => CommStatusInd {
        pub status: Status,
        pub src_ieee: Ieee,
        pub dst_ieee: Ieee,
        pub timestamp: u32,
        pub dst_addr_mode: u8,
        pub reason: u8,
        pub key_source: [u8; 8],
        pub security_level: u8,
        pub key_id_mode: u8,
        pub key_index: u8,
    }
}
