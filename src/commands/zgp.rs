//! ZGP subsystem: Green Power proxy commands.

use super::{mt_callback, mt_sreq};
use crate::types::{Ieee, KeyData, LongBytes, ShortBytes, Status};

mt_sreq! {
    /// Queue a Green Power data frame.
    Zgp/0x01 => DataReq {
        pub action: bool,
        pub tx_options: u8,
        pub application_id: u8,
        pub src_id: u32,
        pub gpd_ieee: Ieee,
        pub endpoint: u8,
        pub command_id: u8,
        pub asdu: ShortBytes,
        pub handle: u8,
        pub life_time: u32,
    } -> DataReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Provide security material for a GPD in answer to `SecReq`.
    Zgp/0x02 => SecRsp {
        pub status: u8,
        pub handle: u8,
        pub application_id: u8,
        pub src_id: u32,
        pub gpd_ieee: Ieee,
        pub endpoint: u8,
        pub security_level: u8,
        pub key_type: u8,
        pub key: KeyData,
        pub frame_counter: u32,
    } -> SecRspRsp {
        pub status: Status,
    }
}

mt_callback! {
    /// A queued Green Power frame was sent (or expired).
    Zgp/0x05 => DataCnf {
        pub status: Status,
        pub handle: u8,
    }
}

mt_callback! {
    /// The proxy needs security material for a GPD.
    Zgp/0x03 => SecReq {
        pub application_id: u8,
        pub src_id: u32,
        pub gpd_ieee: Ieee,
        pub endpoint: u8,
        pub security_level: u8,
        pub key_type: u8,
        pub frame_counter: u32,
        pub handle: u8,
    }
}

mt_callback! {
    /// An incoming Green Power frame.
    Zgp/0x04 => DataInd {
        pub status: u8,
        pub rssi: i8,
        pub lqi: u8,
        pub seq_num: u8,
        pub src_id: u32,
        pub frame: LongBytes,
    }
}
