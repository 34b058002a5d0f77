//! AF subsystem: the application framework data plane.

use super::{mt_callback, mt_sreq};
use crate::types::{
    AddrModeAddress, Bytes, LongBytes, LvList, Nwk, PanId, ShortBytes, Status, TxOptions,
};

mt_sreq! {
    /// Register an application endpoint so the stack delivers frames to it.
    Af/0x00 => Register {
        pub endpoint: u8,
        pub profile_id: u16,
        pub device_id: u16,
        pub device_version: u8,
        /// 0 = no latency, 1 = fast beacons, 2 = slow beacons
        pub latency_req: u8,
        pub input_clusters: LvList<u16>,
        pub output_clusters: LvList<u16>,
    } -> RegisterRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Send an application frame to a short address. The matching
    /// `DataConfirm` carries the same transaction sequence number.
    Af/0x01 => DataRequest {
        pub dst_addr: Nwk,
        pub dst_endpoint: u8,
        pub src_endpoint: u8,
        pub cluster_id: u16,
        pub tsn: u8,
        pub options: TxOptions,
        pub radius: u8,
        pub data: ShortBytes,
    } -> DataRequestRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Extended data request: group/IEEE/broadcast addressing, inter-PAN
    /// destinations and payloads over 128 bytes.
    Af/0x02 => DataRequestExt {
        pub dst_addr: AddrModeAddress,
        pub dst_endpoint: u8,
        /// 0x0000 keeps the frame intra-PAN
        pub dst_pan_id: PanId,
        pub src_endpoint: u8,
        pub cluster_id: u16,
        pub tsn: u8,
        pub options: TxOptions,
        pub radius: u8,
        pub data: LongBytes,
    } -> DataRequestExtRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Data request forced through an explicit relay list.
    Af/0x03 => DataRequestSrcRtg {
        pub dst_addr: Nwk,
        pub dst_endpoint: u8,
        pub src_endpoint: u8,
        pub cluster_id: u16,
        pub tsn: u8,
        pub options: TxOptions,
        pub radius: u8,
        pub source_route: LvList<Nwk>,
        pub data: ShortBytes,
    } -> DataRequestSrcRtgRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Inter-PAN channel and endpoint control.
    Af/0x10 => InterPanCtl {
        /// 0 = clear, 1 = set channel, 2 = register endpoint, 3 = check
        pub command: u8,
        pub data: Bytes,
    } -> InterPanCtlRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Stage a chunk of an oversized outgoing frame.
    Af/0x11 => DataStore {
        pub index: u16,
        pub data: ShortBytes,
    } -> DataStoreRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Retrieve a chunk of an oversized incoming frame. Length zero frees
    /// the stored message.
    Af/0x12 => DataRetrieve {
        pub timestamp: u32,
        pub index: u16,
        pub length: u8,
    } -> DataRetrieveRsp {
        pub status: Status,
        pub data: ShortBytes,
    }
}

mt_sreq! {
    /// Configure APS frame fragmentation for an endpoint.
    Af/0x13 => ApsfConfigSet {
        pub endpoint: u8,
        pub frame_delay: u8,
        pub window_size: u8,
    } -> ApsfConfigSetRsp {
        pub status: Status,
    }
}

mt_callback! {
    /// Delivery result for a previously sent data request, matched to it by
    /// the transaction sequence number.
    Af/0x80 => DataConfirm {
        pub status: Status,
        pub endpoint: u8,
        pub tsn: u8,
    }
}

mt_callback! {
    /// An application frame arrived on a registered endpoint.
    Af/0x81 => IncomingMsg {
        pub group_id: u16,
        pub cluster_id: u16,
        pub src_addr: Nwk,
        pub src_endpoint: u8,
        pub dst_endpoint: u8,
        pub was_broadcast: u8,
        pub lqi: u8,
        pub security_use: u8,
        pub timestamp: u32,
        pub tsn: u8,
        pub data: ShortBytes,
    }
}

mt_callback! {
    /// Inter-PAN variant of `IncomingMsg`, also used for frames over 128
    /// bytes (the payload is then fetched with `DataRetrieve`).
    Af/0x82 => IncomingMsgExt {
        pub group_id: u16,
        pub cluster_id: u16,
        pub src_addr: AddrModeAddress,
        pub src_endpoint: u8,
        pub src_pan_id: PanId,
        pub dst_endpoint: u8,
        pub was_broadcast: u8,
        pub lqi: u8,
        pub security_use: u8,
        pub timestamp: u32,
        pub tsn: u8,
        pub data: LongBytes,
    }
}

mt_callback! {
    /// Status report for an ongoing reflected (bound) transmission.
    Af/0x83 => ReflectError {
        pub status: Status,
        pub endpoint: u8,
        pub tsn: u8,
        pub dst_addr_mode: u8,
        pub dst_addr: Nwk,
    }
}
