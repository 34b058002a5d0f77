//! SAPI subsystem: the simple API used by legacy hosts. The driver keeps
//! it mainly for `ZbReadConfiguration`, the fallback path for NV items the
//! security policy hides from `OSALNVReadExt`.

use super::{mt_callback, mt_sreq};
use crate::types::{Ieee, Nwk, ShortBytes, Status};

mt_sreq! {
    /// Reset via the simple API.
    Sapi/0x09 => ZbSystemReset {} -> ZbSystemResetRsp {}
}

mt_sreq! {
    /// Start the simple API application.
    Sapi/0x00 => ZbStartRequest {} -> ZbStartRequestRsp {}
}

mt_sreq! {
    /// Permit joining through the simple API.
    Sapi/0x08 => ZbPermitJoiningRequest {
        pub dst: Nwk,
        pub timeout: u8,
    } -> ZbPermitJoiningRequestRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Create or remove a binding.
    Sapi/0x01 => ZbBindDevice {
        pub create: bool,
        pub command_id: u16,
        pub ieee: Ieee,
    } -> ZbBindDeviceRsp {}
}

mt_sreq! {
    /// Allow other devices to bind to us.
    Sapi/0x02 => ZbAllowBind {
        pub timeout: u8,
    } -> ZbAllowBindRsp {}
}

mt_sreq! {
    /// Send data through the simple API.
    Sapi/0x03 => ZbSendDataRequest {
        pub dst: Nwk,
        pub command_id: u16,
        pub handle: u8,
        pub ack: bool,
        pub radius: u8,
        pub data: ShortBytes,
    } -> ZbSendDataRequestRsp {}
}

mt_sreq! {
    /// Read a configuration property. The id space overlaps the low byte
    /// of the OSAL NV id space.
    Sapi/0x04 => ZbReadConfiguration {
        pub config_id: u8,
    } -> ZbReadConfigurationRsp {
        pub status: Status,
        pub config_id: u8,
        pub value: ShortBytes,
    }
}

mt_sreq! {
    /// Write a configuration property.
    Sapi/0x05 => ZbWriteConfiguration {
        pub config_id: u8,
        pub value: ShortBytes,
    } -> ZbWriteConfigurationRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Read device info fields (addresses, state, channel...).
    Sapi/0x06 => ZbGetDeviceInfo {
        pub param: u8,
    } -> ZbGetDeviceInfoRsp {
        pub param: u8,
        pub value: [u8; 8],
    }
}

mt_sreq! {
    /// Search for a device by IEEE address.
    Sapi/0x07 => ZbFindDeviceRequest {
        pub search_key: Ieee,
    } -> ZbFindDeviceRequestRsp {}
}

mt_callback! {
    /// The simple API application started.
    Sapi/0x80 => ZbStartConfirm {
        pub status: Status,
    }
}

mt_callback! {
    /// A binding operation finished.
    Sapi/0x81 => ZbBindConfirm {
        pub command_id: u16,
        pub status: Status,
    }
}

mt_callback! {
    /// Another device bound to us.
    Sapi/0x82 => ZbAllowBindConfirm {
        pub source: Nwk,
    }
}

mt_callback! {
    /// A simple API data request finished.
    Sapi/0x83 => ZbSendDataConfirm {
        pub handle: u8,
        pub status: Status,
    }
}

mt_callback! {
    /// Incoming simple API data.
    Sapi/0x87 => ZbReceiveDataIndication {
        pub source: Nwk,
        pub command_id: u16,
        pub data: crate::types::LongBytes,
    }
}

mt_callback! {
    /// Result of a device search.
    Sapi/0x85 => ZbFindDeviceConfirm {
        pub search_type: u8,
        pub result: Nwk,
        pub search_key: Ieee,
    }
}
