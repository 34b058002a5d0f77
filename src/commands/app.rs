//! APP subsystem: passthrough to an application task on the device.

use super::mt_sreq;
use crate::types::{Nwk, ShortBytes, Status};

mt_sreq! {
    /// Forward a message to an application endpoint on the device.
    App/0x00 => Msg {
        pub app_endpoint: u8,
        pub dst: Nwk,
        pub dst_endpoint: u8,
        pub cluster_id: u16,
        pub data: ShortBytes,
    } -> MsgRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Trigger a test event in the user application.
    App/0x01 => UserTest {
        pub src_endpoint: u8,
        pub command_id: u16,
        pub parameter1: u16,
        pub parameter2: u16,
    } -> UserTestRsp {
        pub status: Status,
    }
}
