//! RPC error responses sent when the firmware does not recognise a request.

use super::mt_payload;
use crate::frame::{CommandKind, Subsystem};
use crate::types::wire_enum;
use crate::types::{Decode, DecodeError, Encode, Reader};

wire_enum! {
    /// Reason the firmware rejected the request.
    pub enum ErrorCode: u8 {
        InvalidSubsystem = 0x01,
        InvalidCommandId = 0x02,
        InvalidParameter = 0x03,
        InvalidLength = 0x04,
    }
}

mt_payload! {
    /// SRSP the firmware emits instead of the real response when the
    /// request's subsystem or id is unknown to it. The echoed header lets
    /// the bus resolve the right waiter.
    pub struct CommandNotRecognized {
        pub error_code: ErrorCode,
        pub request_cmd0: u8,
        pub request_cmd1: u8,
    }
}

impl crate::commands::MtCommand for CommandNotRecognized {
    const NAME: &'static str = "RpcError.CommandNotRecognized";
    const SUBSYSTEM: Subsystem = Subsystem::RpcError;
    const ID: u8 = 0x00;
    const KIND: CommandKind = CommandKind::Srsp;
}
