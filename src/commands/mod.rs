//! Typed MT command catalogue.
//!
//! Every command the firmware understands is declared with one of three
//! macros, giving it a request struct and, where applicable, a response or
//! indication struct whose byte layout is derived from the field list:
//!
//! - [`mt_sreq!`]: synchronous request plus its SRSP response
//! - [`mt_areq!`]: asynchronous outgoing request with no reply frame
//! - [`mt_callback!`]: asynchronous indication sent by the firmware
//!
//! Adding a command is data-only: declare its fields and it becomes
//! routable. Commands the catalogue does not know still reach subscribers
//! as raw [`MtFrame`]s.

pub mod af;
pub mod app;
pub mod app_config;
pub mod mac;
pub mod rpc_error;
pub mod sapi;
pub mod sys;
pub mod ubl;
pub mod util;
pub mod zdo;
pub mod zgp;

use crate::error::Error;
use crate::frame::{CommandHeader, CommandKind, MtFrame, Subsystem};
use crate::types::{DecodeError, Reader};

/// Field-level payload codec shared by requests, responses and indications.
pub trait Payload: Sized {
    fn encode_payload(&self, buf: &mut Vec<u8>);
    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, DecodeError>;
}

/// A command with a fixed wire identity.
pub trait MtCommand: Payload + Send + Sync + Clone + std::fmt::Debug + 'static {
    /// Dotted name used in errors and logs, e.g. `Sys.Ping`.
    const NAME: &'static str;
    const SUBSYSTEM: Subsystem;
    const ID: u8;
    const KIND: CommandKind;

    fn header() -> CommandHeader {
        CommandHeader::new(Self::KIND, Self::SUBSYSTEM, Self::ID)
    }

    fn to_frame(&self) -> MtFrame {
        let mut payload = Vec::new();
        self.encode_payload(&mut payload);
        MtFrame::new(Self::header(), payload)
    }

    /// Decode a frame, validating the header and full payload consumption.
    fn from_frame(frame: &MtFrame) -> Result<Self, Error> {
        if frame.header != Self::header() {
            return Err(Error::field_decode(Self::NAME, frame));
        }

        let mut r = Reader::new(&frame.payload);
        let decoded =
            Self::decode_payload(&mut r).map_err(|_| Error::field_decode(Self::NAME, frame))?;
        r.finish().map_err(|_| Error::field_decode(Self::NAME, frame))?;
        Ok(decoded)
    }
}

/// SREQ: answered by exactly one SRSP with the same subsystem and id.
pub trait SyncRequest: MtCommand {
    type Rsp: MtCommand;
}

/// AREQ sent from host to firmware; nothing comes back.
pub trait AsyncRequest: MtCommand {}

/// AREQ sent from firmware to host: an indication.
pub trait Callback: MtCommand {}

/// Declare the payload struct and its field codec.
macro_rules! mt_payload {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl $crate::commands::Payload for $name {
            fn encode_payload(&self, _buf: &mut Vec<u8>) {
                $( $crate::types::Encode::encode(&self.$field, _buf); )*
            }

            fn decode_payload(
                _r: &mut $crate::types::Reader<'_>,
            ) -> Result<Self, $crate::types::DecodeError> {
                Ok(Self { $( $field: $crate::types::Decode::decode(_r)?, )* })
            }
        }
    };
}

macro_rules! mt_identity {
    ($name:ident, $kind:ident, $subsys:ident, $id:expr) => {
        impl $crate::commands::MtCommand for $name {
            const NAME: &'static str =
                concat!(stringify!($subsys), ".", stringify!($name));
            const SUBSYSTEM: $crate::frame::Subsystem = $crate::frame::Subsystem::$subsys;
            const ID: u8 = $id;
            const KIND: $crate::frame::CommandKind = $crate::frame::CommandKind::$kind;
        }
    };
}

/// Declare a synchronous request and its response.
macro_rules! mt_sreq {
    (
        $(#[$meta:meta])*
        $subsys:ident / $id:expr => $name:ident {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty, )*
        } -> $rsp:ident {
            $( $(#[$rmeta:meta])* pub $rfield:ident : $rty:ty, )*
        }
    ) => {
        $crate::commands::mt_payload! {
            $(#[$meta])*
            pub struct $name {
                $( $(#[$fmeta])* pub $field: $ty, )*
            }
        }

        $crate::commands::mt_payload! {
            /// SRSP payload answering the paired request.
            pub struct $rsp {
                $( $(#[$rmeta])* pub $rfield: $rty, )*
            }
        }

        $crate::commands::mt_identity!($name, Sreq, $subsys, $id);
        $crate::commands::mt_identity!($rsp, Srsp, $subsys, $id);

        impl $crate::commands::SyncRequest for $name {
            type Rsp = $rsp;
        }
    };
}

/// Declare an asynchronous outgoing request.
macro_rules! mt_areq {
    (
        $(#[$meta:meta])*
        $subsys:ident / $id:expr => $name:ident {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty, )*
        }
    ) => {
        $crate::commands::mt_payload! {
            $(#[$meta])*
            pub struct $name {
                $( $(#[$fmeta])* pub $field: $ty, )*
            }
        }

        $crate::commands::mt_identity!($name, Areq, $subsys, $id);

        impl $crate::commands::AsyncRequest for $name {}
    };
}

/// Declare an asynchronous indication from the firmware.
macro_rules! mt_callback {
    (
        $(#[$meta:meta])*
        $subsys:ident / $id:expr => $name:ident {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty, )*
        }
    ) => {
        $crate::commands::mt_payload! {
            $(#[$meta])*
            pub struct $name {
                $( $(#[$fmeta])* pub $field: $ty, )*
            }
        }

        $crate::commands::mt_identity!($name, Areq, $subsys, $id);

        impl $crate::commands::Callback for $name {}
    };
}

pub(crate) use {mt_areq, mt_callback, mt_identity, mt_payload, mt_sreq};

#[cfg(test)]
mod tests {
    use super::sys;
    use super::{MtCommand, SyncRequest};
    use crate::frame::{CommandKind, Subsystem};
    use crate::types::{Capabilities, Status};

    #[test]
    fn test_header_identity() {
        assert_eq!(sys::Ping::SUBSYSTEM, Subsystem::Sys);
        assert_eq!(sys::Ping::ID, 0x01);
        assert_eq!(sys::Ping::KIND, CommandKind::Sreq);
        assert_eq!(sys::PingRsp::KIND, CommandKind::Srsp);
        assert_eq!(sys::Ping::header().srsp(), sys::PingRsp::header());
        assert_eq!(sys::Ping::NAME, "Sys.Ping");
    }

    #[test]
    fn test_request_round_trip() {
        let req = sys::OsalNvRead {
            id: 0x0021,
            offset: 4,
        };
        let frame = req.to_frame();
        assert_eq!(frame.payload, vec![0x21, 0x00, 0x04]);
        assert_eq!(sys::OsalNvRead::from_frame(&frame).unwrap(), req);
    }

    #[test]
    fn test_response_decode() {
        let rsp = sys::PingRsp {
            capabilities: Capabilities::SYS | Capabilities::AF,
        };
        let frame = rsp.to_frame();
        let decoded = <sys::Ping as SyncRequest>::Rsp::from_frame(&frame).unwrap();
        assert_eq!(decoded, rsp);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let rsp = sys::OsalNvLengthRsp { item_len: 8 };
        let mut frame = rsp.to_frame();
        frame.payload.push(0xFF);
        assert!(sys::OsalNvLengthRsp::from_frame(&frame).is_err());
    }

    #[test]
    fn test_optional_response_tail() {
        // Old firmware omits the code revision and bootloader fields
        let short = sys::VersionRsp {
            transport_rev: 2,
            product_id: 1,
            major_rel: 2,
            minor_rel: 7,
            maint_rel: 1,
            code_revision: None,
            bootloader_build_type: None,
            bootloader_revision: None,
        };
        let frame = short.to_frame();
        assert_eq!(frame.payload.len(), 5);
        assert_eq!(sys::VersionRsp::from_frame(&frame).unwrap(), short);

        let full = sys::VersionRsp {
            code_revision: Some(20210708),
            bootloader_build_type: Some(0),
            bootloader_revision: Some(0xFFFFFFFF),
            ..short
        };
        let frame = full.to_frame();
        assert_eq!(sys::VersionRsp::from_frame(&frame).unwrap(), full);
    }

    #[test]
    fn test_status_only_response() {
        let rsp = sys::OsalNvWriteRsp {
            status: Status::Success,
        };
        assert_eq!(rsp.to_frame().payload, vec![0x00]);
    }
}
