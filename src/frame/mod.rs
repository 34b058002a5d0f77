//! MT frame model
//!
//! A frame on the wire is `SOF(0xFE) | LEN | CMD0 | CMD1 | DATA[LEN] | FCS`
//! where CMD0 packs the frame kind into its top three bits and the subsystem
//! into the bottom five, CMD1 is the command id, and FCS is the XOR of every
//! byte from LEN through the last data byte.

mod codec;

pub use codec::{encode_frame, FrameCodec, FrameStats};

use std::fmt;

/// Start-of-frame marker.
pub const SOF: u8 = 0xFE;

/// Maximum frame payload length.
pub const MAX_PAYLOAD: usize = 250;

/// The three MT frame kinds that travel in each direction, plus POLL.
/// Values 4 through 7 are reserved but still representable, so a valid
/// frame with a reserved kind parses instead of being rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Poll,
    Sreq,
    Areq,
    Srsp,
    Reserved(u8),
}

impl CommandKind {
    pub fn raw(self) -> u8 {
        match self {
            CommandKind::Poll => 0,
            CommandKind::Sreq => 1,
            CommandKind::Areq => 2,
            CommandKind::Srsp => 3,
            CommandKind::Reserved(v) => v & 0x07,
        }
    }

    pub fn from_raw(value: u8) -> Self {
        match value & 0x07 {
            0 => CommandKind::Poll,
            1 => CommandKind::Sreq,
            2 => CommandKind::Areq,
            3 => CommandKind::Srsp,
            other => CommandKind::Reserved(other),
        }
    }
}

/// MT subsystems. Values are the low five bits of CMD0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    RpcError,
    Sys,
    Mac,
    Nwk,
    Af,
    Zdo,
    Sapi,
    Util,
    Debug,
    App,
    Ota,
    Znp,
    UblFunc,
    AppConfig,
    Zgp,
    Reserved(u8),
}

impl Subsystem {
    pub fn raw(self) -> u8 {
        match self {
            Subsystem::RpcError => 0x00,
            Subsystem::Sys => 0x01,
            Subsystem::Mac => 0x02,
            Subsystem::Nwk => 0x03,
            Subsystem::Af => 0x04,
            Subsystem::Zdo => 0x05,
            Subsystem::Sapi => 0x06,
            Subsystem::Util => 0x07,
            Subsystem::Debug => 0x08,
            Subsystem::App => 0x09,
            Subsystem::Ota => 0x0A,
            Subsystem::Znp => 0x0B,
            Subsystem::UblFunc => 0x0D,
            Subsystem::AppConfig => 0x0F,
            Subsystem::Zgp => 0x15,
            Subsystem::Reserved(v) => v & 0x1F,
        }
    }

    pub fn from_raw(value: u8) -> Self {
        match value & 0x1F {
            0x00 => Subsystem::RpcError,
            0x01 => Subsystem::Sys,
            0x02 => Subsystem::Mac,
            0x03 => Subsystem::Nwk,
            0x04 => Subsystem::Af,
            0x05 => Subsystem::Zdo,
            0x06 => Subsystem::Sapi,
            0x07 => Subsystem::Util,
            0x08 => Subsystem::Debug,
            0x09 => Subsystem::App,
            0x0A => Subsystem::Ota,
            0x0B => Subsystem::Znp,
            0x0D => Subsystem::UblFunc,
            0x0F => Subsystem::AppConfig,
            0x15 => Subsystem::Zgp,
            other => Subsystem::Reserved(other),
        }
    }
}

/// CMD0/CMD1 pair identifying a command on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandHeader {
    pub kind: CommandKind,
    pub subsystem: Subsystem,
    pub id: u8,
}

impl CommandHeader {
    pub fn new(kind: CommandKind, subsystem: Subsystem, id: u8) -> Self {
        Self { kind, subsystem, id }
    }

    pub fn cmd0(&self) -> u8 {
        (self.kind.raw() << 5) | self.subsystem.raw()
    }

    pub fn cmd1(&self) -> u8 {
        self.id
    }

    pub fn from_wire(cmd0: u8, cmd1: u8) -> Self {
        Self {
            kind: CommandKind::from_raw(cmd0 >> 5),
            subsystem: Subsystem::from_raw(cmd0),
            id: cmd1,
        }
    }

    /// The SRSP header answering this SREQ header.
    pub fn srsp(&self) -> CommandHeader {
        CommandHeader {
            kind: CommandKind::Srsp,
            ..*self
        }
    }
}

impl fmt::Debug for CommandHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}(0x{:02X})", self.subsystem, self.kind, self.id)
    }
}

impl fmt::Display for CommandHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A decoded MT frame: header plus raw payload.
#[derive(Clone, PartialEq, Eq)]
pub struct MtFrame {
    pub header: CommandHeader,
    pub payload: Vec<u8>,
}

impl MtFrame {
    pub fn new(header: CommandHeader, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        Self { header, payload }
    }

    /// Serialised wire form, SOF through FCS.
    pub fn to_wire(&self) -> Vec<u8> {
        encode_frame(self)
    }
}

impl fmt::Debug for MtFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.header)?;
        for byte in &self.payload {
            write!(f, "{:02X}", byte)?;
        }
        write!(f, "]")
    }
}

impl fmt::Display for MtFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
