//! UBL subsystem: the CC2531 serial bootloader. All commands are AREQs;
//! each request is answered by the indication with the high bit set.

use super::{mt_areq, mt_callback};
use crate::types::wire_enum;
use crate::types::{Bytes, Decode, DecodeError, Encode, Reader};

/// Flash image size available to applications: total flash less the boot
/// loader, NV pages and lock bits.
pub const IMAGE_SIZE: usize = 0x40000 - 0x2000 - 0x3000 - 0x0800;

/// Offset of the embedded CRC pair inside the image.
pub const IMAGE_CRC_OFFSET: usize = 0x90;

/// Bytes per flash word when converting addresses.
pub const FLASH_WORD_SIZE: usize = 4;

/// Byte written on the serial line to force the bootloader to stay resident
/// after reset.
pub const BOOTLOADER_FORCE_BOOT: u8 = 0x10;

/// Byte written to skip the bootloader and run the application.
pub const BOOTLOADER_FORCE_RUN: u8 = !BOOTLOADER_FORCE_BOOT;

wire_enum! {
    /// Bootloader operation results.
    pub enum BootloaderStatus: u8 {
        Success = 0x00,
        Failure = 0x01,
        InvalidFcs = 0x02,
        InvalidFile = 0x03,
        FilesystemError = 0x04,
        AlreadyStarted = 0x05,
        NoResponse = 0x06,
        ValidateFailed = 0x07,
        Canceled = 0x08,
    }
}

wire_enum! {
    /// Chip family reported by the bootloader handshake.
    pub enum BootloaderDeviceType: u8 {
        Cc2538 = 0x01,
        Cc2530 = 0x02,
    }
}

mt_areq! {
    /// Write one buffer of flash words.
    UblFunc/0x01 => WriteReq {
        pub flash_word_addr: u16,
        pub data: Bytes,
    }
}

mt_callback! {
    /// Result of a `WriteReq`.
    UblFunc/0x81 => WriteRsp {
        pub status: BootloaderStatus,
    }
}

mt_areq! {
    /// Read one buffer of flash words.
    UblFunc/0x02 => ReadReq {
        pub flash_word_addr: u16,
    }
}

mt_callback! {
    /// Result of a `ReadReq`. Address and data are missing when the
    /// request was rejected.
    UblFunc/0x82 => ReadRsp {
        pub status: BootloaderStatus,
        pub flash_word_addr: Option<u16>,
        pub data: Option<Bytes>,
    }
}

mt_areq! {
    /// Validate the downloaded image and hand control to it.
    UblFunc/0x03 => EnableReq {}
}

mt_callback! {
    /// Result of an `EnableReq`.
    UblFunc/0x83 => EnableRsp {
        pub status: BootloaderStatus,
    }
}

mt_areq! {
    /// Probe the bootloader and fetch its buffer geometry.
    UblFunc/0x04 => HandshakeReq {}
}

mt_callback! {
    /// Result of a `HandshakeReq`.
    UblFunc/0x84 => HandshakeRsp {
        pub status: BootloaderStatus,
        pub bootloader_revision: u32,
        pub device_type: BootloaderDeviceType,
        pub buffer_size: u32,
        pub page_size: u32,
        pub bootloader_code_revision: u32,
    }
}
