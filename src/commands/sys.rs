//! SYS subsystem: reset, ping, version, NV access, diagnostics.

use super::{mt_areq, mt_callback, mt_sreq};
use crate::types::{Capabilities, LongBytes, ResetReason, ResetType, ShortBytes, Status};

mt_areq! {
    /// Reset the device. A soft reset jumps to the reset vector; a hard
    /// reset goes through the watchdog and also resets the USB interface on
    /// CC2531 sticks.
    Sys/0x00 => ResetReq {
        pub ty: ResetType,
    }
}

mt_sreq! {
    /// Verify the device is active and fetch the MT interfaces it handles.
    Sys/0x01 => Ping {} -> PingRsp {
        pub capabilities: Capabilities,
    }
}

mt_sreq! {
    /// Read the firmware version descriptor.
    Sys/0x02 => Version {} -> VersionRsp {
        pub transport_rev: u8,
        pub product_id: u8,
        pub major_rel: u8,
        pub minor_rel: u8,
        pub maint_rel: u8,
        /// Build id; recent firmware uses the build date. Absent on old builds.
        pub code_revision: Option<u32>,
        pub bootloader_build_type: Option<u8>,
        pub bootloader_revision: Option<u32>,
    }
}

mt_sreq! {
    /// Set the device's IEEE address.
    Sys/0x03 => SetExtAddr {
        pub ext_addr: crate::types::Ieee,
    } -> SetExtAddrRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Read the device's IEEE address.
    Sys/0x04 => GetExtAddr {} -> GetExtAddrRsp {
        pub ext_addr: crate::types::Ieee,
    }
}

mt_sreq! {
    /// Read target RAM.
    Sys/0x05 => RamRead {
        pub address: u16,
        pub len: u8,
    } -> RamReadRsp {
        pub status: Status,
        pub value: ShortBytes,
    }
}

mt_sreq! {
    /// Write target RAM.
    Sys/0x06 => RamWrite {
        pub address: u16,
        pub value: ShortBytes,
    } -> RamWriteRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Create an NV item if it does not exist, optionally seeding the first
    /// bytes. Larger items are finished with `OsalNvWriteExt`.
    Sys/0x07 => OsalNvItemInit {
        pub id: u16,
        pub item_len: u16,
        pub value: ShortBytes,
    } -> OsalNvItemInitRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Read an NV item at an 8-bit offset.
    Sys/0x08 => OsalNvRead {
        pub id: u16,
        pub offset: u8,
    } -> OsalNvReadRsp {
        pub status: Status,
        pub value: ShortBytes,
    }
}

mt_sreq! {
    /// Write an NV item at an 8-bit offset.
    Sys/0x09 => OsalNvWrite {
        pub id: u16,
        pub offset: u8,
        pub value: ShortBytes,
    } -> OsalNvWriteRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Start one of the four firmware timer events.
    Sys/0x0A => OsalStartTimer {
        pub id: u8,
        pub timeout_ms: u16,
    } -> OsalStartTimerRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Stop a firmware timer event.
    Sys/0x0B => OsalStopTimer {
        pub id: u8,
    } -> OsalStopTimerRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Fetch a random 16-bit value from the radio's RNG.
    Sys/0x0C => Random {} -> RandomRsp {
        pub value: u16,
    }
}

mt_sreq! {
    /// Sample an ADC channel.
    Sys/0x0D => AdcRead {
        pub channel: u8,
        pub resolution: u8,
    } -> AdcReadRsp {
        pub value: u16,
    }
}

mt_sreq! {
    /// Operate the four GPIO pins of the ZNP build.
    Sys/0x0E => Gpio {
        pub operation: u8,
        pub value: u8,
    } -> GpioRsp {
        pub value: u8,
    }
}

mt_sreq! {
    /// Tune stack internals at runtime.
    Sys/0x0F => StackTune {
        pub operation: u8,
        pub value: u8,
    } -> StackTuneRsp {
        pub value: u8,
    }
}

mt_sreq! {
    /// Set the device clock.
    Sys/0x10 => SetTime {
        pub utc_time: u32,
        pub hour: u8,
        pub minute: u8,
        pub second: u8,
        pub month: u8,
        pub day: u8,
        pub year: u16,
    } -> SetTimeRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Read the device clock.
    Sys/0x11 => GetTime {} -> GetTimeRsp {
        pub utc_time: u32,
        pub hour: u8,
        pub minute: u8,
        pub second: u8,
        pub month: u8,
        pub day: u8,
        pub year: u16,
    }
}

mt_sreq! {
    /// Delete an NV item. The length must match the stored length.
    Sys/0x12 => OsalNvDelete {
        pub id: u16,
        pub item_len: u16,
    } -> OsalNvDeleteRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Read an NV item's length. Zero means the item does not exist.
    Sys/0x13 => OsalNvLength {
        pub id: u16,
    } -> OsalNvLengthRsp {
        pub item_len: u16,
    }
}

mt_sreq! {
    /// Set the radio TX power. Old firmware echoes the applied power in the
    /// status byte; Z-Stack 3.30+ returns a real status.
    Sys/0x14 => SetTxPower {
        pub tx_power: i8,
    } -> SetTxPowerRsp {
        pub status_or_power: u8,
    }
}

mt_sreq! {
    /// Configure jamming detection.
    Sys/0x15 => SetJammerParameters {
        pub continuous_events: u16,
        pub high_noise_level: u8,
        pub detect_period_time: u32,
    } -> SetJammerParametersRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Initialise the diagnostics table in NV.
    Sys/0x17 => ZDiagsInitStats {} -> ZDiagsInitStatsRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Clear the diagnostics table.
    Sys/0x18 => ZDiagsClearStats {
        pub clear_nv: bool,
    } -> ZDiagsClearStatsRsp {
        pub sys_clock: u32,
    }
}

mt_sreq! {
    /// Read one diagnostics attribute.
    Sys/0x19 => ZDiagsGetStats {
        pub attribute_id: u16,
    } -> ZDiagsGetStatsRsp {
        pub value: u32,
    }
}

mt_sreq! {
    /// Restore the diagnostics table from NV.
    Sys/0x1A => ZDiagsRestoreStatsNv {} -> ZDiagsRestoreStatsNvRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Persist the diagnostics table to NV.
    Sys/0x1B => ZDiagsSaveStatsToNv {} -> ZDiagsSaveStatsToNvRsp {
        pub sys_clock: u32,
    }
}

mt_sreq! {
    /// Read an NV item at a 16-bit offset.
    Sys/0x1C => OsalNvReadExt {
        pub id: u16,
        pub offset: u16,
    } -> OsalNvReadExtRsp {
        pub status: Status,
        pub value: ShortBytes,
    }
}

mt_sreq! {
    /// Write an NV item at a 16-bit offset.
    Sys/0x1D => OsalNvWriteExt {
        pub id: u16,
        pub offset: u16,
        pub value: LongBytes,
    } -> OsalNvWriteExtRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Create an item in the extended NV store.
    Sys/0x30 => NvCreate {
        pub sys_id: u8,
        pub item_id: u16,
        pub sub_id: u16,
        pub length: u32,
    } -> NvCreateRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Delete an item from the extended NV store.
    Sys/0x31 => NvDelete {
        pub sys_id: u8,
        pub item_id: u16,
        pub sub_id: u16,
    } -> NvDeleteRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Read an extended NV item's length. Zero means it does not exist.
    Sys/0x32 => NvLength {
        pub sys_id: u8,
        pub item_id: u16,
        pub sub_id: u16,
    } -> NvLengthRsp {
        pub length: u32,
    }
}

mt_sreq! {
    /// Read a chunk of an extended NV item.
    Sys/0x33 => NvRead {
        pub sys_id: u8,
        pub item_id: u16,
        pub sub_id: u16,
        pub offset: u16,
        pub length: u8,
    } -> NvReadRsp {
        pub status: Status,
        pub value: ShortBytes,
    }
}

mt_sreq! {
    /// Write a chunk of an extended NV item.
    Sys/0x34 => NvWrite {
        pub sys_id: u8,
        pub item_id: u16,
        pub sub_id: u16,
        pub offset: u16,
        pub value: ShortBytes,
    } -> NvWriteRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Create-or-write an extended NV item in one step.
    Sys/0x35 => NvUpdate {
        pub sys_id: u8,
        pub item_id: u16,
        pub sub_id: u16,
        pub value: ShortBytes,
    } -> NvUpdateRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Compact the active NV page.
    Sys/0x36 => NvCompact {
        pub threshold: u16,
    } -> NvCompactRsp {
        pub status: Status,
    }
}

mt_callback! {
    /// Sent by the device after any reset, including the power-on one.
    Sys/0x80 => ResetInd {
        pub reason: ResetReason,
        pub transport_rev: u8,
        pub product_id: u8,
        pub major_rel: u8,
        pub minor_rel: u8,
        pub maint_rel: u8,
    }
}

mt_callback! {
    /// A firmware timer event expired.
    Sys/0x81 => OsalTimerExpired {
        pub id: u8,
    }
}

mt_callback! {
    /// Jamming detection state changed.
    Sys/0x82 => JammerInd {
        pub detected: bool,
    }
}
