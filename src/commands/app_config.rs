//! APPConfig subsystem: BDB commissioning and trust center policy.

use super::{mt_callback, mt_sreq};
use crate::types::{
    Bytes, Channels, CommissioningMode, CommissioningStatus, Ieee, Status,
};

mt_sreq! {
    /// Set the network frame counter of the current network.
    AppConfig/0xFF => SetNwkFrameCounter {
        pub frame_counter: u32,
    } -> SetNwkFrameCounterRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Default expiry the coordinator applies to legacy child devices.
    /// Index 0 means ten seconds, otherwise 2^N minutes.
    AppConfig/0x01 => SetDefaultRemoteEndDeviceTimeout {
        pub timeout_index: u8,
    } -> SetDefaultRemoteEndDeviceTimeoutRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Timeout an end device reports to its parent.
    AppConfig/0x02 => SetEndDeviceTimeout {
        pub timeout_index: u8,
    } -> SetEndDeviceTimeoutRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Whether the trust center accepts rejoining devices.
    AppConfig/0x03 => SetAllowRejoinTcPolicy {
        pub allow_rejoin: bool,
    } -> SetAllowRejoinTcPolicyRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Register an install code (or a key derived from one) for a joiner.
    AppConfig/0x04 => BdbAddInstallCode {
        /// 0x01 = install code + CRC, 0x02 = derived key
        pub install_code_format: u8,
        pub ieee: Ieee,
        pub install_code: Bytes,
    } -> BdbAddInstallCodeRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Start the BDB commissioning machine in the given modes. Progress is
    /// reported through `BdbCommissioningNotification`.
    AppConfig/0x05 => BdbStartCommissioning {
        pub mode: CommissioningMode,
    } -> BdbStartCommissioningRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Require joiners to use an install code.
    AppConfig/0x06 => BdbSetJoinUsesInstallCodeKey {
        pub enabled: bool,
    } -> BdbSetJoinUsesInstallCodeKeyRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Select the key a joining device will try against a centralized
    /// network.
    AppConfig/0x07 => BdbSetActiveDefaultCentralizedKey {
        pub key_mode: u8,
        pub install_code: Bytes,
    } -> BdbSetActiveDefaultCentralizedKeyRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Set the primary or secondary BDB channel mask.
    AppConfig/0x08 => BdbSetChannel {
        pub is_primary: bool,
        pub channel: Channels,
    } -> BdbSetChannelRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Mandate (or not) the trust center link key exchange procedure.
    AppConfig/0x09 => BdbSetTcRequireKeyExchange {
        pub required: bool,
    } -> BdbSetTcRequireKeyExchangeRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Ask an end device to recover its previous network.
    AppConfig/0x0A => BdbZedAttemptRecoverNwk {} -> BdbZedAttemptRecoverNwkRsp {
        pub status: Status,
    }
}

mt_callback! {
    /// Progress notification from the BDB commissioning machine.
    AppConfig/0x80 => BdbCommissioningNotification {
        pub status: CommissioningStatus,
        pub mode: CommissioningMode,
        pub remaining_modes: CommissioningMode,
    }
}
