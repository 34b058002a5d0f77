//! Mid-level adapter handle: the bus plus everything probed about the
//! firmware at connect time.

use crate::bus::{BusTimeouts, MtBus};
use crate::commands::{sys, util, MtCommand};
use crate::config::Config;
use crate::error::{ensure_success, Error, Result};
use crate::nvram::{ExNvId, Nvram, NvSysId, OsalNvId};
use crate::transport::{SerialTransport, Transport};
use crate::types::{Capabilities, Ieee, LedMode, Nib, NvStruct, ResetType, Status, ZstackVersion};
use std::sync::Arc;
use std::time::Duration;

/// How long to wait for the power-on reset indication before probing
/// actively. Some Z-Stack 3 builds send one when they are ready and dislike
/// being talked to earlier.
const STARTUP_INDICATION_WAIT: Duration = Duration::from_secs(1);

/// First-frame deadline after toggling the connect pins. CC2531 sticks can
/// take a long time to boot their application image.
const FIRST_FRAME_WAIT: Duration = Duration::from_secs(60);

/// A connected, probed adapter: the bus, the NVRAM manager, and the
/// firmware facts everything downstream branches on.
pub struct Adapter {
    pub bus: Arc<MtBus>,
    pub nvram: Nvram,
    pub capabilities: Capabilities,
    pub version: ZstackVersion,
    /// Whether the chip stores NV structs with natural member alignment
    pub aligned: bool,
    /// Firmware build id (a date on recent builds), 0 when not reported
    pub code_revision: u32,
}

impl Adapter {
    /// Open the serial port and probe the firmware.
    pub fn connect(config: &Config) -> Result<Self> {
        config.validate()?;
        let transport = SerialTransport::connect(config)?;
        Self::over_transport(Box::new(transport), config)
    }

    /// Probe an already-open transport. Tests hand in a mock here.
    pub fn over_transport(transport: Box<dyn Transport>, config: &Config) -> Result<Self> {
        let timeouts = BusTimeouts {
            sreq: config.timeouts.sreq(),
            arsp: config.timeouts.arsp(),
            watchdog_interval: config.watchdog_interval(),
        };

        let bus = Arc::new(MtBus::start(transport, timeouts)?);

        // The device may announce itself with a reset indication; give it a
        // moment but do not insist.
        let reset_wait = bus.wait_for(|_: &sys::ResetInd| true);
        match reset_wait.wait(STARTUP_INDICATION_WAIT) {
            Ok(ind) => log::debug!("Device announced itself: {:?}", ind.reason),
            Err(Error::Timeout { .. }) => {}
            Err(e) => return Err(e),
        }

        // The first ping doubles as the "first valid frame" gate
        let capabilities = bus
            .request_with_timeout(&sys::Ping {}, FIRST_FRAME_WAIT)?
            .capabilities;

        let version_rsp = bus.request(&sys::Version {})?;
        log::info!(
            "Connected to Z-Stack {}.{}.{} (product {}, build {})",
            version_rsp.major_rel,
            version_rsp.minor_rel,
            version_rsp.maint_rel,
            version_rsp.product_id,
            version_rsp.code_revision.unwrap_or(0),
        );

        let nvram = Nvram::new(Arc::clone(&bus), capabilities);
        let version = detect_version(&nvram, capabilities)?;
        let aligned = probe_alignment(&nvram, version)?;

        log::info!(
            "Detected {:?} firmware, {} NV structs",
            version,
            if aligned { "aligned" } else { "packed" }
        );

        Ok(Self {
            bus,
            nvram,
            capabilities,
            version,
            aligned,
            code_revision: version_rsp.code_revision.unwrap_or(0),
        })
    }

    /// Soft-reset the stack and wait for it to come back.
    pub fn reset(&self) -> Result<()> {
        let waiter = self.bus.wait_for(|_: &sys::ResetInd| true);
        self.bus.send(&sys::ResetReq {
            ty: ResetType::Soft,
        })?;
        let ind = waiter.wait(Duration::from_secs(30))?;
        log::debug!("Device reset complete: {:?}", ind.reason);
        Ok(())
    }

    /// The device's own IEEE address.
    pub fn ieee(&self) -> Result<Ieee> {
        Ok(self.bus.request(&util::GetDeviceInfo {})?.ieee)
    }

    /// Read and parse the NIB.
    pub fn read_nib(&self) -> Result<Nib> {
        let raw = self.nvram.osal_read(OsalNvId::NIB)?;
        Nib::from_bytes(&raw, self.aligned).map_err(|_| Error::NvramMismatch {
            item: OsalNvId::NIB.to_string(),
        })
    }

    /// Write the NIB back.
    pub fn write_nib(&self, nib: &Nib) -> Result<()> {
        self.nvram
            .osal_write(OsalNvId::NIB, &nib.to_bytes(self.aligned), true)
    }

    /// Apply the configured TX power.
    pub fn set_tx_power(&self, dbm: i8) -> Result<()> {
        let rsp = self.bus.request(&sys::SetTxPower { tx_power: dbm })?;

        if self.version.has_extended_nv() {
            // Z-Stack 3.30+ reports a real status
            ensure_success(sys::SetTxPower::NAME, Status::from(rsp.status_or_power))?;
        } else if rsp.status_or_power as i8 != dbm {
            // Older builds echo the power actually applied
            log::warn!(
                "Requested TX power {} dBm was adjusted to {} dBm",
                dbm,
                rsp.status_or_power as i8
            );
        }

        Ok(())
    }

    /// Try to set the board LEDs. Firmware compiled without LED support
    /// never answers, so a short timeout stands in for a status.
    pub fn set_led_mode(&self, mode: LedMode) -> Result<()> {
        let result = self.bus.request_with_timeout(
            &util::LedControl { led: 0xFF, mode },
            Duration::from_millis(500),
        );

        match result {
            Ok(rsp) => ensure_success(util::LedControl::NAME, rsp.status),
            Err(Error::Timeout { .. }) | Err(Error::Protocol(_)) => {
                log::info!("This firmware build does not support LED control");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Feature-detect the firmware generation.
fn detect_version(nvram: &Nvram, capabilities: Capabilities) -> Result<ZstackVersion> {
    // Z-Stack 1.2 predates the AppConfig subsystem entirely
    if !capabilities.contains(Capabilities::APP_CNF) {
        return Ok(ZstackVersion::Z1_2);
    }

    // Only 3.30+ understands the extended NV interface; probing any item in
    // it distinguishes 3.0 (request rejected) from 3.30 (item read or
    // legitimately missing).
    match nvram.ex_length(NvSysId::ZSTACK, ExNvId::TCLK_TABLE, 0x0000) {
        Ok(_) => Ok(ZstackVersion::Z3_30),
        Err(Error::Protocol(_)) => Ok(ZstackVersion::Z3_0),
        Err(e) => Err(e),
    }
}

/// Detect whether NV structs are stored aligned by measuring the NIB.
fn probe_alignment(nvram: &Nvram, version: ZstackVersion) -> Result<bool> {
    match nvram.osal_length(OsalNvId::NIB)? {
        0 => {
            // No NIB yet (factory-fresh chip); fall back on the generation
            Ok(version.has_extended_nv())
        }
        length => Ok(length as usize >= 116),
    }
}
