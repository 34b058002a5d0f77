//! Host-side driver for Texas Instruments Z-Stack ZNP Zigbee coprocessors.
//!
//! The driver speaks the Monitor-and-Test (MT) protocol over a serial UART
//! link to a radio running the Z-Stack firmware: it configures the device,
//! forms or restores a Zigbee network as the coordinator, exchanges
//! application-layer frames, and manages the coordinator's persistent
//! state (NVRAM, network keys, child devices).
//!
//! # Layers
//!
//! - [`transport`]: the UART as a byte-stream duplex with pin control
//! - [`frame`]: MT framing (SOF, length, command, FCS) with resync
//! - [`commands`]: the typed MT command catalogue
//! - [`bus`]: the multiplexer matching replies to requests and fanning
//!   indications out to subscribers
//! - [`nvram`]: the persistent item store across both OSAL layouts
//! - [`security`]: key tables and frame counters
//! - [`Driver`]: the coordinator lifecycle and public surface
//!
//! # Example
//!
//! ```no_run
//! use znp_host::{Config, DataRequest, Driver, FormConfig, StartMode};
//! use znp_host::types::Channels;
//!
//! # fn main() -> znp_host::Result<()> {
//! let driver = Driver::open(Config::new("/dev/ttyUSB0"))?;
//! driver.start(StartMode::Form(FormConfig {
//!     channel_mask: Some(Channels::from_channel(15)),
//!     ..Default::default()
//! }))?;
//!
//! driver.permit_join(60, None)?;
//!
//! for event in driver.events() {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

mod app;
mod backup;
mod config;
mod error;

pub mod bootloader;
pub mod bus;
pub mod commands;
pub mod frame;
pub mod nvram;
pub mod security;
pub mod transport;
pub mod types;

pub use app::{
    Adapter, DataConfirmResult, DataRequest, DeviceEntry, Driver, DriverState, Endpoint, Event,
    FormConfig, IncomingMessage, NetworkInfo, NodeInfo, StartMode,
};
pub use backup::{BackupDocument, BackupMetadata, ChildBackup, LinkKeyBackup, NetworkBackup};
pub use config::{Concurrency, Config, FlowControl, Timeouts};
pub use error::{Error, FramingError, ProtocolError, Result};
