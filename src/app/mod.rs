//! The coordinator application layer.
//!
//! [`Driver`] is the public surface: it owns the bus, walks the startup
//! state machine, tracks the device table, and exposes data requests, ZDO
//! operations, permit-join, backup and the indication stream.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ── open ──▶ Probing ── start ──▶ Configuring
//!                                                    │
//!                                  ┌─────────────────┼─────────────┐
//!                                  ▼                 ▼             ▼
//!                               Forming          Restoring      Joining
//!                                  └─────────────────┼─────────────┘
//!                                                    ▼
//!                   Disconnected ◀── close ──── Running
//! ```
//!
//! A transport failure from any state lands in `Disconnected`; the monitor
//! thread then rebuilds the connection and resumes the network after
//! `auto_reconnect_retry_delay`. Unrecoverable startup errors land in
//! `Failed`.

mod adapter;
mod data;
mod startup;
mod zdo_helpers;

pub use adapter::Adapter;
pub use data::{DataConfirmResult, DataRequest};
pub use startup::{Endpoint, FormConfig};

use crate::backup::{
    format_ieee, format_key, BackupDocument, BackupMetadata, ChildBackup, LinkKeyBackup,
    NetworkBackup, NvramBackup,
};
use crate::commands::{af, zdo, MtCommand};
use crate::config::{Concurrency, Config};
use crate::error::{Error, Result};
use crate::frame::CommandHeader;
use crate::security::{self, StoredDevice, StoredKey};
use crate::types::{
    AddrMode, Channels, DeviceState, Ieee, KeyData, LogicalType, MacCapabilities, Nwk, PanId,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use data::{DeliveryHints, Semaphore, TsnPool};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Event stream depth before the pump starts shedding.
const EVENT_QUEUE: usize = 256;

/// How long `close` waits for in-flight data requests to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The driver's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Disconnected,
    Probing,
    Configuring,
    Forming,
    Restoring,
    Joining,
    Running,
    Stopping,
    Failed,
}

/// The logical parameters of the running (or desired) network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub pan_id: PanId,
    pub extended_pan_id: Ieee,
    pub channel: u8,
    pub channel_mask: Channels,
    pub nwk_update_id: u8,
    pub security_level: u8,
    pub network_key: KeyData,
    pub key_sequence: u8,
    pub frame_counter: u32,
    pub tc_link_key: KeyData,
    pub tclk_seed: Option<KeyData>,
}

/// The coordinator's own identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub ieee: Ieee,
    pub nwk: Nwk,
    pub logical_type: LogicalType,
}

/// What `start` should do.
#[derive(Debug, Clone)]
pub enum StartMode {
    /// Form a new network, randomising anything not pinned
    Form(FormConfig),
    /// Restore a previously backed-up network, children and keys included
    Restore(Box<BackupDocument>),
    /// Adopt an existing network's exact parameters
    Join(NetworkInfo),
}

/// An entry in the driver's device table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub ieee: Ieee,
    pub nwk: Nwk,
    /// Direct child of the coordinator
    pub is_child: bool,
    /// Link quality of the most recent frame
    pub lqi: Option<u8>,
    pub rx_on_when_idle: Option<bool>,
    /// Last source route reported for this device, coordinator-first
    pub relays: Vec<Nwk>,
}

/// An application frame received from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub src: Nwk,
    pub src_endpoint: u8,
    pub dst_endpoint: u8,
    pub cluster_id: u16,
    pub group_id: u16,
    pub was_broadcast: bool,
    pub lqi: u8,
    pub tsn: u8,
    pub payload: Vec<u8>,
}

/// Everything the driver reports on its indication stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// An application frame arrived
    Message(IncomingMessage),
    /// A device joined through the trust center
    DeviceJoined {
        nwk: Nwk,
        ieee: Ieee,
        parent_nwk: Nwk,
    },
    /// A device (re)announced itself
    DeviceAnnounced {
        nwk: Nwk,
        ieee: Ieee,
        capabilities: MacCapabilities,
    },
    /// A device left the network
    DeviceLeft { nwk: Nwk, ieee: Ieee, rejoining: bool },
    /// The coordinator's permit-join state changed
    PermitJoinChanged { remaining_secs: u8 },
    /// The stack reported a routing record for a device
    RouteRecord { dst: Nwk, relays: Vec<Nwk> },
    /// The stack's device state changed
    StateChanged(DeviceState),
    /// A raw ZDO message arrived for a registered cluster
    ZdoMessage {
        src: Nwk,
        cluster_id: u16,
        tsn: u8,
        payload: Vec<u8>,
    },
    /// The serial link died; the monitor will try to reconnect
    Disconnected,
    /// The link and network came back after a disconnect
    Reconnected,
}

struct DriverShared {
    config: Config,
    adapter: Mutex<Option<Arc<Adapter>>>,
    state: Mutex<DriverState>,
    network: Mutex<Option<NetworkInfo>>,
    node: Mutex<Option<NodeInfo>>,
    devices: Mutex<HashMap<Ieee, DeviceEntry>>,
    endpoints: Mutex<Vec<Endpoint>>,
    permit_until: Mutex<Option<Instant>>,
    semaphore: Mutex<Option<Arc<Semaphore>>>,
    tsn_pool: TsnPool,
    events_tx: Sender<Event>,
    shutdown: AtomicBool,
    pump_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DriverShared {
    fn adapter(&self) -> Result<Arc<Adapter>> {
        self.adapter
            .lock()
            .as_ref()
            .cloned()
            .ok_or(Error::Disconnected)
    }

    fn state(&self) -> DriverState {
        *self.state.lock()
    }

    fn set_state(&self, state: DriverState) {
        let mut current = self.state.lock();
        log::debug!("Driver state: {:?} -> {:?}", *current, state);
        *current = state;
    }

    fn require_running(&self) -> Result<Arc<Adapter>> {
        if self.state() != DriverState::Running {
            return Err(Error::State(format!(
                "Operation requires a running network (state is {:?})",
                self.state()
            )));
        }
        self.adapter()
    }

    fn emit(&self, event: Event) {
        // The event stream applies backpressure, but never so hard that it
        // can wedge shutdown.
        if self
            .events_tx
            .send_timeout(event, Duration::from_secs(1))
            .is_err()
        {
            log::warn!("Event stream is not being drained, dropping an event");
        }
    }
}

/// Host-side driver for a ZNP coordinator. See the module documentation.
pub struct Driver {
    shared: Arc<DriverShared>,
    events_rx: Receiver<Event>,
    monitor_handle: Option<JoinHandle<()>>,
}

impl Driver {
    fn new_shared(config: Config) -> (Arc<DriverShared>, Receiver<Event>) {
        let (events_tx, events_rx) = bounded(EVENT_QUEUE);

        let shared = Arc::new(DriverShared {
            config,
            adapter: Mutex::new(None),
            state: Mutex::new(DriverState::Disconnected),
            network: Mutex::new(None),
            node: Mutex::new(None),
            devices: Mutex::new(HashMap::new()),
            endpoints: Mutex::new(vec![Endpoint::zha()]),
            permit_until: Mutex::new(None),
            semaphore: Mutex::new(None),
            tsn_pool: TsnPool::new(),
            events_tx,
            shutdown: AtomicBool::new(false),
            pump_handle: Mutex::new(None),
        });

        (shared, events_rx)
    }

    /// Open the serial port, probe the firmware and leave the driver ready
    /// for [`Driver::start`].
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let (shared, events_rx) = Self::new_shared(config);

        shared.set_state(DriverState::Probing);
        let adapter = Adapter::connect(&shared.config).map_err(|e| {
            shared.set_state(DriverState::Failed);
            e
        })?;
        *shared.adapter.lock() = Some(Arc::new(adapter));

        let monitor_shared = Arc::clone(&shared);
        let monitor_handle = thread::Builder::new()
            .name("znp-monitor".to_string())
            .spawn(move || monitor_loop(monitor_shared))
            .map_err(|e| Error::Config(format!("Failed to spawn monitor thread: {}", e)))?;

        Ok(Self {
            shared,
            events_rx,
            monitor_handle: Some(monitor_handle),
        })
    }

    /// Probe a caller-provided transport instead of a serial port. The
    /// integration tests drive the whole driver through a mock this way;
    /// no reconnect monitor runs in this mode.
    pub fn open_with_transport(
        config: Config,
        transport: Box<dyn crate::transport::Transport>,
    ) -> Result<Self> {
        config.validate()?;
        let (shared, events_rx) = Self::new_shared(config);

        shared.set_state(DriverState::Probing);
        let adapter = Adapter::over_transport(transport, &shared.config).map_err(|e| {
            shared.set_state(DriverState::Failed);
            e
        })?;
        *shared.adapter.lock() = Some(Arc::new(adapter));

        Ok(Self {
            shared,
            events_rx,
            monitor_handle: None,
        })
    }

    /// Replace the default endpoint set registered at startup.
    pub fn set_endpoints(&self, endpoints: Vec<Endpoint>) {
        *self.shared.endpoints.lock() = endpoints;
    }

    /// Walk the startup state machine to `Running`.
    pub fn start(&self, mode: StartMode) -> Result<()> {
        let state = self.shared.state();
        if state != DriverState::Probing {
            return Err(Error::State(format!(
                "Cannot start from state {:?}",
                state
            )));
        }

        let result = self.start_inner(mode);
        if result.is_err() {
            self.shared.set_state(DriverState::Failed);
        }
        result
    }

    fn start_inner(&self, mode: StartMode) -> Result<()> {
        let adapter = self.shared.adapter()?;

        self.shared.set_state(DriverState::Configuring);
        if startup::write_stack_settings(&adapter)? {
            adapter.reset()?;
        }

        match mode {
            StartMode::Form(form) => {
                self.shared.set_state(DriverState::Forming);

                let network = form.resolve();
                let node = NodeInfo {
                    ieee: adapter.ieee()?,
                    nwk: Nwk::COORDINATOR,
                    logical_type: LogicalType::Coordinator,
                };

                startup::write_network_info(&adapter, &network, &node, &[])?;
            }
            StartMode::Restore(backup) => {
                self.shared.set_state(DriverState::Restoring);

                backup.validate()?;
                let network = network_info_from_backup(&backup)?;
                let node = NodeInfo {
                    ieee: adapter.ieee()?,
                    nwk: Nwk::COORDINATOR,
                    logical_type: LogicalType::Coordinator,
                };
                let children = children_from_backup(&backup)?;

                // If the device already holds this exact network, writing
                // it again would only churn frame counters.
                let matches = match startup::load_network_info(&adapter) {
                    Ok((current, _)) => {
                        current.pan_id == network.pan_id
                            && current.extended_pan_id == network.extended_pan_id
                            && current.network_key == network.network_key
                            && current.channel == network.channel
                    }
                    Err(_) => false,
                };

                if matches {
                    log::info!("Device already holds the backed-up network");
                } else {
                    startup::write_network_info(&adapter, &network, &node, &children)?;
                }
            }
            StartMode::Join(network) => {
                self.shared.set_state(DriverState::Joining);

                let node = NodeInfo {
                    ieee: adapter.ieee()?,
                    nwk: Nwk::COORDINATOR,
                    logical_type: LogicalType::Coordinator,
                };

                startup::write_network_info(&adapter, &network, &node, &[])?;
            }
        }

        bring_up(&self.shared, &adapter)?;
        self.shared.set_state(DriverState::Running);
        Ok(())
    }

    /// The driver's lifecycle state.
    pub fn state(&self) -> DriverState {
        self.shared.state()
    }

    /// The running network's parameters.
    pub fn network_info(&self) -> Option<NetworkInfo> {
        self.shared.network.lock().clone()
    }

    /// The coordinator's own identity.
    pub fn node_info(&self) -> Option<NodeInfo> {
        *self.shared.node.lock()
    }

    /// Snapshot of the device table.
    pub fn devices(&self) -> Vec<DeviceEntry> {
        self.shared.devices.lock().values().cloned().collect()
    }

    /// The indication stream. Each event is delivered to one receiver.
    pub fn events(&self) -> Receiver<Event> {
        self.events_rx.clone()
    }

    /// Send an application frame and wait for its delivery confirmation.
    pub fn request_data(&self, request: DataRequest) -> Result<DataConfirmResult> {
        let adapter = self.shared.require_running()?;

        let semaphore = self
            .shared
            .semaphore
            .lock()
            .clone()
            .ok_or(Error::Disconnected)?;

        // Hold the permit for all retries: letting waiting requests take
        // turns hitting a full TX buffer helps nobody.
        let _permit = semaphore.acquire();
        let tsn_guard = self.shared.tsn_pool.allocate()?;

        let hints = {
            let devices = self.shared.devices.lock();
            let entry = match request.dst {
                crate::types::AddrModeAddress::Nwk(dst) => {
                    devices.values().find(|d| d.nwk == dst)
                }
                crate::types::AddrModeAddress::Ieee(ieee) => devices.get(&ieee),
                _ => None,
            };

            DeliveryHints {
                ieee: entry.map(|e| e.ieee),
                relays: entry.and_then(|e| {
                    (!e.relays.is_empty()).then(|| e.relays.clone())
                }),
            }
        };

        data::send_with_retries(&adapter, &request, tsn_guard.tsn(), &hints)
    }

    /// Open (or close, with zero) the network for joining. `target`
    /// addresses one router; the default reaches every router and the
    /// coordinator.
    pub fn permit_join(&self, duration_secs: u8, target: Option<Nwk>) -> Result<()> {
        let adapter = self.shared.require_running()?;
        let node = self.shared.node.lock().ok_or(Error::Disconnected)?;

        log::info!("Permitting joins for {} seconds", duration_secs);

        // Routers only distribute the network key while the coordinator
        // itself is also permitting joins on old builds, and closing the
        // network must always reach the coordinator.
        let coordinator_build_ok = adapter.code_revision >= 20210708;
        if duration_secs == 0 || !coordinator_build_ok || target == Some(node.nwk) {
            zdo_helpers::permit_join(
                &adapter,
                &zdo::MgmtPermitJoinReq {
                    addr_mode: AddrMode::Nwk,
                    dst: node.nwk,
                    duration: duration_secs,
                    tc_significance: 1,
                },
                node.nwk,
            )?;
        }

        match target {
            Some(dst) if dst != node.nwk => {
                zdo_helpers::permit_join(
                    &adapter,
                    &zdo::MgmtPermitJoinReq {
                        addr_mode: AddrMode::Nwk,
                        dst,
                        duration: duration_secs,
                        tc_significance: 1,
                    },
                    dst,
                )?;
            }
            Some(_) => {}
            None => {
                // Broadcasts are answered by the coordinator itself
                zdo_helpers::permit_join(
                    &adapter,
                    &zdo::MgmtPermitJoinReq {
                        addr_mode: AddrMode::Broadcast,
                        dst: Nwk::BROADCAST_ROUTERS,
                        duration: duration_secs,
                        tc_significance: 1,
                    },
                    node.nwk,
                )?;
            }
        }

        *self.shared.permit_until.lock() = if duration_secs > 0 {
            Some(Instant::now() + Duration::from_secs(duration_secs as u64))
        } else {
            None
        };

        self.shared.emit(Event::PermitJoinChanged {
            remaining_secs: duration_secs,
        });

        Ok(())
    }

    /// Authoritative remaining permit-join time.
    pub fn permit_join_remaining(&self) -> Duration {
        self.shared
            .permit_until
            .lock()
            .and_then(|until| until.checked_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    /// Produce a complete backup document for the running network.
    pub fn backup(&self) -> Result<BackupDocument> {
        let adapter = self.shared.require_running()?;

        // Re-read everything so frame counters are current
        let (network, _node) = startup::load_network_info(&adapter)?;
        let devices = security::read_devices(&adapter.nvram, adapter.version, adapter.aligned)?;
        let snapshot = adapter.nvram.backup(adapter.version.has_extended_nv())?;

        let children = devices
            .iter()
            .map(|device| ChildBackup {
                ieee: format_ieee(device.ieee),
                nwk: Some(device.nwk.0),
                is_child: device.is_child,
                link_key: device.key.map(|key| LinkKeyBackup {
                    key: format_key(key.key),
                    tx_counter: key.tx_counter,
                    rx_counter: key.rx_counter,
                }),
            })
            .collect();

        *self.shared.network.lock() = Some(network.clone());

        Ok(BackupDocument {
            metadata: BackupMetadata::new(),
            network: NetworkBackup {
                pan_id: network.pan_id.0,
                extended_pan_id: format_ieee(network.extended_pan_id),
                channel: network.channel,
                channel_mask: network.channel_mask.0,
                nwk_update_id: network.nwk_update_id,
                network_key: format_key(network.network_key),
                key_sequence: network.key_sequence,
                frame_counter: network.frame_counter,
                tc_link_key: format_key(network.tc_link_key),
                tclk_seed: network.tclk_seed.map(format_key),
                children,
            },
            nvram: NvramBackup::from_snapshot(&snapshot),
        })
    }

    /// Direct access to the adapter (bus and NVRAM manager) for operations
    /// the typed surface does not cover.
    pub fn adapter(&self) -> Result<Arc<Adapter>> {
        self.shared.adapter()
    }

    // ZDO passthroughs -------------------------------------------------

    pub fn ieee_addr(&self, nwk: Nwk) -> Result<Ieee> {
        zdo_helpers::ieee_addr(&*self.shared.require_running()?, nwk)
    }

    pub fn nwk_addr(&self, ieee: Ieee) -> Result<Nwk> {
        zdo_helpers::nwk_addr(&*self.shared.require_running()?, ieee)
    }

    pub fn active_endpoints(&self, nwk: Nwk) -> Result<Vec<u8>> {
        zdo_helpers::active_endpoints(&*self.shared.require_running()?, nwk)
    }

    pub fn node_descriptor(&self, nwk: Nwk) -> Result<zdo::NodeDescriptor> {
        zdo_helpers::node_descriptor(&*self.shared.require_running()?, nwk)
    }

    pub fn simple_descriptor(&self, nwk: Nwk, endpoint: u8) -> Result<zdo::SimpleDescriptor> {
        zdo_helpers::simple_descriptor(&*self.shared.require_running()?, nwk, endpoint)
    }

    pub fn lqi_table(&self, nwk: Nwk, start_index: u8) -> Result<zdo::MgmtLqiRsp> {
        zdo_helpers::lqi_table(&*self.shared.require_running()?, nwk, start_index)
    }

    pub fn routing_table(&self, nwk: Nwk, start_index: u8) -> Result<zdo::MgmtRtgRsp> {
        zdo_helpers::routing_table(&*self.shared.require_running()?, nwk, start_index)
    }

    pub fn binding_table(&self, nwk: Nwk, start_index: u8) -> Result<zdo::MgmtBindRsp> {
        zdo_helpers::binding_table(&*self.shared.require_running()?, nwk, start_index)
    }

    pub fn bind(
        &self,
        dst: Nwk,
        src: Ieee,
        src_endpoint: u8,
        cluster_id: u16,
        address: zdo::BindAddress,
    ) -> Result<()> {
        zdo_helpers::bind(
            &*self.shared.require_running()?,
            dst,
            src,
            src_endpoint,
            cluster_id,
            address,
        )
    }

    pub fn unbind(
        &self,
        dst: Nwk,
        src: Ieee,
        src_endpoint: u8,
        cluster_id: u16,
        address: zdo::BindAddress,
    ) -> Result<()> {
        zdo_helpers::unbind(
            &*self.shared.require_running()?,
            dst,
            src,
            src_endpoint,
            cluster_id,
            address,
        )
    }

    pub fn remove_device(&self, nwk: Nwk, ieee: Ieee) -> Result<()> {
        zdo_helpers::leave(&*self.shared.require_running()?, nwk, ieee, false)
    }

    /// Drain in-flight requests, stop the threads and close the port.
    pub fn close(&mut self) {
        if self.shared.state() == DriverState::Disconnected {
            return;
        }

        self.shared.set_state(DriverState::Stopping);
        self.shared.shutdown.store(true, Ordering::Relaxed);

        // Bounded drain: give in-flight data requests a chance to resolve
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.shared.tsn_pool.in_flight() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(100));
        }

        if let Some(handle) = self.shared.pump_handle.lock().take() {
            let _ = handle.join();
        }

        if let Some(handle) = self.monitor_handle.take() {
            let _ = handle.join();
        }

        if let Some(adapter) = self.shared.adapter.lock().take() {
            adapter.bus.close();
        }

        self.shared.set_state(DriverState::Disconnected);
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.close();
    }
}

/// Everything between "NVRAM holds a network" and "running": start the
/// stack, register endpoints, size the semaphore, load state, spawn the
/// event pump.
fn bring_up(shared: &Arc<DriverShared>, adapter: &Arc<Adapter>) -> Result<()> {
    adapter.reset()?;

    if let Some(dbm) = shared.config.tx_power {
        adapter.set_tx_power(dbm)?;
    }

    startup::start_coordinator(adapter)?;

    // The CC2531 overrides the LED setting if it is applied before the
    // coordinator has started.
    if let Some(mode) = shared.config.led_mode {
        adapter.set_led_mode(mode)?;
    }

    startup::register_endpoints(adapter, &shared.endpoints.lock())?;

    let (network, node) = startup::load_network_info(adapter)?;
    log::info!(
        "Network up: PAN {} / {} on channel {}",
        network.pan_id,
        network.extended_pan_id,
        network.channel
    );

    *shared.network.lock() = Some(network);
    *shared.node.lock() = Some(node);

    // Rebuild the device table from the coordinator's own records
    let mut devices = HashMap::new();
    match security::read_devices(&adapter.nvram, adapter.version, adapter.aligned) {
        Ok(stored) => {
            for device in stored {
                devices.insert(
                    device.ieee,
                    DeviceEntry {
                        ieee: device.ieee,
                        nwk: device.nwk,
                        is_child: device.is_child,
                        lqi: None,
                        rx_on_when_idle: None,
                        relays: Vec::new(),
                    },
                );
            }
        }
        Err(e) => log::warn!("Could not rebuild the device table: {}", e),
    }
    *shared.devices.lock() = devices;

    let permits = match shared.config.max_concurrent_requests {
        Concurrency::Fixed(n) => n,
        // Chips with aligned structs have much deeper TX queues
        Concurrency::Auto => {
            if adapter.aligned {
                16
            } else {
                2
            }
        }
    };
    *shared.semaphore.lock() = Some(Arc::new(Semaphore::new(permits)));

    // Start the event pump for this adapter generation
    let pump_shared = Arc::clone(shared);
    let pump_adapter = Arc::clone(adapter);
    let handle = thread::Builder::new()
        .name("znp-events".to_string())
        .spawn(move || pump_loop(pump_shared, pump_adapter))
        .map_err(|e| Error::Config(format!("Failed to spawn event pump: {}", e)))?;

    if let Some(old) = shared.pump_handle.lock().replace(handle) {
        // A previous pump exits on its own once its bus dies
        drop(old);
    }

    Ok(())
}

/// Decode and fan out the indications the driver watches.
fn pump_loop(shared: Arc<DriverShared>, adapter: Arc<Adapter>) {
    let headers: Vec<CommandHeader> = vec![
        af::IncomingMsg::header(),
        af::IncomingMsgExt::header(),
        zdo::TcDevInd::header(),
        zdo::EndDeviceAnnceInd::header(),
        zdo::LeaveInd::header(),
        zdo::SrcRtgInd::header(),
        zdo::PermitJoinInd::header(),
        zdo::StateChangeInd::header(),
        zdo::MsgCbIncoming::header(),
    ];

    let subscription = adapter.bus.subscribe_headers(&headers);

    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            break;
        }

        let frame = match subscription.recv_timeout(Duration::from_millis(250)) {
            Ok(frame) => frame,
            Err(Error::Timeout { .. }) => continue,
            Err(_) => break,
        };

        if frame.header == af::IncomingMsg::header() {
            if let Ok(msg) = af::IncomingMsg::from_frame(&frame) {
                handle_incoming(&shared, msg);
            }
        } else if frame.header == af::IncomingMsgExt::header() {
            if let Ok(msg) = af::IncomingMsgExt::from_frame(&frame) {
                let src = match msg.src_addr {
                    crate::types::AddrModeAddress::Nwk(nwk) => nwk,
                    _ => Nwk::INVALID,
                };
                shared.emit(Event::Message(IncomingMessage {
                    src,
                    src_endpoint: msg.src_endpoint,
                    dst_endpoint: msg.dst_endpoint,
                    cluster_id: msg.cluster_id,
                    group_id: msg.group_id,
                    was_broadcast: msg.was_broadcast != 0,
                    lqi: msg.lqi,
                    tsn: msg.tsn,
                    payload: msg.data.0,
                }));
            }
        } else if frame.header == zdo::TcDevInd::header() {
            if let Ok(ind) = zdo::TcDevInd::from_frame(&frame) {
                let mut devices = shared.devices.lock();
                let entry = devices.entry(ind.src_ieee).or_insert(DeviceEntry {
                    ieee: ind.src_ieee,
                    nwk: ind.src_nwk,
                    is_child: ind.parent_nwk == Nwk::COORDINATOR,
                    lqi: None,
                    rx_on_when_idle: None,
                    relays: Vec::new(),
                });
                entry.nwk = ind.src_nwk;
                entry.is_child = ind.parent_nwk == Nwk::COORDINATOR;
                drop(devices);

                shared.emit(Event::DeviceJoined {
                    nwk: ind.src_nwk,
                    ieee: ind.src_ieee,
                    parent_nwk: ind.parent_nwk,
                });
            }
        } else if frame.header == zdo::EndDeviceAnnceInd::header() {
            if let Ok(ind) = zdo::EndDeviceAnnceInd::from_frame(&frame) {
                let mut devices = shared.devices.lock();
                let entry = devices.entry(ind.ieee).or_insert(DeviceEntry {
                    ieee: ind.ieee,
                    nwk: ind.nwk,
                    is_child: false,
                    lqi: None,
                    rx_on_when_idle: None,
                    relays: Vec::new(),
                });
                // Devices sometimes change their short address when they
                // announce; trust the announcement.
                entry.nwk = ind.nwk;
                entry.rx_on_when_idle =
                    Some(ind.capabilities.contains(MacCapabilities::RX_ON_WHEN_IDLE));
                drop(devices);

                shared.emit(Event::DeviceAnnounced {
                    nwk: ind.nwk,
                    ieee: ind.ieee,
                    capabilities: ind.capabilities,
                });
            }
        } else if frame.header == zdo::LeaveInd::header() {
            if let Ok(ind) = zdo::LeaveInd::from_frame(&frame) {
                shared.devices.lock().remove(&ind.ieee);
                shared.emit(Event::DeviceLeft {
                    nwk: ind.nwk,
                    ieee: ind.ieee,
                    rejoining: ind.rejoin,
                });
            }
        } else if frame.header == zdo::SrcRtgInd::header() {
            if let Ok(ind) = zdo::SrcRtgInd::from_frame(&frame) {
                let mut devices = shared.devices.lock();
                if let Some(entry) = devices.values_mut().find(|d| d.nwk == ind.dst_addr) {
                    entry.relays = ind.relays.0.clone();
                }
                drop(devices);

                shared.emit(Event::RouteRecord {
                    dst: ind.dst_addr,
                    relays: ind.relays.0,
                });
            }
        } else if frame.header == zdo::PermitJoinInd::header() {
            if let Ok(ind) = zdo::PermitJoinInd::from_frame(&frame) {
                *shared.permit_until.lock() = if ind.duration > 0 {
                    Some(Instant::now() + Duration::from_secs(ind.duration as u64))
                } else {
                    None
                };
                shared.emit(Event::PermitJoinChanged {
                    remaining_secs: ind.duration,
                });
            }
        } else if frame.header == zdo::StateChangeInd::header() {
            if let Ok(ind) = zdo::StateChangeInd::from_frame(&frame) {
                shared.emit(Event::StateChanged(ind.state));
            }
        } else if frame.header == zdo::MsgCbIncoming::header() {
            if let Ok(msg) = zdo::MsgCbIncoming::from_frame(&frame) {
                shared.emit(Event::ZdoMessage {
                    src: msg.src,
                    cluster_id: msg.cluster_id,
                    tsn: msg.tsn,
                    payload: msg.data.0,
                });
            }
        }
    }

    log::debug!("Event pump exiting");
}

fn handle_incoming(shared: &Arc<DriverShared>, msg: af::IncomingMsg) {
    {
        let mut devices = shared.devices.lock();
        if let Some(entry) = devices.values_mut().find(|d| d.nwk == msg.src_addr) {
            entry.lqi = Some(msg.lqi);
        }
    }

    shared.emit(Event::Message(IncomingMessage {
        src: msg.src_addr,
        src_endpoint: msg.src_endpoint,
        dst_endpoint: msg.dst_endpoint,
        cluster_id: msg.cluster_id,
        group_id: msg.group_id,
        was_broadcast: msg.was_broadcast != 0,
        lqi: msg.lqi,
        tsn: msg.tsn,
        payload: msg.data.0,
    }));
}

/// Watch the bus and rebuild the connection after a failure.
fn monitor_loop(shared: Arc<DriverShared>) {
    loop {
        thread::sleep(Duration::from_millis(250));

        if shared.shutdown.load(Ordering::Relaxed) {
            return;
        }

        let died = shared
            .adapter
            .lock()
            .as_ref()
            .map(|a| a.bus.is_disconnected())
            .unwrap_or(false);

        if !died {
            continue;
        }

        let was_running = shared.state() == DriverState::Running;
        log::warn!("Lost the adapter connection");
        shared.set_state(DriverState::Disconnected);
        *shared.adapter.lock() = None;
        *shared.semaphore.lock() = None;
        shared.emit(Event::Disconnected);

        if !was_running {
            // Nothing to resume; the application decides what happens next
            continue;
        }

        // Endlessly try to reconnect and resume the network
        let delay = shared.config.reconnect_delay();
        loop {
            if shared.shutdown.load(Ordering::Relaxed) {
                return;
            }

            thread::sleep(delay);
            log::info!("Trying to reconnect to {}", shared.config.port);

            match Adapter::connect(&shared.config) {
                Ok(adapter) => {
                    let adapter = Arc::new(adapter);
                    match bring_up(&shared, &adapter) {
                        Ok(()) => {
                            *shared.adapter.lock() = Some(adapter);
                            shared.set_state(DriverState::Running);
                            shared.emit(Event::Reconnected);
                            log::info!("Reconnected and resumed the network");
                            break;
                        }
                        Err(e) => {
                            log::error!("Resume failed after reconnect: {}", e);
                            adapter.bus.close();
                        }
                    }
                }
                Err(e) => log::error!("Reconnect failed: {}", e),
            }
        }
    }
}

fn network_info_from_backup(backup: &BackupDocument) -> Result<NetworkInfo> {
    Ok(NetworkInfo {
        pan_id: backup.network.pan(),
        extended_pan_id: backup.network.extended_pan_id()?,
        channel: backup.network.channel,
        channel_mask: backup.network.channel_mask(),
        nwk_update_id: backup.network.nwk_update_id,
        security_level: 5,
        network_key: backup.network.network_key()?,
        key_sequence: backup.network.key_sequence,
        frame_counter: backup.network.frame_counter,
        tc_link_key: backup.network.tc_link_key()?,
        tclk_seed: backup.network.tclk_seed()?,
    })
}

fn children_from_backup(backup: &BackupDocument) -> Result<Vec<StoredDevice>> {
    backup
        .network
        .children
        .iter()
        .map(|child| {
            Ok(StoredDevice {
                ieee: child.ieee_addr()?,
                nwk: child.nwk_addr().unwrap_or(Nwk::INVALID),
                is_child: child.is_child,
                key: child
                    .link_key
                    .as_ref()
                    .map(|key| {
                        Ok::<_, Error>(StoredKey {
                            key: crate::backup::parse_key(&key.key)?,
                            tx_counter: key.tx_counter,
                            rx_counter: key.rx_counter,
                        })
                    })
                    .transpose()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permit_join_remaining_counts_down() {
        let until = Instant::now() + Duration::from_secs(30);
        let remaining = until.checked_duration_since(Instant::now()).unwrap();
        assert!(remaining <= Duration::from_secs(30));
        assert!(remaining > Duration::from_secs(29));
    }

    #[test]
    fn test_network_info_from_backup() {
        let json = r#"{
            "metadata": {
                "format": "znp-host/network-backup",
                "version": 1,
                "source": "znp-host@0.3.0",
                "timestamp": "2024-06-01T12:00:00Z"
            },
            "network": {
                "pan_id": 41314,
                "extended_pan_id": "00124b0012345678",
                "channel": 11,
                "channel_mask": 2048,
                "nwk_update_id": 2,
                "network_key": "0102030405060708090a0b0c0d0e0f10",
                "key_sequence": 0,
                "frame_counter": 10000,
                "tc_link_key": "5a6967426565416c6c69616e63653039",
                "children": [
                    {"ieee": "00124b00aabbccdd", "nwk": 17698, "is_child": true}
                ]
            },
            "nvram": {"legacy": {}, "extended": {}}
        }"#;

        let backup = BackupDocument::from_json(json).unwrap();
        let network = network_info_from_backup(&backup).unwrap();
        assert_eq!(network.pan_id, PanId(41314));
        assert_eq!(network.channel, 11);
        assert_eq!(network.channel_mask.single(), Some(11));

        let children = children_from_backup(&backup).unwrap();
        assert_eq!(children.len(), 1);
        assert!(children[0].is_child);
        assert_eq!(children[0].nwk, Nwk(17698));
    }
}
