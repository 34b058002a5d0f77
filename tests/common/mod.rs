//! A simulated ZNP adapter for integration tests.
//!
//! The simulator sits on the far side of a [`MockTransport`] pair, parses
//! the frames the driver writes, and answers them the way Z-Stack 3.30 on
//! a CC2652 would: NV items live in hash maps, forming lays down a NIB,
//! and data requests produce confirms.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use znp_host::commands::{af, app_config, sys, util, zdo, MtCommand};
use znp_host::frame::{FrameCodec, FrameStats, MtFrame};
use znp_host::transport::TestPort;
use znp_host::types::{
    Capabilities, Channels, DeviceState, Ieee, LvList, Nib, NvStruct, Nwk, ResetReason,
    ShortBytes, StartupState, Status,
};

/// The simulated device's IEEE address.
pub const SIM_IEEE: Ieee = Ieee(0x00124B0011223344);

/// PAN id the simulated firmware picks when forming.
pub const SIM_PAN_ID: u16 = 0x1A62;

/// Extended PAN id the simulated firmware picks when forming.
pub const SIM_EXT_PAN_ID: Ieee = Ieee(0xDDDDDDDDDDDD0001);

#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Hold data confirms until this many pile up, then deliver them in
    /// reverse order. 1 means confirm immediately.
    pub confirm_batch: usize,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self { confirm_batch: 1 }
    }
}

struct SimState {
    legacy_nv: HashMap<u16, Vec<u8>>,
    extended_nv: HashMap<(u8, u16, u16), Vec<u8>>,
    bdb_primary_channels: Channels,
    pending_confirms: Vec<MtFrame>,
    options: SimOptions,
}

pub struct Simulator {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    state: Arc<Mutex<SimState>>,
}

impl Simulator {
    pub fn spawn(port: TestPort, options: SimOptions) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(SimState {
            legacy_nv: HashMap::new(),
            extended_nv: HashMap::new(),
            bdb_primary_channels: Channels::ALL,
            pending_confirms: Vec::new(),
            options,
        }));

        // Announce the power-on reset the way real firmware does
        port.inject_frame(&reset_ind(ResetReason::PowerUp));

        let thread_shutdown = Arc::clone(&shutdown);
        let thread_state = Arc::clone(&state);
        let handle = thread::Builder::new()
            .name("sim-adapter".to_string())
            .spawn(move || simulator_loop(port, thread_state, thread_shutdown))
            .unwrap();

        Self {
            shutdown,
            handle: Some(handle),
            state,
        }
    }

    /// Peek at a legacy NV item the driver wrote.
    pub fn legacy_nv(&self, id: u16) -> Option<Vec<u8>> {
        self.state.lock().legacy_nv.get(&id).cloned()
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn reset_ind(reason: ResetReason) -> MtFrame {
    sys::ResetInd {
        reason,
        transport_rev: 2,
        product_id: 1,
        major_rel: 2,
        minor_rel: 7,
        maint_rel: 1,
    }
    .to_frame()
}

fn simulator_loop(port: TestPort, state: Arc<Mutex<SimState>>, shutdown: Arc<AtomicBool>) {
    let mut codec = FrameCodec::new(Arc::new(FrameStats::default()));
    let mut consumed = 0;

    while !shutdown.load(Ordering::Relaxed) {
        let written = port.written();
        if written.len() > consumed {
            codec.feed(&written[consumed..]);
            consumed = written.len();

            while let Some(frame) = codec.next_frame() {
                for response in handle_frame(&frame, &state) {
                    port.inject_frame(&response);
                }
            }
        }

        thread::sleep(Duration::from_millis(2));
    }
}

fn handle_frame(frame: &MtFrame, state: &Arc<Mutex<SimState>>) -> Vec<MtFrame> {
    // SYS ---------------------------------------------------------------
    if let Ok(_req) = sys::Ping::from_frame(frame) {
        return vec![sys::PingRsp {
            capabilities: Capabilities::SYS
                | Capabilities::AF
                | Capabilities::ZDO
                | Capabilities::UTIL
                | Capabilities::APP_CNF,
        }
        .to_frame()];
    }

    if sys::Version::from_frame(frame).is_ok() {
        return vec![sys::VersionRsp {
            transport_rev: 2,
            product_id: 1,
            major_rel: 2,
            minor_rel: 7,
            maint_rel: 1,
            code_revision: Some(20220219),
            bootloader_build_type: Some(0),
            bootloader_revision: Some(0),
        }
        .to_frame()];
    }

    if sys::ResetReq::from_frame(frame).is_ok() {
        return vec![reset_ind(ResetReason::External)];
    }

    if let Ok(req) = sys::OsalNvLength::from_frame(frame) {
        let len = state
            .lock()
            .legacy_nv
            .get(&req.id)
            .map(|v| v.len())
            .unwrap_or(0);
        return vec![sys::OsalNvLengthRsp {
            item_len: len as u16,
        }
        .to_frame()];
    }

    if let Ok(req) = sys::OsalNvReadExt::from_frame(frame) {
        let state = state.lock();
        let rsp = match state.legacy_nv.get(&req.id) {
            Some(value) => {
                let offset = req.offset as usize;
                let end = value.len().min(offset + 244);
                sys::OsalNvReadExtRsp {
                    status: Status::Success,
                    value: ShortBytes(value[offset..end].to_vec()),
                }
            }
            None => sys::OsalNvReadExtRsp {
                status: Status::InvalidParameter,
                value: ShortBytes(Vec::new()),
            },
        };
        return vec![rsp.to_frame()];
    }

    if let Ok(req) = sys::OsalNvRead::from_frame(frame) {
        let state = state.lock();
        let rsp = match state.legacy_nv.get(&req.id) {
            Some(value) => sys::OsalNvReadRsp {
                status: Status::Success,
                value: ShortBytes(value[req.offset as usize..].to_vec()),
            },
            None => sys::OsalNvReadRsp {
                status: Status::InvalidParameter,
                value: ShortBytes(Vec::new()),
            },
        };
        return vec![rsp.to_frame()];
    }

    if let Ok(req) = sys::OsalNvItemInit::from_frame(frame) {
        let mut state = state.lock();
        let status = if state.legacy_nv.contains_key(&req.id) {
            Status::Success
        } else {
            let mut value = vec![0; req.item_len as usize];
            let seed = &req.value.0;
            value[..seed.len().min(req.item_len as usize)]
                .copy_from_slice(&seed[..seed.len().min(req.item_len as usize)]);
            state.legacy_nv.insert(req.id, value);
            Status::NvItemUninit
        };
        return vec![sys::OsalNvItemInitRsp { status }.to_frame()];
    }

    if let Ok(req) = sys::OsalNvWriteExt::from_frame(frame) {
        let mut state = state.lock();
        let status = match state.legacy_nv.get_mut(&req.id) {
            Some(value) => {
                let offset = req.offset as usize;
                let end = offset + req.value.0.len();
                if end <= value.len() {
                    value[offset..end].copy_from_slice(&req.value.0);
                    Status::Success
                } else {
                    Status::InvalidParameter
                }
            }
            None => Status::InvalidParameter,
        };
        return vec![sys::OsalNvWriteExtRsp { status }.to_frame()];
    }

    if let Ok(req) = sys::OsalNvDelete::from_frame(frame) {
        let existed = state.lock().legacy_nv.remove(&req.id).is_some();
        return vec![sys::OsalNvDeleteRsp {
            status: if existed {
                Status::Success
            } else {
                Status::NvItemUninit
            },
        }
        .to_frame()];
    }

    if let Ok(req) = sys::NvLength::from_frame(frame) {
        let len = state
            .lock()
            .extended_nv
            .get(&(req.sys_id, req.item_id, req.sub_id))
            .map(|v| v.len())
            .unwrap_or(0);
        return vec![sys::NvLengthRsp { length: len as u32 }.to_frame()];
    }

    if let Ok(req) = sys::NvRead::from_frame(frame) {
        let state = state.lock();
        let rsp = match state.extended_nv.get(&(req.sys_id, req.item_id, req.sub_id)) {
            Some(value) => {
                let offset = req.offset as usize;
                let end = value.len().min(offset + req.length as usize);
                sys::NvReadRsp {
                    status: Status::Success,
                    value: ShortBytes(value[offset..end].to_vec()),
                }
            }
            None => sys::NvReadRsp {
                status: Status::InvalidParameter,
                value: ShortBytes(Vec::new()),
            },
        };
        return vec![rsp.to_frame()];
    }

    if let Ok(req) = sys::NvCreate::from_frame(frame) {
        let mut state = state.lock();
        let key = (req.sys_id, req.item_id, req.sub_id);
        let status = if state.extended_nv.contains_key(&key) {
            Status::Success
        } else {
            state.extended_nv.insert(key, vec![0; req.length as usize]);
            Status::NvItemUninit
        };
        return vec![sys::NvCreateRsp { status }.to_frame()];
    }

    if let Ok(req) = sys::NvWrite::from_frame(frame) {
        let mut state = state.lock();
        let status = match state.extended_nv.get_mut(&(req.sys_id, req.item_id, req.sub_id)) {
            Some(value) => {
                let offset = req.offset as usize;
                let end = offset + req.value.0.len();
                if end <= value.len() {
                    value[offset..end].copy_from_slice(&req.value.0);
                    Status::Success
                } else {
                    Status::InvalidParameter
                }
            }
            None => Status::InvalidParameter,
        };
        return vec![sys::NvWriteRsp { status }.to_frame()];
    }

    if let Ok(req) = sys::NvDelete::from_frame(frame) {
        let existed = state
            .lock()
            .extended_nv
            .remove(&(req.sys_id, req.item_id, req.sub_id))
            .is_some();
        return vec![sys::NvDeleteRsp {
            status: if existed {
                Status::Success
            } else {
                Status::NvItemUninit
            },
        }
        .to_frame()];
    }

    if sys::SetTxPower::from_frame(frame).is_ok() {
        return vec![sys::SetTxPowerRsp { status_or_power: 0 }.to_frame()];
    }

    // UTIL --------------------------------------------------------------
    if util::GetDeviceInfo::from_frame(frame).is_ok() {
        return vec![util::GetDeviceInfoRsp {
            status: Status::Success,
            ieee: SIM_IEEE,
            nwk: Nwk::COORDINATOR,
            device_type: 0x07,
            device_state: DeviceState::StartedAsCoordinator,
            associated_devices: LvList(Vec::new()),
        }
        .to_frame()];
    }

    if util::LedControl::from_frame(frame).is_ok() {
        return vec![util::LedControlRsp {
            status: Status::Success,
        }
        .to_frame()];
    }

    // AppConfig ---------------------------------------------------------
    if let Ok(req) = app_config::BdbSetChannel::from_frame(frame) {
        if req.is_primary {
            state.lock().bdb_primary_channels = req.channel;
        }
        return vec![app_config::BdbSetChannelRsp {
            status: Status::Success,
        }
        .to_frame()];
    }

    if app_config::BdbStartCommissioning::from_frame(frame).is_ok() {
        form_network(state);
        return vec![
            app_config::BdbStartCommissioningRsp {
                status: Status::Success,
            }
            .to_frame(),
            app_config::BdbCommissioningNotification {
                status: znp_host::types::CommissioningStatus::Success,
                mode: znp_host::types::CommissioningMode::NWK_FORMATION,
                remaining_modes: znp_host::types::CommissioningMode::NONE,
            }
            .to_frame(),
            zdo::StateChangeInd {
                state: DeviceState::StartedAsCoordinator,
            }
            .to_frame(),
        ];
    }

    // ZDO ---------------------------------------------------------------
    if zdo::StartupFromApp::from_frame(frame).is_ok() {
        return vec![
            zdo::StartupFromAppRsp {
                state: StartupState::RestoredNetworkState,
            }
            .to_frame(),
            zdo::StateChangeInd {
                state: DeviceState::StartedAsCoordinator,
            }
            .to_frame(),
        ];
    }

    if zdo::MsgCallbackRegister::from_frame(frame).is_ok() {
        return vec![zdo::MsgCallbackRegisterRsp {
            status: Status::Success,
        }
        .to_frame()];
    }

    if let Ok(req) = zdo::MgmtPermitJoinReq::from_frame(frame) {
        return vec![
            zdo::MgmtPermitJoinReqRsp {
                status: Status::Success,
            }
            .to_frame(),
            zdo::MgmtPermitJoinRsp {
                src: Nwk::COORDINATOR,
                status: Status::Success,
            }
            .to_frame(),
            zdo::PermitJoinInd {
                duration: req.duration,
            }
            .to_frame(),
        ];
    }

    if let Ok(req) = zdo::ActiveEpReq::from_frame(frame) {
        return vec![
            zdo::ActiveEpReqRsp {
                status: Status::Success,
            }
            .to_frame(),
            zdo::ActiveEpRsp {
                src: req.dst_addr,
                status: Status::Success,
                nwk: req.nwk_addr_of_interest,
                active_endpoints: LvList(vec![1]),
            }
            .to_frame(),
        ];
    }

    // AF ----------------------------------------------------------------
    if af::Register::from_frame(frame).is_ok() {
        return vec![af::RegisterRsp {
            status: Status::Success,
        }
        .to_frame()];
    }

    if let Ok(req) = af::DataRequest::from_frame(frame) {
        let mut responses = vec![af::DataRequestRsp {
            status: Status::Success,
        }
        .to_frame()];

        let confirm = af::DataConfirm {
            status: Status::Success,
            endpoint: req.src_endpoint,
            tsn: req.tsn,
        }
        .to_frame();

        let mut state = state.lock();
        state.pending_confirms.push(confirm);
        if state.pending_confirms.len() >= state.options.confirm_batch {
            // Deliver the batch in reverse arrival order
            while let Some(frame) = state.pending_confirms.pop() {
                responses.push(frame);
            }
        }

        return responses;
    }

    log::debug!("Simulator ignoring frame: {}", frame);
    Vec::new()
}

/// Lay down the NVRAM a successful formation leaves behind.
fn form_network(state: &Arc<Mutex<SimState>>) {
    let mut state = state.lock();

    let channel = state.bdb_primary_channels.iter().next().unwrap_or(11);

    let mut nib = Nib::default();
    nib.nwk_dev_address = Nwk::COORDINATOR;
    nib.nwk_logical_channel = channel;
    nib.nwk_pan_id = SIM_PAN_ID;
    nib.channel_list = state.bdb_primary_channels.0;
    nib.extended_pan_id = SIM_EXT_PAN_ID;
    nib.nwk_key_loaded = true;
    nib.nwk_coord_address = Nwk::COORDINATOR;

    // The simulated chip stores aligned structs, like a real CC2652
    state.legacy_nv.insert(0x0021, nib.to_bytes(true)); // NIB
    state.legacy_nv.insert(0x0055, vec![1]); // BDBNODEISONANETWORK
}
