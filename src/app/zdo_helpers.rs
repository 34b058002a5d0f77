//! Typed ZDO request helpers.
//!
//! A ZDO exchange is one SREQ (accepted with a status) followed by an AREQ
//! indication carrying the actual answer, correlated on the address of
//! interest. Every helper installs its indication waiter before sending so
//! a fast answer cannot be missed, and checks the SRSP status before
//! waiting so a rejected request fails immediately instead of timing out.

use super::adapter::Adapter;
use crate::bus::WaiterHandle;
use crate::commands::{zdo, Callback, MtCommand, SyncRequest};
use crate::error::{ensure_success, Error, Result};
use crate::types::{AddrRequestType, Ieee, LeaveOptions, LvList, Nwk, Status};

/// Run one SREQ + indication exchange with eager status checking.
fn exchange<R, C, A, P>(
    adapter: &Adapter,
    name: &'static str,
    request: &R,
    accepted: A,
    matches: P,
) -> Result<C>
where
    R: SyncRequest,
    C: Callback,
    A: Fn(&R::Rsp) -> Status,
    P: Fn(&C) -> bool + Send + 'static,
{
    let waiter: WaiterHandle<C> = adapter.bus.wait_for(matches);
    let rsp = adapter.bus.request(request)?;
    ensure_success(name, accepted(&rsp))?;
    waiter.wait(adapter.bus.timeouts().arsp)
}

fn check_zdo_status(name: &str, status: Status) -> Result<()> {
    if status == Status::Success {
        Ok(())
    } else {
        Err(Error::command_status(name, status))
    }
}

/// Look up a device's IEEE address by short address.
pub fn ieee_addr(adapter: &Adapter, nwk: Nwk) -> Result<Ieee> {
    let callback = exchange(
        adapter,
        zdo::IeeeAddrReq::NAME,
        &zdo::IeeeAddrReq {
            nwk,
            request_type: AddrRequestType::Single,
            start_index: 0,
        },
        |rsp| rsp.status,
        move |rsp: &zdo::IeeeAddrRsp| rsp.nwk == nwk,
    )?;
    check_zdo_status(zdo::IeeeAddrReq::NAME, callback.status)?;
    Ok(callback.ieee)
}

/// Look up a device's short address by IEEE address.
pub fn nwk_addr(adapter: &Adapter, ieee: Ieee) -> Result<Nwk> {
    let callback = exchange(
        adapter,
        zdo::NwkAddrReq::NAME,
        &zdo::NwkAddrReq {
            ieee,
            request_type: AddrRequestType::Single,
            start_index: 0,
        },
        |rsp| rsp.status,
        move |rsp: &zdo::NwkAddrRsp| rsp.ieee == ieee,
    )?;
    check_zdo_status(zdo::NwkAddrReq::NAME, callback.status)?;
    Ok(callback.nwk)
}

/// Query the active endpoints of a device.
pub fn active_endpoints(adapter: &Adapter, nwk: Nwk) -> Result<Vec<u8>> {
    let callback = exchange(
        adapter,
        zdo::ActiveEpReq::NAME,
        &zdo::ActiveEpReq {
            dst_addr: nwk,
            nwk_addr_of_interest: nwk,
        },
        |rsp| rsp.status,
        move |rsp: &zdo::ActiveEpRsp| rsp.nwk == nwk,
    )?;
    check_zdo_status(zdo::ActiveEpReq::NAME, callback.status)?;
    Ok(callback.active_endpoints.0)
}

/// Query the node descriptor of a device.
pub fn node_descriptor(adapter: &Adapter, nwk: Nwk) -> Result<zdo::NodeDescriptor> {
    let callback = exchange(
        adapter,
        zdo::NodeDescReq::NAME,
        &zdo::NodeDescReq {
            dst_addr: nwk,
            nwk_addr_of_interest: nwk,
        },
        |rsp| rsp.status,
        move |rsp: &zdo::NodeDescRsp| rsp.nwk == nwk,
    )?;
    check_zdo_status(zdo::NodeDescReq::NAME, callback.status)?;

    callback
        .node_descriptor
        .and_then(|nullable| nullable.0)
        .ok_or_else(|| Error::command_status(zdo::NodeDescReq::NAME, Status::Failure))
}

/// Query the simple descriptor of one endpoint on a device.
pub fn simple_descriptor(
    adapter: &Adapter,
    nwk: Nwk,
    endpoint: u8,
) -> Result<zdo::SimpleDescriptor> {
    let callback = exchange(
        adapter,
        zdo::SimpleDescReq::NAME,
        &zdo::SimpleDescReq {
            dst_addr: nwk,
            nwk_addr_of_interest: nwk,
            endpoint,
        },
        |rsp| rsp.status,
        move |rsp: &zdo::SimpleDescRsp| {
            rsp.nwk == nwk && rsp.simple_descriptor.endpoint == endpoint
        },
    )?;
    check_zdo_status(zdo::SimpleDescReq::NAME, callback.status)?;
    Ok(callback.simple_descriptor)
}

/// Read one slice of a device's neighbor table.
pub fn lqi_table(adapter: &Adapter, nwk: Nwk, start_index: u8) -> Result<zdo::MgmtLqiRsp> {
    let callback = exchange(
        adapter,
        zdo::MgmtLqiReq::NAME,
        &zdo::MgmtLqiReq {
            dst: nwk,
            start_index,
        },
        |rsp| rsp.status,
        move |rsp: &zdo::MgmtLqiRsp| rsp.src == nwk,
    )?;
    check_zdo_status(zdo::MgmtLqiReq::NAME, callback.status)?;
    Ok(callback)
}

/// Read one slice of a device's routing table.
pub fn routing_table(adapter: &Adapter, nwk: Nwk, start_index: u8) -> Result<zdo::MgmtRtgRsp> {
    let callback = exchange(
        adapter,
        zdo::MgmtRtgReq::NAME,
        &zdo::MgmtRtgReq {
            dst: nwk,
            start_index,
        },
        |rsp| rsp.status,
        move |rsp: &zdo::MgmtRtgRsp| rsp.src == nwk,
    )?;
    check_zdo_status(zdo::MgmtRtgReq::NAME, callback.status)?;
    Ok(callback)
}

/// Read one slice of a device's binding table.
pub fn binding_table(adapter: &Adapter, nwk: Nwk, start_index: u8) -> Result<zdo::MgmtBindRsp> {
    let callback = exchange(
        adapter,
        zdo::MgmtBindReq::NAME,
        &zdo::MgmtBindReq {
            dst: nwk,
            start_index,
        },
        |rsp| rsp.status,
        move |rsp: &zdo::MgmtBindRsp| rsp.src == nwk,
    )?;
    check_zdo_status(zdo::MgmtBindReq::NAME, callback.status)?;
    Ok(callback)
}

/// Create a binding on a remote device.
pub fn bind(
    adapter: &Adapter,
    dst: Nwk,
    src: Ieee,
    src_endpoint: u8,
    cluster_id: u16,
    address: zdo::BindAddress,
) -> Result<()> {
    let callback = exchange(
        adapter,
        zdo::BindReq::NAME,
        &zdo::BindReq {
            dst,
            src,
            src_endpoint,
            cluster_id,
            address,
        },
        |rsp| rsp.status,
        move |rsp: &zdo::BindRsp| rsp.src == dst,
    )?;
    check_zdo_status(zdo::BindReq::NAME, callback.status)
}

/// Remove a binding from a remote device.
pub fn unbind(
    adapter: &Adapter,
    dst: Nwk,
    src: Ieee,
    src_endpoint: u8,
    cluster_id: u16,
    address: zdo::BindAddress,
) -> Result<()> {
    let callback = exchange(
        adapter,
        zdo::UnbindReq::NAME,
        &zdo::UnbindReq {
            dst,
            src,
            src_endpoint,
            cluster_id,
            address,
        },
        |rsp| rsp.status,
        move |rsp: &zdo::UnbindRsp| rsp.src == dst,
    )?;
    check_zdo_status(zdo::UnbindReq::NAME, callback.status)
}

/// Ask a device to leave the network.
pub fn leave(adapter: &Adapter, dst: Nwk, ieee: Ieee, rejoin: bool) -> Result<()> {
    let options = if rejoin {
        LeaveOptions::REJOIN
    } else {
        LeaveOptions::NONE
    };

    let callback = exchange(
        adapter,
        zdo::MgmtLeaveReq::NAME,
        &zdo::MgmtLeaveReq {
            dst_addr: dst,
            ieee,
            options,
        },
        |rsp| rsp.status,
        move |rsp: &zdo::MgmtLeaveRsp| rsp.src == dst,
    )?;
    check_zdo_status(zdo::MgmtLeaveReq::NAME, callback.status)
}

/// Find endpoints on a device matching a profile and cluster set.
pub fn match_descriptors(
    adapter: &Adapter,
    nwk: Nwk,
    profile_id: u16,
    input_clusters: Vec<u16>,
    output_clusters: Vec<u16>,
) -> Result<Vec<u8>> {
    let callback = exchange(
        adapter,
        zdo::MatchDescReq::NAME,
        &zdo::MatchDescReq {
            dst_addr: nwk,
            nwk_addr_of_interest: nwk,
            profile_id,
            input_clusters: LvList(input_clusters),
            output_clusters: LvList(output_clusters),
        },
        |rsp| rsp.status,
        move |rsp: &zdo::MatchDescRsp| rsp.nwk == nwk,
    )?;
    check_zdo_status(zdo::MatchDescReq::NAME, callback.status)?;
    Ok(callback.match_list.0)
}

/// Open or close joining at one device, waiting for its answer.
pub fn permit_join(
    adapter: &Adapter,
    request: &zdo::MgmtPermitJoinReq,
    answered_by: Nwk,
) -> Result<()> {
    let callback = exchange(
        adapter,
        zdo::MgmtPermitJoinReq::NAME,
        request,
        |rsp| rsp.status,
        move |rsp: &zdo::MgmtPermitJoinRsp| rsp.src == answered_by,
    )?;
    check_zdo_status(zdo::MgmtPermitJoinReq::NAME, callback.status)
}
