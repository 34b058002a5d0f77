//! ZDO subsystem: device and service discovery, binding, network
//! management, startup and the indications that drive the device table.

use super::{mt_callback, mt_sreq};
use crate::types::wire_enum;
use crate::types::{
    AddrMode, AddrRequestType, Bytes, Channels, Decode, DecodeError, Encode, Ieee, KeyData,
    LeaveOptions, LvList, MacCapabilities, Nwk, PanId, Reader, ShortBytes, StartupState, Status,
};
use crate::types::DeviceState;

wire_enum! {
    /// Route discovery options for `ExtRouteDisc`.
    pub enum RouteDiscoveryOptions: u8 {
        Unicast = 0x00,
        MtoWithRouteCache = 0x01,
        MtoWithoutRouteCache = 0x03,
    }
}

wire_enum! {
    /// Routing table entry states.
    pub enum RouteStatus: u8 {
        Init = 0x00,
        Active = 0x01,
        Disc = 0x02,
        LinkFail = 0x03,
        Repair = 0x04,
    }
}

wire_enum! {
    /// Result of `ExtRouteChk`.
    pub enum RoutingStatus: u8 {
        Success = 0x00,
        Fail = 0x01,
        TblFull = 0x02,
        HigherCost = 0x03,
        NoEntry = 0x04,
        InvalidPath = 0x05,
        InvalidParam = 0x06,
        SrcTblFull = 0x07,
    }
}

/// Route request option bits for `ExtRouteChk`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteOptions(pub u8);

impl RouteOptions {
    pub const MTO_ROUTE: RouteOptions = RouteOptions(0x01);
    pub const NO_ROUTE_CACHE: RouteOptions = RouteOptions(0x02);
}

impl std::ops::BitOr for RouteOptions {
    type Output = RouteOptions;

    fn bitor(self, rhs: RouteOptions) -> RouteOptions {
        RouteOptions(self.0 | rhs.0)
    }
}

impl Encode for RouteOptions {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.0.encode(buf);
    }
}

impl Decode for RouteOptions {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(RouteOptions(u8::decode(r)?))
    }
}

/// Bind/unbind destination: a group or an endpoint on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindAddress {
    Group(u16),
    Endpoint { ieee: Ieee, endpoint: u8 },
}

impl Encode for BindAddress {
    fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            BindAddress::Group(group) => {
                AddrMode::Group.encode(buf);
                group.encode(buf);
            }
            BindAddress::Endpoint { ieee, endpoint } => {
                AddrMode::Ieee.encode(buf);
                ieee.encode(buf);
                endpoint.encode(buf);
            }
        }
    }
}

impl Decode for BindAddress {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        match AddrMode::decode(r)? {
            AddrMode::Group => Ok(BindAddress::Group(u16::decode(r)?)),
            AddrMode::Ieee => Ok(BindAddress::Endpoint {
                ieee: Ieee::decode(r)?,
                endpoint: u8::decode(r)?,
            }),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

/// ZDO node descriptor (13 bytes, bitfields kept raw).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeDescriptor {
    /// Logical type in bits 0-2, complex/user descriptor flags in 3-4
    pub byte1: u8,
    /// APS flags in bits 0-3, frequency band in 4-7
    pub byte2: u8,
    pub mac_capability_flags: MacCapabilities,
    pub manufacturer_code: u16,
    pub max_buffer_size: u8,
    pub max_incoming_transfer_size: u16,
    pub server_mask: u16,
    pub max_outgoing_transfer_size: u16,
    pub descriptor_capability: u8,
}

impl NodeDescriptor {
    pub fn logical_type(&self) -> u8 {
        self.byte1 & 0x07
    }
}

impl Encode for NodeDescriptor {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.byte1.encode(buf);
        self.byte2.encode(buf);
        self.mac_capability_flags.encode(buf);
        self.manufacturer_code.encode(buf);
        self.max_buffer_size.encode(buf);
        self.max_incoming_transfer_size.encode(buf);
        self.server_mask.encode(buf);
        self.max_outgoing_transfer_size.encode(buf);
        self.descriptor_capability.encode(buf);
    }
}

impl Decode for NodeDescriptor {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            byte1: u8::decode(r)?,
            byte2: u8::decode(r)?,
            mac_capability_flags: MacCapabilities::decode(r)?,
            manufacturer_code: u16::decode(r)?,
            max_buffer_size: u8::decode(r)?,
            max_incoming_transfer_size: u16::decode(r)?,
            server_mask: u16::decode(r)?,
            max_outgoing_transfer_size: u16::decode(r)?,
            descriptor_capability: u8::decode(r)?,
        })
    }
}

/// Node descriptor that some firmware serialises as a lone zero byte when
/// the query failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullableNodeDescriptor(pub Option<NodeDescriptor>);

impl Encode for NullableNodeDescriptor {
    fn encode(&self, buf: &mut Vec<u8>) {
        match &self.0 {
            Some(desc) => desc.encode(buf),
            None => buf.push(0),
        }
    }
}

impl Decode for NullableNodeDescriptor {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        if r.remaining() == 1 {
            u8::decode(r)?;
            return Ok(NullableNodeDescriptor(None));
        }
        Ok(NullableNodeDescriptor(Some(NodeDescriptor::decode(r)?)))
    }
}

/// ZDO simple descriptor, length-prefixed as it appears in `SimpleDescRsp`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimpleDescriptor {
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub device_version: u8,
    pub input_clusters: LvList<u16>,
    pub output_clusters: LvList<u16>,
}

impl Encode for SimpleDescriptor {
    fn encode(&self, buf: &mut Vec<u8>) {
        let mut inner = Vec::new();
        self.endpoint.encode(&mut inner);
        self.profile_id.encode(&mut inner);
        self.device_id.encode(&mut inner);
        self.device_version.encode(&mut inner);
        self.input_clusters.encode(&mut inner);
        self.output_clusters.encode(&mut inner);

        buf.push(inner.len() as u8);
        buf.extend_from_slice(&inner);
    }
}

impl Decode for SimpleDescriptor {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let len = u8::decode(r)? as usize;
        let mut inner = Reader::new(r.take(len)?);
        let desc = Self {
            endpoint: u8::decode(&mut inner)?,
            profile_id: u16::decode(&mut inner)?,
            device_id: u16::decode(&mut inner)?,
            device_version: u8::decode(&mut inner)?,
            input_clusters: LvList::decode(&mut inner)?,
            output_clusters: LvList::decode(&mut inner)?,
        };
        inner.finish()?;
        Ok(desc)
    }
}

/// Neighbor table entry in `MgmtLqiRsp`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Neighbor {
    pub extended_pan_id: Ieee,
    pub ieee: Ieee,
    pub nwk: Nwk,
    /// device type (bits 0-1), rx-on-when-idle (2-3), relationship (4-6)
    pub packed: u8,
    pub permit_joining: u8,
    pub depth: u8,
    pub lqi: u8,
}

impl Neighbor {
    pub fn relationship(&self) -> u8 {
        (self.packed >> 4) & 0x07
    }

    pub fn device_type(&self) -> u8 {
        self.packed & 0x03
    }

    pub fn rx_on_when_idle(&self) -> bool {
        (self.packed >> 2) & 0x03 == 1
    }
}

impl Encode for Neighbor {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.extended_pan_id.encode(buf);
        self.ieee.encode(buf);
        self.nwk.encode(buf);
        self.packed.encode(buf);
        self.permit_joining.encode(buf);
        self.depth.encode(buf);
        self.lqi.encode(buf);
    }
}

impl Decode for Neighbor {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            extended_pan_id: Ieee::decode(r)?,
            ieee: Ieee::decode(r)?,
            nwk: Nwk::decode(r)?,
            packed: u8::decode(r)?,
            permit_joining: u8::decode(r)?,
            depth: u8::decode(r)?,
            lqi: u8::decode(r)?,
        })
    }
}

/// Routing table entry in `MgmtRtgRsp`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Route {
    pub dst: Nwk,
    /// status (bits 0-2), memory-constrained/many-to-one/route-record flags
    pub packed: u8,
    pub next_hop: Nwk,
}

impl Route {
    pub fn status(&self) -> RouteStatus {
        RouteStatus::from(self.packed & 0x07)
    }
}

impl Encode for Route {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.dst.encode(buf);
        self.packed.encode(buf);
        self.next_hop.encode(buf);
    }
}

impl Decode for Route {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            dst: Nwk::decode(r)?,
            packed: u8::decode(r)?,
            next_hop: Nwk::decode(r)?,
        })
    }
}

/// Binding table entry in `MgmtBindRsp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindEntry {
    pub src: Ieee,
    pub src_endpoint: u8,
    pub cluster_id: u16,
    pub dst: BindAddress,
}

impl Encode for BindEntry {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.src.encode(buf);
        self.src_endpoint.encode(buf);
        self.cluster_id.encode(buf);
        self.dst.encode(buf);
    }
}

impl Decode for BindEntry {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            src: Ieee::decode(r)?,
            src_endpoint: u8::decode(r)?,
            cluster_id: u16::decode(r)?,
            dst: BindAddress::decode(r)?,
        })
    }
}

/// Discovered network in `MgmtNwkDiscRsp`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveredNetwork {
    pub pan_id: PanId,
    pub channel: u8,
    pub stack_profile_version: u8,
    pub beacon_order_superframe: u8,
    pub permit_joining: u8,
}

impl Encode for DiscoveredNetwork {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.pan_id.encode(buf);
        self.channel.encode(buf);
        self.stack_profile_version.encode(buf);
        self.beacon_order_superframe.encode(buf);
        self.permit_joining.encode(buf);
    }
}

impl Decode for DiscoveredNetwork {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            pan_id: PanId::decode(r)?,
            channel: u8::decode(r)?,
            stack_profile_version: u8::decode(r)?,
            beacon_order_superframe: u8::decode(r)?,
            permit_joining: u8::decode(r)?,
        })
    }
}

/// Beacon observed during a scan, reported by `BeaconNotifyInd`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Beacon {
    pub src: Nwk,
    pub pan_id: PanId,
    pub channel: u8,
    pub permit_joining: u8,
    pub router_capacity: u8,
    pub device_capacity: u8,
    pub protocol_version: u8,
    pub stack_profile: u8,
    pub lqi: u8,
    pub depth: u8,
    pub update_id: u8,
    pub extended_pan_id: Ieee,
}

impl Encode for Beacon {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.src.encode(buf);
        self.pan_id.encode(buf);
        self.channel.encode(buf);
        self.permit_joining.encode(buf);
        self.router_capacity.encode(buf);
        self.device_capacity.encode(buf);
        self.protocol_version.encode(buf);
        self.stack_profile.encode(buf);
        self.lqi.encode(buf);
        self.depth.encode(buf);
        self.update_id.encode(buf);
        self.extended_pan_id.encode(buf);
    }
}

impl Decode for Beacon {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            src: Nwk::decode(r)?,
            pan_id: PanId::decode(r)?,
            channel: u8::decode(r)?,
            permit_joining: u8::decode(r)?,
            router_capacity: u8::decode(r)?,
            device_capacity: u8::decode(r)?,
            protocol_version: u8::decode(r)?,
            stack_profile: u8::decode(r)?,
            lqi: u8::decode(r)?,
            depth: u8::decode(r)?,
            update_id: u8::decode(r)?,
            extended_pan_id: Ieee::decode(r)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

mt_sreq! {
    /// Broadcast a lookup of the short address owning an IEEE address.
    /// Answered over the air by `NwkAddrRsp`.
    Zdo/0x00 => NwkAddrReq {
        pub ieee: Ieee,
        pub request_type: AddrRequestType,
        pub start_index: u8,
    } -> NwkAddrReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Look up a device's IEEE address by its short address.
    Zdo/0x01 => IeeeAddrReq {
        pub nwk: Nwk,
        pub request_type: AddrRequestType,
        pub start_index: u8,
    } -> IeeeAddrReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Query a device's node descriptor.
    Zdo/0x02 => NodeDescReq {
        pub dst_addr: Nwk,
        pub nwk_addr_of_interest: Nwk,
    } -> NodeDescReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Query a device's power descriptor.
    Zdo/0x03 => PowerDescReq {
        pub dst_addr: Nwk,
        pub nwk_addr_of_interest: Nwk,
    } -> PowerDescReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Query the simple descriptor of one endpoint.
    Zdo/0x04 => SimpleDescReq {
        pub dst_addr: Nwk,
        pub nwk_addr_of_interest: Nwk,
        pub endpoint: u8,
    } -> SimpleDescReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Query a device's active endpoint list.
    Zdo/0x05 => ActiveEpReq {
        pub dst_addr: Nwk,
        pub nwk_addr_of_interest: Nwk,
    } -> ActiveEpReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Find endpoints matching a profile and cluster lists.
    Zdo/0x06 => MatchDescReq {
        pub dst_addr: Nwk,
        pub nwk_addr_of_interest: Nwk,
        pub profile_id: u16,
        pub input_clusters: LvList<u16>,
        pub output_clusters: LvList<u16>,
    } -> MatchDescReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Query a device's complex descriptor.
    Zdo/0x07 => ComplexDescReq {
        pub dst_addr: Nwk,
        pub nwk_addr_of_interest: Nwk,
    } -> ComplexDescReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Query a device's user descriptor.
    Zdo/0x08 => UserDescReq {
        pub dst_addr: Nwk,
        pub nwk_addr_of_interest: Nwk,
    } -> UserDescReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Broadcast an end-device announce for ourselves.
    Zdo/0x0A => EndDeviceAnnce {
        pub nwk: Nwk,
        pub ieee: Ieee,
        pub capabilities: MacCapabilities,
    } -> EndDeviceAnnceRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Write a device's user descriptor.
    Zdo/0x0B => UserDescSet {
        pub dst_addr: Nwk,
        pub nwk: Nwk,
        pub user_descriptor: ShortBytes,
    } -> UserDescSetRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Discover system servers matching a mask.
    Zdo/0x0C => ServerDiscReq {
        pub server_mask: u16,
    } -> ServerDiscReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Request an end-device bind at the coordinator.
    Zdo/0x20 => EndDeviceBindReq {
        pub dst_addr: Nwk,
        pub local_coordinator: Nwk,
        pub ieee: Ieee,
        pub endpoint: u8,
        pub profile_id: u16,
        pub input_clusters: LvList<u16>,
        pub output_clusters: LvList<u16>,
    } -> EndDeviceBindReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Create a binding on a remote device.
    Zdo/0x21 => BindReq {
        pub dst: Nwk,
        pub src: Ieee,
        pub src_endpoint: u8,
        pub cluster_id: u16,
        pub address: BindAddress,
    } -> BindReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Remove a binding from a remote device.
    Zdo/0x22 => UnbindReq {
        pub dst: Nwk,
        pub src: Ieee,
        pub src_endpoint: u8,
        pub cluster_id: u16,
        pub address: BindAddress,
    } -> UnbindReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Set an application link key for a device.
    Zdo/0x23 => SetLinkKey {
        pub nwk: Nwk,
        pub ieee: Ieee,
        pub link_key: KeyData,
    } -> SetLinkKeyRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Remove the application link key of a device.
    Zdo/0x24 => RemoveLinkKey {
        pub ieee: Ieee,
    } -> RemoveLinkKeyRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Read back the application link key of a device.
    Zdo/0x25 => GetLinkKey {
        pub ieee: Ieee,
    } -> GetLinkKeyRsp {
        pub status: Status,
        pub ieee: Ieee,
        pub link_key: KeyData,
    }
}

mt_sreq! {
    /// Start an active network scan.
    Zdo/0x26 => NetworkDiscoveryReq {
        pub channels: Channels,
        pub scan_duration: u8,
    } -> NetworkDiscoveryReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Join a specific PAN through a chosen parent.
    Zdo/0x27 => JoinReq {
        pub logical_channel: u8,
        pub pan_id: PanId,
        pub extended_pan_id: Ieee,
        pub chosen_parent: Nwk,
        pub depth: u8,
        pub stack_profile: u8,
    } -> JoinReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Send a raw ZDO message.
    Zdo/0x28 => SendData {
        pub dst: Nwk,
        pub tsn: u8,
        pub command_id: u16,
        pub data: Bytes,
    } -> SendDataRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Network-address-of-interest request.
    Zdo/0x29 => NwkAddrOfInterestReq {
        pub nwk: Nwk,
        pub nwk_addr_of_interest: Nwk,
        pub cmd: u8,
    } -> NwkAddrOfInterestReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Ask a device to scan for networks on our behalf.
    Zdo/0x30 => MgmtNwkDiscReq {
        pub dst: Nwk,
        pub channels: Channels,
        pub scan_duration: u8,
        pub start_index: u8,
    } -> MgmtNwkDiscReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Read a device's neighbor table.
    Zdo/0x31 => MgmtLqiReq {
        pub dst: Nwk,
        pub start_index: u8,
    } -> MgmtLqiReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Read a device's routing table.
    Zdo/0x32 => MgmtRtgReq {
        pub dst: Nwk,
        pub start_index: u8,
    } -> MgmtRtgReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Read a device's binding table.
    Zdo/0x33 => MgmtBindReq {
        pub dst: Nwk,
        pub start_index: u8,
    } -> MgmtBindReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Ask a device (or ourselves) to leave the network.
    Zdo/0x34 => MgmtLeaveReq {
        pub dst_addr: Nwk,
        pub ieee: Ieee,
        pub options: LeaveOptions,
    } -> MgmtLeaveReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Direct-join a device into a parent's tables.
    Zdo/0x35 => MgmtDirectJoinReq {
        pub dst: Nwk,
        pub ieee: Ieee,
        pub capabilities: MacCapabilities,
    } -> MgmtDirectJoinReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Open or close the network for joining. The result arrives in
    /// `MgmtPermitJoinRsp` from the addressed device.
    Zdo/0x36 => MgmtPermitJoinReq {
        pub addr_mode: AddrMode,
        pub dst: Nwk,
        pub duration: u8,
        pub tc_significance: u8,
    } -> MgmtPermitJoinReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Network update: channel changes, energy scans, manager changes.
    Zdo/0x37 => MgmtNwkUpdateReq {
        pub dst: Nwk,
        pub dst_addr_mode: AddrMode,
        pub channels: Channels,
        pub scan_duration: u8,
        pub scan_count: u8,
        pub nwk_manager_addr: Nwk,
    } -> MgmtNwkUpdateReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Subscribe to the ZDO callback of one cluster id (0xFFFF for all).
    Zdo/0x3E => MsgCallbackRegister {
        pub cluster_id: u16,
    } -> MsgCallbackRegisterRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Unsubscribe a ZDO cluster callback.
    Zdo/0x3F => MsgCallbackRemove {
        pub cluster_id: u16,
    } -> MsgCallbackRemoveRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Start the stack. On Z-Stack 3 this kicks off BDB commissioning and
    /// the result is always "restored"; watch `StateChangeInd` instead.
    Zdo/0x40 => StartupFromApp {
        pub start_delay: u16,
    } -> StartupFromAppRsp {
        pub state: StartupState,
    }
}

mt_sreq! {
    /// Security extension: add a link key.
    Zdo/0x42 => SecAddLinkKey {
        pub nwk: Nwk,
        pub ieee: Ieee,
        pub link_key: KeyData,
    } -> SecAddLinkKeyRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Security extension: look up an address-manager entry.
    Zdo/0x43 => SecEntryLookupExt {
        pub ieee: Ieee,
        pub entry: [u8; 5],
    } -> SecEntryLookupExtRsp {
        pub ami: u16,
        pub key_nv_id: u16,
        pub option: u8,
    }
}

mt_sreq! {
    /// Security extension: remove a device and its keys.
    Zdo/0x44 => SecDeviceRemove {
        pub ieee: Ieee,
    } -> SecDeviceRemoveRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Kick off a route discovery.
    Zdo/0x45 => ExtRouteDisc {
        pub dst: Nwk,
        pub options: RouteDiscoveryOptions,
        pub radius: u8,
    } -> ExtRouteDiscRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Check the routing table for a destination.
    Zdo/0x46 => ExtRouteChk {
        pub dst: Nwk,
        pub rt_status: RouteStatus,
        pub options: RouteOptions,
    } -> ExtRouteChkRsp {
        pub status: RoutingStatus,
    }
}

mt_sreq! {
    /// Remove one group from an endpoint.
    Zdo/0x47 => ExtRemoveGroup {
        pub endpoint: u8,
        pub group_id: u16,
    } -> ExtRemoveGroupRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Remove all groups from an endpoint.
    Zdo/0x48 => ExtRemoveAllGroups {
        pub endpoint: u8,
    } -> ExtRemoveAllGroupsRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// List the groups of an endpoint.
    Zdo/0x49 => ExtFindAllGroupsEndpoint {
        pub endpoint: u8,
        pub groups: u16,
    } -> ExtFindAllGroupsEndpointRsp {
        pub groups: LvList<u16>,
    }
}

mt_sreq! {
    /// Look up one group on an endpoint.
    Zdo/0x4A => ExtFindGroup {
        pub endpoint: u8,
        pub group_id: u16,
    } -> ExtFindGroupRsp {
        pub group: Bytes,
    }
}

mt_sreq! {
    /// Add an endpoint to a group.
    Zdo/0x4B => ExtAddGroup {
        pub endpoint: u8,
        pub group_id: u16,
        pub group_name: ShortBytes,
    } -> ExtAddGroupRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Count all groups.
    Zdo/0x4C => ExtCountAllGroups {} -> ExtCountAllGroupsRsp {
        pub group_count: u8,
    }
}

mt_sreq! {
    /// Get or set the MAC rx-on-when-idle flag.
    Zdo/0x4D => ExtRxIdle {
        pub set_flag: u8,
        pub set_value: u8,
    } -> ExtRxIdleRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Distribute a new network key.
    Zdo/0x4E => ExtUpdateNwkKey {
        pub dst: Nwk,
        pub key_seq_num: u8,
        pub key: KeyData,
    } -> ExtUpdateNwkKeyRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Switch the network to a previously distributed key.
    Zdo/0x4F => ExtSwitchNwkKey {
        pub dst: Nwk,
        pub key_seq_num: u8,
    } -> ExtSwitchNwkKeyRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Read the running network parameters.
    Zdo/0x50 => ExtNwkInfo {} -> ExtNwkInfoRsp {
        pub dev: Nwk,
        pub pan_id: PanId,
        pub parent_nwk: Nwk,
        pub extended_pan_id: Ieee,
        pub parent_ieee: Ieee,
        pub channel: u8,
    }
}

mt_sreq! {
    /// Security manager APS remove.
    Zdo/0x51 => ExtSecApsRemoveReq {
        pub nwk: Nwk,
        pub ieee: Ieee,
        pub parent_nwk: Nwk,
    } -> ExtSecApsRemoveReqRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Re-read concentrator settings from NV and restart advertisement.
    Zdo/0x52 => ForceConcentratorChange {} -> ForceConcentratorChangeRsp {}
}

mt_sreq! {
    /// Set parameters with no NV representation.
    Zdo/0x53 => ExtSetParams {
        pub use_multicast: bool,
    } -> ExtSetParamsRsp {
        pub status: Status,
    }
}

mt_sreq! {
    /// Startup variant letting routers form distributed networks.
    Zdo/0x54 => StartupFromAppExt {
        pub start_delay: u16,
        pub mode: bool,
    } -> StartupFromAppExtRsp {
        pub state: StartupState,
    }
}

// ---------------------------------------------------------------------------
// Indications
// ---------------------------------------------------------------------------

mt_callback! {
    /// Over-the-air answer to `NwkAddrReq`.
    Zdo/0x80 => NwkAddrRsp {
        pub status: Status,
        pub ieee: Ieee,
        pub nwk: Nwk,
        pub num_assoc: u8,
        pub start_index: u8,
        pub devices: Vec<Nwk>,
    }
}

mt_callback! {
    /// Over-the-air answer to `IeeeAddrReq`.
    Zdo/0x81 => IeeeAddrRsp {
        pub status: Status,
        pub ieee: Ieee,
        pub nwk: Nwk,
        pub num_assoc: u8,
        pub start_index: u8,
        pub devices: Vec<Nwk>,
    }
}

mt_callback! {
    /// Answer to `NodeDescReq`.
    Zdo/0x82 => NodeDescRsp {
        pub src: Nwk,
        pub status: Status,
        pub nwk: Nwk,
        pub node_descriptor: Option<NullableNodeDescriptor>,
    }
}

mt_callback! {
    /// Answer to `PowerDescReq`.
    Zdo/0x83 => PowerDescRsp {
        pub src: Nwk,
        pub status: Status,
        pub nwk: Nwk,
        /// current power mode / available sources / current source & level
        pub power_descriptor: u16,
    }
}

mt_callback! {
    /// Answer to `SimpleDescReq`.
    Zdo/0x84 => SimpleDescRsp {
        pub src: Nwk,
        pub status: Status,
        pub nwk: Nwk,
        pub simple_descriptor: SimpleDescriptor,
    }
}

mt_callback! {
    /// Answer to `ActiveEpReq`.
    Zdo/0x85 => ActiveEpRsp {
        pub src: Nwk,
        pub status: Status,
        pub nwk: Nwk,
        pub active_endpoints: LvList<u8>,
    }
}

mt_callback! {
    /// Answer to `MatchDescReq`.
    Zdo/0x86 => MatchDescRsp {
        pub src: Nwk,
        pub status: Status,
        pub nwk: Nwk,
        pub match_list: LvList<u8>,
    }
}

mt_callback! {
    /// Answer to `ComplexDescReq`.
    Zdo/0x87 => ComplexDescRsp {
        pub src: Nwk,
        pub status: Status,
        pub nwk: Nwk,
        pub complex_desc: ShortBytes,
    }
}

mt_callback! {
    /// Answer to `UserDescReq`.
    Zdo/0x88 => UserDescRsp {
        pub src: Nwk,
        pub status: Status,
        pub nwk: Nwk,
        pub user_desc: ShortBytes,
    }
}

mt_callback! {
    /// A user descriptor write completed.
    Zdo/0x89 => UserDescCnf {
        pub src: Nwk,
        pub status: Status,
        pub nwk: Nwk,
    }
}

mt_callback! {
    /// Answer to `ServerDiscReq`.
    Zdo/0x8A => ServerDiscRsp {
        pub src: Nwk,
        pub status: Status,
        pub server_mask: u16,
    }
}

mt_callback! {
    /// Parent announce aggregation result.
    Zdo/0x9F => ParentAnnceRsp {
        pub src: Nwk,
        pub status: Status,
        pub child_info: LvList<Ieee>,
    }
}

mt_callback! {
    /// Answer to `EndDeviceBindReq`.
    Zdo/0xA0 => EndDeviceBindRsp {
        pub src: Nwk,
        pub status: Status,
    }
}

mt_callback! {
    /// Answer to `BindReq`.
    Zdo/0xA1 => BindRsp {
        pub src: Nwk,
        pub status: Status,
    }
}

mt_callback! {
    /// Answer to `UnbindReq`.
    Zdo/0xA2 => UnbindRsp {
        pub src: Nwk,
        pub status: Status,
    }
}

mt_callback! {
    /// Answer to `MgmtNwkDiscReq`.
    Zdo/0xB0 => MgmtNwkDiscRsp {
        pub src: Nwk,
        pub status: Status,
        pub network_count: u8,
        pub start_index: u8,
        pub networks: LvList<DiscoveredNetwork>,
    }
}

mt_callback! {
    /// Answer to `MgmtLqiReq`: a slice of the neighbor table.
    Zdo/0xB1 => MgmtLqiRsp {
        pub src: Nwk,
        pub status: Status,
        pub entries: u8,
        pub start_index: u8,
        pub neighbors: LvList<Neighbor>,
    }
}

mt_callback! {
    /// Answer to `MgmtRtgReq`: a slice of the routing table.
    Zdo/0xB2 => MgmtRtgRsp {
        pub src: Nwk,
        pub status: Status,
        pub entries: u8,
        pub start_index: u8,
        pub routes: LvList<Route>,
    }
}

mt_callback! {
    /// Answer to `MgmtBindReq`: a slice of the binding table.
    Zdo/0xB3 => MgmtBindRsp {
        pub src: Nwk,
        pub status: Status,
        pub entries: u8,
        pub start_index: u8,
        pub bind_table: LvList<BindEntry>,
    }
}

mt_callback! {
    /// Answer to `MgmtLeaveReq`.
    Zdo/0xB4 => MgmtLeaveRsp {
        pub src: Nwk,
        pub status: Status,
    }
}

mt_callback! {
    /// Answer to `MgmtDirectJoinReq`.
    Zdo/0xB5 => MgmtDirectJoinRsp {
        pub src: Nwk,
        pub status: Status,
    }
}

mt_callback! {
    /// Answer to `MgmtPermitJoinReq`.
    Zdo/0xB6 => MgmtPermitJoinRsp {
        pub src: Nwk,
        pub status: Status,
    }
}

mt_callback! {
    /// Energy scan / channel change report.
    Zdo/0xB8 => MgmtNwkUpdateNotify {
        pub src: Nwk,
        pub status: Status,
        pub scanned_channels: Channels,
        pub total_transmissions: u16,
        pub transmission_failures: u16,
        pub energy_values: LvList<u8>,
    }
}

mt_callback! {
    /// The stack's device state changed.
    Zdo/0xC0 => StateChangeInd {
        pub state: DeviceState,
    }
}

mt_callback! {
    /// A device (re)announced itself on the network.
    Zdo/0xC1 => EndDeviceAnnceInd {
        pub src: Nwk,
        pub nwk: Nwk,
        pub ieee: Ieee,
        pub capabilities: MacCapabilities,
    }
}

mt_callback! {
    /// We answered a match descriptor query.
    Zdo/0xC2 => MatchDescRspSent {
        pub nwk: Nwk,
        pub input_clusters: LvList<u16>,
        pub output_clusters: LvList<u16>,
    }
}

mt_callback! {
    /// Error status for a ZDO exchange with no dedicated response.
    Zdo/0xC3 => StatusErrorRsp {
        pub src: Nwk,
        pub status: Status,
    }
}

mt_callback! {
    /// Source route received from a device: the relay list messages from it
    /// travelled through, most recent first.
    Zdo/0xC4 => SrcRtgInd {
        pub dst_addr: Nwk,
        pub relays: LvList<Nwk>,
    }
}

mt_callback! {
    /// Beacons observed during a network discovery.
    Zdo/0xC5 => BeaconNotifyInd {
        pub beacons: LvList<Beacon>,
    }
}

mt_callback! {
    /// Our own join attempt finished.
    Zdo/0xC6 => JoinCnf {
        pub status: Status,
        pub nwk: Nwk,
        pub parent_nwk: Nwk,
    }
}

mt_callback! {
    /// A network discovery scan completed.
    Zdo/0xC7 => NwkDiscoveryCnf {
        pub status: Status,
    }
}

mt_callback! {
    /// Concentrator presence indication.
    Zdo/0xC8 => ConcentratorInd {
        pub nwk: Nwk,
        pub ieee: Ieee,
        pub pkt_cost: u8,
    }
}

mt_callback! {
    /// A device left the network.
    Zdo/0xC9 => LeaveInd {
        pub nwk: Nwk,
        pub ieee: Ieee,
        pub request: bool,
        pub remove_children: bool,
        pub rejoin: bool,
    }
}

mt_callback! {
    /// A device joined through the trust center.
    Zdo/0xCA => TcDevInd {
        pub src_nwk: Nwk,
        pub src_ieee: Ieee,
        pub parent_nwk: Nwk,
    }
}

mt_callback! {
    /// The coordinator's permit-join state changed (Z-Stack 1.2 and 3.0).
    Zdo/0xCB => PermitJoinInd {
        pub duration: u8,
    }
}

mt_callback! {
    /// Raw ZDO message for a cluster registered with `MsgCallbackRegister`.
    Zdo/0xFF => MsgCbIncoming {
        pub src: Nwk,
        pub is_broadcast: bool,
        pub cluster_id: u16,
        pub security_use: u8,
        pub tsn: u8,
        pub mac_dst: Nwk,
        pub data: Bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::MtCommand;

    #[test]
    fn test_simple_descriptor_round_trip() {
        let desc = SimpleDescriptor {
            endpoint: 1,
            profile_id: 0x0104,
            device_id: 0x0005,
            device_version: 0,
            input_clusters: LvList(vec![0x0000, 0x0006]),
            output_clusters: LvList(vec![0x0019]),
        };

        let mut buf = Vec::new();
        desc.encode(&mut buf);
        // length prefix + endpoint + profile + device + version + 1+4 + 1+2
        assert_eq!(buf[0] as usize, buf.len() - 1);

        let mut r = Reader::new(&buf);
        assert_eq!(SimpleDescriptor::decode(&mut r).unwrap(), desc);
    }

    #[test]
    fn test_nullable_node_descriptor() {
        let mut r = Reader::new(&[0x00]);
        assert_eq!(
            NullableNodeDescriptor::decode(&mut r).unwrap(),
            NullableNodeDescriptor(None)
        );
    }

    #[test]
    fn test_bind_address_variants() {
        let group = BindAddress::Group(0x0010);
        let mut buf = Vec::new();
        group.encode(&mut buf);
        assert_eq!(buf, [0x01, 0x10, 0x00]);

        let endpoint = BindAddress::Endpoint {
            ieee: Ieee(0xAABB),
            endpoint: 3,
        };
        buf.clear();
        endpoint.encode(&mut buf);
        assert_eq!(buf.len(), 10);
        let mut r = Reader::new(&buf);
        assert_eq!(BindAddress::decode(&mut r).unwrap(), endpoint);
    }

    #[test]
    fn test_permit_join_req_layout() {
        let req = MgmtPermitJoinReq {
            addr_mode: crate::types::AddrMode::Broadcast,
            dst: Nwk::BROADCAST_ROUTERS,
            duration: 60,
            tc_significance: 1,
        };
        assert_eq!(req.to_frame().payload, vec![0x0F, 0xFC, 0xFF, 60, 1]);
    }

    #[test]
    fn test_state_change_ind_decode() {
        let frame = StateChangeInd {
            state: DeviceState::StartedAsCoordinator,
        }
        .to_frame();
        assert_eq!(frame.payload, vec![0x09]);
        assert_eq!(
            StateChangeInd::from_frame(&frame).unwrap().state,
            DeviceState::StartedAsCoordinator
        );
    }
}
