//! Outgoing data requests: transaction ids, concurrency limiting and the
//! fault-tolerant send path.

use super::adapter::Adapter;
use crate::commands::{af, util, zdo, MtCommand};
use crate::error::{Error, Result};
use crate::types::{
    AddrModeAddress, Ieee, LongBytes, LvList, NodeRelation, Nwk, ShortBytes, Status, TxOptions,
};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::thread;
use std::time::Duration;

/// Attempts before a request is abandoned.
const REQUEST_MAX_RETRIES: usize = 5;

/// Base delay between attempts.
const REQUEST_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Deadline for the `AF.DataConfirm` after an accepted request.
const DATA_CONFIRM_TIMEOUT: Duration = Duration::from_secs(8);

/// Payloads under this size fit the plain `AF.DataRequest`.
const SHORT_PAYLOAD_MAX: usize = 128;

/// Statuses that clear up on their own after a short wait.
fn is_transient(status: Status) -> bool {
    matches!(
        status,
        Status::BufferFull
            | Status::MacChannelAccessFailure
            | Status::MacTransactionOverflow
            | Status::MacNoResources
            | Status::MemError
            | Status::NwkTableFull
    )
}

/// Statuses hinting that the route to the device is broken.
fn is_routing_error(status: Status) -> bool {
    matches!(
        status,
        Status::ApsNoAck
            | Status::ApsNotAuthenticated
            | Status::NwkNoRoute
            | Status::NwkInvalidRequest
            | Status::MacNoAck
            | Status::MacTransactionExpired
    )
}

/// Counting semaphore bounding concurrent data requests to what the
/// coprocessor's transmit buffers can hold. Excess callers block.
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    pub fn acquire(&self) -> SemaphoreGuard<'_> {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
        SemaphoreGuard { semaphore: self }
    }
}

pub struct SemaphoreGuard<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        let mut permits = self.semaphore.permits.lock();
        *permits += 1;
        self.semaphore.available.notify_one();
    }
}

/// Transaction sequence number pool: monotonically increasing u8 with
/// wraparound, skipping ids still in flight.
pub struct TsnPool {
    state: Mutex<TsnState>,
}

struct TsnState {
    next: u8,
    in_flight: HashSet<u8>,
}

impl TsnPool {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TsnState {
                next: 0,
                in_flight: HashSet::new(),
            }),
        }
    }

    /// Number of transaction ids currently claimed.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Claim the next free transaction id.
    pub fn allocate(&self) -> Result<TsnGuard<'_>> {
        let mut state = self.state.lock();

        for _ in 0..=u8::MAX {
            let candidate = state.next;
            state.next = state.next.wrapping_add(1);

            if state.in_flight.insert(candidate) {
                return Ok(TsnGuard {
                    pool: self,
                    tsn: candidate,
                });
            }
        }

        // 256 requests in flight would mean the semaphore is broken
        Err(Error::State("Transaction id space exhausted".to_string()))
    }
}

impl Default for TsnPool {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TsnGuard<'a> {
    pool: &'a TsnPool,
    tsn: u8,
}

impl TsnGuard<'_> {
    pub fn tsn(&self) -> u8 {
        self.tsn
    }
}

impl Drop for TsnGuard<'_> {
    fn drop(&mut self) {
        self.pool.state.lock().in_flight.remove(&self.tsn);
    }
}

/// A fully-specified outgoing application frame.
#[derive(Debug, Clone)]
pub struct DataRequest {
    pub dst: AddrModeAddress,
    pub dst_endpoint: u8,
    pub src_endpoint: u8,
    pub cluster_id: u16,
    pub radius: u8,
    pub ack: bool,
    pub payload: Vec<u8>,
    /// Force the frame through these relays (last-known source route)
    pub relays: Option<Vec<Nwk>>,
}

impl DataRequest {
    pub fn unicast(dst: Nwk, cluster_id: u16, dst_endpoint: u8, payload: Vec<u8>) -> Self {
        Self {
            dst: AddrModeAddress::Nwk(dst),
            dst_endpoint,
            src_endpoint: 1,
            cluster_id,
            radius: 30,
            ack: true,
            payload,
            relays: None,
        }
    }

    pub fn broadcast(dst: Nwk, cluster_id: u16, dst_endpoint: u8, payload: Vec<u8>) -> Self {
        Self {
            dst: AddrModeAddress::Broadcast(dst),
            dst_endpoint,
            src_endpoint: 1,
            cluster_id,
            radius: 30,
            ack: false,
            payload,
            relays: None,
        }
    }

    pub fn multicast(group: u16, cluster_id: u16, src_endpoint: u8, payload: Vec<u8>) -> Self {
        Self {
            dst: AddrModeAddress::Group(group),
            dst_endpoint: src_endpoint,
            src_endpoint,
            cluster_id,
            radius: 30,
            ack: false,
            payload,
            relays: None,
        }
    }

    fn tx_options(&self) -> TxOptions {
        let mut options = TxOptions::SUPPRESS_ROUTE_DISC;
        if self.ack {
            options = options | TxOptions::ACK_REQUEST;
        }
        options
    }

    fn expects_confirm(&self) -> bool {
        matches!(self.dst, AddrModeAddress::Nwk(_) | AddrModeAddress::Ieee(_))
    }
}

/// Delivery outcome of a data request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataConfirmResult {
    pub status: Status,
    pub tsn: u8,
}

/// Issue the request once: pick the right AF command, send the SREQ and
/// wait for the matching confirm.
fn send_raw(adapter: &Adapter, request: &DataRequest, tsn: u8) -> Result<DataConfirmResult> {
    let confirm_waiter = request
        .expects_confirm()
        .then(|| adapter.bus.wait_for(move |c: &af::DataConfirm| c.tsn == tsn));

    let options = request.tx_options();

    let srsp_status = match (&request.dst, &request.relays) {
        (AddrModeAddress::Nwk(dst), None) if request.payload.len() < SHORT_PAYLOAD_MAX => {
            adapter
                .bus
                .request(&af::DataRequest {
                    dst_addr: *dst,
                    dst_endpoint: request.dst_endpoint,
                    src_endpoint: request.src_endpoint,
                    cluster_id: request.cluster_id,
                    tsn,
                    options,
                    radius: request.radius,
                    data: ShortBytes(request.payload.clone()),
                })?
                .status
        }
        (AddrModeAddress::Nwk(dst), Some(relays)) => {
            adapter
                .bus
                .request(&af::DataRequestSrcRtg {
                    dst_addr: *dst,
                    dst_endpoint: request.dst_endpoint,
                    src_endpoint: request.src_endpoint,
                    cluster_id: request.cluster_id,
                    tsn,
                    options,
                    radius: request.radius,
                    source_route: LvList(relays.clone()),
                    data: ShortBytes(request.payload.clone()),
                })?
                .status
        }
        _ => {
            adapter
                .bus
                .request(&af::DataRequestExt {
                    dst_addr: request.dst,
                    dst_endpoint: request.dst_endpoint,
                    dst_pan_id: crate::types::PanId(0x0000),
                    src_endpoint: request.src_endpoint,
                    cluster_id: request.cluster_id,
                    tsn,
                    options,
                    radius: request.radius,
                    data: LongBytes(request.payload.clone()),
                })?
                .status
        }
    };

    if srsp_status != Status::Success {
        return Err(Error::command_status(af::DataRequest::NAME, srsp_status));
    }

    let Some(waiter) = confirm_waiter else {
        // Broadcasts and group casts get no useful confirm
        return Ok(DataConfirmResult {
            status: Status::Success,
            tsn,
        });
    };

    let confirm = waiter.wait(DATA_CONFIRM_TIMEOUT)?;

    if confirm.status != Status::Success {
        return Err(Error::command_status(af::DataConfirm::NAME, confirm.status));
    }

    Ok(DataConfirmResult {
        status: confirm.status,
        tsn,
    })
}

/// Ask the firmware to rediscover the route to a device. Route discovery on
/// CC2531-era firmware is unreliable, so this is 3.30+ only.
pub fn discover_route(adapter: &Adapter, dst: Nwk) -> Result<()> {
    if !adapter.version.has_extended_nv() {
        return Ok(());
    }

    adapter.bus.request(&zdo::ExtRouteDisc {
        dst,
        options: zdo::RouteDiscoveryOptions::Unicast,
        radius: 30,
    })?;

    // Give the discovery a moment to propagate
    thread::sleep(Duration::from_millis(1300));
    Ok(())
}

/// Context the retry ladder can pull on when a unicast keeps failing.
pub struct DeliveryHints {
    pub ieee: Option<Ieee>,
    /// Last-known relay list from `ZDO.SrcRtgInd`, coordinator-first
    pub relays: Option<Vec<Nwk>>,
}

/// Send with retries and route repair, mirroring what the device table
/// knows about the destination.
pub fn send_with_retries(
    adapter: &Adapter,
    request: &DataRequest,
    tsn: u8,
    hints: &DeliveryHints,
) -> Result<DataConfirmResult> {
    let mut request = request.clone();
    let mut last_status = Status::Failure;

    let mut tried_last_good_route = false;
    let mut tried_route_discovery = false;
    let mut tried_ieee_address = false;
    let mut removed_association: Option<(Nwk, NodeRelation)> = None;

    let result = (|| {
        for attempt in 1..=REQUEST_MAX_RETRIES {
            match send_raw(adapter, &request, tsn) {
                Ok(result) => return Ok(result),
                Err(Error::CommandStatus { status, .. }) => {
                    last_status = status;

                    if !is_transient(status) && !is_routing_error(status) {
                        return Err(Error::command_status(af::DataRequest::NAME, status));
                    }

                    log::debug!(
                        "Request {} failed with {:?}, attempt {}/{}",
                        tsn,
                        status,
                        attempt,
                        REQUEST_MAX_RETRIES
                    );

                    // Transient congestion: wait longer and try again as-is
                    if attempt == 1 || is_transient(status) || !request.expects_confirm() {
                        thread::sleep(3 * REQUEST_RETRY_DELAY);
                        continue;
                    }

                    // Routing failures: escalate through the repair ladder
                    if status == Status::MacTransactionExpired
                        && removed_association.is_none()
                        && hints.ieee.is_some()
                        && adapter.version.has_extended_nv()
                    {
                        // Child aging is off, so a child that moved to
                        // another parent must be dropped manually before
                        // routes to it can re-form.
                        if let Some(assoc) = remove_stale_association(adapter, hints.ieee.unwrap())?
                        {
                            removed_association = Some(assoc);
                            if let AddrModeAddress::Nwk(dst) = request.dst {
                                discover_route(adapter, dst)?;
                            }
                            continue;
                        }
                    }

                    if !tried_last_good_route {
                        tried_last_good_route = true;
                        if let Some(relays) = &hints.relays {
                            // Frames from the device travelled these relays;
                            // sending backwards along them may still work
                            let mut reversed = relays.clone();
                            reversed.reverse();
                            request.relays = Some(reversed);
                            continue;
                        }
                    } else {
                        request.relays = None;
                    }

                    if !tried_route_discovery {
                        tried_route_discovery = true;
                        if let AddrModeAddress::Nwk(dst) = request.dst {
                            discover_route(adapter, dst)?;
                            continue;
                        }
                    }

                    if !tried_ieee_address {
                        tried_ieee_address = true;
                        if let (AddrModeAddress::Nwk(_), Some(ieee)) = (request.dst, hints.ieee)
                        {
                            request.dst = AddrModeAddress::Ieee(ieee);
                            continue;
                        }
                    }

                    thread::sleep(REQUEST_RETRY_DELAY);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::command_status(af::DataRequest::NAME, last_status))
    })();

    // A dropped child must be re-associated if delivery still failed, or
    // it would become unreachable entirely.
    if result.is_err() {
        if let (Some((nwk, relation)), Some(ieee)) = (removed_association, hints.ieee) {
            let restore = adapter.bus.request(&util::AssocAdd {
                nwk,
                ieee,
                node_relation: relation,
            });
            if let Err(e) = restore {
                log::error!("Failed to restore association for {}: {}", ieee, e);
            }
        }
    }

    result
}

/// Drop a device from the association table if it is still listed there.
/// Returns what was removed so it can be restored on failure.
fn remove_stale_association(
    adapter: &Adapter,
    ieee: Ieee,
) -> Result<Option<(Nwk, NodeRelation)>> {
    let rsp = adapter.bus.request(&util::AssocGetWithAddress {
        ieee,
        nwk: Nwk(0x0000),
    })?;

    let relation = util::assoc_device_node_relation(&rsp.device.0);
    let nwk = util::assoc_device_short_addr(&rsp.device.0);

    let (Some(relation), Some(nwk)) = (relation, nwk) else {
        return Ok(None);
    };

    if relation == NodeRelation::NotUsed {
        return Ok(None);
    }

    match adapter.bus.request(&util::AssocRemove { ieee }) {
        Ok(rsp) if rsp.status == Status::Success => Ok(Some((nwk, relation))),
        Ok(_) => Ok(None),
        Err(Error::Protocol(_)) => {
            // Only Z-Stack 3 builds after 2020-10-17 have this command
            log::debug!("This firmware cannot remove associations");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tsn_pool_wraps_and_skips_in_flight() {
        let pool = TsnPool::new();

        let first = pool.allocate().unwrap();
        assert_eq!(first.tsn(), 0);

        let second = pool.allocate().unwrap();
        assert_eq!(second.tsn(), 1);

        drop(first);

        // Wrap all the way around; id 1 is still held and must be skipped
        let mut seen = Vec::new();
        let mut guards = Vec::new();
        for _ in 0..255 {
            let guard = pool.allocate().unwrap();
            seen.push(guard.tsn());
            guards.push(guard);
        }

        assert!(!seen.contains(&1));
        assert!(seen.contains(&0));
    }

    #[test]
    fn test_tsn_pool_exhaustion() {
        let pool = TsnPool::new();
        let _guards: Vec<_> = (0..256).map(|_| pool.allocate().unwrap()).collect();
        assert!(pool.allocate().is_err());
    }

    #[test]
    fn test_semaphore_blocks_excess_callers() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let semaphore = Arc::new(Semaphore::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let semaphore = Arc::clone(&semaphore);
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);

                thread::spawn(move || {
                    let _permit = semaphore.acquire();
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_transient_and_routing_classification() {
        assert!(is_transient(Status::BufferFull));
        assert!(is_transient(Status::MacChannelAccessFailure));
        assert!(!is_transient(Status::ApsNoAck));
        assert!(is_routing_error(Status::NwkNoRoute));
        assert!(is_routing_error(Status::MacTransactionExpired));
        assert!(!is_routing_error(Status::InvalidParameter));
    }

    #[test]
    fn test_request_constructors() {
        let unicast = DataRequest::unicast(Nwk(0x1234), 0x0006, 1, vec![1, 2, 3]);
        assert!(unicast.expects_confirm());
        assert!(unicast.tx_options().contains(TxOptions::ACK_REQUEST));

        let broadcast =
            DataRequest::broadcast(Nwk::BROADCAST_RX_ON, 0x0006, 1, vec![1, 2, 3]);
        assert!(!broadcast.expects_confirm());
        assert!(!broadcast.tx_options().contains(TxOptions::ACK_REQUEST));
    }
}
