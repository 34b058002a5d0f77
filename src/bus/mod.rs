//! The MT bus: command multiplexer over one serial transport.
//!
//! # Thread Model
//!
//! 1. **Writer Thread**: drains a channel of encoded frames and writes them
//!    to the port one at a time, so concurrent senders can never interleave
//!    frame bytes. Channel order is wire order.
//!
//! 2. **Reader Thread**: feeds received bytes through the frame codec and
//!    dispatches each frame:
//!    - SRSPs resolve the single in-flight synchronous request. A header
//!      mismatch or an `RPCError` response resolves it with an error. An
//!      SRSP with no request in flight is logged and discarded.
//!    - AREQs go to the first matching one-shot waiter, then to every
//!      matching subscription, in wire order.
//!
//! 3. **Watchdog Thread**: issues `SYS.Ping` on an interval; consecutive
//!    failures mark the bus disconnected.
//!
//! # SREQ Lane
//!
//! The firmware processes one synchronous request at a time, so SREQs take
//! a mutex for the full send/receive cycle. Requests queue on the mutex in
//! FIFO order. Timing out releases the lane; the late SRSP, if it ever
//! arrives, is discarded as unsolicited.
//!
//! # Disconnection
//!
//! A read or write failure fails every waiter with `Disconnected`, clears
//! the listener table and leaves the bus in a terminal state. Reconnection
//! means building a new bus; the driver's supervisor does this.

use crate::commands::{sys, AsyncRequest, Callback, MtCommand, SyncRequest};
use crate::error::{Error, ProtocolError, Result};
use crate::frame::{CommandHeader, CommandKind, FrameCodec, FrameStats, MtFrame, Subsystem};
use crate::transport::Transport;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Outbound queue depth. Writers block when the UART cannot drain.
const OUTBOUND_QUEUE: usize = 32;

/// Queue depth for subscriptions and one-shot waiters.
const DELIVERY_QUEUE: usize = 64;

/// Consecutive watchdog failures before the bus is declared dead.
const WATCHDOG_STRIKES: u32 = 2;

/// Timeouts applied by the bus.
#[derive(Debug, Clone, Copy)]
pub struct BusTimeouts {
    pub sreq: Duration,
    pub arsp: Duration,
    pub watchdog_interval: Duration,
}

impl Default for BusTimeouts {
    fn default() -> Self {
        Self {
            sreq: Duration::from_secs(15),
            arsp: Duration::from_secs(30),
            watchdog_interval: Duration::from_secs(30),
        }
    }
}

struct PendingSrsp {
    expected: CommandHeader,
    name: &'static str,
    tx: Sender<Result<MtFrame>>,
}

enum Delivery {
    OneShot(Sender<MtFrame>),
    Stream {
        tx: Sender<MtFrame>,
        /// Dropped-frame counter; `None` means block instead of dropping
        overflow: Option<Arc<AtomicU64>>,
    },
}

struct Waiter {
    id: u64,
    /// `None` matches any header; the predicate alone decides
    header: Option<CommandHeader>,
    matches: Box<dyn Fn(&MtFrame) -> bool + Send>,
    delivery: Delivery,
}

struct BusShared {
    outbound: Sender<Vec<u8>>,
    sreq_lane: Mutex<()>,
    pending_srsp: Mutex<Option<PendingSrsp>>,
    waiters: Mutex<Vec<Waiter>>,
    next_waiter_id: AtomicU64,
    disconnected: AtomicBool,
    shutdown: AtomicBool,
    stats: Arc<FrameStats>,
    timeouts: BusTimeouts,
}

impl BusShared {
    fn check_connected(&self) -> Result<()> {
        if self.disconnected.load(Ordering::Relaxed) {
            Err(Error::Disconnected)
        } else {
            Ok(())
        }
    }

    /// Queue an encoded frame for the writer thread.
    fn enqueue(&self, frame: &MtFrame) -> Result<()> {
        self.check_connected()?;
        log::trace!("Sending frame: {}", frame);
        self.outbound
            .send(frame.to_wire())
            .map_err(|_| Error::Disconnected)
    }

    /// Full SREQ/SRSP cycle for an already-encoded frame.
    fn raw_sreq(
        &self,
        name: &'static str,
        frame: &MtFrame,
        timeout: Duration,
    ) -> Result<MtFrame> {
        self.check_connected()?;

        let _lane = self.sreq_lane.lock();
        self.check_connected()?;

        let (tx, rx) = bounded(1);
        *self.pending_srsp.lock() = Some(PendingSrsp {
            expected: frame.header.srsp(),
            name,
            tx,
        });

        if let Err(e) = self.enqueue(frame) {
            *self.pending_srsp.lock() = None;
            return Err(e);
        }

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                // Late SRSPs become unsolicited and are discarded
                *self.pending_srsp.lock() = None;
                Err(Error::Timeout {
                    command: name.to_string(),
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::Disconnected),
        }
    }

    fn fail_all(&self) {
        self.disconnected.store(true, Ordering::Relaxed);

        // Dropping the senders closes every receiver, which callers map to
        // `Disconnected`.
        *self.pending_srsp.lock() = None;
        self.waiters.lock().clear();
    }

    /// Route one received frame.
    fn dispatch(&self, frame: MtFrame) {
        log::trace!("Received frame: {}", frame);

        match frame.header.kind {
            CommandKind::Srsp => self.dispatch_srsp(frame),
            CommandKind::Areq => self.dispatch_areq(frame),
            _ => {
                log::warn!("Ignoring unexpected host-bound frame: {}", frame);
            }
        }
    }

    fn dispatch_srsp(&self, frame: MtFrame) {
        let Some(pending) = self.pending_srsp.lock().take() else {
            log::warn!("Received an unsolicited SRSP, discarding: {}", frame);
            return;
        };

        // The firmware answers unknown commands with an RPCError SRSP that
        // echoes the rejected header.
        if frame.header.subsystem == Subsystem::RpcError && frame.header.id == 0x00 {
            log::warn!("{} is not recognized by this firmware", pending.name);
            let _ = pending.tx.send(Err(Error::Protocol(ProtocolError::UnknownCommand {
                command: pending.name.to_string(),
            })));
            return;
        }

        if frame.header != pending.expected {
            log::warn!(
                "SRSP header mismatch: expected {}, got {}",
                pending.expected,
                frame
            );
            let _ = pending.tx.send(Err(Error::Protocol(ProtocolError::UnexpectedSrsp {
                expected: pending.expected.to_string(),
                frame: frame.to_string(),
            })));
            return;
        }

        let _ = pending.tx.send(Ok(frame));
    }

    fn dispatch_areq(&self, frame: MtFrame) {
        // One-shot waiters get first claim; exactly one resolves.
        let one_shot = {
            let mut waiters = self.waiters.lock();
            let index = waiters.iter().position(|w| {
                matches!(w.delivery, Delivery::OneShot(_))
                    && w.header.map_or(true, |h| h == frame.header)
                    && (w.matches)(&frame)
            });
            index.map(|i| waiters.swap_remove(i))
        };

        let mut matched = one_shot.is_some();

        if let Some(waiter) = one_shot {
            if let Delivery::OneShot(tx) = waiter.delivery {
                let _ = tx.send(frame.clone());
            }
        }

        // Streams each get a copy, outside the lock so a slow subscriber
        // cannot block table updates.
        let streams: Vec<(u64, Sender<MtFrame>, Option<Arc<AtomicU64>>)> = {
            let waiters = self.waiters.lock();
            waiters
                .iter()
                .filter(|w| w.header.map_or(true, |h| h == frame.header) && (w.matches)(&frame))
                .filter_map(|w| match &w.delivery {
                    Delivery::Stream { tx, overflow } => {
                        Some((w.id, tx.clone(), overflow.clone()))
                    }
                    Delivery::OneShot(_) => None,
                })
                .collect()
        };

        let mut dead = Vec::new();

        for (id, tx, overflow) in streams {
            matched = true;
            match overflow {
                Some(counter) => match tx.try_send(frame.clone()) {
                    Ok(()) => {}
                    Err(crossbeam_channel::TrySendError::Full(_)) => {
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                        dead.push(id);
                    }
                },
                None => {
                    // Default backpressure: block delivery until the
                    // subscriber drains.
                    if tx.send(frame.clone()).is_err() {
                        dead.push(id);
                    }
                }
            }
        }

        if !dead.is_empty() {
            self.waiters.lock().retain(|w| !dead.contains(&w.id));
        }

        if !matched {
            log::debug!("Unhandled indication: {}", frame);
        }
    }
}

/// Handle for a one-shot AREQ waiter. Dropping it cancels the waiter.
pub struct WaiterHandle<C: Callback> {
    id: u64,
    rx: Receiver<MtFrame>,
    shared: Arc<BusShared>,
    _marker: PhantomData<C>,
}

impl<C: Callback> WaiterHandle<C> {
    /// Wait for the matching indication.
    pub fn wait(self, timeout: Duration) -> Result<C> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => C::from_frame(&frame),
            Err(RecvTimeoutError::Timeout) => {
                if self.shared.disconnected.load(Ordering::Relaxed) {
                    Err(Error::Disconnected)
                } else {
                    Err(Error::Timeout {
                        command: C::NAME.to_string(),
                    })
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::Disconnected),
        }
    }
}

impl<C: Callback> Drop for WaiterHandle<C> {
    fn drop(&mut self) {
        self.shared.waiters.lock().retain(|w| w.id != self.id);
    }
}

/// Streaming subscription to matching indications. Dropping unsubscribes.
pub struct Subscription<C: Callback> {
    id: u64,
    rx: Receiver<MtFrame>,
    shared: Arc<BusShared>,
    overflow: Option<Arc<AtomicU64>>,
    _marker: PhantomData<C>,
}

impl<C: Callback> Subscription<C> {
    pub fn recv_timeout(&self, timeout: Duration) -> Result<C> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => C::from_frame(&frame),
            Err(RecvTimeoutError::Timeout) => {
                if self.shared.disconnected.load(Ordering::Relaxed) {
                    Err(Error::Disconnected)
                } else {
                    Err(Error::Timeout {
                        command: C::NAME.to_string(),
                    })
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::Disconnected),
        }
    }

    pub fn try_recv(&self) -> Option<C> {
        self.rx.try_recv().ok().and_then(|f| C::from_frame(&f).ok())
    }

    /// Indications dropped because this subscriber fell behind. Always zero
    /// in the default blocking mode.
    pub fn overflow_count(&self) -> u64 {
        self.overflow
            .as_ref()
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl<C: Callback> Drop for Subscription<C> {
    fn drop(&mut self) {
        self.shared.waiters.lock().retain(|w| w.id != self.id);
    }
}

/// Untyped streaming subscription over a set of headers.
pub struct RawSubscription {
    id: u64,
    rx: Receiver<MtFrame>,
    shared: Arc<BusShared>,
}

impl RawSubscription {
    pub fn recv_timeout(&self, timeout: Duration) -> Result<MtFrame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => {
                if self.shared.disconnected.load(Ordering::Relaxed) {
                    Err(Error::Disconnected)
                } else {
                    Err(Error::Timeout {
                        command: "subscription".to_string(),
                    })
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::Disconnected),
        }
    }
}

impl Drop for RawSubscription {
    fn drop(&mut self) {
        self.shared.waiters.lock().retain(|w| w.id != self.id);
    }
}

/// The command multiplexer. See the module documentation.
pub struct MtBus {
    shared: Arc<BusShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl MtBus {
    /// Start the bus over a transport: spawns the writer, reader and
    /// watchdog threads.
    pub fn start(transport: Box<dyn Transport>, timeouts: BusTimeouts) -> Result<Self> {
        let (outbound_tx, outbound_rx) = bounded::<Vec<u8>>(OUTBOUND_QUEUE);
        let stats = Arc::new(FrameStats::default());

        let shared = Arc::new(BusShared {
            outbound: outbound_tx,
            sreq_lane: Mutex::new(()),
            pending_srsp: Mutex::new(None),
            waiters: Mutex::new(Vec::new()),
            next_waiter_id: AtomicU64::new(1),
            disconnected: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            stats: Arc::clone(&stats),
            timeouts,
        });

        let port = Arc::new(Mutex::new(transport));

        let writer_shared = Arc::clone(&shared);
        let writer_port = Arc::clone(&port);
        let writer_handle = thread::Builder::new()
            .name("znp-writer".to_string())
            .spawn(move || {
                writer_loop(writer_port, writer_shared, outbound_rx);
            })
            .map_err(|e| Error::Config(format!("Failed to spawn writer thread: {}", e)))?;

        let reader_shared = Arc::clone(&shared);
        let reader_port = Arc::clone(&port);
        let reader_stats = stats;
        let reader_handle = thread::Builder::new()
            .name("znp-reader".to_string())
            .spawn(move || {
                reader_loop(reader_port, reader_shared, reader_stats);
            })
            .map_err(|e| Error::Config(format!("Failed to spawn reader thread: {}", e)))?;

        let watchdog_shared = Arc::clone(&shared);
        let watchdog_handle = thread::Builder::new()
            .name("znp-watchdog".to_string())
            .spawn(move || {
                watchdog_loop(watchdog_shared);
            })
            .map_err(|e| Error::Config(format!("Failed to spawn watchdog thread: {}", e)))?;

        Ok(Self {
            shared,
            threads: Mutex::new(vec![writer_handle, reader_handle, watchdog_handle]),
        })
    }

    /// Whether the transport died.
    pub fn is_disconnected(&self) -> bool {
        self.shared.disconnected.load(Ordering::Relaxed)
    }

    /// Framing counters for diagnostics.
    pub fn frame_stats(&self) -> &FrameStats {
        &self.shared.stats
    }

    /// The timeouts the bus was configured with.
    pub fn timeouts(&self) -> BusTimeouts {
        self.shared.timeouts
    }

    /// Send an SREQ and wait for its SRSP.
    pub fn request<R: SyncRequest>(&self, request: &R) -> Result<R::Rsp> {
        self.request_with_timeout(request, self.shared.timeouts.sreq)
    }

    /// Send an SREQ with an explicit SRSP deadline.
    pub fn request_with_timeout<R: SyncRequest>(
        &self,
        request: &R,
        timeout: Duration,
    ) -> Result<R::Rsp> {
        let frame = request.to_frame();
        let rsp = self.shared.raw_sreq(R::NAME, &frame, timeout)?;
        R::Rsp::from_frame(&rsp)
    }

    /// Send a fire-and-forget AREQ.
    pub fn send<R: AsyncRequest>(&self, request: &R) -> Result<()> {
        self.shared.enqueue(&request.to_frame())
    }

    /// Install a one-shot waiter for an indication matching `matches`.
    ///
    /// The waiter is live from the moment this returns, so it can be
    /// installed before the request that provokes the indication is sent.
    pub fn wait_for<C: Callback>(
        &self,
        matches: impl Fn(&C) -> bool + Send + 'static,
    ) -> WaiterHandle<C> {
        let (tx, rx) = bounded(1);
        let id = self.install(
            Some(C::header()),
            typed_matcher::<C>(matches),
            Delivery::OneShot(tx),
        );

        WaiterHandle {
            id,
            rx,
            shared: Arc::clone(&self.shared),
            _marker: PhantomData,
        }
    }

    /// Send an SREQ and wait for both its SRSP and a matching indication.
    ///
    /// The indication waiter is installed before the request goes out, so
    /// an indication racing ahead of the SRSP is still captured.
    pub fn request_callback<R: SyncRequest, C: Callback>(
        &self,
        request: &R,
        matches: impl Fn(&C) -> bool + Send + 'static,
    ) -> Result<(R::Rsp, C)> {
        self.request_callback_with_timeout(request, matches, self.shared.timeouts.arsp)
    }

    pub fn request_callback_with_timeout<R: SyncRequest, C: Callback>(
        &self,
        request: &R,
        matches: impl Fn(&C) -> bool + Send + 'static,
        timeout: Duration,
    ) -> Result<(R::Rsp, C)> {
        let waiter = self.wait_for(matches);
        let rsp = self.request(request)?;
        let callback = waiter.wait(timeout)?;
        Ok((rsp, callback))
    }

    /// Subscribe to every indication matching `matches`. Delivery blocks
    /// the bus when the subscriber falls behind (the default backpressure).
    pub fn subscribe<C: Callback>(
        &self,
        matches: impl Fn(&C) -> bool + Send + 'static,
    ) -> Subscription<C> {
        self.subscribe_inner(matches, None)
    }

    /// Subscribe with drop-on-overflow delivery and a dropped-frame counter.
    pub fn subscribe_lossy<C: Callback>(
        &self,
        matches: impl Fn(&C) -> bool + Send + 'static,
    ) -> Subscription<C> {
        self.subscribe_inner(matches, Some(Arc::new(AtomicU64::new(0))))
    }

    fn subscribe_inner<C: Callback>(
        &self,
        matches: impl Fn(&C) -> bool + Send + 'static,
        overflow: Option<Arc<AtomicU64>>,
    ) -> Subscription<C> {
        let (tx, rx) = bounded(DELIVERY_QUEUE);
        let id = self.install(
            Some(C::header()),
            typed_matcher::<C>(matches),
            Delivery::Stream {
                tx,
                overflow: overflow.clone(),
            },
        );

        Subscription {
            id,
            rx,
            shared: Arc::clone(&self.shared),
            overflow,
            _marker: PhantomData,
        }
    }

    /// Subscribe to every indication whose header is in `headers`,
    /// delivered as raw frames. The driver's event pump uses this to fan a
    /// fixed set of indications into one channel.
    pub fn subscribe_headers(&self, headers: &[CommandHeader]) -> RawSubscription {
        let (tx, rx) = bounded(DELIVERY_QUEUE);
        let headers = headers.to_vec();
        let id = self.install(
            None,
            Box::new(move |frame| headers.contains(&frame.header)),
            Delivery::Stream { tx, overflow: None },
        );

        RawSubscription {
            id,
            rx,
            shared: Arc::clone(&self.shared),
        }
    }

    fn install(
        &self,
        header: Option<CommandHeader>,
        matches: Box<dyn Fn(&MtFrame) -> bool + Send>,
        delivery: Delivery,
    ) -> u64 {
        let id = self.shared.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        self.shared.waiters.lock().push(Waiter {
            id,
            header,
            matches,
            delivery,
        });
        id
    }

    /// Stop the bus threads and fail outstanding waiters.
    pub fn close(&self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        self.shared.fail_all();

        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for MtBus {
    fn drop(&mut self) {
        self.close();
    }
}

/// Wrap a typed predicate into a frame-level matcher.
fn typed_matcher<C: Callback>(
    matches: impl Fn(&C) -> bool + Send + 'static,
) -> Box<dyn Fn(&MtFrame) -> bool + Send> {
    Box::new(move |frame| match C::from_frame(frame) {
        Ok(decoded) => matches(&decoded),
        Err(_) => false,
    })
}

fn writer_loop(
    port: Arc<Mutex<Box<dyn Transport>>>,
    shared: Arc<BusShared>,
    outbound: Receiver<Vec<u8>>,
) {
    while !shared.shutdown.load(Ordering::Relaxed) {
        let data = match outbound.recv_timeout(Duration::from_millis(50)) {
            Ok(data) => data,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let result = {
            let mut port = port.lock();
            port.write_all(&data).and_then(|_| port.flush())
        };

        if let Err(e) = result {
            log::error!("Write failed, marking bus disconnected: {}", e);
            shared.fail_all();
            break;
        }
    }

    log::debug!("Writer thread exiting");
}

fn reader_loop(
    port: Arc<Mutex<Box<dyn Transport>>>,
    shared: Arc<BusShared>,
    stats: Arc<FrameStats>,
) {
    let mut codec = FrameCodec::new(stats);
    let mut buf = [0u8; 256];

    while !shared.shutdown.load(Ordering::Relaxed) {
        let read = {
            let mut port = port.lock();
            port.read(&mut buf)
        };

        match read {
            Ok(0) => {
                // Read timeout; yield so the writer can take the port
                thread::sleep(Duration::from_millis(1));
            }
            Ok(n) => {
                codec.feed(&buf[..n]);
                while let Some(frame) = codec.next_frame() {
                    shared.dispatch(frame);
                }
            }
            Err(e) => {
                if !shared.shutdown.load(Ordering::Relaxed) {
                    log::error!("Read failed, marking bus disconnected: {}", e);
                }
                shared.fail_all();
                break;
            }
        }
    }

    log::debug!("Reader thread exiting");
}

fn watchdog_loop(shared: Arc<BusShared>) {
    let interval = shared.timeouts.watchdog_interval;
    let mut strikes = 0u32;

    loop {
        // Sleep in small steps so shutdown is prompt
        let mut slept = Duration::ZERO;
        while slept < interval {
            if shared.shutdown.load(Ordering::Relaxed)
                || shared.disconnected.load(Ordering::Relaxed)
            {
                log::debug!("Watchdog thread exiting");
                return;
            }
            let step = Duration::from_millis(100).min(interval - slept);
            thread::sleep(step);
            slept += step;
        }

        let ping = sys::Ping {}.to_frame();
        match shared.raw_sreq(sys::Ping::NAME, &ping, shared.timeouts.sreq) {
            Ok(_) => {
                strikes = 0;
            }
            Err(Error::Disconnected) => {
                log::debug!("Watchdog thread exiting");
                return;
            }
            Err(e) => {
                strikes += 1;
                log::error!(
                    "Watchdog ping failed ({}/{}): {}",
                    strikes,
                    WATCHDOG_STRIKES,
                    e
                );
                if strikes >= WATCHDOG_STRIKES {
                    shared.fail_all();
                    log::debug!("Watchdog thread exiting");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{af, zdo};
    use crate::transport::{MockTransport, TestPort};
    use crate::types::{AddrMode, Capabilities, Nwk, ShortBytes, Status};

    fn fast_timeouts() -> BusTimeouts {
        BusTimeouts {
            sreq: Duration::from_millis(200),
            arsp: Duration::from_millis(500),
            // Long enough to stay out of the way of every test below
            watchdog_interval: Duration::from_secs(60),
        }
    }

    fn start_bus(timeouts: BusTimeouts) -> (MtBus, TestPort) {
        let (transport, port) = MockTransport::new();
        let bus = MtBus::start(Box::new(transport), timeouts).unwrap();
        (bus, port)
    }

    /// Parse every frame the driver has written so far.
    fn written_frames(data: &[u8]) -> Vec<MtFrame> {
        let mut codec = FrameCodec::new(Arc::new(FrameStats::default()));
        codec.feed(data);
        let mut frames = Vec::new();
        while let Some(frame) = codec.next_frame() {
            frames.push(frame);
        }
        frames
    }

    fn ping_rsp_frame() -> MtFrame {
        sys::PingRsp {
            capabilities: Capabilities::SYS | Capabilities::AF | Capabilities::ZDO,
        }
        .to_frame()
    }

    fn incoming_msg(tsn: u8) -> MtFrame {
        af::IncomingMsg {
            group_id: 0,
            cluster_id: 0x0006,
            src_addr: Nwk(0x1234),
            src_endpoint: 1,
            dst_endpoint: 1,
            was_broadcast: 0,
            lqi: 180,
            security_use: 0,
            timestamp: 0,
            tsn,
            data: ShortBytes(vec![tsn]),
        }
        .to_frame()
    }

    #[test]
    fn test_sreq_srsp_round_trip() {
        let (bus, port) = start_bus(fast_timeouts());
        let bus = Arc::new(bus);

        let worker = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.request(&sys::Ping {}))
        };

        let written = port.wait_for_written(5, Duration::from_secs(1));
        assert_eq!(written_frames(&written)[0], sys::Ping {}.to_frame());

        port.inject_frame(&ping_rsp_frame());
        let rsp = worker.join().unwrap().unwrap();
        assert!(rsp.capabilities.contains(Capabilities::ZDO));
    }

    #[test]
    fn test_sreq_timeout_then_next_succeeds() {
        let (bus, port) = start_bus(fast_timeouts());

        let err = bus.request(&sys::Ping {}).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));

        let bus = Arc::new(bus);
        let worker = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.request(&sys::Ping {}))
        };

        port.wait_for_written(10, Duration::from_secs(1));
        port.inject_frame(&ping_rsp_frame());
        assert!(worker.join().unwrap().is_ok());
    }

    #[test]
    fn test_sreqs_are_serialized() {
        let (bus, port) = start_bus(BusTimeouts {
            sreq: Duration::from_secs(5),
            ..fast_timeouts()
        });
        let bus = Arc::new(bus);

        let first = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.request(&sys::Ping {}))
        };
        port.wait_for_written(5, Duration::from_secs(1));

        let second = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.request(&sys::Version {}))
        };

        // The second SREQ must not hit the wire while the first is in flight
        thread::sleep(Duration::from_millis(100));
        assert_eq!(written_frames(&port.written()).len(), 1);

        port.inject_frame(&ping_rsp_frame());
        first.join().unwrap().unwrap();

        let written = port.wait_for_written(10, Duration::from_secs(1));
        assert_eq!(written_frames(&written)[1], sys::Version {}.to_frame());

        port.inject_frame(
            &sys::VersionRsp {
                transport_rev: 2,
                product_id: 1,
                major_rel: 2,
                minor_rel: 7,
                maint_rel: 1,
                code_revision: Some(20220219),
                bootloader_build_type: Some(0),
                bootloader_revision: Some(0),
            }
            .to_frame(),
        );
        second.join().unwrap().unwrap();
    }

    #[test]
    fn test_unsolicited_srsp_logged_and_discarded() {
        let (bus, port) = start_bus(fast_timeouts());

        port.inject_frame(&ping_rsp_frame());
        thread::sleep(Duration::from_millis(50));

        // The bus keeps working afterwards
        let bus = Arc::new(bus);
        let worker = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.request(&sys::Ping {}))
        };
        port.wait_for_written(5, Duration::from_secs(1));
        port.inject_frame(&ping_rsp_frame());
        assert!(worker.join().unwrap().is_ok());
    }

    #[test]
    fn test_srsp_header_mismatch_is_protocol_error() {
        let (bus, port) = start_bus(fast_timeouts());
        let bus = Arc::new(bus);

        let worker = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.request(&sys::Ping {}))
        };
        port.wait_for_written(5, Duration::from_secs(1));

        // Answer the ping with a version SRSP
        port.inject_frame(
            &sys::VersionRsp {
                transport_rev: 2,
                product_id: 1,
                major_rel: 2,
                minor_rel: 7,
                maint_rel: 1,
                code_revision: None,
                bootloader_build_type: None,
                bootloader_revision: None,
            }
            .to_frame(),
        );

        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnexpectedSrsp { .. })
        ));
    }

    #[test]
    fn test_command_not_recognized() {
        let (bus, port) = start_bus(fast_timeouts());
        let bus = Arc::new(bus);

        let worker = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.request(&sys::Ping {}))
        };
        port.wait_for_written(5, Duration::from_secs(1));

        let ping = sys::Ping {}.to_frame();
        port.inject_frame(
            &crate::commands::rpc_error::CommandNotRecognized {
                error_code: crate::commands::rpc_error::ErrorCode::InvalidCommandId,
                request_cmd0: ping.header.cmd0(),
                request_cmd1: ping.header.cmd1(),
            }
            .to_frame(),
        );

        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnknownCommand { .. })
        ));
    }

    #[test]
    fn test_callback_arriving_before_srsp_is_delivered() {
        let (bus, port) = start_bus(fast_timeouts());
        let bus = Arc::new(bus);

        let worker = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || {
                bus.request_callback(
                    &zdo::MgmtPermitJoinReq {
                        addr_mode: AddrMode::Nwk,
                        dst: Nwk::COORDINATOR,
                        duration: 60,
                        tc_significance: 1,
                    },
                    |rsp: &zdo::MgmtPermitJoinRsp| rsp.src == Nwk::COORDINATOR,
                )
            })
        };

        port.wait_for_written(5, Duration::from_secs(1));

        // Indication first, SRSP second
        port.inject_frame(
            &zdo::MgmtPermitJoinRsp {
                src: Nwk::COORDINATOR,
                status: Status::Success,
            }
            .to_frame(),
        );
        port.inject_frame(
            &zdo::MgmtPermitJoinReqRsp {
                status: Status::Success,
            }
            .to_frame(),
        );

        let (rsp, callback) = worker.join().unwrap().unwrap();
        assert_eq!(rsp.status, Status::Success);
        assert_eq!(callback.status, Status::Success);
    }

    #[test]
    fn test_subscription_wire_order_no_duplicates() {
        let (bus, port) = start_bus(fast_timeouts());

        let subscription = bus.subscribe(|_: &af::IncomingMsg| true);

        for tsn in 0..5u8 {
            port.inject_frame(&incoming_msg(tsn));
        }

        for tsn in 0..5u8 {
            let msg = subscription.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(msg.tsn, tsn);
        }

        assert!(subscription
            .recv_timeout(Duration::from_millis(50))
            .is_err());
    }

    #[test]
    fn test_srsp_and_areq_interleave() {
        let (bus, port) = start_bus(fast_timeouts());
        let bus = Arc::new(bus);

        let subscription = bus.subscribe(|_: &af::IncomingMsg| true);

        let worker = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.request(&sys::Ping {}))
        };
        port.wait_for_written(5, Duration::from_secs(1));

        // Two indications sneak in ahead of the SRSP
        port.inject_frame(&incoming_msg(1));
        port.inject_frame(&incoming_msg(2));
        port.inject_frame(&ping_rsp_frame());

        assert!(worker.join().unwrap().is_ok());
        assert_eq!(
            subscription
                .recv_timeout(Duration::from_secs(1))
                .unwrap()
                .tsn,
            1
        );
        assert_eq!(
            subscription
                .recv_timeout(Duration::from_secs(1))
                .unwrap()
                .tsn,
            2
        );
    }

    #[test]
    fn test_one_shot_waiter_field_matching() {
        let (bus, port) = start_bus(fast_timeouts());

        let waiter = bus.wait_for(|confirm: &af::DataConfirm| confirm.tsn == 7);

        // A confirm for a different transaction does not resolve the waiter
        port.inject_frame(
            &af::DataConfirm {
                status: Status::Success,
                endpoint: 1,
                tsn: 3,
            }
            .to_frame(),
        );
        port.inject_frame(
            &af::DataConfirm {
                status: Status::Success,
                endpoint: 1,
                tsn: 7,
            }
            .to_frame(),
        );

        let confirm = waiter.wait(Duration::from_secs(1)).unwrap();
        assert_eq!(confirm.tsn, 7);
    }

    #[test]
    fn test_confirms_resolve_out_of_order() {
        let (bus, port) = start_bus(fast_timeouts());

        let first = bus.wait_for(|c: &af::DataConfirm| c.tsn == 1);
        let second = bus.wait_for(|c: &af::DataConfirm| c.tsn == 2);

        // Confirms arrive in reverse order
        port.inject_frame(
            &af::DataConfirm {
                status: Status::Success,
                endpoint: 1,
                tsn: 2,
            }
            .to_frame(),
        );
        port.inject_frame(
            &af::DataConfirm {
                status: Status::MacNoAck,
                endpoint: 1,
                tsn: 1,
            }
            .to_frame(),
        );

        assert_eq!(
            second.wait(Duration::from_secs(1)).unwrap().status,
            Status::Success
        );
        assert_eq!(
            first.wait(Duration::from_secs(1)).unwrap().status,
            Status::MacNoAck
        );
    }

    #[test]
    fn test_dropped_waiter_is_cancelled() {
        let (bus, port) = start_bus(fast_timeouts());

        let waiter = bus.wait_for(|_: &af::DataConfirm| true);
        drop(waiter);

        let other = bus.wait_for(|c: &af::DataConfirm| c.tsn == 9);
        port.inject_frame(
            &af::DataConfirm {
                status: Status::Success,
                endpoint: 1,
                tsn: 9,
            }
            .to_frame(),
        );

        // The cancelled waiter must not have consumed the frame
        assert_eq!(other.wait(Duration::from_secs(1)).unwrap().tsn, 9);
    }

    #[test]
    fn test_lossy_subscription_counts_overflow() {
        let (bus, port) = start_bus(fast_timeouts());

        let subscription = bus.subscribe_lossy(|_: &af::IncomingMsg| true);

        for tsn in 0..(DELIVERY_QUEUE + 10) {
            port.inject_frame(&incoming_msg(tsn as u8));
        }

        // Wait for the reader to chew through everything
        thread::sleep(Duration::from_millis(200));

        let mut received = 0;
        while subscription.try_recv().is_some() {
            received += 1;
        }
        assert_eq!(received, DELIVERY_QUEUE);
        assert_eq!(subscription.overflow_count(), 10);
    }

    #[test]
    fn test_disconnect_fails_pending_request() {
        let (bus, port) = start_bus(BusTimeouts {
            sreq: Duration::from_secs(10),
            ..fast_timeouts()
        });
        let bus = Arc::new(bus);

        let worker = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.request(&sys::Ping {}))
        };
        port.wait_for_written(5, Duration::from_secs(1));

        port.disconnect();

        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Disconnected));
        assert!(bus.is_disconnected());

        // Later requests fail fast
        assert!(matches!(
            bus.request(&sys::Ping {}),
            Err(Error::Disconnected)
        ));
    }

    #[test]
    fn test_watchdog_promotes_to_disconnected() {
        let (bus, _port) = start_bus(BusTimeouts {
            sreq: Duration::from_millis(50),
            arsp: Duration::from_millis(50),
            watchdog_interval: Duration::from_millis(50),
        });

        // Two unanswered pings within ~1 s mark the bus dead
        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while !bus.is_disconnected() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(bus.is_disconnected());
    }
}
