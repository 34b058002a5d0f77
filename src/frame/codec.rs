//! Streaming MT frame codec with resynchronisation.
//!
//! The decoder is a buffered state machine: bytes are appended as they
//! arrive from the UART and complete frames are pulled out one at a time.
//! Garbage between frames is skipped by scanning for the next SOF; frames
//! with an invalid length or a bad FCS are dropped, counted, and never reach
//! the bus. Feeding the same stream byte-at-a-time or in bulk yields the
//! same frame sequence.

use super::{CommandHeader, MtFrame, MAX_PAYLOAD, SOF};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// XOR checksum over LEN, CMD0, CMD1 and the payload.
fn fcs(len: u8, cmd0: u8, cmd1: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(len ^ cmd0 ^ cmd1, |acc, byte| acc ^ byte)
}

/// Serialise a frame: SOF, LEN, CMD0, CMD1, DATA, FCS.
pub fn encode_frame(frame: &MtFrame) -> Vec<u8> {
    let len = frame.payload.len() as u8;
    let cmd0 = frame.header.cmd0();
    let cmd1 = frame.header.cmd1();

    let mut out = Vec::with_capacity(frame.payload.len() + 5);
    out.push(SOF);
    out.push(len);
    out.push(cmd0);
    out.push(cmd1);
    out.extend_from_slice(&frame.payload);
    out.push(fcs(len, cmd0, cmd1, &frame.payload));
    out
}

/// Shared framing counters, readable while the bus is running.
#[derive(Debug, Default)]
pub struct FrameStats {
    /// Frames dropped for FCS mismatch
    pub bad_fcs: AtomicU64,
    /// Frames dropped for a length field over 250
    pub bad_length: AtomicU64,
    /// Garbage bytes discarded while hunting for a SOF
    pub skipped_bytes: AtomicU64,
    /// Frames decoded successfully
    pub frames: AtomicU64,
}

impl FrameStats {
    pub fn bad_fcs_count(&self) -> u64 {
        self.bad_fcs.load(Ordering::Relaxed)
    }

    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

/// Buffering decoder for the receive direction.
pub struct FrameCodec {
    buffer: Vec<u8>,
    stats: Arc<FrameStats>,
}

impl FrameCodec {
    pub fn new(stats: Arc<FrameStats>) -> Self {
        Self {
            buffer: Vec::with_capacity(512),
            stats,
        }
    }

    /// Append received bytes to the working buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pull the next complete, FCS-valid frame out of the buffer.
    ///
    /// Returns `None` when the buffer holds no complete frame. Invalid
    /// frames are consumed and counted without surfacing.
    pub fn next_frame(&mut self) -> Option<MtFrame> {
        loop {
            self.seek_sof();

            // Shortest possible frame: SOF, LEN, CMD0, CMD1, FCS
            if self.buffer.len() < 5 {
                return None;
            }

            let len = self.buffer[1] as usize;

            if len > MAX_PAYLOAD {
                self.stats.bad_length.fetch_add(1, Ordering::Relaxed);
                log::warn!("Dropping frame with invalid length {}", len);
                self.resync_after_bad_byte();
                continue;
            }

            let total = 5 + len;
            if self.buffer.len() < total {
                return None;
            }

            let cmd0 = self.buffer[2];
            let cmd1 = self.buffer[3];
            let payload = &self.buffer[4..4 + len];
            let expected = fcs(len as u8, cmd0, cmd1, payload);
            let received = self.buffer[total - 1];

            if expected != received {
                self.stats.bad_fcs.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "Dropping frame with bad FCS: expected 0x{:02X}, got 0x{:02X}",
                    expected,
                    received
                );
                self.resync_after_bad_byte();
                continue;
            }

            let frame = MtFrame::new(CommandHeader::from_wire(cmd0, cmd1), payload.to_vec());
            self.buffer.drain(..total);
            self.stats.frames.fetch_add(1, Ordering::Relaxed);
            return Some(frame);
        }
    }

    /// Discard leading bytes until the buffer starts with a SOF.
    fn seek_sof(&mut self) {
        if let Some(index) = self.buffer.iter().position(|&b| b == SOF) {
            if index > 0 {
                self.stats
                    .skipped_bytes
                    .fetch_add(index as u64, Ordering::Relaxed);
                self.buffer.drain(..index);
            }
        } else {
            self.stats
                .skipped_bytes
                .fetch_add(self.buffer.len() as u64, Ordering::Relaxed);
            self.buffer.clear();
        }
    }

    /// After a bad frame, skip the current SOF and hunt for the next one.
    fn resync_after_bad_byte(&mut self) {
        self.buffer.drain(..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CommandKind, Subsystem};

    fn codec() -> FrameCodec {
        FrameCodec::new(Arc::new(FrameStats::default()))
    }

    fn ping_rsp() -> MtFrame {
        MtFrame::new(
            CommandHeader::new(CommandKind::Srsp, Subsystem::Sys, 0x01),
            vec![0x59, 0x06],
        )
    }

    #[test]
    fn test_encode_known_frame() {
        // SYS.Ping SREQ: FE 00 21 01 20
        let frame = MtFrame::new(
            CommandHeader::new(CommandKind::Sreq, Subsystem::Sys, 0x01),
            vec![],
        );
        assert_eq!(frame.to_wire(), vec![0xFE, 0x00, 0x21, 0x01, 0x20]);
    }

    #[test]
    fn test_decode_round_trip() {
        let frame = ping_rsp();
        let mut c = codec();
        c.feed(&frame.to_wire());
        assert_eq!(c.next_frame(), Some(frame));
        assert_eq!(c.next_frame(), None);
    }

    #[test]
    fn test_byte_at_a_time_equals_bulk() {
        let frames = vec![
            ping_rsp(),
            MtFrame::new(
                CommandHeader::new(CommandKind::Areq, Subsystem::Af, 0x81),
                vec![1, 2, 3, 4, 5],
            ),
            MtFrame::new(
                CommandHeader::new(CommandKind::Sreq, Subsystem::Zdo, 0x36),
                vec![0xFF; 250],
            ),
        ];

        let mut stream = vec![0xAA, 0xBB]; // leading garbage
        for frame in &frames {
            stream.extend_from_slice(&frame.to_wire());
        }

        let mut bulk = codec();
        bulk.feed(&stream);
        let mut bulk_frames = Vec::new();
        while let Some(f) = bulk.next_frame() {
            bulk_frames.push(f);
        }

        let mut trickle = codec();
        let mut trickle_frames = Vec::new();
        for byte in &stream {
            trickle.feed(&[*byte]);
            while let Some(f) = trickle.next_frame() {
                trickle_frames.push(f);
            }
        }

        assert_eq!(bulk_frames, frames);
        assert_eq!(trickle_frames, frames);
    }

    #[test]
    fn test_bad_fcs_dropped_and_counted() {
        let stats = Arc::new(FrameStats::default());
        let mut c = FrameCodec::new(Arc::clone(&stats));

        let good = ping_rsp();
        let mut corrupted = good.to_wire();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;

        c.feed(&good.to_wire());
        c.feed(&corrupted);
        c.feed(&good.to_wire());

        assert_eq!(c.next_frame(), Some(good.clone()));
        assert_eq!(c.next_frame(), Some(good));
        assert_eq!(c.next_frame(), None);
        assert_eq!(stats.bad_fcs_count(), 1);
        assert_eq!(stats.frame_count(), 2);
    }

    #[test]
    fn test_single_byte_corruption_never_yields_wrong_frame() {
        let frame = MtFrame::new(
            CommandHeader::new(CommandKind::Areq, Subsystem::Zdo, 0xC1),
            vec![0x10, 0x20, 0x30, 0x40],
        );
        let wire = frame.to_wire();

        // Corrupt every byte except the SOF, one at a time
        for index in 1..wire.len() {
            let mut corrupted = wire.clone();
            corrupted[index] ^= 0x01;

            let mut c = codec();
            c.feed(&corrupted);
            if let Some(decoded) = c.next_frame() {
                // A frame that still decodes must not silently differ
                assert_eq!(decoded, frame, "corrupting byte {} forged a frame", index);
            }
        }
    }

    #[test]
    fn test_invalid_length_resync() {
        let good = ping_rsp();

        let mut c = codec();
        // A SOF followed by an impossible length, then a valid frame
        c.feed(&[0xFE, 0xFF, 0x00, 0x00]);
        c.feed(&good.to_wire());
        assert_eq!(c.next_frame(), Some(good));
    }
}
