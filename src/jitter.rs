//! Delayed-release reordering ring buffers for the two UDP streams.
//!
//! Each ring has exactly one producer (a receiver thread) and one consumer
//! (the frame processor). Head and tail are atomics; the hot push/pop paths
//! take no locks. A short structural mutex serialises flush and delay
//! changes against each other.
//!
//! Packets are kept in approximately ascending key order, (frame, line)
//! for video and sequence for audio, by a bounded insertion sort at push
//! time. A packet that cannot find its place within the search bound stays
//! at the head and the minor reordering is accepted. A pop only returns the
//! tail packet once its age reaches the configured delay, which is what
//! absorbs network jitter.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use log::warn;
use parking_lot::Mutex;

use crate::clock;
use crate::protocol::{self, sequence_diff, VideoHeader};

/// Ceiling for the configurable buffer delay.
pub const MAX_DELAY_MS: u32 = 500;
/// Worst-case NTSC video packet rate, used to dimension the video ring.
pub const MAX_VIDEO_RATE_PPS: u32 = 3590;
/// Worst-case audio packet rate.
pub const MAX_AUDIO_RATE_PPS: u32 = 250;

/// Reducing the delay to zero from above this flushes instead of trimming.
const FLUSH_TO_ZERO_THRESHOLD_US: u64 = 50_000;

/// Largest packet either ring stores.
const SLOT_PAYLOAD_SIZE: usize = protocol::VIDEO_PACKET_SIZE;

const SEQ_UNINIT: u32 = u32::MAX;

/// Which stream a ring carries. Selects the sort key and search depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingKind {
    Video,
    Audio,
}

impl RingKind {
    fn rate_pps(self) -> u32 {
        match self {
            RingKind::Video => MAX_VIDEO_RATE_PPS,
            RingKind::Audio => MAX_AUDIO_RATE_PPS,
        }
    }

    /// Slot count covering the maximum delay at the worst-case rate.
    pub fn capacity(self) -> usize {
        (self.rate_pps() as u64 * MAX_DELAY_MS as u64 / 1000) as usize
    }

    /// Insertion sort search/shift bound.
    fn sort_depth(self) -> usize {
        match self {
            RingKind::Video => 8,
            RingKind::Audio => 6,
        }
    }

    /// Slots a given delay is expected to occupy at the worst-case rate.
    /// Zero delay keeps the full capacity: nothing is trimmed, the
    /// timestamp rewrite alone makes everything poppable at once.
    fn active_slots(self, delay_ms: u32) -> usize {
        if delay_ms == 0 {
            return self.capacity();
        }
        ((self.rate_pps() as u64 * delay_ms as u64) / 1000).max(1) as usize
    }
}

struct Slot {
    payload: [u8; SLOT_PAYLOAD_SIZE],
    len: u16,
    timestamp_us: u64,
    sequence: u16,
    frame_index: u16,
    line_index: u16,
    valid: bool,
}

impl Slot {
    fn empty() -> Self {
        Self {
            payload: [0u8; SLOT_PAYLOAD_SIZE],
            len: 0,
            timestamp_us: 0,
            sequence: 0,
            frame_index: 0,
            line_index: 0,
            valid: false,
        }
    }
}

/// Metadata returned with a popped packet.
#[derive(Debug, Clone, Copy)]
pub struct PacketMeta {
    pub len: usize,
    pub timestamp_us: u64,
    pub sequence: u16,
    pub frame_index: u16,
    pub line_index: u16,
}

/// One single-producer/single-consumer delayed-release ring.
pub struct JitterRing {
    kind: RingKind,
    slots: Box<[UnsafeCell<Slot>]>,
    /// Next write position. Producer-advanced only.
    head: AtomicUsize,
    /// Oldest unconsumed slot. Consumer-advanced (CAS, so overflow relief
    /// from the producer side cannot race it into corruption).
    tail: AtomicUsize,
    delay_us: AtomicU64,
    /// First sequence seen since creation or flush; `SEQ_UNINIT` until then.
    seq_tracker: AtomicU32,
    /// Serialises flush and delay changes.
    structural: Mutex<()>,
    overflow_dropped: AtomicU64,
    last_overflow_warn_us: AtomicU64,
}

// SAFETY: slot access follows the SPSC ring discipline. The producer writes
// at head and bubbles within [tail, head]; the consumer reads only the tail
// slot and re-validates it after copying, so a colliding bubble swap is
// detected instead of delivered. Structural operations run under the mutex.
unsafe impl Send for JitterRing {}
unsafe impl Sync for JitterRing {}

impl JitterRing {
    pub fn new(kind: RingKind, delay_ms: u32) -> Self {
        // One slack slot distinguishes full from empty.
        let cap = kind.capacity() + 1;
        let slots: Vec<UnsafeCell<Slot>> = (0..cap).map(|_| UnsafeCell::new(Slot::empty())).collect();
        Self {
            kind,
            slots: slots.into_boxed_slice(),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            delay_us: AtomicU64::new(delay_ms.min(MAX_DELAY_MS) as u64 * 1_000),
            seq_tracker: AtomicU32::new(SEQ_UNINIT),
            structural: Mutex::new(()),
            overflow_dropped: AtomicU64::new(0),
            last_overflow_warn_us: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> RingKind {
        self.kind
    }

    /// Usable slot count.
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Occupied slot count.
    pub fn len(&self) -> usize {
        let cap = self.slots.len();
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + cap - tail) % cap
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occupancy relative to the active slot count for the current delay,
    /// in percent. Can exceed 100 when the consumer falls behind.
    pub fn fill_percent(&self) -> u32 {
        let active = self.kind.active_slots(self.delay_ms());
        (self.len() as u64 * 100 / active.max(1) as u64) as u32
    }

    pub fn delay_ms(&self) -> u32 {
        (self.delay_us.load(Ordering::Relaxed) / 1_000) as u32
    }

    /// First sequence number seen since creation or the last flush.
    pub fn base_sequence(&self) -> Option<u16> {
        match self.seq_tracker.load(Ordering::Relaxed) {
            SEQ_UNINIT => None,
            seq => Some(seq as u16),
        }
    }

    /// Packets dropped to relieve a full ring.
    pub fn overflow_dropped(&self) -> u64 {
        self.overflow_dropped.load(Ordering::Relaxed)
    }

    /// Insert a packet. The sequence (and for video the frame/line keys) are
    /// parsed from the payload header; the payload itself is stored as
    /// opaque bytes and never reinterpreted after insertion. Returns false
    /// when the header cannot be parsed.
    ///
    /// Producer thread only.
    pub fn push(&self, packet: &[u8], timestamp_ns: u64) -> bool {
        let (sequence, frame_index, line_index) = match self.kind {
            RingKind::Video => match VideoHeader::parse(packet) {
                Some(h) => (h.sequence, h.frame_index, h.line_index),
                None => return false,
            },
            RingKind::Audio => match protocol::parse_audio_sequence(packet) {
                Some(seq) => (seq, 0, 0),
                None => return false,
            },
        };

        let _ = self.seq_tracker.compare_exchange(
            SEQ_UNINIT,
            sequence as u32,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );

        let cap = self.slots.len();
        if self.len() + 1 >= cap {
            self.drop_from_tail();
        }

        let head = self.head.load(Ordering::Relaxed);
        let slot_ptr = self.slots[head].get();
        // SAFETY: the head slot is outside [tail, head) and therefore
        // invisible to the consumer until head is published below.
        unsafe {
            let slot = &mut *slot_ptr;
            let n = packet.len().min(SLOT_PAYLOAD_SIZE);
            slot.payload[..n].copy_from_slice(&packet[..n]);
            slot.payload[n..].fill(0);
            slot.len = n as u16;
            slot.timestamp_us = timestamp_ns / 1_000;
            slot.sequence = sequence;
            slot.frame_index = frame_index;
            slot.line_index = line_index;
            slot.valid = true;
        }

        // Bounded insertion sort: bubble the new packet toward the tail
        // while its key precedes its predecessor's, before publishing head.
        let new_key = (frame_index, line_index, sequence);
        let mut pos = head;
        for _ in 0..self.kind.sort_depth() {
            let tail = self.tail.load(Ordering::Acquire);
            if pos == tail {
                break;
            }
            let prev = (pos + cap - 1) % cap;
            // SAFETY: slots in [tail, head] are never written by the
            // consumer. A swap can collide with a concurrent pop of the
            // tail slot; the pop detects that and retries (see below).
            let prev_key = unsafe {
                let slot = &*self.slots[prev].get();
                (slot.frame_index, slot.line_index, slot.sequence)
            };
            if self.key_cmp(prev_key, new_key) <= 0 {
                break;
            }
            unsafe { std::ptr::swap(self.slots[prev].get(), self.slots[pos].get()) };
            pos = prev;
        }

        self.head.store((head + 1) % cap, Ordering::Release);
        true
    }

    /// Wrap-aware ordering of two slot keys: positive when `a` is newer.
    fn key_cmp(&self, a: (u16, u16, u16), b: (u16, u16, u16)) -> i32 {
        match self.kind {
            RingKind::Video => {
                let d = sequence_diff(b.0, a.0);
                if d != 0 {
                    d
                } else {
                    sequence_diff(b.1, a.1)
                }
            }
            RingKind::Audio => sequence_diff(b.2, a.2),
        }
    }

    /// Relieve a full ring by discarding a batch of the oldest packets:
    /// at least two, a tenth of the buffered count when that is more, never
    /// more than half.
    fn drop_from_tail(&self) {
        let cap = self.slots.len();
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);
            let count = (head + cap - tail) % cap;
            if count == 0 {
                return;
            }
            let n = (count / 10).max(2).min(count / 2).max(1);
            let new_tail = (tail + n) % cap;
            if self
                .tail
                .compare_exchange(tail, new_tail, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.overflow_dropped.fetch_add(n as u64, Ordering::Relaxed);
                let now = clock::now_us();
                let last = self.last_overflow_warn_us.load(Ordering::Relaxed);
                if now.saturating_sub(last) > 1_000_000
                    && self
                        .last_overflow_warn_us
                        .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                {
                    warn!("{:?} ring full, dropped {} oldest packets", self.kind, n);
                }
                return;
            }
        }
    }

    /// Remove the tail packet once its age has reached the configured
    /// delay. Copies the payload into `out` (sized by the caller) and
    /// returns its metadata, or `None` when nothing is releasable yet.
    ///
    /// Consumer thread only.
    pub fn pop(&self, out: &mut [u8]) -> Option<PacketMeta> {
        let cap = self.slots.len();
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }
        let slot_ptr = self.slots[tail].get();
        // SAFETY: the tail slot is published and only this consumer reads
        // it. Overflow relief can steal it by advancing tail, in which case
        // the CAS below fails and the packet is simply delivered once more
        // than the relief intended, never torn.
        let (valid, timestamp_us, len, sequence, frame_index, line_index) = unsafe {
            let slot = &*slot_ptr;
            (
                slot.valid,
                slot.timestamp_us,
                slot.len as usize,
                slot.sequence,
                slot.frame_index,
                slot.line_index,
            )
        };
        if !valid {
            return None;
        }
        if clock::now_us().saturating_sub(timestamp_us) < self.delay_us.load(Ordering::Relaxed) {
            return None;
        }

        let n = len.min(out.len());
        unsafe { out[..n].copy_from_slice(&(&(*slot_ptr).payload)[..n]) };
        // A producer-side reorder swap may have moved another packet into
        // this slot mid-copy. Detect it and let the next poll retry.
        let (seq_after, ts_after) = unsafe { ((*slot_ptr).sequence, (*slot_ptr).timestamp_us) };
        if seq_after != sequence || ts_after != timestamp_us {
            return None;
        }
        unsafe { (*slot_ptr).valid = false };
        let _ = self
            .tail
            .compare_exchange(tail, (tail + 1) % cap, Ordering::AcqRel, Ordering::Acquire);
        Some(PacketMeta {
            len: n,
            timestamp_us,
            sequence,
            frame_index,
            line_index,
        })
    }

    /// Change the buffer delay, clamped to [`MAX_DELAY_MS`].
    ///
    /// Increases take effect immediately. A reduction to zero from more
    /// than 50 ms flushes the ring outright; any other reduction trims the
    /// tail down to the new delay's active slot count and rewrites the
    /// remaining timestamps so every buffered packet is poppable at once
    /// under the new delay.
    pub fn set_delay(&self, delay_ms: u32) {
        let delay_ms = delay_ms.min(MAX_DELAY_MS);
        let new_us = delay_ms as u64 * 1_000;
        let old_us = self.delay_us.load(Ordering::Relaxed);
        if new_us >= old_us {
            self.delay_us.store(new_us, Ordering::Relaxed);
            return;
        }

        let _guard = self.structural.lock();
        if new_us == 0 && old_us > FLUSH_TO_ZERO_THRESHOLD_US {
            self.delay_us.store(0, Ordering::Relaxed);
            self.flush_locked();
            return;
        }

        let cap = self.slots.len();
        let active = self.kind.active_slots(delay_ms);
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);
            let count = (head + cap - tail) % cap;
            if count <= active {
                break;
            }
            let new_tail = (tail + (count - active)) % cap;
            if self
                .tail
                .compare_exchange(tail, new_tail, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        let rewritten = clock::now_us().saturating_sub(new_us + 1_000);
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        let mut i = tail;
        while i != head {
            let slot_ptr = self.slots[i].get();
            // SAFETY: structural mutex held; the consumer at most re-reads
            // a timestamp that only moves into the poppable past.
            unsafe {
                if (*slot_ptr).valid {
                    (*slot_ptr).timestamp_us = rewritten;
                }
            }
            i = (i + 1) % cap;
        }
        self.delay_us.store(new_us, Ordering::Relaxed);
    }

    /// Drop everything and reset sequence tracking. Afterwards the ring
    /// behaves as freshly created.
    pub fn flush(&self) {
        let _guard = self.structural.lock();
        self.flush_locked();
    }

    fn flush_locked(&self) {
        self.head.store(0, Ordering::Release);
        self.tail.store(0, Ordering::Release);
        for cell in self.slots.iter() {
            // SAFETY: structural mutex held and the ring is empty as far as
            // the consumer is concerned after the stores above.
            unsafe { (*cell.get()).valid = false };
        }
        self.seq_tracker.store(SEQ_UNINIT, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        AUDIO_PACKET_SIZE, BITS_PER_PIXEL, LINES_PER_PACKET, PIXELS_PER_LINE, VIDEO_PACKET_SIZE,
    };

    fn audio_packet(seq: u16) -> [u8; AUDIO_PACKET_SIZE] {
        let mut buf = [0u8; AUDIO_PACKET_SIZE];
        buf[0..2].copy_from_slice(&seq.to_le_bytes());
        buf[2] = seq as u8;
        buf
    }

    fn video_packet(seq: u16, frame: u16, line: u16) -> [u8; VIDEO_PACKET_SIZE] {
        let mut buf = [0u8; VIDEO_PACKET_SIZE];
        VideoHeader {
            sequence: seq,
            frame_index: frame,
            line_index: line,
            last_packet: false,
            pixels_per_line: PIXELS_PER_LINE,
            lines_per_packet: LINES_PER_PACKET,
            bits_per_pixel: BITS_PER_PIXEL,
            encoding: 0,
        }
        .write(&mut buf);
        buf
    }

    /// A timestamp old enough that the given delay has already elapsed.
    fn aged_ts(delay_ms: u32) -> u64 {
        clock::now_ns().saturating_sub((delay_ms as u64 + 10) * 1_000_000)
    }

    #[test]
    fn test_capacity_dimensioning() {
        assert_eq!(RingKind::Video.capacity(), 1795);
        assert_eq!(RingKind::Audio.capacity(), 125);
    }

    #[test]
    fn test_pop_empty_returns_none() {
        let ring = JitterRing::new(RingKind::Audio, 0);
        let mut out = [0u8; AUDIO_PACKET_SIZE];
        assert!(ring.pop(&mut out).is_none());
    }

    #[test]
    fn test_each_packet_released_exactly_once() {
        let ring = JitterRing::new(RingKind::Audio, 50);
        for seq in 0..20u16 {
            assert!(ring.push(&audio_packet(seq), aged_ts(50)));
        }
        let mut out = [0u8; AUDIO_PACKET_SIZE];
        let mut seen = Vec::new();
        while let Some(meta) = ring.pop(&mut out) {
            seen.push(meta.sequence);
            assert_eq!(out[2], meta.sequence as u8);
        }
        let expected: Vec<u16> = (0..20).collect();
        assert_eq!(seen, expected);
        assert!(ring.pop(&mut out).is_none());
    }

    #[test]
    fn test_zero_delay_preserves_push_order() {
        let ring = JitterRing::new(RingKind::Audio, 0);
        for seq in [5u16, 6, 7, 8] {
            ring.push(&audio_packet(seq), clock::now_ns());
        }
        let mut out = [0u8; AUDIO_PACKET_SIZE];
        for expected in [5u16, 6, 7, 8] {
            assert_eq!(ring.pop(&mut out).unwrap().sequence, expected);
        }
    }

    #[test]
    fn test_delay_holds_packets_back() {
        let ring = JitterRing::new(RingKind::Audio, 200);
        ring.push(&audio_packet(1), clock::now_ns());
        let mut out = [0u8; AUDIO_PACKET_SIZE];
        assert!(ring.pop(&mut out).is_none());
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_reorder_within_depth() {
        let ring = JitterRing::new(RingKind::Audio, 50);
        for seq in [3u16, 1, 0, 2] {
            ring.push(&audio_packet(seq), aged_ts(50));
        }
        let mut out = [0u8; AUDIO_PACKET_SIZE];
        let order: Vec<u16> = std::iter::from_fn(|| ring.pop(&mut out).map(|m| m.sequence)).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_reorder_across_sequence_wrap() {
        let ring = JitterRing::new(RingKind::Audio, 50);
        for seq in [65534u16, 0, 65535, 1] {
            ring.push(&audio_packet(seq), aged_ts(50));
        }
        let mut out = [0u8; AUDIO_PACKET_SIZE];
        let order: Vec<u16> = std::iter::from_fn(|| ring.pop(&mut out).map(|m| m.sequence)).collect();
        assert_eq!(order, vec![65534, 65535, 0, 1]);
    }

    #[test]
    fn test_video_keyed_by_frame_then_line() {
        let ring = JitterRing::new(RingKind::Video, 50);
        ring.push(&video_packet(0, 8, 8), aged_ts(50));
        ring.push(&video_packet(1, 8, 0), aged_ts(50));
        ring.push(&video_packet(2, 7, 12), aged_ts(50));
        ring.push(&video_packet(3, 8, 4), aged_ts(50));
        let mut out = [0u8; VIDEO_PACKET_SIZE];
        let order: Vec<(u16, u16)> =
            std::iter::from_fn(|| ring.pop(&mut out).map(|m| (m.frame_index, m.line_index))).collect();
        assert_eq!(order, vec![(7, 12), (8, 0), (8, 4), (8, 8)]);
    }

    #[test]
    fn test_sort_depth_is_bounded() {
        let ring = JitterRing::new(RingKind::Audio, 50);
        for seq in 10..30u16 {
            ring.push(&audio_packet(seq), aged_ts(50));
        }
        // Too far behind to bubble all the way back within depth 6.
        ring.push(&audio_packet(5), aged_ts(50));
        let mut out = [0u8; AUDIO_PACKET_SIZE];
        let first = ring.pop(&mut out).unwrap().sequence;
        assert_eq!(first, 10);
    }

    #[test]
    fn test_delay_reduction_rewrites_timestamps() {
        let ring = JitterRing::new(RingKind::Audio, 200);
        for seq in 0..20u16 {
            ring.push(&audio_packet(seq), clock::now_ns());
        }
        let mut out = [0u8; AUDIO_PACKET_SIZE];
        assert!(ring.pop(&mut out).is_none());

        ring.set_delay(50);
        let mut popped = 0;
        while ring.pop(&mut out).is_some() {
            popped += 1;
        }
        assert_eq!(popped, 20);
    }

    #[test]
    fn test_delay_reduction_trims_to_new_capacity() {
        let ring = JitterRing::new(RingKind::Audio, 400);
        for seq in 0..110u16 {
            ring.push(&audio_packet(seq), clock::now_ns());
        }
        ring.set_delay(200);
        // 250 pps * 200 ms = 50 active slots.
        assert!(ring.len() <= 50);
    }

    #[test]
    fn test_flush_to_zero_corner_case() {
        let ring = JitterRing::new(RingKind::Audio, 200);
        for seq in 0..10u16 {
            ring.push(&audio_packet(seq), clock::now_ns());
        }
        ring.set_delay(0);
        assert!(ring.is_empty());
        assert_eq!(ring.base_sequence(), None);
    }

    #[test]
    fn test_reduction_to_zero_from_small_delay_releases() {
        let ring = JitterRing::new(RingKind::Audio, 40);
        for seq in 0..5u16 {
            ring.push(&audio_packet(seq), clock::now_ns());
        }
        ring.set_delay(0);
        let mut out = [0u8; AUDIO_PACKET_SIZE];
        let mut popped = 0;
        while ring.pop(&mut out).is_some() {
            popped += 1;
        }
        assert_eq!(popped, 5);
    }

    #[test]
    fn test_delay_clamped_to_ceiling() {
        let ring = JitterRing::new(RingKind::Audio, 5000);
        assert_eq!(ring.delay_ms(), MAX_DELAY_MS);
        ring.set_delay(10_000);
        assert_eq!(ring.delay_ms(), MAX_DELAY_MS);
    }

    #[test]
    fn test_overflow_drops_a_tail_batch() {
        let ring = JitterRing::new(RingKind::Audio, MAX_DELAY_MS);
        let cap = ring.capacity();
        for seq in 0..(cap as u16 + 10) {
            ring.push(&audio_packet(seq), aged_ts(MAX_DELAY_MS));
        }
        assert!(ring.len() < cap);
        assert!(ring.overflow_dropped() >= 2);
        // The survivors are the newest packets.
        let mut out = [0u8; AUDIO_PACKET_SIZE];
        let first = ring.pop(&mut out).unwrap().sequence;
        assert!(first >= 2);
    }

    #[test]
    fn test_flush_behaves_like_new() {
        let ring = JitterRing::new(RingKind::Audio, 50);
        for seq in 100..110u16 {
            ring.push(&audio_packet(seq), aged_ts(50));
        }
        ring.flush();
        assert!(ring.is_empty());
        assert_eq!(ring.base_sequence(), None);

        ring.push(&audio_packet(7), aged_ts(50));
        assert_eq!(ring.base_sequence(), Some(7));
        let mut out = [0u8; AUDIO_PACKET_SIZE];
        assert_eq!(ring.pop(&mut out).unwrap().sequence, 7);
        assert!(ring.pop(&mut out).is_none());
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        use std::sync::Arc;

        let ring = Arc::new(JitterRing::new(RingKind::Audio, 0));
        let producer_ring = ring.clone();
        let producer = std::thread::spawn(move || {
            for seq in 0..2000u16 {
                while producer_ring.len() > 100 {
                    std::thread::yield_now();
                }
                producer_ring.push(&audio_packet(seq), clock::now_ns());
            }
        });

        let mut out = [0u8; AUDIO_PACKET_SIZE];
        let mut received = 0u32;
        let mut last: Option<u16> = None;
        while received < 2000 {
            if let Some(meta) = ring.pop(&mut out) {
                if let Some(prev) = last {
                    assert_eq!(sequence_diff(prev, meta.sequence), 1);
                }
                last = Some(meta.sequence);
                received += 1;
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
