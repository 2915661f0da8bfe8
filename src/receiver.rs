//! UDP receive loops for the video and audio streams.
//!
//! One thread per stream. Each loop validates the packet size and format
//! fields, accounts sequence anomalies, and pushes the raw packet into its
//! ring with the receive timestamp. These are the single producers of the
//! two rings.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::clock;
use crate::platform;
use crate::protocol::{self, sequence_diff, VideoHeader, AUDIO_PACKET_SIZE, VIDEO_PACKET_SIZE};
use crate::stats::PacketCounters;
use crate::stream::Shared;

/// Minimum spacing between repeated hot-path warnings.
const WARN_THROTTLE_US: u64 = 1_000_000;

/// Wrap-aware sequence continuity tracking for one stream.
pub(crate) struct SequenceTracker {
    stream: &'static str,
    last: Option<u16>,
}

impl SequenceTracker {
    pub fn new(stream: &'static str) -> Self {
        Self { stream, last: None }
    }

    /// Account one received sequence number. Anything other than
    /// `last + 1` (mod 2^16) is a sequence error; the sign of the gap
    /// distinguishes loss from reordering in the log.
    pub fn observe(&mut self, seq: u16, counters: &PacketCounters, verbose: bool) {
        if let Some(prev) = self.last {
            let expected = prev.wrapping_add(1);
            if seq != expected {
                counters.sequence_errors.fetch_add(1, Ordering::Relaxed);
                if verbose {
                    let delta = sequence_diff(expected, seq);
                    if delta > 0 {
                        debug!("{}: {} packet(s) missing before seq {}", self.stream, delta, seq);
                    } else {
                        debug!(
                            "{}: out-of-order packet seq {} (expected {})",
                            self.stream, seq, expected
                        );
                    }
                }
            }
        }
        self.last = Some(seq);
    }
}

struct WarnThrottle {
    last_us: u64,
}

impl WarnThrottle {
    fn new() -> Self {
        Self { last_us: 0 }
    }

    fn ready(&mut self, now_us: u64) -> bool {
        if now_us.saturating_sub(self.last_us) >= WARN_THROTTLE_US {
            self.last_us = now_us;
            true
        } else {
            false
        }
    }
}

/// Video receive loop. Yields on an empty socket; the packet rate is close
/// to the scheduler quantum, so a sleep here loses packets.
pub(crate) fn video_receive_loop(socket: UdpSocket, shared: Arc<Shared>) {
    platform::boost_thread_priority();
    let mut buf = [0u8; 2048];
    let mut tracker = SequenceTracker::new("video");
    let mut size_warn = WarnThrottle::new();
    let mut format_warn = WarnThrottle::new();

    while shared.running.load(Ordering::SeqCst) {
        match socket.recv(&mut buf) {
            Ok(len) => {
                let now_ns = clock::now_ns();
                if len != VIDEO_PACKET_SIZE {
                    if size_warn.ready(now_ns / 1_000) {
                        warn!("video: discarding {}-byte packet (expected {})", len, VIDEO_PACKET_SIZE);
                    }
                    continue;
                }
                shared.last_video_packet_ns.store(now_ns, Ordering::Relaxed);
                shared.stats.video.record_packet(len);

                let Some(header) = VideoHeader::parse(&buf[..len]) else {
                    continue;
                };
                tracker.observe(header.sequence, &shared.stats.video, shared.debug_logging());
                if !header.is_valid_format() {
                    if format_warn.ready(now_ns / 1_000) {
                        warn!(
                            "video: skipping packet with unexpected format {}x{}@{}bpp",
                            header.pixels_per_line, header.lines_per_packet, header.bits_per_pixel
                        );
                    }
                    continue;
                }

                shared.video_ring.push(&buf[..len], now_ns);
                shared.stats_tick(now_ns / 1_000);
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => thread::yield_now(),
            Err(ref e) if e.kind() == ErrorKind::TimedOut => continue,
            Err(e) => {
                // Socket closed by stop(), or something fatal; either way
                // this loop is done.
                if shared.running.load(Ordering::SeqCst) {
                    warn!("video: receive failed: {}", e);
                }
                break;
            }
        }
    }
}

/// Audio receive loop. At ~250 packets per second a 1 ms sleep on an empty
/// socket is safe.
pub(crate) fn audio_receive_loop(socket: UdpSocket, shared: Arc<Shared>) {
    platform::boost_thread_priority();
    let mut buf = [0u8; 2048];
    let mut tracker = SequenceTracker::new("audio");
    let mut size_warn = WarnThrottle::new();

    while shared.running.load(Ordering::SeqCst) {
        match socket.recv(&mut buf) {
            Ok(len) => {
                let now_ns = clock::now_ns();
                if len != AUDIO_PACKET_SIZE {
                    if size_warn.ready(now_ns / 1_000) {
                        warn!("audio: discarding {}-byte packet (expected {})", len, AUDIO_PACKET_SIZE);
                    }
                    continue;
                }
                shared.last_audio_packet_ns.store(now_ns, Ordering::Relaxed);
                shared.stats.audio.record_packet(len);

                let Some(seq) = protocol::parse_audio_sequence(&buf[..len]) else {
                    continue;
                };
                tracker.observe(seq, &shared.stats.audio, shared.debug_logging());

                shared.audio_ring.push(&buf[..len], now_ns);
                shared.stats_tick(now_ns / 1_000);
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(Duration::from_millis(1)),
            Err(ref e) if e.kind() == ErrorKind::TimedOut => continue,
            Err(e) => {
                if shared.running.load(Ordering::SeqCst) {
                    warn!("audio: receive failed: {}", e);
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn errors(counters: &PacketCounters) -> u64 {
        counters.sequence_errors.load(Ordering::Relaxed)
    }

    #[test]
    fn test_gap_counts_one_error() {
        let counters = PacketCounters::default();
        let mut tracker = SequenceTracker::new("test");
        for seq in [1u16, 2, 3, 5, 6] {
            tracker.observe(seq, &counters, false);
        }
        assert_eq!(errors(&counters), 1);
    }

    #[test]
    fn test_reorder_then_gap_counts_two() {
        let counters = PacketCounters::default();
        let mut tracker = SequenceTracker::new("test");
        for seq in [1u16, 2, 3, 2, 4] {
            tracker.observe(seq, &counters, false);
        }
        assert_eq!(errors(&counters), 2);
    }

    #[test]
    fn test_wraparound_is_in_order() {
        let counters = PacketCounters::default();
        let mut tracker = SequenceTracker::new("test");
        for seq in [65534u16, 65535, 0, 1] {
            tracker.observe(seq, &counters, false);
        }
        assert_eq!(errors(&counters), 0);
    }

    #[test]
    fn test_first_packet_never_an_error() {
        let counters = PacketCounters::default();
        let mut tracker = SequenceTracker::new("test");
        tracker.observe(4711, &counters, false);
        assert_eq!(errors(&counters), 0);
    }
}
