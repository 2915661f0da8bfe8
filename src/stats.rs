//! Stream statistics.
//!
//! Every counter is an atomic updated from the receiver and processor
//! threads without locking. The receivers call [`StreamStats::batch`] with
//! the current time; every five seconds it derives rates, logs one report
//! line per stream, and resets the interval counters.

use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info};

/// Reporting interval.
pub const BATCH_INTERVAL_US: u64 = 5_000_000;

/// Per-stream packet counters.
#[derive(Default)]
pub struct PacketCounters {
    pub packets_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub sequence_errors: AtomicU64,
}

impl PacketCounters {
    pub fn record_packet(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

/// All counters for one stream context.
#[derive(Default)]
pub struct StreamStats {
    pub video: PacketCounters,
    pub audio: PacketCounters,
    /// New frame indices sighted by the processor.
    pub frames_captured: AtomicU64,
    pub frames_completed: AtomicU64,
    pub frames_delivered: AtomicU64,
    /// Frames abandoned incomplete (timeout or overtaken by a newer frame).
    pub frame_drops: AtomicU64,
    /// Packets rejected by the assembly (out of range).
    pub packet_drops: AtomicU64,
    /// Output buffer handovers to the sink.
    pub buffer_swaps: AtomicU64,
    /// Sum of receive-to-delivery latency over the interval.
    pub pipeline_latency_ns: AtomicU64,
    last_batch_us: AtomicU64,
}

/// Point-in-time reading of the interval counters, plus derived rates.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub video_pps: f64,
    pub video_mbps: f64,
    pub video_sequence_errors: u64,
    pub audio_pps: f64,
    pub audio_mbps: f64,
    pub audio_sequence_errors: u64,
    pub fps: f64,
    pub expected_fps: f64,
    pub loss_percent: f64,
    pub capture_drop_percent: f64,
    pub delivery_drop_percent: f64,
    pub avg_latency_ms: f64,
    pub video_fill_percent: u32,
    pub audio_fill_percent: u32,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the interval report and reset the counters. Returns `None`
    /// until the batch interval has elapsed.
    pub fn batch(
        &self,
        now_us: u64,
        expected_fps: f64,
        video_fill_percent: u32,
        audio_fill_percent: u32,
    ) -> Option<StatsSnapshot> {
        let last = self.last_batch_us.load(Ordering::Relaxed);
        let elapsed_us = now_us.saturating_sub(last);
        if elapsed_us < BATCH_INTERVAL_US {
            return None;
        }
        if self
            .last_batch_us
            .compare_exchange(last, now_us, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        // First call only arms the interval; discard whatever accumulated
        // before it so the first report covers a clean window.
        if last == 0 {
            self.reset_interval();
            return None;
        }

        let secs = elapsed_us as f64 / 1e6;
        let vid_packets = self.video.packets_received.swap(0, Ordering::Relaxed);
        let vid_bytes = self.video.bytes_received.swap(0, Ordering::Relaxed);
        let vid_seq_err = self.video.sequence_errors.swap(0, Ordering::Relaxed);
        let aud_packets = self.audio.packets_received.swap(0, Ordering::Relaxed);
        let aud_bytes = self.audio.bytes_received.swap(0, Ordering::Relaxed);
        let aud_seq_err = self.audio.sequence_errors.swap(0, Ordering::Relaxed);
        let captured = self.frames_captured.swap(0, Ordering::Relaxed);
        let completed = self.frames_completed.swap(0, Ordering::Relaxed);
        let delivered = self.frames_delivered.swap(0, Ordering::Relaxed);
        let dropped = self.frame_drops.swap(0, Ordering::Relaxed);
        let _ = self.packet_drops.swap(0, Ordering::Relaxed);
        let _ = self.buffer_swaps.swap(0, Ordering::Relaxed);
        let latency_ns = self.pipeline_latency_ns.swap(0, Ordering::Relaxed);

        let frames_expected = expected_fps * secs;
        let pct = |part: f64, whole: f64| if whole > 0.0 { part / whole * 100.0 } else { 0.0 };

        let snapshot = StatsSnapshot {
            video_pps: vid_packets as f64 / secs,
            video_mbps: vid_bytes as f64 * 8.0 / secs / 1e6,
            video_sequence_errors: vid_seq_err,
            audio_pps: aud_packets as f64 / secs,
            audio_mbps: aud_bytes as f64 * 8.0 / secs / 1e6,
            audio_sequence_errors: aud_seq_err,
            fps: delivered as f64 / secs,
            expected_fps,
            loss_percent: pct(vid_seq_err as f64, vid_packets as f64 + vid_seq_err as f64),
            capture_drop_percent: pct(frames_expected - captured as f64, frames_expected),
            delivery_drop_percent: pct(dropped as f64, captured as f64),
            avg_latency_ms: if delivered > 0 {
                latency_ns as f64 / delivered as f64 / 1e6
            } else {
                0.0
            },
            video_fill_percent,
            audio_fill_percent,
        };

        info!(
            "video: {:.0} pps {:.2} Mbps, {:.1}/{:.3} fps, loss {:.2}%, capture drop {:.1}%, delivery drop {:.1}%, latency {:.1} ms, buffer {}%",
            snapshot.video_pps,
            snapshot.video_mbps,
            snapshot.fps,
            snapshot.expected_fps,
            snapshot.loss_percent,
            snapshot.capture_drop_percent,
            snapshot.delivery_drop_percent,
            snapshot.avg_latency_ms,
            snapshot.video_fill_percent,
        );
        debug!(
            "audio: {:.0} pps {:.2} Mbps, seq errors {}, buffer {}%",
            snapshot.audio_pps, snapshot.audio_mbps, snapshot.audio_sequence_errors, snapshot.audio_fill_percent,
        );

        Some(snapshot)
    }

    fn reset_interval(&self) {
        self.video.packets_received.store(0, Ordering::Relaxed);
        self.video.bytes_received.store(0, Ordering::Relaxed);
        self.video.sequence_errors.store(0, Ordering::Relaxed);
        self.audio.packets_received.store(0, Ordering::Relaxed);
        self.audio.bytes_received.store(0, Ordering::Relaxed);
        self.audio.sequence_errors.store(0, Ordering::Relaxed);
        self.frames_captured.store(0, Ordering::Relaxed);
        self.frames_completed.store(0, Ordering::Relaxed);
        self.frames_delivered.store(0, Ordering::Relaxed);
        self.frame_drops.store(0, Ordering::Relaxed);
        self.packet_drops.store(0, Ordering::Relaxed);
        self.buffer_swaps.store(0, Ordering::Relaxed);
        self.pipeline_latency_ns.store(0, Ordering::Relaxed);
    }

    /// Non-resetting read for host polling.
    pub fn totals(&self) -> StatsTotals {
        StatsTotals {
            video_packets_received: self.video.packets_received.load(Ordering::Relaxed),
            video_bytes_received: self.video.bytes_received.load(Ordering::Relaxed),
            video_sequence_errors: self.video.sequence_errors.load(Ordering::Relaxed),
            audio_packets_received: self.audio.packets_received.load(Ordering::Relaxed),
            audio_bytes_received: self.audio.bytes_received.load(Ordering::Relaxed),
            audio_sequence_errors: self.audio.sequence_errors.load(Ordering::Relaxed),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frame_drops: self.frame_drops.load(Ordering::Relaxed),
            packet_drops: self.packet_drops.load(Ordering::Relaxed),
        }
    }
}

/// Raw interval counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsTotals {
    pub video_packets_received: u64,
    pub video_bytes_received: u64,
    pub video_sequence_errors: u64,
    pub audio_packets_received: u64,
    pub audio_bytes_received: u64,
    pub audio_sequence_errors: u64,
    pub frames_captured: u64,
    pub frames_completed: u64,
    pub frames_delivered: u64,
    pub frame_drops: u64,
    pub packet_drops: u64,
}
