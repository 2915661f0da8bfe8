//! Ring consumer: feeds video packets to the frame assembly, converts
//! completed rasters to RGBA and hands them to the sink, and forwards audio
//! with a monotonic timestamp.
//!
//! Presentation timestamps are "ideal": evenly spaced from the first
//! completed frame at the detected refresh rate, decoupled from packet
//! arrival jitter. Audio is stamped `epoch + n * 4 ms` the same way.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::assembly::{FrameAssembly, MAX_PACKETS_PER_FRAME};
use crate::clock;
use crate::palette;
use crate::protocol::{
    sequence_diff, VideoHeader, AUDIO_HEADER_SIZE, AUDIO_PACKET_SIZE, BYTES_PER_LINE,
    VIDEO_HEADER_SIZE, VIDEO_PACKET_SIZE,
};
use crate::stream::Shared;
use crate::SharedSink;

/// PAL: 384x272 at 50.125 Hz.
pub const PAL_FPS: f64 = 50.125;
/// NTSC: 384x240 at 59.826 Hz.
pub const NTSC_FPS: f64 = 59.826;
/// Raster width in pixels, both standards.
pub const FRAME_WIDTH: u16 = 384;
/// PAL raster height.
pub const PAL_HEIGHT: u16 = 272;
/// NTSC raster height.
pub const NTSC_HEIGHT: u16 = 240;
/// Nanoseconds of audio per packet: 192 frames at 48 kHz.
pub const AUDIO_INTERVAL_NS: u64 = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoStandard {
    Pal,
    Ntsc,
}

/// Video format derived from the observed frame height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoFormat {
    pub standard: VideoStandard,
    pub width: u16,
    pub height: u16,
    pub fps: f64,
    /// False when the height matched neither standard and the rate is a
    /// guess from the height alone.
    pub exact: bool,
}

impl VideoFormat {
    /// Classify a frame height. 272 and 240 are the two rasters the device
    /// emits; anything else picks the nearer standard's rate.
    pub fn from_height(height: u16) -> Self {
        let (standard, fps, exact) = match height {
            PAL_HEIGHT => (VideoStandard::Pal, PAL_FPS, true),
            NTSC_HEIGHT => (VideoStandard::Ntsc, NTSC_FPS, true),
            h if h <= 250 => (VideoStandard::Ntsc, NTSC_FPS, false),
            _ => (VideoStandard::Pal, PAL_FPS, false),
        };
        Self {
            standard,
            width: FRAME_WIDTH,
            height,
            fps,
            exact,
        }
    }

    /// Ideal spacing of presentation timestamps.
    pub fn frame_interval_ns(&self) -> u64 {
        (1e9 / self.fps).round() as u64
    }
}

impl Default for VideoFormat {
    fn default() -> Self {
        Self::from_height(PAL_HEIGHT)
    }
}

/// Consumer-side state for both streams.
pub(crate) struct FrameProcessor {
    shared: Arc<Shared>,
    sink: SharedSink,
    assembly: FrameAssembly,
    rgba: Vec<u8>,
    format: VideoFormat,
    /// Latched by the first completed frame; anchors all video timestamps.
    stream_start_ns: Option<u64>,
    frames_since_start: i64,
    last_pts_frame: u16,
    last_completed_frame: Option<u16>,
    /// Latched by the first audio packet; anchors all audio timestamps.
    audio_start_ns: Option<u64>,
    audio_packets: u64,
}

impl FrameProcessor {
    pub fn new(shared: Arc<Shared>, sink: SharedSink) -> Self {
        Self {
            shared,
            sink,
            assembly: FrameAssembly::new(),
            rgba: Vec::new(),
            format: VideoFormat::default(),
            stream_start_ns: None,
            frames_since_start: 0,
            last_pts_frame: 0,
            last_completed_frame: None,
            audio_start_ns: None,
            audio_packets: 0,
        }
    }

    /// Drain both rings until the stream stops. Sleeps 1 ms when neither
    /// ring has a releasable packet.
    pub fn run(&mut self) {
        let mut buf = [0u8; VIDEO_PACKET_SIZE];
        while self.shared.running.load(Ordering::SeqCst) {
            let mut idle = true;
            while let Some(meta) = self.shared.video_ring.pop(&mut buf) {
                let rx_ns = meta.timestamp_us * 1_000;
                self.handle_video(&buf[..meta.len], rx_ns);
                idle = false;
            }
            while let Some(meta) = self.shared.audio_ring.pop(&mut buf) {
                self.handle_audio(&buf[..meta.len]);
                idle = false;
            }
            if idle {
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// Dispatch one video packet. `rx_ns` is the receiver-side timestamp,
    /// kept for pipeline latency accounting.
    pub(crate) fn handle_video(&mut self, packet: &[u8], rx_ns: u64) {
        let Some(header) = VideoHeader::parse(packet) else {
            return;
        };
        let payload = &packet[VIDEO_HEADER_SIZE..];
        let now_ns = clock::now_ns();

        if self.assembly.is_active() && self.assembly.is_timed_out(now_ns) && !self.assembly.is_complete()
        {
            self.drop_current();
        }
        if self.assembly.is_active() && self.assembly.frame_index() != header.frame_index {
            self.finish_current(now_ns);
        }
        if !self.assembly.is_active() {
            self.assembly.begin(header.frame_index, now_ns, rx_ns);
            self.shared.stats.frames_captured.fetch_add(1, Ordering::Relaxed);
        }

        let idx = header.packet_index();
        if idx >= MAX_PACKETS_PER_FRAME {
            self.shared.stats.packet_drops.fetch_add(1, Ordering::Relaxed);
            return;
        }
        // Duplicates return false and are simply ignored.
        let added = self.assembly.try_add(idx, &header, payload);

        if header.last_packet {
            let height = header.line_index + header.lines_per_packet as u16;
            self.update_format(height);
        }

        if added
            && self.assembly.is_complete()
            && self.last_completed_frame != Some(header.frame_index)
        {
            self.emit_current(now_ns);
        }
    }

    /// Evaluate the in-flight assembly when a different frame arrives:
    /// emit it if it completed, otherwise it is lost.
    fn finish_current(&mut self, now_ns: u64) {
        if self.assembly.received() > 0 {
            if self.assembly.is_complete() {
                if self.last_completed_frame != Some(self.assembly.frame_index()) {
                    self.emit_current(now_ns);
                    return;
                }
            } else {
                self.drop_current();
                return;
            }
        }
        self.assembly.reset();
    }

    fn drop_current(&mut self) {
        if self.assembly.received() > 0 {
            self.shared.stats.frame_drops.fetch_add(1, Ordering::Relaxed);
            if self.shared.debug_logging() {
                debug!(
                    "frame {} dropped incomplete ({}/{} packets)",
                    self.assembly.frame_index(),
                    self.assembly.received(),
                    self.assembly.expected()
                );
            }
        }
        self.assembly.reset();
    }

    /// Convert the completed assembly to RGBA and emit it through the sink.
    fn emit_current(&mut self, now_ns: u64) {
        let width = FRAME_WIDTH as usize;
        let height = self.format.height as usize;
        let stride = width * 4;

        let mut rgba = std::mem::take(&mut self.rgba);
        rgba.resize(stride * height, 0);
        for idx in 0..MAX_PACKETS_PER_FRAME {
            if !self.assembly.has_packet(idx) {
                continue;
            }
            let (payload, line_index, lines) = self.assembly.slot(idx);
            for l in 0..lines as usize {
                let y = line_index as usize + l;
                if y >= height {
                    break;
                }
                let src = &payload[l * BYTES_PER_LINE..(l + 1) * BYTES_PER_LINE];
                let dst = &mut rgba[y * stride..(y + 1) * stride];
                palette::convert_row(src, dst, BYTES_PER_LINE);
            }
        }

        let frame = self.assembly.frame_index();
        let pts = self.frame_pts(frame, now_ns);

        let stats = &self.shared.stats;
        stats.frames_completed.fetch_add(1, Ordering::Relaxed);
        stats.frames_delivered.fetch_add(1, Ordering::Relaxed);
        stats.buffer_swaps.fetch_add(1, Ordering::Relaxed);
        stats
            .pipeline_latency_ns
            .fetch_add(now_ns.saturating_sub(self.assembly.first_rx_ns()), Ordering::Relaxed);

        self.last_completed_frame = Some(frame);
        self.sink
            .lock()
            .on_video_frame(&rgba, FRAME_WIDTH, height as u16, pts);
        self.rgba = rgba;
        self.assembly.reset();
    }

    /// Ideal presentation timestamp for a completed frame: the stream start
    /// plus the unwrapped frame distance times the frame interval.
    fn frame_pts(&mut self, frame: u16, now_ns: u64) -> u64 {
        let interval = self.format.frame_interval_ns();
        match self.stream_start_ns {
            None => {
                self.stream_start_ns = Some(now_ns);
                self.last_pts_frame = frame;
                self.frames_since_start = 0;
                now_ns
            }
            Some(start) => {
                let delta = sequence_diff(self.last_pts_frame, frame) as i64;
                self.frames_since_start += delta;
                self.last_pts_frame = frame;
                start.saturating_add_signed(self.frames_since_start.saturating_mul(interval as i64))
            }
        }
    }

    fn update_format(&mut self, height: u16) {
        if self.format.height == height && self.shared.format_height.load(Ordering::Relaxed) != 0 {
            return;
        }
        let format = VideoFormat::from_height(height);
        info!(
            "detected {:?} video format: {}x{} @ {:.3} fps{}",
            format.standard,
            format.width,
            format.height,
            format.fps,
            if format.exact { "" } else { " (assumed)" }
        );
        self.format = format;
        self.shared.format_height.store(height as u32, Ordering::Relaxed);
    }

    /// Forward one audio packet's PCM payload with a monotonic timestamp.
    pub(crate) fn handle_audio(&mut self, packet: &[u8]) {
        if packet.len() < AUDIO_PACKET_SIZE {
            return;
        }
        let pcm = &packet[AUDIO_HEADER_SIZE..AUDIO_PACKET_SIZE];
        let start = *self.audio_start_ns.get_or_insert_with(clock::now_ns);
        let pts = start + self.audio_packets * AUDIO_INTERVAL_NS;
        self.audio_packets += 1;
        self.sink.lock().on_audio_samples(pcm, pts);
    }
}

/// Processor thread entry point.
pub(crate) fn process_loop(shared: Arc<Shared>, sink: SharedSink) {
    FrameProcessor::new(shared, sink).run();
}
