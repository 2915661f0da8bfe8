//! Stream receiver core for the Commodore 64 Ultimate.
//!
//! The Ultimate emits two UDP streams: paletted 4bpp video packets and
//! 16-bit PCM audio packets. This crate receives both, absorbs network
//! jitter in delayed-release reordering buffers, assembles video packets
//! into complete RGBA rasters with PAL/NTSC detection, and delivers
//! timestamped frames and audio buffers to a host-provided sink. A tiny
//! TCP control protocol starts and stops the streams on the device.
//!
//! Typical use:
//!
//! ```no_run
//! use c64u_stream::{C64Stream, StreamConfig, StreamSink};
//!
//! struct Printer;
//!
//! impl StreamSink for Printer {
//!     fn on_video_frame(&mut self, _rgba: &[u8], w: u16, h: u16, ts: u64) {
//!         println!("frame {}x{} @ {}", w, h, ts);
//!     }
//!     fn on_audio_samples(&mut self, pcm: &[u8], ts: u64) {
//!         println!("{} PCM bytes @ {}", pcm.len(), ts);
//!     }
//! }
//!
//! let mut stream = C64Stream::new(StreamConfig::default(), Box::new(Printer));
//! stream.start().expect("start failed");
//! loop {
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//!     stream.tick();
//! }
//! ```

mod assembly;
mod clock;
mod config;
mod control;
mod error;
mod jitter;
mod palette;
mod platform;
mod processor;
mod protocol;
mod receiver;
mod stats;
mod stream;

pub use assembly::{FrameAssembly, FRAME_TIMEOUT_NS, MAX_PACKETS_PER_FRAME};
pub use config::{StreamConfig, NO_CONTROL_HOST};
pub use control::ControlChannel;
pub use error::Error;
pub use jitter::{JitterRing, PacketMeta, RingKind, MAX_DELAY_MS};
pub use palette::{convert_row, init_lut, PALETTE};
pub use processor::{
    VideoFormat, VideoStandard, AUDIO_INTERVAL_NS, FRAME_WIDTH, NTSC_FPS, NTSC_HEIGHT, PAL_FPS,
    PAL_HEIGHT,
};
pub use protocol::{
    decode_start, decode_stop, encode_start, encode_stop, sequence_diff, StreamId, VideoHeader,
    AUDIO_PACKET_SIZE, CONTROL_PORT, VIDEO_PACKET_SIZE,
};
pub use stats::{StatsSnapshot, StatsTotals};
pub use stream::C64Stream;

use std::sync::Arc;

use parking_lot::Mutex;

/// Downstream consumer of decoded frames and audio.
///
/// Called from the frame processor thread (and from the lifecycle tick for
/// no-signal frames), so implementations should hand the data off rather
/// than block.
pub trait StreamSink: Send {
    /// A completed RGBA raster. `width` is always 384; `height` is 272
    /// (PAL) or 240 (NTSC). The timestamp is the ideal presentation time in
    /// monotonic nanoseconds.
    fn on_video_frame(&mut self, rgba: &[u8], width: u16, height: u16, timestamp_ns: u64);

    /// 192 interleaved stereo frames of signed 16-bit little-endian PCM at
    /// 48 kHz.
    fn on_audio_samples(&mut self, pcm: &[u8], timestamp_ns: u64);
}

pub(crate) type SharedSink = Arc<Mutex<Box<dyn StreamSink>>>;
