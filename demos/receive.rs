//! Receive and report on a live Ultimate stream.
//!
//! Usage: cargo run --example receive [device_host]
//!
//! Connects to the device (default "c64u", use "0.0.0.0" if the device is
//! already streaming), prints a line per delivered frame batch, and reports
//! counters once per second. Ctrl-C to exit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use c64u_stream::{C64Stream, StreamConfig, StreamSink};

struct CountingSink {
    frames: Arc<AtomicU64>,
    audio_packets: Arc<AtomicU64>,
    last_size: Arc<AtomicU64>,
}

impl StreamSink for CountingSink {
    fn on_video_frame(&mut self, _rgba: &[u8], width: u16, height: u16, _timestamp_ns: u64) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.last_size
            .store(((width as u64) << 16) | height as u64, Ordering::Relaxed);
    }

    fn on_audio_samples(&mut self, _pcm: &[u8], _timestamp_ns: u64) {
        self.audio_packets.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() {
    let frames = Arc::new(AtomicU64::new(0));
    let audio_packets = Arc::new(AtomicU64::new(0));
    let last_size = Arc::new(AtomicU64::new(0));

    let mut config = StreamConfig::default();
    if let Some(host) = std::env::args().nth(1) {
        config.device_host = host;
    }
    println!("device: {}", config.device_host);

    let sink = CountingSink {
        frames: frames.clone(),
        audio_packets: audio_packets.clone(),
        last_size: last_size.clone(),
    };
    let mut stream = C64Stream::new(config, Box::new(sink));
    if let Err(e) = stream.start() {
        eprintln!("failed to start: {}", e);
        std::process::exit(1);
    }
    let (video_port, audio_port) = stream.bound_ports().unwrap_or((0, 0));
    println!("listening: video :{}, audio :{}", video_port, audio_port);

    let mut last_frames = 0u64;
    loop {
        thread::sleep(Duration::from_millis(100));
        stream.tick();

        let total = frames.load(Ordering::Relaxed);
        if total / 10 != last_frames / 10 {
            let size = last_size.load(Ordering::Relaxed);
            let totals = stream.stats();
            println!(
                "{} frames ({}x{}), {} audio packets, {} drops, {} seq errors",
                total,
                size >> 16,
                size & 0xFFFF,
                audio_packets.load(Ordering::Relaxed),
                totals.frame_drops,
                totals.video_sequence_errors,
            );
        }
        last_frames = total;
    }
}
