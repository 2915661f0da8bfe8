//! Stream lifecycle coordinator.
//!
//! Owns the sockets, rings, counters and worker threads for one device.
//! Three threads run while streaming: the video receiver, the audio
//! receiver, and the frame processor. The host drives `tick()`
//! periodically for staleness detection and control retries, and `update()`
//! for configuration changes.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::info;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::clock;
use crate::config::StreamConfig;
use crate::control::ControlChannel;
use crate::error::Error;
use crate::jitter::{JitterRing, RingKind};
use crate::palette;
use crate::platform;
use crate::processor::{self, VideoFormat, PAL_FPS};
use crate::protocol::CONTROL_PORT;
use crate::receiver;
use crate::stats::{StatsTotals, StreamStats};
use crate::{SharedSink, StreamSink};

/// State shared between the worker threads and the coordinator.
pub(crate) struct Shared {
    pub running: AtomicBool,
    pub video_ring: JitterRing,
    pub audio_ring: JitterRing,
    pub stats: StreamStats,
    pub last_video_packet_ns: AtomicU64,
    pub last_audio_packet_ns: AtomicU64,
    /// Detected frame height; 0 until the first last-packet flag.
    pub format_height: AtomicU32,
    debug_logging: AtomicBool,
}

impl Shared {
    pub fn new(delay_ms: u32, debug_logging: bool) -> Self {
        Self {
            running: AtomicBool::new(false),
            video_ring: JitterRing::new(RingKind::Video, delay_ms),
            audio_ring: JitterRing::new(RingKind::Audio, delay_ms),
            stats: StreamStats::new(),
            last_video_packet_ns: AtomicU64::new(0),
            last_audio_packet_ns: AtomicU64::new(0),
            format_height: AtomicU32::new(0),
            debug_logging: AtomicBool::new(debug_logging),
        }
    }

    pub fn debug_logging(&self) -> bool {
        self.debug_logging.load(Ordering::Relaxed)
    }

    pub fn set_debug_logging(&self, on: bool) {
        self.debug_logging.store(on, Ordering::Relaxed);
    }

    pub fn detected_format(&self) -> Option<VideoFormat> {
        match self.format_height.load(Ordering::Relaxed) {
            0 => None,
            h => Some(VideoFormat::from_height(h as u16)),
        }
    }

    pub fn expected_fps(&self) -> f64 {
        self.detected_format().map(|f| f.fps).unwrap_or(PAL_FPS)
    }

    /// Periodic statistics hook, called by the receivers per packet.
    pub fn stats_tick(&self, now_us: u64) {
        self.stats.batch(
            now_us,
            self.expected_fps(),
            self.video_ring.fill_percent(),
            self.audio_ring.fill_percent(),
        );
    }
}

/// One device stream context: sockets, threads, rings and sinks.
pub struct C64Stream {
    config: StreamConfig,
    shared: Arc<Shared>,
    sink: SharedSink,
    control: ControlChannel,
    threads: Vec<JoinHandle<()>>,
    streaming: bool,
    /// Actual bound (video, audio) ports once streaming.
    bound_ports: Option<(u16, u16)>,
    last_no_signal_ns: u64,
    no_signal_frame: Vec<u8>,
}

impl C64Stream {
    /// Allocate the context. No sockets are opened until [`start`](Self::start).
    pub fn new(config: StreamConfig, sink: Box<dyn StreamSink>) -> Self {
        palette::init_lut();
        let shared = Arc::new(Shared::new(
            config.buffer_delay_ms as u32,
            config.debug_logging,
        ));
        Self {
            config,
            shared,
            sink: Arc::new(Mutex::new(sink)),
            control: ControlChannel::new(None),
            threads: Vec::new(),
            streaming: false,
            bound_ports: None,
            last_no_signal_ns: 0,
            no_signal_frame: Vec::new(),
        }
    }

    /// Bind the UDP sockets, send the start commands and spawn the worker
    /// threads. Socket or spawn failure leaves the context stopped.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.streaming {
            return Err(Error::AlreadyRunning);
        }

        self.control = ControlChannel::new(self.resolve_control_addr()?);
        let video_socket = bind_udp(self.config.local_bind_address, self.config.video_port)?;
        let audio_socket = bind_udp(self.config.local_bind_address, self.config.audio_port)?;
        let video_port = local_port(&video_socket);
        let audio_port = local_port(&audio_socket);

        platform::begin_timer_resolution();
        self.control.start_streams(clock::now_us());

        let now_ns = clock::now_ns();
        self.shared.last_video_packet_ns.store(now_ns, Ordering::Relaxed);
        self.shared.last_audio_packet_ns.store(now_ns, Ordering::Relaxed);
        self.shared.running.store(true, Ordering::SeqCst);

        if let Err(e) = self.spawn_threads(video_socket, audio_socket) {
            self.shared.running.store(false, Ordering::SeqCst);
            for handle in self.threads.drain(..) {
                let _ = handle.join();
            }
            platform::end_timer_resolution();
            return Err(e);
        }

        self.bound_ports = Some((video_port, audio_port));
        self.streaming = true;
        info!(
            "streaming started: video :{}, audio :{}, delay {} ms",
            video_port, audio_port, self.config.buffer_delay_ms
        );
        Ok(())
    }

    fn spawn_threads(&mut self, video_socket: UdpSocket, audio_socket: UdpSocket) -> Result<(), Error> {
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("c64u-video-rx".to_string())
            .spawn(move || receiver::video_receive_loop(video_socket, shared))
            .map_err(|e| Error::Spawn {
                name: "video receiver",
                source: e,
            })?;
        self.threads.push(handle);

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("c64u-audio-rx".to_string())
            .spawn(move || receiver::audio_receive_loop(audio_socket, shared))
            .map_err(|e| Error::Spawn {
                name: "audio receiver",
                source: e,
            })?;
        self.threads.push(handle);

        let shared = self.shared.clone();
        let sink = self.sink.clone();
        let handle = thread::Builder::new()
            .name("c64u-proc".to_string())
            .spawn(move || processor::process_loop(shared, sink))
            .map_err(|e| Error::Spawn {
                name: "frame processor",
                source: e,
            })?;
        self.threads.push(handle);
        Ok(())
    }

    /// Stop streaming: clear the run flag, send stop commands, join the
    /// workers and flush the rings. Safe to call when already stopped.
    pub fn stop(&mut self) {
        if !self.streaming {
            return;
        }
        self.shared.running.store(false, Ordering::SeqCst);
        self.control.stop_streams();
        // The receivers own the sockets; dropping out of their loops closes
        // them.
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        platform::end_timer_resolution();
        self.shared.video_ring.flush();
        self.shared.audio_ring.flush();
        self.bound_ports = None;
        self.streaming = false;
        info!("streaming stopped");
    }

    /// Apply a new configuration. Network-relevant changes restart the
    /// stream; buffer delay and logging apply in place.
    pub fn update(&mut self, config: StreamConfig) -> Result<(), Error> {
        if self.config.needs_restart(&config) {
            let was_streaming = self.streaming;
            if was_streaming {
                self.stop();
            }
            self.config = config;
            if was_streaming {
                self.start()?;
            }
            return Ok(());
        }

        if config.buffer_delay_ms != self.config.buffer_delay_ms {
            self.shared.video_ring.set_delay(config.buffer_delay_ms as u32);
            self.shared.audio_ring.set_delay(config.buffer_delay_ms as u32);
        }
        self.shared.set_debug_logging(config.debug_logging);
        self.config = config;
        Ok(())
    }

    /// Host-driven periodic callback: staleness detection, no-signal frame
    /// emission, and control retry pumping.
    pub fn tick(&mut self) {
        if !self.streaming {
            return;
        }
        let now_ns = clock::now_ns();
        let now_us = now_ns / 1_000;
        let threshold = self.config.stale_threshold_ns;
        let video_stale = now_ns
            .saturating_sub(self.shared.last_video_packet_ns.load(Ordering::Relaxed))
            > threshold;
        let audio_stale = now_ns
            .saturating_sub(self.shared.last_audio_packet_ns.load(Ordering::Relaxed))
            > threshold;

        if video_stale {
            self.emit_no_signal(now_ns);
        }
        if video_stale || audio_stale {
            self.control.handshake_stale(now_us);
        } else if self.control.retry_due(now_us) {
            self.control.start_streams(now_us);
        }
    }

    /// Emit an opaque black frame at the expected cadence while the video
    /// stream is stale.
    fn emit_no_signal(&mut self, now_ns: u64) {
        let format = self.shared.detected_format().unwrap_or_default();
        if now_ns.saturating_sub(self.last_no_signal_ns) < format.frame_interval_ns() {
            return;
        }
        self.last_no_signal_ns = now_ns;

        let size = format.width as usize * format.height as usize * 4;
        if self.no_signal_frame.len() != size {
            self.no_signal_frame = vec![0u8; size];
            for px in self.no_signal_frame.chunks_exact_mut(4) {
                px[3] = 0xFF;
            }
        }
        self.sink
            .lock()
            .on_video_frame(&self.no_signal_frame, format.width, format.height, now_ns);
    }

    /// Idempotent full teardown.
    pub fn destroy(&mut self) {
        self.stop();
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Actual bound (video, audio) ports while streaming. Differs from the
    /// configured ports when they were 0.
    pub fn bound_ports(&self) -> Option<(u16, u16)> {
        self.bound_ports
    }

    pub fn detected_format(&self) -> Option<VideoFormat> {
        self.shared.detected_format()
    }

    /// Raw counter totals for host polling.
    pub fn stats(&self) -> StatsTotals {
        self.shared.stats.totals()
    }

    /// Ring occupancy relative to the configured delay, per stream.
    pub fn buffer_fill_percent(&self) -> (u32, u32) {
        (
            self.shared.video_ring.fill_percent(),
            self.shared.audio_ring.fill_percent(),
        )
    }

    pub fn control_failures(&self) -> u32 {
        self.control.consecutive_failures()
    }

    fn resolve_control_addr(&self) -> Result<Option<SocketAddr>, Error> {
        if self.config.control_disabled() {
            return Ok(None);
        }
        let host = self.config.device_host.as_str();
        let mut addrs = (host, CONTROL_PORT).to_socket_addrs().map_err(|e| Error::Resolve {
            host: host.to_string(),
            source: e,
        })?;
        let addr = addrs.next().ok_or_else(|| Error::Resolve {
            host: host.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
        })?;
        Ok(Some(addr))
    }
}

impl Drop for C64Stream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn local_port(socket: &UdpSocket) -> u16 {
    socket.local_addr().map(|a| a.port()).unwrap_or(0)
}

/// Bind a non-blocking UDP socket with a receive buffer large enough to
/// ride out scheduling hiccups at the video packet rate.
fn bind_udp(local: Ipv4Addr, port: u16) -> Result<UdpSocket, Error> {
    let addr = SocketAddrV4::new(local, port);
    let bind_err = |source: std::io::Error| Error::Bind {
        addr: addr.to_string(),
        source,
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&SocketAddr::V4(addr).into()).map_err(bind_err)?;
    let _ = socket.set_recv_buffer_size(1024 * 1024);

    let socket: UdpSocket = socket.into();
    socket.set_nonblocking(true).map_err(bind_err)?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NO_CONTROL_HOST;
    use crate::protocol::{
        VideoHeader, AUDIO_PACKET_SIZE, BITS_PER_PIXEL, LINES_PER_PACKET, PIXELS_PER_LINE,
        VIDEO_PACKET_SIZE,
    };
    use std::time::Duration;

    #[derive(Default)]
    struct Recorded {
        frames: Vec<(u16, u16, u64)>,
        audio_packets: usize,
    }

    #[derive(Clone, Default)]
    struct CountingSink {
        recorded: Arc<Mutex<Recorded>>,
    }

    impl StreamSink for CountingSink {
        fn on_video_frame(&mut self, _rgba: &[u8], width: u16, height: u16, timestamp_ns: u64) {
            self.recorded.lock().frames.push((width, height, timestamp_ns));
        }

        fn on_audio_samples(&mut self, _pcm: &[u8], _timestamp_ns: u64) {
            self.recorded.lock().audio_packets += 1;
        }
    }

    fn loopback_config() -> StreamConfig {
        StreamConfig {
            device_host: NO_CONTROL_HOST.to_string(),
            local_bind_address: Ipv4Addr::LOCALHOST,
            video_port: 0,
            audio_port: 0,
            buffer_delay_ms: 0,
            stale_threshold_ns: 100_000_000,
            debug_logging: false,
        }
    }

    fn video_packet(frame: u16, packet_index: u16, last: bool) -> [u8; VIDEO_PACKET_SIZE] {
        let mut buf = [0x21u8; VIDEO_PACKET_SIZE];
        VideoHeader {
            sequence: packet_index,
            frame_index: frame,
            line_index: packet_index * LINES_PER_PACKET as u16,
            last_packet: last,
            pixels_per_line: PIXELS_PER_LINE,
            lines_per_packet: LINES_PER_PACKET,
            bits_per_pixel: BITS_PER_PIXEL,
            encoding: 0,
        }
        .write(&mut buf);
        buf
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let sink = CountingSink::default();
        let mut stream = C64Stream::new(loopback_config(), Box::new(sink));
        assert!(!stream.is_streaming());

        stream.start().unwrap();
        assert!(stream.is_streaming());
        assert!(stream.bound_ports().is_some());
        assert!(matches!(stream.start(), Err(Error::AlreadyRunning)));

        stream.stop();
        assert!(!stream.is_streaming());
        // Idempotent.
        stream.stop();
        stream.destroy();
    }

    #[test]
    fn test_end_to_end_loopback() {
        let sink = CountingSink::default();
        let recorded = sink.recorded.clone();
        let mut stream = C64Stream::new(loopback_config(), Box::new(sink));
        stream.start().unwrap();
        let (video_port, audio_port) = stream.bound_ports().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        for frame in 0..2u16 {
            for i in 0..60u16 {
                let packet = video_packet(frame, i, i == 59);
                sender
                    .send_to(&packet, ("127.0.0.1", video_port))
                    .unwrap();
            }
        }
        let mut audio = [0u8; AUDIO_PACKET_SIZE];
        for seq in 0..3u16 {
            audio[0..2].copy_from_slice(&seq.to_le_bytes());
            sender.send_to(&audio, ("127.0.0.1", audio_port)).unwrap();
        }

        // Give the receiver and processor threads time to drain.
        for _ in 0..50 {
            std::thread::sleep(Duration::from_millis(10));
            let r = recorded.lock();
            if !r.frames.is_empty() && r.audio_packets >= 3 {
                break;
            }
        }

        stream.stop();
        let r = recorded.lock();
        assert!(!r.frames.is_empty(), "no frame was delivered");
        assert_eq!(r.frames[0].0, 384);
        assert_eq!(r.frames[0].1, 240);
        assert!(r.audio_packets >= 3);
        assert_eq!(stream.detected_format().unwrap().height, 240);
    }

    #[test]
    fn test_tick_emits_no_signal_when_stale() {
        let sink = CountingSink::default();
        let recorded = sink.recorded.clone();
        let mut config = loopback_config();
        config.stale_threshold_ns = 1;
        let mut stream = C64Stream::new(config, Box::new(sink));
        stream.start().unwrap();

        std::thread::sleep(Duration::from_millis(5));
        stream.tick();
        stream.stop();

        let r = recorded.lock();
        assert_eq!(r.frames.len(), 1);
        // No format was ever detected; the indication defaults to PAL.
        assert_eq!(r.frames[0].0, 384);
        assert_eq!(r.frames[0].1, 272);
    }

    #[test]
    fn test_no_signal_respects_cadence() {
        let sink = CountingSink::default();
        let recorded = sink.recorded.clone();
        let mut config = loopback_config();
        config.stale_threshold_ns = 1;
        let mut stream = C64Stream::new(config, Box::new(sink));
        stream.start().unwrap();

        std::thread::sleep(Duration::from_millis(5));
        stream.tick();
        stream.tick();
        stream.tick();
        stream.stop();

        // Back-to-back ticks are inside one frame interval.
        assert_eq!(recorded.lock().frames.len(), 1);
    }

    #[test]
    fn test_update_in_place_vs_restart() {
        let sink = CountingSink::default();
        let mut stream = C64Stream::new(loopback_config(), Box::new(sink));
        stream.start().unwrap();
        let ports_before = stream.bound_ports().unwrap();

        let mut delay_change = stream.config().clone();
        delay_change.buffer_delay_ms = 100;
        stream.update(delay_change).unwrap();
        assert!(stream.is_streaming());
        assert_eq!(stream.bound_ports().unwrap(), ports_before);
        assert_eq!(stream.config().buffer_delay_ms, 100);

        // A device host change is network-relevant and forces a restart.
        let mut rebind = stream.config().clone();
        rebind.device_host = "127.0.0.1".to_string();
        stream.update(rebind).unwrap();
        assert!(stream.is_streaming());
        assert_eq!(stream.config().device_host, "127.0.0.1");
        stream.stop();
    }

    #[test]
    fn test_update_while_stopped() {
        let sink = CountingSink::default();
        let mut stream = C64Stream::new(loopback_config(), Box::new(sink));
        let mut config = stream.config().clone();
        config.video_port = 1;
        stream.update(config).unwrap();
        assert!(!stream.is_streaming());
        assert_eq!(stream.config().video_port, 1);
    }
}
