//! Stream configuration.

use std::net::Ipv4Addr;

/// Device host sentinel that disables the control channel entirely.
/// Used when the device has been told to stream out-of-band.
pub const NO_CONTROL_HOST: &str = "0.0.0.0";

/// Configuration for one stream context.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Device hostname or IP. `"0.0.0.0"` skips start/stop commands.
    pub device_host: String,
    /// Local address the UDP sockets bind to.
    pub local_bind_address: Ipv4Addr,
    /// UDP port for the video stream.
    pub video_port: u16,
    /// UDP port for the audio stream.
    pub audio_port: u16,
    /// Jitter buffer delay in milliseconds, clamped to the ring ceiling.
    pub buffer_delay_ms: u16,
    /// Nanoseconds without a packet before the stream counts as stale.
    pub stale_threshold_ns: u64,
    /// Emit per-packet diagnostics and periodic statistics reports.
    pub debug_logging: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            device_host: "c64u".to_string(),
            local_bind_address: Ipv4Addr::UNSPECIFIED,
            video_port: 11000,
            audio_port: 11001,
            // Three PAL frame intervals of buffering.
            buffer_delay_ms: 60,
            stale_threshold_ns: 100_000_000,
            debug_logging: true,
        }
    }
}

impl StreamConfig {
    /// Whether switching to `other` requires tearing the sockets down and
    /// starting over, as opposed to an in-place update.
    pub fn needs_restart(&self, other: &Self) -> bool {
        self.device_host != other.device_host
            || self.local_bind_address != other.local_bind_address
            || self.video_port != other.video_port
            || self.audio_port != other.audio_port
    }

    /// Whether the control channel is disabled for this configuration.
    pub fn control_disabled(&self) -> bool {
        self.device_host == NO_CONTROL_HOST
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = StreamConfig::default();
        assert_eq!(cfg.video_port, 11000);
        assert_eq!(cfg.audio_port, 11001);
        assert_eq!(cfg.device_host, "c64u");
        assert!(!cfg.control_disabled());
    }

    #[test]
    fn test_restart_classification() {
        let base = StreamConfig::default();

        let mut delay_only = base.clone();
        delay_only.buffer_delay_ms = 200;
        delay_only.debug_logging = false;
        assert!(!base.needs_restart(&delay_only));

        let mut port_change = base.clone();
        port_change.video_port = 12000;
        assert!(base.needs_restart(&port_change));

        let mut host_change = base.clone();
        host_change.device_host = "192.168.1.64".to_string();
        assert!(base.needs_restart(&host_change));
    }

    #[test]
    fn test_control_sentinel() {
        let mut cfg = StreamConfig::default();
        cfg.device_host = NO_CONTROL_HOST.to_string();
        assert!(cfg.control_disabled());
    }
}
