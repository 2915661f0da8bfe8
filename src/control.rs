//! Device control channel.
//!
//! The Ultimate takes stream commands over a short-lived TCP connection:
//! connect, write the command bytes, close. No response is read. Start
//! failures are retried with exponential backoff from the lifecycle tick.

use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use log::{debug, warn};

use crate::protocol::{encode_start, encode_stop, StreamId};

/// TCP connect timeout for a command.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// First retry delay; doubles per consecutive failure.
pub const RETRY_BASE_MS: u64 = 500;
/// Give up rescheduling after this many failed attempts in a row.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Control-side state for one device.
pub struct ControlChannel {
    /// `None` when the device host is the `0.0.0.0` sentinel; every command
    /// becomes a no-op then.
    device: Option<SocketAddr>,
    consecutive_failures: u32,
    /// Failed attempts since the last success, bounds the retry schedule.
    attempts: u32,
    last_attempt_us: u64,
    next_retry_us: u64,
}

impl ControlChannel {
    pub fn new(device: Option<SocketAddr>) -> Self {
        Self {
            device,
            consecutive_failures: 0,
            attempts: 0,
            last_attempt_us: 0,
            next_retry_us: 0,
        }
    }

    pub fn device(&self) -> Option<SocketAddr> {
        self.device
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Send start commands for both streams. Records retry state; a failure
    /// here is not fatal, the tick retries it later.
    pub fn start_streams(&mut self, now_us: u64) -> bool {
        self.last_attempt_us = now_us;
        let result = self
            .send_command(&encode_start(StreamId::Video))
            .and_then(|_| self.send_command(&encode_start(StreamId::Audio)));
        match result {
            Ok(()) => {
                self.record_success();
                true
            }
            Err(e) => {
                warn!("control: start commands failed: {}", e);
                self.record_failure(now_us);
                false
            }
        }
    }

    /// Send stop commands for both streams. Best effort; never retried.
    pub fn stop_streams(&mut self) {
        if let Err(e) = self
            .send_command(&encode_stop(StreamId::Video))
            .and_then(|_| self.send_command(&encode_stop(StreamId::Audio)))
        {
            warn!("control: stop commands failed: {}", e);
        }
    }

    /// Whether a failed start is due for another attempt.
    pub fn retry_due(&self, now_us: u64) -> bool {
        self.attempts > 0 && self.attempts < MAX_RETRY_ATTEMPTS && now_us >= self.next_retry_us
    }

    /// Re-send the start handshake after a stale stream, rate-limited by
    /// the same backoff schedule as failure retries.
    pub fn handshake_stale(&mut self, now_us: u64) {
        let backoff_us = self.current_backoff_ms() * 1_000;
        if now_us.saturating_sub(self.last_attempt_us) >= backoff_us {
            debug!("control: stream stale, re-sending start commands");
            self.start_streams(now_us);
        }
    }

    fn current_backoff_ms(&self) -> u64 {
        RETRY_BASE_MS << self.attempts.min(MAX_RETRY_ATTEMPTS)
    }

    fn send_command(&self, bytes: &[u8]) -> std::io::Result<()> {
        let Some(addr) = self.device else {
            return Ok(());
        };
        let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.write_all(bytes)?;
        Ok(())
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.attempts = 0;
        self.next_retry_us = 0;
    }

    fn record_failure(&mut self, now_us: u64) {
        self.consecutive_failures += 1;
        self.attempts += 1;
        let backoff_ms = RETRY_BASE_MS << (self.attempts - 1).min(MAX_RETRY_ATTEMPTS);
        self.next_retry_us = now_us + backoff_ms * 1_000;
    }
}
