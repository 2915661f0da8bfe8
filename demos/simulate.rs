//! Synthesize an Ultimate stream for testing without hardware.
//!
//! Usage: cargo run --example simulate [target_ip]
//!
//! Sends PAL video frames (a moving colour-bar pattern) to port 11000 and
//! 48 kHz sine-tone audio to port 11001 at the device's real pacing. Point
//! the `receive` example at "0.0.0.0" in another terminal to consume it.

use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

use c64u_stream::{StreamId, VideoHeader, AUDIO_PACKET_SIZE, VIDEO_PACKET_SIZE};

const LINES_PER_PACKET: u16 = 4;
const PAL_LINES: u16 = 272;
const PACKETS_PER_FRAME: u16 = PAL_LINES / LINES_PER_PACKET;
const FRAME_INTERVAL: Duration = Duration::from_micros(19_950);
const AUDIO_INTERVAL: Duration = Duration::from_millis(4);

fn main() {
    let target = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1".to_string());
    let socket = UdpSocket::bind("0.0.0.0:0").expect("bind failed");
    println!(
        "sending video to {}:11000 and audio to {}:11001 (stream ids {:?}/{:?})",
        target,
        target,
        StreamId::Video,
        StreamId::Audio
    );

    let video_target = format!("{}:11000", target);
    let audio_target = format!("{}:11001", target);

    let mut video_seq = 0u16;
    let mut audio_seq = 0u16;
    let mut frame_index = 0u16;
    let mut next_frame = Instant::now();
    let mut next_audio = Instant::now();
    let mut phase = 0u32;

    loop {
        let now = Instant::now();

        if now >= next_frame {
            next_frame += FRAME_INTERVAL;
            for packet_index in 0..PACKETS_PER_FRAME {
                let mut buf = [0u8; VIDEO_PACKET_SIZE];
                VideoHeader {
                    sequence: video_seq,
                    frame_index,
                    line_index: packet_index * LINES_PER_PACKET,
                    last_packet: packet_index == PACKETS_PER_FRAME - 1,
                    pixels_per_line: 384,
                    lines_per_packet: LINES_PER_PACKET as u8,
                    bits_per_pixel: 4,
                    encoding: 0,
                }
                .write(&mut buf);
                // Colour bars that scroll one palette entry per frame.
                for (i, byte) in buf[12..].iter_mut().enumerate() {
                    let colour = ((i / 24) as u16 + frame_index) as u8 & 0x0F;
                    *byte = colour | (colour << 4);
                }
                let _ = socket.send_to(&buf, &video_target);
                video_seq = video_seq.wrapping_add(1);
            }
            frame_index = frame_index.wrapping_add(1);
        }

        if now >= next_audio {
            next_audio += AUDIO_INTERVAL;
            let mut buf = [0u8; AUDIO_PACKET_SIZE];
            buf[0..2].copy_from_slice(&audio_seq.to_le_bytes());
            // 500 Hz square-ish tone, stereo.
            for frame in 0..192u32 {
                let sample: i16 = if (phase + frame) / 48 % 2 == 0 { 8000 } else { -8000 };
                let offset = 2 + frame as usize * 4;
                buf[offset..offset + 2].copy_from_slice(&sample.to_le_bytes());
                buf[offset + 2..offset + 4].copy_from_slice(&sample.to_le_bytes());
            }
            phase = phase.wrapping_add(192);
            let _ = socket.send_to(&buf, &audio_target);
            audio_seq = audio_seq.wrapping_add(1);
        }

        thread::sleep(Duration::from_millis(1));
    }
}
