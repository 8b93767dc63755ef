//! Screenshot wire decoding
//!
//! `exec-out screencap` emits the raw framebuffer: a little-endian header of
//! width, height, pixel format, and (on API 26+) colorspace, followed by the
//! pixel payload. `screencap -p` emits PNG instead; both are accepted so a
//! PNG-only device still works.

use droidherd_core::prelude::*;
use droidherd_vision::Frame;

/// RGBA_8888 in the Android PixelFormat enumeration.
const PIXEL_FORMAT_RGBA_8888: u32 = 1;

/// Header sizes: modern (w, h, format, colorspace) and legacy (w, h, format).
const HEADER_V2: usize = 16;
const HEADER_V1: usize = 12;

const PNG_MAGIC: [u8; 4] = [0x89, b'P', b'N', b'G'];

/// Upper bound on believable screen dimensions, to reject garbage headers.
const MAX_DIMENSION: u32 = 16_384;

/// Decode a screencap payload (raw framebuffer or PNG) into a frame.
pub fn decode(payload: &[u8]) -> Result<Frame> {
    if payload.len() >= 4 && payload[..4] == PNG_MAGIC {
        return Frame::from_png(payload);
    }
    decode_raw(payload)
}

fn decode_raw(payload: &[u8]) -> Result<Frame> {
    if payload.len() < HEADER_V1 {
        return Err(Error::protocol(format!(
            "screencap payload too short: {} bytes",
            payload.len()
        )));
    }

    let width = read_u32(payload, 0);
    let height = read_u32(payload, 4);
    let format = read_u32(payload, 8);

    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(Error::protocol(format!(
            "implausible screencap geometry {}x{}",
            width, height
        )));
    }
    if format != PIXEL_FORMAT_RGBA_8888 {
        return Err(Error::protocol(format!(
            "unsupported screencap pixel format {}",
            format
        )));
    }

    let pixel_bytes = width as usize * height as usize * 4;

    // Prefer the modern header; fall back to the legacy 12-byte layout.
    for header in [HEADER_V2, HEADER_V1] {
        if payload.len() >= header + pixel_bytes {
            return Frame::from_rgba(width, height, &payload[header..header + pixel_bytes]);
        }
    }

    Err(Error::protocol(format!(
        "screencap payload truncated: have {} bytes, need {} for {}x{}",
        payload.len(),
        HEADER_V1 + pixel_bytes,
        width,
        height
    )))
}

fn read_u32(payload: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        payload[offset],
        payload[offset + 1],
        payload[offset + 2],
        payload[offset + 3],
    ])
}

/// Build a raw screencap payload from a frame (fake-transport helper).
pub fn encode_raw(frame: &Frame) -> Vec<u8> {
    let mut payload = Vec::with_capacity(
        HEADER_V2 + frame.width() as usize * frame.height() as usize * 4,
    );
    payload.extend_from_slice(&frame.width().to_le_bytes());
    payload.extend_from_slice(&frame.height().to_le_bytes());
    payload.extend_from_slice(&PIXEL_FORMAT_RGBA_8888.to_le_bytes());
    payload.extend_from_slice(&0u32.to_le_bytes());

    for y in 0..frame.height() {
        for x in 0..frame.width() {
            let [b, g, r] = frame.pixel(x, y).expect("in bounds");
            payload.extend_from_slice(&[r, g, b, 255]);
        }
    }
    payload
}
