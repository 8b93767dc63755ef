//! Owned pixel frames in the device's native BGR ordering
//!
//! Screenshots and templates are (H, W, 3) byte buffers. BGR ordering is kept
//! end to end so that `wait_for_color` steps compare against the same channel
//! order the workflow editor records.

use droidherd_core::prelude::*;
use image::{imageops::FilterType, RgbImage};
use serde::{Deserialize, Serialize};

/// A rectangular region within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// An owned BGR pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap an existing BGR buffer. The buffer length must be `w * h * 3`.
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(Error::image(format!(
                "buffer length {} does not match {}x{}x3",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A solid-color frame.
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&bgr);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Convert an RGBA payload (as produced by the raw screencap wire) to BGR.
    pub fn from_rgba(width: u32, height: u32, rgba: &[u8]) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() < expected {
            return Err(Error::image(format!(
                "RGBA payload too short: {} < {}",
                rgba.len(),
                expected
            )));
        }

        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for px in rgba[..expected].chunks_exact(4) {
            data.push(px[2]);
            data.push(px[1]);
            data.push(px[0]);
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Decode a PNG into a frame.
    pub fn from_png(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)
            .map_err(|e| Error::image(format!("PNG decode failed: {}", e)))?
            .to_rgb8();

        let (width, height) = decoded.dimensions();
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for px in decoded.pixels() {
            data.push(px[2]);
            data.push(px[1]);
            data.push(px[0]);
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Encode this frame as PNG bytes.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let image = self.to_rgb_image();
        let mut out = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| Error::image(format!("PNG encode failed: {}", e)))?;
        Ok(out.into_inner())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw BGR bytes, row-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Pixel at (x, y) as [B, G, R], or None when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.data[offset], self.data[offset + 1], self.data[offset + 2]])
    }

    /// Overwrite the pixel at (x, y). Out-of-bounds writes are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, bgr: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        self.data[offset..offset + 3].copy_from_slice(&bgr);
    }

    /// Copy out a rectangular region. The region is clamped to the frame.
    pub fn crop(&self, region: Region) -> Result<Frame> {
        if region.x >= self.width || region.y >= self.height {
            return Err(Error::image(format!(
                "crop origin ({}, {}) outside {}x{} frame",
                region.x, region.y, self.width, self.height
            )));
        }
        let w = region.width.min(self.width - region.x);
        let h = region.height.min(self.height - region.y);
        if w == 0 || h == 0 {
            return Err(Error::image("crop region is empty"));
        }

        let mut data = Vec::with_capacity(w as usize * h as usize * 3);
        for row in region.y..region.y + h {
            let start = (row as usize * self.width as usize + region.x as usize) * 3;
            let end = start + w as usize * 3;
            data.extend_from_slice(&self.data[start..end]);
        }
        Frame::from_bgr(w, h, data)
    }

    /// Bilinear resize to the given dimensions. Identity sizes return a clone.
    pub fn resize(&self, width: u32, height: u32) -> Frame {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let resized = image::imageops::resize(
            &self.to_rgb_image(),
            width,
            height,
            FilterType::Triangle,
        );

        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for px in resized.pixels() {
            data.push(px[2]);
            data.push(px[1]);
            data.push(px[0]);
        }
        Frame {
            width,
            height,
            data,
        }
    }

    /// Grayscale luma values in [0, 255], row-major.
    pub fn to_gray(&self) -> Vec<f32> {
        self.data
            .chunks_exact(3)
            .map(|bgr| 0.114 * bgr[0] as f32 + 0.587 * bgr[1] as f32 + 0.299 * bgr[2] as f32)
            .collect()
    }

    fn to_rgb_image(&self) -> RgbImage {
        let mut rgb = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(3) {
            rgb.push(px[2]);
            rgb.push(px[1]);
            rgb.push(px[0]);
        }
        RgbImage::from_raw(self.width, self.height, rgb)
            .expect("dimensions verified at construction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let mut frame = Frame::filled(width, height, [0, 0, 0]);
        for y in 0..height {
            for x in 0..width {
                frame.set_pixel(x, y, [(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]);
            }
        }
        frame
    }

    #[test]
    fn test_from_bgr_length_check() {
        assert!(Frame::from_bgr(2, 2, vec![0; 12]).is_ok());
        assert!(Frame::from_bgr(2, 2, vec![0; 11]).is_err());
    }

    #[test]
    fn test_pixel_access() {
        let mut frame = Frame::filled(4, 3, [1, 2, 3]);
        assert_eq!(frame.pixel(0, 0), Some([1, 2, 3]));
        assert_eq!(frame.pixel(3, 2), Some([1, 2, 3]));
        assert_eq!(frame.pixel(4, 0), None);
        assert_eq!(frame.pixel(0, 3), None);

        frame.set_pixel(2, 1, [9, 8, 7]);
        assert_eq!(frame.pixel(2, 1), Some([9, 8, 7]));
    }

    #[test]
    fn test_from_rgba_swaps_channels() {
        // One pixel: R=10, G=20, B=30, A=255
        let frame = Frame::from_rgba(1, 1, &[10, 20, 30, 255]).unwrap();
        assert_eq!(frame.pixel(0, 0), Some([30, 20, 10]));
    }

    #[test]
    fn test_from_rgba_rejects_short_payload() {
        assert!(Frame::from_rgba(2, 2, &[0; 15]).is_err());
    }

    #[test]
    fn test_crop_extracts_region() {
        let frame = gradient_frame(16, 16);
        let cropped = frame
            .crop(Region {
                x: 4,
                y: 5,
                width: 6,
                height: 7,
            })
            .unwrap();

        assert_eq!(cropped.width(), 6);
        assert_eq!(cropped.height(), 7);
        assert_eq!(cropped.pixel(0, 0), frame.pixel(4, 5));
        assert_eq!(cropped.pixel(5, 6), frame.pixel(9, 11));
    }

    #[test]
    fn test_crop_clamps_to_frame() {
        let frame = gradient_frame(10, 10);
        let cropped = frame
            .crop(Region {
                x: 8,
                y: 8,
                width: 100,
                height: 100,
            })
            .unwrap();
        assert_eq!(cropped.width(), 2);
        assert_eq!(cropped.height(), 2);
    }

    #[test]
    fn test_crop_rejects_outside_origin() {
        let frame = gradient_frame(10, 10);
        assert!(frame
            .crop(Region {
                x: 10,
                y: 0,
                width: 1,
                height: 1,
            })
            .is_err());
    }

    #[test]
    fn test_png_round_trip() {
        let frame = gradient_frame(12, 9);
        let png = frame.to_png().unwrap();
        let decoded = Frame::from_png(&png).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_resize_identity_is_clone() {
        let frame = gradient_frame(8, 8);
        let same = frame.resize(8, 8);
        assert_eq!(same, frame);
    }

    #[test]
    fn test_resize_changes_dimensions() {
        let frame = gradient_frame(16, 8);
        let resized = frame.resize(8, 4);
        assert_eq!(resized.width(), 8);
        assert_eq!(resized.height(), 4);
    }

    #[test]
    fn test_to_gray_dimensions() {
        let frame = gradient_frame(5, 4);
        let gray = frame.to_gray();
        assert_eq!(gray.len(), 20);
        assert!(gray.iter().all(|v| (0.0..=255.0).contains(v)));
    }
}
