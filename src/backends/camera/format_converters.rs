// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion
//!
//! Decodes raw device payloads into packed RGB or grayscale images for
//! the export pipeline. YUV conversions use full-range BT.601 coefficients;
//! grayscale from color uses BT.601 luma in integer arithmetic.

use super::types::{CameraFrame, PixelFormat};
use crate::errors::{CameraError, CameraResult};
use image::{GrayImage, ImageBuffer, Luma, RgbImage};

/// 16-bit single channel image
pub type Gray16Image = ImageBuffer<Luma<u16>, Vec<u16>>;

/// A frame decoded into samples
#[derive(Debug, Clone)]
pub enum DecodedImage {
    Rgb(RgbImage),
    Gray(GrayImage),
    Gray16(Gray16Image),
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        match self {
            DecodedImage::Rgb(img) => img.width(),
            DecodedImage::Gray(img) => img.width(),
            DecodedImage::Gray16(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            DecodedImage::Rgb(img) => img.height(),
            DecodedImage::Gray(img) => img.height(),
            DecodedImage::Gray16(img) => img.height(),
        }
    }

    /// Samples per pixel
    pub fn channels(&self) -> usize {
        match self {
            DecodedImage::Rgb(_) => 3,
            DecodedImage::Gray(_) | DecodedImage::Gray16(_) => 1,
        }
    }
}

/// Convert one YUV sample to RGB (BT.601, full range)
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = (y + 1.402 * v).round().clamp(0.0, 255.0) as u8;
    let g = (y - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0) as u8;
    let b = (y + 1.772 * u).round().clamp(0.0, 255.0) as u8;
    [r, g, b]
}

/// BT.601 luma: `(299 R + 587 G + 114 B + 500) / 1000`
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}

/// Convert YUYV (Y0 U Y1 V) to packed RGB
pub fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    packed_422_to_rgb(data, width, height, |c| (c[0], c[1], c[2], c[3]))
}

/// Convert UYVY (U Y0 V Y1) to packed RGB
pub fn uyvy_to_rgb(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    packed_422_to_rgb(data, width, height, |c| (c[1], c[0], c[3], c[2]))
}

/// Shared 4:2:2 walker; `split` yields (y0, u, y1, v) from each 4-byte group
fn packed_422_to_rgb(
    data: &[u8],
    width: u32,
    height: u32,
    split: impl Fn(&[u8]) -> (u8, u8, u8, u8),
) -> Vec<u8> {
    let pixel_count = width as usize * height as usize;
    let mut rgb = Vec::with_capacity(pixel_count * 3);

    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = split(chunk);
        for y in [y0, y1] {
            if rgb.len() >= pixel_count * 3 {
                break;
            }
            rgb.extend_from_slice(&yuv_to_rgb(y, u, v));
        }
    }

    rgb
}

/// Convert NV12 (Y plane followed by interleaved UV at half resolution)
pub fn nv12_to_rgb(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let (y_plane, uv_plane) = data.split_at((w * h).min(data.len()));
    let mut rgb = Vec::with_capacity(w * h * 3);

    for row in 0..h {
        let uv_row = (row / 2) * w;
        for col in 0..w {
            let y = y_plane.get(row * w + col).copied().unwrap_or(0);
            let uv = uv_row + (col & !1);
            let u = uv_plane.get(uv).copied().unwrap_or(128);
            let v = uv_plane.get(uv + 1).copied().unwrap_or(128);
            rgb.extend_from_slice(&yuv_to_rgb(y, u, v));
        }
    }

    rgb
}

/// Swap BGR to RGB
pub fn bgr_to_rgb(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(3)
        .flat_map(|px| [px[2], px[1], px[0]])
        .collect()
}

/// Reduce packed RGB to 8-bit luma
pub fn rgb_to_luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| luma(px[0], px[1], px[2]))
        .collect()
}

/// Read little-endian 16-bit samples
pub fn gray16_samples(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Scale 16-bit samples to 8 bits (divide by 256)
pub fn gray16_to_gray8(samples: &[u16]) -> Vec<u8> {
    samples.iter().map(|&s| (s >> 8) as u8).collect()
}

/// Decode one MJPEG frame
pub fn decode_mjpeg(data: &[u8]) -> CameraResult<RgbImage> {
    image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map(|img| img.to_rgb8())
        .map_err(|e| CameraError::CaptureFailed(format!("corrupt MJPEG frame: {}", e)))
}

/// Decode a frame into RGB or grayscale samples
///
/// # Errors
/// * `UnsupportedConversion` - The pixel layout is unknown
/// * `CaptureFailed` - The payload is truncated or does not decode
pub fn decode(frame: &CameraFrame) -> CameraResult<DecodedImage> {
    let (w, h) = (frame.width, frame.height);
    let data: &[u8] = &frame.data;

    if let Some(expected) = frame.format.frame_size(w, h)
        && data.len() < expected
    {
        return Err(CameraError::CaptureFailed(format!(
            "{} frame holds {} bytes, {}x{} needs {}",
            frame.format,
            data.len(),
            w,
            h,
            expected
        )));
    }

    let rgb = |raw: Vec<u8>| {
        RgbImage::from_raw(w, h, raw).ok_or_else(|| {
            CameraError::CaptureFailed(format!("frame does not fill {}x{}", w, h))
        })
    };

    let image = match frame.format {
        PixelFormat::Yuyv => DecodedImage::Rgb(rgb(yuyv_to_rgb(data, w, h))?),
        PixelFormat::Uyvy => DecodedImage::Rgb(rgb(uyvy_to_rgb(data, w, h))?),
        PixelFormat::Nv12 => DecodedImage::Rgb(rgb(nv12_to_rgb(data, w, h))?),
        PixelFormat::Rgb24 => DecodedImage::Rgb(rgb(data[..w as usize * h as usize * 3].to_vec())?),
        PixelFormat::Bgr24 => DecodedImage::Rgb(rgb(bgr_to_rgb(&data[..w as usize * h as usize * 3]))?),
        PixelFormat::Mjpeg => DecodedImage::Rgb(decode_mjpeg(data)?),
        PixelFormat::Gray8 => {
            let raw = data[..w as usize * h as usize].to_vec();
            DecodedImage::Gray(GrayImage::from_raw(w, h, raw).ok_or_else(|| {
                CameraError::CaptureFailed(format!("frame does not fill {}x{}", w, h))
            })?)
        }
        PixelFormat::Gray16 => {
            let samples = gray16_samples(&data[..w as usize * h as usize * 2]);
            DecodedImage::Gray16(Gray16Image::from_raw(w, h, samples).ok_or_else(|| {
                CameraError::CaptureFailed(format!("frame does not fill {}x{}", w, h))
            })?)
        }
        PixelFormat::Other(_) => {
            return Err(CameraError::UnsupportedConversion {
                from: frame.format.to_string(),
                target: "RGB".to_string(),
                reason: "unknown pixel layout".to_string(),
            });
        }
    };

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luma_weights() {
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(0, 0, 0), 0);
        // (299 * 255 + 500) / 1000 = 76
        assert_eq!(luma(255, 0, 0), 76);
        assert_eq!(luma(0, 255, 0), 150);
        assert_eq!(luma(0, 0, 255), 29);
    }

    #[test]
    fn test_neutral_chroma_is_gray() {
        assert_eq!(yuv_to_rgb(100, 128, 128), [100, 100, 100]);
        assert_eq!(yuv_to_rgb(255, 128, 128), [255, 255, 255]);
    }

    #[test]
    fn test_yuyv_and_uyvy_agree() {
        let yuyv = [10, 100, 20, 150, 30, 90, 40, 160];
        let uyvy = [100, 10, 150, 20, 90, 30, 160, 40];
        assert_eq!(yuyv_to_rgb(&yuyv, 4, 1), uyvy_to_rgb(&uyvy, 4, 1));
        assert_eq!(yuyv_to_rgb(&yuyv, 4, 1).len(), 12);
    }

    #[test]
    fn test_nv12_gray_plane() {
        // 2x2 with neutral chroma
        let data = [0, 50, 100, 255, 128, 128];
        let rgb = nv12_to_rgb(&data, 2, 2);
        assert_eq!(&rgb[..3], &[0, 0, 0]);
        assert_eq!(&rgb[9..], &[255, 255, 255]);
    }

    #[test]
    fn test_bgr_swap() {
        assert_eq!(bgr_to_rgb(&[1, 2, 3, 4, 5, 6]), vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_gray16_scaling() {
        let samples = gray16_samples(&[0x00, 0x00, 0xff, 0xff, 0x34, 0x12]);
        assert_eq!(samples, vec![0, 0xffff, 0x1234]);
        assert_eq!(gray16_to_gray8(&samples), vec![0, 255, 0x12]);
    }

    #[test]
    fn test_decode_rejects_unknown_layout() {
        let frame = CameraFrame::from_bytes(PixelFormat::Other(*b"Y10B"), 2, 2, vec![0; 5], 0);
        assert!(matches!(
            decode(&frame),
            Err(CameraError::UnsupportedConversion { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        let frame = CameraFrame::from_bytes(PixelFormat::Yuyv, 4, 4, vec![0; 8], 0);
        assert!(matches!(decode(&frame), Err(CameraError::CaptureFailed(_))));
    }

    #[test]
    fn test_decode_gray16() {
        let frame = CameraFrame::from_bytes(PixelFormat::Gray16, 2, 1, vec![1, 0, 0, 1], 0);
        match decode(&frame).unwrap() {
            DecodedImage::Gray16(img) => assert_eq!(img.as_raw(), &vec![1u16, 256]),
            other => panic!("unexpected {:?}", other),
        }
    }
}
