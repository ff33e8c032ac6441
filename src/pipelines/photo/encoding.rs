// SPDX-License-Identifier: GPL-3.0-only

//! Frame encoding
//!
//! Turns a decoded frame into the bytes of one of the export targets:
//! - JPEG (with quality control)
//! - PNG and TIFF (lossless, 8 or 16 bit)
//! - PGM (binary portable graymap)
//! - CSV (decoded sample values as text)

use crate::backends::camera::format_converters::{self, DecodedImage};
use crate::backends::camera::{CameraFrame, PixelFormat};
use crate::constants::JpegQuality;
use crate::errors::{CameraError, CameraResult};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::pnm::{PnmEncoder, PnmSubtype, SampleEncoding};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::Cursor;
use tracing::debug;

/// Export file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportTarget {
    /// JPEG (lossy compression)
    #[default]
    Jpeg,
    /// PNG (lossless compression)
    Png,
    /// TIFF (lossless)
    Tiff,
    /// Portable graymap
    Pgm,
    /// Comma separated sample values
    Csv,
}

impl ExportTarget {
    pub const ALL: [ExportTarget; 5] = [
        ExportTarget::Jpeg,
        ExportTarget::Png,
        ExportTarget::Tiff,
        ExportTarget::Pgm,
        ExportTarget::Csv,
    ];

    /// Get file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ExportTarget::Jpeg => "jpg",
            ExportTarget::Png => "png",
            ExportTarget::Tiff => "tiff",
            ExportTarget::Pgm => "pgm",
            ExportTarget::Csv => "csv",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ExportTarget::Jpeg => "JPEG",
            ExportTarget::Png => "PNG",
            ExportTarget::Tiff => "TIFF",
            ExportTarget::Pgm => "PGM",
            ExportTarget::Csv => "CSV",
        }
    }

    /// Parse a target name or extension ("jpeg", "jpg", "tif", ...)
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ExportTarget::Jpeg),
            "png" => Some(ExportTarget::Png),
            "tif" | "tiff" => Some(ExportTarget::Tiff),
            "pgm" => Some(ExportTarget::Pgm),
            "csv" => Some(ExportTarget::Csv),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExportTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Check whether frames in `pixel_format` can be written as `target`
///
/// 16-bit gray only reaches JPEG by dropping its low byte, which needs
/// `allow_lossy`. Unknown layouts convert to nothing.
pub fn check_conversion(
    pixel_format: PixelFormat,
    target: ExportTarget,
    allow_lossy: bool,
) -> CameraResult<()> {
    let reason = match (pixel_format, target) {
        (PixelFormat::Other(_), _) => "unknown pixel layout",
        (PixelFormat::Gray16, ExportTarget::Jpeg) if !allow_lossy => {
            "JPEG holds 8-bit samples; enable lossy export to scale 16-bit gray"
        }
        _ => return Ok(()),
    };
    Err(CameraError::UnsupportedConversion {
        from: pixel_format.to_string(),
        target: target.to_string(),
        reason: reason.to_string(),
    })
}

/// Targets available for frames in `pixel_format`
pub fn supported_targets(pixel_format: PixelFormat, allow_lossy: bool) -> Vec<ExportTarget> {
    ExportTarget::ALL
        .into_iter()
        .filter(|&target| check_conversion(pixel_format, target, allow_lossy).is_ok())
        .collect()
}

/// Photo encoder
#[derive(Debug, Clone, Copy, Default)]
pub struct PhotoEncoder {
    quality: JpegQuality,
}

impl PhotoEncoder {
    pub fn new(quality: JpegQuality) -> Self {
        Self { quality }
    }

    /// Set encoding quality (only affects JPEG)
    pub fn set_quality(&mut self, quality: JpegQuality) {
        self.quality = quality;
    }

    pub fn quality(&self) -> JpegQuality {
        self.quality
    }

    /// Decode `frame` and encode it as `target`
    pub fn encode(
        &self,
        frame: &CameraFrame,
        target: ExportTarget,
        allow_lossy: bool,
    ) -> CameraResult<Vec<u8>> {
        check_conversion(frame.format, target, allow_lossy)?;
        let decoded = format_converters::decode(frame)?;

        let failed = |e: image::ImageError| CameraError::UnsupportedConversion {
            from: frame.format.to_string(),
            target: target.to_string(),
            reason: e.to_string(),
        };

        let data = match target {
            ExportTarget::Jpeg => encode_jpeg(&decoded, self.quality).map_err(failed)?,
            ExportTarget::Png => encode_lossless(decoded, ImageFormat::Png).map_err(failed)?,
            ExportTarget::Tiff => encode_lossless(decoded, ImageFormat::Tiff).map_err(failed)?,
            ExportTarget::Pgm => encode_pgm(&decoded).map_err(failed)?,
            ExportTarget::Csv => encode_csv(&decoded),
        };

        debug!(
            sequence = frame.sequence,
            from = %frame.format,
            target = %target,
            size = data.len(),
            "Encoding complete"
        );
        Ok(data)
    }
}

fn encode_jpeg(image: &DecodedImage, quality: JpegQuality) -> image::ImageResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.value());

    match image {
        DecodedImage::Rgb(img) => {
            encoder.write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)?
        }
        DecodedImage::Gray(img) => {
            encoder.write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::L8)?
        }
        DecodedImage::Gray16(img) => {
            let scaled = format_converters::gray16_to_gray8(img.as_raw());
            encoder.write_image(&scaled, img.width(), img.height(), ExtendedColorType::L8)?
        }
    }

    Ok(buffer)
}

fn encode_lossless(image: DecodedImage, format: ImageFormat) -> image::ImageResult<Vec<u8>> {
    let dynamic = match image {
        DecodedImage::Rgb(img) => DynamicImage::ImageRgb8(img),
        DecodedImage::Gray(img) => DynamicImage::ImageLuma8(img),
        DecodedImage::Gray16(img) => DynamicImage::ImageLuma16(img),
    };

    let mut buffer = Vec::new();
    dynamic.write_to(&mut Cursor::new(&mut buffer), format)?;
    Ok(buffer)
}

/// Binary PGM; color is reduced to luma, 16-bit gray keeps its depth
fn encode_pgm(image: &DecodedImage) -> image::ImageResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder = PnmEncoder::new(&mut buffer)
        .with_subtype(PnmSubtype::Graymap(SampleEncoding::Binary));

    match image {
        DecodedImage::Rgb(img) => {
            let luma = format_converters::rgb_to_luma(img.as_raw());
            encoder.write_image(&luma, img.width(), img.height(), ExtendedColorType::L8)?
        }
        DecodedImage::Gray(img) => {
            encoder.write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::L8)?
        }
        DecodedImage::Gray16(img) => encoder.write_image(
            bytemuck::cast_slice(img.as_raw()),
            img.width(),
            img.height(),
            ExtendedColorType::L16,
        )?,
    }

    Ok(buffer)
}

/// One line per pixel row, samples in source order (R,G,B for color)
pub fn encode_csv(image: &DecodedImage) -> Vec<u8> {
    let row_len = image.width() as usize * image.channels();
    let mut text = String::new();

    fn push_rows<T: std::fmt::Display>(text: &mut String, samples: &[T], row_len: usize) {
        if row_len == 0 {
            return;
        }
        for row in samples.chunks(row_len) {
            for (i, sample) in row.iter().enumerate() {
                if i > 0 {
                    text.push(',');
                }
                let _ = write!(text, "{}", sample);
            }
            text.push('\n');
        }
    }

    match image {
        DecodedImage::Rgb(img) => push_rows(&mut text, img.as_raw(), row_len),
        DecodedImage::Gray(img) => push_rows(&mut text, img.as_raw(), row_len),
        DecodedImage::Gray16(img) => push_rows(&mut text, img.as_raw(), row_len),
    }

    text.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray16_frame() -> CameraFrame {
        CameraFrame::from_bytes(PixelFormat::Gray16, 2, 1, vec![0x00, 0x01, 0xff, 0xff], 0)
    }

    #[test]
    fn test_format_extensions() {
        assert_eq!(ExportTarget::Jpeg.extension(), "jpg");
        assert_eq!(ExportTarget::Png.extension(), "png");
        assert_eq!(ExportTarget::Tiff.extension(), "tiff");
        assert_eq!(ExportTarget::Pgm.extension(), "pgm");
        assert_eq!(ExportTarget::Csv.extension(), "csv");
        assert_eq!(ExportTarget::parse("JPEG"), Some(ExportTarget::Jpeg));
        assert_eq!(ExportTarget::parse("bmp"), None);
    }

    #[test]
    fn test_supported_targets() {
        assert_eq!(supported_targets(PixelFormat::Yuyv, false), ExportTarget::ALL.to_vec());
        assert!(!supported_targets(PixelFormat::Gray16, false).contains(&ExportTarget::Jpeg));
        assert!(supported_targets(PixelFormat::Gray16, true).contains(&ExportTarget::Jpeg));
        assert!(supported_targets(PixelFormat::Other(*b"Y10B"), true).is_empty());
    }

    #[test]
    fn test_gray16_jpeg_needs_lossy() {
        let encoder = PhotoEncoder::default();
        let frame = gray16_frame();
        assert!(matches!(
            encoder.encode(&frame, ExportTarget::Jpeg, false),
            Err(CameraError::UnsupportedConversion { .. })
        ));
        let jpeg = encoder.encode(&frame, ExportTarget::Jpeg, true).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
    }

    #[test]
    fn test_csv_layout() {
        let frame = CameraFrame::from_bytes(PixelFormat::Rgb24, 2, 2, (1..=12).collect(), 0);
        let csv = PhotoEncoder::default().encode(&frame, ExportTarget::Csv, false).unwrap();
        assert_eq!(String::from_utf8(csv).unwrap(), "1,2,3,4,5,6\n7,8,9,10,11,12\n");

        let csv = PhotoEncoder::default()
            .encode(&gray16_frame(), ExportTarget::Csv, false)
            .unwrap();
        assert_eq!(String::from_utf8(csv).unwrap(), "256,65535\n");
    }

    #[test]
    fn test_pgm_from_color_uses_luma() {
        let frame = CameraFrame::from_bytes(PixelFormat::Rgb24, 1, 1, vec![255, 0, 0], 0);
        let pgm = PhotoEncoder::default().encode(&frame, ExportTarget::Pgm, false).unwrap();
        assert!(pgm.starts_with(b"P5"));
        assert_eq!(*pgm.last().unwrap(), 76);
    }

    #[test]
    fn test_lossless_round_trip_png() {
        let frame = CameraFrame::from_bytes(PixelFormat::Gray8, 2, 2, vec![0, 64, 128, 255], 0);
        let png = PhotoEncoder::default().encode(&frame, ExportTarget::Png, false).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(decoded.as_raw(), &vec![0, 64, 128, 255]);
    }
}
