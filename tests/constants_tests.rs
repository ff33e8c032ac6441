// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use usbcam::constants::{COMMON_RESOLUTIONS, JpegQuality, NamingRule};

#[test]
fn test_jpeg_quality_values() {
    assert_eq!(JpegQuality::ALL.len(), 4);
    assert_eq!(JpegQuality::Low.value(), 60);
    assert_eq!(JpegQuality::Maximum.value(), 98);
}

#[test]
fn test_jpeg_quality_ordering() {
    // Presets are ordered from lowest to highest quality
    let mut prev = 0u8;
    for preset in JpegQuality::ALL {
        assert!(
            preset.value() > prev,
            "Presets should be ordered from lowest to highest"
        );
        prev = preset.value();
    }
}

#[test]
fn test_display_names() {
    for preset in JpegQuality::ALL {
        assert!(!preset.display_name().is_empty());
    }
    for rule in NamingRule::ALL {
        assert!(!rule.display_name().is_empty());
    }
}

#[test]
fn test_common_resolutions_sorted_by_area() {
    let areas: Vec<u32> = COMMON_RESOLUTIONS.iter().map(|(w, h)| w * h).collect();
    assert!(areas.windows(2).all(|pair| pair[0] > pair[1]));
}
