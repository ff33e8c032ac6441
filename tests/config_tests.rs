// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use usbcam::pipelines::photo::ExportTarget;
use usbcam::{CameraError, Config, JpegQuality, NamingRule};

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.device_path, "/dev/video0");
    assert_eq!(config.filename_prefix, "IMG_");
    assert_eq!(config.burst_count, 5);
    assert!(
        config.output_dir.ends_with("usbcam"),
        "Default output should be an app directory"
    );
    assert!(!config.write_parameters);
}

#[test]
fn test_config_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let mut config = Config::default();
    config.device_path = "/dev/video2".to_string();
    config.format.width = 1280;
    config.format.height = 720;
    config.format.pixel_format = "MJPG".to_string();
    config.naming_rule = NamingRule::Sequential;
    config.export_format = ExportTarget::Tiff;
    config.jpeg_quality = JpegQuality::Maximum;
    config.write_parameters = true;

    config.save_to(&path).unwrap();
    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = Config::load_from(&dir.path().join("absent.json")).unwrap();
    assert_eq!(loaded, Config::default());
}

#[test]
fn test_malformed_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = Config::load_from(&path).unwrap_err();
    assert!(matches!(err, CameraError::Config(_)));
}
