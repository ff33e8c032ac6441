// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for single and burst export

use chrono::{Local, TimeZone};
use std::sync::Arc;
use std::time::Duration;
use usbcam::backends::camera::{
    CameraFrame, CaptureLoop, DeviceHandle, FormatRequest, PixelFormat, SimulatedCamera,
    SimulatedProvider,
};
use usbcam::pipelines::photo::{ExportRequest, ExportTarget, FrameExporter, PhotoCapture};
use usbcam::{CameraError, NamingRule};

fn gray(sequence: u64) -> Arc<CameraFrame> {
    let stamp = Local.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap();
    Arc::new(
        CameraFrame::from_bytes(PixelFormat::Gray8, 4, 2, (0..8).collect(), sequence)
            .with_timestamp(stamp),
    )
}

fn unknown(sequence: u64) -> Arc<CameraFrame> {
    Arc::new(CameraFrame::from_bytes(
        PixelFormat::Other(*b"XXXX"),
        4,
        2,
        vec![0; 8],
        sequence,
    ))
}

fn file_names(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_burst_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = FrameExporter::new("IMG_", NamingRule::Timestamp);
    let frames = vec![gray(0), gray(1), unknown(2), gray(3), gray(4)];
    let request = ExportRequest::burst(ExportTarget::Png, dir.path(), 5);

    let report = exporter.export_burst(&mut frames.into_iter(), &request);

    assert_eq!(report.written.len(), 2);
    assert!(!report.is_complete());
    let (index, error) = report.failure.unwrap();
    assert_eq!(index, 2);
    assert!(matches!(error, CameraError::UnsupportedConversion { .. }));
    assert_eq!(
        file_names(dir.path()),
        vec!["IMG_240315_103000.png", "IMG_240315_103000_000001.png"]
    );
}

#[test]
fn test_burst_names_unique_within_one_second() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = FrameExporter::new("IMG_", NamingRule::Timestamp);
    let frames: Vec<_> = (0..10).map(gray).collect();
    let request = ExportRequest::burst(ExportTarget::Pgm, dir.path(), 10);

    let report = exporter.export_burst(&mut frames.into_iter(), &request);
    assert!(report.is_complete());
    assert_eq!(file_names(dir.path()).len(), 10);
    for pair in report.written.windows(2) {
        assert!(pair[0] < pair[1]);
    }
}

#[test]
fn test_burst_across_second_boundary_shares_first_stamp() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = FrameExporter::new("IMG_", NamingRule::Timestamp);
    let frames: Vec<_> = (0..4)
        .map(|i| {
            let stamp = Local.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap()
                + chrono::TimeDelta::milliseconds(400 * i as i64);
            Arc::new(
                CameraFrame::from_bytes(PixelFormat::Gray8, 4, 2, vec![1; 8], i)
                    .with_timestamp(stamp),
            )
        })
        .collect();
    let request = ExportRequest::burst(ExportTarget::Pgm, dir.path(), 4);

    let report = exporter.export_burst(&mut frames.into_iter(), &request);
    assert!(report.is_complete());
    assert_eq!(
        file_names(dir.path()),
        vec![
            "IMG_240315_103000.pgm",
            "IMG_240315_103000_000001.pgm",
            "IMG_240315_103000_000002.pgm",
            "IMG_240315_103000_000003.pgm",
        ]
    );
}

#[test]
fn test_single_export_uses_frame_time() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = FrameExporter::new("IMG_", NamingRule::Timestamp);
    let later = Arc::new(
        CameraFrame::from_bytes(PixelFormat::Gray8, 4, 2, vec![1; 8], 1)
            .with_timestamp(Local.with_ymd_and_hms(2024, 3, 15, 10, 30, 1).unwrap()),
    );
    let request = ExportRequest::single(ExportTarget::Pgm, dir.path());

    exporter.export_one(&gray(0), &request).unwrap();
    let second = exporter.export_one(&later, &request).unwrap();
    assert!(second.ends_with("IMG_240315_103001.pgm"));
}

#[test]
fn test_manual_rule_writes_named_file() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = FrameExporter::new("IMG_", NamingRule::Manual);
    let request = ExportRequest::single(ExportTarget::Png, dir.path())
        .with_parameters(vec![("gain".to_string(), 7)]);

    assert!(matches!(
        exporter.export_one(&gray(0), &request),
        Err(CameraError::InvalidState(_))
    ));

    let path = exporter
        .export_to(&gray(0), &dir.path().join("sub").join("dark.tiff"), &request)
        .unwrap();
    assert_eq!(path, dir.path().join("sub").join("dark.tiff"));
    assert!(path.exists());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("sub").join("dark_params.csv")).unwrap(),
        "gain,7\n"
    );

    let appended = exporter
        .export_to(&gray(1), &dir.path().join("flat"), &request)
        .unwrap();
    assert_eq!(appended, dir.path().join("flat.png"));

    std::fs::write(dir.path().join("flat.png"), b"old").unwrap();
    exporter
        .export_to(&gray(2), &dir.path().join("flat.png"), &request)
        .unwrap();
    assert_ne!(std::fs::read(dir.path().join("flat.png")).unwrap(), b"old");
}

#[test]
fn test_export_skips_existing_names() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("IMG_240315_103000.png"), b"keep").unwrap();
    let exporter = FrameExporter::new("IMG_", NamingRule::Timestamp);

    let path = exporter
        .export_one(&gray(0), &ExportRequest::single(ExportTarget::Png, dir.path()))
        .unwrap();
    assert!(path.ends_with("IMG_240315_103000_000001.png"));
    assert_eq!(
        std::fs::read(dir.path().join("IMG_240315_103000.png")).unwrap(),
        b"keep"
    );
}

#[test]
fn test_parameter_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = FrameExporter::new("IMG_", NamingRule::Sequential);
    let request = ExportRequest::single(ExportTarget::Csv, dir.path()).with_parameters(vec![
        ("brightness".to_string(), -3),
        ("contrast".to_string(), 55),
    ]);

    let path = exporter.export_one(&gray(0), &request).unwrap();
    assert!(path.ends_with("IMG_00000.csv"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "0,1,2,3\n4,5,6,7\n");

    let sidecar = dir.path().join("IMG_00000_params.csv");
    assert_eq!(
        std::fs::read_to_string(sidecar).unwrap(),
        "brightness,-3\ncontrast,55\n"
    );

    let next = exporter.export_one(&gray(1), &request).unwrap();
    assert!(next.ends_with("IMG_00001.csv"));
}

#[test]
fn test_unsupported_conversion_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = FrameExporter::new("IMG_", NamingRule::Timestamp);
    let frame = CameraFrame::from_bytes(PixelFormat::Gray16, 2, 1, vec![0, 1, 255, 255], 0);

    let err = exporter
        .export_one(&frame, &ExportRequest::single(ExportTarget::Jpeg, dir.path()))
        .unwrap_err();
    assert!(matches!(err, CameraError::UnsupportedConversion { .. }));
    assert!(file_names(dir.path()).is_empty());

    let path = exporter
        .export_one(
            &frame,
            &ExportRequest::single(ExportTarget::Jpeg, dir.path()).allow_lossy(true),
        )
        .unwrap();
    assert!(path.exists());
}

#[test]
fn test_supported_targets() {
    assert_eq!(
        FrameExporter::supported_targets(PixelFormat::Yuyv, false),
        ExportTarget::ALL.to_vec()
    );
    assert!(!FrameExporter::supported_targets(PixelFormat::Gray16, false).contains(&ExportTarget::Jpeg));
    assert!(FrameExporter::supported_targets(PixelFormat::Gray16, true).contains(&ExportTarget::Jpeg));
    assert!(FrameExporter::supported_targets(PixelFormat::Other(*b"XXXX"), true).is_empty());
}

#[tokio::test]
async fn test_export_one_async() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = Arc::new(FrameExporter::new("async_", NamingRule::Sequential));

    let first = Arc::clone(&exporter)
        .export_one_async(gray(0), ExportRequest::single(ExportTarget::Tiff, dir.path()))
        .await
        .unwrap();
    let second = Arc::clone(&exporter)
        .export_one_async(gray(1), ExportRequest::single(ExportTarget::Tiff, dir.path()))
        .await
        .unwrap();

    assert!(first.ends_with("async_00000.tiff"));
    assert!(second.ends_with("async_00001.tiff"));
    let decoded = image::open(&second).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (4, 2));
}

#[test]
fn test_burst_from_running_loop() {
    let path = "sim://export-burst";
    let camera = SimulatedCamera::uvc_webcam().with_frame_interval(Duration::from_millis(2));
    let provider = SimulatedProvider::new().with_camera(path, camera);
    let handle = DeviceHandle::open(
        Arc::new(provider),
        path,
        &FormatRequest::new(PixelFormat::Yuyv, 640, 480, 30),
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let exporter = FrameExporter::new("IMG_", NamingRule::Timestamp);
    let mut capture = CaptureLoop::new("export-burst");
    let mut sink = capture.subscribe("burst");
    capture.start(handle).unwrap();

    let still = PhotoCapture::from_sink(&sink, Duration::from_secs(2)).unwrap();
    let single = exporter
        .export_one(&still, &ExportRequest::single(ExportTarget::Jpeg, dir.path()))
        .unwrap();
    let report = exporter.export_burst(
        &mut sink,
        &ExportRequest::burst(ExportTarget::Png, dir.path(), 3),
    );
    capture.stop().unwrap();

    assert!(report.is_complete(), "{:?}", report.failure);
    assert_eq!(file_names(dir.path()).len(), 4);
    let decoded = image::open(&single).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (640, 480));
}
