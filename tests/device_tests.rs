// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for device handles against the simulated camera

use std::sync::Arc;
use usbcam::backends::camera::{
    CameraFormat, DeviceHandle, FormatRequest, Framerate, PixelFormat, SimulatedCamera,
    SimulatedProvider,
};
use usbcam::CameraError;

fn provider(path: &str) -> (Arc<SimulatedProvider>, SimulatedCamera) {
    let camera = SimulatedCamera::uvc_webcam();
    let provider = SimulatedProvider::new().with_camera(path, camera.clone());
    (Arc::new(provider), camera)
}

#[test]
fn test_negotiated_format_is_advertised() {
    let (provider, _camera) = provider("sim://dev-advertised");
    let requests = [
        FormatRequest::new(PixelFormat::Yuyv, 640, 480, 30),
        FormatRequest::new(PixelFormat::Yuyv, 1280, 720, 30),
        FormatRequest::new(PixelFormat::Mjpeg, 1600, 900, 25),
        FormatRequest::new(PixelFormat::Nv12, 1920, 1080, 30),
    ];

    for request in requests {
        let handle = DeviceHandle::open(provider.clone(), "sim://dev-advertised", &request).unwrap();
        let negotiated = handle.negotiated();
        assert!(
            handle.supported_formats().iter().any(|f| f.same_mode(&negotiated)),
            "{} is not advertised",
            negotiated
        );
    }
}

#[test]
fn test_fourcc_fallback_picks_nearest_mode() {
    let (provider, _camera) = provider("sim://dev-fallback");
    let request = FormatRequest::new(PixelFormat::Nv12, 1920, 1080, 30);
    let handle = DeviceHandle::open(provider, "sim://dev-fallback", &request).unwrap();

    let negotiated = handle.negotiated();
    assert_eq!(negotiated.pixel_format, PixelFormat::Mjpeg);
    assert_eq!((negotiated.width, negotiated.height), (1920, 1080));
}

#[test]
fn test_request_far_from_any_mode_is_unsupported() {
    let (provider, _camera) = provider("sim://dev-far");
    let request = FormatRequest::new(PixelFormat::Yuyv, 64, 48, 30);
    let result = DeviceHandle::open(provider, "sim://dev-far", &request);
    assert!(matches!(result, Err(CameraError::UnsupportedFormat(_))));
}

#[test]
fn test_unknown_device_is_unavailable() {
    let provider = Arc::new(SimulatedProvider::new());
    let request = FormatRequest::new(PixelFormat::Yuyv, 640, 480, 30);
    let err = DeviceHandle::open(provider, "sim://nothing-here", &request).unwrap_err();
    assert!(err.is_device_loss());
}

#[test]
fn test_one_handle_per_path() {
    let (provider, _camera) = provider("sim://dev-exclusive");
    let request = FormatRequest::new(PixelFormat::Yuyv, 640, 480, 30);
    let mut first = DeviceHandle::open(provider.clone(), "sim://dev-exclusive", &request).unwrap();

    assert!(matches!(
        DeviceHandle::open(provider.clone(), "sim://dev-exclusive", &request),
        Err(CameraError::DeviceBusy(_))
    ));

    first.close();
    let second = DeviceHandle::open(provider, "sim://dev-exclusive", &request).unwrap();
    assert!(second.is_open());
}

#[test]
fn test_driver_coercion_to_unadvertised_mode_is_rejected() {
    let (provider, camera) = provider("sim://dev-coerce");
    camera.coerce_format(CameraFormat::new(PixelFormat::Yuyv, 320, 240, Framerate::from_int(30)));

    let request = FormatRequest::new(PixelFormat::Yuyv, 640, 480, 30);
    let result = DeviceHandle::open(provider, "sim://dev-coerce", &request);
    assert!(matches!(result, Err(CameraError::UnsupportedFormat(_))));
}

#[test]
fn test_renegotiate() {
    let (provider, _camera) = provider("sim://dev-renegotiate");
    let mut handle = DeviceHandle::open(
        provider,
        "sim://dev-renegotiate",
        &FormatRequest::new(PixelFormat::Yuyv, 640, 480, 30),
    )
    .unwrap();

    let format = handle
        .renegotiate(&FormatRequest::new(PixelFormat::Mjpeg, 1280, 720, 30))
        .unwrap();
    assert_eq!(format.pixel_format, PixelFormat::Mjpeg);
    assert_eq!(handle.negotiated(), format);
}

#[test]
fn test_reset_reopens_device() {
    let (provider, camera) = provider("sim://dev-reset");
    let mut handle = DeviceHandle::open(
        provider,
        "sim://dev-reset",
        &FormatRequest::new(PixelFormat::Yuyv, 640, 480, 15),
    )
    .unwrap();
    let before = handle.negotiated();
    let opens = camera.open_count();

    handle.reset().unwrap();
    assert_eq!(camera.open_count(), opens + 1);
    assert!(handle.negotiated().same_mode(&before));
}
