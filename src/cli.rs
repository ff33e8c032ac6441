// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - Listing cameras and their formats
//! - Inspecting and setting controls
//! - Saving single frames and bursts
//! - Streaming with a throughput report

use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use usbcam::backends::camera::{
    CaptureLoop, ControlDescriptor, ControlKind, ControlRegistry, DeviceHandle, DeviceProvider,
    LoopState, SimulatedCamera, SimulatedProvider, V4l2Provider,
};
use usbcam::constants::export::BURST_FRAME_TIMEOUT;
use usbcam::pipelines::photo::{ExportRequest, ExportTarget, FrameExporter, PhotoCapture};
use usbcam::{CameraError, CameraResult, Config, NamingRule};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Global flags shared by every command
pub struct Options {
    pub device: Option<String>,
    pub simulate: bool,
    pub config: Option<PathBuf>,
}

/// Export flags shared by `snap` and `burst`
#[derive(Args, Debug, Default)]
pub struct ExportArgs {
    /// Output format: jpeg, png, tiff, pgm or csv (default: from config)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Output directory (default: from config)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Allow conversions that lose precision (16-bit gray to JPEG)
    #[arg(long)]
    pub lossy: bool,

    /// Write a `_params.csv` control snapshot next to each image
    #[arg(long)]
    pub params: bool,
}

struct Session {
    config: Config,
    provider: Arc<dyn DeviceProvider>,
    device: String,
}

impl Session {
    fn new(options: &Options) -> CameraResult<Self> {
        let config = match &options.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        let device = options
            .device
            .clone()
            .unwrap_or_else(|| config.device_path.clone());

        let provider: Arc<dyn DeviceProvider> = if options.simulate {
            Arc::new(SimulatedProvider::new().with_camera(&device, SimulatedCamera::uvc_webcam()))
        } else {
            Arc::new(V4l2Provider::new())
        };

        Ok(Self {
            config,
            provider,
            device,
        })
    }

    fn open(&self) -> CameraResult<DeviceHandle> {
        let request = self.config.format_request()?;
        DeviceHandle::open(Arc::clone(&self.provider), &self.device, &request)
    }

    fn export_request(
        &self,
        args: &ExportArgs,
        registry: &ControlRegistry,
        burst_count: Option<u32>,
    ) -> CameraResult<ExportRequest> {
        let target = match &args.format {
            Some(name) => ExportTarget::parse(name)
                .ok_or_else(|| CameraError::Config(format!("unknown export format '{}'", name)))?,
            None => self.config.export_format,
        };
        let dir = args
            .output
            .clone()
            .unwrap_or_else(|| self.config.output_dir.clone());

        let mut request = match burst_count {
            Some(count) => ExportRequest::burst(target, dir, count),
            None => ExportRequest::single(target, dir),
        }
        .allow_lossy(args.lossy);

        if args.params || self.config.write_parameters {
            request = request.with_parameters(registry.snapshot());
        }
        Ok(request)
    }
}

/// List all available cameras
pub fn list_cameras(options: &Options) -> CliResult {
    let session = Session::new(options)?;
    let devices = session.provider.list_devices();

    if devices.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for device in devices {
        println!("  {}  {} ({})", device.path, device.card, device.driver);
        if device.real_path != device.path {
            println!("      -> {}", device.real_path);
        }
    }
    Ok(())
}

/// Print the device's format table, marking the negotiated one
pub fn show_formats(options: &Options) -> CliResult {
    let session = Session::new(options)?;
    let handle = session.open()?;
    let negotiated = handle.negotiated();

    println!("Formats of {}:", handle.path());
    for format in handle.supported_formats() {
        let marker = if format.same_mode(&negotiated) { "*" } else { " " };
        println!(" {} {}", marker, format);
    }
    Ok(())
}

fn describe_value(descriptor: &ControlDescriptor) -> String {
    match (&descriptor.kind, descriptor.menu_label()) {
        (ControlKind::Menu { .. }, Some(label)) => format!("{} ({})", descriptor.value, label),
        (ControlKind::Boolean, _) => (descriptor.value != 0).to_string(),
        _ => descriptor.value.to_string(),
    }
}

fn flags(descriptor: &ControlDescriptor) -> String {
    let mut flags = Vec::new();
    if descriptor.read_only {
        flags.push("read-only");
    }
    if descriptor.inactive {
        flags.push("inactive");
    }
    if descriptor.locked {
        flags.push("locked");
    }
    flags.join(",")
}

/// Print all controls as a table or JSON
pub fn show_controls(options: &Options, json: bool) -> CliResult {
    let session = Session::new(options)?;
    let handle = session.open()?;
    let registry = ControlRegistry::for_handle(&handle)?;
    let descriptors = registry.descriptors();

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }

    println!(
        "{:<32} {:<8} {:>7} {:>7} {:>5} {:>7}  {:<28} FLAGS",
        "CONTROL", "TYPE", "MIN", "MAX", "STEP", "DEFAULT", "VALUE"
    );
    for d in &descriptors {
        let kind = match d.kind {
            ControlKind::Boolean => "bool",
            ControlKind::Integer => "int",
            ControlKind::Menu { .. } => "menu",
        };
        println!(
            "{:<32} {:<8} {:>7} {:>7} {:>5} {:>7}  {:<28} {}",
            d.identifier,
            kind,
            d.minimum,
            d.maximum,
            d.step,
            d.default,
            describe_value(d),
            flags(d)
        );
    }
    Ok(())
}

/// Parse a value for `descriptor`: a number, a boolean word or a menu label
fn parse_value(descriptor: &ControlDescriptor, text: &str) -> Option<i32> {
    let text = text.trim();
    if let Ok(value) = text.parse::<i32>() {
        return Some(value);
    }
    match &descriptor.kind {
        ControlKind::Boolean => match text.to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" => Some(1),
            "false" | "off" | "no" => Some(0),
            _ => None,
        },
        ControlKind::Menu { items } => items
            .iter()
            .find(|item| item.name.eq_ignore_ascii_case(text))
            .map(|item| item.index),
        ControlKind::Integer => None,
    }
}

/// Apply NAME=VALUE assignments in order, stopping at the first failure
pub fn set_controls(options: &Options, assignments: &[String]) -> CliResult {
    let session = Session::new(options)?;
    let handle = session.open()?;
    let registry = ControlRegistry::for_handle(&handle)?;

    for assignment in assignments {
        let (name, text) = assignment
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", assignment))?;
        let descriptor = registry.find(name.trim())?;
        let value = parse_value(&descriptor, text).ok_or_else(|| CameraError::InvalidControlValue {
            control: descriptor.identifier.clone(),
            value: 0,
            reason: format!("'{}' is not a valid value", text.trim()),
        })?;

        let applied = registry.set(descriptor.id, value)?;
        println!("{} = {}", descriptor.identifier, applied);
    }
    Ok(())
}

/// Reset every writable control to its default
pub fn reset_controls(options: &Options) -> CliResult {
    let session = Session::new(options)?;
    let handle = session.open()?;
    let registry = ControlRegistry::for_handle(&handle)?;

    let failures = registry.reset_to_defaults();
    for (identifier, error) in &failures {
        eprintln!("  {}: {}", identifier, error);
    }
    println!(
        "Reset {} controls ({} failed)",
        registry.len() - failures.len(),
        failures.len()
    );
    Ok(())
}

fn install_interrupt() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let flag = Arc::new(AtomicBool::new(false));
    let flag_clone = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        flag_clone.store(true, Ordering::SeqCst);
    })?;
    Ok(flag)
}

/// Save a single frame
pub fn snap(options: &Options, file: Option<&Path>, args: &ExportArgs) -> CliResult {
    let session = Session::new(options)?;
    if file.is_none() && session.config.naming_rule == NamingRule::Manual {
        return Err(CameraError::Config("manual naming needs --file".to_string()).into());
    }
    let handle = session.open()?;
    let registry = ControlRegistry::for_handle(&handle)?;
    let request = session.export_request(args, &registry, None)?;
    let exporter = FrameExporter::from_config(&session.config);

    let mut capture = CaptureLoop::new("snap");
    let sink = capture.subscribe("snap");
    capture.start(handle)?;

    let result = PhotoCapture::from_sink(&sink, BURST_FRAME_TIMEOUT)
        .and_then(|frame| match file {
            Some(path) => exporter.export_to(&frame, path, &request),
            None => exporter.export_one(&frame, &request),
        });
    capture.stop()?;

    let path = result?;
    println!("Photo saved: {}", path.display());
    Ok(())
}

/// Save a burst of consecutive frames
pub fn burst(options: &Options, count: Option<u32>, args: &ExportArgs) -> CliResult {
    let session = Session::new(options)?;
    let handle = session.open()?;
    let registry = ControlRegistry::for_handle(&handle)?;
    let count = count.unwrap_or(session.config.burst_count);
    let request = session.export_request(args, &registry, Some(count))?;
    let exporter = FrameExporter::from_config(&session.config);
    let cancel = install_interrupt()?;

    let mut capture = CaptureLoop::new("burst");
    let mut sink = capture.subscribe("burst");
    capture.start(handle)?;

    println!("Capturing {} frames... (press Ctrl+C to stop early)", count);
    let report = exporter.export_burst_with_cancel(&mut sink, &request, &cancel);
    capture.stop()?;

    for path in &report.written {
        println!("  {}", path.display());
    }
    println!("Saved {} of {} frames", report.written.len(), report.requested);
    if report.cancelled {
        println!("Burst stopped early");
    }
    match report.failure {
        Some((index, error)) => Err(format!("frame {} failed: {}", index + 1, error).into()),
        None => Ok(()),
    }
}

/// Stream for `seconds`, printing throughput once a second
pub fn stream(options: &Options, seconds: u64) -> CliResult {
    let session = Session::new(options)?;
    let handle = session.open()?;
    println!("Streaming {} from {}", handle.negotiated(), handle.path());

    let stop = install_interrupt()?;
    let delivered = Arc::new(AtomicU64::new(0));
    let delivered_clone = Arc::clone(&delivered);

    let mut capture = CaptureLoop::new("stream");
    capture.add_callback_sink("meter", move |_frame| {
        delivered_clone.fetch_add(1, Ordering::Relaxed);
    });
    capture.start(handle)?;

    println!("Press Ctrl+C to stop");
    let start = Instant::now();
    let target = Duration::from_secs(seconds);
    let mut last_frames = 0;

    while start.elapsed() < target && !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_secs(1));
        if capture.state() == LoopState::Idle {
            break;
        }
        let stats = capture.stats();
        print!(
            "\r{:>4}s  {:>4} fps  {} frames",
            start.elapsed().as_secs(),
            stats.frames - last_frames,
            stats.frames
        );
        std::io::Write::flush(&mut std::io::stdout())?;
        last_frames = stats.frames;
    }
    println!();

    let stats = capture.stats();
    let error = capture.last_error();
    let _handle = capture.stop()?;

    let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
    println!(
        "Captured {} frames in {:.1}s ({:.1} fps), delivered {}, resets {}",
        stats.frames,
        elapsed,
        stats.frames as f64 / elapsed,
        delivered.load(Ordering::Relaxed),
        stats.resets
    );
    for (sink, dropped) in &stats.sink_drops {
        println!("  sink {}: {} dropped", sink, dropped);
    }

    match error {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}
