// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for output file naming

use chrono::{NaiveDate, NaiveDateTime};
use usbcam::storage::{next_name, sidecar_path};
use usbcam::{CameraError, NamingRule, NamingScheme};

fn at(h: u32, m: u32, s: u32, milli: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 15)
        .unwrap()
        .and_hms_milli_opt(h, m, s, milli)
        .unwrap()
}

#[test]
fn test_names_within_one_second_are_unique_and_ordered() {
    let mut scheme = NamingScheme::new("IMG_", NamingRule::Timestamp);
    let names: Vec<String> = (0..50)
        .map(|i| scheme.next(at(10, 30, 0, i * 10), "png").unwrap())
        .collect();

    assert_eq!(names[0], "IMG_240315_103000.png");
    assert_eq!(names[1], "IMG_240315_103000_000001.png");
    assert_eq!(names[49], "IMG_240315_103000_000049.png");
    for pair in names.windows(2) {
        assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
    }
}

#[test]
fn test_clock_going_backwards_keeps_order() {
    let mut scheme = NamingScheme::new("IMG_", NamingRule::Timestamp);
    let first = scheme.next(at(10, 30, 5, 0), "jpg").unwrap();
    let second = scheme.next(at(10, 30, 2, 0), "jpg").unwrap();
    assert_eq!(first, "IMG_240315_103005.jpg");
    assert_eq!(second, "IMG_240315_103005_000001.jpg");

    let third = scheme.next(at(10, 30, 6, 0), "jpg").unwrap();
    assert_eq!(third, "IMG_240315_103006.jpg");
}

#[test]
fn test_resume_after_existing_files() {
    let dir = tempfile::tempdir().unwrap();
    for name in [
        "IMG_240315_103000.png",
        "IMG_240315_103000_000004.png",
        "IMG_240315_103000_000004_params.csv",
        "IMG_240314_235959_000099.png",
        "notes.txt",
    ] {
        std::fs::write(dir.path().join(name), b"x").unwrap();
    }

    let mut scheme = NamingScheme::new("IMG_", NamingRule::Timestamp);
    scheme
        .resume_from_dir(dir.path(), NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        .unwrap();

    assert_eq!(
        scheme.next(at(10, 30, 0, 500), "png").unwrap(),
        "IMG_240315_103000_000005.png"
    );
}

#[test]
fn test_sequential_resume() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["scan_00000.tiff", "scan_00007.tiff", "scan_00003.tiff"] {
        std::fs::write(dir.path().join(name), b"x").unwrap();
    }

    let mut scheme = NamingScheme::new("scan_", NamingRule::Sequential);
    scheme
        .resume_from_dir(dir.path(), NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        .unwrap();
    assert_eq!(scheme.next(at(0, 0, 0, 0), "tiff").unwrap(), "scan_00008.tiff");
    assert_eq!(scheme.next(at(0, 0, 0, 0), "tiff").unwrap(), "scan_00009.tiff");
}

#[test]
fn test_resume_past_largest_index_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("4294967295.png"), b"x").unwrap();

    let mut scheme = NamingScheme::new("", NamingRule::Sequential);
    scheme
        .resume_from_dir(dir.path(), NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        .unwrap();
    assert!(matches!(
        scheme.next(at(0, 0, 0, 0), "png"),
        Err(CameraError::InvalidState(_))
    ));
}

#[test]
fn test_resume_at_full_counter_rolls_to_next_second() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("IMG_240315_103000_999999.png"), b"x").unwrap();

    let mut scheme = NamingScheme::new("IMG_", NamingRule::Timestamp);
    scheme
        .resume_from_dir(dir.path(), NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        .unwrap();
    let name = scheme.next(at(10, 30, 0, 0), "png").unwrap();
    assert_eq!(name, "IMG_240315_103001.png");
    assert!(name.as_str() > "IMG_240315_103000_999999.png");
}

#[test]
fn test_resume_from_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut scheme = NamingScheme::new("scan_", NamingRule::Sequential);
    scheme
        .resume_from_dir(&dir.path().join("absent"), NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        .unwrap();
    assert_eq!(scheme.next(at(0, 0, 0, 0), "pgm").unwrap(), "scan_00000.pgm");
}

#[test]
fn test_sidecar_name() {
    let image = std::path::Path::new("/data/IMG_240315_103000_000002.png");
    assert_eq!(
        sidecar_path(image),
        std::path::Path::new("/data/IMG_240315_103000_000002_params.csv")
    );
    assert_eq!(
        next_name("", &at(23, 59, 59, 0), 12, "csv"),
        "240315_235959_000012.csv"
    );
}
