// SPDX-License-Identifier: GPL-3.0-only

//! Processing pipelines fed by the capture loop
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Camera Frame │ ──▶ │  Photo Pipeline   │ ──▶ │  Image File  │
//! │ (YUYV, MJPG, │     │  - Decode → RGB   │     │  JPEG / PNG  │
//! │  Y16, ...)   │     │  - Encode         │     │  TIFF / PGM  │
//! │              │     │  - Atomic write   │     │  CSV         │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```
//!
//! Export runs on the caller's thread (or tokio's blocking pool through
//! [`photo::FrameExporter::export_one_async`]), never on the capture thread.

pub mod photo;
