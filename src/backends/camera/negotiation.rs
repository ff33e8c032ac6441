// SPDX-License-Identifier: GPL-3.0-only

//! Format negotiation
//!
//! Picks the advertised mode closest to what the caller asked for:
//!
//! 1. Only candidates whose width and height each lie within a factor of
//!    [`RESOLUTION_TOLERANCE`] of the request are acceptable.
//! 2. Candidates with the requested fourcc win over all others. Other
//!    fourccs are only considered when none of the requested one qualifies.
//! 3. Among acceptable candidates: smallest pixel-area distance, then
//!    smallest frame-rate distance, then device enumeration order.

use super::types::{CameraFormat, FormatRequest};
use crate::constants::RESOLUTION_TOLERANCE;
use crate::errors::{CameraError, CameraResult};
use tracing::{debug, warn};

/// Whether `candidate` is within the resolution tolerance of `request`
pub fn within_tolerance(candidate: &CameraFormat, request: &FormatRequest) -> bool {
    let fits = |have: u32, want: u32| {
        let (have, want) = (have as u64, want as u64);
        have * RESOLUTION_TOLERANCE as u64 >= want && have <= want * RESOLUTION_TOLERANCE as u64
    };
    fits(candidate.width, request.width) && fits(candidate.height, request.height)
}

fn rank(candidate: &CameraFormat, request: &FormatRequest) -> (u64, u64) {
    let wanted_area = request.width as u64 * request.height as u64;
    (
        candidate.pixel_count().abs_diff(wanted_area),
        candidate.framerate.distance_millis(&request.framerate),
    )
}

fn best<'a>(
    candidates: impl Iterator<Item = &'a CameraFormat>,
    request: &FormatRequest,
) -> Option<&'a CameraFormat> {
    // min_by_key keeps the first of equal keys, which preserves enumeration order
    candidates
        .filter(|c| within_tolerance(c, request))
        .min_by_key(|c| rank(c, request))
}

/// Choose the advertised format closest to `request`
///
/// # Returns
/// * `Ok(format)` - One of `supported`, unchanged
/// * `Err(CameraError::UnsupportedFormat)` - Nothing within tolerance
pub fn negotiate(supported: &[CameraFormat], request: &FormatRequest) -> CameraResult<CameraFormat> {
    if supported.is_empty() {
        return Err(CameraError::UnsupportedFormat(
            "device advertises no capture formats".to_string(),
        ));
    }

    let same_fourcc = supported
        .iter()
        .filter(|c| c.pixel_format == request.pixel_format);
    if let Some(chosen) = best(same_fourcc, request) {
        debug!(requested = %request, chosen = %chosen, "Negotiated format");
        return Ok(*chosen);
    }

    if let Some(chosen) = best(supported.iter(), request) {
        warn!(
            requested = %request,
            chosen = %chosen,
            "Requested pixel format unavailable near this size, falling back"
        );
        return Ok(*chosen);
    }

    Err(CameraError::UnsupportedFormat(format!(
        "no advertised format within {}x of {}",
        RESOLUTION_TOLERANCE, request
    )))
}
