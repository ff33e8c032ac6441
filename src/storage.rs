// SPDX-License-Identifier: GPL-3.0-only

//! Output file naming
//!
//! Timestamp names look like `IMG_251019_142301.jpg`; further saves in the
//! same second append a counter (`IMG_251019_142301_000001.jpg`). Because
//! `_` sorts after `.`, names issued by one [`NamingScheme`] sort in the
//! order they were issued.

use crate::constants::NamingRule;
use crate::constants::naming::{
    COUNTER_WIDTH, DATE_FORMAT, MAX_COUNTER, MAX_SEQUENCE, PARAMS_SUFFIX, SEQUENCE_WIDTH,
    TIME_FORMAT,
};
use crate::errors::{CameraError, CameraResult};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Build a timestamp file name
///
/// `{prefix}{yymmdd}_{hhmmss}.{ext}` for counter 0, otherwise
/// `{prefix}{yymmdd}_{hhmmss}_{counter:06}.{ext}`.
pub fn next_name(prefix: &str, timestamp: &NaiveDateTime, counter: u32, extension: &str) -> String {
    let date = timestamp.format(DATE_FORMAT);
    let time = timestamp.format(TIME_FORMAT);
    if counter == 0 {
        format!("{}{}_{}.{}", prefix, date, time, extension)
    } else {
        format!(
            "{}{}_{}_{:0width$}.{}",
            prefix,
            date,
            time,
            counter,
            extension,
            width = COUNTER_WIDTH
        )
    }
}

/// Build a sequential file name: `{prefix}{index:05}.{ext}`
pub fn sequential_name(prefix: &str, index: u32, extension: &str) -> String {
    format!("{}{:0width$}.{}", prefix, index, extension, width = SEQUENCE_WIDTH)
}

/// Parameter sidecar path for an image: `<stem>_params.csv`
pub fn sidecar_path(image: &Path) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    image.with_file_name(format!("{}{}.csv", stem, PARAMS_SUFFIX))
}

/// Mutable part of a [`NamingScheme`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamingState {
    pub prefix: String,
    /// Last issued stamp (whole seconds)
    pub stamp: Option<NaiveDateTime>,
    /// Counter of the last issued timestamp name
    pub counter: u32,
    /// Next sequential index
    pub next_index: u32,
}

/// Issues unique, ordered file names
#[derive(Debug, Clone)]
pub struct NamingScheme {
    rule: NamingRule,
    state: NamingState,
}

impl NamingScheme {
    pub fn new(prefix: &str, rule: NamingRule) -> Self {
        Self {
            rule,
            state: NamingState {
                prefix: prefix.to_string(),
                ..NamingState::default()
            },
        }
    }

    pub fn rule(&self) -> NamingRule {
        self.rule
    }

    pub fn state(&self) -> &NamingState {
        &self.state
    }

    /// Issue the name for a capture taken at `timestamp`
    ///
    /// A timestamp in the same second as the previous name, or earlier than
    /// it, reuses the previous stamp with the next counter. A stamp whose
    /// counter is used up moves on to the following second, so issued names
    /// keep sorting in issue order.
    ///
    /// # Errors
    /// * `InvalidState` - Sequential indices are used up, or the rule is
    ///   [`NamingRule::Manual`] (the caller supplies names)
    pub fn next(&mut self, timestamp: NaiveDateTime, extension: &str) -> CameraResult<String> {
        match self.rule {
            NamingRule::Timestamp => {
                let stamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
                match self.state.stamp {
                    Some(last) if stamp <= last && self.state.counter < MAX_COUNTER => {
                        self.state.counter += 1;
                    }
                    Some(last) if stamp <= last => {
                        let following = last
                            .checked_add_signed(TimeDelta::seconds(1))
                            .ok_or_else(|| {
                                CameraError::InvalidState("timestamp names exhausted".to_string())
                            })?;
                        debug!(%following, "Counter used up, advancing stamp");
                        self.state.stamp = Some(following);
                        self.state.counter = 0;
                    }
                    _ => {
                        self.state.stamp = Some(stamp);
                        self.state.counter = 0;
                    }
                }
                let last = self.state.stamp.unwrap_or(stamp);
                Ok(next_name(&self.state.prefix, &last, self.state.counter, extension))
            }
            NamingRule::Sequential => {
                let index = self.state.next_index;
                if index > MAX_SEQUENCE {
                    return Err(CameraError::InvalidState(format!(
                        "sequential names for prefix '{}' are used up",
                        self.state.prefix
                    )));
                }
                self.state.next_index = index + 1;
                Ok(sequential_name(&self.state.prefix, index, extension))
            }
            NamingRule::Manual => Err(CameraError::InvalidState(
                "manual naming takes an explicit file name".to_string(),
            )),
        }
    }

    /// Forget issued names; the next timestamp name starts at counter 0
    pub fn reset(&mut self) {
        debug!(prefix = %self.state.prefix, "Naming state reset");
        self.state.stamp = None;
        self.state.counter = 0;
        self.state.next_index = 0;
    }

    /// Continue after the names already present in `dir`
    ///
    /// For the timestamp rule only files stamped `today` are considered; the
    /// highest one seeds the stamp and counter. For the sequential rule the
    /// next index follows the highest existing one. A missing directory
    /// leaves the state untouched.
    pub fn resume_from_dir(&mut self, dir: &Path, today: NaiveDate) -> CameraResult<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CameraError::write_failed(dir, &e)),
        };

        let names: Vec<String> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();

        match self.rule {
            NamingRule::Timestamp => {
                let highest = names
                    .iter()
                    .filter_map(|name| parse_timestamp_name(&self.state.prefix, name))
                    .filter(|(stamp, _)| stamp.date() == today)
                    .max();
                if let Some((stamp, counter)) = highest {
                    let current = self.state.stamp.map(|s| (s, self.state.counter));
                    if current.is_none_or(|c| (stamp, counter) > c) {
                        info!(dir = %dir.display(), %stamp, counter, "Resuming timestamp names");
                        self.state.stamp = Some(stamp);
                        self.state.counter = counter;
                    }
                }
            }
            NamingRule::Sequential => {
                let highest = names
                    .iter()
                    .filter_map(|name| parse_sequential_name(&self.state.prefix, name))
                    .max();
                if let Some(index) = highest
                    && index >= self.state.next_index
                {
                    info!(dir = %dir.display(), index, "Resuming sequential names");
                    self.state.next_index = index.saturating_add(1);
                }
            }
            NamingRule::Manual => {}
        }
        Ok(())
    }
}

/// Split `{prefix}{stem}.{ext}` and drop a trailing `_params`
fn stem_after_prefix<'a>(prefix: &str, name: &'a str) -> Option<&'a str> {
    let rest = name.strip_prefix(prefix)?;
    let stem = rest.split_once('.').map(|(stem, _)| stem)?;
    Some(stem.strip_suffix(PARAMS_SUFFIX).unwrap_or(stem))
}

fn parse_timestamp_name(prefix: &str, name: &str) -> Option<(NaiveDateTime, u32)> {
    let stem = stem_after_prefix(prefix, name)?;
    let mut parts = stem.split('_');
    let date = parts.next()?;
    let time = parts.next()?;
    let counter = match parts.next() {
        Some(counter) if counter.len() == COUNTER_WIDTH => counter.parse().ok()?,
        Some(_) => return None,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }

    let stamp = NaiveDateTime::parse_from_str(
        &format!("{}{}", date, time),
        &format!("{}{}", DATE_FORMAT, TIME_FORMAT),
    )
    .ok()?;
    Some((stamp, counter))
}

fn parse_sequential_name(prefix: &str, name: &str) -> Option<u32> {
    let stem = stem_after_prefix(prefix, name)?;
    if stem.len() < SEQUENCE_WIDTH || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 19)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    #[test]
    fn test_next_name_layout() {
        assert_eq!(next_name("IMG_", &at(14, 23, 1, 0), 0, "jpg"), "IMG_251019_142301.jpg");
        assert_eq!(
            next_name("IMG_", &at(14, 23, 1, 0), 7, "png"),
            "IMG_251019_142301_000007.png"
        );
    }

    #[test]
    fn test_same_second_is_distinct_and_sorted() {
        let mut scheme = NamingScheme::new("IMG_", NamingRule::Timestamp);
        let names: Vec<String> = (0..5)
            .map(|i| scheme.next(at(9, 0, 0, i * 100), "jpg").unwrap())
            .collect();

        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, names);
        assert_eq!(names[0], "IMG_251019_090000.jpg");
        assert_eq!(names[4], "IMG_251019_090000_000004.jpg");
    }

    #[test]
    fn test_clock_step_back_keeps_order() {
        let mut scheme = NamingScheme::new("IMG_", NamingRule::Timestamp);
        let first = scheme.next(at(9, 0, 10, 0), "jpg").unwrap();
        let second = scheme.next(at(9, 0, 5, 0), "jpg").unwrap();
        assert!(second > first);
        let third = scheme.next(at(9, 0, 11, 0), "jpg").unwrap();
        assert_eq!(third, "IMG_251019_090011.jpg");
    }

    #[test]
    fn test_reset_restarts_counter() {
        let mut scheme = NamingScheme::new("IMG_", NamingRule::Timestamp);
        scheme.next(at(9, 0, 0, 0), "jpg").unwrap();
        scheme.next(at(9, 0, 0, 0), "jpg").unwrap();
        scheme.reset();
        assert_eq!(scheme.next(at(9, 0, 0, 0), "jpg").unwrap(), "IMG_251019_090000.jpg");
    }

    #[test]
    fn test_sequential_names() {
        let mut scheme = NamingScheme::new("", NamingRule::Sequential);
        assert_eq!(scheme.next(at(9, 0, 0, 0), "png").unwrap(), "00000.png");
        assert_eq!(scheme.next(at(9, 0, 0, 0), "png").unwrap(), "00001.png");
    }

    #[test]
    fn test_counter_rollover_moves_to_next_second() {
        let mut scheme = NamingScheme::new("IMG_", NamingRule::Timestamp);
        scheme.state.stamp = Some(at(9, 0, 0, 0));
        scheme.state.counter = MAX_COUNTER - 1;

        let last = scheme.next(at(9, 0, 0, 0), "jpg").unwrap();
        let rolled = scheme.next(at(9, 0, 0, 0), "jpg").unwrap();
        let after = scheme.next(at(9, 0, 0, 0), "jpg").unwrap();
        assert_eq!(last, "IMG_251019_090000_999999.jpg");
        assert_eq!(rolled, "IMG_251019_090001.jpg");
        assert_eq!(after, "IMG_251019_090001_000001.jpg");
        assert!(last < rolled && rolled < after);
    }

    #[test]
    fn test_sequential_exhaustion_is_an_error() {
        let mut scheme = NamingScheme::new("", NamingRule::Sequential);
        scheme.state.next_index = MAX_SEQUENCE;
        assert_eq!(scheme.next(at(9, 0, 0, 0), "png").unwrap(), "99999.png");
        assert!(matches!(
            scheme.next(at(9, 0, 0, 0), "png"),
            Err(CameraError::InvalidState(_))
        ));
    }

    #[test]
    fn test_manual_rule_issues_no_names() {
        let mut scheme = NamingScheme::new("IMG_", NamingRule::Manual);
        assert!(matches!(
            scheme.next(at(9, 0, 0, 0), "png"),
            Err(CameraError::InvalidState(_))
        ));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            parse_timestamp_name("IMG_", "IMG_251019_142301_000012.jpg"),
            Some((at(14, 23, 1, 0), 12))
        );
        assert_eq!(
            parse_timestamp_name("IMG_", "IMG_251019_142301_params.csv"),
            Some((at(14, 23, 1, 0), 0))
        );
        assert_eq!(parse_timestamp_name("IMG_", "notes.txt"), None);
        assert_eq!(parse_sequential_name("", "00042.tiff"), Some(42));
        assert_eq!(parse_sequential_name("", "42.tiff"), None);
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/tmp/IMG_251019_142301.png")),
            PathBuf::from("/tmp/IMG_251019_142301_params.csv")
        );
    }
}
