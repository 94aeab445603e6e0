//! Parsing of DICOM date (DA) and time (TM) strings.
//!
//! Values are decoded with the partial-precision parsers of `dicom-core`.
//! Malformed input yields `None`, never a default value.
use chrono::{NaiveDate, NaiveTime};
use dicom_core::value::deserialize::{parse_date_partial, parse_time_partial};
use dicom_core::value::AsRange;

/// Parse a DICOM date string (`YYYYMMDD`).
///
/// The pre-2003 form `YYYY.MM.DD` is also accepted.
/// Dates without a day component are rejected.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let value = if value.len() == 10 && value.contains('.') {
        value.replace('.', "")
    } else {
        value.to_string()
    };
    let (date, rest) = parse_date_partial(value.as_bytes()).ok()?;
    if !rest.is_empty() {
        return None;
    }
    date.exact().ok()
}

/// Parse a DICOM time string (`HH[MM[SS[.FFFFFF]]]`).
///
/// Missing components are zero.
/// The pre-2003 form with colons (`HH:MM:SS.FFFFFF`) is also accepted.
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim().replace(':', "");
    let (time, rest) = parse_time_partial(value.as_bytes()).ok()?;
    if !rest.is_empty() {
        return None;
    }
    time.earliest().ok()
}
