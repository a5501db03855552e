//! Text forms of the chain's three timestamp encodings.
//!
//! All of them render as `YYYY-MM-DDTHH:MM:SS[.fff]` in UTC with no zone
//! suffix; a trailing `Z` is tolerated on input. Years past 9999 carry a
//! leading `+`.

use thiserror::Error;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// `block_timestamp_type` counts half-second slots from 2000-01-01T00:00:00.
const BLOCK_TIMESTAMP_EPOCH_MS: i64 = 946_684_800_000;
const BLOCK_INTERVAL_MS: i64 = 500;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseTimeError {
    #[error("invalid timestamp {0:?}")]
    Invalid(String),
    #[error("timestamp {0:?} is out of range")]
    OutOfRange(String),
}

fn format_seconds(seconds: i64) -> Result<String, ParseTimeError> {
    let datetime = OffsetDateTime::from_unix_timestamp(seconds)
        .map_err(|_| ParseTimeError::OutOfRange(seconds.to_string()))?;
    datetime
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second]"
        ))
        .map_err(|_| ParseTimeError::OutOfRange(seconds.to_string()))
}

/// Parses into whole seconds plus microseconds.
fn parse(text: &str) -> Result<(i64, i64), ParseTimeError> {
    let invalid = || ParseTimeError::Invalid(text.to_string());
    let trimmed = text.strip_suffix('Z').unwrap_or(text);
    let (base, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    let datetime = PrimitiveDateTime::parse(
        base,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    )
    .map_err(|_| invalid())?;
    if fraction.len() > 6 || !fraction.bytes().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let micros = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<6}").parse::<i64>().map_err(|_| invalid())?
    };
    Ok((datetime.assume_utc().unix_timestamp(), micros))
}

fn format_fraction(micros: i64) -> String {
    if micros % 1000 == 0 {
        format!("{:03}", micros / 1000)
    } else {
        format!("{micros:06}")
    }
}

/// `time_point_sec`: seconds since the Unix epoch.
pub fn format_time_point_sec(seconds: u32) -> Result<String, ParseTimeError> {
    format_seconds(i64::from(seconds))
}

pub fn parse_time_point_sec(text: &str) -> Result<u32, ParseTimeError> {
    let (seconds, micros) = parse(text)?;
    if micros != 0 {
        return Err(ParseTimeError::Invalid(text.to_string()));
    }
    u32::try_from(seconds).map_err(|_| ParseTimeError::OutOfRange(text.to_string()))
}

/// `time_point`: microseconds since the Unix epoch.
pub fn format_time_point(micros: i64) -> Result<String, ParseTimeError> {
    let seconds = micros.div_euclid(1_000_000);
    let fraction = micros.rem_euclid(1_000_000);
    Ok(format!("{}.{}", format_seconds(seconds)?, format_fraction(fraction)))
}

pub fn parse_time_point(text: &str) -> Result<i64, ParseTimeError> {
    let (seconds, micros) = parse(text)?;
    seconds
        .checked_mul(1_000_000)
        .and_then(|v| v.checked_add(micros))
        .ok_or_else(|| ParseTimeError::OutOfRange(text.to_string()))
}

/// `block_timestamp_type`: half-second slots since 2000-01-01.
pub fn format_block_timestamp(slot: u32) -> Result<String, ParseTimeError> {
    let ms = BLOCK_TIMESTAMP_EPOCH_MS + i64::from(slot) * BLOCK_INTERVAL_MS;
    format_time_point(ms * 1000)
}

pub fn parse_block_timestamp(text: &str) -> Result<u32, ParseTimeError> {
    let micros = parse_time_point(text)?;
    let offset_ms = micros / 1000 - BLOCK_TIMESTAMP_EPOCH_MS;
    if micros % 1000 != 0 || offset_ms % BLOCK_INTERVAL_MS != 0 {
        return Err(ParseTimeError::Invalid(text.to_string()));
    }
    u32::try_from(offset_ms / BLOCK_INTERVAL_MS)
        .map_err(|_| ParseTimeError::OutOfRange(text.to_string()))
}
