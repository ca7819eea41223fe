/*!
Coordinate conversion utilities.

This module translates between the textual angle notations used by the operator
(`D°M'S''`, `D.d°`, `HhMmSs`), radians, the signed radian strings understood by the mount
controller and the fixed-point integers carried by the telescope protocol.

Every function here is pure. Malformed text is reported as
[`SharedError::MalformedAngle`], never as a panic.
*/

use crate::error::{Result, SharedError};
use crate::protocol::{DEC_UNITS_PER_90DEG, RA_UNITS_PER_12H};
use chrono::{DateTime, Local, TimeZone, Timelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::LazyLock;
use tracing::debug;

/// Seconds at or above this value are carried into the minutes field
const SECONDS_ROLLOVER: f64 = 59.99;

/// `D°M'S''` with the alternative `º`/`ᵒ` degree marks and `"` for seconds
static DMS_DEGREES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^([+-]?)(\d{1,3})[°ºᵒ](\d{1,3})'(\d{1,3}(?:\.\d+)?)(?:''|")$"#)
        .expect("degree pattern is valid")
});

/// `D.d°`
static DECIMAL_DEGREES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-]?(?:\d{1,3}(?:\.\d*)?|\.\d+))[°ºᵒ]$")
        .expect("decimal degree pattern is valid")
});

/// `HhMmSs`
static HMS_HOURS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3})h(\d{1,3})m(\d{1,3}(?:\.\d+)?)s$").expect("hour pattern is valid")
});

/// `H.hh`
static DECIMAL_HOURS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3}(?:\.\d*)?|\.\d+)h$").expect("decimal hour pattern is valid")
});

/// Equatorial position handed to the mount: right ascension, declination and the local
/// time of day (as an hour angle), all in radians
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquatorialFix {
    pub ra: f64,
    pub dec: f64,
    pub time: f64,
}

impl EquatorialFix {
    /// Create a new fix from radian values
    pub fn new(ra: f64, dec: f64, time: f64) -> Self {
        Self { ra, dec, time }
    }

    /// Same sky position observed at a different time of day
    pub fn at_time(self, time: f64) -> Self {
        Self { time, ..self }
    }
}

/// A non-negative angle split into whole units, minutes and seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sexagesimal {
    pub whole: u32,
    pub minutes: u32,
    pub seconds: f64,
}

impl Sexagesimal {
    /// Split a non-negative value, carrying seconds close to 60 into the minutes
    /// and 60 minutes into the whole field
    pub fn split(value: f64) -> Self {
        let value = value.abs();
        let mut whole = value.floor();

        let total_minutes = (value - whole) * 60.0;
        let mut minutes = total_minutes.floor();
        let mut seconds = (total_minutes - minutes) * 60.0;

        if seconds >= SECONDS_ROLLOVER {
            seconds = 0.0;
            minutes += 1.0;
        }
        if minutes >= 60.0 {
            minutes -= 60.0;
            whole += 1.0;
        }

        Self {
            whole: whole as u32,
            minutes: minutes as u32,
            seconds,
        }
    }
}

/// Render seconds with at most two decimals and no trailing zeros (`0`, `7.5`, `12.25`)
fn format_seconds(seconds: f64) -> String {
    let text = format!("{:.2}", seconds);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn parse_number(text: &str, original: &str) -> Result<f64> {
    text.parse::<f64>()
        .map_err(|_| SharedError::malformed_angle(original))
}

/// Combine sexagesimal fields; minutes and seconds must lie in `[0, 60)`
fn sexagesimal_value(whole: &str, minutes: &str, seconds: &str, original: &str) -> Result<f64> {
    let whole = parse_number(whole, original)?;
    let minutes = parse_number(minutes, original)?;
    let seconds = parse_number(seconds, original)?;

    if minutes >= 60.0 || seconds >= 60.0 {
        debug!("Rejected out of range sexagesimal field: {:?}", original);
        return Err(SharedError::malformed_angle(original));
    }
    Ok(whole + minutes / 60.0 + seconds / 3600.0)
}

/// Convert hours to radians
pub fn hours_to_radians(hours: f64) -> f64 {
    hours * PI / 12.0
}

/// Convert radians to hours in the `[0, 24)` domain
pub fn radians_to_hours(radians: f64) -> f64 {
    let hours = (radians * 12.0 / PI).rem_euclid(24.0);
    // rem_euclid can round up to exactly 24 for tiny negative inputs
    if hours >= 24.0 {
        0.0
    } else {
        hours
    }
}

/// Parse an hour angle (`5h30m12s` or `5.5h`) into radians
pub fn parse_hour_angle(text: &str) -> Result<f64> {
    let text = text.trim();

    let hours = if let Some(caps) = HMS_HOURS.captures(text) {
        sexagesimal_value(&caps[1], &caps[2], &caps[3], text)?
    } else if let Some(caps) = DECIMAL_HOURS.captures(text) {
        parse_number(&caps[1], text)?
    } else {
        debug!("Rejected hour angle: {:?}", text);
        return Err(SharedError::malformed_angle(text));
    };

    Ok(hours_to_radians(hours.rem_euclid(24.0)))
}

/// Parse a degree angle (`-10°20'30''` or `-10.341667°`) into radians
///
/// The sign of the sexagesimal form applies to the whole value, so `-0°30'0''` is
/// half a degree below zero.
pub fn parse_degree(text: &str) -> Result<f64> {
    let text = text.trim();

    let degrees = if let Some(caps) = DMS_DEGREES.captures(text) {
        let magnitude = sexagesimal_value(&caps[2], &caps[3], &caps[4], text)?;
        if &caps[1] == "-" {
            -magnitude
        } else {
            magnitude
        }
    } else if let Some(caps) = DECIMAL_DEGREES.captures(text) {
        parse_number(&caps[1], text)?
    } else {
        debug!("Rejected degree angle: {:?}", text);
        return Err(SharedError::malformed_angle(text));
    };

    Ok(degrees.to_radians())
}

/// Parse a signed radian string as sent by the mount controller (`+1.234567`)
pub fn parse_radians(text: &str) -> Result<f64> {
    let text = text.trim();
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(SharedError::malformed_angle(text)),
    }
}

/// Render radians with six decimals and an explicit sign (`+0.523599`, `-1.000000`)
pub fn format_radians(value: f64) -> String {
    format!("{:+.6}", value)
}

/// Render radians as `D°M'S''`
///
/// Negative angles are decomposed on their absolute value; the sign is only put in
/// front of the degree field.
pub fn format_degrees(radians: f64) -> String {
    let degrees = radians.to_degrees();
    let sign = if degrees < 0.0 { "-" } else { "" };
    let parts = Sexagesimal::split(degrees);

    format!(
        "{}{}°{}'{}''",
        sign,
        parts.whole,
        parts.minutes,
        format_seconds(parts.seconds)
    )
}

/// Render radians as `HhMmSs`, normalized to `[0, 24h)`
pub fn format_hours(radians: f64) -> String {
    let mut parts = Sexagesimal::split(radians_to_hours(radians));
    if parts.whole >= 24 {
        parts.whole -= 24;
    }

    format!(
        "{}h{}m{}s",
        parts.whole,
        parts.minutes,
        format_seconds(parts.seconds)
    )
}

/// Scale radians into the telescope protocol integers.
///
/// Right ascension uses 2^31 units per 12 hours, declination 2^30 units per 90 degrees.
/// Both are truncated toward zero.
pub fn protocol_encode(ra: f64, dec: f64) -> (u32, i32) {
    let ra_hours = radians_to_hours(ra);
    let dec_degrees = dec.to_degrees();

    let ra_scaled = (ra_hours * (RA_UNITS_PER_12H / 12.0)) as u32;
    let dec_scaled = (dec_degrees * (DEC_UNITS_PER_90DEG / 90.0)) as i32;

    (ra_scaled, dec_scaled)
}

/// Inverse of [`protocol_encode`], returning radians
pub fn protocol_decode_radians(ra_scaled: u32, dec_scaled: i32) -> (f64, f64) {
    let ra_hours = ra_scaled as f64 * 12.0 / RA_UNITS_PER_12H;
    let dec_degrees = dec_scaled as f64 * 90.0 / DEC_UNITS_PER_90DEG;

    (hours_to_radians(ra_hours), dec_degrees.to_radians())
}

/// Inverse of [`protocol_encode`], returning the hour and degree strings
pub fn protocol_decode(ra_scaled: u32, dec_scaled: i32) -> (String, String) {
    let (ra, dec) = protocol_decode_radians(ra_scaled, dec_scaled);
    (format_hours(ra), format_degrees(dec))
}

/// Time of day of a timestamp expressed as an hour angle in radians (whole seconds)
pub fn time_of_day_radians<Tz: TimeZone>(time: &DateTime<Tz>) -> f64 {
    let hours =
        time.hour() as f64 + time.minute() as f64 / 60.0 + time.second() as f64 / 3600.0;
    hours_to_radians(hours)
}

/// Current local time of day as an hour angle in radians
pub fn local_time_of_day_radians() -> f64 {
    time_of_day_radians(&Local::now())
}

/// Local timestamp of a protocol time field (microseconds since the Unix epoch)
pub fn local_time_from_micros(micros: i64) -> Option<DateTime<Local>> {
    DateTime::<Utc>::from_timestamp(micros.div_euclid(1_000_000), 0)
        .map(|utc| utc.with_timezone(&Local))
}

/// Human readable J2000-style description of a fix: `HhMmSs/D°M'S'' at <time>`
pub fn describe_fix<Tz: TimeZone>(ra: f64, dec: f64, time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}/{} at {}",
        format_hours(ra),
        format_degrees(dec),
        time.format("%a %b %e %H:%M:%S %Y")
    )
}
