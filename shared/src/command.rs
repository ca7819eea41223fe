/*!
Serial command vocabulary of the mount controller.

The controller speaks a line oriented ASCII protocol: the host writes a command token,
the controller may answer `float` to request numeric arguments (one signed radian string
per line), and eventually terminates the exchange with `cmd` or a `done_*` tag.
Unsolicited telemetry lines (`p_`, `h_`, `e_`) can appear at any point.
*/

use crate::coordinates::parse_radians;
use crate::error::{Result, SharedError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fmt;

/// Command tokens written to the controller
pub mod tokens {
    pub const INIT: &str = "init";
    pub const TIME: &str = "time";
    pub const SET1: &str = "set1";
    pub const SET2: &str = "set2";
    pub const SET3: &str = "set3";
    pub const GOTO: &str = "goto";
    pub const MOVE: &str = "move";
    pub const MOVX: &str = "movx";
    pub const MOVY: &str = "movy";
    pub const STOP: &str = "stop";
    pub const LASER_ON: &str = "laon";
    pub const LASER_OFF: &str = "loff";
}

/// Response tags read back from the controller
pub mod tags {
    /// The controller is ready to receive numeric arguments
    pub const FLOAT_ACK: &str = "float";

    /// Command finished, no data
    pub const CMD_DONE: &str = "^cmd$";

    /// Initialization finished
    pub const DONE_INIT: &str = "^done_init$";

    /// Any `done_*` tag
    pub const DONE_ANY: &str = "^done_.*$";

    /// An axis reached its end-of-travel sensor; an extra ack follows
    pub const DONE_END: &str = "done_end";

    pub const STEPS_PREFIX: &str = "p_";
    pub const HORIZONTAL_PREFIX: &str = "h_";
    pub const EQUATORIAL_PREFIX: &str = "e_";
}

/// Pattern of the line that ends a response drain
#[derive(Debug, Clone)]
pub struct TerminalPattern(Regex);

impl TerminalPattern {
    /// Compile an arbitrary terminal pattern
    pub fn new(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|e| {
                SharedError::invalid_command(format!("terminal pattern {}: {}", pattern, e))
            })
    }

    /// `cmd`: command finished without data
    pub fn cmd() -> Self {
        Self(Regex::new(tags::CMD_DONE).expect("cmd pattern is valid"))
    }

    /// `done_init`: initialization finished
    pub fn done_init() -> Self {
        Self(Regex::new(tags::DONE_INIT).expect("done_init pattern is valid"))
    }

    /// Any `done_*` tag
    pub fn done_any() -> Self {
        Self(Regex::new(tags::DONE_ANY).expect("done pattern is valid"))
    }

    /// Check whether a line terminates the drain
    pub fn is_match(&self, line: &str) -> bool {
        self.0.is_match(line)
    }
}

impl fmt::Display for TerminalPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// One of the three calibration reference slots of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefSlot {
    One,
    Two,
    Three,
}

impl RefSlot {
    /// Parse a slot from its number (1, 2 or 3)
    pub fn from_index(index: u8) -> Result<Self> {
        match index {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            other => Err(SharedError::invalid_command(format!(
                "reference slot {} (expected 1, 2 or 3)",
                other
            ))),
        }
    }

    /// Slot number
    pub fn index(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    /// Command token selecting this slot
    pub fn token(self) -> &'static str {
        match self {
            Self::One => tokens::SET1,
            Self::Two => tokens::SET2,
            Self::Three => tokens::SET3,
        }
    }
}

/// Jog direction along one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Clockwise on X, upwards on Y
    Positive,
    /// Counter clockwise on X, downwards on Y
    Negative,
}

impl Direction {
    /// One-character flag sent after `movx`/`movy`
    pub fn flag(self) -> &'static str {
        match self {
            Self::Positive => "1",
            Self::Negative => "0",
        }
    }
}

/// Unsolicited position report from the controller
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    /// Raw stepper counters, only useful for logging
    Steps { x: String, y: String },
    /// Horizontal pointing in radians; azimuth already converted back from the
    /// controller's mirrored convention
    Horizontal { az: f64, alt: f64 },
    /// Equatorial pointing in radians
    Equatorial { ra: f64, dec: f64 },
}

/// A classified line read from the controller
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseLine {
    /// Nothing arrived before the read timeout
    Empty,
    /// A telemetry report
    Telemetry(Telemetry),
    /// Anything else: acks, terminal tags, chatter, unparsable telemetry
    Other(String),
}

impl ResponseLine {
    /// Classify a line (without its terminator) by prefix
    pub fn classify(line: &str) -> Self {
        if line.is_empty() {
            return Self::Empty;
        }

        let telemetry = if let Some(rest) = line.strip_prefix(tags::STEPS_PREFIX) {
            two_fields(rest).map(|(x, y)| Telemetry::Steps {
                x: x.to_string(),
                y: y.to_string(),
            })
        } else if let Some(rest) = line.strip_prefix(tags::HORIZONTAL_PREFIX) {
            radian_pair(rest).map(|(mirrored_az, alt)| Telemetry::Horizontal {
                az: (TAU - mirrored_az).rem_euclid(TAU),
                alt,
            })
        } else if let Some(rest) = line.strip_prefix(tags::EQUATORIAL_PREFIX) {
            radian_pair(rest).map(|(ra, dec)| Telemetry::Equatorial {
                ra: ra.rem_euclid(TAU),
                dec,
            })
        } else {
            None
        };

        match telemetry {
            Some(t) => Self::Telemetry(t),
            None => Self::Other(line.to_string()),
        }
    }
}

fn two_fields(rest: &str) -> Option<(&str, &str)> {
    let mut fields = rest.split(' ').filter(|f| !f.is_empty());
    Some((fields.next()?, fields.next()?))
}

fn radian_pair(rest: &str) -> Option<(f64, f64)> {
    let (a, b) = two_fields(rest)?;
    Some((parse_radians(a).ok()?, parse_radians(b).ok()?))
}
