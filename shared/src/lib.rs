/*!
# Shared Types and Utilities

This crate contains the protocol vocabulary shared by the laser pointer components:
everything that can be expressed without touching a serial port or a socket.

## Core Types

- [`ProtocolFrame`] - 20-byte telescope protocol frame
- [`EquatorialFix`] - Right ascension / declination / time triple in radians
- [`RefSlot`] - Calibration reference slot on the mount controller
- [`ResponseLine`] - Classified line read back from the mount controller

## Modules

- [`coordinates`] - Sexagesimal/radian conversions and protocol scaling
- [`frame`] - Telescope protocol framing
- [`command`] - Serial command tokens and response classification
- [`error`] - Common error types
*/

pub mod command;
pub mod coordinates;
pub mod error;
pub mod frame;

// Re-export commonly used types
pub use command::{Direction, RefSlot, ResponseLine, Telemetry, TerminalPattern};
pub use coordinates::EquatorialFix;
pub use error::{SharedError, Result};
pub use frame::ProtocolFrame;

/// Version information for the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// Size of an inbound telescope frame in bytes (160 bits)
    pub const FRAME_SIZE_BYTES: usize = 20;

    /// Size of an outbound telescope frame, which carries a trailing reserved field
    pub const OUTBOUND_FRAME_SIZE_BYTES: usize = 24;

    /// Size header written on outbound frames.
    ///
    /// The wire bytes are `18 00`, i.e. the little-endian encoding of the 24-byte length.
    pub const OUTBOUND_SIZE_FIELD: u16 = 0x0018;

    /// Message type written on outbound frames
    pub const OUTBOUND_TYPE_FIELD: u16 = 0x0000;

    /// Right ascension scale: 2^31 units per 12 hours
    pub const RA_UNITS_PER_12H: f64 = 2_147_483_648.0;

    /// Declination scale: 2^30 units per 90 degrees
    pub const DEC_UNITS_PER_90DEG: f64 = 1_073_741_824.0;

    /// Number of times an outbound frame is repeated so the planetarium refreshes its indicator
    pub const REFRESH_REPEAT: usize = 10;

    /// Default planetarium listening port
    pub const DEFAULT_TELESCOPE_PORT: u16 = 10001;

    /// Empty-read budget while waiting for `done_init`
    pub const INIT_WAIT_CYCLES: usize = 20;

    /// Empty-read budget after a goto or move exchange
    pub const MOTION_WAIT_CYCLES: usize = 10;

    /// Empty-read budget after a reference exchange
    pub const SET_REF_WAIT_CYCLES: usize = 5;

    /// Empty-read budget after toggling the laser
    pub const LASER_WAIT_CYCLES: usize = 3;
}
