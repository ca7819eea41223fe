/*!
Events flowing into the orchestrator and notifications flowing out of it.

Every producer (serial worker, telescope tasks, operator console, tracking timer,
Ctrl+C handler) sends [`Event`]s on one crossbeam channel, so the calibration state
is only ever touched by the thread draining that channel.
*/

use serde::Serialize;
use shared::coordinates::{format_degrees, format_hours};
use shared::{Direction, RefSlot};
use std::fmt;

/// Identifier of one planetarium connection
pub type ChannelId = u64;

/// Anything the orchestrator reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Device(DeviceEvent),
    Telescope(TelescopeEvent),
    Operator(OperatorIntent),
    TrackingTick,
    Shutdown,
}

/// Emitted by the serial worker
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    InitCompleted,
    /// Horizontal pointing, radians
    PositionUpdated { alt: f64, az: f64 },
    /// Equatorial pointing, radians
    EquatorialPositionUpdated { ra: f64, dec: f64 },
}

/// Emitted by the telescope service
#[derive(Debug, Clone, PartialEq)]
pub enum TelescopeEvent {
    ClientConnected { channel: ChannelId, peer: String },
    /// Raw integer magnitudes of a received frame (`ra`, `dec`, microsecond time)
    CoordinatesReceived {
        channel: ChannelId,
        ra_raw: f64,
        dec_raw: f64,
        time_raw: f64,
    },
    ClientDisconnected { channel: ChannelId },
}

/// Operator request from the console
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorIntent {
    Connect(String),
    Disconnect,
    Init,
    /// Horizontal target in radians
    MoveTo { az: f64, alt: f64 },
    Jog { axis: Axis, direction: Direction },
    Stop,
    /// Equatorial target in radians, stamped with the current time when executed
    Goto { ra: f64, dec: f64 },
    SetReference { slot: RefSlot, ra: f64, dec: f64 },
    CalibrationMode(bool),
    RedefineReference(RefSlot),
    Tracking(bool),
    Laser(bool),
    ListPorts,
    Quit,
}

/// Mount axis for jogging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Azimuth (`movx`)
    X,
    /// Altitude (`movy`)
    Y,
}

/// Outcome reported back to the operator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    DeviceConnected { port: String },
    ConnectFailed { port: String, reason: String },
    DeviceDisconnected { port: String },
    InitCompleted,
    PositionUpdated { alt: f64, az: f64 },
    EquatorialPositionUpdated { ra: f64, dec: f64 },
    ReferenceRecorded { slot: u8 },
    CalibrationComplete,
    ClientConnected { peer: String },
    ClientDisconnected,
    Ports { ports: Vec<String> },
    Error { message: String },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceConnected { port } => write!(f, "🔌 Connected to {}", port),
            Self::ConnectFailed { port, reason } => {
                write!(f, "❌ Could not connect to {}: {}", port, reason)
            }
            Self::DeviceDisconnected { port } => write!(f, "Disconnected from {}", port),
            Self::InitCompleted => write!(f, "✅ Device initialized"),
            Self::PositionUpdated { alt, az } => write!(
                f,
                "Horizontal: az {} alt {}",
                format_degrees(*az),
                format_degrees(*alt)
            ),
            Self::EquatorialPositionUpdated { ra, dec } => write!(
                f,
                "Equatorial: ra {} dec {}",
                format_hours(*ra),
                format_degrees(*dec)
            ),
            Self::ReferenceRecorded { slot } => write!(f, "Reference {} recorded", slot),
            Self::CalibrationComplete => write!(f, "✅ Calibration complete"),
            Self::ClientConnected { peer } => write!(f, "📡 Planetarium connected from {}", peer),
            Self::ClientDisconnected => write!(f, "Planetarium disconnected"),
            Self::Ports { ports } if ports.is_empty() => write!(f, "No USB serial ports found"),
            Self::Ports { ports } => write!(f, "Ports: {}", ports.join(", ")),
            Self::Error { message } => write!(f, "❌ {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_json_tags() {
        let json = serde_json::to_string(&Notification::ReferenceRecorded { slot: 2 }).unwrap();
        assert_eq!(json, r#"{"event":"reference_recorded","slot":2}"#);

        let json = serde_json::to_string(&Notification::CalibrationComplete).unwrap();
        assert_eq!(json, r#"{"event":"calibration_complete"}"#);
    }

    #[test]
    fn test_notification_display() {
        let ports = Notification::Ports {
            ports: vec!["/dev/ttyUSB0".to_string(), "/dev/ttyUSB1".to_string()],
        };
        assert_eq!(ports.to_string(), "Ports: /dev/ttyUSB0, /dev/ttyUSB1");
        assert_eq!(
            Notification::Ports { ports: vec![] }.to_string(),
            "No USB serial ports found"
        );
        assert_eq!(
            Notification::PositionUpdated { alt: 0.0, az: 0.0 }.to_string(),
            "Horizontal: az 0°0'0'' alt 0°0'0''"
        );
    }
}
