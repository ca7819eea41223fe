/*!
Line-oriented operator console.

Reads commands from stdin, turns them into [`OperatorIntent`]s and prints the
[`Notification`]s coming back from the orchestrator, as text or JSON lines.
*/

use crate::events::{Axis, Event, Notification, OperatorIntent};
use crossbeam_channel::{Receiver, Sender};
use shared::coordinates::{parse_degree, parse_hour_angle};
use shared::{Direction, RefSlot, Result, SharedError};
use std::io::{self, BufRead};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

pub const HELP: &str = "\
Commands:
  connect <port>            open the serial link to the mount
  disconnect                close the serial link
  init                      initialize the mount (measures both axes)
  move <az> <alt>           point at a horizontal position (degrees)
  left | right | up | down  jog until `stop`
  stop                      stop both axes
  goto <ra> <dec>           point at an equatorial position (5h30m0s, 12°30'0'')
  ref <1-3> <ra> <dec>      store a calibration reference
  calib on|off              calibration mode
  redef <1-3>               next planetarium fix redefines this reference
  track on|off              re-point at the last target every few seconds
  laser on|off              toggle the laser
  ports                     list USB serial ports
  quit                      exit";

/// Parse one console line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<OperatorIntent>> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let intent = match (command.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("connect", [port]) => OperatorIntent::Connect(port.to_string()),
        ("disconnect", []) => OperatorIntent::Disconnect,
        ("init", []) => OperatorIntent::Init,
        ("move", [az, alt]) => OperatorIntent::MoveTo {
            az: parse_degree(az)?,
            alt: parse_degree(alt)?,
        },
        ("left", []) => jog(Axis::X, Direction::Negative),
        ("right", []) => jog(Axis::X, Direction::Positive),
        ("up", []) => jog(Axis::Y, Direction::Positive),
        ("down", []) => jog(Axis::Y, Direction::Negative),
        ("stop", []) => OperatorIntent::Stop,
        ("goto", [ra, dec]) => OperatorIntent::Goto {
            ra: parse_hour_angle(ra)?,
            dec: parse_degree(dec)?,
        },
        ("ref", [slot, ra, dec]) => OperatorIntent::SetReference {
            slot: parse_slot(slot)?,
            ra: parse_hour_angle(ra)?,
            dec: parse_degree(dec)?,
        },
        ("calib", [state]) => OperatorIntent::CalibrationMode(parse_switch(state)?),
        ("redef", [slot]) => OperatorIntent::RedefineReference(parse_slot(slot)?),
        ("track", [state]) => OperatorIntent::Tracking(parse_switch(state)?),
        ("laser", [state]) => OperatorIntent::Laser(parse_switch(state)?),
        ("ports", []) => OperatorIntent::ListPorts,
        ("quit" | "exit", []) => OperatorIntent::Quit,
        _ => {
            return Err(SharedError::invalid_command(format!(
                "'{}' (type `help` for the command list)",
                line.trim()
            )))
        }
    };

    Ok(Some(intent))
}

fn jog(axis: Axis, direction: Direction) -> OperatorIntent {
    OperatorIntent::Jog { axis, direction }
}

fn parse_slot(text: &str) -> Result<RefSlot> {
    let index = text
        .parse::<u8>()
        .map_err(|_| SharedError::invalid_command(format!("reference slot '{}'", text)))?;
    RefSlot::from_index(index)
}

fn parse_switch(text: &str) -> Result<bool> {
    match text.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        other => Err(SharedError::invalid_command(format!(
            "'{}' (expected on or off)",
            other
        ))),
    }
}

/// Read stdin on a detached thread, forwarding intents until `quit` or end of input
pub fn spawn_reader(events: Sender<Event>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        error!("Console read failed: {}", e);
                        break;
                    }
                };

                if matches!(line.trim(), "help" | "?") {
                    println!("{}", HELP);
                    continue;
                }

                match parse_command(&line) {
                    Ok(Some(intent)) => {
                        let quit = intent == OperatorIntent::Quit;
                        if events.send(Event::Operator(intent)).is_err() || quit {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("❌ {}", e),
                }
            }

            debug!("Console input closed");
            let _ = events.send(Event::Operator(OperatorIntent::Quit));
        })
}

/// Print notifications until the orchestrator drops its sender
pub fn spawn_printer(
    notifications: Receiver<Notification>,
    json: bool,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("notifications".to_string())
        .spawn(move || {
            for notification in notifications.iter() {
                if json {
                    match serde_json::to_string(&notification) {
                        Ok(line) => println!("{}", line),
                        Err(e) => error!("Failed to serialize notification: {}", e),
                    }
                } else {
                    println!("{}", notification);
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_blank_line() {
        assert_eq!(parse_command("").unwrap(), None);
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(
            parse_command("connect /dev/ttyUSB0").unwrap(),
            Some(OperatorIntent::Connect("/dev/ttyUSB0".to_string()))
        );
        assert_eq!(parse_command("INIT").unwrap(), Some(OperatorIntent::Init));
        assert_eq!(parse_command("stop").unwrap(), Some(OperatorIntent::Stop));
        assert_eq!(parse_command("exit").unwrap(), Some(OperatorIntent::Quit));
        assert_eq!(
            parse_command("up").unwrap(),
            Some(OperatorIntent::Jog {
                axis: Axis::Y,
                direction: Direction::Positive
            })
        );
        assert_eq!(
            parse_command("left").unwrap(),
            Some(OperatorIntent::Jog {
                axis: Axis::X,
                direction: Direction::Negative
            })
        );
    }

    #[test]
    fn test_angles_are_parsed() {
        match parse_command("goto 6h0m0s 45.0°").unwrap() {
            Some(OperatorIntent::Goto { ra, dec }) => {
                assert!((ra - PI / 2.0).abs() < 1e-12);
                assert!((dec - PI / 4.0).abs() < 1e-12);
            }
            other => panic!("unexpected {:?}", other),
        }

        match parse_command("ref 2 12h0m0s -10°0'0''").unwrap() {
            Some(OperatorIntent::SetReference { slot, ra, dec }) => {
                assert_eq!(slot, RefSlot::Two);
                assert!((ra - PI).abs() < 1e-12);
                assert!((dec + 10f64.to_radians()).abs() < 1e-12);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_switches() {
        assert_eq!(
            parse_command("calib off").unwrap(),
            Some(OperatorIntent::CalibrationMode(false))
        );
        assert_eq!(
            parse_command("track on").unwrap(),
            Some(OperatorIntent::Tracking(true))
        );
        assert_eq!(
            parse_command("laser 1").unwrap(),
            Some(OperatorIntent::Laser(true))
        );
        assert!(parse_command("laser maybe").is_err());
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(
            parse_command("dance"),
            Err(SharedError::InvalidCommand(_))
        ));
        assert!(parse_command("move 10°").is_err());
        assert!(matches!(
            parse_command("move north 10°"),
            Err(SharedError::MalformedAngle(_))
        ));
        assert!(parse_command("redef 4").is_err());
        assert!(parse_command("redef x").is_err());
    }
}
