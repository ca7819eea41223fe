/*!
Mount controller link.

[`SerialDeviceLink`] turns high-level intents into the controller's command/response
exchanges and surfaces telemetry as [`DeviceEvent`]s. It performs blocking I/O, so the
application runs it on a dedicated worker thread behind a [`DeviceHandle`] and talks to
it only through a command channel.

Timeouts are weak signals: when a drain runs out of empty reads without seeing its
terminal line the operation just returns, and the missing completion event is the
only trace left for callers.
*/

use crate::events::{DeviceEvent, Event};
use crate::transport::{LineTransport, SerialTransport};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use shared::command::{tags, tokens};
use shared::coordinates::{
    format_degrees, format_hours, format_radians, local_time_of_day_radians,
};
use shared::{Direction, EquatorialFix, RefSlot, ResponseLine, Telemetry, TerminalPattern};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use shared::protocol::{
    INIT_WAIT_CYCLES, LASER_WAIT_CYCLES, MOTION_WAIT_CYCLES, SET_REF_WAIT_CYCLES,
};

/// How often the worker re-checks its cancellation flag while idle
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Errors raised by the device layer
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The serial port could not be opened
    #[error("Serial port {path} unavailable: {source}")]
    Unavailable {
        path: String,
        #[source]
        source: serialport::Error,
    },

    /// Serial I/O failed mid-exchange
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The worker thread is gone
    #[error("Device worker has stopped")]
    Disconnected,
}

/// High-level intents executed by the serial worker
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Init,
    SetTime(f64),
    Goto(EquatorialFix),
    Move { az: f64, alt: f64 },
    SetRef(RefSlot, EquatorialFix),
    Movx(Direction),
    Movy(Direction),
    Stop,
    LaserOn,
    LaserOff,
}

/// Result of draining the controller output
#[derive(Debug, Clone, PartialEq)]
pub struct DrainOutcome {
    /// Last line read
    pub line: String,
    /// Whether that line matched the terminal pattern
    pub matched: bool,
}

/// Command/response engine driving the controller over a [`LineTransport`]
pub struct SerialDeviceLink<T: LineTransport> {
    transport: T,
    events: Sender<Event>,
    cancelled: Arc<AtomicBool>,
}

impl<T: LineTransport> SerialDeviceLink<T> {
    /// Create a link that reports telemetry on `events`
    pub fn new(transport: T, events: Sender<Event>, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            transport,
            events,
            cancelled,
        }
    }

    /// Execute one command
    pub fn execute(&mut self, command: DeviceCommand) -> Result<(), DeviceError> {
        match command {
            DeviceCommand::Init => self.init(),
            DeviceCommand::SetTime(time) => self.set_time(time),
            DeviceCommand::Goto(fix) => self.goto(fix),
            DeviceCommand::Move { az, alt } => self.move_to(az, alt, local_time_of_day_radians()),
            DeviceCommand::SetRef(slot, fix) => self.set_ref(slot, fix),
            DeviceCommand::Movx(direction) => self.jog(tokens::MOVX, direction),
            DeviceCommand::Movy(direction) => self.jog(tokens::MOVY, direction),
            DeviceCommand::Stop => self.stop(),
            DeviceCommand::LaserOn => self.laser(tokens::LASER_ON),
            DeviceCommand::LaserOff => self.laser(tokens::LASER_OFF),
        }
    }

    /// Initialize the controller; it measures the steps per revolution of both axes
    pub fn init(&mut self) -> Result<(), DeviceError> {
        // Swallow boot chatter, waiting one read timeout at most
        let boot = self.transport.read_line()?;
        if !boot.is_empty() {
            debug!("Discarded boot output: {}", boot);
        }

        self.transport.write_line(tokens::INIT)?;
        let outcome = self.drain(&TerminalPattern::done_init(), INIT_WAIT_CYCLES)?;
        if outcome.matched {
            info!("Device initialized");
            self.emit(DeviceEvent::InitCompleted);
        }
        Ok(())
    }

    /// Set the controller clock (local time of day as an hour angle)
    pub fn set_time(&mut self, time: f64) -> Result<(), DeviceError> {
        if self.send_with_arguments(tokens::TIME, &[time])? {
            self.drain(&TerminalPattern::cmd(), 0)?;
        }
        Ok(())
    }

    /// Point toward equatorial coordinates
    pub fn goto(&mut self, fix: EquatorialFix) -> Result<(), DeviceError> {
        debug!(
            "goto({}, {}, {})",
            format_hours(fix.ra),
            format_degrees(fix.dec),
            format_hours(fix.time)
        );
        if self.send_with_arguments(tokens::GOTO, &[fix.ra, fix.dec, fix.time])? {
            self.drain(&TerminalPattern::cmd(), MOTION_WAIT_CYCLES)?;
        }
        Ok(())
    }

    /// Point toward horizontal coordinates. The controller measures azimuth in the
    /// opposite sense, so it receives `2π - az`.
    pub fn move_to(&mut self, az: f64, alt: f64, time: f64) -> Result<(), DeviceError> {
        debug!("move({}, {})", format_degrees(az), format_degrees(alt));
        if self.send_with_arguments(tokens::MOVE, &[TAU - az, alt, time])? {
            self.drain(&TerminalPattern::cmd(), MOTION_WAIT_CYCLES)?;
        }
        Ok(())
    }

    /// Store a calibration reference: the sky position the mount currently points at
    pub fn set_ref(&mut self, slot: RefSlot, fix: EquatorialFix) -> Result<(), DeviceError> {
        debug!(
            "{}({}, {}, {})",
            slot.token(),
            format_hours(fix.ra),
            format_degrees(fix.dec),
            format_hours(fix.time)
        );
        if self.send_with_arguments(slot.token(), &[fix.ra, fix.dec, fix.time])? {
            self.drain(&TerminalPattern::cmd(), SET_REF_WAIT_CYCLES)?;
        }
        Ok(())
    }

    /// Start an accelerated movement along one axis; it continues until [`Self::stop`]
    pub fn jog(&mut self, axis_token: &str, direction: Direction) -> Result<(), DeviceError> {
        self.transport.write_line(axis_token)?;
        self.transport.write_line(direction.flag())
    }

    /// Stop any movement on both axes
    pub fn stop(&mut self) -> Result<(), DeviceError> {
        self.transport.write_line(tokens::STOP)?;
        let outcome = self.drain(&TerminalPattern::done_any(), 0)?;

        // Hitting an end-of-travel sensor produces one more ack
        let extra = if outcome.line == tags::DONE_END { 2 } else { 1 };
        for _ in 0..extra {
            let line = self.transport.read_line()?;
            self.handle_line(&line);
        }
        Ok(())
    }

    fn laser(&mut self, token: &str) -> Result<(), DeviceError> {
        self.transport.write_line(token)?;
        self.drain(&TerminalPattern::cmd(), LASER_WAIT_CYCLES)?;
        Ok(())
    }

    /// Write a command and, if the controller acknowledges with `float`, its numeric
    /// arguments. Returns false when the exchange was abandoned.
    fn send_with_arguments(
        &mut self,
        token: &str,
        arguments: &[f64],
    ) -> Result<bool, DeviceError> {
        self.transport.write_line(token)?;

        let ack = self.transport.read_line()?;
        if ack != tags::FLOAT_ACK {
            self.handle_line(&ack);
            warn!("'{}' not acknowledged (got {:?}), abandoning", token, ack);
            return Ok(false);
        }

        for value in arguments {
            self.transport.write_line(&format_radians(*value))?;
        }
        Ok(true)
    }

    /// Read and classify lines until one matches `terminal` or more than `wait` empty
    /// reads happened
    pub fn drain(
        &mut self,
        terminal: &TerminalPattern,
        wait: usize,
    ) -> Result<DrainOutcome, DeviceError> {
        let mut line = self.transport.read_line()?;
        let mut empty_reads = 0;

        while !terminal.is_match(&line) && empty_reads <= wait {
            if self.cancelled.load(Ordering::SeqCst) {
                debug!("Drain for '{}' cancelled", terminal);
                break;
            }
            if line.is_empty() {
                empty_reads += 1;
            } else {
                self.handle_line(&line);
            }
            line = self.transport.read_line()?;
        }

        let matched = terminal.is_match(&line);
        if !matched {
            warn!("Device timeout: no '{}' after {} empty reads", terminal, empty_reads);
        }
        Ok(DrainOutcome { line, matched })
    }

    /// Classify one line, logging it and emitting position telemetry
    fn handle_line(&self, line: &str) {
        match ResponseLine::classify(line) {
            ResponseLine::Empty => {}
            ResponseLine::Telemetry(Telemetry::Steps { x, y }) => {
                debug!("Steps: ({}, {})", x, y);
            }
            ResponseLine::Telemetry(Telemetry::Horizontal { az, alt }) => {
                debug!("PosH: ({} / {})", format_degrees(az), format_degrees(alt));
                self.emit(DeviceEvent::PositionUpdated { alt, az });
            }
            ResponseLine::Telemetry(Telemetry::Equatorial { ra, dec }) => {
                debug!("PosE: ({} / {})", format_hours(ra), format_degrees(dec));
                self.emit(DeviceEvent::EquatorialPositionUpdated { ra, dec });
            }
            ResponseLine::Other(other) => {
                debug!("device: {}", other);
            }
        }
    }

    fn emit(&self, event: DeviceEvent) {
        if self.events.send(Event::Device(event)).is_err() {
            debug!("Event receiver gone, dropping device event");
        }
    }

    /// Worker loop: execute commands until cancelled or the command channel closes
    pub fn run(mut self, commands: Receiver<DeviceCommand>) {
        info!("Serial worker started");

        while !self.cancelled.load(Ordering::SeqCst) {
            match commands.recv_timeout(IDLE_POLL) {
                Ok(command) => {
                    let description = format!("{:?}", command);
                    if let Err(e) = self.execute(command) {
                        error!("Device command {} failed: {}", description, e);
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!("Serial worker stopped");
    }
}

/// Handle to a serial worker thread owning a [`SerialDeviceLink`]
pub struct DeviceHandle {
    name: String,
    commands: Sender<DeviceCommand>,
    cancelled: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceHandle {
    /// Open a serial port and start its worker
    pub fn connect(
        path: &str,
        baud_rate: u32,
        read_timeout: Duration,
        events: Sender<Event>,
    ) -> Result<Self, DeviceError> {
        let transport = SerialTransport::open(path, baud_rate, read_timeout)?;
        Self::spawn(path, transport, events)
    }

    /// Start a worker over any transport
    pub fn spawn<T: LineTransport + 'static>(
        name: &str,
        transport: T,
        events: Sender<Event>,
    ) -> Result<Self, DeviceError> {
        let (commands, command_rx) = unbounded();
        let cancelled = Arc::new(AtomicBool::new(false));
        let link = SerialDeviceLink::new(transport, events, Arc::clone(&cancelled));

        let worker = thread::Builder::new()
            .name("serial-worker".to_string())
            .spawn(move || link.run(command_rx))?;

        Ok(Self {
            name: name.to_string(),
            commands,
            cancelled,
            worker: Some(worker),
        })
    }

    /// Device name (serial port path)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a command for the worker
    pub fn send(&self, command: DeviceCommand) -> Result<(), DeviceError> {
        self.commands
            .send(command)
            .map_err(|_| DeviceError::Disconnected)
    }

    /// Stop the worker. An exchange in progress finishes its current read or write;
    /// queued commands are dropped.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Serial worker for {} panicked", self.name);
            }
        }
        info!("Disconnected from {}", self.name);
    }
}
