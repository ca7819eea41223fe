/*!
Orchestration loop.

All producers feed one event channel; this loop drains it on a single thread, so the
calibration state, the device handle and the tracking timer are never shared. Bridge
decisions are carried out here: mount actions go to the serial worker queue and
field-of-view updates go to the telescope server.
*/

use crate::bridge::{BridgeAction, CalibrationBridge};
use crate::config::AppConfig;
use crate::device::{DeviceCommand, DeviceHandle};
use crate::events::{Axis, DeviceEvent, Event, Notification, OperatorIntent, TelescopeEvent};
use crate::repeat_timer::RepeatTimer;
use crate::telescope_server::TelescopeService;
use crate::transport::available_ports;
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use shared::coordinates::local_time_of_day_radians;
use shared::EquatorialFix;
use tracing::{debug, info, warn};

/// Owns every long-lived component of the application
pub struct Orchestrator {
    config: AppConfig,
    bridge: CalibrationBridge,
    device: Option<DeviceHandle>,
    telescope: TelescopeService,
    tracking: Option<RepeatTimer>,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    notifications: Sender<Notification>,
    last_move: Option<(f64, f64)>,
}

impl Orchestrator {
    /// Start the telescope server; the device is connected later, on request
    pub fn new(
        config: AppConfig,
        events_tx: Sender<Event>,
        events_rx: Receiver<Event>,
        notifications: Sender<Notification>,
    ) -> Result<Self> {
        let telescope = TelescopeService::start(&config.telescope, events_tx.clone())
            .with_context(|| {
                format!(
                    "Failed to start telescope server on {}:{}",
                    config.telescope.bind_addr, config.telescope.port
                )
            })?;

        Ok(Self {
            bridge: CalibrationBridge::new(config.calibration.start_in_calibration_mode),
            config,
            device: None,
            telescope,
            tracking: None,
            events_tx,
            events_rx,
            notifications,
            last_move: None,
        })
    }

    /// Process events until quit or shutdown, then release everything
    pub fn run(mut self) {
        if let Some(port) = self.config.device.port.clone() {
            self.connect(&port);
        }

        info!(
            "🚀 Laser mount controller ready (planetarium on {})",
            self.telescope.local_addr()
        );
        while let Ok(event) = self.events_rx.recv() {
            if !self.handle(event) {
                break;
            }
        }

        self.shutdown();
    }

    /// Handle one event; returns false when the application should stop
    pub fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::Device(event) => self.on_device(event),
            Event::Telescope(event) => self.on_telescope(event),
            Event::Operator(OperatorIntent::Quit) | Event::Shutdown => return false,
            Event::Operator(intent) => self.on_intent(intent),
            Event::TrackingTick => {
                let actions = self.bridge.on_tracking_tick(local_time_of_day_radians());
                self.apply(actions);
            }
        }
        true
    }

    fn on_device(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::InitCompleted => {
                // Initialization resets the controller clock
                self.send_device(DeviceCommand::SetTime(local_time_of_day_radians()));
                self.notify(Notification::InitCompleted);
            }
            DeviceEvent::PositionUpdated { alt, az } => {
                self.notify(Notification::PositionUpdated { alt, az });
            }
            DeviceEvent::EquatorialPositionUpdated { ra, dec } => {
                let actions = self.bridge.on_equatorial_position(ra, dec);
                self.apply(actions);
                self.notify(Notification::EquatorialPositionUpdated { ra, dec });
            }
        }
    }

    fn on_telescope(&mut self, event: TelescopeEvent) {
        match event {
            TelescopeEvent::ClientConnected { peer, .. } => {
                self.notify(Notification::ClientConnected { peer });
            }
            TelescopeEvent::CoordinatesReceived {
                ra_raw,
                dec_raw,
                time_raw,
                ..
            } => {
                let actions = self.bridge.on_coordinates(ra_raw, dec_raw, time_raw);
                self.apply(actions);
                debug!(
                    "Calibration state {:?} (mode {})",
                    self.bridge.state(),
                    if self.bridge.calibration_mode() { "on" } else { "off" }
                );
            }
            TelescopeEvent::ClientDisconnected { .. } => {
                self.notify(Notification::ClientDisconnected);
            }
        }
    }

    fn on_intent(&mut self, intent: OperatorIntent) {
        match intent {
            OperatorIntent::Connect(port) => self.connect(&port),
            OperatorIntent::Disconnect => self.disconnect(),
            OperatorIntent::Init => self.send_device(DeviceCommand::Init),
            OperatorIntent::MoveTo { az, alt } => {
                if self.last_move == Some((az, alt)) {
                    debug!("Horizontal target unchanged, move skipped");
                    return;
                }
                self.last_move = Some((az, alt));
                self.send_device(DeviceCommand::Move { az, alt });
            }
            OperatorIntent::Jog { axis, direction } => self.send_device(match axis {
                Axis::X => DeviceCommand::Movx(direction),
                Axis::Y => DeviceCommand::Movy(direction),
            }),
            OperatorIntent::Stop => self.send_device(DeviceCommand::Stop),
            OperatorIntent::Goto { ra, dec } => {
                let fix = EquatorialFix::new(ra, dec, local_time_of_day_radians());
                self.send_device(DeviceCommand::Goto(fix));
            }
            OperatorIntent::SetReference { slot, ra, dec } => {
                let fix = EquatorialFix::new(ra, dec, local_time_of_day_radians());
                self.apply(vec![BridgeAction::SetReference { slot, fix }]);
            }
            OperatorIntent::CalibrationMode(enabled) => self.bridge.set_calibration_mode(enabled),
            OperatorIntent::RedefineReference(slot) => self.bridge.redefine_reference(slot),
            OperatorIntent::Tracking(enabled) => self.set_tracking(enabled),
            OperatorIntent::Laser(on) => self.send_device(if on {
                DeviceCommand::LaserOn
            } else {
                DeviceCommand::LaserOff
            }),
            OperatorIntent::ListPorts => match available_ports() {
                Ok(ports) => self.notify(Notification::Ports { ports }),
                Err(e) => self.notify(Notification::Error {
                    message: format!("Port enumeration failed: {}", e),
                }),
            },
            OperatorIntent::Quit => {}
        }
    }

    /// Carry out bridge decisions in order
    fn apply(&mut self, actions: Vec<BridgeAction>) {
        for action in actions {
            match action {
                BridgeAction::RequestFieldOfView { ra, dec } => {
                    match self.telescope.request_field_of_view_update(ra, dec) {
                        Ok(true) => {}
                        Ok(false) => debug!("No planetarium connected, field of view not sent"),
                        Err(e) => warn!("Field of view update failed: {}", e),
                    }
                }
                BridgeAction::SetReference { slot, fix } => {
                    self.send_device(DeviceCommand::SetRef(slot, fix));
                    self.notify(Notification::ReferenceRecorded { slot: slot.index() });
                }
                BridgeAction::Goto(fix) => self.send_device(DeviceCommand::Goto(fix)),
                BridgeAction::CalibrationComplete => self.notify(Notification::CalibrationComplete),
            }
        }
    }

    fn connect(&mut self, port: &str) {
        self.disconnect();

        let device = &self.config.device;
        let events = self.events_tx.clone();
        match DeviceHandle::connect(port, device.baud_rate, device.read_timeout(), events) {
            Ok(handle) => self.start_device(handle),
            Err(e) => {
                warn!("Connection to {} failed: {}", port, e);
                self.notify(Notification::ConnectFailed {
                    port: port.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Attach a freshly opened device and initialize it
    fn start_device(&mut self, handle: DeviceHandle) {
        self.attach_device(handle);
        self.send_device(DeviceCommand::Init);
    }

    /// Take ownership of a running serial worker
    fn attach_device(&mut self, handle: DeviceHandle) {
        let port = handle.name().to_string();
        self.device = Some(handle);
        self.bridge.set_device_connected(true);
        self.last_move = None;
        self.notify(Notification::DeviceConnected { port });
    }

    fn disconnect(&mut self) {
        if let Some(handle) = self.device.take() {
            let port = handle.name().to_string();
            handle.close();
            self.bridge.set_device_connected(false);
            self.notify(Notification::DeviceDisconnected { port });
        }
    }

    fn set_tracking(&mut self, enabled: bool) {
        self.bridge.set_tracking(enabled);

        if !enabled {
            if let Some(timer) = self.tracking.take() {
                timer.cancel();
                info!("Tracking off");
            }
            return;
        }
        if self.tracking.is_some() {
            return;
        }

        let events = self.events_tx.clone();
        match RepeatTimer::start("tracking", self.config.tracking.interval(), move || {
            let _ = events.send(Event::TrackingTick);
        }) {
            Ok(timer) => {
                info!("Tracking every {:?}", self.config.tracking.interval());
                if self.bridge.last_fix().is_none() {
                    info!("Tracking waits for a first target");
                }
                self.tracking = Some(timer);
            }
            Err(e) => {
                self.bridge.set_tracking(false);
                self.notify(Notification::Error {
                    message: format!("Could not start tracking: {}", e),
                });
            }
        }
    }

    fn send_device(&mut self, command: DeviceCommand) {
        let result = match &self.device {
            Some(handle) => handle.send(command),
            None => {
                self.notify(Notification::Error {
                    message: "No device connected".to_string(),
                });
                return;
            }
        };

        if let Err(e) = result {
            warn!("Device command dropped: {}", e);
            self.disconnect();
            self.notify(Notification::Error {
                message: e.to_string(),
            });
        }
    }

    fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            debug!("Notification receiver gone");
        }
    }

    fn shutdown(mut self) {
        info!("🛑 Shutting down");
        if let Some(timer) = self.tracking.take() {
            timer.cancel();
        }
        self.disconnect();
        self.telescope.close();
    }
}
