/*!
Calibration state machine.

[`CalibrationBridge`] decides what each planetarium fix means for the mount: a
calibration reference while in calibration mode, a goto otherwise. It never touches a
transport; every decision comes back as a list of [`BridgeAction`]s that the
orchestrator executes in order.
*/

use shared::coordinates::{
    describe_fix, local_time_from_micros, local_time_of_day_radians, protocol_decode_radians,
    time_of_day_radians,
};
use shared::{EquatorialFix, RefSlot};
use tracing::{debug, info};

/// Calibration progress. `Idle` means calibration mode is off; entering the mode
/// restarts the sequence at `AwaitingRef1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    Idle,
    AwaitingRef1,
    AwaitingRef2,
    Calibrated,
}

/// Side effect requested by the bridge
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeAction {
    /// Refresh the planetarium's field-of-view indicator
    RequestFieldOfView { ra: f64, dec: f64 },
    SetReference { slot: RefSlot, fix: EquatorialFix },
    Goto(EquatorialFix),
    /// Both references are stored; the console leaves calibration mode
    CalibrationComplete,
}

/// The orchestrator's only piece of mutable state
#[derive(Debug)]
pub struct CalibrationBridge {
    state: CalibrationState,
    calibration_mode: bool,
    pending_redefine: Option<RefSlot>,
    tracking: bool,
    device_connected: bool,
    last_fix: Option<EquatorialFix>,
}

impl CalibrationBridge {
    pub fn new(start_in_calibration_mode: bool) -> Self {
        let mut bridge = Self {
            state: CalibrationState::Idle,
            calibration_mode: false,
            pending_redefine: None,
            tracking: false,
            device_connected: false,
            last_fix: None,
        };
        bridge.set_calibration_mode(start_in_calibration_mode);
        bridge
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn calibration_mode(&self) -> bool {
        self.calibration_mode
    }

    /// Most recent target, if any
    pub fn last_fix(&self) -> Option<EquatorialFix> {
        self.last_fix
    }

    /// Mount actions are only produced while a device is connected
    pub fn set_device_connected(&mut self, connected: bool) {
        self.device_connected = connected;
    }

    /// Toggle calibration mode; either way the reference sequence restarts
    pub fn set_calibration_mode(&mut self, enabled: bool) {
        self.calibration_mode = enabled;
        self.state = if enabled {
            CalibrationState::AwaitingRef1
        } else {
            CalibrationState::Idle
        };
        info!("Calibration mode {}", if enabled { "on" } else { "off" });
    }

    /// Route the next fix to `slot`, whatever the current state
    pub fn redefine_reference(&mut self, slot: RefSlot) {
        info!("Next fix redefines reference {}", slot.index());
        self.pending_redefine = Some(slot);
    }

    pub fn set_tracking(&mut self, enabled: bool) {
        self.tracking = enabled;
    }

    /// Handle raw coordinates received from the planetarium
    pub fn on_coordinates(
        &mut self,
        ra_raw: f64,
        dec_raw: f64,
        time_raw: f64,
    ) -> Vec<BridgeAction> {
        let (ra, dec) = protocol_decode_radians(ra_raw as u32, dec_raw as i32);

        let fix = match local_time_from_micros(time_raw as i64) {
            Some(time) => {
                info!("Received {}", describe_fix(ra, dec, &time));
                EquatorialFix::new(ra, dec, time_of_day_radians(&time))
            }
            None => {
                debug!("Unusable planetarium timestamp {}, using the local clock", time_raw);
                EquatorialFix::new(ra, dec, local_time_of_day_radians())
            }
        };

        self.on_fix(fix)
    }

    /// Handle a target fix
    pub fn on_fix(&mut self, fix: EquatorialFix) -> Vec<BridgeAction> {
        let mut actions = vec![BridgeAction::RequestFieldOfView {
            ra: fix.ra,
            dec: fix.dec,
        }];
        self.last_fix = Some(fix);

        if !self.device_connected {
            debug!("No device connected, fix only echoed to the planetarium");
            return actions;
        }

        if let Some(slot) = self.pending_redefine.take() {
            actions.push(BridgeAction::SetReference { slot, fix });
            return actions;
        }

        if !self.calibration_mode {
            actions.push(BridgeAction::Goto(fix));
            return actions;
        }

        match self.state {
            CalibrationState::AwaitingRef2 => {
                actions.push(BridgeAction::SetReference {
                    slot: RefSlot::Two,
                    fix,
                });
                actions.push(BridgeAction::CalibrationComplete);
                self.state = CalibrationState::Calibrated;
                self.calibration_mode = false;
                info!("Calibration complete");
            }
            _ => {
                actions.push(BridgeAction::SetReference {
                    slot: RefSlot::One,
                    fix,
                });
                self.state = CalibrationState::AwaitingRef2;
            }
        }
        actions
    }

    /// The mount reported where it points; mirror it on the planetarium
    pub fn on_equatorial_position(&self, ra: f64, dec: f64) -> Vec<BridgeAction> {
        vec![BridgeAction::RequestFieldOfView { ra, dec }]
    }

    /// Periodic tracking refresh: re-point at the last target for the current time
    pub fn on_tracking_tick(&self, time: f64) -> Vec<BridgeAction> {
        match self.last_fix {
            Some(fix) if self.tracking && self.device_connected => {
                vec![BridgeAction::Goto(fix.at_time(time))]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(calibration: bool) -> CalibrationBridge {
        let mut bridge = CalibrationBridge::new(calibration);
        bridge.set_device_connected(true);
        bridge
    }

    fn fix(ra: f64) -> EquatorialFix {
        EquatorialFix::new(ra, 0.25, 1.0)
    }

    fn mount_actions(actions: Vec<BridgeAction>) -> Vec<BridgeAction> {
        actions
            .into_iter()
            .filter(|a| !matches!(a, BridgeAction::RequestFieldOfView { .. }))
            .collect()
    }

    #[test]
    fn test_calibration_sequence_then_goto() {
        let mut bridge = connected(true);
        assert_eq!(bridge.state(), CalibrationState::AwaitingRef1);

        assert_eq!(
            mount_actions(bridge.on_fix(fix(1.0))),
            vec![BridgeAction::SetReference {
                slot: RefSlot::One,
                fix: fix(1.0)
            }]
        );
        assert_eq!(bridge.state(), CalibrationState::AwaitingRef2);

        assert_eq!(
            mount_actions(bridge.on_fix(fix(2.0))),
            vec![
                BridgeAction::SetReference {
                    slot: RefSlot::Two,
                    fix: fix(2.0)
                },
                BridgeAction::CalibrationComplete
            ]
        );
        assert_eq!(bridge.state(), CalibrationState::Calibrated);
        assert!(!bridge.calibration_mode());

        assert_eq!(
            mount_actions(bridge.on_fix(fix(3.0))),
            vec![BridgeAction::Goto(fix(3.0))]
        );
    }

    #[test]
    fn test_every_fix_refreshes_field_of_view_first() {
        let mut bridge = connected(false);
        let actions = bridge.on_fix(fix(1.5));
        assert_eq!(
            actions[0],
            BridgeAction::RequestFieldOfView { ra: 1.5, dec: 0.25 }
        );
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn test_without_device_only_field_of_view() {
        let mut bridge = CalibrationBridge::new(true);
        assert_eq!(
            bridge.on_fix(fix(1.0)),
            vec![BridgeAction::RequestFieldOfView { ra: 1.0, dec: 0.25 }]
        );
        // Nothing consumed while disconnected
        assert_eq!(bridge.state(), CalibrationState::AwaitingRef1);
        assert_eq!(bridge.last_fix(), Some(fix(1.0)));
    }

    #[test]
    fn test_redefine_overrides_once() {
        let mut bridge = connected(false);
        bridge.redefine_reference(RefSlot::Three);

        assert_eq!(
            mount_actions(bridge.on_fix(fix(1.0))),
            vec![BridgeAction::SetReference {
                slot: RefSlot::Three,
                fix: fix(1.0)
            }]
        );
        assert_eq!(
            mount_actions(bridge.on_fix(fix(2.0))),
            vec![BridgeAction::Goto(fix(2.0))]
        );
    }

    #[test]
    fn test_redefine_does_not_advance_calibration() {
        let mut bridge = connected(true);
        bridge.redefine_reference(RefSlot::Two);
        bridge.on_fix(fix(1.0));
        assert_eq!(bridge.state(), CalibrationState::AwaitingRef1);
    }

    #[test]
    fn test_toggling_mode_restarts_sequence() {
        let mut bridge = connected(true);
        bridge.on_fix(fix(1.0));
        assert_eq!(bridge.state(), CalibrationState::AwaitingRef2);

        bridge.set_calibration_mode(false);
        assert_eq!(bridge.state(), CalibrationState::Idle);
        bridge.set_calibration_mode(true);
        assert_eq!(bridge.state(), CalibrationState::AwaitingRef1);

        assert!(matches!(
            mount_actions(bridge.on_fix(fix(2.0)))[0],
            BridgeAction::SetReference {
                slot: RefSlot::One,
                ..
            }
        ));
    }

    #[test]
    fn test_tracking_reissues_last_fix() {
        let mut bridge = connected(false);
        assert!(bridge.on_tracking_tick(2.0).is_empty());

        bridge.set_tracking(true);
        assert!(bridge.on_tracking_tick(2.0).is_empty());

        bridge.on_fix(fix(1.0));
        assert_eq!(
            bridge.on_tracking_tick(2.0),
            vec![BridgeAction::Goto(EquatorialFix::new(1.0, 0.25, 2.0))]
        );

        bridge.set_tracking(false);
        assert!(bridge.on_tracking_tick(3.0).is_empty());
    }

    #[test]
    fn test_coordinates_are_decoded() {
        let mut bridge = connected(false);
        let actions = bridge.on_coordinates(2147483648.0, 0.0, 0.0);

        match &actions[..] {
            [BridgeAction::RequestFieldOfView { ra, dec }, BridgeAction::Goto(fix)] => {
                assert!((ra - std::f64::consts::PI).abs() < 1e-12);
                assert_eq!(*dec, 0.0);
                assert_eq!(fix.ra, *ra);
            }
            other => panic!("unexpected actions {:?}", other),
        }
    }
}
