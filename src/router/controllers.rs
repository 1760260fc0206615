//! Controller toggles and snapshots for the UI

use super::Router;
use crate::action::ControllerAction;
use crate::controller::ControllerState;
use serde::Serialize;
use tracing::debug;

/// Point-in-time view of one controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerSnapshot {
    pub controller: u8,
    pub name: &'static str,
    pub last_value: Option<u8>,
    pub allowed: bool,
    pub actions: Vec<ControllerAction>,
}

impl Router {
    pub fn controller(&self, controller: u8) -> &ControllerState {
        self.controllers.get(controller)
    }

    /// Enable or disable a controller and persist the flag.
    ///
    /// Enabling replays the last seen value so the synth matches the UI.
    pub fn set_controller_allowed(&self, controller: u8, allowed: bool) {
        let slot = self.controllers.get(controller);
        slot.set_allowed(allowed);
        self.settings
            .set_controller_allowed(slot.identifier(), allowed);
        debug!(
            "Controller {} ({}) {}",
            slot.identifier(),
            slot.name(),
            if allowed { "enabled" } else { "disabled" }
        );

        if allowed {
            if let Some(value) = slot.last_value() {
                self.synth.control_change(slot.identifier(), value);
            }
        }
    }

    /// Snapshot of all 128 controllers
    pub fn controller_snapshots(&self) -> Vec<ControllerSnapshot> {
        let bindings = self.action_bindings();
        self.controllers
            .iter()
            .map(|slot| ControllerSnapshot {
                controller: slot.identifier(),
                name: slot.name(),
                last_value: slot.last_value(),
                allowed: slot.allowed(),
                actions: bindings
                    .for_controller(slot.identifier())
                    .map(|b| b.action)
                    .collect(),
            })
            .collect()
    }
}
