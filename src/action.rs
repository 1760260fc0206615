//! Controller-to-action bindings
//!
//! Application-level actions (favorites navigation, effect parameters) bound
//! to CC numbers. The router only reads these; the UI replaces the whole set.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Application actions a controller can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerAction {
    NextPrevFavorite,
    SelectFavorite,
    DelayToggle,
    DelayMix,
    DelayTime,
    DelayFeedback,
    DelayCutoff,
    ReverbToggle,
    ReverbMix,
    ReverbRoom,
}

impl fmt::Display for ControllerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerAction::NextPrevFavorite => "Next/Prev Favorite",
            ControllerAction::SelectFavorite => "Select Favorite",
            ControllerAction::DelayToggle => "Delay On/Off",
            ControllerAction::DelayMix => "Delay Mix",
            ControllerAction::DelayTime => "Delay Time",
            ControllerAction::DelayFeedback => "Delay Feedback",
            ControllerAction::DelayCutoff => "Delay Cutoff",
            ControllerAction::ReverbToggle => "Reverb On/Off",
            ControllerAction::ReverbMix => "Reverb Mix",
            ControllerAction::ReverbRoom => "Reverb Room",
        };
        write!(f, "{}", name)
    }
}

/// How a controller value is interpreted by an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Value maps directly onto the parameter range
    Absolute,
    /// Value is an increment around 64
    Relative,
    /// Values above 64 are "on"
    OnOff,
}

/// One action bound (or not yet bound) to a controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionBinding {
    pub action: ControllerAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ActionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<u8>,
}

impl ActionBinding {
    pub fn new(action: ControllerAction, kind: ActionKind, controller: u8) -> Self {
        Self {
            action,
            kind: Some(kind),
            controller: Some(controller & 0x7F),
        }
    }
}

/// Immutable set of bindings with a controller lookup
#[derive(Debug, Clone)]
pub struct ActionBindings {
    bindings: Vec<ActionBinding>,
    lookup: Vec<Vec<usize>>,
}

impl ActionBindings {
    /// Build the lookup. Bound actions without a kind are reported here once;
    /// the router skips them silently.
    pub fn new(bindings: Vec<ActionBinding>) -> Self {
        let mut lookup = vec![Vec::new(); crate::controller::CONTROLLER_COUNT];
        for (index, binding) in bindings.iter().enumerate() {
            if let Some(controller) = binding.controller {
                lookup[(controller & 0x7F) as usize].push(index);
                if binding.kind.is_none() {
                    warn!(
                        "Action '{}' on CC {} has no kind and will be ignored",
                        binding.action, controller
                    );
                }
            }
        }
        Self { bindings, lookup }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Out-of-the-box bindings: CC 112 steps through favorites, CC 74 selects one
    pub fn with_defaults() -> Self {
        Self::new(vec![
            ActionBinding::new(ControllerAction::NextPrevFavorite, ActionKind::Relative, 112),
            ActionBinding::new(ControllerAction::SelectFavorite, ActionKind::Absolute, 74),
        ])
    }

    /// Bindings attached to a controller, in declaration order
    pub fn for_controller(&self, controller: u8) -> impl Iterator<Item = &ActionBinding> {
        self.lookup[(controller & 0x7F) as usize]
            .iter()
            .map(move |index| &self.bindings[*index])
    }

    pub fn is_bound(&self, controller: u8) -> bool {
        !self.lookup[(controller & 0x7F) as usize].is_empty()
    }

    pub fn bindings(&self) -> &[ActionBinding] {
        &self.bindings
    }

    /// Bindings attached to a controller but missing a kind
    pub fn incomplete(&self) -> impl Iterator<Item = &ActionBinding> {
        self.bindings
            .iter()
            .filter(|b| b.controller.is_some() && b.kind.is_none())
    }
}

impl Default for ActionBindings {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let bindings = ActionBindings::with_defaults();
        let bound: Vec<_> = bindings.for_controller(112).map(|b| b.action).collect();
        assert_eq!(bound, vec![ControllerAction::NextPrevFavorite]);
        assert!(bindings.is_bound(74));
        assert!(!bindings.is_bound(7));
    }

    #[test]
    fn test_multiple_actions_per_controller() {
        let bindings = ActionBindings::new(vec![
            ActionBinding::new(ControllerAction::DelayMix, ActionKind::Absolute, 91),
            ActionBinding::new(ControllerAction::ReverbMix, ActionKind::Absolute, 91),
            ActionBinding {
                action: ControllerAction::DelayTime,
                kind: Some(ActionKind::Relative),
                controller: None,
            },
        ]);

        let bound: Vec<_> = bindings.for_controller(91).map(|b| b.action).collect();
        assert_eq!(
            bound,
            vec![ControllerAction::DelayMix, ControllerAction::ReverbMix]
        );
        assert_eq!(bindings.bindings().len(), 3);
    }

    #[test]
    fn test_binding_yaml() {
        let yaml = "- action: delay_cutoff\n  kind: relative\n  controller: 20\n- action: reverb_toggle\n";
        let parsed: Vec<ActionBinding> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            parsed[0],
            ActionBinding::new(ControllerAction::DelayCutoff, ActionKind::Relative, 20)
        );
        assert_eq!(parsed[1].kind, None);
        assert_eq!(parsed[1].controller, None);
    }

    #[test]
    fn test_incomplete_bindings() {
        let bindings = ActionBindings::new(vec![
            ActionBinding::new(ControllerAction::DelayMix, ActionKind::Absolute, 91),
            ActionBinding {
                action: ControllerAction::ReverbToggle,
                kind: None,
                controller: Some(92),
            },
            ActionBinding {
                action: ControllerAction::ReverbRoom,
                kind: None,
                controller: None,
            },
        ]);

        let incomplete: Vec<_> = bindings.incomplete().map(|b| b.action).collect();
        assert_eq!(incomplete, vec![ControllerAction::ReverbToggle]);
        assert!(bindings.is_bound(92));
    }
}
