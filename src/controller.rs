//! Continuous-controller state table
//!
//! One slot per CC number (0-127), created once and never destroyed. Each slot
//! is independently synchronized: the input path records values while the UI
//! path toggles the allowed flag.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Number of MIDI continuous controllers
pub const CONTROLLER_COUNT: usize = 128;

const NO_VALUE: u8 = 0xFF;

/// State of one continuous controller
#[derive(Debug)]
pub struct ControllerState {
    identifier: u8,
    name: &'static str,
    last_value: AtomicU8,
    allowed: AtomicBool,
}

impl ControllerState {
    fn new(identifier: u8, allowed: bool) -> Self {
        Self {
            identifier,
            name: controller_name(identifier),
            last_value: AtomicU8::new(NO_VALUE),
            allowed: AtomicBool::new(allowed),
        }
    }

    pub fn identifier(&self) -> u8 {
        self.identifier
    }

    /// Standard name of the controller, empty if it has none
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn last_value(&self) -> Option<u8> {
        match self.last_value.load(Ordering::Acquire) {
            NO_VALUE => None,
            v => Some(v),
        }
    }

    pub(crate) fn record_value(&self, value: u8) {
        self.last_value.store(value & 0x7F, Ordering::Release);
    }

    /// Whether changes of this controller reach the synth
    pub fn allowed(&self) -> bool {
        self.allowed.load(Ordering::Acquire)
    }

    pub(crate) fn set_allowed(&self, allowed: bool) {
        self.allowed.store(allowed, Ordering::Release);
    }
}

/// The full 128-entry controller table
#[derive(Debug)]
pub struct ControllerTable {
    slots: Vec<ControllerState>,
}

impl ControllerTable {
    /// Build the table, asking `allowed` for each controller's initial flag
    pub fn new(allowed: impl Fn(u8) -> bool) -> Self {
        let slots = (0..CONTROLLER_COUNT as u8)
            .map(|cc| ControllerState::new(cc, allowed(cc)))
            .collect();
        Self { slots }
    }

    /// Slot for a controller; numbers are masked to 0-127
    pub fn get(&self, controller: u8) -> &ControllerState {
        &self.slots[(controller & 0x7F) as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ControllerState> {
        self.slots.iter()
    }
}

impl Default for ControllerTable {
    fn default() -> Self {
        Self::new(|_| true)
    }
}

/// Standard MIDI CC names
pub fn controller_name(controller: u8) -> &'static str {
    match controller {
        0 => "Bank Select",
        1 => "Modulation Wheel",
        2 => "Breath Controller",
        4 => "Foot Pedal",
        5 => "Portamento Time",
        7 => "Volume",
        8 => "Balance",
        10 => "Pan",
        11 => "Expression",
        12 => "Effect Controller 1",
        13 => "Effect Controller 2",
        64 => "Damper Pedal",
        65 => "Portamento Switch",
        66 => "Sostenuto Pedal",
        67 => "Soft Pedal",
        68 => "Legato Switch",
        69 => "Hold 2",
        70 => "Sound Controller 1",
        71 => "Sound Controller 2",
        72 => "Sound Controller 3",
        73 => "Sound Controller 4",
        74 => "Sound Controller 5",
        75 => "Sound Controller 6",
        76 => "Sound Controller 7",
        77 => "Sound Controller 8",
        78 => "Sound Controller 9",
        79 => "Sound Controller 10",
        84 => "Portamento Amount",
        91 => "Effect 1 Depth",
        92 => "Effect 2 Depth",
        93 => "Effect 3 Depth",
        94 => "Effect 4 Depth",
        95 => "Effect 5 Depth",
        120 => "All Sound Off",
        121 => "Reset All Controllers",
        122 => "Local On/Off",
        123 => "All Notes Off",
        124 => "Omni Mode Off",
        125 => "Omni Mode On",
        126 => "Mono Mode",
        127 => "Poly Mode",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_has_all_controllers() {
        let table = ControllerTable::default();
        assert_eq!(table.iter().count(), 128);
        for (index, state) in table.iter().enumerate() {
            assert_eq!(state.identifier() as usize, index);
            assert!(state.allowed());
            assert_eq!(state.last_value(), None);
        }
    }

    #[test]
    fn test_names() {
        let table = ControllerTable::default();
        assert_eq!(table.get(1).name(), "Modulation Wheel");
        assert_eq!(table.get(64).name(), "Damper Pedal");
        assert_eq!(table.get(3).name(), "");
    }

    #[test]
    fn test_initial_allowed_flags() {
        let table = ControllerTable::new(|cc| cc != 64);
        assert!(!table.get(64).allowed());
        assert!(table.get(63).allowed());
    }

    #[test]
    fn test_record_value() {
        let table = ControllerTable::default();
        table.get(7).record_value(100);
        assert_eq!(table.get(7).last_value(), Some(100));
        table.get(7).set_allowed(false);
        assert!(!table.get(7).allowed());
        assert_eq!(table.get(7).last_value(), Some(100));
    }
}
