//! Synth and keyboard sinks
//!
//! The router talks to the sound engine and the on-screen keyboard through
//! these traits. Implementations are called from the input path and must not
//! block for long.

use crate::error::Result;
use crate::midi::{format_hex, Message};
use crate::transport::find_port_by_substring;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace, warn};

/// Sound engine sink
pub trait Synth: Send + Sync {
    fn note_on(&self, note: u8, velocity: u8);

    fn note_off(&self, note: u8, velocity: u8);

    fn poly_key_pressure(&self, note: u8, pressure: u8);

    fn control_change(&self, controller: u8, value: u8);

    fn program_change(&self, program: u8);

    fn channel_pressure(&self, pressure: u8);

    /// 14-bit bend, 8192 is center
    fn pitch_bend(&self, value: u16);

    fn stop_all_notes(&self);
}

/// Visual keyboard sink
pub trait Keyboard: Send + Sync {
    fn note_is_on(&self, note: u8);

    fn note_is_off(&self, note: u8);

    fn release_all_keys(&self);
}

/// Synth that only traces what it receives
#[derive(Debug, Default)]
pub struct LogSynth;

impl Synth for LogSynth {
    fn note_on(&self, note: u8, velocity: u8) {
        debug!("synth: note on {} v:{}", note, velocity);
    }

    fn note_off(&self, note: u8, velocity: u8) {
        debug!("synth: note off {} v:{}", note, velocity);
    }

    fn poly_key_pressure(&self, note: u8, pressure: u8) {
        trace!("synth: poly pressure {} p:{}", note, pressure);
    }

    fn control_change(&self, controller: u8, value: u8) {
        debug!("synth: CC {} = {}", controller, value);
    }

    fn program_change(&self, program: u8) {
        info!("synth: program change {}", program);
    }

    fn channel_pressure(&self, pressure: u8) {
        trace!("synth: channel pressure {}", pressure);
    }

    fn pitch_bend(&self, value: u16) {
        trace!("synth: pitch bend {}", value);
    }

    fn stop_all_notes(&self) {
        info!("synth: stop all notes");
    }
}

/// Keyboard that tracks pressed keys
pub struct LogKeyboard {
    pressed: [AtomicBool; 128],
}

impl LogKeyboard {
    pub fn new() -> Self {
        Self {
            pressed: std::array::from_fn(|_| AtomicBool::new(false)),
        }
    }

    pub fn is_pressed(&self, note: u8) -> bool {
        self.pressed[(note & 0x7F) as usize].load(Ordering::Relaxed)
    }

    /// Currently pressed notes in ascending order
    pub fn pressed_notes(&self) -> Vec<u8> {
        (0u8..128).filter(|note| self.is_pressed(*note)).collect()
    }
}

impl Default for LogKeyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyboard for LogKeyboard {
    fn note_is_on(&self, note: u8) {
        self.pressed[(note & 0x7F) as usize].store(true, Ordering::Relaxed);
        trace!("keyboard: key {} down", note);
    }

    fn note_is_off(&self, note: u8) {
        self.pressed[(note & 0x7F) as usize].store(false, Ordering::Relaxed);
        trace!("keyboard: key {} up", note);
    }

    fn release_all_keys(&self) {
        for key in &self.pressed {
            key.store(false, Ordering::Relaxed);
        }
        debug!("keyboard: all keys released");
    }
}

/// Synth that forwards everything to a MIDI output port on a fixed channel
pub struct MidiOutputSynth {
    port_name: String,
    channel: u8,
    connection: Mutex<midir::MidiOutputConnection>,
}

impl MidiOutputSynth {
    /// Open the first output port whose name contains `port_filter`
    pub fn open(client_name: &str, port_filter: &str, channel: u8) -> Result<Self> {
        let midi_out = midir::MidiOutput::new(client_name)?;
        let (port, port_name) = find_port_by_substring(&midi_out, port_filter).ok_or_else(|| {
            crate::error::Error::MidiPort(format!("output port '{}' not found", port_filter))
        })?;

        let channel = channel & 0x0F;
        let connection = midi_out.connect(&port, &format!("{}-out", client_name))?;
        info!("Synth output opened: '{}' (channel {})", port_name, channel + 1);

        Ok(Self {
            port_name,
            channel,
            connection: Mutex::new(connection),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Encode and send one message on the configured channel
    pub fn send_message(&self, message: Message) -> Result<()> {
        let bytes = message.encode(self.channel);
        trace!("-> {} {}", self.port_name, format_hex(&bytes));
        self.connection.lock().send(&bytes)?;
        Ok(())
    }

    fn send(&self, message: Message) {
        if let Err(e) = self.send_message(message) {
            warn!("Failed to send {} to '{}': {}", message, self.port_name, e);
        }
    }
}

impl Synth for MidiOutputSynth {
    fn note_on(&self, note: u8, velocity: u8) {
        self.send(Message::NoteOn { note, velocity });
    }

    fn note_off(&self, note: u8, velocity: u8) {
        self.send(Message::NoteOff { note, velocity });
    }

    fn poly_key_pressure(&self, note: u8, pressure: u8) {
        self.send(Message::PolyphonicKeyPressure { note, pressure });
    }

    fn control_change(&self, controller: u8, value: u8) {
        self.send(Message::ControlChange { controller, value });
    }

    fn program_change(&self, program: u8) {
        self.send(Message::ProgramChange { program });
    }

    fn channel_pressure(&self, pressure: u8) {
        self.send(Message::ChannelPressure { pressure });
    }

    fn pitch_bend(&self, value: u16) {
        self.send(Message::PitchBendChange { value });
    }

    fn stop_all_notes(&self) {
        // All Sound Off, then All Notes Off
        self.send(Message::ControlChange {
            controller: 120,
            value: 0,
        });
        self.send(Message::ControlChange {
            controller: 123,
            value: 0,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyboard_tracks_keys() {
        let keyboard = LogKeyboard::new();
        keyboard.note_is_on(60);
        keyboard.note_is_on(64);
        keyboard.note_is_off(60);
        assert_eq!(keyboard.pressed_notes(), vec![64]);

        keyboard.release_all_keys();
        assert!(keyboard.pressed_notes().is_empty());
    }

    #[test]
    fn test_traits_are_object_safe() {
        let synth: Box<dyn Synth> = Box::new(LogSynth);
        synth.note_on(60, 100);
        synth.stop_all_notes();

        let keyboard: Box<dyn Keyboard> = Box::new(LogKeyboard::default());
        keyboard.note_is_on(200);
        keyboard.release_all_keys();
    }
}
