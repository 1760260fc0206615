//! Per-message reaction table

use super::Router;
use crate::activity::{ActionActivity, ChannelActivity, ControllerActivity};
use crate::connection::DeviceId;
use crate::midi::{Decoded, Message, Packet};
use tracing::{trace, warn};

impl Router {
    /// Process a packet list from one device in arrival order
    pub fn process_packets(&self, device: DeviceId, packets: &[Packet<'_>]) {
        for packet in packets {
            self.process_packet(device, packet);
        }
    }

    /// Decode one packet with the current channel filter and route its
    /// messages. A rejected packet is logged and dropped.
    pub fn process_packet(&self, device: DeviceId, packet: &Packet<'_>) {
        let filter = self.channel_filter.get();
        match packet.decode(filter) {
            Ok(decoder) => {
                for decoded in decoder {
                    self.route(device, decoded);
                }
            }
            Err(e) => warn!("Dropping packet from device {}: {}", device, e),
        }
    }

    /// Apply one decoded message
    pub fn route(&self, device: DeviceId, decoded: Decoded) {
        let state = self.connections.state_for(device);

        if let Some(channel) = decoded.channel {
            state.record_channel(channel);
            self.channel_activity.post(ChannelActivity { device, channel });
        }

        match decoded.message {
            // The override wins over any velocity byte, 0 included
            Message::NoteOn { note, velocity } => {
                let velocity = state.fixed_velocity().unwrap_or(velocity);
                self.synth.note_on(note, velocity);
                self.keyboard.note_is_on(note);
            }
            Message::NoteOff { note, velocity } => {
                self.synth.note_off(note, velocity);
                self.keyboard.note_is_off(note);
            }
            Message::ControlChange { controller, value } => {
                self.control_change(device, decoded.channel.unwrap_or(0), controller, value);
            }
            Message::ProgramChange { program } => self.synth.program_change(program),
            Message::ChannelPressure { pressure } => self.synth.channel_pressure(pressure),
            Message::PitchBendChange { value } => self.synth.pitch_bend(value),
            Message::PolyphonicKeyPressure { note, pressure } => {
                self.synth.poly_key_pressure(note, pressure)
            }
            Message::SystemReset => self.synth.stop_all_notes(),
            other => trace!("Ignoring {} from device {}", other, device),
        }
    }

    fn control_change(&self, device: DeviceId, channel: u8, controller: u8, value: u8) {
        let slot = self.controllers.get(controller);
        slot.record_value(value);

        self.controller_activity.post(ControllerActivity {
            device,
            channel,
            controller,
            value,
        });

        if !slot.allowed() {
            trace!("CC {} = {} recorded, controller disabled", controller, value);
            return;
        }

        let bindings = self.bindings.read().clone();
        for binding in bindings.for_controller(controller) {
            match binding.kind {
                Some(kind) => {
                    self.action_activity.post(ActionActivity {
                        action: binding.action,
                        kind,
                        value,
                    });
                }
                None => trace!("Action '{}' on CC {} has no kind", binding.action, controller),
            }
        }

        self.synth.control_change(controller, value);
    }
}
