//! MIDI message types and packet decoding
//!
//! Turns one transport packet (a contiguous byte buffer) into typed messages.
//! Decoding is deliberately tolerant: unknown status bytes are skipped one at
//! a time, truncated trailing messages are dropped, and nothing here ever
//! fails on noisy input.

use std::fmt;
use std::sync::atomic::{AtomicI8, Ordering};
use thiserror::Error;

/// Packets longer than this are treated as corrupt and abandoned.
pub const MAX_PACKET_LEN: usize = 64;

/// Channel filter value that accepts every channel.
pub const OMNI: i8 = -1;

/// Center position of a 14-bit pitch bend.
pub const PITCH_BEND_CENTER: u16 = 8192;

/// MIDI 1.0 messages of interest to the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Note Off: note (0-127), release velocity (0-127)
    NoteOff { note: u8, velocity: u8 },

    /// Note On: note (0-127), velocity (0-127)
    NoteOn { note: u8, velocity: u8 },

    /// Polyphonic Key Pressure: note (0-127), pressure (0-127)
    PolyphonicKeyPressure { note: u8, pressure: u8 },

    /// Control Change: controller (0-127), value (0-127)
    ControlChange { controller: u8, value: u8 },

    /// Program Change: program (0-127)
    ProgramChange { program: u8 },

    /// Channel Pressure: pressure (0-127)
    ChannelPressure { pressure: u8 },

    /// Pitch Bend: value (0-16383, 14-bit)
    PitchBendChange { value: u16 },

    /// MIDI Time Code Quarter Frame
    TimeCode { data: u8 },

    /// Song Position Pointer
    SongPosition { position: u16 },

    /// Song Select
    SongSelect { song: u8 },

    TuneRequest,
    TimingClock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    SystemReset,
}

/// Status commands recognized by the decoder.
///
/// Channel commands are keyed by their top nibble; system commands by the
/// full status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    NoteOff,
    NoteOn,
    PolyphonicKeyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBendChange,
    SystemExclusive,
    TimeCode,
    SongPosition,
    SongSelect,
    TuneRequest,
    EndSystemExclusive,
    TimingClock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    SystemReset,
}

impl Command {
    fn from_status(status: u8) -> Option<Self> {
        if status & 0xF0 == 0xF0 {
            return match status {
                0xF0 => Some(Command::SystemExclusive),
                0xF1 => Some(Command::TimeCode),
                0xF2 => Some(Command::SongPosition),
                0xF3 => Some(Command::SongSelect),
                0xF6 => Some(Command::TuneRequest),
                0xF7 => Some(Command::EndSystemExclusive),
                0xF8 => Some(Command::TimingClock),
                0xFA => Some(Command::Start),
                0xFB => Some(Command::Continue),
                0xFC => Some(Command::Stop),
                0xFE => Some(Command::ActiveSensing),
                0xFF => Some(Command::SystemReset),
                _ => None,
            };
        }

        match status & 0xF0 {
            0x80 => Some(Command::NoteOff),
            0x90 => Some(Command::NoteOn),
            0xA0 => Some(Command::PolyphonicKeyPressure),
            0xB0 => Some(Command::ControlChange),
            0xC0 => Some(Command::ProgramChange),
            0xD0 => Some(Command::ChannelPressure),
            0xE0 => Some(Command::PitchBendChange),
            // Data bytes (0x00-0x7F) are not commands
            _ => None,
        }
    }

    /// Number of data bytes following the status byte
    fn payload_len(self) -> usize {
        match self {
            Command::NoteOff
            | Command::NoteOn
            | Command::PolyphonicKeyPressure
            | Command::ControlChange
            | Command::PitchBendChange
            | Command::SongPosition => 2,
            Command::ProgramChange
            | Command::ChannelPressure
            | Command::TimeCode
            | Command::SongSelect => 1,
            _ => 0,
        }
    }

    fn has_channel(self) -> bool {
        matches!(
            self,
            Command::NoteOff
                | Command::NoteOn
                | Command::PolyphonicKeyPressure
                | Command::ControlChange
                | Command::ProgramChange
                | Command::ChannelPressure
                | Command::PitchBendChange
        )
    }

    fn build(self, payload: &[u8]) -> Option<Message> {
        let d1 = payload.first().map(|b| b & 0x7F).unwrap_or(0);
        let d2 = payload.get(1).map(|b| b & 0x7F).unwrap_or(0);
        let d14 = ((d2 as u16) << 7) | d1 as u16;

        let message = match self {
            Command::NoteOff => Message::NoteOff { note: d1, velocity: d2 },
            Command::NoteOn => Message::NoteOn { note: d1, velocity: d2 },
            Command::PolyphonicKeyPressure => Message::PolyphonicKeyPressure {
                note: d1,
                pressure: d2,
            },
            Command::ControlChange => Message::ControlChange {
                controller: d1,
                value: d2,
            },
            Command::ProgramChange => Message::ProgramChange { program: d1 },
            Command::ChannelPressure => Message::ChannelPressure { pressure: d1 },
            Command::PitchBendChange => Message::PitchBendChange { value: d14 },
            Command::TimeCode => Message::TimeCode { data: d1 },
            Command::SongPosition => Message::SongPosition { position: d14 },
            Command::SongSelect => Message::SongSelect { song: d1 },
            Command::TuneRequest => Message::TuneRequest,
            Command::TimingClock => Message::TimingClock,
            Command::Start => Message::Start,
            Command::Continue => Message::Continue,
            Command::Stop => Message::Stop,
            Command::ActiveSensing => Message::ActiveSensing,
            Command::SystemReset => Message::SystemReset,
            // SysEx framing bytes are consumed; their contents are skipped as
            // unrecognized data bytes.
            Command::SystemExclusive | Command::EndSystemExclusive => return None,
        };
        Some(message)
    }
}

/// Reasons a whole packet is abandoned before decoding
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    #[error("empty MIDI packet")]
    Empty,

    #[error("suspect MIDI packet size {0} (max 64)")]
    Oversized(usize),
}

/// One packet delivered by the transport
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    /// Transport timestamp (monotonic, transport-defined units)
    pub timestamp: u64,
    pub data: &'a [u8],
}

impl<'a> Packet<'a> {
    pub fn new(timestamp: u64, data: &'a [u8]) -> Self {
        Self { timestamp, data }
    }

    /// Decode this packet with the given channel filter
    pub fn decode(&self, channel_filter: i8) -> Result<Decoder<'a>, PacketError> {
        Decoder::new(self.data, channel_filter)
    }
}

/// A decoded message with the channel it arrived on (None for system messages)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub channel: Option<u8>,
    pub message: Message,
}

/// Lazy decoder over a single packet.
///
/// Cloning a decoder before iterating gives an independent restart point.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    data: &'a [u8],
    index: usize,
    channel_filter: i8,
}

impl<'a> Decoder<'a> {
    /// Create a decoder for one packet.
    ///
    /// Empty and oversized packets are rejected as a whole.
    pub fn new(data: &'a [u8], channel_filter: i8) -> Result<Self, PacketError> {
        if data.is_empty() {
            return Err(PacketError::Empty);
        }
        if data.len() > MAX_PACKET_LEN {
            return Err(PacketError::Oversized(data.len()));
        }
        Ok(Self {
            data,
            index: 0,
            channel_filter,
        })
    }

    /// Iterate over messages only, dropping channel information
    pub fn messages(self) -> impl Iterator<Item = Message> + 'a {
        self.map(|decoded| decoded.message)
    }

    fn available(&self) -> usize {
        self.data.len().saturating_sub(self.index)
    }

    fn consume(&mut self, amount: usize) {
        self.index += amount.min(self.available());
    }
}

impl Iterator for Decoder<'_> {
    type Item = Decoded;

    fn next(&mut self) -> Option<Decoded> {
        while self.available() > 0 {
            let status = self.data[self.index];
            self.consume(1);

            let Some(command) = Command::from_status(status) else {
                // Resynchronize on the next byte
                continue;
            };

            let needed = command.payload_len();
            if needed > self.available() {
                // Truncated trailing message
                self.consume(self.available());
                return None;
            }

            let payload = &self.data[self.index..self.index + needed];
            self.consume(needed);

            let channel = command.has_channel().then_some(status & 0x0F);
            if let Some(ch) = channel {
                // Note-off passes any filter so a filter change cannot leave
                // notes hanging
                if command != Command::NoteOff && !channel_matches(self.channel_filter, ch) {
                    continue;
                }
            }

            if let Some(message) = command.build(payload) {
                return Some(Decoded { channel, message });
            }
        }
        None
    }
}

/// True if a message on `channel` passes `filter` (-1 = omni)
pub fn channel_matches(filter: i8, channel: u8) -> bool {
    filter < 0 || filter as u8 == channel
}

/// Decode a byte buffer into messages, treating a rejected packet as empty
pub fn decode(data: &[u8], channel_filter: i8) -> Vec<Message> {
    Decoder::new(data, channel_filter)
        .map(|decoder| decoder.messages().collect())
        .unwrap_or_default()
}

/// Current channel filter, shared between the settings path and decoding.
///
/// Holds -1 (omni) or a channel in 0..=15 as a single atomically replaced
/// value.
#[derive(Debug)]
pub struct ChannelFilter(AtomicI8);

impl ChannelFilter {
    /// Out-of-range values start as omni
    pub fn new(value: i8) -> Self {
        let value = if Self::is_valid(value) { value } else { OMNI };
        Self(AtomicI8::new(value))
    }

    pub fn get(&self) -> i8 {
        self.0.load(Ordering::Acquire)
    }

    /// Replace the filter, returning the previous value.
    ///
    /// An out-of-range value is rejected and the filter is left unchanged.
    pub fn set(&self, value: i8) -> Option<i8> {
        Self::is_valid(value).then(|| self.0.swap(value, Ordering::AcqRel))
    }

    pub fn is_omni(&self) -> bool {
        self.get() < 0
    }

    pub fn is_valid(value: i8) -> bool {
        value == OMNI || (0..=15).contains(&value)
    }
}

impl Default for ChannelFilter {
    fn default() -> Self {
        Self::new(OMNI)
    }
}

impl Message {
    /// Encode the message to MIDI bytes on the given channel (0-15)
    pub fn encode(&self, channel: u8) -> Vec<u8> {
        let ch = channel & 0x0F;
        match *self {
            Message::NoteOff { note, velocity } => vec![0x80 | ch, note & 0x7F, velocity & 0x7F],
            Message::NoteOn { note, velocity } => vec![0x90 | ch, note & 0x7F, velocity & 0x7F],
            Message::PolyphonicKeyPressure { note, pressure } => {
                vec![0xA0 | ch, note & 0x7F, pressure & 0x7F]
            }
            Message::ControlChange { controller, value } => {
                vec![0xB0 | ch, controller & 0x7F, value & 0x7F]
            }
            Message::ProgramChange { program } => vec![0xC0 | ch, program & 0x7F],
            Message::ChannelPressure { pressure } => vec![0xD0 | ch, pressure & 0x7F],
            Message::PitchBendChange { value } => {
                vec![0xE0 | ch, (value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8]
            }
            Message::TimeCode { data } => vec![0xF1, data & 0x7F],
            Message::SongPosition { position } => {
                vec![0xF2, (position & 0x7F) as u8, ((position >> 7) & 0x7F) as u8]
            }
            Message::SongSelect { song } => vec![0xF3, song & 0x7F],
            Message::TuneRequest => vec![0xF6],
            Message::TimingClock => vec![0xF8],
            Message::Start => vec![0xFA],
            Message::Continue => vec![0xFB],
            Message::Stop => vec![0xFC],
            Message::ActiveSensing => vec![0xFE],
            Message::SystemReset => vec![0xFF],
        }
    }

    /// Check if this is a channel voice message
    pub fn is_channel_message(&self) -> bool {
        matches!(
            self,
            Message::NoteOff { .. }
                | Message::NoteOn { .. }
                | Message::PolyphonicKeyPressure { .. }
                | Message::ControlChange { .. }
                | Message::ProgramChange { .. }
                | Message::ChannelPressure { .. }
                | Message::PitchBendChange { .. }
        )
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Message::NoteOff { note, velocity } => write!(f, "NoteOff n:{} v:{}", note, velocity),
            Message::NoteOn { note, velocity } => write!(f, "NoteOn n:{} v:{}", note, velocity),
            Message::PolyphonicKeyPressure { note, pressure } => {
                write!(f, "PolyPressure n:{} p:{}", note, pressure)
            }
            Message::ControlChange { controller, value } => {
                write!(f, "CC cc:{} v:{}", controller, value)
            }
            Message::ProgramChange { program } => write!(f, "ProgramChange p:{}", program),
            Message::ChannelPressure { pressure } => write!(f, "ChannelPressure p:{}", pressure),
            Message::PitchBendChange { value } => write!(f, "PitchBend v:{}", value),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl fmt::Display for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channel {
            Some(ch) => write!(f, "ch:{} {}", ch + 1, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
