//! Per-device connection state and auto-connect policy

use crate::settings::Settings;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Opaque identifier of a MIDI source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Stable id derived from an endpoint name (32-bit FNV-1a)
    pub fn from_name(name: &str) -> Self {
        let mut hash: u32 = 0x811C_9DC5;
        for byte in name.as_bytes() {
            hash ^= *byte as u32;
            hash = hash.wrapping_mul(0x0100_0193);
        }
        DeviceId(hash)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Marks an unset 7-bit slot
const UNSET: u8 = 0xFF;

/// Live state of one device.
///
/// Each field is its own atomic cell so the input path can read while the
/// UI path writes.
#[derive(Debug)]
pub struct ConnectionState {
    fixed_velocity: AtomicU8,
    last_channel: AtomicU8,
}

impl ConnectionState {
    fn new(fixed_velocity: Option<u8>) -> Self {
        let state = Self {
            fixed_velocity: AtomicU8::new(UNSET),
            last_channel: AtomicU8::new(UNSET),
        };
        state.set_fixed_velocity(fixed_velocity);
        state
    }

    /// Velocity that replaces the packet velocity of note-on messages
    pub fn fixed_velocity(&self) -> Option<u8> {
        match self.fixed_velocity.load(Ordering::Acquire) {
            UNSET => None,
            v => Some(v),
        }
    }

    fn set_fixed_velocity(&self, velocity: Option<u8>) {
        let raw = velocity.map(|v| v & 0x7F).unwrap_or(UNSET);
        self.fixed_velocity.store(raw, Ordering::Release);
    }

    /// Last channel (0-15) a message was seen on
    pub fn last_channel(&self) -> Option<u8> {
        match self.last_channel.load(Ordering::Relaxed) {
            UNSET => None,
            ch => Some(ch),
        }
    }

    pub(crate) fn record_channel(&self, channel: u8) {
        self.last_channel.store(channel & 0x0F, Ordering::Relaxed);
    }
}

/// Decides which devices to connect and owns their cached state
pub struct ConnectionPolicy {
    settings: Settings,
    states: DashMap<DeviceId, Arc<ConnectionState>>,
}

impl ConnectionPolicy {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            states: DashMap::new(),
        }
    }

    /// State for a device, created from persisted settings on first use.
    ///
    /// Once created the state lives for the rest of the process.
    pub fn state_for(&self, device: DeviceId) -> Arc<ConnectionState> {
        if let Some(found) = self.states.get(&device) {
            return found.value().clone();
        }

        self.states
            .entry(device)
            .or_insert_with(|| {
                let fixed_velocity = self.settings.fixed_velocity(device);
                debug!(
                    "Created connection state for device {} (fixed velocity {:?})",
                    device, fixed_velocity
                );
                Arc::new(ConnectionState::new(fixed_velocity))
            })
            .value()
            .clone()
    }

    /// Per-device flag, falling back to the global default
    pub fn should_auto_connect(&self, device: DeviceId) -> bool {
        self.settings
            .device_auto_connect(device)
            .unwrap_or_else(|| self.settings.auto_connect_default())
    }

    pub fn set_auto_connect(&self, device: DeviceId, auto_connect: bool) {
        self.settings.set_device_auto_connect(device, auto_connect);
    }

    /// Persist the override and update the in-memory state if the device has one.
    ///
    /// A velocity of 0 clears the override.
    pub fn set_fixed_velocity(&self, device: DeviceId, velocity: Option<u8>) {
        let velocity = velocity.map(|v| v & 0x7F).filter(|v| *v > 0);
        // Store first: a state created after this point loads the new value,
        // one created before it is visible to the lookup below.
        self.settings.set_fixed_velocity(device, velocity);
        if let Some(state) = self.states.get(&device) {
            state.set_fixed_velocity(velocity);
        }
    }

    /// Devices that currently have cached state
    pub fn known_devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<_> = self.states.iter().map(|e| *e.key()).collect();
        devices.sort();
        devices
    }
}
