//! Persisted settings
//!
//! A string-keyed store of JSON values with two backends: an in-memory map
//! and a sled tree. `Settings` layers the key scheme and typed accessors on
//! top so no caller builds keys by hand.

use crate::connection::DeviceId;
use crate::error::Result;
use dashmap::DashMap;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key for the global channel filter (-1 = omni)
pub const MIDI_CHANNEL_KEY: &str = "midiChannel";

/// Key for the global auto-connect default applied to unseen devices
pub const AUTO_CONNECT_DEFAULT_KEY: &str = "autoConnectNewDevices";

/// Sled tree holding all settings
const SETTINGS_TREE: &str = "settings";

/// String-keyed get/set store
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

/// Volatile store, used in tests and when no database could be opened
#[derive(Default)]
pub struct MemorySettings {
    values: DashMap<String, Value>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// Sled-backed store; values are JSON-encoded
pub struct SledSettings {
    tree: sled::Tree,
}

impl SledSettings {
    /// Open (or create) the settings database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        let settings = Self::new(&db)?;
        info!(
            "Opened settings store at {} ({} keys)",
            path.as_ref().display(),
            settings.tree.len()
        );
        Ok(settings)
    }

    pub fn new(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            tree: db.open_tree(SETTINGS_TREE)?,
        })
    }
}

impl SettingsStore for SledSettings {
    fn get(&self, key: &str) -> Option<Value> {
        match self.tree.get(key.as_bytes()) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Ignoring unreadable setting '{}': {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read setting '{}' from sled: {}", key, e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let bytes = serde_json::to_vec(&value)?;
        self.tree.insert(key.as_bytes(), bytes)?;
        self.tree.flush()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.tree.remove(key.as_bytes())?;
        self.tree.flush()?;
        Ok(())
    }
}

/// Typed facade over a `SettingsStore`
#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn SettingsStore>,
}

impl Settings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Settings held only in memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySettings::new()))
    }

    /// Global channel filter; out-of-range stored values read as omni
    pub fn midi_channel(&self) -> i8 {
        self.get_i64(MIDI_CHANNEL_KEY)
            .filter(|ch| (0..=15).contains(ch))
            .map(|ch| ch as i8)
            .unwrap_or(crate::midi::OMNI)
    }

    pub fn set_midi_channel(&self, channel: i8) {
        self.persist(MIDI_CHANNEL_KEY, Value::from(channel));
    }

    pub fn auto_connect_default(&self) -> bool {
        self.get_bool(AUTO_CONNECT_DEFAULT_KEY).unwrap_or(true)
    }

    pub fn set_auto_connect_default(&self, enabled: bool) {
        self.persist(AUTO_CONNECT_DEFAULT_KEY, Value::from(enabled));
    }

    /// Per-device auto-connect flag, if one was ever stored
    pub fn device_auto_connect(&self, device: DeviceId) -> Option<bool> {
        self.get_bool(&auto_connect_key(device))
    }

    pub fn set_device_auto_connect(&self, device: DeviceId, enabled: bool) {
        self.persist(&auto_connect_key(device), Value::from(enabled));
    }

    /// Per-device fixed velocity.
    ///
    /// Older stores wrote 128 to mean "no override"; that and any other value
    /// outside 1..=127 reads back as `None`.
    pub fn fixed_velocity(&self, device: DeviceId) -> Option<u8> {
        self.get_i64(&fixed_velocity_key(device))
            .filter(|v| (1..=127).contains(v))
            .map(|v| v as u8)
    }

    pub fn set_fixed_velocity(&self, device: DeviceId, velocity: Option<u8>) {
        let key = fixed_velocity_key(device);
        match velocity {
            Some(v) => self.persist(&key, Value::from(v)),
            None => {
                if let Err(e) = self.store.remove(&key) {
                    warn!("Failed to clear setting '{}': {}", key, e);
                }
            }
        }
    }

    /// Whether a controller may affect the synth (default true)
    pub fn controller_allowed(&self, controller: u8) -> bool {
        self.get_bool(&controller_allowed_key(controller))
            .unwrap_or(true)
    }

    pub fn set_controller_allowed(&self, controller: u8, allowed: bool) {
        self.persist(&controller_allowed_key(controller), Value::from(allowed));
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.store.get(key).and_then(|v| v.as_bool())
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.store.get(key).and_then(|v| v.as_i64())
    }

    /// Write a value; a failed write is logged and otherwise ignored
    fn persist(&self, key: &str, value: Value) {
        debug!("Setting {} = {}", key, value);
        if let Err(e) = self.store.set(key, value) {
            warn!("Failed to persist setting '{}': {}", key, e);
        }
    }
}

fn auto_connect_key(device: DeviceId) -> String {
    format!("midiAutoConnect_{}", device)
}

fn fixed_velocity_key(device: DeviceId) -> String {
    format!("fixedVelocity_{}", device)
}

fn controller_allowed_key(controller: u8) -> String {
    format!("controllerAllowed{}", controller)
}
