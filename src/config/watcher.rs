//! Configuration file watcher for hot-reload support
//!
//! The watcher observes the config file's directory so editors that save by
//! rename are picked up. Bursts of events are coalesced into one reload, and
//! a reload that changes nothing is not reported.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Quiet period after the last file event before reloading
const SETTLE_DELAY: Duration = Duration::from_millis(150);

/// Which parts of the running system a new config affects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigChanges {
    /// Channel filter, auto-connect default, bindings or activity window
    pub routing: bool,
    pub scan_interval: bool,
    /// Client name or synth output; only read at startup
    pub restart_required: bool,
}

impl ConfigChanges {
    pub fn between(old: &AppConfig, new: &AppConfig) -> Self {
        Self {
            routing: old.midi.channel != new.midi.channel
                || old.midi.auto_connect_new_devices != new.midi.auto_connect_new_devices
                || old.bindings != new.bindings
                || old.activity != new.activity,
            scan_interval: old.midi.scan_interval_ms != new.midi.scan_interval_ms,
            restart_required: old.midi.client_name != new.midi.client_name
                || old.midi.output_port != new.midi.output_port
                || old.midi.output_channel != new.midi.output_channel,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A reloaded configuration and what changed since the previous one
#[derive(Debug, Clone)]
pub struct ConfigUpdate {
    pub config: AppConfig,
    pub changes: ConfigChanges,
}

struct ReloadState {
    path: String,
    generation: AtomicU64,
    current: Mutex<AppConfig>,
    tx: mpsc::Sender<ConfigUpdate>,
}

impl ReloadState {
    async fn reload(&self, generation: u64) {
        tokio::time::sleep(SETTLE_DELAY).await;
        if self.generation.load(Ordering::Acquire) != generation {
            // A later event will do the reload
            return;
        }

        let config = match AppConfig::load(&self.path).await {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to reload config (keeping old config): {:#}", e);
                return;
            }
        };

        let changes = {
            let mut current = self.current.lock();
            let changes = ConfigChanges::between(&current, &config);
            if changes.is_empty() {
                debug!("Config file touched without changes");
                return;
            }
            *current = config.clone();
            changes
        };

        info!("Configuration reloaded ({:?})", changes);
        if let Err(e) = self.tx.send(ConfigUpdate { config, changes }).await {
            error!("Failed to send config update: {}", e);
        }
    }
}

/// Config watcher that monitors file changes and sends reload notifications
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<ConfigUpdate>,
}

impl ConfigWatcher {
    /// Load the config at `config_path` and start watching it
    pub async fn new(config_path: String) -> Result<(Self, Arc<AppConfig>)> {
        let (tx, rx) = mpsc::channel(10);

        let initial_config = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        let (watch_dir, file_name) = split_watch_target(&config_path)?;
        let state = Arc::new(ReloadState {
            path: config_path.clone(),
            generation: AtomicU64::new(0),
            current: Mutex::new(initial_config.clone()),
            tx,
        });

        // notify callbacks run on their own OS thread
        let runtime_handle = tokio::runtime::Handle::current();
        let callback_state = state.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) if touches(&event, &file_name) => {
                    debug!("Config file event: {:?}", event.kind);
                    let generation = callback_state.generation.fetch_add(1, Ordering::AcqRel) + 1;
                    let state = callback_state.clone();
                    runtime_handle.spawn(async move { state.reload(generation).await });
                }
                Ok(_) => {}
                Err(e) => error!("Watch error: {}", e),
            }
        })?;

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory: {}", watch_dir.display()))?;

        info!("Watching {} for changes", config_path);

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            Arc::new(initial_config),
        ))
    }

    /// Wait for the next effective config change.
    /// Returns None if the watcher has been closed.
    pub async fn next_update(&mut self) -> Option<ConfigUpdate> {
        self.rx.recv().await
    }
}

fn split_watch_target(config_path: &str) -> Result<(PathBuf, OsString)> {
    let path = Path::new(config_path);
    let file_name = path
        .file_name()
        .with_context(|| format!("Config path has no file name: {}", config_path))?
        .to_os_string();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file_name))
}

fn touches(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}
