//! Router module - dispatch of decoded MIDI to the synth, keyboard and UI
//!
//! The Router owns:
//! - The 128-entry controller table (last values, allowed flags)
//! - The per-device connection policy and cached connection states
//! - The current channel filter used while decoding
//! - The action bindings and the three activity notifiers
//!
//! Packet processing is synchronous and never blocks on I/O. Settings
//! changes arrive from other threads and are published through atomics.

mod controllers;
mod dispatch;

pub use controllers::ControllerSnapshot;

#[cfg(test)]
mod tests;

use crate::action::ActionBindings;
use crate::activity::{
    ActionActivity, ActivityNotifier, ChannelActivity, ControllerActivity, Subscription,
    DEFAULT_WINDOW,
};
use crate::connection::ConnectionPolicy;
use crate::controller::ControllerTable;
use crate::midi::ChannelFilter;
use crate::settings::Settings;
use crate::synth::{Keyboard, Synth};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Central dispatcher between MIDI input and its consumers
pub struct Router {
    synth: Arc<dyn Synth>,
    keyboard: Arc<dyn Keyboard>,
    settings: Settings,
    controllers: ControllerTable,
    connections: Arc<ConnectionPolicy>,
    channel_filter: ChannelFilter,
    /// Replaced as a whole; readers clone the Arc
    bindings: RwLock<Arc<ActionBindings>>,
    controller_activity: ActivityNotifier<ControllerActivity>,
    action_activity: ActivityNotifier<ActionActivity>,
    channel_activity: ActivityNotifier<ChannelActivity>,
}

impl Router {
    /// Create a router with the default 500 ms activity window
    pub fn new(synth: Arc<dyn Synth>, keyboard: Arc<dyn Keyboard>, settings: Settings) -> Self {
        Self::with_activity_window(synth, keyboard, settings, DEFAULT_WINDOW)
    }

    /// Create a router, restoring the channel filter and controller flags
    /// from `settings`
    pub fn with_activity_window(
        synth: Arc<dyn Synth>,
        keyboard: Arc<dyn Keyboard>,
        settings: Settings,
        window: Duration,
    ) -> Self {
        let controllers = ControllerTable::new(|cc| settings.controller_allowed(cc));
        let channel_filter = ChannelFilter::new(settings.midi_channel());
        let connections = Arc::new(ConnectionPolicy::new(settings.clone()));

        let disabled = controllers.iter().filter(|c| !c.allowed()).count();
        info!(
            "Router ready: channel {}, {} controller(s) disabled",
            describe_channel(channel_filter.get()),
            disabled
        );

        Self {
            synth,
            keyboard,
            settings,
            controllers,
            connections,
            channel_filter,
            bindings: RwLock::new(Arc::new(ActionBindings::with_defaults())),
            controller_activity: ActivityNotifier::new("controllers", window),
            action_activity: ActivityNotifier::new("actions", Duration::ZERO),
            channel_activity: ActivityNotifier::new("channels", window),
        }
    }

    /// Connection policy shared with the transport
    pub fn connections(&self) -> &Arc<ConnectionPolicy> {
        &self.connections
    }

    pub fn channel_filter(&self) -> i8 {
        self.channel_filter.get()
    }

    /// Replace the channel filter (-1 = omni) and persist it.
    ///
    /// Values outside -1..=15 are logged and ignored.
    pub fn set_channel_filter(&self, channel: i8) {
        let Some(previous) = self.channel_filter.set(channel) else {
            warn!(
                "Ignoring invalid channel filter {} (keeping {})",
                channel,
                describe_channel(self.channel_filter.get())
            );
            return;
        };
        if previous != channel {
            info!(
                "Channel filter: {} -> {}",
                describe_channel(previous),
                describe_channel(channel)
            );
        }
        self.settings.set_midi_channel(channel);
    }

    pub fn action_bindings(&self) -> Arc<ActionBindings> {
        self.bindings.read().clone()
    }

    pub fn set_action_bindings(&self, bindings: ActionBindings) {
        debug!("Installing {} action binding(s)", bindings.bindings().len());
        *self.bindings.write() = Arc::new(bindings);
    }

    /// Change the throttle window of controller and channel activity
    pub fn set_activity_window(&self, window: Duration) {
        self.controller_activity.set_window(window);
        self.channel_activity.set_window(window);
    }

    pub fn monitor_controller_activity<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&ControllerActivity) + Send + Sync + 'static,
    {
        self.controller_activity.add_observer(observer)
    }

    pub fn monitor_action_activity<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&ActionActivity) + Send + Sync + 'static,
    {
        self.action_activity.add_observer(observer)
    }

    pub fn monitor_channel_activity<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&ChannelActivity) + Send + Sync + 'static,
    {
        self.channel_activity.add_observer(observer)
    }

    /// Release every key on the keyboard and silence the synth
    pub fn release_all_keys(&self) {
        self.keyboard.release_all_keys();
        self.synth.stop_all_notes();
    }
}

fn describe_channel(channel: i8) -> String {
    if channel < 0 {
        "omni".to_string()
    } else {
        format!("{}", channel + 1)
    }
}
