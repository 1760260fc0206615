//! Throttled activity notifications
//!
//! Bridges the real-time input path to UI observers. `post` applies a
//! per-(device, channel) throttle and enqueues without blocking; a dedicated
//! delivery thread invokes the registered observers.

use crate::action::{ActionKind, ControllerAction};
use crate::connection::DeviceId;
use crossbeam::channel::{self, Sender, TrySendError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Default coalescing window for throttled activity
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(500);

/// Pending deliveries beyond this are dropped
const QUEUE_CAPACITY: usize = 1024;

/// Observer callback type
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Key used to coalesce bursts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    pub device: DeviceId,
    pub channel: u8,
}

/// An event that can travel through an `ActivityNotifier`
pub trait Activity: Clone + Send + 'static {
    /// Throttle key, or None to deliver every event
    fn throttle_key(&self) -> Option<ThrottleKey>;
}

/// A controller value was seen on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerActivity {
    pub device: DeviceId,
    pub channel: u8,
    pub controller: u8,
    pub value: u8,
}

impl Activity for ControllerActivity {
    fn throttle_key(&self) -> Option<ThrottleKey> {
        Some(ThrottleKey {
            device: self.device,
            channel: self.channel,
        })
    }
}

/// A bound action was triggered by a controller value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionActivity {
    pub action: ControllerAction,
    pub kind: ActionKind,
    pub value: u8,
}

impl ActionActivity {
    /// Value scaled to 0.0..=1.0 for absolute actions
    pub fn fraction(&self) -> f32 {
        self.value as f32 / 127.0
    }

    /// Signed step around 64 for relative actions
    pub fn relative_delta(&self) -> i16 {
        self.value as i16 - 64
    }

    /// Switch state for on/off actions
    pub fn is_on(&self) -> bool {
        self.value > 64
    }
}

impl Activity for ActionActivity {
    fn throttle_key(&self) -> Option<ThrottleKey> {
        None
    }
}

/// Traffic was seen from a device on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelActivity {
    pub device: DeviceId,
    pub channel: u8,
}

impl Activity for ChannelActivity {
    fn throttle_key(&self) -> Option<ThrottleKey> {
        Some(ThrottleKey {
            device: self.device,
            channel: self.channel,
        })
    }
}

struct Registry<T> {
    next_id: AtomicU64,
    observers: RwLock<Vec<(u64, Callback<T>)>>,
}

impl<T> Registry<T> {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            observers: RwLock::new(Vec::new()),
        }
    }

    fn add(&self, callback: Callback<T>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().push((id, callback));
        id
    }

    fn remove(&self, id: u64) {
        self.observers.write().retain(|(existing, _)| *existing != id);
    }

    fn deliver(&self, event: &T) {
        // Call outside the lock so observers may unsubscribe from a callback
        let observers: Vec<Callback<T>> = self
            .observers
            .read()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for observer in observers {
            observer(event);
        }
    }

    fn len(&self) -> usize {
        self.observers.read().len()
    }
}

/// Handle that deregisters its observer when dropped
#[must_use = "dropping a Subscription deregisters the observer"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Deregister now
    pub fn cancel(self) {}

    /// Keep the observer registered for the notifier's lifetime
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Throttling fan-out of activity events to observers
pub struct ActivityNotifier<T: Activity> {
    name: String,
    window_ms: AtomicU64,
    last_delivered: DashMap<ThrottleKey, Instant>,
    tx: Sender<T>,
    registry: Arc<Registry<T>>,
}

impl<T: Activity> ActivityNotifier<T> {
    /// Create a notifier and start its delivery thread
    pub fn new(name: &str, window: Duration) -> Self {
        let (tx, rx) = channel::bounded::<T>(QUEUE_CAPACITY);
        let registry = Arc::new(Registry::new());

        let delivery = registry.clone();
        let spawned = thread::Builder::new()
            .name(format!("activity-{}", name))
            .spawn(move || {
                while let Ok(event) = rx.recv() {
                    delivery.deliver(&event);
                }
                trace!("Activity delivery thread exiting");
            });
        if let Err(e) = spawned {
            error!("Failed to start '{}' activity delivery thread: {}", name, e);
        }

        Self {
            name: name.to_string(),
            window_ms: AtomicU64::new(window.as_millis() as u64),
            last_delivered: DashMap::new(),
            tx,
            registry,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms.load(Ordering::Relaxed))
    }

    pub fn set_window(&self, window: Duration) {
        self.window_ms
            .store(window.as_millis() as u64, Ordering::Relaxed);
        debug!("'{}' activity window set to {:?}", self.name, window);
    }

    /// Queue an event for delivery. Never blocks.
    ///
    /// Returns false if the event was throttled or the queue was full.
    pub fn post(&self, event: T) -> bool {
        self.post_at(event, Instant::now())
    }

    /// `post` with an explicit arrival time
    pub fn post_at(&self, event: T, now: Instant) -> bool {
        let Some(key) = event.throttle_key() else {
            return self.send(event);
        };

        // The window only restarts once the event is actually queued
        let window = self.window();
        match self.last_delivered.entry(key) {
            Entry::Occupied(mut last) => {
                if now.saturating_duration_since(*last.get()) < window {
                    return false;
                }
                let sent = self.send(event);
                if sent {
                    last.insert(now);
                }
                sent
            }
            Entry::Vacant(slot) => {
                let sent = self.send(event);
                if sent {
                    slot.insert(now);
                }
                sent
            }
        }
    }

    fn send(&self, event: T) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("'{}' activity queue full, dropping event", self.name);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Register an observer, invoked on the delivery thread for every
    /// delivered event
    pub fn add_observer<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.registry.add(Arc::new(observer));
        let registry: Weak<Registry<T>> = Arc::downgrade(&self.registry);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.remove(id);
                }
            })),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{unbounded, Receiver};
    use std::thread::sleep;

    fn controller_event(channel: u8) -> ControllerActivity {
        ControllerActivity {
            device: DeviceId(1),
            channel,
            controller: 7,
            value: 100,
        }
    }

    fn observe<T: Activity>(notifier: &ActivityNotifier<T>) -> (Subscription, Receiver<T>) {
        let (tx, rx) = unbounded();
        let sub = notifier.add_observer(move |event: &T| {
            let _ = tx.send(event.clone());
        });
        (sub, rx)
    }

    fn drain<T>(rx: &Receiver<T>) -> usize {
        let mut count = 0;
        while rx.recv_timeout(Duration::from_millis(200)).is_ok() {
            count += 1;
        }
        count
    }

    #[test]
    fn test_throttles_same_key() {
        let notifier = ActivityNotifier::new("test", DEFAULT_WINDOW);
        let (_sub, rx) = observe(&notifier);
        let t0 = Instant::now();

        assert!(notifier.post_at(controller_event(0), t0));
        assert!(!notifier.post_at(controller_event(0), t0 + Duration::from_millis(100)));
        assert!(!notifier.post_at(controller_event(0), t0 + Duration::from_millis(499)));
        assert!(notifier.post_at(controller_event(0), t0 + Duration::from_millis(600)));

        assert_eq!(drain(&rx), 2);
    }

    #[test]
    fn test_different_keys_not_throttled() {
        let notifier = ActivityNotifier::new("test", DEFAULT_WINDOW);
        let (_sub, rx) = observe(&notifier);
        let t0 = Instant::now();

        assert!(notifier.post_at(controller_event(0), t0));
        assert!(notifier.post_at(controller_event(1), t0));
        assert!(notifier.post_at(
            ControllerActivity {
                device: DeviceId(2),
                ..controller_event(0)
            },
            t0
        ));

        assert_eq!(drain(&rx), 3);
    }

    #[test]
    fn test_real_time_window() {
        let notifier = ActivityNotifier::new("test", DEFAULT_WINDOW);
        let (_sub, rx) = observe(&notifier);

        notifier.post(controller_event(3));
        notifier.post(controller_event(3));
        sleep(Duration::from_millis(600));
        notifier.post(controller_event(3));

        assert_eq!(drain(&rx), 2);
    }

    #[test]
    fn test_unthrottled_events_always_delivered() {
        let notifier = ActivityNotifier::new("actions", DEFAULT_WINDOW);
        let (_sub, rx) = observe(&notifier);
        let event = ActionActivity {
            action: ControllerAction::DelayMix,
            kind: ActionKind::Absolute,
            value: 10,
        };

        for _ in 0..5 {
            assert!(notifier.post(event));
        }
        assert_eq!(drain(&rx), 5);
    }

    #[test]
    fn test_delivery_off_caller_thread() {
        let notifier = ActivityNotifier::new("threads", DEFAULT_WINDOW);
        let (tx, rx) = unbounded();
        let _sub = notifier.add_observer(move |_: &ChannelActivity| {
            let _ = tx.send(thread::current().name().map(str::to_string));
        });

        notifier.post(ChannelActivity {
            device: DeviceId(1),
            channel: 0,
        });
        let name = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(name.as_deref(), Some("activity-threads"));
    }

    #[test]
    fn test_dropping_subscription_stops_delivery() {
        let notifier = ActivityNotifier::new("test", Duration::from_millis(0));
        let (sub, rx) = observe(&notifier);
        assert_eq!(notifier.observer_count(), 1);

        drop(sub);
        assert_eq!(notifier.observer_count(), 0);

        notifier.post(controller_event(0));
        assert_eq!(drain(&rx), 0);
    }

    #[test]
    fn test_detached_subscription_stays_registered() {
        let notifier = ActivityNotifier::new("test", DEFAULT_WINDOW);
        let (sub, rx) = observe(&notifier);
        sub.detach();
        assert_eq!(notifier.observer_count(), 1);

        notifier.post(controller_event(0));
        assert_eq!(drain(&rx), 1);
    }

    #[test]
    fn test_action_value_helpers() {
        let event = ActionActivity {
            action: ControllerAction::DelayToggle,
            kind: ActionKind::OnOff,
            value: 127,
        };
        assert!(event.is_on());
        assert_eq!(event.relative_delta(), 63);
        assert!((event.fraction() - 1.0).abs() < f32::EPSILON);

        let low = ActionActivity { value: 60, ..event };
        assert!(!low.is_on());
        assert_eq!(low.relative_delta(), -4);
    }

    #[test]
    fn test_dropped_event_does_not_start_window() {
        let notifier = ActivityNotifier::new("full", DEFAULT_WINDOW);
        let (release_tx, release_rx) = channel::bounded::<()>(0);
        let _sub = notifier.add_observer(move |_: &ControllerActivity| {
            let _ = release_rx.recv();
        });

        let now = Instant::now();
        let mut filled = false;
        for id in 1000..1000 + QUEUE_CAPACITY as u32 + 16 {
            let event = ControllerActivity {
                device: DeviceId(id),
                ..controller_event(0)
            };
            if !notifier.post_at(event, now) {
                filled = true;
                break;
            }
        }
        assert!(filled);

        assert!(!notifier.post_at(controller_event(0), now));
        drop(release_tx);

        let mut admitted = false;
        for _ in 0..200 {
            if notifier.post_at(controller_event(0), now) {
                admitted = true;
                break;
            }
            sleep(Duration::from_millis(10));
        }
        assert!(admitted);
    }
}
