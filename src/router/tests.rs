//! Tests for Router module

use super::*;
use crate::action::{ActionBinding, ActionKind, ControllerAction};
use crate::connection::DeviceId;
use crate::midi::Packet;
use crossbeam::channel::{unbounded, Receiver};
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum SynthCall {
    NoteOn(u8, u8),
    NoteOff(u8, u8),
    PolyPressure(u8, u8),
    Cc(u8, u8),
    Program(u8),
    ChannelPressure(u8),
    PitchBend(u16),
    StopAll,
}

#[derive(Default)]
struct RecordingSynth {
    calls: Mutex<Vec<SynthCall>>,
}

impl RecordingSynth {
    fn take(&self) -> Vec<SynthCall> {
        std::mem::take(&mut *self.calls.lock())
    }
}

impl Synth for RecordingSynth {
    fn note_on(&self, note: u8, velocity: u8) {
        self.calls.lock().push(SynthCall::NoteOn(note, velocity));
    }

    fn note_off(&self, note: u8, velocity: u8) {
        self.calls.lock().push(SynthCall::NoteOff(note, velocity));
    }

    fn poly_key_pressure(&self, note: u8, pressure: u8) {
        self.calls.lock().push(SynthCall::PolyPressure(note, pressure));
    }

    fn control_change(&self, controller: u8, value: u8) {
        self.calls.lock().push(SynthCall::Cc(controller, value));
    }

    fn program_change(&self, program: u8) {
        self.calls.lock().push(SynthCall::Program(program));
    }

    fn channel_pressure(&self, pressure: u8) {
        self.calls.lock().push(SynthCall::ChannelPressure(pressure));
    }

    fn pitch_bend(&self, value: u16) {
        self.calls.lock().push(SynthCall::PitchBend(value));
    }

    fn stop_all_notes(&self) {
        self.calls.lock().push(SynthCall::StopAll);
    }
}

#[derive(Debug, Clone, PartialEq)]
enum KeyCall {
    On(u8),
    Off(u8),
    ReleaseAll,
}

#[derive(Default)]
struct RecordingKeyboard {
    calls: Mutex<Vec<KeyCall>>,
}

impl RecordingKeyboard {
    fn take(&self) -> Vec<KeyCall> {
        std::mem::take(&mut *self.calls.lock())
    }
}

impl Keyboard for RecordingKeyboard {
    fn note_is_on(&self, note: u8) {
        self.calls.lock().push(KeyCall::On(note));
    }

    fn note_is_off(&self, note: u8) {
        self.calls.lock().push(KeyCall::Off(note));
    }

    fn release_all_keys(&self) {
        self.calls.lock().push(KeyCall::ReleaseAll);
    }
}

struct Fixture {
    router: Router,
    synth: Arc<RecordingSynth>,
    keyboard: Arc<RecordingKeyboard>,
    settings: Settings,
}

fn make_fixture(settings: Settings) -> Fixture {
    let synth = Arc::new(RecordingSynth::default());
    let keyboard = Arc::new(RecordingKeyboard::default());
    let router = Router::new(synth.clone(), keyboard.clone(), settings.clone());
    Fixture {
        router,
        synth,
        keyboard,
        settings,
    }
}

fn fixture() -> Fixture {
    make_fixture(Settings::in_memory())
}

const DEVICE: DeviceId = DeviceId(7);

fn feed(router: &Router, bytes: &[u8]) {
    router.process_packet(DEVICE, &Packet::new(0, bytes));
}

fn collect<T: Clone + Send + 'static>(rx: &Receiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(event) = rx.recv_timeout(Duration::from_millis(200)) {
        events.push(event);
    }
    events
}

#[test]
fn test_channel_one_scenario() {
    let f = fixture();
    f.router.set_channel_filter(1);

    feed(&f.router, &[0x91, 60, 100, 0xB1, 7, 80, 0x80, 60, 0]);

    assert_eq!(
        f.synth.take(),
        vec![
            SynthCall::NoteOn(60, 100),
            SynthCall::Cc(7, 80),
            SynthCall::NoteOff(60, 0)
        ]
    );
    assert_eq!(f.keyboard.take(), vec![KeyCall::On(60), KeyCall::Off(60)]);
    assert_eq!(f.router.controller(7).last_value(), Some(80));
}

#[test]
fn test_filter_change_does_not_hang_notes() {
    let f = fixture();
    f.router.set_channel_filter(0);
    feed(&f.router, &[0x90, 60, 100]);

    f.router.set_channel_filter(5);
    feed(&f.router, &[0x80, 60, 0, 0x90, 62, 100]);

    assert_eq!(
        f.synth.take(),
        vec![SynthCall::NoteOn(60, 100), SynthCall::NoteOff(60, 0)]
    );
}

#[test]
fn test_channel_filter_mismatch_drops_everything() {
    let f = fixture();
    f.router.set_channel_filter(2);

    feed(&f.router, &[0x91, 60, 100, 0xB1, 7, 80]);

    assert!(f.synth.take().is_empty());
    assert!(f.keyboard.take().is_empty());
    assert_eq!(f.router.controller(7).last_value(), None);
}

#[test]
fn test_channel_filter_is_persisted() {
    let f = fixture();
    f.router.set_channel_filter(9);
    assert_eq!(f.settings.midi_channel(), 9);

    let restored = make_fixture(f.settings.clone());
    assert_eq!(restored.router.channel_filter(), 9);

    restored.router.set_channel_filter(-1);
    assert_eq!(f.settings.midi_channel(), -1);
}

#[test]
fn test_invalid_channel_filter_keeps_current() {
    let f = fixture();
    f.router.set_channel_filter(3);

    f.router.set_channel_filter(42);
    assert_eq!(f.router.channel_filter(), 3);
    assert_eq!(f.settings.midi_channel(), 3);

    feed(&f.router, &[0x90, 60, 100, 0x93, 62, 100]);
    assert_eq!(f.synth.take(), vec![SynthCall::NoteOn(62, 100)]);
}

#[test]
fn test_system_reset_stops_notes_only() {
    let f = fixture();

    feed(&f.router, &[0xFF]);

    assert_eq!(f.synth.take(), vec![SynthCall::StopAll]);
    assert!(f.keyboard.take().is_empty());
    assert!(f.router.controller_snapshots().iter().all(|c| c.last_value.is_none()));
}

#[test]
fn test_realtime_messages_are_ignored() {
    let f = fixture();

    feed(&f.router, &[0xF8, 0xFA, 0xFE, 0xF3, 4, 0xFC]);

    assert!(f.synth.take().is_empty());
    assert!(f.keyboard.take().is_empty());
}

#[test]
fn test_other_channel_messages_forwarded() {
    let f = fixture();

    feed(
        &f.router,
        &[0xC0, 5, 0xD0, 33, 0xE0, 0x00, 0x40, 0xA0, 60, 90],
    );

    assert_eq!(
        f.synth.take(),
        vec![
            SynthCall::Program(5),
            SynthCall::ChannelPressure(33),
            SynthCall::PitchBend(8192),
            SynthCall::PolyPressure(60, 90),
        ]
    );
    assert!(f.keyboard.take().is_empty());
}

#[test]
fn test_disabled_controller_records_but_does_not_forward() {
    let f = fixture();
    f.router.set_controller_allowed(1, false);

    feed(&f.router, &[0xB0, 1, 64]);

    assert!(f.synth.take().is_empty());
    assert_eq!(f.router.controller(1).last_value(), Some(64));
}

#[test]
fn test_reenabling_controller_replays_last_value() {
    let f = fixture();
    f.router.set_controller_allowed(1, false);
    feed(&f.router, &[0xB0, 1, 64, 0xB0, 1, 99]);
    assert!(f.synth.take().is_empty());

    f.router.set_controller_allowed(1, true);

    assert_eq!(f.synth.take(), vec![SynthCall::Cc(1, 99)]);
}

#[test]
fn test_enabling_controller_without_value_sends_nothing() {
    let f = fixture();
    f.router.set_controller_allowed(11, false);
    f.router.set_controller_allowed(11, true);
    assert!(f.synth.take().is_empty());
}

#[test]
fn test_controller_flags_restored_from_settings() {
    let f = fixture();
    f.router.set_controller_allowed(64, false);
    assert!(!f.settings.controller_allowed(64));

    let restored = make_fixture(f.settings.clone());
    assert!(!restored.router.controller(64).allowed());
    assert!(restored.router.controller(65).allowed());
}

#[test]
fn test_fixed_velocity_override() {
    let f = fixture();
    f.router.connections().set_fixed_velocity(DEVICE, Some(100));

    feed(&f.router, &[0x90, 60, 10, 0x90, 62, 127]);
    assert_eq!(
        f.synth.take(),
        vec![SynthCall::NoteOn(60, 100), SynthCall::NoteOn(62, 100)]
    );

    f.router.connections().set_fixed_velocity(DEVICE, None);
    feed(&f.router, &[0x90, 64, 10]);
    assert_eq!(f.synth.take(), vec![SynthCall::NoteOn(64, 10)]);
}

#[test]
fn test_fixed_velocity_is_per_device() {
    let f = fixture();
    f.router.connections().set_fixed_velocity(DeviceId(1), Some(100));

    f.router
        .process_packet(DeviceId(2), &Packet::new(0, &[0x90, 60, 10]));
    assert_eq!(f.synth.take(), vec![SynthCall::NoteOn(60, 10)]);
}

#[test]
fn test_zero_velocity_note_on_takes_override() {
    let f = fixture();
    f.router.connections().set_fixed_velocity(DEVICE, Some(100));

    feed(&f.router, &[0x90, 60, 0]);

    assert_eq!(f.synth.take(), vec![SynthCall::NoteOn(60, 100)]);
    assert_eq!(f.keyboard.take(), vec![KeyCall::On(60)]);
}

#[test]
fn test_zero_velocity_note_on_without_override() {
    let f = fixture();

    feed(&f.router, &[0x90, 60, 0]);

    assert_eq!(f.synth.take(), vec![SynthCall::NoteOn(60, 0)]);
    assert_eq!(f.keyboard.take(), vec![KeyCall::On(60)]);
}

#[test]
fn test_malformed_packets_do_not_disturb_the_list() {
    let f = fixture();
    let oversized = [0x90u8; 65];

    f.router.process_packets(
        DEVICE,
        &[
            Packet::new(1, &[]),
            Packet::new(2, &oversized),
            Packet::new(3, &[0x90, 60, 100]),
        ],
    );

    assert_eq!(f.synth.take(), vec![SynthCall::NoteOn(60, 100)]);
}

#[test]
fn test_last_channel_recorded() {
    let f = fixture();
    feed(&f.router, &[0x9A, 60, 100]);
    assert_eq!(
        f.router.connections().state_for(DEVICE).last_channel(),
        Some(10)
    );
}

#[test]
fn test_controller_activity_posted_even_when_disabled() {
    let f = fixture();
    let (tx, rx) = unbounded();
    let _sub = f.router.monitor_controller_activity(move |event| {
        let _ = tx.send(*event);
    });
    f.router.set_controller_allowed(7, false);

    feed(&f.router, &[0xB3, 7, 90]);

    assert_eq!(
        collect(&rx),
        vec![ControllerActivity {
            device: DEVICE,
            channel: 3,
            controller: 7,
            value: 90,
        }]
    );
}

#[test]
fn test_controller_activity_throttled_per_channel() {
    let f = fixture();
    let (tx, rx) = unbounded();
    let _sub = f.router.monitor_controller_activity(move |event| {
        let _ = tx.send(*event);
    });

    feed(&f.router, &[0xB0, 7, 1, 0xB0, 7, 2, 0xB0, 7, 3, 0xB1, 7, 4]);

    let values: Vec<u8> = collect(&rx).iter().map(|e| e.value).collect();
    assert_eq!(values, vec![1, 4]);
    // The synth still gets every value
    assert_eq!(f.synth.take().len(), 4);
}

#[test]
fn test_bound_controller_posts_action_activity() {
    let f = fixture();
    let (tx, rx) = unbounded();
    let _sub = f.router.monitor_action_activity(move |event| {
        let _ = tx.send(*event);
    });

    feed(&f.router, &[0xB0, 112, 70, 0xB0, 112, 58]);

    assert_eq!(
        collect(&rx),
        vec![
            ActionActivity {
                action: ControllerAction::NextPrevFavorite,
                kind: ActionKind::Relative,
                value: 70,
            },
            ActionActivity {
                action: ControllerAction::NextPrevFavorite,
                kind: ActionKind::Relative,
                value: 58,
            },
        ]
    );
    assert_eq!(
        f.synth.take(),
        vec![SynthCall::Cc(112, 70), SynthCall::Cc(112, 58)]
    );
}

#[test]
fn test_one_action_event_per_binding() {
    let f = fixture();
    f.router.set_action_bindings(ActionBindings::new(vec![
        ActionBinding::new(ControllerAction::DelayMix, ActionKind::Absolute, 91),
        ActionBinding::new(ControllerAction::ReverbToggle, ActionKind::OnOff, 91),
    ]));
    let (tx, rx) = unbounded();
    let _sub = f.router.monitor_action_activity(move |event| {
        let _ = tx.send(event.action);
    });

    feed(&f.router, &[0xB0, 91, 100]);

    assert_eq!(
        collect(&rx),
        vec![ControllerAction::DelayMix, ControllerAction::ReverbToggle]
    );
}

#[test]
fn test_binding_without_kind_is_skipped() {
    let f = fixture();
    f.router.set_action_bindings(ActionBindings::new(vec![
        ActionBinding {
            action: ControllerAction::DelayTime,
            kind: None,
            controller: Some(20),
        },
        ActionBinding::new(ControllerAction::DelayFeedback, ActionKind::Absolute, 20),
    ]));
    let (tx, rx) = unbounded();
    let _sub = f.router.monitor_action_activity(move |event| {
        let _ = tx.send(event.action);
    });

    feed(&f.router, &[0xB0, 20, 30]);

    assert_eq!(collect(&rx), vec![ControllerAction::DelayFeedback]);
    assert_eq!(f.synth.take(), vec![SynthCall::Cc(20, 30)]);
}

#[test]
fn test_disabled_bound_controller_posts_no_action() {
    let f = fixture();
    let (tx, rx) = unbounded();
    let _sub = f.router.monitor_action_activity(move |event| {
        let _ = tx.send(*event);
    });
    f.router.set_controller_allowed(74, false);

    feed(&f.router, &[0xB0, 74, 10]);

    assert!(collect(&rx).is_empty());
    assert!(f.synth.take().is_empty());
}

#[test]
fn test_channel_activity() {
    let f = fixture();
    let (tx, rx) = unbounded();
    let _sub = f.router.monitor_channel_activity(move |event| {
        let _ = tx.send(*event);
    });

    feed(&f.router, &[0x92, 60, 100, 0x82, 60, 0, 0xF8]);

    assert_eq!(
        collect(&rx),
        vec![ChannelActivity {
            device: DEVICE,
            channel: 2,
        }]
    );
}

#[test]
fn test_release_all_keys() {
    let f = fixture();
    f.router.release_all_keys();
    assert_eq!(f.keyboard.take(), vec![KeyCall::ReleaseAll]);
    assert_eq!(f.synth.take(), vec![SynthCall::StopAll]);
}

#[test]
fn test_controller_snapshots() {
    let f = fixture();
    f.router.set_controller_allowed(64, false);
    feed(&f.router, &[0xB0, 64, 127]);

    let snapshots = f.router.controller_snapshots();
    assert_eq!(snapshots.len(), 128);
    assert_eq!(
        snapshots[64],
        ControllerSnapshot {
            controller: 64,
            name: "Damper Pedal",
            last_value: Some(127),
            allowed: false,
            actions: vec![],
        }
    );
    assert_eq!(
        snapshots[112].actions,
        vec![ControllerAction::NextPrevFavorite]
    );
}

#[test]
fn test_concurrent_devices() {
    let f = fixture();
    let router = &f.router;

    std::thread::scope(|scope| {
        for device in 0..4u32 {
            scope.spawn(move || {
                for note in 0..50u8 {
                    router.process_packet(DeviceId(device), &Packet::new(0, &[0x90, note, 100]));
                }
            });
        }
    });

    assert_eq!(f.synth.take().len(), 200);
    assert_eq!(router.connections().known_devices().len(), 4);
}
