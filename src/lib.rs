//! MIDI decoding and event routing
//!
//! Raw packets from MIDI inputs are decoded into typed messages, filtered by
//! channel, and dispatched to a synth and an on-screen keyboard. Controller
//! and channel activity is throttled and handed to UI observers on a
//! separate thread.

pub mod action;
pub mod activity;
pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod midi;
pub mod monitor;
pub mod paths;
pub mod router;
pub mod settings;
pub mod synth;
pub mod transport;

pub use error::{Error, Result};
pub use midi::{Decoded, Decoder, Message, Packet, PacketError};
pub use router::Router;
