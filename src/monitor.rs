//! MIDI monitor for debugging
//!
//! Prints every packet from the selected inputs together with what the
//! decoder makes of it. Nothing is routed.

use anyhow::{bail, Context, Result};
use colored::*;
use midir::{Ignore, MidiInput, MidiInputConnection};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

use crate::connection::DeviceId;
use crate::midi::{format_hex, Decoded, Message, Packet};
use crate::transport::{discover_input_ports, find_port_by_substring};

/// One packet captured by the monitor
#[derive(Debug, Clone)]
pub struct MonitorEvent {
    pub elapsed_ms: u64,
    pub port_name: String,
    pub device: DeviceId,
    pub data: Vec<u8>,
}

/// Run the monitor until Ctrl+C.
///
/// `pattern` selects one input by name substring; `None` opens every input.
pub async fn run_monitor(client_name: &str, pattern: Option<&str>, channel_filter: i8) -> Result<()> {
    println!("{}", "=== MIDI Monitor ===".bold().cyan());
    println!("Press Ctrl+C to exit\n");

    let (event_tx, mut event_rx) = mpsc::channel(1000);
    let mut monitor = Monitor::new(client_name, event_tx);

    match pattern {
        Some(pattern) => monitor.connect_matching(pattern)?,
        None => monitor.connect_all()?,
    }

    println!(
        "{}",
        "Format: [elapsed] PORT #DEVICE | HEX => DECODED".dimmed()
    );
    println!("{}\n", "─".repeat(80).dimmed());

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => print_event(&event, channel_filter),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("\n{}", "Monitor stopped".yellow());
    Ok(())
}

struct Monitor {
    client_name: String,
    start: Instant,
    event_tx: mpsc::Sender<MonitorEvent>,
    connections: Vec<MidiInputConnection<()>>,
}

impl Monitor {
    fn new(client_name: &str, event_tx: mpsc::Sender<MonitorEvent>) -> Self {
        Self {
            client_name: client_name.to_string(),
            start: Instant::now(),
            event_tx,
            connections: Vec::new(),
        }
    }

    fn connect_matching(&mut self, pattern: &str) -> Result<()> {
        let midi_in = self.input("monitor")?;
        let (port, name) = find_port_by_substring(&midi_in, pattern)
            .with_context(|| format!("No input port matching '{}'", pattern))?;
        self.connect(midi_in, port, name)
    }

    fn connect_all(&mut self) -> Result<()> {
        let ports = discover_input_ports(&self.client_name)?;
        for info in ports {
            let midi_in = self.input(&info.index.to_string())?;
            if let Some(port) = midi_in.ports().into_iter().nth(info.index) {
                self.connect(midi_in, port, info.name)?;
            }
        }

        if self.connections.is_empty() {
            bail!("No MIDI input ports found");
        }
        Ok(())
    }

    fn input(&self, suffix: &str) -> Result<MidiInput> {
        let mut midi_in = MidiInput::new(&format!("{}-monitor-{}", self.client_name, suffix))
            .context("Failed to create MIDI input")?;
        midi_in.ignore(Ignore::None);
        Ok(midi_in)
    }

    fn connect(&mut self, midi_in: MidiInput, port: midir::MidiInputPort, name: String) -> Result<()> {
        info!("Monitoring: {}", name);
        let event_tx = self.event_tx.clone();
        let start = self.start;
        let device = DeviceId::from_name(&name);
        let port_name = name.clone();

        let connection = midi_in
            .connect(
                &port,
                &format!("{}-monitor", self.client_name),
                move |_timestamp, data, _| {
                    let _ = event_tx.try_send(MonitorEvent {
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        port_name: port_name.clone(),
                        device,
                        data: data.to_vec(),
                    });
                },
                (),
            )
            .map_err(|e| anyhow::anyhow!("Failed to connect '{}': {}", name, e))?;

        self.connections.push(connection);
        Ok(())
    }
}

fn print_event(event: &MonitorEvent, channel_filter: i8) {
    let port = if event.port_name.chars().count() > 20 {
        let short: String = event.port_name.chars().take(17).collect();
        format!("{}...", short)
    } else {
        event.port_name.clone()
    };

    let hex = format_hex(&event.data);
    let decoded = match Packet::new(0, &event.data).decode(channel_filter) {
        Ok(decoder) => decoder.collect::<Vec<_>>(),
        Err(e) => {
            println!(
                "[{:>8}ms] {:20} | {} => {}",
                event.elapsed_ms.to_string().dimmed(),
                port.white(),
                hex.bright_black(),
                e.to_string().red()
            );
            return;
        }
    };

    let summary = if decoded.is_empty() {
        "filtered".dimmed().to_string()
    } else {
        decoded
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ")
            .bright_blue()
            .to_string()
    };

    println!(
        "[{:>8}ms] {:20} {} | {} => {}",
        event.elapsed_ms.to_string().dimmed(),
        port.white(),
        format!("#{}", event.device).dimmed(),
        colorize(&hex, decoded.first()),
        summary
    );
}

fn colorize(hex: &str, first: Option<&Decoded>) -> ColoredString {
    match first.map(|d| d.message) {
        Some(Message::NoteOn { .. }) => hex.bright_green(),
        Some(Message::NoteOff { .. }) => hex.bright_red(),
        Some(Message::ControlChange { .. }) => hex.bright_yellow(),
        Some(Message::PitchBendChange { .. }) => hex.bright_cyan(),
        Some(Message::SystemReset) => hex.bright_magenta(),
        Some(message) if !message.is_channel_message() => hex.magenta(),
        Some(_) => hex.normal(),
        None => hex.bright_black(),
    }
}
