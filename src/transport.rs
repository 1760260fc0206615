//! MIDI input transport
//!
//! Enumerates `midir` input ports, maps each to a `DeviceId`, and keeps one
//! input connection per device the connection policy allows. Every buffer
//! midir delivers is handed to the router as one packet on the driver
//! thread.

use crate::connection::{ConnectionPolicy, DeviceId};
use crate::error::{Error, Result};
use crate::midi::Packet;
use crate::router::Router;
use midir::{Ignore, MidiIO, MidiInput, MidiInputConnection, MidiOutput};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A port seen during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub index: usize,
    pub name: String,
    pub device: DeviceId,
    pub is_virtual: bool,
}

impl PortInfo {
    fn new(index: usize, name: String) -> Self {
        let is_virtual =
            name.contains("Virtual") || name.contains("loopMIDI") || name.contains("IAC");
        Self {
            index,
            device: DeviceId::from_name(&name),
            name,
            is_virtual,
        }
    }
}

/// First port whose name contains `needle` (case-insensitive)
pub fn find_port_by_substring<T: MidiIO>(io: &T, needle: &str) -> Option<(T::Port, String)> {
    let needle = needle.to_lowercase();
    io.ports().into_iter().find_map(|port| {
        let name = io.port_name(&port).ok()?;
        name.to_lowercase()
            .contains(&needle)
            .then_some((port, name))
    })
}

fn find_port_by_name<T: MidiIO>(io: &T, name: &str) -> Option<T::Port> {
    io.ports()
        .into_iter()
        .find(|port| io.port_name(port).ok().as_deref() == Some(name))
}

fn list_ports<T: MidiIO>(io: &T) -> Vec<PortInfo> {
    io.ports()
        .iter()
        .enumerate()
        .filter_map(|(index, port)| {
            io.port_name(port)
                .ok()
                .map(|name| PortInfo::new(index, name))
        })
        .collect()
}

pub fn discover_input_ports(client_name: &str) -> Result<Vec<PortInfo>> {
    let midi_in = MidiInput::new(&format!("{}-discovery", client_name))?;
    Ok(list_ports(&midi_in))
}

pub fn discover_output_ports(client_name: &str) -> Result<Vec<PortInfo>> {
    let midi_out = MidiOutput::new(&format!("{}-discovery", client_name))?;
    Ok(list_ports(&midi_out))
}

/// Devices whose connection changed during a refresh
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceChanges {
    pub appeared: Vec<PortInfo>,
    pub disappeared: Vec<DeviceId>,
}

impl DeviceChanges {
    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.disappeared.is_empty()
    }
}

/// Which connections to open and close for one scan
#[derive(Debug, Default, PartialEq, Eq)]
struct ConnectPlan {
    connect: Vec<PortInfo>,
    disconnect: Vec<DeviceId>,
}

fn plan_connections(
    present: &[PortInfo],
    connected: &HashSet<DeviceId>,
    policy: &ConnectionPolicy,
) -> ConnectPlan {
    let mut plan = ConnectPlan::default();
    let mut seen = HashSet::new();

    for port in present {
        // Ports sharing a name share a device id; the first one wins
        if !seen.insert(port.device) {
            continue;
        }
        if !connected.contains(&port.device) && policy.should_auto_connect(port.device) {
            plan.connect.push(port.clone());
        }
    }

    let mut disconnect: Vec<DeviceId> = connected
        .iter()
        .filter(|device| !seen.contains(*device) || !policy.should_auto_connect(**device))
        .copied()
        .collect();
    disconnect.sort();
    plan.disconnect = disconnect;
    plan
}

struct Connected {
    name: String,
    _connection: MidiInputConnection<()>,
}

/// Owns the live input connections
pub struct InputManager {
    client_name: String,
    router: Arc<Router>,
    connections: HashMap<DeviceId, Connected>,
}

impl InputManager {
    pub fn new(client_name: &str, router: Arc<Router>) -> Self {
        Self {
            client_name: client_name.to_string(),
            router,
            connections: HashMap::new(),
        }
    }

    /// Re-scan input ports and reconcile connections with the policy
    pub fn refresh(&mut self) -> Result<DeviceChanges> {
        let present = discover_input_ports(&self.client_name)?;
        let connected: HashSet<DeviceId> = self.connections.keys().copied().collect();
        let plan = plan_connections(&present, &connected, self.router.connections());

        let mut changes = DeviceChanges::default();

        for device in plan.disconnect {
            if let Some(old) = self.connections.remove(&device) {
                info!("MIDI input disconnected: '{}' ({})", old.name, device);
                changes.disappeared.push(device);
            }
        }

        for port in plan.connect {
            match self.connect(&port) {
                Ok(connection) => {
                    info!("MIDI input connected: '{}' ({})", port.name, port.device);
                    self.connections.insert(
                        port.device,
                        Connected {
                            name: port.name.clone(),
                            _connection: connection,
                        },
                    );
                    changes.appeared.push(port);
                }
                Err(e) => warn!("Failed to connect '{}': {}", port.name, e),
            }
        }

        if !changes.is_empty() {
            debug!("{} input(s) connected", self.connections.len());
        }
        Ok(changes)
    }

    fn connect(&self, port: &PortInfo) -> Result<MidiInputConnection<()>> {
        let mut midi_in = MidiInput::new(&format!("{}-{}", self.client_name, port.device))?;
        midi_in.ignore(Ignore::None);

        let handle = find_port_by_name(&midi_in, &port.name)
            .ok_or_else(|| Error::MidiPort(format!("input port '{}' vanished", port.name)))?;

        // Created here so the first packet does not touch the settings store
        let state = self.router.connections().state_for(port.device);
        debug!(
            "Device {} fixed velocity: {:?}",
            port.device,
            state.fixed_velocity()
        );

        let router = self.router.clone();
        let device = port.device;
        let connection = midi_in.connect(
            &handle,
            &format!("{}-in", self.client_name),
            move |timestamp, data, _| {
                router.process_packet(device, &Packet::new(timestamp, data));
            },
            (),
        )?;
        Ok(connection)
    }

    /// Currently connected devices, sorted by id
    pub fn connected(&self) -> Vec<(DeviceId, String)> {
        let mut devices: Vec<_> = self
            .connections
            .iter()
            .map(|(device, c)| (*device, c.name.clone()))
            .collect();
        devices.sort();
        devices
    }

    pub fn disconnect_all(&mut self) {
        for (device, old) in self.connections.drain() {
            debug!("Closing '{}' ({})", old.name, device);
        }
    }
}
