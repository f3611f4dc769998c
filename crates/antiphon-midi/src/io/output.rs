//! MIDI output: forwards every scheduled event from the hub's output queue to
//! a connected device.

use crate::error::{Error, Result};
use crate::output::{OutputConsumer, ScheduledEvent};
use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use midir::{MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone)]
pub struct MidiOutputDevice {
    pub index: usize,
    pub name: String,
}

enum OutputCommand {
    Connect(usize),
    Disconnect,
    Shutdown,
}

pub struct MidiOutputManager {
    command_sender: Sender<OutputCommand>,
    connected_device: Arc<ArcSwap<Option<String>>>,
    is_connected: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MidiOutputManager {
    pub(crate) fn new(events: OutputConsumer) -> Result<Self> {
        let (command_sender, command_receiver) = bounded(16);
        let connected_device = Arc::new(ArcSwap::new(Arc::new(None)));
        let is_connected = Arc::new(AtomicBool::new(false));

        let thread_device = Arc::clone(&connected_device);
        let thread_connected = Arc::clone(&is_connected);
        let handle = thread::Builder::new()
            .name("antiphon-midi-output".to_string())
            .spawn(move || {
                Self::output_thread(command_receiver, events, thread_device, thread_connected)
            })
            .map_err(|source| Error::ThreadSpawn {
                name: "midi output",
                source,
            })?;

        Ok(Self {
            command_sender,
            connected_device,
            is_connected,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn output_thread(
        commands: Receiver<OutputCommand>,
        events: OutputConsumer,
        connected_device: Arc<ArcSwap<Option<String>>>,
        is_connected: Arc<AtomicBool>,
    ) {
        let mut connection: Option<MidiOutputConnection> = None;

        loop {
            select! {
                recv(commands) -> command => match command {
                    Ok(OutputCommand::Connect(index)) => {
                        if let Some(conn) = connection.take() {
                            conn.close();
                        }
                        match Self::connect_to_device(index) {
                            Ok((conn, name)) => {
                                info!(device = %name, "MIDI output connected");
                                connection = Some(conn);
                                is_connected.store(true, Ordering::SeqCst);
                                connected_device.store(Arc::new(Some(name)));
                            }
                            Err(e) => {
                                warn!(index, "MIDI output connection failed: {e}");
                                is_connected.store(false, Ordering::SeqCst);
                                connected_device.store(Arc::new(None));
                            }
                        }
                    }
                    Ok(OutputCommand::Disconnect) => {
                        if let Some(conn) = connection.take() {
                            conn.close();
                            is_connected.store(false, Ordering::SeqCst);
                            connected_device.store(Arc::new(None));
                        }
                    }
                    Ok(OutputCommand::Shutdown) | Err(_) => break,
                },
                recv(events.receiver()) -> event => match event {
                    Ok(event) => Self::send(&mut connection, &event),
                    Err(_) => break,
                },
                default(Duration::from_millis(100)) => {}
            }
        }

        if let Some(conn) = connection.take() {
            conn.close();
        }
        is_connected.store(false, Ordering::SeqCst);
    }

    fn send(connection: &mut Option<MidiOutputConnection>, event: &ScheduledEvent) {
        match connection {
            Some(conn) => {
                trace!(time = event.time, message = %event.message, "MIDI out");
                if let Err(e) = conn.send(&event.message.to_bytes()) {
                    warn!("MIDI send failed: {e}");
                }
            }
            None => debug!("Cannot send MIDI message: no device connected"),
        }
    }

    fn connect_to_device(index: usize) -> Result<(MidiOutputConnection, String)> {
        let midi_output = MidiOutput::new("antiphon-output")?;
        let ports = midi_output.ports();
        let port = ports
            .get(index)
            .ok_or_else(|| Error::MidiDevice(format!("MIDI output device {index} not found")))?;
        let name = midi_output
            .port_name(port)
            .unwrap_or_else(|_| format!("Device {index}"));
        let connection = midi_output.connect(port, "antiphon-output")?;
        Ok((connection, name))
    }

    pub fn list_devices() -> Vec<MidiOutputDevice> {
        let Ok(midi_output) = MidiOutput::new("antiphon-device-list") else {
            return Vec::new();
        };
        midi_output
            .ports()
            .iter()
            .enumerate()
            .map(|(index, port)| MidiOutputDevice {
                index,
                name: midi_output
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Unknown Device {index}")),
            })
            .collect()
    }

    pub fn connect(&self, index: usize) -> Result<()> {
        self.command_sender
            .send(OutputCommand::Connect(index))
            .map_err(|_| Error::MidiDevice("MIDI output thread not running".to_string()))
    }

    pub fn connect_by_name(&self, name: &str) -> Result<()> {
        let needle = name.to_lowercase();
        let device = Self::list_devices()
            .into_iter()
            .find(|d| d.name.to_lowercase().contains(&needle))
            .ok_or_else(|| {
                Error::MidiDevice(format!("No MIDI output device found matching '{name}'"))
            })?;
        self.connect(device.index)
    }

    pub fn disconnect(&self) {
        let _ = self.command_sender.send(OutputCommand::Disconnect);
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    pub fn connected_device(&self) -> Option<String> {
        self.connected_device.load().as_ref().clone()
    }
}

impl Drop for MidiOutputManager {
    fn drop(&mut self) {
        let _ = self.command_sender.send(OutputCommand::Shutdown);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}
