//! MIDI input: device enumeration and connection on a dedicated thread.
//!
//! Incoming bytes are parsed and routed into the hub, which stamps them and
//! publishes them on the signal bus.

use crate::error::{Error, Result};
use crate::event::MidiMessage;
use crate::hub::InputRouter;
use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use midir::{MidiInput, MidiInputConnection};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MidiInputDevice {
    pub index: usize,
    pub name: String,
}

enum InputCommand {
    Connect(usize),
    Disconnect,
    Shutdown,
}

/// Owns the input connection thread. midir connections are not `Send` on
/// every platform, so they live and die on that thread.
pub struct MidiInputManager {
    command_sender: Sender<InputCommand>,
    connected_device: Arc<ArcSwap<Option<String>>>,
    is_connected: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MidiInputManager {
    pub(crate) fn new(router: Arc<InputRouter>) -> Result<Self> {
        let (command_sender, command_receiver) = bounded(16);
        let connected_device = Arc::new(ArcSwap::new(Arc::new(None)));
        let is_connected = Arc::new(AtomicBool::new(false));

        let thread_device = Arc::clone(&connected_device);
        let thread_connected = Arc::clone(&is_connected);
        let handle = thread::Builder::new()
            .name("antiphon-midi-input".to_string())
            .spawn(move || {
                Self::input_thread(command_receiver, router, thread_device, thread_connected)
            })
            .map_err(|source| Error::ThreadSpawn {
                name: "midi input",
                source,
            })?;

        Ok(Self {
            command_sender,
            connected_device,
            is_connected,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn input_thread(
        commands: Receiver<InputCommand>,
        router: Arc<InputRouter>,
        connected_device: Arc<ArcSwap<Option<String>>>,
        is_connected: Arc<AtomicBool>,
    ) {
        let mut connection: Option<MidiInputConnection<()>> = None;

        loop {
            match commands.recv_timeout(Duration::from_millis(100)) {
                Ok(InputCommand::Connect(index)) => {
                    if let Some(conn) = connection.take() {
                        conn.close();
                    }
                    match Self::connect_to_device(index, Arc::clone(&router)) {
                        Ok((conn, name)) => {
                            info!(device = %name, "MIDI input connected");
                            connection = Some(conn);
                            is_connected.store(true, Ordering::SeqCst);
                            connected_device.store(Arc::new(Some(name)));
                        }
                        Err(e) => {
                            warn!(index, "MIDI input connection failed: {e}");
                            is_connected.store(false, Ordering::SeqCst);
                            connected_device.store(Arc::new(None));
                        }
                    }
                }
                Ok(InputCommand::Disconnect) => {
                    if let Some(conn) = connection.take() {
                        conn.close();
                        is_connected.store(false, Ordering::SeqCst);
                        connected_device.store(Arc::new(None));
                    }
                }
                Ok(InputCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    if let Some(conn) = connection.take() {
                        conn.close();
                    }
                    is_connected.store(false, Ordering::SeqCst);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }

    fn connect_to_device(
        index: usize,
        router: Arc<InputRouter>,
    ) -> Result<(MidiInputConnection<()>, String)> {
        let midi_input = MidiInput::new("antiphon-input")?;
        let ports = midi_input.ports();
        let port = ports
            .get(index)
            .ok_or_else(|| Error::MidiDevice(format!("MIDI input device {index} not found")))?;
        let name = midi_input
            .port_name(port)
            .unwrap_or_else(|_| format!("Device {index}"));

        let connection = midi_input.connect(
            port,
            "antiphon-input",
            move |_timestamp, bytes, _| match MidiMessage::from_bytes(bytes) {
                Ok(message) => {
                    router.receive(message);
                }
                Err(e) => debug!("Ignoring MIDI input: {e}"),
            },
            (),
        )?;

        Ok((connection, name))
    }

    pub fn list_devices() -> Vec<MidiInputDevice> {
        let Ok(midi_input) = MidiInput::new("antiphon-device-list") else {
            return Vec::new();
        };
        midi_input
            .ports()
            .iter()
            .enumerate()
            .map(|(index, port)| MidiInputDevice {
                index,
                name: midi_input
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Unknown Device {index}")),
            })
            .collect()
    }

    /// Connection happens asynchronously; poll [`is_connected`](Self::is_connected).
    pub fn connect(&self, index: usize) -> Result<()> {
        self.command_sender
            .send(InputCommand::Connect(index))
            .map_err(|_| Error::MidiDevice("MIDI input thread not running".to_string()))
    }

    /// Connects to the first device whose name contains `name`, ignoring case.
    pub fn connect_by_name(&self, name: &str) -> Result<()> {
        let needle = name.to_lowercase();
        let device = Self::list_devices()
            .into_iter()
            .find(|d| d.name.to_lowercase().contains(&needle))
            .ok_or_else(|| {
                Error::MidiDevice(format!("No MIDI input device found matching '{name}'"))
            })?;
        self.connect(device.index)
    }

    pub fn disconnect(&self) {
        let _ = self.command_sender.send(InputCommand::Disconnect);
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    pub fn connected_device(&self) -> Option<String> {
        self.connected_device.load().as_ref().clone()
    }
}

impl Drop for MidiInputManager {
    fn drop(&mut self) {
        let _ = self.command_sender.send(InputCommand::Shutdown);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}
