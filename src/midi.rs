//! MIDI controller as a stand-in height sensor
//!
//! A fader or knob on any MIDI controller plays the part of the camera: one
//! CC number carries the vertical head position, and a person counts as
//! present for as long as that CC keeps moving. Uses a lock-free approach:
//! the MIDI callback writes to shared atomics that the producer thread reads
//! each frame.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use midir::{MidiInput, MidiInputConnection};

use crate::sensor::{LandmarkSource, PersonSample, SensorError};

/// How long a person stays "present" after the last CC message
pub const DEFAULT_PRESENCE_HOLD: Duration = Duration::from_millis(500);

/// Last CC value and when it arrived, written by the MIDI callback.
struct SharedCc {
    epoch: Instant,
    value: AtomicU8,
    /// Milliseconds since `epoch` plus one; 0 = nothing received yet
    seen_at: AtomicU64,
}

impl SharedCc {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            value: AtomicU8::new(0),
            seen_at: AtomicU64::new(0),
        }
    }

    /// Called from MIDI callback thread
    fn set(&self, value: u8) {
        self.value.store(value, Ordering::Relaxed);
        let now = self.epoch.elapsed().as_millis() as u64 + 1;
        self.seen_at.store(now, Ordering::Release);
    }

    /// The last value if it arrived within `hold`
    fn fresh(&self, hold: Duration) -> Option<u8> {
        let seen_at = self.seen_at.load(Ordering::Acquire);
        if seen_at == 0 {
            return None;
        }
        let age = (self.epoch.elapsed().as_millis() as u64 + 1).saturating_sub(seen_at);
        if age <= hold.as_millis() as u64 {
            Some(self.value.load(Ordering::Relaxed))
        } else {
            None
        }
    }
}

/// CC value (0-127) to head position. A high fader means a tall person,
/// i.e. a head near the top of the frame.
pub fn cc_to_position(value: u8) -> f64 {
    1.0 - (value.min(127) as f64 / 127.0)
}

/// Names of the available MIDI input ports
pub fn list_ports() -> Result<Vec<String>, SensorError> {
    let midi_in = MidiInput::new("height-sonify-scan")
        .map_err(|e| SensorError::Unavailable(format!("MIDI init error: {}", e)))?;
    Ok(midi_in
        .ports()
        .iter()
        .map(|port| {
            midi_in
                .port_name(port)
                .unwrap_or_else(|_| "Unknown".to_string())
        })
        .collect())
}

pub struct MidiSource {
    port_index: usize,
    cc: u8,
    frame_interval: Duration,
    presence_hold: Duration,
    shared: Arc<SharedCc>,
    connection: Option<MidiInputConnection<()>>,
    port_name: Option<String>,
}

impl MidiSource {
    pub fn new(port_index: usize, cc: u8, frame_interval: Duration) -> Self {
        Self {
            port_index,
            cc: cc & 0x7F,
            frame_interval,
            presence_hold: DEFAULT_PRESENCE_HOLD,
            shared: Arc::new(SharedCc::new()),
            connection: None,
            port_name: None,
        }
    }
}

impl LandmarkSource for MidiSource {
    fn init(&mut self) -> Result<(), SensorError> {
        if self.connection.is_some() {
            return Ok(());
        }

        let midi_in = MidiInput::new("height-sonify")
            .map_err(|e| SensorError::Unavailable(format!("MIDI init error: {}", e)))?;

        let ports = midi_in.ports();
        let port = ports.get(self.port_index).ok_or_else(|| {
            SensorError::Unavailable(format!(
                "MIDI port {} not found ({} available)",
                self.port_index,
                ports.len()
            ))
        })?;

        let port_name = midi_in
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());

        let shared = Arc::clone(&self.shared);
        let wanted_cc = self.cc;

        let connection = midi_in
            .connect(
                port,
                "height-sonify-input",
                move |_timestamp, message, _| {
                    // Control change: [0xB0 | channel, cc_number, value]
                    if message.len() == 3
                        && (message[0] & 0xF0) == 0xB0
                        && (message[1] & 0x7F) == wanted_cc
                    {
                        shared.set(message[2] & 0x7F);
                    }
                },
                (),
            )
            .map_err(|e| SensorError::Unavailable(format!("MIDI connect error: {}", e)))?;

        log::info!("MIDI sensor connected: {} (CC {})", port_name, self.cc);
        self.connection = Some(connection);
        self.port_name = Some(port_name);
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<PersonSample>, SensorError> {
        if self.connection.is_none() {
            return Err(SensorError::Read("MIDI sensor not connected".to_string()));
        }
        std::thread::sleep(self.frame_interval);
        Ok(self
            .shared
            .fresh(self.presence_hold)
            .map(|value| PersonSample::new(cc_to_position(value))))
    }

    fn name(&self) -> String {
        match &self.port_name {
            Some(name) => format!("MIDI {} CC {}", name, self.cc),
            None => format!("MIDI port {} CC {}", self.port_index, self.cc),
        }
    }
}

impl Drop for MidiSource {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
            log::info!("MIDI sensor disconnected");
        }
    }
}
