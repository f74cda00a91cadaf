//! OSC message emission
//!
//! Builds the addressed messages understood by the synthesis engine and hands
//! them to a [`Transport`]. Delivery is best-effort: the [`Emitter`] logs a
//! failed send and carries on, it never retries or propagates.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;

use rosc::{OscMessage, OscPacket, OscType};
use thiserror::Error;

/// Errors raised by a transport. Never escape the emitter.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode OSC packet: {0}")]
    Encode(String),

    #[error("Could not resolve target address: {0}")]
    Resolve(String),
}

/// Something that can put an OSC message on the wire
pub trait Transport: Send + Sync {
    fn send(&self, message: &OscMessage) -> Result<(), TransportError>;
}

/// Fire-and-forget UDP transport
pub struct UdpTransport {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpTransport {
    /// Bind an ephemeral local port and aim at `target` (e.g. `127.0.0.1:57120`)
    pub fn connect(target: &str) -> Result<Self, TransportError> {
        let target = target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| TransportError::Resolve(target.to_string()))?;
        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr)?;
        log::info!("Sending OSC to {}", target);
        Ok(Self { socket, target })
    }
}

impl Transport for UdpTransport {
    fn send(&self, message: &OscMessage) -> Result<(), TransportError> {
        let packet = OscPacket::Message(message.clone());
        let bytes =
            rosc::encoder::encode(&packet).map_err(|e| TransportError::Encode(format!("{:?}", e)))?;
        self.socket.send_to(&bytes, self.target)?;
        Ok(())
    }
}

/// Transport that only logs, for running without an engine (`--dry-run`)
pub struct LogTransport;

impl Transport for LogTransport {
    fn send(&self, message: &OscMessage) -> Result<(), TransportError> {
        log::info!("OSC {} {:?}", message.addr, message.args);
        Ok(())
    }
}

/// Transport that keeps every message, in order (tests)
#[cfg(test)]
#[derive(Default)]
pub struct RecordingTransport {
    messages: std::sync::Mutex<Vec<OscMessage>>,
}

#[cfg(test)]
impl RecordingTransport {
    pub fn messages(&self) -> Vec<OscMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.addr).collect()
    }
}

#[cfg(test)]
impl Transport for RecordingTransport {
    fn send(&self, message: &OscMessage) -> Result<(), TransportError> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Best-effort sender shared by the producer and consumer
#[derive(Clone)]
pub struct Emitter {
    transport: Arc<dyn Transport>,
}

impl Emitter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn emit(&self, message: OscMessage) {
        if let Err(e) = self.transport.send(&message) {
            log::warn!("Dropped OSC message {}: {}", message.addr, e);
        }
    }
}

pub const HEIGHT: &str = "/height";
pub const SAMPLE_SELECT: &str = "/sample/select";
pub const SAMPLE_START: &str = "/sample/start";
pub const SAMPLE_STOP: &str = "/sample/stop";
pub const PERSON_ENTER: &str = "/person/enter";
pub const PERSON_EXIT: &str = "/person/exit";
pub const BAYESIAN: &str = "/bayesian";
pub const PROBABILITY: &str = "/probability";
pub const SYNTH_NEW: &str = "/s_new";
pub const NODE_FREE: &str = "/n_free";

fn message(addr: &str, args: Vec<OscType>) -> OscMessage {
    OscMessage {
        addr: addr.to_string(),
        args,
    }
}

/// `/height [height_cm, freq_hz]`
pub fn height(height_cm: f64, freq_hz: f64) -> OscMessage {
    message(
        HEIGHT,
        vec![OscType::Float(height_cm as f32), OscType::Float(freq_hz as f32)],
    )
}

/// `/sample/select [index]`
pub fn sample_select(index: usize) -> OscMessage {
    message(SAMPLE_SELECT, vec![OscType::Int(index as i32)])
}

/// `/sample/start [height_cm, freq_hz]`
pub fn sample_start(height_cm: f64, freq_hz: f64) -> OscMessage {
    message(
        SAMPLE_START,
        vec![OscType::Float(height_cm as f32), OscType::Float(freq_hz as f32)],
    )
}

/// `/sample/stop [1]`
pub fn sample_stop() -> OscMessage {
    message(SAMPLE_STOP, vec![OscType::Int(1)])
}

/// `/person/enter [1]`
pub fn person_enter() -> OscMessage {
    message(PERSON_ENTER, vec![OscType::Int(1)])
}

/// `/person/exit [1]`
pub fn person_exit() -> OscMessage {
    message(PERSON_EXIT, vec![OscType::Int(1)])
}

/// `/bayesian [belief, confidence, uncertainty]`
pub fn bayesian(belief: f64, confidence: f64, uncertainty: f64) -> OscMessage {
    message(
        BAYESIAN,
        vec![
            OscType::Float(belief as f32),
            OscType::Float(confidence as f32),
            OscType::Float(uncertainty as f32),
        ],
    )
}

/// `/probability [value]`
pub fn probability(value: f64) -> OscMessage {
    message(PROBABILITY, vec![OscType::Float(value as f32)])
}

/// `/s_new ["default", id, 0, 0, "freq", f, "amp", a]`: add a `default`
/// synth at the head of the root group.
pub fn synth_new(synth_id: i32, freq_hz: f64, amplitude: f64) -> OscMessage {
    message(
        SYNTH_NEW,
        vec![
            OscType::String("default".to_string()),
            OscType::Int(synth_id),
            OscType::Int(0),
            OscType::Int(0),
            OscType::String("freq".to_string()),
            OscType::Float(freq_hz as f32),
            OscType::String("amp".to_string()),
            OscType::Float(amplitude as f32),
        ],
    )
}

/// `/n_free [id]`
pub fn node_free(synth_id: i32) -> OscMessage {
    message(NODE_FREE, vec![OscType::Int(synth_id)])
}
