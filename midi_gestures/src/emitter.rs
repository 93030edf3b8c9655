//! MIDI output: port discovery and Control Change emission.
//!
//! The port is opened once at startup and held for the whole run.  Each
//! frame's measurements go out as 3-byte CC messages in signal order.

use gesture_cc::{CcAssignments, Measurement};
use thiserror::Error;

/// Client name registered with the MIDI backend.
pub const CLIENT_NAME: &str = "midi-gestures";

#[derive(Debug, Error)]
pub enum MidiError {
    #[error("MIDI backend unavailable: {0}")]
    Init(String),

    #[error("cannot open MIDI port \"{port}\": {reason}")]
    Connect { port: String, reason: String },

    #[error("no MIDI port matching \"{substring}\" and cannot create virtual port \"{name}\": {reason}")]
    Virtual { substring: String, name: String, reason: String },

    #[error("MIDI send failed: {0}")]
    Send(String),
}

// ════════════════════════════════════════════════════════════════════════════
// MidiSink — abstraction over midir / recorders (for testing)
// ════════════════════════════════════════════════════════════════════════════

/// Somewhere raw MIDI messages can be written.
pub trait MidiSink {
    fn send(&mut self, message: &[u8]) -> Result<(), MidiError>;
    fn port_name(&self) -> &str;
}

// ── midir backend ─────────────────────────────────────────────────────────

/// An open midir output connection.  Closed on drop.
pub struct MidirSink {
    conn:      Option<midir::MidiOutputConnection>,
    port_name: String,
}

impl MidiSink for MidirSink {
    fn send(&mut self, message: &[u8]) -> Result<(), MidiError> {
        match self.conn.as_mut() {
            Some(conn) => conn.send(message).map_err(|e| MidiError::Send(e.to_string())),
            None       => Err(MidiError::Send("connection closed".to_string())),
        }
    }

    fn port_name(&self) -> &str { &self.port_name }
}

impl Drop for MidirSink {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close();
            tracing::info!(port = %self.port_name, "MIDI port closed");
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Port discovery
// ════════════════════════════════════════════════════════════════════════════

/// Index of the first name containing `substring` (case-sensitive).
pub fn select_port<S: AsRef<str>>(names: &[S], substring: &str) -> Option<usize> {
    names.iter().position(|n| n.as_ref().contains(substring))
}

/// Names of all MIDI output ports, in backend order.
pub fn list_output_ports() -> Result<Vec<String>, MidiError> {
    let midi_out = midir::MidiOutput::new(CLIENT_NAME).map_err(|e| MidiError::Init(e.to_string()))?;
    Ok(port_names(&midi_out))
}

fn port_names(midi_out: &midir::MidiOutput) -> Vec<String> {
    midi_out
        .ports()
        .iter()
        .map(|p| midi_out.port_name(p).unwrap_or_else(|_| "<unknown>".to_string()))
        .collect()
}

/// Open the first output port whose name contains `substring`, or create a
/// virtual port called `virtual_name` when none does.
pub fn open_output(substring: &str, virtual_name: &str) -> Result<MidirSink, MidiError> {
    let midi_out = midir::MidiOutput::new(CLIENT_NAME).map_err(|e| MidiError::Init(e.to_string()))?;

    let names = port_names(&midi_out);
    tracing::info!(ports = ?names, "available MIDI output ports");

    if let Some(idx) = select_port(&names, substring) {
        let ports = midi_out.ports();
        if let Some(port) = ports.get(idx) {
            let name = names[idx].clone();
            let conn = midi_out
                .connect(port, "midi-gestures-cc")
                .map_err(|e| MidiError::Connect { port: name.clone(), reason: e.to_string() })?;
            tracing::info!(port = %name, "opened MIDI port");
            return Ok(MidirSink { conn: Some(conn), port_name: name });
        }
    }

    let conn = create_virtual(midi_out, virtual_name).map_err(|reason| MidiError::Virtual {
        substring: substring.to_string(),
        name:      virtual_name.to_string(),
        reason,
    })?;
    tracing::info!(port = %virtual_name, "opened virtual MIDI port (no \"{}\" port found)", substring);
    Ok(MidirSink { conn: Some(conn), port_name: virtual_name.to_string() })
}

#[cfg(unix)]
fn create_virtual(midi_out: midir::MidiOutput, name: &str) -> Result<midir::MidiOutputConnection, String> {
    use midir::os::unix::VirtualOutput;
    midi_out.create_virtual(name).map_err(|e| e.to_string())
}

#[cfg(not(unix))]
fn create_virtual(_midi_out: midir::MidiOutput, _name: &str) -> Result<midir::MidiOutputConnection, String> {
    Err("virtual ports are not supported on this platform".to_string())
}

// ════════════════════════════════════════════════════════════════════════════
// CcEmitter
// ════════════════════════════════════════════════════════════════════════════

/// Sends measurements as Control Change messages on a fixed channel.
pub struct CcEmitter<S: MidiSink> {
    sink:        S,
    channel:     u8,
    assignments: CcAssignments,
}

impl<S: MidiSink> CcEmitter<S> {
    pub fn new(sink: S, channel: u8, assignments: CcAssignments) -> Self {
        CcEmitter { sink, channel, assignments }
    }

    pub fn sink(&self) -> &S { &self.sink }

    pub fn port_name(&self) -> &str { self.sink.port_name() }

    /// Send one CC per measurement, in order.  A failed send is logged and
    /// skipped; returns how many messages went out.
    pub fn emit(&mut self, measurements: &[Measurement]) -> usize {
        let mut sent = 0;
        for m in measurements {
            let cc = m.control_change(self.channel, &self.assignments);
            match self.sink.send(&cc.to_bytes()) {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(controller = cc.controller, "{}", e),
            }
        }
        sent
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Recording sink (tests)
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
pub(crate) mod testing {
    use super::{MidiError, MidiSink};

    /// Keeps every message; optionally fails every send.
    #[derive(Default)]
    pub struct RecordingSink {
        pub sent:    Vec<Vec<u8>>,
        pub failing: bool,
    }

    impl MidiSink for RecordingSink {
        fn send(&mut self, message: &[u8]) -> Result<(), MidiError> {
            if self.failing {
                return Err(MidiError::Send("sink offline".to_string()));
            }
            self.sent.push(message.to_vec());
            Ok(())
        }

        fn port_name(&self) -> &str { "recorder" }
    }
}
