//! Run configuration.
//!
//! Everything here is fixed for the lifetime of a run.  Defaults reproduce
//! the stock setup (IAC bus, channel 1, CC 20–23, 20–400 px); `main.rs`
//! lets each value be overridden from the command line, nothing is read
//! from or written to disk.

use gesture_cc::{BoundsError, CalibrationBounds, CcAssignments, MAX_DIST_PX, MIN_DIST_PX};
use thiserror::Error;

/// Substring looked for in the MIDI output port names.
pub const DEFAULT_PORT_SUBSTRING: &str = "IAC";

/// Name of the virtual port created when no port matches.
pub const DEFAULT_VIRTUAL_PORT: &str = "PoseHandControl";

/// CC batches per second.
pub const DEFAULT_SEND_RATE_HZ: u32 = 30;

/// Helper process that wraps the hand landmark model (webcam mode).
pub const DEFAULT_DETECTOR_COMMAND: &str = "python3 scripts/hand_detect.py";

/// Frame size of the simulated camera.
pub const DEFAULT_SIM_WIDTH:  u32 = 640;
pub const DEFAULT_SIM_HEIGHT: u32 = 480;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error(transparent)]
    Bounds(#[from] BoundsError),

    #[error("MIDI channel must be 0–15, got {0}")]
    Channel(u8),

    #[error("CC number for {signal} must be 0–127, got {value}")]
    Controller { signal: &'static str, value: u8 },

    #[error("send rate must be at least 1 Hz")]
    SendRate,

    #[error("MIDI port substring must not be empty")]
    EmptyPortSubstring,

    #[error("virtual MIDI port name must not be empty")]
    EmptyVirtualPort,

    #[error("detector command must not be empty")]
    EmptyDetectorCommand,

    #[error("frame size must be non-zero, got {width}x{height}")]
    FrameSize { width: u32, height: u32 },
}

/// Configuration for the full application.
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    pub port_substring:    String,
    pub virtual_port_name: String,
    /// 0–15; channel 1 is 0.
    pub channel:           u8,
    pub cc:                CcAssignments,
    pub min_dist_px:       f32,
    pub max_dist_px:       f32,
    pub send_rate_hz:      u32,
    pub camera_index:      u32,
    /// Flip frames horizontally before detection so the overlay reads like a mirror.
    pub mirror:            bool,
    /// Program and arguments of the landmark helper.
    pub detector_command:  Vec<String>,
    pub sim_width:         u32,
    pub sim_height:        u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            port_substring:    DEFAULT_PORT_SUBSTRING.to_string(),
            virtual_port_name: DEFAULT_VIRTUAL_PORT.to_string(),
            channel:           0,
            cc:                CcAssignments::default(),
            min_dist_px:       MIN_DIST_PX,
            max_dist_px:       MAX_DIST_PX,
            send_rate_hz:      DEFAULT_SEND_RATE_HZ,
            camera_index:      0,
            mirror:            true,
            detector_command:  split_command(DEFAULT_DETECTOR_COMMAND),
            sim_width:         DEFAULT_SIM_WIDTH,
            sim_height:        DEFAULT_SIM_HEIGHT,
        }
    }
}

impl ControllerConfig {
    /// Check every field; the first problem found is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bounds()?;
        if self.channel > 15 {
            return Err(ConfigError::Channel(self.channel));
        }
        let controllers = [
            ("left pinch",  self.cc.left_pinch),
            ("right pinch", self.cc.right_pinch),
            ("thumb span",  self.cc.thumb_span),
            ("index span",  self.cc.index_span),
        ];
        for (signal, value) in controllers {
            if value > 127 {
                return Err(ConfigError::Controller { signal, value });
            }
        }
        if self.send_rate_hz == 0 {
            return Err(ConfigError::SendRate);
        }
        if self.port_substring.is_empty() {
            return Err(ConfigError::EmptyPortSubstring);
        }
        if self.virtual_port_name.trim().is_empty() {
            return Err(ConfigError::EmptyVirtualPort);
        }
        if self.detector_command.is_empty() {
            return Err(ConfigError::EmptyDetectorCommand);
        }
        if self.sim_width == 0 || self.sim_height == 0 {
            return Err(ConfigError::FrameSize { width: self.sim_width, height: self.sim_height });
        }
        Ok(())
    }

    pub fn bounds(&self) -> Result<CalibrationBounds, ConfigError> {
        Ok(CalibrationBounds::new(self.min_dist_px, self.max_dist_px)?)
    }
}

/// Split a shell-style command line on whitespace.  No quoting support;
/// paths with spaces need a wrapper script.
pub fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}
