use thiserror::Error;

use crate::config::ConfigError;
use crate::emitter::MidiError;
use crate::frame::CaptureError;
use crate::landmarks::DetectError;
use crate::overlay::OverlayError;

/// Anything that stops the controller.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Midi(#[from] MidiError),

    #[error("camera: {0}")]
    Camera(#[from] CaptureError),

    #[error("landmark detector: {0}")]
    Detector(#[from] DetectError),

    #[error("overlay: {0}")]
    Overlay(#[from] OverlayError),

    #[error("too many consecutive frame failures ({0}); last: {1}")]
    CaptureStalled(u32, CaptureError),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, AppError>;
