//! # midi_gestures
//!
//! Webcam hand-tracking controller.  Each frame, the thumb and index
//! fingertips of both hands are located, four distances between them are
//! measured, and each distance is sent as a MIDI Control Change value.
//! A window shows the camera image with the skeletons, the measured lines
//! and their values.
//!
//! ## Signals
//!
//! | Signal | Between | Default CC |
//! |---|---|---|
//! | `L T-I` | left thumb ↔ left index | 20 |
//! | `R T-I` | right thumb ↔ right index | 21 |
//! | `T-T` | left thumb ↔ right thumb | 22 |
//! | `I-I` | left index ↔ right index | 23 |
//!
//! 20 px maps to 0, 400 px to 127.  A signal whose hand is not in view is
//! not sent.  Messages go out at most 30 times a second.
//!
//! ## Feature flags
//!
//! * (default) — **Simulation mode**: a test-pattern frame and two
//!   synthetic hands driven by mouse and keyboard.
//! * `webcam` — **Camera mode**: frames from a webcam, landmarks from an
//!   external detector process (see `scripts/hand_detect.py`).
//!
//! ### Simulation controls
//!
//! | Input | Action |
//! |---|---|
//! | Mouse | Move the active hand |
//! | `Tab` | Switch active hand |
//! | `Up` / `Down`, wheel | Open / close the active pinch |
//! | `1` / `2` | Show / hide left / right hand |
//! | `Q` | Quit |

pub mod config;
pub mod error;
pub mod frame;
pub mod landmarks;
pub mod emitter;
pub mod overlay;
pub mod app;
