//! Landmark sources — the external hand model and the mouse/keyboard
//! simulator.
//!
//! The loop only sees [`LandmarkSource`]: one frame in, one [`HandFrame`]
//! out.  Whether the hands came from a real model or from the simulator is
//! invisible to measuring and emitting.

use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{Receiver, TryRecvError};

use gesture_cc::{landmark, HandFrame, Handedness, Landmark, LandmarkSet};
use serde::Deserialize;
use thiserror::Error;

use crate::frame::Frame;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("cannot start detector `{command}`: {source}")]
    Spawn { command: String, source: io::Error },

    #[error("detector did not signal ready, got {0:?}")]
    NotReady(String),

    #[error("detector pipe: {0}")]
    Io(#[from] io::Error),

    #[error("detector exited")]
    Closed,

    #[error("malformed detector reply: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("detector reported: {0}")]
    Detector(String),
}

impl DetectError {
    /// Errors after which the detector cannot answer again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DetectError::Spawn { .. } | DetectError::NotReady(_) | DetectError::Io(_) | DetectError::Closed
        )
    }
}

// ════════════════════════════════════════════════════════════════════════════
// LandmarkSource trait
// ════════════════════════════════════════════════════════════════════════════

/// Anything that can find hands in a frame.
pub trait LandmarkSource {
    fn detect(&mut self, frame: &Frame) -> Result<HandFrame, DetectError>;
}

// ════════════════════════════════════════════════════════════════════════════
// DetectorBridge — external model in a helper process
// ════════════════════════════════════════════════════════════════════════════

/// Hand landmark model running in a child process.
///
/// # Protocol
///
/// * The helper prints `READY` once its model is loaded.
/// * Per frame we write `width`, `height`, `channels` (little-endian `u32`)
///   followed by the raw RGB bytes.
/// * The helper answers with one JSON line:
///   `{"hands": [{"handedness": "Left", "score": 0.97, "landmarks": [{"x":…,"y":…,"z":…}, …]}], "error": null}`
///
/// The child is killed when the bridge is dropped.
pub struct DetectorBridge {
    process:   Child,
    stdin:     ChildStdin,
    stdout:    BufReader<ChildStdout>,
}

#[derive(Deserialize, Debug)]
struct LandmarkJson {
    x: f32,
    y: f32,
    #[serde(default)]
    z: f32,
}

#[derive(Deserialize, Debug)]
struct HandJson {
    handedness: String,
    #[serde(default = "full_score")]
    score:      f32,
    landmarks:  Vec<LandmarkJson>,
}

#[derive(Deserialize, Debug)]
struct ReplyJson {
    #[serde(default)]
    hands: Vec<HandJson>,
    #[serde(default)]
    error: Option<String>,
}

fn full_score() -> f32 { 1.0 }

impl DetectorBridge {
    /// Start `command[0]` with the remaining elements as arguments and wait
    /// for its `READY` line.
    pub fn spawn(command: &[String]) -> Result<Self, DetectError> {
        let joined = command.join(" ");
        let (program, args) = command.split_first().ok_or_else(|| DetectError::Spawn {
            command: joined.clone(),
            source:  io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
        })?;

        tracing::info!(command = %joined, "starting landmark detector");
        let mut process = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| DetectError::Spawn { command: joined.clone(), source })?;

        let (stdin, stdout) = match (process.stdin.take(), process.stdout.take()) {
            (Some(i), Some(o)) => (i, o),
            _ => {
                let _ = process.kill();
                return Err(DetectError::Closed);
            }
        };

        let mut bridge = DetectorBridge {
            process,
            stdin,
            stdout: BufReader::new(stdout),
        };

        let ready = bridge.read_line()?;
        if ready.trim() != "READY" {
            return Err(DetectError::NotReady(ready.trim().to_string()));
        }
        tracing::info!("landmark detector ready");
        Ok(bridge)
    }

    fn read_line(&mut self) -> Result<String, DetectError> {
        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(DetectError::Closed);
        }
        Ok(line)
    }
}

impl LandmarkSource for DetectorBridge {
    fn detect(&mut self, frame: &Frame) -> Result<HandFrame, DetectError> {
        self.stdin.write_all(&frame.width.to_le_bytes())?;
        self.stdin.write_all(&frame.height.to_le_bytes())?;
        self.stdin.write_all(&3u32.to_le_bytes())?;
        self.stdin.write_all(&frame.rgb)?;
        self.stdin.flush()?;

        let reply = self.read_line()?;
        parse_reply(&reply)
    }
}

impl Drop for DetectorBridge {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
        tracing::info!("landmark detector stopped");
    }
}

/// Normalised coordinates outside this range are detector garbage, not a
/// hand partly out of frame.
const COORD_RANGE: std::ops::RangeInclusive<f32> = -1.0..=2.0;

fn plausible(l: &LandmarkJson) -> bool {
    COORD_RANGE.contains(&l.x) && COORD_RANGE.contains(&l.y) && l.z.is_finite()
}

/// Turn one reply line into a [`HandFrame`].
///
/// Hands with an unknown handedness label, the wrong number of landmarks,
/// or coordinates that are not finite or far outside the frame are dropped.
/// The model applies its own detection threshold; `score` is the
/// handedness confidence and is kept as reported.
pub(crate) fn parse_reply(line: &str) -> Result<HandFrame, DetectError> {
    let reply: ReplyJson = serde_json::from_str(line.trim())?;
    if let Some(err) = reply.error {
        return Err(DetectError::Detector(err));
    }

    let mut frame = HandFrame::default();
    for hand in reply.hands {
        let Some(handedness) = Handedness::from_label(&hand.handedness) else {
            tracing::warn!("unknown handedness {:?}", hand.handedness);
            continue;
        };
        if !hand.landmarks.iter().all(plausible) {
            tracing::warn!(hand = %handedness, "landmark coordinates out of range");
            continue;
        }
        let points: Vec<Landmark> = hand.landmarks.iter().map(|l| Landmark::new(l.x, l.y, l.z)).collect();
        match LandmarkSet::from_slice(handedness, &points, hand.score) {
            Some(set) => frame.push(set),
            None => tracing::warn!(
                "expected {} landmarks, got {}", landmark::COUNT, points.len()
            ),
        }
    }
    Ok(frame)
}

// ════════════════════════════════════════════════════════════════════════════
// SimLandmarkSource — mouse/keyboard stand-in
// ════════════════════════════════════════════════════════════════════════════

/// Raw input event from the overlay window.
#[derive(Clone, Debug, PartialEq)]
pub enum SimInput {
    /// Cursor position in frame pixels.
    MouseMoved { x: f32, y: f32, width: u32, height: u32 },
    /// Scroll wheel delta; positive opens the pinch.
    Scroll(f32),
    KeyDown(SimKey),
}

/// Simulated key codes (mapped from minifb keys).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimKey {
    ToggleLeft,     // 1
    ToggleRight,    // 2
    SwitchHand,     // Tab
    OpenPinch,      // Up
    ClosePinch,     // Down
}

/// One synthetic hand: a wrist anchor and the gap between thumb and index
/// tips, both in normalised frame units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimHand {
    pub handedness: Handedness,
    pub wrist:      (f32, f32),
    pub spread:     f32,
    pub visible:    bool,
}

impl SimHand {
    const SPREAD_STEP: f32 = 0.02;
    const SPREAD_MAX:  f32 = 0.8;
    /// Height of the pinch point above the wrist.
    const REACH:       f32 = 0.22;

    pub fn new(handedness: Handedness, wrist: (f32, f32)) -> Self {
        SimHand { handedness, wrist, spread: 0.15, visible: true }
    }

    pub fn widen(&mut self, delta: f32) {
        self.spread = (self.spread + delta).clamp(0.0, Self::SPREAD_MAX);
    }

    /// A 21-point skeleton with the thumb toward the other hand.
    pub fn landmarks(&self) -> LandmarkSet {
        let (wx, wy) = self.wrist;
        // On screen the left hand's thumb points right and vice versa.
        let inward = match self.handedness {
            Handedness::Left  =>  1.0,
            Handedness::Right => -1.0,
        };
        let pinch = (wx, wy - Self::REACH);
        let thumb_tip = (pinch.0 + inward * self.spread / 2.0, pinch.1);
        let index_tip = (pinch.0 - inward * self.spread / 2.0, pinch.1);

        let lerp = |a: (f32, f32), b: (f32, f32), t: f32| {
            Landmark::new(a.0 + (b.0 - a.0) * t, a.1 + (b.1 - a.1) * t, 0.0)
        };

        let mut pts = [Landmark::new(wx, wy, 0.0); landmark::COUNT];
        // Thumb and index chains run straight from the wrist to their tips.
        for (i, t) in [0.25, 0.5, 0.75, 1.0].into_iter().enumerate() {
            pts[landmark::THUMB_CMC + i]        = lerp(self.wrist, thumb_tip, t);
            pts[landmark::INDEX_FINGER_MCP + i] = lerp(self.wrist, index_tip, t);
        }
        // The other three fingers stand upright behind the index.
        let fingers = [landmark::MIDDLE_FINGER_MCP, landmark::RING_FINGER_MCP, landmark::PINKY_MCP];
        for (n, &base) in fingers.iter().enumerate() {
            let offset = -inward * 0.035 * (n as f32 + 1.0);
            let root = (wx + offset, wy - 0.08);
            let tip  = (wx + offset, wy - 0.26 + 0.02 * n as f32);
            for (i, t) in [0.0, 0.33, 0.66, 1.0].into_iter().enumerate() {
                pts[base + i] = lerp(root, tip, t);
            }
        }
        LandmarkSet::new(self.handedness, pts, 1.0)
    }
}

/// Landmark source driven by [`SimInput`] events from the overlay window.
///
/// The overlay sends events as it polls the window; they are drained at the
/// start of every `detect` on the same thread.
pub struct SimLandmarkSource {
    rx:     Receiver<SimInput>,
    left:   SimHand,
    right:  SimHand,
    active: Handedness,
}

impl SimLandmarkSource {
    pub fn new(rx: Receiver<SimInput>) -> Self {
        SimLandmarkSource {
            rx,
            left:   SimHand::new(Handedness::Left,  (0.30, 0.75)),
            right:  SimHand::new(Handedness::Right, (0.70, 0.75)),
            active: Handedness::Left,
        }
    }

    pub fn active(&self) -> Handedness { self.active }

    pub fn hand(&self, handedness: Handedness) -> &SimHand {
        match handedness {
            Handedness::Left  => &self.left,
            Handedness::Right => &self.right,
        }
    }

    fn hand_mut(&mut self, handedness: Handedness) -> &mut SimHand {
        match handedness {
            Handedness::Left  => &mut self.left,
            Handedness::Right => &mut self.right,
        }
    }

    pub fn apply(&mut self, input: SimInput) {
        let active = self.active;
        match input {
            SimInput::MouseMoved { x, y, width, height } => {
                if width > 0 && height > 0 {
                    self.hand_mut(active).wrist = (x / width as f32, y / height as f32);
                }
            }
            SimInput::Scroll(delta) => {
                self.hand_mut(active).widen(delta.signum() * SimHand::SPREAD_STEP);
            }
            SimInput::KeyDown(SimKey::OpenPinch)   => self.hand_mut(active).widen(SimHand::SPREAD_STEP),
            SimInput::KeyDown(SimKey::ClosePinch)  => self.hand_mut(active).widen(-SimHand::SPREAD_STEP),
            SimInput::KeyDown(SimKey::ToggleLeft)  => self.left.visible = !self.left.visible,
            SimInput::KeyDown(SimKey::ToggleRight) => self.right.visible = !self.right.visible,
            SimInput::KeyDown(SimKey::SwitchHand)  => self.active = active.other(),
        }
    }
}

impl LandmarkSource for SimLandmarkSource {
    fn detect(&mut self, _frame: &Frame) -> Result<HandFrame, DetectError> {
        loop {
            match self.rx.try_recv() {
                Ok(input) => self.apply(input),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        let hands = [self.left, self.right]
            .iter()
            .filter(|h| h.visible)
            .map(SimHand::landmarks)
            .collect();
        Ok(HandFrame::new(hands))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use gesture_cc::Fingertips;
    use std::sync::mpsc;

    fn reply_with(hands: &str) -> String {
        format!(r#"{{"hands": [{}], "error": null}}"#, hands)
    }

    fn hand_json(label: &str, score: f32, n: usize) -> String {
        let pts: Vec<String> = (0..n)
            .map(|i| format!(r#"{{"x": {}, "y": 0.5, "z": 0.0}}"#, i as f32 / 40.0))
            .collect();
        format!(
            r#"{{"handedness": "{}", "score": {}, "landmarks": [{}]}}"#,
            label, score, pts.join(",")
        )
    }

    // ── parse_reply ───────────────────────────────────────────────────────
    #[test]
    fn parse_two_hands() {
        let line = reply_with(&format!("{},{}", hand_json("Left", 0.9, 21), hand_json("Right", 0.8, 21)));
        let frame = parse_reply(&line).unwrap();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.left().unwrap().index_tip().x, 8.0 / 40.0);
        assert_eq!(frame.right().unwrap().score, 0.8);
    }

    #[test]
    fn parse_empty_reply() {
        assert!(parse_reply(r#"{"hands": []}"#).unwrap().is_empty());
        assert!(parse_reply("{}\n").unwrap().is_empty());
    }

    #[test]
    fn parse_drops_short_hands() {
        let line = reply_with(&format!("{},{}", hand_json("Left", 0.9, 20), hand_json("Right", 0.3, 21)));
        let frame = parse_reply(&line).unwrap();
        assert_eq!(frame.len(), 1);
        assert!(frame.left().is_none());
        // Low handedness confidence is not a reason to drop a hand.
        assert_eq!(frame.right().unwrap().score, 0.3);
    }

    #[test]
    fn parse_drops_hands_with_wild_coordinates() {
        let wild = hand_json("Left", 0.9, 21).replacen(r#""x": 0,"#, r#""x": 1e39,"#, 1);
        let far = hand_json("Right", 0.9, 21).replacen(r#""y": 0.5,"#, r#""y": -7.5,"#, 1);
        let line = reply_with(&format!("{},{}", wild, far));
        assert!(parse_reply(&line).unwrap().is_empty());

        let edge = hand_json("Left", 0.9, 21).replacen(r#""x": 0,"#, r#""x": -0.2,"#, 1);
        assert_eq!(parse_reply(&reply_with(&edge)).unwrap().len(), 1);
    }

    #[test]
    fn parse_drops_unknown_label() {
        let line = reply_with(&hand_json("Both", 0.9, 21));
        assert!(parse_reply(&line).unwrap().is_empty());
    }

    #[test]
    fn parse_error_field_is_recoverable() {
        let err = parse_reply(r#"{"hands": [], "error": "bad frame"}"#).unwrap_err();
        assert!(matches!(err, DetectError::Detector(ref m) if m == "bad frame"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn parse_garbage_is_recoverable() {
        let err = parse_reply("Traceback (most recent call last):").unwrap_err();
        assert!(matches!(err, DetectError::Parse(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn spawn_missing_program_fails() {
        let cmd = vec!["/nonexistent/hand-detector".to_string()];
        let err = DetectorBridge::spawn(&cmd).err().unwrap();
        assert!(matches!(err, DetectError::Spawn { .. }));
        assert!(err.is_fatal());
    }

    // ── SimHand ───────────────────────────────────────────────────────────
    #[test]
    fn sim_hand_pinch_gap_matches_spread() {
        let mut hand = SimHand::new(Handedness::Left, (0.5, 0.8));
        hand.spread = 0.25;
        let frame = HandFrame::new(vec![hand.landmarks()]);
        let tips = Fingertips::from_frame(&frame, 800, 600);
        let gap = tips.left_thumb.unwrap().distance_to(tips.left_index.unwrap());
        assert!((gap - 200.0).abs() <= 1.0, "gap {}", gap);
    }

    #[test]
    fn sim_hand_thumb_points_inward() {
        let left  = SimHand::new(Handedness::Left,  (0.3, 0.8)).landmarks();
        let right = SimHand::new(Handedness::Right, (0.7, 0.8)).landmarks();
        assert!(left.thumb_tip().x > left.index_tip().x);
        assert!(right.thumb_tip().x < right.index_tip().x);
    }

    #[test]
    fn sim_spread_clamps() {
        let mut hand = SimHand::new(Handedness::Right, (0.5, 0.5));
        hand.widen(-5.0);
        assert_eq!(hand.spread, 0.0);
        hand.widen(5.0);
        assert_eq!(hand.spread, SimHand::SPREAD_MAX);
    }

    // ── SimLandmarkSource ─────────────────────────────────────────────────
    #[test]
    fn sim_source_starts_with_two_hands() {
        let (_tx, rx) = mpsc::channel();
        let mut src = SimLandmarkSource::new(rx);
        let frame = src.detect(&Frame::filled(4, 4, [0; 3])).unwrap();
        assert!(frame.left().is_some());
        assert!(frame.right().is_some());
    }

    #[test]
    fn sim_source_toggles_and_moves() {
        let (tx, rx) = mpsc::channel();
        let mut src = SimLandmarkSource::new(rx);
        tx.send(SimInput::KeyDown(SimKey::ToggleRight)).unwrap();
        tx.send(SimInput::KeyDown(SimKey::SwitchHand)).unwrap();
        tx.send(SimInput::KeyDown(SimKey::SwitchHand)).unwrap();
        tx.send(SimInput::MouseMoved { x: 100.0, y: 50.0, width: 200, height: 100 }).unwrap();

        let frame = src.detect(&Frame::filled(4, 4, [0; 3])).unwrap();
        assert!(frame.right().is_none());
        assert_eq!(frame.left().unwrap().landmarks[landmark::WRIST], Landmark::new(0.5, 0.5, 0.0));
    }

    #[test]
    fn sim_source_pinch_keys_affect_active_hand() {
        let (tx, rx) = mpsc::channel();
        let mut src = SimLandmarkSource::new(rx);
        let before = src.hand(Handedness::Right).spread;
        tx.send(SimInput::KeyDown(SimKey::SwitchHand)).unwrap();
        tx.send(SimInput::KeyDown(SimKey::OpenPinch)).unwrap();
        tx.send(SimInput::Scroll(3.0)).unwrap();
        src.detect(&Frame::filled(1, 1, [0; 3])).unwrap();
        assert_eq!(src.active(), Handedness::Right);
        assert!((src.hand(Handedness::Right).spread - (before + 0.04)).abs() < 1e-6);
        assert_eq!(src.hand(Handedness::Left).spread, before);
    }
}
