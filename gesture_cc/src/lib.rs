//! # gesture_cc
//!
//! Turn hand landmarks into MIDI Control Change values.
//!
//! A landmark detector reports up to two hands per video frame, 21 points
//! each.  From the thumb and index fingertips we measure four pixel
//! distances and scale each one onto the 0–127 CC range:
//!
//! | Signal | Endpoints | Default CC |
//! |---|---|---|
//! | [`Signal::LeftPinch`]  | left thumb tip ↔ left index tip   | 20 |
//! | [`Signal::RightPinch`] | right thumb tip ↔ right index tip | 21 |
//! | [`Signal::ThumbSpan`]  | left thumb tip ↔ right thumb tip  | 22 |
//! | [`Signal::IndexSpan`]  | left index tip ↔ right index tip  | 23 |
//!
//! Every frame is measured independently: there is no smoothing and no
//! state carried between frames, apart from the [`SendThrottle`] that paces
//! how often the results go out on the wire.
//!
//! No MIDI driver is involved here; CC messages are encoded as raw bytes
//! and handed to whatever sink the caller owns.
//!
//! ## Quick start
//!
//! ```rust
//! use gesture_cc::{
//!     CalibrationBounds, CcAssignments, Fingertips, HandFrame, Handedness,
//!     Landmark, LandmarkSet, measure, landmark,
//! };
//!
//! let mut points = [Landmark::default(); landmark::COUNT];
//! points[landmark::THUMB_TIP]        = Landmark::new(0.50, 0.50, 0.0);
//! points[landmark::INDEX_FINGER_TIP] = Landmark::new(0.75, 0.50, 0.0);
//!
//! let mut frame = HandFrame::default();
//! frame.push(LandmarkSet::new(Handedness::Left, points, 0.9));
//!
//! // 640 px wide frame: the fingertips are 160 px apart.
//! let tips = Fingertips::from_frame(&frame, 640, 480);
//! let measured = measure(&tips, &CalibrationBounds::default());
//!
//! assert_eq!(measured.len(), 1);
//! assert_eq!(measured[0].value, 47);
//!
//! let cc = measured[0].control_change(0, &CcAssignments::default());
//! assert_eq!(cc.to_bytes(), [0xB0, 20, 47]);
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Largest value a 7-bit MIDI data byte can carry.
pub const CC_MAX: u8 = 127;

/// Default lower calibration bound, in pixels.
pub const MIN_DIST_PX: f32 = 20.0;

/// Default upper calibration bound, in pixels.
pub const MAX_DIST_PX: f32 = 400.0;

// ════════════════════════════════════════════════════════════════════════════
// Landmark topology
// ════════════════════════════════════════════════════════════════════════════

/// Landmark indices of the 21-point hand model.
pub mod landmark {
    /// Points per hand.
    pub const COUNT: usize = 21;

    pub const WRIST:             usize = 0;
    pub const THUMB_CMC:         usize = 1;
    pub const THUMB_MCP:         usize = 2;
    pub const THUMB_IP:          usize = 3;
    pub const THUMB_TIP:         usize = 4;
    pub const INDEX_FINGER_MCP:  usize = 5;
    pub const INDEX_FINGER_PIP:  usize = 6;
    pub const INDEX_FINGER_DIP:  usize = 7;
    pub const INDEX_FINGER_TIP:  usize = 8;
    pub const MIDDLE_FINGER_MCP: usize = 9;
    pub const MIDDLE_FINGER_PIP: usize = 10;
    pub const MIDDLE_FINGER_DIP: usize = 11;
    pub const MIDDLE_FINGER_TIP: usize = 12;
    pub const RING_FINGER_MCP:   usize = 13;
    pub const RING_FINGER_PIP:   usize = 14;
    pub const RING_FINGER_DIP:   usize = 15;
    pub const RING_FINGER_TIP:   usize = 16;
    pub const PINKY_MCP:         usize = 17;
    pub const PINKY_PIP:         usize = 18;
    pub const PINKY_DIP:         usize = 19;
    pub const PINKY_TIP:         usize = 20;

    /// Bones of the skeleton as pairs of landmark indices.
    pub const CONNECTIONS: [(usize, usize); 21] = [
        (WRIST, THUMB_CMC), (THUMB_CMC, THUMB_MCP), (THUMB_MCP, THUMB_IP), (THUMB_IP, THUMB_TIP),
        (WRIST, INDEX_FINGER_MCP), (INDEX_FINGER_MCP, INDEX_FINGER_PIP),
        (INDEX_FINGER_PIP, INDEX_FINGER_DIP), (INDEX_FINGER_DIP, INDEX_FINGER_TIP),
        (INDEX_FINGER_MCP, MIDDLE_FINGER_MCP), (MIDDLE_FINGER_MCP, MIDDLE_FINGER_PIP),
        (MIDDLE_FINGER_PIP, MIDDLE_FINGER_DIP), (MIDDLE_FINGER_DIP, MIDDLE_FINGER_TIP),
        (MIDDLE_FINGER_MCP, RING_FINGER_MCP), (RING_FINGER_MCP, RING_FINGER_PIP),
        (RING_FINGER_PIP, RING_FINGER_DIP), (RING_FINGER_DIP, RING_FINGER_TIP),
        (RING_FINGER_MCP, PINKY_MCP), (WRIST, PINKY_MCP),
        (PINKY_MCP, PINKY_PIP), (PINKY_PIP, PINKY_DIP), (PINKY_DIP, PINKY_TIP),
    ];
}

// ════════════════════════════════════════════════════════════════════════════
// Landmark / LandmarkSet / HandFrame
// ════════════════════════════════════════════════════════════════════════════

/// One detector landmark.  `x` and `y` are normalised to the frame
/// (0.0–1.0); `z` is relative depth and is not used for measuring.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Landmark { x, y, z }
    }

    /// Position in pixels, truncated to the pixel grid.
    pub fn to_pixel(self, width: u32, height: u32) -> Point {
        Point::new(
            (self.x * width as f32).trunc(),
            (self.y * height as f32).trunc(),
        )
    }
}

/// Which hand a landmark set belongs to, as reported by the detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    /// Parse a detector label (`"Left"` / `"Right"`, any case).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "left"  => Some(Handedness::Left),
            "right" => Some(Handedness::Right),
            _       => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Handedness::Left  => "Left",
            Handedness::Right => "Right",
        }
    }

    pub fn other(self) -> Self {
        match self {
            Handedness::Left  => Handedness::Right,
            Handedness::Right => Handedness::Left,
        }
    }
}

impl fmt::Display for Handedness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The 21 landmarks of one detected hand.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkSet {
    pub handedness: Handedness,
    pub landmarks:  [Landmark; landmark::COUNT],
    /// Detector confidence, 0.0–1.0.
    pub score:      f32,
}

impl LandmarkSet {
    pub fn new(handedness: Handedness, landmarks: [Landmark; landmark::COUNT], score: f32) -> Self {
        LandmarkSet { handedness, landmarks, score }
    }

    /// Build a set from a slice, which must hold exactly
    /// [`landmark::COUNT`] points.
    pub fn from_slice(handedness: Handedness, points: &[Landmark], score: f32) -> Option<Self> {
        let landmarks: [Landmark; landmark::COUNT] = points.try_into().ok()?;
        Some(LandmarkSet { handedness, landmarks, score })
    }

    pub fn thumb_tip(&self) -> Landmark { self.landmarks[landmark::THUMB_TIP] }
    pub fn index_tip(&self) -> Landmark { self.landmarks[landmark::INDEX_FINGER_TIP] }

    /// All landmarks in pixel coordinates, in topology order.
    pub fn to_pixels(&self, width: u32, height: u32) -> Vec<Point> {
        self.landmarks.iter().map(|l| l.to_pixel(width, height)).collect()
    }
}

/// Everything the detector found in one video frame.
///
/// Normally zero, one or two sets.  Handedness comes straight from the
/// detector and is not second-guessed: if it labels both hands "Left",
/// [`HandFrame::hand`] returns the later of the two.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HandFrame {
    pub hands: Vec<LandmarkSet>,
}

impl HandFrame {
    pub fn new(hands: Vec<LandmarkSet>) -> Self {
        HandFrame { hands }
    }

    pub fn push(&mut self, set: LandmarkSet) {
        self.hands.push(set);
    }

    pub fn is_empty(&self) -> bool { self.hands.is_empty() }
    pub fn len(&self) -> usize { self.hands.len() }

    /// The (last reported) hand with the given label.
    pub fn hand(&self, handedness: Handedness) -> Option<&LandmarkSet> {
        self.hands.iter().rev().find(|h| h.handedness == handedness)
    }

    pub fn left(&self)  -> Option<&LandmarkSet> { self.hand(Handedness::Left) }
    pub fn right(&self) -> Option<&LandmarkSet> { self.hand(Handedness::Right) }
}

// ════════════════════════════════════════════════════════════════════════════
// Point — pixel geometry
// ════════════════════════════════════════════════════════════════════════════

/// A position in frame pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Point { x, y }
    }

    /// Euclidean distance in pixels.
    pub fn distance_to(self, other: Point) -> f32 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Direction of the line `self → other` in degrees, −180..=180.
    /// Image y grows downward, so positive angles point down-screen.
    pub fn angle_to(self, other: Point) -> f32 {
        (other.y - self.y).atan2(other.x - self.x).to_degrees()
    }

    pub fn midpoint(self, other: Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Fingertips — the four points every signal is built from
// ════════════════════════════════════════════════════════════════════════════

/// Thumb and index tips of both hands, in pixels.  A hand that was not
/// detected leaves both of its tips `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Fingertips {
    pub left_thumb:  Option<Point>,
    pub left_index:  Option<Point>,
    pub right_thumb: Option<Point>,
    pub right_index: Option<Point>,
}

impl Fingertips {
    /// Project the hands of `frame` into a `width` × `height` image.
    pub fn from_frame(frame: &HandFrame, width: u32, height: u32) -> Self {
        let tips = |hand: Option<&LandmarkSet>| match hand {
            Some(h) => (
                Some(h.thumb_tip().to_pixel(width, height)),
                Some(h.index_tip().to_pixel(width, height)),
            ),
            None => (None, None),
        };
        let (left_thumb, left_index)   = tips(frame.left());
        let (right_thumb, right_index) = tips(frame.right());
        Fingertips { left_thumb, left_index, right_thumb, right_index }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Calibration — pixel distance → 0..=127
// ════════════════════════════════════════════════════════════════════════════

/// Rejected calibration bounds.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum BoundsError {
    #[error("calibration bounds must be finite (min={min}, max={max})")]
    NotFinite { min: f32, max: f32 },

    #[error("calibration max ({max}px) must be greater than min ({min}px)")]
    Degenerate { min: f32, max: f32 },
}

/// Scale a pixel distance onto the CC range.
///
/// `round(clamp((distance - min) / (max - min), 0, 1) * 127)`.
///
/// When `max <= min` there is no range to scale across and the result is
/// always `0`.  A NaN distance also yields `0`.
///
/// ```rust
/// use gesture_cc::map_to_cc;
///
/// assert_eq!(map_to_cc(20.0,  20.0, 400.0), 0);
/// assert_eq!(map_to_cc(210.0, 20.0, 400.0), 64);
/// assert_eq!(map_to_cc(999.0, 20.0, 400.0), 127);
/// assert_eq!(map_to_cc(50.0,  80.0,  80.0), 0);
/// ```
pub fn map_to_cc(distance: f32, min: f32, max: f32) -> u8 {
    // `!(max > min)` also catches NaN bounds.
    if !(max > min) || distance.is_nan() {
        return 0;
    }
    let norm = ((distance - min) / (max - min)).clamp(0.0, 1.0);
    (norm * CC_MAX as f32).round() as u8
}

/// Validated minimum / maximum pixel distance.
///
/// Fixed for the whole run; the constructor is the only way in, so a
/// `CalibrationBounds` always has `min < max`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationBounds {
    min: f32,
    max: f32,
}

impl CalibrationBounds {
    pub fn new(min: f32, max: f32) -> Result<Self, BoundsError> {
        if !min.is_finite() || !max.is_finite() {
            return Err(BoundsError::NotFinite { min, max });
        }
        if max <= min {
            return Err(BoundsError::Degenerate { min, max });
        }
        Ok(CalibrationBounds { min, max })
    }

    pub fn min(&self) -> f32 { self.min }
    pub fn max(&self) -> f32 { self.max }

    /// Map a distance with these bounds, see [`map_to_cc`].
    pub fn map(&self, distance: f32) -> u8 {
        map_to_cc(distance, self.min, self.max)
    }
}

impl Default for CalibrationBounds {
    fn default() -> Self {
        CalibrationBounds { min: MIN_DIST_PX, max: MAX_DIST_PX }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ControlChange — the 3-byte wire message
// ════════════════════════════════════════════════════════════════════════════

/// A MIDI Control Change message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlChange {
    /// 0–15 (channel 1 is 0).
    pub channel:    u8,
    pub controller: u8,
    pub value:      u8,
}

impl ControlChange {
    /// Status nibble of a Control Change.
    pub const STATUS: u8 = 0xB0;

    /// Channel and controller are masked to their bit widths; the value is
    /// clamped to 127.
    pub fn new(channel: u8, controller: u8, value: u8) -> Self {
        ControlChange {
            channel:    channel & 0x0F,
            controller: controller & 0x7F,
            value:      value.min(CC_MAX),
        }
    }

    pub fn status(&self) -> u8 {
        Self::STATUS | (self.channel & 0x0F)
    }

    pub fn to_bytes(&self) -> [u8; 3] {
        [self.status(), self.controller & 0x7F, self.value.min(CC_MAX)]
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Signal — the four measured distances
// ════════════════════════════════════════════════════════════════════════════

/// One of the four fingertip distances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Left thumb tip ↔ left index tip.
    LeftPinch,
    /// Right thumb tip ↔ right index tip.
    RightPinch,
    /// Left thumb tip ↔ right thumb tip.
    ThumbSpan,
    /// Left index tip ↔ right index tip.
    IndexSpan,
}

impl Signal {
    /// Emission order within a frame.
    pub const ALL: [Signal; 4] = [
        Signal::LeftPinch,
        Signal::RightPinch,
        Signal::ThumbSpan,
        Signal::IndexSpan,
    ];

    /// Short overlay label.
    pub fn label(self) -> &'static str {
        match self {
            Signal::LeftPinch  => "L T-I",
            Signal::RightPinch => "R T-I",
            Signal::ThumbSpan  => "T-T",
            Signal::IndexSpan  => "I-I",
        }
    }

    /// The two points this signal spans, if both are present.
    pub fn endpoints(self, tips: &Fingertips) -> Option<(Point, Point)> {
        let pair = match self {
            Signal::LeftPinch  => (tips.left_thumb, tips.left_index),
            Signal::RightPinch => (tips.right_thumb, tips.right_index),
            Signal::ThumbSpan  => (tips.left_thumb, tips.right_thumb),
            Signal::IndexSpan  => (tips.left_index, tips.right_index),
        };
        match pair {
            (Some(a), Some(b)) => Some((a, b)),
            _                  => None,
        }
    }
}

/// Controller number for each signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CcAssignments {
    pub left_pinch:  u8,
    pub right_pinch: u8,
    pub thumb_span:  u8,
    pub index_span:  u8,
}

impl CcAssignments {
    pub fn controller(&self, signal: Signal) -> u8 {
        match signal {
            Signal::LeftPinch  => self.left_pinch,
            Signal::RightPinch => self.right_pinch,
            Signal::ThumbSpan  => self.thumb_span,
            Signal::IndexSpan  => self.index_span,
        }
    }
}

impl Default for CcAssignments {
    fn default() -> Self {
        CcAssignments {
            left_pinch:  20,
            right_pinch: 21,
            thumb_span:  22,
            index_span:  23,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Measurement
// ════════════════════════════════════════════════════════════════════════════

/// One signal measured in one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    pub signal:    Signal,
    pub from:      Point,
    pub to:        Point,
    /// Pixels.
    pub distance:  f32,
    /// Degrees; for display only.
    pub angle_deg: f32,
    /// Mapped CC value, 0–127.
    pub value:     u8,
}

impl Measurement {
    pub fn control_change(&self, channel: u8, assignments: &CcAssignments) -> ControlChange {
        ControlChange::new(channel, assignments.controller(self.signal), self.value)
    }
}

/// Measure every signal whose endpoints are present, in [`Signal::ALL`]
/// order.  Signals missing a hand are left out.
pub fn measure(tips: &Fingertips, bounds: &CalibrationBounds) -> Vec<Measurement> {
    Signal::ALL
        .iter()
        .filter_map(|&signal| {
            let (from, to) = signal.endpoints(tips)?;
            let distance = from.distance_to(to);
            Some(Measurement {
                signal,
                from,
                to,
                distance,
                angle_deg: from.angle_to(to),
                value: bounds.map(distance),
            })
        })
        .collect()
}

// ════════════════════════════════════════════════════════════════════════════
// SendThrottle — caps the CC message rate
// ════════════════════════════════════════════════════════════════════════════

/// Lets at most one batch of messages through per interval.
///
/// The first call is always ready.  Afterwards a call is ready only once
/// strictly more than `interval` has passed since the last ready call.
#[derive(Clone, Debug)]
pub struct SendThrottle {
    interval: Duration,
    last:     Option<Instant>,
}

impl SendThrottle {
    pub fn new(interval: Duration) -> Self {
        SendThrottle { interval, last: None }
    }

    /// `rate_hz` batches per second (0 is treated as 1).
    pub fn per_second(rate_hz: u32) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / rate_hz.max(1) as f64))
    }

    pub fn interval(&self) -> Duration { self.interval }

    /// Whether to send at `now`; records `now` when it answers yes.
    pub fn ready(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) <= self.interval {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════
