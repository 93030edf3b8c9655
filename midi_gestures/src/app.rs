//! Top-level application state machine.
//!
//! [`run`] opens every resource, drives the frame loop until the user quits
//! or an input dies, then releases everything in order.  One iteration is
//! one frame: capture → detect → measure → emit → render.
//!
//! The loop itself ([`drive`]) only talks to traits, so it runs in tests
//! against scripted frames, hands and a recording MIDI sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use gesture_cc::{measure, CalibrationBounds, Fingertips, HandFrame, Measurement, SendThrottle};

use crate::config::ControllerConfig;
use crate::emitter::{self, CcEmitter, MidiSink};
use crate::error::{AppError, Result};
use crate::frame::{Frame, FrameSource};
use crate::landmarks::{LandmarkSource, SimInput};
use crate::overlay::{Overlay, OverlayStatus};

/// Window title.
pub const TITLE: &str = "midi-gestures — distances, angles, MIDI";

/// Consecutive capture failures after which the camera counts as gone.
pub const MAX_CAPTURE_FAILURES: u32 = 30;

// ════════════════════════════════════════════════════════════════════════════
// LoopState
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState { Initializing, Running, ShuttingDown }

impl LoopState {
    /// The only forward step from each state; `ShuttingDown` is terminal.
    pub fn advance(self) -> Self {
        match self {
            LoopState::Initializing => LoopState::Running,
            LoopState::Running      => LoopState::ShuttingDown,
            LoopState::ShuttingDown => LoopState::ShuttingDown,
        }
    }
}

fn advance(state: &mut LoopState) {
    let next = state.advance();
    tracing::info!(from = ?*state, to = ?next, "state change");
    *state = next;
}

// ════════════════════════════════════════════════════════════════════════════
// Controller — measure + emit for one frame
// ════════════════════════════════════════════════════════════════════════════

/// What one frame produced.
#[derive(Clone, Debug, Default)]
pub struct FrameReport {
    pub measurements: Vec<Measurement>,
    /// Whether this frame fell in a send slot of the throttle.
    pub midi_sent:    bool,
    /// Messages actually written.
    pub sent:         usize,
}

pub struct Controller<S: MidiSink> {
    emitter:  CcEmitter<S>,
    bounds:   CalibrationBounds,
    throttle: SendThrottle,
}

impl<S: MidiSink> Controller<S> {
    pub fn new(emitter: CcEmitter<S>, bounds: CalibrationBounds, throttle: SendThrottle) -> Self {
        Controller { emitter, bounds, throttle }
    }

    pub fn emitter(&self) -> &CcEmitter<S> { &self.emitter }

    /// Measure `hands` in a `width` × `height` frame and, if the throttle
    /// allows it at `now`, send the results.
    pub fn process(&mut self, hands: &HandFrame, width: u32, height: u32, now: Instant) -> FrameReport {
        let tips = Fingertips::from_frame(hands, width, height);
        let measurements = measure(&tips, &self.bounds);

        let midi_sent = self.throttle.ready(now);
        let sent = if midi_sent { self.emitter.emit(&measurements) } else { 0 };

        for m in &measurements {
            tracing::debug!(
                signal = m.signal.label(),
                distance = m.distance,
                value = m.value,
                sent = midi_sent,
                "measured"
            );
        }
        FrameReport { measurements, midi_sent, sent }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Screen — where frames are shown and quit is read
// ════════════════════════════════════════════════════════════════════════════

/// The loop's view of the overlay window.
pub trait Screen {
    /// Poll input; `false` means quit.
    fn poll_input(&mut self) -> bool;
    fn render(&mut self, frame: &Frame, hands: &HandFrame, measurements: &[Measurement], status: &OverlayStatus);
}

impl Screen for Overlay {
    fn poll_input(&mut self) -> bool { Overlay::poll_input(self) }

    fn render(&mut self, frame: &Frame, hands: &HandFrame, measurements: &[Measurement], status: &OverlayStatus) {
        Overlay::render(self, frame, hands, measurements, status)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// drive() — the frame loop
// ════════════════════════════════════════════════════════════════════════════

/// Run frames until quit.  `Ok` on a requested quit, `Err` when an input
/// can no longer deliver.
pub fn drive<S: MidiSink>(
    frames:     &mut dyn FrameSource,
    landmarks:  &mut dyn LandmarkSource,
    screen:     &mut dyn Screen,
    controller: &mut Controller<S>,
    mirror:     bool,
    hint:       &'static str,
    quit:       &AtomicBool,
) -> Result<()> {
    let mut failures = 0u32;
    loop {
        if quit.load(Ordering::Relaxed) {
            tracing::info!("interrupted");
            return Ok(());
        }
        if !screen.poll_input() {
            tracing::info!("quit requested");
            return Ok(());
        }

        let mut frame = match frames.next_frame() {
            Ok(f) => {
                failures = 0;
                f
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                failures += 1;
                tracing::warn!(failures, "skipping frame: {}", e);
                if failures >= MAX_CAPTURE_FAILURES {
                    return Err(AppError::CaptureStalled(failures, e));
                }
                continue;
            }
        };
        if mirror {
            frame.mirror_horizontal();
        }

        let (hands, report) = match landmarks.detect(&frame) {
            Ok(hands) => {
                let report = controller.process(&hands, frame.width, frame.height, Instant::now());
                (hands, report)
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                tracing::warn!("skipping detection: {}", e);
                (HandFrame::default(), FrameReport::default())
            }
        };

        let status = OverlayStatus {
            port:      controller.emitter().port_name().to_string(),
            source:    frames.name().to_string(),
            hands:     hands.len(),
            midi_sent: report.midi_sent && report.sent > 0,
            hint,
        };
        screen.render(&frame, &hands, &report.measurements, &status);
    }
}

// ════════════════════════════════════════════════════════════════════════════
// run() — open, loop, release
// ════════════════════════════════════════════════════════════════════════════

struct Inputs {
    frames:    Box<dyn FrameSource>,
    landmarks: Box<dyn LandmarkSource>,
    sim_tx:    Option<std::sync::mpsc::Sender<SimInput>>,
    hint:      &'static str,
}

#[cfg(feature = "webcam")]
fn open_inputs(config: &ControllerConfig) -> Result<Inputs> {
    use crate::frame::Webcam;
    use crate::landmarks::DetectorBridge;

    let frames = Webcam::open(config.camera_index)?;
    let landmarks = DetectorBridge::spawn(&config.detector_command)?;
    Ok(Inputs {
        frames:    Box::new(frames),
        landmarks: Box::new(landmarks),
        sim_tx:    None,
        hint:      "q=quit",
    })
}

#[cfg(not(feature = "webcam"))]
fn open_inputs(config: &ControllerConfig) -> Result<Inputs> {
    use crate::config::DEFAULT_SEND_RATE_HZ;
    use crate::frame::TestPattern;
    use crate::landmarks::SimLandmarkSource;

    let (tx, rx) = std::sync::mpsc::channel();
    Ok(Inputs {
        frames:    Box::new(TestPattern::new(config.sim_width, config.sim_height, DEFAULT_SEND_RATE_HZ)),
        landmarks: Box::new(SimLandmarkSource::new(rx)),
        sim_tx:    Some(tx),
        hint:      "mouse=move tab=hand up/down=pinch 1/2=show q=quit",
    })
}

/// Run the controller until quit.
///
/// This is the entry point called from `main.rs`.  Any startup failure is
/// returned before the loop starts; resources opened so far are released
/// on the way out.
pub fn run(config: ControllerConfig, quit: Arc<AtomicBool>) -> Result<()> {
    let mut state = LoopState::Initializing;
    tracing::info!(state = ?state, "starting");

    config.validate()?;
    let bounds = config.bounds()?;

    let sink = emitter::open_output(&config.port_substring, &config.virtual_port_name)?;
    let mut controller = Controller::new(
        CcEmitter::new(sink, config.channel, config.cc),
        bounds,
        SendThrottle::per_second(config.send_rate_hz),
    );

    let Inputs { mut frames, mut landmarks, sim_tx, hint } = open_inputs(&config)?;
    let (width, height) = frames.dimensions();
    let mut overlay = Overlay::open(TITLE, width, height, sim_tx)?;

    advance(&mut state);
    let result = drive(
        frames.as_mut(),
        landmarks.as_mut(),
        &mut overlay,
        &mut controller,
        config.mirror,
        hint,
        &quit,
    );
    if let Err(e) = &result {
        tracing::error!("{}", e);
    }

    advance(&mut state);
    drop(frames);
    drop(controller);
    drop(landmarks);
    drop(overlay);
    tracing::info!("shutdown complete");
    result
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::testing::RecordingSink;
    use crate::frame::CaptureError;
    use crate::landmarks::DetectError;
    use gesture_cc::{landmark, CcAssignments, Handedness, Landmark, LandmarkSet};
    use std::collections::VecDeque;
    use std::time::Duration;

    const W: u32 = 1000;
    const H: u32 = 1000;

    fn hand(handedness: Handedness, thumb_x: f32, index_x: f32) -> LandmarkSet {
        let mut pts = [Landmark::default(); landmark::COUNT];
        pts[landmark::THUMB_TIP]        = Landmark::new(thumb_x, 0.5005, 0.0);
        pts[landmark::INDEX_FINGER_TIP] = Landmark::new(index_x, 0.5005, 0.0);
        LandmarkSet::new(handedness, pts, 1.0)
    }

    fn controller() -> Controller<RecordingSink> {
        Controller::new(
            CcEmitter::new(RecordingSink::default(), 0, CcAssignments::default()),
            CalibrationBounds::default(),
            SendThrottle::per_second(30),
        )
    }

    fn sent_controllers(c: &Controller<RecordingSink>) -> Vec<u8> {
        c.emitter().sink().sent.iter().map(|m| m[1]).collect()
    }

    // ── scripted collaborators ────────────────────────────────────────────

    struct ScriptedFrames(VecDeque<std::result::Result<(), CaptureError>>);

    impl FrameSource for ScriptedFrames {
        fn name(&self) -> &str { "script" }
        fn dimensions(&self) -> (u32, u32) { (W, H) }
        fn next_frame(&mut self) -> std::result::Result<Frame, CaptureError> {
            match self.0.pop_front() {
                Some(Ok(()))  => Ok(Frame::filled(W, H, [0; 3])),
                Some(Err(e))  => Err(e),
                None          => Err(CaptureError::Disconnected),
            }
        }
    }

    struct ScriptedHands(VecDeque<std::result::Result<HandFrame, DetectError>>);

    impl LandmarkSource for ScriptedHands {
        fn detect(&mut self, _frame: &Frame) -> std::result::Result<HandFrame, DetectError> {
            self.0.pop_front().unwrap_or_else(|| Ok(HandFrame::default()))
        }
    }

    /// Quits after `frames_left` renders.
    struct CountingScreen {
        frames_left: usize,
        renders:     Vec<(usize, usize)>, // (hands, measurements)
    }

    impl Screen for CountingScreen {
        fn poll_input(&mut self) -> bool { self.frames_left > 0 }
        fn render(&mut self, _f: &Frame, hands: &HandFrame, m: &[Measurement], _s: &OverlayStatus) {
            self.frames_left -= 1;
            self.renders.push((hands.len(), m.len()));
        }
    }

    fn screen(frames: usize) -> CountingScreen {
        CountingScreen { frames_left: frames, renders: Vec::new() }
    }

    // ── LoopState ─────────────────────────────────────────────────────────
    #[test]
    fn state_machine_steps_forward_and_stops() {
        let s = LoopState::Initializing.advance();
        assert_eq!(s, LoopState::Running);
        assert_eq!(s.advance(), LoopState::ShuttingDown);
        assert_eq!(LoopState::ShuttingDown.advance(), LoopState::ShuttingDown);
    }

    // ── Controller ────────────────────────────────────────────────────────
    #[test]
    fn missing_right_hand_sends_only_left_pinch() {
        let mut c = controller();
        let hands = HandFrame::new(vec![hand(Handedness::Left, 0.1005, 0.3005)]);
        let report = c.process(&hands, W, H, Instant::now());
        assert_eq!(report.sent, 1);
        assert_eq!(sent_controllers(&c), vec![20]);
        assert_eq!(c.emitter().sink().sent[0], vec![0xB0, 20, 60]);
    }

    #[test]
    fn both_hands_send_four_in_order() {
        let mut c = controller();
        let hands = HandFrame::new(vec![
            hand(Handedness::Left,  0.1005, 0.1205),
            hand(Handedness::Right, 0.5005, 0.9005),
        ]);
        c.process(&hands, W, H, Instant::now());
        assert_eq!(sent_controllers(&c), vec![20, 21, 22, 23]);
        let values: Vec<u8> = c.emitter().sink().sent.iter().map(|m| m[2]).collect();
        assert_eq!(values, vec![0, 127, 127, 127]);
    }

    #[test]
    fn throttle_holds_back_fast_frames() {
        let mut c = controller();
        let hands = HandFrame::new(vec![hand(Handedness::Right, 0.2005, 0.4105)]);
        let t0 = Instant::now();
        assert!(c.process(&hands, W, H, t0).midi_sent);
        let held = c.process(&hands, W, H, t0 + Duration::from_millis(5));
        assert!(!held.midi_sent);
        assert_eq!(held.measurements.len(), 1);
        assert!(c.process(&hands, W, H, t0 + Duration::from_millis(40)).midi_sent);
        assert_eq!(c.emitter().sink().sent.len(), 2);
        assert_eq!(c.emitter().sink().sent[0][2], 64);
    }

    #[test]
    fn no_hands_sends_nothing_but_uses_slot() {
        let mut c = controller();
        let report = c.process(&HandFrame::default(), W, H, Instant::now());
        assert!(report.midi_sent);
        assert_eq!(report.sent, 0);
        assert!(report.measurements.is_empty());
    }

    // ── drive ─────────────────────────────────────────────────────────────
    #[test]
    fn drive_quits_cleanly_on_quit_key() {
        let mut frames = ScriptedFrames((0..10).map(|_| Ok(())).collect());
        let mut hands = ScriptedHands(VecDeque::from(vec![Ok(HandFrame::new(vec![
            hand(Handedness::Left, 0.1005, 0.2005),
        ]))]));
        let mut scr = screen(3);
        let mut c = controller();
        let quit = AtomicBool::new(false);

        let res = drive(&mut frames, &mut hands, &mut scr, &mut c, true, "", &quit);
        assert!(res.is_ok());
        assert_eq!(scr.renders, vec![(1, 1), (0, 0), (0, 0)]);
        assert_eq!(sent_controllers(&c), vec![20]);
    }

    #[test]
    fn drive_stops_on_quit_flag_before_capture() {
        let mut frames = ScriptedFrames(VecDeque::new());
        let mut hands = ScriptedHands(VecDeque::new());
        let mut scr = screen(5);
        let mut c = controller();
        let quit = AtomicBool::new(true);

        assert!(drive(&mut frames, &mut hands, &mut scr, &mut c, false, "", &quit).is_ok());
        assert!(scr.renders.is_empty());
    }

    #[test]
    fn drive_skips_bad_frames_and_continues() {
        let script = vec![
            Err(CaptureError::Capture("timeout".into())),
            Err(CaptureError::Decode("bad mjpeg".into())),
            Ok(()),
        ];
        let mut frames = ScriptedFrames(script.into_iter().collect());
        let mut hands = ScriptedHands(VecDeque::new());
        let mut scr = screen(1);
        let mut c = controller();

        let res = drive(&mut frames, &mut hands, &mut scr, &mut c, false, "", &AtomicBool::new(false));
        assert!(res.is_ok());
        assert_eq!(scr.renders.len(), 1);
    }

    #[test]
    fn drive_gives_up_after_repeated_capture_failures() {
        let script = (0..MAX_CAPTURE_FAILURES).map(|_| Err(CaptureError::Capture("timeout".into())));
        let mut frames = ScriptedFrames(script.collect());
        let mut hands = ScriptedHands(VecDeque::new());
        let mut scr = screen(100);
        let mut c = controller();

        let res = drive(&mut frames, &mut hands, &mut scr, &mut c, false, "", &AtomicBool::new(false));
        assert!(matches!(res, Err(AppError::CaptureStalled(n, _)) if n == MAX_CAPTURE_FAILURES));
        assert!(scr.renders.is_empty());
    }

    #[test]
    fn drive_ends_with_error_when_camera_disconnects() {
        let mut frames = ScriptedFrames(VecDeque::from(vec![Ok(())]));
        let mut hands = ScriptedHands(VecDeque::new());
        let mut scr = screen(100);
        let mut c = controller();

        let res = drive(&mut frames, &mut hands, &mut scr, &mut c, false, "", &AtomicBool::new(false));
        assert!(matches!(res, Err(AppError::Camera(CaptureError::Disconnected))));
        assert_eq!(scr.renders.len(), 1);
    }

    #[test]
    fn drive_renders_without_hands_on_detector_hiccup() {
        let mut frames = ScriptedFrames((0..2).map(|_| Ok(())).collect());
        let mut hands = ScriptedHands(VecDeque::from(vec![
            Err(DetectError::Detector("bad frame".into())),
            Ok(HandFrame::new(vec![hand(Handedness::Right, 0.1005, 0.2005)])),
        ]));
        let mut scr = screen(2);
        let mut c = controller();

        let res = drive(&mut frames, &mut hands, &mut scr, &mut c, false, "", &AtomicBool::new(false));
        assert!(res.is_ok());
        assert_eq!(scr.renders, vec![(0, 0), (1, 1)]);
        // The hiccup did not consume the throttle slot.
        assert_eq!(sent_controllers(&c), vec![21]);
    }

    #[test]
    fn drive_fails_when_detector_dies() {
        let mut frames = ScriptedFrames((0..5).map(|_| Ok(())).collect());
        let mut hands = ScriptedHands(VecDeque::from(vec![Err(DetectError::Closed)]));
        let mut scr = screen(5);
        let mut c = controller();

        let res = drive(&mut frames, &mut hands, &mut scr, &mut c, false, "", &AtomicBool::new(false));
        assert!(matches!(res, Err(AppError::Detector(DetectError::Closed))));
    }
}
