//! Software-rendered debug overlay using `minifb`.
//!
//! Layout:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  camera frame (mirrored)                                 │
//! │        ●──── L T-I d=84px cc=17 a=-3.0                   │
//! │       skeleton                 ●─────── R T-I …          │
//! │            ───────── T-T …  ─────────                    │
//! │                                                          │
//! │  status bar: port · hands · MIDI sent                    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! All drawing goes through [`Canvas`], which owns the pixel buffer and
//! knows nothing about windows, so it can be exercised headless.

use std::sync::mpsc::Sender;

use gesture_cc::{landmark, HandFrame, Measurement, Signal};
use minifb::{Key, KeyRepeat, MouseMode, Window, WindowOptions};
use thiserror::Error;

use crate::frame::Frame;
use crate::landmarks::{SimInput, SimKey};

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("cannot open window: {0}")]
    Window(String),
}

// ════════════════════════════════════════════════════════════════════════════
// Colors
// ════════════════════════════════════════════════════════════════════════════

const THUMB_COLOR:    u32 = 0xFF00FF00;  // green
const INDEX_COLOR:    u32 = 0xFFFF0000;  // red
const PINCH_COLOR:    u32 = 0xFF0000FF;  // blue
const THUMB_SPAN:     u32 = 0xFFFFFF00;  // yellow
const INDEX_SPAN:     u32 = 0xFF00FFFF;  // cyan
const BONE_COLOR:     u32 = 0xFFE0E0E0;
const JOINT_COLOR:    u32 = 0xFFFF4040;
const STATUS_BG:      u32 = 0xFF0F3460;
const STATUS_TEXT:    u32 = 0xFFEEEEEE;
const SENT_COLOR:     u32 = 0xFFFFD700;  // gold
const STATUS_H:       usize = 28;
const TEXT_SCALE:     usize = 2;

pub fn signal_color(signal: Signal) -> u32 {
    match signal {
        Signal::LeftPinch | Signal::RightPinch => PINCH_COLOR,
        Signal::ThumbSpan                      => THUMB_SPAN,
        Signal::IndexSpan                      => INDEX_SPAN,
    }
}

/// The overlay text for one measurement.
pub fn measurement_label(m: &Measurement) -> String {
    format!(
        "{} d={:.0}px cc={} a={:.1}",
        m.signal.label(), m.distance, m.value, m.angle_deg
    )
}

/// Per-frame status line contents.
#[derive(Clone, Debug, Default)]
pub struct OverlayStatus {
    pub port:      String,
    pub source:    String,
    pub hands:     usize,
    pub midi_sent: bool,
    pub hint:      &'static str,
}

// ════════════════════════════════════════════════════════════════════════════
// Canvas — headless ARGB buffer with drawing primitives
// ════════════════════════════════════════════════════════════════════════════

pub struct Canvas {
    pub width:  usize,
    pub height: usize,
    pub buf:    Vec<u32>,
}

impl Canvas {
    pub fn new(width: usize, height: usize) -> Self {
        Canvas { width, height, buf: vec![0xFF000000; width * height] }
    }

    /// Copy an RGB frame in, resizing the canvas if the frame size changed.
    pub fn blit(&mut self, frame: &Frame) {
        let (w, h) = (frame.width as usize, frame.height as usize);
        if (w, h) != (self.width, self.height) {
            *self = Canvas::new(w, h);
        }
        for (dst, px) in self.buf.iter_mut().zip(frame.rgb.chunks_exact(3)) {
            *dst = 0xFF000000 | (px[0] as u32) << 16 | (px[1] as u32) << 8 | px[2] as u32;
        }
    }

    pub fn get(&self, x: usize, y: usize) -> Option<u32> {
        (x < self.width && y < self.height).then(|| self.buf[y * self.width + x])
    }

    pub fn set_pixel(&mut self, x: isize, y: isize, color: u32) {
        if x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height {
            self.buf[y as usize * self.width + x as usize] = color;
        }
    }

    pub fn fill_rect(&mut self, x: usize, y: usize, w: usize, h: usize, color: u32) {
        for row in y..(y + h).min(self.height) {
            for col in x..(x + w).min(self.width) {
                self.buf[row * self.width + col] = color;
            }
        }
    }

    pub fn fill_circle(&mut self, cx: f32, cy: f32, r: f32, color: u32) {
        let (w, h) = (self.width as f32, self.height as f32);
        if !cx.is_finite() || !cy.is_finite() || cx + r < 0.0 || cy + r < 0.0 || cx - r >= w || cy - r >= h {
            return;
        }
        let (x0, y0, ri) = (cx.round() as isize, cy.round() as isize, r.ceil() as isize);
        let r2 = r * r;
        for dy in -ri..=ri {
            for dx in -ri..=ri {
                if (dx * dx + dy * dy) as f32 <= r2 {
                    self.set_pixel(x0 + dx, y0 + dy, color);
                }
            }
        }
    }

    /// Bresenham line, `thickness` pixels wide.  Clipped to the canvas
    /// first, so far-away endpoints cost nothing.
    pub fn draw_line(&mut self, a: (f32, f32), b: (f32, f32), thickness: usize, color: u32) {
        let margin = thickness as f32;
        let bounds = (-margin, -margin, self.width as f32 + margin, self.height as f32 + margin);
        let Some((a, b)) = clip_segment(a, b, bounds) else { return };
        let (mut x, mut y) = (a.0.round() as isize, a.1.round() as isize);
        let (x1, y1) = (b.0.round() as isize, b.1.round() as isize);
        let dx = (x1 - x).abs();
        let dy = -(y1 - y).abs();
        let sx = if x < x1 { 1 } else { -1 };
        let sy = if y < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let half = thickness.max(1) as isize / 2;
        loop {
            for oy in -half..=half {
                for ox in -half..=half {
                    self.set_pixel(x + ox, y + oy, color);
                }
            }
            if x == x1 && y == y1 { break; }
            let e2 = 2 * err;
            if e2 >= dy { err += dy; x += sx; }
            if e2 <= dx { err += dx; y += sy; }
        }
    }

    /// Bitmap text, each glyph cell `4 * scale` pixels wide.
    pub fn draw_label(&mut self, text: &str, x: isize, y: isize, scale: usize, color: u32) {
        let s = scale.max(1) as isize;
        if x >= self.width as isize || y >= self.height as isize || y < -5 * s {
            return;
        }
        let mut cx = x;
        for ch in text.chars() {
            for (row, &bits) in glyph(ch).iter().enumerate() {
                for col in 0..3isize {
                    if bits & (1 << (2 - col)) != 0 {
                        for py in 0..s {
                            for px in 0..s {
                                self.set_pixel(cx + col * s + px, y + row as isize * s + py, color);
                            }
                        }
                    }
                }
            }
            cx += 4 * s;
            if cx >= self.width as isize { break; }
        }
    }

    // ── scene ─────────────────────────────────────────────────────────────

    /// Skeleton and fingertip markers for every detected hand.
    pub fn draw_hands(&mut self, hands: &HandFrame, width: u32, height: u32) {
        for hand in &hands.hands {
            let pts = hand.to_pixels(width, height);
            for &(a, b) in landmark::CONNECTIONS.iter() {
                self.draw_line((pts[a].x, pts[a].y), (pts[b].x, pts[b].y), 1, BONE_COLOR);
            }
            for p in &pts {
                self.fill_circle(p.x, p.y, 2.0, JOINT_COLOR);
            }
            let (t, i) = (pts[landmark::THUMB_TIP], pts[landmark::INDEX_FINGER_TIP]);
            self.fill_circle(t.x, t.y, 8.0, THUMB_COLOR);
            self.fill_circle(i.x, i.y, 8.0, INDEX_COLOR);
        }
    }

    /// One line per measurement, labelled at its midpoint.
    pub fn draw_measurements(&mut self, measurements: &[Measurement]) {
        for m in measurements {
            let color = signal_color(m.signal);
            self.draw_line((m.from.x, m.from.y), (m.to.x, m.to.y), 2, color);
            let mid = m.from.midpoint(m.to);
            self.draw_label(
                &measurement_label(m),
                mid.x as isize,
                (mid.y as isize).saturating_sub(10 + (5 * TEXT_SCALE) as isize),
                TEXT_SCALE,
                color,
            );
        }
    }

    pub fn draw_status(&mut self, status: &OverlayStatus) {
        if self.height < STATUS_H {
            return;
        }
        let y = self.height - STATUS_H;
        self.fill_rect(0, y, self.width, STATUS_H, STATUS_BG);
        let line = format!(
            "midi: {}  src: {}  hands: {}  {}",
            status.port, status.source, status.hands, status.hint
        );
        self.draw_label(&line, 8, (y + 9) as isize, TEXT_SCALE, STATUS_TEXT);
        if status.midi_sent {
            self.fill_circle(self.width.saturating_sub(14) as f32, (y + STATUS_H / 2) as f32, 6.0, SENT_COLOR);
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Overlay — the window
// ════════════════════════════════════════════════════════════════════════════

pub struct Overlay {
    window: Window,
    canvas: Canvas,
    /// Where simulated input goes, when the landmark source is the simulator.
    sim_tx: Option<Sender<SimInput>>,
    last_mouse: Option<(f32, f32)>,
}

impl Overlay {
    pub fn open(title: &str, width: u32, height: u32, sim_tx: Option<Sender<SimInput>>) -> Result<Self, OverlayError> {
        let mut window = Window::new(
            title,
            width as usize,
            height as usize,
            WindowOptions { resize: false, ..WindowOptions::default() },
        )
        .map_err(|e| OverlayError::Window(e.to_string()))?;

        // The camera paces the loop; this only stops a runaway redraw.
        window.limit_update_rate(Some(std::time::Duration::from_millis(4)));

        Ok(Overlay {
            window,
            canvas: Canvas::new(width as usize, height as usize),
            sim_tx,
            last_mouse: None,
        })
    }

    /// Poll keyboard and mouse.  Returns `false` once the user asked to quit
    /// (`q`) or closed the window.
    pub fn poll_input(&mut self) -> bool {
        if !self.window.is_open() || self.window.is_key_pressed(Key::Q, KeyRepeat::No) {
            return false;
        }
        let Some(tx) = self.sim_tx.as_ref() else { return true };

        let keys = [
            (Key::Key1, SimKey::ToggleLeft,  KeyRepeat::No),
            (Key::Key2, SimKey::ToggleRight, KeyRepeat::No),
            (Key::Tab,  SimKey::SwitchHand,  KeyRepeat::No),
            (Key::Up,   SimKey::OpenPinch,   KeyRepeat::Yes),
            (Key::Down, SimKey::ClosePinch,  KeyRepeat::Yes),
        ];
        for (key, sim, repeat) in keys {
            if self.window.is_key_pressed(key, repeat) {
                let _ = tx.send(SimInput::KeyDown(sim));
            }
        }

        if let Some((x, y)) = self.window.get_mouse_pos(MouseMode::Discard) {
            if self.last_mouse != Some((x, y)) {
                self.last_mouse = Some((x, y));
                let _ = tx.send(SimInput::MouseMoved {
                    x,
                    y,
                    width:  self.canvas.width as u32,
                    height: self.canvas.height as u32,
                });
            }
        }
        if let Some((_, dy)) = self.window.get_scroll_wheel() {
            if dy != 0.0 {
                let _ = tx.send(SimInput::Scroll(dy));
            }
        }
        true
    }

    /// Draw one frame with its hands and measurements and present it.
    pub fn render(&mut self, frame: &Frame, hands: &HandFrame, measurements: &[Measurement], status: &OverlayStatus) {
        self.canvas.blit(frame);
        self.canvas.draw_hands(hands, frame.width, frame.height);
        self.canvas.draw_measurements(measurements);
        self.canvas.draw_status(status);

        if let Err(e) = self.window.update_with_buffer(&self.canvas.buf, self.canvas.width, self.canvas.height) {
            tracing::warn!("overlay update failed: {}", e);
        }
    }
}

/// Liang–Barsky clip of segment `a`–`b` to `(x0, y0, x1, y1)`.  `None` when
/// nothing is left or an endpoint is not finite.
fn clip_segment(a: (f32, f32), b: (f32, f32), (x0, y0, x1, y1): (f32, f32, f32, f32)) -> Option<((f32, f32), (f32, f32))> {
    if !(a.0.is_finite() && a.1.is_finite() && b.0.is_finite() && b.1.is_finite()) {
        return None;
    }
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let (mut t0, mut t1) = (0.0f32, 1.0f32);
    for (p, q) in [(-dx, a.0 - x0), (dx, x1 - a.0), (-dy, a.1 - y0), (dy, y1 - a.1)] {
        if p == 0.0 {
            if q < 0.0 { return None; }
        } else {
            let t = q / p;
            if p < 0.0 { t0 = t0.max(t); } else { t1 = t1.min(t); }
            if t0 > t1 { return None; }
        }
    }
    Some(((a.0 + t0 * dx, a.1 + t0 * dy), (a.0 + t1 * dx, a.1 + t1 * dy)))
}

// ────────────────────────────────────────────────────────────────────────────
// Minimal 3×5 bitmap font
// ────────────────────────────────────────────────────────────────────────────

fn glyph(c: char) -> [u8; 5] {
    match c.to_ascii_lowercase() {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'a' => [0b111, 0b101, 0b111, 0b101, 0b101],
        'b' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'c' => [0b111, 0b100, 0b100, 0b100, 0b111],
        'd' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'e' => [0b111, 0b100, 0b111, 0b100, 0b111],
        'f' => [0b111, 0b100, 0b111, 0b100, 0b100],
        'g' => [0b111, 0b100, 0b101, 0b101, 0b111],
        'h' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'i' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'j' => [0b001, 0b001, 0b001, 0b101, 0b111],
        'k' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'l' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'm' => [0b101, 0b111, 0b101, 0b101, 0b101],
        'n' => [0b111, 0b101, 0b101, 0b101, 0b101],
        'o' => [0b111, 0b101, 0b101, 0b101, 0b111],
        'p' => [0b111, 0b101, 0b111, 0b100, 0b100],
        'q' => [0b111, 0b101, 0b101, 0b111, 0b001],
        'r' => [0b110, 0b101, 0b110, 0b101, 0b101],
        's' => [0b111, 0b100, 0b111, 0b001, 0b111],
        't' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'u' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'v' => [0b101, 0b101, 0b101, 0b010, 0b010],
        'w' => [0b101, 0b101, 0b101, 0b111, 0b101],
        'x' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'y' => [0b101, 0b101, 0b111, 0b010, 0b010],
        'z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '/' => [0b001, 0b001, 0b010, 0b100, 0b100],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '=' => [0b000, 0b111, 0b000, 0b111, 0b000],
        ' ' => [0b000, 0b000, 0b000, 0b000, 0b000],
        _   => [0b000, 0b000, 0b010, 0b000, 0b000],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gesture_cc::{Handedness, Landmark, LandmarkSet, Point};

    #[test]
    fn blit_converts_rgb_to_argb() {
        let mut canvas = Canvas::new(1, 1);
        let frame = Frame::from_rgb(2, 1, vec![0x12, 0x34, 0x56, 0xFF, 0x00, 0x00]).unwrap();
        canvas.blit(&frame);
        assert_eq!((canvas.width, canvas.height), (2, 1));
        assert_eq!(canvas.get(0, 0), Some(0xFF123456));
        assert_eq!(canvas.get(1, 0), Some(0xFFFF0000));
    }

    #[test]
    fn line_covers_both_endpoints() {
        let mut canvas = Canvas::new(20, 20);
        canvas.draw_line((2.0, 3.0), (17.0, 11.0), 1, 0xFFABCDEF);
        assert_eq!(canvas.get(2, 3), Some(0xFFABCDEF));
        assert_eq!(canvas.get(17, 11), Some(0xFFABCDEF));
    }

    #[test]
    fn drawing_off_canvas_is_clipped() {
        let mut canvas = Canvas::new(10, 10);
        canvas.draw_line((-50.0, -50.0), (60.0, 60.0), 3, 0xFFFFFFFF);
        canvas.fill_circle(9.0, 9.0, 8.0, 0xFF00FF00);
        canvas.draw_label("OUT OF BOUNDS", 5, 8, 3, 0xFFFF0000);
        canvas.fill_rect(8, 8, 100, 100, 0xFF0000FF);
        assert_eq!(canvas.buf.len(), 100);
    }

    #[test]
    fn circle_marks_center() {
        let mut canvas = Canvas::new(30, 30);
        canvas.fill_circle(15.0, 15.0, 8.0, THUMB_COLOR);
        assert_eq!(canvas.get(15, 15), Some(THUMB_COLOR));
        assert_eq!(canvas.get(15, 23), Some(THUMB_COLOR));
        assert_ne!(canvas.get(15, 24), Some(THUMB_COLOR));
    }

    #[test]
    fn hands_mark_fingertips() {
        let mut pts = [Landmark::new(0.5, 0.9, 0.0); landmark::COUNT];
        pts[landmark::THUMB_TIP] = Landmark::new(0.25, 0.5, 0.0);
        pts[landmark::INDEX_FINGER_TIP] = Landmark::new(0.75, 0.5, 0.0);
        let hands = HandFrame::new(vec![LandmarkSet::new(Handedness::Left, pts, 1.0)]);

        let mut canvas = Canvas::new(100, 100);
        canvas.draw_hands(&hands, 100, 100);
        assert_eq!(canvas.get(25, 50), Some(THUMB_COLOR));
        assert_eq!(canvas.get(75, 50), Some(INDEX_COLOR));
    }

    #[test]
    fn label_text() {
        let m = Measurement {
            signal: Signal::ThumbSpan,
            from: Point::new(0.0, 0.0),
            to: Point::new(0.0, 210.0),
            distance: 210.0,
            angle_deg: 90.0,
            value: 64,
        };
        assert_eq!(measurement_label(&m), "T-T d=210px cc=64 a=90.0");
    }

    #[test]
    fn status_bar_shows_sent_marker() {
        let mut canvas = Canvas::new(200, 60);
        let status = OverlayStatus { midi_sent: true, ..Default::default() };
        canvas.draw_status(&status);
        assert_eq!(canvas.get(186, 60 - STATUS_H / 2), Some(SENT_COLOR));
        assert_eq!(canvas.get(0, 59), Some(STATUS_BG));
    }

    #[test]
    fn narrow_status_bar_keeps_sent_marker_on_canvas() {
        let mut canvas = Canvas::new(10, 60);
        let status = OverlayStatus { midi_sent: true, ..Default::default() };
        canvas.draw_status(&status);
        assert_eq!(canvas.get(0, 60 - STATUS_H / 2), Some(SENT_COLOR));
        assert_eq!(canvas.buf.len(), 600);
    }

    #[test]
    fn far_away_shapes_are_skipped() {
        let mut canvas = Canvas::new(20, 20);
        canvas.fill_circle(1e30, 5.0, 8.0, THUMB_COLOR);
        canvas.fill_circle(f32::NEG_INFINITY, f32::NAN, 8.0, THUMB_COLOR);
        canvas.draw_line((5.0, 5.0), (f32::INFINITY, 5.0), 2, THUMB_COLOR);
        canvas.draw_label("far", isize::MAX, 5, 2, THUMB_COLOR);
        assert!(canvas.buf.iter().all(|&p| p != THUMB_COLOR));
    }

    #[test]
    fn long_line_is_clipped_not_walked() {
        let mut canvas = Canvas::new(20, 20);
        canvas.draw_line((10.0, 10.0), (1e30, 10.0), 1, INDEX_COLOR);
        assert_eq!(canvas.get(10, 10), Some(INDEX_COLOR));
        assert_eq!(canvas.get(19, 10), Some(INDEX_COLOR));
        assert_eq!(canvas.get(9, 10), Some(0xFF000000));
    }

    #[test]
    fn unknown_glyph_falls_back_to_dot() {
        assert_eq!(glyph('~'), [0b000, 0b000, 0b010, 0b000, 0b000]);
        assert_eq!(glyph('('), glyph('~'));
        assert_eq!(glyph('A'), glyph('a'));
    }
}
