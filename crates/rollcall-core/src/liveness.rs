//! Eye-aspect-ratio blink signal.
//!
//! For six ordered eye-contour points p1..p6 (p1/p4 the corners, p2/p3 the
//! upper lid, p5/p6 the lower lid):
//!
//! ```text
//! EAR = (|p2 - p6| + |p3 - p5|) / (2 |p1 - p4|)
//! ```
//!
//! An open eye sits around 0.25–0.35; a closed one drops towards zero.
//! [`EyePair::classify`] is memoryless: every frame is judged on its own.
//! [`BlinkTracker`] layers an explicit Open → PossibleBlink → Blinked state
//! machine on top for callers that want a debounced blink event.

use serde::{Deserialize, Serialize};

/// EAR below which the eyes count as closed.
pub const DEFAULT_EAR_THRESHOLD: f32 = 0.2;

/// Consecutive closed frames required before a reopen counts as a blink.
pub const DEFAULT_MIN_CLOSED_FRAMES: u32 = 2;

/// Six ordered contour points of one eye.
pub type EyeContour = [(f32, f32); 6];

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Eye aspect ratio of one eye. Coincident corners (zero width) yield 0.0.
pub fn eye_aspect_ratio(eye: &EyeContour) -> f32 {
    let vertical = distance(eye[1], eye[5]) + distance(eye[2], eye[4]);
    let horizontal = distance(eye[0], eye[3]);
    if horizontal > 0.0 { vertical / (2.0 * horizontal) } else { 0.0 }
}

/// Per-frame eye state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EyeState {
    Open,
    Closed,
}

/// Landmarks of both eyes of one face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyePair {
    pub left: EyeContour,
    pub right: EyeContour,
}

impl EyePair {
    /// Take the eyes out of a 68-point (iBUG 300-W) landmark set:
    /// right eye = points 36..42, left eye = points 42..48.
    pub fn from_68_point(shape: &[(f32, f32)]) -> Option<Self> {
        if shape.len() < 48 {
            return None;
        }
        let contour = |start: usize| -> EyeContour { std::array::from_fn(|i| shape[start + i]) };
        Some(Self {
            left: contour(42),
            right: contour(36),
        })
    }

    /// Mean EAR over both eyes.
    pub fn mean_ear(&self) -> f32 {
        (eye_aspect_ratio(&self.left) + eye_aspect_ratio(&self.right)) / 2.0
    }

    pub fn classify(&self, threshold: f32) -> EyeState {
        if self.mean_ear() < threshold {
            EyeState::Closed
        } else {
            EyeState::Open
        }
    }
}

/// Debounced blink state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlinkState {
    Open,
    PossibleBlink { closed_frames: u32 },
    Blinked,
}

/// Counts closed frames and reports a blink when the eyes reopen after at
/// least `min_closed_frames` of them. `Blinked` is sticky until [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct BlinkTracker {
    threshold: f32,
    min_closed_frames: u32,
    state: BlinkState,
}

impl BlinkTracker {
    pub fn new(threshold: f32, min_closed_frames: u32) -> Self {
        Self {
            threshold,
            min_closed_frames: min_closed_frames.max(1),
            state: BlinkState::Open,
        }
    }

    pub fn state(&self) -> BlinkState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = BlinkState::Open;
    }

    /// Feed one frame's eye landmarks and return the updated state.
    pub fn observe(&mut self, eyes: &EyePair) -> BlinkState {
        let eye = eyes.classify(self.threshold);
        self.state = match (self.state, eye) {
            (BlinkState::Blinked, _) => BlinkState::Blinked,
            (BlinkState::Open, EyeState::Open) => BlinkState::Open,
            (BlinkState::Open, EyeState::Closed) => BlinkState::PossibleBlink { closed_frames: 1 },
            (BlinkState::PossibleBlink { closed_frames }, EyeState::Closed) => BlinkState::PossibleBlink {
                closed_frames: closed_frames.saturating_add(1),
            },
            (BlinkState::PossibleBlink { closed_frames }, EyeState::Open) => {
                if closed_frames >= self.min_closed_frames {
                    tracing::debug!(closed_frames, "blink detected");
                    BlinkState::Blinked
                } else {
                    BlinkState::Open
                }
            }
        };
        self.state
    }
}

impl Default for BlinkTracker {
    fn default() -> Self {
        Self::new(DEFAULT_EAR_THRESHOLD, DEFAULT_MIN_CLOSED_FRAMES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Six points equally spaced on a circle, in p1..p6 order
    /// (left corner, upper lid, right corner, lower lid).
    fn circle_eye(cx: f32, cy: f32, r: f32) -> EyeContour {
        let deg = [180.0f32, 120.0, 60.0, 0.0, 300.0, 240.0];
        deg.map(|d| {
            let t = d.to_radians();
            (cx + r * t.cos(), cy - r * t.sin())
        })
    }

    /// Eye with given width and lid opening, corners on y = 0.
    fn flat_eye(width: f32, opening: f32) -> EyeContour {
        let h = opening / 2.0;
        [
            (0.0, 0.0),
            (width / 3.0, -h),
            (2.0 * width / 3.0, -h),
            (width, 0.0),
            (2.0 * width / 3.0, h),
            (width / 3.0, h),
        ]
    }

    fn pair(eye: EyeContour) -> EyePair {
        EyePair { left: eye, right: eye }
    }

    #[test]
    fn test_circle_golden_value() {
        // |p2-p6| = |p3-p5| = r√3, |p1-p4| = 2r → EAR = √3 / 2
        let ear = eye_aspect_ratio(&circle_eye(10.0, 20.0, 7.0));
        assert!((ear - 3.0f32.sqrt() / 2.0).abs() < 1e-5, "ear = {ear}");
    }

    #[test]
    fn test_scale_invariance() {
        let eye = flat_eye(30.0, 9.0);
        let base = eye_aspect_ratio(&eye);
        for k in [0.01f32, 0.5, 3.0, 250.0] {
            let scaled = eye.map(|(x, y)| (x * k, y * k));
            assert!((eye_aspect_ratio(&scaled) - base).abs() < 1e-5, "k = {k}");
        }
    }

    #[test]
    fn test_translation_invariance() {
        let eye = flat_eye(30.0, 9.0);
        let moved = eye.map(|(x, y)| (x + 400.0, y - 120.0));
        assert!((eye_aspect_ratio(&moved) - eye_aspect_ratio(&eye)).abs() < 1e-5);
    }

    #[test]
    fn test_flat_eye_value() {
        // opening 9 over width 30: (9 + 9) / 60 = 0.3
        assert!((eye_aspect_ratio(&flat_eye(30.0, 9.0)) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_width() {
        assert_eq!(eye_aspect_ratio(&[(5.0, 5.0); 6]), 0.0);
    }

    #[test]
    fn test_classify_threshold() {
        assert_eq!(pair(flat_eye(30.0, 9.0)).classify(DEFAULT_EAR_THRESHOLD), EyeState::Open);
        assert_eq!(pair(flat_eye(30.0, 3.0)).classify(DEFAULT_EAR_THRESHOLD), EyeState::Closed);
    }

    #[test]
    fn test_mean_of_both_eyes() {
        let eyes = EyePair {
            left: flat_eye(30.0, 9.0),  // 0.3
            right: flat_eye(30.0, 3.0), // 0.1
        };
        assert!((eyes.mean_ear() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_from_68_point() {
        let mut shape = vec![(0.0f32, 0.0f32); 68];
        for (i, p) in flat_eye(30.0, 9.0).iter().enumerate() {
            shape[36 + i] = *p;
        }
        for (i, p) in flat_eye(30.0, 3.0).iter().enumerate() {
            shape[42 + i] = (p.0 + 60.0, p.1);
        }
        let eyes = EyePair::from_68_point(&shape).unwrap();
        assert!((eye_aspect_ratio(&eyes.right) - 0.3).abs() < 1e-6);
        assert!((eye_aspect_ratio(&eyes.left) - 0.1).abs() < 1e-6);
        assert!(EyePair::from_68_point(&shape[..40]).is_none());
    }

    #[test]
    fn test_tracker_blink_sequence() {
        let open = pair(flat_eye(30.0, 9.0));
        let closed = pair(flat_eye(30.0, 1.0));
        let mut tracker = BlinkTracker::default();

        assert_eq!(tracker.observe(&open), BlinkState::Open);
        assert_eq!(tracker.observe(&closed), BlinkState::PossibleBlink { closed_frames: 1 });
        assert_eq!(tracker.observe(&closed), BlinkState::PossibleBlink { closed_frames: 2 });
        assert_eq!(tracker.observe(&open), BlinkState::Blinked);
        // Sticky until reset
        assert_eq!(tracker.observe(&closed), BlinkState::Blinked);
        tracker.reset();
        assert_eq!(tracker.state(), BlinkState::Open);
    }

    #[test]
    fn test_tracker_ignores_single_frame_flicker() {
        let open = pair(flat_eye(30.0, 9.0));
        let closed = pair(flat_eye(30.0, 1.0));
        let mut tracker = BlinkTracker::default();

        tracker.observe(&closed);
        assert_eq!(tracker.observe(&open), BlinkState::Open);
    }
}
