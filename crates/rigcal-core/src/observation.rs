//! Per-frame corner observations and per-trial collections of them.

use crate::CheckerboardSpec;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Image resolution in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Complete set of checkerboard corners detected in one frame.
///
/// Points are ordered row-major in board coordinates (see
/// [`CheckerboardSpec::board_points`]). A partial detection is never
/// represented: it does not construct.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CornerObservation {
    points: Vec<Point2<f64>>,
}

impl CornerObservation {
    /// Accept `points` only if they cover the whole board and are finite.
    pub fn new(points: Vec<Point2<f64>>, spec: &CheckerboardSpec) -> Option<Self> {
        if points.len() != spec.corner_count() {
            return None;
        }
        if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return None;
        }
        Some(Self { points })
    }

    #[inline]
    pub fn points(&self) -> &[Point2<f64>] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether this observation still matches `spec` (e.g. after deserialization).
    pub fn fits(&self, spec: &CheckerboardSpec) -> bool {
        self.points.len() == spec.corner_count()
            && self.points.iter().all(|p| p.x.is_finite() && p.y.is_finite())
    }
}

/// All frames of one trial: the common resolution and, per frame in
/// capture order, the detection (or `None` when the board was not found).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialObservations {
    pub image_size: Option<ImageSize>,
    pub frames: Vec<Option<CornerObservation>>,
}

impl TrialObservations {
    pub fn new(image_size: ImageSize) -> Self {
        Self {
            image_size: Some(image_size),
            frames: Vec::new(),
        }
    }

    /// Number of frames with a usable detection for `spec`.
    pub fn valid_count(&self, spec: &CheckerboardSpec) -> usize {
        self.valid(spec).count()
    }

    /// Frames with a usable detection, with their original frame index.
    pub fn valid<'a>(
        &'a self,
        spec: &'a CheckerboardSpec,
    ) -> impl Iterator<Item = (usize, &'a CornerObservation)> + 'a {
        self.frames
            .iter()
            .enumerate()
            .filter_map(move |(idx, f)| f.as_ref().filter(|o| o.fits(spec)).map(|o| (idx, o)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_detections_are_rejected() {
        let spec = CheckerboardSpec::new(3, 3, 10.0).unwrap();
        let mut pts: Vec<_> = spec.board_points();
        assert!(CornerObservation::new(pts.clone(), &spec).is_some());
        pts.pop();
        assert!(CornerObservation::new(pts.clone(), &spec).is_none());
        pts.push(Point2::new(f64::NAN, 0.0));
        assert!(CornerObservation::new(pts, &spec).is_none());
    }

    #[test]
    fn valid_frames_keep_their_index() {
        let spec = CheckerboardSpec::new(3, 3, 10.0).unwrap();
        let obs = CornerObservation::new(spec.board_points(), &spec).unwrap();
        let trial = TrialObservations {
            image_size: Some(ImageSize::new(640, 480)),
            frames: vec![None, Some(obs.clone()), None, Some(obs)],
        };
        let idx: Vec<usize> = trial.valid(&spec).map(|(i, _)| i).collect();
        assert_eq!(vec![1, 3], idx);

        let other = CheckerboardSpec::new(4, 3, 10.0).unwrap();
        assert_eq!(0, trial.valid_count(&other));
    }
}
