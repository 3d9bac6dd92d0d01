use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Raw X-junction candidate produced by a ChESS-style corner detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Corner {
    /// Corner position in pixel coordinates.
    pub position: Point2<f32>,

    /// Direction of the light-square diagonal at the corner, in radians.
    ///
    /// Defined modulo π. Neighbouring board corners have orthogonal
    /// orientations, both at 45° to the board edge joining them.
    pub orientation: f32,

    /// Detector response.
    pub strength: f32,
}

impl Corner {
    pub fn new(x: f32, y: f32, orientation: f32, strength: f32) -> Self {
        Self {
            position: Point2::new(x, y),
            orientation,
            strength,
        }
    }
}

/// Integer grid coordinates `(i, j)` in board space.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct GridCoords {
    pub i: i32,
    pub j: i32,
}
