//! Checkerboard target geometry.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// Planar checkerboard calibration target.
///
/// `cols`/`rows` are **inner corner** counts (not square counts). Board
/// coordinates put corner `(i, j)` at `(i * square_size_mm, j * square_size_mm, 0)`,
/// with `i` running along the board width.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckerboardSpec {
    /// Inner corners along the board width.
    pub cols: u32,
    /// Inner corners along the board height.
    pub rows: u32,
    /// Physical side length of one square, in millimeters.
    pub square_size_mm: f64,
}

/// Checkerboard specification validation errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    #[error("checkerboard needs at least 3x3 inner corners, got {cols}x{rows}")]
    InvalidGrid { cols: u32, rows: u32 },
    #[error("square size must be a positive length in mm, got {0}")]
    InvalidSquareSize(f64),
}

impl CheckerboardSpec {
    /// Validate and create a spec.
    pub fn new(cols: u32, rows: u32, square_size_mm: f64) -> Result<Self, SpecError> {
        let spec = Self {
            cols,
            rows,
            square_size_mm,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.cols < 3 || self.rows < 3 {
            return Err(SpecError::InvalidGrid {
                cols: self.cols,
                rows: self.rows,
            });
        }
        if !self.square_size_mm.is_finite() || self.square_size_mm <= 0.0 {
            return Err(SpecError::InvalidSquareSize(self.square_size_mm));
        }
        Ok(())
    }

    /// Number of inner corners on the board.
    #[inline]
    pub fn corner_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    /// Row-major index of inner corner `(i, j)`.
    #[inline]
    pub fn index(&self, i: u32, j: u32) -> usize {
        j as usize * self.cols as usize + i as usize
    }

    /// Planar board coordinates (mm) of all inner corners, row-major.
    pub fn board_points(&self) -> Vec<Point2<f64>> {
        let s = self.square_size_mm;
        (0..self.rows)
            .flat_map(|j| (0..self.cols).map(move |i| Point2::new(i as f64 * s, j as f64 * s)))
            .collect()
    }

    /// Board corners lifted to the `Z = 0` plane of the board frame.
    pub fn object_points(&self) -> Vec<Point3<f64>> {
        self.board_points()
            .into_iter()
            .map(|p| Point3::new(p.x, p.y, 0.0))
            .collect()
    }
}
