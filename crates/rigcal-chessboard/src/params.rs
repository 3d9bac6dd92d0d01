use serde::{Deserialize, Serialize};

/// Neighbour search used to link corners into a grid.
///
/// Spacings bound the distance between adjacent board corners in the frame;
/// a corner only links to neighbours whose edge direction is within
/// `orientation_tolerance_deg` of a board axis.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GridGraphParams {
    pub min_spacing_pix: f32,
    pub max_spacing_pix: f32,
    /// Candidate neighbours pulled from the k-d tree per corner.
    pub k_neighbors: usize,
    pub orientation_tolerance_deg: f32,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            min_spacing_pix: 5.0,
            max_spacing_pix: 250.0,
            k_neighbors: 8,
            orientation_tolerance_deg: 22.5,
        }
    }
}

/// Gradient-based corner refinement on the gray frame.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubpixParams {
    /// Half size of the square refinement window, in pixels.
    pub half_window: u32,
    pub max_iters: usize,
    /// Stop once an update moves the corner less than this (pixels).
    pub epsilon: f64,
}

impl Default for SubpixParams {
    fn default() -> Self {
        Self {
            half_window: 5,
            max_iters: 30,
            epsilon: 1e-3,
        }
    }
}

/// Everything [`CheckerboardDetector`](crate::CheckerboardDetector) can be tuned with.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    /// Corners weaker than this are dropped before grid building.
    pub min_corner_strength: f32,
    pub graph: GridGraphParams,
    /// `None` keeps the positions reported by the corner detector.
    pub subpix: Option<SubpixParams>,
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            min_corner_strength: 0.0,
            graph: GridGraphParams::default(),
            subpix: Some(SubpixParams::default()),
        }
    }
}

impl ChessboardParams {
    /// Check value ranges; the error names the offending field.
    pub fn validate(&self) -> Result<(), String> {
        let g = &self.graph;
        if !(g.min_spacing_pix.is_finite() && g.min_spacing_pix >= 0.0) {
            return Err(format!("graph.min_spacing_pix must be >= 0, got {}", g.min_spacing_pix));
        }
        if !(g.max_spacing_pix.is_finite() && g.max_spacing_pix > g.min_spacing_pix) {
            return Err(format!(
                "graph.max_spacing_pix must exceed min_spacing_pix ({}), got {}",
                g.min_spacing_pix, g.max_spacing_pix
            ));
        }
        if g.k_neighbors < 4 {
            return Err(format!("graph.k_neighbors must be at least 4, got {}", g.k_neighbors));
        }
        if !(g.orientation_tolerance_deg > 0.0 && g.orientation_tolerance_deg < 45.0) {
            return Err(format!(
                "graph.orientation_tolerance_deg must be in (0, 45), got {}",
                g.orientation_tolerance_deg
            ));
        }
        if let Some(s) = &self.subpix {
            if s.half_window == 0 || s.max_iters == 0 {
                return Err("subpix.half_window and subpix.max_iters must be positive".to_string());
            }
            if !(s.epsilon.is_finite() && s.epsilon > 0.0) {
                return Err(format!("subpix.epsilon must be positive, got {}", s.epsilon));
            }
        }
        Ok(())
    }
}
