use crate::geom::{axis_vec_diff, dominant_edge_axis};
use crate::gridgraph::{assign_grid_coordinates, connected_components, GridGraph};
use crate::params::ChessboardParams;
use crate::refine::refine_corner;
use log::{debug, info};
use nalgebra::Point2;
use rigcal_core::{CheckerboardSpec, Corner, CornerObservation, GrayImageView, GridCoords};
use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Full-board checkerboard detector over a cloud of ChESS corners.
///
/// A frame is accepted only when one connected grid component covers every
/// inner corner of the board; partial boards are rejected.
#[derive(Debug, Clone)]
pub struct CheckerboardDetector {
    pub spec: CheckerboardSpec,
    pub params: ChessboardParams,
}

fn is_aligned_or_orthogonal(diagonal: f32, orientation: f32, tolerance: f32) -> bool {
    let d = axis_vec_diff(diagonal, orientation);
    d <= tolerance || (FRAC_PI_2 - d) <= tolerance
}

/// Map BFS coordinates of a `w × h` component onto the board's `cols × rows`
/// index space. Several rotations may fit; each candidate is returned.
fn orientation_candidates(
    w: i32,
    h: i32,
    cols: i32,
    rows: i32,
) -> Vec<Box<dyn Fn(i32, i32) -> GridCoords>> {
    let mut out: Vec<Box<dyn Fn(i32, i32) -> GridCoords>> = Vec::new();
    if w == cols && h == rows {
        out.push(Box::new(|i, j| GridCoords { i, j }));
        out.push(Box::new(move |i, j| GridCoords {
            i: w - 1 - i,
            j: h - 1 - j,
        }));
    }
    if w == rows && h == cols {
        out.push(Box::new(move |i, j| GridCoords { i: h - 1 - j, j: i }));
        out.push(Box::new(move |i, j| GridCoords { i: j, j: w - 1 - i }));
    }
    out
}

impl CheckerboardDetector {
    pub fn new(spec: CheckerboardSpec, params: ChessboardParams) -> Self {
        Self { spec, params }
    }

    /// Find the board in a corner cloud, returning corner positions in
    /// row-major board order. Positions are the raw detector positions.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(corners = corners.len())))]
    pub fn detect_from_corners(&self, corners: &[Corner]) -> Option<CornerObservation> {
        let needed = self.spec.corner_count();

        let strong: Vec<Corner> = corners
            .iter()
            .filter(|c| c.strength >= self.params.min_corner_strength)
            .filter(|c| c.position.x.is_finite() && c.position.y.is_finite())
            .cloned()
            .collect();
        if strong.len() < needed {
            debug!(
                "only {} corners after strength filter, board needs {}",
                strong.len(),
                needed
            );
            return None;
        }

        let axis = dominant_edge_axis(strong.iter().map(|c| (c.orientation, c.strength.max(1e-6))))?;
        let tol = self.params.graph.orientation_tolerance_deg.to_radians();
        let aligned: Vec<Corner> = strong
            .into_iter()
            .filter(|c| is_aligned_or_orthogonal(axis + FRAC_PI_4, c.orientation, tol))
            .collect();

        let graph = GridGraph::new(&aligned, &self.params.graph, axis);
        for component in connected_components(&graph) {
            if component.len() < needed {
                break;
            }
            if component.len() != needed {
                continue;
            }
            if let Some(points) = self.order_component(&graph, &component, &aligned) {
                info!("checkerboard found ({} corners)", points.len());
                return CornerObservation::new(points, &self.spec);
            }
        }
        debug!(
            "no complete {}x{} grid among {} aligned corners",
            self.spec.cols,
            self.spec.rows,
            aligned.len()
        );
        None
    }

    /// Detect the board and refine every corner on the frame.
    ///
    /// With sub-pixel refinement enabled, a corner that fails to converge
    /// rejects the whole frame.
    pub fn detect(&self, image: &GrayImageView<'_>, corners: &[Corner]) -> Option<CornerObservation> {
        let observation = self.detect_from_corners(corners)?;
        let Some(subpix) = &self.params.subpix else {
            return Some(observation);
        };
        let refined = observation
            .points()
            .iter()
            .map(|p| refine_corner(image, *p, subpix))
            .collect::<Option<Vec<_>>>();
        match refined {
            Some(points) => CornerObservation::new(points, &self.spec),
            None => {
                debug!("sub-pixel refinement failed, frame rejected");
                None
            }
        }
    }

    fn order_component(
        &self,
        graph: &GridGraph,
        component: &[usize],
        corners: &[Corner],
    ) -> Option<Vec<Point2<f64>>> {
        let coords = assign_grid_coordinates(graph, component)?;
        let min_i = coords.iter().map(|c| c.1).min()?;
        let min_j = coords.iter().map(|c| c.2).min()?;
        let w = coords.iter().map(|c| c.1).max()? - min_i + 1;
        let h = coords.iter().map(|c| c.2).max()? - min_j + 1;
        if (w * h) as usize != coords.len() {
            return None;
        }

        let cols = self.spec.cols as i32;
        let rows = self.spec.rows as i32;
        let position = |node: usize| {
            let p = corners[node].position;
            Point2::new(p.x as f64, p.y as f64)
        };

        // Among the rotations that fit, index (0, 0) goes to the corner
        // closest to the image's top-left.
        let mut best: Option<(f64, Vec<Point2<f64>>)> = None;
        for map in orientation_candidates(w, h, cols, rows) {
            let mut points = vec![Point2::origin(); coords.len()];
            for &(node, i, j) in &coords {
                let g = map(i - min_i, j - min_j);
                points[(g.j * cols + g.i) as usize] = position(node);
            }
            let key = points[0].x + points[0].y;
            if best.as_ref().is_none_or(|(k, _)| key < *k) {
                best = Some((key, points));
            }
        }
        best.map(|(_, points)| points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn board_corners(spec: &CheckerboardSpec, angle: f32, spacing: f32) -> Vec<Corner> {
        let (s, c) = angle.sin_cos();
        let mut out = Vec::new();
        for j in 0..spec.rows {
            for i in 0..spec.cols {
                let (x, y) = (i as f32 * spacing, j as f32 * spacing);
                let orientation = if (i + j) % 2 == 0 { FRAC_PI_4 } else { 3.0 * FRAC_PI_4 };
                out.push(Corner::new(
                    300.0 + c * x - s * y,
                    200.0 + s * x + c * y,
                    orientation + angle,
                    1.0,
                ));
            }
        }
        out
    }

    #[test]
    fn detects_axis_aligned_board_row_major() {
        let spec = CheckerboardSpec::new(5, 4, 20.0).unwrap();
        let corners = board_corners(&spec, 0.0, 30.0);
        let detector = CheckerboardDetector::new(spec.clone(), ChessboardParams::default());
        let obs = detector.detect_from_corners(&corners).expect("board");
        for (k, p) in obs.points().iter().enumerate() {
            assert_abs_diff_eq!(p.x, corners[k].position.x as f64, epsilon = 1e-4);
            assert_abs_diff_eq!(p.y, corners[k].position.y as f64, epsilon = 1e-4);
        }
    }

    #[test]
    fn input_order_does_not_matter() {
        let spec = CheckerboardSpec::new(6, 4, 20.0).unwrap();
        let corners = board_corners(&spec, 0.2, 25.0);
        let mut shuffled = corners.clone();
        shuffled.reverse();
        shuffled.swap(3, 17);
        let detector = CheckerboardDetector::new(spec, ChessboardParams::default());
        let a = detector.detect_from_corners(&corners).unwrap();
        let b = detector.detect_from_corners(&shuffled).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn board_rotated_by_quarter_turn_is_reindexed() {
        let spec = CheckerboardSpec::new(5, 3, 20.0).unwrap();
        let corners = board_corners(&spec, FRAC_PI_2, 30.0);
        let detector = CheckerboardDetector::new(spec.clone(), ChessboardParams::default());
        let obs = detector.detect_from_corners(&corners).expect("board");
        assert_eq!(obs.len(), spec.corner_count());

        // Board (0, 0) lands at (300, 200); of the two quarter-turn
        // indexings that fit, that one is closest to the image top-left.
        let pts = obs.points();
        assert_abs_diff_eq!(pts[0].x, 300.0, epsilon = 1e-4);
        assert_abs_diff_eq!(pts[0].y, 200.0, epsilon = 1e-4);
        let along_row = pts[1] - pts[0];
        let along_col = pts[spec.cols as usize] - pts[0];
        assert_abs_diff_eq!(along_row.norm(), 30.0, epsilon = 1e-3);
        assert_abs_diff_eq!(along_col.norm(), 30.0, epsilon = 1e-3);
        assert_abs_diff_eq!(along_row.dot(&along_col), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn partial_board_is_rejected() {
        let spec = CheckerboardSpec::new(5, 4, 20.0).unwrap();
        let mut corners = board_corners(&spec, 0.0, 30.0);
        corners.pop();
        let detector = CheckerboardDetector::new(spec, ChessboardParams::default());
        assert!(detector.detect_from_corners(&corners).is_none());
    }

    #[test]
    fn larger_grid_than_board_is_rejected() {
        let big = CheckerboardSpec::new(7, 5, 20.0).unwrap();
        let corners = board_corners(&big, 0.0, 30.0);
        let spec = CheckerboardSpec::new(5, 4, 20.0).unwrap();
        let detector = CheckerboardDetector::new(spec, ChessboardParams::default());
        assert!(detector.detect_from_corners(&corners).is_none());
    }

    #[test]
    fn weak_corners_are_ignored() {
        let spec = CheckerboardSpec::new(4, 3, 20.0).unwrap();
        let mut corners = board_corners(&spec, 0.0, 30.0);
        corners[5].strength = 0.01;
        let params = ChessboardParams {
            min_corner_strength: 0.5,
            ..Default::default()
        };
        let detector = CheckerboardDetector::new(spec, params);
        assert!(detector.detect_from_corners(&corners).is_none());
    }
}
