//! Gradient-based sub-pixel corner refinement.
//!
//! At a saddle point every image gradient in the surrounding window is
//! orthogonal to the vector from the corner to the sample, so the corner
//! is the least-squares solution of `Σ g gᵀ (q - p) = 0`.

use crate::params::SubpixParams;
use nalgebra::{Matrix2, Point2, Vector2};
use rigcal_core::GrayImageView;

fn gradient(image: &GrayImageView<'_>, x: f64, y: f64) -> Vector2<f64> {
    let gx = 0.5 * (image.sample_bilinear(x + 1.0, y) - image.sample_bilinear(x - 1.0, y));
    let gy = 0.5 * (image.sample_bilinear(x, y + 1.0) - image.sample_bilinear(x, y - 1.0));
    Vector2::new(gx, gy)
}

/// Refine `initial` on `image`. Returns `None` when the window has no
/// usable structure or the iterate leaves the search window.
pub fn refine_corner(
    image: &GrayImageView<'_>,
    initial: Point2<f64>,
    params: &SubpixParams,
) -> Option<Point2<f64>> {
    let half = params.half_window as i32;
    if half == 0 {
        return Some(initial);
    }
    let radius = params.half_window as f64;
    let mut q = initial;

    for _ in 0..params.max_iters.max(1) {
        let mut a = Matrix2::<f64>::zeros();
        let mut b = Vector2::<f64>::zeros();
        for dy in -half..=half {
            for dx in -half..=half {
                let p = Vector2::new(q.x + dx as f64, q.y + dy as f64);
                let g = gradient(image, p.x, p.y);
                let ggt = g * g.transpose();
                a += ggt;
                b += ggt * p;
            }
        }

        if a.trace() <= f64::EPSILON || a.determinant().abs() <= 1e-9 * a.trace() * a.trace() {
            return None;
        }
        let next = a.lu().solve(&b)?;
        let next = Point2::new(next.x, next.y);
        if !next.x.is_finite() || !next.y.is_finite() || (next - initial).norm() > radius {
            return None;
        }
        let shift = (next - q).norm();
        q = next;
        if shift < params.epsilon {
            break;
        }
    }
    Some(q)
}
