//! Closed-form intrinsics from plane homographies (Zhang's method).

use crate::error::EstimateError;
use nalgebra::{DMatrix, Matrix3};
use rigcal_core::{Homography, ImageSize};

fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> [f64; 6] {
    let hi = h.column(i);
    let hj = h.column(j);
    [
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ]
}

/// Pixel conditioning: centre on the image and scale to unit half-size.
fn pixel_normalization(size: ImageSize) -> Matrix3<f64> {
    let cx = 0.5 * size.width as f64;
    let cy = 0.5 * size.height as f64;
    let s = cx.max(cy).max(1.0);
    Matrix3::new(1.0 / s, 0.0, -cx / s, 0.0, 1.0 / s, -cy / s, 0.0, 0.0, 1.0)
}

/// Zero-skew camera matrix from at least three board homographies
/// (board plane to pixels).
pub fn intrinsics_from_homographies(
    homographies: &[Homography],
    image_size: ImageSize,
) -> Result<Matrix3<f64>, EstimateError> {
    if homographies.len() < 3 {
        return Err(EstimateError::InsufficientObservations {
            found: homographies.len(),
            required: 3,
        });
    }

    let n = pixel_normalization(image_size);
    let mut v = DMatrix::<f64>::zeros(2 * homographies.len(), 6);
    for (k, hom) in homographies.iter().enumerate() {
        let h = n * hom.h;
        let v12 = v_ij(&h, 0, 1);
        let v11 = v_ij(&h, 0, 0);
        let v22 = v_ij(&h, 1, 1);
        for c in 0..6 {
            v[(2 * k, c)] = v12[c];
            v[(2 * k + 1, c)] = v11[c] - v22[c];
        }
    }

    let svd = v.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| EstimateError::IllConditioned("SVD failed in closed-form init".into()))?;
    let mut b = v_t.row(v_t.nrows() - 1).transpose();
    if b[0] < 0.0 {
        b = -b;
    }
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    if b11 <= 0.0 || denom <= 0.0 {
        return Err(EstimateError::IllConditioned(
            "image of the absolute conic is not positive definite".into(),
        ));
    }
    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if lambda / b11 <= 0.0 {
        return Err(EstimateError::IllConditioned(
            "negative scale in closed-form init".into(),
        ));
    }
    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    let k_norm = Matrix3::new(alpha, 0.0, u0, 0.0, beta, v0, 0.0, 0.0, 1.0);
    let n_inv = n
        .try_inverse()
        .ok_or_else(|| EstimateError::IllConditioned("singular pixel normalization".into()))?;
    let k = n_inv * k_norm;
    if !k.iter().all(|x| x.is_finite()) {
        return Err(EstimateError::IllConditioned(
            "non-finite closed-form intrinsics".into(),
        ));
    }
    Ok(k)
}
