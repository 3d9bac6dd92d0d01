use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

/// Absolute difference between two angles (radians), normalized into `[0, π]`.
pub fn angle_diff_abs(a: f32, b: f32) -> f32 {
    let two_pi = 2.0 * PI;
    let mut diff = (b - a).rem_euclid(two_pi);
    if diff >= PI {
        diff -= two_pi;
    }
    diff.abs()
}

/// Whether two undirected directions are orthogonal within `tolerance`.
pub fn is_orthogonal(reference_angle: f32, other_angle: f32, tolerance: f32) -> bool {
    let diff = angle_diff_abs(reference_angle, other_angle);
    let diff = diff.min(PI - diff);
    (FRAC_PI_2 - diff).abs() <= tolerance.abs()
}

/// Angle in `[0, π/2]` between an undirected axis and a directed vector.
pub fn axis_vec_diff(axis_angle: f32, vec_angle: f32) -> f32 {
    let diff_abs = angle_diff_abs(axis_angle, vec_angle);
    diff_abs.min(PI - diff_abs)
}

/// Dominant board edge direction from corner orientations.
///
/// Orientations are diagonals defined modulo π and alternate by 90° between
/// neighbours, so they agree modulo π/2: average them in quadruple-angle
/// space, then rotate by 45° onto the board edge. The returned axis is the
/// representative closest to the image x axis, in `(-π/4, π/4]`.
pub fn dominant_edge_axis(orientations: impl IntoIterator<Item = (f32, f32)>) -> Option<f32> {
    let (mut sx, mut sy, mut wsum) = (0.0f32, 0.0f32, 0.0f32);
    for (theta, w) in orientations {
        if w <= 0.0 || !theta.is_finite() {
            continue;
        }
        sx += w * (4.0 * theta).cos();
        sy += w * (4.0 * theta).sin();
        wsum += w;
    }
    if wsum <= 0.0 || (sx * sx + sy * sy).sqrt() < 1e-3 * wsum {
        return None;
    }
    let diagonal = 0.25 * sy.atan2(sx);
    let mut axis = (diagonal + FRAC_PI_4).rem_euclid(FRAC_PI_2);
    if axis > FRAC_PI_4 {
        axis -= FRAC_PI_2;
    }
    Some(axis)
}
