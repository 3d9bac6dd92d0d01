//! Pinhole camera with Brown-Conrady radial/tangential distortion.

use crate::ImageSize;
use nalgebra::{Matrix3, Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};

/// Brown-Conrady distortion coefficients.
///
/// Serialized and indexed in the usual `(k1, k2, p1, p2, k3)` order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    pub const LEN: usize = 5;

    pub fn from_array(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    pub fn to_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    /// Apply distortion to undistorted normalized coordinates.
    pub fn distort(&self, n: Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let xy = x * y;
        let x_tan = 2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy;
        Vector2::new(x * radial + x_tan, y * radial + y_tan)
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    pub fn undistort(&self, d: Vector2<f64>, iters: u32) -> Vector2<f64> {
        let mut n = d;
        for _ in 0..iters.max(1) {
            let e = self.distort(n) - d;
            n -= e;
            if e.norm_squared() < 1e-24 {
                break;
            }
        }
        n
    }
}

/// Intrinsic parameters of one camera/lens/firmware configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub distortion: Distortion,
    /// Resolution of the frames the estimate was produced from.
    pub image_size: ImageSize,
    /// RMS pixel residual of the estimate.
    pub reprojection_error: f64,
}

impl CameraIntrinsics {
    /// Distortion-free camera with zero reprojection error.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64, image_size: ImageSize) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            distortion: Distortion::default(),
            image_size,
            reprojection_error: 0.0,
        }
    }

    /// Build from a row-major 3x3 camera matrix (skew is ignored).
    pub fn from_camera_matrix(
        k: &Matrix3<f64>,
        distortion: Distortion,
        image_size: ImageSize,
        reprojection_error: f64,
    ) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
            distortion,
            image_size,
            reprojection_error,
        }
    }

    pub fn camera_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Physical-validity checks: positive finite focal lengths, finite
    /// principal point and non-negative reprojection error.
    pub fn is_physical(&self) -> bool {
        let finite = [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .chain(self.distortion.to_array().iter())
            .all(|v| v.is_finite());
        finite
            && self.fx > 0.0
            && self.fy > 0.0
            && self.reprojection_error.is_finite()
            && self.reprojection_error >= 0.0
    }

    /// Map undistorted normalized coordinates to pixels.
    #[inline]
    pub fn normalized_to_pixel(&self, n: Vector2<f64>) -> Point2<f64> {
        let d = self.distortion.distort(n);
        Point2::new(self.fx * d.x + self.cx, self.fy * d.y + self.cy)
    }

    /// Project a point given in camera coordinates. `None` behind the camera.
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= 1e-12 {
            return None;
        }
        Some(self.normalized_to_pixel(Vector2::new(p.x / p.z, p.y / p.z)))
    }

    /// Undistorted normalized coordinates of a pixel.
    pub fn undistort_pixel(&self, px: &Point2<f64>) -> Vector2<f64> {
        let d = Vector2::new((px.x - self.cx) / self.fx, (px.y - self.cy) / self.fy);
        self.distortion.undistort(d, 20)
    }

    /// Horizontal and vertical field of view in degrees (pinhole part only).
    pub fn field_of_view_deg(&self) -> (f64, f64) {
        let w = self.image_size.width as f64;
        let h = self.image_size.height as f64;
        let hfov = (self.cx / self.fx).atan() + ((w - self.cx) / self.fx).atan();
        let vfov = (self.cy / self.fy).atan() + ((h - self.cy) / self.fy).atan();
        (hfov.to_degrees(), vfov.to_degrees())
    }
}
