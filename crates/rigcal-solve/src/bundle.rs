//! Joint refinement of intrinsics and per-view board poses.

use crate::lm::{self, BlockProblem, LmOptions, LmSummary};
use crate::pose::RigidPose;
use nalgebra::{DVector, Point2, Point3};
use rigcal_core::{CameraIntrinsics, Distortion, ImageSize};

/// Intrinsic parameters in the solver vector: fx, fy, cx, cy, k1, k2, p1, p2, k3.
const INTRINSIC_PARAMS: usize = 9;
const POSE_PARAMS: usize = 6;

/// Which distortion terms are estimated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DistortionMask {
    pub fix_k3: bool,
    pub fix_tangential: bool,
}

impl DistortionMask {
    fn free_intrinsics(&self) -> Vec<usize> {
        let mut idx = vec![0, 1, 2, 3, 4, 5];
        if !self.fix_tangential {
            idx.extend([6, 7]);
        }
        if !self.fix_k3 {
            idx.push(8);
        }
        idx
    }
}

fn intrinsics_from_params(p: &[f64], image_size: ImageSize) -> CameraIntrinsics {
    CameraIntrinsics {
        fx: p[0],
        fy: p[1],
        cx: p[2],
        cy: p[3],
        distortion: Distortion::from_array([p[4], p[5], p[6], p[7], p[8]]),
        image_size,
        reprojection_error: 0.0,
    }
}

struct IntrinsicsBundle<'a> {
    object: &'a [Point3<f64>],
    views: &'a [&'a [Point2<f64>]],
    image_size: ImageSize,
    /// Full intrinsic vector; entries not listed in `free` keep these values.
    fixed: [f64; INTRINSIC_PARAMS],
    free: Vec<usize>,
}

impl IntrinsicsBundle<'_> {
    fn pose_offset(&self, view: usize) -> usize {
        self.free.len() + POSE_PARAMS * view
    }

    fn camera(&self, params: &DVector<f64>) -> CameraIntrinsics {
        let mut p = self.fixed;
        for (slot, &k) in self.free.iter().enumerate() {
            p[k] = params[slot];
        }
        intrinsics_from_params(&p, self.image_size)
    }

    fn pose(&self, params: &DVector<f64>, view: usize) -> RigidPose {
        let off = self.pose_offset(view);
        RigidPose::from_params(&params.as_slice()[off..off + POSE_PARAMS])
    }
}

impl BlockProblem for IntrinsicsBundle<'_> {
    fn num_params(&self) -> usize {
        self.pose_offset(self.views.len())
    }

    fn num_blocks(&self) -> usize {
        self.views.len()
    }

    fn block_params(&self, block: usize) -> Vec<usize> {
        let off = self.pose_offset(block);
        (0..self.free.len()).chain(off..off + POSE_PARAMS).collect()
    }

    fn block_residuals(&self, block: usize, params: &DVector<f64>) -> Option<DVector<f64>> {
        let camera = self.camera(params);
        let pose = self.pose(params, block);
        let pixels = self.views[block];
        let mut r = DVector::<f64>::zeros(2 * pixels.len());
        for (k, (obj, obs)) in self.object.iter().zip(pixels.iter()).enumerate() {
            let px = camera.project(&pose.apply(obj))?;
            r[2 * k] = px.x - obs.x;
            r[2 * k + 1] = px.y - obs.y;
        }
        r.iter().all(|v| v.is_finite()).then_some(r)
    }
}

/// Result of a joint intrinsics/pose refinement.
#[derive(Debug, Clone)]
pub struct BundleResult {
    pub camera: CameraIntrinsics,
    pub poses: Vec<RigidPose>,
    pub summary: LmSummary,
}

/// Minimise reprojection error over intrinsics, distortion and every
/// view's pose. Terms fixed by `mask` are held at zero and
/// `initial.image_size` is carried through unchanged.
pub fn refine_intrinsics(
    initial: &CameraIntrinsics,
    initial_poses: &[RigidPose],
    object: &[Point3<f64>],
    views: &[&[Point2<f64>]],
    mask: DistortionMask,
    options: &LmOptions,
) -> Option<BundleResult> {
    let d = initial.distortion.to_array();
    let mut fixed = [
        initial.fx, initial.fy, initial.cx, initial.cy, d[0], d[1], d[2], d[3], d[4],
    ];
    if mask.fix_tangential {
        fixed[6] = 0.0;
        fixed[7] = 0.0;
    }
    if mask.fix_k3 {
        fixed[8] = 0.0;
    }
    let problem = IntrinsicsBundle {
        object,
        views,
        image_size: initial.image_size,
        fixed,
        free: mask.free_intrinsics(),
    };

    let mut params = DVector::<f64>::zeros(problem.num_params());
    for (slot, &k) in problem.free.iter().enumerate() {
        params[slot] = fixed[k];
    }
    for (view, pose) in initial_poses.iter().enumerate().take(views.len()) {
        let off = problem.pose_offset(view);
        for (k, v) in pose.to_params().iter().enumerate() {
            params[off + k] = *v;
        }
    }

    let summary = lm::minimize(&problem, &mut params, options)?;
    let camera = problem.camera(&params);
    let poses = (0..views.len()).map(|v| problem.pose(&params, v)).collect();
    Some(BundleResult {
        camera,
        poses,
        summary,
    })
}
