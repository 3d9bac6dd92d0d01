//! Levenberg-Marquardt over block-structured reprojection problems.
//!
//! Calibration problems are many small residual blocks (one per view or per
//! point) that each touch a handful of parameters. A [`BlockProblem`]
//! describes them block by block; [`minimize`] stacks the blocks into the
//! dense residual vector and Jacobian that `levenberg-marquardt` solves on.
//! Jacobians are central differences, computed per block over only the
//! parameters that block depends on.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::debug;
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A least-squares problem split into residual blocks.
///
/// Every block must return the same number of residuals for any parameter
/// vector it is defined at.
pub trait BlockProblem {
    fn num_params(&self) -> usize;

    fn num_blocks(&self) -> usize;

    /// Indices of the parameters block `block` depends on.
    fn block_params(&self, block: usize) -> Vec<usize>;

    /// Residuals of one block; `None` when the parameters make it undefined
    /// (point behind the camera, non-finite projection).
    fn block_residuals(&self, block: usize, params: &DVector<f64>) -> Option<DVector<f64>>;
}

/// Solver settings, forwarded to [`LevenbergMarquardt`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LmOptions {
    /// Evaluation budget as a multiple of `n + 1` for `n` parameters.
    pub max_iters: usize,
    /// Relative reduction of the cost below which the solve stops.
    pub ftol: f64,
    /// Relative parameter change below which the solve stops.
    pub xtol: f64,
    /// Residual/Jacobian orthogonality below which the solve stops.
    pub gtol: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
        }
    }
}

impl LmOptions {
    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }
}

#[derive(Debug, Clone)]
pub struct LmSummary {
    /// Half the squared residual norm at the start.
    pub initial_cost: f64,
    pub final_cost: f64,
    pub evaluations: usize,
    pub converged: bool,
    /// Termination reason as reported by the solver.
    pub termination: String,
}

impl fmt::Display for LmSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cost {:.6e} -> {:.6e} after {} evaluations ({})",
            self.initial_cost, self.final_cost, self.evaluations, self.termination
        )
    }
}

/// All block residuals, concatenated in block order.
pub fn stacked_residuals<P: BlockProblem + ?Sized>(
    problem: &P,
    params: &DVector<f64>,
) -> Option<DVector<f64>> {
    let mut out = Vec::new();
    for b in 0..problem.num_blocks() {
        let r = problem.block_residuals(b, params)?;
        out.extend(r.iter().copied());
    }
    out.iter()
        .all(|v| v.is_finite())
        .then(|| DVector::from_vec(out))
}

fn step_size(x: f64) -> f64 {
    1e-6 * x.abs().max(1.0)
}

/// Jacobian of [`stacked_residuals`]; entries outside each block's
/// parameters are zero.
pub fn stacked_jacobian<P: BlockProblem + ?Sized>(
    problem: &P,
    params: &DVector<f64>,
) -> Option<DMatrix<f64>> {
    let mut blocks = Vec::with_capacity(problem.num_blocks());
    let mut rows = 0;
    for b in 0..problem.num_blocks() {
        let idx = problem.block_params(b);
        let r0 = problem.block_residuals(b, params)?;
        let mut local = DMatrix::<f64>::zeros(r0.len(), idx.len());
        let mut shifted = params.clone();
        for (col, &k) in idx.iter().enumerate() {
            let h = step_size(params[k]);
            shifted[k] = params[k] + h;
            let plus = problem.block_residuals(b, &shifted)?;
            shifted[k] = params[k] - h;
            let minus = problem.block_residuals(b, &shifted)?;
            shifted[k] = params[k];
            local.set_column(col, &((plus - minus) / (2.0 * h)));
        }
        rows += r0.len();
        blocks.push((idx, local));
    }

    let mut jac = DMatrix::<f64>::zeros(rows, problem.num_params());
    let mut row = 0;
    for (idx, local) in blocks {
        for (col, &k) in idx.iter().enumerate() {
            for r in 0..local.nrows() {
                jac[(row + r, k)] = local[(r, col)];
            }
        }
        row += local.nrows();
    }
    jac.iter().all(|v| v.is_finite()).then_some(jac)
}

/// Adapter handing a [`BlockProblem`] to the solver.
struct Stacked<'a, P: ?Sized> {
    problem: &'a P,
    params: DVector<f64>,
}

impl<P: BlockProblem + ?Sized> LeastSquaresProblem<f64, Dyn, Dyn> for Stacked<'_, P> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.copy_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        stacked_residuals(self.problem, &self.params)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        stacked_jacobian(self.problem, &self.params)
    }
}

/// Minimise the problem starting from `params` (updated in place).
///
/// Returns `None` if the problem is not evaluable at the start or at the
/// point the solver stops at; `params` is left untouched then.
pub fn minimize<P: BlockProblem + ?Sized>(
    problem: &P,
    params: &mut DVector<f64>,
    options: &LmOptions,
) -> Option<LmSummary> {
    let initial_cost = 0.5 * stacked_residuals(problem, params)?.norm_squared();
    debug!(
        "LM start: {} params, {} blocks, cost {:.6e}",
        problem.num_params(),
        problem.num_blocks(),
        initial_cost
    );

    let solver = LevenbergMarquardt::new()
        .with_ftol(options.ftol)
        .with_xtol(options.xtol)
        .with_gtol(options.gtol)
        .with_patience(options.max_iters.max(1));
    let (solved, report) = solver.minimize(Stacked {
        problem,
        params: params.clone(),
    });

    let final_cost = 0.5 * solved.residuals()?.norm_squared();
    *params = solved.params;
    let summary = LmSummary {
        initial_cost,
        final_cost,
        evaluations: report.number_of_evaluations,
        converged: report.termination.was_successful(),
        termination: format!("{:?}", report.termination),
    };
    debug!("LM done: {summary}");
    Some(summary)
}
