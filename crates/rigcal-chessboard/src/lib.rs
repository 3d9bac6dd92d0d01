//! Checkerboard detection on top of ChESS corner clouds.
//!
//! The detector does not look at pixels to find corners; it takes corners
//! from a ChESS-style detector (see the `rigcal` facade for the image
//! front-end), links them into a 4-connected grid graph and accepts a frame
//! only when a single grid component covers the whole board. Corners can
//! then be refined on the frame to sub-pixel accuracy.
//!
//! [`TrialCollector`] guards a trial: one resolution per trial and an
//! optional limit on frames without a board.

mod detector;
mod geom;
mod gridgraph;
mod params;
mod refine;
mod trial;

pub use detector::CheckerboardDetector;
pub use gridgraph::{GridGraph, NeighborDirection, NodeNeighbor};
pub use params::{ChessboardParams, GridGraphParams, SubpixParams};
pub use refine::refine_corner;
pub use trial::{DetectError, TrialCollector};
