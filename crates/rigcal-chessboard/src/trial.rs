use log::{debug, warn};
use rigcal_core::{CornerObservation, ImageSize, TrialObservations};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectError {
    #[error("frame resolution {got} differs from trial resolution {expected}")]
    ResolutionMismatch { expected: ImageSize, got: ImageSize },
    #[error("{failed} frames without a checkerboard exceed the limit of {limit}")]
    TooManyFailures { failed: usize, limit: usize },
    #[error("gray buffer length {len} does not match {width}x{height}")]
    InvalidGrayBuffer {
        len: usize,
        width: usize,
        height: usize,
    },
    #[error("image dimensions {width}x{height} are not supported")]
    InvalidGrayDimensions { width: u32, height: u32 },
}

/// Accumulates per-frame detections of one trial.
///
/// The first frame fixes the trial resolution; any later frame at another
/// resolution is a configuration error for the whole trial. With a failure
/// limit set, the trial aborts as soon as more frames than the limit come
/// back without a board.
#[derive(Debug, Default)]
pub struct TrialCollector {
    observations: TrialObservations,
    failures: usize,
    max_failures: Option<usize>,
}

impl TrialCollector {
    pub fn new(max_failures: Option<usize>) -> Self {
        Self {
            observations: TrialObservations::default(),
            failures: 0,
            max_failures,
        }
    }

    /// Record one frame's detection result.
    pub fn push(
        &mut self,
        size: ImageSize,
        detection: Option<CornerObservation>,
    ) -> Result<(), DetectError> {
        match self.observations.image_size {
            Some(expected) if expected != size => {
                warn!("frame {} is {size}, trial is {expected}", self.observations.frames.len());
                return Err(DetectError::ResolutionMismatch {
                    expected,
                    got: size,
                });
            }
            Some(_) => {}
            None => self.observations.image_size = Some(size),
        }

        if detection.is_none() {
            self.failures += 1;
            debug!("frame {}: no checkerboard", self.observations.frames.len());
        }
        self.observations.frames.push(detection);

        if let Some(limit) = self.max_failures {
            if self.failures > limit {
                return Err(DetectError::TooManyFailures {
                    failed: self.failures,
                    limit,
                });
            }
        }
        Ok(())
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn frame_count(&self) -> usize {
        self.observations.frames.len()
    }

    pub fn finish(self) -> TrialObservations {
        self.observations
    }
}
