//! Frame-level detection on `image` buffers, via the `chess-corners` ChESS detector.

use crate::config::{CalibrationConfig, DetectorConfig};
use crate::error::CalibrationError;
use chess_corners::{find_chess_corners_image, ChessConfig, CornerDescriptor};
use log::{debug, info};
use nalgebra::Point2;
use rigcal_chessboard::{CheckerboardDetector, DetectError, TrialCollector};
use rigcal_core::{CheckerboardSpec, Corner, CornerObservation, GrayImageView, ImageSize, TrialObservations};
use std::path::Path;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// ChESS settings from the run's detector config.
pub fn chess_config(config: &DetectorConfig) -> ChessConfig {
    let mut cfg = ChessConfig::single_scale();
    cfg.params.threshold_rel = config.chess_threshold_rel.into();
    cfg.params.nms_radius = config.chess_nms_radius.into();
    cfg
}

pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

pub fn image_size(img: &::image::GrayImage) -> ImageSize {
    ImageSize::new(img.width(), img.height())
}

fn adapt_chess_corner(c: &CornerDescriptor) -> Corner {
    Corner {
        position: Point2::new(c.x, c.y),
        orientation: c.orientation,
        strength: c.response,
    }
}

/// ChESS corners of one frame.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, cfg), fields(width = img.width(), height = img.height()))
)]
pub fn detect_corners(img: &::image::GrayImage, cfg: &ChessConfig) -> Vec<Corner> {
    find_chess_corners_image(img, cfg)
        .iter()
        .map(adapt_chess_corner)
        .collect()
}

/// Detector bundle for one checkerboard, reused across frames.
pub struct FrameDetector {
    chess: ChessConfig,
    board: CheckerboardDetector,
}

impl FrameDetector {
    pub fn new(spec: CheckerboardSpec, config: &DetectorConfig) -> Self {
        Self {
            chess: chess_config(config),
            board: CheckerboardDetector::new(spec, config.board.clone()),
        }
    }

    /// Full-board detection on one frame, or `None`.
    pub fn detect(&self, img: &::image::GrayImage) -> Option<CornerObservation> {
        let corners = detect_corners(img, &self.chess);
        let found = self.board.detect(&gray_view(img), &corners);
        debug!(
            "{} ChESS corners, board {}",
            corners.len(),
            if found.is_some() { "found" } else { "not found" }
        );
        found
    }
}

/// Detect the board on every frame of one trial, in capture order.
///
/// Frames without a board are kept as `None`. A frame at a different
/// resolution, or exceeding `config.max_detection_failures`, ends the trial.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
pub fn detect_trial<I>(frames: I, config: &CalibrationConfig) -> Result<TrialObservations, DetectError>
where
    I: IntoIterator<Item = ::image::GrayImage>,
{
    let detector = FrameDetector::new(config.checkerboard, &config.detector);
    let mut collector = TrialCollector::new(config.max_detection_failures);
    for frame in frames {
        collector.push(image_size(&frame), detector.detect(&frame))?;
    }
    info!(
        "trial: {} frames, {} without a board",
        collector.frame_count(),
        collector.failures()
    );
    Ok(collector.finish())
}

/// Like [`detect_trial`], decoding frames from image files.
pub fn detect_trial_from_paths<P: AsRef<Path>>(
    paths: &[P],
    config: &CalibrationConfig,
) -> Result<TrialObservations, CalibrationError> {
    let detector = FrameDetector::new(config.checkerboard, &config.detector);
    let mut collector = TrialCollector::new(config.max_detection_failures);
    for path in paths {
        let frame = ::image::ImageReader::open(path.as_ref())?
            .decode()?
            .to_luma8();
        collector.push(image_size(&frame), detector.detect(&frame))?;
    }
    Ok(collector.finish())
}

/// Build an `image::GrayImage` from a raw grayscale buffer.
pub fn gray_image_from_slice(
    width: u32,
    height: u32,
    pixels: &[u8],
) -> Result<::image::GrayImage, DetectError> {
    let w = usize::try_from(width).ok();
    let h = usize::try_from(height).ok();
    let Some((w, h)) = w.zip(h) else {
        return Err(DetectError::InvalidGrayDimensions { width, height });
    };
    let Some(expected) = w.checked_mul(h) else {
        return Err(DetectError::InvalidGrayDimensions { width, height });
    };
    if pixels.len() != expected {
        return Err(DetectError::InvalidGrayBuffer {
            len: pixels.len(),
            width: w,
            height: h,
        });
    }
    ::image::GrayImage::from_raw(width, height, pixels.to_vec())
        .ok_or(DetectError::InvalidGrayDimensions { width, height })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_buffer_length_is_checked() {
        let err = gray_image_from_slice(4, 3, &[0u8; 11]).unwrap_err();
        assert_eq!(
            err,
            DetectError::InvalidGrayBuffer {
                len: 11,
                width: 4,
                height: 3
            }
        );
        let img = gray_image_from_slice(4, 3, &[7u8; 12]).unwrap();
        assert_eq!(image_size(&img), ImageSize::new(4, 3));
        assert_eq!(gray_view(&img).data.len(), 12);
    }

    #[test]
    fn blank_frames_count_as_failures() {
        let mut config = CalibrationConfig::default();
        config.max_detection_failures = Some(1);
        let blank = || ::image::GrayImage::from_pixel(64, 48, ::image::Luma([128u8]));

        let trial = detect_trial([blank()], &config).unwrap();
        assert_eq!(trial.frames, vec![None]);
        assert_eq!(trial.image_size, Some(ImageSize::new(64, 48)));

        let err = detect_trial([blank(), blank()], &config).unwrap_err();
        assert_eq!(err, DetectError::TooManyFailures { failed: 2, limit: 1 });
    }

    #[test]
    fn resolution_change_ends_the_trial() {
        let config = CalibrationConfig::default();
        let frames = [
            ::image::GrayImage::from_pixel(64, 48, ::image::Luma([128u8])),
            ::image::GrayImage::from_pixel(48, 64, ::image::Luma([128u8])),
        ];
        let err = detect_trial(frames, &config).unwrap_err();
        assert!(matches!(err, DetectError::ResolutionMismatch { .. }));
    }
}
