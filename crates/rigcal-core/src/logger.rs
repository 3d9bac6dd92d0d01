//! Stderr logging for the calibration tools.
//!
//! Records from the `rigcal*` crates are shown down to the configured level;
//! everything else (image decoders, detectors) is capped at `Warn` so a
//! `debug` run stays readable. Output lines carry the elapsed run time and
//! the emitting module:
//!
//! ```text
//! [  0.412s  WARN rigcal::pipeline] skipping trial 'noisy': ...
//! ```

use std::io::Write;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable read by [`init_from_env`].
pub const LOG_ENV: &str = "RIGCAL_LOG";

const OWN_TARGET_PREFIX: &str = "rigcal";
const FOREIGN_CEILING: Level = Level::Warn;

struct RunLogger {
    own: LevelFilter,
    started: Instant,
}

impl RunLogger {
    fn ceiling_for(&self, target: &str) -> LevelFilter {
        if target.starts_with(OWN_TARGET_PREFIX) {
            self.own
        } else {
            self.own.min(FOREIGN_CEILING.to_level_filter())
        }
    }
}

impl Log for RunLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.ceiling_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let secs = self.started.elapsed().as_secs_f64();
        let line = format!(
            "[{secs:7.3}s {:>5} {}] {}\n",
            record.level(),
            record.target(),
            record.args()
        );
        // A closed stderr is not worth aborting a calibration run over.
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static RUN_LOGGER: OnceLock<RunLogger> = OnceLock::new();

/// Install the stderr logger, showing `rigcal` records down to `level`.
///
/// Only the first call installs anything.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if RUN_LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = RUN_LOGGER.get_or_init(|| RunLogger {
        own: level,
        started: Instant::now(),
    });
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}

/// Like [`init_with_level`], taking the level from `RIGCAL_LOG` when it parses.
pub fn init_from_env(fallback: LevelFilter) -> Result<(), log::SetLoggerError> {
    init_with_level(level_from_env(fallback))
}

fn level_from_env(fallback: LevelFilter) -> LevelFilter {
    std::env::var(LOG_ENV)
        .ok()
        .and_then(|raw| LevelFilter::from_str(raw.trim()).ok())
        .unwrap_or(fallback)
}

/// Output shape of the span subscriber installed by [`init_tracing`].
#[cfg(feature = "tracing")]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceFormat {
    /// Human-readable lines with an uptime clock.
    Pretty,
    /// One JSON object per event, for log collectors.
    Json,
}

/// Install a `tracing` subscriber that reports span timings on close.
///
/// The filter comes from `RUST_LOG`, falling back to `default_directive`
/// (for example `"rigcal=debug"`). Does nothing if a global subscriber
/// is already set.
#[cfg(feature = "tracing")]
pub fn init_tracing(format: TraceFormat, default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE);
    let _ = match format {
        TraceFormat::Json => builder.json().flatten_event(true).finish().try_init(),
        TraceFormat::Pretty => builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger(level: LevelFilter) -> RunLogger {
        RunLogger {
            own: level,
            started: Instant::now(),
        }
    }

    #[test]
    fn own_targets_follow_configured_level() {
        let l = logger(LevelFilter::Debug);
        assert_eq!(l.ceiling_for("rigcal_solve::intrinsics"), LevelFilter::Debug);
        assert_eq!(l.ceiling_for("rigcal"), LevelFilter::Debug);
    }

    #[test]
    fn foreign_targets_are_capped_at_warn() {
        assert_eq!(logger(LevelFilter::Trace).ceiling_for("image::codecs"), LevelFilter::Warn);
        assert_eq!(logger(LevelFilter::Error).ceiling_for("chess_corners"), LevelFilter::Error);
    }
}
