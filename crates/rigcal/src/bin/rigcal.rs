use std::{error::Error, fs, path::Path, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use rigcal::core::{DeploymentKey, SessionCameraKey, TrialObservations, TrialRole};
use rigcal::store::{CalibrationStore, IntrinsicsRecord, SessionMetadata};
use rigcal::{
    calibrate_extrinsics, calibrate_intrinsics, load_trial_plan, resolve_camera_model,
    CalibrationConfig, ExtrinsicsJob, IntrinsicsJob, Trial,
};
use serde_json::json;

/// Multi-camera rig calibration from pre-detected checkerboard corners.
#[derive(Debug, Parser)]
#[command(author, version, about = "Camera intrinsics and session extrinsics calibration")]
struct Cli {
    /// Log level (off, error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info", value_parser = parse_level)]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Estimate and store the intrinsics of one camera model.
    Intrinsics(IntrinsicsArgs),
    /// Solve and store one session camera's pose.
    Extrinsics(ExtrinsicsArgs),
    /// Print a stored record.
    Show(ShowArgs),
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// JSON CalibrationConfig. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Calibration store root directory.
    #[arg(long)]
    store: PathBuf,

    /// Session metadata JSON; its checkerboard replaces the configured one
    /// and its camera model is used when --camera-model is omitted.
    #[arg(long)]
    metadata: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct IntrinsicsArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Defaults to the camera model named by --metadata.
    #[arg(long)]
    camera_model: Option<String>,

    /// Deployment profile to store the result under; repeat for several.
    #[arg(long = "profile", required = true)]
    profiles: Vec<String>,

    /// Trial as `ID=corners.json` (TrialObservations JSON); repeat per trial.
    #[arg(long = "trial", value_parser = parse_trial)]
    trials: Vec<(String, PathBuf)>,

    /// Rerun the stored trial manifest, reading `<ID>.json` from this directory.
    #[arg(long, conflicts_with = "trials")]
    rerun_from: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ExtrinsicsArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Defaults to the camera model named by --metadata.
    #[arg(long)]
    camera_model: Option<String>,

    #[arg(long)]
    profile: String,

    #[arg(long)]
    session: String,

    #[arg(long)]
    camera: String,

    /// Detections of the extrinsics trial (TrialObservations JSON).
    #[arg(long)]
    corners: PathBuf,
}

#[derive(Debug, Args)]
struct ShowArgs {
    #[arg(long)]
    store: PathBuf,

    #[arg(long, requires = "profile", conflicts_with = "session")]
    camera_model: Option<String>,

    #[arg(long)]
    profile: Option<String>,

    #[arg(long, requires = "camera")]
    session: Option<String>,

    #[arg(long)]
    camera: Option<String>,
}

fn parse_trial(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((id, path)) if !id.trim().is_empty() && !path.is_empty() => {
            Ok((id.trim().to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected ID=path, got `{s}`")),
    }
}

fn parse_level(s: &str) -> Result<LevelFilter, String> {
    s.parse().map_err(|_| format!("unknown log level `{s}`"))
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn Error>> {
    let data = fs::read_to_string(path)?;
    let value = serde_json::from_str(&data)?;
    Ok(value)
}

/// Run config with session metadata applied, plus the metadata itself.
fn load_config(
    common: &CommonArgs,
) -> Result<(CalibrationConfig, Option<SessionMetadata>), Box<dyn Error>> {
    let config = match &common.config {
        Some(path) => CalibrationConfig::load_json(path)?,
        None => CalibrationConfig::default(),
    };
    let metadata = match &common.metadata {
        Some(path) => SessionMetadata::load_optional(path)?,
        None => None,
    };
    let config = match &metadata {
        Some(meta) => config.with_metadata(meta)?,
        None => config,
    };
    Ok((config, metadata))
}

fn run_intrinsics(args: &IntrinsicsArgs) -> Result<serde_json::Value, Box<dyn Error>> {
    let (config, metadata) = load_config(&args.common)?;
    let camera_model = resolve_camera_model(args.camera_model.as_deref(), metadata.as_ref())?;
    let store = CalibrationStore::open(&args.common.store)?;

    let job = match &args.rerun_from {
        Some(dir) => {
            let key = DeploymentKey::new(camera_model.clone(), args.profiles[0].clone());
            let manifest = load_trial_plan(&store, &key, true)?
                .ok_or_else(|| format!("no trial manifest for {key}"))?;
            IntrinsicsJob::from_manifest(&manifest, args.profiles.clone(), |entry| {
                let path = dir.join(format!("{}.json", entry.id));
                let raw = fs::read_to_string(path)?;
                Ok(serde_json::from_str::<TrialObservations>(&raw)?)
            })?
        }
        None => {
            if args.trials.is_empty() {
                return Err("at least one --trial or --rerun-from is required".into());
            }
            let trials = args
                .trials
                .iter()
                .map(|(id, path)| {
                    let obs: TrialObservations = load_json_file(path)?;
                    Ok(Trial::new(id.clone(), TrialRole::Intrinsics, obs))
                })
                .collect::<Result<Vec<_>, Box<dyn Error>>>()?;
            IntrinsicsJob::new(&config, camera_model, args.profiles.clone(), trials)
        }
    };

    let run = calibrate_intrinsics(&config, &job, &store)?;
    Ok(json!({
        "key": run.key,
        "intrinsics": IntrinsicsRecord::from_intrinsics(&run.intrinsics),
        "trials": run.comparison.trials,
        "flagged": run.flagged,
        "skipped": run
            .skipped
            .iter()
            .map(|(id, e)| json!({"trial": id, "error": e.to_string()}))
            .collect::<Vec<_>>(),
        "stored": run.stored,
    }))
}

fn run_extrinsics(args: &ExtrinsicsArgs) -> Result<serde_json::Value, Box<dyn Error>> {
    let (config, metadata) = load_config(&args.common)?;
    let camera_model = resolve_camera_model(args.camera_model.as_deref(), metadata.as_ref())?;
    let store = CalibrationStore::open(&args.common.store)?;
    let observations: TrialObservations = load_json_file(&args.corners)?;
    let job = ExtrinsicsJob {
        session: SessionCameraKey::new(args.session.clone(), args.camera.clone()),
        intrinsics: DeploymentKey::new(camera_model, args.profile.clone()),
        trials: vec![Trial::new("extrinsics", TrialRole::Extrinsics, observations)],
    };
    let run = calibrate_extrinsics(&config, &job, &store)?;
    let pose = &run.solution.extrinsics;
    Ok(json!({
        "key": run.key,
        "reference_frame": pose.reference_frame,
        "rotation": pose.rotation,
        "translation": pose.translation,
        "camera_center": pose.camera_center(),
        "frames_used": run.solution.frames_used,
        "reprojection_error": run.solution.reprojection_error,
        "warnings": run.solution.warnings,
        "stored": run.stored,
    }))
}

fn run_show(args: &ShowArgs) -> Result<serde_json::Value, Box<dyn Error>> {
    let store = CalibrationStore::open(&args.store)?;
    match (&args.camera_model, &args.profile, &args.session, &args.camera) {
        (Some(model), Some(profile), _, _) => {
            let key = DeploymentKey::new(model.clone(), profile.clone());
            let intrinsics = store.get_intrinsics(&key)?;
            let (fov_x, fov_y) = intrinsics.field_of_view_deg();
            Ok(json!({
                "key": key,
                "intrinsics": IntrinsicsRecord::from_intrinsics(&intrinsics),
                "field_of_view_deg": [fov_x, fov_y],
            }))
        }
        (_, _, Some(session), Some(camera)) => {
            let key = SessionCameraKey::new(session.clone(), camera.clone());
            let record = store.get_extrinsics_record(&key)?;
            let pose = store.get_extrinsics(&key)?;
            Ok(json!({
                "key": key,
                "record": record,
                "camera_center": pose.camera_center(),
            }))
        }
        _ => Err("show needs --camera-model/--profile or --session/--camera".into()),
    }
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    rigcal::init_with_level(cli.log_level)?;
    #[cfg(feature = "tracing")]
    rigcal::core::init_tracing(rigcal::core::TraceFormat::Pretty, "rigcal=info");
    let report = match &cli.command {
        Command::Intrinsics(args) => run_intrinsics(args)?,
        Command::Extrinsics(args) => run_extrinsics(args)?,
        Command::Show(args) => run_show(args)?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
