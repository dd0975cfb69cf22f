//! Batch face alignment.
//!
//! Usage:
//!   face-align <predictor> <source>                      # writes <source>/../aligned
//!   face-align <predictor> <source> -o out --report r.json
//!   face-align <predictor> <source> --fallback-box       # align even without a detection

use std::path::{Path, PathBuf};

use clap::Parser;
use face_align::batch::{default_output_dir, BatchAligner};
use face_align::dlib::load_dlib_model;
use face_align::{
    logging, Aligner, AlignmentTemplate, FacePipeline, NoFacePolicy, SeetaDetector,
    SeetaSettings, ShapePredictor,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "face-align")]
#[command(author, version, long_about = None)]
#[command(about = "Align face photos onto a canonical template")]
struct Args {
    /// Landmark model (dlib .dat / .dat.bz2, or a native .bin)
    #[arg(required = true)]
    predictor: PathBuf,

    /// Directory with one sub-directory of .jpg photos per identity
    #[arg(required = true)]
    source: PathBuf,

    /// Output directory (default: <source>/../aligned)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Face detector model path
    #[arg(long, default_value = "seeta_fd_frontal_v1.0.bin")]
    detector: PathBuf,

    /// Minimum face size for detection
    #[arg(long, default_value = "20")]
    min_face_size: u32,

    /// Alignment template JSON (default: canonical 9-point template)
    #[arg(long)]
    template: Option<PathBuf>,

    /// Predict inside a fixed (50,50)-(200,200) box when no face is detected
    #[arg(long)]
    fallback_box: bool,

    /// Flip aligned images vertically before saving
    #[arg(long)]
    flip_vertical: bool,

    /// Write the batch report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = logging::init(args.verbose) {
        eprintln!("Warning: could not initialise logging: {}", e);
    }

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let aligner = match &args.template {
        Some(path) => {
            info!(path = %path.display(), "loading alignment template");
            Aligner::new(AlignmentTemplate::from_json_file(path)?)?
        }
        None => Aligner::canonical(),
    };

    info!(path = %args.detector.display(), "loading face detector");
    let settings = SeetaSettings {
        min_face_size: args.min_face_size,
        ..SeetaSettings::default()
    };
    let detector = SeetaDetector::load(&args.detector, settings)?;

    info!(path = %args.predictor.display(), "loading landmark model");
    let predictor = load_predictor(&args.predictor)?;

    let no_face = if args.fallback_box {
        NoFacePolicy::legacy_box()
    } else {
        NoFacePolicy::Fail
    };
    let pipeline = FacePipeline::new(detector, predictor, aligner).with_no_face_policy(no_face);
    let mut batch = BatchAligner::new(pipeline).flip_vertical(args.flip_vertical);

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_dir(&args.source));
    let report = batch.run(&args.source, &output)?;

    eprintln!(
        "Aligned {}/{} images from {} identities into {}",
        report.aligned,
        report.processed,
        report.identities,
        output.display()
    );
    for failure in &report.failures {
        eprintln!("  failed: {} ({})", failure.image.display(), failure.error);
    }

    if let Some(ref path) = args.report {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        info!(path = %path.display(), "report written");
    }

    Ok(())
}

fn load_predictor(path: &Path) -> face_align::Result<ShapePredictor> {
    let native = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("bin"));
    if native {
        ShapePredictor::load(path)
    } else {
        load_dlib_model(path)
    }
}
