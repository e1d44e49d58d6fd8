/// opencv
/// https://docs.rs/opencv/latest/opencv/all.html
///
/// nalgebra
/// https://docs.rs/nalgebra/latest/nalgebra/
///
/// ndarray
/// https://docs.rs/ndarray/latest/ndarray/all.html
///
// dataset layout: <root>/cam0/{camera.yaml,data.csv,data/}, <root>/gt_pose.csv
extern crate opencv;

mod camera;
mod config;
mod dataset;
mod depth_filter;
mod error;
mod flow;
mod geometry;
mod global_cast;
mod global_types;
mod grid;
mod pipeline;
mod rolling_shutter;
mod save;
mod trajectory;

use std::path::PathBuf;

use argh::FromArgs;

use crate::config::PipelineConfig;
use crate::dataset::DatasetTrait;
use crate::flow::DisFlowEstimator;
use crate::pipeline::Pipeline;
use crate::save::ArtifactStore;

/// Generate ground-truth depth and rolling shutter correction flow for a dataset
#[derive(Debug, FromArgs)]
struct Args {
    /// dataset root
    #[argh(positional)]
    dataset: PathBuf,

    /// output root, defaults to the dataset root
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,

    /// pipeline configuration (json)
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// continue from the artifacts already written
    #[argh(switch, short = 'r')]
    resume: bool,

    /// only synthesize flows from saved depth
    #[argh(switch)]
    skip_depth: bool,

    /// stop after the depth stage
    #[argh(switch)]
    skip_flow: bool,
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json(path)?,
        None => PipelineConfig::default(),
    };
    config.resume |= args.resume;
    log::info!("config: {:?}", config);

    let dataset = dataset::DefaultDataset::new(&args.dataset)?;
    let output = args.output.unwrap_or_else(|| args.dataset.clone());
    let store = ArtifactStore::new(&output)?;
    let estimator = DisFlowEstimator::new(dataset.image_paths(), config.flow_preset)?;

    let mut pipeline = Pipeline::new(&dataset, &config, store, estimator)?;
    pipeline.run(!args.skip_depth, !args.skip_flow)
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_nanos()
        .parse_default_env()
        .init();

    let args: Args = argh::from_env();
    log::info!("path: {:?}", args.dataset);
    if let Err(e) = run(args) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}
