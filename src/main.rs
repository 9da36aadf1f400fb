use clap::Parser;

use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::process::ExitCode;

use rwm2yolo::{
    create_dataset_yaml, read_annotation_records, setup_output_directories, Args, DatasetConfig,
    DatasetPipeline, FsMaterializer,
};

fn run(args: &Args) -> rwm2yolo::Result<()> {
    let config = DatasetConfig::from_args(args)?;
    let pipeline = DatasetPipeline::new(&config)?;

    info!("Make working directory {}..", args.output_dir.display());
    let output_dirs = setup_output_directories(&args.output_dir, args.clean)?;

    info!("Fetch annotation data..");
    let records = read_annotation_records(&args.annotations)?;

    let materializer = FsMaterializer::new(&args.images_root, output_dirs.clone(), args.link_mode);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let stats = pipeline.run(records, &materializer, &mut rng)?;

    let (yaml_path, manifest) = create_dataset_yaml(&output_dirs, pipeline.catalog(), stats)?;
    info!("Created dataset YAML file: {}", yaml_path.display());

    manifest.stats.print_summary();
    Ok(())
}

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if !args.annotations.exists() {
        error!(
            "The specified annotation export does not exist: {}",
            args.annotations.display()
        );
        return ExitCode::FAILURE;
    }

    info!("Starting the dataset build...");
    match run(&args) {
        Ok(()) => {
            info!("YOLO dataset done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to build dataset: {}", e);
            ExitCode::FAILURE
        }
    }
}
