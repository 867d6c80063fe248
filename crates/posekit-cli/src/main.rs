use std::path::PathBuf;

use argh::FromArgs;

use posekit::eval::{
    format_summary_table, read_predictions, read_reference_points, Dataset, EvalConfig,
    EvalReport, Evaluator, RunMetadata,
};

#[derive(FromArgs, Debug)]
/// Keypoint pose recovery and pose-error evaluation.
struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Command {
    Eval(EvalArgs),
}

#[derive(FromArgs, Debug)]
/// Solve the pose of every test sample and report the errors.
#[argh(subcommand, name = "eval")]
struct EvalArgs {
    /// directory containing the meta_*.json ground-truth files
    #[argh(option, short = 'd')]
    dataset: PathBuf,

    /// json file mapping sample ids to predicted keypoints
    #[argh(option, short = 'p')]
    predictions: PathBuf,

    /// file with the 3D reference keypoints of the object
    #[argh(option, short = 'r')]
    reference: PathBuf,

    /// json configuration file; defaults are used when absent
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// where to write the json report
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,

    /// number of worker threads
    #[argh(option, short = 'n')]
    num_threads: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    match args.command {
        Command::Eval(args) => eval(args),
    }
}

fn eval(args: EvalArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => EvalConfig::from_file(path)?,
        None => EvalConfig::default(),
    };
    if args.num_threads.is_some() {
        config.num_threads = args.num_threads;
    }

    let reference = read_reference_points(&args.reference, config.num_keypoints)?;
    let dataset = Dataset::open(&args.dataset)?;
    let predictions = read_predictions(&args.predictions)?;
    log::info!(
        "{} reference keypoints, {} predictions",
        reference.len(),
        predictions.len()
    );

    let metadata = RunMetadata::new(&args.dataset, config.clone());
    let evaluator = Evaluator::new(config, reference)?.with_progress(true);
    let outcome = evaluator.evaluate(&dataset, &predictions)?;

    if !outcome.skipped.is_empty() {
        println!(
            "skipped {} of {} samples",
            outcome.skipped.len(),
            dataset.len()
        );
    }

    let report = EvalReport::new(metadata, outcome)?;
    println!("{}", format_summary_table(&report.summary));

    if let Some(output) = &args.output {
        report.write_json(output)?;
        log::info!("report written to {}", output.display());
    }

    Ok(())
}
