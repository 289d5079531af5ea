use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use motor_intention::connectivity::{ConnectivityGranger, GrangerSettings};
use motor_intention::decoding::{
    estimate_earliest_timepoint, write_rows, BaselineMode, DecodingTimeSettings, EarliestTimeRow,
    PredictionSet,
};
use motor_intention::error::MIError;
use motor_intention::recording::{BadEpochs, RecordingId};
use motor_intention::signal::Signal;
use motor_intention::simulate::simulate_lagged_pair;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Parser, Debug)]
#[command(version, about = "Connectivity and decoding time analyses of intracranial recordings")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Spectral Granger causality between seed and target channels
    Granger(GrangerArgs),
    /// Earliest decoding times of timelocked predictions
    DecodingTimes(DecodingArgs),
    /// Simulate a two-channel signal with a lagged directed interaction
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct GrangerArgs {
    /// Signal file (JSON)
    #[arg(long)]
    signal: PathBuf,

    /// Connectivity settings file (JSON)
    #[arg(long)]
    settings: PathBuf,

    /// Directory of the bad epoch tables
    #[arg(long, requires = "basename")]
    bad_epochs: Option<PathBuf>,

    /// Recording basename of the bad epoch table
    #[arg(long)]
    basename: Option<String>,

    /// Results file (JSON)
    #[arg(long)]
    output: PathBuf,

    /// Long-format results table (CSV)
    #[arg(long)]
    table: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DecodingArgs {
    /// Timelocked prediction files (JSON)
    #[arg(long, num_args = 1.., required = true)]
    predictions: Vec<PathBuf>,

    /// Directory of the bad epoch tables
    #[arg(long)]
    bad_epochs: PathBuf,

    /// Estimator settings file (JSON), defaults otherwise
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Label of the channels the predictions were made from
    #[arg(long, default_value = "ecog")]
    channels: String,

    /// Start of the analysed window (s)
    #[arg(long, default_value_t = -3.0, allow_negative_numbers = true)]
    tmin: f64,

    /// End of the analysed window (s)
    #[arg(long, default_value_t = 2.0, allow_negative_numbers = true)]
    tmax: f64,

    /// Baseline window (s)
    #[arg(long, num_args = 2, default_values_t = [-3.0, -2.0], allow_negative_numbers = true)]
    baseline: Vec<f64>,

    /// Decoding time table (CSV)
    #[arg(long)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[arg(long, default_value = "50")]
    n_epochs: usize,

    #[arg(long, default_value = "200")]
    n_times: usize,

    /// Sampling frequency (Hz)
    #[arg(long, default_value = "200.0")]
    sfreq: f64,

    /// Delay of the driven channel (samples)
    #[arg(long, default_value = "5")]
    lag: usize,

    #[arg(long, default_value = "0.8")]
    coupling: f64,

    #[arg(long, default_value = "0.5")]
    noise: f64,

    #[arg(long, default_value = "42")]
    seed: u64,

    /// Signal file (JSON)
    #[arg(long)]
    output: PathBuf,
}

/// The recording basename of a timelocked prediction file, without the trailing product suffix.
fn recording_basename(path: &Path) -> Result<String, MIError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| MIError::InvalidParameter(format!("invalid file name {}", path.display())))?;
    match stem.rsplit_once('_') {
        Some((basename, suffix)) if suffix.ends_with("Timelocked") => Ok(basename.to_string()),
        _ => Ok(stem.to_string()),
    }
}

fn run_granger(args: GrangerArgs) -> Result<(), MIError> {
    let mut signal = Signal::load_from(&args.signal)?;
    let settings = GrangerSettings::load_from(&args.settings)?;
    if let (Some(dir), Some(basename)) = (&args.bad_epochs, &args.basename) {
        let bad_epochs = BadEpochs::load(dir, basename)?;
        signal.drop_bad_epochs(&bad_epochs)?;
    }

    let results = ConnectivityGranger::new(&signal, settings)?.process()?;
    results.save_to(&args.output)?;
    log::info!("Connectivity saved to {}", args.output.display());

    if let Some(table) = &args.table {
        write_rows(table, &results.rows())?;
        log::info!("Connectivity table saved to {}", table.display());
    }
    Ok(())
}

fn run_decoding_times(args: DecodingArgs) -> Result<(), MIError> {
    let settings = match &args.settings {
        Some(path) => DecodingTimeSettings::load_from(path)?,
        None => DecodingTimeSettings::default(),
    };
    let baseline = (args.baseline[0], args.baseline[1]);

    let mut rows = Vec::with_capacity(args.predictions.len());
    for path in args.predictions.iter() {
        let basename = recording_basename(path)?;
        let id = RecordingId::from_basename(&basename)?;
        log::info!("Processing {}", basename);

        let mut set = PredictionSet::from_timelocked_json(path)?;
        set.drop_bad_trials(&BadEpochs::load(&args.bad_epochs, &basename)?)?;
        set.baseline_correct(baseline, BaselineMode::Zscore, false)?;
        let set = set.crop(args.tmin, args.tmax)?;

        let default = set.times().last().copied().unwrap_or(args.tmax);
        let estimate = estimate_earliest_timepoint(&set, &settings, default)?;
        log::info!(
            "Earliest timepoint of {}: {:.2} s ({} trials)",
            basename,
            estimate.time,
            estimate.trials_used
        );
        rows.push(EarliestTimeRow {
            subject: id.subject,
            medication: id.medication,
            stimulation: id.stimulation,
            channels: args.channels.clone(),
            earliest_timepoint: estimate.time,
            trials_used: estimate.trials_used,
        });
    }
    write_rows(&args.output, &rows)?;
    log::info!("Decoding times saved to {}", args.output.display());
    Ok(())
}

fn run_simulate(args: SimulateArgs) -> Result<(), MIError> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let signal = simulate_lagged_pair(
        args.n_epochs,
        args.n_times,
        args.sfreq,
        args.lag,
        args.coupling,
        args.noise,
        &mut rng,
    )?;
    signal.save_to(&args.output)?;
    log::info!("Signal saved to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), MIError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    log::debug!("{:?}", cli);

    match cli.command {
        Command::Granger(args) => run_granger(args),
        Command::DecodingTimes(args) => run_decoding_times(args),
        Command::Simulate(args) => run_simulate(args),
    }
}
