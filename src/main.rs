// External crates
use anyhow::{Context, Result};
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::{Args, Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Local modules
use gru_ids::gru::step_1_tensor_preparation::SequenceDataset;
use gru_ids::gru::step_4_train_model::TrainingConfig;
use gru_ids::gru::step_5_training_loop::{train_bounded, train_streaming, RunSummary};
use gru_ids::gru::step_6_model_serialization::CheckpointManager;
use gru_ids::util::batch_queue::{BatchQueue, QueueOptions};
use gru_ids::util::file_utils::read_sequence_csv;
use gru_ids::util::interrupt::install_interrupt_handler;
use gru_ids::util::model_logger::{run_timestamp, EventFileWriter, ResultFileWriter};

type TrainBackend = Autodiff<NdArray<f32>>;

/// GRU classifiers for network intrusion detection
#[derive(Parser, Debug)]
#[command(name = "gru_ids", version, about)]
struct Cli {
    /// JSON file with a training configuration; flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Datasets have no header line
    #[arg(long, global = true)]
    no_header: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train GRU+SVM on a shuffled batch stream
    Svm(PathArgs),

    /// Train GRU+Softmax for a fixed number of epochs, then validate
    Softmax(SoftmaxArgs),
}

#[derive(Args, Debug)]
struct PathArgs {
    /// CSV file with the training sequences
    #[arg(short = 't', long)]
    train_dataset: PathBuf,

    /// CSV file with the validation sequences
    #[arg(short = 'v', long)]
    validation_dataset: PathBuf,

    /// Directory for model checkpoints
    #[arg(short = 'c', long)]
    checkpoint_path: PathBuf,

    /// Directory for summary event files
    #[arg(short = 'l', long)]
    log_path: PathBuf,

    /// Prefix of checkpoint and result file names
    #[arg(short = 'm', long)]
    model_name: String,
}

#[derive(Args, Debug)]
struct SoftmaxArgs {
    #[command(flatten)]
    paths: PathArgs,

    /// Directory for per-step prediction/label files
    #[arg(short = 'r', long)]
    result_path: PathBuf,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    cell_size: Option<usize>,

    /// Keep probability of the input dropout
    #[arg(long)]
    dropout_rate: Option<f64>,

    #[arg(long)]
    num_classes: Option<usize>,

    #[arg(long)]
    sequence_length: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("gru_ids=info".parse()?))
        .init();

    let cli = Cli::parse();
    let device = NdArrayDevice::Cpu;

    let summary = match cli.command {
        Commands::Svm(ref args) => {
            let config = load_config(cli.config.as_deref(), TrainingConfig::svm(), &args.model_name)?;
            run_svm(&config, args, !cli.no_header, &device)?
        }
        Commands::Softmax(ref args) => {
            let mut config =
                load_config(cli.config.as_deref(), TrainingConfig::softmax(), &args.paths.model_name)?;
            apply_softmax_overrides(&mut config, args);
            run_softmax(&config, args, !cli.no_header, &device)?
        }
    };

    info!(
        "Run finished ({:?}) at step {}, checkpoint {}",
        summary.stop_reason,
        summary.final_step,
        summary.checkpoint.display()
    );
    Ok(())
}

/// Starts from `defaults` or the `--config` file, then applies the model name
fn load_config(path: Option<&Path>, defaults: TrainingConfig, model_name: &str) -> Result<TrainingConfig> {
    let mut config = match path {
        Some(path) => TrainingConfig::from_json_file(path)?,
        None => defaults,
    };
    config.model_name = model_name.to_string();
    Ok(config)
}

fn apply_softmax_overrides(config: &mut TrainingConfig, args: &SoftmaxArgs) {
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(cell_size) = args.cell_size {
        config.cell_size = cell_size;
    }
    if let Some(keep_prob) = args.dropout_rate {
        config.keep_prob = keep_prob;
    }
    if let Some(num_classes) = args.num_classes {
        config.num_classes = num_classes;
    }
    if let Some(sequence_length) = args.sequence_length {
        config.sequence_length = sequence_length;
    }
    if let Some(lr) = args.learning_rate {
        config.learning_rate = gru_ids::gru::step_4_train_model::LearningRate::Constant(lr);
    }
}

fn load_dataset(path: &Path, has_header: bool, config: &TrainingConfig) -> Result<SequenceDataset> {
    read_sequence_csv(
        path,
        has_header,
        config.sequence_length,
        config.encoding,
        config.num_classes,
    )
    .with_context(|| format!("Failed to load dataset {}", path.display()))
}

fn run_svm(config: &TrainingConfig, args: &PathArgs, has_header: bool, device: &NdArrayDevice) -> Result<RunSummary> {
    config.validate()?;
    config.save(&args.checkpoint_path)?;

    let train = Arc::new(load_dataset(&args.train_dataset, has_header, config)?);
    let validation = Arc::new(load_dataset(&args.validation_dataset, has_header, config)?);

    let options = QueueOptions {
        batch_size: config.batch_size,
        epochs: config.epochs,
        capacity: config.queue_capacity,
        num_producers: config.num_producers,
        shuffle: true,
    };
    let mut train_batches = BatchQueue::spawn(train, options).context("Failed to start batch producers")?;
    let mut validation_batches =
        BatchQueue::spawn(validation, options.single_pass()).context("Failed to start batch producers")?;

    let checkpoints = CheckpointManager::new(&args.checkpoint_path, &config.model_name, config.max_to_keep)?;
    let mut writer = EventFileWriter::create(&args.log_path, &run_timestamp())?;
    let interrupt = install_interrupt_handler().context("Failed to install signal handler")?;

    info!("Writing summaries to {}", writer.path().display());
    let summary = train_streaming::<TrainBackend, _, _, _>(
        config,
        &mut train_batches,
        &mut validation_batches,
        &checkpoints,
        &mut writer,
        &interrupt,
        device,
    )?;
    writer.close()?;

    Ok(summary)
}

fn run_softmax(
    config: &TrainingConfig,
    args: &SoftmaxArgs,
    has_header: bool,
    device: &NdArrayDevice,
) -> Result<RunSummary> {
    let paths = &args.paths;
    config.validate()?;
    config.save(&paths.checkpoint_path)?;

    let train = load_dataset(&paths.train_dataset, has_header, config)?;
    let validation = load_dataset(&paths.validation_dataset, has_header, config)?;

    let checkpoints = CheckpointManager::new(&paths.checkpoint_path, &config.model_name, config.max_to_keep)?;
    let timestamp = run_timestamp();
    let mut train_writer = EventFileWriter::create(&paths.log_path, &format!("{}-training", timestamp))?;
    let mut validation_writer = EventFileWriter::create(&paths.log_path, &format!("{}-validation", timestamp))?;
    let mut results = ResultFileWriter::new(&args.result_path, &config.model_name)?;
    let interrupt = install_interrupt_handler().context("Failed to install signal handler")?;

    let summary = train_bounded::<TrainBackend, _, _, _>(
        config,
        &train,
        &validation,
        &checkpoints,
        &mut train_writer,
        &mut validation_writer,
        &mut results,
        &interrupt,
        device,
    )?;
    train_writer.close()?;
    validation_writer.close()?;

    Ok(summary)
}
