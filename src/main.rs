//! Leafscan CLI
//!
//! Command-line entry point for training, evaluating, and running
//! inference with the transfer-learning plant disease classifier.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use leafscan::backend::{backend_name, init_device, DefaultBackend, TrainBackend};
use leafscan::config::{DecodePolicy, RunConfig};
use leafscan::dataset::assembler::DatasetAssembler;
use leafscan::dataset::augment::{Augmentor, TransformMode};
use leafscan::dataset::batcher::TensorBatcher;
use leafscan::dataset::pipeline::SampleLoader;
use leafscan::eval::evaluate_split;
use leafscan::training::orchestrator::{
    StageScheduler, CLASS_MAPPING_FILE, FINAL_CHECKPOINT,
};
use leafscan::training::CheckpointStore;
use leafscan::utils::logging::{init_logging, LogConfig};
use leafscan::Predictor;

/// Transfer-learning plant disease classification
#[derive(Parser, Debug)]
#[command(name = "leafscan")]
#[command(version)]
#[command(about = "Train and serve a plant disease classifier", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the classifier (warm stage, optionally followed by fine-tuning)
    Train {
        /// Path to a JSON run configuration; defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Dataset root: one subdirectory per class
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Output directory for checkpoints, mapping, and report
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Enable the fine-tune stage after warm training
        #[arg(long, default_value = "false")]
        fine_tune: bool,

        /// Override the warm stage epoch budget
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Override the random seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Evaluate a trained checkpoint against the held-out test split
    Evaluate {
        /// Path to a JSON run configuration; defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Dataset root: one subdirectory per class
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Output directory of the training run
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Checkpoint name to evaluate
        #[arg(long, default_value = FINAL_CHECKPOINT)]
        checkpoint: String,

        /// k for top-k accuracy
        #[arg(long, default_value = "3")]
        top_k: usize,
    },

    /// Predict the class of a single image
    Predict {
        /// Path to the input image
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory of the training run
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Checkpoint name to load
        #[arg(long, default_value = FINAL_CHECKPOINT)]
        checkpoint: String,

        /// Number of ranked predictions to return
        #[arg(short, long, default_value = "3")]
        top_k: usize,

        /// Input resolution the model was trained with
        #[arg(long, default_value = "224")]
        image_size: usize,
    },

    /// Show dataset statistics
    Stats {
        /// Dataset root: one subdirectory per class
        #[arg(short, long, default_value = "data/plantvillage")]
        data_dir: PathBuf,

        /// Seed used to preview the split sizes
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Train {
            config,
            data_dir,
            output_dir,
            fine_tune,
            epochs,
            seed,
        } => cmd_train(config, data_dir, output_dir, fine_tune, epochs, seed),

        Commands::Evaluate {
            config,
            data_dir,
            output_dir,
            checkpoint,
            top_k,
        } => cmd_evaluate(config, data_dir, output_dir, &checkpoint, top_k),

        Commands::Predict {
            input,
            output_dir,
            checkpoint,
            top_k,
            image_size,
        } => cmd_predict(&input, &output_dir, &checkpoint, top_k, image_size),

        Commands::Stats { data_dir, seed } => cmd_stats(&data_dir, seed),
    }
}

fn load_config(
    config: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    seed: Option<u64>,
) -> Result<RunConfig> {
    let mut run_config = match config {
        Some(path) => RunConfig::load(&path)?,
        None => RunConfig::default(),
    };
    if let Some(dir) = data_dir {
        run_config.data.root = dir;
    }
    if let Some(dir) = output_dir {
        run_config.output_dir = dir;
    }
    if let Some(seed) = seed {
        run_config.seed = seed;
    }
    Ok(run_config)
}

fn cmd_train(
    config: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    fine_tune: bool,
    epochs: Option<usize>,
    seed: Option<u64>,
) -> Result<()> {
    let mut run_config = load_config(config, data_dir, output_dir, seed)?;
    run_config.fine_tune.enabled = fine_tune;
    if let Some(epochs) = epochs {
        run_config.warm.epochs = epochs;
    }

    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Data root:    {:?}", run_config.data.root);
    println!("  Output:       {:?}", run_config.output_dir);
    println!("  Image size:   {}", run_config.data.image_size);
    println!("  Batch size:   {}", run_config.data.batch_size);
    println!("  Warm epochs:  {}", run_config.warm.epochs);
    println!(
        "  Fine-tune:    {}",
        if run_config.fine_tune.enabled {
            format!(
                "enabled ({} epochs, unfreeze last {})",
                run_config.fine_tune.epochs, run_config.fine_tune.unfreeze_last
            )
        } else {
            "disabled".to_string()
        }
    );
    println!("  Backend:      {}", backend_name());
    println!();

    let device = init_device(cfg!(feature = "wgpu"));

    // Record the resolved configuration next to the run's artifacts
    std::fs::create_dir_all(&run_config.output_dir)?;
    run_config.save(&run_config.output_dir.join("run_config.json"))?;

    let scheduler = StageScheduler::<TrainBackend>::new(run_config, device)?;
    let report = scheduler.run()?;

    println!();
    println!("{}", "Training Complete!".green().bold());
    println!(
        "  Best validation accuracy: {:.2}%",
        report.best_val_accuracy * 100.0
    );
    println!("  Test accuracy:            {:.2}%", report.test_accuracy * 100.0);
    println!("  Stage 1 epochs:           {}", report.stage1_epochs());
    if let Some(stage2) = report.stage2_epochs() {
        println!("  Stage 2 epochs:           {}", stage2);
    }

    Ok(())
}

fn cmd_evaluate(
    config: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    checkpoint: &str,
    top_k: usize,
) -> Result<()> {
    let run_config = load_config(config, data_dir, output_dir, None)?;
    let device = init_device(cfg!(feature = "wgpu"));

    let assembled = DatasetAssembler::new(
        &run_config.data.root,
        run_config.data.validation_fraction,
        run_config.data.test_fraction,
        run_config.seed,
    )
    .assemble()?;

    let store = CheckpointStore::new(run_config.output_dir.join("checkpoints"));
    let model = store.load::<DefaultBackend>(checkpoint, &device)?;

    let augmentor = Augmentor::new(run_config.data.image_size, run_config.data.augment.clone());
    let loader = Arc::new(SampleLoader::new(
        assembled.split.test.clone(),
        augmentor,
        TransformMode::Eval,
        DecodePolicy::Skip,
    ));
    let batcher = TensorBatcher::<DefaultBackend>::new(device, run_config.data.image_size);

    info!("Evaluating '{}' on {} test samples", checkpoint, loader.len());
    let report = evaluate_split(&model, loader, &batcher, run_config.data.batch_size, top_k)
        .with_class_names(&assembled.mapping.class_names);

    println!("{}", "Evaluation Results:".cyan().bold());
    print!("{}", report.summary());

    let eval_path = run_config.output_dir.join("evaluation_results.json");
    report.save(&eval_path)?;
    report
        .confusion_matrix
        .save_csv(&run_config.output_dir.join("confusion_matrix.csv"))?;
    println!("\nSaved to {:?}", eval_path);

    Ok(())
}

fn cmd_predict(
    input: &PathBuf,
    output_dir: &PathBuf,
    checkpoint: &str,
    top_k: usize,
    image_size: usize,
) -> Result<()> {
    let device = init_device(cfg!(feature = "wgpu"));
    let predictor = Predictor::<DefaultBackend>::from_artifacts(
        &output_dir.join("checkpoints"),
        checkpoint,
        &output_dir.join(CLASS_MAPPING_FILE),
        image_size,
        device,
    )?;

    info!(
        "Loaded '{}' trained over {} classes",
        checkpoint,
        predictor.mapping().len()
    );
    let predictions = predictor.predict_file(input, top_k)?;

    println!("{} {:?}", "Predictions for".cyan().bold(), input);
    for (rank, prediction) in predictions.iter().enumerate() {
        println!(
            "  {}. {} ({:.1}%)",
            rank + 1,
            prediction.class_name,
            prediction.confidence * 100.0
        );
    }

    Ok(())
}

fn cmd_stats(data_dir: &PathBuf, seed: u64) -> Result<()> {
    let assembled = DatasetAssembler::new(data_dir, 0.2, 0.1, seed).assemble()?;

    println!("{}", "Dataset Statistics:".cyan().bold());
    print!("{}", assembled.summary.display(&assembled.mapping));

    Ok(())
}
