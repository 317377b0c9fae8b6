//! Nervus CLI
//!
//! # Usage
//!
//! ```bash
//! # Train from config
//! nervus train --config run.yaml
//!
//! # Train from flags, or override the config
//! nervus train --csvpath trials.csv --model MLP+ResNet18 --epochs 50 --lr 0.0001
//!
//! # Evaluate the latest run
//! nervus test --csvpath trials.csv
//!
//! # Validate config
//! nervus validate run.yaml
//!
//! # Show the inferred task
//! nervus info --csvpath trials.csv
//! ```

use clap::Parser;
use nervus::config::{
    apply_overrides, load_config, parse_config, spec_from_flags, validate_config, Cli, Command,
    InfoArgs, OutputFormat, TestArgs, TrainArgs, ValidateArgs,
};
use nervus::pipeline::{describe, run_test, run_training, TestRequest};
use nervus::schema::{InferenceOptions, LabelKind};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "nervus=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Command::Train(args) => run_train(args),
        Command::Test(args) => run_test_command(args),
        Command::Validate(args) => run_validate(args),
        Command::Info(args) => run_info(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_train(args: TrainArgs) -> Result<(), String> {
    let mut spec = match &args.config {
        Some(path) => parse_config(path).map_err(|e| format!("Config error: {e}"))?,
        None => spec_from_flags(&args)
            .ok_or("Either --config or both --csvpath and --model are required")?,
    };
    apply_overrides(&mut spec, &args);
    validate_config(&spec).map_err(|e| format!("Invalid config: {e}"))?;

    let outcome = run_training(&spec).map_err(|e| e.to_string())?;
    println!("{}", outcome.run_dir.display());
    Ok(())
}

fn run_test_command(args: TestArgs) -> Result<(), String> {
    let summary = run_test(&TestRequest {
        csvpath: args.csvpath,
        weight_dir: args.weight_dir,
        test_splits: args.test_splits,
        test_batch_size: args.test_batch_size,
        output_dir: args.output_dir,
    })
    .map_err(|e| e.to_string())?;

    for checkpoint in &summary.checkpoints {
        for split in &checkpoint.splits {
            for report in &split.reports {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    checkpoint.weight,
                    split.split,
                    split.group.as_deref().unwrap_or("-"),
                    report.label,
                    report.report.headline()
                );
            }
        }
    }
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<(), String> {
    let spec = load_config(&args.config).map_err(|e| e.to_string())?;
    tracing::info!(config = %args.config.display(), "configuration is valid");
    println!(
        "{}: model {}, optimizer {} (lr={}), {} epochs",
        args.config.display(),
        spec.model.name,
        spec.optimizer.name,
        spec.optimizer.lr,
        spec.training.epochs
    );
    Ok(())
}

fn run_info(args: InfoArgs) -> Result<(), String> {
    let task = describe(
        &args.csvpath,
        &InferenceOptions {
            task: args.task,
            ..InferenceOptions::default()
        },
    )
    .map_err(|e| e.to_string())?;

    match args.format {
        OutputFormat::Text => {
            println!("Task: {}", task.kind);
            println!("Identifier: {}", task.id_column);
            for label in &task.labels {
                match &label.kind {
                    LabelKind::Categorical { classes } => {
                        println!("Head {}: {} classes {:?}", label.name, classes.len(), classes)
                    }
                    _ => println!("Head {}: 1 output", label.name),
                }
            }
            println!(
                "Tabular inputs: {}",
                task.modality.tabular_columns.join(", ")
            );
            println!(
                "Image input: {}",
                if task.modality.has_image() { "yes" } else { "no" }
            );
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&task)
                .map_err(|e| format!("JSON serialization error: {e}"))?;
            println!("{json}");
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(&task)
                .map_err(|e| format!("YAML serialization error: {e}"))?;
            println!("{yaml}");
        }
    }
    Ok(())
}
