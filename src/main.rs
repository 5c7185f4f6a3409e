use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use common::tensor::describe_shape;
use common::utils::execute_with_timeout;
use logging::{init_logging, LogSettings};
use model_api::{ConfigManager, Error, ModelReader, ResultKind};
use model_manager::metadata::describe_tensor;

/// Model API - model-agnostic inference pipelines
#[derive(Parser)]
#[command(name = "model-api")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the inputs, outputs and metadata of a model description
    Info {
        /// Model description (JSON, YAML or TOML)
        #[arg(long, short)]
        model: PathBuf,
    },

    /// Run one inference and print the result as JSON
    Infer {
        /// Pipeline configuration file
        #[arg(long, short)]
        config: PathBuf,

        /// Image to feed image models; raw models get zero tensors without one
        #[arg(long, short)]
        image: Option<PathBuf>,

        /// Give up waiting for the backend after this many seconds
        #[arg(long, default_value = "60")]
        timeout_secs: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Runtime::new().context("Cannot start the async runtime")?;
    let outcome = runtime.block_on(run(cli));
    // An inference that timed out may still occupy a blocking thread.
    runtime.shutdown_background();
    outcome
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Info { model } => info(model),
        Commands::Infer {
            config,
            image,
            timeout_secs,
        } => infer(config, image, Duration::from_secs(timeout_secs)).await,
    }
}

fn info(model: PathBuf) -> Result<()> {
    let _guard = init_logging(&LogSettings::default())?;

    let description = ModelReader::new()
        .read(&model)
        .with_context(|| format!("Cannot read model {:?}", model))?;

    println!("Model: {}", description.name);
    println!("Inputs:");
    for input in &description.inputs {
        println!("  {}", describe_tensor(input));
    }
    println!("Outputs:");
    for output in &description.outputs {
        println!("  {}", describe_tensor(output));
    }
    if !description.model_info.is_empty() {
        println!("Model info:");
        for (key, value) in &description.model_info {
            println!("  {}: {}", key, value);
        }
    }
    println!("Graph nodes: {}", description.graph.len());
    Ok(())
}

async fn infer(config_path: PathBuf, image: Option<PathBuf>, timeout: Duration) -> Result<()> {
    let config = ConfigManager::from_file(&config_path)
        .with_context(|| format!("Cannot read configuration {:?}", config_path))?
        .into_config();
    let _guard = init_logging(&config.logging)?;

    let image = match image {
        Some(path) => Some(
            image::open(&path)
                .with_context(|| format!("Cannot decode image {:?}", path))?
                .to_rgb8(),
        ),
        None => None,
    };

    let task = tokio::task::spawn_blocking(move || model_api::run_once(config, image));
    let result = execute_with_timeout(
        async move {
            task.await
                .map_err(|e| Error::Internal(format!("Inference task failed: {}", e)))?
        },
        timeout,
        "inference",
    )
    .await
    .context("Inference failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if let ResultKind::Raw = result.kind() {
        let mut names: Vec<_> = result.outputs().keys().collect();
        names.sort();
        for name in names {
            let tensor = &result.outputs()[name];
            println!("{}: {}", name, describe_shape(tensor.shape()));
        }
    }
    Ok(())
}
