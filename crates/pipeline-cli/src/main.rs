//! pipeline CLI - パイプラインをローカルで動かす
//!
//! - `pipeline synth`: 宣言されたスタックを JSON で表示
//! - `pipeline deploy`: デプロイして Ctrl-C まで動かし、撤去して集計を表示

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use pipeline_core::app::{DeploymentBuilder, StackPlan};
use pipeline_core::config::StackConfig;
use pipeline_core::impls::{API_KEY_ENV, OpenWeatherClient};
use pipeline_core::observability::{LogFormat, init_logging};
use pipeline_core::stages::{ExtractHandler, TransformHandler};

#[derive(Debug, Parser)]
#[command(name = "pipeline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Stack config file (JSON). Every field is optional.
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Deploy the pipeline and run it until interrupted.
    Deploy(DeployArgs),
    /// Print the declared stack as JSON.
    Synth,
}

#[derive(Debug, Args)]
struct DeployArgs {
    /// Address for the public HTTP ingress (overrides `http.listen`).
    #[arg(long)]
    listen: Option<String>,

    /// Do not expose the HTTP ingress.
    #[arg(long)]
    no_http: bool,

    /// OpenWeather API key (overrides the extract environment).
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => StackConfig::load(path)
            .with_context(|| format!("Failed to load stack config: {}", path.display()))?,
        None => StackConfig::default(),
    };
    if cli.json_logs {
        config.log_format = LogFormat::Json;
    }
    init_logging(config.log_format);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Deploy(args) => deploy(args, config).await,
            Commands::Synth => synth(&config),
        }
    })
}

fn synth(config: &StackConfig) -> Result<()> {
    let stack = config.resolve().context("Invalid stack config")?;
    let plan = StackPlan::from_stack(&stack).redacted();
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

async fn deploy(args: DeployArgs, mut config: StackConfig) -> Result<()> {
    if let Some(listen) = args.listen {
        config.http.listen = listen;
    }
    if args.no_http {
        config.http.enabled = false;
    }
    if let Some(key) = args.api_key {
        config.extract.environment.insert(API_KEY_ENV.to_string(), key);
    }

    let stack = config.resolve().context("Invalid stack config")?;
    if stack.extract.environment.get(API_KEY_ENV).is_none() {
        bail!("{API_KEY_ENV} is required. Set it in the environment, pass --api-key, or add it to extract.environment");
    }
    let source = OpenWeatherClient::from_env(&stack.extract.environment)
        .context("Failed to build the weather client")?;

    let extract = ExtractHandler::new(
        Arc::new(source),
        stack.cities.clone(),
        stack.raw_prefix.clone(),
    );
    let transform = TransformHandler::new(stack.raw_prefix.clone(), stack.output_prefix.clone());

    let deployment = DeploymentBuilder::new(stack)
        .extract(Arc::new(extract))
        .transform(Arc::new(transform))
        .build()?
        .deploy()
        .await
        .context("Deployment failed")?;

    println!("Outputs:");
    for (name, value) in deployment.outputs() {
        println!("  {name} = {value}");
    }
    tracing::info!("pipeline running; press Ctrl-C to tear down");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    let report = deployment.teardown().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
