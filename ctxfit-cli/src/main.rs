//! Main entry point for the ctxfit bootstrap CLI.

use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use shared::config::bootstrap::{BootstrapConfig, ConfigOverrides};
use shared::fitting::{ExitReport, FitError, Quantization};
use std::{path::PathBuf, process::ExitCode};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// ctxfit CLI
#[derive(Parser)]
#[command(name = "ctxfit")]
#[command(
    about = "Launch LLM serving and fall back to the largest context length that fits in GPU memory",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the ctxfit CLI
#[derive(Subcommand)]
enum Commands {
    /// Launch model serving, searching for a smaller context length if it fails early
    Launch {
        #[command(flatten)]
        bootstrap: BootstrapArgs,

        /// Log the error and idle until interrupted instead of exiting
        #[arg(
            long,
            help = "On a fatal failure, log the error and idle until Ctrl-C instead of exiting nonzero"
        )]
        idle_on_failure: bool,
    },

    /// Search for the largest context length that fits, without launching the server
    Fit {
        #[command(flatten)]
        bootstrap: BootstrapArgs,
    },

    /// Generate shell completion scripts for the CLI
    Completion {
        /// The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)
        #[arg(
            long,
            short,
            help = "The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)"
        )]
        shell: String,
    },

    /// Generate a configuration file
    Config {
        /// Format of the configuration file to generate (yaml or json). Defaults to yaml.
        #[arg(
            long,
            short,
            help = "Format of the configuration file to generate (yaml or json). Defaults to yaml."
        )]
        format: Option<String>,
    },
}

/// Inputs shared by `launch` and `fit`
#[derive(Args, Debug, Clone)]
struct BootstrapArgs {
    /// Path to the model file
    #[arg(long, short, help = "Path to the model file (e.g., /models/model.gguf)")]
    model: Option<PathBuf>,

    /// Context length to try first
    #[arg(long, short = 'c', help = "Context length to try first (e.g., 8192)")]
    context_length: Option<u32>,

    /// KV cache precision
    #[arg(long, short, help = "KV cache precision: none, q8, q4 (or 0, 1, 2)")]
    quant_kv: Option<Quantization>,

    /// Listening port
    #[arg(long, help = "Port the server listens on (e.g., 5002)")]
    port: Option<u16>,

    /// Base launch command
    #[arg(
        long,
        help = "Base launch command; model, context and port arguments are set on it"
    )]
    launch_command: Option<String>,

    /// Probe command
    #[arg(
        long,
        help = "Trial launch command used to test whether a context length fits"
    )]
    probe_command: Option<String>,

    /// Log commands instead of running them
    #[arg(long, help = "Log every command instead of running it")]
    dry_run: bool,

    /// Path to the configuration file (optional)
    #[arg(
        long,
        help = "Path to the configuration file (e.g., ctxfit.yaml or ctxfit.json). If not provided, defaults will be used."
    )]
    config: Option<PathBuf>,
}

impl BootstrapArgs {
    /// Resolve the configuration and install logging at its level.
    fn resolve(self) -> anyhow::Result<BootstrapConfig> {
        let overrides = ConfigOverrides {
            model: self.model,
            context_length: self.context_length,
            quantization: self.quant_kv,
            port: self.port,
            launch_command: self.launch_command,
            probe_command: self.probe_command,
            dry_run: self.dry_run,
        };
        let config = BootstrapConfig::load_config(self.config, overrides)?;
        init_tracing(&config.log_level);

        if let Err(errors) = config.validate() {
            anyhow::bail!("Invalid configuration:\n  {}", errors.join("\n  "));
        }
        Ok(config)
    }
}

/// Logs go to stderr so `fit` can print its result alone on stdout.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| {
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy()
        });

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

/// Mirror the failing child's exit code when there is one.
fn exit_code_for(error: &anyhow::Error) -> ExitCode {
    error
        .downcast_ref::<FitError>()
        .and_then(FitError::exit_report)
        .and_then(ExitReport::code)
        .and_then(|code| u8::try_from(code).ok())
        .filter(|code| *code != 0)
        .map_or(ExitCode::FAILURE, ExitCode::from)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Launch {
            bootstrap,
            idle_on_failure,
        } => {
            let config = bootstrap.resolve()?;
            commands::launch::launch(&config, idle_on_failure).await?;
        }
        Commands::Fit { bootstrap } => {
            let config = bootstrap.resolve()?;
            commands::fit::fit(&config).await?;
        }
        Commands::Completion { shell } => {
            let shell = shell
                .parse::<clap_complete::Shell>()
                .map_err(|error| anyhow::anyhow!("Invalid shell type provided: {error}"))?;
            commands::completion::generate_completion(shell);
        }
        Commands::Config { format } => {
            let format = format.unwrap_or_else(|| "yaml".to_string());
            commands::config::generate_config(&format)?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error:#}");
            exit_code_for(&error)
        }
    }
}
