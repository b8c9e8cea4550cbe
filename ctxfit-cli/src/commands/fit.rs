//! The `fit` subcommand: search without launching the server.

use shared::config::bootstrap::BootstrapConfig;
use shared::fitting::{FallbackOrchestrator, ProcessRunner, SystemClock, round_down};
use tracing::info;

/// Finds the largest context length that fits and prints it, rounded down to the
/// configured granularity.
///
/// # Errors
/// Returns an error if the probe command is malformed, the requested length is below
/// the search floor, or no context length fits.
pub async fn fit(config: &BootstrapConfig) -> anyhow::Result<()> {
    let spec = config.launch_spec()?;
    let orchestrator = FallbackOrchestrator::new(
        ProcessRunner,
        SystemClock,
        config.fallback.clone(),
        config.probe.clone(),
    );

    let discovered = orchestrator
        .discover(&spec, config.execution_mode())
        .await?;
    let rounded = round_down(discovered, config.fallback.granularity);
    if rounded == 0 {
        anyhow::bail!(
            "Largest fitting context length {discovered} is below the granularity {}",
            config.fallback.granularity
        );
    }

    info!(discovered, context_length = rounded, "found a context length that fits");
    println!("{rounded}");
    Ok(())
}
