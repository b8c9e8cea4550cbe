//! The `launch` subcommand: primary launch with context-length fallback.

use shared::config::bootstrap::BootstrapConfig;
use shared::fitting::{FallbackOrchestrator, LaunchPath, ProcessRunner, SystemClock};
use std::env;
use tracing::{error, info};

/// Public address of the host, set by the pod runtime
const PUBLIC_IP_VAR: &str = "RUNPOD_PUBLIC_IP";
/// Externally mapped SSH port, set by the pod runtime
const SSH_PORT_VAR: &str = "RUNPOD_TCP_PORT_22";

/// Runs the full bootstrap for the configured model.
///
/// # Arguments
/// * `config` - The validated bootstrap configuration.
/// * `idle_on_failure` - Idle until Ctrl-C on a fatal failure instead of returning it.
///
/// # Errors
/// Returns the bootstrap failure unless `idle_on_failure` is set, or an error if the
/// Ctrl-C handler cannot be installed.
pub async fn launch(config: &BootstrapConfig, idle_on_failure: bool) -> anyhow::Result<()> {
    let spec = config.launch_spec()?;
    let orchestrator = FallbackOrchestrator::new(
        ProcessRunner,
        SystemClock,
        config.fallback.clone(),
        config.probe.clone(),
    );

    let hint = tunnel_hint(
        env::var(PUBLIC_IP_VAR).ok().as_deref(),
        env::var(SSH_PORT_VAR).ok().as_deref(),
        config.port,
    );
    info!(port = config.port, "reach the server through an SSH tunnel: {hint}");

    match orchestrator.launch(&spec, config.execution_mode()).await {
        Ok(report) => {
            match report.path {
                LaunchPath::Primary => {
                    info!(context_length = report.context_length, "server exited cleanly");
                }
                LaunchPath::Fallback {
                    discovered,
                    rounded,
                } => info!(
                    requested = spec.context_length(),
                    discovered,
                    context_length = rounded,
                    "server exited cleanly after falling back"
                ),
            }
            Ok(())
        }
        Err(failure) if idle_on_failure => {
            error!(error = %failure, "bootstrap failed, idling until interrupted");
            tokio::signal::ctrl_c().await?;
            info!("Shutting down...");
            Ok(())
        }
        Err(failure) => Err(failure.into()),
    }
}

/// The `ssh` command that forwards `port` on the host to the same local port.
/// Unknown host details are left as placeholders.
fn tunnel_hint(public_ip: Option<&str>, ssh_port: Option<&str>, port: u16) -> String {
    let public_ip = public_ip.unwrap_or("<pod public ip>");
    let ssh_port = ssh_port.unwrap_or("<ssh connect port>");
    format!("ssh root@{public_ip} -p {ssh_port} -L {port}:localhost:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_hint_forwards_server_port() {
        assert_eq!(
            tunnel_hint(Some("203.0.113.7"), Some("40122"), 5002),
            "ssh root@203.0.113.7 -p 40122 -L 5002:localhost:5002"
        );
    }

    #[test]
    fn test_tunnel_hint_uses_placeholders_for_unknown_host() {
        assert_eq!(
            tunnel_hint(None, None, 5005),
            "ssh root@<pod public ip> -p <ssh connect port> -L 5005:localhost:5005"
        );
    }
}
