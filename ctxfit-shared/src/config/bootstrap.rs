use crate::fitting::{
    ExecutionMode, FallbackSettings, FitError, FitResult, LaunchCommand, LaunchSpec,
    ProbeSettings, Quantization,
};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};

/// Environment variable names read by [`BootstrapConfig::load_config`].
pub mod env_vars {
    /// Model file path
    pub const MODEL: &str = "CTXFIT_MODEL";
    /// Requested context length
    pub const CONTEXT_LENGTH: &str = "CTXFIT_CONTEXT_LENGTH";
    /// KV cache precision (`none`/`q8`/`q4` or `0`/`1`/`2`)
    pub const QUANT_KV: &str = "CTXFIT_QUANT_KV";
    /// Port the server listens on
    pub const PORT: &str = "CTXFIT_PORT";
    /// Base launch command
    pub const LAUNCH_COMMAND: &str = "CTXFIT_LAUNCH_COMMAND";
    /// Probe command
    pub const PROBE_COMMAND: &str = "CTXFIT_PROBE_COMMAND";
    /// Dry run switch
    pub const DRY_RUN: &str = "CTXFIT_DRY_RUN";
    /// Log level
    pub const LOG_LEVEL: &str = "CTXFIT_LOG_LEVEL";

    /// Every variable, for tests that need a clean environment
    pub const ALL: [&str; 8] = [
        MODEL,
        CONTEXT_LENGTH,
        QUANT_KV,
        PORT,
        LAUNCH_COMMAND,
        PROBE_COMMAND,
        DRY_RUN,
        LOG_LEVEL,
    ];
}

/// Configuration for one bootstrap run
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Path to the model file
    pub model: Option<PathBuf>,

    /// Context length to try first
    pub context_length: u32,

    /// KV cache precision
    pub quantization: Quantization,

    /// Port the server listens on; replaces any port in `launch_command`
    pub port: u16,

    /// Base launch command; the model, context and port flags are set on it
    pub launch_command: String,

    /// Log commands instead of running them
    pub dry_run: bool,

    /// Logging level
    pub log_level: String,

    /// Fallback flow settings
    pub fallback: FallbackSettings,

    /// Trial launch settings
    pub probe: ProbeSettings,
}

/// Values given on the command line; they win over everything else.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Model file path
    pub model: Option<PathBuf>,
    /// Context length
    pub context_length: Option<u32>,
    /// KV cache precision
    pub quantization: Option<Quantization>,
    /// Listening port
    pub port: Option<u16>,
    /// Base launch command
    pub launch_command: Option<String>,
    /// Probe command
    pub probe_command: Option<String>,
    /// Force a dry run
    pub dry_run: bool,
}

impl BootstrapConfig {
    /// Generates a default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            model: None,
            context_length: 8192,
            quantization: Quantization::None,
            port: 5002,
            launch_command: "koboldcpp --host 0.0.0.0 --usecublas mmq --gpulayers 999 --flashattention --ignoremissing --skiplauncher".to_string(),
            dry_run: false,
            log_level: "info".to_string(),
            fallback: FallbackSettings::default(),
            probe: ProbeSettings::default(),
        }
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// File values win over environment variables, which only fill in values
    /// still at their defaults. `overrides` win over both.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, has an unsupported
    /// extension, or an environment variable holds an invalid value.
    pub fn load_config(
        config_path: Option<PathBuf>,
        overrides: ConfigOverrides,
    ) -> FitResult<Self> {
        let mut config = Self::with_defaults();

        if let Some(path) = config_path {
            let content = fs::read_to_string(&path)?;
            config = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => serde_yml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                _ => {
                    return Err(FitError::invalid_config(
                        "config",
                        "Unsupported configuration format. Use 'yaml' or 'json'.",
                    ));
                }
            };
        }

        config.apply_env_overrides()?;

        if let Some(model) = overrides.model {
            config.model = Some(model);
        }
        if let Some(context_length) = overrides.context_length {
            config.context_length = context_length;
        }
        if let Some(quantization) = overrides.quantization {
            config.quantization = quantization;
        }
        if let Some(port) = overrides.port {
            config.port = port;
        }
        if let Some(launch_command) = overrides.launch_command {
            config.launch_command = launch_command;
        }
        if let Some(probe_command) = overrides.probe_command {
            config.probe.command = probe_command;
        }
        config.dry_run |= overrides.dry_run;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> FitResult<()> {
        let defaults = Self::with_defaults();

        if self.model.is_none()
            && let Ok(model) = env::var(env_vars::MODEL)
        {
            self.model = Some(PathBuf::from(model));
        }
        if self.context_length == defaults.context_length
            && let Ok(value) = env::var(env_vars::CONTEXT_LENGTH)
        {
            self.context_length = value.trim().parse().map_err(|_| {
                FitError::invalid_config(
                    env_vars::CONTEXT_LENGTH,
                    format!("'{value}' is not a positive integer"),
                )
            })?;
        }
        if self.quantization == defaults.quantization
            && let Ok(value) = env::var(env_vars::QUANT_KV)
        {
            self.quantization = value.trim().parse().map_err(|_| {
                FitError::invalid_config(
                    env_vars::QUANT_KV,
                    format!("'{value}' is not one of none, q8, q4 (or 0, 1, 2)"),
                )
            })?;
        }
        if self.port == defaults.port
            && let Ok(value) = env::var(env_vars::PORT)
        {
            self.port = value.trim().parse().map_err(|_| {
                FitError::invalid_config(
                    env_vars::PORT,
                    format!("'{value}' is not a valid port"),
                )
            })?;
        }
        if self.launch_command == defaults.launch_command
            && let Ok(command) = env::var(env_vars::LAUNCH_COMMAND)
        {
            self.launch_command = command;
        }
        if self.probe.command == defaults.probe.command
            && let Ok(command) = env::var(env_vars::PROBE_COMMAND)
        {
            self.probe.command = command;
        }
        if !self.dry_run
            && let Ok(value) = env::var(env_vars::DRY_RUN)
        {
            self.dry_run = parse_flag(&value);
        }
        if self.log_level == defaults.log_level
            && let Ok(level) = env::var(env_vars::LOG_LEVEL)
        {
            self.log_level = level;
        }

        Ok(())
    }

    /// Validate the configuration, collecting every problem found.
    ///
    /// # Errors
    ///
    /// Returns the list of problems when the configuration is unusable.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.model.is_none() {
            errors.push(format!(
                "No model specified. Pass --model or set {}.",
                env_vars::MODEL
            ));
        }
        if self.context_length == 0 {
            errors.push("Invalid context length. Must be greater than 0.".to_string());
        }
        if self.port == 0 {
            errors.push("Invalid port. Must be greater than 0.".to_string());
        }
        if self.fallback.granularity == 0 {
            errors.push("Invalid granularity. Must be greater than 0.".to_string());
        }
        if self.fallback.search_floor == 0 {
            errors.push("Invalid search floor. Must be greater than 0.".to_string());
        }
        if let Err(error) = LaunchCommand::parse(&self.launch_command) {
            errors.push(format!("Launch command: {error}"));
        }
        if let Err(error) = LaunchCommand::parse(&self.probe.command) {
            errors.push(format!("Probe command: {error}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// The execution mode selected by `dry_run`
    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::from_dry_run(self.dry_run)
    }

    /// Build the launch spec for this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no model is configured.
    pub fn launch_spec(&self) -> FitResult<LaunchSpec> {
        let model = self
            .model
            .clone()
            .ok_or_else(|| FitError::invalid_config("model", "no model specified"))?;
        Ok(
            LaunchSpec::new(self.launch_command.clone(), model, self.context_length)
                .with_quantization(self.quantization)
                .with_port(self.port),
        )
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Any non-empty value other than an explicit "off" enables the flag.
fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}
