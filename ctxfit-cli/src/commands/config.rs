use std::fs;
use std::io::Write;
use std::path::Path;

use shared::config::bootstrap::BootstrapConfig;

/// Generates a default configuration file in the specified format.
///
/// # Arguments
/// * `format` - The format of the configuration file ("yaml" or "json").
///
/// # Errors
/// Returns an error if the format is unsupported or if writing the file fails.
pub fn generate_config(format: &str) -> anyhow::Result<()> {
    write_config(format, Path::new("."))?;
    Ok(())
}

fn write_config(format: &str, dir: &Path) -> anyhow::Result<String> {
    let config = BootstrapConfig::with_defaults();
    let (file_name, serialized) = match format {
        "yaml" => ("ctxfit.yaml", serde_yml::to_string(&config)?),
        "json" => ("ctxfit.json", serde_json::to_string_pretty(&config)?),
        _ => anyhow::bail!("Unsupported format. Use 'yaml' or 'json'."),
    };

    let mut file = fs::File::create(dir.join(file_name))?;
    file.write_all(serialized.as_bytes())?;

    println!("Configuration file '{file_name}' generated successfully.");
    Ok(file_name.to_string())
}
