use anyhow::{Result, bail};
use shared::config::server::Config;
use std::{fs, path::Path};

/// Writes the default server configuration to `config.yaml` or
/// `config.json` in the current directory.
///
/// # Errors
/// Returns an error if the format is unsupported or if writing the file fails.
pub fn generate_config(format: &str) -> Result<()> {
    let file_name = write_config(format, Path::new("."))?;
    println!("Configuration file '{file_name}' generated successfully.");
    Ok(())
}

fn write_config(format: &str, dir: &Path) -> Result<&'static str> {
    let config = Config::with_defaults();
    let (file_name, serialized) = match format {
        "yaml" | "yml" => ("config.yaml", serde_yml::to_string(&config)?),
        "json" => ("config.json", serde_json::to_string_pretty(&config)?),
        _ => bail!("Unsupported format. Use 'yaml' or 'json'."),
    };

    fs::write(dir.join(file_name), serialized)?;
    Ok(file_name)
}
