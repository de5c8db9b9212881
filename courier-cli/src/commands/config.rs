use std::io::Write;

use anyhow::{Result, bail};
use shared::config::client::ClientConfig;

/// Prints a client configuration with every default filled in.
///
/// # Errors
/// Fails for formats other than `yaml` and `json`, or when `out` cannot be written.
pub fn generate_config(format: &str, out: &mut impl Write) -> Result<()> {
    let config = ClientConfig::default();
    let serialized = match format {
        "yaml" => serde_yml::to_string(&config)?,
        "json" => serde_json::to_string_pretty(&config)? + "\n",
        other => bail!("unsupported format '{other}'; use 'yaml' or 'json'"),
    };
    out.write_all(serialized.as_bytes())?;
    Ok(())
}
