use std::path::PathBuf;

use cartsync_config::CartsyncConfig;

/// Locate a config file: `--config`, then `CARTSYNC_CONFIG`, then
/// `cartsync.yaml` in the current directory.
fn find_config(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }

    if let Ok(path) = std::env::var("CARTSYNC_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let cwd_config = PathBuf::from("cartsync.yaml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    None
}

/// Load and validate the configuration with defaults applied. Without a
/// config file every setting takes its default.
pub fn load(explicit: Option<PathBuf>) -> Result<CartsyncConfig, Box<dyn std::error::Error>> {
    let config = match find_config(explicit) {
        Some(path) => CartsyncConfig::from_file(&path)?,
        None => CartsyncConfig::default(),
    };
    config.validate_or_err()?;
    Ok(config.effective())
}

pub fn run(config: &CartsyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Print as YAML for readability
    let yaml = config.to_yaml()?;
    println!("{}", yaml);

    Ok(())
}
