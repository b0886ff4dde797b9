/// `load_config` module: reads the optional YAML config file and applies
/// environment overrides to produce an [`IntakeConfig`].
///
/// This is the only place where untrusted YAML is parsed. Every field of
/// [`IntakeConfig`] is defaulted, so a missing file argument or an empty
/// document both yield the built-in defaults.
///
/// # Environment overrides
/// Applied after the file, so deployments can keep one static config:
/// - `INTAKE_STAGING_ROOT`: staging root directory
/// - `INTAKE_ORG_ID`: organization stamped on scan events
/// - `INTAKE_BROKER_URL`: broker REST endpoint; enables notifications
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::Result;
use repo_intake_core::config::IntakeConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const ENV_STAGING_ROOT: &str = "INTAKE_STAGING_ROOT";
pub const ENV_ORG_ID: &str = "INTAKE_ORG_ID";
pub const ENV_BROKER_URL: &str = "INTAKE_BROKER_URL";

/// Loads `path` if given, falls back to defaults otherwise, then applies
/// environment overrides.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<IntakeConfig> {
    let mut config = match path {
        Some(path) => read_config_file(path.as_ref())?,
        None => {
            info!("No config file given, using defaults");
            IntakeConfig::default()
        }
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

fn read_config_file(path_ref: &Path) -> Result<IntakeConfig> {
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    // an empty document deserializes as null, not as an empty mapping
    if config_content.trim().is_empty() {
        return Ok(IntakeConfig::default());
    }

    match serde_yaml::from_str::<IntakeConfig>(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            Ok(conf)
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            Err(anyhow::anyhow!("Failed to parse config YAML: {e}"))
        }
    }
}

fn apply_env_overrides(config: &mut IntakeConfig) {
    if let Some(root) = non_empty_env(ENV_STAGING_ROOT) {
        info!(staging_root = %root, "Staging root overridden from environment");
        config.staging_root = PathBuf::from(root);
    }
    if let Some(org) = non_empty_env(ENV_ORG_ID) {
        info!(organization_id = %org, "Organization overridden from environment");
        config.organization_id = org;
    }
    if let Some(endpoint) = non_empty_env(ENV_BROKER_URL) {
        info!(endpoint = %endpoint, "Broker endpoint overridden from environment");
        config.publisher.endpoint = Some(endpoint);
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
