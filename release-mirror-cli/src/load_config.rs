/// `load_config` module: turns the YAML repository list plus environment into
/// the core's [`MirrorOptions`] and [`SyncTarget`]s.
///
/// This is the only place untrusted YAML is parsed. Fields are read as
/// optional on the YAML side so that a missing or blank value can be reported
/// with the 1-based index of the offending repository entry.
///
/// # Environment
/// - `GITHUB_TOKEN`: optional API credential; an empty value is treated as unset
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::{anyhow, Result};
use release_mirror::config::{
    validate_targets, MirrorOptions, SyncTarget, DEFAULT_API_BASE_URL, DEFAULT_MAX_VERSIONS,
    DEFAULT_STATE_FILE,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

#[derive(Debug, Deserialize)]
struct RawConfig {
    state_file: Option<PathBuf>,
    max_versions: Option<usize>,
    api_base_url: Option<String>,
    repos: Option<Vec<RawRepo>>,
}

#[derive(Debug, Deserialize)]
struct RawRepo {
    repo_owner: Option<String>,
    repo_name: Option<String>,
    base_save_dir: Option<PathBuf>,
    state_key: Option<String>,
    #[serde(default)]
    save_readme: bool,
}

/// Everything the `sync` command needs, already validated.
#[derive(Debug)]
pub struct CliConfig {
    pub options: MirrorOptions,
    pub targets: Vec<SyncTarget>,
}

fn required(value: Option<String>, index: usize, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(anyhow!(
            "repos[{index}]: missing required field `{field}`"
        )),
    }
}

impl RawRepo {
    fn into_target(self, index: usize) -> Result<SyncTarget> {
        let owner = required(self.repo_owner, index, "repo_owner")?;
        let name = required(self.repo_name, index, "repo_name")?;
        let base_save_dir = match self.base_save_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => return Err(anyhow!("repos[{index}]: missing required field `base_save_dir`")),
        };
        let state_key = required(self.state_key, index, "state_key")?;

        let mut target = SyncTarget::new(owner, name, base_save_dir, state_key);
        target.save_readme = self.save_readme;
        Ok(target)
    }
}

/// Loads the YAML file at `path` and reads the credential from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let repos = raw
        .repos
        .ok_or_else(|| anyhow!("config is missing the `repos` list"))?;
    let targets = repos
        .into_iter()
        .enumerate()
        .map(|(i, repo)| repo.into_target(i + 1))
        .collect::<Result<Vec<_>>>()?;
    validate_targets(&targets)?;

    let token = std::env::var(TOKEN_ENV_VAR).ok();
    let options = MirrorOptions {
        api_base_url: raw
            .api_base_url
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
        state_file: raw
            .state_file
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
        max_versions: raw.max_versions.unwrap_or(DEFAULT_MAX_VERSIONS),
        ..MirrorOptions::default()
    }
    .with_token(token);
    options.validate()?;

    options.trace_loaded();
    for target in &targets {
        target.trace_loaded();
    }

    Ok(CliConfig { options, targets })
}
