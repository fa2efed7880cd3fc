use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{error::ImportError, timestamp::TimestampKind};

pub const APP_NAME: &str = "mm-photo-import";

/// One configured source, e.g. the DCIM folder of a camera card.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Filled from the map key on load.
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub recursive: Option<bool>,
    #[serde(default)]
    pub timestamp: Option<TimestampKind>,
}

impl ScenarioConfig {
    /// Source directory, resolved against a device mount point when one is given.
    /// An absolute `source` replaces the mount point entirely.
    pub fn source_path(&self, device: Option<&Path>) -> PathBuf {
        let source = self.source.clone().unwrap_or_default();
        match device {
            Some(device) => device.join(source),
            None => source,
        }
    }
}

/// The user config: where imports go and which files count.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    pub target_root: PathBuf,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub timestamp: TimestampKind,
    #[serde(default)]
    pub copy_timeout_secs: Option<u64>,
    pub scenarios: BTreeMap<String, ScenarioConfig>,
}

impl GlobalConfig {
    pub fn load(path: &Path) -> Result<Self, ImportError> {
        let content = fs::read_to_string(path).map_err(|e| ImportError::config(path, e))?;
        Self::from_yaml(path, &content)
    }

    /// Parses and validates. `path` is only used in error messages.
    pub fn from_yaml(path: &Path, content: &str) -> Result<Self, ImportError> {
        let mut config: GlobalConfig =
            serde_yaml::from_str(content).map_err(|e| ImportError::config(path, e))?;
        for (name, scenario) in config.scenarios.iter_mut() {
            let has_source = scenario
                .source
                .as_ref()
                .map_or(false, |s| !s.as_os_str().is_empty());
            if name == "all" {
                return Err(ImportError::config(
                    path,
                    "scenario name 'all' is reserved for selecting every scenario",
                ));
            }
            if !has_source {
                return Err(ImportError::config(
                    path,
                    format!("scenario '{}' has no source path", name),
                ));
            }
            scenario.name = name.clone();
        }
        config.include = normalize_extensions(&config.include);
        config.exclude = normalize_extensions(&config.exclude);
        Ok(config)
    }

    pub fn scenario(&self, name: &str) -> Result<&ScenarioConfig, ImportError> {
        self.scenarios
            .get(name)
            .ok_or_else(|| ImportError::ScenarioNotFound {
                name: name.to_string(),
                known: self.known_scenarios(),
            })
    }

    pub fn known_scenarios(&self) -> String {
        self.scenarios
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn recursive_for(&self, scenario: &ScenarioConfig) -> bool {
        scenario.recursive.unwrap_or(self.recursive)
    }

    pub fn timestamp_for(&self, scenario: &ScenarioConfig) -> TimestampKind {
        scenario.timestamp.unwrap_or(self.timestamp)
    }

    /// Imports land in a per-scenario folder under the target root.
    pub fn target_for(&self, scenario: &ScenarioConfig) -> PathBuf {
        self.target_root.join(&scenario.name)
    }

    pub fn copy_timeout(&self) -> Option<Duration> {
        self.copy_timeout_secs.map(Duration::from_secs)
    }
}

/// Lower-cases, strips a leading dot and drops blanks and duplicates, keeping order.
pub fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(extensions.len());
    for ext in extensions {
        let ext = ext.trim().trim_start_matches('.').to_lowercase();
        if !ext.is_empty() && !normalized.contains(&ext) {
            normalized.push(ext);
        }
    }
    normalized
}

/// Per-user app config, pointing at the user config and the watermark data.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub user_config: PathBuf,
    #[serde(default)]
    pub data_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.yml"))
    }

    /// Parses without checking that `user_config` exists.
    pub fn read(path: &Path) -> Result<Self, ImportError> {
        let content = fs::read_to_string(path).map_err(|e| ImportError::config(path, e))?;
        serde_yaml::from_str(&content).map_err(|e| ImportError::config(path, e))
    }

    pub fn load(path: &Path) -> Result<Self, ImportError> {
        let config = Self::read(path)?;
        if !config.user_config.exists() {
            return Err(ImportError::config(
                path,
                format!("user_config {:?} does not exist", config.user_config),
            ));
        }
        Ok(config)
    }
}

pub fn default_data_file() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_NAME).join("watermarks.db"))
}

/// Where the user config and the watermark database live for this invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub user_config: PathBuf,
    pub data_file: PathBuf,
}

/// Resolves against the app config in the per-user config dir.
pub fn resolve_paths(
    cli_config: Option<PathBuf>,
    cli_state: Option<PathBuf>,
) -> Result<ResolvedPaths, ImportError> {
    resolve_paths_with(AppConfig::default_path().as_deref(), cli_config, cli_state)
}

/// Each path comes from its CLI flag, else the app config at `app_path`, else
/// the default. The app config is read whenever it exists, so `--config`
/// alone still keeps its `data_file`.
pub fn resolve_paths_with(
    app_path: Option<&Path>,
    cli_config: Option<PathBuf>,
    cli_state: Option<PathBuf>,
) -> Result<ResolvedPaths, ImportError> {
    let app_config = match app_path {
        Some(path) if path.exists() => Some(match cli_config {
            Some(_) => AppConfig::read(path)?,
            None => AppConfig::load(path)?,
        }),
        _ => None,
    };
    let user_config = match (cli_config, &app_config) {
        (Some(path), _) => path,
        (None, Some(app)) => app.user_config.clone(),
        (None, None) => {
            let message = match app_path {
                Some(_) => "app config does not exist, create it or pass --config",
                None => "cannot determine the user config directory, pass --config",
            };
            return Err(ImportError::config(
                app_path.unwrap_or_else(|| Path::new("")),
                message,
            ));
        }
    };
    let data_file = match cli_state
        .or_else(|| app_config.and_then(|c| c.data_file))
        .or_else(default_data_file)
    {
        Some(path) => path,
        None => {
            return Err(ImportError::config(
                &user_config,
                "cannot determine where to keep watermarks, pass --state",
            ))
        }
    };
    Ok(ResolvedPaths {
        user_config,
        data_file,
    })
}
