use crate::error::{Result, VigilError};
use crate::process::{ProcessSpec, RestartPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One app definition as it appears in a config file: the process spec
/// plus its restart policy fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub spec: ProcessSpec,

    /// Whether to automatically restart on exit
    #[serde(default = "default_autorestart")]
    pub autorestart: bool,

    /// Maximum number of relaunches before giving up
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u64,

    /// Delay before restart (in milliseconds)
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
}

// Default value functions for serde

fn default_autorestart() -> bool {
    true
}

fn default_max_restarts() -> u64 {
    10
}

fn default_restart_delay_ms() -> u64 {
    1000
}

impl AppConfig {
    /// Load app definitions from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Vec<AppConfig>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| VigilError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let configs = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(VigilError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        // Expand environment variables in all configs
        let expanded_configs: Vec<AppConfig> = configs
            .into_iter()
            .map(|mut config| {
                config.expand_env_vars();
                config
            })
            .collect();

        for config in &expanded_configs {
            config.spec.validate()?;
        }

        // Names must be unique: each app gets its own supervisor instance
        for (i, config) in expanded_configs.iter().enumerate() {
            if expanded_configs[..i]
                .iter()
                .any(|other| other.spec.name == config.spec.name)
            {
                return Err(VigilError::ConfigValidationError(format!(
                    "Duplicate app name: {}",
                    config.spec.name
                )));
            }
        }

        Ok(expanded_configs)
    }

    /// Parse TOML configuration file
    fn parse_toml(contents: &str) -> Result<Vec<AppConfig>> {
        #[derive(Deserialize)]
        struct ConfigFile {
            #[serde(default)]
            apps: Vec<AppConfig>,
            #[serde(flatten)]
            single: Option<AppConfig>,
        }

        let config_file: ConfigFile = toml::from_str(contents)
            .map_err(|e| VigilError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;

        // Support both single app and array of apps
        if let Some(single) = config_file.single {
            Ok(vec![single])
        } else if !config_file.apps.is_empty() {
            Ok(config_file.apps)
        } else {
            Err(VigilError::InvalidConfig(
                "No app definition found in file".to_string(),
            ))
        }
    }

    /// Parse JSON configuration file
    fn parse_json(contents: &str) -> Result<Vec<AppConfig>> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum ConfigFile {
            Single(AppConfig),
            Multiple { apps: Vec<AppConfig> },
        }

        let config_file: ConfigFile = serde_json::from_str(contents)
            .map_err(|e| VigilError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?;

        match config_file {
            ConfigFile::Single(config) => Ok(vec![config]),
            ConfigFile::Multiple { apps } => {
                if apps.is_empty() {
                    Err(VigilError::InvalidConfig(
                        "No app definition found in file".to_string(),
                    ))
                } else {
                    Ok(apps)
                }
            }
        }
    }

    /// Split into the validated pair the supervisor core consumes
    pub fn split(self) -> (ProcessSpec, RestartPolicy) {
        let policy = RestartPolicy::from_config(
            self.autorestart,
            self.max_restarts,
            Duration::from_millis(self.restart_delay_ms),
        );
        (self.spec, policy)
    }

    /// Expand environment variables in configuration fields
    fn expand_env_vars(&mut self) {
        self.spec.script = Self::expand_env_in_path(&self.spec.script);

        if let Some(ref cwd) = self.spec.cwd {
            self.spec.cwd = Some(Self::expand_env_in_path(cwd));
        }

        self.spec.args = self
            .spec
            .args
            .iter()
            .map(|arg| Self::expand_env_in_string(arg))
            .collect();

        // Values only; keys are passed through as written
        self.spec.env = self
            .spec
            .env
            .iter()
            .map(|(k, v)| (k.clone(), Self::expand_env_in_string(v)))
            .collect();
    }

    /// Expand environment variables in a string
    ///
    /// Handles `$VAR` and `${VAR}` syntax. A variable name is the longest
    /// run of `[A-Za-z0-9_]` after the `$`, so `$FOO` never rewrites part
    /// of `$FOOBAR`. Unset variables are left literal.
    fn expand_env_in_string(s: &str) -> String {
        let mut result = String::with_capacity(s.len());
        let mut rest = s;

        while let Some(idx) = rest.find('$') {
            result.push_str(&rest[..idx]);
            rest = &rest[idx + 1..];

            if let Some(after_brace) = rest.strip_prefix('{') {
                let Some(end) = after_brace.find('}') else {
                    // Unterminated ${ stays literal
                    result.push('$');
                    continue;
                };
                let name = &after_brace[..end];
                match std::env::var(name) {
                    Ok(value) => result.push_str(&value),
                    Err(_) => {
                        result.push_str("${");
                        result.push_str(name);
                        result.push('}');
                    }
                }
                rest = &after_brace[end + 1..];
            } else {
                let end = rest
                    .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                    .unwrap_or(rest.len());
                let name = &rest[..end];
                if name.is_empty() {
                    result.push('$');
                } else {
                    match std::env::var(name) {
                        Ok(value) => result.push_str(&value),
                        Err(_) => {
                            result.push('$');
                            result.push_str(name);
                        }
                    }
                }
                rest = &rest[end..];
            }
        }

        result.push_str(rest);
        result
    }

    /// Expand environment variables in a path
    fn expand_env_in_path(path: &Path) -> PathBuf {
        let path_str = path.to_string_lossy();
        let expanded = Self::expand_env_in_string(&path_str);
        PathBuf::from(expanded)
    }
}
