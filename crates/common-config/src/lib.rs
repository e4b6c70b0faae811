//! Shared configuration helpers for the infographics services.
//!
//! Configuration is layered: `Default` values, then an optional YAML file
//! named by `<PREFIX>CONFIG`, then individual environment overrides.

use std::env;
use std::path::Path;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

/// A service configuration that can be loaded with [`load`].
pub trait ServiceConfig: DeserializeOwned + Default {
    /// Environment variable prefix, including the trailing underscore.
    const PREFIX: &'static str;

    /// Apply `PREFIX`-scoped environment variables on top of the loaded values.
    fn apply_environment_overrides(&mut self, prefix: &str);
}

/// Load a service configuration from defaults, file and environment.
pub fn load<T: ServiceConfig>() -> Result<T, ConfigError> {
    let file_var = format!("{}CONFIG", T::PREFIX);
    let mut config = match env::var(&file_var) {
        Ok(path) if !path.trim().is_empty() => from_file::<T>(Path::new(&path))?,
        _ => T::default(),
    };
    config.apply_environment_overrides(T::PREFIX);
    Ok(config)
}

/// Parse a YAML configuration file. Missing keys keep their defaults when
/// the type uses `#[serde(default)]`.
pub fn from_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: display,
        source,
    })
}

/// Read and parse an environment variable.
///
/// Returns `None` when the variable is unset; logs and returns `None` when it
/// is set but does not parse.
pub fn env_parse<T>(var: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = env::var(var).ok()?;
    value
        .trim()
        .parse::<T>()
        .inspect_err(|error| {
            tracing::warn!(%var, %value, %error, "invalid environment override, ignoring");
        })
        .ok()
}

/// Overwrite `target` when `var` is set and parses.
pub fn override_from_env<T>(target: &mut T, var: &str)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = env_parse(var) {
        *target = value;
    }
}

/// Read a boolean, accepting `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn env_bool(var: &str) -> Option<bool> {
    let value = env::var(var).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(%var, %value, "invalid boolean override, ignoring");
            None
        }
    }
}

/// Read a comma separated list, dropping empty items.
pub fn env_list(var: &str) -> Option<Vec<String>> {
    let value = env::var(var).ok()?;
    Some(
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        port: u16,
        name: String,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                port: 1,
                name: "default".to_string(),
            }
        }
    }

    impl ServiceConfig for Sample {
        const PREFIX: &'static str = "COMMON_CONFIG_SAMPLE_";

        fn apply_environment_overrides(&mut self, prefix: &str) {
            override_from_env(&mut self.port, &format!("{prefix}PORT"));
        }
    }

    #[test]
    fn unparseable_values_are_ignored() {
        env::set_var("COMMON_CONFIG_TEST_BAD_PORT", "not-a-port");
        assert_eq!(env_parse::<u16>("COMMON_CONFIG_TEST_BAD_PORT"), None);
        env::set_var("COMMON_CONFIG_TEST_GOOD_PORT", " 9001 ");
        let mut port = 8000u16;
        override_from_env(&mut port, "COMMON_CONFIG_TEST_GOOD_PORT");
        assert_eq!(port, 9001);
    }

    #[test]
    fn load_applies_environment() {
        env::set_var("COMMON_CONFIG_SAMPLE_PORT", "4242");
        let sample: Sample = load().expect("load");
        assert_eq!(sample.port, 4242);
        assert_eq!(sample.name, "default");
    }

    #[test]
    fn file_values_merge_with_defaults() {
        let path = env::temp_dir().join(format!("common-config-{}.yaml", std::process::id()));
        std::fs::write(&path, "name: from-file\n").unwrap();
        let sample: Sample = from_file(&path).expect("parse");
        std::fs::remove_file(&path).ok();
        assert_eq!(
            sample,
            Sample {
                port: 1,
                name: "from-file".to_string()
            }
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = from_file::<Sample>(Path::new("/nonexistent/config.yaml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn parses_booleans_and_lists() {
        env::set_var("COMMON_CONFIG_TEST_BOOL", "Yes");
        assert_eq!(env_bool("COMMON_CONFIG_TEST_BOOL"), Some(true));
        env::set_var("COMMON_CONFIG_TEST_BOOL_BAD", "maybe");
        assert_eq!(env_bool("COMMON_CONFIG_TEST_BOOL_BAD"), None);
        env::set_var("COMMON_CONFIG_TEST_LIST", "a, b,,c ");
        assert_eq!(
            env_list("COMMON_CONFIG_TEST_LIST"),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }
}
