//! Typed, group-scoped configuration parameter store (spec component C1).
//!
//! A YAML configuration file parses into a two-level dictionary (`group ->
//! parameter -> value`); types are validated lazily, at retrieval time, not
//! at load time — mirroring `get_parameter_from_parameter_group` in the
//! original monitor's `lib/parameters.py`, but returning a typed `Result`
//! instead of a duck-typed value.

use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub type ParameterGroup = BTreeMap<String, serde_yml::Value>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot open or read the configuration file '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("syntax error in the configuration file")]
    Parse(#[from] serde_yml::Error),
    #[error("parameter group '{0}' is not in the configuration file")]
    MissingGroup(String),
    #[error("parameter '{parameter}' in group '{group}' was not found, but is required")]
    MissingParameter { group: String, parameter: String },
    #[error("wrong type for parameter '{parameter}' in group '{group}'")]
    WrongType {
        group: String,
        parameter: String,
        #[source]
        source: serde_yml::Error,
    },
}

/// The parsed, group-scoped set of OM-style configuration parameters.
///
/// The `om` group is required and, once loaded, always carries a
/// `configuration_file` entry holding the absolute path the parameters were
/// loaded from (spec.md §6).
pub struct ParameterStore {
    groups: BTreeMap<String, ParameterGroup>,
}

impl ParameterStore {
    /// Loads and validates a configuration file's top-level shape: a YAML
    /// mapping whose top-level keys are group names, each mapping to a
    /// mapping of parameter name to value. Does not validate any individual
    /// parameter's type — that happens lazily at `get_required`/`get_or`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut groups: BTreeMap<String, ParameterGroup> = serde_yml::from_str(&text)?;

        if !groups.contains_key("om") {
            return Err(ConfigError::MissingGroup("om".to_string()));
        }

        let absolute: PathBuf = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };
        groups.get_mut("om").expect("checked above").insert(
            "configuration_file".to_string(),
            serde_yml::Value::String(absolute.display().to_string()),
        );

        for required in ["parallelization_layer", "data_retrieval_layer", "processing_layer"] {
            Self::require_group_key(&groups, "om", required)?;
        }
        Self::require_group_key(&groups, "om", "node_pool_size")?;

        Ok(Self { groups })
    }

    fn require_group_key(
        groups: &BTreeMap<String, ParameterGroup>,
        group: &str,
        parameter: &str,
    ) -> Result<(), ConfigError> {
        let g = groups
            .get(group)
            .ok_or_else(|| ConfigError::MissingGroup(group.to_string()))?;
        if !g.contains_key(parameter) {
            return Err(ConfigError::MissingParameter {
                group: group.to_string(),
                parameter: parameter.to_string(),
            });
        }
        Ok(())
    }

    pub fn group(&self, group: &str) -> Result<&ParameterGroup, ConfigError> {
        self.groups
            .get(group)
            .ok_or_else(|| ConfigError::MissingGroup(group.to_string()))
    }

    /// Retrieves and deserializes a required parameter, failing if it is
    /// absent from the group or does not parse as `T`.
    pub fn get_required<T: DeserializeOwned>(
        &self,
        group: &str,
        parameter: &str,
    ) -> Result<T, ConfigError> {
        let g = self.group(group)?;
        let raw = g
            .get(parameter)
            .ok_or_else(|| ConfigError::MissingParameter {
                group: group.to_string(),
                parameter: parameter.to_string(),
            })?;
        serde_yml::from_value(raw.clone()).map_err(|source| ConfigError::WrongType {
            group: group.to_string(),
            parameter: parameter.to_string(),
            source,
        })
    }

    /// Retrieves and deserializes an optional parameter, returning `default`
    /// if it is absent. A present-but-mistyped parameter is still an error.
    pub fn get_or<T: DeserializeOwned>(
        &self,
        group: &str,
        parameter: &str,
        default: T,
    ) -> Result<T, ConfigError> {
        let g = self.group(group)?;
        match g.get(parameter) {
            None => Ok(default),
            Some(raw) => {
                serde_yml::from_value(raw.clone()).map_err(|source| ConfigError::WrongType {
                    group: group.to_string(),
                    parameter: parameter.to_string(),
                    source,
                })
            }
        }
    }
}
