use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use stowage_core::{DatastoreConfig, Result, StorageConfig, StowageError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub datastores: Vec<DatastoreConfig>,
}

impl Config {
    /// Load a YAML/TOML/JSON file, overlaid with `STOWAGE_*` variables
    /// (`STOWAGE_STORAGE__BACKEND=local`).
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(
                ::config::Environment::with_prefix("STOWAGE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| StowageError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| StowageError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.datastores.is_empty() {
            return Err(StowageError::Config(
                "at least one datastore must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for datastore in &self.datastores {
            datastore.validate()?;
            if !seen.insert(datastore.name.as_str()) {
                return Err(StowageError::Config(format!(
                    "datastore '{}' is configured twice",
                    datastore.name
                )));
            }
        }
        Ok(())
    }

    /// The named datastore, or the only one when no name is given.
    pub fn datastore(&self, name: Option<&str>) -> Result<&DatastoreConfig> {
        match name {
            Some(name) => self
                .datastores
                .iter()
                .find(|datastore| datastore.name == name)
                .ok_or_else(|| StowageError::Config(format!("unknown datastore '{}'", name))),
            None if self.datastores.len() == 1 => Ok(&self.datastores[0]),
            None => Err(StowageError::Config(
                "several datastores configured; pass --datastore".to_string(),
            )),
        }
    }
}
