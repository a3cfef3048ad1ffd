//! Operator-wide configuration
//!
//! Loaded once at startup from a YAML file (path from `PGO_CONFIG_PATH`).
//! Storage templates are referenced by name so cluster defaults, replica
//! defaults and the backup repository can share or diverge independently.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::controller::error::{Error, Result};
use crate::crd::StorageSpec;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "PGO_CONFIG_PATH";

/// Configuration file used when `PGO_CONFIG_PATH` is unset
pub const DEFAULT_CONFIG_PATH: &str = "/pgo-config/pgo.yaml";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Named storage templates
    pub storage: BTreeMap<String, StorageSpec>,

    /// Template used for primary claims when a cluster specifies none
    pub primary_storage: String,

    /// Template for replica claims created by cluster fan-out
    pub replica_storage: String,

    /// Template for the pgBackRest repository claim
    pub backup_storage: String,

    pub cluster: ClusterDefaults,

    pub pooler: PoolerDefaults,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterDefaults {
    /// Service type for primary and replica services
    pub service_type: String,

    pub port: String,

    pub ccp_image_prefix: String,

    pub ccp_image_tag: String,

    /// Length of generated credential passwords
    pub password_length: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolerDefaults {
    pub pgbouncer_image: String,
    pub pgpool_image: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        let standard = StorageSpec {
            access_mode: "ReadWriteOnce".to_string(),
            size: "1Gi".to_string(),
            storage_type: "create".to_string(),
            ..Default::default()
        };
        Self {
            storage: BTreeMap::from([("standard".to_string(), standard)]),
            primary_storage: "standard".to_string(),
            replica_storage: "standard".to_string(),
            backup_storage: "standard".to_string(),
            cluster: ClusterDefaults::default(),
            pooler: PoolerDefaults::default(),
        }
    }
}

impl Default for ClusterDefaults {
    fn default() -> Self {
        Self {
            service_type: "ClusterIP".to_string(),
            port: "5432".to_string(),
            ccp_image_prefix: "crunchydata".to_string(),
            ccp_image_tag: "centos7-10.4-1.8.3".to_string(),
            password_length: 10,
        }
    }
}

impl Default for PoolerDefaults {
    fn default() -> Self {
        Self {
            pgbouncer_image: "crunchy-pgbouncer".to_string(),
            pgpool_image: "crunchy-pgpool".to_string(),
        }
    }
}

impl OperatorConfig {
    /// Parse a configuration document
    pub fn from_yaml(doc: &str) -> Result<Self> {
        let config: OperatorConfig =
            serde_yaml::from_str(doc).map_err(|e| Error::ConfigFileError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`; a missing file yields the built-in defaults
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(doc) => {
                info!("Loaded operator configuration from {}", path.display());
                Self::from_yaml(&doc)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "No operator configuration at {}, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(Error::ConfigFileError(format!(
                "reading {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Load from the path in `PGO_CONFIG_PATH`, or the default location
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(Path::new(&path))
    }

    /// Resolve a named storage template
    pub fn get_storage_spec(&self, key: &str) -> Result<StorageSpec> {
        self.storage
            .get(key)
            .cloned()
            .ok_or_else(|| Error::InvalidConfig(format!("storage template '{}' is not defined", key)))
    }

    pub fn replica_storage_spec(&self) -> Result<StorageSpec> {
        self.get_storage_spec(&self.replica_storage)
    }

    pub fn backup_storage_spec(&self) -> Result<StorageSpec> {
        self.get_storage_spec(&self.backup_storage)
    }

    fn validate(&self) -> Result<()> {
        for key in [&self.primary_storage, &self.replica_storage, &self.backup_storage] {
            self.get_storage_spec(key)?;
        }
        if self.cluster.password_length == 0 {
            return Err(Error::InvalidConfig(
                "cluster.passwordLength must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
