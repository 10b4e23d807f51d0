use serde::{Deserialize, Serialize};
use std::path::Path;

use casework_crypto::keys::Keypair;
use casework_types::constants::MAX_PARTY_NAME_LEN;

use crate::error::NodeError;

/// File name written by [`NodeConfig::init`].
pub const CONFIG_FILE: &str = "casework.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub identity: IdentityConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Well-known party name, unique on the network.
    pub name: String,
    /// Hex-encoded 32-byte seed for the well-known keypair. Random if unset.
    #[serde(default)]
    pub keypair_seed: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Vault backend: "memory" or "sqlite".
    pub db_type: String,
    /// Directory for the SQLite database.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Name of the notary every proposal from this node is addressed to.
    pub notary_name: String,
    /// Whether a notary built from this config re-runs the case contract.
    #[serde(default = "default_validating_notary")]
    pub validating_notary: bool,
    /// Hex-encoded 32-byte seed for a notary run from this config. Random if unset.
    #[serde(default)]
    pub notary_seed: Option<String>,
}

fn default_validating_notary() -> bool {
    true
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig {
                name: "PartyA".to_string(),
                keypair_seed: None,
            },
            storage: StorageConfig {
                db_type: "memory".to_string(),
                path: "./casework-data".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            protocol: ProtocolConfig {
                notary_name: "Notary".to_string(),
                validating_notary: default_validating_notary(),
                notary_seed: None,
            },
        }
    }
}

impl NodeConfig {
    /// Default config for a named party; handy for tests and demos.
    pub fn named(name: &str) -> Self {
        let mut config = Self::default();
        config.identity.name = name.to_string();
        config
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, NodeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path, e),
        })?;
        let config: NodeConfig = toml::from_str(&contents).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to parse config file '{}': {}", path, e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Initialize a default configuration file in the given directory.
    pub fn init(dir: &str) -> Result<(), NodeError> {
        let dir_path = Path::new(dir);
        if !dir_path.exists() {
            std::fs::create_dir_all(dir_path)?;
        }

        let config = NodeConfig::default();
        let toml_str = toml::to_string_pretty(&config).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to serialize default config: {}", e),
        })?;

        std::fs::write(dir_path.join(CONFIG_FILE), toml_str)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        let name = self.identity.name.trim();
        if name.is_empty() || name.len() > MAX_PARTY_NAME_LEN {
            return Err(NodeError::ConfigError {
                reason: format!(
                    "party name must be 1 to {MAX_PARTY_NAME_LEN} bytes, got {}",
                    name.len()
                ),
            });
        }
        if self.protocol.notary_name.trim().is_empty() {
            return Err(NodeError::ConfigError {
                reason: "notary name must not be empty".to_string(),
            });
        }
        match self.storage.db_type.as_str() {
            "memory" | "sqlite" => Ok(()),
            other => Err(NodeError::ConfigError {
                reason: format!("unknown storage backend '{other}', expected 'memory' or 'sqlite'"),
            }),
        }
    }

    /// The well-known keypair: from the configured seed, else freshly generated.
    pub fn keypair(&self) -> Result<Keypair, NodeError> {
        seeded_or_random(self.identity.keypair_seed.as_deref(), "keypair_seed")
    }
}

impl ProtocolConfig {
    /// The notary's signing keypair: from `notary_seed`, else freshly generated.
    pub fn notary_keypair(&self) -> Result<Keypair, NodeError> {
        seeded_or_random(self.notary_seed.as_deref(), "notary_seed")
    }
}

fn seeded_or_random(seed: Option<&str>, field: &str) -> Result<Keypair, NodeError> {
    match seed {
        Some(seed) => Keypair::from_hex_seed(seed).map_err(|e| NodeError::ConfigError {
            reason: format!("invalid {field}: {e}"),
        }),
        None => Ok(Keypair::generate()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.storage.db_type, "memory");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.protocol.notary_name, "Notary");
        assert!(config.protocol.validating_notary);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = NodeConfig::named("Bob");
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let deserialized: NodeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.identity.name, "Bob");
        assert_eq!(deserialized.storage.db_type, config.storage.db_type);
    }

    #[test]
    fn test_init_creates_config_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_str().unwrap();
        NodeConfig::init(dir).unwrap();

        let config_path = tmp.path().join(CONFIG_FILE);
        assert!(config_path.exists());
        let config = NodeConfig::load(config_path.to_str().unwrap()).unwrap();
        assert_eq!(config.identity.name, "PartyA");
    }

    #[test]
    fn test_load_nonexistent_file() {
        assert!(NodeConfig::load("/nonexistent/path/casework.toml").is_err());
    }

    #[test]
    fn test_load_fills_optional_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
[identity]
name = "Carol"

[storage]
db_type = "sqlite"
path = "/var/lib/casework"

[logging]
level = "debug"

[protocol]
notary_name = "Notary"
"#,
        )
        .unwrap();
        let config = NodeConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.identity.keypair_seed, None);
        assert_eq!(config.protocol.notary_seed, None);
        assert!(config.protocol.validating_notary);
        assert_eq!(config.storage.db_type, "sqlite");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut config = NodeConfig::default();
        config.storage.db_type = "rocksdb".to_string();
        assert!(matches!(
            config.validate(),
            Err(NodeError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_seeded_keypair_is_stable() {
        let mut config = NodeConfig::default();
        config.identity.keypair_seed = Some("07".repeat(32));
        let a = config.keypair().unwrap();
        let b = config.keypair().unwrap();
        assert_eq!(a.public_key(), b.public_key());

        config.identity.keypair_seed = Some("zz".to_string());
        assert!(config.keypair().is_err());
    }

    #[test]
    fn test_notary_key_is_not_derivable_from_its_name() {
        let config = NodeConfig::default();
        let a = config.protocol.notary_keypair().unwrap();
        let b = config.protocol.notary_keypair().unwrap();
        assert_ne!(a.public_key(), b.public_key());

        let mut seeded = config.protocol.clone();
        seeded.notary_seed = Some("0b".repeat(32));
        assert_eq!(
            seeded.notary_keypair().unwrap().public_key(),
            Keypair::from_seed(&[0x0b; 32]).public_key()
        );

        seeded.notary_seed = Some("abcd".to_string());
        assert!(matches!(
            seeded.notary_keypair(),
            Err(NodeError::ConfigError { .. })
        ));
    }
}
