use quorum_crypto::KeyPair;
use quorum_types::{Address, ConsensusError, ConsensusPolicy, Result, Stage};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub network: NetworkConfig,
    pub consensus: ConsensusConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Hex-encoded ed25519 secret key. Empty means a throwaway key.
    pub private_key: String,
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub network_id: String,
    pub validators: Vec<ValidatorConfig>,
    pub reconnect_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidatorConfig {
    pub address: String,
    /// Empty for the local node.
    #[serde(default)]
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub threshold_percent: u32,
    pub init_percent: Option<u32>,
    pub sign_percent: Option<u32>,
    pub accept_percent: Option<u32>,
    pub round_timeout_ms: u64,
    pub join_interval_ms: u64,
    pub sync_retry_ms: u64,
    pub block_round_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Etcd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub etcd_endpoints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                private_key: String::new(),
                listen_addr: "0.0.0.0:7100".to_string(),
            },
            network: NetworkConfig {
                network_id: "quorum-local".to_string(),
                validators: vec![],
                reconnect_interval_ms: 5_000,
            },
            consensus: ConsensusConfig {
                threshold_percent: 67,
                init_percent: None,
                sign_percent: None,
                accept_percent: None,
                round_timeout_ms: 5_000,
                join_interval_ms: 2_000,
                sync_retry_ms: 3_000,
                block_round_interval_ms: 3_000,
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                etcd_endpoints: vec!["http://127.0.0.1:2379".to_string()],
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

fn config_err(e: impl std::fmt::Display) -> ConsensusError {
    ConsensusError::Config(e.to_string())
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ConsensusError::Config(format!("Invalid {}: {}", name, e)))
}

impl AppConfig {
    /// Defaults, then `config/default.toml` if present, then environment.
    pub fn load() -> Result<Self> {
        let defaults = config::Config::try_from(&AppConfig::default()).map_err(config_err)?;
        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name("config/default").required(false))
            .build()
            .map_err(|e| ConsensusError::Config(format!("Failed to load config file: {}", e)))?;

        let mut app_config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| ConsensusError::Config(format!("Failed to parse config: {}", e)))?;

        app_config.override_from_env()?;
        Ok(app_config)
    }

    fn override_from_env(&mut self) -> Result<()> {
        if let Ok(key) = std::env::var("NODE_PRIVATE_KEY") {
            self.node.private_key = key;
        }

        if let Ok(listen_addr) = std::env::var("LISTEN_ADDR") {
            self.node.listen_addr = listen_addr;
        }

        if let Ok(network_id) = std::env::var("NETWORK_ID") {
            self.network.network_id = network_id;
        }

        if let Ok(validators) = std::env::var("VALIDATORS") {
            if !validators.is_empty() {
                self.network.validators = parse_validators(&validators)?;
            }
        }

        if let Ok(percent) = std::env::var("THRESHOLD_PERCENT") {
            self.consensus.threshold_percent = parse_env("THRESHOLD_PERCENT", &percent)?;
        }

        if let Ok(timeout) = std::env::var("ROUND_TIMEOUT_MS") {
            self.consensus.round_timeout_ms = parse_env("ROUND_TIMEOUT_MS", &timeout)?;
        }

        if let Ok(backend) = std::env::var("STORAGE_BACKEND") {
            self.storage.backend = match backend.to_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "etcd" => StorageBackend::Etcd,
                other => {
                    return Err(ConsensusError::Config(format!(
                        "Invalid STORAGE_BACKEND: {}",
                        other
                    )))
                }
            };
        }

        if let Ok(endpoints) = std::env::var("ETCD_ENDPOINTS") {
            self.storage.etcd_endpoints = endpoints
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.policy()?;
        self.listen_addr()?;
        self.peer_endpoints()?;

        if self.network.validators.is_empty() {
            return Err(ConsensusError::Config("validator set cannot be empty".to_string()));
        }

        let mut addresses: Vec<_> = self.network.validators.iter().map(|v| &v.address).collect();
        addresses.sort();
        addresses.dedup();
        if addresses.len() != self.network.validators.len() {
            return Err(ConsensusError::Config("validator set has duplicates".to_string()));
        }

        if self.storage.backend == StorageBackend::Etcd && self.storage.etcd_endpoints.is_empty() {
            return Err(ConsensusError::Config(
                "etcd endpoints cannot be empty".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(ConsensusError::Config(format!(
                "log format must be text or json, got {}",
                self.logging.format
            )));
        }

        Ok(())
    }

    pub fn policy(&self) -> Result<ConsensusPolicy> {
        let consensus = &self.consensus;
        let mut policy = ConsensusPolicy::new(
            self.network.network_id.clone(),
            self.network.validators.len().max(1),
            consensus.threshold_percent,
        )?
        .with_round_timeout(Duration::from_millis(consensus.round_timeout_ms))
        .with_join_interval(Duration::from_millis(consensus.join_interval_ms));

        for (stage, percent) in [
            (Stage::Init, consensus.init_percent),
            (Stage::Sign, consensus.sign_percent),
            (Stage::Accept, consensus.accept_percent),
        ] {
            if let Some(percent) = percent {
                policy = policy.with_stage_percent(stage, percent);
            }
        }
        policy.sync_retry_interval = Duration::from_millis(consensus.sync_retry_ms);
        policy.block_round_interval = Duration::from_millis(consensus.block_round_interval_ms);

        policy.validate()?;
        Ok(policy)
    }

    /// Configured key, or a fresh one when none is set.
    pub fn keypair(&self) -> Result<KeyPair> {
        if self.node.private_key.is_empty() {
            return Ok(KeyPair::generate());
        }
        KeyPair::from_hex(&self.node.private_key)
    }

    pub fn validators(&self) -> Vec<Address> {
        self.network
            .validators
            .iter()
            .map(|v| Address::from(v.address.as_str()))
            .collect()
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.node
            .listen_addr
            .parse()
            .map_err(|e| ConsensusError::Config(format!("Invalid listen_addr: {}", e)))
    }

    /// Socket addresses of every validator that has an endpoint.
    pub fn peer_endpoints(&self) -> Result<Vec<(Address, SocketAddr)>> {
        self.network
            .validators
            .iter()
            .filter(|v| !v.endpoint.is_empty())
            .map(|v| {
                let addr = v.endpoint.parse().map_err(|e| {
                    ConsensusError::Config(format!("Invalid endpoint {}: {}", v.endpoint, e))
                })?;
                Ok((Address::from(v.address.as_str()), addr))
            })
            .collect()
    }
}

/// `address@host:port` entries separated by commas; the endpoint part is
/// optional.
pub fn parse_validators(s: &str) -> Result<Vec<ValidatorConfig>> {
    s.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (address, endpoint) = match entry.split_once('@') {
                Some((address, endpoint)) => (address.trim(), endpoint.trim()),
                None => (entry, ""),
            };
            if address.is_empty() {
                return Err(ConsensusError::Config(format!("Invalid validator entry: {}", entry)));
            }
            Ok(ValidatorConfig {
                address: address.to_string(),
                endpoint: endpoint.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_validators(count: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.network.validators = (0..count)
            .map(|i| ValidatorConfig {
                address: format!("qv{:02}", i),
                endpoint: format!("127.0.0.1:{}", 7100 + i),
            })
            .collect();
        config
    }

    #[test]
    fn test_parse_validators() {
        let parsed = parse_validators("qva@127.0.0.1:7101, qvb ,,qvc@10.0.0.3:7100").unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].endpoint, "127.0.0.1:7101");
        assert_eq!(parsed[1].address, "qvb");
        assert!(parsed[1].endpoint.is_empty());

        assert!(parse_validators("@127.0.0.1:1").is_err());
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = with_validators(4);
        config.consensus.threshold_percent = 75;
        config.consensus.accept_percent = Some(100);

        let policy = config.policy().unwrap();
        assert_eq!(policy.total, 4);
        assert_eq!(policy.stage_percent(Stage::Init), 75);
        assert_eq!(policy.stage_percent(Stage::Accept), 100);
        assert_eq!(policy.round_timeout, Duration::from_millis(5_000));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        assert!(AppConfig::default().validate().is_err());
        assert!(with_validators(3).validate().is_ok());

        let mut config = with_validators(3);
        config.consensus.threshold_percent = 0;
        assert!(config.validate().is_err());

        let mut config = with_validators(3);
        config.network.validators[2].address = config.network.validators[0].address.clone();
        assert!(config.validate().is_err());

        let mut config = with_validators(3);
        config.logging.format = "yaml".to_string();
        assert!(config.validate().is_err());

        let mut config = with_validators(3);
        config.network.validators[1].endpoint = "nowhere".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_keypair_from_config() {
        let key = KeyPair::generate();
        let mut config = AppConfig::default();
        config.node.private_key = hex::encode(key.private_key());
        assert_eq!(config.keypair().unwrap().address(), key.address());

        config.node.private_key = "zz".to_string();
        assert!(config.keypair().is_err());
    }
}
