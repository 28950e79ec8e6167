//! Configuration file management.

use std::path::PathBuf;

use anyhow::Context;
use darkmix_crypto::ed25519::{SigningKey, VerifyingKey};
use darkmix_pool::{PoolConfig, RelayIdentity, Role, MIN_POOL_PEER_PROTO_VERSION};
use darkmix_types::{OutPoint, TxIn};
use serde::{Deserialize, Serialize};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub mixing: MixingConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub election: ElectionConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_port")]
    pub listen_port: u16,
    /// Lowest protocol version a mixing peer may speak.
    #[serde(default = "default_min_protocol")]
    pub min_protocol: u32,
}

/// Mixing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Rounds each coin should be mixed.
    #[serde(default = "default_rounds")]
    pub rounds: i32,
    /// Target anonymized balance in whole coins.
    #[serde(default = "default_anonymize_amount")]
    pub anonymize_amount: i64,
    /// 0 disables liquidity provision.
    #[serde(default)]
    pub liquidity_provider: u32,
    #[serde(default = "default_max_participants")]
    pub max_participants: usize,
    #[serde(default = "default_min_block_spacing")]
    pub min_block_spacing: u64,
}

/// Relay node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Node key, hex.
    #[serde(default)]
    pub private_key: String,
    /// Collateral output as `txhash:index`.
    #[serde(default)]
    pub collateral_vin: String,
}

/// Payment election configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Authority verifying key, hex. Empty disables winner validation.
    #[serde(default)]
    pub authority_key: String,
    /// Authority signing key, hex. Set only on the node producing winners.
    #[serde(default)]
    pub private_key: String,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_port() -> u16 {
    9999
}

fn default_min_protocol() -> u32 {
    MIN_POOL_PEER_PROTO_VERSION
}

fn default_true() -> bool {
    true
}

fn default_rounds() -> i32 {
    2
}

fn default_anonymize_amount() -> i64 {
    1000
}

fn default_max_participants() -> usize {
    darkmix_pool::DEFAULT_MAX_PARTICIPANTS
}

fn default_min_block_spacing() -> u64 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tick_interval() -> u64 {
    2500
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: default_port(),
            min_protocol: default_min_protocol(),
        }
    }
}

impl Default for MixingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rounds: default_rounds(),
            anonymize_amount: default_anonymize_amount(),
            liquidity_provider: 0,
            max_participants: default_max_participants(),
            min_block_spacing: default_min_block_spacing(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            tick_interval_ms: default_tick_interval(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::data_dir().join("config.toml");
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::parse(&content).with_context(|| format!("parsing {}", config_path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `$DARKMIX_DATA_DIR`, else a per-user default.
    pub fn data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("DARKMIX_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Darkmix")
        }
        #[cfg(not(target_os = "macos"))]
        {
            dirs_fallback(".darkmix")
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            enabled: self.mixing.enabled,
            max_participants: self.mixing.max_participants,
            min_protocol: self.network.min_protocol,
            rounds: self.mixing.rounds,
            anonymize_amount: self.mixing.anonymize_amount,
            liquidity_provider: self.mixing.liquidity_provider,
            min_block_spacing: self.mixing.min_block_spacing,
        }
    }

    /// Role this node plays. A relay whose key does not parse still runs
    /// as a relay but cannot sign announcements.
    pub fn role(&self) -> anyhow::Result<Role> {
        if !self.relay.enabled {
            return Ok(Role::Client);
        }
        let prevout = parse_outpoint(&self.relay.collateral_vin)?;
        let node_key = match SigningKey::from_hex(&self.relay.private_key) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::error!(error = %e, "invalid relay private key");
                None
            }
        };
        Ok(Role::Relay(RelayIdentity {
            vin: TxIn::new(prevout),
            node_key,
        }))
    }

    /// Authority key the election checks winners against.
    pub fn authority_key(&self) -> anyhow::Result<Option<VerifyingKey>> {
        if self.election.authority_key.is_empty() {
            return Ok(None);
        }
        Ok(Some(VerifyingKey::from_hex(&self.election.authority_key)?))
    }

    pub fn election_key(&self) -> anyhow::Result<Option<SigningKey>> {
        if self.election.private_key.is_empty() {
            return Ok(None);
        }
        Ok(Some(SigningKey::from_hex(&self.election.private_key)?))
    }
}

/// Parse `txhash:index`.
pub fn parse_outpoint(s: &str) -> anyhow::Result<OutPoint> {
    let (hash, index) = s
        .split_once(':')
        .with_context(|| format!("expected txhash:index, got {s:?}"))?;
    let raw = hex::decode(hash).context("collateral hash is not hex")?;
    let hash: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("collateral hash must be 32 bytes, got {}", raw.len()))?;
    let n: u32 = index.parse().context("collateral index")?;
    Ok(OutPoint::new(hash, n))
}

fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/darkmix"))
}
