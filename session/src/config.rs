//! Mixing configuration with TOML file support.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ps_mnlist::MnListConfig;
use ps_types::{DenomCounts, DenomsMethod, Duffs, NetworkId, PsParams, PS_DENOMS_VALS};
use ps_wallet_core::{EngineConfig, PlanTarget, DEFAULT_FEE_PER_KB};

use crate::logging::LogFormat;
use crate::SessionError;

pub const MIN_MIX_ROUNDS: u32 = 2;
pub const MAX_MIX_ROUNDS: u32 = 16;
pub const MIN_KEEP_AMOUNT: u64 = 2;
pub const MAX_KEEP_AMOUNT: u64 = 21_000_000;
pub const MIN_MAX_SESSIONS: u32 = 1;
pub const MAX_MAX_SESSIONS: u32 = 10;

/// Settings of one wallet's mixing session.
///
/// Loaded from TOML via [`MixingConfig::from_toml_file`] or built in code.
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixingConfig {
    #[serde(default = "default_network")]
    pub network: NetworkId,

    /// Directory holding the masternode list files and the PS keystore.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Whole coins to keep denominated.
    #[serde(default = "default_keep_amount")]
    pub keep_amount: u64,

    #[serde(default = "default_mix_rounds")]
    pub mix_rounds: u32,

    #[serde(default)]
    pub denoms_method: DenomsMethod,

    /// Wanted count per denomination, smallest first. Used when
    /// `denoms_method = "absolute"`.
    #[serde(default)]
    pub abs_denoms_cnt: [u32; 5],

    /// Fund each new-denoms batch from coins of a single address.
    #[serde(default)]
    pub group_origin_coins_by_addr: bool,

    /// Let coins others sent to PS addresses be spent as mixed coins.
    #[serde(default)]
    pub allow_others: bool,

    #[serde(default = "default_fee_per_kb")]
    pub fee_per_kb: Duffs,

    /// Concurrent denominate sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,

    #[serde(default = "default_true")]
    pub load_mns: bool,

    #[serde(default)]
    pub use_p2p_diffs: bool,

    /// Keypairs cached for mixing are dropped this long after mixing stops.
    #[serde(default = "default_keypairs_idle_timeout_secs")]
    pub keypairs_idle_timeout_secs: u64,

    /// Cooldown after mixing stops before PS coins may be spent.
    #[serde(default = "default_wait_for_mn_txs_secs")]
    pub wait_for_mn_txs_secs: u64,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter, e.g. "info" or "debug,ps_mnlist=trace".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub params: PsParams,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_network() -> NetworkId {
    NetworkId::Mainnet
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./ps_data")
}

fn default_keep_amount() -> u64 {
    2
}

fn default_mix_rounds() -> u32 {
    4
}

fn default_fee_per_kb() -> Duffs {
    DEFAULT_FEE_PER_KB
}

fn default_max_sessions() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

fn default_keypairs_idle_timeout_secs() -> u64 {
    600
}

fn default_wait_for_mn_txs_secs() -> u64 {
    120
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl MixingConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SessionError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, SessionError> {
        let config: Self = toml::from_str(s).map_err(|e| SessionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, SessionError> {
        toml::to_string_pretty(self).map_err(|e| SessionError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if !(MIN_MIX_ROUNDS..=MAX_MIX_ROUNDS).contains(&self.mix_rounds) {
            return Err(SessionError::Config(format!(
                "mix_rounds must be in {}..={}, got {}",
                MIN_MIX_ROUNDS, MAX_MIX_ROUNDS, self.mix_rounds
            )));
        }
        if !(MIN_KEEP_AMOUNT..=MAX_KEEP_AMOUNT).contains(&self.keep_amount) {
            return Err(SessionError::Config(format!(
                "keep_amount must be in {}..={}, got {}",
                MIN_KEEP_AMOUNT, MAX_KEEP_AMOUNT, self.keep_amount
            )));
        }
        if !(MIN_MAX_SESSIONS..=MAX_MAX_SESSIONS).contains(&self.max_sessions) {
            return Err(SessionError::Config(format!(
                "max_sessions must be in {}..={}, got {}",
                MIN_MAX_SESSIONS, MAX_MAX_SESSIONS, self.max_sessions
            )));
        }
        if self.params.chunk_size == 0 {
            return Err(SessionError::Config("params.chunk_size must be positive".into()));
        }
        if self.denoms_method == DenomsMethod::Absolute && self.abs_denoms_cnt.iter().all(|c| *c == 0)
        {
            return Err(SessionError::Config(
                "absolute denoms method needs a non-zero abs_denoms_cnt".into(),
            ));
        }
        Ok(())
    }

    pub fn abs_denoms_counts(&self) -> DenomCounts {
        PS_DENOMS_VALS.iter().copied().zip(self.abs_denoms_cnt).collect()
    }

    pub fn plan_target(&self) -> PlanTarget {
        PlanTarget {
            method: self.denoms_method,
            keep_amount: self.keep_amount,
            abs_denoms_cnt: self.abs_denoms_counts(),
        }
    }

    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            params: self.params.clone(),
            mix_rounds: self.mix_rounds,
            fee_per_kb: self.fee_per_kb,
            target: self.plan_target(),
            wait_for_mn_txs_secs: self.wait_for_mn_txs_secs,
            group_origin_coins_by_addr: self.group_origin_coins_by_addr,
            ..EngineConfig::default()
        }
    }

    pub fn to_mnlist_config(&self) -> MnListConfig {
        MnListConfig {
            network: self.network,
            params: self.params.clone(),
            load_mns: self.load_mns,
            use_p2p_diffs: self.use_p2p_diffs,
        }
    }

    pub fn keystore_path(&self) -> PathBuf {
        self.data_dir.join("ps_keystore.json")
    }
}

impl Default for MixingConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            data_dir: default_data_dir(),
            keep_amount: default_keep_amount(),
            mix_rounds: default_mix_rounds(),
            denoms_method: DenomsMethod::default(),
            abs_denoms_cnt: [0; 5],
            group_origin_coins_by_addr: false,
            allow_others: false,
            fee_per_kb: default_fee_per_kb(),
            max_sessions: default_max_sessions(),
            load_mns: default_true(),
            use_p2p_diffs: false,
            keypairs_idle_timeout_secs: default_keypairs_idle_timeout_secs(),
            wait_for_mn_txs_secs: default_wait_for_mn_txs_secs(),
            tick_interval_ms: default_tick_interval_ms(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            params: PsParams::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = MixingConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed = MixingConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = MixingConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.mix_rounds, 4);
        assert_eq!(config.keep_amount, 2);
        assert_eq!(config.fee_per_kb, 1000);
        assert_eq!(config.params.llmq_offset, 8);
        assert_eq!(config.log_format, LogFormat::Human);
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            network = "testnet"
            mix_rounds = 8
            log_format = "json"

            [params]
            chunk_size = 1000
        "#;
        let config = MixingConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.network, NetworkId::Testnet);
        assert_eq!(config.mix_rounds, 8);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.params.chunk_size, 1000);
        assert_eq!(config.params.max_denoms_per_tier, 11);
        assert_eq!(config.to_mnlist_config().params.chunk_size, 1000);
    }

    #[test]
    fn out_of_range_values_rejected() {
        assert!(matches!(MixingConfig::from_toml_str("mix_rounds = 1"), Err(SessionError::Config(_))));
        assert!(matches!(MixingConfig::from_toml_str("mix_rounds = 17"), Err(SessionError::Config(_))));
        assert!(matches!(MixingConfig::from_toml_str("keep_amount = 1"), Err(SessionError::Config(_))));
        assert!(matches!(
            MixingConfig::from_toml_str("denoms_method = \"absolute\""),
            Err(SessionError::Config(_))
        ));
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let err = MixingConfig::from_toml_str("[params]\nchunk_size = 0").unwrap_err();
        assert!(matches!(err, SessionError::Config(msg) if msg.contains("chunk_size")));
        assert!(MixingConfig::from_toml_str("[params]\nchunk_size = 1").is_ok());
    }

    #[test]
    fn absolute_counts_map_onto_ladder() {
        let toml = r#"
            denoms_method = "absolute"
            abs_denoms_cnt = [5, 0, 2, 0, 0]
        "#;
        let config = MixingConfig::from_toml_str(toml).unwrap();
        let target = config.plan_target();
        assert_eq!(target.method, DenomsMethod::Absolute);
        assert_eq!(target.abs_denoms_cnt[&PS_DENOMS_VALS[0]], 5);
        assert_eq!(target.abs_denoms_cnt[&PS_DENOMS_VALS[2]], 2);
        assert_eq!(target.abs_denoms_cnt.len(), 5);
    }

    #[test]
    fn engine_config_carries_settings() {
        let config = MixingConfig { mix_rounds: 6, wait_for_mn_txs_secs: 30, ..Default::default() };
        let engine = config.to_engine_config();
        assert_eq!(engine.mix_rounds, 6);
        assert_eq!(engine.wait_for_mn_txs_secs, 30);
        assert_eq!(engine.target.keep_amount, 2);
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = MixingConfig::from_toml_file("/nonexistent/psmix.toml");
        assert!(matches!(result, Err(SessionError::Config(_))));
    }
}
