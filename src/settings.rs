//! User settings persistence.
//!
//! Stores deployment settings in ~/.carel-agent/config.toml.
//! Settings are loaded with env var > config.toml > default priority.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Settings loaded from the TOML config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Contract addresses for executor, token registry, pools, and routers.
    #[serde(default)]
    pub contracts: ContractSettings,

    /// Deployment feature flags.
    #[serde(default)]
    pub features: FeatureSettings,

    /// Polling, settle, and cache timing knobs.
    #[serde(default)]
    pub timing: TimingSettings,

    /// Tier fee and slippage parameters.
    #[serde(default)]
    pub tiers: TierSettings,

    /// Backend endpoint settings.
    #[serde(default)]
    pub backend: BackendSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractSettings {
    #[serde(default)]
    pub executor_address: Option<String>,
    #[serde(default)]
    pub carel_token_address: Option<String>,
    #[serde(default)]
    pub privacy_router_address: Option<String>,
    #[serde(default)]
    pub limit_order_book_address: Option<String>,
    /// Token symbol -> staking pool contract.
    #[serde(default)]
    pub staking_pools: BTreeMap<String, String>,
    /// Token symbol -> registry entry.
    #[serde(default)]
    pub tokens: BTreeMap<String, TokenSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSettings {
    pub address: String,
    #[serde(default)]
    pub decimals: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSettings {
    #[serde(default)]
    pub strict_shielded_pool: bool,
    #[serde(default)]
    pub bridge_on_tier3: bool,
    #[serde(default = "default_true")]
    pub fresh_setup_per_execution: bool,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            strict_shielded_pool: false,
            bridge_on_tier3: false,
            fresh_setup_per_execution: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_wallet_settle_delay_ms")]
    pub wallet_settle_delay_ms: u64,
    #[serde(default = "default_nonce_backoff_ms")]
    pub nonce_backoff_ms: u64,
    #[serde(default = "default_setup_cooldown_ms")]
    pub setup_cooldown_ms: u64,
    #[serde(default = "default_preflight_ttl_ready_ms")]
    pub preflight_ttl_ready_ms: u64,
    #[serde(default = "default_preflight_ttl_not_ready_ms")]
    pub preflight_ttl_not_ready_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_poll_attempts() -> u32 {
    12
}

fn default_wallet_settle_delay_ms() -> u64 {
    350
}

fn default_nonce_backoff_ms() -> u64 {
    1_500
}

fn default_setup_cooldown_ms() -> u64 {
    8_000
}

fn default_preflight_ttl_ready_ms() -> u64 {
    90_000
}

fn default_preflight_ttl_not_ready_ms() -> u64 {
    5_000
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_attempts: default_poll_attempts(),
            wallet_settle_delay_ms: default_wallet_settle_delay_ms(),
            nonce_backoff_ms: default_nonce_backoff_ms(),
            setup_cooldown_ms: default_setup_cooldown_ms(),
            preflight_ttl_ready_ms: default_preflight_ttl_ready_ms(),
            preflight_ttl_not_ready_ms: default_preflight_ttl_not_ready_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSettings {
    /// CAREL burned per tier-2 execution, decimal string.
    #[serde(default = "default_tier2_burn")]
    pub tier2_burn_carel: String,
    /// CAREL burned per tier-3 execution, decimal string.
    #[serde(default = "default_tier3_burn")]
    pub tier3_burn_carel: String,
    /// Swap slippage tolerance in percent, decimal string.
    #[serde(default = "default_swap_slippage")]
    pub swap_slippage_percent: String,
}

fn default_tier2_burn() -> String {
    "1".to_string()
}

fn default_tier3_burn() -> String {
    "2".to_string()
}

fn default_swap_slippage() -> String {
    "1".to_string()
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            tier2_burn_carel: default_tier2_burn(),
            tier3_burn_carel: default_tier3_burn(),
            swap_slippage_percent: default_swap_slippage(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_backend_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_backend_timeout_ms() -> u64 {
    15_000
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            timeout_ms: default_backend_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Default TOML config path (~/.carel-agent/config.toml).
    pub fn default_toml_path() -> PathBuf {
        crate::bootstrap::carel_home_dir().join("config.toml")
    }

    /// Load settings from a TOML file.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    pub fn load_toml(path: &Path) -> Result<Option<Self>, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read {}: {}", path.display(), e)),
        };
        toml::from_str(&data)
            .map(Some)
            .map_err(|e| format!("invalid TOML in {}: {}", path.display(), e))
    }
}
