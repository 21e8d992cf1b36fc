//! Configuration for carel-agent.
//!
//! Settings are loaded with priority: env var > TOML config file > default.
//! `.env` files are loaded via dotenvy before resolution (see
//! [`crate::bootstrap::load_carel_env`]).

mod contracts;
pub(crate) mod helpers;

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;

use crate::agent::tier::Tier;
use crate::error::ConfigError;
use crate::settings::Settings;

pub use self::contracts::{
    CAREL_TOKEN_KEY, ContractsConfig, EXECUTOR_KEY, KNOWN_TOKENS, LIMIT_ORDER_BOOK_KEY,
    PRIVACY_ROUTER_KEY, TokenInfo, is_placeholder_address, staking_pool_key, token_address_key,
};

/// Upper bound on the not-ready preflight TTL.
pub const MAX_NOT_READY_PREFLIGHT_TTL: Duration = Duration::from_secs(5);

/// Main configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct Config {
    pub contracts: ContractsConfig,
    pub features: FeatureFlags,
    pub timing: TimingConfig,
    pub tiers: TierConfig,
    pub backend: BackendConfig,
}

/// Deployment feature flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Refuse the public wallet fallback when the privacy relayer is down.
    pub strict_shielded_pool: bool,
    /// Allow bridge commands under tier 3.
    pub bridge_on_tier3: bool,
    /// Create a brand-new action id for every execution.
    pub fresh_setup_per_execution: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            strict_shielded_pool: false,
            bridge_on_tier3: false,
            fresh_setup_per_execution: true,
        }
    }
}

impl FeatureFlags {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let features = &settings.features;
        Ok(Self {
            strict_shielded_pool: parse_bool(
                "CAREL_STRICT_SHIELDED_POOL",
                features.strict_shielded_pool,
            )?,
            bridge_on_tier3: parse_bool("CAREL_BRIDGE_ON_TIER3", features.bridge_on_tier3)?,
            fresh_setup_per_execution: parse_bool(
                "CAREL_FRESH_SETUP_PER_EXECUTION",
                features.fresh_setup_per_execution,
            )?,
        })
    }
}

/// Polling, settle, backoff and cache timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    pub poll_interval: Duration,
    pub poll_attempts: u32,
    pub wallet_settle_delay: Duration,
    pub nonce_backoff: Duration,
    pub setup_cooldown: Duration,
    pub preflight_ttl_ready: Duration,
    pub preflight_ttl_not_ready: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2_000),
            poll_attempts: 12,
            wallet_settle_delay: Duration::from_millis(350),
            nonce_backoff: Duration::from_millis(1_500),
            setup_cooldown: Duration::from_secs(8),
            preflight_ttl_ready: Duration::from_secs(90),
            preflight_ttl_not_ready: MAX_NOT_READY_PREFLIGHT_TTL,
        }
    }
}

impl TimingConfig {
    /// All delays zeroed, poll budget kept small. Used by tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            poll_attempts: 3,
            wallet_settle_delay: Duration::ZERO,
            nonce_backoff: Duration::ZERO,
            setup_cooldown: Duration::ZERO,
            preflight_ttl_ready: Duration::from_secs(90),
            preflight_ttl_not_ready: MAX_NOT_READY_PREFLIGHT_TTL,
        }
    }

    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let timing = &settings.timing;

        let poll_interval_ms = helpers::parse_env_or(
            "CAREL_POLL_INTERVAL_MS",
            timing.poll_interval_ms,
            "a non-negative integer",
        )?;

        let poll_attempts = helpers::parse_env_or(
            "CAREL_POLL_ATTEMPTS",
            timing.poll_attempts,
            "a positive integer",
        )?;
        if poll_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CAREL_POLL_ATTEMPTS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let wallet_settle_delay_ms = helpers::parse_env_or(
            "CAREL_WALLET_SETTLE_DELAY_MS",
            timing.wallet_settle_delay_ms,
            "a non-negative integer",
        )?;
        let nonce_backoff_ms = helpers::parse_env_or(
            "CAREL_NONCE_BACKOFF_MS",
            timing.nonce_backoff_ms,
            "a non-negative integer",
        )?;
        let setup_cooldown_ms = helpers::parse_env_or(
            "CAREL_SETUP_COOLDOWN_MS",
            timing.setup_cooldown_ms,
            "a non-negative integer",
        )?;
        let preflight_ttl_ready_ms = helpers::parse_env_or(
            "CAREL_PREFLIGHT_TTL_READY_MS",
            timing.preflight_ttl_ready_ms,
            "a non-negative integer",
        )?;
        let preflight_ttl_not_ready_ms = helpers::parse_env_or(
            "CAREL_PREFLIGHT_TTL_NOT_READY_MS",
            timing.preflight_ttl_not_ready_ms,
            "a non-negative integer",
        )?;

        let not_ready = Duration::from_millis(preflight_ttl_not_ready_ms);
        if not_ready > MAX_NOT_READY_PREFLIGHT_TTL {
            tracing::warn!(
                "CAREL_PREFLIGHT_TTL_NOT_READY_MS={} exceeds {}ms, clamping",
                preflight_ttl_not_ready_ms,
                MAX_NOT_READY_PREFLIGHT_TTL.as_millis()
            );
        }

        Ok(Self {
            poll_interval: Duration::from_millis(poll_interval_ms),
            poll_attempts,
            wallet_settle_delay: Duration::from_millis(wallet_settle_delay_ms),
            nonce_backoff: Duration::from_millis(nonce_backoff_ms),
            setup_cooldown: Duration::from_millis(setup_cooldown_ms),
            preflight_ttl_ready: Duration::from_millis(preflight_ttl_ready_ms),
            preflight_ttl_not_ready: not_ready.min(MAX_NOT_READY_PREFLIGHT_TTL),
        })
    }
}

/// Per-tier fee parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierConfig {
    pub tier2_burn_carel: Decimal,
    pub tier3_burn_carel: Decimal,
    pub swap_slippage_percent: Decimal,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            tier2_burn_carel: Decimal::ONE,
            tier3_burn_carel: Decimal::TWO,
            swap_slippage_percent: Decimal::ONE,
        }
    }
}

impl TierConfig {
    /// CAREL burned by an execution under `tier`. Tier 1 never burns.
    pub fn burn_for(&self, tier: Tier) -> Decimal {
        match tier {
            Tier::ReadOnly => Decimal::ZERO,
            Tier::Standard => self.tier2_burn_carel,
            Tier::Private => self.tier3_burn_carel,
        }
    }

    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let tiers = &settings.tiers;
        let tier2_burn_carel = parse_decimal("CAREL_TIER2_BURN", &tiers.tier2_burn_carel)?;
        let tier3_burn_carel = parse_decimal("CAREL_TIER3_BURN", &tiers.tier3_burn_carel)?;
        let swap_slippage_percent =
            parse_decimal("CAREL_SWAP_SLIPPAGE_PERCENT", &tiers.swap_slippage_percent)?;

        if swap_slippage_percent >= Decimal::ONE_HUNDRED {
            return Err(ConfigError::InvalidValue {
                key: "CAREL_SWAP_SLIPPAGE_PERCENT".to_string(),
                message: "must be below 100".to_string(),
            });
        }

        Ok(Self {
            tier2_burn_carel,
            tier3_burn_carel,
            swap_slippage_percent,
        })
    }
}

/// Backend endpoint configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Absolute http(s) base URL without a trailing slash.
    pub base_url: String,
    pub token: Option<SecretString>,
    pub timeout: Duration,
}

impl BackendConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let raw_url = helpers::optional_env("CAREL_BACKEND_URL")?
            .unwrap_or_else(|| settings.backend.base_url.clone());
        let base_url = url::Url::parse(&raw_url).map_err(|e| ConfigError::InvalidValue {
            key: "CAREL_BACKEND_URL".to_string(),
            message: format!("must be an absolute URL: {e}"),
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                key: "CAREL_BACKEND_URL".to_string(),
                message: format!("unsupported scheme '{}'", base_url.scheme()),
            });
        }

        let timeout_ms = helpers::parse_env_or(
            "CAREL_BACKEND_TIMEOUT_MS",
            settings.backend.timeout_ms,
            "a positive integer",
        )?;
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CAREL_BACKEND_TIMEOUT_MS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        Ok(Self {
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            token: helpers::optional_env("CAREL_BACKEND_TOKEN")?.map(SecretString::from),
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    helpers::optional_env(key)?
        .map(|s| match normalize_variant(&s).as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("must be 'true' or 'false', got '{s}'"),
            }),
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}

fn parse_decimal(key: &str, fallback: &str) -> Result<Decimal, ConfigError> {
    let raw = helpers::optional_env(key)?.unwrap_or_else(|| fallback.to_string());
    let value: Decimal = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("must be a decimal number: {e}"),
    })?;
    if value.is_sign_negative() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must not be negative".to_string(),
        });
    }
    Ok(value)
}

fn normalize_variant(value: &str) -> String {
    value.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

impl Config {
    /// Load configuration from env vars and the default TOML file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_toml(None)
    }

    /// Load configuration from env vars and an optional TOML file.
    ///
    /// Priority: env var > TOML config file > default.
    pub fn from_env_with_toml(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        crate::bootstrap::load_carel_env().log();
        let settings = Self::load_settings(toml_path)?;
        Self::build(&settings)
    }

    /// Load the TOML settings layer.
    ///
    /// If `explicit_path` is `Some`, loads from that path (errors are fatal).
    /// If `None`, tries `~/.carel-agent/config.toml` (a missing file is
    /// silently ignored).
    fn load_settings(explicit_path: Option<&Path>) -> Result<Settings, ConfigError> {
        let path = explicit_path
            .map(Path::to_path_buf)
            .unwrap_or_else(Settings::default_toml_path);

        match Settings::load_toml(&path) {
            Ok(Some(settings)) => {
                tracing::debug!("Loaded TOML config from {}", path.display());
                Ok(settings)
            }
            Ok(None) if explicit_path.is_some() => Err(ConfigError::ParseError(format!(
                "Config file not found: {}",
                path.display()
            ))),
            Ok(None) => Ok(Settings::default()),
            Err(e) if explicit_path.is_some() => Err(ConfigError::ParseError(format!(
                "Failed to load config file {}: {}",
                path.display(),
                e
            ))),
            Err(e) => {
                tracing::warn!("Failed to load default config file: {}", e);
                Ok(Settings::default())
            }
        }
    }

    /// Build config from a settings layer, applying env overrides.
    pub fn build(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            contracts: ContractsConfig::resolve(settings)?,
            features: FeatureFlags::resolve(settings)?,
            timing: TimingConfig::resolve(settings)?,
            tiers: TierConfig::resolve(settings)?,
            backend: BackendConfig::resolve(settings)?,
        })
    }

    /// Config with the given contracts and defaults everywhere else, without
    /// reading the environment.
    pub fn for_contracts(contracts: ContractsConfig) -> Self {
        Self {
            contracts,
            features: FeatureFlags::default(),
            timing: TimingConfig::default(),
            tiers: TierConfig::default(),
            backend: BackendConfig {
                base_url: "http://localhost:8080".to_string(),
                token: None,
                timeout: Duration::from_secs(15),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::settings::Settings;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const KEYS: &[&str] = &[
        "CAREL_AI_EXECUTOR_ADDRESS",
        "CAREL_TOKEN_ADDRESS",
        "CAREL_STAKING_POOL_USDC",
        "CAREL_STRICT_SHIELDED_POOL",
        "CAREL_BRIDGE_ON_TIER3",
        "CAREL_FRESH_SETUP_PER_EXECUTION",
        "CAREL_POLL_INTERVAL_MS",
        "CAREL_POLL_ATTEMPTS",
        "CAREL_PREFLIGHT_TTL_NOT_READY_MS",
        "CAREL_TIER2_BURN",
        "CAREL_SWAP_SLIPPAGE_PERCENT",
        "CAREL_BACKEND_URL",
        "CAREL_BACKEND_TOKEN",
        "CAREL_BACKEND_TIMEOUT_MS",
    ];

    fn clear_carel_env() {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            for key in KEYS {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn resolvers_use_safe_defaults() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_carel_env();

        let config = Config::build(&Settings::default()).expect("config resolve");
        assert!(!config.features.strict_shielded_pool);
        assert!(!config.features.bridge_on_tier3);
        assert!(config.features.fresh_setup_per_execution);
        assert_eq!(config.timing, TimingConfig::default());
        assert_eq!(config.tiers.burn_for(Tier::ReadOnly), Decimal::ZERO);
        assert_eq!(config.tiers.burn_for(Tier::Standard), dec!(1));
        assert_eq!(config.tiers.burn_for(Tier::Private), dec!(2));
        assert_eq!(config.backend.base_url, "http://localhost:8080");
        assert!(config.backend.token.is_none());
        assert!(config.contracts.executor().is_err());
    }

    #[test]
    fn resolvers_apply_env_overrides() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_carel_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("CAREL_AI_EXECUTOR_ADDRESS", "0x0e1");
            std::env::set_var("CAREL_STAKING_POOL_USDC", "0x0b00");
            std::env::set_var("CAREL_STRICT_SHIELDED_POOL", "yes");
            std::env::set_var("CAREL_FRESH_SETUP_PER_EXECUTION", "false");
            std::env::set_var("CAREL_POLL_ATTEMPTS", "4");
            std::env::set_var("CAREL_PREFLIGHT_TTL_NOT_READY_MS", "60000");
            std::env::set_var("CAREL_TIER2_BURN", "0.5");
        }

        let mut settings = Settings::default();
        settings.timing.poll_interval_ms = 10;

        let config = Config::build(&settings).expect("config resolve");
        assert_eq!(config.contracts.executor().unwrap(), "0x0e1");
        assert_eq!(config.contracts.staking_pool("USDC").unwrap(), "0x0b00");
        assert!(config.features.strict_shielded_pool);
        assert!(!config.features.fresh_setup_per_execution);
        assert_eq!(config.timing.poll_attempts, 4);
        assert_eq!(config.timing.poll_interval, Duration::from_millis(10));
        assert_eq!(
            config.timing.preflight_ttl_not_ready,
            MAX_NOT_READY_PREFLIGHT_TTL
        );
        assert_eq!(config.tiers.tier2_burn_carel, dec!(0.5));

        clear_carel_env();
    }

    #[test]
    fn resolvers_reject_invalid_values() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_carel_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("CAREL_BRIDGE_ON_TIER3", "sometimes");
        }
        match FeatureFlags::resolve(&Settings::default()).unwrap_err() {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "CAREL_BRIDGE_ON_TIER3"),
            other => panic!("unexpected error: {other}"),
        }

        clear_carel_env();
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("CAREL_POLL_ATTEMPTS", "0");
        }
        assert!(TimingConfig::resolve(&Settings::default()).is_err());

        clear_carel_env();
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("CAREL_BACKEND_URL", "ftp://carel.example");
        }
        assert!(BackendConfig::resolve(&Settings::default()).is_err());

        clear_carel_env();
    }
}
