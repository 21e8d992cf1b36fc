//! Contract address and token registry configuration.

use std::collections::BTreeMap;

use crate::config::helpers;
use crate::error::ConfigError;
use crate::settings::Settings;

/// Tokens the registry knows decimals for out of the box.
pub const KNOWN_TOKENS: &[(&str, u32)] = &[
    ("CAREL", 18),
    ("STRK", 18),
    ("ETH", 18),
    ("USDC", 6),
    ("USDT", 6),
    ("WBTC", 8),
    ("BTC", 8),
];

pub const EXECUTOR_KEY: &str = "CAREL_AI_EXECUTOR_ADDRESS";
pub const CAREL_TOKEN_KEY: &str = "CAREL_TOKEN_ADDRESS";
pub const PRIVACY_ROUTER_KEY: &str = "CAREL_PRIVACY_ROUTER_ADDRESS";
pub const LIMIT_ORDER_BOOK_KEY: &str = "CAREL_LIMIT_ORDER_BOOK_ADDRESS";

/// A token registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub symbol: String,
    pub address: String,
    pub decimals: u32,
}

/// Resolved contract addresses.
///
/// Lookups are lazy: a missing address only fails the attempt that needs
/// it, and the error names the setting to configure.
#[derive(Debug, Clone, Default)]
pub struct ContractsConfig {
    pub executor_address: Option<String>,
    pub carel_token_address: Option<String>,
    pub privacy_router_address: Option<String>,
    pub limit_order_book_address: Option<String>,
    pub staking_pools: BTreeMap<String, String>,
    pub tokens: BTreeMap<String, TokenInfo>,
}

pub fn staking_pool_key(symbol: &str) -> String {
    format!("CAREL_STAKING_POOL_{}", helpers::symbol_env_suffix(symbol))
}

pub fn token_address_key(symbol: &str) -> String {
    format!("CAREL_TOKEN_{}_ADDRESS", helpers::symbol_env_suffix(symbol))
}

fn default_decimals(symbol: &str) -> Option<u32> {
    KNOWN_TOKENS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(symbol))
        .map(|(_, decimals)| *decimals)
}

impl ContractsConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let contracts = &settings.contracts;

        let mut staking_pools = BTreeMap::new();
        for (symbol, address) in &contracts.staking_pools {
            staking_pools.insert(symbol.to_ascii_uppercase(), address.clone());
        }
        for (symbol, _) in KNOWN_TOKENS {
            if let Some(address) = helpers::optional_env(&staking_pool_key(symbol))? {
                staking_pools.insert(symbol.to_string(), address);
            }
        }

        let mut tokens = BTreeMap::new();
        for (symbol, entry) in &contracts.tokens {
            let symbol = symbol.to_ascii_uppercase();
            let decimals = entry
                .decimals
                .or_else(|| default_decimals(&symbol))
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: format!("contracts.tokens.{symbol}.decimals"),
                    message: "decimals are required for tokens outside the default registry"
                        .to_string(),
                })?;
            tokens.insert(
                symbol.clone(),
                TokenInfo {
                    symbol,
                    address: entry.address.clone(),
                    decimals,
                },
            );
        }
        for (symbol, decimals) in KNOWN_TOKENS {
            if let Some(address) = helpers::optional_env(&token_address_key(symbol))? {
                tokens.insert(
                    symbol.to_string(),
                    TokenInfo {
                        symbol: symbol.to_string(),
                        address,
                        decimals: *decimals,
                    },
                );
            }
        }

        let carel_token_address = helpers::optional_env(CAREL_TOKEN_KEY)?
            .or_else(|| contracts.carel_token_address.clone());
        if let Some(ref address) = carel_token_address {
            tokens.entry("CAREL".to_string()).or_insert_with(|| TokenInfo {
                symbol: "CAREL".to_string(),
                address: address.clone(),
                decimals: 18,
            });
        }

        Ok(Self {
            executor_address: helpers::optional_env(EXECUTOR_KEY)?
                .or_else(|| contracts.executor_address.clone()),
            carel_token_address,
            privacy_router_address: helpers::optional_env(PRIVACY_ROUTER_KEY)?
                .or_else(|| contracts.privacy_router_address.clone()),
            limit_order_book_address: helpers::optional_env(LIMIT_ORDER_BOOK_KEY)?
                .or_else(|| contracts.limit_order_book_address.clone()),
            staking_pools,
            tokens,
        })
    }

    pub fn with_executor(mut self, address: impl Into<String>) -> Self {
        self.executor_address = Some(address.into());
        self
    }

    pub fn with_carel_token(mut self, address: impl Into<String>) -> Self {
        let address = address.into();
        self.tokens.insert(
            "CAREL".to_string(),
            TokenInfo {
                symbol: "CAREL".to_string(),
                address: address.clone(),
                decimals: 18,
            },
        );
        self.carel_token_address = Some(address);
        self
    }

    pub fn with_privacy_router(mut self, address: impl Into<String>) -> Self {
        self.privacy_router_address = Some(address.into());
        self
    }

    pub fn with_limit_order_book(mut self, address: impl Into<String>) -> Self {
        self.limit_order_book_address = Some(address.into());
        self
    }

    pub fn with_staking_pool(mut self, symbol: &str, address: impl Into<String>) -> Self {
        self.staking_pools
            .insert(symbol.to_ascii_uppercase(), address.into());
        self
    }

    pub fn with_token(mut self, symbol: &str, address: impl Into<String>, decimals: u32) -> Self {
        let symbol = symbol.to_ascii_uppercase();
        self.tokens.insert(
            symbol.clone(),
            TokenInfo {
                symbol,
                address: address.into(),
                decimals,
            },
        );
        self
    }

    pub fn executor(&self) -> Result<&str, ConfigError> {
        required(self.executor_address.as_deref(), EXECUTOR_KEY, "AI executor contract")
    }

    pub fn carel_token(&self) -> Result<&str, ConfigError> {
        required(
            self.carel_token_address.as_deref(),
            CAREL_TOKEN_KEY,
            "CAREL token contract",
        )
    }

    pub fn privacy_router(&self) -> Result<&str, ConfigError> {
        required(
            self.privacy_router_address.as_deref(),
            PRIVACY_ROUTER_KEY,
            "privacy router contract",
        )
    }

    pub fn limit_order_book(&self) -> Result<&str, ConfigError> {
        required(
            self.limit_order_book_address.as_deref(),
            LIMIT_ORDER_BOOK_KEY,
            "limit-order book contract",
        )
    }

    pub fn staking_pool(&self, symbol: &str) -> Result<&str, ConfigError> {
        let key = staking_pool_key(symbol);
        required(
            self.staking_pools
                .get(&symbol.to_ascii_uppercase())
                .map(String::as_str),
            &key,
            "staking pool contract",
        )
    }

    pub fn token(&self, symbol: &str) -> Result<&TokenInfo, ConfigError> {
        self.tokens
            .get(&symbol.to_ascii_uppercase())
            .filter(|info| !is_placeholder_address(&info.address))
            .ok_or_else(|| {
                ConfigError::missing(
                    token_address_key(symbol),
                    format!("Set the {} token contract address.", symbol.to_ascii_uppercase()),
                )
            })
    }
}

fn required<'a>(
    value: Option<&'a str>,
    key: &str,
    what: &str,
) -> Result<&'a str, ConfigError> {
    value
        .filter(|address| !is_placeholder_address(address))
        .ok_or_else(|| ConfigError::missing(key, format!("Set the {what} address.")))
}

/// Zero or empty addresses are treated as unconfigured.
pub fn is_placeholder_address(address: &str) -> bool {
    let trimmed = address.trim();
    let body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    body.is_empty() || body.chars().all(|c| c == '0')
}
