//! Typed execution intents built from the command interpreter's output.
//!
//! One variant per action family, each carrying its own required fields.
//! Interpreter output that is missing a field never becomes an intent.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::agent::calls::Chain;
use crate::agent::tier::Tier;
use crate::backend::InterpretedCommand;

/// Missing or malformed interpreter fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentFieldError {
    Missing(&'static str),
    NonPositive(&'static str),
    Invalid(&'static str),
}

impl std::fmt::Display for IntentFieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(name) => write!(f, "{} is missing", name),
            Self::NonPositive(name) => write!(f, "{} must be greater than zero", name),
            Self::Invalid(name) => write!(f, "{} has an invalid value", name),
        }
    }
}

impl std::error::Error for IntentFieldError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapIntent {
    pub from_token: String,
    pub to_token: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeIntent {
    pub from_token: String,
    pub to_token: String,
    pub amount: Decimal,
    /// Explicit chains, when the interpreter extracted them.
    #[serde(default)]
    pub from_chain: Option<Chain>,
    #[serde(default)]
    pub to_chain: Option<Chain>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeDirection {
    Deposit,
    Withdraw,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeIntent {
    pub token: String,
    pub amount: Decimal,
    pub direction: StakeDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimIntent {
    pub token: String,
}

/// Relative limit-order expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpiryCode {
    #[serde(rename = "1d")]
    OneDay,
    #[default]
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl ExpiryCode {
    /// Unknown codes fall back to seven days.
    pub fn parse(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "1d" | "24h" => Self::OneDay,
            "30d" => Self::ThirtyDays,
            _ => Self::SevenDays,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneDay => "1d",
            Self::SevenDays => "7d",
            Self::ThirtyDays => "30d",
        }
    }

    pub fn duration(self) -> Duration {
        match self {
            Self::OneDay => Duration::days(1),
            Self::SevenDays => Duration::days(7),
            Self::ThirtyDays => Duration::days(30),
        }
    }

    pub fn expires_at(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.duration()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrderIntent {
    pub from_token: String,
    pub to_token: String,
    pub amount: Decimal,
    pub price: Decimal,
    pub expiry: ExpiryCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrderIntent {
    pub order_id: String,
}

/// A validated execution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Intent {
    Swap(SwapIntent),
    Bridge(BridgeIntent),
    Stake(StakeIntent),
    Claim(ClaimIntent),
    LimitOrderCreate(LimitOrderIntent),
    LimitOrderCancel(CancelOrderIntent),
    Portfolio,
    Alerts,
}

/// Result of reading interpreter output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentParse {
    Ready(Intent),
    /// Recognised action with missing fields; reply instead of executing.
    Incomplete {
        action: String,
        problem: IntentFieldError,
    },
    /// Not an execution action.
    Conversational,
}

impl Intent {
    pub fn from_interpreted(command: &InterpretedCommand) -> IntentParse {
        let params = &command.parameters;
        let built = match command.action.as_str() {
            "swap" => swap_fields(params).map(Self::Swap),
            "bridge" => bridge_fields(params).map(Self::Bridge),
            "stake" => stake_fields(params, StakeDirection::Deposit).map(Self::Stake),
            "unstake" => stake_fields(params, StakeDirection::Withdraw).map(Self::Stake),
            "claim_staking_rewards" | "claim" => token_field(params, "token")
                .map(|token| Self::Claim(ClaimIntent { token })),
            "limit_order_create" => limit_order_fields(params).map(Self::LimitOrderCreate),
            "limit_order_cancel" => text_field(params, "order_id")
                .map(|order_id| Self::LimitOrderCancel(CancelOrderIntent { order_id })),
            "portfolio_management" => Ok(Self::Portfolio),
            "alerts" => Ok(Self::Alerts),
            _ => return IntentParse::Conversational,
        };

        match built {
            Ok(intent) => IntentParse::Ready(intent),
            Err(problem) => IntentParse::Incomplete {
                action: command.action.clone(),
                problem,
            },
        }
    }

    /// Lowest tier allowed to execute this intent.
    pub fn min_tier(&self) -> Tier {
        match self {
            Self::Stake(StakeIntent {
                direction: StakeDirection::Withdraw,
                ..
            })
            | Self::Portfolio
            | Self::Alerts => Tier::Private,
            _ => Tier::Standard,
        }
    }

    /// Whether the intent submits contract calls and needs an action id.
    pub fn has_onchain_calls(&self) -> bool {
        !matches!(self, Self::Portfolio | Self::Alerts)
    }

    /// Flow name the privacy proof is bound to.
    pub fn flow_name(&self) -> &'static str {
        match self {
            Self::Swap(_) => "swap",
            Self::Bridge(_) => "bridge",
            Self::Stake(_) => "stake",
            Self::Claim(_) => "stake_claim",
            Self::LimitOrderCreate(_) | Self::LimitOrderCancel(_) => "limit_order",
            Self::Portfolio => "portfolio",
            Self::Alerts => "alerts",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Swap(_) => "swap",
            Self::Bridge(_) => "bridge",
            Self::Stake(StakeIntent {
                direction: StakeDirection::Deposit,
                ..
            }) => "stake",
            Self::Stake(_) => "unstake",
            Self::Claim(_) => "claim",
            Self::LimitOrderCreate(_) => "limit order",
            Self::LimitOrderCancel(_) => "limit order cancel",
            Self::Portfolio => "portfolio management",
            Self::Alerts => "alerts",
        }
    }
}

fn swap_fields(params: &serde_json::Value) -> Result<SwapIntent, IntentFieldError> {
    Ok(SwapIntent {
        from_token: token_field(params, "from")?,
        to_token: token_field(params, "to")?,
        amount: amount_field(params, "amount")?,
    })
}

fn bridge_fields(params: &serde_json::Value) -> Result<BridgeIntent, IntentFieldError> {
    Ok(BridgeIntent {
        from_token: token_field(params, "from")?,
        to_token: token_field(params, "to")?,
        amount: amount_field(params, "amount")?,
        from_chain: chain_field(params, "from_chain")?,
        to_chain: chain_field(params, "to_chain")?,
    })
}

fn chain_field(
    params: &serde_json::Value,
    key: &'static str,
) -> Result<Option<Chain>, IntentFieldError> {
    let Some(raw) = params.get(key).and_then(serde_json::Value::as_str) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "starknet" | "strk" => Ok(Some(Chain::Starknet)),
        "ethereum" | "eth" | "evm" => Ok(Some(Chain::Ethereum)),
        "bitcoin" | "btc" => Ok(Some(Chain::Bitcoin)),
        _ => Err(IntentFieldError::Invalid(key)),
    }
}

fn stake_fields(
    params: &serde_json::Value,
    direction: StakeDirection,
) -> Result<StakeIntent, IntentFieldError> {
    Ok(StakeIntent {
        token: token_field(params, "token")?,
        amount: amount_field(params, "amount")?,
        direction,
    })
}

fn limit_order_fields(params: &serde_json::Value) -> Result<LimitOrderIntent, IntentFieldError> {
    let expiry = params
        .get("expiry")
        .and_then(serde_json::Value::as_str)
        .map(ExpiryCode::parse)
        .unwrap_or_default();
    Ok(LimitOrderIntent {
        from_token: token_field(params, "from")?,
        to_token: token_field(params, "to")?,
        amount: amount_field(params, "amount")?,
        price: amount_field(params, "price")?,
        expiry,
    })
}

fn text_field(params: &serde_json::Value, key: &'static str) -> Result<String, IntentFieldError> {
    params
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(IntentFieldError::Missing(key))
}

fn token_field(params: &serde_json::Value, key: &'static str) -> Result<String, IntentFieldError> {
    text_field(params, key).map(|symbol| symbol.to_ascii_uppercase())
}

/// Numbers may arrive as JSON numbers or strings; zero means "not found".
fn amount_field(params: &serde_json::Value, key: &'static str) -> Result<Decimal, IntentFieldError> {
    let raw = match params.get(key) {
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => return Err(IntentFieldError::Missing(key)),
    };
    let value = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| IntentFieldError::Invalid(key))?;
    if value <= Decimal::ZERO {
        return Err(IntentFieldError::NonPositive(key));
    }
    Ok(value.normalize())
}
