//! Call batches, amount encoding, and approval limiting.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Chains an execution can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Starknet,
    Ethereum,
    Bitcoin,
}

impl Chain {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starknet => "starknet",
            Self::Ethereum => "ethereum",
            Self::Bitcoin => "bitcoin",
        }
    }

    /// Human label used in "connect your X wallet" messages.
    pub fn wallet_label(self) -> &'static str {
        match self {
            Self::Starknet => "Starknet",
            Self::Ethereum => "Ethereum",
            Self::Bitcoin => "Bitcoin",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single contract invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub contract_address: String,
    pub entrypoint: String,
    #[serde(default)]
    pub calldata: Vec<String>,
}

impl Call {
    pub fn new(
        contract_address: impl Into<String>,
        entrypoint: impl Into<String>,
        calldata: Vec<String>,
    ) -> Self {
        Self {
            contract_address: contract_address.into(),
            entrypoint: entrypoint.into(),
            calldata,
        }
    }

    /// ERC-20 style `approve(spender, amount_low, amount_high)`.
    pub fn approve(token: &str, spender: &str, amount: U256) -> Self {
        let [low, high] = amount.to_calldata();
        Self::new(token, "approve", vec![spender.to_string(), low, high])
    }

    pub fn is_approval(&self) -> bool {
        self.entrypoint.eq_ignore_ascii_case("approve")
    }

    /// Spender of an approval call.
    pub fn approval_spender(&self) -> Option<&str> {
        if self.is_approval() {
            self.calldata.first().map(String::as_str)
        } else {
            None
        }
    }
}

/// Ordering and shape violations in a call batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallBatchError {
    #[error("call batch is empty")]
    Empty,
    #[error("approval at position {index} has no spender")]
    MissingSpender { index: usize },
    #[error("approval at position {index} for spender {spender} is not followed by a call to it")]
    ApprovalNotFollowed { index: usize, spender: String },
}

/// Ordered calls signed as one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallBatch(Vec<Call>);

impl CallBatch {
    pub fn new(calls: Vec<Call>) -> Self {
        Self(calls)
    }

    pub fn push(&mut self, call: Call) {
        self.0.push(call);
    }

    pub fn extend(&mut self, calls: impl IntoIterator<Item = Call>) {
        self.0.extend(calls);
    }

    pub fn calls(&self) -> &[Call] {
        &self.0
    }

    pub fn calls_mut(&mut self) -> &mut [Call] {
        &mut self.0
    }

    pub fn into_calls(self) -> Vec<Call> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_approval(&self) -> bool {
        self.0.iter().any(Call::is_approval)
    }

    /// Every approval must precede a call to the contract it authorizes.
    pub fn validate(&self) -> Result<(), CallBatchError> {
        if self.0.is_empty() {
            return Err(CallBatchError::Empty);
        }
        for (index, call) in self.0.iter().enumerate() {
            if !call.is_approval() {
                continue;
            }
            let spender = call
                .approval_spender()
                .ok_or(CallBatchError::MissingSpender { index })?;
            let followed = self.0[index + 1..].iter().any(|later| {
                !later.is_approval() && same_address(&later.contract_address, spender)
            });
            if !followed {
                return Err(CallBatchError::ApprovalNotFollowed {
                    index,
                    spender: spender.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Split into approvals and the remaining action calls, for wallets that
    /// cannot resolve a batched entrypoint.
    pub fn split_approvals(&self) -> Option<(CallBatch, CallBatch)> {
        let (approvals, actions): (Vec<_>, Vec<_>) =
            self.0.iter().cloned().partition(Call::is_approval);
        if approvals.is_empty() || actions.is_empty() {
            return None;
        }
        Some((CallBatch(approvals), CallBatch(actions)))
    }
}

impl From<Vec<Call>> for CallBatch {
    fn from(calls: Vec<Call>) -> Self {
        Self(calls)
    }
}

/// Compare felt addresses ignoring case and leading zeros.
pub fn same_address(a: &str, b: &str) -> bool {
    fn norm(s: &str) -> String {
        let s = s.trim().to_ascii_lowercase();
        let body = s.strip_prefix("0x").unwrap_or(&s);
        body.trim_start_matches('0').to_string()
    }
    norm(a) == norm(b)
}

/// Amount parsing and encoding failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("'{0}' is not a decimal amount")]
    Invalid(String),
    #[error("amount must be positive, got '{0}'")]
    NotPositive(String),
    #[error("'{amount}' has more than {decimals} decimal places")]
    TooPrecise { amount: String, decimals: u32 },
    #[error("'{0}' does not fit in 128 bits at this precision")]
    Overflow(String),
}

/// A u256 split into 128-bit words, as Cairo contracts expect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct U256 {
    pub low: u128,
    pub high: u128,
}

impl U256 {
    pub const MAX: Self = Self {
        low: u128::MAX,
        high: u128::MAX,
    };

    pub fn from_u128(value: u128) -> Self {
        Self {
            low: value,
            high: 0,
        }
    }

    pub fn is_max(self) -> bool {
        self == Self::MAX
    }

    pub fn to_calldata(self) -> [String; 2] {
        [format!("{:#x}", self.low), format!("{:#x}", self.high)]
    }

    /// Parse two calldata words (hex or decimal felts).
    pub fn from_calldata(low: &str, high: &str) -> Option<Self> {
        Some(Self {
            low: parse_felt_u128(low)?,
            high: parse_felt_u128(high)?,
        })
    }
}

/// Parse a felt string (`0x`-hex or decimal) that fits in 128 bits.
pub fn parse_felt_u128(value: &str) -> Option<u128> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) if !hex.is_empty() => u128::from_str_radix(hex, 16).ok(),
        Some(_) => None,
        None => value.parse().ok(),
    }
}

/// Scale a human decimal amount to base units (`"1.5"`, 6 -> 1500000).
pub fn parse_units(amount: &str, decimals: u32) -> Result<U256, AmountError> {
    let value = Decimal::from_str(amount.trim())
        .map_err(|_| AmountError::Invalid(amount.to_string()))?;
    decimal_to_units(value, decimals).map_err(|e| match e {
        AmountError::Invalid(_) => AmountError::Invalid(amount.to_string()),
        other => other,
    })
}

pub fn decimal_to_units(value: Decimal, decimals: u32) -> Result<U256, AmountError> {
    let rendered = value.to_string();
    if value <= Decimal::ZERO {
        return Err(AmountError::NotPositive(rendered));
    }
    let value = value.normalize();
    let scale = value.scale();
    if scale > decimals {
        return Err(AmountError::TooPrecise {
            amount: rendered,
            decimals,
        });
    }
    let mantissa = u128::try_from(value.mantissa())
        .map_err(|_| AmountError::Overflow(rendered.clone()))?;
    let base = 10u128
        .checked_pow(decimals - scale)
        .and_then(|factor| mantissa.checked_mul(factor))
        .ok_or(AmountError::Overflow(rendered))?;
    Ok(U256::from_u128(base))
}

/// Outcome of rewriting unbounded approvals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalLimit {
    /// Number of approval calls whose amount was rewritten.
    pub rewritten: usize,
    /// False when an unbounded approval was found but could not be sized.
    pub limited: bool,
}

/// Rewrite approvals whose amount is the max sentinel to the exact amount.
///
/// When the amount cannot be encoded the calldata is left untouched and the
/// result is flagged as not limited.
pub fn limit_unbounded_approvals(calls: &mut [Call], amount: &str, decimals: u32) -> ApprovalLimit {
    let unbounded: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, call)| call.is_approval() && approval_amount(call).is_some_and(U256::is_max))
        .map(|(index, _)| index)
        .collect();

    if unbounded.is_empty() {
        return ApprovalLimit {
            rewritten: 0,
            limited: true,
        };
    }

    let exact = match parse_units(amount, decimals) {
        Ok(exact) => exact,
        Err(e) => {
            tracing::warn!("leaving unbounded approval in place: {}", e);
            return ApprovalLimit {
                rewritten: 0,
                limited: false,
            };
        }
    };

    let [low, high] = exact.to_calldata();
    for index in &unbounded {
        let calldata = &mut calls[*index].calldata;
        calldata[1] = low.clone();
        calldata[2] = high.clone();
    }
    tracing::debug!(count = unbounded.len(), "limited unbounded approvals");

    ApprovalLimit {
        rewritten: unbounded.len(),
        limited: true,
    }
}

fn approval_amount(call: &Call) -> Option<U256> {
    match call.calldata.as_slice() {
        [_, low, high, ..] => U256::from_calldata(low, high),
        _ => None,
    }
}

/// Minimum swap output after slippage, trailing zeros trimmed.
pub fn format_swap_min_amount_out(
    amount_out: &str,
    slippage_percent: Decimal,
) -> Result<String, AmountError> {
    let amount = Decimal::from_str(amount_out.trim())
        .map_err(|_| AmountError::Invalid(amount_out.to_string()))?;
    if amount <= Decimal::ZERO {
        return Err(AmountError::NotPositive(amount_out.to_string()));
    }
    let keep = (Decimal::ONE_HUNDRED - slippage_percent) / Decimal::ONE_HUNDRED;
    let min_out = (amount * keep).max(Decimal::ZERO).normalize();
    Ok(min_out.to_string())
}

/// `0x12345678…abcdef` style truncation for chat summaries.
pub fn short_tx_hash(hash: &str) -> String {
    let hash = hash.trim();
    if hash.chars().count() <= 18 {
        return hash.to_string();
    }
    let head: String = hash.chars().take(10).collect();
    let tail: String = hash
        .chars()
        .rev()
        .take(6)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{head}…{tail}")
}
