//! Account tiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Account tier selected for an execution.
///
/// Tier 1 is chat and read-only lookups, tier 2 unlocks transparent
/// on-chain execution, tier 3 routes through the privacy relayer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    ReadOnly,
    Standard,
    Private,
}

impl Tier {
    pub fn level(self) -> u8 {
        match self {
            Self::ReadOnly => 1,
            Self::Standard => 2,
            Self::Private => 3,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::ReadOnly),
            2 => Some(Self::Standard),
            3 => Some(Self::Private),
            _ => None,
        }
    }

    /// Tiers at or above 2 execute on-chain actions.
    pub fn executes_onchain(self) -> bool {
        self >= Self::Standard
    }

    /// Tier 3 executions go through the privacy path.
    pub fn uses_privacy_path(self) -> bool {
        self == Self::Private
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        Self::from_level(level).ok_or_else(|| format!("tier must be 1, 2 or 3, got {level}"))
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.level()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.level())
    }
}
