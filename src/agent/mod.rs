//! Core orchestration for tier-gated on-chain commands.
//!
//! User text flows through the [`classifier`], the [`confirmation`] gate,
//! the [`action_id`] lifecycle manager, and finally the [`pipeline`]. The
//! [`orchestrator`] ties these together for one session.

pub mod action_id;
pub mod calls;
pub mod classifier;
pub mod confirmation;
pub mod intent;
pub mod orchestrator;
pub mod pipeline;
pub mod preflight;
pub mod recovery;
pub mod tier;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use self::action_id::{ActionId, ActionIdManager, ActionIdStatus, ActionIdView, ActionResolution, ResolveOptions};
pub use self::calls::{Call, CallBatch, Chain};
pub use self::classifier::{CommandClass, CommandClassifier, requires_onchain_action};
pub use self::confirmation::{ConfirmationGate, ConfirmationState, GateDecision};
pub use self::intent::{Intent, IntentParse};
pub use self::orchestrator::{ChatMessage, ChatRole, Orchestrator};
pub use self::pipeline::{ExecutionOutcome, ExecutionPath, ExecutionPipeline};
pub use self::tier::Tier;

use crate::backend::{
    AuthorizationBackend, CommandInterpreter, ExecutionBackend, NotificationSink, PrivacyProofService,
    PrivacyRelayer, QuoteService, TracingNotificationSink, UtxoWallet, WalletProvider, WalletSigner,
};
use crate::error::ExecutionError;

/// External services the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub interpreter: Arc<dyn CommandInterpreter>,
    pub authorization: Arc<dyn AuthorizationBackend>,
    pub execution: Arc<dyn ExecutionBackend>,
    pub quotes: Arc<dyn QuoteService>,
    pub proofs: Arc<dyn PrivacyProofService>,
    pub relayer: Arc<dyn PrivacyRelayer>,
    pub wallet: Arc<dyn WalletSigner>,
    pub utxo_wallet: Option<Arc<dyn UtxoWallet>>,
    pub notifier: Arc<dyn NotificationSink>,
}

impl Collaborators {
    /// Use one backend for every server-side contract.
    ///
    /// Notifications go to [`TracingNotificationSink`] until replaced.
    pub fn from_backend<B>(
        backend: Arc<B>,
        interpreter: Arc<dyn CommandInterpreter>,
        wallet: Arc<dyn WalletSigner>,
    ) -> Self
    where
        B: AuthorizationBackend
            + ExecutionBackend
            + QuoteService
            + PrivacyProofService
            + PrivacyRelayer
            + 'static,
    {
        Self {
            interpreter,
            authorization: backend.clone(),
            execution: backend.clone(),
            quotes: backend.clone(),
            proofs: backend.clone(),
            relayer: backend,
            wallet,
            utxo_wallet: None,
            notifier: Arc::new(TracingNotificationSink),
        }
    }

    pub fn with_utxo_wallet(mut self, wallet: Arc<dyn UtxoWallet>) -> Self {
        self.utxo_wallet = Some(wallet);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }
}

/// Connected wallet addresses for the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAccounts {
    pub starknet: Option<String>,
    pub ethereum: Option<String>,
    pub bitcoin: Option<String>,
    /// Wallet used for Starknet signatures.
    pub provider: WalletProvider,
}

impl WalletAccounts {
    pub fn starknet(address: impl Into<String>, provider: WalletProvider) -> Self {
        Self {
            starknet: Some(address.into()),
            ethereum: None,
            bitcoin: None,
            provider,
        }
    }

    pub fn with_ethereum(mut self, address: impl Into<String>) -> Self {
        self.ethereum = Some(address.into());
        self
    }

    pub fn with_bitcoin(mut self, address: impl Into<String>) -> Self {
        self.bitcoin = Some(address.into());
        self
    }

    pub fn address(&self, chain: Chain) -> Option<&str> {
        let address = match chain {
            Chain::Starknet => self.starknet.as_deref(),
            Chain::Ethereum => self.ethereum.as_deref(),
            Chain::Bitcoin => self.bitcoin.as_deref(),
        };
        address.filter(|a| !a.trim().is_empty())
    }

    pub fn require(&self, chain: Chain) -> Result<&str, ExecutionError> {
        self.address(chain).ok_or(ExecutionError::WalletNotConnected {
            chain: chain.wallet_label(),
        })
    }

    pub fn provider_for(&self, chain: Chain) -> WalletProvider {
        match chain {
            Chain::Starknet => self.provider,
            Chain::Ethereum => WalletProvider::Metamask,
            Chain::Bitcoin => WalletProvider::Xverse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_wallet_names_the_chain() {
        let accounts = WalletAccounts::starknet("0xuser", WalletProvider::ArgentX).with_ethereum(" ");
        assert_eq!(accounts.require(Chain::Starknet).unwrap(), "0xuser");
        assert!(matches!(
            accounts.require(Chain::Ethereum),
            Err(ExecutionError::WalletNotConnected { chain: "Ethereum" })
        ));
        assert_eq!(accounts.provider_for(Chain::Bitcoin), WalletProvider::Xverse);
    }
}
