//! Client-side orchestrator for tier-gated CAREL on-chain commands.
//!
//! A chat message is classified against the account tier, held behind an
//! explicit confirmation, bound to an on-chain action id, and executed
//! through the swap, bridge, staking, or limit-order pipeline. Wallets,
//! the backend, the privacy relayer, and the command interpreter are
//! reached through the traits in [`backend`].

pub mod agent;
pub mod backend;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod error;
pub mod settings;

pub use agent::{Collaborators, Orchestrator, Tier, WalletAccounts};
pub use backend::HttpBackend;
pub use config::Config;
pub use error::{Error, ExecutionError, Result};
