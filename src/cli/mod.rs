//! Command-line surface for operators.
//!
//! The binary does not hold wallet keys, so it only exposes offline
//! inspection commands and diagnostics.

mod doctor;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;

pub use self::doctor::run_doctor_command;

use crate::agent::calls::{Chain, decimal_to_units};
use crate::agent::classifier::{CommandClass, CommandClassifier};
use crate::agent::pipeline::{BRIDGE_PAIRS, validate_bridge_pair};
use crate::agent::tier::Tier;
use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "carel-agent", version, about = "Tier-gated CAREL command orchestrator")]
pub struct Cli {
    /// Explicit TOML config file (defaults to ~/.carel-agent/config.toml).
    #[arg(long, global = true, env = "CAREL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show how a message would be routed under a tier.
    Classify {
        #[arg(long, value_parser = parse_tier)]
        tier: Tier,
        text: String,
    },
    /// Check whether a bridge route is supported.
    CheckPair {
        #[arg(long)]
        from_chain: ChainArg,
        #[arg(long)]
        to_chain: ChainArg,
        from_token: String,
        to_token: String,
    },
    /// Encode a decimal amount as u256 calldata.
    EncodeAmount { amount: Decimal, decimals: u32 },
    /// Print the resolved configuration with secrets redacted.
    Config,
    /// Probe configuration and backend reachability.
    Doctor {
        /// Exit non-zero when any check fails.
        #[arg(long)]
        strict: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ChainArg {
    Starknet,
    Ethereum,
    Bitcoin,
}

impl From<ChainArg> for Chain {
    fn from(arg: ChainArg) -> Self {
        match arg {
            ChainArg::Starknet => Chain::Starknet,
            ChainArg::Ethereum => Chain::Ethereum,
            ChainArg::Bitcoin => Chain::Bitcoin,
        }
    }
}

fn parse_tier(raw: &str) -> Result<Tier, String> {
    let level: u8 = raw
        .trim()
        .parse()
        .map_err(|_| format!("tier must be 1, 2 or 3, got '{raw}'"))?;
    Tier::try_from(level)
}

/// Execute a parsed command.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Classify { tier, text } => {
            let config = Config::from_env_with_toml(cli.config.as_deref())?;
            let classifier = CommandClassifier::new(config.features.bridge_on_tier3);
            println!("{}", describe_class(&classifier.classify(tier, &text)));
        }
        Command::CheckPair {
            from_chain,
            to_chain,
            from_token,
            to_token,
        } => match validate_bridge_pair(from_chain.into(), to_chain.into(), &from_token, &to_token) {
            Ok(()) => println!("supported"),
            Err(e) => {
                println!("{e}");
                println!("Supported routes:");
                for pair in BRIDGE_PAIRS {
                    println!("  {pair}");
                }
            }
        },
        Command::EncodeAmount { amount, decimals } => {
            let [low, high] = decimal_to_units(amount, decimals)?.to_calldata();
            println!("low:  {low}");
            println!("high: {high}");
        }
        Command::Config => {
            let config = Config::from_env_with_toml(cli.config.as_deref())?;
            print_config(&config);
        }
        Command::Doctor { strict } => run_doctor_command(cli.config.as_deref(), strict).await?,
    }
    Ok(())
}

fn describe_class(class: &CommandClass) -> String {
    match class {
        CommandClass::Conversational => "conversational".to_string(),
        CommandClass::Onchain => "on-chain (requires confirmation)".to_string(),
        CommandClass::Blocked(reply) => format!("blocked: {reply}"),
    }
}

fn print_config(config: &Config) {
    let address = |value: &Option<String>| value.clone().unwrap_or_else(|| "(unset)".to_string());
    let contracts = &config.contracts;
    println!("[contracts]");
    println!("  executor          = {}", address(&contracts.executor_address));
    println!("  carel_token       = {}", address(&contracts.carel_token_address));
    println!("  privacy_router    = {}", address(&contracts.privacy_router_address));
    println!("  limit_order_book  = {}", address(&contracts.limit_order_book_address));
    for (symbol, pool) in &contracts.staking_pools {
        println!("  pool.{symbol:<12} = {pool}");
    }
    for (symbol, token) in &contracts.tokens {
        println!("  token.{symbol:<11} = {} ({} decimals)", token.address, token.decimals);
    }

    println!("[features]");
    println!("  strict_shielded_pool      = {}", config.features.strict_shielded_pool);
    println!("  bridge_on_tier3           = {}", config.features.bridge_on_tier3);
    println!("  fresh_setup_per_execution = {}", config.features.fresh_setup_per_execution);

    println!("[tiers]");
    println!("  tier2_burn_carel      = {}", config.tiers.tier2_burn_carel);
    println!("  tier3_burn_carel      = {}", config.tiers.tier3_burn_carel);
    println!("  swap_slippage_percent = {}", config.tiers.swap_slippage_percent);

    println!("[backend]");
    println!("  base_url = {}", config.backend.base_url);
    println!("  timeout  = {:?}", config.backend.timeout);
    let token = config
        .backend
        .token
        .as_ref()
        .map(|_| "[REDACTED]")
        .unwrap_or("(unset)");
    println!("  token    = {token}");
}
