//! psmixd: operator tool for the PrivateSend mixing core.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use ps_mnlist::{BlockHeader, ChainHeaders, MnListDiffEngine, MnListStore};
use ps_session::{init_logging, LogFormat, MixingConfig};
use ps_types::{format_coins, DenomsMethod, Duffs, NetworkId, PS_DENOMS_VALS};
use ps_utils::EventBus;
use ps_wallet_core::{calc_tx_fee, calc_tx_size, DenominationPlanner, Holdings};

#[derive(Parser)]
#[command(name = "psmixd", about = "PrivateSend mixing core operator tool")]
struct Cli {
    /// Network: "mainnet", "testnet" or "regtest".
    /// Defaults to the config file's value when a file is given.
    #[arg(long, env = "PSMIX_NETWORK")]
    network: Option<String>,

    /// Directory holding masternode list files and the PS keystore.
    #[arg(long, env = "PSMIX_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "PSMIX_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "PSMIX_LOG_FORMAT")]
    log_format: Option<String>,

    /// Path to a TOML configuration file. Flags and env vars override it.
    #[arg(long, env = "PSMIX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Masternode list maintenance.
    Mnlist {
        #[command(subcommand)]
        action: MnListAction,
    },
    /// Print the new-denoms transactions needed to reach a target.
    Plan {
        /// Whole coins to keep denominated (defaults to the config value).
        #[arg(long)]
        keep_amount: Option<u64>,
        /// Values in duffs of the coins that would fund the plan.
        /// Without them the full plan is printed.
        #[arg(long, value_delimiter = ',')]
        coins: Vec<Duffs>,
    },
    /// Estimate the fee of a transaction.
    Fee {
        #[arg(long)]
        inputs: u64,
        #[arg(long)]
        outputs: u64,
        /// Assume maximum-size signatures.
        #[arg(long)]
        max_size: bool,
        /// Fee rate in duffs per kB (defaults to the config value).
        #[arg(long)]
        fee_per_kb: Option<Duffs>,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[derive(clap::Subcommand)]
enum MnListAction {
    /// Drop all masternode and quorum data so it is loaded again from height 1.
    Reset,
    /// Print stored list heights and sizes.
    Status,
}

/// Header source for commands that run without a wallet.
struct NoChain;

impl ChainHeaders for NoChain {
    fn read_header(&self, _height: u32) -> Option<BlockHeader> {
        None
    }

    fn local_height(&self) -> u32 {
        0
    }

    fn server_height(&self) -> u32 {
        0
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<MixingConfig> {
    let mut config = match &cli.config {
        Some(path) => MixingConfig::from_toml_file(path)?,
        None => MixingConfig::default(),
    };
    if let Some(network) = &cli.network {
        config.network = network.parse::<NetworkId>()?;
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.log_format = format.parse::<LogFormat>()?;
    }
    config.validate()?;
    Ok(config)
}

fn mnlist_engine(config: &MixingConfig) -> MnListDiffEngine {
    MnListDiffEngine::new(
        config.to_mnlist_config(),
        MnListStore::new(&config.data_dir),
        Arc::new(NoChain),
        EventBus::new(),
    )
}

fn print_plan(plan: &[Vec<Duffs>]) {
    if plan.is_empty() {
        println!("target already reached");
        return;
    }
    let mut total = 0;
    for (i, batch) in plan.iter().enumerate() {
        let counts: Vec<String> = PS_DENOMS_VALS
            .iter()
            .map(|d| (d, batch.iter().filter(|v| *v == d).count()))
            .filter(|(_, n)| *n > 0)
            .map(|(d, n)| format!("{} x {}", n, format_coins(*d)))
            .collect();
        let value: Duffs = batch.iter().sum();
        total += value;
        println!("tx {}: {} ({})", i + 1, counts.join(", "), format_coins(value));
    }
    println!("total: {} in {} transactions", format_coins(total), plan.len());
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    if let Err(e) = init_logging(config.log_format, &config.log_level) {
        ps_utils::init_tracing();
        tracing::warn!(error = %e, "falling back to default logging");
    }

    match cli.command {
        Command::Mnlist { action: MnListAction::Reset } => {
            mnlist_engine(&config).reset();
            tracing::info!(data_dir = %config.data_dir.display(), "masternode list reset");
            println!("masternode list reset to height 1");
        }
        Command::Mnlist { action: MnListAction::Status } => {
            let engine = mnlist_engine(&config);
            let snapshot = engine.snapshot();
            println!("network:       {}", config.network.as_str());
            println!("protx height:  {}", snapshot.protx_height);
            println!("llmq height:   {}", engine.llmq_human_height());
            println!("masternodes:   {} ({} valid)", snapshot.masternodes.len(), snapshot.valid_count());
            println!("quorums:       {}", snapshot.quorums.len());
            println!("missing info:  {}", engine.hashes_missing_info().len());
        }
        Command::Plan { keep_amount, coins } => {
            let mut target = config.plan_target();
            if let Some(keep) = keep_amount {
                target.method = DenomsMethod::KeepAmount;
                target.keep_amount = keep;
            }
            let planner =
                DenominationPlanner::new(config.params.max_denoms_per_tier, config.fee_per_kb, target);
            let plan = if coins.is_empty() {
                planner.calc_need_denoms_amounts(&Holdings::empty(), true)
            } else {
                let holdings = Holdings {
                    available: coins.iter().sum(),
                    n_inputs: coins.len() as u64,
                    ..Holdings::empty()
                };
                planner.calc_need_denoms_amounts(&holdings, false)
            };
            print_plan(&plan);
        }
        Command::Fee { inputs, outputs, max_size, fee_per_kb } => {
            let rate = fee_per_kb.unwrap_or(config.fee_per_kb);
            let size = calc_tx_size(inputs, outputs, max_size);
            let fee = calc_tx_fee(inputs, outputs, rate, max_size);
            println!("size: {} bytes", size);
            println!("fee:  {} duffs ({})", fee, format_coins(fee));
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}
