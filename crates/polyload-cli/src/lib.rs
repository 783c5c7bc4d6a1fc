//! # polyload-cli
//!
//! Scenario drivers behind the `polyload` binary. A run resolves the client
//! configuration, connects to a node (or starts a development chain with
//! `--dev`), executes one scenario and returns a [`RunReport`].

pub mod args;
pub mod logging;
pub mod report;
pub mod scenario;

use std::sync::Arc;
use std::time::Duration;

use polyload_devchain::{DevChain, DevChainConfig, HOUSEKEEPING_EXTRINSICS};
use polyload_rpc::{ChainApi, RpcClient};
use polyload_submit::Signer;
use polyload_types::Result;
use tracing::info;

pub use args::{Cli, Command};
pub use report::{RunReport, StepReport};
pub use scenario::{OnboardRun, Party, Scenario, SettlementRun};

/// Block interval of the `--dev` chain.
pub const DEV_BLOCK_TIME: Duration = Duration::from_millis(200);

/// Free balance of the CDD key on the `--dev` chain.
pub const DEV_GENESIS_BALANCE: u128 = 1_000_000 * polyload_types::constants::DEFAULT_TRANSFER_AMOUNT;

/// A development chain whose CDD key is [`scenario::CDD_URI`].
#[must_use]
pub fn dev_chain(production: DevChainConfig) -> DevChain {
    let cdd = Signer::dev(scenario::CDD_URI);
    DevChain::start(production.with_cdd_provider(cdd.account(), DEV_GENESIS_BALANCE))
}

/// Run the command `cli` names and report on it.
///
/// # Errors
/// Configuration and connection errors. Failures during the scenario are
/// counted in the report instead.
pub async fn run(cli: &Cli) -> Result<RunReport> {
    let mut config = cli.client_config()?;
    let chain: Arc<dyn ChainApi> = if cli.dev {
        config.drain.housekeeping_extrinsics = HOUSEKEEPING_EXTRINSICS;
        info!(block_time_ms = DEV_BLOCK_TIME.as_millis(), "using development chain");
        Arc::new(dev_chain(DevChainConfig::every(DEV_BLOCK_TIME)))
    } else {
        info!(endpoint = %config.endpoint, "connecting");
        Arc::new(RpcClient::connect(&config).await?)
    };

    let scenario = Scenario::new(chain, &config, &cli.prepend);
    let mut report = RunReport::new();
    scenario.execute(&cli.command, &mut report).await;
    Ok(report)
}
