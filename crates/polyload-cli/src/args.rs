//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use polyload_types::{ClientConfig, Confirmation, Result, constants};

#[derive(Debug, Clone, Parser)]
#[command(name = constants::TOOL_NAME, version = constants::VERSION)]
#[command(about = "Drive identity, asset and settlement load against a ledger node")]
pub struct Cli {
    /// Node WebSocket endpoint. Overrides the config file.
    #[arg(long, env = constants::ENDPOINT_ENV_VAR, global = true)]
    pub endpoint: Option<String>,

    /// JSON client configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Run against an in-process development chain instead of a node.
    #[arg(long, global = true)]
    pub dev: bool,

    /// Broadcast without tracking inclusion; wait on the chain instead.
    #[arg(long, global = true)]
    pub fast: bool,

    /// Wait for finality rather than block inclusion.
    #[arg(long, global = true)]
    pub finalized: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Prefix for generated key URIs and tickers, so repeated runs against
    /// the same chain do not collide.
    #[arg(long, short, default_value = "", global = true)]
    pub prepend: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Fund freshly generated accounts from `//Alice`.
    Transfer {
        #[arg(long, short = 'n', default_value_t = 5)]
        accounts: usize,
        /// Amount per account, in base units.
        #[arg(long, default_value_t = constants::DEFAULT_TRANSFER_AMOUNT)]
        amount: u128,
    },
    /// Create identities, attach signing keys and add claims.
    Onboard {
        #[arg(long, short = 'n', default_value_t = 5)]
        accounts: usize,
        /// Claims added to every identity.
        #[arg(long, short, default_value_t = 10)]
        claims: usize,
    },
    /// Two-party settlement round trip plus a rejected instruction.
    Settle,
    /// One instruction across five parties and two assets.
    SettleGroup,
}

impl Cli {
    /// Resolve the client configuration: file or defaults, then
    /// `WS_PROVIDER` and `--endpoint`, then the boolean flags.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)?,
            None => ClientConfig::default(),
        }
        .with_endpoint_override(self.endpoint.clone());
        if self.fast {
            config.fast = true;
        }
        if self.finalized {
            config.confirmation = Confirmation::Finalized;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "polyload",
            "--endpoint",
            "ws://node:9944",
            "--finalized",
            "--fast",
            "transfer",
            "-n",
            "3",
        ]);
        let config = cli.client_config().unwrap();
        assert_eq!(config.endpoint, "ws://node:9944");
        assert_eq!(config.confirmation, Confirmation::Finalized);
        assert!(config.fast);
        assert!(matches!(
            cli.command,
            Command::Transfer {
                accounts: 3,
                amount: constants::DEFAULT_TRANSFER_AMOUNT
            }
        ));
    }

    #[test]
    fn global_flags_after_the_subcommand() {
        let cli = Cli::parse_from(["polyload", "settle-group", "--dev", "-p", "run7"]);
        assert!(cli.dev);
        assert_eq!(cli.prepend, "run7");
        assert!(matches!(cli.command, Command::SettleGroup));
    }

    #[test]
    fn rejects_http_endpoint() {
        let cli = Cli::parse_from(["polyload", "--endpoint", "http://node", "settle"]);
        assert_eq!(cli.client_config().unwrap_err().code(), "PL_ERR_105");
    }
}
