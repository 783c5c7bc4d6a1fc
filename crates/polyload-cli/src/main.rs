use std::process::ExitCode;

use clap::Parser;
use polyload_cli::{Cli, logging, run};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.json_logs);

    match run(&cli).await {
        Ok(report) => {
            if cli.json_logs {
                match serde_json::to_string(&report) {
                    Ok(json) => println!("{json}"),
                    Err(e) => error!(error = %e, "report serialisation failed"),
                }
            } else {
                println!("{report}");
            }
            if report.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!(code = e.code(), error = %e, "run aborted");
            ExitCode::FAILURE
        }
    }
}
