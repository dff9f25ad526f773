mod ledger;
mod run;

use serde_json::Value;
use storeline_core::PipelineConfig;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// JSON printed on stdout plus the failure, if any, that decides the exit code.
pub struct CommandOutput {
    pub data: Value,
    pub failure: Option<CliError>,
}

impl CommandOutput {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            failure: None,
        }
    }

    pub fn failed(data: Value, failure: CliError) -> Self {
        Self {
            data,
            failure: Some(failure),
        }
    }
}

pub async fn run(cli: &Cli) -> Result<CommandOutput, CliError> {
    let config = PipelineConfig::load(&cli.config)?;

    match &cli.command {
        Command::Run(args) => run::run(args, config).await,
        Command::Ledger(args) => ledger::run(args, &config),
    }
}
