use serde::Serialize;
use storeline_core::{PipelineConfig, RunLedger, RunLedgerEntry};

use crate::cli::LedgerArgs;
use crate::error::CliError;

use super::CommandOutput;

#[derive(Debug, Serialize)]
struct LedgerResponseData {
    path: String,
    total: usize,
    entries: Vec<RunLedgerEntry>,
}

pub fn run(args: &LedgerArgs, config: &PipelineConfig) -> Result<CommandOutput, CliError> {
    let ledger = RunLedger::new(config.paths.ledger_path.clone());
    let mut entries = ledger.entries()?;
    let total = entries.len();

    if let Some(last) = args.last {
        entries.drain(..total.saturating_sub(last));
    }

    let data = serde_json::to_value(LedgerResponseData {
        path: ledger.path().display().to_string(),
        total,
        entries,
    })?;
    Ok(CommandOutput::ok(data))
}
