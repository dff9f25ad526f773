use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use storeline_core::{
    KeyMode, Pipeline, PipelineConfig, ProviderId, ReqwestHttpClient, RunOptions, RunReport,
    RunStatus,
};
use storeline_warehouse::{Warehouse, WarehouseConfig};

use crate::cli::RunArgs;
use crate::error::CliError;

use super::CommandOutput;

#[derive(Debug, Serialize)]
struct ProviderSummary {
    provider: ProviderId,
    status: &'static str,
    captures: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    run_id: String,
    status: RunStatus,
    key_mode: KeyMode,
    dry_run: bool,
    started_at: String,
    finished_at: String,
    raw_files: Vec<PathBuf>,
    new_products: usize,
    updated_products: usize,
    new_orders: usize,
    updated_orders: usize,
    providers: Vec<ProviderSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<RunReport> for RunSummary {
    fn from(report: RunReport) -> Self {
        Self {
            run_id: report.run_id,
            status: report.status,
            key_mode: report.key_mode,
            dry_run: report.dry_run,
            started_at: report.started_at.format_rfc3339(),
            finished_at: report.finished_at.format_rfc3339(),
            raw_files: report.raw_files,
            new_products: report.new_products,
            updated_products: report.updated_products,
            new_orders: report.new_orders,
            updated_orders: report.updated_orders,
            providers: report
                .providers
                .into_iter()
                .map(|provider| ProviderSummary {
                    provider: provider.provider,
                    status: provider.status.as_str(),
                    captures: provider.captures,
                    error: provider.error,
                })
                .collect(),
            error: report.error,
        }
    }
}

pub async fn run(args: &RunArgs, config: PipelineConfig) -> Result<CommandOutput, CliError> {
    let options = run_options(args)?;
    let warehouse = Warehouse::open(WarehouseConfig::at(&config.paths.warehouse_path))?;
    let pipeline = Pipeline::new(
        config,
        Arc::new(ReqwestHttpClient::new()),
        Arc::new(warehouse),
    );

    let report = pipeline.run(&options).await?;
    let failure = (report.status == RunStatus::Error).then(|| CliError::RunFailed {
        run_id: report.run_id.clone(),
        message: report.error.clone().unwrap_or_default(),
    });
    let data = serde_json::to_value(RunSummary::from(report))?;

    Ok(match failure {
        Some(failure) => CommandOutput::failed(data, failure),
        None => CommandOutput::ok(data),
    })
}

fn run_options(args: &RunArgs) -> Result<RunOptions, CliError> {
    let providers = if args.providers.is_empty() {
        None
    } else {
        Some(
            args.providers
                .iter()
                .map(|name| name.trim().parse::<ProviderId>())
                .collect::<Result<Vec<_>, _>>()?,
        )
    };

    Ok(RunOptions {
        run_id: args.run_id.clone(),
        providers,
        dry_run: args.dry_run,
        no_cache: args.no_cache,
        limit: args.limit,
        ttl: args.ttl.map(Duration::from_secs),
        key_mode: args.key_mode.parse()?,
        fake: args.fake,
        fake_only: args.fake_only,
        seed: args.seed,
    })
}
