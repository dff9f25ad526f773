use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] storeline_core::ValidationError),

    #[error(transparent)]
    Config(#[from] storeline_core::ConfigError),

    #[error("warehouse error: {0}")]
    Warehouse(#[from] storeline_warehouse::StoreError),

    #[error(transparent)]
    Pipeline(#[from] storeline_core::PipelineError),

    #[error("run {run_id} failed: {message}")]
    RunFailed { run_id: String, message: String },

    #[error(transparent)]
    Core(#[from] storeline_core::CoreError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Config(_) => 3,
            Self::Warehouse(_) => 4,
            Self::RunFailed { .. } => 5,
            Self::Pipeline(_) | Self::Core(_) | Self::Serialization(_) | Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_and_run_failures_have_distinct_codes() {
        let invalid = CliError::from(storeline_core::ValidationError::InvalidKeyMode {
            value: String::from("quad"),
        });
        let failed = CliError::RunFailed {
            run_id: String::from("ab12cd34"),
            message: String::from("products dataset: disk full"),
        };

        assert_eq!(invalid.exit_code(), 2);
        assert_eq!(failed.exit_code(), 5);
        assert_eq!(
            failed.to_string(),
            "run ab12cd34 failed: products dataset: disk full"
        );
    }
}
