//! Append-only run ledger (one JSON object per line).

use std::fmt::{Display, Formatter};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{CoreError, ProviderId, UtcDateTime, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

impl RunStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(ValidationError::InvalidRunStatus {
                value: other.to_owned(),
            }),
        }
    }
}

/// Summary of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLedgerEntry {
    pub run_id: String,
    pub started_at: UtcDateTime,
    pub finished_at: UtcDateTime,
    pub status: RunStatus,
    pub raw_files_count: u64,
    pub new_products: u64,
    pub updated_products: u64,
    pub new_orders: u64,
    pub updated_orders: u64,
    pub providers: Vec<ProviderId>,
    /// Message of the failure that flipped the run to `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Line-delimited JSON sink. Entries are only ever appended.
#[derive(Debug)]
pub struct RunLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RunLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &RunLedgerEntry) -> Result<(), CoreError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| io::Error::other("run ledger lock poisoned"))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Every readable entry in append order. A missing file is an empty ledger.
    pub fn entries(&self) -> Result<Vec<RunLedgerEntry>, CoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut entries = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunLedgerEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(error) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    %error,
                    "skipping malformed run ledger line"
                ),
            }
        }
        Ok(entries)
    }
}
