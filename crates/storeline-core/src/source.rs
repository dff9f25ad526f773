use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Canonical provider identifiers used in records, cache namespaces and the run ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Shopify,
    Amazon,
    Ebay,
    Mock,
}

impl ProviderId {
    pub const ALL: [Self; 4] = [Self::Shopify, Self::Amazon, Self::Ebay, Self::Mock];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shopify => "shopify",
            Self::Amazon => "amazon",
            Self::Ebay => "ebay",
            Self::Mock => "mock",
        }
    }

    /// Environment variable that overrides the configured request rate.
    pub const fn rps_env(self) -> &'static str {
        match self {
            Self::Shopify => "SHOPIFY_RPS",
            Self::Amazon => "AMAZON_RPS",
            Self::Ebay => "EBAY_RPS",
            Self::Mock => "MOCK_RPS",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "shopify" => Ok(Self::Shopify),
            "amazon" => Ok(Self::Amazon),
            "ebay" => Ok(Self::Ebay),
            "mock" => Ok(Self::Mock),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}
