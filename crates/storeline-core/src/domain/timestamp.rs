use std::fmt::{Display, Formatter};
use std::time::SystemTime;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::ValidationError;

/// RFC3339 timestamp guaranteed to be UTC.
///
/// Ordering follows the instant, not the textual form: `2024-01-01T00:00:09Z`
/// sorts before `2024-01-01T00:00:09.5Z` even though the strings compare the other way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn from_system_time(value: SystemTime) -> Self {
        Self(OffsetDateTime::from(value).to_offset(UtcOffset::UTC))
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let parsed = OffsetDateTime::parse(input, &Rfc3339).map_err(|_| {
            ValidationError::TimestampNotUtc {
                value: input.to_owned(),
            }
        })?;

        Self::from_offset_datetime(parsed).map_err(|_| ValidationError::TimestampNotUtc {
            value: input.to_owned(),
        })
    }

    pub fn from_offset_datetime(value: OffsetDateTime) -> Result<Self, ValidationError> {
        if value.offset() != UtcOffset::UTC {
            return Err(ValidationError::TimestampNotUtc {
                value: value
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| String::from("<unformattable>")),
            });
        }

        Ok(Self(value))
    }

    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .expect("UtcDateTime must be RFC3339 formattable")
    }

    /// Filesystem-safe rendering used in archive file names.
    pub fn file_stamp(self) -> String {
        self.format_rfc3339().replace([':', '.'], "-")
    }
}

impl Display for UtcDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.format_rfc3339())
    }
}

impl<'de> Deserialize<'de> for UtcDateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_utc_timestamp() {
        let parsed = UtcDateTime::parse("2024-01-01T00:00:00Z").expect("must parse");
        assert_eq!(parsed.format_rfc3339(), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn rejects_non_utc_timestamp() {
        let err = UtcDateTime::parse("2024-01-01T01:00:00+01:00").expect_err("must fail");
        assert!(matches!(err, ValidationError::TimestampNotUtc { .. }));
    }

    #[test]
    fn orders_by_instant_not_text() {
        let whole = UtcDateTime::parse("2024-01-01T00:00:09Z").expect("must parse");
        let fractional = UtcDateTime::parse("2024-01-01T00:00:09.5Z").expect("must parse");
        let later = UtcDateTime::parse("2024-01-01T00:00:10Z").expect("must parse");

        assert!(whole < fractional);
        assert!(fractional < later);
        // string order disagrees with the instants here
        assert!("2024-01-01T00:00:09Z" > "2024-01-01T00:00:09.5Z");
    }

    #[test]
    fn file_stamp_has_no_separators() {
        let parsed = UtcDateTime::parse("2024-03-05T10:11:12Z").expect("must parse");
        assert_eq!(parsed.file_stamp(), "2024-03-05T10-11-12Z");
    }
}
