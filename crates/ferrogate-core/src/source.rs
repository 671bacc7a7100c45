use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Stable identifier of an external API provider (`nse`, `polygon`, `exchange-feed-1`).
///
/// Normalized to lowercase on parse.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId(String);

impl ProviderId {
    pub const MAX_LEN: usize = 64;

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_lowercase();

        let Some(first) = normalized.chars().next() else {
            return Err(ValidationError::EmptyProviderId);
        };

        if normalized.len() > Self::MAX_LEN {
            return Err(ValidationError::ProviderIdTooLong {
                len: normalized.len(),
                max: Self::MAX_LEN,
            });
        }

        if !first.is_ascii_alphanumeric() {
            return Err(ValidationError::ProviderIdInvalidStart { ch: first });
        }

        for (index, ch) in normalized.chars().enumerate() {
            let allowed = ch.is_ascii_lowercase()
                || ch.is_ascii_digit()
                || matches!(ch, '.' | '-' | '_');
            if !allowed {
                return Err(ValidationError::ProviderIdInvalidChar { ch, index });
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
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
        Self::parse(value)
    }
}

impl TryFrom<String> for ProviderId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ProviderId> for String {
    fn from(value: ProviderId) -> Self {
        value.0
    }
}
