use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ValidationError;

/// Identifier tying one guarded call to its telemetry entry.
///
/// Caller-supplied values must be 1-64 printable ASCII characters; generated values
/// are UUID v4.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationId(String);

impl CorrelationId {
    pub const MAX_LEN: usize = 64;

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        if input.is_empty() {
            return Err(ValidationError::EmptyCorrelationId);
        }
        if input.len() > Self::MAX_LEN {
            return Err(ValidationError::CorrelationIdTooLong {
                len: input.len(),
                max: Self::MAX_LEN,
            });
        }
        if let Some(index) = input.bytes().position(|byte| !byte.is_ascii_graphic()) {
            return Err(ValidationError::CorrelationIdInvalidChar { index });
        }

        Ok(Self(input.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::generate()
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorrelationId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for CorrelationId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CorrelationId> for String {
    fn from(value: CorrelationId) -> Self {
        value.0
    }
}
