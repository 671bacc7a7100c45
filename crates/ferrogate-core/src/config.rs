//! Gateway configuration loaded from TOML.
//!
//! ```toml
//! [defaults]
//! max_failures = 5
//! reset_timeout_ms = 60000
//! request_timeout_ms = 10000
//! failure_statuses = ["400-599"]
//! max_cas_attempts = 3
//!
//! [providers.nse]
//! max_failures = 3
//! failure_statuses = ["429", "500-599"]
//! ```
//!
//! Provider sections override individual default fields. All values are validated
//! on load and every problem is reported, not just the first.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::retry::CasRetryPolicy;
use crate::{BreakerSettings, ProviderId, ValidationError};

/// Response statuses classified as failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureStatuses(Vec<RangeInclusive<u16>>);

impl Default for FailureStatuses {
    fn default() -> Self {
        Self(vec![400..=599])
    }
}

impl FailureStatuses {
    /// Parse entries like `"503"` or `"500-599"`.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, ValidationError> {
        entries
            .iter()
            .map(|entry| parse_range(entry.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn contains(&self, status: u16) -> bool {
        self.0.iter().any(|range| range.contains(&status))
    }
}

impl Display for FailureStatuses {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|range| {
                if range.start() == range.end() {
                    range.start().to_string()
                } else {
                    format!("{}-{}", range.start(), range.end())
                }
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}

fn parse_range(value: &str) -> Result<RangeInclusive<u16>, ValidationError> {
    let invalid = || ValidationError::InvalidStatusRange {
        value: value.to_owned(),
    };
    let code = |part: &str| {
        part.trim()
            .parse::<u16>()
            .ok()
            .filter(|code| (100..=599).contains(code))
            .ok_or_else(invalid)
    };

    let range = match value.split_once('-') {
        Some((low, high)) => code(low)?..=code(high)?,
        None => {
            let single = code(value)?;
            single..=single
        }
    };
    if range.start() > range.end() {
        return Err(invalid());
    }
    Ok(range)
}

/// Slack between the longest trial call and the moment its claim may be taken over.
pub const TRIAL_LEASE_MARGIN: Duration = Duration::from_secs(1);

/// Effective settings for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub breaker: BreakerSettings,
    /// Used when a request carries no timeout of its own.
    pub request_timeout: Duration,
    pub failure_statuses: FailureStatuses,
    pub cas_retry: CasRetryPolicy,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            breaker: BreakerSettings::default(),
            request_timeout: Duration::from_secs(10),
            failure_statuses: FailureStatuses::default(),
            cas_retry: CasRetryPolicy::default(),
        }
    }
}

impl ProviderSettings {
    /// How long a half-open trial claim stays exclusive: the longer of the reset
    /// timeout and the request timeout, plus [`TRIAL_LEASE_MARGIN`].
    pub fn trial_lease(&self) -> Duration {
        self.breaker
            .reset_timeout
            .max(self.request_timeout)
            .saturating_add(TRIAL_LEASE_MARGIN)
    }
}

/// One configuration problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub field: String,
    pub error: ValidationError,
}

impl Display for ConfigIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.error)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {}", join_issues(.0))]
    Validation(Vec<ConfigIssue>),
}

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    defaults: RawProviderSettings,
    #[serde(default)]
    providers: BTreeMap<String, RawProviderSettings>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProviderSettings {
    max_failures: Option<u32>,
    reset_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    failure_statuses: Option<Vec<String>>,
    max_cas_attempts: Option<u32>,
}

impl RawProviderSettings {
    fn resolve(
        &self,
        base: &ProviderSettings,
        scope: &str,
        issues: &mut Vec<ConfigIssue>,
    ) -> ProviderSettings {
        let mut settings = base.clone();
        let mut report = |field: &str, error: ValidationError| {
            issues.push(ConfigIssue {
                field: format!("{scope}.{field}"),
                error,
            });
        };

        if let Some(max_failures) = self.max_failures {
            settings.breaker.max_failures = max_failures;
        }
        if let Some(reset_timeout_ms) = self.reset_timeout_ms {
            settings.breaker.reset_timeout = Duration::from_millis(reset_timeout_ms);
        }
        if let Err(error) = settings.breaker.validate() {
            report("breaker", error);
        }

        if let Some(request_timeout_ms) = self.request_timeout_ms {
            if request_timeout_ms == 0 {
                report(
                    "request_timeout_ms",
                    ValidationError::NotPositive {
                        field: "request_timeout_ms",
                    },
                );
            } else {
                settings.request_timeout = Duration::from_millis(request_timeout_ms);
            }
        }

        if let Some(entries) = &self.failure_statuses {
            match FailureStatuses::parse(entries) {
                Ok(statuses) => settings.failure_statuses = statuses,
                Err(error) => report("failure_statuses", error),
            }
        }

        if let Some(max_cas_attempts) = self.max_cas_attempts {
            match CasRetryPolicy::new(max_cas_attempts) {
                Ok(policy) => settings.cas_retry = policy.with_backoff(settings.cas_retry.backoff),
                Err(error) => report("max_cas_attempts", error),
            }
        }

        settings
    }
}

/// Validated gateway configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayConfig {
    pub defaults: ProviderSettings,
    pub providers: BTreeMap<ProviderId, ProviderSettings>,
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content)?;
        let mut issues = Vec::new();

        let defaults = raw
            .defaults
            .resolve(&ProviderSettings::default(), "defaults", &mut issues);

        let mut providers = BTreeMap::new();
        for (name, overrides) in &raw.providers {
            let scope = format!("providers.{name}");
            match ProviderId::parse(name) {
                Ok(provider) => {
                    let settings = overrides.resolve(&defaults, &scope, &mut issues);
                    providers.insert(provider, settings);
                }
                Err(error) => issues.push(ConfigIssue { field: scope, error }),
            }
        }

        if !issues.is_empty() {
            return Err(ConfigError::Validation(issues));
        }

        Ok(Self {
            defaults,
            providers,
        })
    }

    /// Settings for `provider`: its own section if present, otherwise the defaults.
    pub fn settings_for(&self, provider: &ProviderId) -> ProviderSettings {
        self.providers
            .get(provider)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    pub fn provider_ids(&self) -> impl Iterator<Item = &ProviderId> {
        self.providers.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_lease_covers_the_request_timeout() {
        let config = GatewayConfig::from_toml_str(
            "[defaults]\nreset_timeout_ms = 1000\nrequest_timeout_ms = 5000\n",
        )
        .expect("valid");

        assert_eq!(config.defaults.trial_lease(), Duration::from_secs(6));
        assert_eq!(
            ProviderSettings::default().trial_lease(),
            Duration::from_secs(61)
        );
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = GatewayConfig::from_toml_str("").expect("valid");

        assert_eq!(config.defaults.breaker.max_failures, 5);
        assert_eq!(config.defaults.breaker.reset_timeout, Duration::from_secs(60));
        assert_eq!(config.defaults.request_timeout, Duration::from_secs(10));
        assert_eq!(config.defaults.cas_retry.max_attempts, 3);
        assert!(config.defaults.failure_statuses.contains(404));
        assert!(!config.defaults.failure_statuses.contains(302));
    }

    #[test]
    fn provider_sections_override_individual_fields() {
        let config = GatewayConfig::from_toml_str(
            r#"
[defaults]
reset_timeout_ms = 30000

[providers.NSE]
max_failures = 3
failure_statuses = ["429", "500-599"]
"#,
        )
        .expect("valid");

        let nse = config.settings_for(&ProviderId::parse("nse").expect("valid"));
        assert_eq!(nse.breaker.max_failures, 3);
        assert_eq!(nse.breaker.reset_timeout, Duration::from_secs(30));
        assert!(nse.failure_statuses.contains(429));
        assert!(!nse.failure_statuses.contains(404));
        assert_eq!(nse.failure_statuses.to_string(), "429,500-599");

        let other = config.settings_for(&ProviderId::parse("bse").expect("valid"));
        assert_eq!(other.breaker.max_failures, 5);
    }

    #[test]
    fn reports_every_invalid_value() {
        let error = GatewayConfig::from_toml_str(
            r#"
[defaults]
max_failures = 0

[providers."bad id"]

[providers.nse]
failure_statuses = ["600"]
max_cas_attempts = 0
"#,
        )
        .expect_err("invalid");

        let ConfigError::Validation(issues) = error else {
            panic!("expected validation error");
        };
        let fields: Vec<&str> = issues.iter().map(|issue| issue.field.as_str()).collect();
        assert!(fields.contains(&"defaults.breaker"));
        assert!(fields.contains(&"providers.bad id"));
        assert!(fields.contains(&"providers.nse.failure_statuses"));
        assert!(fields.contains(&"providers.nse.max_cas_attempts"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            GatewayConfig::from_toml_str("[defaults]\nmax_failure = 3\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn status_ranges_must_be_ordered() {
        assert!(FailureStatuses::parse(&["599-500"]).is_err());
        assert!(FailureStatuses::parse(&["abc"]).is_err());
        assert!(FailureStatuses::parse(&[" 503 "]).is_ok());
    }
}
