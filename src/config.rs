//! `config.toml` loading.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! Command-line flags override what is loaded here.

use anyhow::{Context, Result};
use iamkit::PollConfig;
use iamkit::backend::aws_cli::AwsCliOptions;
use reconcile::{AWS_MANAGED_POLICY_PREFIX, PlanOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub aws: AwsConfig,
    pub policies: PoliciesConfig,
    pub report: ReportConfig,
    pub apply: ApplyConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AwsConfig {
    /// Named profile passed to the aws CLI
    pub profile: Option<String>,
    /// Region passed to the aws CLI
    pub region: Option<String>,
    /// Path to the aws executable (`~` allowed)
    pub cli_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoliciesConfig {
    /// Prefix for policy targets given by bare name
    pub arn_prefix: String,
}

impl Default for PoliciesConfig {
    fn default() -> Self {
        Self {
            arn_prefix: AWS_MANAGED_POLICY_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_secs: u64,
    pub timeout_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        let poll = PollConfig::default();
        Self {
            base_delay_ms: poll.base_delay.as_millis() as u64,
            backoff_factor: poll.backoff_factor,
            max_delay_secs: poll.max_delay.as_secs(),
            timeout_secs: poll.timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplyConfig {
    /// Users reconciled concurrently
    pub jobs: usize,
    /// Ask before mutating
    pub confirm: bool,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            confirm: true,
        }
    }
}

impl Config {
    /// Load from the default location, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let path = crate::paths::config_file()?;
        Self::load_from(&path)
    }

    /// Load from a specific file, falling back to defaults when absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// aws CLI options, with command-line overrides applied.
    pub fn aws_options(&self, profile: Option<&str>, region: Option<&str>) -> AwsCliOptions {
        AwsCliOptions {
            cli_path: self
                .aws
                .cli_path
                .as_deref()
                .map(|p| crate::paths::expand(p).display().to_string()),
            profile: profile.map(String::from).or_else(|| self.aws.profile.clone()),
            region: region.map(String::from).or_else(|| self.aws.region.clone()),
        }
    }

    /// Poll settings for the credential report.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            base_delay: Duration::from_millis(self.report.base_delay_ms),
            backoff_factor: self.report.backoff_factor.max(1.0),
            max_delay: Duration::from_secs(self.report.max_delay_secs),
            timeout: Duration::from_secs(self.report.timeout_secs),
            ..PollConfig::default()
        }
    }

    /// How action targets are resolved.
    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            arn_prefix: self.policies.arn_prefix.clone(),
        }
    }
}

/// Starter config written by `iamsync config init`.
pub const TEMPLATE: &str = r#"# iamsync configuration

[aws]
# profile = "security-admin"
# region = "us-east-1"
# cli_path = "~/.local/bin/aws"

[policies]
# Bare policy names in NewPolicies resolve against this prefix.
arn_prefix = "arn:aws:iam::aws:policy/"

[report]
# Credential report polling: delay = base_delay_ms * backoff_factor^attempt
base_delay_ms = 2000
backoff_factor = 2.0
max_delay_secs = 30
timeout_secs = 300

[apply]
jobs = 1
confirm = true
"#;
