// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tunables of a verification run.

use crate::error::ConfigurationError;
use bytes::Bytes;
use derive_builder::Builder;
use net::ip::IpVersion;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

pub const DEFAULT_SETTLE_DELAY_MS: u64 = 20_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_CHECK_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_MIN_PROVIDER_HOSTS: u32 = 5;
pub const DEFAULT_SELECTOR_ATTEMPTS: u32 = 32;
pub const DEFAULT_CHECK_INTERPRETER: &str = "/usr/bin/python3";
pub const DEFAULT_CHECK_SCRIPT: &str = "/host_spoof_check.py";

/// Inclusive range of prefix lengths the spoofed range is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixBounds {
    pub min: u8,
    pub max: u8,
}

impl PrefixBounds {
    pub const IPV4: PrefixBounds = PrefixBounds { min: 16, max: 28 };
    pub const IPV6: PrefixBounds = PrefixBounds { min: 48, max: 64 };

    /// Check the bounds make sense for `version`.
    ///
    /// # Errors
    ///
    /// Fails unless `min <= max <= ` the address width of `version`.
    pub fn validate(&self, version: IpVersion) -> Result<(), ConfigurationError> {
        if self.min > self.max || self.max > version.max_prefix_len() {
            return Err(ConfigurationError::PrefixBounds {
                version,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

impl Display for PrefixBounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}../{}", self.min, self.max)
    }
}

/// Configuration of a verification run. N.B. we derive a builder type `VerifyConfigBuilder` and
/// provide defaults for each field.
#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[builder(build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct VerifyConfig {
    /// Time given to routing and forwarding state to converge before checking (milliseconds)
    #[builder(default = DEFAULT_SETTLE_DELAY_MS)]
    pub settle_delay_ms: u64,

    /// Interval at which progress of the check script is polled (milliseconds)
    #[builder(default = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Maximum time the check script may take (milliseconds)
    #[builder(default = DEFAULT_CHECK_TIMEOUT_MS)]
    pub check_timeout_ms: u64,

    /// A provider network qualifies if it has strictly more usable hosts than this
    #[builder(default = DEFAULT_MIN_PROVIDER_HOSTS)]
    pub min_provider_hosts: u32,

    /// Number of attempts at finding a range to spoof, per IP version
    #[builder(default = DEFAULT_SELECTOR_ATTEMPTS)]
    pub selector_attempts: u32,

    #[builder(default = PrefixBounds::IPV4)]
    pub ipv4_bounds: PrefixBounds,

    #[builder(default = PrefixBounds::IPV6)]
    pub ipv6_bounds: PrefixBounds,

    /// Interpreter running the check script on the candidate's client
    #[builder(setter(into), default = DEFAULT_CHECK_INTERPRETER.to_string())]
    pub check_interpreter: String,

    /// Location of the check script on the candidate's client
    #[builder(setter(into), default = DEFAULT_CHECK_SCRIPT.to_string())]
    pub check_script: String,

    /// Content of the check script, staged on the candidate's client before any trial.
    /// If unset, the script must already be in place.
    #[builder(setter(into, strip_option), default)]
    #[serde(skip)]
    pub check_script_content: Option<Bytes>,

    /// Seed making the random choices of a run reproducible
    #[builder(setter(strip_option), default)]
    pub seed: Option<u64>,
}

impl VerifyConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        for (version, bounds) in [
            (IpVersion::V4, self.ipv4_bounds),
            (IpVersion::V6, self.ipv6_bounds),
        ] {
            if let Some(bounds) = bounds {
                bounds.validate(version).map_err(|e| e.to_string())?;
            }
        }
        if self.poll_interval_ms == Some(0) {
            return Err("poll interval must not be zero".to_string());
        }
        Ok(())
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            check_timeout_ms: DEFAULT_CHECK_TIMEOUT_MS,
            min_provider_hosts: DEFAULT_MIN_PROVIDER_HOSTS,
            selector_attempts: DEFAULT_SELECTOR_ATTEMPTS,
            ipv4_bounds: PrefixBounds::IPV4,
            ipv6_bounds: PrefixBounds::IPV6,
            check_interpreter: DEFAULT_CHECK_INTERPRETER.to_string(),
            check_script: DEFAULT_CHECK_SCRIPT.to_string(),
            check_script_content: None,
            seed: None,
        }
    }
}

impl VerifyConfig {
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        // a zero period makes tokio's interval panic
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    #[must_use]
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    #[must_use]
    pub fn bounds(&self, version: IpVersion) -> PrefixBounds {
        match version {
            IpVersion::V4 => self.ipv4_bounds,
            IpVersion::V6 => self.ipv6_bounds,
        }
    }

    /// Check the configuration, for configurations that did not go through the builder.
    ///
    /// # Errors
    ///
    /// Fails if the prefix length bounds do not fit their IP version.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for version in IpVersion::ALL {
            self.bounds(version).validate(version)?;
        }
        Ok(())
    }
}
