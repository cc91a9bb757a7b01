//! Replica configuration and testing knobs

use crate::error::ConfigError;
use kvrange_protocol::{BatchRequest, BatchResponse, Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Tunables for one replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    /// Size at which the range should split.
    pub range_max_bytes: u64,

    /// Writes block once the range exceeds `range_max_bytes` times this
    /// multiplier. Zero disables backpressure.
    pub backpressure_range_size_multiplier: f64,

    /// Requests per second above which the range samples keys for a
    /// load-based split. Zero disables load-based splitting.
    pub load_split_qps_threshold: u64,

    /// Number of keys kept when sampling for a load-based split.
    pub load_split_sample_capacity: usize,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            range_max_bytes: 512 << 20,
            backpressure_range_size_multiplier: 2.0,
            load_split_qps_threshold: 2500,
            load_split_sample_capacity: 20,
        }
    }
}

impl ReplicaConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: ReplicaConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.backpressure_range_size_multiplier.is_finite()
            || self.backpressure_range_size_multiplier < 0.0
        {
            return Err(ConfigError::Invalid(format!(
                "backpressure_range_size_multiplier must be zero or positive, got {}",
                self.backpressure_range_size_multiplier
            )));
        }
        if self.backpressure_range_size_multiplier > 0.0
            && self.backpressure_range_size_multiplier < 1.0
        {
            return Err(ConfigError::Invalid(
                "backpressure_range_size_multiplier below 1 would block writes before a split"
                    .to_string(),
            ));
        }
        if self.load_split_qps_threshold > 0 && self.load_split_sample_capacity == 0 {
            return Err(ConfigError::Invalid(
                "load_split_sample_capacity must be positive when load splitting is enabled"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_range_max_bytes(mut self, bytes: u64) -> Self {
        self.range_max_bytes = bytes;
        self
    }

    pub fn with_backpressure_range_size_multiplier(mut self, multiplier: f64) -> Self {
        self.backpressure_range_size_multiplier = multiplier;
        self
    }

    pub fn with_load_split_qps_threshold(mut self, qps: u64) -> Self {
        self.load_split_qps_threshold = qps;
        self
    }

    pub fn with_load_split_sample_capacity(mut self, capacity: usize) -> Self {
        self.load_split_sample_capacity = capacity;
        self
    }
}

/// Inspects a batch before it branches. Returning an error short-circuits it.
pub type RequestFilter = Arc<dyn Fn(&BatchRequest) -> Option<Error> + Send + Sync>;

/// Inspects a successful response. Returning an error replaces it.
pub type ResponseFilter =
    Arc<dyn Fn(&BatchRequest, &BatchResponse) -> Option<Error> + Send + Sync>;

/// Switches that alter conflict handling in tests
#[derive(Clone, Default)]
pub struct TestingKnobs {
    /// Return write-intent conflicts to the caller instead of pushing.
    pub dont_push_on_write_intent_error: bool,

    /// Return failed pushes to the caller instead of waiting to retry.
    pub dont_retry_push_txn_failures: bool,

    /// Return indeterminate-commit conflicts instead of recovering.
    pub dont_recover_indeterminate_commits: bool,

    pub request_filter: Option<RequestFilter>,

    pub response_filter: Option<ResponseFilter>,
}

impl fmt::Debug for TestingKnobs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestingKnobs")
            .field(
                "dont_push_on_write_intent_error",
                &self.dont_push_on_write_intent_error,
            )
            .field(
                "dont_retry_push_txn_failures",
                &self.dont_retry_push_txn_failures,
            )
            .field(
                "dont_recover_indeterminate_commits",
                &self.dont_recover_indeterminate_commits,
            )
            .field("request_filter", &self.request_filter.is_some())
            .field("response_filter", &self.response_filter.is_some())
            .finish()
    }
}
