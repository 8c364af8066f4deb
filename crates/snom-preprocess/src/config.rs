//! Configuration types for the pipeline runner.
//!
//! This module provides configuration options using the builder pattern
//! for flexible and ergonomic runner setup.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest debounce window accepted by [`RunnerConfig::validate`].
pub const MAX_DEBOUNCE_MS: u64 = 5_000;

/// Configuration for [`PipelineRunner`](crate::pipeline::PipelineRunner).
///
/// Use [`RunnerConfig::builder()`] to create a new configuration
/// with fluent API.
///
/// # Example
///
/// ```rust,ignore
/// use snom_preprocess::config::RunnerConfig;
///
/// let config = RunnerConfig::builder()
///     .debounce_polls(0)
///     .process_reference(false)
///     .build()?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Number of short sleeps before the first step. Each one reports
    /// progress 0 and checks for cancellation, so a burst of edits restarts
    /// the run before any work is done.
    /// Default: 10
    pub debounce_polls: usize,

    /// Length of one debounce sleep in milliseconds.
    /// Default: 10
    pub debounce_interval_ms: u64,

    /// Whether steps other than the last are also applied to the reference
    /// table, so later steps are built against a reference in the same state
    /// as the data they receive.
    /// Default: true
    pub process_reference: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            debounce_polls: 10,
            debounce_interval_ms: 10,
            process_reference: true,
        }
    }
}

impl RunnerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::default()
    }

    /// Length of one debounce sleep.
    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_interval_ms)
    }

    /// Total debounce window in milliseconds, saturating on overflow.
    pub fn total_debounce_ms(&self) -> u64 {
        (self.debounce_polls as u64).saturating_mul(self.debounce_interval_ms)
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let total = self.total_debounce_ms();
        if total > MAX_DEBOUNCE_MS {
            return Err(ConfigValidationError::DebounceTooLong {
                total_ms: total,
                max_ms: MAX_DEBOUNCE_MS,
            });
        }
        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Debounce window of {total_ms} ms exceeds the maximum of {max_ms} ms")]
    DebounceTooLong { total_ms: u64, max_ms: u64 },
}

/// Builder for [`RunnerConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct RunnerConfigBuilder {
    debounce_polls: Option<usize>,
    debounce_interval_ms: Option<u64>,
    process_reference: Option<bool>,
}

impl RunnerConfigBuilder {
    /// Set how many debounce sleeps precede the first step. `0` disables
    /// debouncing.
    pub fn debounce_polls(mut self, polls: usize) -> Self {
        self.debounce_polls = Some(polls);
        self
    }

    /// Set the length of one debounce sleep in milliseconds.
    pub fn debounce_interval_ms(mut self, ms: u64) -> Self {
        self.debounce_interval_ms = Some(ms);
        self
    }

    /// Enable or disable applying steps to the reference table.
    pub fn process_reference(mut self, process: bool) -> Self {
        self.process_reference = Some(process);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `RunnerConfig` or an error if validation fails.
    pub fn build(self) -> Result<RunnerConfig, ConfigValidationError> {
        let defaults = RunnerConfig::default();
        let config = RunnerConfig {
            debounce_polls: self.debounce_polls.unwrap_or(defaults.debounce_polls),
            debounce_interval_ms: self
                .debounce_interval_ms
                .unwrap_or(defaults.debounce_interval_ms),
            process_reference: self.process_reference.unwrap_or(defaults.process_reference),
        };

        config.validate()?;
        Ok(config)
    }
}
