//! EngineBuilder for configuring and constructing population runtimes
//!
//! ## Table of Contents
//! - **EngineConfig**: Serializable engine configuration
//! - **EngineBuilder**: Builder pattern for runtime configuration

use crate::error::{PopulationError, Result};
use crate::evaluator::{BasicEvaluatorFactory, EvaluatorFactory};
use crate::kind::MemberKind;
use crate::metrics::PopulationMetrics;
use crate::runtime::PopulationRuntime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// How often each session's mutator wakes up
    pub tick_interval_ms: u64,
    /// Wall-clock length of one simulated minute
    pub minute_length_ms: u64,
    /// Enable metrics
    pub metrics_enabled: bool,
    /// Maximum number of concurrently running sessions
    pub max_sessions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            minute_length_ms: 60_000,
            metrics_enabled: true,
            max_sessions: 64,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(PopulationError::config("tickIntervalMs must be at least 1"));
        }
        if self.minute_length_ms == 0 {
            return Err(PopulationError::config("minuteLengthMs must be at least 1"));
        }
        if self.max_sessions == 0 {
            return Err(PopulationError::config("maxSessions must be at least 1"));
        }
        Ok(())
    }

    /// Mutator tick interval
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Simulated minute length
    pub fn minute_length(&self) -> Duration {
        Duration::from_millis(self.minute_length_ms)
    }
}

/// Builder for constructing population runtimes
pub struct EngineBuilder {
    config: EngineConfig,
    factory: Option<Arc<dyn EvaluatorFactory>>,
    metrics: Option<Arc<PopulationMetrics>>,
}

impl EngineBuilder {
    /// Create a new EngineBuilder with default configuration
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            factory: None,
            metrics: None,
        }
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the mutator tick interval
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the length of a simulated minute
    pub fn with_minute_length(mut self, minute: Duration) -> Self {
        self.config.minute_length_ms = minute.as_millis() as u64;
        self
    }

    /// Enable or disable metrics
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.config.metrics_enabled = enabled;
        self
    }

    /// Record into an existing metrics registry, e.g. one shared by the
    /// entity and resource runtimes
    pub fn with_shared_metrics(mut self, metrics: Arc<PopulationMetrics>) -> Self {
        self.config.metrics_enabled = true;
        self.metrics = Some(metrics);
        self
    }

    /// Set the concurrent session limit
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.config.max_sessions = max;
        self
    }

    /// Set the factory that creates each session's evaluator
    pub fn with_evaluator_factory<F: EvaluatorFactory + 'static>(mut self, factory: F) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Build a runtime for one member kind
    pub fn build<K: MemberKind>(self) -> Result<PopulationRuntime<K>> {
        self.config.validate()?;
        info!(
            kind = K::LABEL,
            tick_interval_ms = self.config.tick_interval_ms,
            minute_length_ms = self.config.minute_length_ms,
            max_sessions = self.config.max_sessions,
            "Building population runtime"
        );

        let factory = self.factory.unwrap_or_else(|| Arc::new(BasicEvaluatorFactory));

        let metrics = match (self.config.metrics_enabled, self.metrics) {
            (false, _) => None,
            (true, Some(shared)) => Some(shared),
            (true, None) => Some(Arc::new(PopulationMetrics::new()?)),
        };

        Ok(PopulationRuntime::new(self.config, factory, metrics))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{BasicEvaluator, BoxedEvaluator};
    use crate::kind::{Entity, Resource};
    use crate::types::SessionId;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_builder_default() {
        let runtime = EngineBuilder::new().build::<Entity>();
        assert!(runtime.is_ok());
        assert!(runtime.unwrap().metrics().is_some());
    }

    #[test]
    fn test_builder_without_metrics() {
        let runtime = EngineBuilder::new().with_metrics(false).build::<Resource>().unwrap();
        assert!(runtime.metrics().is_none());
    }

    #[test]
    fn test_builder_with_custom_factory() {
        let runtime = EngineBuilder::new()
            .with_tick_interval(Duration::from_millis(10))
            .with_minute_length(Duration::from_millis(100))
            .with_max_sessions(2)
            .with_evaluator_factory(|_: &SessionId| -> BoxedEvaluator { Arc::new(BasicEvaluator::new()) })
            .build::<Entity>()
            .unwrap();
        assert_eq!(runtime.config().tick_interval(), Duration::from_millis(10));
        assert_eq!(runtime.config().max_sessions, 2);
    }

    #[test]
    fn test_shared_metrics() {
        let metrics = Arc::new(PopulationMetrics::new().unwrap());
        let entities = EngineBuilder::new().with_shared_metrics(metrics.clone()).build::<Entity>().unwrap();
        let resources = EngineBuilder::new().with_shared_metrics(metrics.clone()).build::<Resource>().unwrap();
        assert!(Arc::ptr_eq(entities.metrics().unwrap(), resources.metrics().unwrap()));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert_err!(EngineBuilder::new().with_max_sessions(0).build::<Entity>());
        assert_err!(EngineBuilder::new().with_tick_interval(Duration::ZERO).build::<Entity>());
    }

    #[test]
    fn test_config_from_json() {
        let config = assert_ok!(EngineConfig::from_json_str(r#"{ "minuteLengthMs": 250, "maxSessions": 4 }"#));
        assert_eq!(config.minute_length(), Duration::from_millis(250));
        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.tick_interval_ms, EngineConfig::default().tick_interval_ms);

        assert_err!(EngineConfig::from_json_str(r#"{ "minuteLengthMs": 0 }"#));
        assert!(matches!(
            EngineConfig::from_json_str("{ nope"),
            Err(PopulationError::Serialization(_))
        ));
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "tickIntervalMs": 20, "metricsEnabled": false }}"#).unwrap();
        let config = EngineConfig::from_path(file.path()).unwrap();
        assert_eq!(config.tick_interval(), Duration::from_millis(20));
        assert!(!config.metrics_enabled);
    }
}
