//! Metrics for population sessions
//!
//! ## Table of Contents
//! - **PopulationMetrics**: Prometheus registry with build, membership and
//!   mutation metrics

use crate::error::Result;
use crate::kind::MemberKind;
use crate::population::Population;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tracing::info;

/// Core metrics for population sessions
pub struct PopulationMetrics {
    registry: Registry,

    // Session metrics
    pub sessions_active: IntGaugeVec,
    pub build_duration: HistogramVec,

    // Membership metrics
    pub members_total: GaugeVec,
    pub members_active: GaugeVec,

    // Mutation metrics
    pub modifications_applied: CounterVec,
    pub modifications_rejected: CounterVec,
}

impl PopulationMetrics {
    /// Create a new metrics instance
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let sessions_active = IntGaugeVec::new(
            Opts::new("population_sessions_active", "Currently running sessions"),
            &["kind"],
        )?;
        let build_duration = HistogramVec::new(
            HistogramOpts::new("population_build_duration_seconds", "Population build duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
            &["kind"],
        )?;

        let members_total = GaugeVec::new(
            Opts::new("population_members", "Members built per type, including reserved capacity"),
            &["kind", "type"],
        )?;
        let members_active = GaugeVec::new(
            Opts::new("population_members_active", "Active members per type"),
            &["kind", "type"],
        )?;

        let modifications_applied = CounterVec::new(
            Opts::new("population_modifications_applied_total", "Runtime modifications applied"),
            &["kind", "type", "modification"],
        )?;
        let modifications_rejected = CounterVec::new(
            Opts::new("population_modifications_rejected_total", "Runtime modifications rejected"),
            &["kind", "type", "modification"],
        )?;

        registry.register(Box::new(sessions_active.clone()))?;
        registry.register(Box::new(build_duration.clone()))?;
        registry.register(Box::new(members_total.clone()))?;
        registry.register(Box::new(members_active.clone()))?;
        registry.register(Box::new(modifications_applied.clone()))?;
        registry.register(Box::new(modifications_rejected.clone()))?;

        info!("Population metrics registered");

        Ok(Self {
            registry,
            sessions_active,
            build_duration,
            members_total,
            members_active,
            modifications_applied,
            modifications_rejected,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a session start
    pub fn record_session_started(&self, kind: &str) {
        self.sessions_active.with_label_values(&[kind]).inc();
    }

    /// Record a session end
    pub fn record_session_ended(&self, kind: &str) {
        self.sessions_active.with_label_values(&[kind]).dec();
    }

    /// Record a completed build
    pub fn record_build(&self, kind: &str, seconds: f64) {
        self.build_duration.with_label_values(&[kind]).observe(seconds);
    }

    /// Publish total and active member gauges for every type
    pub fn record_population<K: MemberKind>(&self, population: &Population<K>) {
        for (name, members) in population.iter() {
            self.members_total
                .with_label_values(&[K::LABEL, name])
                .set(members.len() as f64);
            self.members_active
                .with_label_values(&[K::LABEL, name])
                .set(members.active_count() as f64);
        }
    }

    /// Record one modification outcome and the resulting active count
    pub fn record_modification(&self, kind: &str, type_name: &str, modification: &str, active: Option<usize>) {
        match active {
            Some(active) => {
                self.modifications_applied
                    .with_label_values(&[kind, type_name, modification])
                    .inc();
                self.members_active
                    .with_label_values(&[kind, type_name])
                    .set(active as f64);
            }
            None => self
                .modifications_rejected
                .with_label_values(&[kind, type_name, modification])
                .inc(),
        }
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::error::PopulationError::Metrics(e.to_string()))
    }
}
