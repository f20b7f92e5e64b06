//! Population runtime and session lifecycle
//!
//! ## Table of Contents
//! - **SessionState**: Lifecycle of one session
//! - **PopulationSession**: A running session's population, mutator and timer
//! - **PopulationRuntime**: Starts, looks up and ends sessions
//! - **EntityRuntime** / **ResourceRuntime**: Runtimes per member kind

use crate::builder::EngineConfig;
use crate::definition::Definitions;
use crate::engine::build_population;
use crate::error::{PopulationError, Result};
use crate::evaluator::{BoxedEvaluator, EvaluatorFactory};
use crate::kind::{Entity, MemberKind, Resource};
use crate::metrics::PopulationMetrics;
use crate::mutator::PopulationMutator;
use crate::population::Population;
use crate::store::PopulationStore;
use crate::types::SessionId;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Population published, mutator running
    Running,
    /// Shutdown signalled, waiting for the mutator to stop
    Stopping,
    /// Mutator stopped, population removed from the store
    Stopped,
}

/// A running session
pub struct PopulationSession<K: MemberKind> {
    id: SessionId,
    population: Arc<Population<K>>,
    mutator: Arc<PopulationMutator<K>>,
    evaluator: BoxedEvaluator,
    created_at: DateTime<Utc>,
    state: RwLock<SessionState>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<K: MemberKind> PopulationSession<K> {
    /// Session id
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Published population
    pub fn population(&self) -> &Arc<Population<K>> {
        &self.population
    }

    /// Mutator driving this session's runtime modifications
    pub fn mutator(&self) -> &Arc<PopulationMutator<K>> {
        &self.mutator
    }

    /// Evaluator holding this session's sequence state
    pub fn evaluator(&self) -> &BoxedEvaluator {
        &self.evaluator
    }

    /// When the session was started
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Session runtime for one member kind
pub struct PopulationRuntime<K: MemberKind> {
    config: EngineConfig,
    factory: Arc<dyn EvaluatorFactory>,
    metrics: Option<Arc<PopulationMetrics>>,
    store: PopulationStore<K>,
    sessions: DashMap<SessionId, Arc<PopulationSession<K>>>,
    admission: Mutex<()>,
}

impl<K: MemberKind> fmt::Debug for PopulationRuntime<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopulationRuntime")
            .field("kind", &K::LABEL)
            .field("config", &self.config)
            .field("sessions", &self.sessions.len())
            .field("metrics_enabled", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

/// Runtime for entity populations
pub type EntityRuntime = PopulationRuntime<Entity>;

/// Runtime for resource populations
pub type ResourceRuntime = PopulationRuntime<Resource>;

impl<K: MemberKind> PopulationRuntime<K> {
    /// Create a runtime (use EngineBuilder instead)
    pub(crate) fn new(
        config: EngineConfig,
        factory: Arc<dyn EvaluatorFactory>,
        metrics: Option<Arc<PopulationMetrics>>,
    ) -> Self {
        Self {
            config,
            factory,
            metrics,
            store: PopulationStore::new(),
            sessions: DashMap::new(),
            admission: Mutex::new(()),
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get metrics instance
    pub fn metrics(&self) -> Option<&Arc<PopulationMetrics>> {
        self.metrics.as_ref()
    }

    /// Build a session's population, publish it and start its mutator
    pub async fn start_session(&self, id: SessionId, definitions: Definitions) -> Result<Arc<Population<K>>> {
        if self.sessions.contains_key(&id) {
            return Err(PopulationError::session(format!("session '{}' is already running", id)));
        }
        if self.sessions.len() >= self.config.max_sessions {
            return Err(PopulationError::session(format!(
                "session limit of {} reached",
                self.config.max_sessions
            )));
        }

        let evaluator = self.factory.create(&id);
        let started = Instant::now();
        let (population, definitions) = {
            let id = id.clone();
            let evaluator = Arc::clone(&evaluator);
            tokio::task::spawn_blocking(move || {
                build_population::<K>(&id, &definitions, evaluator.as_ref()).map(|p| (p, definitions))
            })
            .await
            .map_err(|e| PopulationError::internal(format!("build task failed: {}", e)))??
        };
        let population = Arc::new(population);

        if let Some(metrics) = &self.metrics {
            metrics.record_build(K::LABEL, started.elapsed().as_secs_f64());
            metrics.record_population(population.as_ref());
        }

        let mutator = Arc::new(
            PopulationMutator::new(Arc::clone(&population), &definitions)
                .with_minute_length(self.config.minute_length())
                .with_metrics(self.metrics.clone()),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let session = Arc::new(PopulationSession {
            id: id.clone(),
            population: Arc::clone(&population),
            mutator: Arc::clone(&mutator),
            evaluator,
            created_at: Utc::now(),
            state: RwLock::new(SessionState::Running),
            shutdown_tx,
            handle: Mutex::new(None),
        });

        {
            // limit and id re-checked under the admission lock
            let _admission = self.admission.lock();
            if self.sessions.len() >= self.config.max_sessions {
                return Err(PopulationError::session(format!(
                    "session limit of {} reached",
                    self.config.max_sessions
                )));
            }
            match self.sessions.entry(id.clone()) {
                Entry::Occupied(_) => {
                    return Err(PopulationError::session(format!("session '{}' is already running", id)));
                }
                Entry::Vacant(entry) => {
                    entry.insert(Arc::clone(&session));
                }
            }
            self.store.put_population(id.clone(), Arc::clone(&population));
        }

        let handle = mutator.spawn(
            tokio::time::Instant::now(),
            self.config.tick_interval(),
            shutdown_rx,
        );
        *session.handle.lock() = Some(handle);

        if let Some(metrics) = &self.metrics {
            metrics.record_session_started(K::LABEL);
        }
        info!(
            session = %id,
            kind = K::LABEL,
            types = definitions.len(),
            members = population.total_members(),
            "Session started"
        );
        Ok(population)
    }

    /// Stop a session's mutator and drop its population from the store
    pub async fn end_session(&self, id: &SessionId) -> Result<()> {
        let (_, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| PopulationError::session(format!("unknown session '{}'", id)))?;

        *session.state.write() = SessionState::Stopping;
        session.signal_shutdown();

        let handle = session.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(session = %id, error = %e, "Mutator task ended abnormally");
            }
        }

        self.store.remove(id);
        *session.state.write() = SessionState::Stopped;

        if let Some(metrics) = &self.metrics {
            metrics.record_session_ended(K::LABEL);
        }
        info!(session = %id, kind = K::LABEL, "Session ended");
        Ok(())
    }

    /// End every running session
    pub async fn shutdown(&self) -> Result<()> {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.end_session(&id).await?;
        }
        Ok(())
    }

    /// Get a running session
    pub fn session(&self, id: &SessionId) -> Option<Arc<PopulationSession<K>>> {
        self.sessions.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Number of running sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Get the published population of a session
    pub fn get_population(&self, id: &SessionId) -> Option<Arc<Population<K>>> {
        self.store.get_population(id)
    }

    /// Publish a population built elsewhere; it is not mutated
    ///
    /// Fails for a running session, whose mutator owns the published population.
    pub fn put_population(
        &self,
        id: SessionId,
        population: Arc<Population<K>>,
    ) -> Result<Option<Arc<Population<K>>>> {
        let _admission = self.admission.lock();
        if self.sessions.contains_key(&id) {
            return Err(PopulationError::session(format!(
                "session '{}' is running; end it before replacing its population",
                id
            )));
        }
        Ok(self.store.put_population(id, population))
    }

    /// Population store
    pub fn store(&self) -> &PopulationStore<K> {
        &self.store
    }
}

impl<K: MemberKind> Drop for PopulationRuntime<K> {
    fn drop(&mut self) {
        for entry in self.sessions.iter() {
            entry.value().signal_shutdown();
        }
    }
}
