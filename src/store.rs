//! Session-scoped population storage
//!
//! ## Table of Contents
//! - **PopulationStore**: Concurrent map of session → published population
//!
//! Populations are stored behind an `Arc` once built, so readers and the
//! mutator share the same members. Removing a session drops the store's
//! handle; the population itself is freed once the last reader lets go.

use crate::kind::MemberKind;
use crate::population::Population;
use crate::types::SessionId;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// In-memory store of published populations
#[derive(Debug)]
pub struct PopulationStore<K: MemberKind> {
    populations: DashMap<SessionId, Arc<Population<K>>>,
}

impl<K: MemberKind> Default for PopulationStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: MemberKind> PopulationStore<K> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            populations: DashMap::new(),
        }
    }

    /// Get the population of a session
    pub fn get_population(&self, session: &SessionId) -> Option<Arc<Population<K>>> {
        self.populations.get(session).map(|e| Arc::clone(e.value()))
    }

    /// Publish a population, replacing any previous one for the session
    pub fn put_population(&self, session: SessionId, population: Arc<Population<K>>) -> Option<Arc<Population<K>>> {
        debug!(
            session = %session,
            kind = K::LABEL,
            members = population.total_members(),
            "Population published"
        );
        self.populations.insert(session, population)
    }

    /// Remove a session's population
    pub fn remove(&self, session: &SessionId) -> Option<Arc<Population<K>>> {
        self.populations.remove(session).map(|(_, p)| p)
    }

    /// Whether a session has a published population
    pub fn contains(&self, session: &SessionId) -> bool {
        self.populations.contains_key(session)
    }

    /// Sessions with a published population
    pub fn sessions(&self) -> Vec<SessionId> {
        self.populations.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of stored populations
    pub fn len(&self) -> usize {
        self.populations.len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.populations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::Resource;
    use crate::member::Member;
    use crate::population::TypePopulation;

    fn population(n: usize) -> Arc<Population<Resource>> {
        let mut population = Population::new();
        population.insert_type(TypePopulation::new(
            "disk",
            (0..n).map(|i| Member::new("disk", i, true)).collect(),
            n,
        ));
        Arc::new(population)
    }

    #[test]
    fn test_put_get_remove() {
        let store = PopulationStore::<Resource>::new();
        let session = SessionId::new("s1");
        assert!(store.get_population(&session).is_none());

        assert!(store.put_population(session.clone(), population(3)).is_none());
        assert!(store.contains(&session));
        assert_eq!(store.get_population(&session).unwrap().total_members(), 3);

        let previous = store.put_population(session.clone(), population(5));
        assert_eq!(previous.unwrap().total_members(), 3);
        assert_eq!(store.len(), 1);

        assert!(store.remove(&session).is_some());
        assert!(store.is_empty());
        assert!(store.remove(&session).is_none());
    }

    #[test]
    fn test_readers_keep_population_alive() {
        let store = PopulationStore::<Resource>::new();
        let session = SessionId::new("s2");
        store.put_population(session.clone(), population(2));

        let reader = store.get_population(&session).unwrap();
        store.remove(&session);
        assert_eq!(reader.members("disk").len(), 2);
        assert_eq!(store.sessions(), Vec::<SessionId>::new());
    }
}
