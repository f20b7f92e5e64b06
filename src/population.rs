//! Published population of one session
//!
//! ## Table of Contents
//! - **TypePopulation**: Ordered members of one type plus its active window
//! - **Population**: All types of one member kind, with the type graph
//!
//! Structure (member lists, links, attributes) is frozen once the population
//! is wrapped in an `Arc` and published. Afterwards only active flags and the
//! per-type window change, both through atomics, so readers never lock.

use crate::graph::TypeGraph;
use crate::kind::MemberKind;
use crate::member::{Member, MemberSnapshot};
use crate::types::{ActiveWindow, MemberRef};
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// Members of one type
#[derive(Debug)]
pub struct TypePopulation {
    name: String,
    members: Vec<Member>,
    window: AtomicU64,
    mutation_lock: Mutex<()>,
}

impl TypePopulation {
    /// Create a type population whose first `active` members are live
    pub fn new(name: impl Into<String>, members: Vec<Member>, active: usize) -> Self {
        let window = ActiveWindow::new(0, active.min(members.len()));
        Self {
            name: name.into(),
            members,
            window: AtomicU64::new(window.pack()),
            mutation_lock: Mutex::new(()),
        }
    }

    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All members in construction order
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub(crate) fn members_mut(&mut self) -> &mut [Member] {
        &mut self.members
    }

    /// Member at an index
    pub fn member(&self, index: usize) -> Option<&Member> {
        self.members.get(index)
    }

    /// Total members including inactive capacity
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when the type has no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Last published active window
    pub fn window(&self) -> ActiveWindow {
        ActiveWindow::unpack(self.window.load(Ordering::Acquire))
    }

    pub(crate) fn publish_window(&self, window: ActiveWindow) {
        self.window.store(window.pack(), Ordering::Release);
    }

    /// Consistent snapshot of the active members
    pub fn active_members(&self) -> &[Member] {
        let window = self.window();
        &self.members[window.start..window.end]
    }

    /// Number of active members
    pub fn active_count(&self) -> usize {
        self.window().len()
    }

    /// Scan forward for the first member whose flag is set
    pub fn first_active_index(&self) -> Option<usize> {
        self.members.iter().position(Member::is_active)
    }

    /// Scan backward for the last member whose flag is set
    pub fn last_active_index(&self) -> Option<usize> {
        self.members.iter().rposition(Member::is_active)
    }

    /// Whether the set flags form a single contiguous run
    pub fn is_contiguous(&self) -> bool {
        match (self.first_active_index(), self.last_active_index()) {
            (Some(first), Some(last)) => self.members[first..=last].iter().all(Member::is_active),
            _ => true,
        }
    }

    pub(crate) fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        self.mutation_lock.lock()
    }
}

/// Session population: type name → ordered members
#[derive(Debug)]
pub struct Population<K: MemberKind> {
    types: IndexMap<String, TypePopulation>,
    graph: TypeGraph,
    version: AtomicU64,
    _kind: PhantomData<K>,
}

impl<K: MemberKind> Default for Population<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: MemberKind> Population<K> {
    /// Create an empty population
    pub fn new() -> Self {
        Self {
            types: IndexMap::new(),
            graph: TypeGraph::new(),
            version: AtomicU64::new(0),
            _kind: PhantomData,
        }
    }

    /// Insert the members of a type
    pub fn insert_type(&mut self, type_population: TypePopulation) {
        self.types
            .insert(type_population.name().to_string(), type_population);
    }

    /// Members of a type
    pub fn get(&self, type_name: &str) -> Option<&TypePopulation> {
        self.types.get(type_name)
    }

    pub(crate) fn get_mut(&mut self, type_name: &str) -> Option<&mut TypePopulation> {
        self.types.get_mut(type_name)
    }

    /// Iterate types in definition order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypePopulation)> {
        self.types.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Type names in definition order
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// All members of a type (empty if the type is unknown)
    pub fn members(&self, type_name: &str) -> &[Member] {
        self.types.get(type_name).map(TypePopulation::members).unwrap_or(&[])
    }

    /// Active members of a type (empty if the type is unknown)
    pub fn active_members(&self, type_name: &str) -> &[Member] {
        self.types
            .get(type_name)
            .map(TypePopulation::active_members)
            .unwrap_or(&[])
    }

    /// Resolve a member reference
    pub fn member(&self, member: &MemberRef) -> Option<&Member> {
        self.types.get(&member.type_name)?.member(member.index)
    }

    /// Total members across all types
    pub fn total_members(&self) -> usize {
        self.types.values().map(TypePopulation::len).sum()
    }

    /// Parent/child type graph recorded while mapping
    pub fn graph(&self) -> &TypeGraph {
        &self.graph
    }

    pub(crate) fn graph_mut(&mut self) -> &mut TypeGraph {
        &mut self.graph
    }

    /// Number of mutation passes that changed the population
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub(crate) fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Serializable copy of every member, by type
    pub fn snapshot(&self) -> IndexMap<String, Vec<MemberSnapshot>> {
        self.types
            .iter()
            .map(|(name, t)| (name.clone(), t.members().iter().map(Member::snapshot).collect()))
            .collect()
    }
}
