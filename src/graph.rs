//! Parent/child type graph
//!
//! Built from every children distribution. The level of a type is the length
//! of the longest parent chain above it: roots are level 0, and a type sits
//! one level below its deepest parent.

use crate::definition::Definitions;
use crate::error::{PopulationError, Result};
use indexmap::{IndexMap, IndexSet};
use std::collections::{BTreeMap, HashMap};

/// Edges of one type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeNode {
    /// Parent types, in first-seen order
    pub parents: IndexSet<String>,
    /// Child types, in first-seen order
    pub children: IndexSet<String>,
}

/// Derived type → {parents, children} mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeGraph {
    nodes: IndexMap<String, TypeNode>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done(usize),
}

impl TypeGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the full graph for a definition set
    pub fn from_definitions(definitions: &Definitions) -> Self {
        let mut graph = Self::new();
        for definition in definitions.iter() {
            graph.nodes.entry(definition.name.clone()).or_default();
            for child in definition.children_distribution.keys() {
                graph.add_edge(&definition.name, child);
            }
        }
        graph
    }

    /// Record `parent → child`; repeated edges are stored once
    pub fn add_edge(&mut self, parent: &str, child: &str) {
        self.nodes
            .entry(parent.to_string())
            .or_default()
            .children
            .insert(child.to_string());
        self.nodes
            .entry(child.to_string())
            .or_default()
            .parents
            .insert(parent.to_string());
    }

    /// Edges of a type, if it takes part in any relation
    pub fn node(&self, type_name: &str) -> Option<&TypeNode> {
        self.nodes.get(type_name)
    }

    /// Parent types of a type
    pub fn parents(&self, type_name: &str) -> impl Iterator<Item = &str> {
        self.nodes
            .get(type_name)
            .into_iter()
            .flat_map(|n| n.parents.iter().map(String::as_str))
    }

    /// Child types of a type
    pub fn children(&self, type_name: &str) -> impl Iterator<Item = &str> {
        self.nodes
            .get(type_name)
            .into_iter()
            .flat_map(|n| n.children.iter().map(String::as_str))
    }

    /// Level of one type (0 for roots and unknown types)
    pub fn level(&self, type_name: &str) -> Result<usize> {
        let mut marks = HashMap::new();
        self.level_inner(type_name, &mut marks)
    }

    /// Level of every known type; fails on cycles
    pub fn levels(&self) -> Result<IndexMap<String, usize>> {
        let mut marks = HashMap::new();
        let mut levels = IndexMap::new();
        for name in self.nodes.keys() {
            levels.insert(name.clone(), self.level_inner(name, &mut marks)?);
        }
        Ok(levels)
    }

    /// Group the given types into ascending level buckets, preserving input
    /// order within a bucket
    pub fn buckets<'a, I>(&self, types: I) -> Result<BTreeMap<usize, Vec<&'a str>>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut marks = HashMap::new();
        let mut buckets: BTreeMap<usize, Vec<&'a str>> = BTreeMap::new();
        for name in types {
            let level = self.level_inner(name, &mut marks)?;
            buckets.entry(level).or_default().push(name);
        }
        Ok(buckets)
    }

    fn level_inner<'g>(&'g self, type_name: &'g str, marks: &mut HashMap<&'g str, Mark>) -> Result<usize> {
        match marks.get(type_name) {
            Some(Mark::Done(level)) => return Ok(*level),
            Some(Mark::Visiting) => {
                return Err(PopulationError::config(format!(
                    "children distribution cycle through type '{}'",
                    type_name
                )))
            }
            None => {}
        }

        let Some(node) = self.nodes.get(type_name) else {
            return Ok(0);
        };

        marks.insert(type_name, Mark::Visiting);
        let mut level = 0;
        for parent in &node.parents {
            level = level.max(self.level_inner(parent, marks)? + 1);
        }
        marks.insert(type_name, Mark::Done(level));
        Ok(level)
    }
}
