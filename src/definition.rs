//! Type definitions and runtime modifications
//!
//! ## Table of Contents
//! - **ModificationKind**: ADD / REMOVE / CHURN
//! - **RuntimeModification**: A scheduled change of a type's active window
//! - **TypeDefinition**: Declarative configuration of one member type
//! - **Definitions**: Validated, ordered set of type definitions

use crate::error::{PopulationError, Result};
use crate::graph::TypeGraph;
use crate::operations::AttributeOperation;
use crate::types::ModificationId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Largest member count a type may reach, including reserved capacity.
/// Active windows are published as two 32-bit halves of one atomic.
pub const MAX_MEMBERS_PER_TYPE: usize = u32::MAX as usize;

/// Kind of runtime modification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModificationKind {
    /// Activate members after the active window
    Add,
    /// Deactivate members at the start of the active window
    Remove,
    /// Remove then add: same size, window shifted forward
    Churn,
}

impl std::fmt::Display for ModificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModificationKind::Add => "ADD",
            ModificationKind::Remove => "REMOVE",
            ModificationKind::Churn => "CHURN",
        };
        write!(f, "{}", s)
    }
}

/// Scheduled population change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeModification {
    /// Generated identifier used to track the last application
    #[serde(default, skip_serializing)]
    pub id: ModificationId,
    /// Modification kind
    #[serde(rename = "type")]
    pub kind: ModificationKind,
    /// Minutes between applications
    pub frequency_minutes: u64,
    /// Members affected per application
    pub quantity: usize,
    /// Applications happen strictly after this many minutes
    #[serde(default)]
    pub start_after_minutes: u64,
    /// Applications stop after this many minutes
    pub end_after_minutes: u64,
}

impl RuntimeModification {
    /// Create a modification running from minute 0 until `end_after_minutes`
    pub fn new(kind: ModificationKind, quantity: usize, frequency_minutes: u64, end_after_minutes: u64) -> Self {
        Self {
            id: ModificationId::new(),
            kind,
            frequency_minutes,
            quantity,
            start_after_minutes: 0,
            end_after_minutes,
        }
    }

    /// ADD modification
    pub fn add(quantity: usize, frequency_minutes: u64, end_after_minutes: u64) -> Self {
        Self::new(ModificationKind::Add, quantity, frequency_minutes, end_after_minutes)
    }

    /// REMOVE modification
    pub fn remove(quantity: usize, frequency_minutes: u64, end_after_minutes: u64) -> Self {
        Self::new(ModificationKind::Remove, quantity, frequency_minutes, end_after_minutes)
    }

    /// CHURN modification
    pub fn churn(quantity: usize, frequency_minutes: u64, end_after_minutes: u64) -> Self {
        Self::new(ModificationKind::Churn, quantity, frequency_minutes, end_after_minutes)
    }

    /// Set the start offset
    pub fn starting_after(mut self, minutes: u64) -> Self {
        self.start_after_minutes = minutes;
        self
    }

    /// Maximum number of applications over the modification's lifetime
    pub fn max_applications(&self) -> u64 {
        if self.frequency_minutes == 0 {
            return 0;
        }
        self.end_after_minutes.saturating_sub(self.start_after_minutes) / self.frequency_minutes
    }

    /// Members that must be pre-allocated for this modification, or `None`
    /// if the product does not fit in a `usize`
    pub fn checked_extra_capacity(&self) -> Option<usize> {
        match self.kind {
            ModificationKind::Remove => Some(0),
            ModificationKind::Add | ModificationKind::Churn => usize::try_from(self.max_applications())
                .ok()?
                .checked_mul(self.quantity),
        }
    }

    /// Members that must be pre-allocated for this modification (saturating)
    pub fn extra_capacity(&self) -> usize {
        self.checked_extra_capacity().unwrap_or(usize::MAX)
    }

    fn validate(&self, type_name: &str, base_count: usize) -> Result<()> {
        let err = |msg: String| {
            Err(PopulationError::config(format!(
                "type '{}': {} modification: {}",
                type_name, self.kind, msg
            )))
        };
        if self.frequency_minutes < 1 {
            return err("frequencyMinutes must be at least 1".into());
        }
        if self.quantity < 1 {
            return err("quantity must be at least 1".into());
        }
        if self.end_after_minutes < self.frequency_minutes {
            return err(format!(
                "endAfterMinutes ({}) must not be less than frequencyMinutes ({})",
                self.end_after_minutes, self.frequency_minutes
            ));
        }
        if self.start_after_minutes >= self.end_after_minutes {
            return err("startAfterMinutes must be before endAfterMinutes".into());
        }
        if self.kind != ModificationKind::Add && self.quantity > base_count {
            return err(format!(
                "quantity ({}) exceeds base count ({})",
                self.quantity, base_count
            ));
        }
        Ok(())
    }
}

/// Declarative configuration for one member type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDefinition {
    /// Unique type name
    pub name: String,
    /// Base instance count (active at session start)
    #[serde(default)]
    pub count: usize,
    /// Attribute name to expression, evaluated in order
    #[serde(default)]
    pub attributes: IndexMap<String, String>,
    /// Child type name to per-parent count expression
    #[serde(default)]
    pub children_distribution: IndexMap<String, String>,
    /// Operation expressions applied after parent/child mapping
    #[serde(default)]
    pub attribute_operations: Vec<String>,
    /// Scheduled changes to the active window
    #[serde(default)]
    pub runtime_modifications: Vec<RuntimeModification>,
}

impl TypeDefinition {
    /// Create a definition with a base count
    pub fn new(name: impl Into<String>, count: usize) -> Self {
        Self {
            name: name.into(),
            count,
            attributes: IndexMap::new(),
            children_distribution: IndexMap::new(),
            attribute_operations: Vec::new(),
            runtime_modifications: Vec::new(),
        }
    }

    /// Add an attribute formula
    pub fn with_attribute(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), expression.into());
        self
    }

    /// Add a child type with its per-parent count expression
    pub fn with_children(mut self, child_type: impl Into<String>, count_expression: impl Into<String>) -> Self {
        self.children_distribution
            .insert(child_type.into(), count_expression.into());
        self
    }

    /// Append an attribute operation
    pub fn with_operation(mut self, expression: impl Into<String>) -> Self {
        self.attribute_operations.push(expression.into());
        self
    }

    /// Append a runtime modification
    pub fn with_modification(mut self, modification: RuntimeModification) -> Self {
        self.runtime_modifications.push(modification);
        self
    }

    /// Total instances ever needed: base count plus capacity reserved for
    /// every non-REMOVE modification
    ///
    /// Saturates on overflow; validation rejects such definitions.
    pub fn count_with_runtime_modifications(&self) -> usize {
        self.checked_capacity().unwrap_or(usize::MAX)
    }

    fn checked_capacity(&self) -> Option<usize> {
        self.runtime_modifications
            .iter()
            .try_fold(self.count, |total, m| total.checked_add(m.checked_extra_capacity()?))
    }

    fn validate_local(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PopulationError::config("type name must not be blank"));
        }
        if self.count < 1 {
            return Err(PopulationError::config(format!(
                "type '{}': count must be at least 1",
                self.name
            )));
        }
        if self.attributes.is_empty() {
            return Err(PopulationError::config(format!(
                "type '{}': at least one attribute is required",
                self.name
            )));
        }
        for (key, expression) in &self.attributes {
            if key.trim().is_empty() || expression.trim().is_empty() {
                return Err(PopulationError::config(format!(
                    "type '{}': attribute names and expressions must not be blank",
                    self.name
                )));
            }
        }
        for (child, expression) in &self.children_distribution {
            if expression.trim().is_empty() {
                return Err(PopulationError::config(format!(
                    "type '{}': count expression for child '{}' is blank",
                    self.name, child
                )));
            }
        }
        for modification in &self.runtime_modifications {
            modification.validate(&self.name, self.count)?;
        }
        match self.checked_capacity() {
            Some(capacity) if capacity <= MAX_MEMBERS_PER_TYPE => Ok(()),
            _ => Err(PopulationError::config(format!(
                "type '{}': runtime modifications need more than {} members",
                self.name, MAX_MEMBERS_PER_TYPE
            ))),
        }
    }
}

/// Ordered set of type definitions for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Definitions {
    types: Vec<TypeDefinition>,
}

impl Definitions {
    /// Create from a list of definitions (not yet validated)
    pub fn new(types: Vec<TypeDefinition>) -> Self {
        Self { types }
    }

    /// Parse and validate a JSON array of type definitions
    pub fn from_json_str(json: &str) -> Result<Self> {
        let definitions: Self = serde_json::from_str(json)?;
        definitions.validate()?;
        Ok(definitions)
    }

    /// Read, parse and validate a JSON definitions file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Loading type definitions");
        Self::from_json_str(&contents)
    }

    /// Append a definition
    pub fn push(&mut self, definition: TypeDefinition) {
        self.types.push(definition);
    }

    /// Definitions in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.iter()
    }

    /// Look up a definition by name
    pub fn get(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Number of types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True when no types are defined
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Validate every configuration rule; nothing is built on failure
    pub fn validate(&self) -> Result<()> {
        if self.types.is_empty() {
            return Err(PopulationError::config("no type definitions supplied"));
        }

        let mut names = HashSet::new();
        for definition in &self.types {
            definition.validate_local()?;
            if !names.insert(definition.name.as_str()) {
                return Err(PopulationError::config(format!(
                    "duplicate type name '{}'",
                    definition.name
                )));
            }
        }

        for definition in &self.types {
            for child in definition.children_distribution.keys() {
                if !names.contains(child.as_str()) {
                    return Err(PopulationError::config(format!(
                        "type '{}': unknown child type '{}'",
                        definition.name, child
                    )));
                }
            }
            for expression in &definition.attribute_operations {
                let operation = AttributeOperation::parse(expression)?;
                if !names.contains(operation.parent_type()) {
                    return Err(PopulationError::config(format!(
                        "type '{}': operation `{}` names unknown parent type '{}'",
                        definition.name,
                        expression,
                        operation.parent_type()
                    )));
                }
            }
        }

        TypeGraph::from_definitions(self).levels()?;
        Ok(())
    }
}

impl FromIterator<TypeDefinition> for Definitions {
    fn from_iter<I: IntoIterator<Item = TypeDefinition>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
