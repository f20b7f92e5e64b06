//! Population members
//!
//! ## Table of Contents
//! - **Member**: One typed instance with attributes and parent/child links
//! - **MemberSnapshot**: Serializable point-in-time view of a member

use crate::types::MemberRef;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};

/// One instance of a typed entity or resource
///
/// Links and attributes are written during the build phase only. After the
/// population is published the `active` flag is the sole mutable state.
#[derive(Debug)]
pub struct Member {
    type_name: String,
    index: usize,
    active: AtomicBool,
    attributes: IndexMap<String, Value>,
    children: IndexMap<String, Vec<MemberRef>>,
    parents: IndexMap<String, Vec<MemberRef>>,
}

impl Member {
    /// Create a member with no attributes or links
    pub fn new(type_name: impl Into<String>, index: usize, active: bool) -> Self {
        Self {
            type_name: type_name.into(),
            index,
            active: AtomicBool::new(active),
            attributes: IndexMap::new(),
            children: IndexMap::new(),
            parents: IndexMap::new(),
        }
    }

    /// Member type
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Position in the type's member list
    pub fn index(&self) -> usize {
        self.index
    }

    /// Reference to this member
    pub fn member_ref(&self) -> MemberRef {
        MemberRef::new(self.type_name.clone(), self.index)
    }

    /// Whether the member is currently live
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// All attributes in insertion order
    pub fn attributes(&self) -> &IndexMap<String, Value> {
        &self.attributes
    }

    /// A single attribute
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Set an attribute (build phase only)
    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    /// Children grouped by type
    pub fn children_by_type(&self) -> &IndexMap<String, Vec<MemberRef>> {
        &self.children
    }

    /// Children of one type (empty if none)
    pub fn children(&self, child_type: &str) -> &[MemberRef] {
        self.children.get(child_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of children of one type
    pub fn child_count(&self, child_type: &str) -> usize {
        self.children(child_type).len()
    }

    /// Parents grouped by type, each list in link order
    pub fn parents_by_type(&self) -> &IndexMap<String, Vec<MemberRef>> {
        &self.parents
    }

    /// Parents of one type (empty if none)
    pub fn parents(&self, parent_type: &str) -> &[MemberRef] {
        self.parents.get(parent_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of parents of one type
    pub fn parent_count(&self, parent_type: &str) -> usize {
        self.parents(parent_type).len()
    }

    /// First parent linked for a type; copy and modify operations read from it
    pub fn primary_parent(&self, parent_type: &str) -> Option<&MemberRef> {
        self.parents(parent_type).first()
    }

    pub(crate) fn init_children(&mut self, child_type: &str) {
        self.children.entry(child_type.to_string()).or_default();
    }

    pub(crate) fn push_child(&mut self, child: MemberRef) {
        self.children
            .entry(child.type_name.clone())
            .or_default()
            .push(child);
    }

    pub(crate) fn push_parent(&mut self, parent: MemberRef) {
        self.parents
            .entry(parent.type_name.clone())
            .or_default()
            .push(parent);
    }

    /// Serializable view of the member
    pub fn snapshot(&self) -> MemberSnapshot {
        MemberSnapshot {
            type_name: self.type_name.clone(),
            index: self.index,
            active: self.is_active(),
            attributes: self.attributes.clone(),
            children: self.children.clone(),
            parents: self.parents.clone(),
        }
    }
}

/// Members are equal when type and attribute mapping match
impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && self.attributes == other.attributes
    }
}

impl Eq for Member {}

/// Point-in-time copy of a member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSnapshot {
    /// Member type
    #[serde(rename = "type")]
    pub type_name: String,
    /// Position in the type's list
    pub index: usize,
    /// Active flag at snapshot time
    pub active: bool,
    /// Attribute values
    pub attributes: IndexMap<String, Value>,
    /// Children by type
    pub children: IndexMap<String, Vec<MemberRef>>,
    /// Parents by type
    pub parents: IndexMap<String, Vec<MemberRef>>,
}
