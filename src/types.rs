//! Core identifier types
//!
//! ## Table of Contents
//! - **SessionId**: Identifies one generation session
//! - **ModificationId**: Unique identifier of a scheduled runtime modification
//! - **MemberRef**: Link from one member to another (type + position)
//! - **ActiveWindow**: The contiguous run of active members of a type

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session ID from a caller-supplied key
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random session ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Unique identifier for a runtime modification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModificationId(Uuid);

impl ModificationId {
    /// Create a new random ModificationId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ModificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ModificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mod-{}", &self.0.to_string()[..8])
    }
}

/// Reference to a member by type name and position in that type's list
///
/// Positions are stable for the lifetime of a session, so a reference never
/// dangles once the population is built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberRef {
    /// Member type
    pub type_name: String,
    /// Index within the type's member list
    pub index: usize,
}

impl MemberRef {
    /// Create a new member reference
    pub fn new(type_name: impl Into<String>, index: usize) -> Self {
        Self {
            type_name: type_name.into(),
            index,
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.type_name, self.index)
    }
}

/// Half-open range `[start, end)` of active members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActiveWindow {
    /// First active index
    pub start: usize,
    /// One past the last active index
    pub end: usize,
}

impl ActiveWindow {
    /// Create a new window
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Number of active members
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// True when no member is active
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Check whether an index falls inside the window
    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }

    pub(crate) fn pack(self) -> u64 {
        ((self.start as u64) << 32) | (self.end as u64 & 0xFFFF_FFFF)
    }

    pub(crate) fn unpack(packed: u64) -> Self {
        Self {
            start: (packed >> 32) as usize,
            end: (packed & 0xFFFF_FFFF) as usize,
        }
    }
}

impl fmt::Display for ActiveWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
