//! Member kinds
//!
//! The engine is generic over a marker type so that entity and resource
//! populations share one implementation while keeping separate sessions,
//! stores and sequence keys.

use std::fmt::Debug;

/// Marker trait for a family of members
pub trait MemberKind: Debug + Send + Sync + 'static {
    /// Short label used in context keys, logs and metric labels
    const LABEL: &'static str;
}

/// Entities (hosts, nodes, pods, containers...)
#[derive(Debug, Clone, Copy, Default)]
pub struct Entity;

impl MemberKind for Entity {
    const LABEL: &'static str = "entity";
}

/// Resources (disks, volumes, network interfaces...)
#[derive(Debug, Clone, Copy, Default)]
pub struct Resource;

impl MemberKind for Resource {
    const LABEL: &'static str = "resource";
}
