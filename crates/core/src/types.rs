//! Identifier types for the workspace model
//!
//! This module defines the foundational identifiers:
//! - EntityTypeId: per-process tag of a registered entity type
//! - EntityId: (type tag, slot) pair addressing one entity
//! - ConnectionKind / ConnectionId: typed parent-child edge descriptors
//!
//! Type tags are assigned in registration order. They are stable within a
//! process but must be remapped by name when data crosses processes.

use std::fmt;

/// Tag of a registered entity type
///
/// Index into the owning `EntityTypeRegistry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityTypeId(pub u16);

impl EntityTypeId {
    /// Position of this type in its registry
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one entity within a lineage of snapshots
///
/// Slots are allocated append-only per family and never reused, so an id
/// observed in an ancestor snapshot never names a different entity later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    /// Entity type tag
    pub type_id: EntityTypeId,
    /// Slot index inside the type's family
    pub slot: u32,
}

impl EntityId {
    /// Create an entity id
    pub fn new(type_id: EntityTypeId, slot: u32) -> Self {
        EntityId { type_id, slot }
    }

    /// Pack into a single integer (type tag in the high bits)
    pub fn as_u64(self) -> u64 {
        ((self.type_id.0 as u64) << 32) | self.slot as u64
    }

    /// Inverse of [`EntityId::as_u64`]
    pub fn from_u64(packed: u64) -> Self {
        EntityId {
            type_id: EntityTypeId((packed >> 32) as u16),
            slot: packed as u32,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId(type={}, slot={})", self.type_id, self.slot)
    }
}

/// Cardinality of a parent-child connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectionKind {
    /// One parent, at most one child
    OneToOne,
    /// One parent, ordered list of children
    OneToMany,
    /// One-to-one where either side may be any subtype of the declared type
    AbstractOneToOne,
    /// One-to-many where either side may be any subtype of the declared type
    AbstractOneToMany,
}

impl ConnectionKind {
    /// True for both one-to-one variants
    pub fn is_one_to_one(self) -> bool {
        matches!(self, ConnectionKind::OneToOne | ConnectionKind::AbstractOneToOne)
    }

    /// True for the polymorphic variants
    pub fn is_abstract(self) -> bool {
        matches!(
            self,
            ConnectionKind::AbstractOneToOne | ConnectionKind::AbstractOneToMany
        )
    }

    /// Stable wire tag
    pub fn as_u8(self) -> u8 {
        match self {
            ConnectionKind::OneToOne => 0,
            ConnectionKind::OneToMany => 1,
            ConnectionKind::AbstractOneToOne => 2,
            ConnectionKind::AbstractOneToMany => 3,
        }
    }

    /// Parse a wire tag
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ConnectionKind::OneToOne),
            1 => Some(ConnectionKind::OneToMany),
            2 => Some(ConnectionKind::AbstractOneToOne),
            3 => Some(ConnectionKind::AbstractOneToMany),
            _ => None,
        }
    }
}

/// Directed, typed edge kind between a parent type and a child type
///
/// `parent_nullable` describes the child's reference to its parent: when
/// false, removing the parent removes the child; when true, the child is
/// detached and keeps living without a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    /// Declared parent type
    pub parent: EntityTypeId,
    /// Declared child type
    pub child: EntityTypeId,
    /// Cardinality
    pub kind: ConnectionKind,
    /// Whether the child may exist without a parent
    pub parent_nullable: bool,
}

impl ConnectionId {
    /// Create a connection id
    pub fn new(
        parent: EntityTypeId,
        child: EntityTypeId,
        kind: ConnectionKind,
        parent_nullable: bool,
    ) -> Self {
        ConnectionId {
            parent,
            child,
            kind,
            parent_nullable,
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Connection({} -> {}, {:?}, nullable={})",
            self.parent, self.child, self.kind, self.parent_nullable
        )
    }
}
