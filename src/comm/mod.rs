//! Partition-interface communicators and the collective protocols built on
//! top of them.
//!
//! The internal communicator catalogs every boundary entity of one kind that
//! this process shares with anyone; the external communicators record, per
//! neighbour rank, exactly which of those entities travel to that neighbour
//! and in what order. Reductions merge per-partition results into one global
//! answer at the root.

pub mod communicator;
pub mod exchange;
pub mod external;
pub mod internal;
pub mod reduction;
pub mod wire;

use serde::{Deserialize, Serialize};

/// Kind of boundary entity a communicator tracks. Each kind gets its own
/// wire channel so node, edge and face traffic never interleave.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Node,
    Edge,
    Face,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Node, EntityKind::Edge, EntityKind::Face];

    /// Per-kind channel offset added to a base [`communicator::CommTag`].
    pub const fn channel(self) -> u16 {
        match self {
            EntityKind::Node => 0,
            EntityKind::Edge => 1,
            EntityKind::Face => 2,
        }
    }
}
