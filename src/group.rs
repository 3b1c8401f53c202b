//! Groups: one local mesh partition plus its boundary index maps.
//!
//! A group owns exactly one partition (behind the sequential mesh kernel)
//! and its metric field, and for each entity kind the bidirectional pairing
//! between local entity ids (`index1`) and internal-communicator slots
//! (`index2`). Those pairings are only meaningful relative to the internal
//! communicators of the owning [`crate::parmesh::ParMesh`]; a group never
//! outlives it.

use crate::comm::EntityKind;
use crate::error::ParMeshError;
use crate::mem::MemoryLedger;

/// Paired index maps for one entity kind: `index1[i]` is a local mesh
/// entity id, `index2[i]` the internal-communicator slot of the same
/// entity. Both arrays always have equal length `nitem`; an empty pair is
/// the unset state.
#[derive(Debug, Default)]
pub struct GroupComm {
    pub index1: Vec<usize>,
    pub index2: Vec<usize>,
}

impl GroupComm {
    /// Boundary entities of this kind recorded for the group.
    pub fn nitem(&self) -> usize {
        debug_assert_eq!(
            self.index1.len(),
            self.index2.len(),
            "index maps out of sync"
        );
        self.index1.len()
    }

    /// Append `(local id, slot)` pairs, charging the ledger for both
    /// arrays. The pairing grows atomically: on a failed charge nothing is
    /// appended.
    pub fn append(
        &mut self,
        local_ids: &[usize],
        slots: impl IntoIterator<Item = usize>,
        mem: &mut MemoryLedger,
    ) -> Result<(), ParMeshError> {
        mem.charge(2 * local_ids.len() * std::mem::size_of::<usize>())?;
        self.index1.extend_from_slice(local_ids);
        self.index2.extend(slots);
        if self.index1.len() != self.index2.len() {
            return Err(ParMeshError::IndexMapMismatch {
                len1: self.index1.len(),
                len2: self.index2.len(),
            });
        }
        Ok(())
    }

    /// Release both index maps; `nitem` drops to zero. Idempotent.
    pub fn free(&mut self, mem: &mut MemoryLedger) {
        let n = self.index1.len() + self.index2.len();
        if n > 0 {
            mem.release(n * std::mem::size_of::<usize>());
            self.index1 = Vec::new();
            self.index2 = Vec::new();
        }
    }
}

/// Per-node sizing field the kernel adapts against: one value per node for
/// isotropic sizing, six (a metric tensor) for anisotropic.
#[derive(Debug, Clone, Default)]
pub struct MetricField {
    pub size: usize,
    pub values: Vec<f64>,
}

impl MetricField {
    pub fn iso() -> Self {
        Self {
            size: 1,
            values: Vec::new(),
        }
    }

    pub fn aniso() -> Self {
        Self {
            size: 6,
            values: Vec::new(),
        }
    }
}

/// One process-local partition: the kernel-owned mesh, its metric, and the
/// three per-kind index maps. Dropping a group releases all of them.
#[derive(Debug)]
pub struct Group<M> {
    pub mesh: M,
    pub met: MetricField,
    node_comm: GroupComm,
    edge_comm: GroupComm,
    face_comm: GroupComm,
}

impl<M> Group<M> {
    pub fn new(mesh: M, met: MetricField) -> Self {
        Self {
            mesh,
            met,
            node_comm: GroupComm::default(),
            edge_comm: GroupComm::default(),
            face_comm: GroupComm::default(),
        }
    }

    pub fn comm(&self, kind: EntityKind) -> &GroupComm {
        match kind {
            EntityKind::Node => &self.node_comm,
            EntityKind::Edge => &self.edge_comm,
            EntityKind::Face => &self.face_comm,
        }
    }

    pub fn comm_mut(&mut self, kind: EntityKind) -> &mut GroupComm {
        match kind {
            EntityKind::Node => &mut self.node_comm,
            EntityKind::Edge => &mut self.edge_comm,
            EntityKind::Face => &mut self.face_comm,
        }
    }

    /// Release the three index maps. The mesh and metric go with the group
    /// itself when it is dropped.
    pub fn free_comms(&mut self, mem: &mut MemoryLedger) {
        self.node_comm.free(mem);
        self.edge_comm.free(mem);
        self.face_comm.free(mem);
    }
}
