//! ParMesh: the process-wide aggregate.
//!
//! Owns the groups living on this process, one internal communicator per
//! entity kind, the per-neighbour external communicator sets, and the
//! memory ledger every allocation is charged against. All cross-partition
//! relations are logical (an entity known to two ranks) and are realized
//! exclusively through message exchange; nothing here ever references
//! another process's memory.

use crate::comm::EntityKind;
use crate::comm::communicator::{CommCtx, Communicator};
use crate::comm::exchange::exchange_external;
use crate::comm::external::ExternalComm;
use crate::comm::internal::InternalComm;
use crate::error::ParMeshError;
use crate::group::{Group, MetricField};
use crate::kernel::MeshKernel;
use crate::mem::MemoryLedger;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration options, each propagated identically to every local
/// group's kernel. A kernel failure on any group fails the whole call.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Param {
    /// Verbosity of the run; also controls the root's banners and reports.
    Verbose(i32),
    /// Per-process memory budget in bytes. Non-positive values are rejected
    /// with a warning and the current budget is kept; the budget is
    /// redistributed evenly across local groups.
    MemoryBudget(i64),
    Debug(bool),
    AngleDetection(bool),
    IsoSurface(bool),
    Lagrangian(i32),
    Optim(bool),
    OptimLes(bool),
    NoInsert(bool),
    NoSwap(bool),
    NoMove(bool),
    NoSurf(bool),
    LocalParamCount(u32),
    AnisoSize(bool),
}

/// Eagerly-validated configuration for a new [`ParMesh`].
///
/// Replaces keyword-tagged variadic initialization with one explicit value
/// object: every optional field has a default, and validation happens
/// before any allocation.
pub struct ParMeshBuilder<C, M> {
    ctx: CommCtx<C>,
    dim: usize,
    mesh: M,
    met: MetricField,
}

impl<C: Communicator, M: MeshKernel> ParMeshBuilder<C, M> {
    /// Start from the execution context and the kernel owning the (still
    /// undistributed) partition. Defaults: dimension 3, isotropic metric.
    pub fn new(ctx: CommCtx<C>, mesh: M) -> Self {
        Self {
            ctx,
            dim: 3,
            mesh,
            met: MetricField::iso(),
        }
    }

    pub fn dim(mut self, dim: usize) -> Self {
        self.dim = dim;
        self
    }

    pub fn metric(mut self, met: MetricField) -> Self {
        self.met = met;
        self
    }

    /// Validate and build a ParMesh with exactly one group, a default
    /// memory budget and empty communicators. Configuration problems are
    /// corrected with a warning; only an exhausted ledger fails the build,
    /// in which case nothing is leaked.
    pub fn build(self) -> Result<ParMesh<C, M>, ParMeshError> {
        let dim = if self.dim == 3 {
            self.dim
        } else {
            log::warn!("dimension {} is not supported, falling back to 3", self.dim);
            3
        };
        let met = if self.met.size == 1 || self.met.size == 6 {
            self.met
        } else {
            log::warn!(
                "metric size {} is neither isotropic (1) nor anisotropic (6), falling back to isotropic",
                self.met.size
            );
            MetricField::iso()
        };

        let mut mem = MemoryLedger::default();
        mem.charge(std::mem::size_of::<ParMesh<C, M>>())?;

        Ok(ParMesh {
            ctx: self.ctx,
            dim,
            verbose: 1,
            listgrp: vec![Group::new(self.mesh, met)],
            int_node_comm: InternalComm::new(),
            int_edge_comm: InternalComm::new(),
            int_face_comm: InternalComm::new(),
            ext_node_comm: Vec::new(),
            ext_edge_comm: Vec::new(),
            ext_face_comm: Vec::new(),
            mem,
        })
    }
}

/// Distributed mesh aggregate for one process.
#[derive(Debug)]
pub struct ParMesh<C: Communicator, M: MeshKernel> {
    ctx: CommCtx<C>,
    dim: usize,
    verbose: i32,
    pub listgrp: Vec<Group<M>>,
    pub int_node_comm: InternalComm,
    pub int_edge_comm: InternalComm,
    pub int_face_comm: InternalComm,
    pub ext_node_comm: Vec<ExternalComm>,
    pub ext_edge_comm: Vec<ExternalComm>,
    pub ext_face_comm: Vec<ExternalComm>,
    pub mem: MemoryLedger,
}

impl<C: Communicator, M: MeshKernel> ParMesh<C, M> {
    pub fn ctx(&self) -> &CommCtx<C> {
        &self.ctx
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn verbose(&self) -> i32 {
        self.verbose
    }

    /// Number of groups on this process.
    pub fn ngrp(&self) -> usize {
        self.listgrp.len()
    }

    /// Hand another partition to this process (load-balancing path).
    pub fn add_group(&mut self, mesh: M, met: MetricField) {
        self.listgrp.push(Group::new(mesh, met));
    }

    pub fn int_comm(&self, kind: EntityKind) -> &InternalComm {
        match kind {
            EntityKind::Node => &self.int_node_comm,
            EntityKind::Edge => &self.int_edge_comm,
            EntityKind::Face => &self.int_face_comm,
        }
    }

    pub fn int_comm_mut(&mut self, kind: EntityKind) -> &mut InternalComm {
        match kind {
            EntityKind::Node => &mut self.int_node_comm,
            EntityKind::Edge => &mut self.int_edge_comm,
            EntityKind::Face => &mut self.int_face_comm,
        }
    }

    pub fn ext_comms(&self, kind: EntityKind) -> &[ExternalComm] {
        match kind {
            EntityKind::Node => &self.ext_node_comm,
            EntityKind::Edge => &self.ext_edge_comm,
            EntityKind::Face => &self.ext_face_comm,
        }
    }

    /// Apply one configuration option to the whole process (see [`Param`]).
    pub fn set_parameter(&mut self, param: Param) -> Result<(), ParMeshError> {
        match param {
            Param::MemoryBudget(val) => {
                if val <= 0 {
                    log::warn!(
                        "maximal memory authorized must be strictly positive, keeping {} bytes",
                        self.mem.max()
                    );
                } else {
                    self.mem.set_budget(val as usize);
                }
                // redistribute evenly across local groups
                let per_group = self.mem.max() / self.listgrp.len().max(1);
                for grp in &mut self.listgrp {
                    grp.mesh
                        .set_parameter(Param::MemoryBudget(per_group as i64))?;
                }
            }
            Param::Verbose(level) => {
                self.verbose = level;
                for grp in &mut self.listgrp {
                    grp.mesh.set_parameter(param)?;
                }
            }
            _ => {
                for grp in &mut self.listgrp {
                    grp.mesh.set_parameter(param)?;
                }
            }
        }
        Ok(())
    }

    /// Populate the internal communicator of one kind from the groups'
    /// boundary entities.
    ///
    /// `boundaries[g]` lists group `g`'s local entity ids on the partition
    /// interface, in the group's own deterministic order. Each entity gets
    /// the next free internal slot; the group's `index2` records the
    /// assignment. On an exhausted ledger the whole kind is rolled back to
    /// the unpopulated state.
    pub fn populate_internal(
        &mut self,
        kind: EntityKind,
        boundaries: &[Vec<usize>],
    ) -> Result<(), ParMeshError> {
        if boundaries.len() != self.listgrp.len() {
            return Err(ParMeshError::Config(format!(
                "got boundary lists for {} groups, process has {}",
                boundaries.len(),
                self.listgrp.len()
            )));
        }
        let Self {
            listgrp,
            int_node_comm,
            int_edge_comm,
            int_face_comm,
            mem,
            ..
        } = self;
        let icomm = match kind {
            EntityKind::Node => int_node_comm,
            EntityKind::Edge => int_edge_comm,
            EntityKind::Face => int_face_comm,
        };
        let mut failed = None;
        for (grp, ids) in listgrp.iter_mut().zip(boundaries) {
            let slots = icomm.reserve_slots(ids.len());
            if let Err(e) = grp.comm_mut(kind).append(ids, slots, mem) {
                failed = Some(e);
                break;
            }
        }
        if let Some(e) = failed {
            for grp in listgrp.iter_mut() {
                grp.comm_mut(kind).free(mem);
            }
            icomm.free(mem);
            return Err(e);
        }
        Ok(())
    }

    /// Build the external communicator set of one kind from the
    /// slot-to-neighbour assignment `sharing` (internal slot, neighbour
    /// rank). One communicator per neighbour, neighbours in ascending rank
    /// order, each index in ascending slot order; both ends derive the
    /// same ordering without coordination. A failed allocation rolls the
    /// whole set back.
    pub fn build_external(
        &mut self,
        kind: EntityKind,
        sharing: &[(usize, usize)],
    ) -> Result<(), ParMeshError> {
        let rank = self.ctx.rank;
        let nitem = self.int_comm(kind).nitem();
        let mut by_nbr: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for &(slot, nbr) in sharing {
            if nbr == rank {
                return Err(ParMeshError::SelfNeighbour { rank });
            }
            debug_assert!(slot < nitem, "slot {slot} outside internal communicator");
            by_nbr.entry(nbr).or_default().push(slot);
        }

        let Self {
            ext_node_comm,
            ext_edge_comm,
            ext_face_comm,
            mem,
            ..
        } = self;
        let exts = match kind {
            EntityKind::Node => ext_node_comm,
            EntityKind::Edge => ext_edge_comm,
            EntityKind::Face => ext_face_comm,
        };
        // replace any previous set
        for c in exts.iter_mut() {
            c.free(mem);
        }
        exts.clear();

        for (nbr, slots) in by_nbr {
            match build_one(nbr, slots, mem) {
                Ok(ec) => exts.push(ec),
                Err(e) => {
                    for c in exts.iter_mut() {
                        c.free(mem);
                    }
                    exts.clear();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Gather internal scratch values into every external send buffer of
    /// one kind, following each communicator's `int_comm_index` order.
    pub fn stage(&mut self, kind: EntityKind) {
        let Self {
            int_node_comm,
            int_edge_comm,
            int_face_comm,
            ext_node_comm,
            ext_edge_comm,
            ext_face_comm,
            ..
        } = self;
        let (icomm, exts) = match kind {
            EntityKind::Node => (int_node_comm, ext_node_comm),
            EntityKind::Edge => (int_edge_comm, ext_edge_comm),
            EntityKind::Face => (int_face_comm, ext_face_comm),
        };
        for c in exts.iter_mut() {
            c.stage_from(&icomm.intvalues, &icomm.doublevalues);
        }
    }

    /// Scatter every external receive buffer of one kind back into the
    /// internal scratch arrays.
    pub fn unstage(&mut self, kind: EntityKind) {
        let Self {
            int_node_comm,
            int_edge_comm,
            int_face_comm,
            ext_node_comm,
            ext_edge_comm,
            ext_face_comm,
            ..
        } = self;
        let (icomm, exts) = match kind {
            EntityKind::Node => (int_node_comm, ext_node_comm),
            EntityKind::Edge => (int_edge_comm, ext_edge_comm),
            EntityKind::Face => (int_face_comm, ext_face_comm),
        };
        for c in exts.iter() {
            c.unstage_to(&mut icomm.intvalues, &mut icomm.doublevalues);
        }
    }

    /// Run one pairwise exchange round for one kind.
    pub fn exchange(&mut self, kind: EntityKind) -> Result<(), ParMeshError> {
        let Self {
            ctx,
            ext_node_comm,
            ext_edge_comm,
            ext_face_comm,
            ..
        } = self;
        let exts = match kind {
            EntityKind::Node => ext_node_comm,
            EntityKind::Edge => ext_edge_comm,
            EntityKind::Face => ext_face_comm,
        };
        exchange_external(ctx, kind, exts)
    }

    /// Release everything this process holds, in order: groups (cascading
    /// to index maps, mesh and metric), the three internal communicators,
    /// the three external communicator sets, then the group container.
    ///
    /// Safe on a partially-constructed ParMesh and idempotent; `Drop`
    /// delegates here.
    pub fn teardown(&mut self) {
        let Self {
            listgrp,
            int_node_comm,
            int_edge_comm,
            int_face_comm,
            ext_node_comm,
            ext_edge_comm,
            ext_face_comm,
            mem,
            ..
        } = self;
        for grp in listgrp.iter_mut() {
            grp.free_comms(mem);
        }
        listgrp.clear();
        int_node_comm.free(mem);
        int_edge_comm.free(mem);
        int_face_comm.free(mem);
        for set in [ext_node_comm, ext_edge_comm, ext_face_comm] {
            for c in set.iter_mut() {
                c.free(mem);
            }
            set.clear();
        }
    }
}

fn build_one(
    nbr: usize,
    slots: Vec<usize>,
    mem: &mut MemoryLedger,
) -> Result<ExternalComm, ParMeshError> {
    let mut ec = ExternalComm::new(nbr);
    let filled = (|| {
        ec.set_index(slots, mem)?;
        ec.alloc_int_buffers(mem)?;
        ec.alloc_real_buffers(mem)
    })();
    match filled {
        Ok(()) => Ok(ec),
        Err(e) => {
            ec.free(mem);
            Err(e)
        }
    }
}

impl<C: Communicator, M: MeshKernel> Drop for ParMesh<C, M> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::NoComm;
    use crate::kernel::{KernelError, MeshKernel};
    use crate::mem::DEFAULT_MEM_BUDGET;
    use crate::quality::QualityStats;

    #[derive(Debug, Default)]
    struct StubKernel {
        mem_budget: Option<i64>,
        params: Vec<Param>,
    }

    impl MeshKernel for StubKernel {
        fn set_parameter(&mut self, param: Param) -> Result<(), KernelError> {
            if let Param::MemoryBudget(v) = param {
                self.mem_budget = Some(v);
            }
            self.params.push(param);
            Ok(())
        }
        fn analyze(&mut self) -> Result<(), KernelError> {
            Ok(())
        }
        fn adapt(&mut self, _met: &mut MetricField) -> Result<(), KernelError> {
            Ok(())
        }
        fn rebuild_boundaries(&mut self) -> Result<(), KernelError> {
            Ok(())
        }
        fn unscale(&mut self) -> Result<(), KernelError> {
            Ok(())
        }
        fn quality(&self) -> QualityStats {
            QualityStats::default()
        }
    }

    fn parmesh() -> ParMesh<NoComm, StubKernel> {
        ParMeshBuilder::new(CommCtx::serial(), StubKernel::default())
            .build()
            .unwrap()
    }

    #[test]
    fn build_creates_one_group_with_default_budget() {
        let pm = parmesh();
        assert_eq!(pm.ngrp(), 1);
        assert_eq!(pm.mem.max(), DEFAULT_MEM_BUDGET);
        assert_eq!(pm.int_comm(EntityKind::Node).nitem(), 0);
        assert!(pm.ext_comms(EntityKind::Node).is_empty());
    }

    #[test]
    fn unsupported_dim_falls_back_to_3() {
        let pm = ParMeshBuilder::new(CommCtx::serial(), StubKernel::default())
            .dim(2)
            .build()
            .unwrap();
        assert_eq!(pm.dim(), 3);
    }

    #[test]
    fn zero_budget_keeps_default_and_still_propagates() {
        let mut pm = parmesh();
        pm.set_parameter(Param::MemoryBudget(0)).unwrap();
        assert_eq!(pm.mem.max(), DEFAULT_MEM_BUDGET);
        assert_eq!(
            pm.listgrp[0].mesh.mem_budget,
            Some(DEFAULT_MEM_BUDGET as i64)
        );
    }

    #[test]
    fn budget_is_split_evenly_across_groups() {
        let mut pm = parmesh();
        for _ in 0..3 {
            pm.add_group(StubKernel::default(), MetricField::iso());
        }
        pm.set_parameter(Param::MemoryBudget(4096)).unwrap();
        assert_eq!(pm.mem.max(), 4096);
        for grp in &pm.listgrp {
            assert_eq!(grp.mesh.mem_budget, Some(1024));
        }
    }

    #[test]
    fn non_memory_params_reach_every_group() {
        let mut pm = parmesh();
        pm.add_group(StubKernel::default(), MetricField::iso());
        pm.set_parameter(Param::NoSwap(true)).unwrap();
        for grp in &pm.listgrp {
            assert_eq!(grp.mesh.params, vec![Param::NoSwap(true)]);
        }
    }

    #[test]
    fn populate_keeps_index_maps_paired() {
        let mut pm = parmesh();
        pm.add_group(StubKernel::default(), MetricField::iso());
        pm.populate_internal(EntityKind::Node, &[vec![4, 7, 9], vec![2, 4]])
            .unwrap();

        assert_eq!(pm.int_comm(EntityKind::Node).nitem(), 5);
        let g0 = pm.listgrp[0].comm(EntityKind::Node);
        assert_eq!(g0.nitem(), 3);
        assert_eq!(g0.index1, vec![4, 7, 9]);
        assert_eq!(g0.index2, vec![0, 1, 2]);
        let g1 = pm.listgrp[1].comm(EntityKind::Node);
        assert_eq!(g1.nitem(), 2);
        assert_eq!(g1.index2, vec![3, 4]);
    }

    #[test]
    fn build_external_orders_by_neighbor_then_slot() {
        let mut pm = parmesh();
        pm.populate_internal(EntityKind::Face, &[vec![1, 2, 3, 4]])
            .unwrap();
        pm.build_external(EntityKind::Face, &[(3, 2), (0, 1), (1, 2), (2, 1)])
            .unwrap();

        let exts = pm.ext_comms(EntityKind::Face);
        assert_eq!(exts.len(), 2);
        assert_eq!(exts[0].neighbor(), 1);
        assert_eq!(exts[0].int_comm_index, vec![0, 2]);
        assert_eq!(exts[1].neighbor(), 2);
        assert_eq!(exts[1].int_comm_index, vec![1, 3]);
    }

    #[test]
    fn self_neighbor_is_rejected() {
        let mut pm = parmesh();
        pm.populate_internal(EntityKind::Node, &[vec![1]]).unwrap();
        let err = pm.build_external(EntityKind::Node, &[(0, 0)]).unwrap_err();
        assert!(matches!(err, ParMeshError::SelfNeighbour { rank: 0 }));
    }

    #[test]
    fn failed_external_build_rolls_back_ledger() {
        let mut pm = parmesh();
        pm.populate_internal(EntityKind::Node, &[(0..64).collect()])
            .unwrap();
        let before = pm.mem.cur();
        pm.mem.set_budget(before + 64); // too small for the buffer set
        let sharing: Vec<(usize, usize)> = (0..64).map(|s| (s, 1)).collect();
        assert!(pm.build_external(EntityKind::Node, &sharing).is_err());
        assert!(pm.ext_comms(EntityKind::Node).is_empty());
        assert_eq!(pm.mem.cur(), before);
    }

    #[test]
    fn teardown_is_idempotent_and_releases_everything() {
        let mut pm = parmesh();
        pm.populate_internal(EntityKind::Node, &[vec![1, 2]]).unwrap();
        pm.build_external(EntityKind::Node, &[(0, 1), (1, 1)]).unwrap();

        let base = std::mem::size_of::<ParMesh<NoComm, StubKernel>>();
        pm.teardown();
        assert_eq!(pm.ngrp(), 0);
        assert_eq!(pm.int_comm(EntityKind::Node).nitem(), 0);
        assert!(pm.ext_comms(EntityKind::Node).is_empty());
        assert_eq!(pm.mem.cur(), base);

        pm.teardown(); // second call is a no-op
        assert_eq!(pm.mem.cur(), base);
    }
}
