//! # parmesh
//!
//! parmesh coordinates a mesh that has been split into per-process
//! partitions so that a sequential remeshing kernel can run independently on
//! each partition while the interface between partitions stays globally
//! consistent. It provides the distributed communicator model (which
//! boundary entities are shared, with whom, and in what wire order) and the
//! cross-rank reduction protocols that merge per-partition results (quality
//! histograms, tie-broken minima) into one global answer.
//!
//! ## Features
//! - Internal/external communicators per entity kind (node, edge, face) with
//!   deterministic, coordination-free pairwise ordering
//! - Coordinate canonicalization for matching coincident boundary entities
//!   contributed by different partitions
//! - Sum, max and argmin-with-provenance reductions folded in a pinned,
//!   reproducible order
//! - Pluggable transport backends (serial, intra-process, MPI) behind one
//!   non-blocking `Communicator` trait
//! - A process-local memory ledger charged by every communicator allocation
//!
//! ## Determinism
//!
//! All collective folds run left-to-right over rank-ascending contributions,
//! so a fixed process count reproduces results bit-for-bit, including which
//! rank wins an argmin tie. Floating sums may differ in their last bits
//! across *different* process counts; that is expected.
//!
//! ## Scope
//!
//! The sequential remeshing algorithms, graph partitioning, mesh file I/O
//! and transport bootstrap all live with the caller: the crate consumes a
//! ready execution context ([`comm::communicator::CommCtx`]) and a mesh
//! kernel per group ([`kernel::MeshKernel`]), and hands back populated
//! communicators plus merged global results.

pub mod comm;
pub mod coorcell;
pub mod error;
pub mod group;
pub mod kernel;
pub mod mem;
pub mod parmesh;
pub mod quality;
pub mod remesh;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::comm::EntityKind;
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::communicator::MpiComm;
    pub use crate::comm::communicator::{CommCtx, CommTag, Communicator, NoComm, RayonComm, Wait};
    pub use crate::comm::exchange::exchange_external;
    pub use crate::comm::external::ExternalComm;
    pub use crate::comm::internal::InternalComm;
    pub use crate::comm::reduction::{
        MaxOp, MinProv, MinWithProvenance, ReduceOp, SumOp, reduce_at_root,
    };
    pub use crate::coorcell::{CoorCell, ScaleInfo, canonical_slots, scale_cells, unscale_cells};
    pub use crate::error::ParMeshError;
    pub use crate::group::{Group, GroupComm, MetricField};
    pub use crate::kernel::{KernelError, MeshKernel};
    pub use crate::mem::MemoryLedger;
    pub use crate::parmesh::{ParMesh, ParMeshBuilder, Param};
    pub use crate::quality::{QualityReport, QualityStats, report_quality};
    pub use crate::remesh::RemeshStatus;
}
