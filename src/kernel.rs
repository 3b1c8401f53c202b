//! Seam to the sequential remeshing kernel.
//!
//! The geometric algorithms (insertion, swapping, smoothing, quality
//! metric computation) live outside this crate. Each group drives its
//! partition through this trait; the coordination layer only cares whether
//! a step left the mesh savable.

use crate::group::MetricField;
use crate::parmesh::Param;
use crate::quality::QualityStats;
use thiserror::Error;

/// Failure reported by a kernel step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// The step failed but the mesh is still conformant and savable.
    #[error("step failed, mesh still conformant: {0}")]
    Soft(String),
    /// The mesh is no longer safely savable.
    #[error("step failed, mesh not savable: {0}")]
    Fatal(String),
}

impl KernelError {
    pub fn is_soft(&self) -> bool {
        matches!(self, KernelError::Soft(_))
    }
}

/// Sequential mesh kernel driving one partition.
///
/// Implementations own the local mesh data; this crate never inspects it.
pub trait MeshKernel {
    /// Apply one configuration option. Options arrive identically on every
    /// group of the process.
    fn set_parameter(&mut self, param: Param) -> Result<(), KernelError>;

    /// Scale the partition, build sizing data and analyze surface topology.
    fn analyze(&mut self) -> Result<(), KernelError>;

    /// Run the remeshing pass against the metric.
    fn adapt(&mut self, met: &mut MetricField) -> Result<(), KernelError>;

    /// Reconstruct boundary entities after adaptation.
    fn rebuild_boundaries(&mut self) -> Result<(), KernelError>;

    /// Map coordinates back to the original domain.
    fn unscale(&mut self) -> Result<(), KernelError>;

    /// Per-partition quality statistics for the global report.
    fn quality(&self) -> QualityStats;
}
