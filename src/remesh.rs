//! Top-level orchestration of one parallel adaptation run.
//!
//! Three phases, mirroring the life of the mesh: per-group analysis,
//! per-group adaptation, then boundary reconstruction and unscaling. The
//! outcome tells the caller whether the mesh may be written out: a soft
//! kernel failure degrades to [`RemeshStatus::LowFailure`] (a conformant
//! mesh still exists), while allocation or collective failures end the run
//! with [`RemeshStatus::StrongFailure`], and a collective failure aborts
//! every rank together, since the remaining ranks could never agree on
//! global state again.

use crate::comm::communicator::Communicator;
use crate::kernel::{KernelError, MeshKernel};
use crate::parmesh::ParMesh;
use crate::quality::report_quality;
use serde::{Deserialize, Serialize};

/// Outcome of [`ParMesh::remesh`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemeshStatus {
    /// Adaptation completed; the mesh is fully reconstructed.
    Success,
    /// Something failed but a conformant, savable mesh still exists.
    LowFailure,
    /// The mesh is not safely savable; the caller must not write it out.
    StrongFailure,
}

impl RemeshStatus {
    /// Process exit value for launchers: 0, 1 or 2.
    pub fn code(self) -> i32 {
        match self {
            RemeshStatus::Success => 0,
            RemeshStatus::LowFailure => 1,
            RemeshStatus::StrongFailure => 2,
        }
    }
}

impl<C: Communicator, M: MeshKernel> ParMesh<C, M> {
    /// Run the full adaptation over every group of this process.
    pub fn remesh(&mut self) -> RemeshStatus {
        let chatty = self.ctx().is_root() && self.verbose() > 0;
        if chatty {
            log::info!("  -- PHASE 1 : ANALYSIS");
        }

        for grp in &mut self.listgrp {
            match grp.mesh.analyze() {
                Ok(()) => {}
                Err(KernelError::Fatal(msg)) => {
                    log::error!("analysis failed: {msg}");
                    return RemeshStatus::StrongFailure;
                }
                Err(KernelError::Soft(msg)) => {
                    log::warn!("analysis failed: {msg}");
                    if grp.mesh.unscale().is_err() {
                        return RemeshStatus::StrongFailure;
                    }
                    return RemeshStatus::LowFailure;
                }
            }
        }
        if self.verbose() > 0 {
            if let Err(e) = report_quality(self) {
                log::error!("input quality reduction failed: {e}");
                self.ctx().comm.abort(RemeshStatus::StrongFailure.code());
            }
        }
        if chatty {
            log::info!("  -- PHASE 1 COMPLETED");
        }

        if chatty {
            let mode = if self.listgrp[0].met.size < 6 {
                "ISOTROPIC"
            } else {
                "ANISOTROPIC"
            };
            log::info!("  -- PHASE 2 : {mode} MESHING");
        }
        let mut low = false;
        for grp in &mut self.listgrp {
            match grp.mesh.adapt(&mut grp.met) {
                Ok(()) => {}
                Err(KernelError::Fatal(msg)) => {
                    log::error!("remeshing failed: {msg}");
                    return RemeshStatus::StrongFailure;
                }
                Err(KernelError::Soft(msg)) => {
                    log::warn!("remeshing step failed: {msg}");
                    low = true;
                }
            }
        }
        if chatty {
            log::info!("  -- PHASE 2 COMPLETED");
        }

        if chatty {
            log::info!("  -- PHASE 3 : MESH PACKED UP");
        }
        let mut rebuild_failed = false;
        for grp in &mut self.listgrp {
            if let Err(e) = grp.mesh.rebuild_boundaries() {
                log::warn!("boundary reconstruction failed: {e}");
                rebuild_failed = true;
                break;
            }
        }
        if rebuild_failed {
            for grp in &mut self.listgrp {
                if grp.mesh.unscale().is_err() {
                    return RemeshStatus::StrongFailure;
                }
            }
            return RemeshStatus::LowFailure;
        }
        for grp in &mut self.listgrp {
            if grp.mesh.unscale().is_err() {
                return RemeshStatus::StrongFailure;
            }
        }
        if self.verbose() > 0 {
            if let Err(e) = report_quality(self) {
                log::error!("output quality reduction failed: {e}");
                self.ctx().comm.abort(RemeshStatus::StrongFailure.code());
            }
        }
        if chatty {
            log::info!("  -- PHASE 3 COMPLETED");
        }

        if low {
            RemeshStatus::LowFailure
        } else {
            RemeshStatus::Success
        }
    }
}
