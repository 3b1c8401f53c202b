//! Global quality histogram across all partitions.
//!
//! Each group's kernel computes local statistics; this module accumulates
//! them across the groups of one process, reduces the per-process partials
//! at the root (sums, maxima, and the argmin with provenance), and lets the
//! root assemble the one human-readable summary of the run.

use crate::comm::communicator::{CommTag, Communicator};
use crate::comm::reduction::{MaxOp, MinProv, MinWithProvenance, SumOp, reduce_at_root};
use crate::error::ParMeshError;
use crate::group::Group;
use crate::kernel::MeshKernel;
use crate::parmesh::ParMesh;
use serde::{Deserialize, Serialize};

/// Number of histogram buckets, covering quality `(0, 1]` in equal ranges.
pub const HIS_SIZE: usize = 5;

/// Channel block for the quality reduction; one offset per reduced field.
pub const QUALITY_TAG: CommTag = CommTag::new(0x70);

/// Per-partition quality statistics, as reported by one group's kernel.
///
/// `avg` is carried as a running sum of element qualities; it only becomes
/// an average in the root's report, after the global element count is
/// known. `min`/`iel` identify the worst element of the partition.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityStats {
    pub ne: u64,
    pub max: f64,
    pub avg: f64,
    pub min: f64,
    pub iel: u64,
    pub good: u64,
    pub med: u64,
    pub his: [u64; HIS_SIZE],
    pub nrid: u64,
}

impl Default for QualityStats {
    fn default() -> Self {
        Self {
            ne: 0,
            max: 0.0,
            avg: 0.0,
            min: f64::MAX,
            iel: 0,
            good: 0,
            med: 0,
            his: [0; HIS_SIZE],
            nrid: 0,
        }
    }
}

/// Fold the statistics of every group on this process into one partial,
/// keeping the worst element coupled to the group that owns it.
pub fn accumulate_local<M: MeshKernel>(groups: &[Group<M>]) -> (QualityStats, MinProv) {
    let mut acc = QualityStats::default();
    let mut worst = MinProv::none();
    for (i, grp) in groups.iter().enumerate() {
        let cur = grp.mesh.quality();
        acc.ne += cur.ne;
        acc.avg += cur.avg;
        acc.med += cur.med;
        acc.good += cur.good;
        if cur.max > acc.max {
            acc.max = cur.max;
        }
        if cur.min < acc.min {
            acc.min = cur.min;
            acc.iel = cur.iel;
            worst = MinProv {
                value: cur.min,
                elt: cur.iel,
                grp: i as u64,
            };
        }
        for (a, b) in acc.his.iter_mut().zip(cur.his) {
            *a += b;
        }
        acc.nrid += cur.nrid;
    }
    (acc, worst)
}

/// The root's merged view of the whole distributed mesh.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub ne: u64,
    pub max: f64,
    pub avg: f64,
    pub worst: MinProv,
    pub good: u64,
    pub med: u64,
    pub his: [u64; HIS_SIZE],
    pub nrid: u64,
}

impl QualityReport {
    /// Plain-text histogram, one line per fact.
    pub fn render(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let avg = if self.ne > 0 {
            self.avg / self.ne as f64
        } else {
            0.0
        };
        writeln!(out, "  -- MESH QUALITY   {}", self.ne).unwrap();
        writeln!(
            out,
            "     BEST   {:.6}   AVRG.   {:.6}   WRST.   {:.6} (ELT {} GROUP {})",
            self.max, avg, self.worst.value, self.worst.elt, self.worst.grp
        )
        .unwrap();
        writeln!(out, "     GOOD   {}   MEDIUM   {}", self.good, self.med).unwrap();
        for (i, count) in self.his.iter().enumerate() {
            let hi = 1.0 - 0.2 * i as f64;
            writeln!(out, "     {:.1} < Q < {:.1}   {}", hi - 0.2, hi, count).unwrap();
        }
        writeln!(
            out,
            "     {} elements on ridge or non-manifold boundaries",
            self.nrid
        )
        .unwrap();
        out
    }
}

/// Merge every partition's statistics at the root.
///
/// All ranks must call this together: non-root ranks contribute their
/// partials and get `Ok(None)`; the root folds rank-ascending and returns
/// the merged report, also logging its rendering at info level. Field sums
/// fold in rank order, so a given process count always reproduces the same
/// bits.
pub fn report_quality<C: Communicator, M: MeshKernel>(
    parmesh: &ParMesh<C, M>,
) -> Result<Option<QualityReport>, ParMeshError> {
    let (local, worst) = accumulate_local(&parmesh.listgrp);
    let ctx = parmesh.ctx();

    let ne = reduce_at_root::<u64, SumOp, _>(ctx, QUALITY_TAG.offset(0), local.ne)?;
    let avg = reduce_at_root::<f64, SumOp, _>(ctx, QUALITY_TAG.offset(1), local.avg)?;
    let med = reduce_at_root::<u64, SumOp, _>(ctx, QUALITY_TAG.offset(2), local.med)?;
    let good = reduce_at_root::<u64, SumOp, _>(ctx, QUALITY_TAG.offset(3), local.good)?;
    let max = reduce_at_root::<f64, MaxOp, _>(ctx, QUALITY_TAG.offset(4), local.max)?;
    let min =
        reduce_at_root::<MinProv, MinWithProvenance, _>(ctx, QUALITY_TAG.offset(5), worst)?;
    let his = reduce_at_root::<[u64; HIS_SIZE], SumOp, _>(ctx, QUALITY_TAG.offset(6), local.his)?;
    let nrid = reduce_at_root::<u64, SumOp, _>(ctx, QUALITY_TAG.offset(7), local.nrid)?;

    if !ctx.is_root() {
        return Ok(None);
    }
    // on the root every reduction yielded a value
    let report = QualityReport {
        ne: ne.unwrap_or_default(),
        max: max.unwrap_or_default(),
        avg: avg.unwrap_or_default(),
        worst: min.unwrap_or(MinProv::none()),
        good: good.unwrap_or_default(),
        med: med.unwrap_or_default(),
        his: his.unwrap_or_default(),
        nrid: nrid.unwrap_or_default(),
    };
    if parmesh.verbose() > 0 {
        log::info!("{}", report.render());
    }
    Ok(Some(report))
}
