//! Collective reductions: merge per-partition partials into one global
//! answer at the root.
//!
//! All flavours share a single gather-and-fold: the root's own contribution
//! is the first operand, then ranks `1..size` in ascending order. The fold
//! is flat and strictly left-to-right, so for a fixed process count the
//! result, including which rank wins an argmin tie, is bit-for-bit
//! reproducible. Floating sums folded this way may still differ in their
//! last bits across *different* process counts; that is expected and not a
//! correctness defect.

use crate::comm::communicator::{CommCtx, CommTag, Communicator, ROOT, Wait};
use crate::comm::wire::{expect_exact_len, read_unaligned};
use crate::error::ParMeshError;
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// Base channel for reduction rounds; callers offset per reduced field.
pub const REDUCE_TAG: CommTag = CommTag::new(0x60);

/// A commutative combining step. `combine` folds one incoming contribution
/// into the accumulator; the fold order is fixed by [`reduce_at_root`].
pub trait ReduceOp<T> {
    fn combine(acc: &mut T, incoming: T);
}

/// Element-wise sum.
pub struct SumOp;

impl ReduceOp<u64> for SumOp {
    fn combine(acc: &mut u64, incoming: u64) {
        *acc += incoming;
    }
}

impl ReduceOp<f64> for SumOp {
    fn combine(acc: &mut f64, incoming: f64) {
        *acc += incoming;
    }
}

impl<const N: usize> ReduceOp<[u64; N]> for SumOp {
    fn combine(acc: &mut [u64; N], incoming: [u64; N]) {
        for (a, b) in acc.iter_mut().zip(incoming) {
            *a += b;
        }
    }
}

/// Maximum.
pub struct MaxOp;

impl ReduceOp<u64> for MaxOp {
    fn combine(acc: &mut u64, incoming: u64) {
        if incoming > *acc {
            *acc = incoming;
        }
    }
}

impl ReduceOp<f64> for MaxOp {
    fn combine(acc: &mut f64, incoming: f64) {
        if incoming > *acc {
            *acc = incoming;
        }
    }
}

/// A candidate minimum together with the identity that achieves it: the
/// element id and the group id of the contributing partition.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, serde::Serialize, serde::Deserialize)]
pub struct MinProv {
    pub value: f64,
    pub elt: u64,
    pub grp: u64,
}

impl MinProv {
    /// Identity-free starting point: loses to every finite candidate.
    pub fn none() -> Self {
        Self {
            value: f64::MAX,
            elt: 0,
            grp: 0,
        }
    }
}

// one triple on the wire, no padding
const_assert_eq!(std::mem::size_of::<MinProv>(), 24);

/// Argmin with provenance. The comparison is strict `<`, so on a tie the
/// earlier operand in fold order keeps the accumulator: value and identity
/// stay coupled through the whole reduction, never re-derived after the
/// fact.
pub struct MinWithProvenance;

impl ReduceOp<MinProv> for MinWithProvenance {
    fn combine(acc: &mut MinProv, incoming: MinProv) {
        if incoming.value < acc.value {
            *acc = incoming;
        }
    }
}

/// Fold every rank's `partial` at the root.
///
/// Returns `Ok(Some(folded))` on the root and `Ok(None)` everywhere else.
/// Non-root ranks send their contribution and return; the root receives
/// from ranks `1..size` in ascending order and folds each into its own
/// partial. A missing or short contribution is a fatal reduction error:
/// a partial cluster cannot agree on global state.
pub fn reduce_at_root<T, O, C>(
    ctx: &CommCtx<C>,
    tag: CommTag,
    partial: T,
) -> Result<Option<T>, ParMeshError>
where
    T: Pod,
    O: ReduceOp<T>,
    C: Communicator,
{
    if ctx.size <= 1 {
        return Ok(Some(partial));
    }

    if ctx.rank != ROOT {
        let h = ctx
            .comm
            .isend(ROOT, tag.base(), bytemuck::bytes_of(&partial));
        let _ = h.wait();
        return Ok(None);
    }

    let mut acc = partial;
    for peer in 1..ctx.size {
        let mut buf = vec![0u8; std::mem::size_of::<T>()];
        let h = ctx.comm.irecv(peer, tag.base(), &mut buf);
        let data = h.wait().ok_or_else(|| ParMeshError::ReduceError {
            source: format!("no contribution from rank {peer}").into(),
        })?;
        expect_exact_len(data.len(), std::mem::size_of::<T>()).map_err(|e| {
            ParMeshError::ReduceError {
                source: format!("rank {peer}: {e}").into(),
            }
        })?;
        O::combine(&mut acc, read_unaligned::<T>(&data));
    }
    Ok(Some(acc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::{NoComm, RayonComm};
    use serial_test::serial;

    fn ctx(rank: usize, size: usize) -> CommCtx<RayonComm> {
        CommCtx::new(rank, size, RayonComm::new(rank))
    }

    #[test]
    fn single_rank_returns_own_partial() {
        let ctx = CommCtx::new(0, 1, NoComm);
        let out = reduce_at_root::<u64, SumOp, _>(&ctx, REDUCE_TAG, 7).unwrap();
        assert_eq!(out, Some(7));
    }

    #[test]
    #[serial]
    fn sum_over_three_ranks() {
        let tag = REDUCE_TAG.offset(1);
        // contributors post first; the mailbox holds them until the root folds
        reduce_at_root::<u64, SumOp, _>(&ctx(1, 3), tag, 10).unwrap();
        reduce_at_root::<u64, SumOp, _>(&ctx(2, 3), tag, 20).unwrap();
        let out = reduce_at_root::<u64, SumOp, _>(&ctx(0, 3), tag, 1).unwrap();
        assert_eq!(out, Some(31));
    }

    #[test]
    #[serial]
    fn argmin_tie_goes_to_first_in_fold_order() {
        let tag = REDUCE_TAG.offset(2);
        let r1 = MinProv {
            value: 1.5,
            elt: 11,
            grp: 0,
        };
        let r2 = MinProv {
            value: 1.5,
            elt: 22,
            grp: 0,
        };
        reduce_at_root::<MinProv, MinWithProvenance, _>(&ctx(1, 3), tag, r1).unwrap();
        reduce_at_root::<MinProv, MinWithProvenance, _>(&ctx(2, 3), tag, r2).unwrap();
        let r0 = MinProv {
            value: 3.2,
            elt: 5,
            grp: 0,
        };
        let out = reduce_at_root::<MinProv, MinWithProvenance, _>(&ctx(0, 3), tag, r0)
            .unwrap()
            .unwrap();
        // rank 1 and rank 2 tie on value; rank 1 folds first and wins
        assert_eq!(out.value, 1.5);
        assert_eq!(out.elt, 11);
    }

    #[test]
    #[serial]
    fn histogram_buckets_sum_elementwise() {
        let tag = REDUCE_TAG.offset(3);
        reduce_at_root::<[u64; 5], SumOp, _>(&ctx(1, 2), tag, [0, 1, 1, 0, 0]).unwrap();
        let out = reduce_at_root::<[u64; 5], SumOp, _>(&ctx(0, 2), tag, [2, 1, 0, 0, 1])
            .unwrap()
            .unwrap();
        assert_eq!(out, [2, 2, 1, 0, 1]);
    }
}
