//! ParMeshError: unified error type for parmesh public APIs.
//!
//! Every fallible public API returns this type so callers can distinguish
//! recoverable configuration problems from allocation and transport failures
//! that require tearing the whole run down.

use crate::kernel::KernelError;
use thiserror::Error;

/// Unified error type for parmesh operations.
#[derive(Debug, Error)]
pub enum ParMeshError {
    /// A point set whose bounding box collapses below machine epsilon cannot
    /// be scaled into the unit cube.
    #[error("degenerate point set: max extent {delta:e} is below machine epsilon")]
    DegeneratePointSet { delta: f64 },

    /// The memory ledger refused a charge; the structure being built must be
    /// rolled back by the caller.
    #[error("memory budget exhausted: requested {requested} bytes, {available} available")]
    AllocationFailed { requested: usize, available: usize },

    /// More bytes released than were ever charged; indicates a bookkeeping
    /// bug in an alloc/free pair.
    #[error("memory ledger underflow: released {released} bytes with only {charged} charged")]
    LedgerUnderflow { released: usize, charged: usize },

    /// `index1`/`index2` lost their pairing; indicates state corruption
    /// upstream.
    #[error("group index maps out of sync: index1 has {len1} items, index2 has {len2}")]
    IndexMapMismatch { len1: usize, len2: usize },

    /// An entity was declared shared with the local rank itself.
    #[error("rank {rank} cannot be its own neighbour")]
    SelfNeighbour { rank: usize },

    /// Point-to-point exchange with one neighbour failed. Fatal: a partial
    /// cluster can no longer agree on global state.
    #[error("communication with rank {neighbor} failed: {source}")]
    CommError {
        neighbor: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A collective reduction failed on this rank. Fatal, same as
    /// [`ParMeshError::CommError`].
    #[error("reduction failed: {source}")]
    ReduceError {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Invalid configuration that could not be recovered by falling back to a
    /// default.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failure reported by the sequential mesh kernel of one group.
    #[error("mesh kernel: {0}")]
    Kernel(#[from] KernelError),
}
