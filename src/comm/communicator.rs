//! Thin façade over intra-process or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). All
//! handles are **waitable** but non-blocking; exchange.rs and reduction.rs
//! call `.wait()` before they trust that a buffer is ready.

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Rank of the designated root process for reductions and reports.
pub const ROOT: usize = 0;

/// Typed message channel. Base tags are spaced so that per-kind offsets
/// (see [`crate::comm::EntityKind::channel`]) never collide across protocols.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(base: u16) -> Self {
        Self(base)
    }
    pub const fn base(self) -> u16 {
        self.0
    }
    /// Derive a sub-channel, e.g. one per entity kind or per reduced field.
    pub const fn offset(self, k: u16) -> Self {
        Self(self.0 + k)
    }
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Cluster-wide abort: once a fatal error is detected on any rank, the
    /// run fails together, since global communicators are meaningless with a
    /// participant missing. Diverges.
    fn abort(&self, code: i32) -> ! {
        log::error!("aborting run (code {code})");
        std::process::abort()
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Explicit execution context: rank, size and the transport handle.
///
/// Passed by reference to every component that needs to know where it runs;
/// nothing in this crate reads rank or size from process-wide state.
#[derive(Clone, Debug)]
pub struct CommCtx<C> {
    pub rank: usize,
    pub size: usize,
    pub comm: C,
}

impl<C: Communicator> CommCtx<C> {
    pub fn new(rank: usize, size: usize, comm: C) -> Self {
        debug_assert!(size > 0 && rank < size, "rank {rank} out of range 0..{size}");
        Self { rank, size, comm }
    }

    pub fn is_root(&self) -> bool {
        self.rank == ROOT
    }
}

/// Compile-time no-op comm for pure serial unit tests and single-process
/// runs.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
}

impl CommCtx<NoComm> {
    /// Single-process context: rank 0 of 1.
    pub fn serial() -> Self {
        Self::new(0, 1, NoComm)
    }
}

// --- RayonComm: intra-process rank simulation -------------------------------
type Key = (usize, usize, u16); // (src, dst, tag)

static MAILBOX: Lazy<DashMap<Key, VecDeque<Bytes>>> = Lazy::new(DashMap::new);

pub struct LocalHandle {
    buf: Arc<Mutex<Option<Vec<u8>>>>,
    handle: Option<JoinHandle<()>>,
}

impl Wait for LocalHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let mut guard = self.buf.lock();
        guard.take()
    }
}

/// In-process backend: each simulated rank owns one `RayonComm` and all of
/// them share a global FIFO mailbox. Useful to exercise multi-rank protocols
/// inside a single test process.
#[derive(Clone, Debug)]
pub struct RayonComm {
    rank: usize,
}

impl RayonComm {
    pub fn new(rank: usize) -> Self {
        Self { rank }
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        MAILBOX
            .entry(key)
            .or_default()
            .push_back(Bytes::from(buf.to_vec()));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        let key = (peer, self.rank, tag);
        let buf_arc = Arc::new(Mutex::new(None));
        let buf_arc_clone = buf_arc.clone();
        let buf_len = buf.len();
        let handle = std::thread::spawn(move || {
            loop {
                let msg = MAILBOX.get_mut(&key).and_then(|mut q| q.pop_front());
                if let Some(bytes) = msg {
                    let n = bytes.len().min(buf_len);
                    *buf_arc_clone.lock() = Some(bytes[..n].to_vec());
                    break;
                }
                std::thread::yield_now();
            }
        });
        LocalHandle {
            buf: buf_arc,
            handle: Some(handle),
        }
    }

    fn abort(&self, code: i32) -> ! {
        // A simulated cluster lives in one process; unwind instead of
        // killing the host.
        panic!("rank {} requested cluster abort (code {code})", self.rank)
    }
}

// --- MPI backend (feature = "mpi-support") ----------------------------------
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{CommCtx, Communicator, Wait};
    use mpi::point_to_point::{Destination, Source};
    use mpi::topology::{Communicator as _, SimpleCommunicator};

    /// Inter-process backend over a ready-initialized MPI world. Transport
    /// bootstrap (`mpi::initialize`) stays with the caller.
    pub struct MpiComm {
        world: SimpleCommunicator,
    }

    impl MpiComm {
        pub fn new(world: SimpleCommunicator) -> Self {
            Self { world }
        }

        pub fn rank(&self) -> usize {
            self.world.rank() as usize
        }

        pub fn size(&self) -> usize {
            self.world.size() as usize
        }
    }

    /// Deferred receive: the matching `receive_vec` runs at `wait()` time,
    /// after all sends of the round have been posted, which keeps the
    /// post-all-receives/post-all-sends discipline of the exchange protocol
    /// deadlock-free for staging-buffer-sized messages.
    pub struct MpiRecv {
        world: SimpleCommunicator,
        peer: usize,
        tag: u16,
        len: usize,
    }

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            let (data, _status) = self
                .world
                .process_at_rank(self.peer as i32)
                .receive_vec_with_tag::<u8>(self.tag as i32);
            let n = data.len().min(self.len);
            Some(data[..n].to_vec())
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = ();
        type RecvHandle = MpiRecv;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag as i32);
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecv {
            MpiRecv {
                world: self.world.duplicate(),
                peer,
                tag,
                len: buf.len(),
            }
        }

        fn abort(&self, code: i32) -> ! {
            self.world.abort(code)
        }
    }

    impl CommCtx<MpiComm> {
        /// Context for the given MPI world.
        pub fn from_world(world: SimpleCommunicator) -> Self {
            let comm = MpiComm::new(world);
            let (rank, size) = (comm.rank(), comm.size());
            Self::new(rank, size, comm)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn rayon_roundtrip_two_ranks() {
        let tag = CommTag::new(0x0007);
        let comm0 = RayonComm::new(0);
        let comm1 = RayonComm::new(1);

        let mut recv_buf = [0u8; 4];
        let recv_handle = comm1.irecv(0, tag.base(), &mut recv_buf);
        let send_handle = comm0.isend(1, tag.base(), &[1, 2, 3, 4]);
        send_handle.wait();

        let data = recv_handle.wait().expect("expected data from rank 0");
        recv_buf.copy_from_slice(&data);
        assert_eq!(&recv_buf, &[1, 2, 3, 4]);
    }

    #[test]
    #[serial]
    fn rayon_fifo_order() {
        let tag = CommTag::new(0x0008);
        let comm0 = RayonComm::new(0);
        let comm1 = RayonComm::new(1);

        for i in 0..10u8 {
            comm0.isend(1, tag.base(), &[i]);
        }
        let mut out = Vec::new();
        for _ in 0..10 {
            let mut b = [0u8; 1];
            let h = comm1.irecv(0, tag.base(), &mut b);
            out.push(h.wait().unwrap()[0]);
        }
        assert_eq!(out, (0u8..10).collect::<Vec<_>>());
    }

    #[test]
    fn tags_offset_by_kind() {
        use crate::comm::EntityKind;
        let base = CommTag::new(0x40);
        let tags: Vec<u16> = EntityKind::ALL
            .iter()
            .map(|k| base.offset(k.channel()).base())
            .collect();
        assert_eq!(tags, vec![0x40, 0x41, 0x42]);
    }
}
