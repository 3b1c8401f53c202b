//! Pairwise exchange of external-communicator staging buffers.
//!
//! For one entity kind, every process sends `itosend`/`rtosend` to each
//! neighbour recorded in its external-communicator set and receives into
//! `itorecv`/`rtorecv`. Integer and real payloads travel on separate
//! channels, and each entity kind gets its own channel pair, so the three
//! kinds never interleave. Within one round, per-neighbour message content
//! follows the `int_comm_index` ordering fixed at build time.
//!
//! Every send/receive handle is drained before returning, even if an error
//! occurs; the first error wins.

use crate::comm::EntityKind;
use crate::comm::communicator::{CommCtx, CommTag, Communicator, Wait};
use crate::comm::external::ExternalComm;
use crate::comm::wire::{cast_slice, cast_slice_from, expect_exact_len};
use crate::error::ParMeshError;

/// Channel pair for one exchange round; offset by the entity kind.
pub const EXCHANGE_INT_TAG: CommTag = CommTag::new(0x40);
pub const EXCHANGE_REAL_TAG: CommTag = CommTag::new(0x48);

/// Exchange the staged buffers of every external communicator of one kind.
///
/// Communicators with `nitem == 0` take no part in the round: both ends
/// derived the same shared-entity count at build time, so neither posts a
/// message. A transport failure is fatal for the whole run; the caller must
/// not retry with a subset of ranks.
pub fn exchange_external<C: Communicator>(
    ctx: &CommCtx<C>,
    kind: EntityKind,
    comms: &mut [ExternalComm],
) -> Result<(), ParMeshError> {
    let int_tag = EXCHANGE_INT_TAG.offset(kind.channel());
    let real_tag = EXCHANGE_REAL_TAG.offset(kind.channel());

    // 1) post all receives, one byte buffer per live neighbour and payload
    let mut recvs: Vec<(usize, C::RecvHandle, C::RecvHandle)> = Vec::new();
    let mut int_bufs: Vec<Vec<u8>> = Vec::new();
    let mut real_bufs: Vec<Vec<u8>> = Vec::new();
    for (k, c) in comms.iter().enumerate() {
        if c.nitem() == 0 {
            continue;
        }
        debug_assert_ne!(c.neighbor(), ctx.rank, "entity shared with self");
        let mut ibuf = vec![0u8; c.nitem() * std::mem::size_of::<i64>()];
        let mut rbuf = vec![0u8; c.nitem() * std::mem::size_of::<f64>()];
        let ih = ctx.comm.irecv(c.neighbor(), int_tag.base(), &mut ibuf);
        let rh = ctx.comm.irecv(c.neighbor(), real_tag.base(), &mut rbuf);
        recvs.push((k, ih, rh));
        int_bufs.push(ibuf);
        real_bufs.push(rbuf);
    }

    // 2) post all sends; buffers live in the comms until the round is over
    let mut pending_sends = Vec::new();
    for c in comms.iter() {
        if c.nitem() == 0 {
            continue;
        }
        pending_sends.push(
            ctx.comm
                .isend(c.neighbor(), int_tag.base(), cast_slice(&c.itosend)),
        );
        pending_sends.push(
            ctx.comm
                .isend(c.neighbor(), real_tag.base(), cast_slice(&c.rtosend)),
        );
    }

    // 3) wait for all receives, copying into the staging buffers; keep
    //    draining even once an error is recorded
    let mut maybe_err: Option<ParMeshError> = None;
    for (k, ih, rh) in recvs {
        let c = &mut comms[k];
        let expected_int = c.nitem() * std::mem::size_of::<i64>();
        let expected_real = c.nitem() * std::mem::size_of::<f64>();
        match ih.wait() {
            Some(data) => {
                if maybe_err.is_none() {
                    match expect_exact_len(data.len(), expected_int) {
                        Ok(()) => c.itorecv.copy_from_slice(cast_slice_from::<i64>(&data)),
                        Err(e) => {
                            maybe_err = Some(ParMeshError::CommError {
                                neighbor: c.neighbor(),
                                source: e.into(),
                            })
                        }
                    }
                }
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(ParMeshError::CommError {
                    neighbor: c.neighbor(),
                    source: format!("failed to receive integer payload from rank {}", c.neighbor())
                        .into(),
                });
            }
            _ => {}
        }
        match rh.wait() {
            Some(data) => {
                if maybe_err.is_none() {
                    match expect_exact_len(data.len(), expected_real) {
                        Ok(()) => c.rtorecv.copy_from_slice(cast_slice_from::<f64>(&data)),
                        Err(e) => {
                            maybe_err = Some(ParMeshError::CommError {
                                neighbor: c.neighbor(),
                                source: e.into(),
                            })
                        }
                    }
                }
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(ParMeshError::CommError {
                    neighbor: c.neighbor(),
                    source: format!("failed to receive real payload from rank {}", c.neighbor())
                        .into(),
                });
            }
            _ => {}
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::RayonComm;
    use crate::mem::MemoryLedger;
    use serial_test::serial;

    fn ctx(rank: usize) -> CommCtx<RayonComm> {
        CommCtx::new(rank, 2, RayonComm::new(rank))
    }

    #[test]
    #[serial]
    fn two_rank_buffer_swap() {
        let mut mem0 = MemoryLedger::default();
        let mut mem1 = MemoryLedger::default();

        // rank 0 shares internal slots {0, 2} with rank 1; rank 1 shares
        // {1, 0} with rank 0: same count, its own slot space.
        let mut c0 = ExternalComm::new(1);
        c0.set_index([0, 2], &mut mem0).unwrap();
        c0.alloc_int_buffers(&mut mem0).unwrap();
        c0.alloc_real_buffers(&mut mem0).unwrap();
        c0.itosend.copy_from_slice(&[100, 102]);
        c0.rtosend.copy_from_slice(&[0.25, 0.75]);

        let mut c1 = ExternalComm::new(0);
        c1.set_index([1, 0], &mut mem1).unwrap();
        c1.alloc_int_buffers(&mut mem1).unwrap();
        c1.alloc_real_buffers(&mut mem1).unwrap();
        c1.itosend.copy_from_slice(&[200, 201]);
        c1.rtosend.copy_from_slice(&[9.5, 8.5]);

        let mut set0 = vec![c0];
        let mut set1 = vec![c1];

        // each simulated rank runs its side of the round on its own thread
        std::thread::scope(|s| {
            let peer = s.spawn(|| exchange_external(&ctx(1), EntityKind::Node, &mut set1));
            exchange_external(&ctx(0), EntityKind::Node, &mut set0).unwrap();
            peer.join().unwrap().unwrap();
        });

        assert_eq!(set0[0].itorecv, vec![200, 201]);
        assert_eq!(set0[0].rtorecv, vec![9.5, 8.5]);
        assert_eq!(set1[0].itorecv, vec![100, 102]);
        assert_eq!(set1[0].rtorecv, vec![0.25, 0.75]);
    }

    #[test]
    #[serial]
    fn empty_comms_are_skipped() {
        let mut set: Vec<ExternalComm> = vec![ExternalComm::new(1)];
        exchange_external(&ctx(0), EntityKind::Edge, &mut set).unwrap();
        assert_eq!(set[0].nitem(), 0);
    }
}
