//! External communicator: the wire-level unit of a pairwise exchange.
//!
//! One per (entity kind, neighbour rank) pair. `int_comm_index` lists the
//! internal-communicator slots shared with that neighbour in ascending slot
//! order (both ends derive the same order independently, so no extra
//! coordination round is needed) and the four staging buffers carry the
//! integer and real payloads. Slot `i` of every array refers to the same
//! shared entity.

use crate::error::ParMeshError;
use crate::mem::MemoryLedger;
use itertools::Itertools;

#[derive(Debug, Default)]
pub struct ExternalComm {
    neighbor: usize,
    nitem: usize,
    pub int_comm_index: Vec<usize>,
    pub itosend: Vec<i64>,
    pub itorecv: Vec<i64>,
    pub rtosend: Vec<f64>,
    pub rtorecv: Vec<f64>,
}

impl ExternalComm {
    pub fn new(neighbor: usize) -> Self {
        Self {
            neighbor,
            ..Self::default()
        }
    }

    /// Rank of the neighbour process this communicator exchanges with.
    pub fn neighbor(&self) -> usize {
        self.neighbor
    }

    /// Number of entities shared specifically with this neighbour.
    pub fn nitem(&self) -> usize {
        self.nitem
    }

    /// Record which internal slots travel to this neighbour. Slots are
    /// stored in ascending order regardless of input order; the ordering is
    /// part of the wire contract and must not change between build time and
    /// exchange time.
    pub fn set_index(
        &mut self,
        slots: impl IntoIterator<Item = usize>,
        mem: &mut MemoryLedger,
    ) -> Result<(), ParMeshError> {
        debug_assert!(self.int_comm_index.is_empty(), "index set twice");
        let index: Vec<usize> = slots.into_iter().sorted_unstable().collect();
        mem.charge(index.len() * std::mem::size_of::<usize>())?;
        self.nitem = index.len();
        self.int_comm_index = index;
        Ok(())
    }

    /// Size the integer send/receive buffers to `nitem`.
    pub fn alloc_int_buffers(&mut self, mem: &mut MemoryLedger) -> Result<(), ParMeshError> {
        if self.itosend.is_empty() && self.itorecv.is_empty() {
            mem.charge(2 * self.nitem * std::mem::size_of::<i64>())?;
            self.itosend = vec![0; self.nitem];
            self.itorecv = vec![0; self.nitem];
        }
        Ok(())
    }

    /// Size the real send/receive buffers to `nitem`.
    pub fn alloc_real_buffers(&mut self, mem: &mut MemoryLedger) -> Result<(), ParMeshError> {
        if self.rtosend.is_empty() && self.rtorecv.is_empty() {
            mem.charge(2 * self.nitem * std::mem::size_of::<f64>())?;
            self.rtosend = vec![0.0; self.nitem];
            self.rtorecv = vec![0.0; self.nitem];
        }
        Ok(())
    }

    /// Gather internal scratch values into the send buffers, following
    /// `int_comm_index` order.
    pub fn stage_from(&mut self, intvalues: &[i64], doublevalues: &[f64]) {
        for (i, &slot) in self.int_comm_index.iter().enumerate() {
            if !self.itosend.is_empty() && !intvalues.is_empty() {
                self.itosend[i] = intvalues[slot];
            }
            if !self.rtosend.is_empty() && !doublevalues.is_empty() {
                self.rtosend[i] = doublevalues[slot];
            }
        }
    }

    /// Scatter received buffers back into internal scratch, following
    /// `int_comm_index` order.
    pub fn unstage_to(&self, intvalues: &mut [i64], doublevalues: &mut [f64]) {
        for (i, &slot) in self.int_comm_index.iter().enumerate() {
            if !self.itorecv.is_empty() && !intvalues.is_empty() {
                intvalues[slot] = self.itorecv[i];
            }
            if !self.rtorecv.is_empty() && !doublevalues.is_empty() {
                doublevalues[slot] = self.rtorecv[i];
            }
        }
    }

    /// Release everything: `nitem` drops to zero and all five arrays become
    /// unset. Safe to call on an already-freed communicator.
    pub fn free(&mut self, mem: &mut MemoryLedger) {
        if !self.int_comm_index.is_empty() {
            debug_assert!(self.nitem != 0, "incorrect parameters in external communicator");
            mem.release(self.int_comm_index.len() * std::mem::size_of::<usize>());
            self.int_comm_index = Vec::new();
        }
        if !self.itosend.is_empty() || !self.itorecv.is_empty() {
            debug_assert!(self.nitem != 0, "incorrect parameters in external communicator");
            mem.release((self.itosend.len() + self.itorecv.len()) * std::mem::size_of::<i64>());
            self.itosend = Vec::new();
            self.itorecv = Vec::new();
        }
        if !self.rtosend.is_empty() || !self.rtorecv.is_empty() {
            debug_assert!(self.nitem != 0, "incorrect parameters in external communicator");
            mem.release((self.rtosend.len() + self.rtorecv.len()) * std::mem::size_of::<f64>());
            self.rtosend = Vec::new();
            self.rtorecv = Vec::new();
        }
        self.nitem = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_stored_ascending() {
        let mut mem = MemoryLedger::default();
        let mut ecomm = ExternalComm::new(1);
        ecomm.set_index([5, 1, 3], &mut mem).unwrap();
        assert_eq!(ecomm.int_comm_index, vec![1, 3, 5]);
        assert_eq!(ecomm.nitem(), 3);
    }

    #[test]
    fn arrays_share_nitem() {
        let mut mem = MemoryLedger::default();
        let mut ecomm = ExternalComm::new(2);
        ecomm.set_index([0, 2], &mut mem).unwrap();
        ecomm.alloc_int_buffers(&mut mem).unwrap();
        ecomm.alloc_real_buffers(&mut mem).unwrap();
        let n = ecomm.nitem();
        assert_eq!(ecomm.int_comm_index.len(), n);
        assert_eq!(ecomm.itosend.len(), n);
        assert_eq!(ecomm.itorecv.len(), n);
        assert_eq!(ecomm.rtosend.len(), n);
        assert_eq!(ecomm.rtorecv.len(), n);
    }

    #[test]
    fn free_zeroes_and_is_idempotent() {
        let mut mem = MemoryLedger::default();
        let mut ecomm = ExternalComm::new(1);
        ecomm.set_index([0, 1, 2], &mut mem).unwrap();
        ecomm.alloc_int_buffers(&mut mem).unwrap();
        ecomm.alloc_real_buffers(&mut mem).unwrap();
        assert!(mem.cur() > 0);

        ecomm.free(&mut mem);
        assert_eq!(ecomm.nitem(), 0);
        assert!(ecomm.int_comm_index.is_empty());
        assert!(ecomm.itosend.is_empty());
        assert!(ecomm.itorecv.is_empty());
        assert!(ecomm.rtosend.is_empty());
        assert!(ecomm.rtorecv.is_empty());
        assert_eq!(mem.cur(), 0);

        ecomm.free(&mut mem);
        assert_eq!(ecomm.nitem(), 0);
        assert_eq!(mem.cur(), 0);
    }

    #[test]
    fn stage_and_unstage_follow_index_order() {
        let mut mem = MemoryLedger::default();
        let mut ecomm = ExternalComm::new(1);
        ecomm.set_index([3, 0], &mut mem).unwrap(); // stored as [0, 3]
        ecomm.alloc_int_buffers(&mut mem).unwrap();
        ecomm.alloc_real_buffers(&mut mem).unwrap();

        let intvalues = [10, 11, 12, 13];
        let doublevalues = [0.5, 1.5, 2.5, 3.5];
        ecomm.stage_from(&intvalues, &doublevalues);
        assert_eq!(ecomm.itosend, vec![10, 13]);
        assert_eq!(ecomm.rtosend, vec![0.5, 3.5]);

        let mut ints = [0i64; 4];
        let mut reals = [0.0f64; 4];
        ecomm.itorecv.copy_from_slice(&[20, 23]);
        ecomm.rtorecv.copy_from_slice(&[7.0, 8.0]);
        ecomm.unstage_to(&mut ints, &mut reals);
        assert_eq!(ints, [20, 0, 0, 23]);
        assert_eq!(reals, [7.0, 0.0, 0.0, 8.0]);
    }
}
