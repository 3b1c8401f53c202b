//! Coordinate cells: canonical scaling and ordering of interface points.
//!
//! Boundary entities contributed by different partitions carry no common
//! numbering, only coordinates. To match them deterministically, every
//! participant rescales its interface points into the unit cube and sorts
//! them under the same epsilon-tolerant lexicographic order. The epsilon is
//! fixed relative to the unit cube: the comparator must only ever see
//! *scaled* coordinates, or coincident points from partitions with different
//! extents would fail to match.

use crate::error::ParMeshError;
use std::cmp::Ordering;

/// Machine-epsilon scale under which a point set is considered degenerate
/// and two scaled coordinates are considered identical.
pub const EPSD: f64 = 1.0e-30;

/// Ephemeral (coordinate, index) pair used during canonicalization.
///
/// `idx` is an opaque caller tag (typically the local entity id) carried
/// through scaling and sorting; it is never interpreted here.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoorCell {
    pub coor: [f64; 3],
    pub idx: usize,
}

impl CoorCell {
    pub fn new(coor: [f64; 3], idx: usize) -> Self {
        Self { coor, idx }
    }
}

/// Bounding box and scaling factor produced by [`scale_cells`], needed to
/// invert the map.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleInfo {
    pub min: [f64; 3],
    pub max: [f64; 3],
    /// Max extent across the three axes; `1/delta` is the scale factor.
    pub delta: f64,
}

/// Rescale `cells` into `[0,1]^3` via `(p - min) / delta`.
///
/// `delta` is the maximal axis-aligned extent of the set. Fails with
/// [`ParMeshError::DegeneratePointSet`] when the extent is below [`EPSD`],
/// leaving every coordinate untouched.
pub fn scale_cells(cells: &mut [CoorCell]) -> Result<ScaleInfo, ParMeshError> {
    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for cell in cells.iter() {
        for j in 0..3 {
            if cell.coor[j] > max[j] {
                max[j] = cell.coor[j];
            }
            if cell.coor[j] < min[j] {
                min[j] = cell.coor[j];
            }
        }
    }

    let mut delta = 0.0_f64;
    for j in 0..3 {
        if max[j] - min[j] > delta {
            delta = max[j] - min[j];
        }
    }
    if delta < EPSD {
        return Err(ParMeshError::DegeneratePointSet { delta });
    }

    let dd = 1.0 / delta;
    for cell in cells.iter_mut() {
        for j in 0..3 {
            cell.coor[j] = dd * (cell.coor[j] - min[j]);
        }
    }
    Ok(ScaleInfo { min, max, delta })
}

/// Invert [`scale_cells`]: `p = delta * p_scaled + min`.
///
/// Reconstructs the original coordinates to within floating-point rounding.
pub fn unscale_cells(cells: &mut [CoorCell], info: &ScaleInfo) {
    for cell in cells.iter_mut() {
        for j in 0..3 {
            cell.coor[j] = info.delta * cell.coor[j] + info.min[j];
        }
    }
}

/// Epsilon-tolerant lexicographic order on scaled coordinates: x, then y,
/// then z. Two cells whose coordinates differ by less than [`EPSD`] on all
/// three axes compare `Equal` and denote the same geometric location.
pub fn compare_cells(a: &CoorCell, b: &CoorCell) -> Ordering {
    let mut dist = [0.0_f64; 3];
    for k in 0..3 {
        dist[k] = a.coor[k] - b.coor[k];
        if dist[k] > EPSD {
            return Ordering::Greater;
        }
        if dist[k] < -EPSD {
            return Ordering::Less;
        }
    }
    debug_assert!(
        dist[0] * dist[0] + dist[1] * dist[1] + dist[2] * dist[2] < EPSD,
        "epsilon inconsistency between axis and distance tolerances"
    );
    Ordering::Equal
}

/// Scale `cells` in place, then assign every epsilon-distinct location one
/// slot id, numbered in sorted order.
///
/// Returns the scaling data plus the slot of each input cell, indexed by
/// input position. Coincident cells (same location contributed twice, e.g.
/// by two partitions) receive the same slot, which is what makes the
/// assignment usable as a shared-entity numbering. Ties in the sort are
/// broken by input position so the result is fully deterministic.
pub fn canonical_slots(cells: &mut [CoorCell]) -> Result<(ScaleInfo, Vec<usize>), ParMeshError> {
    let info = scale_cells(cells)?;

    let mut order: Vec<usize> = (0..cells.len()).collect();
    order.sort_by(|&i, &j| compare_cells(&cells[i], &cells[j]).then(i.cmp(&j)));

    let mut slots = vec![0usize; cells.len()];
    let mut next = 0usize;
    for (k, &pos) in order.iter().enumerate() {
        if k > 0 {
            let prev = order[k - 1];
            if compare_cells(&cells[prev], &cells[pos]) != Ordering::Equal {
                next += 1;
            }
        }
        slots[pos] = next;
    }
    Ok((info, slots))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(points: &[[f64; 3]]) -> Vec<CoorCell> {
        points
            .iter()
            .enumerate()
            .map(|(i, &p)| CoorCell::new(p, i))
            .collect()
    }

    #[test]
    fn scale_unscale_round_trip() {
        let original = [[1.0, 2.0, 3.0], [4.0, -1.0, 0.5], [2.5, 2.5, 2.5]];
        let mut list = cells(&original);
        let info = scale_cells(&mut list).unwrap();
        for c in &list {
            for j in 0..3 {
                assert!((-1e-12..=1.0 + 1e-12).contains(&c.coor[j]));
            }
        }
        unscale_cells(&mut list, &info);
        for (c, p) in list.iter().zip(&original) {
            for j in 0..3 {
                assert!((c.coor[j] - p[j]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn degenerate_set_is_rejected_unscaled() {
        let original = [[7.0, 7.0, 7.0], [7.0, 7.0, 7.0]];
        let mut list = cells(&original);
        let err = scale_cells(&mut list).unwrap_err();
        assert!(matches!(err, ParMeshError::DegeneratePointSet { .. }));
        // no rescale happened
        for (c, p) in list.iter().zip(&original) {
            assert_eq!(c.coor, *p);
        }
    }

    #[test]
    fn compare_is_lexicographic() {
        let a = CoorCell::new([0.1, 0.9, 0.9], 0);
        let b = CoorCell::new([0.2, 0.0, 0.0], 1);
        assert_eq!(compare_cells(&a, &b), Ordering::Less);
        assert_eq!(compare_cells(&b, &a), Ordering::Greater);
        assert_eq!(compare_cells(&a, &a), Ordering::Equal);
    }

    #[test]
    fn coincident_points_share_a_slot() {
        // Two partitions contribute the same corner point.
        let mut list = cells(&[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 0.0, 0.0],
            [1.0, 1.0, 1.0],
        ]);
        let (_, slots) = canonical_slots(&mut list).unwrap();
        assert_eq!(slots[0], slots[2]);
        assert_ne!(slots[0], slots[1]);
        assert_ne!(slots[1], slots[3]);
        // slots are numbered densely from zero in sorted order
        assert_eq!(slots[0], 0);
        let mut seen = slots.clone();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
