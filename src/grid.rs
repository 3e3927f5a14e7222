//! Computation domain: horizontal axes with halos, vertical levels and their
//! split into regions, and the tiling of the horizontal plane into blocks.

use core::ops::Range;

use crate::error::BuildError;
use crate::stage::Region;

/// One horizontal axis of the grid.
///
/// Points `begin..end` form the compute domain; `minus` and `plus` are the
/// halo widths on either side, `total` the full extent fields must cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Axis {
    /// Halo width below `begin`.
    pub minus: usize,
    /// Halo width above `end`.
    pub plus: usize,
    /// First computed point.
    pub begin: usize,
    /// One past the last computed point.
    pub end: usize,
    /// Full extent including halos.
    pub total: usize,
}

impl Axis {
    /// An axis without halo: every point is computed.
    #[must_use]
    pub const fn new(total: usize) -> Self {
        Self { minus: 0, plus: 0, begin: 0, end: total, total }
    }

    /// An axis with `minus` and `plus` halo points around the compute domain.
    #[must_use]
    pub const fn with_halo(minus: usize, plus: usize, total: usize) -> Self {
        Self {
            minus,
            plus,
            begin: minus,
            end: total.saturating_sub(plus),
            total,
        }
    }

    /// Number of computed points.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    /// Whether no point is computed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sizes of the first and last vertical regions; the interior takes the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerticalSplit {
    /// Levels in the first region.
    pub first: usize,
    /// Levels in the last region.
    pub last: usize,
}

impl Default for VerticalSplit {
    fn default() -> Self {
        Self { first: 1, last: 1 }
    }
}

/// One tile of the horizontal compute domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Position in the tiling, row-major over (bi, bj).
    pub id: usize,
    /// Tile coordinates.
    pub coords: (usize, usize),
    /// Computed i points.
    pub i: Range<usize>,
    /// Computed j points.
    pub j: Range<usize>,
}

/// The iteration space of a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    /// The i axis.
    pub i: Axis,
    /// The j axis.
    pub j: Axis,
    /// Number of vertical levels.
    pub k_levels: usize,
    /// Split of the levels into first, interior and last regions.
    pub split: VerticalSplit,
}

impl Grid {
    /// A grid without halos computing every point of `ni x nj x nk`.
    #[must_use]
    pub fn new(ni: usize, nj: usize, nk: usize) -> Self {
        Self::from_axes(Axis::new(ni), Axis::new(nj), nk)
    }

    /// A grid from explicit horizontal axes.
    #[must_use]
    pub fn from_axes(i: Axis, j: Axis, k_levels: usize) -> Self {
        Self { i, j, k_levels, split: VerticalSplit::default() }
    }

    /// Overrides the vertical split.
    #[must_use]
    pub const fn with_split(mut self, first: usize, last: usize) -> Self {
        self.split = VerticalSplit { first, last };
        self
    }

    /// Checks axis consistency and the vertical split.
    ///
    /// # Errors
    /// [`BuildError::MalformedGrid`] or [`BuildError::MalformedIntervals`].
    pub fn check(&self) -> Result<(), BuildError> {
        for (name, axis) in [("i", &self.i), ("j", &self.j)] {
            if axis.end > axis.total {
                return Err(BuildError::MalformedGrid(format!(
                    "{name} axis ends at {} beyond its total {}",
                    axis.end, axis.total
                )));
            }
            if axis.is_empty() {
                return Err(BuildError::MalformedGrid(format!("{name} axis computes no points")));
            }
        }
        self.regions().map(|_| ())
    }

    /// The three vertical regions in ascending order.
    ///
    /// The first region is `[0, first)`, the last `[nk - last, nk)` and the
    /// interior whatever lies between; the interior may be empty.
    ///
    /// # Errors
    /// [`BuildError::MalformedIntervals`] if there are no levels or the first
    /// and last regions overlap.
    pub fn regions(&self) -> Result<[(Region, Range<usize>); 3], BuildError> {
        let nk = self.k_levels;
        let VerticalSplit { first, last } = self.split;
        if nk == 0 || first + last > nk {
            return Err(BuildError::MalformedIntervals { first, last, levels: nk });
        }
        Ok([
            (Region::First, 0..first),
            (Region::Interior, first..nk - last),
            (Region::Last, nk - last..nk),
        ])
    }

    /// The region level `k` belongs to, for a well-formed split.
    #[must_use]
    pub const fn region_of(&self, k: usize) -> Region {
        if k < self.split.first {
            Region::First
        } else if k + self.split.last >= self.k_levels {
            Region::Last
        } else {
            Region::Interior
        }
    }

    /// Tiles the compute domain into blocks of at most `bi x bj` points.
    ///
    /// Blocks are disjoint and their union is exactly the compute domain.
    #[must_use]
    pub fn blocks(&self, bi: usize, bj: usize) -> Vec<Block> {
        let tiles = |axis: &Axis, b: usize| -> Vec<Range<usize>> {
            (axis.begin..axis.end)
                .step_by(b.max(1))
                .map(|lo| lo..(lo + b.max(1)).min(axis.end))
                .collect()
        };
        let ti = tiles(&self.i, bi);
        let tj = tiles(&self.j, bj);
        let mut blocks = Vec::with_capacity(ti.len() * tj.len());
        for (x, i) in ti.iter().enumerate() {
            for (y, j) in tj.iter().enumerate() {
                blocks.push(Block {
                    id: blocks.len(),
                    coords: (x, y),
                    i: i.clone(),
                    j: j.clone(),
                });
            }
        }
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_split_partitions_levels() {
        let grid = Grid::new(2, 2, 5);
        let [first, interior, last] = grid.regions().unwrap();
        assert_eq!(first, (Region::First, 0..1));
        assert_eq!(interior, (Region::Interior, 1..4));
        assert_eq!(last, (Region::Last, 4..5));
        assert_eq!(grid.region_of(0), Region::First);
        assert_eq!(grid.region_of(3), Region::Interior);
        assert_eq!(grid.region_of(4), Region::Last);
    }

    #[test]
    fn two_levels_leave_an_empty_interior() {
        let grid = Grid::new(1, 1, 2);
        let [_, (_, interior), _] = grid.regions().unwrap();
        assert!(interior.is_empty());
        assert_eq!(grid.region_of(1), Region::Last);
    }

    #[test]
    fn overlapping_regions_are_malformed() {
        let grid = Grid::new(1, 1, 3).with_split(2, 2);
        assert_eq!(
            grid.regions().unwrap_err(),
            BuildError::MalformedIntervals { first: 2, last: 2, levels: 3 }
        );
        assert!(grid.check().is_err());
        assert!(Grid::new(1, 1, 0).check().is_err());
    }

    #[test]
    fn halo_axes() {
        let axis = Axis::with_halo(2, 1, 10);
        assert_eq!((axis.begin, axis.end, axis.len()), (2, 9, 7));
        let grid = Grid::from_axes(axis, Axis::with_halo(0, 0, 3), 4);
        assert!(grid.check().is_ok());

        let bad = Grid::from_axes(Axis { minus: 0, plus: 0, begin: 0, end: 5, total: 4 }, Axis::new(1), 2);
        assert!(matches!(bad.check(), Err(BuildError::MalformedGrid(_))));
    }

    #[test]
    fn blocks_partition_the_compute_domain() {
        let grid = Grid::from_axes(Axis::with_halo(1, 1, 12), Axis::new(7), 3);
        let blocks = grid.blocks(4, 3);
        assert_eq!(blocks.len(), 3 * 3);
        let mut hits = vec![0; 12 * 7];
        for b in &blocks {
            for i in b.i.clone() {
                for j in b.j.clone() {
                    hits[i * 7 + j] += 1;
                }
            }
        }
        for i in 0..12 {
            for j in 0..7 {
                let expected = usize::from((1..11).contains(&i));
                assert_eq!(hits[i * 7 + j], expected, "({i}, {j})");
            }
        }
        assert_eq!(blocks[8].coords, (2, 2));
        assert_eq!(blocks[8].i, 9..11);
        assert_eq!(blocks[8].j, 6..7);
    }
}
