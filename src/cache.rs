//! Software-managed scratch caches.
//!
//! A [`CacheDeclaration`] asks a stage group to keep a window of one field in
//! block-local scratch:
//!
//! | scope  | window                                   | lifetime        |
//! |--------|------------------------------------------|-----------------|
//! | `IJ`   | block plus halo, one level               | one k-level     |
//! | `IJK`  | block plus halo, every level             | one group run   |
//! | `K`    | block columns, every level               | one group run   |
//!
//! Caches are transparent: every access that falls inside a window reads or
//! writes scratch, everything else goes to memory, and with `Fill`/`Flush`
//! the visible results are identical to an uncached run. Elements a `Flush`
//! cache has not seen written yet are read through to memory; a `Local`
//! cache never touches memory and reads unwritten elements as zero.

use crate::Real;
use crate::error::Result;
use crate::grid::{Block, Grid};
use crate::stage::{Extent, Placeholder};

/// Which window of a field a cache holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheScope {
    /// One horizontal plane of the block plus halo.
    IJ,
    /// The block plus halo over every level.
    IJK,
    /// The block's own columns over every level.
    K,
}

/// How a cache is synchronised with memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePolicy {
    /// Loaded from memory when the window opens; never written back.
    Fill,
    /// Written back when the window closes; not loaded.
    Flush,
    /// Loaded and written back.
    FillAndFlush,
    /// Neither loaded nor written back.
    Local,
}

impl CachePolicy {
    /// Whether the window is loaded when it opens.
    #[must_use]
    pub const fn fills(self) -> bool {
        matches!(self, Self::Fill | Self::FillAndFlush)
    }

    /// Whether written elements are stored back when the window closes.
    #[must_use]
    pub const fn flushes(self) -> bool {
        matches!(self, Self::Flush | Self::FillAndFlush)
    }
}

/// A cache requested for one placeholder of a stage group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheDeclaration {
    /// Window shape.
    pub scope: CacheScope,
    /// Memory synchronisation.
    pub policy: CachePolicy,
    /// Cached placeholder.
    pub target: Placeholder,
}

impl CacheDeclaration {
    /// A single cache declaration.
    #[must_use]
    pub const fn new(scope: CacheScope, policy: CachePolicy, target: Placeholder) -> Self {
        Self { scope, policy, target }
    }
}

/// One declaration per target, all with the same scope and policy.
///
/// ```
/// use stencil_engine::cache::{cache_all, CachePolicy, CacheScope};
/// use stencil_engine::stage::Placeholder;
///
/// let decls = cache_all(CacheScope::IJ, CachePolicy::Fill, &[Placeholder::new(0), Placeholder::new(2)]);
/// assert_eq!(decls.len(), 2);
/// assert_eq!(decls[1].target, Placeholder::new(2));
/// ```
#[must_use]
pub fn cache_all(scope: CacheScope, policy: CachePolicy, targets: &[Placeholder]) -> Vec<CacheDeclaration> {
    targets.iter().map(|&t| CacheDeclaration::new(scope, policy, t)).collect()
}

/// Memory behind a cache: the field slots of one block.
pub(crate) trait Backing {
    /// Whether `coord` is addressable in `slot`.
    fn contains(&self, slot: usize, coord: [isize; 3]) -> bool;
    /// Reads the current snapshot of `slot`.
    fn load(&self, slot: usize, coord: [isize; 3]) -> Result<Real>;
    /// Writes the current snapshot of `slot`.
    fn store(&mut self, slot: usize, coord: [isize; 3], value: Real) -> Result<()>;
}

/// A declaration resolved against an aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CacheSpec {
    pub scope: CacheScope,
    pub policy: CachePolicy,
    pub slot: usize,
    /// Horizontal halo around the block columns.
    pub halo: Extent,
}

#[derive(Debug)]
struct Window {
    lo: [isize; 3],
    hi: [isize; 3],
    data: Vec<Real>,
    valid: Vec<bool>,
    dirty: Vec<bool>,
}

impl Window {
    fn new(lo: [isize; 3], hi: [isize; 3]) -> Self {
        let len = (0..3).map(|a| (hi[a] - lo[a]).max(0) as usize).product();
        Self { lo, hi, data: vec![0.0; len], valid: vec![false; len], dirty: vec![false; len] }
    }

    fn index(&self, c: [isize; 3]) -> Option<usize> {
        if (0..3).any(|a| c[a] < self.lo[a] || c[a] >= self.hi[a]) {
            return None;
        }
        let wi = (self.hi[0] - self.lo[0]) as usize;
        let wj = (self.hi[1] - self.lo[1]) as usize;
        let (i, j, k) = ((c[0] - self.lo[0]) as usize, (c[1] - self.lo[1]) as usize, (c[2] - self.lo[2]) as usize);
        Some((k * wj + j) * wi + i)
    }

    fn coords(&self) -> impl Iterator<Item = [isize; 3]> + use<> {
        let (lo, hi) = (self.lo, self.hi);
        (lo[2]..hi[2]).flat_map(move |k| (lo[1]..hi[1]).flat_map(move |j| (lo[0]..hi[0]).map(move |i| [i, j, k])))
    }

    fn reset(&mut self) {
        self.valid.fill(false);
        self.dirty.fill(false);
    }
}

/// Scratch of every cache of one stage group, for one block invocation.
#[derive(Debug)]
pub(crate) struct BlockCaches<'s> {
    specs: &'s [CacheSpec],
    windows: Vec<Window>,
}

impl<'s> BlockCaches<'s> {
    /// Allocates windows sized by the block and each cache's halo.
    pub(crate) fn new(specs: &'s [CacheSpec], block: &Block, grid: &Grid) -> Self {
        let windows = specs
            .iter()
            .map(|spec| {
                let lo_i = (block.i.start as isize + spec.halo.i.0 as isize).max(0);
                let hi_i = (block.i.end as isize + spec.halo.i.1 as isize).min(grid.i.total as isize);
                let lo_j = (block.j.start as isize + spec.halo.j.0 as isize).max(0);
                let hi_j = (block.j.end as isize + spec.halo.j.1 as isize).min(grid.j.total as isize);
                let (lo_k, hi_k) = match spec.scope {
                    CacheScope::IJ => (0, 1),
                    CacheScope::IJK | CacheScope::K => (0, grid.k_levels as isize),
                };
                Window::new([lo_i, lo_j, lo_k], [hi_i, hi_j, hi_k])
            })
            .collect();
        Self { specs, windows }
    }

    fn fill(&mut self, c: usize, mem: &dyn Backing) -> Result<()> {
        let slot = self.specs[c].slot;
        let window = &mut self.windows[c];
        let coords: Vec<[isize; 3]> = window.coords().collect();
        for coord in coords {
            if mem.contains(slot, coord)
                && let Some(idx) = window.index(coord)
            {
                window.data[idx] = mem.load(slot, coord)?;
                window.valid[idx] = true;
            }
        }
        Ok(())
    }

    fn flush(&mut self, c: usize, mem: &mut dyn Backing) -> Result<()> {
        let slot = self.specs[c].slot;
        let window = &self.windows[c];
        for coord in window.coords() {
            if let Some(idx) = window.index(coord)
                && window.dirty[idx]
                && mem.contains(slot, coord)
            {
                mem.store(slot, coord, window.data[idx])?;
            }
        }
        Ok(())
    }

    fn column_caches(&self) -> impl Iterator<Item = usize> + use<'_, 's> {
        (0..self.specs.len()).filter(|&c| self.specs[c].scope != CacheScope::IJ)
    }

    fn plane_caches(&self) -> impl Iterator<Item = usize> + use<'_, 's> {
        (0..self.specs.len()).filter(|&c| self.specs[c].scope == CacheScope::IJ)
    }

    /// Opens the IJK and K windows.
    pub(crate) fn begin_group(&mut self, mem: &dyn Backing) -> Result<()> {
        let columns: Vec<usize> = self.column_caches().collect();
        for c in columns {
            self.windows[c].reset();
            if self.specs[c].policy.fills() {
                self.fill(c, mem)?;
            }
        }
        Ok(())
    }

    /// Closes the IJK and K windows.
    pub(crate) fn end_group(&mut self, mem: &mut dyn Backing) -> Result<()> {
        let columns: Vec<usize> = self.column_caches().collect();
        for c in columns {
            if self.specs[c].policy.flushes() {
                self.flush(c, mem)?;
            }
        }
        Ok(())
    }

    /// Moves every IJ window to level `k` and loads it.
    pub(crate) fn begin_level(&mut self, k: usize, mem: &dyn Backing) -> Result<()> {
        let planes: Vec<usize> = self.plane_caches().collect();
        for c in planes {
            let window = &mut self.windows[c];
            window.lo[2] = k as isize;
            window.hi[2] = k as isize + 1;
            window.reset();
            if self.specs[c].policy.fills() {
                self.fill(c, mem)?;
            }
        }
        Ok(())
    }

    /// Writes back every IJ window of the current level.
    pub(crate) fn end_level(&mut self, mem: &mut dyn Backing) -> Result<()> {
        let planes: Vec<usize> = self.plane_caches().collect();
        for c in planes {
            if self.specs[c].policy.flushes() {
                self.flush(c, mem)?;
            }
        }
        Ok(())
    }

    /// Position of `coord` inside cache `c`, if the window covers it.
    pub(crate) fn lookup(&self, c: usize, coord: [isize; 3]) -> Option<usize> {
        self.windows[c].index(coord)
    }

    /// Reads through cache `c`; `None` if the window does not cover `coord`.
    pub(crate) fn read(&self, c: usize, coord: [isize; 3], mem: &dyn Backing) -> Option<Result<Real>> {
        let window = &self.windows[c];
        let idx = window.index(coord)?;
        if window.valid[idx] {
            return Some(Ok(window.data[idx]));
        }
        if self.specs[c].policy == CachePolicy::Local {
            return Some(Ok(0.0));
        }
        Some(mem.load(self.specs[c].slot, coord))
    }

    /// Writes through cache `c`; `false` if the window does not cover `coord`.
    pub(crate) fn write(&mut self, c: usize, coord: [isize; 3], value: Real) -> bool {
        let window = &mut self.windows[c];
        let Some(idx) = window.index(coord) else {
            return false;
        };
        window.data[idx] = value;
        window.valid[idx] = true;
        window.dirty[idx] = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FieldMeta, Layout};

    struct Plain {
        meta: FieldMeta,
        data: Vec<Real>,
        stores: usize,
    }

    impl Plain {
        fn new(dims: [usize; 3]) -> Self {
            let meta = FieldMeta::new(dims, Layout::IJK);
            let data = (0..meta.size()).map(|v| v as Real).collect();
            Self { meta, data, stores: 0 }
        }
    }

    impl Backing for Plain {
        fn contains(&self, _slot: usize, coord: [isize; 3]) -> bool {
            self.meta.contains(coord)
        }

        fn load(&self, _slot: usize, coord: [isize; 3]) -> Result<Real> {
            Ok(self.data[self.meta.signed_index(coord) as usize])
        }

        fn store(&mut self, _slot: usize, coord: [isize; 3], value: Real) -> Result<()> {
            self.stores += 1;
            self.data[self.meta.signed_index(coord) as usize] = value;
            Ok(())
        }
    }

    fn block() -> Block {
        Block { id: 0, coords: (0, 0), i: 1..3, j: 0..2 }
    }

    #[test]
    fn ij_window_follows_level_and_halo() {
        let grid = Grid::new(4, 2, 3);
        let specs = [CacheSpec {
            scope: CacheScope::IJ,
            policy: CachePolicy::Fill,
            slot: 0,
            halo: Extent::horizontal(-1, 1, 0, 0),
        }];
        let mut mem = Plain::new([4, 2, 3]);
        let mut caches = BlockCaches::new(&specs, &block(), &grid);
        caches.begin_level(2, &mem).unwrap();
        assert!(caches.lookup(0, [0, 1, 2]).is_some());
        assert!(caches.lookup(0, [3, 1, 2]).is_some());
        assert!(caches.lookup(0, [1, 1, 1]).is_none());

        let expected = mem.load(0, [3, 1, 2]).unwrap();
        assert_eq!(caches.read(0, [3, 1, 2], &mem).unwrap().unwrap(), expected);
        assert!(caches.write(0, [1, 0, 2], -1.0));
        caches.end_level(&mut mem).unwrap();
        assert_eq!(mem.stores, 0);
        assert_ne!(mem.load(0, [1, 0, 2]).unwrap(), -1.0);
    }

    #[test]
    fn flush_writes_only_dirty_elements() {
        let grid = Grid::new(4, 2, 3);
        let specs = [CacheSpec { scope: CacheScope::K, policy: CachePolicy::Flush, slot: 0, halo: Extent::zero() }];
        let mut mem = Plain::new([4, 2, 3]);
        let mut caches = BlockCaches::new(&specs, &block(), &grid);
        caches.begin_group(&mem).unwrap();

        let before = mem.load(0, [2, 1, 0]).unwrap();
        assert_eq!(caches.read(0, [2, 1, 0], &mem).unwrap().unwrap(), before);
        assert!(caches.write(0, [2, 1, 0], 42.0));
        assert!(caches.write(0, [1, 0, 2], 43.0));
        assert!(!caches.write(0, [0, 0, 0], 1.0));
        caches.end_group(&mut mem).unwrap();

        assert_eq!(mem.stores, 2);
        assert_eq!(mem.load(0, [2, 1, 0]).unwrap(), 42.0);
        assert_eq!(mem.load(0, [1, 0, 2]).unwrap(), 43.0);
    }

    #[test]
    fn local_cache_never_touches_memory() {
        let grid = Grid::new(4, 2, 3);
        let specs = [CacheSpec { scope: CacheScope::IJK, policy: CachePolicy::Local, slot: 0, halo: Extent::zero() }];
        let mut mem = Plain::new([4, 2, 3]);
        let mut caches = BlockCaches::new(&specs, &block(), &grid);
        caches.begin_group(&mem).unwrap();
        assert_eq!(caches.read(0, [1, 1, 1], &mem).unwrap().unwrap(), 0.0);
        caches.write(0, [1, 1, 1], 5.0);
        assert_eq!(caches.read(0, [1, 1, 1], &mem).unwrap().unwrap(), 5.0);
        caches.end_group(&mut mem).unwrap();
        assert_eq!(mem.stores, 0);
    }

    #[test]
    fn windows_are_clipped_to_the_grid() {
        let grid = Grid::new(4, 2, 3);
        let specs = [CacheSpec {
            scope: CacheScope::IJK,
            policy: CachePolicy::FillAndFlush,
            slot: 0,
            halo: Extent::horizontal(-2, 2, -1, 1),
        }];
        let caches = BlockCaches::new(&specs, &block(), &grid);
        assert!(caches.lookup(0, [0, 0, 0]).is_some());
        assert!(caches.lookup(0, [-1, 0, 0]).is_none());
        assert!(caches.lookup(0, [3, 1, 2]).is_some());
        assert!(caches.lookup(0, [4, 1, 2]).is_none());
    }
}
