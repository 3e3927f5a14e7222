//! # Backend execution layer
//!
//! Everything that differs between backends sits behind [`BackendTraits`]:
//! capabilities, pointer ownership, preferred layout, how execution units map
//! onto a block and how one stage is swept over one level.
//!
//! ## Submodules
//!
//! - [`host`]: one worker walks every point of a block in nested loops
//! - [`gpu`]: a 2-D grid of execution units per block, IJ-plane caches,
//!   mirrored device memory and a read-only fast path
//!
//! ## Vertical driver
//!
//! [`BackendTraits::run_block`] is shared. It visits the levels of a group in
//! the group's direction and runs every stage at a level before moving on, so
//! IJ caches opened for a level are seen by all stages of the group. A
//! parallel group promises no dependency between levels; it is walked
//! bottom to top. Block-level work (opening and closing cache windows) goes
//! through [`BackendTraits::once_per_block`].

pub mod gpu;
pub mod host;

use core::ops::Range;

use crate::backend::{Backend, Capabilities, PointerPolicy};
use crate::cache::{BlockCaches, CacheSpec};
use crate::error::Result;
use crate::grid::{Block, Grid};
use crate::iterate_domain::BlockMemory;
use crate::local_domain::LocalDomainView;
use crate::stage::{Direction, Extent, Kernel, Region};
use crate::storage::Layout;

pub use self::gpu::GpuTraits;
pub use self::host::HostTraits;

/// A stage after binding: its argument view, kernels and compute extent.
pub struct CompiledStage {
    pub(crate) view: LocalDomainView,
    pub(crate) kernels: [Option<Kernel>; 3],
    pub(crate) compute: Extent,
}

impl CompiledStage {
    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.view.stage_name()
    }

    /// Horizontal extent beyond the block this stage computes on.
    #[must_use]
    pub const fn compute_extent(&self) -> Extent {
        self.compute
    }

    pub(crate) fn kernel(&self, region: Region) -> Option<&Kernel> {
        self.kernels[region.slot()].as_ref()
    }

    /// Points of `block` this stage computes, clipped to the grid.
    pub(crate) fn area(&self, block: &Block, grid: &Grid) -> (Range<usize>, Range<usize>) {
        let extend = |r: &Range<usize>, e: (i32, i32), total: usize| {
            let lo = (r.start as isize + e.0 as isize).max(0) as usize;
            let hi = ((r.end as isize + e.1 as isize).max(0) as usize).min(total);
            lo..hi
        };
        (extend(&block.i, self.compute.i, grid.i.total), extend(&block.j, self.compute.j, grid.j.total))
    }
}

/// A stage group after binding.
pub struct CompiledGroup {
    pub(crate) direction: Direction,
    pub(crate) stages: Range<usize>,
    pub(crate) caches: Vec<CacheSpec>,
}

impl CompiledGroup {
    /// Vertical direction.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }
}

/// Everything one block invocation of one group needs.
pub struct BlockJob<'a> {
    pub(crate) group: &'a CompiledGroup,
    pub(crate) stages: &'a [CompiledStage],
    pub(crate) grid: &'a Grid,
    pub(crate) block: &'a Block,
    pub(crate) mem: BlockMemory<'a>,
    pub(crate) caches: BlockCaches<'a>,
    pub(crate) checked: bool,
}

/// Backend-specific execution policy.
pub trait BackendTraits: Send + Sync {
    /// The backend these traits describe.
    fn backend(&self) -> Backend;

    /// Features the backend provides.
    fn capabilities(&self) -> Capabilities;

    /// How field memory is owned.
    fn pointer_policy(&self) -> PointerPolicy;

    /// Layout used for block-local temporaries.
    fn preferred_layout(&self) -> Layout;

    /// Number of execution units covering an `(ni, nj)` area.
    fn units(&self, area: (usize, usize)) -> usize;

    /// Position of unit `unit` inside an `(ni, nj)` area.
    fn unit_coords(&self, unit: usize, area: (usize, usize)) -> (usize, usize);

    /// Runs `f` on behalf of the whole block when called by `unit`.
    fn once_per_block(&self, unit: (usize, usize), f: &mut dyn FnMut());

    /// Evaluates one stage at one level over the stage's area of the block.
    ///
    /// # Errors
    /// The first access error raised by the kernel.
    fn sweep(&self, job: &mut BlockJob<'_>, stage: &CompiledStage, region: Region, k: usize) -> Result<()>;

    /// Offers `f` to every unit of the block; exactly one runs it.
    fn block_once(&self, area: (usize, usize), f: &mut dyn FnMut()) {
        for u in 0..self.units(area) {
            self.once_per_block(self.unit_coords(u, area), f);
        }
    }

    /// Runs one stage group on one block.
    ///
    /// # Errors
    /// Access errors of any stage and cache fill or flush failures.
    fn run_block(&self, job: &mut BlockJob<'_>) -> Result<()> {
        let (group, stages, grid) = (job.group, job.stages, job.grid);
        let stages = &stages[group.stages.clone()];
        let area = (job.block.i.len(), job.block.j.len());
        let levels = group.direction.levels(grid.k_levels);

        let mut status = Ok(());
        self.block_once(area, &mut || status = job.caches.begin_group(&job.mem));
        status?;

        for k in levels {
            open_level(self, job, area, k)?;
            for stage in stages {
                self.sweep(job, stage, grid.region_of(k), k)?;
            }
            close_level(self, job, area)?;
        }

        let mut status = Ok(());
        self.block_once(area, &mut || status = job.caches.end_group(&mut job.mem));
        status
    }
}

fn open_level<T: BackendTraits + ?Sized>(traits: &T, job: &mut BlockJob<'_>, area: (usize, usize), k: usize) -> Result<()> {
    let mut status = Ok(());
    traits.block_once(area, &mut || status = job.caches.begin_level(k, &job.mem));
    status
}

fn close_level<T: BackendTraits + ?Sized>(traits: &T, job: &mut BlockJob<'_>, area: (usize, usize)) -> Result<()> {
    let mut status = Ok(());
    traits.block_once(area, &mut || status = job.caches.end_level(&mut job.mem));
    status
}

/// Execution traits of `backend`.
#[must_use]
pub fn traits_for(backend: Backend) -> &'static dyn BackendTraits {
    match backend {
        Backend::Host => &HostTraits,
        Backend::Gpu => &GpuTraits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traits_match_backend() {
        for backend in [Backend::Host, Backend::Gpu] {
            assert_eq!(traits_for(backend).backend(), backend);
        }
        assert!(!traits_for(Backend::Host).capabilities().ij_caches);
        assert!(traits_for(Backend::Gpu).capabilities().ij_caches);
        assert_eq!(traits_for(Backend::Gpu).pointer_policy(), PointerPolicy::Mirrored);
        assert_eq!(traits_for(Backend::Host).preferred_layout(), Layout::IJK);
    }

    #[test]
    fn exactly_one_unit_runs_block_work() {
        for backend in [Backend::Host, Backend::Gpu] {
            let mut calls = 0;
            traits_for(backend).block_once((4, 3), &mut || calls += 1);
            assert_eq!(calls, 1, "{backend:?}");
        }
    }
}
