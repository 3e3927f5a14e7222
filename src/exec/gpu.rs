//! GPU backend.
//!
//! A block is covered by a 2-D grid of execution units, one per horizontal
//! point of the stage's area, with unit `(0, 0)` at the area's low corner.
//! Units are enumerated i-fastest, matching the i-innermost layout of
//! temporaries. Block-level work is done by the elected unit `(0, 0)` only.
//!
//! Units of one block are stepped in enumeration order on the block's
//! worker; the memory model (mirrored device buffers, IJ-plane scratch,
//! read-only fast path) is the device's.

use super::{BackendTraits, BlockJob, CompiledStage};
use crate::backend::{Backend, Capabilities, PointerPolicy};
use crate::error::Result;
use crate::iterate_domain::{DomainCore, Eval, GpuDomain, IterateDomain};
use crate::stage::Region;
use crate::storage::Layout;

/// GPU execution traits.
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuTraits;

impl BackendTraits for GpuTraits {
    fn backend(&self) -> Backend {
        Backend::Gpu
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            ij_caches: true,
            column_caches: true,
            readonly_fast_path: true,
            mirrored_memory: true,
        }
    }

    fn pointer_policy(&self) -> PointerPolicy {
        PointerPolicy::Mirrored
    }

    fn preferred_layout(&self) -> Layout {
        Layout::KJI
    }

    fn units(&self, area: (usize, usize)) -> usize {
        area.0 * area.1
    }

    fn unit_coords(&self, unit: usize, area: (usize, usize)) -> (usize, usize) {
        let ni = area.0.max(1);
        (unit % ni, unit / ni)
    }

    fn once_per_block(&self, unit: (usize, usize), f: &mut dyn FnMut()) {
        if unit == (0, 0) {
            f();
        }
    }

    fn sweep(&self, job: &mut BlockJob<'_>, stage: &CompiledStage, region: Region, k: usize) -> Result<()> {
        let Some(kernel) = stage.kernel(region) else {
            return Ok(());
        };
        let (ri, rj) = stage.area(job.block, job.grid);
        let area = (ri.len(), rj.len());
        let core = DomainCore::new(&stage.view, &mut job.mem, &mut job.caches, job.checked);
        let mut dom = GpuDomain::new(core, (ri.start, rj.start));
        for unit in 0..self.units(area) {
            let (ui, uj) = self.unit_coords(unit, area);
            dom.set_position(ri.start + ui, rj.start + uj, k);
            kernel(&mut Eval::new(&mut dom, region));
            if let Some(e) = dom.core.take_error() {
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_enumerate_i_fastest() {
        let t = GpuTraits;
        assert_eq!(t.units((3, 2)), 6);
        let coords: Vec<_> = (0..6).map(|u| t.unit_coords(u, (3, 2))).collect();
        assert_eq!(coords, [(0, 0), (1, 0), (2, 0), (0, 1), (1, 1), (2, 1)]);
    }

    #[test]
    fn only_the_elected_unit_runs_block_work() {
        let mut hits = Vec::new();
        for u in 0..4 {
            let coords = GpuTraits.unit_coords(u, (2, 2));
            GpuTraits.once_per_block(coords, &mut || hits.push(coords));
        }
        assert_eq!(hits, [(0, 0)]);
    }
}
