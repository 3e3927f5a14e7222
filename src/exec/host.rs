//! Host backend: a block is one unit of work for one worker thread, which
//! walks the block's points in nested i, j loops at every level.

use super::{BackendTraits, BlockJob, CompiledStage};
use crate::backend::{Backend, Capabilities, PointerPolicy};
use crate::error::Result;
use crate::iterate_domain::{DomainCore, Eval, HostDomain, IterateDomain};
use crate::stage::Region;
use crate::storage::Layout;

/// Host execution traits.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostTraits;

impl BackendTraits for HostTraits {
    fn backend(&self) -> Backend {
        Backend::Host
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            ij_caches: false,
            column_caches: true,
            readonly_fast_path: false,
            mirrored_memory: false,
        }
    }

    fn pointer_policy(&self) -> PointerPolicy {
        PointerPolicy::Owned
    }

    fn preferred_layout(&self) -> Layout {
        Layout::IJK
    }

    fn units(&self, _area: (usize, usize)) -> usize {
        1
    }

    fn unit_coords(&self, _unit: usize, _area: (usize, usize)) -> (usize, usize) {
        (0, 0)
    }

    fn once_per_block(&self, _unit: (usize, usize), f: &mut dyn FnMut()) {
        f();
    }

    fn sweep(&self, job: &mut BlockJob<'_>, stage: &CompiledStage, region: Region, k: usize) -> Result<()> {
        let Some(kernel) = stage.kernel(region) else {
            return Ok(());
        };
        let (ri, rj) = stage.area(job.block, job.grid);
        let mut dom = HostDomain(DomainCore::new(&stage.view, &mut job.mem, &mut job.caches, job.checked));
        for i in ri {
            for j in rj.clone() {
                dom.set_position(i, j, k);
                kernel(&mut Eval::new(&mut dom, region));
                if let Some(e) = dom.0.take_error() {
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
