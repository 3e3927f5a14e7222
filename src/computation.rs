//! Computation lifecycle: build, validate, run, finalize.
//!
//! [`Computation::prepare`] resolves every stage against the aggregate,
//! derives how far beyond its block each stage must compute so that
//! temporaries are valid wherever later stages read them, checks the plan
//! against the backend, and allocates per-block scratch. [`Computation::run`]
//! then executes the groups in order; the blocks of one group run
//! concurrently on rayon workers.
//!
//! A prepared computation can be run any number of times. Fields are only
//! reachable through the computation while it owns them.

use core::fmt::Write as _;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::Real;
use crate::aggregate::Aggregate;
use crate::backend::PointerPolicy;
use crate::cache::{BlockCaches, CacheScope, CacheSpec};
use crate::config::ExecConfig;
use crate::error::{BuildError, MemorySide, Result, StencilError};
use crate::exec::{self, BackendTraits, BlockJob, CompiledGroup, CompiledStage};
use crate::grid::{Axis, Block, Grid};
use crate::iterate_domain::{BlockMemory, SlotMemory, TempLayout, WriteRecord};
use crate::local_domain::LocalDomainView;
use crate::stage::{ExecutionPlan, Extent, Intent, Placeholder, Region, StageGroup};
use crate::storage::buffer::SharedSlice;
use crate::storage::{Field, FieldMeta};

/// Per-block scratch that lives from `prepare()` to `finalize()`.
struct BlockScratch {
    temps: Vec<Vec<Real>>,
    log: Vec<WriteRecord>,
}

/// How each aggregate slot is bound at run time.
struct SlotPlan {
    used: Vec<bool>,
    written: Vec<bool>,
    temp_of_slot: Vec<Option<usize>>,
    readonly_fast_path: bool,
}

/// The result of a successful `prepare()`.
struct Prepared {
    traits: &'static dyn BackendTraits,
    stages: Vec<CompiledStage>,
    groups: Vec<CompiledGroup>,
    blocks: Vec<Block>,
    temp_layouts: Vec<TempLayout>,
    slots: SlotPlan,
    scratch: Vec<BlockScratch>,
    pool: Option<rayon::ThreadPool>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Meter {
    prepare: Duration,
    runs: usize,
    total: Duration,
    last: Duration,
}

/// A stencil computation bound to its fields.
///
/// # Example
/// ```
/// use stencil_engine::prelude::*;
///
/// const OUT: Accessor = Accessor::new(0);
/// const IN: Accessor = Accessor::new(1);
/// let (p_out, p_in) = (Placeholder::new(0), Placeholder::new(1));
///
/// // out(k) = in(k) + out(k - 1), bottom to top
/// let sum = Stage::new("prefix_sum")
///     .inout(p_out, Extent::vertical(-1, 0))
///     .input(p_in, Extent::zero())
///     .on(Region::First, |e: &mut Eval<'_>| {
///         let v = e.get(IN);
///         e.set(OUT, v);
///     })
///     .on_regions(&[Region::Interior, Region::Last], |e: &mut Eval<'_>| {
///         let v = e.get(IN) + e.get(OUT.at(0, 0, -1));
///         e.set(OUT, v);
///     });
///
/// let agg = Aggregate::new()
///     .with(p_out, Field::new(2, 2, 4, 0.0, "out"))
///     .with(p_in, Field::new(2, 2, 4, 1.0, "in"));
/// let plan = ExecutionPlan::new().group(StageGroup::new(Direction::Forward).stage(sum));
/// let mut comp = Computation::new(agg, Grid::new(2, 2, 4), plan, ExecConfig::default());
/// comp.prepare()?;
/// comp.run()?;
/// assert_eq!(comp.field(p_out).map(|f| f.get(1, 0, 3)), Some(4.0));
/// # Ok::<(), StencilError>(())
/// ```
pub struct Computation {
    aggregate: Aggregate,
    grid: Grid,
    plan: ExecutionPlan,
    config: ExecConfig,
    prepared: Option<Prepared>,
    meter: Meter,
    write_log: Vec<WriteRecord>,
}

impl Computation {
    /// Binds a plan to its fields. Nothing is validated until [`prepare`](Self::prepare).
    #[must_use]
    pub fn new(aggregate: Aggregate, grid: Grid, plan: ExecutionPlan, config: ExecConfig) -> Self {
        Self {
            aggregate,
            grid,
            plan,
            config,
            prepared: None,
            meter: Meter::default(),
            write_log: Vec::new(),
        }
    }

    /// Validates the plan and allocates per-block scratch.
    ///
    /// # Errors
    /// A [`BuildError`] describing the first problem found.
    pub fn prepare(&mut self) -> Result<()> {
        let span = tracing::info_span!("prepare", backend = ?self.config.backend);
        let _enter = span.enter();
        let start = Instant::now();
        self.prepared = None;
        let built = self.build();
        self.meter.prepare = start.elapsed();
        match built {
            Ok(prepared) => {
                tracing::info!(
                    stages = prepared.stages.len(),
                    groups = prepared.groups.len(),
                    blocks = prepared.blocks.len(),
                    temporaries = prepared.temp_layouts.len(),
                    "computation prepared"
                );
                for field in self.aggregate.slots_mut() {
                    field.track_sync(self.config.track_sync);
                }
                self.prepared = Some(prepared);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "computation rejected");
                Err(e.into())
            }
        }
    }

    fn build(&self) -> core::result::Result<Prepared, BuildError> {
        let config = &self.config;
        let (bi, bj) = config.block_size;
        if bi == 0 || bj == 0 {
            return Err(BuildError::InvalidBlockSize(config.block_size));
        }
        if self.plan.stage_count() == 0 {
            return Err(BuildError::EmptyPlan);
        }
        self.grid.check()?;
        self.aggregate.check_dense()?;

        let traits = exec::traits_for(config.backend);
        let fields = self.aggregate.slots();

        let mut written = vec![false; fields.len()];
        for stage in self.plan.groups().iter().flat_map(StageGroup::stages) {
            for arg in stage.args().iter().filter(|a| a.intent == Intent::InOut) {
                if let Some(slot) = self.aggregate.slot_of(arg.placeholder) {
                    written[slot] = true;
                }
            }
        }

        let mut views = Vec::with_capacity(self.plan.stage_count());
        for stage in self.plan.groups().iter().flat_map(StageGroup::stages) {
            views.push(LocalDomainView::build(stage, &self.aggregate, &written)?);
        }
        let mut used = vec![false; fields.len()];
        for e in views.iter().flat_map(LocalDomainView::entries) {
            used[e.slot] = true;
        }

        let compute = compute_extents(&views, fields.len());
        self.check_access_patterns(&views, &compute)?;
        self.check_fields(traits, &views, &compute, &used)?;
        let groups = self.resolve_caches(traits, &mut views, &compute)?;

        let stages: Vec<CompiledStage> = self
            .plan
            .groups()
            .iter()
            .flat_map(StageGroup::stages)
            .zip(views)
            .zip(compute.iter())
            .map(|((stage, view), &compute)| CompiledStage {
                view,
                kernels: Region::ALL.map(|r| stage.kernel(r).cloned()),
                compute,
            })
            .collect();

        let halos = temporary_halos(&stages, fields.len());
        let mut temp_layouts = Vec::new();
        let mut temp_of_slot = vec![None; fields.len()];
        for (slot, field) in fields.iter().enumerate() {
            if field.is_temporary() {
                let halo = halos[slot];
                let dims = [
                    bi + (halo.i.1 - halo.i.0) as usize,
                    bj + (halo.j.1 - halo.j.0) as usize,
                    self.grid.k_levels,
                ];
                temp_of_slot[slot] = Some(temp_layouts.len());
                temp_layouts.push(TempLayout { meta: FieldMeta::new(dims, traits.preferred_layout()), halo });
                tracing::debug!(temporary = %field.name(), ?dims, "block-local temporary");
            }
        }

        let blocks = self.grid.blocks(bi, bj);
        let scratch = blocks
            .iter()
            .map(|_| BlockScratch {
                temps: temp_layouts.iter().map(|t| vec![0.0; t.meta.size()]).collect(),
                log: Vec::new(),
            })
            .collect();

        let pool = match config.threads {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| BuildError::WorkerPool(e.to_string()))?,
            ),
            None => None,
        };

        Ok(Prepared {
            traits,
            stages,
            groups,
            blocks,
            temp_layouts,
            slots: SlotPlan {
                used,
                written,
                temp_of_slot,
                readonly_fast_path: traits.capabilities().readonly_fast_path,
            },
            scratch,
            pool,
        })
    }

    /// Rejects writes on halos and horizontal reads of fields the same group writes.
    fn check_access_patterns(&self, views: &[LocalDomainView], compute: &[Extent]) -> core::result::Result<(), BuildError> {
        for (view, ext) in views.iter().zip(compute) {
            if ext.is_zero_ij() {
                continue;
            }
            if let Some(e) = view.entries().iter().find(|e| e.intent == Intent::InOut && !e.temporary) {
                return Err(BuildError::HaloWrite {
                    stage: view.stage_name().to_owned(),
                    placeholder: e.placeholder.index(),
                });
            }
        }

        let mut offset = 0;
        for group in self.plan.groups() {
            let range = offset..offset + group.stages().len();
            offset = range.end;
            let group_writes: Vec<usize> = views[range.clone()]
                .iter()
                .flat_map(LocalDomainView::entries)
                .filter(|e| e.intent == Intent::InOut && !e.temporary)
                .map(|e| e.slot)
                .collect();
            for s in range {
                for e in views[s].entries() {
                    if group_writes.contains(&e.slot) && !compute[s].compose(e.extent).is_zero_ij() {
                        return Err(BuildError::RacyNeighborRead {
                            stage: views[s].stage_name().to_owned(),
                            placeholder: e.placeholder.index(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Pointer policy and size checks of every bound, non-temporary field.
    fn check_fields(
        &self,
        traits: &dyn BackendTraits,
        views: &[LocalDomainView],
        compute: &[Extent],
        used: &[bool],
    ) -> core::result::Result<(), BuildError> {
        let fields = self.aggregate.slots();
        let placeholder = |slot: usize| self.aggregate.placeholder_of(slot).map_or(slot, Placeholder::index);

        if traits.pointer_policy() == PointerPolicy::Mirrored {
            for (slot, field) in fields.iter().enumerate() {
                if used[slot] && !field.is_temporary() && !field.is_mirrored() {
                    return Err(BuildError::PointerPolicyMismatch {
                        field: field.name().to_owned(),
                        placeholder: placeholder(slot),
                        backend: traits.backend(),
                    });
                }
            }
        }

        let reach = |axis: &Axis, c: (i32, i32), a: (i32, i32)| {
            let lo = (axis.begin as isize + c.0 as isize).max(0) + a.0 as isize;
            let hi = (axis.end as isize + c.1 as isize).min(axis.total as isize) + a.1 as isize;
            (lo, hi)
        };
        let nk = self.grid.k_levels;
        for (view, ext) in views.iter().zip(compute) {
            for e in view.entries().iter().filter(|e| !e.temporary) {
                let dims = fields[e.slot].dims();
                let (ilo, ihi) = reach(&self.grid.i, ext.i, e.extent.i);
                let (jlo, jhi) = reach(&self.grid.j, ext.j, e.extent.j);
                if ilo < 0 || jlo < 0 || ihi > dims[0] as isize || jhi > dims[1] as isize || nk > dims[2] {
                    return Err(BuildError::FieldTooSmall {
                        field: e.name.clone(),
                        placeholder: e.placeholder.index(),
                        stage: view.stage_name().to_owned(),
                        needed: [ihi.max(0) as usize, jhi.max(0) as usize, nk],
                        dims,
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolves cache declarations group by group and routes arguments through them.
    fn resolve_caches(
        &self,
        traits: &dyn BackendTraits,
        views: &mut [LocalDomainView],
        compute: &[Extent],
    ) -> core::result::Result<Vec<CompiledGroup>, BuildError> {
        let caps = traits.capabilities();
        let mut groups = Vec::with_capacity(self.plan.groups().len());
        let mut offset = 0;
        for (g, group) in self.plan.groups().iter().enumerate() {
            let range = offset..offset + group.stages().len();
            offset = range.end;
            let mut specs: Vec<CacheSpec> = Vec::new();
            for decl in group.cache_declarations() {
                let target = decl.target;
                let slot = self.aggregate.slot_of(target).ok_or_else(|| BuildError::UnboundPlaceholder {
                    stage: format!("cache of group {g}"),
                    placeholder: target.index(),
                })?;
                let (feature, supported) = match decl.scope {
                    CacheScope::IJ => ("IJ caches", caps.ij_caches),
                    CacheScope::IJK | CacheScope::K => ("column caches", caps.column_caches),
                };
                if !supported {
                    return Err(BuildError::CapabilityMismatch {
                        backend: traits.backend(),
                        feature,
                        context: format!("group {g}, cache on {target}"),
                    });
                }
                if specs.iter().any(|s| s.slot == slot) {
                    return Err(BuildError::DuplicateCache { group: g, placeholder: target.index() });
                }

                let mut halo: Option<Extent> = None;
                for s in range.clone() {
                    for e in views[s].entries().iter().filter(|e| e.slot == slot) {
                        let covered = match decl.scope {
                            CacheScope::K => compute[s],
                            CacheScope::IJ | CacheScope::IJK => compute[s].compose(e.extent).ij(),
                        };
                        halo = Some(halo.map_or(covered, |h| h.union(covered)));
                    }
                }
                let Some(halo) = halo else {
                    return Err(BuildError::UnusedCache { group: g, placeholder: target.index() });
                };
                let writes = views[range.clone()]
                    .iter()
                    .flat_map(LocalDomainView::entries)
                    .any(|e| e.slot == slot && e.intent == Intent::InOut);
                if writes && !decl.policy.flushes() && !self.aggregate.slots()[slot].is_temporary() {
                    return Err(BuildError::CacheDiscardsWrites { group: g, placeholder: target.index(), policy: decl.policy });
                }
                for view in &mut views[range.clone()] {
                    view.attach_cache(slot, specs.len());
                }
                tracing::debug!(group = g, placeholder = %target, scope = ?decl.scope, policy = ?decl.policy, "cache resolved");
                specs.push(CacheSpec { scope: decl.scope, policy: decl.policy, slot, halo: halo.ij() });
            }
            groups.push(CompiledGroup { direction: group.direction(), stages: range, caches: specs });
        }
        Ok(groups)
    }

    /// Executes every stage group once.
    ///
    /// # Errors
    /// [`StencilError::NotPrepared`], a stale-read error when sync tracking is
    /// on, the first access error of any block, or a device transfer failure.
    pub fn run(&mut self) -> Result<()> {
        let prepared = self.prepared.as_mut().ok_or(StencilError::NotPrepared)?;
        let traits = prepared.traits;
        let span = tracing::info_span!("run", backend = ?traits.backend(), blocks = prepared.blocks.len());
        let _enter = span.enter();
        let start = Instant::now();
        let device = traits.pointer_policy() == PointerPolicy::Mirrored;
        let fields = self.aggregate.slots_mut();

        if self.config.track_sync {
            let side = if device { MemorySide::Device } else { MemorySide::Host };
            for (slot, field) in fields.iter().enumerate() {
                if prepared.slots.used[slot] && field.is_stale(side) {
                    return Err(StencilError::StaleRead { field: field.name().to_owned(), side });
                }
            }
        }

        for s in &mut prepared.scratch {
            s.log.clear();
        }

        let mut staged: Vec<Vec<Vec<Real>>> = Vec::new();
        if device {
            staged = fields
                .iter_mut()
                .enumerate()
                .map(|(slot, field)| -> Result<Vec<Vec<Real>>> {
                    if !prepared.slots.used[slot] || field.is_temporary() {
                        return Ok(Vec::new());
                    }
                    let (_, ring, _) = field.parts_mut();
                    ring.iter_mut()
                        .map(|s| -> Result<Vec<Real>> { Ok(s.stage_device()?.unwrap_or_default()) })
                        .collect()
                })
                .collect::<Result<Vec<_>>>()?;
        }

        let outcome = {
            let slots = bind_memory(fields, device.then_some(staged.as_mut_slice()), &prepared.slots);
            execute(prepared, &self.grid, &self.config, &slots)
        };

        let written = &prepared.slots.written;
        let mut synced = Ok(());
        if device {
            for (slot, (field, data)) in fields.iter_mut().zip(staged).enumerate() {
                let (_, ring, _) = field.parts_mut();
                for (storage, d) in ring.iter_mut().zip(data) {
                    if let Err(e) = storage.commit_device(d, written[slot]) {
                        synced = Err(e);
                    }
                }
            }
        } else {
            for (slot, field) in fields.iter_mut().enumerate() {
                if written[slot] {
                    let (_, ring, _) = field.parts_mut();
                    for storage in ring {
                        storage.mark_written(MemorySide::Host);
                    }
                }
            }
        }

        if self.config.record_writes {
            self.write_log = prepared.scratch.iter_mut().flat_map(|s| s.log.drain(..)).collect();
        }

        let elapsed = start.elapsed();
        self.meter.runs += 1;
        self.meter.total += elapsed;
        self.meter.last = elapsed;
        tracing::debug!(?elapsed, ok = outcome.is_ok(), "run finished");
        outcome?;
        synced
    }

    /// Releases per-block scratch and the worker pool. The fields stay
    /// available; running again requires another `prepare()`.
    pub fn finalize(&mut self) {
        if self.prepared.take().is_some() {
            tracing::debug!(runs = self.meter.runs, "computation finalized");
        }
    }

    /// Whether `prepare()` has succeeded since construction or the last `finalize()`.
    #[must_use]
    pub const fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    /// Human-readable timing summary.
    #[must_use]
    pub fn print_meter(&self) -> String {
        let Meter { prepare, runs, total, last } = self.meter;
        let mut out = format!(
            "{:?} backend: prepare {prepare:?}, {runs} run(s), total {total:?}, last {last:?}",
            self.config.backend
        );
        if runs > 0 {
            let _ = write!(out, ", mean {:?}", total / runs as u32);
        }
        out
    }

    /// Field bound to `p`.
    #[must_use]
    pub fn field(&self, p: Placeholder) -> Option<&Field> {
        self.aggregate.field(p)
    }

    /// Mutable field bound to `p`.
    pub fn field_mut(&mut self, p: Placeholder) -> Option<&mut Field> {
        self.aggregate.field_mut(p)
    }

    /// The bound aggregate.
    #[must_use]
    pub const fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    /// Gives the fields back.
    #[must_use]
    pub fn into_aggregate(self) -> Aggregate {
        self.aggregate
    }

    /// The grid.
    #[must_use]
    pub const fn grid(&self) -> &Grid {
        &self.grid
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Writes of the last run, when the write log is enabled.
    #[must_use]
    pub fn write_log(&self) -> &[WriteRecord] {
        &self.write_log
    }
}

/// Walks stages backwards and widens each stage's compute extent to cover
/// every point where a later stage reads a temporary it writes.
fn compute_extents(views: &[LocalDomainView], slots: usize) -> Vec<Extent> {
    let mut demand: Vec<Option<Extent>> = vec![None; slots];
    let mut compute = vec![Extent::zero(); views.len()];
    for (s, view) in views.iter().enumerate().rev() {
        let ext = view
            .entries()
            .iter()
            .filter(|e| e.temporary && e.intent == Intent::InOut)
            .filter_map(|e| demand[e.slot])
            .fold(Extent::zero(), Extent::union)
            .ij();
        compute[s] = ext;
        for e in view.entries().iter().filter(|e| e.temporary) {
            let need = ext.compose(e.extent).ij();
            demand[e.slot] = Some(demand[e.slot].map_or(need, |d| d.union(need)));
        }
    }
    compute
}

/// Horizontal halo each temporary needs around a block.
fn temporary_halos(stages: &[CompiledStage], slots: usize) -> Vec<Extent> {
    let mut halos = vec![Extent::zero(); slots];
    for stage in stages {
        for e in stage.view.entries().iter().filter(|e| e.temporary) {
            halos[e.slot] = halos[e.slot].union(stage.compute.compose(e.extent).ij());
        }
    }
    halos
}

/// Binds each slot to host memory, or to staged device contents.
fn bind_memory<'a>(fields: &'a mut [Field], staged: Option<&'a mut [Vec<Vec<Real>>]>, plan: &SlotPlan) -> Vec<SlotMemory<'a>> {
    let mut staged = staged.map(|s| s.iter_mut());
    fields
        .iter_mut()
        .enumerate()
        .map(|(slot, field)| {
            let meta = *field.meta();
            let device_data = staged.as_mut().and_then(Iterator::next);
            let (name, ring, current) = field.parts_mut();
            if let Some(temp) = plan.temp_of_slot[slot] {
                return SlotMemory::Temporary { temp, name };
            }
            if !plan.used[slot] {
                return SlotMemory::ReadOnly { meta, name, snapshots: Vec::new() };
            }
            let mut by_storage: Vec<Option<&'a mut [Real]>> = match device_data {
                Some(data) => data.iter_mut().map(|v| Some(v.as_mut_slice())).collect(),
                None => ring.iter_mut().map(|s| Some(s.host_slice_mut())).collect(),
            };
            let depth = by_storage.len();
            let ordered: Vec<&'a mut [Real]> = (0..depth).filter_map(|t| by_storage[(current + t) % depth].take()).collect();
            if plan.readonly_fast_path && !plan.written[slot] {
                let snapshots = ordered.into_iter().map(|s| -> &'a [Real] { s }).collect();
                SlotMemory::ReadOnly { meta, name, snapshots }
            } else {
                SlotMemory::Shared { meta, name, snapshots: ordered.into_iter().map(SharedSlice::new).collect() }
            }
        })
        .collect()
}

/// Runs every group; blocks of a group run concurrently unless disabled.
fn execute(prepared: &mut Prepared, grid: &Grid, config: &ExecConfig, slots: &[SlotMemory<'_>]) -> Result<()> {
    let traits = prepared.traits;
    let stages = prepared.stages.as_slice();
    let blocks = prepared.blocks.as_slice();
    let temp_layouts = prepared.temp_layouts.as_slice();
    let pool = prepared.pool.as_ref();
    let scratch = &mut prepared.scratch;

    for (g, group) in prepared.groups.iter().enumerate() {
        let _span = tracing::debug_span!("group", index = g, direction = ?group.direction()).entered();
        let run_one = |(block, s): (&Block, &mut BlockScratch)| -> Result<()> {
            let temps = s.temps.iter_mut().map(Vec::as_mut_slice).collect();
            let log = config.record_writes.then_some(&mut s.log);
            let mut job = BlockJob {
                group,
                stages,
                grid,
                block,
                mem: BlockMemory::new(slots, temp_layouts, temps, block, config.checked, log),
                caches: BlockCaches::new(&group.caches, block, grid),
                checked: config.checked,
            };
            traits.run_block(&mut job)
        };
        if config.parallel_blocks {
            match pool {
                Some(pool) => pool.install(|| blocks.par_iter().zip(scratch.par_iter_mut()).try_for_each(&run_one)),
                None => blocks.par_iter().zip(scratch.par_iter_mut()).try_for_each(&run_one),
            }?;
        } else {
            blocks.iter().zip(scratch.iter_mut()).try_for_each(&run_one)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::iterate_domain::Eval;
    use crate::stage::{Accessor, Direction, Stage};

    const OUT: Accessor = Accessor::new(0);
    const IN: Accessor = Accessor::new(1);

    fn p(n: usize) -> Placeholder {
        Placeholder::new(n)
    }

    #[test]
    fn compute_extent_grows_for_temporaries_read_at_offsets() {
        // tmp = 2 * in; out = tmp(-1) + tmp(+1)
        let agg = Aggregate::new()
            .with(p(0), Field::new(6, 6, 2, 0.0, "out"))
            .with(p(1), Field::new(6, 6, 2, 1.0, "in"))
            .temporary(p(2), "tmp");
        let produce = Stage::new("produce").inout(p(2), Extent::zero()).input(p(1), Extent::zero());
        let consume = Stage::new("consume").inout(p(0), Extent::zero()).input(p(2), Extent::horizontal(-1, 1, 0, 0));
        let written = [true, false, true];
        let views = [
            LocalDomainView::build(&produce, &agg, &written).unwrap(),
            LocalDomainView::build(&consume, &agg, &written).unwrap(),
        ];
        let compute = compute_extents(&views, 3);
        assert_eq!(compute[1], Extent::zero());
        assert_eq!(compute[0], Extent::horizontal(-1, 1, 0, 0));
    }

    #[test]
    fn run_before_prepare_fails() {
        let agg = Aggregate::new().with(p(0), Field::new(1, 1, 1, 0.0, "a"));
        let plan = ExecutionPlan::new().group(StageGroup::new(Direction::Parallel).stage(Stage::new("noop").inout(p(0), Extent::zero())));
        let mut comp = Computation::new(agg, Grid::new(1, 1, 1).with_split(1, 0), plan, ExecConfig::default().with_backend(Backend::Host));
        assert!(matches!(comp.run(), Err(StencilError::NotPrepared)));
        comp.prepare().unwrap();
        comp.run().unwrap();
        comp.finalize();
        assert!(!comp.is_prepared());
        assert!(matches!(comp.run(), Err(StencilError::NotPrepared)));
    }

    #[test]
    fn halo_temporaries_feed_neighbour_reads() {
        let agg = Aggregate::new()
            .with(p(0), Field::new(6, 5, 2, 0.0, "out"))
            .with(p(1), Field::builder("in", [6, 5, 2]).build().unwrap())
            .temporary(p(2), "tmp");
        let produce = Stage::new("produce")
            .inout(p(2), Extent::zero())
            .input(p(1), Extent::zero())
            .everywhere(|e: &mut Eval<'_>| {
                let v = 2.0 * e.get(Accessor::new(1));
                e.set(Accessor::new(0), v);
            });
        let consume = Stage::new("consume")
            .inout(p(0), Extent::zero())
            .input(p(2), Extent::horizontal(-1, 1, 0, 0))
            .everywhere(|e: &mut Eval<'_>| {
                let v = e.get(IN.at(-1, 0, 0)) + e.get(IN.at(1, 0, 0));
                e.set(OUT, v);
            });
        let plan = ExecutionPlan::new().group(StageGroup::new(Direction::Parallel).stage(produce).stage(consume));
        let grid = Grid::from_axes(Axis::with_halo(1, 1, 6), Axis::new(5), 2);
        let cfg = ExecConfig::default().with_backend(Backend::Host).with_block_size(2, 2).with_checked(true);
        let mut comp = Computation::new(agg, grid, plan, cfg);
        comp.field_mut(p(1)).unwrap().fill_with(|i, j, k| (i + 10 * j + 100 * k) as Real);
        comp.prepare().unwrap();
        comp.run().unwrap();

        let out = comp.field(p(0)).unwrap();
        for i in 1..5 {
            for j in 0..5 {
                for k in 0..2 {
                    let expected = 2.0 * ((i - 1 + 10 * j + 100 * k) + (i + 1 + 10 * j + 100 * k)) as Real;
                    assert_eq!(out.get(i, j, k), expected, "({i}, {j}, {k})");
                }
            }
        }
        assert_eq!(out.get(0, 0, 0), 0.0);
        assert!(comp.print_meter().contains("1 run(s)"));
    }
}
