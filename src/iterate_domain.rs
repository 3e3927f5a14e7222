//! Per-unit resolution of kernel accesses.
//!
//! An [`IterateDomain`] tracks the current point of one execution unit and
//! turns an [`Accessor`] into a value: first through the group's caches, then
//! through the memory bound for the block (read-only view, shared field
//! memory or the block's temporaries). Kernels only see it through [`Eval`].

use crate::Real;
use crate::cache::{Backing, BlockCaches};
use crate::error::{Result, StencilError};
use crate::grid::Block;
use crate::local_domain::{ArgBinding, LocalDomainView};
use crate::stage::{Accessor, Extent, Intent, Region};
use crate::storage::FieldMeta;
use crate::storage::buffer::SharedSlice;

/// Access resolution for one execution unit.
pub trait IterateDomain {
    /// Reads through an accessor relative to the current point.
    fn read(&mut self, acc: Accessor) -> Real;
    /// Writes through an accessor relative to the current point.
    fn write(&mut self, acc: Accessor, value: Real);
    /// Current point `(i, j, k)`.
    fn position(&self) -> [usize; 3];
    /// Moves to an absolute point.
    fn set_position(&mut self, i: usize, j: usize, k: usize);
    /// Moves vertically by `step` levels.
    fn advance_k(&mut self, step: isize);
    /// Coordinates of the unit within its block.
    fn unit(&self) -> (usize, usize);
    /// Cache slot an accessor would hit, if any.
    fn cache_lookup(&self, acc: Accessor) -> Option<usize>;
}

/// What a kernel sees: accessor reads and writes at the current point.
pub struct Eval<'e> {
    domain: &'e mut dyn IterateDomain,
    region: Region,
}

impl<'e> Eval<'e> {
    /// Wraps a domain positioned on a point of `region`.
    pub fn new(domain: &'e mut dyn IterateDomain, region: Region) -> Self {
        Self { domain, region }
    }

    /// Reads an argument.
    pub fn get(&mut self, acc: Accessor) -> Real {
        self.domain.read(acc)
    }

    /// Writes an argument.
    pub fn set(&mut self, acc: Accessor, value: Real) {
        self.domain.write(acc, value);
    }

    /// Current i.
    #[must_use]
    pub fn i(&self) -> usize {
        self.domain.position()[0]
    }

    /// Current j.
    #[must_use]
    pub fn j(&self) -> usize {
        self.domain.position()[1]
    }

    /// Current k.
    #[must_use]
    pub fn k(&self) -> usize {
        self.domain.position()[2]
    }

    /// Vertical region of the current level.
    #[must_use]
    pub const fn region(&self) -> Region {
        self.region
    }

    /// Coordinates of the executing unit within its block.
    #[must_use]
    pub fn unit(&self) -> (usize, usize) {
        self.domain.unit()
    }
}

/// A field element written by a run, and who wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteRecord {
    /// Field slot in the aggregate.
    pub slot: usize,
    /// Snapshot written.
    pub snapshot: usize,
    /// Linear index in storage order.
    pub index: usize,
    /// Writing block.
    pub block: usize,
    /// Writing unit within the block.
    pub unit: (usize, usize),
}

/// Memory bound to one aggregate slot for the duration of a run.
#[derive(Debug)]
pub(crate) enum SlotMemory<'a> {
    /// A field no stage writes, readable from every worker.
    ReadOnly {
        meta: FieldMeta,
        name: &'a str,
        snapshots: Vec<&'a [Real]>,
    },
    /// A field workers write at disjoint points.
    Shared {
        meta: FieldMeta,
        name: &'a str,
        snapshots: Vec<SharedSlice<'a>>,
    },
    /// A block-local temporary.
    Temporary { temp: usize, name: &'a str },
}

/// Shape and halo of one temporary; identical for every block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TempLayout {
    pub meta: FieldMeta,
    pub halo: Extent,
}

/// All memory one block may touch.
#[derive(Debug)]
pub(crate) struct BlockMemory<'a> {
    slots: &'a [SlotMemory<'a>],
    temp_layouts: &'a [TempLayout],
    temps: Vec<&'a mut [Real]>,
    origin: (isize, isize),
    block: usize,
    checked: bool,
    log: Option<&'a mut Vec<WriteRecord>>,
}

/// Unit used for block-level writes such as cache flushes.
const ELECTED: (usize, usize) = (0, 0);

#[allow(unsafe_code)]
impl<'a> BlockMemory<'a> {
    pub(crate) fn new(
        slots: &'a [SlotMemory<'a>],
        temp_layouts: &'a [TempLayout],
        temps: Vec<&'a mut [Real]>,
        block: &Block,
        checked: bool,
        log: Option<&'a mut Vec<WriteRecord>>,
    ) -> Self {
        Self {
            slots,
            temp_layouts,
            temps,
            origin: (block.i.start as isize, block.j.start as isize),
            block: block.id,
            checked,
            log,
        }
    }

    fn temp_local(&self, temp: usize, c: [isize; 3]) -> [isize; 3] {
        let halo = self.temp_layouts[temp].halo;
        [
            c[0] - self.origin.0 - halo.i.0 as isize,
            c[1] - self.origin.1 - halo.j.0 as isize,
            c[2],
        ]
    }

    fn temp_index(&self, temp: usize, name: &str, c: [isize; 3]) -> Result<usize> {
        let meta = &self.temp_layouts[temp].meta;
        let local = self.temp_local(temp, c);
        if meta.contains(local) {
            return Ok(meta.index(local[0] as usize, local[1] as usize, local[2] as usize));
        }
        if self.checked {
            let [wi, wj, _] = meta.dims();
            let (i0, j0) = (c[0] - local[0], c[1] - local[1]);
            return Err(StencilError::TemporaryOutOfWindow {
                field: name.to_owned(),
                coord: c,
                window: [i0, i0 + wi as isize, j0, j0 + wj as isize],
            });
        }
        Ok(meta.index_wrapped(local))
    }

    fn field_index(&self, meta: &FieldMeta, name: &str, c: [isize; 3], len: usize) -> Result<usize> {
        if self.checked && !meta.contains(c) {
            return Err(StencilError::OutOfBounds { field: name.to_owned(), coord: c });
        }
        let idx = meta.signed_index(c);
        if idx < 0 || idx as usize >= len {
            return Err(StencilError::OutOfBounds { field: name.to_owned(), coord: c });
        }
        Ok(idx as usize)
    }

    fn snapshot_check(name: &str, snapshot: usize, depth: usize) -> Result<()> {
        if snapshot < depth {
            Ok(())
        } else {
            Err(StencilError::SnapshotOutOfRange { field: name.to_owned(), snapshot, depth })
        }
    }

    pub(crate) fn read(&self, slot: usize, snapshot: usize, c: [isize; 3]) -> Result<Real> {
        let slots = self.slots;
        match &slots[slot] {
            SlotMemory::ReadOnly { meta, name, snapshots } => {
                Self::snapshot_check(name, snapshot, snapshots.len())?;
                let data = snapshots[snapshot];
                Ok(data[self.field_index(meta, name, c, data.len())?])
            }
            SlotMemory::Shared { meta, name, snapshots } => {
                Self::snapshot_check(name, snapshot, snapshots.len())?;
                let data = snapshots[snapshot];
                let idx = self.field_index(meta, name, c, data.len())?;
                // SAFETY: a point written by a group is only read by its writing unit.
                Ok(unsafe { data.read(idx) })
            }
            SlotMemory::Temporary { temp, name } => {
                Self::snapshot_check(name, snapshot, 1)?;
                Ok(self.temps[*temp][self.temp_index(*temp, name, c)?])
            }
        }
    }

    pub(crate) fn write(&mut self, unit: (usize, usize), slot: usize, snapshot: usize, c: [isize; 3], value: Real) -> Result<()> {
        let slots = self.slots;
        match &slots[slot] {
            SlotMemory::ReadOnly { name, .. } => Err(StencilError::IntentViolation { stage: (*name).to_owned(), arg: slot }),
            SlotMemory::Shared { meta, name, snapshots } => {
                Self::snapshot_check(name, snapshot, snapshots.len())?;
                let data = snapshots[snapshot];
                let index = self.field_index(meta, name, c, data.len())?;
                // SAFETY: blocks partition the compute domain and written fields
                // are only touched at the writing unit's own column.
                unsafe {
                    data.write(index, value);
                }
                if let Some(log) = self.log.as_deref_mut() {
                    log.push(WriteRecord { slot, snapshot, index, block: self.block, unit });
                }
                Ok(())
            }
            SlotMemory::Temporary { temp, name } => {
                Self::snapshot_check(name, snapshot, 1)?;
                let (temp, idx) = (*temp, self.temp_index(*temp, name, c)?);
                self.temps[temp][idx] = value;
                Ok(())
            }
        }
    }
}

impl Backing for BlockMemory<'_> {
    fn contains(&self, slot: usize, coord: [isize; 3]) -> bool {
        match &self.slots[slot] {
            SlotMemory::ReadOnly { meta, .. } | SlotMemory::Shared { meta, .. } => meta.contains(coord),
            SlotMemory::Temporary { temp, .. } => self.temp_layouts[*temp].meta.contains(self.temp_local(*temp, coord)),
        }
    }

    fn load(&self, slot: usize, coord: [isize; 3]) -> Result<Real> {
        self.read(slot, 0, coord)
    }

    fn store(&mut self, slot: usize, coord: [isize; 3], value: Real) -> Result<()> {
        self.write(ELECTED, slot, 0, coord, value)
    }
}

/// Resolution logic shared by both backends.
pub(crate) struct DomainCore<'a, 'm, 's> {
    view: &'a LocalDomainView,
    mem: &'a mut BlockMemory<'m>,
    caches: &'a mut BlockCaches<'s>,
    pos: [isize; 3],
    unit: (usize, usize),
    checked: bool,
    error: Option<StencilError>,
}

impl<'a, 'm, 's> DomainCore<'a, 'm, 's> {
    pub(crate) fn new(view: &'a LocalDomainView, mem: &'a mut BlockMemory<'m>, caches: &'a mut BlockCaches<'s>, checked: bool) -> Self {
        Self { view, mem, caches, pos: [0; 3], unit: (0, 0), checked, error: None }
    }

    fn fail(&mut self, e: StencilError) {
        if self.error.is_none() {
            tracing::debug!(stage = %self.view.stage_name(), error = %e, "access failed");
            self.error = Some(e);
        }
    }

    fn binding(&self, acc: Accessor) -> Result<&'a ArgBinding> {
        let view = self.view;
        view.entry(acc.arg()).ok_or_else(|| StencilError::IntentViolation {
            stage: view.stage_name().to_owned(),
            arg: acc.arg(),
        })
    }

    fn check_offset(&self, binding: &ArgBinding, acc: Accessor) -> Result<()> {
        if binding.extent.contains(acc.offset()) {
            return Ok(());
        }
        debug_assert!(self.checked, "offset {:?} outside declared extent of `{}`", acc.offset(), binding.name);
        if self.checked {
            return Err(StencilError::OffsetOutsideExtent {
                stage: self.view.stage_name().to_owned(),
                arg: acc.arg(),
                offset: acc.offset(),
            });
        }
        Ok(())
    }

    fn coord(&self, acc: Accessor) -> [isize; 3] {
        let o = acc.offset();
        [self.pos[0] + o[0] as isize, self.pos[1] + o[1] as isize, self.pos[2] + o[2] as isize]
    }

    fn try_read(&mut self, acc: Accessor) -> Result<Real> {
        let binding = self.binding(acc)?;
        self.check_offset(binding, acc)?;
        let c = self.coord(acc);
        if acc.snapshot_index() == 0
            && let Some(cache) = binding.cache
            && let Some(hit) = self.caches.read(cache, c, &*self.mem)
        {
            return hit;
        }
        self.mem.read(binding.slot, acc.snapshot_index(), c)
    }

    fn try_write(&mut self, acc: Accessor, value: Real) -> Result<()> {
        let binding = self.binding(acc)?;
        if binding.intent == Intent::In {
            return Err(StencilError::IntentViolation {
                stage: self.view.stage_name().to_owned(),
                arg: acc.arg(),
            });
        }
        let o = acc.offset();
        let own_column = o[0] == 0 && o[1] == 0;
        if (!own_column && !binding.temporary) || !binding.extent.contains(o) {
            return Err(StencilError::OffsetOutsideExtent {
                stage: self.view.stage_name().to_owned(),
                arg: acc.arg(),
                offset: o,
            });
        }
        let c = self.coord(acc);
        if acc.snapshot_index() == 0
            && let Some(cache) = binding.cache
            && self.caches.write(cache, c, value)
        {
            return Ok(());
        }
        self.mem.write(self.unit, binding.slot, acc.snapshot_index(), c, value)
    }

    fn read(&mut self, acc: Accessor) -> Real {
        if self.error.is_some() {
            return 0.0;
        }
        self.try_read(acc).unwrap_or_else(|e| {
            self.fail(e);
            0.0
        })
    }

    fn write(&mut self, acc: Accessor, value: Real) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.try_write(acc, value) {
            self.fail(e);
        }
    }

    fn cache_lookup(&self, acc: Accessor) -> Option<usize> {
        let binding = self.view.entry(acc.arg())?;
        let cache = binding.cache?;
        self.caches.lookup(cache, self.coord(acc)).map(|_| cache)
    }

    pub(crate) fn take_error(&mut self) -> Option<StencilError> {
        self.error.take()
    }
}

/// Host resolution: the whole block is one unit walking every point.
pub(crate) struct HostDomain<'a, 'm, 's>(pub DomainCore<'a, 'm, 's>);

/// Device resolution: one unit per horizontal point of the block.
pub(crate) struct GpuDomain<'a, 'm, 's> {
    pub core: DomainCore<'a, 'm, 's>,
    origin: (usize, usize),
}

impl<'a, 'm, 's> GpuDomain<'a, 'm, 's> {
    /// A domain whose unit `(0, 0)` sits at `origin`.
    pub(crate) fn new(core: DomainCore<'a, 'm, 's>, origin: (usize, usize)) -> Self {
        Self { core, origin }
    }
}

impl IterateDomain for HostDomain<'_, '_, '_> {
    fn read(&mut self, acc: Accessor) -> Real {
        self.0.read(acc)
    }

    fn write(&mut self, acc: Accessor, value: Real) {
        self.0.write(acc, value);
    }

    fn position(&self) -> [usize; 3] {
        self.0.pos.map(|x| x as usize)
    }

    fn set_position(&mut self, i: usize, j: usize, k: usize) {
        self.0.pos = [i as isize, j as isize, k as isize];
    }

    fn advance_k(&mut self, step: isize) {
        self.0.pos[2] += step;
    }

    fn unit(&self) -> (usize, usize) {
        self.0.unit
    }

    fn cache_lookup(&self, acc: Accessor) -> Option<usize> {
        self.0.cache_lookup(acc)
    }
}

impl IterateDomain for GpuDomain<'_, '_, '_> {
    fn read(&mut self, acc: Accessor) -> Real {
        self.core.read(acc)
    }

    fn write(&mut self, acc: Accessor, value: Real) {
        self.core.write(acc, value);
    }

    fn position(&self) -> [usize; 3] {
        self.core.pos.map(|x| x as usize)
    }

    /// Also selects the unit owning column `(i, j)`.
    fn set_position(&mut self, i: usize, j: usize, k: usize) {
        self.core.pos = [i as isize, j as isize, k as isize];
        self.core.unit = (i.saturating_sub(self.origin.0), j.saturating_sub(self.origin.1));
    }

    fn advance_k(&mut self, step: isize) {
        self.core.pos[2] += step;
    }

    fn unit(&self) -> (usize, usize) {
        self.core.unit
    }

    fn cache_lookup(&self, acc: Accessor) -> Option<usize> {
        self.core.cache_lookup(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregate;
    use crate::grid::Grid;
    use crate::stage::{Placeholder, Stage};
    use crate::storage::{Field, Layout};

    const OUT: Accessor = Accessor::new(0);
    const IN: Accessor = Accessor::new(1);

    fn view() -> LocalDomainView {
        let (o, i) = (Placeholder::new(0), Placeholder::new(1));
        let agg = Aggregate::new()
            .with(o, Field::new(3, 3, 2, 0.0, "out"))
            .with(i, Field::new(3, 3, 2, 0.0, "in"));
        let stage = Stage::new("s").inout(o, Extent::zero()).input(i, Extent::new(-1, 1, 0, 0, 0, 1));
        LocalDomainView::build(&stage, &agg, &[true, false]).unwrap()
    }

    #[test]
    fn reads_and_writes_resolve_against_memory() {
        let meta = FieldMeta::new([3, 3, 2], Layout::IJK);
        let mut out = vec![0.0; meta.size()];
        let input: Vec<Real> = (0..meta.size()).map(|v| v as Real).collect();
        let mut log = Vec::new();
        {
            let slots = [
                SlotMemory::Shared { meta, name: "out", snapshots: vec![SharedSlice::new(&mut out)] },
                SlotMemory::ReadOnly { meta, name: "in", snapshots: vec![&input] },
            ];
            let block = Block { id: 3, coords: (0, 0), i: 0..3, j: 0..3 };
            let mut mem = BlockMemory::new(&slots, &[], Vec::new(), &block, true, Some(&mut log));
            let grid = Grid::new(3, 3, 2);
            let mut caches = BlockCaches::new(&[], &block, &grid);
            let view = view();
            let mut dom = HostDomain(DomainCore::new(&view, &mut mem, &mut caches, true));

            dom.set_position(1, 1, 0);
            let west = dom.read(IN.at(-1, 0, 0));
            assert_eq!(west, meta.index(0, 1, 0) as Real);
            dom.advance_k(1);
            assert_eq!(dom.position(), [1, 1, 1]);
            dom.write(OUT, 7.0);
            assert!(dom.0.take_error().is_none());

            dom.write(IN, 1.0);
            assert!(matches!(dom.0.take_error(), Some(StencilError::IntentViolation { arg: 1, .. })));
            dom.read(IN.at(0, 2, 0));
            assert!(matches!(dom.0.take_error(), Some(StencilError::OffsetOutsideExtent { .. })));
            dom.read(IN.at(0, 0, 1));
            assert!(matches!(dom.0.take_error(), Some(StencilError::OutOfBounds { .. })));
            dom.read(IN.snapshot(1));
            assert!(matches!(dom.0.take_error(), Some(StencilError::SnapshotOutOfRange { depth: 1, .. })));
            assert_eq!(dom.cache_lookup(IN), None);
        }
        assert_eq!(log, vec![WriteRecord { slot: 0, snapshot: 0, index: meta.index(1, 1, 1), block: 3, unit: (0, 0) }]);
        assert_eq!(out[meta.index(1, 1, 1)], 7.0);
    }

    #[test]
    fn temporaries_are_addressed_relative_to_the_block() {
        let halo = Extent::horizontal(-1, 1, 0, 0);
        let layouts = [TempLayout { meta: FieldMeta::new([4, 2, 2], Layout::KJI), halo }];
        let mut buffer = vec![0.0; 16];
        let slots = [SlotMemory::Temporary { temp: 0, name: "tmp" }];
        let block = Block { id: 0, coords: (1, 0), i: 2..4, j: 0..2 };
        let mut mem = BlockMemory::new(&slots, &layouts, vec![&mut buffer], &block, true, None);

        mem.write((0, 0), 0, 0, [1, 1, 1], 3.0).unwrap();
        assert_eq!(mem.read(0, 0, [1, 1, 1]).unwrap(), 3.0);
        assert!(mem.read(0, 0, [4, 1, 1]).is_ok());
        match mem.read(0, 0, [5, 0, 0]) {
            Err(StencilError::TemporaryOutOfWindow { window, .. }) => assert_eq!(window, [1, 5, 0, 2]),
            other => panic!("unexpected {other:?}"),
        }

        let mut unchecked = BlockMemory::new(&slots, &layouts, vec![&mut buffer], &block, false, None);
        assert_eq!(unchecked.read(0, 0, [5, 1, 1]).unwrap(), 3.0);
        unchecked.write((0, 0), 0, 0, [0, 0, 0], 1.0).unwrap();
    }

    #[test]
    fn gpu_units_follow_position() {
        let meta = FieldMeta::new([3, 3, 2], Layout::KJI);
        let mut out = vec![0.0; meta.size()];
        let input = vec![0.0; meta.size()];
        let slots = [
            SlotMemory::Shared { meta, name: "out", snapshots: vec![SharedSlice::new(&mut out)] },
            SlotMemory::ReadOnly { meta, name: "in", snapshots: vec![&input] },
        ];
        let block = Block { id: 0, coords: (0, 0), i: 1..3, j: 1..3 };
        let mut mem = BlockMemory::new(&slots, &[], Vec::new(), &block, true, None);
        let grid = Grid::new(3, 3, 2);
        let mut caches = BlockCaches::new(&[], &block, &grid);
        let view = view();
        let mut dom = GpuDomain::new(DomainCore::new(&view, &mut mem, &mut caches, true), (1, 1));
        dom.set_position(2, 1, 0);
        assert_eq!(dom.unit(), (1, 0));
        let mut eval = Eval::new(&mut dom, Region::First);
        eval.set(OUT, 2.0);
        assert_eq!((eval.i(), eval.j(), eval.k(), eval.unit()), (2, 1, 0, (1, 0)));
        assert_eq!(eval.region(), Region::First);
    }
}
