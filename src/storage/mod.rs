//! Strided 3-D field storage.
//!
//! # Layout algebra
//!
//! A [`Layout`] is a layout map: for each logical axis (i, j, k) it names the
//! position of that axis in stride order, `0` being the slowest varying and
//! `2` the fastest. [`FieldMeta`] derives three strides from it:
//!
//! - `strides[0]` is the total element count,
//! - `strides[1]` is the stride of the slowest axis,
//! - `strides[2]` is the stride of the middle axis,
//!
//! and the fastest axis always has stride 1. The linear index of `(i, j, k)` is
//!
//! ```text
//! index = strides[1] * find0(i, j, k) + strides[2] * find1(i, j, k) + find2(i, j, k)
//! ```
//!
//! where `findP` picks the coordinate sitting at stride position `P`. The same
//! formula serves every axis order: `Layout::IJK` keeps k innermost (host
//! locality), `Layout::KJI` keeps i innermost (coalesced device access).
//!
//! Block-local temporaries evaluate the formula modulo their extents
//! ([`FieldMeta::index_wrapped`]).
//!
//! # Snapshots
//!
//! A field may hold a ring of snapshots for time stepping. Snapshot `0` is
//! always the current one; [`Field::push_back`] makes a new snapshot current
//! and shifts every older one back by one step.

pub mod buffer;
pub mod device;

use core::fmt;

use briny::prelude::{Validate, ValidationError};

use crate::Real;
use crate::error::{MemorySide, Result, StencilError};

pub use self::buffer::Storage;

/// Axis permutation of a 3-D field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Layout {
    /// `map[axis]` is the stride position of `axis`.
    map: [usize; 3],
    /// `order[position]` is the axis at stride position `position`.
    order: [usize; 3],
}

impl Layout {
    /// i slowest, k fastest (stride 1 on k).
    pub const IJK: Self = Self { map: [0, 1, 2], order: [0, 1, 2] };

    /// k slowest, i fastest (stride 1 on i).
    pub const KJI: Self = Self { map: [2, 1, 0], order: [2, 1, 0] };

    /// Builds a layout from a layout map.
    ///
    /// # Panics
    /// Panics if `map` is not a permutation of `0..3`.
    #[must_use]
    pub fn new(map: [usize; 3]) -> Self {
        let mut order = [usize::MAX; 3];
        for (axis, &pos) in map.iter().enumerate() {
            assert!(pos < 3, "layout position {pos} out of range");
            assert!(order[pos] == usize::MAX, "layout map {map:?} is not a permutation");
            order[pos] = axis;
        }
        Self { map, order }
    }

    /// The layout map this layout was built from.
    #[must_use]
    pub const fn map(&self) -> [usize; 3] {
        self.map
    }

    /// Stride position of `axis`.
    #[must_use]
    pub const fn position(&self, axis: usize) -> usize {
        self.map[axis]
    }

    /// Axis found at stride position `pos`.
    #[must_use]
    pub const fn axis_at(&self, pos: usize) -> usize {
        self.order[pos]
    }

    /// Picks the coordinate at stride position `pos`.
    #[inline]
    #[must_use]
    pub fn find<T: Copy>(&self, pos: usize, coords: [T; 3]) -> T {
        coords[self.order[pos]]
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::IJK
    }
}

/// Shape, layout and strides of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMeta {
    dims: [usize; 3],
    layout: Layout,
    strides: [usize; 3],
}

impl FieldMeta {
    /// Derives strides for `dims` under `layout`.
    #[must_use]
    pub fn new(dims: [usize; 3], layout: Layout) -> Self {
        let d = |pos: usize| dims[layout.axis_at(pos)];
        let strides = [dims[0] * dims[1] * dims[2], d(1) * d(2), d(2)];
        Self { dims, layout, strides }
    }

    /// Extent along each logical axis.
    #[must_use]
    pub const fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// The axis permutation.
    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    /// `[total, slow stride, middle stride]`.
    #[must_use]
    pub const fn strides(&self) -> [usize; 3] {
        self.strides
    }

    /// Total number of elements.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.strides[0]
    }

    /// Stride of a logical axis.
    #[must_use]
    pub fn stride_of(&self, axis: usize) -> usize {
        match self.layout.position(axis) {
            0 => self.strides[1],
            1 => self.strides[2],
            _ => 1,
        }
    }

    /// Linear index of an in-range coordinate.
    #[inline]
    #[must_use]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(self.contains([i as isize, j as isize, k as isize]), "({i}, {j}, {k}) outside {:?}", self.dims);
        let c = [i, j, k];
        self.strides[1] * self.layout.find(0, c) + self.strides[2] * self.layout.find(1, c) + self.layout.find(2, c)
    }

    /// Signed distance, in elements, of a relative move `(di, dj, dk)`.
    #[inline]
    #[must_use]
    pub fn offset(&self, di: isize, dj: isize, dk: isize) -> isize {
        let c = [di, dj, dk];
        self.strides[1] as isize * self.layout.find(0, c) + self.strides[2] as isize * self.layout.find(1, c) + self.layout.find(2, c)
    }

    /// Signed linear index of a possibly out-of-range coordinate.
    #[inline]
    #[must_use]
    pub fn signed_index(&self, c: [isize; 3]) -> isize {
        self.offset(c[0], c[1], c[2])
    }

    /// Linear index with every coordinate taken modulo the extents.
    #[inline]
    #[must_use]
    pub fn index_wrapped(&self, c: [isize; 3]) -> usize {
        let w = |axis: usize| c[axis].rem_euclid(self.dims[axis].max(1) as isize) as usize;
        self.index(w(0), w(1), w(2))
    }

    /// Whether `c` lies inside the extents.
    #[inline]
    #[must_use]
    pub fn contains(&self, c: [isize; 3]) -> bool {
        c.iter().zip(self.dims).all(|(&x, d)| x >= 0 && (x as usize) < d)
    }
}

/// A dense strided 3-D array of [`Real`] values.
///
/// Fields are created once, before a computation is built, and keep their
/// size for the lifetime of the run. A field flagged temporary holds no
/// memory of its own: the engine allocates it per block.
///
/// # Example
/// ```
/// use stencil_engine::storage::Field;
///
/// let mut f = Field::new(4, 3, 2, 0.0, "phi");
/// f.set(1, 2, 1, 7.5);
/// assert_eq!(f.get(1, 2, 1), 7.5);
/// assert_eq!(f.strides(), [24, 6, 2]);
/// ```
#[derive(Debug)]
pub struct Field {
    name: String,
    meta: FieldMeta,
    temporary: bool,
    ring: Vec<Storage>,
    current: usize,
}

impl Field {
    /// Allocates a host-owned field with k-innermost layout.
    #[must_use]
    pub fn new(d1: usize, d2: usize, d3: usize, init: Real, name: impl Into<String>) -> Self {
        let meta = FieldMeta::new([d1, d2, d3], Layout::IJK);
        Self {
            name: name.into(),
            meta,
            temporary: false,
            ring: vec![Storage::host_only(meta.size(), init)],
            current: 0,
        }
    }

    /// Declares a block-local temporary. Its memory is owned by the engine;
    /// on the host it is a single empty snapshot.
    #[must_use]
    pub fn temporary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            meta: FieldMeta::new([0, 0, 0], Layout::IJK),
            temporary: true,
            ring: vec![Storage::host_only(0, 0.0)],
            current: 0,
        }
    }

    /// Starts a builder for a field with the given extents.
    #[must_use]
    pub fn builder(name: impl Into<String>, dims: [usize; 3]) -> FieldBuilder {
        FieldBuilder {
            name: name.into(),
            dims,
            layout: Layout::IJK,
            init: 0.0,
            ring_depth: 1,
            mirrored: false,
        }
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shape and stride metadata.
    #[must_use]
    pub const fn meta(&self) -> &FieldMeta {
        &self.meta
    }

    /// Extent along (i, j, k).
    #[must_use]
    pub const fn dims(&self) -> [usize; 3] {
        self.meta.dims()
    }

    /// `[total, slow stride, middle stride]`.
    #[must_use]
    pub const fn strides(&self) -> [usize; 3] {
        self.meta.strides()
    }

    /// Number of elements per snapshot.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.meta.size()
    }

    /// Whether this field is block-local.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        self.temporary
    }

    /// Whether the field carries a device mirror.
    #[must_use]
    pub fn is_mirrored(&self) -> bool {
        self.ring.first().is_some_and(Storage::is_mirrored)
    }

    /// Number of snapshots in the ring.
    #[must_use]
    pub fn ring_depth(&self) -> usize {
        self.ring.len()
    }

    /// Signed element offset of a relative move.
    #[must_use]
    pub fn offset(&self, di: isize, dj: isize, dk: isize) -> isize {
        self.meta.offset(di, dj, dk)
    }

    fn slot(&self, snapshot: usize) -> usize {
        (self.current + snapshot) % self.ring.len()
    }

    fn storage(&self) -> &Storage {
        &self.ring[self.current]
    }

    fn storage_mut(&mut self) -> &mut Storage {
        &mut self.ring[self.current]
    }

    /// Reads the current snapshot on the host.
    ///
    /// The range is only checked by a debug assertion; use
    /// [`try_get`](Self::try_get) for a checked read.
    ///
    /// # Panics
    /// Panics if the coordinate lies outside the field. Temporaries hold no
    /// host elements, so every coordinate does.
    #[must_use]
    pub fn get(&self, i: usize, j: usize, k: usize) -> Real {
        let storage = self.storage();
        if storage.is_stale(MemorySide::Host) {
            tracing::warn!(field = %self.name, "host read of a field last written on the device");
        }
        storage.host()[self.meta.index(i, j, k)]
    }

    /// Mutable reference into the current snapshot on the host.
    ///
    /// # Panics
    /// Same conditions as [`get`](Self::get).
    pub fn get_mut(&mut self, i: usize, j: usize, k: usize) -> &mut Real {
        let idx = self.meta.index(i, j, k);
        &mut self.storage_mut().host_mut()[idx]
    }

    /// Writes the current snapshot on the host.
    ///
    /// # Panics
    /// Same conditions as [`get`](Self::get).
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: Real) {
        *self.get_mut(i, j, k) = value;
    }

    /// Checked read: reports out-of-range coordinates and, when sync
    /// tracking is enabled, reads of a stale host copy.
    ///
    /// # Errors
    /// [`StencilError::OutOfBounds`] or [`StencilError::StaleRead`].
    pub fn try_get(&self, i: usize, j: usize, k: usize) -> Result<Real> {
        let c = [i as isize, j as isize, k as isize];
        if self.temporary || !self.meta.contains(c) {
            return Err(StencilError::OutOfBounds { field: self.name.clone(), coord: c });
        }
        let storage = self.storage();
        if storage.is_tracked() && storage.is_stale(MemorySide::Host) {
            return Err(StencilError::StaleRead { field: self.name.clone(), side: MemorySide::Host });
        }
        Ok(storage.host()[self.meta.index(i, j, k)])
    }

    /// Checked write.
    ///
    /// # Errors
    /// [`StencilError::OutOfBounds`] if the coordinate is outside the field.
    pub fn try_set(&mut self, i: usize, j: usize, k: usize, value: Real) -> Result<()> {
        let c = [i as isize, j as isize, k as isize];
        if self.temporary || !self.meta.contains(c) {
            return Err(StencilError::OutOfBounds { field: self.name.clone(), coord: c });
        }
        self.set(i, j, k, value);
        Ok(())
    }

    /// Sets every element of the current snapshot from a function of its coordinate.
    pub fn fill_with(&mut self, mut f: impl FnMut(usize, usize, usize) -> Real) {
        let [d1, d2, d3] = self.dims();
        let meta = self.meta;
        let host = self.storage_mut().host_mut();
        for i in 0..d1 {
            for j in 0..d2 {
                for k in 0..d3 {
                    host[meta.index(i, j, k)] = f(i, j, k);
                }
            }
        }
    }

    /// Host data of snapshot `t` (0 = current), in storage order.
    #[must_use]
    pub fn snapshot(&self, t: usize) -> &[Real] {
        self.ring[self.slot(t)].host()
    }

    /// Pushes a new current snapshot; every older snapshot moves one step
    /// back and the oldest one is returned.
    ///
    /// # Errors
    /// [`StencilError::SnapshotSize`] if `data` does not hold exactly
    /// [`size`](Self::size) elements; device errors if the mirror of the new
    /// snapshot cannot be allocated or uploaded.
    pub fn push_back(&mut self, data: Vec<Real>) -> Result<Vec<Real>> {
        SnapshotData { dims: self.dims(), data: &data }
            .validate()
            .map_err(|_| StencilError::SnapshotSize { field: self.name.clone(), len: data.len(), size: self.size() })?;
        let depth = self.ring.len();
        let oldest = (self.current + depth - 1) % depth;
        let storage = Storage::from_host(data, self.is_mirrored())?;
        let evicted = core::mem::replace(&mut self.ring[oldest], storage);
        self.current = oldest;
        Ok(evicted.into_host())
    }

    /// Rotates the ring by one step without new data: the oldest snapshot
    /// becomes current.
    pub fn advance(&mut self) {
        let depth = self.ring.len();
        self.current = (self.current + depth - 1) % depth;
    }

    /// Copies every snapshot from the host to the device mirror.
    /// No-op for fields without a mirror.
    ///
    /// # Errors
    /// Propagates device transfer failures.
    pub fn h2d_update(&mut self) -> Result<()> {
        tracing::debug!(field = %self.name, "h2d update");
        for s in &mut self.ring {
            s.h2d()?;
        }
        Ok(())
    }

    /// Copies every snapshot from the device mirror back to the host.
    /// No-op for fields without a mirror.
    ///
    /// # Errors
    /// Propagates device transfer failures.
    pub fn d2h_update(&mut self) -> Result<()> {
        tracing::debug!(field = %self.name, "d2h update");
        for s in &mut self.ring {
            s.d2h()?;
        }
        Ok(())
    }

    /// Enables or disables last-writer tracking on every snapshot.
    pub fn track_sync(&mut self, on: bool) {
        for s in &mut self.ring {
            s.set_tracked(on);
        }
    }

    /// Whether the given side of the current snapshot is stale.
    #[must_use]
    pub fn is_stale(&self, side: MemorySide) -> bool {
        !self.temporary && self.ring.iter().any(|s| s.is_stale(side))
    }

    /// A short `d1xd2xd3` description.
    #[must_use]
    pub fn info(&self) -> String {
        let [d1, d2, d3] = self.dims();
        format!("{}: {d1}x{d2}x{d3}", self.name)
    }

    /// Name, snapshot storages in ring order and the current ring position.
    pub(crate) fn parts_mut(&mut self) -> (&str, &mut [Storage], usize) {
        (&self.name, &mut self.ring, self.current)
    }
}

impl fmt::Display for Field {
    /// Prints a sampled slice of at most 12 values per axis.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SAMPLES: usize = 12;
        writeln!(f, "{} ({:?}, strides {:?})", self.name, self.dims(), self.strides())?;
        if self.temporary {
            return writeln!(f, "<temporary>");
        }
        let [d1, d2, d3] = self.dims();
        let step = |d: usize| (d / SAMPLES).max(1);
        let host = self.storage().host();
        for i in (0..d1).step_by(step(d1)) {
            for j in (0..d2).step_by(step(d2)) {
                for k in (0..d3).step_by(step(d3)) {
                    write!(f, "[{}] ", host[self.meta.index(i, j, k)])?;
                }
                writeln!(f)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Host values offered as a new snapshot of a field with extents `dims`.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotData<'a> {
    /// Extent along (i, j, k).
    pub dims: [usize; 3],
    /// Values in storage order.
    pub data: &'a [Real],
}

impl Validate for SnapshotData<'_> {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        if self.data.len() != self.dims.iter().product::<usize>() {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// Builder for fields with a non-default layout, ring depth or device mirror.
#[derive(Debug, Clone)]
pub struct FieldBuilder {
    name: String,
    dims: [usize; 3],
    layout: Layout,
    init: Real,
    ring_depth: usize,
    mirrored: bool,
}

impl FieldBuilder {
    /// Sets the axis layout.
    #[must_use]
    pub const fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Sets the initial value of every element.
    #[must_use]
    pub const fn init(mut self, value: Real) -> Self {
        self.init = value;
        self
    }

    /// Number of snapshots kept for time stepping (at least 1).
    #[must_use]
    pub const fn ring_depth(mut self, depth: usize) -> Self {
        self.ring_depth = if depth == 0 { 1 } else { depth };
        self
    }

    /// Pairs every snapshot with a device mirror.
    #[must_use]
    pub const fn mirrored(mut self, on: bool) -> Self {
        self.mirrored = on;
        self
    }

    /// Uses the pointer policy of `backend`.
    #[must_use]
    pub fn for_backend(self, backend: crate::backend::Backend) -> Self {
        let policy = crate::exec::traits_for(backend).pointer_policy();
        self.mirrored(policy == crate::backend::PointerPolicy::Mirrored)
    }

    /// Allocates the field. Mirrors start synced with the host.
    ///
    /// # Errors
    /// Fails if a device mirror cannot be allocated.
    pub fn build(self) -> Result<Field> {
        let meta = FieldMeta::new(self.dims, self.layout);
        let ring = (0..self.ring_depth)
            .map(|_| Storage::from_host(vec![self.init; meta.size()], self.mirrored))
            .collect::<Result<Vec<_>>>()?;
        Ok(Field {
            name: self.name,
            meta,
            temporary: false,
            ring,
            current: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    const ALL_LAYOUTS: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

    #[test]
    fn strides_follow_layout() {
        let meta = FieldMeta::new([4, 5, 6], Layout::IJK);
        assert_eq!(meta.strides(), [120, 30, 6]);
        assert_eq!(meta.stride_of(2), 1);

        let meta = FieldMeta::new([4, 5, 6], Layout::KJI);
        assert_eq!(meta.strides(), [120, 20, 4]);
        assert_eq!(meta.stride_of(0), 1);
        assert_eq!(meta.stride_of(2), 20);
    }

    #[test]
    fn index_is_injective_for_every_layout() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let dims = [rng.random_range(1..7), rng.random_range(1..7), rng.random_range(1..7)];
            for map in ALL_LAYOUTS {
                let meta = FieldMeta::new(dims, Layout::new(map));
                assert_eq!(meta.strides()[0], dims[0] * dims[1] * dims[2]);
                let fastest = Layout::new(map).axis_at(2);
                assert_eq!(meta.stride_of(fastest), 1);

                let mut seen = HashSet::new();
                for i in 0..dims[0] {
                    for j in 0..dims[1] {
                        for k in 0..dims[2] {
                            let idx = meta.index(i, j, k);
                            assert!(idx < meta.size());
                            assert!(seen.insert(idx), "duplicate index for {map:?} at ({i},{j},{k})");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn offset_matches_index_difference() {
        let meta = FieldMeta::new([5, 4, 3], Layout::new([1, 2, 0]));
        let base = meta.index(2, 2, 1) as isize;
        assert_eq!(base + meta.offset(1, -1, 1), meta.index(3, 1, 2) as isize);
        assert_eq!(base + meta.offset(-2, 0, -1), meta.index(0, 2, 0) as isize);
    }

    #[test]
    fn wrapped_index_wraps_around_extents() {
        let meta = FieldMeta::new([3, 2, 4], Layout::KJI);
        assert_eq!(meta.index_wrapped([-1, 0, 0]), meta.index(2, 0, 0));
        assert_eq!(meta.index_wrapped([3, 3, 5]), meta.index(0, 1, 1));
    }

    #[test]
    #[should_panic(expected = "not a permutation")]
    fn layout_rejects_non_permutation() {
        let _ = Layout::new([0, 0, 1]);
    }

    #[test]
    fn write_then_read_for_every_layout() {
        for map in ALL_LAYOUTS {
            let mut f = Field::builder("f", [3, 4, 5]).layout(Layout::new(map)).build().unwrap();
            f.fill_with(|i, j, k| (i * 100 + j * 10 + k) as Real);
            for i in 0..3 {
                for j in 0..4 {
                    for k in 0..5 {
                        assert_eq!(f.get(i, j, k), (i * 100 + j * 10 + k) as Real);
                    }
                }
            }
        }
    }

    #[test]
    fn checked_access_reports_field_and_coordinate() {
        let mut f = Field::new(2, 2, 2, 1.0, "rho");
        match f.try_get(2, 0, 0) {
            Err(StencilError::OutOfBounds { field, coord }) => {
                assert_eq!(field, "rho");
                assert_eq!(coord, [2, 0, 0]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(f.try_set(0, 0, 2, 3.0).is_err());
        assert!(f.try_set(1, 1, 1, 3.0).is_ok());
        assert_eq!(f.try_get(1, 1, 1).unwrap(), 3.0);
    }

    #[test]
    fn push_back_keeps_zero_as_current() {
        let mut f = Field::builder("u", [1, 1, 1]).ring_depth(3).init(0.0).build().unwrap();
        f.push_back(vec![1.0]).unwrap();
        f.push_back(vec![2.0]).unwrap();
        assert_eq!(f.get(0, 0, 0), 2.0);
        assert_eq!(f.snapshot(1), &[1.0]);
        assert_eq!(f.snapshot(2), &[0.0]);

        let evicted = f.push_back(vec![3.0]).unwrap();
        assert_eq!(evicted, vec![0.0]);
        assert_eq!(f.snapshot(0), &[3.0]);
        assert_eq!(f.snapshot(2), &[1.0]);

        f.advance();
        assert_eq!(f.snapshot(0), &[1.0]);
        assert_eq!(f.snapshot(1), &[3.0]);
    }

    #[test]
    fn sync_tracking_flags_stale_host_reads() {
        let mut f = Field::builder("q", [2, 2, 2]).mirrored(true).build().unwrap();
        f.track_sync(true);
        f.set(0, 0, 0, 4.0);
        assert!(f.is_stale(MemorySide::Device));
        f.h2d_update().unwrap();
        assert!(!f.is_stale(MemorySide::Device));

        let (_, ring, current) = f.parts_mut();
        ring[current].mark_written(MemorySide::Device);
        assert!(matches!(f.try_get(0, 0, 0), Err(StencilError::StaleRead { side: MemorySide::Host, .. })));
        f.d2h_update().unwrap();
        assert_eq!(f.try_get(0, 0, 0).unwrap(), 4.0);
    }

    #[test]
    fn display_and_info() {
        let f = Field::new(2, 1, 1, 0.5, "t");
        assert_eq!(f.info(), "t: 2x1x1");
        assert!(f.to_string().contains("[0.5]"));
    }

    #[test]
    fn temporaries_have_one_empty_snapshot() {
        let mut t = Field::temporary("t");
        assert_eq!(t.ring_depth(), 1);
        assert!(t.snapshot(0).is_empty());
        assert!(t.snapshot(3).is_empty());
        t.advance();
        assert!(t.push_back(Vec::new()).unwrap().is_empty());
        assert!(t.try_get(0, 0, 0).is_err());
        assert!(t.to_string().contains("<temporary>"));
        t.track_sync(true);
        assert!(!t.is_stale(MemorySide::Host));
    }

    #[test]
    fn push_back_rejects_wrong_sizes() {
        let mut f = Field::builder("u", [2, 2, 1]).ring_depth(2).build().unwrap();
        match f.push_back(vec![1.0; 3]) {
            Err(StencilError::SnapshotSize { field, len, size }) => {
                assert_eq!(field, "u");
                assert_eq!((len, size), (3, 4));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(f.snapshot(0), &[0.0; 4]);
        assert!(SnapshotData { dims: [2, 2, 1], data: &[1.0; 4] }.validate().is_ok());
    }
}
