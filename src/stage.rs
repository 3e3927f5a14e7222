//! Stages, stage groups and the execution plan.
//!
//! A [`Stage`] is a pointwise kernel over a fixed list of arguments. Each
//! argument names a [`Placeholder`], an [`Intent`] and the [`Extent`] of
//! offsets the kernel may read it at. Kernels are registered per vertical
//! [`Region`]; a region without a kernel is skipped.
//!
//! Stages are grouped into [`StageGroup`]s sharing a vertical [`Direction`];
//! groups run strictly one after the other.

use core::fmt;
use std::sync::Arc;

use crate::cache::CacheDeclaration;
use crate::iterate_domain::Eval;

/// Names a stage argument independently of the field bound to it.
///
/// Indices in an aggregate must be dense (`0..N`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Placeholder(usize);

impl Placeholder {
    /// Placeholder number `index`.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The placeholder index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Whether a stage may write an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Read only.
    In,
    /// Read and written.
    InOut,
}

/// Inclusive offset range along each axis, as `(minus, plus)` with
/// `minus <= 0 <= plus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent {
    /// Offsets along i.
    pub i: (i32, i32),
    /// Offsets along j.
    pub j: (i32, i32),
    /// Offsets along k.
    pub k: (i32, i32),
}

impl Extent {
    /// Only the unit's own point.
    #[must_use]
    pub const fn zero() -> Self {
        Self { i: (0, 0), j: (0, 0), k: (0, 0) }
    }

    /// A full extent. Bounds are clamped so that zero is always included.
    #[must_use]
    pub fn new(i_minus: i32, i_plus: i32, j_minus: i32, j_plus: i32, k_minus: i32, k_plus: i32) -> Self {
        Self {
            i: (i_minus.min(0), i_plus.max(0)),
            j: (j_minus.min(0), j_plus.max(0)),
            k: (k_minus.min(0), k_plus.max(0)),
        }
    }

    /// A horizontal-only extent.
    #[must_use]
    pub fn horizontal(i_minus: i32, i_plus: i32, j_minus: i32, j_plus: i32) -> Self {
        Self::new(i_minus, i_plus, j_minus, j_plus, 0, 0)
    }

    /// A vertical-only extent.
    #[must_use]
    pub fn vertical(k_minus: i32, k_plus: i32) -> Self {
        Self::new(0, 0, 0, 0, k_minus, k_plus)
    }

    /// Whether `offset` is allowed.
    #[must_use]
    pub const fn contains(&self, offset: [i32; 3]) -> bool {
        const fn within(r: (i32, i32), x: i32) -> bool {
            r.0 <= x && x <= r.1
        }
        within(self.i, offset[0]) && within(self.j, offset[1]) && within(self.k, offset[2])
    }

    /// Smallest extent covering both.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        let u = |a: (i32, i32), b: (i32, i32)| (a.0.min(b.0), a.1.max(b.1));
        Self { i: u(self.i, other.i), j: u(self.j, other.j), k: u(self.k, other.k) }
    }

    /// Offsets reachable by applying `other` after `self`.
    #[must_use]
    pub const fn compose(self, other: Self) -> Self {
        const fn s(a: (i32, i32), b: (i32, i32)) -> (i32, i32) {
            (a.0 + b.0, a.1 + b.1)
        }
        Self { i: s(self.i, other.i), j: s(self.j, other.j), k: s(self.k, other.k) }
    }

    /// The same extent without its vertical part.
    #[must_use]
    pub const fn ij(self) -> Self {
        Self { i: self.i, j: self.j, k: (0, 0) }
    }

    /// Whether no horizontal offset other than zero is allowed.
    #[must_use]
    pub const fn is_zero_ij(&self) -> bool {
        self.i.0 == 0 && self.i.1 == 0 && self.j.0 == 0 && self.j.1 == 0
    }
}

/// Reference to a stage argument inside a kernel, with an optional offset
/// and snapshot.
///
/// ```
/// use stencil_engine::stage::Accessor;
///
/// const U: Accessor = Accessor::new(2);
/// let west = U.at(-1, 0, 0);
/// assert_eq!(west.offset(), [-1, 0, 0]);
/// assert_eq!(west.arg(), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Accessor {
    arg: usize,
    offset: [i32; 3],
    snapshot: usize,
}

impl Accessor {
    /// Argument `arg` of the stage, at the unit's own point.
    #[must_use]
    pub const fn new(arg: usize) -> Self {
        Self { arg, offset: [0, 0, 0], snapshot: 0 }
    }

    /// The same argument at a relative offset.
    #[must_use]
    pub const fn at(self, di: i32, dj: i32, dk: i32) -> Self {
        Self { offset: [di, dj, dk], ..self }
    }

    /// The same argument `t` snapshots back.
    #[must_use]
    pub const fn snapshot(self, t: usize) -> Self {
        Self { snapshot: t, ..self }
    }

    /// Argument position.
    #[must_use]
    pub const fn arg(&self) -> usize {
        self.arg
    }

    /// Relative offset.
    #[must_use]
    pub const fn offset(&self) -> [i32; 3] {
        self.offset
    }

    /// Snapshot number.
    #[must_use]
    pub const fn snapshot_index(&self) -> usize {
        self.snapshot
    }
}

/// A vertical region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// The bottom levels.
    First,
    /// Everything between first and last.
    Interior,
    /// The top levels.
    Last,
}

impl Region {
    /// All regions, bottom to top.
    pub const ALL: [Self; 3] = [Self::First, Self::Interior, Self::Last];

    pub(crate) const fn slot(self) -> usize {
        match self {
            Self::First => 0,
            Self::Interior => 1,
            Self::Last => 2,
        }
    }
}

/// A kernel body.
pub type Kernel = Arc<dyn Fn(&mut Eval<'_>) + Send + Sync>;

/// One declared stage argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageArg {
    /// Bound placeholder.
    pub placeholder: Placeholder,
    /// Read or read-write.
    pub intent: Intent,
    /// Allowed read offsets.
    pub extent: Extent,
}

/// A pointwise kernel with declared arguments and per-region bodies.
#[derive(Clone)]
pub struct Stage {
    name: String,
    args: Vec<StageArg>,
    kernels: [Option<Kernel>; 3],
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regions: Vec<Region> = Region::ALL.into_iter().filter(|r| self.kernels[r.slot()].is_some()).collect();
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("regions", &regions)
            .finish()
    }
}

impl Stage {
    /// An empty stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), args: Vec::new(), kernels: [None, None, None] }
    }

    /// Appends an argument; its position is the accessor index.
    #[must_use]
    pub fn arg(mut self, placeholder: Placeholder, intent: Intent, extent: Extent) -> Self {
        self.args.push(StageArg { placeholder, intent, extent });
        self
    }

    /// Appends a read-only argument.
    #[must_use]
    pub fn input(self, placeholder: Placeholder, extent: Extent) -> Self {
        self.arg(placeholder, Intent::In, extent)
    }

    /// Appends a read-write argument.
    #[must_use]
    pub fn inout(self, placeholder: Placeholder, extent: Extent) -> Self {
        self.arg(placeholder, Intent::InOut, extent)
    }

    /// Registers the kernel run on `region`.
    #[must_use]
    pub fn on(mut self, region: Region, f: impl Fn(&mut Eval<'_>) + Send + Sync + 'static) -> Self {
        self.kernels[region.slot()] = Some(Arc::new(f));
        self
    }

    /// Registers one kernel for several regions.
    #[must_use]
    pub fn on_regions(mut self, regions: &[Region], f: impl Fn(&mut Eval<'_>) + Send + Sync + 'static) -> Self {
        let kernel: Kernel = Arc::new(f);
        for r in regions {
            self.kernels[r.slot()] = Some(Arc::clone(&kernel));
        }
        self
    }

    /// Registers one kernel for every region.
    #[must_use]
    pub fn everywhere(self, f: impl Fn(&mut Eval<'_>) + Send + Sync + 'static) -> Self {
        self.on_regions(&Region::ALL, f)
    }

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared arguments in accessor order.
    #[must_use]
    pub fn args(&self) -> &[StageArg] {
        &self.args
    }

    /// The kernel for `region`, if any.
    #[must_use]
    pub fn kernel(&self, region: Region) -> Option<&Kernel> {
        self.kernels[region.slot()].as_ref()
    }
}

/// Order in which vertical levels are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Increasing k; every stage runs at level k before any runs at k + 1.
    Forward,
    /// Decreasing k; every stage runs at level k before any runs at k - 1.
    Backward,
    /// No vertical dependency between levels; they are visited bottom to top,
    /// running every stage at one level before the next, with no ordering promised.
    Parallel,
}

impl Direction {
    /// Levels `0..nk` in visiting order.
    #[must_use]
    pub fn levels(self, nk: usize) -> Levels {
        Levels { next: 0, end: nk, reverse: self == Self::Backward }
    }
}

/// Iterator over vertical levels in a direction's order.
#[derive(Debug, Clone)]
pub struct Levels {
    next: usize,
    end: usize,
    reverse: bool,
}

impl Iterator for Levels {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.next >= self.end {
            return None;
        }
        if self.reverse {
            self.end -= 1;
            Some(self.end)
        } else {
            self.next += 1;
            Some(self.next - 1)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.end - self.next;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Levels {}

/// Stages sharing a vertical direction and a cache set.
#[derive(Debug, Clone)]
pub struct StageGroup {
    direction: Direction,
    stages: Vec<Stage>,
    caches: Vec<CacheDeclaration>,
}

impl StageGroup {
    /// An empty group.
    #[must_use]
    pub const fn new(direction: Direction) -> Self {
        Self { direction, stages: Vec::new(), caches: Vec::new() }
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Declares a cache.
    #[must_use]
    pub fn cache(mut self, decl: CacheDeclaration) -> Self {
        self.caches.push(decl);
        self
    }

    /// Declares several caches.
    #[must_use]
    pub fn caches(mut self, decls: impl IntoIterator<Item = CacheDeclaration>) -> Self {
        self.caches.extend(decls);
        self
    }

    /// Vertical direction.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Declared caches.
    #[must_use]
    pub fn cache_declarations(&self) -> &[CacheDeclaration] {
        &self.caches
    }
}

/// Ordered stage groups.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    groups: Vec<StageGroup>,
}

impl ExecutionPlan {
    /// An empty plan.
    #[must_use]
    pub const fn new() -> Self {
        Self { groups: Vec::new() }
    }

    /// Appends a group.
    #[must_use]
    pub fn group(mut self, group: StageGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Groups in execution order.
    #[must_use]
    pub fn groups(&self) -> &[StageGroup] {
        &self.groups
    }

    /// Total number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.groups.iter().map(|g| g.stages.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_follow_direction() {
        assert_eq!(Direction::Forward.levels(3).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(Direction::Parallel.levels(2).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(Direction::Backward.levels(3).collect::<Vec<_>>(), vec![2, 1, 0]);
        assert_eq!(Direction::Backward.levels(0).count(), 0);
        assert_eq!(Direction::Backward.levels(4).len(), 4);
    }

    #[test]
    fn extent_algebra() {
        let a = Extent::horizontal(-1, 0, 0, 2);
        let b = Extent::new(0, 1, -1, 0, -1, 0);
        assert_eq!(a.union(b), Extent::new(-1, 1, -1, 2, -1, 0));
        assert_eq!(a.compose(b), Extent::new(-1, 1, -1, 2, -1, 0));
        assert!(b.contains([0, -1, -1]));
        assert!(!b.contains([0, 0, 1]));
        assert!(Extent::vertical(-1, 1).is_zero_ij());
        assert_eq!(Extent::new(2, -1, 0, 0, 0, 0), Extent::zero());
    }

    #[test]
    fn regions_without_kernel_are_empty() {
        let s = Stage::new("s")
            .on(Region::First, |_e: &mut Eval<'_>| {})
            .on_regions(&[Region::Last], |_e: &mut Eval<'_>| {});
        assert!(s.kernel(Region::First).is_some());
        assert!(s.kernel(Region::Interior).is_none());
        assert!(s.kernel(Region::Last).is_some());
        assert!(format!("{s:?}").contains("First"));
    }
}
