//! Error types for building and running stencil computations.
//!
//! Two layers exist:
//!
//! - [`BuildError`]: everything `prepare()` rejects before any point is
//!   evaluated (unbound placeholders, capability mismatches, malformed
//!   vertical intervals, unsafe halo access patterns).
//! - [`StencilError`]: the crate-wide error, wrapping build errors and adding
//!   the run-time failures reported by checked execution.

use crate::backend::Backend;
use crate::cache::CachePolicy;
use crate::storage::device::DeviceError;

/// Result type used throughout the crate.
pub type Result<T> = core::result::Result<T, StencilError>;

/// Which memory space a field copy lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySide {
    /// The host (CPU) copy.
    Host,
    /// The device mirror.
    Device,
}

impl core::fmt::Display for MemorySide {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Device => f.write_str("device"),
        }
    }
}

/// Failures detected while validating a computation in `prepare()`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// A stage references a placeholder that has no field or temporary bound to it.
    #[error("stage `{stage}` references unbound placeholder p{placeholder}")]
    UnboundPlaceholder {
        /// Stage name.
        stage: String,
        /// Placeholder index.
        placeholder: usize,
    },

    /// Placeholder indices in the aggregate are not `0..N`.
    #[error("placeholder indices are not dense: p{missing} is missing below p{max}")]
    NonDensePlaceholders {
        /// First missing index.
        missing: usize,
        /// Highest bound index.
        max: usize,
    },

    /// The selected backend cannot provide a requested feature.
    #[error("backend {backend:?} does not support {feature} (requested by {context})")]
    CapabilityMismatch {
        /// Backend the computation was built for.
        backend: Backend,
        /// Missing capability.
        feature: &'static str,
        /// Stage group or placeholder that asked for it.
        context: String,
    },

    /// A field's pointer ownership does not match the backend's policy.
    #[error("field `{field}` (p{placeholder}) has no device mirror, required by backend {backend:?}")]
    PointerPolicyMismatch {
        /// Field name.
        field: String,
        /// Placeholder index.
        placeholder: usize,
        /// Backend the computation was built for.
        backend: Backend,
    },

    /// The vertical split does not fit the k extent.
    #[error("vertical regions first={first} last={last} do not fit {levels} k-levels")]
    MalformedIntervals {
        /// Size of the first region.
        first: usize,
        /// Size of the last region.
        last: usize,
        /// Global k extent.
        levels: usize,
    },

    /// The grid itself is inconsistent (empty range, end beyond total).
    #[error("malformed grid: {0}")]
    MalformedGrid(String),

    /// A bound field is smaller than the region a stage reads.
    #[error("field `{field}` (p{placeholder}) is too small: stage `{stage}` needs {needed:?}, field has {dims:?}")]
    FieldTooSmall {
        /// Field name.
        field: String,
        /// Placeholder index.
        placeholder: usize,
        /// Stage name.
        stage: String,
        /// Exclusive upper bound needed along each axis.
        needed: [usize; 3],
        /// Field dimensions.
        dims: [usize; 3],
    },

    /// A stage computing a halo region would write a non-temporary field there.
    #[error("stage `{stage}` computes on a halo but writes non-temporary p{placeholder}")]
    HaloWrite {
        /// Stage name.
        stage: String,
        /// Placeholder index.
        placeholder: usize,
    },

    /// A field written in a group is read by the same group outside the unit's own column.
    #[error("stage `{stage}` reads p{placeholder} at a horizontal offset while the same group writes it")]
    RacyNeighborRead {
        /// Stage name.
        stage: String,
        /// Placeholder index.
        placeholder: usize,
    },

    /// A cache targets a placeholder the group never accesses.
    #[error("cache on p{placeholder} in group {group} targets a placeholder no stage of the group uses")]
    UnusedCache {
        /// Group index.
        group: usize,
        /// Placeholder index.
        placeholder: usize,
    },

    /// Two caches in one group target the same field.
    #[error("group {group} declares more than one cache for p{placeholder}")]
    DuplicateCache {
        /// Group index.
        group: usize,
        /// Placeholder index.
        placeholder: usize,
    },

    /// A cache that is never written back targets a field the group writes.
    #[error("{policy:?} cache on p{placeholder} in group {group} would discard the group's writes")]
    CacheDiscardsWrites {
        /// Group index.
        group: usize,
        /// Placeholder index.
        placeholder: usize,
        /// Declared policy.
        policy: CachePolicy,
    },

    /// The plan holds no stages.
    #[error("execution plan has no stages")]
    EmptyPlan,

    /// A zero block size was configured.
    #[error("invalid block size {0:?}")]
    InvalidBlockSize((usize, usize)),

    /// The dedicated worker pool could not be created.
    #[error("worker pool: {0}")]
    WorkerPool(String),
}

/// The crate-wide error.
#[derive(Debug, thiserror::Error)]
pub enum StencilError {
    /// The computation failed validation.
    #[error("build error: {0}")]
    Build(#[from] BuildError),

    /// An access resolved outside a field's allocated extent.
    #[error("out of bounds access to `{field}` at {coord:?}")]
    OutOfBounds {
        /// Field name.
        field: String,
        /// Offending coordinate (i, j, k).
        coord: [isize; 3],
    },

    /// A temporary was addressed outside the current block plus its halo.
    #[error("temporary `{field}` accessed at {coord:?}, outside block window {window:?}")]
    TemporaryOutOfWindow {
        /// Field name.
        field: String,
        /// Offending global coordinate.
        coord: [isize; 3],
        /// Window bounds as `[i0, i1, j0, j1]` (exclusive ends).
        window: [isize; 4],
    },

    /// An accessor offset lies outside the extent the stage declared for that argument.
    #[error("stage `{stage}` accessed argument {arg} at offset {offset:?}, outside its declared extent")]
    OffsetOutsideExtent {
        /// Stage name.
        stage: String,
        /// Argument position within the stage.
        arg: usize,
        /// Offending offset.
        offset: [i32; 3],
    },

    /// A kernel wrote through a read-only argument, or named an argument the stage does not have.
    #[error("stage `{stage}` cannot write argument {arg}")]
    IntentViolation {
        /// Stage name.
        stage: String,
        /// Argument position within the stage.
        arg: usize,
    },

    /// A field was read on one side after being written on the other without a sync.
    #[error("stale read of `{field}` on the {side} side; call the matching sync first")]
    StaleRead {
        /// Field name.
        field: String,
        /// The side that was read.
        side: MemorySide,
    },

    /// A snapshot offset exceeds the field's ring depth.
    #[error("snapshot {snapshot} of `{field}` requested, ring depth is {depth}")]
    SnapshotOutOfRange {
        /// Field name.
        field: String,
        /// Requested snapshot.
        snapshot: usize,
        /// Ring depth.
        depth: usize,
    },

    /// Host data handed to a field does not match its extents.
    #[error("snapshot for `{field}` holds {len} values, the field has {size}")]
    SnapshotSize {
        /// Field name.
        field: String,
        /// Number of values supplied.
        len: usize,
        /// Elements per snapshot.
        size: usize,
    },

    /// `run()` was called before a successful `prepare()`.
    #[error("computation has not been prepared")]
    NotPrepared,

    /// Device memory transfer failed.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}
