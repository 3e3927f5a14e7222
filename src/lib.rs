//! # `stencil_engine`
//!
//! A backend-polymorphic execution engine for stencil computations on
//! structured 3-D grids.
//!
//! A user supplies fields, a sequence of stages (pointwise kernels with
//! declared read/write extents, specialised per vertical region), and a
//! vertical direction per stage group. The engine binds fields to stage
//! arguments, tiles the horizontal plane into blocks, and walks the vertical
//! axis forward, backward or in parallel, on either of two backends.
//!
//! ## Features
//!
//! - **Storage**: strided fields with arbitrary axis order, block-local
//!   temporaries with wrap-around addressing, snapshot rings for time stepping
//! - **Backends**: a host backend (nested loops over blocks on rayon workers)
//!   and a GPU backend (a 2-D grid of execution units per block, IJ-plane
//!   scratch caches, mirrored device memory)
//! - **Caches**: IJ, IJK and K caches with fill/flush policies, semantically
//!   transparent to kernels
//! - **Vertical solvers**: forward and backward sweeps with per-region kernels
//!   (e.g. the Thomas algorithm for tridiagonal systems)
//! - **Device memory**: optional `wgpu` mirrors (`wgpu` feature)
//!
//! ## Example
//!
//! ```
//! use stencil_engine::prelude::*;
//!
//! const OUT: Accessor = Accessor::new(0);
//! const IN: Accessor = Accessor::new(1);
//!
//! let (p_out, p_in) = (Placeholder::new(0), Placeholder::new(1));
//! let copy = Stage::new("copy")
//!     .inout(p_out, Extent::zero())
//!     .input(p_in, Extent::zero())
//!     .everywhere(|e: &mut Eval<'_>| {
//!         let v = e.get(IN);
//!         e.set(OUT, 2.0 * v);
//!     });
//!
//! let aggregate = Aggregate::new()
//!     .with(p_out, Field::new(4, 4, 3, 0.0, "out"))
//!     .with(p_in, Field::new(4, 4, 3, 1.5, "in"));
//! let plan = ExecutionPlan::new().group(StageGroup::new(Direction::Parallel).stage(copy));
//!
//! let mut comp = Computation::new(aggregate, Grid::new(4, 4, 3), plan, ExecConfig::default());
//! comp.prepare()?;
//! comp.run()?;
//! assert_eq!(comp.field(p_out).map(|f| f.get(3, 3, 2)), Some(3.0));
//! # Ok::<(), stencil_engine::error::StencilError>(())
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::type_complexity,
    clippy::many_single_char_names,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::similar_names,
    clippy::cast_precision_loss,
    clippy::module_name_repetitions
)]
#![deny(unsafe_code)]
#![forbid(unused_must_use)]
#![warn(missing_docs)]

pub mod aggregate;
pub mod backend;
pub mod cache;
pub mod computation;
pub mod config;
pub mod error;
pub mod exec;
pub mod grid;
pub mod iterate_domain;
pub mod local_domain;
pub mod stage;
pub mod storage;
pub mod verify;

/// Floating-point type of every field element.
pub type Real = f64;

/// Commonly used items.
pub mod prelude {
    pub use crate::Real;
    pub use crate::aggregate::Aggregate;
    pub use crate::backend::Backend;
    pub use crate::cache::{CacheDeclaration, CachePolicy, CacheScope, cache_all};
    pub use crate::computation::Computation;
    pub use crate::config::ExecConfig;
    pub use crate::error::{BuildError, MemorySide, StencilError};
    pub use crate::grid::{Axis, Grid, VerticalSplit};
    pub use crate::iterate_domain::Eval;
    pub use crate::stage::{Accessor, Direction, ExecutionPlan, Extent, Intent, Placeholder, Region, Stage, StageGroup};
    pub use crate::storage::{Field, Layout};
    pub use crate::verify::Verifier;
}
