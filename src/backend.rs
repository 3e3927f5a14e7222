//! Backend selection module.
//!
//! This module defines the available execution backends and provides
//! functions to set and get the process-wide default backend.
//!
//! # Supported Backends
//!
//! - `Host` — nested loops over blocks on CPU worker threads (default).
//! - `Gpu` — grid-of-blocks dispatch with a 2-D grid of execution units per
//!   block, on-chip scratch caches and a separate device memory space.
//!
//! The default is stored globally using an `AtomicU8` and picked up by
//! [`ExecConfig::default`](crate::config::ExecConfig). A computation resolves
//! its backend once, when it is built; changing the default afterwards does
//! not affect it.

use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, Ordering};

/// Enumeration of execution backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Backend {
    /// Multi-core host execution (default).
    #[default]
    Host = 0,
    /// Device execution model with mirrored field memory.
    Gpu = 1,
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Host),
            1 => Ok(Self::Gpu),
            _ => Err(()),
        }
    }
}

/// Static capability set of a backend, checked against a plan in `prepare()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// IJ-plane caches need per-block shared scratch.
    pub ij_caches: bool,
    /// K-column and IJK-volume caches.
    pub column_caches: bool,
    /// A distinct read path for fields no stage writes.
    pub readonly_fast_path: bool,
    /// Fields live in a separate memory space with explicit sync.
    pub mirrored_memory: bool,
}

/// How a backend owns field memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerPolicy {
    /// A single owning host buffer.
    Owned,
    /// A host buffer paired with a device mirror, synced explicitly.
    Mirrored,
}

/// Internal global state for the default backend.
///
/// Relaxed ordering is enough: the value is read once per computation build.
static GLOBAL_DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Host as u8);

/// Sets the default backend used by new configurations.
///
/// # Example
/// ```
/// use stencil_engine::backend::{set_backend, get_backend, Backend};
/// set_backend(Backend::Gpu);
/// assert_eq!(get_backend(), Backend::Gpu);
/// set_backend(Backend::Host);
/// ```
pub fn set_backend(b: Backend) {
    GLOBAL_DEFAULT_BACKEND.store(b as u8, Ordering::Relaxed);
}

/// Returns the current default backend.
///
/// If the stored value is invalid, defaults to [`Backend::Host`].
pub fn get_backend() -> Backend {
    Backend::try_from(GLOBAL_DEFAULT_BACKEND.load(Ordering::Relaxed)).unwrap_or_default()
}
