//! Owning host/device buffer pairs and the shared view handed to workers.

use core::marker::PhantomData;

use super::device::DeviceBuffer;
use crate::Real;
use crate::error::{MemorySide, Result};

/// One snapshot of a field: a host buffer and an optional device mirror.
///
/// The pair remembers which side was written last so that reads of a stale
/// copy can be rejected when tracking is enabled.
#[derive(Debug)]
pub struct Storage {
    host: Vec<Real>,
    device: Option<DeviceBuffer>,
    host_fresh: bool,
    device_fresh: bool,
    tracked: bool,
}

impl Storage {
    /// Host-only storage filled with `init`.
    #[must_use]
    pub fn host_only(len: usize, init: Real) -> Self {
        Self {
            host: vec![init; len],
            device: None,
            host_fresh: true,
            device_fresh: true,
            tracked: false,
        }
    }

    /// Wraps existing host data, optionally allocating and uploading a mirror.
    ///
    /// # Errors
    /// Fails if the mirror cannot be allocated or written.
    pub fn from_host(host: Vec<Real>, mirrored: bool) -> Result<Self> {
        let device = if mirrored {
            let mut buf = DeviceBuffer::new(host.len())?;
            buf.upload(&host)?;
            Some(buf)
        } else {
            None
        };
        Ok(Self {
            host,
            device,
            host_fresh: true,
            device_fresh: true,
            tracked: false,
        })
    }

    /// Whether a device mirror exists.
    #[must_use]
    pub const fn is_mirrored(&self) -> bool {
        self.device.is_some()
    }

    /// Host data.
    #[must_use]
    pub fn host(&self) -> &[Real] {
        &self.host
    }

    /// Mutable host data; the device mirror becomes stale.
    pub fn host_mut(&mut self) -> &mut [Real] {
        self.mark_written(MemorySide::Host);
        &mut self.host
    }

    /// Mutable host data without touching the sync state.
    pub(crate) fn host_slice_mut(&mut self) -> &mut [Real] {
        &mut self.host
    }

    pub(crate) fn into_host(self) -> Vec<Real> {
        self.host
    }

    /// Records that `side` now holds the only up-to-date copy.
    pub fn mark_written(&mut self, side: MemorySide) {
        if self.device.is_none() {
            return;
        }
        match side {
            MemorySide::Host => self.device_fresh = false,
            MemorySide::Device => self.host_fresh = false,
        }
    }

    /// Whether `side` misses a write made on the other side.
    #[must_use]
    pub const fn is_stale(&self, side: MemorySide) -> bool {
        match side {
            MemorySide::Host => !self.host_fresh,
            MemorySide::Device => !self.device_fresh,
        }
    }

    /// Whether stale reads are rejected.
    #[must_use]
    pub const fn is_tracked(&self) -> bool {
        self.tracked
    }

    pub(crate) fn set_tracked(&mut self, on: bool) {
        self.tracked = on;
    }

    /// Host to device copy.
    ///
    /// # Errors
    /// Propagates device failures.
    pub fn h2d(&mut self) -> Result<()> {
        if let Some(dev) = &mut self.device {
            dev.upload(&self.host)?;
            self.host_fresh = true;
            self.device_fresh = true;
        }
        Ok(())
    }

    /// Device to host copy.
    ///
    /// # Errors
    /// Propagates device failures.
    pub fn d2h(&mut self) -> Result<()> {
        if let Some(dev) = &self.device {
            dev.download(&mut self.host)?;
            self.host_fresh = true;
            self.device_fresh = true;
        }
        Ok(())
    }

    /// Moves the device contents out for a device-side run.
    pub(crate) fn stage_device(&mut self) -> Result<Option<Vec<Real>>> {
        match &mut self.device {
            Some(dev) => Ok(Some(dev.stage()?)),
            None => Ok(None),
        }
    }

    /// Puts device contents back after a device-side run.
    pub(crate) fn commit_device(&mut self, data: Vec<Real>, written: bool) -> Result<()> {
        if let Some(dev) = &mut self.device {
            dev.commit(data)?;
            if written {
                self.mark_written(MemorySide::Device);
            }
        }
        Ok(())
    }
}

/// A slice shared between block workers that write disjoint elements.
///
/// Disjointness is established when a computation is prepared: a field
/// written by a stage group is only touched at the writing unit's own
/// column, and blocks partition the compute domain.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SharedSlice<'a> {
    ptr: *mut Real,
    len: usize,
    _marker: PhantomData<&'a mut [Real]>,
}

#[allow(unsafe_code)]
unsafe impl Send for SharedSlice<'_> {}
#[allow(unsafe_code)]
unsafe impl Sync for SharedSlice<'_> {}

#[allow(unsafe_code)]
impl<'a> SharedSlice<'a> {
    pub(crate) fn new(slice: &'a mut [Real]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            _marker: PhantomData,
        }
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// # Safety
    /// No other worker may write `idx` concurrently.
    #[inline]
    pub(crate) unsafe fn read(&self, idx: usize) -> Real {
        assert!(idx < self.len, "index {idx} out of {}", self.len);
        // SAFETY: in bounds; the caller rules out concurrent writes.
        unsafe { *self.ptr.add(idx) }
    }

    /// # Safety
    /// No other worker may read or write `idx` concurrently.
    #[inline]
    pub(crate) unsafe fn write(&self, idx: usize, value: Real) {
        assert!(idx < self.len, "index {idx} out of {}", self.len);
        // SAFETY: in bounds; the caller guarantees exclusive access to `idx`.
        unsafe { *self.ptr.add(idx) = value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_only_storage_is_never_stale() {
        let mut s = Storage::host_only(4, 1.0);
        s.host_mut()[0] = 2.0;
        s.mark_written(MemorySide::Device);
        assert!(!s.is_stale(MemorySide::Host));
        assert!(!s.is_stale(MemorySide::Device));
        assert!(s.stage_device().unwrap().is_none());
    }

    #[test]
    fn staged_device_data_round_trips() {
        let mut s = Storage::from_host(vec![1.0, 2.0, 3.0], true).unwrap();
        let mut staged = s.stage_device().unwrap().unwrap();
        staged[1] = 9.0;
        s.commit_device(staged, true).unwrap();
        assert!(s.is_stale(MemorySide::Host));
        s.d2h().unwrap();
        assert_eq!(s.host(), &[1.0, 9.0, 3.0]);
    }

    #[test]
    #[allow(unsafe_code)]
    fn shared_slice_reads_and_writes() {
        let mut data = vec![0.0; 3];
        let shared = SharedSlice::new(&mut data);
        unsafe {
            shared.write(2, 5.0);
            assert_eq!(shared.read(2), 5.0);
        }
        assert_eq!(shared.len(), 3);
        assert_eq!(data[2], 5.0);
    }
}
