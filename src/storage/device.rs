//! Device-side mirrors of field snapshots.
//!
//! With the `wgpu` feature, a mirror is a `wgpu` storage buffer on the
//! default adapter, written through the queue and read back through a
//! mappable staging buffer. Without it, the device memory space is emulated
//! by a separate host allocation, which keeps the host/device ownership
//! discipline (explicit `h2d`/`d2h`, staleness) observable on any machine.
//!
//! Kernels of the GPU backend run over the staged device contents
//! ([`DeviceBuffer::stage`]) and hand them back with [`DeviceBuffer::commit`].

use crate::Real;

/// Failures of the device memory space.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// No adapter matched the request.
    #[error("adapter error: {0}")]
    Adapter(String),
    /// The adapter refused to open a device.
    #[error("device error: {0}")]
    Device(String),
    /// Mapping a staging buffer for readback failed.
    #[error("buffer map failed: {0}")]
    Map(String),
    /// Host and device sizes disagree.
    #[error("size mismatch: host {host}, device {device}")]
    SizeMismatch {
        /// Host element count.
        host: usize,
        /// Device element count.
        device: usize,
    },
}

#[cfg(feature = "wgpu")]
pub use self::gpu::{GPU_CONTEXT, GpuContext};

#[cfg(feature = "wgpu")]
mod gpu {
    use super::DeviceError;

    /// Holds the `wgpu` device and queue used for every mirror.
    ///
    /// Initialized once, lazily, through [`GPU_CONTEXT`].
    pub struct GpuContext {
        /// The device owning all mirror buffers.
        pub device: wgpu::Device,
        /// Queue used for uploads and readback copies.
        pub queue: wgpu::Queue,
    }

    impl GpuContext {
        /// Opens the default adapter and requests a device with default limits.
        ///
        /// # Errors
        /// [`DeviceError::Adapter`] or [`DeviceError::Device`].
        pub fn new() -> Result<Self, DeviceError> {
            let instance = wgpu::Instance::default();
            let adapter =
                pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                    .map_err(|e| DeviceError::Adapter(e.to_string()))?;
            let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
                label: Some("stencil_engine"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::default(),
            }))
            .map_err(|e| DeviceError::Device(e.to_string()))?;
            tracing::info!(adapter = ?adapter.get_info().name, "gpu context ready");
            Ok(Self { device, queue })
        }
    }

    lazy_static::lazy_static! {
        /// The process-wide device context.
        pub static ref GPU_CONTEXT: Result<GpuContext, DeviceError> = GpuContext::new();
    }

    pub(super) fn context() -> Result<&'static GpuContext, DeviceError> {
        GPU_CONTEXT.as_ref().map_err(Clone::clone)
    }
}

/// A device allocation mirroring one host buffer.
#[derive(Debug)]
pub struct DeviceBuffer {
    len: usize,
    #[cfg(feature = "wgpu")]
    buffer: wgpu::Buffer,
    #[cfg(not(feature = "wgpu"))]
    data: Vec<Real>,
}

impl DeviceBuffer {
    /// Number of elements.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no elements.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check_len(&self, host: usize) -> Result<(), DeviceError> {
        if host == self.len {
            Ok(())
        } else {
            Err(DeviceError::SizeMismatch { host, device: self.len })
        }
    }
}

#[cfg(not(feature = "wgpu"))]
impl DeviceBuffer {
    /// Allocates a zeroed mirror of `len` elements.
    ///
    /// # Errors
    /// Never fails in the emulated memory space.
    pub fn new(len: usize) -> Result<Self, DeviceError> {
        Ok(Self { len, data: vec![0.0; len] })
    }

    /// Copies host data into the mirror.
    ///
    /// # Errors
    /// [`DeviceError::SizeMismatch`] if the lengths differ.
    pub fn upload(&mut self, src: &[Real]) -> Result<(), DeviceError> {
        self.check_len(src.len())?;
        self.data.copy_from_slice(src);
        Ok(())
    }

    /// Copies the mirror into host data.
    ///
    /// # Errors
    /// [`DeviceError::SizeMismatch`] if the lengths differ.
    pub fn download(&self, dst: &mut [Real]) -> Result<(), DeviceError> {
        self.check_len(dst.len())?;
        dst.copy_from_slice(&self.data);
        Ok(())
    }

    /// Moves the device contents out for kernel execution.
    ///
    /// # Errors
    /// Never fails in the emulated memory space.
    pub fn stage(&mut self) -> Result<Vec<Real>, DeviceError> {
        Ok(core::mem::take(&mut self.data))
    }

    /// Puts kernel results back into the mirror.
    ///
    /// # Errors
    /// [`DeviceError::SizeMismatch`] if the lengths differ.
    pub fn commit(&mut self, data: Vec<Real>) -> Result<(), DeviceError> {
        self.check_len(data.len())?;
        self.data = data;
        Ok(())
    }
}

#[cfg(feature = "wgpu")]
impl DeviceBuffer {
    fn byte_size(len: usize) -> u64 {
        (len.max(1) * core::mem::size_of::<Real>()) as u64
    }

    /// Allocates a mirror of `len` elements on the device.
    ///
    /// # Errors
    /// Fails if the device context cannot be opened.
    pub fn new(len: usize) -> Result<Self, DeviceError> {
        let ctx = gpu::context()?;
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("field_mirror"),
            size: Self::byte_size(len),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(Self { len, buffer })
    }

    /// Writes host data into the mirror.
    ///
    /// # Errors
    /// [`DeviceError::SizeMismatch`] or a context failure.
    pub fn upload(&mut self, src: &[Real]) -> Result<(), DeviceError> {
        self.check_len(src.len())?;
        if src.is_empty() {
            return Ok(());
        }
        let ctx = gpu::context()?;
        ctx.queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(src));
        ctx.queue.submit(None);
        Ok(())
    }

    /// Reads the mirror back through a staging buffer.
    ///
    /// # Errors
    /// [`DeviceError::SizeMismatch`], [`DeviceError::Map`] or a context failure.
    pub fn download(&self, dst: &mut [Real]) -> Result<(), DeviceError> {
        self.check_len(dst.len())?;
        if dst.is_empty() {
            return Ok(());
        }
        let ctx = gpu::context()?;
        let size = Self::byte_size(self.len);
        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_encoder"),
        });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging, 0, size);
        ctx.queue.submit(Some(encoder.finish()));

        let (tx, rx) = std::sync::mpsc::channel();
        let slice = staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        ctx.device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| DeviceError::Map(e.to_string()))?;
        rx.recv()
            .map_err(|e| DeviceError::Map(e.to_string()))?
            .map_err(|e| DeviceError::Map(e.to_string()))?;

        let bytes = slice.get_mapped_range();
        let values: Vec<Real> = bytemuck::pod_collect_to_vec(&bytes[..dst.len() * core::mem::size_of::<Real>()]);
        dst.copy_from_slice(&values);
        drop(bytes);
        staging.unmap();
        Ok(())
    }

    /// Reads the device contents for kernel execution.
    ///
    /// # Errors
    /// Propagates readback failures.
    pub fn stage(&mut self) -> Result<Vec<Real>, DeviceError> {
        let mut out = vec![0.0; self.len];
        self.download(&mut out)?;
        Ok(out)
    }

    /// Writes kernel results back to the device.
    ///
    /// # Errors
    /// Propagates upload failures.
    pub fn commit(&mut self, data: Vec<Real>) -> Result<(), DeviceError> {
        self.upload(&data)
    }
}

#[cfg(all(test, not(feature = "wgpu")))]
mod tests {
    use super::*;

    #[test]
    fn upload_download() {
        let mut buf = DeviceBuffer::new(3).unwrap();
        buf.upload(&[1.0, 2.0, 3.0]).unwrap();
        let mut out = [0.0; 3];
        buf.download(&mut out).unwrap();
        assert_eq!(out, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn size_mismatch_is_reported() {
        let mut buf = DeviceBuffer::new(2).unwrap();
        assert_eq!(
            buf.upload(&[1.0]),
            Err(DeviceError::SizeMismatch { host: 1, device: 2 })
        );
    }
}
