//! GPU-visible uniform resources.

use std::marker::PhantomData;

use ash::vk;
use bytemuck::Pod;
use ember_gpu::{GpuBuffer, GpuContext, HeapClass, Result};

/// A typed uniform buffer in host-visible GPU memory.
///
/// Writes go straight through the allocator's persistent mapping, so a
/// single `write` per frame is all the upload protocol needs.
pub struct UniformBuffer<T: Pod> {
    buffer: GpuBuffer,
    _marker: PhantomData<T>,
}

impl<T: Pod> UniformBuffer<T> {
    /// Create the buffer, sized for one `T`.
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn new(gpu: &GpuContext) -> Result<Self> {
        let buffer = GpuBuffer::new(
            gpu.device(),
            gpu.allocator(),
            std::mem::size_of::<T>() as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            HeapClass::DeviceShared,
        )?;

        Ok(Self {
            buffer,
            _marker: PhantomData,
        })
    }

    /// Write the value into the mapped range.
    pub fn write(&self, value: &T) -> Result<()> {
        self.buffer.chunk.write(0, value)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer.buffer
    }

    pub fn range(&self) -> u64 {
        std::mem::size_of::<T>() as u64
    }

    /// Destroy the buffer.
    ///
    /// # Safety
    /// The buffer must not be in use by the GPU.
    pub unsafe fn destroy(self, gpu: &GpuContext) {
        self.buffer.destroy(gpu.device(), gpu.allocator());
    }
}
