//! Tiered GPU memory allocator.
//!
//! Memory is pre-reserved in one fixed-capacity heap per class, sized from
//! the physical device budgets, and handed out as sub-allocated chunks.
//! Exhaustion of a class is a recoverable error surfaced to the resource
//! creation caller; there is no fallback to another class.

use crate::device::RendererOptions;
use crate::error::{GpuError, Result};
use crate::instance::MemoryBudgets;
use ash::vk;
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::Arc;

/// Memory heap classes, by how the memory can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapClass {
    /// GPU-only memory (textures, static vertex data).
    DeviceLocal,
    /// GPU memory visible from the host (per-frame uniforms).
    DeviceShared,
    /// System memory visible to the GPU (staging).
    HostShared,
}

impl HeapClass {
    pub const ALL: [Self; 3] = [Self::DeviceLocal, Self::DeviceShared, Self::HostShared];

    fn index(self) -> usize {
        match self {
            Self::DeviceLocal => 0,
            Self::DeviceShared => 1,
            Self::HostShared => 2,
        }
    }
}

/// Round up to the next power of two.
pub fn round_up_pow2(value: u64) -> u64 {
    value.max(1).next_power_of_two()
}

/// Heap capacities per class, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapSizes {
    pub device_local: u64,
    pub device_shared: u64,
    pub host_shared: u64,
}

impl HeapSizes {
    /// Derive heap capacities from the physical device budgets.
    ///
    /// Each capacity is a power-of-two rounding of a class-dependent
    /// fraction of the budget. When the device-shared budget exceeds the
    /// device-local one the device is probably the host (integrated GPU)
    /// and shared memory is really system memory, so a much smaller
    /// fraction is reserved to prevent overallocation.
    pub fn compute(budgets: MemoryBudgets, options: RendererOptions) -> Self {
        let device_shared = if budgets.device_shared > budgets.device_local {
            round_up_pow2(budgets.device_shared / 128)
        } else {
            round_up_pow2(budgets.device_shared / 16)
        };

        let mut sizes = Self {
            device_local: round_up_pow2(budgets.device_local / 64),
            device_shared,
            host_shared: round_up_pow2(budgets.host_shared / 256),
        };

        let scale = |size: u64| -> u64 {
            if options.contains(RendererOptions::TINY_MEMORY_HEAPS) {
                size / 4
            } else if options.contains(RendererOptions::SMALL_MEMORY_HEAPS) {
                size / 2
            } else if options.contains(RendererOptions::LARGE_MEMORY_HEAPS) {
                size * 2
            } else if options.contains(RendererOptions::GIANT_MEMORY_HEAPS) {
                size * 4
            } else {
                size
            }
        };

        sizes.device_local = scale(sizes.device_local);
        sizes.device_shared = scale(sizes.device_shared);
        sizes.host_shared = scale(sizes.host_shared);
        sizes
    }

    fn capacity(&self, class: HeapClass) -> u64 {
        match class {
            HeapClass::DeviceLocal => self.device_local,
            HeapClass::DeviceShared => self.device_shared,
            HeapClass::HostShared => self.host_shared,
        }
    }
}

/// Live allocation and reservation counters for one heap class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Bytes handed out as live chunks.
    pub used: u64,
    /// Bytes reserved from the driver for the heap arena.
    pub allocated: u64,
}

/// First-fit range bookkeeping for one heap arena.
///
/// Kept free of Vulkan handles so the arithmetic can be exercised directly.
#[derive(Debug)]
pub struct HeapRanges {
    capacity: u64,
    // Live (offset, size) pairs sorted by offset.
    live: Vec<(u64, u64)>,
    used: u64,
}

impl HeapRanges {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            live: Vec::new(),
            used: 0,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    /// Allocate a range, first fit. Returns the offset, or `None` when no
    /// gap can hold `size` bytes at the requested alignment.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<u64> {
        debug_assert!(alignment.is_power_of_two(), "alignment must be a power of two");

        if size == 0 || size > self.capacity {
            return None;
        }

        let mut cursor = 0u64;
        let mut insert_at = self.live.len();

        for (i, &(offset, len)) in self.live.iter().enumerate() {
            let aligned = align_up(cursor, alignment);
            if aligned + size <= offset {
                insert_at = i;
                cursor = aligned;
                break;
            }
            cursor = offset + len;
        }

        if insert_at == self.live.len() {
            cursor = align_up(cursor, alignment);
            if cursor + size > self.capacity {
                return None;
            }
        }

        self.live.insert(insert_at, (cursor, size));
        self.used += size;
        Some(cursor)
    }

    /// Free the range starting at `offset`. Returns the freed size.
    pub fn free(&mut self, offset: u64) -> u64 {
        match self.live.binary_search_by_key(&offset, |&(o, _)| o) {
            Ok(index) => {
                let (_, size) = self.live.remove(index);
                self.used -= size;
                size
            }
            Err(_) => {
                debug_assert!(false, "freeing unknown range at offset {offset}");
                0
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// A sub-allocated region of a heap arena, bound to a buffer or image.
#[derive(Debug)]
pub struct Chunk {
    class: HeapClass,
    offset: u64,
    size: u64,
    memory: vk::DeviceMemory,
    mapped: Option<NonNull<u8>>,
}

// The mapped pointer aliases host-visible device memory owned by the
// allocator; chunk holders only write through their own range.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Chunk {
    pub fn class(&self) -> HeapClass {
        self.class
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Write bytes into the chunk at `offset` (host-visible classes only).
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let base = self
            .mapped
            .ok_or_else(|| GpuError::InvalidState("Chunk is not host-visible".to_string()))?;

        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidState(
                "Write range exceeds chunk size".to_string(),
            ));
        }

        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                base.as_ptr().add(offset as usize),
                data.len(),
            );
        }

        Ok(())
    }

    /// Write a Pod value into the chunk at `offset`.
    pub fn write<T: bytemuck::Pod>(&self, offset: u64, value: &T) -> Result<()> {
        self.write_bytes(offset, bytemuck::bytes_of(value))
    }
}

struct Heap {
    memory: vk::DeviceMemory,
    ranges: HeapRanges,
    mapped: Option<NonNull<u8>>,
}

unsafe impl Send for Heap {}

/// Tiered GPU memory allocator. Thread-safe: chunks may be acquired and
/// released from any resource-creation call site.
pub struct MemoryAllocator {
    device: Arc<ash::Device>,
    sizes: HeapSizes,
    memory_type_indices: [u32; 3],
    heaps: Mutex<[Option<Heap>; 3]>,
}

impl MemoryAllocator {
    /// Create the allocator with heap arenas sized by `sizes`.
    ///
    /// Arenas are reserved lazily on first acquire so a class that is never
    /// touched costs nothing.
    ///
    /// # Safety
    /// The device and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        sizes: HeapSizes,
    ) -> Result<Self> {
        let properties = instance.get_physical_device_memory_properties(physical_device);

        let memory_type_indices = [
            find_memory_type(&properties, HeapClass::DeviceLocal)?,
            find_memory_type(&properties, HeapClass::DeviceShared)?,
            find_memory_type(&properties, HeapClass::HostShared)?,
        ];

        tracing::debug!(
            device_local = sizes.device_local,
            device_shared = sizes.device_shared,
            host_shared = sizes.host_shared,
            "Memory heap capacities"
        );

        Ok(Self {
            device,
            sizes,
            memory_type_indices,
            heaps: Mutex::new([None, None, None]),
        })
    }

    /// Heap capacities the allocator was built with.
    pub fn heap_sizes(&self) -> HeapSizes {
        self.sizes
    }

    /// Acquire a chunk from the given heap class.
    pub fn acquire(&self, class: HeapClass, size: u64, alignment: u64) -> Result<Chunk> {
        let mut heaps = self.heaps.lock();
        let slot = &mut heaps[class.index()];

        let heap = match slot {
            Some(heap) => heap,
            None => slot.insert(self.create_heap(class)?),
        };

        let Some(offset) = heap.ranges.allocate(size, alignment.max(1)) else {
            return Err(GpuError::OutOfMemory {
                class,
                requested: size,
                available: heap.ranges.capacity() - heap.ranges.used(),
            });
        };

        let mapped = heap
            .mapped
            .map(|base| unsafe { NonNull::new_unchecked(base.as_ptr().add(offset as usize)) });

        Ok(Chunk {
            class,
            offset,
            size,
            memory: heap.memory,
            mapped,
        })
    }

    /// Release a chunk back to its heap.
    pub fn release(&self, chunk: Chunk) {
        let mut heaps = self.heaps.lock();
        if let Some(heap) = heaps[chunk.class.index()].as_mut() {
            heap.ranges.free(chunk.offset);
        }
    }

    /// Usage accounting for one heap class.
    pub fn usage(&self, class: HeapClass) -> MemoryUsage {
        let heaps = self.heaps.lock();
        heaps[class.index()]
            .as_ref()
            .map_or(MemoryUsage::default(), |heap| MemoryUsage {
                used: heap.ranges.used(),
                allocated: heap.ranges.capacity(),
            })
    }

    fn create_heap(&self, class: HeapClass) -> Result<Heap> {
        let capacity = self.sizes.capacity(class);
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(capacity)
            .memory_type_index(self.memory_type_indices[class.index()]);

        let memory = unsafe { self.device.allocate_memory(&allocate_info, None)? };

        // Host-visible arenas stay persistently mapped.
        let mapped = if matches!(class, HeapClass::DeviceShared | HeapClass::HostShared) {
            let ptr = unsafe {
                self.device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            };
            match ptr {
                Ok(ptr) => NonNull::new(ptr.cast::<u8>()),
                Err(err) => {
                    unsafe { self.device.free_memory(memory, None) };
                    return Err(err.into());
                }
            }
        } else {
            None
        };

        tracing::debug!(?class, capacity, "Reserved memory heap");

        Ok(Heap {
            memory,
            ranges: HeapRanges::new(capacity),
            mapped,
        })
    }

    /// Free all heap arenas. Must run before the device is destroyed.
    pub fn shutdown(&self) {
        let mut heaps = self.heaps.lock();
        for slot in heaps.iter_mut() {
            if let Some(heap) = slot.take() {
                if !heap.ranges.is_empty() {
                    tracing::warn!(
                        leaked = heap.ranges.used(),
                        "Destroying heap with live chunks"
                    );
                }
                unsafe {
                    if heap.mapped.is_some() {
                        self.device.unmap_memory(heap.memory);
                    }
                    self.device.free_memory(heap.memory, None);
                }
            }
        }
    }
}

fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    class: HeapClass,
) -> Result<u32> {
    let types = &properties.memory_types[..properties.memory_type_count as usize];

    let matches_class = |flags: vk::MemoryPropertyFlags, strict: bool| -> bool {
        let device_local = flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL);
        let host_visible = flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE);
        // Mapped classes need coherent memory; chunk writes are never
        // flushed explicitly.
        let mappable = host_visible && flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT);
        match class {
            HeapClass::DeviceLocal => device_local && (!strict || !host_visible),
            HeapClass::DeviceShared => device_local && mappable,
            HeapClass::HostShared => mappable && (!strict || !device_local),
        }
    };

    // Prefer an exact class match, fall back to a compatible one.
    for strict in [true, false] {
        if let Some(index) = types
            .iter()
            .position(|t| matches_class(t.property_flags, strict))
        {
            return Ok(index as u32);
        }
    }

    Err(GpuError::NoSuitableDevice)
}

/// A GPU buffer bound to an allocator chunk.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub chunk: Chunk,
}

impl GpuBuffer {
    /// Create a buffer backed by a chunk of the given heap class.
    ///
    /// # Safety
    /// The device must be valid and outlive the buffer.
    pub unsafe fn new(
        device: &ash::Device,
        allocator: &MemoryAllocator,
        size: u64,
        usage: vk::BufferUsageFlags,
        class: HeapClass,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = device.create_buffer(&buffer_info, None)?;
        let requirements = device.get_buffer_memory_requirements(buffer);

        let chunk = match allocator.acquire(class, requirements.size, requirements.alignment) {
            Ok(chunk) => chunk,
            Err(err) => {
                device.destroy_buffer(buffer, None);
                return Err(err);
            }
        };

        if let Err(err) = device.bind_buffer_memory(buffer, chunk.memory(), chunk.offset()) {
            device.destroy_buffer(buffer, None);
            allocator.release(chunk);
            return Err(err.into());
        }

        Ok(Self { buffer, chunk })
    }

    /// Destroy the buffer and release its chunk.
    ///
    /// # Safety
    /// The buffer must not be in use by the GPU.
    pub unsafe fn destroy(self, device: &ash::Device, allocator: &MemoryAllocator) {
        device.destroy_buffer(self.buffer, None);
        allocator.release(self.chunk);
    }
}

/// A GPU image bound to an allocator chunk, with its default view.
pub struct GpuImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub chunk: Chunk,
}

impl GpuImage {
    /// Create a device-local 2D image and a view over it.
    ///
    /// # Safety
    /// The device must be valid and outlive the image.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn new(
        device: &ash::Device,
        allocator: &MemoryAllocator,
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(samples)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = device.create_image(&image_info, None)?;
        let requirements = device.get_image_memory_requirements(image);

        let chunk = match allocator.acquire(
            HeapClass::DeviceLocal,
            requirements.size,
            requirements.alignment,
        ) {
            Ok(chunk) => chunk,
            Err(err) => {
                device.destroy_image(image, None);
                return Err(err);
            }
        };

        if let Err(err) = device.bind_image_memory(image, chunk.memory(), chunk.offset()) {
            device.destroy_image(image, None);
            allocator.release(chunk);
            return Err(err.into());
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .level_count(1)
                    .layer_count(1),
            );

        let view = match device.create_image_view(&view_info, None) {
            Ok(view) => view,
            Err(err) => {
                device.destroy_image(image, None);
                allocator.release(chunk);
                return Err(err.into());
            }
        };

        Ok(Self { image, view, chunk })
    }

    /// Destroy the image and release its chunk.
    ///
    /// # Safety
    /// The image must not be in use by the GPU.
    pub unsafe fn destroy(self, device: &ash::Device, allocator: &MemoryAllocator) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        allocator.release(self.chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_sizes_are_pow2_fractions() {
        let budgets = MemoryBudgets {
            device_local: 8 << 30,
            device_shared: 256 << 20,
            host_shared: 16 << 30,
        };
        let sizes = HeapSizes::compute(budgets, RendererOptions::empty());

        // 8 GiB / 64 = 128 MiB, already a power of two.
        assert_eq!(sizes.device_local, 128 << 20);
        // 256 MiB / 16 = 16 MiB.
        assert_eq!(sizes.device_shared, 16 << 20);
        // 16 GiB / 256 = 64 MiB.
        assert_eq!(sizes.host_shared, 64 << 20);
    }

    #[test]
    fn heap_sizes_round_up_to_pow2() {
        let budgets = MemoryBudgets {
            device_local: 6 << 30,
            device_shared: 192 << 20,
            host_shared: 12 << 30,
        };
        let sizes = HeapSizes::compute(budgets, RendererOptions::empty());

        assert!(sizes.device_local.is_power_of_two());
        assert!(sizes.device_shared.is_power_of_two());
        assert!(sizes.host_shared.is_power_of_two());
        assert!(sizes.device_local >= (6u64 << 30) / 64);
    }

    #[test]
    fn integrated_gpu_uses_reduced_shared_fraction() {
        // More device-shared than device-local memory means the device is
        // probably the host.
        let budgets = MemoryBudgets {
            device_local: 256 << 20,
            device_shared: 16 << 30,
            host_shared: 16 << 30,
        };
        let sizes = HeapSizes::compute(budgets, RendererOptions::empty());
        assert_eq!(sizes.device_shared, round_up_pow2((16u64 << 30) / 128));
    }

    #[test]
    fn heap_sizes_scale_with_options() {
        let budgets = MemoryBudgets {
            device_local: 8 << 30,
            device_shared: 256 << 20,
            host_shared: 16 << 30,
        };
        let base = HeapSizes::compute(budgets, RendererOptions::empty());

        let tiny = HeapSizes::compute(budgets, RendererOptions::TINY_MEMORY_HEAPS);
        assert_eq!(tiny.device_local, base.device_local / 4);

        let small = HeapSizes::compute(budgets, RendererOptions::SMALL_MEMORY_HEAPS);
        assert_eq!(small.device_local, base.device_local / 2);

        let large = HeapSizes::compute(budgets, RendererOptions::LARGE_MEMORY_HEAPS);
        assert_eq!(large.device_local, base.device_local * 2);

        let giant = HeapSizes::compute(budgets, RendererOptions::GIANT_MEMORY_HEAPS);
        assert_eq!(giant.device_local, base.device_local * 4);
    }

    #[test]
    fn ranges_allocate_and_free() {
        let mut ranges = HeapRanges::new(1024);

        let a = ranges.allocate(256, 1).unwrap();
        let b = ranges.allocate(256, 1).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 256);
        assert_eq!(ranges.used(), 512);

        assert_eq!(ranges.free(a), 256);
        assert_eq!(ranges.used(), 256);

        // Freed gap is reused, first fit.
        let c = ranges.allocate(128, 1).unwrap();
        assert_eq!(c, 0);
    }

    #[test]
    fn ranges_respect_alignment() {
        let mut ranges = HeapRanges::new(1024);

        ranges.allocate(10, 1).unwrap();
        let aligned = ranges.allocate(64, 256).unwrap();
        assert_eq!(aligned % 256, 0);
        assert!(aligned >= 10);
    }

    #[test]
    fn exhaustion_never_partially_succeeds() {
        let mut ranges = HeapRanges::new(1024);

        ranges.allocate(1000, 1).unwrap();
        let used_before = ranges.used();

        // More than the remaining capacity: must fail and leave the
        // accounting untouched.
        assert!(ranges.allocate(100, 1).is_none());
        assert_eq!(ranges.used(), used_before);

        // Larger than the whole heap.
        let mut fresh = HeapRanges::new(1024);
        assert!(fresh.allocate(4096, 1).is_none());
        assert_eq!(fresh.used(), 0);
    }

    #[test]
    fn fragmented_heap_rejects_oversized_request() {
        let mut ranges = HeapRanges::new(1024);

        let a = ranges.allocate(256, 1).unwrap();
        let _b = ranges.allocate(256, 1).unwrap();
        let c = ranges.allocate(256, 1).unwrap();
        ranges.free(a);
        ranges.free(c);

        // 768 bytes free but the largest gap is 512.
        assert!(ranges.allocate(600, 1).is_none());
        assert!(ranges.allocate(512, 1).is_some());
    }

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            properties.memory_types[i].property_flags = flags;
        }
        properties
    }

    #[test]
    fn mapped_classes_require_coherent_memory() {
        // A cached-but-incoherent type must be skipped for mapped heaps.
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        assert_eq!(
            find_memory_type(&properties, HeapClass::HostShared).unwrap(),
            2
        );
        assert_eq!(
            find_memory_type(&properties, HeapClass::DeviceLocal).unwrap(),
            0
        );
    }

    #[test]
    fn device_shared_needs_local_visible_and_coherent() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        assert_eq!(
            find_memory_type(&properties, HeapClass::DeviceShared).unwrap(),
            2
        );
    }

    #[test]
    fn round_up_pow2_handles_edges() {
        assert_eq!(round_up_pow2(0), 1);
        assert_eq!(round_up_pow2(1), 1);
        assert_eq!(round_up_pow2(3), 4);
        assert_eq!(round_up_pow2(4096), 4096);
        assert_eq!(round_up_pow2(4097), 8192);
    }
}
