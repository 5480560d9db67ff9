//! GPU context: instance, device, queues, allocator.

use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device, PhysicalDeviceInfo};
use crate::memory::{HeapSizes, MemoryAllocator};
use ash::vk;
use parking_lot::{Mutex, MutexGuard};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::Arc;

bitflags::bitflags! {
    /// Renderer construction options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RendererOptions: u32 {
        /// Quarter-size memory heaps.
        const TINY_MEMORY_HEAPS = 1 << 0;
        /// Half-size memory heaps.
        const SMALL_MEMORY_HEAPS = 1 << 1;
        /// Double-size memory heaps.
        const LARGE_MEMORY_HEAPS = 1 << 2;
        /// Quadruple-size memory heaps.
        const GIANT_MEMORY_HEAPS = 1 << 3;
        /// Use a dedicated transfer queue family when the device has one.
        const STANDALONE_TRANSFER_QUEUE = 1 << 4;
        /// Use a dedicated compute queue family when the device has one.
        const STANDALONE_COMPUTE_QUEUE = 1 << 5;
    }
}

/// Selected queue family indices.
///
/// `generic` always backs graphics work; the other roles collapse onto it
/// unless a dedicated family exists and the matching option requests it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub generic: u32,
    pub present: u32,
    pub transfer: u32,
    pub compute: u32,
}

/// Pick queue families from the device's family table.
///
/// `present_supported` reports whether a family can present to the probe
/// surface; when no family can (or no surface was probed), presentation
/// falls back to the generic family.
pub fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    options: RendererOptions,
    mut present_supported: impl FnMut(u32) -> bool,
) -> Result<QueueFamilies> {
    let has = |family: &vk::QueueFamilyProperties, flags: vk::QueueFlags| {
        family.queue_flags.contains(flags)
    };

    let generic = families
        .iter()
        .position(|f| has(f, vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE))
        .map(|i| i as u32)
        .ok_or(GpuError::NoSuitableDevice)?;

    let present = (0..families.len() as u32)
        .find(|&i| present_supported(i))
        .unwrap_or(generic);

    let transfer = if options.contains(RendererOptions::STANDALONE_TRANSFER_QUEUE) {
        families
            .iter()
            .position(|f| {
                has(f, vk::QueueFlags::TRANSFER)
                    && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                    && !f.queue_flags.contains(vk::QueueFlags::COMPUTE)
            })
            .map_or(generic, |i| i as u32)
    } else {
        generic
    };

    let compute = if options.contains(RendererOptions::STANDALONE_COMPUTE_QUEUE) {
        families
            .iter()
            .position(|f| {
                has(f, vk::QueueFlags::COMPUTE)
                    && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            })
            .map_or(generic, |i| i as u32)
    } else {
        generic
    };

    Ok(QueueFamilies {
        generic,
        present,
        transfer,
        compute,
    })
}

/// A device queue paired with its submission mutex.
///
/// Queues backed by the same physical queue share one mutex, so submissions
/// and presents from different roles never race on the driver.
#[derive(Clone)]
pub struct Queue {
    handle: vk::Queue,
    family: u32,
    submit_mutex: Arc<Mutex<()>>,
}

impl Queue {
    pub fn handle(&self) -> vk::Queue {
        self.handle
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    /// Lock the queue for submission or presentation.
    pub fn lock_submit(&self) -> MutexGuard<'_, ()> {
        self.submit_mutex.lock()
    }

    /// Whether this role shares a submission mutex with `other`, i.e.
    /// both are backed by the same physical queue. A caller already
    /// holding the shared lock must not take it a second time.
    pub fn shares_submit_lock(&self, other: &Queue) -> bool {
        Arc::ptr_eq(&self.submit_mutex, &other.submit_mutex)
    }
}

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) info: PhysicalDeviceInfo,
    pub(crate) options: RendererOptions,
    pub(crate) allocator: MemoryAllocator,

    pub(crate) families: QueueFamilies,
    pub(crate) generic_queue: Queue,
    pub(crate) present_queue: Queue,
    pub(crate) transfer_queue: Queue,
    pub(crate) compute_queue: Queue,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &Arc<ash::Device> {
        &self.device
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the physical device description.
    pub fn info(&self) -> &PhysicalDeviceInfo {
        &self.info
    }

    /// Get the options the context was built with.
    pub fn options(&self) -> RendererOptions {
        self.options
    }

    /// Get the selected queue families.
    pub fn queue_families(&self) -> QueueFamilies {
        self.families
    }

    /// Queue for graphics and general work.
    pub fn generic_queue(&self) -> &Queue {
        &self.generic_queue
    }

    /// Queue for presentation.
    pub fn present_queue(&self) -> &Queue {
        &self.present_queue
    }

    /// Queue for transfer work.
    pub fn transfer_queue(&self) -> &Queue {
        &self.transfer_queue
    }

    /// Queue for compute work.
    pub fn compute_queue(&self) -> &Queue {
        &self.compute_queue
    }

    /// Get access to the memory allocator.
    pub fn allocator(&self) -> &MemoryAllocator {
        &self.allocator
    }

    /// Wait for the device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Heaps hold VkDeviceMemory; free them before the device goes.
            self.allocator.shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    options: RendererOptions,
    probe_handles: Option<(RawDisplayHandle, RawWindowHandle)>,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Ember".to_string(),
            enable_validation: cfg!(debug_assertions),
            options: RendererOptions::empty(),
            probe_handles: None,
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Set renderer options.
    pub fn options(mut self, options: RendererOptions) -> Self {
        self.options = options;
        self
    }

    /// Probe presentation support against a window's surface during queue
    /// family selection. Without a probe the present role falls back to
    /// the generic family.
    pub fn present_probe(
        mut self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Self {
        self.probe_handles = Some((display, window));
        self
    }

    /// Build the GPU context.
    pub fn build(self) -> Result<GpuContext> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        let physical_device = unsafe { select_physical_device(&instance) }?;
        let info = unsafe { PhysicalDeviceInfo::query(&instance, physical_device) };

        tracing::info!("Selected GPU: {}", info.summary());

        // A throwaway surface answers "which families can present here".
        let probe = match self.probe_handles {
            Some((display, window)) => {
                let loader = ash::khr::surface::Instance::new(&entry, &instance);
                let surface = unsafe {
                    ash_window::create_surface(&entry, &instance, display, window, None)
                }
                .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;
                Some((loader, surface))
            }
            None => None,
        };

        let families = select_queue_families(&info.queue_families, self.options, |family| {
            probe.as_ref().is_some_and(|(loader, surface)| unsafe {
                loader
                    .get_physical_device_surface_support(physical_device, family, *surface)
                    .unwrap_or(false)
            })
        });

        if let Some((loader, surface)) = probe {
            unsafe { loader.destroy_surface(surface, None) };
        }
        let families = families?;

        tracing::debug!(
            generic = families.generic,
            present = families.present,
            transfer = families.transfer,
            compute = families.compute,
            "Selected queue families"
        );

        let device = unsafe { create_device(&instance, physical_device, families) }?;
        let device = Arc::new(device);

        // One submission mutex per physical queue: roles sharing a family
        // share the mutex.
        let mut mutexes: HashMap<u32, Arc<Mutex<()>>> = HashMap::new();
        let mut queue_for = |family: u32| -> Queue {
            let submit_mutex = mutexes
                .entry(family)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            Queue {
                handle: unsafe { device.get_device_queue(family, 0) },
                family,
                submit_mutex,
            }
        };

        let generic_queue = queue_for(families.generic);
        let present_queue = queue_for(families.present);
        let transfer_queue = queue_for(families.transfer);
        let compute_queue = queue_for(families.compute);

        let heap_sizes = HeapSizes::compute(info.memory, self.options);
        let allocator = unsafe {
            MemoryAllocator::new(&instance, device.clone(), physical_device, heap_sizes)
        }?;

        Ok(GpuContext {
            entry,
            instance,
            physical_device,
            device,
            info,
            options: self.options,
            allocator,
            families,
            generic_queue,
            present_queue,
            transfer_queue,
            compute_queue,
        })
    }
}

/// Required device extensions.
fn required_device_extensions() -> Vec<&'static CStr> {
    vec![
        ash::khr::swapchain::NAME,
        #[cfg(target_os = "macos")]
        ash::khr::portability_subset::NAME,
    ]
}

/// Create the logical device with one queue per unique family.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: QueueFamilies,
) -> Result<ash::Device> {
    let mut unique_families = std::collections::HashSet::new();
    unique_families.insert(families.generic);
    unique_families.insert(families.present);
    unique_families.insert(families.transfer);
    unique_families.insert(families.compute);

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extensions = required_device_extensions();
    let extension_names: Vec<*const i8> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(true)
        .wide_lines(true);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    // A typical discrete GPU family table: one all-purpose family, one
    // compute-only, one transfer-only.
    fn discrete_families() -> Vec<vk::QueueFamilyProperties> {
        vec![
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ]
    }

    #[test]
    fn generic_family_needs_graphics_and_compute() {
        let families = vec![
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let picked =
            select_queue_families(&families, RendererOptions::empty(), |_| false).unwrap();
        assert_eq!(picked.generic, 1);
    }

    #[test]
    fn no_generic_family_is_an_error() {
        let families = vec![family(vk::QueueFlags::TRANSFER)];
        assert!(select_queue_families(&families, RendererOptions::empty(), |_| false).is_err());
    }

    #[test]
    fn roles_collapse_onto_generic_without_options() {
        let picked =
            select_queue_families(&discrete_families(), RendererOptions::empty(), |_| false)
                .unwrap();
        assert_eq!(picked.generic, 0);
        assert_eq!(picked.transfer, 0);
        assert_eq!(picked.compute, 0);
        assert_eq!(picked.present, 0);
    }

    #[test]
    fn standalone_options_pick_dedicated_families() {
        let options =
            RendererOptions::STANDALONE_TRANSFER_QUEUE | RendererOptions::STANDALONE_COMPUTE_QUEUE;
        let picked = select_queue_families(&discrete_families(), options, |_| false).unwrap();
        assert_eq!(picked.compute, 1);
        assert_eq!(picked.transfer, 2);
    }

    #[test]
    fn standalone_option_falls_back_when_no_dedicated_family() {
        let families = vec![family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let options =
            RendererOptions::STANDALONE_TRANSFER_QUEUE | RendererOptions::STANDALONE_COMPUTE_QUEUE;
        let picked = select_queue_families(&families, options, |_| false).unwrap();
        assert_eq!(picked.transfer, 0);
        assert_eq!(picked.compute, 0);
    }

    #[test]
    fn present_uses_first_capable_family() {
        let picked =
            select_queue_families(&discrete_families(), RendererOptions::empty(), |i| i == 1)
                .unwrap();
        assert_eq!(picked.present, 1);
    }

    #[test]
    fn present_falls_back_to_generic() {
        let picked =
            select_queue_families(&discrete_families(), RendererOptions::empty(), |_| false)
                .unwrap();
        assert_eq!(picked.present, picked.generic);
    }

    fn queue(family: u32, mutex: Arc<Mutex<()>>) -> Queue {
        Queue {
            handle: vk::Queue::null(),
            family,
            submit_mutex: mutex,
        }
    }

    #[test]
    fn roles_on_one_family_share_the_submit_lock() {
        let mutex = Arc::new(Mutex::new(()));
        let generic = queue(0, mutex.clone());
        let present_same = queue(0, mutex);
        let present_other = queue(1, Arc::new(Mutex::new(())));

        assert!(generic.shares_submit_lock(&present_same));
        assert!(!generic.shares_submit_lock(&present_other));
    }
}
