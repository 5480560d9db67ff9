//! Vulkan instance creation and physical device description.

use crate::error::{GpuError, Result};
use ash::vk;
use std::collections::HashSet;
use std::ffi::{CStr, CString};

/// Required instance extensions for the engine.
pub fn required_instance_extensions() -> Vec<&'static CStr> {
    let extensions = vec![
        ash::khr::surface::NAME,
        #[cfg(target_os = "windows")]
        ash::khr::win32_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::xlib_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::wayland_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::ext::metal_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::khr::portability_enumeration::NAME,
    ];

    extensions
}

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a Vulkan instance.
///
/// Unavailable layers are dropped with a diagnostic, never fatal.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|_| GpuError::InvalidState("Application name contains NUL".to_string()))?;
    let engine_name = c"Ember";

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let extension_names: Vec<*const i8> = required_instance_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let requested_layers = if enable_validation {
        validation_layers()
    } else {
        vec![]
    };

    // Graceful degradation: filter out layers the loader does not report.
    let available_layers = entry.enumerate_instance_layer_properties()?;
    let layers: Vec<&CStr> = requested_layers
        .into_iter()
        .filter(|layer| {
            let found = available_layers
                .iter()
                .any(|props| unsafe { CStr::from_ptr(props.layer_name.as_ptr()) } == *layer);
            if !found {
                tracing::warn!("Instance layer {:?} not available, dropping", layer);
            }
            found
        })
        .collect();

    let layer_names: Vec<*const i8> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;

    Ok(instance)
}

/// Memory budget per heap class, in bytes.
///
/// Classes follow how a memory type can be reached: `device_local` is GPU-only
/// memory, `device_shared` is GPU memory visible from the host, `host_shared`
/// is system memory visible to the GPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryBudgets {
    pub device_local: u64,
    pub device_shared: u64,
    pub host_shared: u64,
}

impl MemoryBudgets {
    /// Classify memory types and sum the budgets of their backing heaps.
    pub fn from_properties(properties: &vk::PhysicalDeviceMemoryProperties) -> Self {
        let mut budgets = Self::default();
        let mut counted_heaps: [HashSet<u32>; 3] = Default::default();

        for memory_type in properties
            .memory_types
            .iter()
            .take(properties.memory_type_count as usize)
        {
            let device_local = memory_type
                .property_flags
                .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL);
            let host_visible = memory_type
                .property_flags
                .contains(vk::MemoryPropertyFlags::HOST_VISIBLE);

            let class = match (device_local, host_visible) {
                (true, true) => 1,
                (true, false) => 0,
                (false, true) => 2,
                (false, false) => continue,
            };

            // A heap may back several types of the same class; count it once.
            if counted_heaps[class].insert(memory_type.heap_index) {
                let size = properties.memory_heaps[memory_type.heap_index as usize].size;
                match class {
                    0 => budgets.device_local += size,
                    1 => budgets.device_shared += size,
                    _ => budgets.host_shared += size,
                }
            }
        }

        budgets
    }
}

/// Host-visible description of a physical device. Immutable once queried.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    /// Device name.
    pub name: String,
    /// PCI vendor id.
    pub vendor_id: u32,
    /// Vulkan API version.
    pub api_version: u32,
    /// Device type (discrete, integrated, ...).
    pub device_type: vk::PhysicalDeviceType,
    /// Memory budgets per heap class.
    pub memory: MemoryBudgets,
    /// Queue family properties, in family-index order.
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Device extensions reported by the driver.
    pub available_extensions: HashSet<String>,
    /// Device layers reported by the driver.
    pub available_layers: HashSet<String>,
}

impl PhysicalDeviceInfo {
    /// Query the description of a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);
        let queue_families =
            instance.get_physical_device_queue_family_properties(physical_device);

        let available_extensions: HashSet<String> = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default()
            .iter()
            .filter_map(|ext| {
                unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let available_layers: HashSet<String> = instance
            .enumerate_device_layer_properties(physical_device)
            .unwrap_or_default()
            .iter()
            .filter_map(|layer| {
                unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        Self {
            name,
            vendor_id: properties.vendor_id,
            api_version: properties.api_version,
            device_type: properties.device_type,
            memory: MemoryBudgets::from_properties(&memory_properties),
            queue_families,
            available_extensions,
            available_layers,
        }
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "{} - Vulkan {}.{}.{} - {} MB device local",
            self.name,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.memory.device_local / (1024 * 1024),
        )
    }
}

/// Select the best physical device.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
    let devices = instance.enumerate_physical_devices()?;

    if devices.is_empty() {
        return Err(GpuError::NoSuitableDevice);
    }

    let mut best_device = None;
    let mut best_score = 0i64;

    for device in devices {
        let score = score_physical_device(instance, device);
        if score > best_score {
            best_score = score;
            best_device = Some(device);
        }
    }

    best_device.ok_or(GpuError::NoSuitableDevice)
}

/// Score a physical device for selection.
unsafe fn score_physical_device(instance: &ash::Instance, device: vk::PhysicalDevice) -> i64 {
    let properties = instance.get_physical_device_properties(device);

    let api_version = properties.api_version;
    if vk::api_version_major(api_version) < 1
        || (vk::api_version_major(api_version) == 1 && vk::api_version_minor(api_version) < 1)
    {
        return -1;
    }

    let mut score = 0i64;

    // Prefer discrete GPUs
    match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => score += 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => score += 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => score += 50,
        _ => {}
    }

    // Prefer more VRAM, +1 per GB
    let memory = instance.get_physical_device_memory_properties(device);
    let budgets = MemoryBudgets::from_properties(&memory);
    score += (budgets.device_local / (1024 * 1024 * 1024)) as i64;

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(
        heaps: &[(u64, vk::MemoryHeapFlags)],
        types: &[(u32, vk::MemoryPropertyFlags)],
    ) -> vk::PhysicalDeviceMemoryProperties {
        let mut out = vk::PhysicalDeviceMemoryProperties::default();
        out.memory_heap_count = heaps.len() as u32;
        for (i, &(size, flags)) in heaps.iter().enumerate() {
            out.memory_heaps[i] = vk::MemoryHeap { size, flags };
        }
        out.memory_type_count = types.len() as u32;
        for (i, &(heap_index, property_flags)) in types.iter().enumerate() {
            out.memory_types[i] = vk::MemoryType {
                property_flags,
                heap_index,
            };
        }
        out
    }

    #[test]
    fn budgets_classify_memory_types() {
        // Typical discrete layout: a big device-local heap with a small
        // host-visible window, plus system memory.
        let props = properties(
            &[
                (8 << 30, vk::MemoryHeapFlags::DEVICE_LOCAL),
                (16 << 30, vk::MemoryHeapFlags::empty()),
                (256 << 20, vk::MemoryHeapFlags::DEVICE_LOCAL),
            ],
            &[
                (0, vk::MemoryPropertyFlags::DEVICE_LOCAL),
                (
                    1,
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                ),
                (
                    2,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
                ),
            ],
        );

        let budgets = MemoryBudgets::from_properties(&props);
        assert_eq!(budgets.device_local, 8 << 30);
        assert_eq!(budgets.host_shared, 16 << 30);
        assert_eq!(budgets.device_shared, 256 << 20);
    }

    #[test]
    fn budgets_count_each_heap_once_per_class() {
        // Two memory types of the same class backed by the same heap.
        let props = properties(
            &[(4 << 30, vk::MemoryHeapFlags::DEVICE_LOCAL)],
            &[
                (0, vk::MemoryPropertyFlags::DEVICE_LOCAL),
                (0, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            ],
        );

        let budgets = MemoryBudgets::from_properties(&props);
        assert_eq!(budgets.device_local, 4 << 30);
    }
}
