//! Vulkan abstraction layer for the Ember engine.
//!
//! This crate provides:
//! - Vulkan instance and device management with per-role queues
//! - Tiered GPU memory allocation
//! - Surface, swapchain and render target handling
//! - The per-frame slot ring and submission protocol
//! - Staged host-to-device transfers

pub mod command;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod render_pass;
pub mod ring;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod target;
pub mod transfer;

pub use descriptors::{
    write_sampled_image, write_uniform_buffer, DescriptorPool, DescriptorSetLayoutBuilder,
};
pub use device::{GpuContext, GpuContextBuilder, Queue, QueueFamilies, RendererOptions};
pub use error::{GpuError, Result};
pub use frame::{FrameSignal, FrameSlot};
pub use instance::{MemoryBudgets, PhysicalDeviceInfo};
pub use memory::{Chunk, GpuBuffer, GpuImage, HeapClass, HeapSizes, MemoryAllocator, MemoryUsage};
pub use pipeline::{GraphicsPipeline, GraphicsPipelineConfig};
pub use render_pass::{AttachmentDesc, AttachmentLayout};
pub use ring::{FrameRing, SlotState};
pub use surface::{Surface, SurfaceCapabilities};
pub use swapchain::{Acquire, SurfaceStatus, Swapchain};
pub use target::{resize_action, FrameContext, RenderTarget, ResizeAction, TargetConfig};
pub use transfer::TransferScheduler;
