//! Presentable render target.
//!
//! Owns the surface, swapchain, render pass and frame slot ring for one
//! window, and drives the begin/present frame protocol.

use crate::command::{begin_command_buffer, end_command_buffer, submit_command_buffers};
use crate::device::GpuContext;
use crate::error::Result;
use crate::frame::{FrameSignal, FrameSlot};
use crate::memory::GpuImage;
use crate::render_pass::{create_framebuffers, create_render_pass, AttachmentLayout};
use crate::ring::FrameRing;
use crate::surface::Surface;
use crate::swapchain::{SurfaceStatus, Swapchain};
use ash::vk;

/// What a size change means for the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeAction {
    /// The surface has no area; stop rendering but keep resources.
    Disable,
    /// Rebuild the swapchain at the new size (re-enabling if disabled).
    Recreate,
    /// Nothing to do.
    Keep,
}

/// Decide how to react to a framebuffer size report.
///
/// A zero-sized surface (minimized window) disables rendering instead of
/// recreating in a loop; restoring to a usable size recreates exactly once.
pub fn resize_action(
    enabled: bool,
    current: vk::Extent2D,
    width: u32,
    height: u32,
) -> ResizeAction {
    if width == 0 || height == 0 {
        if enabled {
            ResizeAction::Disable
        } else {
            ResizeAction::Keep
        }
    } else if !enabled || current.width != width || current.height != height {
        ResizeAction::Recreate
    } else {
        ResizeAction::Keep
    }
}

/// How to handle one acquire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireAction {
    /// Render into the acquired image.
    Use(u32),
    /// Rebuild the swapchain and try once more.
    Recreate,
    /// Stop rendering on this target.
    Disable,
}

/// Decide how to react to an acquire result.
///
/// One recreation attempt is allowed per frame; a surface that is still
/// out of date afterwards disables rendering instead of busy-retrying.
/// A lost surface disables immediately.
pub fn acquire_action(
    image_index: Option<u32>,
    status: SurfaceStatus,
    already_recreated: bool,
) -> AcquireAction {
    match (image_index, status) {
        (Some(index), _) => AcquireAction::Use(index),
        (None, SurfaceStatus::OutOfDate) if !already_recreated => AcquireAction::Recreate,
        _ => AcquireAction::Disable,
    }
}

/// Render target configuration.
#[derive(Debug, Clone, Copy)]
pub struct TargetConfig {
    pub vsync: bool,
    pub samples: vk::SampleCountFlags,
    pub depth_format: Option<vk::Format>,
    pub clear_color: [f32; 4],
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            samples: vk::SampleCountFlags::TYPE_1,
            depth_format: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// A frame being recorded.
pub struct FrameContext {
    pub command_buffer: vk::CommandBuffer,
    pub image_index: u32,
    pub extent: vk::Extent2D,
}

/// Presentable render target for one window surface.
pub struct RenderTarget {
    surface: Surface,
    swapchain: Swapchain,
    config: TargetConfig,
    layout: AttachmentLayout,
    render_pass: vk::RenderPass,
    // MSAA color target; present only when multisampling.
    color_target: Option<GpuImage>,
    depth_target: Option<GpuImage>,
    framebuffers: Vec<vk::Framebuffer>,
    slots: Vec<FrameSlot>,
    ring: FrameRing,
    enabled: bool,
    current_image: Option<u32>,
}

impl RenderTarget {
    /// Create a render target over a window surface.
    ///
    /// # Safety
    /// The GPU context must be valid and the surface must belong to it.
    pub unsafe fn new(
        gpu: &GpuContext,
        surface: Surface,
        width: u32,
        height: u32,
        config: TargetConfig,
    ) -> Result<Self> {
        let swapchain = surface.create_swapchain(gpu, width, height, config.vsync, None)?;

        let layout =
            AttachmentLayout::derive(swapchain.format, config.depth_format, config.samples);
        let render_pass = create_render_pass(gpu.device(), &layout)?;

        let (color_target, depth_target) =
            create_attachment_targets(gpu, &layout, swapchain.extent)?;

        let framebuffers = create_framebuffers(
            gpu.device(),
            render_pass,
            &layout,
            &swapchain.image_views,
            color_target.as_ref().map(|t| t.view),
            depth_target.as_ref().map(|t| t.view),
            swapchain.extent,
        )?;

        let slot_count = swapchain.image_count();
        let mut slots = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            slots.push(FrameSlot::new(gpu.device(), gpu.queue_families().generic)?);
        }

        Ok(Self {
            surface,
            swapchain,
            config,
            layout,
            render_pass,
            color_target,
            depth_target,
            framebuffers,
            slots,
            ring: FrameRing::new(slot_count),
            enabled: true,
            current_image: None,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn format(&self) -> vk::Format {
        self.swapchain.format
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn sample_count(&self) -> vk::SampleCountFlags {
        self.config.samples
    }

    /// Register a callback fired when the frame currently being recorded
    /// has finished on the GPU.
    pub fn on_frame_complete(&mut self, signal: FrameSignal) {
        self.slots[self.ring.current()].add_signal(signal);
    }

    /// React to a framebuffer size report from the window.
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn resize(&mut self, gpu: &GpuContext, width: u32, height: u32) -> Result<()> {
        match resize_action(self.enabled, self.swapchain.extent, width, height) {
            ResizeAction::Disable => {
                tracing::debug!("Surface has no area, disabling rendering");
                self.enabled = false;
                Ok(())
            }
            ResizeAction::Recreate => {
                self.recreate(gpu, width, height)?;
                self.enabled = true;
                Ok(())
            }
            ResizeAction::Keep => Ok(()),
        }
    }

    /// Begin a frame: gate on the slot's fence, fire completion signals,
    /// recycle the pool, acquire an image and open the render pass.
    ///
    /// Returns `None` when rendering is disabled (no surface area or the
    /// surface was lost).
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn begin_frame(&mut self, gpu: &GpuContext) -> Result<Option<FrameContext>> {
        if !self.enabled {
            return Ok(None);
        }

        let device = gpu.device().clone();
        let slot_index = self.ring.current();

        if self.ring.needs_wait() {
            self.slots[slot_index].wait(&device)?;
            self.ring.observe_complete();
        }
        // Previous GPU work through this slot is done; notify observers.
        self.slots[slot_index].fire_signals();
        self.slots[slot_index].pool.reset(&device)?;

        // Acquire, recreating on out-of-date. One recreation attempt per
        // begin; a still-invalid surface disables rendering.
        let mut recreated = false;
        let image_index = loop {
            let acquire = self.swapchain.acquire_next_image(
                &self.surface.swapchain_loader,
                self.slots[self.ring.current()].image_available,
                u64::MAX,
            )?;

            match acquire_action(acquire.image_index, acquire.status, recreated) {
                AcquireAction::Use(index) => break index,
                AcquireAction::Recreate => {
                    let extent = self.surface.capabilities(gpu)?.capabilities.current_extent;
                    if extent.width == 0 || extent.height == 0 {
                        self.enabled = false;
                        return Ok(None);
                    }
                    self.recreate(gpu, extent.width, extent.height)?;
                    recreated = true;
                }
                AcquireAction::Disable => {
                    tracing::warn!(status = ?acquire.status, "Surface unusable, disabling rendering");
                    self.enabled = false;
                    return Ok(None);
                }
            }
        };

        let slot_index = self.ring.begin()?;
        let slot = &self.slots[slot_index];

        begin_command_buffer(
            &device,
            slot.command_buffer,
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        )?;

        let mut clear_values = vec![vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.config.clear_color,
            },
        }];
        if self.layout.depth.is_some() {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        }
        if self.layout.resolve.is_some() {
            clear_values.push(vk::ClearValue::default());
        }

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[image_index as usize])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: self.swapchain.extent,
            })
            .clear_values(&clear_values);

        device.cmd_begin_render_pass(slot.command_buffer, &begin_info, vk::SubpassContents::INLINE);

        self.current_image = Some(image_index);

        Ok(Some(FrameContext {
            command_buffer: slot.command_buffer,
            image_index,
            extent: self.swapchain.extent,
        }))
    }

    /// Finish the frame: close the render pass and command buffer, submit
    /// under the queue's submission lock, present, advance the ring.
    ///
    /// # Safety
    /// `begin_frame` must have returned a frame context.
    pub unsafe fn present(&mut self, gpu: &GpuContext) -> Result<SurfaceStatus> {
        let device = gpu.device().clone();
        let slot_index = self.ring.current();
        let slot = &self.slots[slot_index];

        let image_index = self.current_image.take().ok_or_else(|| {
            crate::error::GpuError::InvalidState("No frame in flight".to_string())
        })?;

        device.cmd_end_render_pass(slot.command_buffer);
        end_command_buffer(&device, slot.command_buffer)?;
        slot.reset_fence(&device)?;

        let status;
        {
            // All submissions and presents on a physical queue are
            // serialized by its mutex.
            let queue = gpu.generic_queue();
            let present_queue = gpu.present_queue();
            let _guard = queue.lock_submit();

            if let Err(err) = submit_command_buffers(
                &device,
                queue.handle(),
                &[slot.command_buffer],
                &[slot.image_available],
                &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                &[slot.image_presentable],
                slot.fence,
            ) {
                // Nothing was submitted; free the slot for the next frame.
                self.ring.abort();
                return Err(err);
            }

            // A distinct present queue has its own mutex; take it as well.
            let _present_guard = if present_queue.shares_submit_lock(queue) {
                None
            } else {
                Some(present_queue.lock_submit())
            };

            status = match self.swapchain.present(
                &self.surface.swapchain_loader,
                present_queue.handle(),
                image_index,
                &[slot.image_presentable],
            ) {
                Ok(status) => status,
                Err(err) => {
                    // The submit is already in flight; drain it so the
                    // slot can be released in a signaled-fence state.
                    let _ = slot.wait(&device);
                    self.ring.abort();
                    return Err(err);
                }
            };
        }

        // Work is on the queue; the ring may move to the next slot.
        self.ring.submit()?;

        match status {
            SurfaceStatus::OutOfDate => {
                let extent = self.surface.capabilities(gpu)?.capabilities.current_extent;
                if extent.width == 0 || extent.height == 0 {
                    self.enabled = false;
                } else {
                    self.recreate(gpu, extent.width, extent.height)?;
                }
            }
            SurfaceStatus::SurfaceLost => {
                self.enabled = false;
            }
            // Suboptimal is tolerated; the next resize event fixes it.
            SurfaceStatus::Valid | SurfaceStatus::Suboptimal => {}
        }

        Ok(status)
    }

    /// Abandon the frame begun by `begin_frame` without submitting. The
    /// ring does not advance and the slot is free for the next frame.
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn abort_frame(&mut self, gpu: &GpuContext) -> Result<()> {
        if self.current_image.take().is_some() {
            let device = gpu.device();
            let slot = &self.slots[self.ring.current()];
            device.cmd_end_render_pass(slot.command_buffer);
            end_command_buffer(device, slot.command_buffer)?;

            // The acquire left a pending signal on image_available; a
            // binary semaphore must be un-signaled before the next
            // acquire can use it. Drain it with an empty submit.
            slot.reset_fence(device)?;
            {
                let queue = gpu.generic_queue();
                let _guard = queue.lock_submit();
                submit_command_buffers(
                    device,
                    queue.handle(),
                    &[],
                    &[slot.image_available],
                    &[vk::PipelineStageFlags::TOP_OF_PIPE],
                    &[],
                    slot.fence,
                )?;
            }
            // Leave the slot with a signaled fence, as an idle slot has.
            slot.wait(device)?;

            self.ring.abort();
        }
        Ok(())
    }

    /// Wait for every slot's GPU work and fire pending completion signals.
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn wait_all(&mut self, gpu: &GpuContext) -> Result<()> {
        for slot in &self.slots {
            slot.wait(gpu.device())?;
        }
        self.ring.observe_all_complete();
        for slot in &mut self.slots {
            slot.fire_signals();
        }
        Ok(())
    }

    /// Rebuild the swapchain and everything derived from it, recycling the
    /// old swapchain handle.
    unsafe fn recreate(&mut self, gpu: &GpuContext, width: u32, height: u32) -> Result<()> {
        self.wait_all(gpu)?;

        let device = gpu.device().clone();

        for &framebuffer in &self.framebuffers {
            device.destroy_framebuffer(framebuffer, None);
        }
        self.framebuffers.clear();

        if let Some(target) = self.color_target.take() {
            target.destroy(&device, gpu.allocator());
        }
        if let Some(target) = self.depth_target.take() {
            target.destroy(&device, gpu.allocator());
        }

        // Hand the old handle to the driver so it can recycle resources.
        let placeholder = Swapchain {
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: self.swapchain.format,
            extent: self.swapchain.extent,
        };
        let old = std::mem::replace(&mut self.swapchain, placeholder);
        self.swapchain =
            self.surface
                .recreate_swapchain(gpu, old, width, height, self.config.vsync)?;

        let (color_target, depth_target) =
            create_attachment_targets(gpu, &self.layout, self.swapchain.extent)?;
        self.color_target = color_target;
        self.depth_target = depth_target;

        self.framebuffers = create_framebuffers(
            &device,
            self.render_pass,
            &self.layout,
            &self.swapchain.image_views,
            self.color_target.as_ref().map(|t| t.view),
            self.depth_target.as_ref().map(|t| t.view),
            self.swapchain.extent,
        )?;

        // The driver may change the image count across recreation.
        let slot_count = self.swapchain.image_count();
        if slot_count != self.slots.len() {
            tracing::debug!(
                old = self.slots.len(),
                new = slot_count,
                "Swapchain image count changed, rebuilding frame slots"
            );
            for slot in &mut self.slots {
                slot.destroy(&device);
            }
            self.slots.clear();
            for _ in 0..slot_count {
                self.slots
                    .push(FrameSlot::new(&device, gpu.queue_families().generic)?);
            }
            self.ring = FrameRing::new(slot_count);
        }

        Ok(())
    }

    /// Tear the target down.
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn destroy(mut self, gpu: &GpuContext) -> Result<()> {
        self.wait_all(gpu)?;

        let device = gpu.device().clone();

        for slot in &mut self.slots {
            slot.destroy(&device);
        }
        for &framebuffer in &self.framebuffers {
            device.destroy_framebuffer(framebuffer, None);
        }
        if let Some(target) = self.color_target.take() {
            target.destroy(&device, gpu.allocator());
        }
        if let Some(target) = self.depth_target.take() {
            target.destroy(&device, gpu.allocator());
        }
        device.destroy_render_pass(self.render_pass, None);
        self.swapchain.destroy(&device, &self.surface.swapchain_loader);
        self.surface.destroy();

        Ok(())
    }
}

/// Create the MSAA color target and depth target the layout calls for.
unsafe fn create_attachment_targets(
    gpu: &GpuContext,
    layout: &AttachmentLayout,
    extent: vk::Extent2D,
) -> Result<(Option<GpuImage>, Option<GpuImage>)> {
    let color = if layout.resolve.is_some() {
        Some(GpuImage::new(
            gpu.device(),
            gpu.allocator(),
            extent,
            layout.color.format,
            layout.color.samples,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            vk::ImageAspectFlags::COLOR,
        )?)
    } else {
        None
    };

    let depth = match &layout.depth {
        Some(depth) => Some(GpuImage::new(
            gpu.device(),
            gpu.allocator(),
            extent,
            depth.format,
            depth.samples,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?),
        None => None,
    };

    Ok((color, depth))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    #[test]
    fn zero_size_disables_once() {
        assert_eq!(resize_action(true, EXTENT, 0, 600), ResizeAction::Disable);
        // Already disabled: further zero-size reports do nothing.
        assert_eq!(resize_action(false, EXTENT, 0, 0), ResizeAction::Keep);
    }

    #[test]
    fn restore_from_minimize_recreates_once() {
        // Window restored to its previous size while disabled.
        assert_eq!(
            resize_action(false, EXTENT, EXTENT.width, EXTENT.height),
            ResizeAction::Recreate
        );
        // Once re-enabled at that size, nothing further happens.
        assert_eq!(
            resize_action(true, EXTENT, EXTENT.width, EXTENT.height),
            ResizeAction::Keep
        );
    }

    #[test]
    fn size_change_recreates() {
        assert_eq!(resize_action(true, EXTENT, 1024, 768), ResizeAction::Recreate);
    }

    #[test]
    fn out_of_date_acquire_recreates_only_once() {
        assert_eq!(
            acquire_action(None, SurfaceStatus::OutOfDate, false),
            AcquireAction::Recreate
        );
        // A surface that is still out of date after a rebuild disables
        // rendering instead of looping.
        assert_eq!(
            acquire_action(None, SurfaceStatus::OutOfDate, true),
            AcquireAction::Disable
        );
    }

    #[test]
    fn lost_surface_disables_immediately() {
        assert_eq!(
            acquire_action(None, SurfaceStatus::SurfaceLost, false),
            AcquireAction::Disable
        );
    }

    #[test]
    fn acquired_image_is_used_even_when_suboptimal() {
        assert_eq!(
            acquire_action(Some(2), SurfaceStatus::Suboptimal, false),
            AcquireAction::Use(2)
        );
        assert_eq!(
            acquire_action(Some(0), SurfaceStatus::Valid, true),
            AcquireAction::Use(0)
        );
    }
}
