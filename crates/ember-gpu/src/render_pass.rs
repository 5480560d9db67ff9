//! Render pass construction.
//!
//! The attachment layout is derived up front as plain data, then turned
//! into a `vk::RenderPass`. Deriving it separately keeps the index and
//! store/layout rules testable without a device.

use crate::error::Result;
use ash::vk;

/// One attachment of the render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDesc {
    /// Attachment index inside the render pass.
    pub index: u32,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub final_layout: vk::ImageLayout,
}

/// Derived attachment set for a presentation render pass.
///
/// Color is always present at index 0. Depth follows at index 1 when a
/// depth format is configured. With multisampling the color attachment is
/// the MSAA target and a single-sample resolve attachment is appended,
/// taking the next free index; presentation then reads the resolve image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentLayout {
    pub color: AttachmentDesc,
    pub depth: Option<AttachmentDesc>,
    pub resolve: Option<AttachmentDesc>,
}

impl AttachmentLayout {
    pub fn derive(
        color_format: vk::Format,
        depth_format: Option<vk::Format>,
        samples: vk::SampleCountFlags,
    ) -> Self {
        let multisampled = samples != vk::SampleCountFlags::TYPE_1;

        let color = AttachmentDesc {
            index: 0,
            format: color_format,
            samples,
            load_op: vk::AttachmentLoadOp::CLEAR,
            // The MSAA target is transient; only the resolve output survives.
            store_op: if multisampled {
                vk::AttachmentStoreOp::DONT_CARE
            } else {
                vk::AttachmentStoreOp::STORE
            },
            final_layout: if multisampled {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::PRESENT_SRC_KHR
            },
        };

        let depth = depth_format.map(|format| AttachmentDesc {
            index: 1,
            format,
            samples,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        });

        let resolve = multisampled.then(|| AttachmentDesc {
            index: if depth.is_some() { 2 } else { 1 },
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::DONT_CARE,
            store_op: vk::AttachmentStoreOp::STORE,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        });

        Self {
            color,
            depth,
            resolve,
        }
    }

    /// Total number of attachments.
    pub fn count(&self) -> u32 {
        1 + u32::from(self.depth.is_some()) + u32::from(self.resolve.is_some())
    }

    fn descriptions(&self) -> Vec<vk::AttachmentDescription> {
        let describe = |a: &AttachmentDesc| {
            vk::AttachmentDescription::default()
                .format(a.format)
                .samples(a.samples)
                .load_op(a.load_op)
                .store_op(a.store_op)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(a.final_layout)
        };

        let mut out = vec![describe(&self.color)];
        if let Some(depth) = &self.depth {
            out.push(describe(depth));
        }
        if let Some(resolve) = &self.resolve {
            out.push(describe(resolve));
        }
        out
    }
}

/// Create a single-subpass render pass from a derived layout.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_render_pass(
    device: &ash::Device,
    layout: &AttachmentLayout,
) -> Result<vk::RenderPass> {
    let attachments = layout.descriptions();

    let color_ref = [vk::AttachmentReference::default()
        .attachment(layout.color.index)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

    let depth_ref = layout.depth.map(|depth| {
        vk::AttachmentReference::default()
            .attachment(depth.index)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
    });

    let resolve_ref = layout.resolve.map(|resolve| {
        [vk::AttachmentReference::default()
            .attachment(resolve.index)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)]
    });

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_ref);

    if let Some(depth_ref) = &depth_ref {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }
    if let Some(resolve_ref) = &resolve_ref {
        subpass = subpass.resolve_attachments(resolve_ref);
    }

    let mut stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let mut access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    if layout.depth.is_some() {
        stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }

    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(stages)
        .dst_access_mask(access)];

    let subpasses = [subpass];
    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    let render_pass = device.create_render_pass(&create_info, None)?;
    Ok(render_pass)
}

/// Create one framebuffer per swapchain view, with attachment views
/// ordered to match the layout's indices.
///
/// With multisampling `color_view` is the MSAA target and the swapchain
/// view becomes the resolve attachment; otherwise the swapchain view is
/// the color attachment itself.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn create_framebuffers(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: &AttachmentLayout,
    swapchain_views: &[vk::ImageView],
    color_view: Option<vk::ImageView>,
    depth_view: Option<vk::ImageView>,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(swapchain_views.len());

    for &swapchain_view in swapchain_views {
        let mut views: Vec<vk::ImageView> = Vec::with_capacity(layout.count() as usize);

        if layout.resolve.is_some() {
            views.push(color_view.ok_or_else(|| {
                crate::error::GpuError::InvalidState(
                    "Multisampled pass needs a color target".to_string(),
                )
            })?);
        } else {
            views.push(swapchain_view);
        }
        if layout.depth.is_some() {
            views.push(depth_view.ok_or_else(|| {
                crate::error::GpuError::InvalidState(
                    "Depth pass needs a depth target".to_string(),
                )
            })?);
        }
        if layout.resolve.is_some() {
            views.push(swapchain_view);
        }

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        framebuffers.push(device.create_framebuffer(&create_info, None)?);
    }

    Ok(framebuffers)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLOR: vk::Format = vk::Format::B8G8R8A8_SRGB;
    const DEPTH: vk::Format = vk::Format::D32_SFLOAT;

    #[test]
    fn single_sample_color_only() {
        let layout = AttachmentLayout::derive(COLOR, None, vk::SampleCountFlags::TYPE_1);

        assert_eq!(layout.count(), 1);
        assert_eq!(layout.color.index, 0);
        assert_eq!(layout.color.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(layout.color.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert!(layout.depth.is_none());
        assert!(layout.resolve.is_none());
    }

    #[test]
    fn depth_takes_index_one() {
        let layout = AttachmentLayout::derive(COLOR, Some(DEPTH), vk::SampleCountFlags::TYPE_1);

        let depth = layout.depth.unwrap();
        assert_eq!(layout.count(), 2);
        assert_eq!(depth.index, 1);
        assert_eq!(depth.format, DEPTH);
        assert_eq!(
            depth.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn multisampling_redirects_presentation_to_resolve() {
        let layout = AttachmentLayout::derive(COLOR, None, vk::SampleCountFlags::TYPE_4);

        // MSAA target is transient.
        assert_eq!(layout.color.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(
            layout.color.final_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );

        let resolve = layout.resolve.unwrap();
        assert_eq!(resolve.index, 1);
        assert_eq!(resolve.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(resolve.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(resolve.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn resolve_follows_depth_when_both_present() {
        let layout = AttachmentLayout::derive(COLOR, Some(DEPTH), vk::SampleCountFlags::TYPE_4);

        assert_eq!(layout.count(), 3);
        assert_eq!(layout.depth.unwrap().index, 1);
        assert_eq!(layout.resolve.unwrap().index, 2);
    }

    #[test]
    fn depth_samples_match_color_samples() {
        let layout = AttachmentLayout::derive(COLOR, Some(DEPTH), vk::SampleCountFlags::TYPE_8);
        assert_eq!(layout.depth.unwrap().samples, vk::SampleCountFlags::TYPE_8);
    }
}
