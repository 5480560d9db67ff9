//! Views: camera, viewport and per-view uniform data.

use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use bytemuck::{Pod, Zeroable};
use ember_gpu::{GpuContext, Result};
use glam::{Mat4, Vec3, Vec4};

use crate::resource::UniformBuffer;

/// Stable identity of a view, used as the descriptor cache key.
///
/// Monotonic: identities are never reused, so a cache entry for a
/// destroyed view can never be mistaken for a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(u64);

impl ViewId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Per-view uniform block, laid out for std140.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ViewUniform {
    pub position: Vec4,
    pub view: Mat4,
    pub projection: Mat4,
}

/// A view over a render target: viewport/scissor, an orthographic camera
/// and the per-view uniform buffer.
pub struct View {
    id: ViewId,
    viewport: vk::Viewport,
    scissor: vk::Rect2D,
    position: Vec3,
    origin: Vec3,
    scale: f32,
    rotation: f32,
    z_near: f32,
    z_far: f32,
    needs_upload: bool,
    needs_descriptor_update: bool,
    buffer: UniformBuffer<ViewUniform>,
}

impl View {
    /// Create a view covering a `width` by `height` target.
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn new(gpu: &GpuContext, width: u32, height: u32) -> Result<Self> {
        Ok(Self {
            id: ViewId::next(),
            viewport: vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: width as f32,
                height: height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
            scissor: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D { width, height },
            },
            position: Vec3::ZERO,
            origin: Vec3::ZERO,
            scale: 1.0,
            rotation: 0.0,
            z_near: 0.0,
            z_far: 1.0,
            needs_upload: true,
            needs_descriptor_update: true,
            buffer: UniformBuffer::new(gpu)?,
        })
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn viewport(&self) -> vk::Viewport {
        self.viewport
    }

    pub fn scissor(&self) -> vk::Rect2D {
        self.scissor
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Whether descriptor sets referencing this view must be rebuilt.
    pub fn needs_descriptor_update(&self) -> bool {
        self.needs_descriptor_update
    }

    /// Clear the descriptor flag once every dependent renderable has been
    /// rebound this frame.
    pub fn mark_descriptors_clean(&mut self) {
        self.needs_descriptor_update = false;
    }

    /// The uniform buffer bound at slot 0 of every dependent descriptor
    /// set.
    pub(crate) fn uniform(&self) -> &UniformBuffer<ViewUniform> {
        &self.buffer
    }

    pub fn move_to(&mut self, position: Vec3) {
        self.position = position;
        self.needs_upload = true;
    }

    pub fn move_by(&mut self, offset: Vec3) {
        self.position += offset;
        self.needs_upload = true;
    }

    pub fn set_origin(&mut self, origin: Vec3) {
        self.origin = origin;
        self.needs_upload = true;
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
        self.needs_upload = true;
    }

    pub fn set_rotation(&mut self, rotation: f32) {
        self.rotation = rotation % std::f32::consts::TAU;
        self.needs_upload = true;
    }

    pub fn set_depth_range(&mut self, z_near: f32, z_far: f32) {
        self.z_near = z_near;
        self.z_far = z_far;
        self.needs_upload = true;
    }

    /// Resize the view to track its target.
    pub fn fit(&mut self, width: u32, height: u32) {
        self.viewport.width = width as f32;
        self.viewport.height = height as f32;
        self.scissor.extent = vk::Extent2D { width, height };
        self.needs_upload = true;
    }

    /// Compute the uniform block for the current camera state.
    pub fn compute_uniform(&self) -> ViewUniform {
        let eye = self.position - self.origin;
        let view = Mat4::from_rotation_z(-self.rotation) * Mat4::from_translation(-eye);

        let projection = Mat4::orthographic_rh(
            0.0,
            self.viewport.width * self.scale,
            0.0,
            self.viewport.height * self.scale,
            self.z_near,
            self.z_far,
        );

        ViewUniform {
            position: self.position.extend(1.0),
            view,
            projection,
        }
    }

    /// Write the uniform block if the camera changed since the last call.
    pub fn upload(&mut self) -> Result<()> {
        if self.needs_upload {
            self.buffer.write(&self.compute_uniform())?;
            self.needs_upload = false;
        }
        Ok(())
    }

    /// Destroy the view's GPU resources.
    ///
    /// # Safety
    /// The view's uniform buffer must not be in use by the GPU.
    pub unsafe fn destroy(self, gpu: &GpuContext) {
        self.buffer.destroy(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn view_ids_are_unique() {
        let a = ViewId::next();
        let b = ViewId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn identity_camera_projects_top_left_to_clip_corner() {
        // Build the uniform math directly; no device needed.
        let projection = Mat4::orthographic_rh(0.0, 800.0, 0.0, 600.0, 0.0, 1.0);
        let corner = projection * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(corner.x, -1.0);
        let center = projection * Vec4::new(400.0, 300.0, 0.0, 1.0);
        assert_relative_eq!(center.x, 0.0);
        assert_relative_eq!(center.y, 0.0);
    }
}
