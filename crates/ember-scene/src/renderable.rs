//! Renderables: geometry, transform and per-view descriptor cache.

use ash::vk;
use ember_core::{ModelUniform, Transform2d};
use ember_gpu::{
    write_sampled_image, write_uniform_buffer, GpuBuffer, GpuContext, HeapClass, Result,
};
use hashbrown::HashMap;

use crate::binding::{Binding, BindingSet};
use crate::resource::UniformBuffer;
use crate::shape::Shape;
use crate::technique::RenderTechnique;
use crate::view::{View, ViewId};

/// Whether a renderable's descriptor set for a view must be (re)built.
///
/// Rebuild when the cache has no entry for the view, or when either side
/// has flagged a descriptor-affecting change.
pub fn needs_rebuild(has_entry: bool, resource_dirty: bool, view_dirty: bool) -> bool {
    !has_entry || resource_dirty || view_dirty
}

/// A drawable object: geometry buffers, a 2D transform and the descriptor
/// sets binding it to each view it is drawn through.
pub struct Renderable {
    transform: Transform2d,
    model_buffer: UniformBuffer<ModelUniform>,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
    bindings: BindingSet,
    needs_descriptor_update: bool,
    descriptors: HashMap<ViewId, vk::DescriptorSet>,
}

impl Renderable {
    /// Create a renderable from a shape.
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn new(gpu: &GpuContext, shape: &Shape) -> Result<Self> {
        let vertices = shape.vertices();
        let indices = shape.indices();

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let vertex_buffer = GpuBuffer::new(
            gpu.device(),
            gpu.allocator(),
            vertex_bytes.len() as u64,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            HeapClass::DeviceShared,
        )?;
        vertex_buffer.chunk.write_bytes(0, vertex_bytes)?;

        let index_bytes: &[u8] = bytemuck::cast_slice(&indices);
        let index_buffer = match GpuBuffer::new(
            gpu.device(),
            gpu.allocator(),
            index_bytes.len() as u64,
            vk::BufferUsageFlags::INDEX_BUFFER,
            HeapClass::DeviceShared,
        ) {
            Ok(buffer) => buffer,
            Err(err) => {
                vertex_buffer.destroy(gpu.device(), gpu.allocator());
                return Err(err);
            }
        };
        index_buffer.chunk.write_bytes(0, index_bytes)?;

        let model_buffer = match UniformBuffer::new(gpu) {
            Ok(buffer) => buffer,
            Err(err) => {
                vertex_buffer.destroy(gpu.device(), gpu.allocator());
                index_buffer.destroy(gpu.device(), gpu.allocator());
                return Err(err);
            }
        };

        Ok(Self {
            transform: Transform2d::default(),
            model_buffer,
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            bindings: BindingSet::new(),
            needs_descriptor_update: false,
            descriptors: HashMap::new(),
        })
    }

    pub fn transform(&self) -> &Transform2d {
        &self.transform
    }

    /// Mutate the transform; the change reaches the GPU on the next
    /// `upload`.
    pub fn transform_mut(&mut self) -> &mut Transform2d {
        &mut self.transform
    }

    /// Attach a user binding. Descriptor sets are rebuilt on the next
    /// `bind_to_view`.
    pub fn add_binding(&mut self, index: u32, binding: Binding) {
        self.bindings.add(index, binding);
        self.needs_descriptor_update = true;
    }

    /// Replace an existing user binding.
    pub fn set_binding(&mut self, index: u32, binding: Binding) {
        self.bindings.replace(index, binding);
        self.needs_descriptor_update = true;
    }

    pub fn needs_descriptor_update(&self) -> bool {
        self.needs_descriptor_update
    }

    /// Write the model uniform if the transform changed since the last
    /// call. At most one GPU write per change batch.
    pub fn upload(&mut self) -> Result<()> {
        if let Some(uniform) = self.transform.take_upload() {
            self.model_buffer.write(&uniform)?;
        }
        Ok(())
    }

    /// Look up or build the descriptor set binding this renderable to
    /// `view`. Slot order is fixed: 0 view uniform, 1 model uniform, 2..
    /// user bindings.
    ///
    /// The view's own dirty flag is left for the caller to clear once all
    /// dependents are rebound.
    ///
    /// # Safety
    /// The GPU context and technique must be valid.
    pub unsafe fn bind_to_view(
        &mut self,
        gpu: &GpuContext,
        technique: &RenderTechnique,
        view: &View,
    ) -> Result<vk::DescriptorSet> {
        let has_entry = self.descriptors.contains_key(&view.id());

        if needs_rebuild(
            has_entry,
            self.needs_descriptor_update,
            view.needs_descriptor_update(),
        ) {
            let set = match self.descriptors.get(&view.id()) {
                Some(&set) => set,
                None => {
                    let layouts = [technique.descriptor_layout()];
                    let sets = technique.pool().allocate(gpu.device(), &layouts)?;
                    self.descriptors.insert(view.id(), sets[0]);
                    sets[0]
                }
            };

            write_uniform_buffer(
                gpu.device(),
                set,
                0,
                view.uniform().handle(),
                0,
                view.uniform().range(),
            );
            write_uniform_buffer(
                gpu.device(),
                set,
                1,
                self.model_buffer.handle(),
                0,
                self.model_buffer.range(),
            );
            for (index, binding) in self.bindings.iter_ordered() {
                match *binding {
                    Binding::Texture { view, sampler } => write_sampled_image(
                        gpu.device(),
                        set,
                        index,
                        view,
                        sampler,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    ),
                    Binding::Uniform {
                        buffer,
                        offset,
                        range,
                    } => write_uniform_buffer(gpu.device(), set, index, buffer, offset, range),
                }
            }

            self.needs_descriptor_update = false;
        }

        Ok(self.descriptors[&view.id()])
    }

    /// Record the draw. The pipeline must already be bound; this only
    /// guarantees the right descriptor set is bound first.
    ///
    /// Panics if `bind_to_view` was never called for this view.
    ///
    /// # Safety
    /// The command buffer must be recording inside the technique's render
    /// pass.
    pub unsafe fn draw(
        &self,
        gpu: &GpuContext,
        cmd: vk::CommandBuffer,
        technique: &RenderTechnique,
        view: &View,
    ) {
        let set = *self
            .descriptors
            .get(&view.id())
            .expect("renderable drawn without a descriptor set for this view");

        let device = gpu.device();
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            technique.pipeline_layout(),
            0,
            &[set],
            &[],
        );
        device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
        device.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, vk::IndexType::UINT32);
        device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
    }

    /// Destroy the renderable's GPU resources.
    ///
    /// # Safety
    /// The renderable must not be in use by the GPU.
    pub unsafe fn destroy(mut self, gpu: &GpuContext, technique: &RenderTechnique) -> Result<()> {
        let sets: Vec<vk::DescriptorSet> = self.descriptors.drain().map(|(_, set)| set).collect();
        if !sets.is_empty() {
            technique.pool().free(gpu.device(), &sets)?;
        }
        self.model_buffer.destroy(gpu);
        self.vertex_buffer.destroy(gpu.device(), gpu.allocator());
        self.index_buffer.destroy(gpu.device(), gpu.allocator());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_entry_always_rebuilds() {
        assert!(needs_rebuild(false, false, false));
        assert!(needs_rebuild(false, true, true));
    }

    #[test]
    fn clean_entry_is_reused() {
        assert!(!needs_rebuild(true, false, false));
    }

    #[test]
    fn either_side_dirty_forces_rebuild() {
        assert!(needs_rebuild(true, true, false));
        assert!(needs_rebuild(true, false, true));
    }
}
