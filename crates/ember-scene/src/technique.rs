//! Render techniques: pipeline plus descriptor layout for a shape family.

use ash::vk;
use ember_core::Vertex;
use ember_gpu::{
    DescriptorPool, DescriptorSetLayoutBuilder, GpuContext, GraphicsPipeline,
    GraphicsPipelineConfig, Result,
};

use crate::binding::FIRST_USER_BINDING;

/// Technique configuration.
pub struct TechniqueConfig {
    pub vertex_shader: Vec<u32>,
    pub fragment_shader: Vec<u32>,
    /// Number of combined image sampler bindings following the two
    /// reserved uniform slots.
    pub texture_bindings: u32,
    pub samples: vk::SampleCountFlags,
    /// Upper bound of descriptor sets live at once.
    pub max_sets: u32,
}

impl Default for TechniqueConfig {
    fn default() -> Self {
        Self {
            vertex_shader: Vec::new(),
            fragment_shader: Vec::new(),
            texture_bindings: 0,
            samples: vk::SampleCountFlags::TYPE_1,
            max_sets: 256,
        }
    }
}

/// A pipeline and the descriptor machinery renderables bind through.
///
/// The descriptor layout is fixed: binding 0 is the view uniform, binding
/// 1 the model uniform, bindings 2.. the technique's textures.
pub struct RenderTechnique {
    descriptor_layout: vk::DescriptorSetLayout,
    pipeline: GraphicsPipeline,
    pool: DescriptorPool,
}

impl RenderTechnique {
    /// Build the technique against a render pass.
    ///
    /// # Safety
    /// The GPU context and render pass must be valid.
    pub unsafe fn new(
        gpu: &GpuContext,
        render_pass: vk::RenderPass,
        config: TechniqueConfig,
    ) -> Result<Self> {
        let mut layout_builder = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .uniform_buffer(1, vk::ShaderStageFlags::VERTEX);
        for i in 0..config.texture_bindings {
            layout_builder =
                layout_builder.sampled_image(FIRST_USER_BINDING + i, vk::ShaderStageFlags::FRAGMENT);
        }
        let descriptor_layout = layout_builder.build(gpu.device())?;

        let mut pool_sizes = vec![vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 2 * config.max_sets,
        }];
        if config.texture_bindings > 0 {
            pool_sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: config.texture_bindings * config.max_sets,
            });
        }
        let pool = DescriptorPool::new(gpu.device(), config.max_sets, &pool_sizes)?;

        let pipeline_config = GraphicsPipelineConfig {
            vertex_shader: config.vertex_shader,
            fragment_shader: config.fragment_shader,
            vertex_bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: Vertex::STRIDE,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            vertex_attributes: vec![
                vk::VertexInputAttributeDescription {
                    location: 0,
                    binding: 0,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: 0,
                },
                vk::VertexInputAttributeDescription {
                    location: 1,
                    binding: 0,
                    format: vk::Format::R32G32B32A32_SFLOAT,
                    offset: Vertex::COLOR_OFFSET,
                },
                vk::VertexInputAttributeDescription {
                    location: 2,
                    binding: 0,
                    format: vk::Format::R32G32_SFLOAT,
                    offset: Vertex::TEXCOORD_OFFSET,
                },
            ],
            samples: config.samples,
            ..GraphicsPipelineConfig::default()
        };

        let layouts = [descriptor_layout];
        let pipeline = match GraphicsPipeline::new(
            gpu.device(),
            &pipeline_config,
            render_pass,
            &layouts,
            &[],
        ) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                pool.destroy(gpu.device());
                gpu.device()
                    .destroy_descriptor_set_layout(descriptor_layout, None);
                return Err(err);
            }
        };

        Ok(Self {
            descriptor_layout,
            pipeline,
            pool,
        })
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline.pipeline
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline.layout
    }

    pub fn descriptor_layout(&self) -> vk::DescriptorSetLayout {
        self.descriptor_layout
    }

    pub(crate) fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// Bind the pipeline and a view's viewport/scissor.
    ///
    /// # Safety
    /// The command buffer must be recording inside the technique's render
    /// pass.
    pub unsafe fn bind(
        &self,
        gpu: &GpuContext,
        cmd: vk::CommandBuffer,
        viewport: vk::Viewport,
        scissor: vk::Rect2D,
    ) {
        let device = gpu.device();
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline());
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[scissor]);
    }

    /// Destroy the technique.
    ///
    /// # Safety
    /// No descriptor set from this technique may be in use.
    pub unsafe fn destroy(self, gpu: &GpuContext) {
        self.pipeline.destroy(gpu.device());
        self.pool.destroy(gpu.device());
        gpu.device()
            .destroy_descriptor_set_layout(self.descriptor_layout, None);
    }
}
