use ash::vk;

use crate::gpu::{CommandEncoder, GpuDevice, PassPipeline, PipelineDesc, ShaderProgram};
use crate::{AshError, Result};

use super::geometry::FULLSCREEN_VERTICES;

/// A single full-screen triangle reading the global set and one image set.
pub struct FullscreenPass {
    program: ShaderProgram,
    pipeline: Option<PassPipeline>,
}

impl FullscreenPass {
    pub fn new(program: ShaderProgram) -> Self {
        Self {
            program,
            pipeline: None,
        }
    }

    pub fn rebuild<D: GpuDevice>(
        &mut self,
        device: &mut D,
        global: vk::DescriptorSetLayout,
        images: vk::DescriptorSetLayout,
        extent: vk::Extent2D,
    ) -> Result<()> {
        self.destroy(device);
        self.pipeline = Some(device.create_pipeline(&PipelineDesc {
            program: self.program,
            set_layouts: vec![global, images],
            push_constant_size: 0,
            extent,
        })?);
        Ok(())
    }

    pub fn record<E: CommandEncoder>(
        &self,
        encoder: &mut E,
        global_set: vk::DescriptorSet,
        image_set: vk::DescriptorSet,
    ) -> Result<u32> {
        let pipeline = self.pipeline.as_ref().ok_or_else(|| {
            AshError::PreconditionViolated(format!("{:?} pipeline was not built", self.program))
        })?;
        encoder.bind_pipeline(pipeline);
        encoder.bind_descriptor_sets(pipeline, 0, &[global_set, image_set]);
        encoder.draw(FULLSCREEN_VERTICES, 1);
        Ok(1)
    }

    pub fn pipeline(&self) -> Option<&PassPipeline> {
        self.pipeline.as_ref()
    }

    pub fn destroy<D: GpuDevice>(&mut self, device: &mut D) {
        if let Some(pipeline) = self.pipeline.take() {
            device.destroy_pipeline(&pipeline);
        }
    }
}
