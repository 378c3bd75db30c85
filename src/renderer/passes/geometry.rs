use ash::vk;

use crate::gpu::{CommandEncoder, GpuDevice, PassPipeline, PipelineDesc, ShaderProgram};
use crate::{AshError, Result};

use super::bindings::PassLayouts;
use super::FrameInputs;
use crate::renderer::object_data::ObjectPushConstants;

/// Vertices of the camera-facing quad drawn per point light.
pub const LIGHT_BILLBOARD_VERTICES: u32 = 6;
/// Vertices of the full-screen triangle.
pub const FULLSCREEN_VERTICES: u32 = 3;

const PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<ObjectPushConstants>() as u32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeometryStats {
    pub mesh_draws: u32,
    pub light_draws: u32,
    pub composition_draws: u32,
}

impl GeometryStats {
    pub fn total(&self) -> u32 {
        self.mesh_draws + self.light_draws + self.composition_draws
    }
}

/// Deferred geometry pass: G-buffer fill in subpass 0, then composition and
/// additive point-light billboards in subpass 1.
#[derive(Default)]
pub struct GeometryPass {
    gbuffer: Option<PassPipeline>,
    composition: Option<PassPipeline>,
    point_light: Option<PassPipeline>,
}

impl GeometryPass {
    pub fn rebuild<D: GpuDevice>(
        &mut self,
        device: &mut D,
        layouts: &PassLayouts,
        extent: vk::Extent2D,
    ) -> Result<()> {
        self.destroy(device);

        let [albedo, normal, height] = layouts.textures;
        self.gbuffer = Some(device.create_pipeline(&PipelineDesc {
            program: ShaderProgram::GBuffer,
            set_layouts: vec![layouts.global, albedo, normal, height],
            push_constant_size: PUSH_CONSTANT_SIZE,
            extent,
        })?);
        self.composition = Some(device.create_pipeline(&PipelineDesc {
            program: ShaderProgram::Composition,
            set_layouts: vec![layouts.global, layouts.gbuffer_input],
            push_constant_size: 0,
            extent,
        })?);
        self.point_light = Some(device.create_pipeline(&PipelineDesc {
            program: ShaderProgram::PointLight,
            set_layouts: vec![layouts.global],
            push_constant_size: PUSH_CONSTANT_SIZE,
            extent,
        })?);
        Ok(())
    }

    pub fn record<E: CommandEncoder>(
        &self,
        encoder: &mut E,
        frame: &FrameInputs<'_>,
        gbuffer_input: vk::DescriptorSet,
    ) -> Result<GeometryStats> {
        let (gbuffer, composition, point_light) =
            match (&self.gbuffer, &self.composition, &self.point_light) {
                (Some(gbuffer), Some(composition), Some(point_light)) => {
                    (gbuffer, composition, point_light)
                }
                _ => return Err(AshError::precondition("geometry pipelines were not built")),
            };
        let mut stats = GeometryStats::default();

        encoder.bind_pipeline(gbuffer);
        let [albedo, normal, height] = frame.texture_sets;
        encoder.bind_descriptor_sets(gbuffer, 0, &[frame.global_set, albedo, normal, height]);
        for (object_index, mesh) in frame.objects.geometry() {
            encoder.push_constants(gbuffer, bytemuck::bytes_of(&ObjectPushConstants { object_index }));
            encoder.draw_mesh(mesh);
            stats.mesh_draws += 1;
        }

        encoder.next_subpass();

        encoder.bind_pipeline(composition);
        encoder.bind_descriptor_sets(composition, 0, &[frame.global_set, gbuffer_input]);
        encoder.draw(FULLSCREEN_VERTICES, 1);
        stats.composition_draws += 1;

        encoder.bind_pipeline(point_light);
        encoder.bind_descriptor_sets(point_light, 0, &[frame.global_set]);
        for object_index in frame.objects.lights() {
            encoder.push_constants(point_light, bytemuck::bytes_of(&ObjectPushConstants { object_index }));
            encoder.draw(LIGHT_BILLBOARD_VERTICES, 1);
            stats.light_draws += 1;
        }

        Ok(stats)
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &PassPipeline> {
        [&self.gbuffer, &self.composition, &self.point_light]
            .into_iter()
            .flatten()
    }

    pub fn destroy<D: GpuDevice>(&mut self, device: &mut D) {
        for pipeline in [
            self.gbuffer.take(),
            self.composition.take(),
            self.point_light.take(),
        ]
        .into_iter()
        .flatten()
        {
            device.destroy_pipeline(&pipeline);
        }
    }
}
