use std::collections::HashMap;
use std::io::Cursor;

use ash::vk;

use crate::gpu::{PassPipeline, PipelineDesc, ShaderProgram};
use crate::{AshError, Result};

/// Precompiled SPIR-V for one program.
#[derive(Clone, Debug, Default)]
pub struct ShaderStages {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderStages {
    pub fn from_bytes(vertex: &[u8], fragment: &[u8]) -> Result<Self> {
        Ok(Self {
            vertex: ash::util::read_spv(&mut Cursor::new(vertex))?,
            fragment: ash::util::read_spv(&mut Cursor::new(fragment))?,
        })
    }
}

/// SPIR-V for every program the passes build pipelines from.
#[derive(Clone, Debug, Default)]
pub struct ShaderLibrary {
    programs: HashMap<ShaderProgram, ShaderStages>,
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, program: ShaderProgram, stages: ShaderStages) -> Self {
        self.programs.insert(program, stages);
        self
    }

    pub fn get(&self, program: ShaderProgram) -> Result<&ShaderStages> {
        self.programs
            .get(&program)
            .ok_or_else(|| AshError::Configuration(format!("no SPIR-V registered for {program:?}")))
    }

    pub fn missing(&self) -> Vec<ShaderProgram> {
        ShaderProgram::ALL
            .into_iter()
            .filter(|program| !self.programs.contains_key(program))
            .collect()
    }
}

/// Number of colour attachments the program's subpass writes.
fn color_attachment_count(program: ShaderProgram) -> usize {
    match program {
        ShaderProgram::GBuffer => 2,
        _ => 1,
    }
}

/// Vertex streams: vec3 positions in binding 0; colour, normal and uv in binding 1.
fn mesh_vertex_input() -> (
    [vk::VertexInputBindingDescription; 2],
    [vk::VertexInputAttributeDescription; 4],
) {
    let bindings = [
        vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(12)
            .input_rate(vk::VertexInputRate::VERTEX),
        vk::VertexInputBindingDescription::default()
            .binding(1)
            .stride(32)
            .input_rate(vk::VertexInputRate::VERTEX),
    ];
    let attributes = [
        vk::VertexInputAttributeDescription::default()
            .location(0)
            .binding(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(0),
        vk::VertexInputAttributeDescription::default()
            .location(1)
            .binding(1)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(0),
        vk::VertexInputAttributeDescription::default()
            .location(2)
            .binding(1)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(12),
        vk::VertexInputAttributeDescription::default()
            .location(3)
            .binding(1)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(24),
    ];
    (bindings, attributes)
}

pub(crate) fn push_constant_stages() -> vk::ShaderStageFlags {
    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
}

fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    unsafe {
        device
            .create_shader_module(&create_info, None)
            .map_err(|e| AshError::VulkanError(format!("Failed to create shader module: {e}")))
    }
}

/// Builds a graphics pipeline for `desc` with viewport and scissor fixed at `desc.extent`.
pub fn create_pass_pipeline(
    device: &ash::Device,
    cache: vk::PipelineCache,
    render_pass: vk::RenderPass,
    shaders: &ShaderLibrary,
    desc: &PipelineDesc,
) -> Result<PassPipeline> {
    let stages = shaders.get(desc.program)?;

    let push_ranges = [vk::PushConstantRange {
        stage_flags: push_constant_stages(),
        offset: 0,
        size: desc.push_constant_size,
    }];
    let mut layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&desc.set_layouts);
    if desc.push_constant_size > 0 {
        layout_info = layout_info.push_constant_ranges(&push_ranges);
    }
    let layout = unsafe {
        device
            .create_pipeline_layout(&layout_info, None)
            .map_err(|e| AshError::VulkanError(format!("Failed to create pipeline layout: {e}")))?
    };

    let vertex_module = create_shader_module(device, &stages.vertex);
    let fragment_module = create_shader_module(device, &stages.fragment);
    let (vertex_module, fragment_module) = match (vertex_module, fragment_module) {
        (Ok(vertex), Ok(fragment)) => (vertex, fragment),
        (vertex, fragment) => {
            unsafe {
                if let Ok(module) = vertex {
                    device.destroy_shader_module(module, None);
                }
                if let Ok(module) = fragment {
                    device.destroy_shader_module(module, None);
                }
                device.destroy_pipeline_layout(layout, None);
            }
            return Err(AshError::VulkanError(format!(
                "Failed to create shader modules for {:?}",
                desc.program
            )));
        }
    };

    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_module)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment_module)
            .name(c"main"),
    ];

    let (mesh_bindings, mesh_attributes) = mesh_vertex_input();
    let vertex_input = if desc.program == ShaderProgram::GBuffer {
        vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&mesh_bindings)
            .vertex_attribute_descriptions(&mesh_attributes)
    } else {
        vk::PipelineVertexInputStateCreateInfo::default()
    };

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewports = [vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: desc.extent.width as f32,
        height: desc.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }];
    let scissors = [vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: desc.extent,
    }];
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewports(&viewports)
        .scissors(&scissors);

    let cull_mode = if desc.program == ShaderProgram::GBuffer {
        vk::CullModeFlags::BACK
    } else {
        vk::CullModeFlags::NONE
    };
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(cull_mode)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_enabled = desc.program == ShaderProgram::GBuffer;
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(depth_enabled)
        .depth_write_enable(depth_enabled)
        .depth_compare_op(vk::CompareOp::LESS);

    let blend_attachment = if desc.program == ShaderProgram::PointLight {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    } else {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    };
    let blend_attachments = vec![blend_attachment; color_attachment_count(desc.program)];
    let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(desc.program.subpass());

    let result = unsafe { device.create_graphics_pipelines(cache, &[create_info], None) };
    unsafe {
        device.destroy_shader_module(vertex_module, None);
        device.destroy_shader_module(fragment_module, None);
    }

    let pipeline = match result {
        Ok(pipelines) => pipelines.into_iter().next(),
        Err((_, e)) => {
            unsafe { device.destroy_pipeline_layout(layout, None) };
            return Err(AshError::VulkanError(format!(
                "Failed to create {:?} pipeline: {e}",
                desc.program
            )));
        }
    };
    let pipeline = pipeline.ok_or_else(|| {
        unsafe { device.destroy_pipeline_layout(layout, None) };
        AshError::VulkanError(format!("No pipeline returned for {:?}", desc.program))
    })?;

    log::debug!(
        "Created {:?} pipeline at {}x{}",
        desc.program,
        desc.extent.width,
        desc.extent.height
    );

    Ok(PassPipeline {
        pipeline,
        layout,
        program: desc.program,
        extent: desc.extent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_reports_missing_programs() {
        let library = ShaderLibrary::new().with(ShaderProgram::GBuffer, ShaderStages::default());
        let missing = library.missing();
        assert_eq!(missing.len(), ShaderProgram::ALL.len() - 1);
        assert!(!missing.contains(&ShaderProgram::GBuffer));
        assert!(matches!(
            library.get(ShaderProgram::Resolve),
            Err(AshError::Configuration(_))
        ));
    }

    #[test]
    fn spirv_must_be_word_aligned() {
        let magic = 0x0723_0203u32.to_le_bytes();
        assert!(ShaderStages::from_bytes(&magic, &magic).is_ok());
        assert!(ShaderStages::from_bytes(&magic[..3], &magic).is_err());
    }

    #[test]
    fn mesh_streams_cover_all_locations() {
        let (bindings, attributes) = mesh_vertex_input();
        assert_eq!(bindings[0].stride, 12);
        assert_eq!(bindings[1].stride, 32);
        let locations: Vec<_> = attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2, 3]);
    }
}
