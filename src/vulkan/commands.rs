use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use super::pipeline::push_constant_stages;
use super::render_passes::RenderPassSet;
use crate::gpu::{AttachmentRef, CommandEncoder, MeshBuffers, PassBegin, PassKind, PassPipeline};
use crate::{AshError, Result};

fn clear_value_for(attachment: &AttachmentRef, clear_color: [f32; 4]) -> vk::ClearValue {
    match attachment {
        AttachmentRef::Image(image)
            if matches!(
                image.format,
                vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::D24_UNORM_S8_UINT
            ) =>
        {
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            }
        }
        _ => vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        },
    }
}

/// [`CommandEncoder`] recording into a frame's primary command buffer.
///
/// [`super::AshSwapchain`] points it at the slot's command buffer and the
/// acquired swapchain view with [`AshEncoder::set_target`] before handing it
/// out from `begin_frame`.
pub struct AshEncoder {
    device: Arc<ash::Device>,
    render_passes: Arc<Mutex<RenderPassSet>>,
    command_buffer: vk::CommandBuffer,
    present_view: vk::ImageView,
    active: Option<PassKind>,
}

impl AshEncoder {
    pub fn new(device: Arc<ash::Device>, render_passes: Arc<Mutex<RenderPassSet>>) -> Self {
        Self {
            device,
            render_passes,
            command_buffer: vk::CommandBuffer::null(),
            present_view: vk::ImageView::null(),
            active: None,
        }
    }

    pub fn set_target(&mut self, command_buffer: vk::CommandBuffer, present_view: vk::ImageView) {
        self.command_buffer = command_buffer;
        self.present_view = present_view;
        self.active = None;
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Drops framebuffers that reference a retired swapchain view.
    pub fn retire_present_view(&mut self, view: vk::ImageView) {
        self.render_passes.lock().evict_view(view);
        if self.present_view == view {
            self.present_view = vk::ImageView::null();
        }
    }
}

impl CommandEncoder for AshEncoder {
    fn begin_pass(&mut self, begin: &PassBegin<'_>) -> Result<()> {
        if let Some(active) = self.active {
            return Err(AshError::PreconditionViolated(format!(
                "{} begun while {} is still recording",
                begin.pass.name(),
                active.name()
            )));
        }
        if self.command_buffer == vk::CommandBuffer::null() {
            return Err(AshError::PreconditionViolated(
                "encoder has no command buffer for this frame".to_string(),
            ));
        }

        let mut views = Vec::with_capacity(begin.attachments.len());
        for attachment in begin.attachments {
            let view = match attachment {
                AttachmentRef::Image(image) => image.view,
                AttachmentRef::Present if self.present_view == vk::ImageView::null() => {
                    return Err(AshError::PreconditionViolated(
                        "no swapchain image acquired for the resolve pass".to_string(),
                    ));
                }
                AttachmentRef::Present => self.present_view,
            };
            views.push(view);
        }
        let clear_values: Vec<vk::ClearValue> = begin
            .attachments
            .iter()
            .map(|attachment| clear_value_for(attachment, begin.clear_color))
            .collect();

        let (render_pass, framebuffer) = {
            let mut passes = self.render_passes.lock();
            let render_pass = passes.render_pass(begin.pass)?;
            let framebuffer = passes.framebuffer(begin.pass, &views, begin.extent)?;
            (render_pass, framebuffer)
        };

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: begin.extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.device.cmd_begin_render_pass(
                self.command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
        self.active = Some(begin.pass);
        Ok(())
    }

    fn next_subpass(&mut self) {
        unsafe {
            self.device
                .cmd_next_subpass(self.command_buffer, vk::SubpassContents::INLINE);
        }
    }

    fn end_pass(&mut self) -> Result<()> {
        if self.active.take().is_none() {
            return Err(AshError::PreconditionViolated(
                "end_pass without an active render pass".to_string(),
            ));
        }
        unsafe { self.device.cmd_end_render_pass(self.command_buffer) };
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &PassPipeline) {
        unsafe {
            self.device.cmd_bind_pipeline(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.pipeline,
            );
        }
    }

    fn bind_descriptor_sets(&mut self, pipeline: &PassPipeline, first_set: u32, sets: &[vk::DescriptorSet]) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout,
                first_set,
                sets,
                &[],
            );
        }
    }

    fn push_constants(&mut self, pipeline: &PassPipeline, data: &[u8]) {
        unsafe {
            self.device.cmd_push_constants(
                self.command_buffer,
                pipeline.layout,
                push_constant_stages(),
                0,
                data,
            );
        }
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        unsafe {
            self.device
                .cmd_draw(self.command_buffer, vertex_count, instance_count, 0, 0);
        }
    }

    fn draw_mesh(&mut self, mesh: &MeshBuffers) {
        unsafe {
            self.device.cmd_bind_vertex_buffers(
                self.command_buffer,
                0,
                &[mesh.positions, mesh.attributes],
                &[0, 0],
            );
            match mesh.indices {
                Some(indices) => {
                    self.device.cmd_bind_index_buffer(
                        self.command_buffer,
                        indices,
                        0,
                        vk::IndexType::UINT32,
                    );
                    self.device
                        .cmd_draw_indexed(self.command_buffer, mesh.count, 1, 0, 0, 0);
                }
                None => self.device.cmd_draw(self.command_buffer, mesh.count, 1, 0, 0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SampledImage;

    fn image(format: vk::Format) -> AttachmentRef {
        AttachmentRef::Image(SampledImage {
            image: vk::Image::null(),
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            extent: vk::Extent2D { width: 4, height: 4 },
            format,
        })
    }

    #[test]
    fn depth_attachments_clear_to_far_plane() {
        let value = clear_value_for(&image(vk::Format::D32_SFLOAT), [0.0; 4]);
        assert_eq!(unsafe { value.depth_stencil.depth }, 1.0);
    }

    #[test]
    fn color_attachments_use_clear_color() {
        let clear = [0.1, 0.2, 0.3, 1.0];
        let value = clear_value_for(&AttachmentRef::Present, clear);
        assert_eq!(unsafe { value.color.float32 }, clear);
        let value = clear_value_for(&image(vk::Format::R8G8B8A8_UNORM), clear);
        assert_eq!(unsafe { value.color.float32 }, clear);
    }
}
