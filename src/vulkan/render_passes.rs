use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;

use crate::gpu::PassKind;
use crate::renderer::TargetId;
use crate::{AshError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct FramebufferKey {
    pass: PassKind,
    views: Vec<vk::ImageView>,
    width: u32,
    height: u32,
}

/// Native render passes for the four frame stages plus a framebuffer cache.
pub struct RenderPassSet {
    device: Arc<ash::Device>,
    passes: HashMap<PassKind, vk::RenderPass>,
    framebuffers: HashMap<FramebufferKey, vk::Framebuffer>,
}

impl RenderPassSet {
    pub fn new(device: Arc<ash::Device>, surface_format: vk::Format) -> Result<Self> {
        let mut set = Self {
            device,
            passes: HashMap::new(),
            framebuffers: HashMap::new(),
        };
        let geometry = set.create_geometry_pass()?;
        set.passes.insert(PassKind::Geometry, geometry);
        let edge = set.create_single_pass(TargetId::EdgeMask.format(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;
        set.passes.insert(PassKind::EdgeDetection, edge);
        let blend = set.create_single_pass(TargetId::BlendWeights.format(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;
        set.passes.insert(PassKind::BlendWeight, blend);
        let resolve = set.create_single_pass(surface_format, vk::ImageLayout::PRESENT_SRC_KHR)?;
        set.passes.insert(PassKind::Resolve, resolve);
        Ok(set)
    }

    pub fn render_pass(&self, pass: PassKind) -> Result<vk::RenderPass> {
        self.passes
            .get(&pass)
            .copied()
            .ok_or_else(|| AshError::VulkanError(format!("no render pass for {}", pass.name())))
    }

    pub fn framebuffer(
        &mut self,
        pass: PassKind,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        let key = FramebufferKey {
            pass,
            views: views.to_vec(),
            width: extent.width,
            height: extent.height,
        };
        if let Some(&framebuffer) = self.framebuffers.get(&key) {
            return Ok(framebuffer);
        }

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(self.render_pass(pass)?)
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer = unsafe {
            self.device
                .create_framebuffer(&create_info, None)
                .map_err(|e| AshError::VulkanError(format!("Failed to create framebuffer: {e}")))?
        };
        self.framebuffers.insert(key, framebuffer);
        Ok(framebuffer)
    }

    /// Drops every cached framebuffer that uses `view`.
    pub fn evict_view(&mut self, view: vk::ImageView) {
        let device = &self.device;
        self.framebuffers.retain(|key, framebuffer| {
            let keep = !key.views.contains(&view);
            if !keep {
                unsafe { device.destroy_framebuffer(*framebuffer, None) };
            }
            keep
        });
    }

    fn create_geometry_pass(&self) -> Result<vk::RenderPass> {
        let color = |format: vk::Format, store: vk::AttachmentStoreOp| {
            vk::AttachmentDescription::default()
                .format(format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(store)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        };
        let attachments = [
            color(TargetId::GBufferNormal.format(), vk::AttachmentStoreOp::DONT_CARE),
            color(TargetId::GBufferAlbedo.format(), vk::AttachmentStoreOp::DONT_CARE),
            vk::AttachmentDescription::default()
                .format(TargetId::GBufferDepth.format())
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL),
            color(TargetId::SceneColor.format(), vk::AttachmentStoreOp::STORE),
        ];

        let gbuffer_refs = [
            vk::AttachmentReference {
                attachment: 0,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            },
            vk::AttachmentReference {
                attachment: 1,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            },
        ];
        let depth_ref = vk::AttachmentReference {
            attachment: 2,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let input_refs = [
            vk::AttachmentReference {
                attachment: 0,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
            vk::AttachmentReference {
                attachment: 1,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
            vk::AttachmentReference {
                attachment: 2,
                layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            },
        ];
        let lighting_refs = [vk::AttachmentReference {
            attachment: 3,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let subpasses = [
            vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&gbuffer_refs)
                .depth_stencil_attachment(&depth_ref),
            vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .input_attachments(&input_refs)
                .color_attachments(&lighting_refs),
        ];

        let dependencies = [
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .dst_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                )
                .src_access_mask(vk::AccessFlags::SHADER_READ)
                .dst_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
                .dependency_flags(vk::DependencyFlags::BY_REGION),
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(1)
                .src_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                )
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .src_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
                .dst_access_mask(vk::AccessFlags::INPUT_ATTACHMENT_READ)
                .dependency_flags(vk::DependencyFlags::BY_REGION),
            vk::SubpassDependency::default()
                .src_subpass(1)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .dependency_flags(vk::DependencyFlags::BY_REGION),
        ];

        self.create(&attachments, &subpasses, &dependencies)
    }

    fn create_single_pass(&self, format: vk::Format, final_layout: vk::ImageLayout) -> Result<vk::RenderPass> {
        let attachments = [vk::AttachmentDescription::default()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(final_layout)];
        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];
        let dependencies = [
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::FRAGMENT_SHADER,
                )
                .dst_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::FRAGMENT_SHADER,
                )
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::SHADER_READ),
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ),
        ];
        self.create(&attachments, &subpasses, &dependencies)
    }

    fn create(
        &self,
        attachments: &[vk::AttachmentDescription],
        subpasses: &[vk::SubpassDescription<'_>],
        dependencies: &[vk::SubpassDependency],
    ) -> Result<vk::RenderPass> {
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(attachments)
            .subpasses(subpasses)
            .dependencies(dependencies);
        unsafe {
            self.device
                .create_render_pass(&create_info, None)
                .map_err(|e| AshError::VulkanError(format!("Failed to create render pass: {e}")))
        }
    }
}

impl Drop for RenderPassSet {
    fn drop(&mut self) {
        unsafe {
            for (_, framebuffer) in self.framebuffers.drain() {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            for (_, pass) in self.passes.drain() {
                self.device.destroy_render_pass(pass, None);
            }
        }
    }
}
