use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use vk_mem::Alloc;

use super::descriptor_layout::DescriptorSetLayoutBuilder;
use super::pipeline::{create_pass_pipeline, ShaderLibrary};
use super::pipeline_cache::PipelineCache;
use super::render_passes::RenderPassSet;
use crate::config::RendererConfig;
use crate::gpu::{
    BindingSlot, BoundResource, DescriptorWrite, GpuDevice, ImageDesc, PassPipeline, PipelineDesc, PoolDesc,
    SampledImage,
};
use crate::{AshError, Result};

/// Handles the host hands over after creating the instance and device.
///
/// The device must have `descriptorBindingPartiallyBound`,
/// `descriptorBindingVariableDescriptorCount`,
/// `runtimeDescriptorArray` and
/// `descriptorBindingSampledImageUpdateAfterBind` enabled.
pub struct VulkanContext {
    pub device: Arc<ash::Device>,
    pub allocator: Arc<vk_mem::Allocator>,
    pub queue: vk::Queue,
    pub queue_family_index: u32,
    pub surface_format: vk::Format,
    pub shaders: ShaderLibrary,
}

struct BufferEntry {
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
}

struct ImageEntry {
    allocation: vk_mem::Allocation,
    view: vk::ImageView,
    sampler: vk::Sampler,
}

fn aspect_for(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

fn color_subresource() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// [`GpuDevice`] backed by `ash` and `vk-mem`.
pub struct AshDevice {
    device: Arc<ash::Device>,
    allocator: Arc<vk_mem::Allocator>,
    queue: vk::Queue,
    queue_family_index: u32,
    surface_format: vk::Format,
    shaders: ShaderLibrary,
    pipeline_cache: PipelineCache,
    render_passes: Arc<Mutex<RenderPassSet>>,
    upload_pool: vk::CommandPool,
    buffers: HashMap<vk::Buffer, BufferEntry>,
    images: HashMap<vk::Image, ImageEntry>,
    layouts: Vec<vk::DescriptorSetLayout>,
    pools: Vec<vk::DescriptorPool>,
    pipelines: HashMap<vk::Pipeline, vk::PipelineLayout>,
}

impl AshDevice {
    /// Persists the pipeline cache to `config.pipeline_cache_path` when set.
    pub fn new(context: VulkanContext, config: &RendererConfig) -> Result<Self> {
        let missing = context.shaders.missing();
        if !missing.is_empty() {
            return Err(AshError::Configuration(format!(
                "shader library is missing programs: {missing:?}"
            )));
        }

        let pipeline_cache =
            PipelineCache::with_persistence(context.device.clone(), config.pipeline_cache_path.clone())?;
        let render_passes = RenderPassSet::new(context.device.clone(), context.surface_format)?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(context.queue_family_index);
        let upload_pool = unsafe {
            context
                .device
                .create_command_pool(&pool_info, None)
                .map_err(|e| AshError::VulkanError(format!("Failed to create upload command pool: {e}")))?
        };

        log::info!(
            "Vulkan device adapter ready (surface format {:?})",
            context.surface_format
        );

        Ok(Self {
            device: context.device,
            allocator: context.allocator,
            queue: context.queue,
            queue_family_index: context.queue_family_index,
            surface_format: context.surface_format,
            shaders: context.shaders,
            pipeline_cache,
            render_passes: Arc::new(Mutex::new(render_passes)),
            upload_pool,
            buffers: HashMap::new(),
            images: HashMap::new(),
            layouts: Vec::new(),
            pools: Vec::new(),
            pipelines: HashMap::new(),
        })
    }

    pub fn device(&self) -> &Arc<ash::Device> {
        &self.device
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Format the resolve pass renders into; the swapchain must match it.
    pub fn surface_format(&self) -> vk::Format {
        self.surface_format
    }

    /// Shared with every [`super::AshEncoder`] recording against this device.
    pub fn render_passes(&self) -> Arc<Mutex<RenderPassSet>> {
        self.render_passes.clone()
    }

    pub fn pipeline_cache(&self) -> &PipelineCache {
        &self.pipeline_cache
    }

    fn create_staging_buffer(&self, data: &[u8]) -> Result<(vk::Buffer, vk_mem::Allocation)> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(data.len() as vk::DeviceSize)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::Auto,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            ..Default::default()
        };
        unsafe {
            let (buffer, mut allocation) = self.allocator.create_buffer(&buffer_info, &alloc_info)?;
            match self.allocator.map_memory(&mut allocation) {
                Ok(mapped) => {
                    std::ptr::copy_nonoverlapping(data.as_ptr(), mapped, data.len());
                    self.allocator.unmap_memory(&mut allocation);
                    Ok((buffer, allocation))
                }
                Err(e) => {
                    self.allocator.destroy_buffer(buffer, &mut allocation);
                    Err(e.into())
                }
            }
        }
    }

    /// Records `record` into a throwaway command buffer and waits for it to finish.
    fn submit_once(&self, record: impl FnOnce(vk::CommandBuffer)) -> Result<()> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.upload_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffers = unsafe { self.device.allocate_command_buffers(&alloc_info)? };

        let result = unsafe {
            let command_buffer = command_buffers[0];
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(command_buffer, &begin_info)
                .and_then(|_| {
                    record(command_buffer);
                    self.device.end_command_buffer(command_buffer)
                })
                .and_then(|_| {
                    let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
                    self.device
                        .queue_submit(self.queue, &[submit], vk::Fence::null())
                })
                .and_then(|_| self.device.queue_wait_idle(self.queue))
        };

        unsafe {
            self.device
                .free_command_buffers(self.upload_pool, &command_buffers);
        }
        result.map_err(|e| AshError::VulkanError(format!("Failed to submit upload: {e}")))
    }

    fn create_sampler(&self) -> Result<vk::Sampler> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(0.0);
        unsafe {
            self.device
                .create_sampler(&create_info, None)
                .map_err(|e| AshError::VulkanError(format!("Failed to create sampler: {e}")))
        }
    }
}

impl GpuDevice for AshDevice {
    fn create_buffer(&mut self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<vk::Buffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::Auto,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            ..Default::default()
        };
        let (buffer, allocation) = unsafe { self.allocator.create_buffer(&buffer_info, &alloc_info)? };
        self.buffers.insert(buffer, BufferEntry { allocation, size });
        Ok(buffer)
    }

    fn write_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        let entry = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| AshError::PreconditionViolated(format!("unknown buffer {buffer:?}")))?;
        let end = offset + data.len() as vk::DeviceSize;
        if end > entry.size {
            return Err(AshError::PreconditionViolated(format!(
                "write of {} bytes at {offset} overruns buffer of {} bytes",
                data.len(),
                entry.size
            )));
        }
        unsafe {
            let mapped = self.allocator.map_memory(&mut entry.allocation)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset as usize), data.len());
            self.allocator.unmap_memory(&mut entry.allocation);
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        if let Some(mut entry) = self.buffers.remove(&buffer) {
            unsafe { self.allocator.destroy_buffer(buffer, &mut entry.allocation) };
        }
    }

    fn create_image(&mut self, desc: &ImageDesc) -> Result<SampledImage> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, mut allocation) = unsafe { self.allocator.create_image(&image_info, &alloc_info)? };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_for(desc.format),
                ..color_subresource()
            });
        let view = match unsafe { self.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.allocator.destroy_image(image, &mut allocation) };
                return Err(AshError::VulkanError(format!(
                    "Failed to create view for {}: {e}",
                    desc.label
                )));
            }
        };

        let sampler = if desc.usage.contains(vk::ImageUsageFlags::SAMPLED) {
            match self.create_sampler() {
                Ok(sampler) => sampler,
                Err(e) => {
                    unsafe {
                        self.device.destroy_image_view(view, None);
                        self.allocator.destroy_image(image, &mut allocation);
                    }
                    return Err(e);
                }
            }
        } else {
            vk::Sampler::null()
        };

        log::debug!(
            "Created image '{}' {}x{} {:?}",
            desc.label,
            desc.extent.width,
            desc.extent.height,
            desc.format
        );

        self.images.insert(
            image,
            ImageEntry {
                allocation,
                view,
                sampler,
            },
        );
        Ok(SampledImage {
            image,
            view,
            sampler,
            extent: desc.extent,
            format: desc.format,
        })
    }

    fn upload_image(&mut self, image: &SampledImage, texels: &[u8]) -> Result<()> {
        if !self.images.contains_key(&image.image) {
            return Err(AshError::PreconditionViolated(format!(
                "unknown image {:?}",
                image.image
            )));
        }
        let (staging, mut staging_allocation) = self.create_staging_buffer(texels)?;

        let device = self.device.clone();
        let target = image.image;
        let extent = image.extent;
        let result = self.submit_once(|command_buffer| unsafe {
            let to_transfer = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(target)
                .subresource_range(color_subresource())
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );

            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                });
            device.cmd_copy_buffer_to_image(
                command_buffer,
                staging,
                target,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            let to_shader = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(target)
                .subresource_range(color_subresource())
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ);
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_shader],
            );
        });

        unsafe { self.allocator.destroy_buffer(staging, &mut staging_allocation) };
        result
    }

    fn destroy_image(&mut self, image: &SampledImage) {
        let Some(mut entry) = self.images.remove(&image.image) else {
            return;
        };
        self.render_passes.lock().evict_view(entry.view);
        unsafe {
            if entry.sampler != vk::Sampler::null() {
                self.device.destroy_sampler(entry.sampler, None);
            }
            self.device.destroy_image_view(entry.view, None);
            self.allocator.destroy_image(image.image, &mut entry.allocation);
        }
    }

    fn create_descriptor_set_layout(
        &mut self,
        slots: &[BindingSlot],
    ) -> Result<vk::DescriptorSetLayout> {
        let layout = DescriptorSetLayoutBuilder::from_slots(slots).build(&self.device)?;
        self.layouts.push(layout);
        Ok(layout)
    }

    fn create_descriptor_pool(&mut self, desc: &PoolDesc) -> Result<vk::DescriptorPool> {
        let sizes: Vec<vk::DescriptorPoolSize> = desc
            .sizes
            .iter()
            .map(|&(ty, descriptor_count)| vk::DescriptorPoolSize {
                ty,
                descriptor_count,
            })
            .collect();
        let flags = if desc.update_after_bind {
            vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND
        } else {
            vk::DescriptorPoolCreateFlags::empty()
        };
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(flags)
            .max_sets(desc.max_sets)
            .pool_sizes(&sizes);
        let pool = unsafe {
            self.device
                .create_descriptor_pool(&create_info, None)
                .map_err(|e| AshError::VulkanError(format!("Failed to create descriptor pool: {e}")))?
        };
        self.pools.push(pool);
        Ok(pool)
    }

    fn reset_descriptor_pool(&mut self, pool: vk::DescriptorPool) -> Result<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        Ok(())
    }

    fn allocate_descriptor_set(
        &mut self,
        layout: vk::DescriptorSetLayout,
        pool: vk::DescriptorPool,
        variable_count: Option<u32>,
    ) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        let counts = [variable_count.unwrap_or(0)];
        let mut variable_info =
            vk::DescriptorSetVariableDescriptorCountAllocateInfo::default().descriptor_counts(&counts);
        let mut alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        if variable_count.is_some() {
            alloc_info = alloc_info.push_next(&mut variable_info);
        }
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info)? };
        sets.into_iter()
            .next()
            .ok_or_else(|| AshError::VulkanError("descriptor pool returned no set".to_string()))
    }

    fn update_descriptor_set(&mut self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) -> Result<()> {
        let mut image_infos: Vec<Vec<vk::DescriptorImageInfo>> = Vec::with_capacity(writes.len());
        let mut buffer_infos: Vec<Vec<vk::DescriptorBufferInfo>> = Vec::with_capacity(writes.len());
        for write in writes {
            let mut images = Vec::new();
            let mut buffers = Vec::new();
            for resource in &write.resources {
                match *resource {
                    BoundResource::Image {
                        view,
                        sampler,
                        layout,
                    } => images.push(
                        vk::DescriptorImageInfo::default()
                            .image_view(view)
                            .sampler(sampler)
                            .image_layout(layout),
                    ),
                    BoundResource::Buffer { buffer, range } => buffers.push(
                        vk::DescriptorBufferInfo::default()
                            .buffer(buffer)
                            .offset(0)
                            .range(range),
                    ),
                }
            }
            if !images.is_empty() && !buffers.is_empty() {
                return Err(AshError::PreconditionViolated(format!(
                    "binding {} mixes image and buffer resources",
                    write.binding
                )));
            }
            image_infos.push(images);
            buffer_infos.push(buffers);
        }

        let vk_writes: Vec<vk::WriteDescriptorSet<'_>> = writes
            .iter()
            .zip(image_infos.iter().zip(&buffer_infos))
            .filter(|(write, _)| !write.resources.is_empty())
            .map(|(write, (images, buffers))| {
                let base = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .dst_array_element(write.first_element)
                    .descriptor_type(write.kind);
                if images.is_empty() {
                    base.buffer_info(buffers)
                } else {
                    base.image_info(images)
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
        Ok(())
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PassPipeline> {
        let render_pass = self.render_passes.lock().render_pass(desc.program.pass())?;
        let pipeline = create_pass_pipeline(
            &self.device,
            self.pipeline_cache.handle(),
            render_pass,
            &self.shaders,
            desc,
        )?;
        self.pipelines.insert(pipeline.pipeline, pipeline.layout);
        Ok(pipeline)
    }

    fn destroy_pipeline(&mut self, pipeline: &PassPipeline) {
        if let Some(layout) = self.pipelines.remove(&pipeline.pipeline) {
            unsafe {
                self.device.destroy_pipeline(pipeline.pipeline, None);
                self.device.destroy_pipeline_layout(layout, None);
            }
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for AshDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("device_wait_idle failed during teardown: {e}");
            }
            for (pipeline, layout) in self.pipelines.drain() {
                self.device.destroy_pipeline(pipeline, None);
                self.device.destroy_pipeline_layout(layout, None);
            }
            for pool in self.pools.drain(..) {
                self.device.destroy_descriptor_pool(pool, None);
            }
            for layout in self.layouts.drain(..) {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
            for (image, mut entry) in self.images.drain() {
                if entry.sampler != vk::Sampler::null() {
                    self.device.destroy_sampler(entry.sampler, None);
                }
                self.device.destroy_image_view(entry.view, None);
                self.allocator.destroy_image(image, &mut entry.allocation);
            }
            for (buffer, mut entry) in self.buffers.drain() {
                self.allocator.destroy_buffer(buffer, &mut entry.allocation);
            }
            self.device.destroy_command_pool(self.upload_pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_use_depth_aspect() {
        assert_eq!(aspect_for(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_for(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_for(vk::Format::R8G8_UNORM), vk::ImageAspectFlags::COLOR);
    }
}
