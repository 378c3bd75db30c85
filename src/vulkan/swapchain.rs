use std::collections::VecDeque;
use std::sync::Arc;

use ash::{khr, vk};

use super::commands::AshEncoder;
use super::device::AshDevice;
use crate::gpu::{PresentSurface, SurfaceEvent};
use crate::{AshError, Result};

/// Surface-side handles the host created alongside the device.
///
/// The host keeps ownership of `surface`; [`AshSwapchain`] only builds
/// swapchains on top of it.
pub struct SwapchainContext {
    pub surface_loader: khr::surface::Instance,
    pub swapchain_loader: khr::swapchain::Device,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
}

/// Per-slot synchronisation: the fence guards the slot's command buffer and
/// every buffer the core wrote for that slot.
struct FrameSync {
    command_buffer: vk::CommandBuffer,
    image_available: vk::Semaphore,
    in_flight: vk::Fence,
}

fn surface_error(result: vk::Result, during: &str) -> AshError {
    match result {
        vk::Result::ERROR_OUT_OF_DATE_KHR => AshError::SwapchainOutOfDate(during.to_string()),
        vk::Result::ERROR_SURFACE_LOST_KHR => AshError::SurfaceLost(during.to_string()),
        other => AshError::Vk(other),
    }
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count == 0 {
        preferred
    } else {
        preferred.min(capabilities.max_image_count)
    }
}

/// [`PresentSurface`] over a `VK_KHR_swapchain` swapchain.
///
/// Window events are forwarded by the host through [`AshSwapchain::notify_resize`]
/// and [`AshSwapchain::request_quit`].
pub struct AshSwapchain {
    device: Arc<ash::Device>,
    context: SwapchainContext,
    queue: vk::Queue,
    swapchain: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    views: Vec<vk::ImageView>,
    /// One per swapchain image, signalled by the frame rendering into it
    render_finished: Vec<vk::Semaphore>,
    command_pool: vk::CommandPool,
    frames: Vec<FrameSync>,
    encoder: AshEncoder,
    recording: Option<(usize, u32)>,
    events: VecDeque<SurfaceEvent>,
}

impl AshSwapchain {
    pub fn new(
        device: &AshDevice,
        context: SwapchainContext,
        extent: vk::Extent2D,
        frames_in_flight: usize,
    ) -> Result<Self> {
        let formats = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_formats(context.physical_device, context.surface)?
        };
        let surface_format = formats
            .iter()
            .copied()
            .find(|format| format.format == device.surface_format())
            .ok_or_else(|| {
                AshError::Configuration(format!(
                    "surface does not support {:?}",
                    device.surface_format()
                ))
            })?;

        let raw = Arc::clone(device.device());
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(device.queue_family_index());
        let command_pool = unsafe {
            raw.create_command_pool(&pool_info, None)
                .map_err(|e| AshError::VulkanError(format!("Failed to create frame command pool: {e}")))?
        };

        let mut swapchain = Self {
            device: Arc::clone(&raw),
            context,
            queue: device.queue(),
            swapchain: vk::SwapchainKHR::null(),
            surface_format,
            extent,
            views: Vec::new(),
            render_finished: Vec::new(),
            command_pool,
            frames: Vec::with_capacity(frames_in_flight),
            encoder: AshEncoder::new(raw, device.render_passes()),
            recording: None,
            events: VecDeque::new(),
        };
        swapchain.create_frame_syncs(frames_in_flight)?;
        swapchain.build(extent)?;
        Ok(swapchain)
    }

    pub fn notify_resize(&mut self, width: u32, height: u32) {
        self.events
            .push_back(SurfaceEvent::Resized(vk::Extent2D { width, height }));
    }

    pub fn request_quit(&mut self) {
        self.events.push_back(SurfaceEvent::Quit);
    }

    pub fn image_count(&self) -> usize {
        self.views.len()
    }

    fn create_frame_syncs(&mut self, count: usize) -> Result<()> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);
        let command_buffers = unsafe { self.device.allocate_command_buffers(&alloc_info)? };

        for command_buffer in command_buffers {
            let image_available =
                unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };
            let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
            let in_flight = unsafe { self.device.create_fence(&fence_info, None)? };
            self.frames.push(FrameSync {
                command_buffer,
                image_available,
                in_flight,
            });
        }
        Ok(())
    }

    /// Creates a swapchain for `requested`, retiring the current one.
    fn build(&mut self, requested: vk::Extent2D) -> Result<()> {
        let capabilities = unsafe {
            self.context
                .surface_loader
                .get_physical_device_surface_capabilities(
                    self.context.physical_device,
                    self.context.surface,
                )
                .map_err(|e| surface_error(e, "surface query"))?
        };
        let extent = choose_extent(&capabilities, requested);
        let old_swapchain = self.swapchain;

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.context.surface)
            .min_image_count(choose_image_count(&capabilities))
            .image_format(self.surface_format.format)
            .image_color_space(self.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .old_swapchain(old_swapchain);
        let swapchain = unsafe {
            self.context
                .swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(|e| surface_error(e, "swapchain creation"))?
        };

        self.destroy_images();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.context
                    .swapchain_loader
                    .destroy_swapchain(old_swapchain, None)
            };
        }
        self.swapchain = swapchain;
        self.extent = extent;

        let images = unsafe { self.context.swapchain_loader.get_swapchain_images(swapchain)? };
        for image in images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.surface_format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { self.device.create_image_view(&view_info, None)? };
            self.views.push(view);
            let semaphore =
                unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };
            self.render_finished.push(semaphore);
        }

        log::info!(
            "Swapchain ready: {} images at {}x{}",
            self.image_count(),
            extent.width,
            extent.height
        );
        Ok(())
    }

    fn destroy_images(&mut self) {
        for view in self.views.drain(..) {
            self.encoder.retire_present_view(view);
            unsafe { self.device.destroy_image_view(view, None) };
        }
        for semaphore in self.render_finished.drain(..) {
            unsafe { self.device.destroy_semaphore(semaphore, None) };
        }
    }

    fn frame(&self, slot: usize) -> Result<&FrameSync> {
        self.frames.get(slot).ok_or_else(|| {
            AshError::PreconditionViolated(format!(
                "frame slot {slot} out of range ({} slots)",
                self.frames.len()
            ))
        })
    }
}

impl PresentSurface for AshSwapchain {
    type Encoder = AshEncoder;

    fn poll_event(&mut self) -> Option<SurfaceEvent> {
        self.events.pop_front()
    }

    fn begin_frame(&mut self, slot: usize) -> Result<Option<&mut AshEncoder>> {
        if self.recording.is_some() {
            return Err(AshError::precondition("begin_frame while a frame is being recorded"));
        }
        let frame = self.frame(slot)?;
        let (command_buffer, image_available, in_flight) =
            (frame.command_buffer, frame.image_available, frame.in_flight);

        unsafe { self.device.wait_for_fences(&[in_flight], true, u64::MAX)? };

        let acquired = unsafe {
            self.context.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                image_available,
                vk::Fence::null(),
            )
        };
        let image_index = match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("Acquired a suboptimal swapchain image");
                }
                index
            }
            Err(vk::Result::NOT_READY) | Err(vk::Result::TIMEOUT) => return Ok(None),
            Err(e) => return Err(surface_error(e, "image acquisition")),
        };

        let view = *self.views.get(image_index as usize).ok_or_else(|| {
            AshError::VulkanError(format!("swapchain returned image {image_index} out of range"))
        })?;

        unsafe {
            self.device.reset_fences(&[in_flight])?;
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device.begin_command_buffer(command_buffer, &begin_info)?;
        }

        self.encoder.set_target(command_buffer, view);
        self.recording = Some((slot, image_index));
        Ok(Some(&mut self.encoder))
    }

    fn end_frame(&mut self) -> Result<()> {
        let (slot, image_index) = self
            .recording
            .take()
            .ok_or_else(|| AshError::precondition("end_frame without begin_frame"))?;
        let frame = self.frame(slot)?;
        let command_buffer = frame.command_buffer;
        let wait_semaphores = [frame.image_available];
        let in_flight = frame.in_flight;
        let signal_semaphores = [self.render_finished[image_index as usize]];

        unsafe {
            self.device.end_command_buffer(command_buffer)?;

            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::default()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&command_buffers)
                .signal_semaphores(&signal_semaphores);
            self.device
                .queue_submit(self.queue, &[submit_info], in_flight)
                .map_err(|e| AshError::VulkanError(format!("Failed to submit frame: {e}")))?;
        }

        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        match unsafe {
            self.context
                .swapchain_loader
                .queue_present(self.queue, &present_info)
        } {
            Ok(false) => Ok(()),
            Ok(true) => {
                log::debug!("Presented to a suboptimal swapchain");
                Ok(())
            }
            Err(e) => Err(surface_error(e, "presentation")),
        }
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        self.build(extent)
    }
}

impl Drop for AshSwapchain {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("device_wait_idle failed during swapchain teardown: {e}");
            }
        }
        self.destroy_images();
        unsafe {
            for frame in self.frames.drain(..) {
                self.device.destroy_semaphore(frame.image_available, None);
                self.device.destroy_fence(frame.in_flight, None);
            }
            self.device.destroy_command_pool(self.command_pool, None);
            if self.swapchain != vk::SwapchainKHR::null() {
                self.context
                    .swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn fixed_surface_extent_wins() {
        let caps = capabilities(vk::Extent2D {
            width: 1280,
            height: 720,
        });
        let extent = choose_extent(&caps, vk::Extent2D { width: 800, height: 600 });
        assert_eq!(extent, vk::Extent2D { width: 1280, height: 720 });
    }

    #[test]
    fn free_extent_is_clamped() {
        let caps = capabilities(vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        });
        let extent = choose_extent(&caps, vk::Extent2D { width: 9000, height: 600 });
        assert_eq!(extent, vk::Extent2D { width: 4096, height: 600 });
    }

    #[test]
    fn image_count_respects_maximum() {
        let mut caps = capabilities(vk::Extent2D::default());
        assert_eq!(choose_image_count(&caps), 3);
        caps.min_image_count = 3;
        assert_eq!(choose_image_count(&caps), 3);
        caps.max_image_count = 0;
        assert_eq!(choose_image_count(&caps), 4);
    }

    #[test]
    fn presentation_failures_map_to_surface_loss() {
        assert!(surface_error(vk::Result::ERROR_OUT_OF_DATE_KHR, "present").is_surface_loss());
        assert!(surface_error(vk::Result::ERROR_SURFACE_LOST_KHR, "acquire").is_surface_loss());
        assert!(!surface_error(vk::Result::ERROR_DEVICE_LOST, "present").is_surface_loss());
    }
}
