use ash::vk;

use crate::gpu::{is_zero_extent, GpuDevice, ImageDesc, SampledImage};
use crate::{AshError, Result};

/// Size-dependent images written by one pass and read by a later one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetId {
    GBufferNormal,
    GBufferAlbedo,
    GBufferDepth,
    SceneColor,
    EdgeMask,
    BlendWeights,
}

impl TargetId {
    pub const ALL: [TargetId; 6] = [
        TargetId::GBufferNormal,
        TargetId::GBufferAlbedo,
        TargetId::GBufferDepth,
        TargetId::SceneColor,
        TargetId::EdgeMask,
        TargetId::BlendWeights,
    ];

    pub fn format(self) -> vk::Format {
        match self {
            TargetId::GBufferNormal => vk::Format::R16G16B16A16_SFLOAT,
            TargetId::GBufferAlbedo | TargetId::SceneColor | TargetId::BlendWeights => {
                vk::Format::R8G8B8A8_UNORM
            }
            TargetId::GBufferDepth => vk::Format::D32_SFLOAT,
            TargetId::EdgeMask => vk::Format::R8G8_UNORM,
        }
    }

    pub fn usage(self) -> vk::ImageUsageFlags {
        match self {
            TargetId::GBufferNormal | TargetId::GBufferAlbedo => {
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT
            }
            TargetId::GBufferDepth => {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT
            }
            TargetId::SceneColor | TargetId::EdgeMask | TargetId::BlendWeights => {
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TargetId::GBufferNormal => "gbuffer-normal",
            TargetId::GBufferAlbedo => "gbuffer-albedo",
            TargetId::GBufferDepth => "gbuffer-depth",
            TargetId::SceneColor => "scene-color",
            TargetId::EdgeMask => "edge-mask",
            TargetId::BlendWeights => "blend-weights",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Owns every size-dependent pass target and tracks which ones the current
/// frame has already produced.
#[derive(Default)]
pub struct RenderTargetArena {
    images: [Option<SampledImage>; 6],
    produced: [bool; 6],
    extent: vk::Extent2D,
    generation: u64,
}

impl RenderTargetArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Destroys and recreates every target at `extent`.
    pub fn recreate<D: GpuDevice>(&mut self, device: &mut D, extent: vk::Extent2D) -> Result<()> {
        if is_zero_extent(extent) {
            return Err(AshError::PreconditionViolated(format!(
                "render targets cannot be {}x{}",
                extent.width, extent.height
            )));
        }

        self.destroy(device);
        for id in TargetId::ALL {
            let image = device.create_image(&ImageDesc {
                extent,
                format: id.format(),
                usage: id.usage(),
                label: id.name(),
            })?;
            self.images[id.slot()] = Some(image);
        }
        self.extent = extent;
        self.generation += 1;
        log::debug!(
            "Render targets recreated at {}x{} (generation {})",
            extent.width,
            extent.height,
            self.generation
        );
        Ok(())
    }

    pub fn get(&self, id: TargetId) -> Result<SampledImage> {
        self.images[id.slot()].ok_or_else(|| {
            AshError::PreconditionViolated(format!("render target {} does not exist", id.name()))
        })
    }

    /// Returns `id` for sampling, failing if this frame has not written it yet.
    pub fn require_produced(&self, id: TargetId) -> Result<SampledImage> {
        let image = self.get(id)?;
        if is_zero_extent(image.extent) {
            return Err(AshError::PreconditionViolated(format!(
                "render target {} is zero-sized",
                id.name()
            )));
        }
        if !self.produced[id.slot()] {
            return Err(AshError::PreconditionViolated(format!(
                "render target {} read before it was written this frame",
                id.name()
            )));
        }
        Ok(image)
    }

    pub fn begin_frame(&mut self) {
        self.produced = [false; 6];
    }

    pub fn mark_produced(&mut self, id: TargetId) {
        self.produced[id.slot()] = true;
    }

    pub fn is_produced(&self, id: TargetId) -> bool {
        self.produced[id.slot()]
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn destroy<D: GpuDevice>(&mut self, device: &mut D) {
        for image in self.images.iter_mut().filter_map(Option::take) {
            device.destroy_image(&image);
        }
        self.produced = [false; 6];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{self, HeadlessDevice};

    fn device() -> HeadlessDevice {
        let (device, _surface) = headless::create(vk::Extent2D { width: 8, height: 8 }, 2);
        device
    }

    #[test]
    fn recreation_replaces_every_target() {
        let mut device = device();
        let mut arena = RenderTargetArena::new();
        arena.recreate(&mut device, vk::Extent2D { width: 320, height: 240 }).unwrap();
        let first = arena.get(TargetId::SceneColor).unwrap();

        arena.recreate(&mut device, vk::Extent2D { width: 640, height: 480 }).unwrap();
        let second = arena.get(TargetId::SceneColor).unwrap();
        assert_ne!(first.image, second.image);
        assert_eq!(second.extent, vk::Extent2D { width: 640, height: 480 });
        assert_eq!(device.live_images(), TargetId::ALL.len());
        assert_eq!(arena.generation(), 2);

        let depth = device.image_desc(arena.get(TargetId::GBufferDepth).unwrap().image).unwrap();
        assert_eq!(depth.format, vk::Format::D32_SFLOAT);
    }

    #[test]
    fn targets_must_be_produced_before_sampling() {
        let mut device = device();
        let mut arena = RenderTargetArena::new();
        arena.recreate(&mut device, vk::Extent2D { width: 16, height: 16 }).unwrap();

        arena.begin_frame();
        assert!(!arena.is_produced(TargetId::EdgeMask));
        assert!(arena.require_produced(TargetId::EdgeMask).is_err());

        arena.mark_produced(TargetId::EdgeMask);
        assert!(arena.is_produced(TargetId::EdgeMask));
        assert!(arena.require_produced(TargetId::EdgeMask).is_ok());

        arena.begin_frame();
        assert!(!arena.is_produced(TargetId::EdgeMask));
    }

    #[test]
    fn zero_sized_targets_are_refused() {
        let mut device = device();
        let mut arena = RenderTargetArena::new();
        assert!(matches!(
            arena.recreate(&mut device, vk::Extent2D { width: 0, height: 16 }),
            Err(AshError::PreconditionViolated(_))
        ));
        assert!(arena.get(TargetId::SceneColor).is_err());
    }
}
