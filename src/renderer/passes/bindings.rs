//! Descriptor sets that reference pass targets and lookup textures.

use ash::vk;

use crate::gpu::{BindingSlot, BoundResource, GpuDevice, PassKind, PoolDesc, SampledImage};
use crate::{AshError, Result};

use crate::renderer::binding_table::{LayoutHandle, ResourceBindingTable, SetHandle};
use crate::renderer::lookup::LookupTextures;
use crate::renderer::targets::{RenderTargetArena, TargetId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ImageSource {
    Target(TargetId),
    AreaLookup,
    SearchLookup,
}

struct ImageBinding {
    binding: u32,
    source: ImageSource,
}

const fn target(binding: u32, id: TargetId) -> ImageBinding {
    ImageBinding {
        binding,
        source: ImageSource::Target(id),
    }
}

const GBUFFER_INPUTS: &[ImageBinding] = &[
    target(0, TargetId::GBufferNormal),
    target(1, TargetId::GBufferAlbedo),
    target(2, TargetId::GBufferDepth),
];

const EDGE_INPUTS: &[ImageBinding] = &[target(0, TargetId::SceneColor)];

const BLEND_INPUTS: &[ImageBinding] = &[
    target(0, TargetId::EdgeMask),
    ImageBinding {
        binding: 1,
        source: ImageSource::AreaLookup,
    },
    ImageBinding {
        binding: 2,
        source: ImageSource::SearchLookup,
    },
];

const RESOLVE_INPUTS: &[ImageBinding] = &[
    target(0, TargetId::SceneColor),
    target(1, TargetId::BlendWeights),
];

/// Sets of one layout, one per frame slot.
struct SetGroup {
    kind: vk::DescriptorType,
    layout: LayoutHandle,
    sets: Vec<SetHandle>,
    inputs: &'static [ImageBinding],
}

impl SetGroup {
    fn new<D: GpuDevice>(
        device: &mut D,
        table: &mut ResourceBindingTable,
        frames_in_flight: usize,
        kind: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
        inputs: &'static [ImageBinding],
    ) -> Result<Self> {
        let slots: Vec<_> = inputs
            .iter()
            .map(|input| BindingSlot::single(input.binding, kind, stages))
            .collect();
        let layout = table.declare_layout(device, &slots)?;
        let frames = frames_in_flight as u32;
        let pool = table.create_pool(
            device,
            PoolDesc {
                max_sets: frames,
                sizes: vec![(kind, frames * inputs.len() as u32)],
                update_after_bind: false,
            },
        )?;
        let sets = (0..frames_in_flight)
            .map(|_| table.allocate_set(device, layout, pool, None))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            kind,
            layout,
            sets,
            inputs,
        })
    }

    fn resource(&self, input: &ImageBinding, image: &SampledImage) -> BoundResource {
        if self.kind == vk::DescriptorType::INPUT_ATTACHMENT {
            let layout = if input.source == ImageSource::Target(TargetId::GBufferDepth) {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            } else {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            };
            BoundResource::Image {
                view: image.view,
                sampler: vk::Sampler::null(),
                layout,
            }
        } else {
            BoundResource::sampled(image)
        }
    }

    fn write<D: GpuDevice>(
        &self,
        device: &mut D,
        table: &mut ResourceBindingTable,
        arena: &RenderTargetArena,
        lookup: &LookupTextures,
        mode: WriteMode,
    ) -> Result<()> {
        for &set in &self.sets {
            for input in self.inputs {
                let image = match input.source {
                    ImageSource::Target(id) => arena.get(id)?,
                    ImageSource::AreaLookup => *lookup.area(),
                    ImageSource::SearchLookup => *lookup.search(),
                };
                let resource = self.resource(input, &image);
                match mode {
                    WriteMode::Initial => table.write(set, input.binding, resource)?,
                    WriteMode::Rewrite => table.rewrite(device, set, input.binding, resource)?,
                }
            }
            if mode == WriteMode::Initial {
                table.build(device, set)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Stage and build freshly allocated sets
    Initial,
    /// Repoint built sets, e.g. after the targets were recreated
    Rewrite,
}

/// The image-backed sets of every pass, one per frame slot.
pub struct PassBindings {
    gbuffer_input: SetGroup,
    edge: SetGroup,
    blend: SetGroup,
    resolve: SetGroup,
}

impl PassBindings {
    pub fn new<D: GpuDevice>(
        device: &mut D,
        table: &mut ResourceBindingTable,
        frames_in_flight: usize,
    ) -> Result<Self> {
        let sampled = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
        let post_stages = vk::ShaderStageFlags::ALL_GRAPHICS;
        Ok(Self {
            gbuffer_input: SetGroup::new(
                device,
                table,
                frames_in_flight,
                vk::DescriptorType::INPUT_ATTACHMENT,
                vk::ShaderStageFlags::FRAGMENT,
                GBUFFER_INPUTS,
            )?,
            edge: SetGroup::new(device, table, frames_in_flight, sampled, post_stages, EDGE_INPUTS)?,
            blend: SetGroup::new(device, table, frames_in_flight, sampled, post_stages, BLEND_INPUTS)?,
            resolve: SetGroup::new(device, table, frames_in_flight, sampled, post_stages, RESOLVE_INPUTS)?,
        })
    }

    /// Writes the current targets and lookup textures into every set of every slot.
    pub fn write_images<D: GpuDevice>(
        &self,
        device: &mut D,
        table: &mut ResourceBindingTable,
        arena: &RenderTargetArena,
        lookup: &LookupTextures,
        mode: WriteMode,
    ) -> Result<()> {
        for group in self.groups() {
            group.write(device, table, arena, lookup, mode)?;
        }
        Ok(())
    }

    /// The image set `pass` binds at set index 1 in `frame_index`.
    pub fn set(&self, pass: PassKind, frame_index: usize) -> Result<SetHandle> {
        self.group(pass).sets.get(frame_index).copied().ok_or_else(|| {
            AshError::PreconditionViolated(format!(
                "no {} descriptor set for frame {frame_index}",
                pass.name()
            ))
        })
    }

    pub fn raw_set(&self, table: &ResourceBindingTable, pass: PassKind, frame_index: usize) -> Result<vk::DescriptorSet> {
        table.raw_set(self.set(pass, frame_index)?)
    }

    pub fn layout(&self, pass: PassKind) -> LayoutHandle {
        self.group(pass).layout
    }

    /// Every set handle, for all passes and slots.
    pub fn all_sets(&self) -> impl Iterator<Item = SetHandle> + '_ {
        self.groups().into_iter().flat_map(|group| group.sets.iter().copied())
    }

    fn group(&self, pass: PassKind) -> &SetGroup {
        match pass {
            PassKind::Geometry => &self.gbuffer_input,
            PassKind::EdgeDetection => &self.edge,
            PassKind::BlendWeight => &self.blend,
            PassKind::Resolve => &self.resolve,
        }
    }

    fn groups(&self) -> [&SetGroup; 4] {
        [&self.gbuffer_input, &self.edge, &self.blend, &self.resolve]
    }
}

/// Native layouts every pipeline is built against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassLayouts {
    pub global: vk::DescriptorSetLayout,
    /// albedo, normal, height
    pub textures: [vk::DescriptorSetLayout; 3],
    pub gbuffer_input: vk::DescriptorSetLayout,
    pub edge: vk::DescriptorSetLayout,
    pub blend: vk::DescriptorSetLayout,
    pub resolve: vk::DescriptorSetLayout,
}
