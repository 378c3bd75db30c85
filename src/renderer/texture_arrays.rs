use std::collections::HashMap;

use ash::vk;

use crate::gpu::{BindingSlot, BoundResource, GpuDevice, PoolDesc, SampledImage};
use crate::{AshError, Result};

use super::binding_table::{LayoutHandle, PoolHandle, ResourceBindingTable, SetHandle};
use super::object_data::NO_TEXTURE;
use super::scene::{ObjectId, SceneObjectRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Albedo,
    Normal,
    Height,
}

impl TextureKind {
    pub const ALL: [TextureKind; 3] = [TextureKind::Albedo, TextureKind::Normal, TextureKind::Height];

    pub fn name(self) -> &'static str {
        match self {
            TextureKind::Albedo => "albedo",
            TextureKind::Normal => "normal",
            TextureKind::Height => "height",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// A runtime-sized sampler array of one texture kind, one set per frame slot.
struct TextureArray {
    kind: TextureKind,
    layout: LayoutHandle,
    pool: PoolHandle,
    max: u32,
    images: Vec<SampledImage>,
    indices: HashMap<ObjectId, u32>,
    sets: Vec<SetHandle>,
    /// Element count the current sets were allocated with
    allocated: u32,
}

impl TextureArray {
    fn new<D: GpuDevice>(
        device: &mut D,
        table: &mut ResourceBindingTable,
        kind: TextureKind,
        frames_in_flight: usize,
        max: u32,
    ) -> Result<Self> {
        let layout = table.declare_layout(
            device,
            &[BindingSlot::variable(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
                max,
            )],
        )?;
        let frames = frames_in_flight as u32;
        let pool = table.create_pool(
            device,
            PoolDesc {
                max_sets: frames,
                sizes: vec![(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, frames * max)],
                update_after_bind: true,
            },
        )?;

        let mut array = Self {
            kind,
            layout,
            pool,
            max,
            images: Vec::new(),
            indices: HashMap::new(),
            sets: Vec::with_capacity(frames_in_flight),
            allocated: 0,
        };
        array.allocate_sets(device, table, frames_in_flight)?;
        Ok(array)
    }

    /// Returns whether the image is new to the array.
    fn register(&mut self, id: ObjectId, image: SampledImage) -> Result<Registration> {
        if let Some(&index) = self.indices.get(&id) {
            if self.images[index as usize] == image {
                return Ok(Registration::Unchanged);
            }
            self.images[index as usize] = image;
            return Ok(Registration::Replaced(index));
        }

        if self.images.len() as u32 >= self.max {
            return Err(AshError::Configuration(format!(
                "{} texture array is full ({} textures)",
                self.kind.name(),
                self.max
            )));
        }
        let index = self.images.len() as u32;
        self.images.push(image);
        self.indices.insert(id, index);
        Ok(Registration::Added)
    }

    fn allocate_sets<D: GpuDevice>(
        &mut self,
        device: &mut D,
        table: &mut ResourceBindingTable,
        frames_in_flight: usize,
    ) -> Result<()> {
        let count = self.images.len() as u32;
        self.sets.clear();
        for _ in 0..frames_in_flight {
            let set = table.allocate_set(device, self.layout, self.pool, Some(count))?;
            table.write_array(
                set,
                0,
                self.images
                    .iter()
                    .enumerate()
                    .map(|(index, image)| (index as u32, BoundResource::sampled(image))),
            )?;
            table.build(device, set)?;
            self.sets.push(set);
        }
        self.allocated = count;
        Ok(())
    }

    fn reallocate<D: GpuDevice>(&mut self, device: &mut D, table: &mut ResourceBindingTable) -> Result<()> {
        let frames_in_flight = self.sets.len();
        table.reset_pool(device, self.pool)?;
        self.allocate_sets(device, table, frames_in_flight)?;
        log::debug!(
            "{} texture array reallocated with {} elements",
            self.kind.name(),
            self.allocated
        );
        Ok(())
    }
}

enum Registration {
    Unchanged,
    Added,
    Replaced(u32),
}

/// Albedo, normal and height texture arrays indexed densely in registration order.
pub struct TextureArrays {
    arrays: [TextureArray; 3],
    rebuild_count: u32,
}

impl TextureArrays {
    pub fn new<D: GpuDevice>(
        device: &mut D,
        table: &mut ResourceBindingTable,
        frames_in_flight: usize,
        max_per_kind: u32,
    ) -> Result<Self> {
        Ok(Self {
            arrays: [
                TextureArray::new(device, table, TextureKind::Albedo, frames_in_flight, max_per_kind)?,
                TextureArray::new(device, table, TextureKind::Normal, frames_in_flight, max_per_kind)?,
                TextureArray::new(device, table, TextureKind::Height, frames_in_flight, max_per_kind)?,
            ],
            rebuild_count: 0,
        })
    }

    /// Registers textures of objects seen for the first time. Arrays that
    /// grew are reallocated for every frame slot with their exact new size,
    /// after draining the device. Returns whether any array was reallocated.
    pub fn sync<D: GpuDevice>(
        &mut self,
        device: &mut D,
        table: &mut ResourceBindingTable,
        objects: &[SceneObjectRecord],
    ) -> Result<bool> {
        let mut grown = [false; 3];
        let mut replaced: Vec<(TextureKind, u32)> = Vec::new();

        for object in objects {
            let Some(renderable) = object.renderable() else {
                continue;
            };
            for kind in TextureKind::ALL {
                let Some(image) = renderable.texture(kind) else {
                    continue;
                };
                match self.arrays[kind.slot()].register(object.id, *image)? {
                    Registration::Unchanged => {}
                    Registration::Added => grown[kind.slot()] = true,
                    Registration::Replaced(index) => replaced.push((kind, index)),
                }
            }
        }

        if grown.contains(&true) {
            device.wait_idle()?;
            for kind in TextureKind::ALL {
                if grown[kind.slot()] {
                    self.arrays[kind.slot()].reallocate(device, table)?;
                }
            }
            self.rebuild_count += 1;
        }

        // Update-after-bind elements can be rewritten while earlier frames still reference the set.
        for (kind, index) in replaced {
            let array = &self.arrays[kind.slot()];
            if index >= array.allocated {
                continue;
            }
            let resource = BoundResource::sampled(&array.images[index as usize]);
            for set in array.sets.clone() {
                table.rewrite_element(device, set, 0, index, resource)?;
            }
        }

        Ok(grown.contains(&true))
    }

    /// Dense array index of `id`'s texture of `kind`, or -1.
    pub fn index_of(&self, kind: TextureKind, id: ObjectId) -> i32 {
        self.arrays[kind.slot()]
            .indices
            .get(&id)
            .map_or(NO_TEXTURE, |&index| index as i32)
    }

    pub fn len(&self, kind: TextureKind) -> usize {
        self.arrays[kind.slot()].images.len()
    }

    pub fn layout(&self, kind: TextureKind) -> LayoutHandle {
        self.arrays[kind.slot()].layout
    }

    pub fn set(&self, kind: TextureKind, frame_index: usize) -> Result<SetHandle> {
        self.arrays[kind.slot()]
            .sets
            .get(frame_index)
            .copied()
            .ok_or_else(|| {
                AshError::PreconditionViolated(format!(
                    "no {} texture set for frame {frame_index}",
                    kind.name()
                ))
            })
    }

    /// Native sets for albedo, normal and height, in that order.
    pub fn raw_sets(&self, table: &ResourceBindingTable, frame_index: usize) -> Result<[vk::DescriptorSet; 3]> {
        Ok([
            table.raw_set(self.set(TextureKind::Albedo, frame_index)?)?,
            table.raw_set(self.set(TextureKind::Normal, frame_index)?)?,
            table.raw_set(self.set(TextureKind::Height, frame_index)?)?,
        ])
    }

    pub fn rebuild_count(&self) -> u32 {
        self.rebuild_count
    }
}
