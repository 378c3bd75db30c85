use ash::vk;

use crate::gpu::{BindingSlot, BoundResource, GpuDevice, PoolDesc};
use crate::{AshError, Result};

use super::binding_table::{LayoutHandle, PoolHandle, ResourceBindingTable, SetHandle};
use super::object_data::{GlobalFrameUniform, PerObjectGpuRecord};

pub const UNIFORM_BINDING: u32 = 0;
pub const OBJECT_BINDING: u32 = 1;

const RECORD_SIZE: vk::DeviceSize = std::mem::size_of::<PerObjectGpuRecord>() as vk::DeviceSize;
const UNIFORM_SIZE: vk::DeviceSize = std::mem::size_of::<GlobalFrameUniform>() as vk::DeviceSize;

/// Buffers and the global descriptor set of one frame slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSlot {
    pub uniform: vk::Buffer,
    pub objects: vk::Buffer,
    pub global_set: SetHandle,
}

/// One uniform buffer, one object storage buffer and one global set per
/// frame in flight. Growing the object capacity rebuilds every slot at once.
pub struct FrameResourceSet {
    slots: Vec<FrameSlot>,
    layout: LayoutHandle,
    pool: PoolHandle,
    capacity: usize,
    rebuild_count: u32,
}

impl FrameResourceSet {
    pub fn new<D: GpuDevice>(
        device: &mut D,
        table: &mut ResourceBindingTable,
        frames_in_flight: usize,
        initial_capacity: usize,
    ) -> Result<Self> {
        let stages = vk::ShaderStageFlags::ALL_GRAPHICS | vk::ShaderStageFlags::COMPUTE;
        let layout = table.declare_layout(
            device,
            &[
                BindingSlot::single(UNIFORM_BINDING, vk::DescriptorType::UNIFORM_BUFFER, stages),
                BindingSlot::single(OBJECT_BINDING, vk::DescriptorType::STORAGE_BUFFER, stages),
            ],
        )?;
        let frames = frames_in_flight as u32;
        let pool = table.create_pool(
            device,
            PoolDesc {
                max_sets: frames,
                sizes: vec![
                    (vk::DescriptorType::UNIFORM_BUFFER, frames),
                    (vk::DescriptorType::STORAGE_BUFFER, frames),
                ],
                update_after_bind: false,
            },
        )?;

        let capacity = initial_capacity.max(1);
        let mut slots = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            let uniform = device.create_buffer(UNIFORM_SIZE, vk::BufferUsageFlags::UNIFORM_BUFFER)?;
            let objects = device.create_buffer(
                RECORD_SIZE * capacity as vk::DeviceSize,
                vk::BufferUsageFlags::STORAGE_BUFFER,
            )?;
            let global_set = table.allocate_set(device, layout, pool, None)?;
            table.write(
                global_set,
                UNIFORM_BINDING,
                BoundResource::Buffer {
                    buffer: uniform,
                    range: UNIFORM_SIZE,
                },
            )?;
            table.write(
                global_set,
                OBJECT_BINDING,
                BoundResource::Buffer {
                    buffer: objects,
                    range: RECORD_SIZE * capacity as vk::DeviceSize,
                },
            )?;
            table.build(device, global_set)?;
            slots.push(FrameSlot {
                uniform,
                objects,
                global_set,
            });
        }

        log::info!(
            "Frame resources ready: {frames_in_flight} slots, {capacity} objects per slot"
        );

        Ok(Self {
            slots,
            layout,
            pool,
            capacity,
            rebuild_count: 0,
        })
    }

    /// Uniform and object buffers of `frame_index`.
    pub fn acquire_slot(&self, frame_index: usize) -> Result<(vk::Buffer, vk::Buffer)> {
        let slot = self.slot(frame_index)?;
        Ok((slot.uniform, slot.objects))
    }

    pub fn slot(&self, frame_index: usize) -> Result<&FrameSlot> {
        self.slots.get(frame_index).ok_or_else(|| {
            AshError::PreconditionViolated(format!(
                "frame index {frame_index} out of range ({} slots)",
                self.slots.len()
            ))
        })
    }

    pub fn global_set(&self, table: &ResourceBindingTable, frame_index: usize) -> Result<vk::DescriptorSet> {
        table.raw_set(self.slot(frame_index)?.global_set)
    }

    /// Grows every slot's object buffer when `object_count` exceeds the
    /// current capacity. Returns whether a rebuild happened.
    ///
    /// The device is drained first: no slot's buffer may be replaced while a
    /// frame that reads it is still executing.
    pub fn ensure_capacity<D: GpuDevice>(
        &mut self,
        device: &mut D,
        table: &mut ResourceBindingTable,
        object_count: usize,
    ) -> Result<bool> {
        if object_count <= self.capacity {
            return Ok(false);
        }

        device.wait_idle()?;

        let capacity = object_count;
        let size = RECORD_SIZE * capacity as vk::DeviceSize;
        for slot in self.slots.iter_mut() {
            let objects = device.create_buffer(size, vk::BufferUsageFlags::STORAGE_BUFFER)?;
            table.rewrite(
                device,
                slot.global_set,
                OBJECT_BINDING,
                BoundResource::Buffer {
                    buffer: objects,
                    range: size,
                },
            )?;
            device.destroy_buffer(slot.objects);
            slot.objects = objects;
        }

        log::info!(
            "Object storage grown from {} to {capacity} records across {} frame slots",
            self.capacity,
            self.slots.len()
        );
        self.capacity = capacity;
        self.rebuild_count += 1;
        Ok(true)
    }

    pub fn write_global<D: GpuDevice>(
        &self,
        device: &mut D,
        frame_index: usize,
        uniform: &GlobalFrameUniform,
    ) -> Result<()> {
        let slot = self.slot(frame_index)?;
        device.write_buffer(slot.uniform, 0, bytemuck::bytes_of(uniform))
    }

    pub fn write_objects<D: GpuDevice>(
        &self,
        device: &mut D,
        frame_index: usize,
        records: &[PerObjectGpuRecord],
    ) -> Result<()> {
        if records.len() > self.capacity {
            return Err(AshError::PreconditionViolated(format!(
                "{} object records exceed slot capacity {}",
                records.len(),
                self.capacity
            )));
        }
        let slot = self.slot(frame_index)?;
        if records.is_empty() {
            return Ok(());
        }
        device.write_buffer(slot.objects, 0, bytemuck::cast_slice(records))
    }

    pub fn layout(&self) -> LayoutHandle {
        self.layout
    }

    pub fn pool(&self) -> PoolHandle {
        self.pool
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn rebuild_count(&self) -> u32 {
        self.rebuild_count
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    pub fn destroy<D: GpuDevice>(&mut self, device: &mut D) {
        for slot in self.slots.drain(..) {
            device.destroy_buffer(slot.uniform);
            device.destroy_buffer(slot.objects);
        }
    }
}
