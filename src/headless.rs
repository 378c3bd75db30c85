//! Headless backend for CI, tests and benchmarks (no GPU, no window).
//!
//! [`HeadlessDevice`] hands out fake handles and keeps every buffer's bytes
//! and every descriptor write on the CPU. [`HeadlessSurface`] records each
//! frame's commands and simulates frames in flight on a [`GpuTimeline`]
//! shared with the device, so `wait_idle` really drains submitted frames.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use ash::vk::{self, Handle};
use parking_lot::Mutex;

use crate::gpu::{
    ArrayLength, AttachmentRef, BindingSlot, BoundResource, CommandEncoder, DescriptorWrite,
    GpuDevice, ImageDesc, MeshBuffers, PassBegin, PassKind, PassPipeline, PipelineDesc, PoolDesc,
    PresentSurface, SampledImage, ShaderProgram, SurfaceEvent,
};
use crate::{AshError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Submission {
    pub frame: u64,
    pub slot: usize,
}

/// Submitted-but-unfinished frames. Frames complete in submission order.
#[derive(Debug)]
pub struct GpuTimeline {
    frames_in_flight: usize,
    in_flight: VecDeque<Submission>,
    submitted: u64,
    max_in_flight: usize,
    max_frame_distance: u64,
}

impl GpuTimeline {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight,
            in_flight: VecDeque::new(),
            submitted: 0,
            max_in_flight: 0,
            max_frame_distance: 0,
        }
    }

    /// Completes frames up to and including the last one submitted for `slot`.
    fn wait_for_slot(&mut self, slot: usize) {
        if let Some(position) = self.in_flight.iter().rposition(|s| s.slot == slot) {
            self.in_flight.drain(..=position);
        }
    }

    fn submit(&mut self, slot: usize) -> Result<u64> {
        if self.in_flight.len() >= self.frames_in_flight {
            return Err(AshError::PreconditionViolated(format!(
                "submitting a frame with {} already in flight (limit {})",
                self.in_flight.len(),
                self.frames_in_flight
            )));
        }
        let frame = self.submitted;
        self.submitted += 1;
        self.in_flight.push_back(Submission { frame, slot });

        self.max_in_flight = self.max_in_flight.max(self.in_flight.len());
        if let (Some(oldest), Some(newest)) = (self.in_flight.front(), self.in_flight.back()) {
            self.max_frame_distance = self.max_frame_distance.max(newest.frame - oldest.frame);
        }
        Ok(frame)
    }

    fn drain(&mut self) {
        self.in_flight.clear();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Most frames ever executing at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Largest gap between the oldest and newest frame executing at once
    pub fn max_frame_distance(&self) -> u64 {
        self.max_frame_distance
    }
}

/// Device-side calls, in order, with the number of frames executing at the time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceCall {
    CreateBuffer { buffer: vk::Buffer, size: vk::DeviceSize },
    WriteBuffer { buffer: vk::Buffer, offset: vk::DeviceSize, len: usize },
    DestroyBuffer { buffer: vk::Buffer, in_flight: usize },
    CreateImage { image: vk::Image, extent: vk::Extent2D, format: vk::Format },
    UploadImage { image: vk::Image, len: usize },
    DestroyImage { image: vk::Image, in_flight: usize },
    ResetPool { pool: vk::DescriptorPool, in_flight: usize },
    AllocateSet { set: vk::DescriptorSet, variable_count: Option<u32> },
    UpdateSet { set: vk::DescriptorSet, writes: usize },
    CreatePipeline { pipeline: vk::Pipeline, program: ShaderProgram, extent: vk::Extent2D },
    DestroyPipeline { pipeline: vk::Pipeline, in_flight: usize },
    WaitIdle { drained: usize },
}

struct HeadlessImage {
    desc: ImageDesc,
    texels: Option<Vec<u8>>,
}

struct HeadlessPool {
    desc: PoolDesc,
    sets: u32,
    used: HashMap<vk::DescriptorType, u32>,
}

struct HeadlessSet {
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    variable_count: Option<u32>,
    bindings: HashMap<(u32, u32), BoundResource>,
}

pub struct HeadlessDevice {
    timeline: Arc<Mutex<GpuTimeline>>,
    next_handle: u64,
    buffers: HashMap<vk::Buffer, Vec<u8>>,
    images: HashMap<vk::Image, HeadlessImage>,
    layouts: HashMap<vk::DescriptorSetLayout, Vec<BindingSlot>>,
    pools: HashMap<vk::DescriptorPool, HeadlessPool>,
    sets: HashMap<vk::DescriptorSet, HeadlessSet>,
    pipelines: HashMap<vk::Pipeline, PipelineDesc>,
    calls: Vec<DeviceCall>,
}

impl HeadlessDevice {
    pub fn new(timeline: Arc<Mutex<GpuTimeline>>) -> Self {
        Self {
            timeline,
            next_handle: 1,
            buffers: HashMap::new(),
            images: HashMap::new(),
            layouts: HashMap::new(),
            pools: HashMap::new(),
            sets: HashMap::new(),
            pipelines: HashMap::new(),
            calls: Vec::new(),
        }
    }

    fn handle<H: Handle>(&mut self) -> H {
        let raw = self.next_handle;
        self.next_handle += 1;
        H::from_raw(raw)
    }

    fn in_flight(&self) -> usize {
        self.timeline.lock().in_flight()
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn buffer_data(&self, buffer: vk::Buffer) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    pub fn image_texels(&self, image: vk::Image) -> Option<&[u8]> {
        self.images.get(&image)?.texels.as_deref()
    }

    pub fn image_desc(&self, image: vk::Image) -> Option<ImageDesc> {
        self.images.get(&image).map(|image| image.desc)
    }

    /// What `set` currently references at (`binding`, `element`).
    pub fn bound(&self, set: vk::DescriptorSet, binding: u32, element: u32) -> Option<BoundResource> {
        self.sets.get(&set)?.bindings.get(&(binding, element)).copied()
    }

    pub fn variable_count(&self, set: vk::DescriptorSet) -> Option<u32> {
        self.sets.get(&set)?.variable_count
    }

    pub fn pipeline_desc(&self, pipeline: vk::Pipeline) -> Option<&PipelineDesc> {
        self.pipelines.get(&pipeline)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_images(&self) -> usize {
        self.images.len()
    }

    pub fn live_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    pub fn wait_idle_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, DeviceCall::WaitIdle { .. }))
            .count()
    }

    pub fn timeline(&self) -> Arc<Mutex<GpuTimeline>> {
        Arc::clone(&self.timeline)
    }

    fn set_slot(&self, set: vk::DescriptorSet, binding: u32) -> Result<(BindingSlot, u32)> {
        let entry = self
            .sets
            .get(&set)
            .ok_or_else(|| AshError::precondition(format!("unknown descriptor set {set:?}")))?;
        let slot = self
            .layouts
            .get(&entry.layout)
            .and_then(|slots| slots.iter().find(|slot| slot.binding == binding))
            .copied()
            .ok_or_else(|| AshError::precondition(format!("binding {binding} not in layout")))?;
        let count = match slot.length {
            ArrayLength::Variable { .. } => entry.variable_count.unwrap_or(0),
            length => length.max_count(),
        };
        Ok((slot, count))
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_buffer(&mut self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<vk::Buffer> {
        if size == 0 {
            return Err(AshError::precondition(format!("zero-sized {usage:?} buffer")));
        }
        let buffer = self.handle();
        self.buffers.insert(buffer, vec![0; size as usize]);
        self.calls.push(DeviceCall::CreateBuffer { buffer, size });
        Ok(buffer)
    }

    fn write_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        let bytes = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| AshError::precondition(format!("write to unknown buffer {buffer:?}")))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            return Err(AshError::PreconditionViolated(format!(
                "write of {} bytes at {start} overflows {}-byte buffer",
                data.len(),
                bytes.len()
            )));
        }
        bytes[start..end].copy_from_slice(data);
        self.calls.push(DeviceCall::WriteBuffer {
            buffer,
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        let in_flight = self.in_flight();
        self.buffers.remove(&buffer);
        self.calls.push(DeviceCall::DestroyBuffer { buffer, in_flight });
    }

    fn create_image(&mut self, desc: &ImageDesc) -> Result<SampledImage> {
        let image: vk::Image = self.handle();
        let view = self.handle();
        let sampler = if desc.usage.contains(vk::ImageUsageFlags::SAMPLED) {
            self.handle()
        } else {
            vk::Sampler::null()
        };
        self.images.insert(
            image,
            HeadlessImage {
                desc: *desc,
                texels: None,
            },
        );
        self.calls.push(DeviceCall::CreateImage {
            image,
            extent: desc.extent,
            format: desc.format,
        });
        Ok(SampledImage {
            image,
            view,
            sampler,
            extent: desc.extent,
            format: desc.format,
        })
    }

    fn upload_image(&mut self, image: &SampledImage, texels: &[u8]) -> Result<()> {
        let entry = self
            .images
            .get_mut(&image.image)
            .ok_or_else(|| AshError::precondition("upload to unknown image"))?;
        entry.texels = Some(texels.to_vec());
        self.calls.push(DeviceCall::UploadImage {
            image: image.image,
            len: texels.len(),
        });
        Ok(())
    }

    fn destroy_image(&mut self, image: &SampledImage) {
        let in_flight = self.in_flight();
        self.images.remove(&image.image);
        self.calls.push(DeviceCall::DestroyImage {
            image: image.image,
            in_flight,
        });
    }

    fn create_descriptor_set_layout(&mut self, slots: &[BindingSlot]) -> Result<vk::DescriptorSetLayout> {
        let layout = self.handle();
        self.layouts.insert(layout, slots.to_vec());
        Ok(layout)
    }

    fn create_descriptor_pool(&mut self, desc: &PoolDesc) -> Result<vk::DescriptorPool> {
        let pool = self.handle();
        self.pools.insert(
            pool,
            HeadlessPool {
                desc: desc.clone(),
                sets: 0,
                used: HashMap::new(),
            },
        );
        Ok(pool)
    }

    fn reset_descriptor_pool(&mut self, pool: vk::DescriptorPool) -> Result<()> {
        let in_flight = self.in_flight();
        let entry = self
            .pools
            .get_mut(&pool)
            .ok_or_else(|| AshError::precondition("reset of unknown descriptor pool"))?;
        entry.sets = 0;
        entry.used.clear();
        self.sets.retain(|_, set| set.pool != pool);
        self.calls.push(DeviceCall::ResetPool { pool, in_flight });
        Ok(())
    }

    fn allocate_descriptor_set(
        &mut self,
        layout: vk::DescriptorSetLayout,
        pool: vk::DescriptorPool,
        variable_count: Option<u32>,
    ) -> Result<vk::DescriptorSet> {
        let slots = self
            .layouts
            .get(&layout)
            .ok_or_else(|| AshError::precondition("allocation from unknown layout"))?;
        let mut demand: HashMap<vk::DescriptorType, u32> = HashMap::new();
        for slot in slots {
            let count = match slot.length {
                ArrayLength::Variable { max } => {
                    let count = variable_count.unwrap_or(max);
                    if count > max {
                        return Err(AshError::Vk(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
                    }
                    count
                }
                length => length.max_count(),
            };
            *demand.entry(slot.kind).or_default() += count;
        }

        let entry = self
            .pools
            .get_mut(&pool)
            .ok_or_else(|| AshError::precondition("allocation from unknown descriptor pool"))?;
        if entry.sets >= entry.desc.max_sets {
            return Err(AshError::Vk(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        for (kind, count) in &demand {
            let capacity: u32 = entry
                .desc
                .sizes
                .iter()
                .filter(|(ty, _)| ty == kind)
                .map(|(_, n)| n)
                .sum();
            if entry.used.get(kind).copied().unwrap_or(0) + count > capacity {
                return Err(AshError::Vk(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
            }
        }
        entry.sets += 1;
        for (kind, count) in demand {
            *entry.used.entry(kind).or_default() += count;
        }

        let set = self.handle();
        self.sets.insert(
            set,
            HeadlessSet {
                layout,
                pool,
                variable_count,
                bindings: HashMap::new(),
            },
        );
        self.calls.push(DeviceCall::AllocateSet { set, variable_count });
        Ok(set)
    }

    fn update_descriptor_set(&mut self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) -> Result<()> {
        for write in writes {
            let (slot, count) = self.set_slot(set, write.binding)?;
            if slot.kind != write.kind {
                return Err(AshError::PreconditionViolated(format!(
                    "binding {} is {:?}, write is {:?}",
                    write.binding, slot.kind, write.kind
                )));
            }
            let end = write.first_element + write.resources.len() as u32;
            if end > count {
                return Err(AshError::PreconditionViolated(format!(
                    "write to elements {}..{end} of binding {} with {count} elements",
                    write.first_element, write.binding
                )));
            }
        }

        let entry = self
            .sets
            .get_mut(&set)
            .ok_or_else(|| AshError::precondition("update of unknown descriptor set"))?;
        for write in writes {
            for (offset, resource) in write.resources.iter().enumerate() {
                entry
                    .bindings
                    .insert((write.binding, write.first_element + offset as u32), *resource);
            }
        }
        self.calls.push(DeviceCall::UpdateSet {
            set,
            writes: writes.len(),
        });
        Ok(())
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PassPipeline> {
        for layout in &desc.set_layouts {
            if !self.layouts.contains_key(layout) {
                return Err(AshError::precondition(format!(
                    "{:?} pipeline references unknown layout",
                    desc.program
                )));
            }
        }
        let pipeline = self.handle();
        let layout = self.handle();
        self.pipelines.insert(pipeline, desc.clone());
        self.calls.push(DeviceCall::CreatePipeline {
            pipeline,
            program: desc.program,
            extent: desc.extent,
        });
        Ok(PassPipeline {
            pipeline,
            layout,
            program: desc.program,
            extent: desc.extent,
        })
    }

    fn destroy_pipeline(&mut self, pipeline: &PassPipeline) {
        let in_flight = self.in_flight();
        self.pipelines.remove(&pipeline.pipeline);
        self.calls.push(DeviceCall::DestroyPipeline {
            pipeline: pipeline.pipeline,
            in_flight,
        });
    }

    fn wait_idle(&mut self) -> Result<()> {
        let mut timeline = self.timeline.lock();
        let drained = timeline.in_flight();
        timeline.drain();
        drop(timeline);
        self.calls.push(DeviceCall::WaitIdle { drained });
        Ok(())
    }
}

/// One recorded command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    BeginPass {
        pass: PassKind,
        extent: vk::Extent2D,
        attachments: Vec<AttachmentRef>,
    },
    NextSubpass,
    EndPass,
    BindPipeline {
        program: ShaderProgram,
        pipeline: vk::Pipeline,
        /// Viewport baked into the pipeline
        extent: vk::Extent2D,
    },
    BindDescriptorSets {
        program: ShaderProgram,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    PushConstants(Vec<u8>),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawMesh(MeshBuffers),
}

impl Command {
    pub fn is_draw(&self) -> bool {
        matches!(self, Command::Draw { .. } | Command::DrawMesh(_))
    }
}

#[derive(Default)]
pub struct HeadlessEncoder {
    commands: Vec<Command>,
    open_pass: Option<(PassKind, u32)>,
}

impl HeadlessEncoder {
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

impl CommandEncoder for HeadlessEncoder {
    fn begin_pass(&mut self, begin: &PassBegin<'_>) -> Result<()> {
        if let Some((open, _)) = self.open_pass {
            return Err(AshError::PreconditionViolated(format!(
                "{} pass started inside {} pass",
                begin.pass.name(),
                open.name()
            )));
        }
        for attachment in begin.attachments {
            if let AttachmentRef::Image(image) = attachment {
                if image.extent != begin.extent {
                    return Err(AshError::precondition(format!(
                        "{} pass attachment extent does not match render area",
                        begin.pass.name()
                    )));
                }
            }
        }
        self.open_pass = Some((begin.pass, 0));
        self.commands.push(Command::BeginPass {
            pass: begin.pass,
            extent: begin.extent,
            attachments: begin.attachments.to_vec(),
        });
        Ok(())
    }

    fn next_subpass(&mut self) {
        if let Some((_, subpass)) = self.open_pass.as_mut() {
            *subpass += 1;
        }
        self.commands.push(Command::NextSubpass);
    }

    fn end_pass(&mut self) -> Result<()> {
        let (pass, subpass) = self
            .open_pass
            .take()
            .ok_or_else(|| AshError::precondition("end_pass without an open pass"))?;
        if subpass + 1 != pass.subpass_count() {
            return Err(AshError::PreconditionViolated(format!(
                "{} pass ended in subpass {subpass} of {}",
                pass.name(),
                pass.subpass_count()
            )));
        }
        self.commands.push(Command::EndPass);
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &PassPipeline) {
        self.commands.push(Command::BindPipeline {
            program: pipeline.program,
            pipeline: pipeline.pipeline,
            extent: pipeline.extent,
        });
    }

    fn bind_descriptor_sets(&mut self, pipeline: &PassPipeline, first_set: u32, sets: &[vk::DescriptorSet]) {
        self.commands.push(Command::BindDescriptorSets {
            program: pipeline.program,
            first_set,
            sets: sets.to_vec(),
        });
    }

    fn push_constants(&mut self, _pipeline: &PassPipeline, data: &[u8]) {
        self.commands.push(Command::PushConstants(data.to_vec()));
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.commands.push(Command::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn draw_mesh(&mut self, mesh: &MeshBuffers) {
        self.commands.push(Command::DrawMesh(*mesh));
    }
}

#[derive(Clone, Debug)]
pub struct RecordedFrame {
    /// Submission number on the timeline
    pub number: u64,
    pub slot: usize,
    pub extent: vk::Extent2D,
    pub commands: Vec<Command>,
}

impl RecordedFrame {
    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|command| command.is_draw()).count()
    }

    pub fn pass_order(&self) -> Vec<PassKind> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                Command::BeginPass { pass, .. } => Some(*pass),
                _ => None,
            })
            .collect()
    }
}

/// Injected presentation failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceFailure {
    OutOfDate,
    Lost,
}

impl SurfaceFailure {
    fn into_error(self, during: &str) -> AshError {
        match self {
            SurfaceFailure::OutOfDate => AshError::SwapchainOutOfDate(during.to_string()),
            SurfaceFailure::Lost => AshError::SurfaceLost(during.to_string()),
        }
    }
}

pub struct HeadlessSurface {
    timeline: Arc<Mutex<GpuTimeline>>,
    extent: vk::Extent2D,
    format: vk::Format,
    events: VecDeque<SurfaceEvent>,
    quit_after: Option<u64>,
    encoder: HeadlessEncoder,
    recording: Option<usize>,
    frames: Vec<RecordedFrame>,
    presented: u64,
    not_ready: u32,
    acquire_failures: VecDeque<SurfaceFailure>,
    present_failures: VecDeque<SurfaceFailure>,
    recreate_count: u32,
}

impl HeadlessSurface {
    pub fn new(timeline: Arc<Mutex<GpuTimeline>>, extent: vk::Extent2D) -> Self {
        Self {
            timeline,
            extent,
            format: vk::Format::B8G8R8A8_SRGB,
            events: VecDeque::new(),
            quit_after: None,
            encoder: HeadlessEncoder::default(),
            recording: None,
            frames: Vec::new(),
            presented: 0,
            not_ready: 0,
            acquire_failures: VecDeque::new(),
            present_failures: VecDeque::new(),
            recreate_count: 0,
        }
    }

    pub fn push_event(&mut self, event: SurfaceEvent) {
        self.events.push_back(event);
    }

    pub fn push_resize(&mut self, width: u32, height: u32) {
        self.push_event(SurfaceEvent::Resized(vk::Extent2D { width, height }));
    }

    /// Report `Quit` once this many frames have been presented.
    pub fn quit_after(&mut self, frames: u64) {
        self.quit_after = Some(frames);
    }

    pub fn skip_next_images(&mut self, count: u32) {
        self.not_ready += count;
    }

    pub fn fail_next_acquire(&mut self, failure: SurfaceFailure) {
        self.acquire_failures.push_back(failure);
    }

    pub fn fail_next_present(&mut self, failure: SurfaceFailure) {
        self.present_failures.push_back(failure);
    }

    pub fn frames(&self) -> &[RecordedFrame] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&RecordedFrame> {
        self.frames.last()
    }

    /// Drop recorded frames. Long-running loops call this to bound memory.
    pub fn clear_frames(&mut self) {
        self.frames.clear();
    }

    pub fn recreate_count(&self) -> u32 {
        self.recreate_count
    }
}

impl PresentSurface for HeadlessSurface {
    type Encoder = HeadlessEncoder;

    fn poll_event(&mut self) -> Option<SurfaceEvent> {
        if let Some(event) = self.events.pop_front() {
            return Some(event);
        }
        match self.quit_after {
            Some(limit) if self.presented >= limit => Some(SurfaceEvent::Quit),
            _ => None,
        }
    }

    fn begin_frame(&mut self, slot: usize) -> Result<Option<&mut HeadlessEncoder>> {
        if self.recording.is_some() {
            return Err(AshError::precondition("begin_frame while a frame is being recorded"));
        }
        self.timeline.lock().wait_for_slot(slot);

        if self.not_ready > 0 {
            self.not_ready -= 1;
            return Ok(None);
        }
        if let Some(failure) = self.acquire_failures.pop_front() {
            return Err(failure.into_error("image acquisition"));
        }

        self.recording = Some(slot);
        self.encoder = HeadlessEncoder::default();
        Ok(Some(&mut self.encoder))
    }

    fn end_frame(&mut self) -> Result<()> {
        let slot = self
            .recording
            .take()
            .ok_or_else(|| AshError::precondition("end_frame without begin_frame"))?;
        if let Some((pass, _)) = self.encoder.open_pass {
            return Err(AshError::PreconditionViolated(format!(
                "frame submitted with {} pass still open",
                pass.name()
            )));
        }

        let number = self.timeline.lock().submit(slot)?;
        self.frames.push(RecordedFrame {
            number,
            slot,
            extent: self.extent,
            commands: std::mem::take(&mut self.encoder.commands),
        });
        self.presented += 1;

        if let Some(failure) = self.present_failures.pop_front() {
            return Err(failure.into_error("presentation"));
        }
        Ok(())
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn format(&self) -> vk::Format {
        self.format
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> Result<()> {
        self.extent = extent;
        self.recreate_count += 1;
        Ok(())
    }
}

/// A device and surface sharing one timeline.
pub fn create(extent: vk::Extent2D, frames_in_flight: usize) -> (HeadlessDevice, HeadlessSurface) {
    let timeline = Arc::new(Mutex::new(GpuTimeline::new(frames_in_flight)));
    (
        HeadlessDevice::new(Arc::clone(&timeline)),
        HeadlessSurface::new(timeline, extent),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeline_retires_slot_before_reuse() {
        let mut timeline = GpuTimeline::new(2);
        timeline.submit(0).unwrap();
        timeline.submit(1).unwrap();
        assert!(timeline.submit(0).is_err());

        timeline.wait_for_slot(0);
        assert_eq!(timeline.in_flight(), 1);
        timeline.submit(0).unwrap();
        assert_eq!(timeline.max_in_flight(), 2);
        assert_eq!(timeline.max_frame_distance(), 1);
    }

    #[test]
    fn buffer_writes_are_bounds_checked() {
        let (mut device, _surface) = create(vk::Extent2D { width: 4, height: 4 }, 2);
        let buffer = device
            .create_buffer(16, vk::BufferUsageFlags::UNIFORM_BUFFER)
            .unwrap();
        device.write_buffer(buffer, 8, &[1; 8]).unwrap();
        assert_eq!(&device.buffer_data(buffer).unwrap()[8..], &[1; 8]);
        assert!(device.write_buffer(buffer, 12, &[0; 8]).is_err());
    }

    #[test]
    fn encoder_rejects_nested_passes() {
        let mut encoder = HeadlessEncoder::default();
        let begin = PassBegin {
            pass: PassKind::EdgeDetection,
            attachments: &[],
            extent: vk::Extent2D { width: 1, height: 1 },
            clear_color: [0.0; 4],
        };
        encoder.begin_pass(&begin).unwrap();
        assert!(encoder.begin_pass(&begin).is_err());
        encoder.end_pass().unwrap();
        assert!(encoder.end_pass().is_err());
    }

    #[test]
    fn quit_after_presented_frames() {
        let (_device, mut surface) = create(vk::Extent2D { width: 8, height: 8 }, 2);
        surface.quit_after(1);
        assert_eq!(surface.poll_event(), None);
        surface.begin_frame(0).unwrap();
        surface.end_frame().unwrap();
        assert_eq!(surface.poll_event(), Some(SurfaceEvent::Quit));
    }
}
