//! Seams between the frame orchestration core and the GPU.
//!
//! Everything the core needs from a device, a presentable surface and a
//! command recorder is expressed here in terms of raw `ash::vk` handles.
//! [`crate::vulkan`] implements these traits on top of a real device;
//! [`crate::headless`] records the calls on the CPU.

use ash::vk;

use crate::Result;

/// A GPU image together with the view and sampler used to bind it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SampledImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    /// Null for images only ever bound as attachments
    pub sampler: vk::Sampler,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub label: &'static str,
}

/// How many array elements a descriptor binding holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArrayLength {
    Single,
    Fixed(u32),
    /// Runtime-sized: the element count is chosen when the set is allocated.
    Variable { max: u32 },
}

impl ArrayLength {
    pub fn max_count(self) -> u32 {
        match self {
            ArrayLength::Single => 1,
            ArrayLength::Fixed(count) => count,
            ArrayLength::Variable { max } => max,
        }
    }

    pub fn is_variable(self) -> bool {
        matches!(self, ArrayLength::Variable { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindingSlot {
    pub binding: u32,
    pub kind: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
    pub length: ArrayLength,
}

impl BindingSlot {
    pub const fn single(binding: u32, kind: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            kind,
            stages,
            length: ArrayLength::Single,
        }
    }

    pub const fn variable(
        binding: u32,
        kind: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
        max: u32,
    ) -> Self {
        Self {
            binding,
            kind,
            stages,
            length: ArrayLength::Variable { max },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolDesc {
    pub max_sets: u32,
    pub sizes: Vec<(vk::DescriptorType, u32)>,
    /// Required for pools backing runtime-sized arrays
    pub update_after_bind: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoundResource {
    Buffer {
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    },
    Image {
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
}

impl BoundResource {
    pub fn sampled(image: &SampledImage) -> Self {
        BoundResource::Image {
            view: image.view,
            sampler: image.sampler,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

/// A contiguous run of array elements written into one binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub first_element: u32,
    pub kind: vk::DescriptorType,
    pub resources: Vec<BoundResource>,
}

/// The four stages of a frame, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PassKind {
    Geometry,
    EdgeDetection,
    BlendWeight,
    Resolve,
}

impl PassKind {
    pub const ORDER: [PassKind; 4] = [
        PassKind::Geometry,
        PassKind::EdgeDetection,
        PassKind::BlendWeight,
        PassKind::Resolve,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PassKind::Geometry => "geometry",
            PassKind::EdgeDetection => "edge-detection",
            PassKind::BlendWeight => "blend-weight",
            PassKind::Resolve => "resolve",
        }
    }

    pub fn subpass_count(self) -> u32 {
        match self {
            PassKind::Geometry => 2,
            _ => 1,
        }
    }

    pub fn predecessor(self) -> Option<PassKind> {
        match self {
            PassKind::Geometry => None,
            PassKind::EdgeDetection => Some(PassKind::Geometry),
            PassKind::BlendWeight => Some(PassKind::EdgeDetection),
            PassKind::Resolve => Some(PassKind::BlendWeight),
        }
    }
}

/// Shader pair a pipeline is built from. The device maps each program to SPIR-V.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderProgram {
    GBuffer,
    Composition,
    PointLight,
    EdgeDetection,
    BlendWeight,
    Resolve,
}

impl ShaderProgram {
    pub const ALL: [ShaderProgram; 6] = [
        ShaderProgram::GBuffer,
        ShaderProgram::Composition,
        ShaderProgram::PointLight,
        ShaderProgram::EdgeDetection,
        ShaderProgram::BlendWeight,
        ShaderProgram::Resolve,
    ];

    pub fn pass(self) -> PassKind {
        match self {
            ShaderProgram::GBuffer | ShaderProgram::Composition | ShaderProgram::PointLight => {
                PassKind::Geometry
            }
            ShaderProgram::EdgeDetection => PassKind::EdgeDetection,
            ShaderProgram::BlendWeight => PassKind::BlendWeight,
            ShaderProgram::Resolve => PassKind::Resolve,
        }
    }

    pub fn subpass(self) -> u32 {
        match self {
            ShaderProgram::Composition | ShaderProgram::PointLight => 1,
            _ => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineDesc {
    pub program: ShaderProgram,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_size: u32,
    /// Baked into the viewport and scissor state
    pub extent: vk::Extent2D,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub program: ShaderProgram,
    pub extent: vk::Extent2D,
}

/// Vertex and index buffers of a mesh owned by the scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshBuffers {
    /// vec3 positions
    pub positions: vk::Buffer,
    /// colour, normal and uv per vertex
    pub attributes: vk::Buffer,
    pub indices: Option<vk::Buffer>,
    /// Index count when indexed, vertex count otherwise
    pub count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentRef {
    Image(SampledImage),
    /// The surface image acquired for this frame
    Present,
}

#[derive(Clone, Copy, Debug)]
pub struct PassBegin<'a> {
    pub pass: PassKind,
    pub attachments: &'a [AttachmentRef],
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceEvent {
    Resized(vk::Extent2D),
    Quit,
}

/// Resource creation and descriptor plumbing.
pub trait GpuDevice {
    fn create_buffer(&mut self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<vk::Buffer>;
    fn write_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> Result<()>;
    fn destroy_buffer(&mut self, buffer: vk::Buffer);

    fn create_image(&mut self, desc: &ImageDesc) -> Result<SampledImage>;
    /// Copies tightly packed texels into the image and leaves it shader-readable.
    fn upload_image(&mut self, image: &SampledImage, texels: &[u8]) -> Result<()>;
    fn destroy_image(&mut self, image: &SampledImage);

    fn create_descriptor_set_layout(&mut self, slots: &[BindingSlot]) -> Result<vk::DescriptorSetLayout>;
    fn create_descriptor_pool(&mut self, desc: &PoolDesc) -> Result<vk::DescriptorPool>;
    fn reset_descriptor_pool(&mut self, pool: vk::DescriptorPool) -> Result<()>;
    fn allocate_descriptor_set(
        &mut self,
        layout: vk::DescriptorSetLayout,
        pool: vk::DescriptorPool,
        variable_count: Option<u32>,
    ) -> Result<vk::DescriptorSet>;
    fn update_descriptor_set(&mut self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) -> Result<()>;

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PassPipeline>;
    fn destroy_pipeline(&mut self, pipeline: &PassPipeline);

    /// Blocks until every submitted frame has finished executing.
    fn wait_idle(&mut self) -> Result<()>;
}

/// Command recording for one frame.
pub trait CommandEncoder {
    fn begin_pass(&mut self, begin: &PassBegin<'_>) -> Result<()>;
    fn next_subpass(&mut self);
    fn end_pass(&mut self) -> Result<()>;

    fn bind_pipeline(&mut self, pipeline: &PassPipeline);
    fn bind_descriptor_sets(&mut self, pipeline: &PassPipeline, first_set: u32, sets: &[vk::DescriptorSet]);
    fn push_constants(&mut self, pipeline: &PassPipeline, data: &[u8]);
    fn draw(&mut self, vertex_count: u32, instance_count: u32);
    fn draw_mesh(&mut self, mesh: &MeshBuffers);
}

/// The window-side collaborator: event polling, frame pacing and presentation.
pub trait PresentSurface {
    type Encoder: CommandEncoder;

    fn poll_event(&mut self) -> Option<SurfaceEvent>;

    /// Waits for `slot`'s previous submission and acquires the next image.
    /// `Ok(None)` means no image is available this iteration.
    fn begin_frame(&mut self, slot: usize) -> Result<Option<&mut Self::Encoder>>;
    /// Submits the recorded commands and presents.
    fn end_frame(&mut self) -> Result<()>;

    fn extent(&self) -> vk::Extent2D;
    fn format(&self) -> vk::Format;
    fn recreate(&mut self, extent: vk::Extent2D) -> Result<()>;

    fn aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        }
    }
}

pub(crate) fn is_zero_extent(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_order_matches_predecessors() {
        let mut previous = None;
        for pass in PassKind::ORDER {
            assert_eq!(pass.predecessor(), previous);
            previous = Some(pass);
        }
    }

    #[test]
    fn lighting_programs_share_the_second_geometry_subpass() {
        assert_eq!(ShaderProgram::GBuffer.subpass(), 0);
        assert_eq!(ShaderProgram::Composition.subpass(), 1);
        assert_eq!(ShaderProgram::PointLight.subpass(), 1);
        for program in ShaderProgram::ALL {
            assert!(program.subpass() < program.pass().subpass_count());
        }
    }

    #[test]
    fn zero_extent_detection() {
        assert!(is_zero_extent(vk::Extent2D { width: 0, height: 600 }));
        assert!(is_zero_extent(vk::Extent2D { width: 800, height: 0 }));
        assert!(!is_zero_extent(vk::Extent2D { width: 1, height: 1 }));
    }
}
