//! `ash` + `vk-mem` implementations of the [`crate::gpu`] seams.
//!
//! The host creates the instance, device, allocator and window surface, then
//! hands them over as a [`VulkanContext`] and a [`SwapchainContext`].
//! [`AshDevice`] owns everything the core allocates through it;
//! [`AshSwapchain`] owns the swapchain, per-slot fences and command buffers,
//! and hands out an [`AshEncoder`] for each frame.

pub mod commands;
pub mod descriptor_layout;
pub mod device;
pub mod pipeline;
pub mod pipeline_cache;
pub mod render_passes;
pub mod swapchain;

pub use commands::AshEncoder;
pub use descriptor_layout::DescriptorSetLayoutBuilder;
pub use device::{AshDevice, VulkanContext};
pub use pipeline::{create_pass_pipeline, ShaderLibrary, ShaderStages};
pub use pipeline_cache::PipelineCache;
pub use render_passes::RenderPassSet;
pub use swapchain::{AshSwapchain, SwapchainContext};
