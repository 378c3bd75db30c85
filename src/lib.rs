//! Frame orchestration core for a deferred + SMAA renderer on Vulkan.
//!
//! The crate drives a fixed pass sequence (geometry, edge detection, blend
//! weights, resolve) over a set of frame-in-flight slots. GPU work goes
//! through the [`gpu::GpuDevice`] / [`gpu::PresentSurface`] seams: the
//! [`vulkan`] module implements them with `ash` + `vk-mem`, and [`headless`]
//! provides a recording backend for tests, benchmarks and CI.

pub mod config;
pub mod error;
pub mod gpu;
pub mod headless;
pub mod renderer;
pub mod vulkan;

pub use config::RendererConfig;
pub use error::{AshError, Result};
pub use headless::{HeadlessDevice, HeadlessSurface};
pub use renderer::{FrameOrchestrator, FrameOutcome};

pub mod prelude {
    pub use crate::config::RendererConfig;
    pub use crate::error::{AshError, Result};
    pub use crate::gpu::{
        CommandEncoder, GpuDevice, MeshBuffers, PassKind, PresentSurface, SampledImage,
        SurfaceEvent,
    };
    pub use crate::renderer::{
        Camera, FrameOrchestrator, FrameOutcome, FrameStats, LookupTables, ObjectKind,
        ParallaxParams, PointLight, Renderable, SceneObjectRecord, SceneSnapshot, SceneSource,
        Transform,
    };
}
