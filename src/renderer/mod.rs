pub mod binding_table;
pub mod camera;
pub mod frame_resources;
pub mod lookup;
pub mod object_data;
pub mod orchestrator;
pub mod passes;
pub mod scene;
pub mod swapchain;
pub mod targets;
pub mod texture_arrays;

pub use binding_table::{LayoutHandle, PoolHandle, ResourceBindingTable, SetHandle};
pub use camera::Camera;
pub use frame_resources::{FrameResourceSet, FrameSlot};
pub use lookup::{LookupTables, LookupTextures};
pub use object_data::{
    pack_objects, GlobalFrameUniform, PackedObjects, PerObjectGpuRecord, RecordKind, NO_TEXTURE,
};
pub use orchestrator::{FrameOrchestrator, FrameOutcome};
pub use passes::{FrameStats, PassState, RenderPassGraph};
pub use scene::{
    FrameTiming, MaterialTextures, ObjectId, ObjectKind, ParallaxParams, PointLight, Renderable,
    SceneObjectRecord, SceneSnapshot, SceneSource, Transform,
};
pub use swapchain::{ResizeOutcome, SwapchainLifecycleManager};
pub use targets::{RenderTargetArena, TargetId};
pub use texture_arrays::{TextureArrays, TextureKind};
