use ash::vk;

use crate::gpu::{is_zero_extent, GpuDevice, PresentSurface};
use crate::Result;

use super::binding_table::ResourceBindingTable;
use super::lookup::LookupTextures;
use super::passes::{PassBindings, PassLayouts, RenderPassGraph, WriteMode};
use super::targets::RenderTargetArena;

/// Everything a resize has to touch, borrowed from the orchestrator.
pub struct ResizeCascade<'a, D, S> {
    pub device: &'a mut D,
    pub surface: &'a mut S,
    pub table: &'a mut ResourceBindingTable,
    pub bindings: &'a PassBindings,
    pub lookup: &'a LookupTextures,
    pub graph: &'a mut RenderPassGraph,
    pub layouts: &'a PassLayouts,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// Zero-sized request, remembered until a usable size arrives
    Deferred,
    Recreated(vk::Extent2D),
}

/// Owns the size-dependent targets and rebuilds everything derived from the
/// surface size, in dependency order.
#[derive(Default)]
pub struct SwapchainLifecycleManager {
    arena: RenderTargetArena,
    pending: Option<vk::Extent2D>,
    resize_count: u64,
}

impl SwapchainLifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize<D: GpuDevice>(&mut self, device: &mut D, extent: vk::Extent2D) -> Result<()> {
        self.arena.recreate(device, extent)
    }

    /// Rebuilds for `extent`:
    /// 1. drain the device,
    /// 2. recreate the surface and, if the size changed, every pass target,
    /// 3. repoint every image-backed set of every frame slot,
    /// 4. rebuild every pipeline with the new viewport.
    pub fn on_resize<D: GpuDevice, S: PresentSurface>(
        &mut self,
        cascade: ResizeCascade<'_, D, S>,
        extent: vk::Extent2D,
    ) -> Result<ResizeOutcome> {
        if is_zero_extent(extent) {
            log::debug!(
                "Deferring resize to {}x{} until the surface is visible",
                extent.width,
                extent.height
            );
            self.pending = Some(extent);
            return Ok(ResizeOutcome::Deferred);
        }

        log::info!("Surface resize requested: {}x{}", extent.width, extent.height);
        let ResizeCascade {
            device,
            surface,
            table,
            bindings,
            lookup,
            graph,
            layouts,
        } = cascade;

        device.wait_idle()?;

        surface.recreate(extent)?;
        let actual = surface.extent();
        if actual != self.arena.extent() {
            self.arena.recreate(device, actual)?;
        }

        bindings.write_images(device, table, &self.arena, lookup, WriteMode::Rewrite)?;
        graph.rebuild_pipelines(device, layouts, actual)?;

        self.pending = None;
        self.resize_count += 1;
        log::info!(
            "Swapchain resources recreated at {}x{} ({} resizes)",
            actual.width,
            actual.height,
            self.resize_count
        );
        Ok(ResizeOutcome::Recreated(actual))
    }

    /// A zero-sized resize that has not been followed by a usable size yet.
    pub fn pending(&self) -> Option<vk::Extent2D> {
        self.pending
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.arena.extent()
    }

    pub fn resize_count(&self) -> u64 {
        self.resize_count
    }

    pub fn arena(&self) -> &RenderTargetArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut RenderTargetArena {
        &mut self.arena
    }

    pub fn destroy<D: GpuDevice>(&mut self, device: &mut D) {
        self.arena.destroy(device);
    }
}
