use std::time::Instant;

use ash::vk;

use crate::config::RendererConfig;
use crate::gpu::{is_zero_extent, GpuDevice, PassKind, PresentSurface, SurfaceEvent};
use crate::{AshError, Result};

use super::binding_table::ResourceBindingTable;
use super::frame_resources::FrameResourceSet;
use super::lookup::{LookupTables, LookupTextures};
use super::object_data::{pack_objects, GlobalFrameUniform};
use super::passes::{FrameInputs, FrameStats, PassBindings, PassLayouts, RenderPassGraph, WriteMode};
use super::scene::{FrameTiming, SceneSource};
use super::swapchain::{ResizeCascade, ResizeOutcome, SwapchainLifecycleManager};
use super::texture_arrays::{TextureArrays, TextureKind};

/// What one iteration of the frame loop did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered(FrameStats),
    /// Size-dependent resources were rebuilt; nothing was drawn.
    Resized(vk::Extent2D),
    /// The surface is zero-sized; nothing was drawn.
    Deferred,
    /// No surface image was available.
    NotReady,
    Quit,
}

/// Drives the frame loop: events, per-frame data, the pass graph and presentation.
pub struct FrameOrchestrator<D: GpuDevice, S: PresentSurface> {
    config: RendererConfig,
    device: D,
    surface: S,
    table: ResourceBindingTable,
    frames: FrameResourceSet,
    textures: TextureArrays,
    bindings: PassBindings,
    layouts: PassLayouts,
    lookup: LookupTextures,
    lifecycle: SwapchainLifecycleManager,
    graph: RenderPassGraph,
    current_frame: usize,
    frames_rendered: u64,
    /// Set after a surface-loss recovery until the next successful present
    recovering: bool,
    last_tick: Instant,
    destroyed: bool,
}

impl<D: GpuDevice, S: PresentSurface> FrameOrchestrator<D, S> {
    pub fn new(mut device: D, surface: S, lookup: LookupTables<'_>, config: RendererConfig) -> Result<Self> {
        config.validate()?;
        let extent = surface.extent();
        if is_zero_extent(extent) {
            return Err(AshError::Configuration(format!(
                "initial surface extent must be non-zero, got {}x{}",
                extent.width, extent.height
            )));
        }

        let frames_in_flight = config.frames_in_flight;
        let mut table = ResourceBindingTable::new();
        let frames = FrameResourceSet::new(
            &mut device,
            &mut table,
            frames_in_flight,
            config.initial_object_capacity,
        )?;
        let textures = TextureArrays::new(
            &mut device,
            &mut table,
            frames_in_flight,
            config.max_textures_per_kind,
        )?;
        let bindings = PassBindings::new(&mut device, &mut table, frames_in_flight)?;
        let lookup = LookupTextures::upload(&mut device, lookup)?;

        let mut lifecycle = SwapchainLifecycleManager::new();
        lifecycle.initialize(&mut device, extent)?;
        bindings.write_images(&mut device, &mut table, lifecycle.arena(), &lookup, WriteMode::Initial)?;

        let layouts = PassLayouts {
            global: table.raw_layout(frames.layout())?,
            textures: [
                table.raw_layout(textures.layout(TextureKind::Albedo))?,
                table.raw_layout(textures.layout(TextureKind::Normal))?,
                table.raw_layout(textures.layout(TextureKind::Height))?,
            ],
            gbuffer_input: table.raw_layout(bindings.layout(PassKind::Geometry))?,
            edge: table.raw_layout(bindings.layout(PassKind::EdgeDetection))?,
            blend: table.raw_layout(bindings.layout(PassKind::BlendWeight))?,
            resolve: table.raw_layout(bindings.layout(PassKind::Resolve))?,
        };
        let mut graph = RenderPassGraph::new(config.clear_color);
        graph.rebuild_pipelines(&mut device, &layouts, extent)?;

        log::info!(
            "Frame orchestrator ready: {}x{}, {} frames in flight",
            extent.width,
            extent.height,
            frames_in_flight
        );

        Ok(Self {
            config,
            device,
            surface,
            table,
            frames,
            textures,
            bindings,
            layouts,
            lookup,
            lifecycle,
            graph,
            current_frame: 0,
            frames_rendered: 0,
            recovering: false,
            last_tick: Instant::now(),
            destroyed: false,
        })
    }

    /// Runs one loop iteration. A resize is handled instead of rendering.
    pub fn tick<Sc: SceneSource + ?Sized>(&mut self, scene: &mut Sc) -> Result<FrameOutcome> {
        if self.destroyed {
            return Err(AshError::precondition("frame loop used after shutdown"));
        }

        if let Some(event) = self.surface.poll_event() {
            match event {
                SurfaceEvent::Quit => {
                    log::info!("Quit requested after {} frames", self.frames_rendered);
                    return Ok(FrameOutcome::Quit);
                }
                SurfaceEvent::Resized(extent) => return self.resize(extent),
            }
        }

        if self.lifecycle.pending().is_some() {
            return Ok(FrameOutcome::Deferred);
        }

        self.render(scene)
    }

    /// Ticks until the surface asks to quit, then drains the device.
    pub fn run<Sc: SceneSource + ?Sized>(&mut self, scene: &mut Sc) -> Result<u64> {
        loop {
            match self.tick(scene) {
                Ok(FrameOutcome::Quit) => break,
                Ok(_) => {}
                Err(err) => {
                    log::error!("Frame loop aborted: {err}");
                    if let Err(idle_err) = self.device.wait_idle() {
                        log::error!("Device wait after failure also failed: {idle_err}");
                    }
                    return Err(err);
                }
            }
        }
        self.device.wait_idle()?;
        Ok(self.frames_rendered)
    }

    fn render<Sc: SceneSource + ?Sized>(&mut self, scene: &mut Sc) -> Result<FrameOutcome> {
        let now = Instant::now();
        let frame_time = now.duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;
        scene.prepare_frame(FrameTiming {
            frame_time,
            aspect_ratio: self.surface.aspect_ratio(),
        });

        let frame_index = self.current_frame;
        let began = self.surface.begin_frame(frame_index);
        let encoder = match began {
            Ok(Some(encoder)) => encoder,
            Ok(None) => return Ok(FrameOutcome::NotReady),
            Err(err) if err.is_surface_loss() => return self.recover(err),
            Err(err) => return Err(err),
        };

        // Structural changes first; both drain the device before touching shared sets.
        self.textures
            .sync(&mut self.device, &mut self.table, scene.objects())?;
        let packed = pack_objects(scene.objects(), &self.textures);
        self.frames
            .ensure_capacity(&mut self.device, &mut self.table, packed.len())?;

        let uniform = GlobalFrameUniform::new(scene.camera(), &packed, self.config.ambient_light_color);
        self.frames.write_global(&mut self.device, frame_index, &uniform)?;
        self.frames
            .write_objects(&mut self.device, frame_index, &packed.records)?;

        let inputs = FrameInputs {
            frame_index,
            objects: &packed,
            global_set: self.frames.global_set(&self.table, frame_index)?,
            texture_sets: self.textures.raw_sets(&self.table, frame_index)?,
        };
        let stats = self.graph.execute(
            encoder,
            &inputs,
            self.lifecycle.arena_mut(),
            &self.bindings,
            &self.table,
        )?;

        match self.surface.end_frame() {
            Ok(()) => {}
            Err(err) if err.is_surface_loss() => return self.recover(err),
            Err(err) => return Err(err),
        }

        self.recovering = false;
        self.current_frame = (self.current_frame + 1) % self.config.frames_in_flight;
        self.frames_rendered += 1;
        log::trace!(
            "Frame {} rendered in slot {frame_index}: {} draws",
            self.frames_rendered,
            stats.draw_count()
        );
        Ok(FrameOutcome::Rendered(stats))
    }

    fn resize(&mut self, extent: vk::Extent2D) -> Result<FrameOutcome> {
        let cascade = ResizeCascade {
            device: &mut self.device,
            surface: &mut self.surface,
            table: &mut self.table,
            bindings: &self.bindings,
            lookup: &self.lookup,
            graph: &mut self.graph,
            layouts: &self.layouts,
        };
        Ok(match self.lifecycle.on_resize(cascade, extent)? {
            ResizeOutcome::Deferred => FrameOutcome::Deferred,
            ResizeOutcome::Recreated(extent) => FrameOutcome::Resized(extent),
        })
    }

    /// One recreation attempt per surface loss; a second loss before a
    /// successful present is fatal.
    fn recover(&mut self, err: AshError) -> Result<FrameOutcome> {
        if self.recovering {
            log::error!("Surface lost again before a successful present: {err}");
            return Err(err);
        }
        log::warn!("{err}; recreating surface resources");
        self.recovering = true;
        let extent = self.surface.extent();
        self.resize(extent)
    }

    /// Drains the device and releases every GPU object the orchestrator created.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.device.wait_idle()?;
        self.graph.destroy(&mut self.device);
        self.lifecycle.destroy(&mut self.device);
        self.lookup.destroy(&mut self.device);
        self.frames.destroy(&mut self.device);
        self.destroyed = true;
        log::info!("Frame orchestrator shut down after {} frames", self.frames_rendered);
        Ok(())
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn table(&self) -> &ResourceBindingTable {
        &self.table
    }

    pub fn frame_resources(&self) -> &FrameResourceSet {
        &self.frames
    }

    pub fn textures(&self) -> &TextureArrays {
        &self.textures
    }

    pub fn pass_bindings(&self) -> &PassBindings {
        &self.bindings
    }

    pub fn lifecycle(&self) -> &SwapchainLifecycleManager {
        &self.lifecycle
    }

    pub fn graph(&self) -> &RenderPassGraph {
        &self.graph
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }
}

impl<D: GpuDevice, S: PresentSurface> Drop for FrameOrchestrator<D, S> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Failed to shut down frame orchestrator cleanly: {e}");
        }
    }
}

