//! The fixed four-pass frame: geometry, edge detection, blend weights, resolve.

pub mod bindings;
pub mod geometry;
pub mod post;

use ash::vk;

use crate::gpu::{
    AttachmentRef, CommandEncoder, GpuDevice, PassBegin, PassKind, PassPipeline, ShaderProgram,
};
use crate::{AshError, Result};

use super::binding_table::ResourceBindingTable;
use super::object_data::PackedObjects;
use super::targets::{RenderTargetArena, TargetId};

pub use bindings::{PassBindings, PassLayouts, WriteMode};
pub use geometry::{GeometryPass, GeometryStats};
pub use post::FullscreenPass;

/// Targets a pass samples and targets it renders to.
#[derive(Clone, Copy, Debug)]
pub struct PassStage {
    pub kind: PassKind,
    pub reads: &'static [TargetId],
    pub writes: &'static [TargetId],
    /// Renders to the acquired surface image
    pub presents: bool,
}

pub const PASS_STAGES: [PassStage; 4] = [
    PassStage {
        kind: PassKind::Geometry,
        reads: &[],
        writes: &[
            TargetId::GBufferNormal,
            TargetId::GBufferAlbedo,
            TargetId::GBufferDepth,
            TargetId::SceneColor,
        ],
        presents: false,
    },
    PassStage {
        kind: PassKind::EdgeDetection,
        reads: &[TargetId::SceneColor],
        writes: &[TargetId::EdgeMask],
        presents: false,
    },
    PassStage {
        kind: PassKind::BlendWeight,
        reads: &[TargetId::EdgeMask],
        writes: &[TargetId::BlendWeights],
        presents: false,
    },
    PassStage {
        kind: PassKind::Resolve,
        reads: &[TargetId::SceneColor, TargetId::BlendWeights],
        writes: &[],
        presents: true,
    },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassState {
    Idle,
    Active(PassKind),
    /// Between the end of one pass and the start of the next
    Completed(PassKind),
}

impl PassState {
    fn may_enter(self, pass: PassKind) -> bool {
        match self {
            PassState::Idle => pass.predecessor().is_none(),
            PassState::Completed(done) => pass.predecessor() == Some(done),
            PassState::Active(_) => false,
        }
    }
}

/// Everything a frame's passes read that is not a pass target.
pub struct FrameInputs<'a> {
    pub frame_index: usize,
    pub objects: &'a PackedObjects,
    pub global_set: vk::DescriptorSet,
    /// albedo, normal, height
    pub texture_sets: [vk::DescriptorSet; 3],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub geometry: GeometryStats,
    pub post_draws: u32,
    pub passes: u32,
}

impl FrameStats {
    pub fn draw_count(&self) -> u32 {
        self.geometry.total() + self.post_draws
    }
}

/// Runs the passes in order, enforcing that each one only starts after its
/// predecessor ended and that every target it samples was produced this frame.
pub struct RenderPassGraph {
    state: PassState,
    geometry: GeometryPass,
    edge: FullscreenPass,
    blend: FullscreenPass,
    resolve: FullscreenPass,
    extent: vk::Extent2D,
    clear_color: [f32; 4],
}

impl RenderPassGraph {
    pub fn new(clear_color: [f32; 4]) -> Self {
        Self {
            state: PassState::Idle,
            geometry: GeometryPass::default(),
            edge: FullscreenPass::new(ShaderProgram::EdgeDetection),
            blend: FullscreenPass::new(ShaderProgram::BlendWeight),
            resolve: FullscreenPass::new(ShaderProgram::Resolve),
            extent: vk::Extent2D::default(),
            clear_color,
        }
    }

    /// Recreates every pipeline with viewport and scissor at `extent`.
    pub fn rebuild_pipelines<D: GpuDevice>(
        &mut self,
        device: &mut D,
        layouts: &PassLayouts,
        extent: vk::Extent2D,
    ) -> Result<()> {
        self.geometry.rebuild(device, layouts, extent)?;
        self.edge.rebuild(device, layouts.global, layouts.edge, extent)?;
        self.blend.rebuild(device, layouts.global, layouts.blend, extent)?;
        self.resolve.rebuild(device, layouts.global, layouts.resolve, extent)?;
        self.extent = extent;
        log::debug!("Pass pipelines rebuilt for {}x{}", extent.width, extent.height);
        Ok(())
    }

    pub fn execute<E: CommandEncoder>(
        &mut self,
        encoder: &mut E,
        frame: &FrameInputs<'_>,
        arena: &mut RenderTargetArena,
        bindings: &PassBindings,
        table: &ResourceBindingTable,
    ) -> Result<FrameStats> {
        if self.state != PassState::Idle {
            return Err(AshError::PreconditionViolated(format!(
                "frame started while the pass graph is in state {:?}",
                self.state
            )));
        }
        if arena.extent() != self.extent {
            return Err(AshError::PreconditionViolated(format!(
                "pipelines built for {}x{} but targets are {}x{}",
                self.extent.width,
                self.extent.height,
                arena.extent().width,
                arena.extent().height
            )));
        }

        arena.begin_frame();
        let mut stats = FrameStats::default();
        for stage in &PASS_STAGES {
            self.enter(encoder, stage, arena)?;
            let image_set = bindings.raw_set(table, stage.kind, frame.frame_index)?;
            match stage.kind {
                PassKind::Geometry => {
                    stats.geometry = self.geometry.record(encoder, frame, image_set)?;
                }
                PassKind::EdgeDetection => {
                    stats.post_draws += self.edge.record(encoder, frame.global_set, image_set)?;
                }
                PassKind::BlendWeight => {
                    stats.post_draws += self.blend.record(encoder, frame.global_set, image_set)?;
                }
                PassKind::Resolve => {
                    stats.post_draws += self.resolve.record(encoder, frame.global_set, image_set)?;
                }
            }
            self.exit(encoder, stage, arena)?;
            stats.passes += 1;
        }
        self.state = PassState::Idle;
        Ok(stats)
    }

    fn enter<E: CommandEncoder>(
        &mut self,
        encoder: &mut E,
        stage: &PassStage,
        arena: &RenderTargetArena,
    ) -> Result<()> {
        if !self.state.may_enter(stage.kind) {
            return Err(AshError::PreconditionViolated(format!(
                "{} pass cannot start from state {:?}",
                stage.kind.name(),
                self.state
            )));
        }
        for &input in stage.reads {
            arena.require_produced(input)?;
        }

        let mut attachments = stage
            .writes
            .iter()
            .map(|&id| arena.get(id).map(AttachmentRef::Image))
            .collect::<Result<Vec<_>>>()?;
        if stage.presents {
            attachments.push(AttachmentRef::Present);
        }

        encoder.begin_pass(&PassBegin {
            pass: stage.kind,
            attachments: &attachments,
            extent: arena.extent(),
            clear_color: self.clear_color,
        })?;
        self.state = PassState::Active(stage.kind);
        log::trace!("Entered {} pass", stage.kind.name());
        Ok(())
    }

    fn exit<E: CommandEncoder>(
        &mut self,
        encoder: &mut E,
        stage: &PassStage,
        arena: &mut RenderTargetArena,
    ) -> Result<()> {
        if self.state != PassState::Active(stage.kind) {
            return Err(AshError::PreconditionViolated(format!(
                "{} pass ended while in state {:?}",
                stage.kind.name(),
                self.state
            )));
        }
        encoder.end_pass()?;
        for &output in stage.writes {
            arena.mark_produced(output);
        }
        self.state = PassState::Completed(stage.kind);
        Ok(())
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn pipelines(&self) -> Vec<PassPipeline> {
        self.geometry
            .pipelines()
            .chain(self.edge.pipeline())
            .chain(self.blend.pipeline())
            .chain(self.resolve.pipeline())
            .copied()
            .collect()
    }

    pub fn destroy<D: GpuDevice>(&mut self, device: &mut D) {
        self.geometry.destroy(device);
        self.edge.destroy(device);
        self.blend.destroy(device);
        self.resolve.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_follow_pass_order() {
        let kinds: Vec<_> = PASS_STAGES.iter().map(|stage| stage.kind).collect();
        assert_eq!(kinds, PassKind::ORDER);
    }

    #[test]
    fn every_read_is_written_by_an_earlier_stage() {
        for (position, stage) in PASS_STAGES.iter().enumerate() {
            for read in stage.reads {
                assert!(
                    PASS_STAGES[..position]
                        .iter()
                        .any(|earlier| earlier.writes.contains(read)),
                    "{} reads {:?} before any pass writes it",
                    stage.kind.name(),
                    read
                );
            }
        }
    }

    #[test]
    fn only_resolve_presents() {
        let presenting: Vec<_> = PASS_STAGES
            .iter()
            .filter(|stage| stage.presents)
            .map(|stage| stage.kind)
            .collect();
        assert_eq!(presenting, vec![PassKind::Resolve]);
    }

    #[test]
    fn state_machine_admits_only_the_next_pass() {
        assert!(PassState::Idle.may_enter(PassKind::Geometry));
        assert!(!PassState::Idle.may_enter(PassKind::Resolve));
        assert!(PassState::Completed(PassKind::Geometry).may_enter(PassKind::EdgeDetection));
        assert!(!PassState::Completed(PassKind::Geometry).may_enter(PassKind::BlendWeight));
        assert!(!PassState::Active(PassKind::Geometry).may_enter(PassKind::EdgeDetection));
    }
}
