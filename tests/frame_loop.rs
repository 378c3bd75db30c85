mod common;

use ash_smaa::gpu::{AttachmentRef, PassKind, ShaderProgram};
use ash_smaa::headless::Command;
use ash_smaa::renderer::passes::geometry::{FULLSCREEN_VERTICES, LIGHT_BILLBOARD_VERTICES};
use ash_smaa::renderer::{
    pack_objects, FrameOutcome, GlobalFrameUniform, PerObjectGpuRecord, RecordKind, SceneSource,
    TextureKind, NO_TEXTURE,
};
use ash_smaa::{AshError, RendererConfig};
use bytemuck::Zeroable;
use common::*;

#[test]
fn passes_run_in_fixed_order_every_frame() {
    let mut orchestrator = orchestrator(800, 600, RendererConfig::default());
    let mut scene = demo_scene(&mut orchestrator);

    for _ in 0..3 {
        assert!(matches!(orchestrator.tick(&mut scene).unwrap(), FrameOutcome::Rendered(_)));
    }

    let frames = orchestrator.surface().frames();
    assert_eq!(frames.len(), 3);
    for frame in frames {
        assert_eq!(frame.pass_order(), PassKind::ORDER.to_vec());
        let begins = frame
            .commands
            .iter()
            .filter(|command| matches!(command, Command::BeginPass { .. }))
            .count();
        let ends = frame
            .commands
            .iter()
            .filter(|command| matches!(command, Command::EndPass))
            .count();
        assert_eq!(begins, 4);
        assert_eq!(ends, 4);
    }
}

#[test]
fn demo_scene_draws_meshes_lights_and_fullscreen_passes() {
    let mut orchestrator = orchestrator(800, 600, RendererConfig::default());
    let mut scene = demo_scene(&mut orchestrator);

    let FrameOutcome::Rendered(stats) = orchestrator.tick(&mut scene).unwrap() else {
        panic!("first frame should render");
    };
    assert_eq!(stats.geometry.mesh_draws, 2);
    assert_eq!(stats.geometry.light_draws, 6);
    assert_eq!(stats.geometry.composition_draws, 1);
    assert_eq!(stats.post_draws, 3);
    assert_eq!(stats.passes, 4);

    let frame = orchestrator.surface().last_frame().unwrap();
    assert_eq!(frame.draw_count() as u32, stats.draw_count());

    let billboards = frame
        .commands
        .iter()
        .filter(|command| {
            **command
                == Command::Draw {
                    vertex_count: LIGHT_BILLBOARD_VERTICES,
                    instance_count: 1,
                }
        })
        .count();
    assert_eq!(billboards, 6);
    let fullscreen = frame
        .commands
        .iter()
        .filter(|command| {
            **command
                == Command::Draw {
                    vertex_count: FULLSCREEN_VERTICES,
                    instance_count: 1,
                }
        })
        .count();
    // composition plus the three post passes
    assert_eq!(fullscreen, 4);
}

#[test]
fn geometry_pass_switches_to_lighting_subpass() {
    let mut orchestrator = orchestrator(640, 480, RendererConfig::default());
    let mut scene = demo_scene(&mut orchestrator);
    orchestrator.tick(&mut scene).unwrap();

    let commands = &orchestrator.surface().last_frame().unwrap().commands;
    let geometry_end = commands
        .iter()
        .position(|command| *command == Command::EndPass)
        .unwrap();
    let geometry = &commands[..geometry_end];

    let subpass = geometry
        .iter()
        .position(|command| *command == Command::NextSubpass)
        .unwrap();
    assert!(geometry[..subpass]
        .iter()
        .all(|command| !matches!(command, Command::Draw { .. })));
    assert!(geometry[subpass..]
        .iter()
        .all(|command| !matches!(command, Command::DrawMesh(_))));

    let programs: Vec<_> = geometry
        .iter()
        .filter_map(|command| match command {
            Command::BindPipeline { program, .. } => Some(*program),
            _ => None,
        })
        .collect();
    assert_eq!(
        programs,
        vec![ShaderProgram::GBuffer, ShaderProgram::Composition, ShaderProgram::PointLight]
    );
}

#[test]
fn resolve_pass_targets_the_surface_image() {
    let mut orchestrator = orchestrator(640, 480, RendererConfig::default());
    let mut scene = demo_scene(&mut orchestrator);
    orchestrator.tick(&mut scene).unwrap();

    let frame = orchestrator.surface().last_frame().unwrap();
    let resolve = frame
        .commands
        .iter()
        .find_map(|command| match command {
            Command::BeginPass {
                pass: PassKind::Resolve,
                attachments,
                ..
            } => Some(attachments.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(resolve, vec![AttachmentRef::Present]);
}

#[test]
fn object_records_reach_the_slot_buffer_in_reverse_order() {
    let mut orchestrator = orchestrator(800, 600, RendererConfig::default());
    let mut scene = demo_scene(&mut orchestrator);
    orchestrator.tick(&mut scene).unwrap();

    let expected = pack_objects(scene.objects(), orchestrator.textures());
    assert_eq!(expected.len(), 8);

    let slot = orchestrator.frame_resources().slot(0).unwrap();
    let stored = orchestrator.device().buffer_data(slot.objects).unwrap();
    assert_eq!(&stored[..expected.as_bytes().len()], expected.as_bytes());

    let record_size = std::mem::size_of::<PerObjectGpuRecord>();
    let records: Vec<PerObjectGpuRecord> = stored[..8 * record_size]
        .chunks_exact(record_size)
        .map(bytemuck::pod_read_unaligned)
        .collect();

    // lights were pushed last, so they come first
    for (record, color) in records[..6].iter().zip(LIGHT_COLORS.iter().rev()) {
        assert_eq!(record.kind(), RecordKind::PointLight);
        assert_eq!(record.texture_indices(), [NO_TEXTURE; 3]);
        assert_eq!(record.rotation.truncate(), *color);
        assert_eq!(record.rotation.w, 0.2);
        assert_eq!(record.scale.to_array(), [0.5, -1.0, -1.0, -1.0]);
        assert_eq!(record.parallax_mode, -1);
        assert_eq!(record.position.w, 0.0);
    }

    let floor = &records[6];
    assert_eq!(floor.kind(), RecordKind::Geometry);
    assert_eq!(floor.height_scale, 0.1);
    assert_eq!(floor.parallax_bias, -0.02);
    assert_eq!(floor.num_layers, 48.0);
    assert_eq!(floor.parallax_mode, 1);
    assert_eq!(
        floor.texture_indices(),
        [
            orchestrator.textures().index_of(TextureKind::Albedo, 1),
            0,
            0
        ]
    );

    let vase = &records[7];
    assert_eq!(vase.kind(), RecordKind::Geometry);
    assert_eq!(vase.texture_indices(), [0, NO_TEXTURE, NO_TEXTURE]);
}

#[test]
fn frame_uniform_counts_lights_and_objects() {
    let mut orchestrator = orchestrator(800, 600, RendererConfig::default());
    let mut scene = demo_scene(&mut orchestrator);
    orchestrator.tick(&mut scene).unwrap();

    let slot = orchestrator.frame_resources().slot(0).unwrap();
    let stored = orchestrator.device().buffer_data(slot.uniform).unwrap();
    let mut uniform = GlobalFrameUniform::zeroed();
    bytemuck::bytes_of_mut(&mut uniform)
        .copy_from_slice(&stored[..std::mem::size_of::<GlobalFrameUniform>()]);

    assert_eq!(uniform.light_count, 6);
    assert_eq!(uniform.object_count, 8);
    assert_eq!(uniform.ambient_light_color, RendererConfig::default().ambient_light_color);
    assert_eq!(uniform.view, scene.camera.view());
    assert_eq!(uniform.projection, scene.camera.projection());
}

#[test]
fn frames_in_flight_are_bounded() {
    for frames_in_flight in [2, 3] {
        let config = RendererConfig::default().with_frames_in_flight(frames_in_flight);
        let mut orchestrator = orchestrator(320, 240, config);
        let mut scene = demo_scene(&mut orchestrator);

        for _ in 0..12 {
            orchestrator.tick(&mut scene).unwrap();
        }

        let timeline = orchestrator.device().timeline();
        let timeline = timeline.lock();
        assert_eq!(timeline.submitted(), 12);
        assert_eq!(timeline.max_in_flight(), frames_in_flight);
        assert!(timeline.max_frame_distance() <= frames_in_flight as u64 - 1);

        let slots: Vec<_> = orchestrator.surface().frames().iter().map(|f| f.slot).collect();
        for (number, slot) in slots.iter().enumerate() {
            assert_eq!(*slot, number % frames_in_flight);
        }
    }
}

#[test]
fn missing_surface_image_skips_the_frame() {
    let mut orchestrator = orchestrator(320, 240, RendererConfig::default());
    let mut scene = demo_scene(&mut orchestrator);
    orchestrator.surface_mut().skip_next_images(1);

    assert_eq!(orchestrator.tick(&mut scene).unwrap(), FrameOutcome::NotReady);
    assert!(orchestrator.surface().frames().is_empty());
    assert_eq!(orchestrator.current_frame(), 0);

    assert!(matches!(orchestrator.tick(&mut scene).unwrap(), FrameOutcome::Rendered(_)));
    assert_eq!(orchestrator.current_frame(), 1);
}

#[test]
fn run_stops_on_quit_and_drains_the_device() {
    let mut orchestrator = orchestrator(320, 240, RendererConfig::default());
    let mut scene = demo_scene(&mut orchestrator);
    orchestrator.surface_mut().quit_after(5);

    assert_eq!(orchestrator.run(&mut scene).unwrap(), 5);
    assert_eq!(orchestrator.device().timeline().lock().in_flight(), 0);
    assert!(matches!(
        orchestrator.device().calls().last(),
        Some(ash_smaa::headless::DeviceCall::WaitIdle { .. })
    ));
}

#[test]
fn shutdown_releases_everything_the_orchestrator_created() {
    let mut orchestrator = orchestrator(320, 240, RendererConfig::default());
    let mut scene = demo_scene(&mut orchestrator);
    orchestrator.tick(&mut scene).unwrap();

    // scene meshes and textures belong to the caller
    let scene_buffers = 4;
    let scene_images = 4;

    orchestrator.shutdown().unwrap();
    assert_eq!(orchestrator.device().live_buffers(), scene_buffers);
    assert_eq!(orchestrator.device().live_images(), scene_images);
    assert_eq!(orchestrator.device().live_pipelines(), 0);

    assert!(orchestrator.shutdown().is_ok());
    assert!(matches!(
        orchestrator.tick(&mut scene),
        Err(AshError::PreconditionViolated(_))
    ));
}
