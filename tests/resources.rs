mod common;

use ash_smaa::gpu::{BoundResource, GpuDevice};
use ash_smaa::headless::{self, DeviceCall};
use ash_smaa::renderer::lookup::{AREA_TEX_SIZE, SEARCH_TEX_SIZE};
use ash_smaa::renderer::{
    pack_objects, FrameOrchestrator, FrameOutcome, LookupTables, PerObjectGpuRecord, Renderable,
    SceneObjectRecord, TextureKind, Transform, NO_TEXTURE,
};
use ash_smaa::{AshError, RendererConfig};
use common::*;
use glam::Vec3;

#[test]
fn storage_growth_rebuilds_exactly_once() {
    let config = RendererConfig::default().with_initial_object_capacity(4);
    let mut orchestrator = orchestrator(320, 240, config);
    let mut scene = demo_scene(&mut orchestrator);

    orchestrator.tick(&mut scene).unwrap();
    assert_eq!(orchestrator.frame_resources().rebuild_count(), 1);
    assert_eq!(orchestrator.frame_resources().capacity(), 8);

    for _ in 0..5 {
        orchestrator.tick(&mut scene).unwrap();
    }
    assert_eq!(orchestrator.frame_resources().rebuild_count(), 1);

    // exceeding the grown capacity rebuilds once more
    for light in light_ring(100) {
        scene.push(light);
    }
    orchestrator.device_mut().clear_calls();
    orchestrator.tick(&mut scene).unwrap();
    assert_eq!(orchestrator.frame_resources().rebuild_count(), 2);
    assert_eq!(orchestrator.frame_resources().capacity(), 14);
    assert_eq!(orchestrator.device().wait_idle_count(), 1);
    for _ in 0..3 {
        orchestrator.tick(&mut scene).unwrap();
    }
    assert_eq!(orchestrator.frame_resources().rebuild_count(), 2);

    // every slot's set points at its own, grown buffer
    let table = orchestrator.table();
    for slot in orchestrator.frame_resources().slots() {
        assert_eq!(
            table.bound(slot.global_set, 1, 0),
            Some(BoundResource::Buffer {
                buffer: slot.objects,
                range: 14 * 208,
            })
        );
        assert_eq!(
            orchestrator.device().buffer_data(slot.objects).map(<[u8]>::len),
            Some(14 * 208)
        );
    }
}

#[test]
fn scene_within_capacity_never_rebuilds_storage() {
    let mut orchestrator = orchestrator(320, 240, RendererConfig::default());
    let mut scene = plain_scene(&mut orchestrator, 16);
    for _ in 0..4 {
        orchestrator.tick(&mut scene).unwrap();
    }
    assert_eq!(orchestrator.frame_resources().rebuild_count(), 0);
    assert_eq!(orchestrator.frame_resources().capacity(), 16);
}

#[test]
fn texture_arrays_are_sized_to_registered_textures() {
    let mut orchestrator = orchestrator(320, 240, RendererConfig::default());
    let mut scene = demo_scene(&mut orchestrator);

    orchestrator.tick(&mut scene).unwrap();
    assert_eq!(orchestrator.textures().rebuild_count(), 1);
    assert_eq!(orchestrator.textures().len(TextureKind::Albedo), 2);
    assert_eq!(orchestrator.textures().len(TextureKind::Normal), 1);
    assert_eq!(orchestrator.textures().len(TextureKind::Height), 1);

    for frame in 0..2 {
        let albedo = orchestrator.textures().set(TextureKind::Albedo, frame).unwrap();
        assert_eq!(orchestrator.table().variable_count(albedo), Some(2));
        let raw = orchestrator.table().raw_set(albedo).unwrap();
        assert_eq!(orchestrator.device().variable_count(raw), Some(2));
    }

    for _ in 0..3 {
        orchestrator.tick(&mut scene).unwrap();
    }
    assert_eq!(orchestrator.textures().rebuild_count(), 1);

    // a new textured object grows the albedo array once more
    let image = texture(orchestrator.device_mut(), "statue-albedo");
    let statue = Renderable::new(mesh(orchestrator.device_mut(), 3)).with_albedo(image);
    scene.push(SceneObjectRecord::geometry(
        20,
        Transform::from_translation(Vec3::new(2.0, 0.0, 0.0)),
        statue,
    ));
    orchestrator.tick(&mut scene).unwrap();
    assert_eq!(orchestrator.textures().rebuild_count(), 2);
    assert_eq!(orchestrator.textures().index_of(TextureKind::Albedo, 20), 2);

    let albedo = orchestrator.textures().set(TextureKind::Albedo, 0).unwrap();
    assert_eq!(orchestrator.table().variable_count(albedo), Some(3));
    assert_eq!(
        orchestrator.table().bound(albedo, 0, 2),
        Some(BoundResource::sampled(&image))
    );

    let resets = orchestrator
        .device()
        .calls()
        .iter()
        .filter(|call| matches!(call, DeviceCall::ResetPool { .. }))
        .count();
    // albedo, normal and height on the first frame, albedo alone on growth
    assert_eq!(resets, 4);
}

#[test]
fn texture_indices_stay_stable_across_frames() {
    let mut orchestrator = orchestrator(320, 240, RendererConfig::default());
    let mut scene = demo_scene(&mut orchestrator);

    orchestrator.tick(&mut scene).unwrap();
    let before: Vec<_> = TextureKind::ALL
        .iter()
        .map(|&kind| orchestrator.textures().index_of(kind, 1))
        .collect();

    scene.objects.swap(0, 1);
    orchestrator.tick(&mut scene).unwrap();
    let after: Vec<_> = TextureKind::ALL
        .iter()
        .map(|&kind| orchestrator.textures().index_of(kind, 1))
        .collect();
    assert_eq!(before, after);
    assert_eq!(orchestrator.textures().rebuild_count(), 1);
}

#[test]
fn textures_a_renderable_no_longer_has_pack_as_absent() {
    let mut orchestrator = orchestrator(320, 240, RendererConfig::default());
    let mut scene = plain_scene(&mut orchestrator, 0);
    let image = texture(orchestrator.device_mut(), "crate-albedo");
    let textured = Renderable::new(mesh(orchestrator.device_mut(), 3)).with_albedo(image);
    scene.push(SceneObjectRecord::geometry(7, Transform::default(), textured));
    orchestrator.tick(&mut scene).unwrap();
    let packed = pack_objects(&scene.objects, orchestrator.textures());
    assert_eq!(packed.records[0].texture_index, 0);

    // same id, now without any texture
    let bare = Renderable::new(mesh(orchestrator.device_mut(), 3));
    scene.objects[0] = SceneObjectRecord::geometry(7, Transform::default(), bare);
    orchestrator.tick(&mut scene).unwrap();

    let packed = pack_objects(&scene.objects, orchestrator.textures());
    assert_eq!(packed.records[0].texture_indices(), [NO_TEXTURE; 3]);

    // the uploaded record agrees
    let slot = orchestrator.frame_resources().slot(1).unwrap();
    let bytes = orchestrator.device().buffer_data(slot.objects).unwrap();
    let record: PerObjectGpuRecord = bytemuck::pod_read_unaligned(&bytes[..208]);
    assert_eq!(record.texture_index, NO_TEXTURE);
}

#[test]
fn replaced_texture_is_rewritten_in_every_slot() {
    let mut orchestrator = orchestrator(320, 240, RendererConfig::default());
    let mut scene = demo_scene(&mut orchestrator);
    orchestrator.tick(&mut scene).unwrap();
    let index = orchestrator.textures().index_of(TextureKind::Albedo, 0);
    let sets: Vec<_> = (0..2)
        .map(|frame| orchestrator.textures().set(TextureKind::Albedo, frame).unwrap())
        .collect();

    let image = texture(orchestrator.device_mut(), "vase-albedo-2");
    let vase = Renderable::new(mesh(orchestrator.device_mut(), 36)).with_albedo(image);
    scene.objects[0] = SceneObjectRecord::geometry(0, Transform::default(), vase);
    orchestrator.device_mut().clear_calls();
    orchestrator.tick(&mut scene).unwrap();

    assert_eq!(orchestrator.textures().rebuild_count(), 1);
    assert_eq!(orchestrator.textures().index_of(TextureKind::Albedo, 0), index);
    for set in sets {
        assert!(orchestrator.table().is_live(set));
        assert_eq!(
            orchestrator.table().bound(set, 0, index as u32),
            Some(BoundResource::sampled(&image))
        );
    }
    assert!(!orchestrator
        .device()
        .calls()
        .iter()
        .any(|call| matches!(call, DeviceCall::ResetPool { .. } | DeviceCall::AllocateSet { .. })));
}

#[test]
fn texture_array_overflow_is_a_configuration_error() {
    let config = RendererConfig::default().with_max_textures_per_kind(2);
    let mut orchestrator = orchestrator(320, 240, config);
    let mut scene = plain_scene(&mut orchestrator, 0);
    for id in 0..3 {
        let image = texture(orchestrator.device_mut(), "albedo");
        let renderable = Renderable::new(mesh(orchestrator.device_mut(), 3)).with_albedo(image);
        scene.push(SceneObjectRecord::geometry(id, Transform::default(), renderable));
    }

    assert!(matches!(
        orchestrator.tick(&mut scene),
        Err(AshError::Configuration(_))
    ));
}

#[test]
fn lookup_tables_are_uploaded_verbatim() {
    let mut orchestrator = orchestrator(320, 240, RendererConfig::default());
    let (area, search) = lookup_blobs();
    let mut scene = demo_scene(&mut orchestrator);
    orchestrator.tick(&mut scene).unwrap();

    let blend = orchestrator
        .pass_bindings()
        .set(ash_smaa::gpu::PassKind::BlendWeight, 0)
        .unwrap();
    let bound_views: Vec<_> = (1..3)
        .filter_map(|binding| match orchestrator.table().bound(blend, binding, 0) {
            Some(BoundResource::Image { view, .. }) => Some(view),
            _ => None,
        })
        .collect();
    assert_eq!(bound_views.len(), 2);

    let uploads: Vec<_> = orchestrator
        .device()
        .calls()
        .iter()
        .filter_map(|call| match call {
            DeviceCall::UploadImage { image, .. } => Some(*image),
            _ => None,
        })
        .collect();
    assert_eq!(uploads.len(), 2);
    assert_eq!(orchestrator.device().image_texels(uploads[0]), Some(area.as_slice()));
    assert_eq!(orchestrator.device().image_texels(uploads[1]), Some(search.as_slice()));
}

#[test]
fn lookup_size_mismatch_is_rejected() {
    let (device, surface) = headless::create(extent(320, 240), 2);
    let area = vec![0u8; AREA_TEX_SIZE - 1];
    let search = vec![0u8; SEARCH_TEX_SIZE];
    let result = FrameOrchestrator::new(
        device,
        surface,
        LookupTables {
            area: &area,
            search: &search,
        },
        RendererConfig::default(),
    );
    assert!(matches!(result, Err(AshError::Configuration(_))));
}

#[test]
fn zero_sized_initial_surface_is_rejected() {
    let (device, surface) = headless::create(extent(0, 240), 2);
    let (area, search) = lookup_blobs();
    let result = FrameOrchestrator::new(
        device,
        surface,
        LookupTables {
            area: &area,
            search: &search,
        },
        RendererConfig::default(),
    );
    assert!(matches!(result, Err(AshError::Configuration(_))));
}

#[test]
fn empty_scene_still_runs_every_pass() {
    let mut orchestrator = orchestrator(320, 240, RendererConfig::default());
    let mut scene = plain_scene(&mut orchestrator, 0);
    let FrameOutcome::Rendered(stats) = orchestrator.tick(&mut scene).unwrap() else {
        panic!("empty scene should still render");
    };
    assert_eq!(stats.passes, 4);
    assert_eq!(stats.geometry.mesh_draws, 0);
    assert_eq!(stats.geometry.light_draws, 0);
    assert_eq!(stats.post_draws, 3);
    let device = orchestrator.device_mut();
    assert!(device.wait_idle().is_ok());
}
