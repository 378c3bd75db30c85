#![allow(dead_code)]

use std::f32::consts::TAU;

use ash::vk;
use ash_smaa::gpu::{GpuDevice, ImageDesc, MeshBuffers, SampledImage};
use ash_smaa::headless::{self, HeadlessDevice, HeadlessSurface};
use ash_smaa::renderer::lookup::{AREA_TEX_SIZE, SEARCH_TEX_SIZE};
use ash_smaa::renderer::{
    Camera, FrameOrchestrator, LookupTables, ParallaxParams, PointLight, Renderable,
    SceneObjectRecord, SceneSnapshot, Transform,
};
use ash_smaa::RendererConfig;
use glam::{Quat, Vec3};

pub type Orchestrator = FrameOrchestrator<HeadlessDevice, HeadlessSurface>;

pub const LIGHT_COLORS: [Vec3; 6] = [
    Vec3::new(1.0, 0.1, 0.1),
    Vec3::new(0.1, 0.1, 1.0),
    Vec3::new(0.1, 1.0, 0.1),
    Vec3::new(1.0, 1.0, 0.1),
    Vec3::new(0.1, 1.0, 1.0),
    Vec3::new(1.0, 1.0, 1.0),
];

pub fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

pub fn lookup_blobs() -> (Vec<u8>, Vec<u8>) {
    let area = (0..AREA_TEX_SIZE).map(|i| (i % 251) as u8).collect();
    let search = (0..SEARCH_TEX_SIZE).map(|i| (i % 17) as u8).collect();
    (area, search)
}

pub fn orchestrator(width: u32, height: u32, config: RendererConfig) -> Orchestrator {
    let _ = env_logger::builder().is_test(true).try_init();
    let (device, surface) = headless::create(extent(width, height), config.frames_in_flight);
    let (area, search) = lookup_blobs();
    FrameOrchestrator::new(
        device,
        surface,
        LookupTables {
            area: &area,
            search: &search,
        },
        config,
    )
    .expect("orchestrator setup")
}

pub fn mesh(device: &mut impl GpuDevice, vertices: u32) -> MeshBuffers {
    let positions = device
        .create_buffer(12 * vertices as u64, vk::BufferUsageFlags::VERTEX_BUFFER)
        .unwrap();
    let attributes = device
        .create_buffer(32 * vertices as u64, vk::BufferUsageFlags::VERTEX_BUFFER)
        .unwrap();
    MeshBuffers {
        positions,
        attributes,
        indices: None,
        count: vertices,
    }
}

pub fn texture(device: &mut impl GpuDevice, label: &'static str) -> SampledImage {
    device
        .create_image(&ImageDesc {
            extent: extent(4, 4),
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            label,
        })
        .unwrap()
}

pub fn camera() -> Camera {
    let mut camera = Camera::default();
    camera.set_view_target(Vec3::new(0.0, -1.5, -3.0), Vec3::ZERO, Vec3::NEG_Y);
    camera
}

/// Six coloured lights on a ring, ids starting at `first_id`.
pub fn light_ring(first_id: u32) -> Vec<SceneObjectRecord> {
    LIGHT_COLORS
        .iter()
        .enumerate()
        .map(|(i, &color)| {
            let rotation = Quat::from_axis_angle(Vec3::NEG_Y, i as f32 * TAU / 6.0);
            SceneObjectRecord::point_light(
                first_id + i as u32,
                rotation * Vec3::splat(-1.0),
                0.5,
                PointLight {
                    color,
                    intensity: 0.2,
                },
            )
        })
        .collect()
}

/// A textured vase, a parallax-mapped floor and six point lights.
pub fn demo_scene(orchestrator: &mut Orchestrator) -> SceneSnapshot {
    let device = orchestrator.device_mut();
    let vase = Renderable::new(mesh(device, 36)).with_albedo(texture(device, "vase-albedo"));
    let floor = Renderable::new(mesh(device, 6))
        .with_albedo(texture(device, "floor-albedo"))
        .with_normal_map(texture(device, "floor-normal"))
        .with_height_map(
            texture(device, "floor-height"),
            ParallaxParams {
                height_scale: 0.1,
                bias: -0.02,
                num_layers: 48.0,
                mode: 1,
            },
        );

    let mut scene = SceneSnapshot::new(camera());
    scene.push(SceneObjectRecord::geometry(
        0,
        Transform::from_translation(Vec3::new(0.0, 0.5, 0.0)).with_scale(Vec3::splat(3.0)),
        vase,
    ));
    scene.push(SceneObjectRecord::geometry(
        1,
        Transform::from_translation(Vec3::new(0.0, 0.5, 0.0)).with_scale(Vec3::new(3.0, 1.0, 3.0)),
        floor,
    ));
    for light in light_ring(2) {
        scene.push(light);
    }
    scene
}

/// `count` untextured renderables.
pub fn plain_scene(orchestrator: &mut Orchestrator, count: u32) -> SceneSnapshot {
    let mut scene = SceneSnapshot::new(camera());
    for id in 0..count {
        let renderable = Renderable::new(mesh(orchestrator.device_mut(), 3));
        scene.push(SceneObjectRecord::geometry(
            id,
            Transform::from_translation(Vec3::new(id as f32, 0.0, 0.0)),
            renderable,
        ));
    }
    scene
}
