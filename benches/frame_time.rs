//! Frame orchestration benchmarks.
//!
//! CPU-side record packing plus the full tick loop on the headless backend.
//! No Vulkan driver is needed.

use std::f32::consts::TAU;

use ash::vk;
use ash_smaa::gpu::{GpuDevice, ImageDesc, MeshBuffers, SampledImage};
use ash_smaa::headless::{self, HeadlessDevice, HeadlessSurface};
use ash_smaa::renderer::lookup::{AREA_TEX_SIZE, SEARCH_TEX_SIZE};
use ash_smaa::renderer::pack_objects;
use ash_smaa::prelude::*;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{Quat, Vec3};

type Orchestrator = FrameOrchestrator<HeadlessDevice, HeadlessSurface>;

fn orchestrator(width: u32, height: u32) -> Option<Orchestrator> {
    let _ = env_logger::try_init();
    let (device, surface) = headless::create(vk::Extent2D { width, height }, 2);
    let area = vec![0u8; AREA_TEX_SIZE];
    let search = vec![0u8; SEARCH_TEX_SIZE];
    match FrameOrchestrator::new(
        device,
        surface,
        LookupTables {
            area: &area,
            search: &search,
        },
        RendererConfig::default()
            .with_initial_object_capacity(1024)
            .with_max_textures_per_kind(1024),
    ) {
        Ok(orchestrator) => Some(orchestrator),
        Err(e) => {
            eprintln!("Failed to initialize headless orchestrator for benchmark: {e}");
            None
        }
    }
}

fn mesh(device: &mut HeadlessDevice, vertices: u32) -> MeshBuffers {
    let positions = device
        .create_buffer(12 * vertices as u64, vk::BufferUsageFlags::VERTEX_BUFFER)
        .expect("position buffer");
    let attributes = device
        .create_buffer(32 * vertices as u64, vk::BufferUsageFlags::VERTEX_BUFFER)
        .expect("attribute buffer");
    MeshBuffers {
        positions,
        attributes,
        indices: None,
        count: vertices,
    }
}

fn texture(device: &mut HeadlessDevice) -> SampledImage {
    device
        .create_image(&ImageDesc {
            extent: vk::Extent2D { width: 4, height: 4 },
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            label: "bench-albedo",
        })
        .expect("texture")
}

/// `count` textured objects with a light for every fourth one.
fn scene(orchestrator: &mut Orchestrator, count: u32) -> SceneSnapshot {
    let mut camera = Camera::default();
    camera.set_perspective_projection(50f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
    camera.set_view_target(Vec3::new(0.0, -1.5, -3.0), Vec3::ZERO, Vec3::NEG_Y);

    let mut scene = SceneSnapshot::new(camera);
    let device = orchestrator.device_mut();
    for id in 0..count {
        if id % 4 == 3 {
            let rotation = Quat::from_axis_angle(Vec3::NEG_Y, id as f32 * TAU / count as f32);
            scene.push(SceneObjectRecord::point_light(
                id,
                rotation * Vec3::splat(-1.0),
                0.5,
                PointLight {
                    color: Vec3::ONE,
                    intensity: 0.2,
                },
            ));
        } else {
            let renderable = Renderable::new(mesh(device, 36)).with_albedo(texture(device));
            scene.push(SceneObjectRecord::geometry(
                id,
                Transform::from_translation(Vec3::new(id as f32, 0.0, 0.0)),
                renderable,
            ));
        }
    }
    scene
}

/// Benchmark packing scene objects into GPU records
fn record_packing(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_packing");

    for count in [8, 128, 1024] {
        let Some(mut orchestrator) = orchestrator(800, 600) else {
            break;
        };
        let mut scene = scene(&mut orchestrator, count);
        // registers every texture
        if let Err(e) = orchestrator.tick(&mut scene) {
            eprintln!("Skipping record packing at {count} objects: {e}");
            continue;
        }

        group.bench_with_input(BenchmarkId::new("pack_objects", count), &count, |b, _| {
            b.iter(|| pack_objects(scene.objects(), orchestrator.textures()))
        });
    }

    group.finish();
}

/// Benchmark the whole frame tick on the recording backend
fn headless_tick_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("orchestrator_headless");

    if let Some(mut orchestrator) = orchestrator(800, 600) {
        let mut scene = scene(&mut orchestrator, 64);

        group.bench_function("tick", |b| {
            b.iter(|| {
                orchestrator
                    .tick(&mut scene)
                    .expect("Frame tick failed during benchmark");
                if orchestrator.frames_rendered() % 256 == 0 {
                    orchestrator.surface_mut().clear_frames();
                    orchestrator.device_mut().clear_calls();
                }
            })
        });

        group.bench_function("resize_and_tick", |b| {
            let mut wide = false;
            b.iter(|| {
                wide = !wide;
                let (width, height) = if wide { (1280, 720) } else { (800, 600) };
                orchestrator.surface_mut().push_resize(width, height);
                orchestrator.tick(&mut scene).expect("Resize failed during benchmark");
                orchestrator.tick(&mut scene).expect("Frame tick failed during benchmark");
                orchestrator.surface_mut().clear_frames();
                orchestrator.device_mut().clear_calls();
            })
        });
    }

    group.finish();
}

criterion_group!(benches, record_packing, headless_tick_loop);
criterion_main!(benches);
