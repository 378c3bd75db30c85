//! Drives the orchestrator on the headless backend: a vase, a parallax floor
//! and six orbiting point lights, with a resize halfway through.
//!
//! Run with `RUST_LOG=info cargo run --example headless_frames`.

use std::f32::consts::TAU;

use ash::vk;
use ash_smaa::gpu::{ImageDesc, SurfaceEvent};
use ash_smaa::headless::{self, HeadlessDevice};
use ash_smaa::renderer::lookup::{AREA_TEX_SIZE, SEARCH_TEX_SIZE};
use ash_smaa::renderer::FrameTiming;
use ash_smaa::prelude::*;
use glam::{Quat, Vec3};

const FRAMES: u64 = 120;

const LIGHT_COLORS: [Vec3; 6] = [
    Vec3::new(1.0, 0.1, 0.1),
    Vec3::new(0.1, 0.1, 1.0),
    Vec3::new(0.1, 1.0, 0.1),
    Vec3::new(1.0, 1.0, 0.1),
    Vec3::new(0.1, 1.0, 1.0),
    Vec3::new(1.0, 1.0, 1.0),
];

/// Spins the point lights around the vertical axis.
struct OrbitingLights {
    snapshot: SceneSnapshot,
    elapsed: f32,
}

impl SceneSource for OrbitingLights {
    fn objects(&self) -> &[SceneObjectRecord] {
        &self.snapshot.objects
    }

    fn camera(&self) -> &Camera {
        &self.snapshot.camera
    }

    fn prepare_frame(&mut self, timing: FrameTiming) {
        self.elapsed += timing.frame_time;
        self.snapshot.prepare_frame(timing);

        let spin = Quat::from_axis_angle(Vec3::NEG_Y, timing.frame_time);
        for object in &mut self.snapshot.objects {
            if object.is_point_light() {
                object.transform.translation = spin * object.transform.translation;
            }
        }
    }
}

fn mesh(device: &mut HeadlessDevice, vertices: u32) -> Result<MeshBuffers> {
    Ok(MeshBuffers {
        positions: device.create_buffer(12 * vertices as u64, vk::BufferUsageFlags::VERTEX_BUFFER)?,
        attributes: device
            .create_buffer(32 * vertices as u64, vk::BufferUsageFlags::VERTEX_BUFFER)?,
        indices: None,
        count: vertices,
    })
}

fn texture(device: &mut HeadlessDevice, label: &'static str) -> Result<SampledImage> {
    device.create_image(&ImageDesc {
        extent: vk::Extent2D {
            width: 256,
            height: 256,
        },
        format: vk::Format::R8G8B8A8_UNORM,
        usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        label,
    })
}

fn build_scene(device: &mut HeadlessDevice) -> Result<OrbitingLights> {
    let mut camera = Camera::default();
    camera.set_view_target(Vec3::new(0.0, -1.5, -3.0), Vec3::ZERO, Vec3::NEG_Y);
    let mut snapshot = SceneSnapshot::new(camera);

    let vase = Renderable::new(mesh(device, 1152)?).with_albedo(texture(device, "vase-albedo")?);
    snapshot.push(SceneObjectRecord::geometry(
        0,
        Transform::from_translation(Vec3::new(0.0, 0.5, 0.0)).with_scale(Vec3::splat(3.0)),
        vase,
    ));

    let floor = Renderable::new(mesh(device, 6)?)
        .with_albedo(texture(device, "floor-albedo")?)
        .with_normal_map(texture(device, "floor-normal")?)
        .with_height_map(
            texture(device, "floor-height")?,
            ParallaxParams {
                height_scale: 0.1,
                bias: -0.02,
                num_layers: 48.0,
                mode: 1,
            },
        );
    snapshot.push(SceneObjectRecord::geometry(
        1,
        Transform::from_translation(Vec3::new(0.0, 0.5, 0.0)).with_scale(Vec3::new(3.0, 1.0, 3.0)),
        floor,
    ));

    for (i, &color) in LIGHT_COLORS.iter().enumerate() {
        let rotation = Quat::from_axis_angle(Vec3::NEG_Y, i as f32 * TAU / LIGHT_COLORS.len() as f32);
        snapshot.push(SceneObjectRecord::point_light(
            2 + i as u32,
            rotation * Vec3::splat(-1.0),
            0.5,
            PointLight {
                color,
                intensity: 0.2,
            },
        ));
    }

    Ok(OrbitingLights {
        snapshot,
        elapsed: 0.0,
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (device, mut surface) = headless::create(
        vk::Extent2D {
            width: 1280,
            height: 720,
        },
        2,
    );
    surface.quit_after(FRAMES);

    let area = vec![0u8; AREA_TEX_SIZE];
    let search = vec![0u8; SEARCH_TEX_SIZE];
    let mut orchestrator = FrameOrchestrator::new(
        device,
        surface,
        LookupTables {
            area: &area,
            search: &search,
        },
        RendererConfig::default(),
    )?;
    let mut scene = build_scene(orchestrator.device_mut())?;

    // first half at 720p
    for _ in 0..FRAMES / 2 {
        if let FrameOutcome::Rendered(stats) = orchestrator.tick(&mut scene)? {
            log::debug!(
                "frame {}: {} draws",
                orchestrator.frames_rendered(),
                stats.draw_count()
            );
        }
    }

    orchestrator
        .surface_mut()
        .push_event(SurfaceEvent::Resized(vk::Extent2D {
            width: 1920,
            height: 1080,
        }));
    let rendered = orchestrator.run(&mut scene)?;

    let timeline = orchestrator.device().timeline();
    let timeline = timeline.lock();
    log::info!(
        "{} frames rendered over {:.2}s of scene time ({} submitted, at most {} in flight), {} resize(s), final extent {:?}",
        rendered,
        scene.elapsed,
        timeline.submitted(),
        timeline.max_in_flight(),
        orchestrator.lifecycle().resize_count(),
        orchestrator.lifecycle().extent()
    );
    drop(timeline);

    orchestrator.shutdown()
}
