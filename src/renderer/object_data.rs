//! CPU-side layouts of the per-frame uniform and the per-object storage records.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use crate::gpu::MeshBuffers;

use super::camera::Camera;
use super::scene::{ObjectKind, Renderable, SceneObjectRecord};
use super::texture_arrays::{TextureArrays, TextureKind};

/// Texture index meaning "no texture of this kind".
pub const NO_TEXTURE: i32 = -1;

#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Geometry = 0,
    PointLight = 1,
}

/// One element of the per-frame storage buffer, 208 bytes, std430 compatible.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PerObjectGpuRecord {
    pub position: Vec4,
    /// Geometry: euler angles. Point light: rgb colour and intensity.
    pub rotation: Vec4,
    /// Geometry: scale. Point light: (radius, -1, -1, -1).
    pub scale: Vec4,
    pub model: Mat4,
    pub normal: Mat4,
    pub texture_index: i32,
    pub normal_index: i32,
    pub height_index: i32,
    pub height_scale: f32,
    pub parallax_bias: f32,
    pub num_layers: f32,
    pub parallax_mode: i32,
    pub kind: i32,
}

impl PerObjectGpuRecord {
    pub fn kind(&self) -> RecordKind {
        if self.kind == RecordKind::PointLight as i32 {
            RecordKind::PointLight
        } else {
            RecordKind::Geometry
        }
    }

    pub fn texture_indices(&self) -> [i32; 3] {
        [self.texture_index, self.normal_index, self.height_index]
    }
}

/// Per-frame uniform block (binding 0 of the global set).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GlobalFrameUniform {
    pub projection: Mat4,
    pub view: Mat4,
    pub inverse_view: Mat4,
    pub inverse_projection: Mat4,
    pub ambient_light_color: Vec4,
    pub light_count: i32,
    pub object_count: i32,
    pub _padding: [i32; 2],
}

impl GlobalFrameUniform {
    pub fn new(camera: &Camera, objects: &PackedObjects, ambient_light_color: Vec4) -> Self {
        Self {
            projection: camera.projection(),
            view: camera.view(),
            inverse_view: camera.inverse_view(),
            inverse_projection: camera.inverse_projection(),
            ambient_light_color,
            light_count: objects.light_count as i32,
            object_count: objects.records.len() as i32,
            _padding: [0; 2],
        }
    }
}

/// Push constant selecting the record a draw reads.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct ObjectPushConstants {
    pub object_index: u32,
}

/// The frame's storage-buffer contents plus the meshes needed to draw them.
///
/// `records` is in reverse scene order; `meshes[i]` belongs to `records[i]`.
#[derive(Clone, Debug, Default)]
pub struct PackedObjects {
    pub records: Vec<PerObjectGpuRecord>,
    pub meshes: Vec<Option<MeshBuffers>>,
    pub light_count: usize,
}

impl PackedObjects {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.records)
    }

    /// (record index, mesh) for every geometry record
    pub fn geometry(&self) -> impl Iterator<Item = (u32, &MeshBuffers)> + '_ {
        self.meshes
            .iter()
            .enumerate()
            .filter_map(|(index, mesh)| mesh.as_ref().map(|mesh| (index as u32, mesh)))
    }

    /// Record index of every point light
    pub fn lights(&self) -> impl Iterator<Item = u32> + '_ {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.kind() == RecordKind::PointLight)
            .map(|(index, _)| index as u32)
    }
}

fn geometry_record(
    object: &SceneObjectRecord,
    renderable: &Renderable,
    textures: &TextureArrays,
) -> PerObjectGpuRecord {
    let transform = &object.transform;
    let parallax = renderable.parallax;
    // the renderable's current textures decide presence, not past registrations
    let index = |kind: TextureKind| match renderable.texture(kind) {
        Some(_) => textures.index_of(kind, object.id),
        None => NO_TEXTURE,
    };
    PerObjectGpuRecord {
        position: transform.translation.extend(0.0),
        rotation: transform.rotation.extend(0.0),
        scale: transform.scale.extend(0.0),
        model: transform.model_matrix(),
        normal: transform.normal_matrix(),
        texture_index: index(TextureKind::Albedo),
        normal_index: index(TextureKind::Normal),
        height_index: index(TextureKind::Height),
        height_scale: parallax.height_scale,
        parallax_bias: parallax.bias,
        num_layers: parallax.num_layers,
        parallax_mode: parallax.mode,
        kind: RecordKind::Geometry as i32,
    }
}

fn light_record(object: &SceneObjectRecord, color: glam::Vec3, intensity: f32) -> PerObjectGpuRecord {
    PerObjectGpuRecord {
        position: object.transform.translation.extend(0.0),
        rotation: color.extend(intensity),
        scale: Vec4::new(object.transform.scale.x, -1.0, -1.0, -1.0),
        model: Mat4::IDENTITY,
        normal: Mat4::IDENTITY,
        texture_index: NO_TEXTURE,
        normal_index: NO_TEXTURE,
        height_index: NO_TEXTURE,
        height_scale: -1.0,
        parallax_bias: -1.0,
        num_layers: -1.0,
        parallax_mode: -1,
        kind: RecordKind::PointLight as i32,
    }
}

/// Builds the frame's object records. The result is reversed relative to
/// scene iteration order; shaders index records in that order.
pub fn pack_objects(objects: &[SceneObjectRecord], textures: &TextureArrays) -> PackedObjects {
    let mut packed = PackedObjects {
        records: Vec::with_capacity(objects.len()),
        meshes: Vec::with_capacity(objects.len()),
        light_count: 0,
    };

    for object in objects.iter().rev() {
        match &object.kind {
            ObjectKind::Geometry(renderable) => {
                packed.records.push(geometry_record(object, renderable, textures));
                packed.meshes.push(Some(renderable.mesh));
            }
            ObjectKind::PointLight(light) => {
                packed
                    .records
                    .push(light_record(object, light.color, light.intensity));
                packed.meshes.push(None);
                packed.light_count += 1;
            }
        }
    }

    packed
}
