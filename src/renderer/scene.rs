use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::gpu::{MeshBuffers, SampledImage};

use super::camera::Camera;
use super::texture_arrays::TextureKind;

/// Stable identity of an object across frames.
pub type ObjectId = u32;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    /// Euler angles in radians, applied Y then X then Z
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Default::default()
        }
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_rotation(mut self, rotation: Vec3) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn orientation(&self) -> Quat {
        Quat::from_euler(EulerRot::YXZ, self.rotation.y, self.rotation.x, self.rotation.z)
    }

    /// translate * Ry * Rx * Rz * scale
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.orientation(), self.translation)
    }

    /// Inverse-transpose of the model matrix, for transforming normals.
    pub fn normal_matrix(&self) -> Mat4 {
        self.model_matrix().inverse().transpose()
    }
}

/// Relief-mapping parameters for objects with a height map.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParallaxParams {
    pub height_scale: f32,
    pub bias: f32,
    pub num_layers: f32,
    /// 0 disables parallax in the shader
    pub mode: i32,
}

impl Default for ParallaxParams {
    fn default() -> Self {
        Self {
            height_scale: 0.0,
            bias: 0.0,
            num_layers: 0.0,
            mode: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaterialTextures {
    pub albedo: Option<SampledImage>,
    pub normal: Option<SampledImage>,
    pub height: Option<SampledImage>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Renderable {
    pub mesh: MeshBuffers,
    pub textures: MaterialTextures,
    pub parallax: ParallaxParams,
}

impl Renderable {
    pub fn new(mesh: MeshBuffers) -> Self {
        Self {
            mesh,
            textures: MaterialTextures::default(),
            parallax: ParallaxParams::default(),
        }
    }

    pub fn with_albedo(mut self, image: SampledImage) -> Self {
        self.textures.albedo = Some(image);
        self
    }

    pub fn with_normal_map(mut self, image: SampledImage) -> Self {
        self.textures.normal = Some(image);
        self
    }

    pub fn with_height_map(mut self, image: SampledImage, parallax: ParallaxParams) -> Self {
        self.textures.height = Some(image);
        self.parallax = parallax;
        self
    }

    pub fn texture(&self, kind: TextureKind) -> Option<&SampledImage> {
        match kind {
            TextureKind::Albedo => self.textures.albedo.as_ref(),
            TextureKind::Normal => self.textures.normal.as_ref(),
            TextureKind::Height => self.textures.height.as_ref(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub color: Vec3,
    pub intensity: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ObjectKind {
    Geometry(Renderable),
    PointLight(PointLight),
}

/// One entry of the scene as seen by the renderer for a single frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneObjectRecord {
    pub id: ObjectId,
    pub transform: Transform,
    pub kind: ObjectKind,
}

impl SceneObjectRecord {
    pub fn geometry(id: ObjectId, transform: Transform, renderable: Renderable) -> Self {
        Self {
            id,
            transform,
            kind: ObjectKind::Geometry(renderable),
        }
    }

    /// A point light of the given radius; the radius is carried in `scale.x`.
    pub fn point_light(id: ObjectId, position: Vec3, radius: f32, light: PointLight) -> Self {
        Self {
            id,
            transform: Transform::from_translation(position).with_scale(Vec3::new(radius, 1.0, 1.0)),
            kind: ObjectKind::PointLight(light),
        }
    }

    pub fn renderable(&self) -> Option<&Renderable> {
        match &self.kind {
            ObjectKind::Geometry(renderable) => Some(renderable),
            ObjectKind::PointLight(_) => None,
        }
    }

    pub fn is_point_light(&self) -> bool {
        matches!(self.kind, ObjectKind::PointLight(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameTiming {
    /// Seconds since the previous tick
    pub frame_time: f32,
    pub aspect_ratio: f32,
}

/// The scene collaborator. The renderer only reads it.
pub trait SceneSource {
    fn objects(&self) -> &[SceneObjectRecord];
    fn camera(&self) -> &Camera;

    /// Called once per rendered frame before the objects are read.
    fn prepare_frame(&mut self, _timing: FrameTiming) {}
}

/// A plain list of objects plus a camera.
#[derive(Clone, Debug, Default)]
pub struct SceneSnapshot {
    pub objects: Vec<SceneObjectRecord>,
    pub camera: Camera,
}

impl SceneSnapshot {
    pub fn new(camera: Camera) -> Self {
        Self {
            objects: Vec::new(),
            camera,
        }
    }

    pub fn push(&mut self, object: SceneObjectRecord) -> &mut Self {
        self.objects.push(object);
        self
    }
}

impl SceneSource for SceneSnapshot {
    fn objects(&self) -> &[SceneObjectRecord] {
        &self.objects
    }

    fn camera(&self) -> &Camera {
        &self.camera
    }

    fn prepare_frame(&mut self, timing: FrameTiming) {
        self.camera
            .set_perspective_projection(50f32.to_radians(), timing.aspect_ratio, 0.1, 100.0);
    }
}
