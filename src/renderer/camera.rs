use glam::{EulerRot, Mat4, Quat, Vec3};

/// View and projection state the scene hands to the frame uniform.
///
/// Projections follow the Vulkan clip convention: depth in `[0, 1]` and +Y
/// pointing down in screen space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    projection: Mat4,
    view: Mat4,
    inverse_view: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            inverse_view: Mat4::IDENTITY,
        }
    }
}

impl Camera {
    pub fn set_orthographic_projection(
        &mut self,
        left: f32,
        right: f32,
        top: f32,
        bottom: f32,
        near: f32,
        far: f32,
    ) {
        self.projection = Mat4::orthographic_rh(left, right, bottom, top, near, far);
        self.projection.y_axis.y *= -1.0;
    }

    /// `fovy` in radians
    pub fn set_perspective_projection(&mut self, fovy: f32, aspect: f32, near: f32, far: f32) {
        let aspect = if aspect.is_finite() && aspect > 0.0 {
            aspect
        } else {
            1.0
        };
        self.projection = Mat4::perspective_rh(fovy, aspect, near, far);
        self.projection.y_axis.y *= -1.0;
    }

    pub fn set_view_direction(&mut self, position: Vec3, direction: Vec3, up: Vec3) {
        self.view = Mat4::look_to_rh(position, direction.normalize_or(Vec3::NEG_Z), up);
        self.inverse_view = self.view.inverse();
    }

    pub fn set_view_target(&mut self, position: Vec3, target: Vec3, up: Vec3) {
        self.set_view_direction(position, target - position, up);
    }

    /// Places the camera at `position` rotated by yaw (`rotation.y`), pitch
    /// (`rotation.x`) and roll (`rotation.z`), applied in Y-X-Z order.
    pub fn set_view_yxz(&mut self, position: Vec3, rotation: Vec3) {
        let orientation = Quat::from_euler(EulerRot::YXZ, rotation.y, rotation.x, rotation.z);
        self.inverse_view = Mat4::from_rotation_translation(orientation, position);
        self.view = self.inverse_view.inverse();
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn inverse_view(&self) -> Mat4 {
        self.inverse_view
    }

    pub fn inverse_projection(&self) -> Mat4 {
        self.projection.inverse()
    }

    pub fn position(&self) -> Vec3 {
        self.inverse_view.w_axis.truncate()
    }

    /// Forward direction in world space
    pub fn forward(&self) -> Vec3 {
        -self.inverse_view.z_axis.truncate().normalize_or_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_mat_near(a: Mat4, b: Mat4) {
        assert!(a.abs_diff_eq(b, 1e-4), "{a:?} != {b:?}");
    }

    #[test]
    fn view_and_inverse_view_are_inverses() {
        let mut camera = Camera::default();
        camera.set_view_yxz(Vec3::new(0.0, -1.5, -4.0), Vec3::new(-0.2, 0.7, 0.0));
        assert_mat_near(camera.view() * camera.inverse_view(), Mat4::IDENTITY);
        assert!(camera.position().abs_diff_eq(Vec3::new(0.0, -1.5, -4.0), 1e-5));
    }

    #[test]
    fn target_view_looks_at_target() {
        let mut camera = Camera::default();
        camera.set_view_target(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        assert!(camera.forward().abs_diff_eq(Vec3::NEG_Z, 1e-5));

        let in_view = camera.view().transform_point3(Vec3::ZERO);
        assert!(in_view.abs_diff_eq(Vec3::new(0.0, 0.0, -5.0), 1e-5));
    }

    #[test]
    fn perspective_flips_y_for_vulkan() {
        let mut camera = Camera::default();
        camera.set_perspective_projection(50f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
        assert!(camera.projection().y_axis.y < 0.0);
        assert_mat_near(
            camera.projection() * camera.inverse_projection(),
            Mat4::IDENTITY,
        );
    }

    #[test]
    fn degenerate_aspect_ratio_falls_back() {
        let mut camera = Camera::default();
        camera.set_perspective_projection(1.0, 0.0, 0.1, 10.0);
        assert!(camera.projection().is_finite());
    }

    #[test]
    fn orthographic_maps_top_left_to_vulkan_origin() {
        let mut camera = Camera::default();
        camera.set_orthographic_projection(-2.0, 2.0, 1.0, -1.0, 0.1, 10.0);
        let corner = camera.projection().project_point3(Vec3::new(-2.0, 1.0, -0.1));
        assert!(corner.abs_diff_eq(Vec3::new(-1.0, -1.0, 0.0), 1e-5));
    }
}
