//! Per-view projection data and coordinate conversion
//!
//! The runtime reports poses in a right-handed, +Y up frame and field of view
//! as four edge angles. [`projection_from_fov`] turns those angles into a clip
//! space matrix using the runtime's reference formula, and [`CoordinateSystem`]
//! maps poses and matrices into the host engine's frame.

use glam::{Mat3, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::handle::SwapchainHandle;
use crate::types::{CompositionLayerProjectionView, Fovf, Posef, Rect2Di, SwapchainSubImage};

/// Target clip space convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipSpace {
    /// Z in [-1, 1], Y up
    #[default]
    OpenGl,
    /// Z in [0, 1], Y down
    Vulkan,
    /// Z in [0, 1], Y up
    Direct3D,
}

/// Build a perspective projection from four edge angles.
///
/// `far <= near` produces a matrix with the far plane at infinity.
pub fn projection_from_fov(fov: &Fovf, near: f32, far: f32, clip: ClipSpace) -> Mat4 {
    let tan_left = fov.angle_left.tan();
    let tan_right = fov.angle_right.tan();
    let tan_up = fov.angle_up.tan();
    let tan_down = fov.angle_down.tan();

    let tan_width = tan_right - tan_left;
    let tan_height = match clip {
        ClipSpace::Vulkan => tan_down - tan_up,
        ClipSpace::OpenGl | ClipSpace::Direct3D => tan_up - tan_down,
    };
    let offset_z = match clip {
        ClipSpace::OpenGl => near,
        ClipSpace::Vulkan | ClipSpace::Direct3D => 0.0,
    };

    let (m10, m14) = if far <= near {
        (-1.0, -(near + offset_z))
    } else {
        (
            -(far + offset_z) / (far - near),
            -(far * (near + offset_z)) / (far - near),
        )
    };

    // Column-major
    Mat4::from_cols_array(&[
        2.0 / tan_width,
        0.0,
        0.0,
        0.0,
        0.0,
        2.0 / tan_height,
        0.0,
        0.0,
        (tan_right + tan_left) / tan_width,
        (tan_up + tan_down) / tan_height,
        m10,
        -1.0,
        0.0,
        0.0,
        m14,
        0.0,
    ])
}

/// Axis convention of the host engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSystem {
    /// Same as the runtime: +Y up, -Z forward
    YUpRightHanded,
    /// +Z up, +Y forward
    #[default]
    ZUpRightHanded,
}

impl CoordinateSystem {
    /// Rotation taking runtime coordinates into engine coordinates
    pub fn basis_from_runtime(&self) -> Mat3 {
        match self {
            Self::YUpRightHanded => Mat3::IDENTITY,
            // (x, y, z) -> (x, -z, y)
            Self::ZUpRightHanded => Mat3::from_cols(Vec3::X, Vec3::Z, -Vec3::Y),
        }
    }

    pub fn from_runtime_matrix(&self) -> Mat4 {
        Mat4::from_mat3(self.basis_from_runtime())
    }

    pub fn to_runtime_matrix(&self) -> Mat4 {
        Mat4::from_mat3(self.basis_from_runtime().transpose())
    }

    pub fn convert_position(&self, p: Vec3) -> Vec3 {
        match self {
            Self::YUpRightHanded => p,
            Self::ZUpRightHanded => Vec3::new(p.x, -p.z, p.y),
        }
    }

    /// Re-express a runtime rotation in engine axes.
    ///
    /// The basis change is a proper rotation, so conjugating the quaternion by
    /// it only moves the vector part through the same axis map as positions.
    pub fn convert_orientation(&self, q: Quat) -> Quat {
        match self {
            Self::YUpRightHanded => q,
            Self::ZUpRightHanded => Quat::from_xyzw(q.x, -q.z, q.y, q.w),
        }
    }

    /// Engine projection: engine-space point to runtime axes, then clip space
    pub fn convert_projection(&self, projection: Mat4) -> Mat4 {
        projection * self.to_runtime_matrix()
    }
}

/// One eye's pose, field of view and target rectangle for the current frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionView {
    index: usize,
    pose: Posef,
    fov: Fovf,
    sub_image: SwapchainSubImage,
    projection: Mat4,
}

impl ProjectionView {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            pose: Posef::IDENTITY,
            fov: Fovf::default(),
            sub_image: SwapchainSubImage {
                swapchain: SwapchainHandle::null(),
                image_rect: Rect2Di::default(),
                image_array_index: 0,
            },
            projection: Mat4::IDENTITY,
        }
    }

    /// Refresh from the runtime's view location for this frame
    pub fn update(
        &mut self,
        pose: Posef,
        fov: Fovf,
        swapchain: SwapchainHandle,
        width: u32,
        height: u32,
    ) {
        self.pose = pose;
        self.fov = fov;
        self.sub_image = SwapchainSubImage {
            swapchain,
            image_rect: Rect2Di::full(width, height),
            image_array_index: 0,
        };
    }

    /// Recompute the clip-space matrix from the current field of view
    pub fn update_projection(&mut self, near: f32, far: f32, clip: ClipSpace) -> Mat4 {
        self.projection = projection_from_fov(&self.fov, near, far, clip);
        self.projection
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pose(&self) -> &Posef {
        &self.pose
    }

    pub fn fov(&self) -> &Fovf {
        &self.fov
    }

    pub fn sub_image(&self) -> &SwapchainSubImage {
        &self.sub_image
    }

    /// Projection in runtime axes
    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn engine_position(&self, cs: CoordinateSystem) -> Vec3 {
        cs.convert_position(self.pose.position)
    }

    pub fn engine_orientation(&self, cs: CoordinateSystem) -> Quat {
        cs.convert_orientation(self.pose.orientation)
    }

    pub fn engine_projection(&self, cs: CoordinateSystem) -> Mat4 {
        cs.convert_projection(self.projection)
    }

    pub fn to_composition_view(&self) -> CompositionLayerProjectionView {
        CompositionLayerProjectionView {
            pose: self.pose,
            fov: self.fov,
            sub_image: self.sub_image,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    fn unit_fov() -> Fovf {
        Fovf::new(-1.0, 1.0, 1.0, -1.0)
    }

    #[test]
    fn test_finite_projection_reference_values() {
        let m = projection_from_fov(&unit_fov(), 0.1, 100.0, ClipSpace::OpenGl).to_cols_array();
        let focal = 2.0 / (2.0 * 1.0_f32.tan());

        assert_relative_eq!(m[0], focal, epsilon = 1e-6);
        assert_relative_eq!(m[0], 0.642_093, epsilon = 1e-5);
        assert_relative_eq!(m[5], focal, epsilon = 1e-6);
        assert_relative_eq!(m[8], 0.0, epsilon = 1e-6);
        assert_relative_eq!(m[9], 0.0, epsilon = 1e-6);
        assert_relative_eq!(m[10], -100.1 / 99.9, epsilon = 1e-6);
        assert_relative_eq!(m[11], -1.0);
        assert_relative_eq!(m[14], -(100.0 * 0.2) / 99.9, epsilon = 1e-6);
        assert_relative_eq!(m[15], 0.0);
        for i in [1, 2, 3, 4, 6, 7, 12, 13] {
            assert_eq!(m[i], 0.0, "element {}", i);
        }
    }

    #[test]
    fn test_infinite_projection_reference_values() {
        for far in [0.1, 0.0, -5.0] {
            let m = projection_from_fov(&unit_fov(), 0.1, far, ClipSpace::OpenGl).to_cols_array();
            assert_relative_eq!(m[0], 0.642_093, epsilon = 1e-5);
            assert_relative_eq!(m[10], -1.0);
            assert_relative_eq!(m[11], -1.0);
            assert_relative_eq!(m[14], -0.2, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_near_plane_maps_to_clip_edge() {
        let p = projection_from_fov(&unit_fov(), 0.1, 100.0, ClipSpace::OpenGl);
        let near = p * Vec4::new(0.0, 0.0, -0.1, 1.0);
        let far = p * Vec4::new(0.0, 0.0, -100.0, 1.0);
        assert_relative_eq!(near.z / near.w, -1.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-4);

        let p = projection_from_fov(&unit_fov(), 0.1, 100.0, ClipSpace::Vulkan);
        let near = p * Vec4::new(0.0, 0.0, -0.1, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_asymmetric_fov_offsets_center() {
        let fov = Fovf::new(-0.9, 0.7, 0.8, -0.6);
        let m = projection_from_fov(&fov, 0.05, 50.0, ClipSpace::OpenGl).to_cols_array();
        let (l, r, u, d) = (0.9_f32.tan(), 0.7_f32.tan(), 0.8_f32.tan(), 0.6_f32.tan());
        assert_relative_eq!(m[0], 2.0 / (r + l), epsilon = 1e-6);
        assert_relative_eq!(m[8], (r - l) / (r + l), epsilon = 1e-6);
        assert_relative_eq!(m[5], 2.0 / (u + d), epsilon = 1e-6);
        assert_relative_eq!(m[9], (u - d) / (u + d), epsilon = 1e-6);

        let vk = projection_from_fov(&fov, 0.05, 50.0, ClipSpace::Vulkan).to_cols_array();
        assert_relative_eq!(vk[5], -m[5], epsilon = 1e-6);
    }

    #[test]
    fn test_position_conversion() {
        let cs = CoordinateSystem::ZUpRightHanded;
        // Runtime up (+Y) becomes engine up (+Z), runtime forward (-Z) becomes +Y
        assert_eq!(cs.convert_position(Vec3::Y), Vec3::Z);
        assert_eq!(cs.convert_position(-Vec3::Z), Vec3::Y);
        assert_eq!(cs.convert_position(Vec3::X), Vec3::X);
        let p = Vec3::new(0.3, 1.6, -2.0);
        assert_eq!(cs.basis_from_runtime() * p, cs.convert_position(p));
        assert_eq!(CoordinateSystem::YUpRightHanded.convert_position(p), p);
    }

    #[test]
    fn test_orientation_conversion_matches_basis_change() {
        let cs = CoordinateSystem::ZUpRightHanded;
        let basis = cs.basis_from_runtime();
        assert_relative_eq!(basis.determinant(), 1.0);

        let rotations = [
            Quat::from_rotation_y(0.7),
            Quat::from_rotation_x(-0.4),
            Quat::from_axis_angle(Vec3::new(1.0, 2.0, -0.5).normalize(), 1.3),
        ];
        let v = Vec3::new(0.2, -0.5, 0.9);
        for q in rotations {
            let converted = cs.convert_orientation(q);
            let expected = cs.convert_position(q * v);
            let actual = converted * cs.convert_position(v);
            assert_relative_eq!(actual.x, expected.x, epsilon = 1e-5);
            assert_relative_eq!(actual.y, expected.y, epsilon = 1e-5);
            assert_relative_eq!(actual.z, expected.z, epsilon = 1e-5);

            let by_matrix = Quat::from_mat3(&(basis * Mat3::from_quat(q) * basis.transpose()));
            assert!(by_matrix.dot(converted).abs() > 1.0 - 1e-5);
        }
    }

    #[test]
    fn test_engine_projection_composes_basis() {
        let cs = CoordinateSystem::ZUpRightHanded;
        let mut view = ProjectionView::new(0);
        view.update(Posef::IDENTITY, unit_fov(), SwapchainHandle::null(), 64, 32);
        let p = view.update_projection(0.1, 100.0, ClipSpace::OpenGl);

        // A point one metre ahead in engine axes lands where the runtime's -Z point does
        let engine_point = Vec4::new(0.0, 1.0, 0.0, 1.0);
        let runtime_point = Vec4::new(0.0, 0.0, -1.0, 1.0);
        let a = view.engine_projection(cs) * engine_point;
        let b = p * runtime_point;
        assert_relative_eq!(a.z, b.z, epsilon = 1e-6);
        assert_relative_eq!(a.w, b.w, epsilon = 1e-6);

        assert_eq!(view.sub_image().image_rect, Rect2Di::full(64, 32));
        assert_eq!(view.to_composition_view().sub_image.image_rect.extent.width, 64);
    }
}
