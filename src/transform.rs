//! Matrices for the tumbling model, the flat-screen camera and the per-eye cameras.
//!
//! Everything here uses the OpenGL clip convention (right handed, y up, z in [-1, 1]).
//! The Vulkan backend premultiplies [`vulkan_clip`] when it uploads.
use nalgebra::{
    Isometry3, Matrix4, Point3, Quaternion, Translation3, UnitQuaternion, Vector3,
};
use std::f64::consts::TAU;

/// Where the model sits relative to the viewer
pub const MODEL_OFFSET: [f32; 3] = [0.0, 0.0, -0.5];
/// Uniform scale applied to the model
pub const MODEL_SCALE: f32 = 0.01;
/// Radians per millisecond about the vertical axis
pub const YAW_RATE: f64 = 0.001;
/// Radians per millisecond about the horizontal axis
pub const PITCH_RATE: f64 = 0.0013;

/// Vertical field of view of the flat-screen camera
pub const FLAT_FOV_Y: f32 = std::f32::consts::FRAC_PI_2;
pub const NEAR: f32 = 0.01;
pub const FAR: f32 = 100.0;

/// Converts OpenGL clip space to Vulkan clip space: flips y, and remaps z to [0, 1].
#[rustfmt::skip]
pub fn vulkan_clip() -> Matrix4<f32> {
    Matrix4::new(
        1.0,  0.0, 0.0, 0.0,
        0.0, -1.0, 0.0, 0.0,
        0.0,  0.0, 0.5, 0.5,
        0.0,  0.0, 0.0, 1.0,
    )
}

/// Reduce `timestamp * rate` into [0, 2π) before narrowing, so late frames keep their precision
fn angle(timestamp_ms: f64, rate: f64) -> f32 {
    (timestamp_ms * rate).rem_euclid(TAU) as f32
}

/// The model's transform at `timestamp_ms`: translate, yaw, pitch, then scale down.
pub fn model_transform(timestamp_ms: f64) -> Matrix4<f32> {
    let [x, y, z] = MODEL_OFFSET;
    let translation = Matrix4::new_translation(&Vector3::new(x, y, z));
    let yaw = Matrix4::from_axis_angle(&Vector3::y_axis(), angle(timestamp_ms, YAW_RATE));
    let pitch = Matrix4::from_axis_angle(&Vector3::x_axis(), angle(timestamp_ms, PITCH_RATE));
    translation * yaw * pitch * Matrix4::new_scaling(MODEL_SCALE)
}

/// Eye at the origin, looking down -z with +y up
pub fn flat_view() -> Matrix4<f32> {
    Matrix4::look_at_rh(
        &Point3::origin(),
        &Point3::new(0.0, 0.0, -1.0),
        &Vector3::y(),
    )
}

/// Perspective projection for a surface of `width` x `height` pixels
pub fn flat_projection(width: u32, height: u32) -> Matrix4<f32> {
    let aspect = width as f32 / height.max(1) as f32;
    Matrix4::new_perspective(aspect, FLAT_FOV_Y, NEAR, FAR)
}

/// View matrix for an eye: the inverse of the eye's rigid transform.
/// `orientation` is `[x, y, z, w]` and is normalized here.
pub fn view_from_pose(orientation: [f32; 4], position: [f32; 3]) -> Matrix4<f32> {
    let [qx, qy, qz, qw] = orientation;
    let rotation = UnitQuaternion::new_normalize(Quaternion::new(qw, qx, qy, qz));
    let [px, py, pz] = position;
    let eye = Isometry3::from_parts(Translation3::new(px, py, pz), rotation);
    eye.inverse().to_homogeneous()
}

/// Asymmetric frustum from OpenXR field-of-view angles (radians, left/down negative)
pub fn projection_from_fov(
    angle_left: f32,
    angle_right: f32,
    angle_up: f32,
    angle_down: f32,
    near: f32,
    far: f32,
) -> Matrix4<f32> {
    let tan_left = angle_left.tan();
    let tan_right = angle_right.tan();

    let tan_up = angle_up.tan();
    let tan_down = angle_down.tan();

    let tan_width = tan_right - tan_left;
    let tan_height = tan_up - tan_down;

    let a11 = 2.0 / tan_width;
    let a22 = 2.0 / tan_height;

    let a13 = (tan_right + tan_left) / tan_width;
    let a23 = (tan_up + tan_down) / tan_height;
    let a33 = -(far + near) / (far - near);

    let a34 = -(2.0 * far * near) / (far - near);
    Matrix4::new(
        a11, 0.0, a13, 0.0, //
        0.0, a22, a23, 0.0, //
        0.0, 0.0, a33, a34, //
        0.0, 0.0, -1.0, 0.0, //
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector4;

    fn close(a: &Matrix4<f32>, b: &Matrix4<f32>) -> bool {
        (a - b).abs().max() < 1e-5
    }

    #[test]
    fn model_at_zero_is_translate_and_scale() {
        let expected = Matrix4::new_translation(&Vector3::new(0.0, 0.0, -0.5))
            * Matrix4::new_scaling(0.01);
        assert!(close(&model_transform(0.0), &expected));
    }

    #[test]
    fn model_translation_and_scale_ignore_time() {
        for &t in &[0.0, 16.6, 1234.5, 987_654.0] {
            let model = model_transform(t);
            // Translation column
            assert!((model[(0, 3)] - 0.0).abs() < 1e-6);
            assert!((model[(1, 3)] - 0.0).abs() < 1e-6);
            assert!((model[(2, 3)] + 0.5).abs() < 1e-6);
            // Each basis vector keeps the uniform scale
            for col in 0..3 {
                let len = Vector3::new(model[(0, col)], model[(1, col)], model[(2, col)]).norm();
                assert!((len - MODEL_SCALE).abs() < 1e-6, "column {} scaled by {}", col, len);
            }
        }
    }

    #[test]
    fn model_rotation_angles_follow_time() {
        let t = 500.0;
        let yaw = (t * YAW_RATE) as f32;
        let pitch = (t * PITCH_RATE) as f32;
        let expected = Matrix4::new_translation(&Vector3::new(0.0, 0.0, -0.5))
            * Matrix4::from_axis_angle(&Vector3::y_axis(), yaw)
            * Matrix4::from_axis_angle(&Vector3::x_axis(), pitch)
            * Matrix4::new_scaling(0.01);
        assert!(close(&model_transform(t), &expected));
        assert!((YAW_RATE - PITCH_RATE).abs() > 0.0);
    }

    #[test]
    fn flat_view_is_identity() {
        assert!(close(&flat_view(), &Matrix4::identity()));
    }

    #[test]
    fn flat_projection_uses_aspect() {
        let proj = flat_projection(300, 150);
        // With a 90 degree fov, the y focal length is 1 and x is 1 / aspect
        assert!((proj[(1, 1)] - 1.0).abs() < 1e-5);
        assert!((proj[(0, 0)] - 0.5).abs() < 1e-5);
        let wide = flat_projection(1600, 400);
        assert!((wide[(0, 0)] - 0.25).abs() < 1e-5);
    }

    #[test]
    fn pose_view_inverts_rigid_transform() {
        let rotation = UnitQuaternion::from_euler_angles(0.1, 0.7, -0.3);
        let q = rotation.quaternion();
        let position = [0.03, 1.6, -0.2];
        let view = view_from_pose([q.i, q.j, q.k, q.w], position);

        let rigid = Matrix4::new_translation(&Vector3::new(0.03, 1.6, -0.2))
            * rotation.to_homogeneous();
        let expected = rigid.try_inverse().unwrap();
        assert!(close(&view, &expected));
    }

    #[test]
    fn symmetric_fov_matches_perspective() {
        let half = std::f32::consts::FRAC_PI_4;
        let fov = projection_from_fov(-half, half, half, -half, NEAR, FAR);
        let perspective = Matrix4::new_perspective(1.0, 2.0 * half, NEAR, FAR);
        assert!(close(&fov, &perspective));
    }

    #[test]
    fn vulkan_clip_remaps_depth() {
        let near = vulkan_clip() * Vector4::new(0.0, 1.0, -1.0, 1.0);
        assert!((near.z - 0.0).abs() < 1e-6);
        assert!((near.y + 1.0).abs() < 1e-6);
        let far = vulkan_clip() * Vector4::new(0.0, 0.0, 1.0, 1.0);
        assert!((far.z - 1.0).abs() < 1e-6);
    }
}
