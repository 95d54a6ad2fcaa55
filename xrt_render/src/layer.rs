//! Layer accumulation and the off-screen stereo compositor.

use nalgebra::{Matrix4, Vector2};
use xrt_util::pose::Pose;

pub const MAX_LAYERS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerType {
    Quad,
    Cylinder,
    Equirect1,
    Equirect2,
    Cube,
    StereoProjection,
    StereoProjectionWithDepth,
}

impl LayerType {
    pub fn is_stereo_projection(&self) -> bool {
        matches!(self, Self::StereoProjection | Self::StereoProjectionWithDepth)
    }

    /// Quad/cylinder/projection layers transform with `vp_world` (or
    /// `vp_eye` in view space); equirect/cube sample from a world-space
    /// direction and use `vp_inv` instead.
    pub fn uses_inverse_view_projection(&self) -> bool {
        matches!(self, Self::Equirect1 | Self::Equirect2 | Self::Cube)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LayerFlags {
    pub eye_visibility_left: bool,
    pub eye_visibility_right: bool,
    pub unpremultiplied_alpha: bool,
    pub view_space: bool,
    pub flip_y: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SubimageRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub swapchain_array_index: u32,
}

/// One submitted layer. `swapchain_indices` references 1..4 client
/// swapchains by index into the owning compositor's table.
#[derive(Clone)]
pub struct Layer {
    pub layer_type: LayerType,
    pub pose: Pose,
    pub subimages: Vec<SubimageRect>,
    pub flags: LayerFlags,
    pub swapchain_indices: Vec<u32>,
}

/// A frame's accepted layer list.
#[derive(Clone, Default)]
pub struct LayerSlot {
    pub layers: Vec<Layer>,
    pub poses: [Pose; 2],
    pub fovs: [Fov; 2],
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl LayerSlot {
    pub fn push(&mut self, layer: Layer) -> Result<(), LayerSlotFull> {
        if self.layers.len() >= MAX_LAYERS {
            return Err(LayerSlotFull);
        }
        self.layers.push(layer);
        Ok(())
    }

    /// The fast-path decision is purely a function of the layer set: exactly
    /// one layer, stereo-projection (with or without depth).
    pub fn one_projection_fast_path(&self) -> bool {
        self.layers.len() == 1 && self.layers[0].layer_type.is_stereo_projection()
    }
}

#[derive(Debug)]
pub struct LayerSlotFull;

impl std::fmt::Display for LayerSlotFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "layer slot already holds the maximum of {MAX_LAYERS} layers")
    }
}

impl std::error::Error for LayerSlotFull {}

fn perspective_vulkan(fov: Fov, near: f32, far: f32) -> Matrix4<f32> {
    let tan_left = fov.angle_left.tan();
    let tan_right = fov.angle_right.tan();
    let tan_up = fov.angle_up.tan();
    let tan_down = fov.angle_down.tan();

    let tan_width = tan_right - tan_left;
    let tan_height = tan_down - tan_up; // Vulkan Y-down: "down" is positive.

    let mut m = Matrix4::<f32>::zeros();
    m[(0, 0)] = 2.0 / tan_width;
    m[(1, 1)] = 2.0 / tan_height;
    m[(0, 2)] = (tan_right + tan_left) / tan_width;
    m[(1, 2)] = (tan_down + tan_up) / tan_height;
    m[(2, 2)] = far / (near - far);
    m[(2, 3)] = (far * near) / (near - far);
    m[(3, 2)] = -1.0;
    m
}

/// `vp_world`, `vp_eye`, `vp_inv` built with a Vulkan-Y-down projection
/// convention.
pub struct ViewProjection {
    pub vp_world: Matrix4<f32>,
    pub vp_eye: Matrix4<f32>,
    pub vp_inv: Matrix4<f32>,
}

pub fn compute_view_projection(fov: Fov, pose_world: &Pose, pose_eye: &Pose, near: f32, far: f32) -> ViewProjection {
    let projection = perspective_vulkan(fov, near, far);
    let view_world = pose_to_view_matrix(pose_world);
    let view_eye = pose_to_view_matrix(pose_eye);

    let vp_world = projection * view_world;
    let vp_eye = projection * view_eye;
    let vp_inv = (view_world * projection).try_inverse().unwrap_or_else(Matrix4::identity);

    ViewProjection { vp_world, vp_eye, vp_inv }
}

fn pose_to_view_matrix(pose: &Pose) -> Matrix4<f32> {
    let inv = pose.inverse();
    let rotation = inv.orientation.to_rotation_matrix().matrix().cast::<f32>();
    let translation = inv.position.cast::<f32>();
    let mut m = Matrix4::identity();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
    m.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
    m
}

/// `vp_world`/`vp_eye` select between the two framebuffer viewports sized
/// from target extent x HMD view ratio.
pub fn eye_viewport(target_extent: (u32, u32), hmd_view_ratio: Vector2<f32>, eye_index: usize) -> SubimageRect {
    let eye_width = (target_extent.0 as f32 * hmd_view_ratio.x) as u32;
    let x = if eye_index == 0 { 0 } else { eye_width as i32 };
    SubimageRect {
        x,
        y: 0,
        width: eye_width,
        height: target_extent.1,
        swapchain_array_index: eye_index as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection_layer() -> Layer {
        Layer {
            layer_type: LayerType::StereoProjection,
            pose: Pose::identity(),
            subimages: vec![],
            flags: LayerFlags::default(),
            swapchain_indices: vec![0, 1],
        }
    }

    #[test]
    fn single_stereo_projection_layer_takes_fast_path() {
        let mut slot = LayerSlot::default();
        slot.push(projection_layer()).unwrap();
        assert!(slot.one_projection_fast_path());
    }

    #[test]
    fn two_layers_never_take_fast_path() {
        let mut slot = LayerSlot::default();
        slot.push(projection_layer()).unwrap();
        slot.push(Layer {
            layer_type: LayerType::Quad,
            ..projection_layer()
        })
        .unwrap();
        assert!(!slot.one_projection_fast_path());
    }

    #[test]
    fn layer_slot_rejects_the_seventeenth_layer() {
        let mut slot = LayerSlot::default();
        for _ in 0..MAX_LAYERS {
            slot.push(projection_layer()).unwrap();
        }
        assert!(slot.push(projection_layer()).is_err());
    }

    #[test]
    fn equirect_layers_use_inverse_view_projection() {
        assert!(LayerType::Equirect1.uses_inverse_view_projection());
        assert!(!LayerType::Quad.uses_inverse_view_projection());
    }

    #[test]
    fn vp_inv_is_the_inverse_of_view_times_projection_not_transpose() {
        use nalgebra::{UnitQuaternion, Vector3};

        let fov = Fov {
            angle_left: -0.8,
            angle_right: 0.7,
            angle_up: -0.6,
            angle_down: 0.9,
        };
        let pose_world = Pose::new(
            Vector3::new(1.0, 2.0, 3.0),
            UnitQuaternion::from_euler_angles(0.3, 0.6, -0.2),
        );

        let result = compute_view_projection(fov, &pose_world, &pose_world, 0.1, 100.0);

        let view_world = pose_to_view_matrix(&pose_world);
        let projection = perspective_vulkan(fov, 0.1, 100.0);
        let expected_vp_inv = (view_world * projection).try_inverse().unwrap();

        for row in 0..4 {
            for col in 0..4 {
                assert!(
                    (result.vp_inv[(row, col)] - expected_vp_inv[(row, col)]).abs() < 1e-4,
                    "vp_inv[{row},{col}] = {}, expected {}",
                    result.vp_inv[(row, col)],
                    expected_vp_inv[(row, col)]
                );
            }
        }

        // A pose with nonzero translation makes transpose(view_world) differ
        // from view_world itself, so this would fail against the transposed
        // formula.
        let wrong_vp_inv = (view_world.transpose() * projection).try_inverse().unwrap();
        assert!((result.vp_inv - wrong_vp_inv).amax() > 1e-3);
    }
}
