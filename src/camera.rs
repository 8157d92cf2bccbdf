use bon::bon;
use nalgebra::{Matrix4, Vector2, Vector4};
use thiserror::Error;

use crate::geometry::{EPSILON, FloatType, Ray, ScreenSize, WorldPoint, WorldVector};

pub const VERTICAL_FOV_DEGREES: FloatType = 60.0;

/// Everything the ray generation kernel needs to know about the camera.
/// Immutable for the whole render.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CameraParams {
    pub eye: WorldPoint,
    pub near: FloatType,
    pub far: FloatType,
    pub resolution: ScreenSize,
    pub inv_resolution: Vector2<FloatType>,
    /// Maps normalized device coordinates (x, y in [-1, 1], depth in [0, 1]) to world space
    pub view_proj_inv: Matrix4<FloatType>,
}

#[bon]
impl CameraParams {
    /// Builds the camera matrices.
    ///
    /// A degenerate view (eye == target, or up parallel to the view direction) is not
    /// detected here and leaves NaNs in the matrix; use [`check_view`] to validate inputs first.
    #[builder]
    pub fn new(
        eye: WorldPoint,
        target: WorldPoint,
        #[builder(default = WorldVector::y())] up: WorldVector,
        #[builder(default = 0.1)] near: FloatType,
        #[builder(default = 10000.0)] far: FloatType,
        resolution: ScreenSize,
    ) -> Self {
        let aspect = resolution.x as FloatType / resolution.y as FloatType;
        let projection = perspective_lh(VERTICAL_FOV_DEGREES.to_radians(), aspect, near, far);
        let view = look_at_lh(&eye, &target, &up);

        let view_proj_inv = (projection * view)
            .try_inverse()
            .unwrap_or_else(|| Matrix4::repeat(FloatType::NAN));

        CameraParams {
            eye,
            near,
            far,
            resolution,
            inv_resolution: resolution.cast::<FloatType>().map(|x| 1.0 / x),
            view_proj_inv,
        }
    }
}

impl CameraParams {
    pub fn width(&self) -> u32 {
        self.resolution.x
    }

    pub fn height(&self) -> u32 {
        self.resolution.y
    }

    pub fn pixel_count(&self) -> usize {
        self.resolution.x as usize * self.resolution.y as usize
    }

    pub fn unproject(&self, ndc_x: FloatType, ndc_y: FloatType, depth: FloatType) -> WorldPoint {
        let p = self.view_proj_inv * Vector4::new(ndc_x, ndc_y, depth, 1.0);
        WorldPoint::from(p.xyz() / p.w)
    }

    /// Ray through the pixel (x, y), offset inside the pixel by `jitter` (each in [0, 1)).
    /// Row 0 is the top of the image.
    /// Ray spans from the near plane to the far plane.
    pub fn primary_ray(&self, x: u32, y: u32, jitter: Vector2<FloatType>) -> Ray {
        let ndc_x = 2.0 * (x as FloatType + jitter.x) * self.inv_resolution.x - 1.0;
        let ndc_y = 1.0 - 2.0 * (y as FloatType + jitter.y) * self.inv_resolution.y;

        let near = self.unproject(ndc_x, ndc_y, 0.0);
        let far = self.unproject(ndc_x, ndc_y, 1.0);
        let direction = far - near;

        Ray::new(near, direction).with_range(0.0, direction.norm())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CameraError {
    #[error("Eye and target are the same point")]
    EyeAtTarget,
    #[error("Up vector is parallel to the view direction")]
    UpParallelToView,
    #[error("Invalid depth range: near = {near}, far = {far}")]
    DepthRange { near: FloatType, far: FloatType },
    #[error("Resolution must be non-zero")]
    EmptyResolution,
    #[error("Camera parameters must be finite")]
    NotFinite,
}

/// Checks the inputs that would make [`CameraParams::new`] produce a degenerate matrix.
pub fn check_view(
    eye: &WorldPoint,
    target: &WorldPoint,
    up: &WorldVector,
    near: FloatType,
    far: FloatType,
    resolution: &ScreenSize,
) -> Result<(), CameraError> {
    let finite = eye.iter().chain(target.iter()).chain(up.iter()).all(|x| x.is_finite());
    if !finite || !near.is_finite() || !far.is_finite() {
        return Err(CameraError::NotFinite);
    }
    if resolution.x == 0 || resolution.y == 0 {
        return Err(CameraError::EmptyResolution);
    }
    if !(near > 0.0 && near < far) {
        return Err(CameraError::DepthRange { near, far });
    }

    let forward = target - eye;
    if forward.norm() < EPSILON {
        return Err(CameraError::EyeAtTarget);
    }
    if up.normalize().cross(&forward.normalize()).norm() < EPSILON {
        return Err(CameraError::UpParallelToView);
    }

    Ok(())
}

/// Left handed perspective projection, depth mapped to [0, 1].
fn perspective_lh(
    fov_y: FloatType,
    aspect: FloatType,
    near: FloatType,
    far: FloatType,
) -> Matrix4<FloatType> {
    let half_height = (fov_y / 2.0).tan() * near;
    let half_width = half_height * aspect;
    let (l, r, b, t) = (-half_width, half_width, -half_height, half_height);

    #[rustfmt::skip]
    let m = Matrix4::new(
        2.0 * near / (r - l), 0.0,                  -(r + l) / (r - l), 0.0,
        0.0,                  2.0 * near / (t - b), -(t + b) / (t - b), 0.0,
        0.0,                  0.0,                  far / (far - near), -near * far / (far - near),
        0.0,                  0.0,                  1.0,                0.0,
    );
    m
}

/// Left handed view matrix, camera looks along +Z in view space.
fn look_at_lh(eye: &WorldPoint, target: &WorldPoint, up: &WorldVector) -> Matrix4<FloatType> {
    let z = (target - eye).normalize();
    let x = up.cross(&z).normalize();
    let y = z.cross(&x);
    let eye = eye.coords;

    #[rustfmt::skip]
    let m = Matrix4::new(
        x.x, x.y, x.z, -x.dot(&eye),
        y.x, y.y, y.z, -y.dot(&eye),
        z.x, z.y, z.z, -z.dot(&eye),
        0.0, 0.0, 0.0, 1.0,
    );
    m
}
