use three_d::{vec3, Camera, InnerSpace, Vec3, Zero};

use crate::config;


const PHI_EPSILON: f32 = 1e-6;


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DragMode { Rotate, Pan }


/// Orbit camera control around a target point with damped motion.
/// Input accumulates into pending deltas; [OrbitControls::update] applies a
/// `damping_factor` share of them each frame and decays the rest.
#[derive(Clone, Debug)]
pub struct OrbitControls {
    pub target: Vec3,
    pub damping_factor: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub rotate_speed: f32,
    pub pan_speed: f32,
    pub zoom_speed: f32,
    /// vertical field of view in radians, used to scale panning
    pub fov_y: f32,
    theta_delta: f32,
    phi_delta: f32,
    scale: f32,
    pan_offset: Vec3,
    drag: Option<(DragMode, f32, f32)>,
}
impl OrbitControls {
    pub fn new(target: Vec3) -> Self {
        Self {
            target,
            damping_factor: config::ORBIT_DAMPING_FACTOR,
            min_distance: config::ORBIT_MIN_DISTANCE,
            max_distance: config::ORBIT_MAX_DISTANCE,
            rotate_speed: 1.0,
            pan_speed: 1.0,
            zoom_speed: 1.0,
            fov_y: config::CAMERA_FOV_DEGREES.to_radians(),
            theta_delta: 0.0,
            phi_delta: 0.0,
            scale: 1.0,
            pan_offset: Vec3::zero(),
            drag: None,
        }
    }

    /// Pending (azimuth, polar) rotation not yet applied
    pub fn pending_rotation(&self) -> (f32, f32) {
        (self.theta_delta, self.phi_delta)
    }

    pub fn rotate_left(&mut self, angle: f32) {
        self.theta_delta -= angle;
    }

    pub fn rotate_up(&mut self, angle: f32) {
        self.phi_delta -= angle;
    }

    /// Scale < 1 moves the camera closer
    pub fn dolly(&mut self, scale: f32) {
        if scale > 0.0 {
            self.scale *= scale;
        }
    }

    /// Pans by a screen-space pixel offset
    pub fn pan(&mut self, dx: f32, dy: f32, camera: &Camera, surface_height: f32) {
        if surface_height <= 0.0 {
            return;
        }
        let offset = *camera.position() - self.target;
        let target_distance = offset.magnitude() * (0.5 * self.fov_y).tan();
        let right = camera.right_direction().normalize();
        let up = right.cross(camera.view_direction()).normalize();
        let left = 2.0 * dx * target_distance / surface_height * self.pan_speed;
        let upward = 2.0 * dy * target_distance / surface_height * self.pan_speed;
        self.pan_offset += -right * left + up * upward;
    }

    pub fn pointer_down(&mut self, mode: DragMode, x: f32, y: f32) {
        self.drag = Some((mode, x, y));
    }

    pub fn pointer_up(&mut self) {
        self.drag = None;
    }

    /// Feeds a pointer position while a drag is active
    pub fn pointer_move(&mut self, x: f32, y: f32, camera: &Camera, surface_height: f32) {
        let Some((mode, last_x, last_y)) = self.drag else { return };
        let (dx, dy) = (x - last_x, y - last_y);
        self.drag = Some((mode, x, y));
        if surface_height <= 0.0 {
            return;
        }
        match mode {
            DragMode::Rotate => {
                let full_turn = std::f32::consts::TAU / surface_height * self.rotate_speed;
                self.rotate_left(full_turn * dx);
                self.rotate_up(full_turn * dy);
            }
            DragMode::Pan => self.pan(dx, dy, camera, surface_height),
        }
    }

    pub fn wheel(&mut self, delta_y: f32) {
        let step = 0.95_f32.powf(self.zoom_speed);
        if delta_y < 0.0 {
            self.dolly(step);
        } else if delta_y > 0.0 {
            self.dolly(1.0 / step);
        }
    }

    /// Applies one damped step to the camera. Returns true if the camera moved.
    pub fn update(&mut self, camera: &mut Camera) -> bool {
        let position = *camera.position();
        let offset = position - self.target;
        let radius = offset.magnitude();

        // spherical coordinates around +Y
        let mut theta = offset.x.atan2(offset.z);
        let mut phi = if radius > 0.0 { (offset.y / radius).clamp(-1.0, 1.0).acos() } else { 0.0 };

        theta += self.theta_delta * self.damping_factor;
        phi += self.phi_delta * self.damping_factor;
        phi = phi.clamp(PHI_EPSILON, std::f32::consts::PI - PHI_EPSILON);

        let radius = (radius * self.scale).clamp(self.min_distance, self.max_distance);
        self.target += self.pan_offset * self.damping_factor;

        let offset = vec3(
            radius * phi.sin() * theta.sin(),
            radius * phi.cos(),
            radius * phi.sin() * theta.cos(),
        );
        let new_position = self.target + offset;
        camera.set_view(new_position, self.target, vec3(0.0, 1.0, 0.0));

        let decay = 1.0 - self.damping_factor;
        self.theta_delta *= decay;
        self.phi_delta *= decay;
        self.pan_offset *= decay;
        self.scale = 1.0;

        (new_position - position).magnitude2() > 1e-8
    }
}
