use three_d::{vec4, Camera, InnerSpace, Mat4, SquareMatrix, Vec2, Vec3};

use crate::graph::{Aabb, NodeId, SceneGraph};


const EPSILON: f32 = 1e-7;


#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// unit length
    pub direction: Vec3,
}
impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction: direction.normalize() }
    }

    /// Ray from the camera through a point given in normalized device coordinates
    pub fn from_camera(camera: &Camera, ndc: Vec2) -> Option<Self> {
        let inverse = (*camera.projection() * *camera.view()).invert()?;
        let far = inverse * vec4(ndc.x, ndc.y, 1.0, 1.0);
        if far.w.abs() < EPSILON {
            return None;
        }
        let far = far.truncate() / far.w;
        let origin = *camera.position();
        let direction = far - origin;
        if direction.magnitude2() < EPSILON {
            return None;
        }
        Some(Ray::new(origin, direction))
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}


/// A hit between a ray and a mesh triangle
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intersection {
    /// distance from the ray origin in world units
    pub distance: f32,
    pub point: Vec3,
    pub node: NodeId,
    pub face_index: usize,
}


/// Möller–Trumbore. Returns the ray parameter of the hit.
/// `direction` need not be normalized; the parameter is relative to it.
pub fn intersect_triangle(
    origin: Vec3,
    direction: Vec3,
    a: Vec3,
    b: Vec3,
    c: Vec3,
    cull_back_faces: bool,
) -> Option<f32> {
    let edge1 = b - a;
    let edge2 = c - a;
    let p = direction.cross(edge2);
    let det = edge1.dot(p);
    if cull_back_faces {
        if det < EPSILON {
            return None;
        }
    } else if det.abs() < EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - a;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(q) * inv_det;
    (t >= 0.0).then_some(t)
}


/// Slab test. Returns the entry parameter, or 0 if the origin is inside.
pub fn intersect_aabb(origin: Vec3, direction: Vec3, aabb: &Aabb) -> Option<f32> {
    let mut t_min = 0.0_f32;
    let mut t_max = f32::INFINITY;
    for axis in 0..3 {
        let (o, d, lo, hi) = (origin[axis], direction[axis], aabb.min[axis], aabb.max[axis]);
        if d.abs() < EPSILON {
            if o < lo || o > hi {
                return None;
            }
            continue;
        }
        let (mut t0, mut t1) = ((lo - o) / d, (hi - o) / d);
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        t_min = t_min.max(t0);
        t_max = t_max.min(t1);
        if t_min > t_max {
            return None;
        }
    }
    Some(t_min)
}


/// Tests the ray against the mesh carried by `id`, if any
pub fn intersect_node(graph: &SceneGraph, id: NodeId, ray: &Ray, out: &mut Vec<Intersection>) {
    let Some(mesh) = graph.node(id).mesh.as_ref() else { return };
    let to_world: Mat4 = graph.mesh_transform(id);
    let Some(to_local) = to_world.invert() else { return };

    // an affine map keeps the ray parameter, so hits found in mesh space
    // are at the same t along the world ray
    let origin = (to_local * ray.origin.extend(1.0)).truncate();
    let direction = (to_local * ray.direction.extend(0.0)).truncate();

    let positions = mesh.positions();
    let bounds = if mesh.deformed.is_some() {
        match Aabb::from_points(positions.iter()) {
            Some(b) => b,
            None => return,
        }
    } else {
        mesh.data.aabb
    };
    if intersect_aabb(origin, direction, &bounds).is_none() {
        return;
    }

    let cull = !mesh.data.material.double_sided;
    for (face_index, tri) in mesh.data.indices.chunks_exact(3).enumerate() {
        let (Some(&a), Some(&b), Some(&c)) = (
            positions.get(tri[0] as usize),
            positions.get(tri[1] as usize),
            positions.get(tri[2] as usize),
        ) else {
            continue;
        };
        if let Some(t) = intersect_triangle(origin, direction, a, b, c, cull) {
            out.push(Intersection { distance: t, point: ray.at(t), node: id, face_index });
        }
    }
}


/// Tests the ray against every mesh in the subtree rooted at `root`,
/// nearest hit first
pub fn intersect_subtree(graph: &SceneGraph, root: NodeId, ray: &Ray) -> Vec<Intersection> {
    let mut hits = Vec::new();
    for id in graph.descendants(root) {
        intersect_node(graph, id, ray, &mut hits);
    }
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    hits
}
