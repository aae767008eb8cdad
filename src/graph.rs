use std::sync::Arc;

use three_d::{vec3, InnerSpace, Mat4, Quat, SquareMatrix, Vec2, Vec3, Vec4, Zero};


/// Index of a node inside a [SceneGraph]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);


/// Local translation/rotation/scale of a node
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeTransform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}
impl Default for NodeTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::zero(),
            rotation: Quat::new(1.0, 0.0, 0.0, 0.0),
            scale: vec3(1.0, 1.0, 1.0),
        }
    }
}
impl NodeTransform {
    /// T * R * S
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_translation(self.translation)
            * Mat4::from(self.rotation)
            * Mat4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }
}


/// Rotation of `angle` radians about +X
pub fn rotation_x(angle: f32) -> Quat {
    let (s, c) = (0.5 * angle).sin_cos();
    Quat::new(c, s, 0.0, 0.0)
}

/// Rotation of `angle` radians about +Y
pub fn rotation_y(angle: f32) -> Quat {
    let (s, c) = (0.5 * angle).sin_cos();
    Quat::new(c, 0.0, s, 0.0)
}


/// Decoded RGBA8 image
#[derive(Clone, Debug, PartialEq)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<[u8; 4]>,
}


#[derive(Clone, Debug)]
pub struct MaterialData {
    pub name: String,
    /// linear RGBA
    pub albedo: [f32; 4],
    pub albedo_texture: Option<Arc<TextureImage>>,
    pub metallic: f32,
    pub roughness: f32,
    pub double_sided: bool,
}
impl Default for MaterialData {
    fn default() -> Self {
        Self {
            name: String::from("default"),
            albedo: [1.0, 1.0, 1.0, 1.0],
            albedo_texture: None,
            metallic: 0.0,
            roughness: 1.0,
            double_sided: false,
        }
    }
}


/// Per-vertex joint indices and weights of a skinned mesh
#[derive(Clone, Debug)]
pub struct SkinWeights {
    pub joints: Vec<[u16; 4]>,
    pub weights: Vec<[f32; 4]>,
}


/// Axis-aligned bounding box
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}
impl Aabb {
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        let mut aabb = Aabb { min: first, max: first };
        for p in iter {
            aabb.min = vec3(aabb.min.x.min(p.x), aabb.min.y.min(p.y), aabb.min.z.min(p.z));
            aabb.max = vec3(aabb.max.x.max(p.x), aabb.max.y.max(p.y), aabb.max.z.max(p.z));
        }
        Some(aabb)
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            vec3(a.x, a.y, a.z), vec3(b.x, a.y, a.z), vec3(a.x, b.y, a.z), vec3(b.x, b.y, a.z),
            vec3(a.x, a.y, b.z), vec3(b.x, a.y, b.z), vec3(a.x, b.y, b.z), vec3(b.x, b.y, b.z),
        ]
    }

    /// Bounds of this box after an affine transformation
    pub fn transformed(&self, m: &Mat4) -> Self {
        let corners = self.corners().map(|c| (*m * c.extend(1.0)).truncate());
        // corners is never empty
        Aabb::from_points(corners.iter()).unwrap_or(*self)
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x
            && self.min.y <= other.max.y && self.max.y >= other.min.y
            && self.min.z <= other.max.z && self.max.z >= other.min.z
    }
}


/// CPU-side triangle mesh with its material
#[derive(Clone, Debug)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub normals: Option<Vec<Vec3>>,
    pub uvs: Option<Vec<Vec2>>,
    /// triangle list
    pub indices: Vec<u32>,
    pub skin_weights: Option<SkinWeights>,
    pub material: MaterialData,
    pub aabb: Aabb,
}
impl MeshData {
    /// Returns None if there are no positions
    pub fn new(
        positions: Vec<Vec3>,
        normals: Option<Vec<Vec3>>,
        uvs: Option<Vec<Vec2>>,
        indices: Vec<u32>,
        material: MaterialData,
    ) -> Option<Self> {
        let aabb = Aabb::from_points(positions.iter())?;
        Some(Self {
            positions,
            normals,
            uvs,
            indices,
            skin_weights: None,
            material,
            aabb,
        })
    }

    /// Flat disc of the given radius in the XY plane facing +Z
    pub fn disc(radius: f32, segments: u32, material: MaterialData) -> Self {
        let segments = segments.max(3);
        let mut positions = vec![Vec3::zero()];
        let mut uvs = vec![Vec2::new(0.5, 0.5)];
        for i in 0..=segments {
            let angle = i as f32 / segments as f32 * std::f32::consts::TAU;
            let (s, c) = angle.sin_cos();
            positions.push(vec3(radius * c, radius * s, 0.0));
            uvs.push(Vec2::new(0.5 * (c + 1.0), 0.5 * (1.0 - s)));
        }
        let mut indices = Vec::with_capacity(3 * segments as usize);
        for i in 1..=segments {
            indices.extend_from_slice(&[0, i, i + 1]);
        }
        let normals = vec![vec3(0.0, 0.0, 1.0); positions.len()];
        let aabb = Aabb {
            min: vec3(-radius, -radius, 0.0),
            max: vec3(radius, radius, 0.0),
        };
        Self {
            positions,
            normals: Some(normals),
            uvs: Some(uvs),
            indices,
            skin_weights: None,
            material,
            aabb,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Checks the index buffer against the vertex attributes
    pub fn validate(&self) -> Result<(), String> {
        let n = self.positions.len();
        if n == 0 {
            return Err("no positions".to_string());
        }
        if self.indices.len() % 3 != 0 {
            return Err(format!("index count {} is not a multiple of 3", self.indices.len()));
        }
        if let Some(i) = self.indices.iter().find(|&&i| i as usize >= n) {
            return Err(format!("index {} out of range for {} vertices", i, n));
        }
        if self.normals.as_ref().is_some_and(|v| v.len() != n) {
            return Err("normal count does not match position count".to_string());
        }
        if self.uvs.as_ref().is_some_and(|v| v.len() != n) {
            return Err("uv count does not match position count".to_string());
        }
        if let Some(sw) = &self.skin_weights {
            if sw.joints.len() != n || sw.weights.len() != n {
                return Err("skin attribute count does not match position count".to_string());
            }
        }
        Ok(())
    }
}


/// Skin binding of a mesh instance to joint nodes
#[derive(Clone, Debug)]
pub struct Skin {
    pub joints: Vec<NodeId>,
    pub inverse_bind: Vec<Mat4>,
}


/// A mesh attached to a node, with its current skinned pose if any
#[derive(Clone, Debug)]
pub struct MeshInstance {
    pub data: Arc<MeshData>,
    pub skin: Option<Skin>,
    /// World-space positions and normals of the deformed pose
    pub(crate) deformed: Option<(Vec<Vec3>, Option<Vec<Vec3>>)>,
    /// Joint palette `deformed` was computed from
    palette: Vec<Mat4>,
    /// Bumped whenever `deformed` changes
    pub(crate) revision: u64,
}
impl MeshInstance {
    pub fn new(data: Arc<MeshData>) -> Self {
        Self { data, skin: None, deformed: None, palette: Vec::new(), revision: 0 }
    }

    pub fn with_skin(data: Arc<MeshData>, skin: Skin) -> Self {
        Self { data, skin: Some(skin), deformed: None, palette: Vec::new(), revision: 0 }
    }

    pub fn is_skinned(&self) -> bool {
        self.skin.is_some() && self.data.skin_weights.is_some()
    }

    /// Positions to draw and ray test, in the space given by [SceneGraph::mesh_transform]
    pub fn positions(&self) -> &[Vec3] {
        match &self.deformed {
            Some((p, _)) => p,
            None => &self.data.positions,
        }
    }

    pub fn normals(&self) -> Option<&[Vec3]> {
        match &self.deformed {
            Some((_, n)) => n.as_deref(),
            None => self.data.normals.as_deref(),
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}


#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub transform: NodeTransform,
    pub mesh: Option<MeshInstance>,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    world: Mat4,
}
impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: NodeTransform::default(),
            mesh: None,
            cast_shadow: false,
            receive_shadow: false,
            parent: None,
            children: Vec::new(),
            world: Mat4::identity(),
        }
    }

    pub fn with_transform(mut self, transform: NodeTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_mesh(mut self, mesh: MeshInstance) -> Self {
        self.mesh = Some(mesh);
        self
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn world(&self) -> &Mat4 {
        &self.world
    }
}


/// Tree of transform nodes. Nodes are only ever added.
#[derive(Clone, Debug)]
pub struct SceneGraph {
    nodes: Vec<Node>,
}
impl SceneGraph {
    pub fn new() -> Self {
        Self { nodes: vec![Node::new("root")] }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Appends `node` as the last child of `parent`
    pub fn add(&mut self, parent: NodeId, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.parent = Some(parent);
        node.children.clear();
        node.world = self.nodes[parent.0].world * node.transform.matrix();
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// `id` and all of its descendants, parents before children
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.nodes[n.0].children.iter().rev());
        }
        out
    }

    /// All nodes carrying a mesh
    pub fn mesh_nodes(&self) -> impl Iterator<Item = (NodeId, &MeshInstance)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.mesh.as_ref().map(|m| (NodeId(i), m)))
    }

    /// Recomputes world matrices from the root down
    pub fn update_world(&mut self) {
        // children always have a larger index than their parent
        for i in 1..self.nodes.len() {
            let parent_world = match self.nodes[i].parent {
                Some(p) => self.nodes[p.0].world,
                None => Mat4::identity(),
            };
            let local = self.nodes[i].transform.matrix();
            self.nodes[i].world = parent_world * local;
        }
    }

    /// Transform from the positions returned by [MeshInstance::positions] to world space
    pub fn mesh_transform(&self, id: NodeId) -> Mat4 {
        match &self.nodes[id.0].mesh {
            Some(m) if m.deformed.is_some() => Mat4::identity(),
            _ => self.nodes[id.0].world,
        }
    }

    /// World-space bounds of a mesh node in its current pose
    pub fn world_aabb(&self, id: NodeId) -> Option<Aabb> {
        let mesh = self.nodes[id.0].mesh.as_ref()?;
        match &mesh.deformed {
            Some((positions, _)) => Aabb::from_points(positions.iter()),
            None => Some(mesh.data.aabb.transformed(&self.nodes[id.0].world)),
        }
    }

    /// Deforms every skinned mesh into world space from its joints' world matrices.
    /// Meshes whose joints have not moved keep their pose and revision.
    /// Call after [SceneGraph::update_world].
    pub fn update_skins(&mut self) {
        for i in 0..self.nodes.len() {
            let palette = match &self.nodes[i].mesh {
                Some(m) if m.is_skinned() => m.skin.as_ref().map(|s| self.joint_palette(s)),
                _ => None,
            };
            let Some(palette) = palette else { continue };
            if let Some(mesh) = self.nodes[i].mesh.as_mut() {
                if mesh.deformed.is_some() && mesh.palette == palette {
                    continue;
                }
                mesh.deformed = Some(deform(&mesh.data, &palette));
                mesh.palette = palette;
                mesh.revision += 1;
            }
        }
    }

    fn joint_palette(&self, skin: &Skin) -> Vec<Mat4> {
        skin.joints
            .iter()
            .enumerate()
            .map(|(j, node)| {
                let world = self.get(*node).map(|n| n.world).unwrap_or_else(Mat4::identity);
                let ibm = skin.inverse_bind.get(j).copied().unwrap_or_else(Mat4::identity);
                world * ibm
            })
            .collect()
    }
}
impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}


/// Linear blend skinning of positions and normals
pub fn deform(data: &MeshData, palette: &[Mat4]) -> (Vec<Vec3>, Option<Vec<Vec3>>) {
    let Some(sw) = &data.skin_weights else {
        return (data.positions.clone(), data.normals.clone());
    };
    let blend = |v: usize| -> Mat4 {
        let mut m = Mat4::zero();
        let mut total = 0.0;
        for k in 0..4 {
            let w = sw.weights[v][k];
            if w <= 0.0 {
                continue;
            }
            if let Some(joint) = palette.get(sw.joints[v][k] as usize) {
                m = m + *joint * w;
                total += w;
            }
        }
        if total > 0.0 { m * (1.0 / total) } else { Mat4::identity() }
    };

    let mut positions = Vec::with_capacity(data.positions.len());
    let mut normals = data.normals.as_ref().map(|n| Vec::with_capacity(n.len()));
    for (v, p) in data.positions.iter().enumerate() {
        let m = blend(v);
        positions.push((m * p.extend(1.0)).truncate());
        if let (Some(out), Some(src)) = (normals.as_mut(), data.normals.as_ref()) {
            let n: Vec4 = m * src[v].extend(0.0);
            let n = n.truncate();
            out.push(if n.magnitude2() > 0.0 { n.normalize() } else { src[v] });
        }
    }
    (positions, normals)
}
