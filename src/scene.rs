use std::f32::consts::FRAC_PI_2;

use three_d::{degrees, vec3, Camera, InnerSpace, Mat4, Vec3, Viewport};

use crate::{
    assets::{srgb_to_linear, LoadedModel},
    config,
    controls::OrbitControls,
    graph::{rotation_x, rotation_y, Aabb, MaterialData, MeshData, MeshInstance, Node, NodeId, NodeTransform, SceneGraph, Skin},
    log,
};


/// Linear RGBA from an sRGB hex triple
pub fn srgb_color(rgb: [u8; 3]) -> [f32; 4] {
    let c = |v: u8| srgb_to_linear(v as f32 / 255.0);
    [c(rgb[0]), c(rgb[1]), c(rgb[2]), 1.0]
}


/// The parts of the scene that exist before any asset has loaded
pub struct SceneSetup {
    pub graph: SceneGraph,
    pub camera: Camera,
    pub controls: OrbitControls,
    pub ground: NodeId,
}
impl SceneSetup {
    pub fn new(viewport: Viewport) -> Self {
        let target = Vec3::from(config::ORBIT_TARGET);
        let camera = Camera::new_perspective(
            viewport,
            Vec3::from(config::CAMERA_POSITION),
            target,
            vec3(0.0, 1.0, 0.0),
            degrees(config::CAMERA_FOV_DEGREES),
            config::CAMERA_NEAR,
            config::CAMERA_FAR,
        );
        let controls = OrbitControls::new(target);

        let mut graph = SceneGraph::new();
        let ground = graph.add(graph.root(), ground_node());
        graph.update_world();

        Self { graph, camera, controls, ground }
    }
}


/// Disc in the XZ plane, facing up
pub fn ground_node() -> Node {
    let material = MaterialData {
        name: String::from("ground"),
        albedo: srgb_color(config::GROUND_COLOR),
        double_sided: true,
        ..Default::default()
    };
    let disc = MeshData::disc(config::GROUND_RADIUS, config::GROUND_SEGMENTS, material);
    let mut node = Node::new("ground")
        .with_mesh(MeshInstance::new(disc.into()))
        .with_transform(NodeTransform {
            translation: vec3(0.0, config::GROUND_HEIGHT, 0.0),
            rotation: rotation_x(-FRAC_PI_2),
            ..Default::default()
        });
    node.receive_shadow = true;
    node
}


/// Scene graph nodes created for a loaded model
#[derive(Clone, Debug)]
pub struct Instance {
    pub root: NodeId,
    /// graph node for each model node, by model node index
    pub nodes: Vec<Option<NodeId>>,
}


/// Adds `model` below `parent` under a new group node named after the model
pub fn instantiate(graph: &mut SceneGraph, parent: NodeId, model: &LoadedModel) -> Instance {
    let root = graph.add(parent, Node::new(model.name.clone()));
    let mut nodes: Vec<Option<NodeId>> = vec![None; model.nodes.len()];

    // parents are always added before their children
    let mut stack: Vec<(usize, NodeId)> = model.roots.iter().rev().map(|&r| (r, root)).collect();
    while let Some((index, parent)) = stack.pop() {
        let Some(proto) = model.nodes.get(index) else { continue };
        if nodes[index].is_some() {
            log!("instantiate(): node {} of {} is reachable twice, keeping the first", index, model.name);
            continue;
        }
        let mut node = Node::new(proto.name.clone()).with_transform(proto.transform);
        if let Some(mesh) = &proto.mesh {
            node = node.with_mesh(MeshInstance::new(mesh.clone()));
        }
        let id = graph.add(parent, node);
        nodes[index] = Some(id);
        stack.extend(proto.children.iter().rev().map(|&c| (c, id)));
    }

    for (index, proto) in model.nodes.iter().enumerate() {
        let (Some(id), Some(skin)) = (nodes[index], proto.skin.and_then(|s| model.skins.get(s))) else { continue };
        let joints: Option<Vec<NodeId>> = skin.joints.iter().map(|&j| nodes.get(j).copied().flatten()).collect();
        let Some(joints) = joints else {
            log!("instantiate(): skin of node {} has joints outside the scene, drawing it unskinned", index);
            continue;
        };
        if let Some(mesh) = graph.node_mut(id).mesh.as_mut() {
            mesh.skin = Some(Skin { joints, inverse_bind: skin.inverse_bind.clone() });
        }
    }

    graph.update_world();
    Instance { root, nodes }
}


/// Places a model root with a fixed offset
pub fn apply_offset(graph: &mut SceneGraph, id: NodeId, position: [f32; 3], angle_y: f32, scale: f32) {
    graph.node_mut(id).transform = NodeTransform {
        translation: Vec3::from(position),
        rotation: rotation_y(angle_y),
        scale: vec3(scale, scale, scale),
    };
}


/// View matrix of the directional light looking from its position at the origin
pub fn light_view() -> Mat4 {
    let eye = Vec3::from(config::DIRECTIONAL_POSITION);
    let f = (-eye).normalize();
    let s = f.cross(vec3(0.0, 1.0, 0.0)).normalize();
    let u = s.cross(f);
    Mat4::new(
        s.x, u.x, -f.x, 0.0,
        s.y, u.y, -f.y, 0.0,
        s.z, u.z, -f.z, 0.0,
        -s.dot(eye), -u.dot(eye), f.dot(eye), 1.0,
    )
}


/// The shadow camera's box in light view space (looking down -Z)
pub fn shadow_bounds() -> Aabb {
    let b = config::SHADOW_BOX;
    Aabb {
        min: vec3(b.left, b.bottom, -b.far),
        max: vec3(b.right, b.top, -b.near),
    }
}


/// Shadow-casting mesh nodes that overlap the shadow box
pub fn shadow_casters(graph: &SceneGraph) -> Vec<NodeId> {
    let view = light_view();
    let bounds = shadow_bounds();
    graph
        .mesh_nodes()
        .filter(|(id, _)| graph.node(*id).cast_shadow)
        .filter(|(id, _)| {
            graph
                .world_aabb(*id)
                .is_some_and(|aabb| aabb.transformed(&view).intersects(&bounds))
        })
        .map(|(id, _)| id)
        .collect()
}


/// Mesh nodes drawn with the shadow map applied
pub fn shadow_receivers(graph: &SceneGraph) -> Vec<NodeId> {
    graph
        .mesh_nodes()
        .filter(|(id, _)| graph.node(*id).receive_shadow)
        .map(|(id, _)| id)
        .collect()
}
