use std::{collections::HashMap, sync::Arc};

use gltf::animation::util::ReadOutputs;
use three_d::{Mat4, Quat, SquareMatrix, Vec2, Vec3};

use super::{
    fetch_texture, parent_dir, resolve, texture::decode_texture, AssetSource, LoadError, LoadedModel, ProtoNode,
    ProtoSkin,
};
use crate::{
    animation::{Channel, ChannelValues, Clip, Interpolation},
    graph::{MaterialData, MeshData, NodeTransform, SkinWeights, TextureImage},
    log, log_error,
};


type Textures = HashMap<usize, Option<Arc<TextureImage>>>;


/// Loads a glTF 2.0 file (JSON or binary) with its external buffers and
/// base color textures
pub async fn load_gltf<S: AssetSource>(source: &S, path: &str) -> Result<LoadedModel, LoadError> {
    let gltf_error = |message: String| LoadError::Gltf { path: path.to_string(), message };

    let bytes = source.fetch(path).await?;
    let gltf::Gltf { document, blob } = gltf::Gltf::from_slice(&bytes).map_err(|e| gltf_error(e.to_string()))?;
    let base = parent_dir(path);

    let mut buffers: Vec<Vec<u8>> = Vec::new();
    for buffer in document.buffers() {
        let missing = || LoadError::MissingBuffer { path: path.to_string(), index: buffer.index() };
        let data = match buffer.source() {
            gltf::buffer::Source::Bin => blob.clone().ok_or_else(|| missing())?,
            gltf::buffer::Source::Uri(uri) if uri.starts_with("data:") => {
                return Err(LoadError::UnsupportedUri { path: path.to_string(), uri: uri.chars().take(32).collect() });
            }
            gltf::buffer::Source::Uri(uri) => source.fetch(&resolve(base, uri)).await?,
        };
        if data.len() < buffer.length() {
            return Err(missing());
        }
        buffers.push(data);
    }

    let textures = load_textures(source, path, &document, &buffers).await;

    let mut meshes: Vec<Vec<Arc<MeshData>>> = Vec::new();
    for mesh in document.meshes() {
        let mut primitives = Vec::new();
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                log!("load_gltf(): skipping non-triangle primitive in mesh {}", mesh.index());
                continue;
            }
            let data = read_primitive(&primitive, &buffers, &textures).map_err(|message| LoadError::MalformedGeometry {
                path: path.to_string(),
                message: format!("mesh {} primitive {}: {}", mesh.index(), primitive.index(), message),
            })?;
            primitives.push(Arc::new(data));
        }
        meshes.push(primitives);
    }

    let mut nodes: Vec<ProtoNode> = document
        .nodes()
        .map(|node| {
            let (t, r, s) = node.transform().decomposed();
            ProtoNode {
                name: node.name().unwrap_or_default().to_string(),
                transform: NodeTransform {
                    translation: Vec3::from(t),
                    rotation: Quat::new(r[3], r[0], r[1], r[2]),
                    scale: Vec3::from(s),
                },
                children: node.children().map(|c| c.index()).collect(),
                mesh: None,
                skin: node.skin().map(|s| s.index()),
            }
        })
        .collect();

    // a single primitive sits on its node, several become child nodes
    for node in document.nodes() {
        let Some(mesh) = node.mesh() else { continue };
        let Some(primitives) = meshes.get(mesh.index()) else { continue };
        let i = node.index();
        if let [single] = primitives.as_slice() {
            nodes[i].mesh = Some(single.clone());
            continue;
        }
        for (k, primitive) in primitives.iter().enumerate() {
            let child = ProtoNode {
                name: format!("{}_{}", nodes[i].name, k),
                mesh: Some(primitive.clone()),
                skin: nodes[i].skin,
                ..Default::default()
            };
            let id = nodes.len();
            nodes.push(child);
            nodes[i].children.push(id);
        }
    }

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| gltf_error("no scene".to_string()))?;
    let roots = scene.nodes().map(|n| n.index()).collect();

    let skins = document
        .skins()
        .map(|skin| {
            let joints: Vec<usize> = skin.joints().map(|j| j.index()).collect();
            let reader = skin.reader(|b| buffers.get(b.index()).map(|d| d.as_slice()));
            let inverse_bind = match reader.read_inverse_bind_matrices() {
                Some(matrices) => matrices.map(Mat4::from).collect(),
                None => vec![Mat4::identity(); joints.len()],
            };
            ProtoSkin { joints, inverse_bind }
        })
        .collect();

    let clips = document
        .animations()
        .map(|animation| Clip::new(animation.name().unwrap_or_default(), read_channels(&animation, &buffers)))
        .collect();

    Ok(LoadedModel { name: path.to_string(), nodes, roots, skins, clips: Arc::new(clips) })
}


/// Base color images, keyed by glTF image index. Failures map to None.
async fn load_textures<S: AssetSource>(
    source: &S,
    path: &str,
    document: &gltf::Document,
    buffers: &[Vec<u8>],
) -> Textures {
    let base = parent_dir(path);
    let mut textures = Textures::new();
    for material in document.materials() {
        let Some(info) = material.pbr_metallic_roughness().base_color_texture() else { continue };
        let image = info.texture().source();
        if textures.contains_key(&image.index()) {
            continue;
        }
        let loaded = match image.source() {
            gltf::image::Source::View { view, .. } => {
                let range = view.offset()..view.offset() + view.length();
                match buffers.get(view.buffer().index()).and_then(|b| b.get(range)) {
                    Some(bytes) => match decode_texture(bytes, path) {
                        Ok(texture) => Some(Arc::new(texture)),
                        Err(e) => {
                            log_error!("load_gltf(): ERROR: {}", e);
                            None
                        }
                    },
                    None => {
                        log_error!("load_gltf(): ERROR: image {} points outside its buffer", image.index());
                        None
                    }
                }
            }
            gltf::image::Source::Uri { uri, .. } => fetch_texture(source, &resolve(base, uri)).await,
        };
        textures.insert(image.index(), loaded);
    }
    textures
}


fn read_primitive(primitive: &gltf::Primitive, buffers: &[Vec<u8>], textures: &Textures) -> Result<MeshData, String> {
    let reader = primitive.reader(|b| buffers.get(b.index()).map(|d| d.as_slice()));
    let positions: Vec<Vec3> = reader.read_positions().ok_or("no positions")?.map(Vec3::from).collect();
    let normals = reader.read_normals().map(|n| n.map(Vec3::from).collect());
    let uvs = reader.read_tex_coords(0).map(|t| t.into_f32().map(Vec2::from).collect());
    let indices = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None => (0..positions.len() as u32).collect(),
    };

    let mut data = MeshData::new(positions, normals, uvs, indices, read_material(&primitive.material(), textures))
        .ok_or("no positions")?;
    if let (Some(joints), Some(weights)) = (reader.read_joints(0), reader.read_weights(0)) {
        data.skin_weights = Some(SkinWeights {
            joints: joints.into_u16().collect(),
            weights: weights.into_f32().collect(),
        });
    }
    data.validate()?;
    Ok(data)
}


fn read_material(material: &gltf::Material, textures: &Textures) -> MaterialData {
    let pbr = material.pbr_metallic_roughness();
    let albedo_texture = pbr
        .base_color_texture()
        .and_then(|info| textures.get(&info.texture().source().index()).cloned().flatten());
    MaterialData {
        name: material.name().unwrap_or("default").to_string(),
        albedo: pbr.base_color_factor(),
        albedo_texture,
        metallic: pbr.metallic_factor(),
        roughness: pbr.roughness_factor(),
        double_sided: material.double_sided(),
    }
}


fn read_channels(animation: &gltf::Animation, buffers: &[Vec<u8>]) -> Vec<Channel> {
    let mut channels = Vec::new();
    for channel in animation.channels() {
        let reader = channel.reader(|b| buffers.get(b.index()).map(|d| d.as_slice()));
        let Some(times) = reader.read_inputs() else { continue };
        let times: Vec<f32> = times.collect();

        // cubic spline keys are stored as (in-tangent, value, out-tangent);
        // only the values are kept and interpolated linearly
        let (interpolation, stride) = match channel.sampler().interpolation() {
            gltf::animation::Interpolation::Linear => (Interpolation::Linear, 1),
            gltf::animation::Interpolation::Step => (Interpolation::Step, 1),
            gltf::animation::Interpolation::CubicSpline => (Interpolation::Linear, 3),
        };
        let values = match reader.read_outputs() {
            Some(ReadOutputs::Translations(v)) => ChannelValues::Translations(keys(v.map(Vec3::from), stride)),
            Some(ReadOutputs::Rotations(v)) => {
                ChannelValues::Rotations(keys(v.into_f32().map(|q| Quat::new(q[3], q[0], q[1], q[2])), stride))
            }
            Some(ReadOutputs::Scales(v)) => ChannelValues::Scales(keys(v.map(Vec3::from), stride)),
            _ => continue,
        };
        if times.is_empty() || values.len() != times.len() {
            log!("load_gltf(): skipping channel with {} keys and {} values", times.len(), values.len());
            continue;
        }
        channels.push(Channel {
            target: channel.target().node().index(),
            times,
            values,
            interpolation,
        });
    }
    channels
}

fn keys<T>(values: impl Iterator<Item = T>, stride: usize) -> Vec<T> {
    if stride == 1 {
        values.collect()
    } else {
        values.skip(1).step_by(stride).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemorySource;
    use crate::utils::are_floats_equal;

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// One triangle on node "body" plus a translation clip moving it along +X
    fn triangle_gltf(extra_index: Option<u16>) -> (String, Vec<u8>) {
        let mut bin = f32_bytes(&[-0.5, -0.5, 0.0, 0.5, -0.5, 0.0, 0.0, 0.5, 0.0]);
        bin.extend(f32_bytes(&[0.0, 1.0]));
        bin.extend(f32_bytes(&[0.0, 0.0, 0.0, 2.0, 0.0, 0.0]));
        let (indices_view, indices_accessor, indices_ref) = match extra_index {
            Some(i) => {
                bin.extend([0u16, 1, i].iter().flat_map(|v| v.to_le_bytes()));
                bin.extend([0u8, 0]);
                (
                    r#",{"buffer":0,"byteOffset":68,"byteLength":6}"#,
                    r#",{"bufferView":3,"componentType":5123,"count":3,"type":"SCALAR"}"#,
                    r#","indices":3"#,
                )
            }
            None => ("", "", ""),
        };
        let json = format!(
            r#"{{
                "asset": {{"version": "2.0"}},
                "scene": 0,
                "scenes": [{{"nodes": [0]}}],
                "nodes": [{{"name": "body", "mesh": 0, "translation": [0, 1, 0]}}],
                "meshes": [{{"primitives": [{{"attributes": {{"POSITION": 0}}{indices_ref}}}]}}],
                "buffers": [{{"uri": "tri%20data.bin", "byteLength": {len}}}],
                "bufferViews": [
                    {{"buffer": 0, "byteOffset": 0, "byteLength": 36}},
                    {{"buffer": 0, "byteOffset": 36, "byteLength": 8}},
                    {{"buffer": 0, "byteOffset": 44, "byteLength": 24}}{indices_view}
                ],
                "accessors": [
                    {{"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [-0.5, -0.5, 0], "max": [0.5, 0.5, 0]}},
                    {{"bufferView": 1, "componentType": 5126, "count": 2, "type": "SCALAR", "min": [0], "max": [1]}},
                    {{"bufferView": 2, "componentType": 5126, "count": 2, "type": "VEC3"}}{indices_accessor}
                ],
                "animations": [{{
                    "name": "wave",
                    "channels": [{{"sampler": 0, "target": {{"node": 0, "path": "translation"}}}}],
                    "samplers": [{{"input": 1, "output": 2, "interpolation": "LINEAR"}}]
                }}]
            }}"#,
            len = bin.len(),
        );
        (json, bin)
    }

    #[test]
    fn loads_mesh_nodes_and_clips() {
        let (json, bin) = triangle_gltf(None);
        let source = MemorySource::default()
            .with("models/tri/scene.gltf", json)
            .with("models/tri/tri data.bin", bin);
        let model = pollster::block_on(load_gltf(&source, "models/tri/scene.gltf")).unwrap();

        assert_eq!(model.roots, vec![0]);
        assert_eq!(model.nodes[0].name, "body");
        assert!(are_floats_equal(model.nodes[0].transform.translation.y, 1.0, 1e-6));
        let mesh = model.nodes[0].mesh.as_ref().unwrap();
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert!(!mesh.material.double_sided);

        assert_eq!(model.clips.len(), 1);
        let clip = &model.clips[0];
        assert_eq!(clip.name, "wave");
        assert!(are_floats_equal(clip.duration, 1.0, 1e-6));
        assert_eq!(clip.channels[0].target, 0);
    }

    #[test]
    fn out_of_range_index_rejects_the_model() {
        let (json, bin) = triangle_gltf(Some(5));
        let source = MemorySource::default()
            .with("scene.gltf", json)
            .with("tri data.bin", bin);
        let err = pollster::block_on(load_gltf(&source, "scene.gltf")).unwrap_err();
        assert!(matches!(err, LoadError::MalformedGeometry { .. }), "{:?}", err);
    }

    #[test]
    fn missing_buffer_fails_the_load() {
        let (json, _) = triangle_gltf(None);
        let source = MemorySource::default().with("scene.gltf", json);
        let err = pollster::block_on(load_gltf(&source, "scene.gltf")).unwrap_err();
        assert!(matches!(err, LoadError::Fetch { ref path, .. } if path == "tri data.bin"), "{:?}", err);
    }

    #[test]
    fn garbage_is_a_gltf_error() {
        let source = MemorySource::default().with("scene.gltf", b"{ not gltf".to_vec());
        let err = pollster::block_on(load_gltf(&source, "scene.gltf")).unwrap_err();
        assert!(matches!(err, LoadError::Gltf { .. }));
    }
}
