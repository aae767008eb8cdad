use std::sync::Arc;

use three_d::{vec2, vec3};

use super::{fetch_texture, parent_dir, resolve, srgb_to_linear, AssetSource, LoadError, LoadedModel, ProtoNode};
use crate::{
    graph::{MaterialData, MeshData},
    log,
};


/// Loads a Wavefront OBJ with its material library.
/// The MTL is loaded and parsed first; the OBJ is only fetched once its
/// materials are ready, and every face must be valid or the model is rejected.
pub async fn load_obj_with_mtl<S: AssetSource>(
    source: &S,
    name: &str,
    mtl_path: &str,
    obj_path: &str,
) -> Result<LoadedModel, LoadError> {
    let mtl_bytes = source.fetch(mtl_path).await?;
    let (mtl_materials, mtl_names) = tobj::load_mtl_buf(&mut mtl_bytes.as_slice())
        .map_err(|e| LoadError::Mtl { path: mtl_path.to_string(), message: e.to_string() })?;
    let base = parent_dir(mtl_path);
    let mut materials = Vec::with_capacity(mtl_materials.len());
    for material in &mtl_materials {
        materials.push(convert_material(source, base, material).await);
    }

    let obj_bytes = source.fetch(obj_path).await?;
    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };
    let library = mtl_path.rsplit('/').next().unwrap_or(mtl_path);
    let obj_bytes = bind_material_library(&obj_bytes, library);
    let (models, _) = tobj::load_obj_buf(&mut obj_bytes.as_slice(), &options, |_| {
        Ok((mtl_materials.clone(), mtl_names.clone()))
    })
    .map_err(|e| LoadError::Obj { path: obj_path.to_string(), message: e.to_string() })?;

    let malformed = |message: String| LoadError::MalformedGeometry { path: obj_path.to_string(), message };
    if models.is_empty() {
        return Err(malformed("no objects".to_string()));
    }

    let mut nodes = Vec::with_capacity(models.len());
    for model in &models {
        let mesh = &model.mesh;
        let positions = mesh.positions.chunks_exact(3).map(|p| vec3(p[0], p[1], p[2])).collect();
        let normals = (!mesh.normals.is_empty())
            .then(|| mesh.normals.chunks_exact(3).map(|n| vec3(n[0], n[1], n[2])).collect());
        // OBJ texture space starts at the bottom left
        let uvs = (!mesh.texcoords.is_empty())
            .then(|| mesh.texcoords.chunks_exact(2).map(|t| vec2(t[0], 1.0 - t[1])).collect());
        let material = match mesh.material_id.and_then(|id| materials.get(id)) {
            Some(m) => m.clone(),
            None => {
                if mesh.material_id.is_some() {
                    log!("load_obj_with_mtl(): object '{}' uses an unknown material", model.name);
                }
                MaterialData::default()
            }
        };

        let data = MeshData::new(positions, normals, uvs, mesh.indices.clone(), material)
            .ok_or_else(|| malformed(format!("object '{}' has no vertices", model.name)))?;
        data.validate().map_err(|m| malformed(format!("object '{}': {}", model.name, m)))?;

        nodes.push(ProtoNode {
            name: model.name.clone(),
            mesh: Some(Arc::new(data)),
            ..Default::default()
        });
    }

    Ok(LoadedModel {
        name: name.to_string(),
        roots: (0..nodes.len()).collect(),
        nodes,
        skins: Vec::new(),
        clips: Arc::new(Vec::new()),
    })
}


/// Rewrites the OBJ so `usemtl` resolves against exactly one library:
/// every `mtllib` line is dropped and a single one naming `library` leads the file.
fn bind_material_library(obj: &[u8], library: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(obj.len() + library.len() + 8);
    out.extend_from_slice(format!("mtllib {}\n", library).as_bytes());
    for line in obj.split_inclusive(|b| *b == b'\n') {
        let keyword = line.split(|b| b.is_ascii_whitespace()).find(|t| !t.is_empty());
        if keyword != Some(&b"mtllib"[..]) {
            out.extend_from_slice(line);
        }
    }
    out
}


async fn convert_material<S: AssetSource>(source: &S, base: &str, material: &tobj::Material) -> MaterialData {
    let kd = material.diffuse.unwrap_or([1.0; 3]);
    let albedo_texture = match material.diffuse_texture.as_deref().and_then(|t| t.split_whitespace().last()) {
        Some(file) => fetch_texture(source, &resolve(base, file)).await,
        None => None,
    };
    // Phong exponent to an equivalent roughness
    let roughness = material
        .shininess
        .map(|ns| (2.0 / (ns.max(0.0) + 2.0)).sqrt())
        .unwrap_or(1.0)
        .clamp(0.05, 1.0);
    MaterialData {
        name: material.name.clone(),
        albedo: [
            srgb_to_linear(kd[0]),
            srgb_to_linear(kd[1]),
            srgb_to_linear(kd[2]),
            material.dissolve.unwrap_or(1.0),
        ],
        albedo_texture,
        metallic: 0.0,
        roughness,
        double_sided: false,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemorySource;
    use crate::utils::are_floats_equal;

    const MTL: &str = "newmtl red\nKd 1.0 0.5 0.0\nNs 10\n";
    const OBJ: &str = "\
mtllib cooler.mtl
o lid
v 0 0 0
v 1 0 0
v 0 1 0
v 1 1 0
vt 0 0
vt 1 0
vt 0 1
vt 1 1
usemtl red
f 1/1 2/2 4/4 3/3
";

    #[test]
    fn loads_materials_then_geometry() {
        let source = MemorySource::default()
            .with("models/cooler/cooler.mtl", MTL)
            .with("models/cooler/cooler.obj", OBJ);
        let model = pollster::block_on(load_obj_with_mtl(
            &source,
            "cooler",
            "models/cooler/cooler.mtl",
            "models/cooler/cooler.obj",
        ))
        .unwrap();

        assert_eq!(source.requests(), vec!["models/cooler/cooler.mtl", "models/cooler/cooler.obj"]);
        assert_eq!(model.name, "cooler");
        assert_eq!(model.roots, vec![0]);
        let mesh = model.nodes[0].mesh.as_ref().unwrap();
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.material.name, "red");
        assert!(are_floats_equal(mesh.material.albedo[0], 1.0, 1e-6));
        assert!(are_floats_equal(mesh.material.albedo[1], srgb_to_linear(0.5), 1e-6));
        assert!(mesh.material.roughness < 1.0);
        let uvs = mesh.uvs.as_ref().unwrap();
        assert!(uvs.iter().all(|uv| (0.0..=1.0).contains(&uv.y)));
    }

    #[test]
    fn usemtl_without_mtllib_uses_the_preloaded_library() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl red\nf 1 2 3\n";
        let source = MemorySource::default().with("a.mtl", MTL).with("a.obj", obj);
        let model = pollster::block_on(load_obj_with_mtl(&source, "a", "a.mtl", "a.obj")).unwrap();
        let mesh = model.nodes[0].mesh.as_ref().unwrap();
        assert_eq!(mesh.material.name, "red");
        assert!(are_floats_equal(mesh.material.albedo[1], srgb_to_linear(0.5), 1e-6));
    }

    #[test]
    fn repeated_mtllib_lines_keep_material_ids_in_range() {
        let mtl = "newmtl red\nKd 1 0 0\nnewmtl blue\nKd 0 0 1\n";
        let obj = "mtllib other.mtl\nmtllib a.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl blue\nf 1 2 3\n";
        let source = MemorySource::default().with("a.mtl", mtl).with("a.obj", obj);
        let model = pollster::block_on(load_obj_with_mtl(&source, "a", "a.mtl", "a.obj")).unwrap();
        let mesh = model.nodes[0].mesh.as_ref().unwrap();
        assert_eq!(mesh.material.name, "blue");
        assert!(are_floats_equal(mesh.material.albedo[2], 1.0, 1e-6));
        assert_eq!(source.requests(), vec!["a.mtl", "a.obj"]);
    }

    #[test]
    fn material_library_lines_are_replaced() {
        let bound = bind_material_library(b"mtllib x.mtl\r\n  mtllib y.mtl\nv 0 0 0\n", "a.mtl");
        assert_eq!(String::from_utf8(bound).unwrap(), "mtllib a.mtl\nv 0 0 0\n");
    }

    #[test]
    fn missing_mtl_never_fetches_the_obj() {
        let source = MemorySource::default().with("cooler.obj", OBJ);
        let err = pollster::block_on(load_obj_with_mtl(&source, "cooler", "cooler.mtl", "cooler.obj")).unwrap_err();
        assert!(matches!(err, LoadError::Fetch { .. }));
        assert_eq!(source.requests(), vec!["cooler.mtl"]);
    }

    #[test]
    fn bad_face_rejects_the_whole_model() {
        let obj = "o good\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\no bad\nf 1 2 9\n";
        let source = MemorySource::default().with("a.mtl", MTL).with("a.obj", obj);
        let err = pollster::block_on(load_obj_with_mtl(&source, "a", "a.mtl", "a.obj")).unwrap_err();
        assert!(
            matches!(err, LoadError::Obj { .. } | LoadError::MalformedGeometry { .. }),
            "{:?}",
            err
        );
    }

    #[test]
    fn obj_without_faces_is_malformed() {
        let source = MemorySource::default().with("a.mtl", MTL).with("a.obj", "v 0 0 0\nv 1 0 0\n");
        let err = pollster::block_on(load_obj_with_mtl(&source, "a", "a.mtl", "a.obj")).unwrap_err();
        assert!(matches!(err, LoadError::MalformedGeometry { .. }), "{:?}", err);
    }

    #[test]
    fn missing_texture_keeps_the_material() {
        let mtl = "newmtl skin\nKd 0.2 0.2 0.2\nmap_Kd textures/skin.png\n";
        let obj = "mtllib a.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl skin\nf 1 2 3\n";
        let source = MemorySource::default().with("m/a.mtl", mtl).with("m/a.obj", obj);
        let model = pollster::block_on(load_obj_with_mtl(&source, "a", "m/a.mtl", "m/a.obj")).unwrap();
        let mesh = model.nodes[0].mesh.as_ref().unwrap();
        assert!(mesh.material.albedo_texture.is_none());
        assert!(source.requests().contains(&"m/textures/skin.png".to_string()));
    }
}
