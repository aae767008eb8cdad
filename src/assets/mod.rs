//! Model loading. Loaders run as futures and report through a [Bus];
//! the frame loop owns the only reader.

mod gltf_loader;
mod obj_loader;
mod source;
mod texture;

use std::{cell::RefCell, sync::Arc};

use bus::Bus;
use three_d::Mat4;

use crate::{
    animation::Clip,
    config::{self, PropSpec},
    graph::{MeshData, NodeTransform},
    log, log_error,
};

pub use gltf_loader::load_gltf;
pub use obj_loader::load_obj_with_mtl;
pub use source::{parent_dir, resolve, AssetSource};
pub use texture::{decode_texture, fetch_texture, linear_to_srgb, srgb_to_linear};

#[cfg(target_arch = "wasm32")]
pub use source::WebSource;
#[cfg(test)]
pub use source::MemorySource;


#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum LoadError {
    #[error("failed to fetch {path}: {message}")]
    Fetch { path: String, message: String },
    #[error("invalid glTF {path}: {message}")]
    Gltf { path: String, message: String },
    #[error("invalid OBJ {path}: {message}")]
    Obj { path: String, message: String },
    #[error("invalid MTL {path}: {message}")]
    Mtl { path: String, message: String },
    #[error("malformed geometry in {path}: {message}")]
    MalformedGeometry { path: String, message: String },
    #[error("unsupported URI in {path}: {uri}")]
    UnsupportedUri { path: String, uri: String },
    #[error("buffer {index} of {path} is missing or too short")]
    MissingBuffer { path: String, index: usize },
    #[error("cannot decode image {path}: {message}")]
    Image { path: String, message: String },
}


/// A node of a loaded model before it is added to the scene graph.
/// `children` and skin joints index [LoadedModel::nodes].
#[derive(Clone, Debug, Default)]
pub struct ProtoNode {
    pub name: String,
    pub transform: NodeTransform,
    pub children: Vec<usize>,
    pub mesh: Option<Arc<MeshData>>,
    pub skin: Option<usize>,
}


#[derive(Clone, Debug)]
pub struct ProtoSkin {
    pub joints: Vec<usize>,
    pub inverse_bind: Vec<Mat4>,
}


/// Format-independent result of a successful load.
/// Animation channel targets index `nodes`.
#[derive(Clone, Debug)]
pub struct LoadedModel {
    pub name: String,
    pub nodes: Vec<ProtoNode>,
    pub roots: Vec<usize>,
    pub skins: Vec<ProtoSkin>,
    pub clips: Arc<Vec<Clip>>,
}
impl LoadedModel {
    pub fn mesh_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.mesh.is_some()).count()
    }
}


/// Which scene entity a load result is for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetSlot {
    Character,
    /// index into [config::PROPS]
    Prop(usize),
}


#[derive(Clone, Debug)]
pub struct AssetEvent {
    pub slot: AssetSlot,
    pub result: Result<LoadedModel, LoadError>,
}


pub async fn load_character<S: AssetSource>(source: &S) -> AssetEvent {
    let result = load_gltf(source, config::CHARACTER_PATH).await;
    report(AssetSlot::Character, config::CHARACTER_PATH, &result);
    AssetEvent { slot: AssetSlot::Character, result }
}


pub async fn load_prop<S: AssetSource>(source: &S, index: usize, spec: &PropSpec) -> AssetEvent {
    let result = load_obj_with_mtl(source, spec.name, spec.mtl_path, spec.obj_path).await;
    report(AssetSlot::Prop(index), spec.obj_path, &result);
    AssetEvent { slot: AssetSlot::Prop(index), result }
}


fn report(slot: AssetSlot, path: &str, result: &Result<LoadedModel, LoadError>) {
    match result {
        Ok(model) => log!("load(): {:?} loaded from {} ({} meshes, {} clips)", slot, path, model.mesh_count(), model.clips.len()),
        Err(e) => log_error!("load(): ERROR: {:?}: {}", slot, e),
    }
}


/// Hands a finished load to the frame loop
pub fn publish(bus: &RefCell<Bus<AssetEvent>>, event: AssetEvent) {
    if let Err(event) = bus.borrow_mut().try_broadcast(event) {
        log_error!("publish(): ERROR: bus full, dropping result for {:?}", event.slot);
    }
}
