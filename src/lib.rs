//! Interactive character scene for the browser: an animated glTF character,
//! OBJ props, orbit camera, hover and click picking, rendered with three-d
//! into a WebGL2 canvas.

pub mod animation;
pub mod app;
pub mod assets;
pub mod config;
pub mod controls;
pub mod graph;
pub mod raycast;
#[cfg(target_arch = "wasm32")]
mod renderer;
pub mod scene;
pub mod utils;

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

#[cfg(target_arch = "wasm32")]
pub use renderer::SceneHandle;


/// Starts the scene on the canvas element with id `canvas_id`
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn run(canvas_id: &str) -> Result<SceneHandle, JsValue> {
    utils::set_panic_hook();
    renderer::main(canvas_id)
}
