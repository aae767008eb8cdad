use std::sync::Arc;

use super::{AssetSource, LoadError};
use crate::{graph::TextureImage, log_error};


pub fn decode_texture(bytes: &[u8], path: &str) -> Result<TextureImage, LoadError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| LoadError::Image { path: path.to_string(), message: e.to_string() })?
        .to_rgba8();
    let (width, height) = image.dimensions();
    let rgba = image.pixels().map(|p| p.0).collect();
    Ok(TextureImage { width, height, rgba })
}


/// Fetches and decodes a texture. A missing or broken texture is logged
/// and the material falls back to its plain color.
pub async fn fetch_texture<S: AssetSource>(source: &S, path: &str) -> Option<Arc<TextureImage>> {
    let decoded = match source.fetch(path).await {
        Ok(bytes) => decode_texture(&bytes, path),
        Err(e) => Err(e),
    };
    match decoded {
        Ok(image) => Some(Arc::new(image)),
        Err(e) => {
            log_error!("fetch_texture(): ERROR: {}", e);
            None
        }
    }
}


pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

pub fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}
