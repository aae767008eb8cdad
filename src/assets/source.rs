#[cfg(test)]
use std::{cell::RefCell, collections::HashMap};

use super::LoadError;


/// Where asset bytes come from
#[allow(async_fn_in_trait)]
pub trait AssetSource {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, LoadError>;
}


/// Directory part of `path`, including the trailing slash
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "",
    }
}


/// Resolves a URI found inside an asset file against that file's directory
pub fn resolve(base_dir: &str, uri: &str) -> String {
    let uri = percent_decode(uri);
    let uri = uri.strip_prefix("./").unwrap_or(&uri);
    let mut parts: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    for segment in uri.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}


fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(v) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}


/// Fetches assets over HTTP relative to a base URL
#[cfg(target_arch = "wasm32")]
pub struct WebSource {
    base: String,
}
#[cfg(target_arch = "wasm32")]
impl WebSource {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}
#[cfg(target_arch = "wasm32")]
impl AssetSource for WebSource {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, LoadError> {
        use wasm_bindgen::JsCast;
        use wasm_bindgen_futures::JsFuture;

        let fail = |message: String| LoadError::Fetch { path: path.to_string(), message };
        let js_message = |e: wasm_bindgen::JsValue| e.as_string().unwrap_or_else(|| format!("{:?}", e));

        let url = format!("{}{}", self.base, path);
        let window = web_sys::window().ok_or_else(|| fail("no window".to_string()))?;
        let response = JsFuture::from(window.fetch_with_str(&url))
            .await
            .map_err(|e| fail(js_message(e)))?;
        let response: web_sys::Response = response
            .dyn_into()
            .map_err(|_| fail("fetch did not return a Response".to_string()))?;
        if !response.ok() {
            return Err(fail(format!("HTTP {} for {}", response.status(), url)));
        }
        let buffer = JsFuture::from(response.array_buffer().map_err(|e| fail(js_message(e)))?)
            .await
            .map_err(|e| fail(js_message(e)))?;
        Ok(js_sys::Uint8Array::new(&buffer).to_vec())
    }
}


/// In-memory files; remembers every requested path
#[cfg(test)]
#[derive(Default)]
pub struct MemorySource {
    files: HashMap<String, Vec<u8>>,
    requests: RefCell<Vec<String>>,
}
#[cfg(test)]
impl MemorySource {
    pub fn with(mut self, path: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.to_string(), bytes.into());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}
#[cfg(test)]
impl AssetSource for MemorySource {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, LoadError> {
        self.requests.borrow_mut().push(path.to_string());
        self.files.get(path).cloned().ok_or_else(|| LoadError::Fetch {
            path: path.to_string(),
            message: "HTTP 404".to_string(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_uris() {
        assert_eq!(parent_dir("models/homer/scene.gltf"), "models/homer/");
        assert_eq!(parent_dir("scene.gltf"), "");
        assert_eq!(resolve("models/homer/", "scene.bin"), "models/homer/scene.bin");
        assert_eq!(resolve("models/homer/", "./textures/skin%20base.png"), "models/homer/textures/skin base.png");
        assert_eq!(resolve("models/homer/", "../shared/a.png"), "models/shared/a.png");
        assert_eq!(resolve("", "a.bin"), "a.bin");
    }
}
