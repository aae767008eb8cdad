//! Browser side: canvas and WebGL2 setup, GPU objects, DOM listeners and
//! the requestAnimationFrame loop.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    rc::Rc,
    sync::Arc,
};

use bus::Bus;
use three_d::{
    context, AmbientLight, ClearState, Context, CpuMaterial, CpuMesh, CpuTexture, Cull, DirectionalLight, Gm, Indices,
    Mesh, PhysicalMaterial, Positions, RenderTarget, Srgba, TextureData, Vec3,
};
use wasm_bindgen::{prelude::*, JsCast};
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    EventTarget, HtmlAudioElement, HtmlCanvasElement, KeyboardEvent, MouseEvent, PointerEvent, WebGl2RenderingContext,
    WheelEvent, Window,
};

use crate::{
    app::{App, Cursor, FrameStatus, Host, ShutdownSignal, SurfaceSize},
    assets::{linear_to_srgb, load_character, load_prop, publish, AssetEvent, WebSource},
    config::{self, SoundEffect},
    graph::{MaterialData, MeshInstance, NodeId},
    log, log_error,
    scene,
    utils::*,
};


/// Handle returned to JS; `stop()` ends the frame loop
#[wasm_bindgen]
pub struct SceneHandle {
    shutdown: ShutdownSignal,
}
#[wasm_bindgen]
impl SceneHandle {
    pub fn stop(&self) {
        log!("SceneHandle::stop(): shutting down");
        self.shutdown.raise();
    }
}


/// Page services backed by the DOM
struct WebHost {
    canvas: HtmlCanvasElement,
    cursor: Option<Cursor>,
    sounds: HashMap<&'static str, HtmlAudioElement>,
}
impl WebHost {
    fn new(canvas: HtmlCanvasElement) -> Self {
        Self { canvas, cursor: None, sounds: HashMap::new() }
    }

    fn apply_surface(&self, size: SurfaceSize) {
        self.canvas.set_width(size.buffer_width);
        self.canvas.set_height(size.buffer_height);
        let style = self.canvas.style();
        let result = style
            .set_property("width", &format!("{}px", size.css_width))
            .and_then(|_| style.set_property("height", &format!("{}px", size.css_height)));
        if let Err(e) = result {
            log_error!("apply_surface(): ERROR: {:?}", e);
        }
    }
}
impl Host for WebHost {
    fn set_cursor(&mut self, cursor: Cursor) {
        if self.cursor == Some(cursor) {
            return;
        }
        let value = match cursor {
            Cursor::Default => "default",
            Cursor::Pointer => "pointer",
        };
        match self.canvas.style().set_property("cursor", value) {
            Ok(()) => self.cursor = Some(cursor),
            Err(e) => log_error!("set_cursor(): ERROR: {:?}", e),
        }
    }

    fn play_sound(&mut self, sound: &SoundEffect) {
        let audio = match self.sounds.get(sound.path) {
            Some(audio) => audio.clone(),
            None => match HtmlAudioElement::new_with_src(&format!("{}{}", config::ASSET_BASE, sound.path)) {
                Ok(audio) => {
                    self.sounds.insert(sound.path, audio.clone());
                    audio
                }
                Err(e) => {
                    log_error!("play_sound(): ERROR: {:?}", e);
                    return;
                }
            },
        };
        audio.set_volume(sound.volume as f64);
        audio.set_current_time(0.0);
        match audio.play() {
            Ok(promise) => execute_future(async move {
                if let Err(e) = JsFuture::from(promise).await {
                    log_error!("play_sound(): ERROR: {:?}", e);
                }
            }),
            Err(e) => log_error!("play_sound(): ERROR: {:?}", e),
        }
    }

    fn toggle_fullscreen(&mut self) {
        toggle_fullscreen(&self.canvas);
    }
}


struct GpuObject {
    gm: Gm<Mesh, PhysicalMaterial>,
    revision: u64,
}


/// Mirrors the scene graph's meshes on the GPU and draws them
pub struct Renderer {
    context: Context,
    ambient: AmbientLight,
    directional: DirectionalLight,
    /// Same light without a shadow map, for meshes that only cast
    unshadowed: DirectionalLight,
    objects: BTreeMap<NodeId, GpuObject>,
}
impl Renderer {
    pub fn new(context: Context) -> Self {
        let ambient = AmbientLight::new(&context, config::AMBIENT_INTENSITY, Srgba::WHITE);
        let direction = -Vec3::from(config::DIRECTIONAL_POSITION);
        let directional = DirectionalLight::new(&context, config::DIRECTIONAL_INTENSITY, Srgba::WHITE, &direction);
        let unshadowed = DirectionalLight::new(&context, config::DIRECTIONAL_INTENSITY, Srgba::WHITE, &direction);
        Self { context, ambient, directional, unshadowed, objects: BTreeMap::new() }
    }

    /// Uploads new and re-skinned meshes, then draws the frame
    pub fn render(&mut self, app: &App) {
        let graph = &app.graph;
        for (id, instance) in graph.mesh_nodes() {
            let context = &self.context;
            let object = self.objects.entry(id).or_insert_with(|| GpuObject {
                gm: Gm::new(
                    Mesh::new(context, &cpu_mesh(instance)),
                    physical_material(context, &instance.data.material),
                ),
                revision: instance.revision(),
            });
            // skinned meshes whose joints moved since the last upload
            if object.revision != instance.revision() {
                object.gm.geometry = Mesh::new(context, &cpu_mesh(instance));
                object.revision = instance.revision();
            }
            object.gm.set_transformation(graph.mesh_transform(id));
        }

        let casters = scene::shadow_casters(graph);
        let geometries: Vec<&Mesh> = casters
            .iter()
            .filter_map(|id| self.objects.get(id))
            .map(|object| &object.gm.geometry)
            .collect();
        self.directional.generate_shadow_map(config::SHADOW_MAP_SIZE, geometries.iter().copied());

        let receivers = scene::shadow_receivers(graph);
        let (shadowed, lit): (Vec<_>, Vec<_>) = self.objects.iter().partition(|(id, _)| receivers.contains(*id));

        let viewport = app.camera.viewport();
        let [r, g, b] = config::BACKGROUND_COLOR.map(|c| c as f32 / 255.0);
        RenderTarget::screen(&self.context, viewport.width, viewport.height)
            .clear(ClearState::color_and_depth(r, g, b, 1.0, 1.0))
            .render(
                &app.camera,
                shadowed.iter().map(|(_, object)| &object.gm),
                &[&self.ambient, &self.directional],
            )
            .render(
                &app.camera,
                lit.iter().map(|(_, object)| &object.gm),
                &[&self.ambient, &self.unshadowed],
            );
    }
}


fn cpu_mesh(instance: &MeshInstance) -> CpuMesh {
    let mut mesh = CpuMesh {
        positions: Positions::F32(instance.positions().to_vec()),
        indices: Indices::U32(instance.data.indices.clone()),
        normals: instance.normals().map(|n| n.to_vec()),
        uvs: instance.data.uvs.clone(),
        ..Default::default()
    };
    if mesh.normals.is_none() {
        mesh.compute_normals();
    }
    mesh
}


fn physical_material(context: &Context, data: &MaterialData) -> PhysicalMaterial {
    let [r, g, b, a] = data.albedo;
    let to_srgb8 = |c: f32| (linear_to_srgb(c.clamp(0.0, 1.0)) * 255.0).round() as u8;
    let cpu = CpuMaterial {
        name: data.name.clone(),
        albedo: Srgba::new(to_srgb8(r), to_srgb8(g), to_srgb8(b), (a.clamp(0.0, 1.0) * 255.0).round() as u8),
        albedo_texture: data.albedo_texture.as_ref().map(|t| CpuTexture {
            data: TextureData::RgbaU8(t.rgba.clone()),
            width: t.width,
            height: t.height,
            ..Default::default()
        }),
        metallic: data.metallic,
        roughness: data.roughness,
        ..Default::default()
    };
    let mut material = PhysicalMaterial::new(context, &cpu);
    material.render_states.cull = if data.double_sided { Cull::None } else { Cull::Back };
    material
}


struct Runtime {
    app: App,
    host: WebHost,
    renderer: Renderer,
}


/// Registers a DOM listener that runs `handler` on the shared state.
/// Events arriving while the state is borrowed are dropped.
fn listen<E, F>(target: &EventTarget, kind: &str, runtime: &Rc<RefCell<Runtime>>, mut handler: F) -> Result<(), JsValue>
where
    E: JsCast + 'static,
    F: FnMut(&mut Runtime, E) + 'static,
{
    let runtime = runtime.clone();
    let closure = Closure::wrap(Box::new(move |event: web_sys::Event| {
        let Ok(event) = event.dyn_into::<E>() else { return };
        let Ok(mut runtime) = runtime.try_borrow_mut() else { return };
        handler(&mut *runtime, event);
    }) as Box<dyn FnMut(web_sys::Event)>);
    target.add_event_listener_with_callback(kind, closure.as_ref().unchecked_ref())?;
    closure.forget();
    Ok(())
}


fn window_size(window: &Window) -> (u32, u32, f64) {
    let dimension = |v: Result<JsValue, JsValue>| v.ok().and_then(|v| v.as_f64()).unwrap_or(1.0).max(1.0) as u32;
    (
        dimension(window.inner_width()),
        dimension(window.inner_height()),
        window.device_pixel_ratio(),
    )
}


fn resize(runtime: &mut Runtime, window: &Window) {
    let (width, height, dpr) = window_size(window);
    let size = runtime.app.resize(width, height, dpr);
    runtime.host.apply_surface(size);
    log!("resize(): {}x{} css, {}x{} buffer", size.css_width, size.css_height, size.buffer_width, size.buffer_height);
}


fn add_listeners(window: &Window, canvas: &HtmlCanvasElement, runtime: &Rc<RefCell<Runtime>>) -> Result<(), JsValue> {
    {
        let window_for_resize = window.clone();
        listen(window, "resize", runtime, move |rt, _: web_sys::Event| resize(rt, &window_for_resize))?;
    }
    listen(canvas, "pointermove", runtime, |rt, e: PointerEvent| {
        rt.app.on_pointer_move(e.offset_x() as f32, e.offset_y() as f32);
    })?;
    {
        let canvas_for_capture = canvas.clone();
        listen(canvas, "pointerdown", runtime, move |rt, e: PointerEvent| {
            if let Err(err) = canvas_for_capture.set_pointer_capture(e.pointer_id()) {
                log_error!("pointerdown: ERROR: set_pointer_capture: {:?}", err);
            }
            rt.app.on_pointer_down(e.button(), e.shift_key(), e.offset_x() as f32, e.offset_y() as f32);
        })?;
    }
    listen(canvas, "pointerup", runtime, |rt, _: PointerEvent| rt.app.on_pointer_up())?;
    listen(canvas, "pointercancel", runtime, |rt, _: PointerEvent| rt.app.on_pointer_up())?;
    listen(canvas, "wheel", runtime, |rt, e: WheelEvent| rt.app.on_wheel(e.delta_y() as f32))?;
    listen(canvas, "contextmenu", runtime, |_, e: MouseEvent| e.prevent_default())?;
    listen(canvas, "dblclick", runtime, |rt, _: MouseEvent| {
        let Runtime { app, host, .. } = rt;
        app.on_double_click(host);
    })?;
    listen(window, "click", runtime, |rt, _: MouseEvent| {
        let Runtime { app, host, .. } = rt;
        app.on_click(host);
    })?;
    listen(window, "keydown", runtime, |rt, e: KeyboardEvent| {
        let Runtime { app, host, .. } = rt;
        app.on_key_down(&e.key(), host);
    })?;
    Ok(())
}


fn request_animation_frame(window: &Window, callback: &Closure<dyn FnMut(f64)>) {
    if let Err(e) = window.request_animation_frame(callback.as_ref().unchecked_ref()) {
        log_error!("request_animation_frame(): ERROR: {:?}", e);
    }
}


/// Drives `App::frame` and drawing once per display refresh until shutdown
fn start_frame_loop(window: Window, runtime: Rc<RefCell<Runtime>>, shutdown: ShutdownSignal) {
    let callback: Rc<RefCell<Option<Closure<dyn FnMut(f64)>>>> = Rc::new(RefCell::new(None));
    let next = callback.clone();
    let window_for_loop = window.clone();

    *callback.borrow_mut() = Some(Closure::wrap(Box::new(move |now: f64| {
        if shutdown.is_raised() {
            log!("start_frame_loop(): stopped");
            // dropping the closure ends the loop
            let _ = next.borrow_mut().take();
            return;
        }
        if let Some(cb) = next.borrow().as_ref() {
            request_animation_frame(&window_for_loop, cb);
        }

        let mut rt = runtime.borrow_mut();
        let Runtime { app, host, renderer } = &mut *rt;
        if app.frame(now, host) == FrameStatus::Continue {
            renderer.render(app);
        }
    }) as Box<dyn FnMut(f64)>));

    if let Some(cb) = callback.borrow().as_ref() {
        request_animation_frame(&window, cb);
    }
}


fn spawn_loaders(bus: Rc<RefCell<Bus<AssetEvent>>>) {
    {
        let bus = bus.clone();
        execute_future(async move {
            let source = WebSource::new(config::ASSET_BASE);
            publish(&bus, load_character(&source).await);
        });
    }
    for (index, spec) in config::PROPS.iter().enumerate() {
        let bus = bus.clone();
        let spec = *spec;
        execute_future(async move {
            let source = WebSource::new(config::ASSET_BASE);
            publish(&bus, load_prop(&source, index, &spec).await);
        });
    }
}


fn create_context(canvas: &HtmlCanvasElement) -> Result<Context, JsValue> {
    let options = js_sys::Object::new();
    js_sys::Reflect::set(&options, &JsValue::from_str("antialias"), &JsValue::TRUE)?;
    let gl = canvas
        .get_context_with_context_options("webgl2", &options)?
        .ok_or_else(|| JsValue::from_str("WebGL2 is not supported"))?
        .dyn_into::<WebGl2RenderingContext>()
        .map_err(|_| JsValue::from_str("webgl2 context has an unexpected type"))?;
    let gl = context::Context::from_webgl2_context(gl);
    Context::from_gl_context(Arc::new(gl)).map_err(|e| JsValue::from_str(&format!("{:?}", e)))
}


/// Builds the scene on the canvas with id `canvas_id` and starts rendering
pub fn main(canvas_id: &str) -> Result<SceneHandle, JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
    let document = window.document().ok_or_else(|| JsValue::from_str("no document"))?;
    let canvas = document
        .get_element_by_id(canvas_id)
        .ok_or_else(|| JsValue::from_str(&format!("missing #{}", canvas_id)))?
        .dyn_into::<HtmlCanvasElement>()
        .map_err(|_| JsValue::from_str(&format!("#{} is not a canvas", canvas_id)))?;

    let context = create_context(&canvas)?;
    log!("main(): WebGL2 context ready");

    // one result per loader; sized so no send ever blocks
    let mut bus = Bus::<AssetEvent>::new(config::ASSET_EVENT_CAPACITY);
    let loads = bus.add_rx();
    let bus = Rc::new(RefCell::new(bus));

    let shutdown = ShutdownSignal::default();
    let runtime = Rc::new(RefCell::new(Runtime {
        app: App::new(loads, shutdown.clone()),
        host: WebHost::new(canvas.clone()),
        renderer: Renderer::new(context),
    }));
    resize(&mut runtime.borrow_mut(), &window);

    add_listeners(&window, &canvas, &runtime)?;
    spawn_loaders(bus);
    start_frame_loop(window, runtime, shutdown.clone());

    Ok(SceneHandle { shutdown })
}
