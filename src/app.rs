//! Application state and everything that happens to it: host events,
//! completed loads and the per-frame update.

use std::{cell::Cell, rc::Rc};

use bus::BusReader;
use three_d::{vec2, Camera, Vec2, Viewport};

use crate::{
    animation::AnimationMixer,
    assets::{AssetEvent, AssetSlot, LoadError, LoadedModel},
    config::{self, SoundEffect},
    controls::{DragMode, OrbitControls},
    graph::{NodeId, SceneGraph},
    log, log_error,
    raycast::{intersect_subtree, Intersection, Ray},
    scene::{self, SceneSetup},
};


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cursor {
    Default,
    Pointer,
}


/// Services the embedding page provides
pub trait Host {
    fn set_cursor(&mut self, cursor: Cursor);
    /// Plays from the start, restarting if already playing
    fn play_sound(&mut self, sound: &SoundEffect);
    fn toggle_fullscreen(&mut self);
}


#[derive(Clone, Debug)]
pub enum AssetState<T> {
    Pending,
    Loaded(T),
    Failed(LoadError),
}
impl<T> AssetState<T> {
    pub fn loaded(&self) -> Option<&T> {
        match self {
            AssetState::Loaded(t) => Some(t),
            _ => None,
        }
    }

    pub fn loaded_mut(&mut self) -> Option<&mut T> {
        match self {
            AssetState::Loaded(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, AssetState::Pending)
    }
}


pub struct Character {
    pub root: NodeId,
    pub mixer: AnimationMixer,
}


pub struct Prop {
    pub root: NodeId,
}


#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportState {
    /// CSS pixels
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f64,
}


/// Canvas size to apply after a resize
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceSize {
    pub css_width: u32,
    pub css_height: u32,
    pub buffer_width: u32,
    pub buffer_height: u32,
}


/// Frame time source. The first update yields 0.
#[derive(Clone, Copy, Debug, Default)]
pub struct Timer {
    last_ms: Option<f64>,
}
impl Timer {
    /// Seconds since the previous update
    pub fn update(&mut self, now_ms: f64) -> f32 {
        let delta = match self.last_ms {
            Some(last) => ((now_ms - last) / 1000.0).max(0.0),
            None => 0.0,
        };
        self.last_ms = Some(now_ms);
        delta as f32
    }
}


/// Raised once to stop the frame loop
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal(Rc<Cell<bool>>);
impl ShutdownSignal {
    pub fn raise(&self) {
        self.0.set(true);
    }

    pub fn is_raised(&self) -> bool {
        self.0.get()
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Continue,
    Stop,
}


pub struct App {
    pub graph: SceneGraph,
    pub camera: Camera,
    pub controls: OrbitControls,
    viewport: ViewportState,
    pointer: Vec2,
    hit: Option<Vec<Intersection>>,
    character: AssetState<Character>,
    props: Vec<AssetState<Prop>>,
    timer: Timer,
    shutdown: ShutdownSignal,
    loads: BusReader<AssetEvent>,
}
impl App {
    pub fn new(loads: BusReader<AssetEvent>, shutdown: ShutdownSignal) -> Self {
        let SceneSetup { graph, camera, controls, .. } = SceneSetup::new(Viewport::new_at_origo(1, 1));
        Self {
            graph,
            camera,
            controls,
            viewport: ViewportState { width: 1, height: 1, pixel_ratio: 1.0 },
            pointer: vec2(0.0, 0.0),
            hit: None,
            character: AssetState::Pending,
            props: config::PROPS.iter().map(|_| AssetState::Pending).collect(),
            timer: Timer::default(),
            shutdown,
            loads,
        }
    }

    pub fn viewport(&self) -> ViewportState {
        self.viewport
    }

    pub fn pointer(&self) -> Vec2 {
        self.pointer
    }

    /// Last hit-test result; None while the character is absent
    pub fn hit(&self) -> Option<&[Intersection]> {
        self.hit.as_deref()
    }

    pub fn character(&self) -> &AssetState<Character> {
        &self.character
    }

    pub fn props(&self) -> &[AssetState<Prop>] {
        &self.props
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }


    /// Window size changed. Sizes are CSS pixels.
    pub fn resize(&mut self, width: u32, height: u32, device_pixel_ratio: f64) -> SurfaceSize {
        let pixel_ratio = device_pixel_ratio.clamp(f64::MIN_POSITIVE, config::MAX_PIXEL_RATIO);
        self.viewport = ViewportState { width, height, pixel_ratio };

        let buffer_width = ((width as f64 * pixel_ratio).round() as u32).max(1);
        let buffer_height = ((height as f64 * pixel_ratio).round() as u32).max(1);
        self.camera.set_viewport(Viewport::new_at_origo(buffer_width, buffer_height));

        SurfaceSize { css_width: width, css_height: height, buffer_width, buffer_height }
    }


    /// Pointer position in CSS pixels relative to the canvas
    pub fn on_pointer_move(&mut self, x: f32, y: f32) {
        let (w, h) = (self.viewport.width as f32, self.viewport.height as f32);
        if w <= 0.0 || h <= 0.0 {
            return;
        }
        self.pointer = vec2(x / w * 2.0 - 1.0, -(y / h * 2.0 - 1.0));
        self.controls.pointer_move(x, y, &self.camera, h);
    }

    /// `button` follows DOM numbering: 0 main, 2 secondary
    pub fn on_pointer_down(&mut self, button: i16, shift: bool, x: f32, y: f32) {
        let mode = match button {
            0 if shift => DragMode::Pan,
            0 => DragMode::Rotate,
            2 => DragMode::Pan,
            _ => return,
        };
        self.controls.pointer_down(mode, x, y);
    }

    pub fn on_pointer_up(&mut self) {
        self.controls.pointer_up();
    }

    pub fn on_wheel(&mut self, delta_y: f32) {
        self.controls.wheel(delta_y);
    }

    pub fn on_click(&mut self, host: &mut impl Host) {
        if self.hit.as_ref().is_some_and(|hits| !hits.is_empty()) {
            host.play_sound(&config::CLICK_SOUND);
        }
    }

    pub fn on_key_down(&mut self, key: &str, host: &mut impl Host) {
        if key.eq_ignore_ascii_case("f") {
            host.toggle_fullscreen();
        }
    }

    pub fn on_double_click(&mut self, host: &mut impl Host) {
        host.toggle_fullscreen();
    }


    /// One tick of the frame loop, everything except drawing
    pub fn frame(&mut self, now_ms: f64, host: &mut impl Host) -> FrameStatus {
        if self.shutdown.is_raised() {
            return FrameStatus::Stop;
        }

        while let Ok(event) = self.loads.try_recv() {
            self.apply_load(event);
        }

        self.controls.update(&mut self.camera);

        let delta = self.timer.update(now_ms);
        if let Some(character) = self.character.loaded_mut() {
            character.mixer.update(delta, &mut self.graph);
        }
        self.graph.update_world();
        self.graph.update_skins();

        self.hit = self.character.loaded().map(|character| {
            Ray::from_camera(&self.camera, self.pointer)
                .map(|ray| intersect_subtree(&self.graph, character.root, &ray))
                .unwrap_or_default()
        });
        let over_character = self.hit.as_ref().is_some_and(|hits| !hits.is_empty());
        host.set_cursor(if over_character { Cursor::Pointer } else { Cursor::Default });

        FrameStatus::Continue
    }


    /// Attaches a finished load to the scene, or records its failure
    pub fn apply_load(&mut self, event: AssetEvent) {
        match event.slot {
            AssetSlot::Character => {
                if !self.character.is_pending() {
                    log_error!("apply_load(): ERROR: character already settled, ignoring");
                    return;
                }
                self.character = match event.result {
                    Ok(model) => AssetState::Loaded(self.add_character(&model)),
                    Err(e) => AssetState::Failed(e),
                };
            }
            AssetSlot::Prop(index) => {
                let Some(spec) = config::PROPS.get(index) else {
                    log_error!("apply_load(): ERROR: no prop {}", index);
                    return;
                };
                if !self.props[index].is_pending() {
                    log_error!("apply_load(): ERROR: prop {} already settled, ignoring", spec.name);
                    return;
                }
                self.props[index] = match event.result {
                    Ok(model) => {
                        let parent = self.graph.root();
                        let instance = scene::instantiate(&mut self.graph, parent, &model);
                        scene::apply_offset(&mut self.graph, instance.root, spec.position, spec.rotation_y, spec.scale);
                        let first_mesh = self.graph.node(instance.root).children().iter().copied()
                            .find(|&c| self.graph.node(c).mesh.is_some());
                        if let Some(mesh) = first_mesh {
                            self.graph.node_mut(mesh).cast_shadow = true;
                        }
                        log!("apply_load(): prop {} added", spec.name);
                        AssetState::Loaded(Prop { root: instance.root })
                    }
                    Err(e) => AssetState::Failed(e),
                };
            }
        }
    }

    fn add_character(&mut self, model: &LoadedModel) -> Character {
        let parent = self.graph.root();
        let instance = scene::instantiate(&mut self.graph, parent, model);
        self.graph.node_mut(instance.root).transform.translation.y += config::CHARACTER_Y_OFFSET;
        for id in self.graph.descendants(instance.root) {
            if self.graph.node(id).mesh.is_some() {
                self.graph.node_mut(id).cast_shadow = true;
            }
        }

        let mut mixer = AnimationMixer::new(model.clips.clone(), instance.nodes);
        if mixer.play(0) {
            log!("add_character(): playing clip '{}'", mixer.clips()[0].name);
        } else {
            log!("add_character(): model has no animation clips");
        }
        self.graph.update_world();
        Character { root: instance.root, mixer }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use bus::Bus;
    use three_d::{vec3, Vec3};
    use crate::animation::{Channel, ChannelValues, Clip, Interpolation};
    use crate::assets::ProtoNode;
    use crate::graph::{MaterialData, MeshData, NodeTransform};
    use crate::utils::are_floats_equal;

    #[derive(Default)]
    struct RecordingHost {
        cursor: Option<Cursor>,
        sounds: Vec<&'static str>,
        fullscreen: bool,
    }
    impl Host for RecordingHost {
        fn set_cursor(&mut self, cursor: Cursor) {
            self.cursor = Some(cursor);
        }

        fn play_sound(&mut self, sound: &SoundEffect) {
            self.sounds.push(sound.path);
        }

        fn toggle_fullscreen(&mut self) {
            self.fullscreen = !self.fullscreen;
        }
    }

    /// Double-sided 2x2 square centered one unit above the model origin,
    /// with a clip that slides it along X
    fn character_model(with_clip: bool) -> LoadedModel {
        let material = MaterialData { double_sided: true, ..Default::default() };
        let mesh = MeshData::new(
            vec![vec3(-1.0, -1.0, 0.0), vec3(1.0, -1.0, 0.0), vec3(1.0, 1.0, 0.0), vec3(-1.0, 1.0, 0.0)],
            None,
            None,
            vec![0, 1, 2, 0, 2, 3],
            material,
        )
        .unwrap();
        let clips = if with_clip {
            vec![Clip::new(
                "idle",
                vec![Channel {
                    target: 0,
                    times: vec![0.0, 2.0],
                    values: ChannelValues::Translations(vec![vec3(0.0, 1.0, 0.0), vec3(0.2, 1.0, 0.0)]),
                    interpolation: Interpolation::Linear,
                }],
            )]
        } else {
            Vec::new()
        };
        LoadedModel {
            name: "homer".to_string(),
            nodes: vec![ProtoNode {
                name: "body".to_string(),
                transform: NodeTransform { translation: vec3(0.0, 1.0, 0.0), ..Default::default() },
                mesh: Some(Arc::new(mesh)),
                ..Default::default()
            }],
            roots: vec![0],
            skins: Vec::new(),
            clips: Arc::new(clips),
        }
    }

    fn app() -> (App, Bus<AssetEvent>) {
        let mut bus = Bus::new(config::ASSET_EVENT_CAPACITY);
        let app = App::new(bus.add_rx(), ShutdownSignal::default());
        (app, bus)
    }

    fn failure() -> LoadError {
        LoadError::Fetch { path: "x".to_string(), message: "HTTP 404".to_string() }
    }

    #[test]
    fn resize_updates_aspect_and_surface() {
        let (mut app, _bus) = app();
        let size = app.resize(800, 600, 1.0);
        assert_eq!(size, SurfaceSize { css_width: 800, css_height: 600, buffer_width: 800, buffer_height: 600 });
        let aspect = app.camera.viewport().aspect();
        assert!(are_floats_equal(aspect, 800.0 / 600.0, 1e-5));

        let size = app.resize(1200, 800, 3.0);
        assert_eq!(app.viewport().pixel_ratio, 2.0);
        assert_eq!((size.buffer_width, size.buffer_height), (2400, 1600));
        assert!(are_floats_equal(app.camera.viewport().aspect(), 1.5, 1e-5));

        assert_eq!(app.resize(1200, 800, 3.0), size);
    }

    #[test]
    fn pointer_maps_to_ndc() {
        let (mut app, _bus) = app();
        app.resize(800, 600, 1.0);
        app.on_pointer_move(400.0, 300.0);
        assert_eq!(app.pointer(), vec2(0.0, 0.0));
        app.on_pointer_move(0.0, 0.0);
        assert_eq!(app.pointer(), vec2(-1.0, 1.0));
        app.on_pointer_move(800.0, 600.0);
        assert_eq!(app.pointer(), vec2(1.0, -1.0));
    }

    #[test]
    fn frames_without_character_have_no_hit() {
        let (mut app, _bus) = app();
        let mut host = RecordingHost::default();
        app.resize(800, 600, 1.0);
        app.on_pointer_move(400.0, 300.0);
        for i in 0..3 {
            assert_eq!(app.frame(i as f64 * 16.0, &mut host), FrameStatus::Continue);
            assert!(app.hit().is_none());
        }
        assert_eq!(host.cursor, Some(Cursor::Default));
        app.on_click(&mut host);
        assert!(host.sounds.is_empty());
    }

    #[test]
    fn click_plays_sound_only_on_hit() {
        let (mut app, mut bus) = app();
        let mut host = RecordingHost::default();
        app.resize(800, 600, 1.0);
        bus.broadcast(AssetEvent { slot: AssetSlot::Character, result: Ok(character_model(true)) });

        app.on_pointer_move(400.0, 300.0);
        app.frame(0.0, &mut host);
        assert!(!app.hit().unwrap().is_empty());
        assert_eq!(host.cursor, Some(Cursor::Pointer));
        app.on_click(&mut host);
        assert_eq!(host.sounds, vec![config::CLICK_SOUND.path]);

        app.on_pointer_move(1.0, 1.0);
        app.frame(16.0, &mut host);
        assert!(app.hit().unwrap().is_empty());
        assert_eq!(host.cursor, Some(Cursor::Default));
        app.on_click(&mut host);
        assert_eq!(host.sounds.len(), 1);
    }

    #[test]
    fn character_is_offset_shadowed_and_animated() {
        let (mut app, mut bus) = app();
        let mut host = RecordingHost::default();
        bus.broadcast(AssetEvent { slot: AssetSlot::Character, result: Ok(character_model(true)) });
        app.frame(1000.0, &mut host);

        let character = app.character().loaded().unwrap();
        let root = app.graph.node(character.root);
        assert!(are_floats_equal(root.transform.translation.y, config::CHARACTER_Y_OFFSET, 1e-7));
        let body = root.children()[0];
        assert!(app.graph.node(body).cast_shadow);

        let action = character.mixer.action().unwrap();
        assert_eq!(action.clip, 0);
        assert_eq!(action.time, 0.0);

        app.frame(2000.0, &mut host);
        let x = app.graph.node(body).transform.translation.x;
        assert!(are_floats_equal(x, 0.1, 1e-5));
        app.frame(3500.0, &mut host);
        let time = app.character().loaded().unwrap().mixer.action().unwrap().time;
        assert!(are_floats_equal(time, 0.5, 1e-5));
    }

    #[test]
    fn character_without_clips_has_no_action() {
        let (mut app, mut bus) = app();
        let mut host = RecordingHost::default();
        bus.broadcast(AssetEvent { slot: AssetSlot::Character, result: Ok(character_model(false)) });
        app.frame(0.0, &mut host);
        assert!(app.character().loaded().unwrap().mixer.action().is_none());
        app.frame(16.0, &mut host);
    }

    #[test]
    fn failed_loads_are_independent() {
        let (mut app, mut bus) = app();
        let mut host = RecordingHost::default();
        let prop = LoadedModel { name: "cooler".to_string(), ..character_model(false) };
        bus.broadcast(AssetEvent { slot: AssetSlot::Prop(0), result: Err(failure()) });
        bus.broadcast(AssetEvent { slot: AssetSlot::Prop(1), result: Ok(prop) });
        bus.broadcast(AssetEvent { slot: AssetSlot::Character, result: Err(failure()) });
        app.frame(0.0, &mut host);

        assert!(matches!(app.props()[0], AssetState::Failed(_)));
        let cup = app.props()[1].loaded().unwrap();
        assert!(matches!(app.character(), AssetState::Failed(_)));
        assert!(app.hit().is_none());

        let spec = config::PROPS[1];
        let root = app.graph.node(cup.root);
        assert_eq!(root.transform.translation, Vec3::from(spec.position));
        assert!(are_floats_equal(root.transform.scale.x, spec.scale, 1e-6));
        assert!(app.graph.node(root.children()[0]).cast_shadow);

        // settled slots never change again
        bus.broadcast(AssetEvent { slot: AssetSlot::Prop(0), result: Ok(character_model(false)) });
        app.frame(16.0, &mut host);
        assert!(matches!(app.props()[0], AssetState::Failed(_)));
    }

    #[test]
    fn only_the_ground_receives_shadows() {
        let (mut app, mut bus) = app();
        let mut host = RecordingHost::default();
        let prop = LoadedModel { name: "cooler".to_string(), ..character_model(false) };
        bus.broadcast(AssetEvent { slot: AssetSlot::Character, result: Ok(character_model(true)) });
        bus.broadcast(AssetEvent { slot: AssetSlot::Prop(0), result: Ok(prop) });
        app.frame(0.0, &mut host);

        let receivers = scene::shadow_receivers(&app.graph);
        assert_eq!(receivers.len(), 1);
        assert_eq!(app.graph.node(receivers[0]).name, "ground");
        assert!(!scene::shadow_casters(&app.graph).contains(&receivers[0]));
    }

    #[test]
    fn fullscreen_toggles() {
        let (mut app, _bus) = app();
        let mut host = RecordingHost::default();
        app.on_key_down("f", &mut host);
        assert!(host.fullscreen);
        app.on_key_down("F", &mut host);
        assert!(!host.fullscreen);
        app.on_key_down("g", &mut host);
        assert!(!host.fullscreen);
        app.on_double_click(&mut host);
        assert!(host.fullscreen);
    }

    #[test]
    fn shutdown_stops_the_loop() {
        let (mut app, _bus) = app();
        let mut host = RecordingHost::default();
        let signal = app.shutdown().clone();
        assert_eq!(app.frame(0.0, &mut host), FrameStatus::Continue);
        signal.raise();
        assert_eq!(app.frame(16.0, &mut host), FrameStatus::Stop);
    }

    #[test]
    fn timer_starts_at_zero() {
        let mut timer = Timer::default();
        assert_eq!(timer.update(500.0), 0.0);
        assert!(are_floats_equal(timer.update(516.0), 0.016, 1e-6));
        assert_eq!(timer.update(400.0), 0.0);
    }
}
