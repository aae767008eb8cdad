//! Fixed scene parameters. There is no runtime configuration.

use std::f32::consts::PI;


/// Base path every asset path is resolved against
pub const ASSET_BASE: &str = "./";

pub const BACKGROUND_COLOR: [u8; 3] = [0xaf, 0xc9, 0xf7];

pub const CAMERA_FOV_DEGREES: f32 = 45.0;
pub const CAMERA_NEAR: f32 = 0.1;
pub const CAMERA_FAR: f32 = 1000.0;
pub const CAMERA_POSITION: [f32; 3] = [-1.5, 3.0, 5.0];

pub const ORBIT_TARGET: [f32; 3] = [0.0, 1.0, 0.0];
pub const ORBIT_DAMPING_FACTOR: f32 = 0.05;
pub const ORBIT_MIN_DISTANCE: f32 = 0.5;
pub const ORBIT_MAX_DISTANCE: f32 = 50.0;

/// Caps the GPU cost on high-density displays
pub const MAX_PIXEL_RATIO: f64 = 2.0;

pub const GROUND_RADIUS: f32 = 2.25;
pub const GROUND_SEGMENTS: u32 = 64;
pub const GROUND_COLOR: [u8; 3] = [0x8b, 0xab, 0x00];
pub const GROUND_HEIGHT: f32 = -0.01;

pub const AMBIENT_INTENSITY: f32 = 0.5;
pub const DIRECTIONAL_INTENSITY: f32 = 3.0;
pub const DIRECTIONAL_POSITION: [f32; 3] = [2.0, 2.0, 2.0];
pub const SHADOW_MAP_SIZE: u32 = 1024;


/// Orthographic box of the directional light's shadow camera, in light view space
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowBox {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
    pub near: f32,
    pub far: f32,
}

pub const SHADOW_BOX: ShadowBox = ShadowBox {
    left: -1.5,
    right: 2.0,
    top: 1.5,
    bottom: -1.0,
    near: 0.5,
    far: 5.5,
};


pub const CHARACTER_PATH: &str = "models/homer/scene.gltf";
pub const CHARACTER_Y_OFFSET: f32 = -0.0082;


/// A static model loaded from an MTL + OBJ pair, placed with a fixed offset
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PropSpec {
    pub name: &'static str,
    pub mtl_path: &'static str,
    pub obj_path: &'static str,
    pub position: [f32; 3],
    pub rotation_y: f32,
    pub scale: f32,
}

pub const PROPS: [PropSpec; 2] = [
    PropSpec {
        name: "duff-cooler",
        mtl_path: "models/duff-cooler/DuffCooler.mtl",
        obj_path: "models/duff-cooler/DuffCooler.obj",
        position: [1.5, -0.05, -0.5],
        rotation_y: PI / 1.5,
        scale: 1.0,
    },
    PropSpec {
        name: "ebola-cola",
        mtl_path: "models/ebola-cola/big_gulp_of_pop_objShape.mtl",
        obj_path: "models/ebola-cola/big_gulp_of_pop_objShape.obj",
        position: [-1.0, -0.01, 0.5],
        rotation_y: 0.0,
        scale: 0.5,
    },
];


#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SoundEffect {
    pub path: &'static str,
    pub volume: f32,
}

pub const CLICK_SOUND: SoundEffect = SoundEffect {
    path: "sounds/homer-doh.mp3",
    volume: 0.5,
};


/// Room for every load result even if no frame runs in between
pub const ASSET_EVENT_CAPACITY: usize = 1 + PROPS.len() + 1;
