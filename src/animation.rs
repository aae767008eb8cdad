use std::sync::Arc;

use three_d::{InnerSpace, Quat, Vec3};

use crate::graph::{NodeId, SceneGraph};


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Step,
}


#[derive(Clone, Debug)]
pub enum ChannelValues {
    Translations(Vec<Vec3>),
    Rotations(Vec<Quat>),
    Scales(Vec<Vec3>),
}
impl ChannelValues {
    pub fn len(&self) -> usize {
        match self {
            ChannelValues::Translations(v) | ChannelValues::Scales(v) => v.len(),
            ChannelValues::Rotations(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


/// Keyframes driving one property of one node.
/// `target` indexes the binding table handed to [AnimationMixer::new].
#[derive(Clone, Debug)]
pub struct Channel {
    pub target: usize,
    pub times: Vec<f32>,
    pub values: ChannelValues,
    pub interpolation: Interpolation,
}


#[derive(Clone, Debug)]
pub struct Clip {
    pub name: String,
    pub duration: f32,
    pub channels: Vec<Channel>,
}
impl Clip {
    /// Duration is the last keyframe time over all channels
    pub fn new(name: impl Into<String>, channels: Vec<Channel>) -> Self {
        let duration = channels
            .iter()
            .filter_map(|c| c.times.last().copied())
            .fold(0.0_f32, f32::max);
        Self { name: name.into(), duration, channels }
    }
}


/// Finds the keyframe segment containing `t` and the blend factor inside it.
/// Clamps to the first/last key outside the track.
fn locate(times: &[f32], t: f32, interpolation: Interpolation) -> (usize, usize, f32) {
    let last = times.len() - 1;
    if t <= times[0] {
        return (0, 0, 0.0);
    }
    if t >= times[last] {
        return (last, last, 0.0);
    }
    let i = times.partition_point(|&k| k <= t) - 1;
    let span = times[i + 1] - times[i];
    let f = match interpolation {
        Interpolation::Step => 0.0,
        Interpolation::Linear if span > 0.0 => (t - times[i]) / span,
        Interpolation::Linear => 0.0,
    };
    (i, i + 1, f)
}

pub fn sample_vec3(times: &[f32], values: &[Vec3], t: f32, interpolation: Interpolation) -> Option<Vec3> {
    if times.is_empty() || values.len() < times.len() {
        return None;
    }
    let (a, b, f) = locate(times, t, interpolation);
    Some(values[a] + (values[b] - values[a]) * f)
}

pub fn sample_quat(times: &[f32], values: &[Quat], t: f32, interpolation: Interpolation) -> Option<Quat> {
    if times.is_empty() || values.len() < times.len() {
        return None;
    }
    let (a, b, f) = locate(times, t, interpolation);
    if a == b || f == 0.0 {
        return Some(values[a]);
    }
    // shortest path
    let to = if values[a].dot(values[b]) < 0.0 { -values[b] } else { values[b] };
    Some(values[a].slerp(to, f).normalize())
}


/// Playback state of one clip
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimationAction {
    pub clip: usize,
    pub time: f32,
    pub looping: bool,
}


/// Drives keyframe clips on the nodes of an instantiated model
#[derive(Clone, Debug)]
pub struct AnimationMixer {
    clips: Arc<Vec<Clip>>,
    bindings: Vec<Option<NodeId>>,
    action: Option<AnimationAction>,
}
impl AnimationMixer {
    pub fn new(clips: Arc<Vec<Clip>>, bindings: Vec<Option<NodeId>>) -> Self {
        Self { clips, bindings, action: None }
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    pub fn action(&self) -> Option<&AnimationAction> {
        self.action.as_ref()
    }

    /// Starts clip `index` from time 0, looping forever. Returns false if there is no such clip.
    pub fn play(&mut self, index: usize) -> bool {
        if index >= self.clips.len() {
            return false;
        }
        self.action = Some(AnimationAction { clip: index, time: 0.0, looping: true });
        true
    }

    /// Advances the active action by `delta` seconds and writes the sampled
    /// transforms into the bound nodes
    pub fn update(&mut self, delta: f32, graph: &mut SceneGraph) {
        let Some(action) = self.action.as_mut() else { return };
        let clip = &self.clips[action.clip];

        action.time += delta;
        if action.looping && clip.duration > 0.0 {
            action.time = action.time.rem_euclid(clip.duration);
        } else {
            action.time = action.time.clamp(0.0, clip.duration);
        }
        let t = action.time;

        for channel in &clip.channels {
            let Some(&Some(node)) = self.bindings.get(channel.target) else { continue };
            if graph.get(node).is_none() {
                continue;
            }
            let transform = &mut graph.node_mut(node).transform;
            match &channel.values {
                ChannelValues::Translations(v) => {
                    if let Some(x) = sample_vec3(&channel.times, v, t, channel.interpolation) {
                        transform.translation = x;
                    }
                }
                ChannelValues::Rotations(v) => {
                    if let Some(q) = sample_quat(&channel.times, v, t, channel.interpolation) {
                        transform.rotation = q;
                    }
                }
                ChannelValues::Scales(v) => {
                    if let Some(s) = sample_vec3(&channel.times, v, t, channel.interpolation) {
                        transform.scale = s;
                    }
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use three_d::vec3;
    use crate::graph::{rotation_y, Node};
    use crate::utils::are_floats_equal;

    fn slide_clip() -> Clip {
        Clip::new(
            "slide",
            vec![Channel {
                target: 0,
                times: vec![0.0, 1.0],
                values: ChannelValues::Translations(vec![vec3(0.0, 0.0, 0.0), vec3(2.0, 0.0, 0.0)]),
                interpolation: Interpolation::Linear,
            }],
        )
    }

    #[test]
    fn sampling_clamps_and_interpolates() {
        let times = [1.0, 2.0, 4.0];
        let values = [vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0), vec3(3.0, 0.0, 0.0)];
        let at = |t| sample_vec3(&times, &values, t, Interpolation::Linear).unwrap().x;
        assert!(are_floats_equal(at(0.0), 0.0, 1e-6));
        assert!(are_floats_equal(at(1.5), 0.5, 1e-6));
        assert!(are_floats_equal(at(3.0), 2.0, 1e-6));
        assert!(are_floats_equal(at(9.0), 3.0, 1e-6));

        let step = sample_vec3(&times, &values, 3.9, Interpolation::Step).unwrap();
        assert!(are_floats_equal(step.x, 1.0, 1e-6));
    }

    #[test]
    fn quaternion_sampling_halfway() {
        let a = rotation_y(0.0);
        let b = rotation_y(std::f32::consts::FRAC_PI_2);
        let q = sample_quat(&[0.0, 1.0], &[a, b], 0.5, Interpolation::Linear).unwrap();
        let expected = rotation_y(std::f32::consts::FRAC_PI_4);
        assert!(are_floats_equal(q.dot(expected).abs(), 1.0, 1e-5));
    }

    #[test]
    fn mixer_plays_first_clip_from_zero_and_loops() {
        let mut graph = SceneGraph::new();
        let node = graph.add(graph.root(), Node::new("animated"));
        let mut mixer = AnimationMixer::new(Arc::new(vec![slide_clip()]), vec![Some(node)]);

        mixer.update(0.5, &mut graph);
        assert_eq!(graph.node(node).transform.translation.x, 0.0, "no action before play");

        assert!(mixer.play(0));
        assert_eq!(mixer.action().unwrap().time, 0.0);
        mixer.update(0.0, &mut graph);
        assert!(are_floats_equal(graph.node(node).transform.translation.x, 0.0, 1e-6));
        mixer.update(0.5, &mut graph);
        assert!(are_floats_equal(graph.node(node).transform.translation.x, 1.0, 1e-6));
        mixer.update(0.75, &mut graph);
        assert!(are_floats_equal(mixer.action().unwrap().time, 0.25, 1e-6));
        assert!(are_floats_equal(graph.node(node).transform.translation.x, 0.5, 1e-6));
    }

    #[test]
    fn play_rejects_missing_clip_and_ignores_unbound_targets() {
        let mut graph = SceneGraph::new();
        let mut mixer = AnimationMixer::new(Arc::new(vec![slide_clip()]), vec![None]);
        assert!(!mixer.play(3));
        assert!(mixer.play(0));
        mixer.update(0.5, &mut graph);
        assert_eq!(graph.len(), 1);
    }
}
