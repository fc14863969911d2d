//! Scene description loaded from YAML.
//!
//! Every field has a default, so a scene file only states what differs. An
//! empty file yields the built-in demo map.

use crate::SceneError;
use glam::Vec3;
use lumen_assets::ShapeRegistry;
use lumen_render::LightKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub camera: CameraConfig,
    pub clear_color: [f32; 4],
    /// OBJ models registered as `<assets>/<name>/<name>.obj`.
    pub models: Vec<String>,
    pub instances: Vec<InstanceConfig>,
    pub lights: Vec<LightConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub position: Vec3,
    pub target: Vec3,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: Vec3::new(20.0, 25.0, 40.0),
            target: Vec3::new(0.0, 10.0, 0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub mesh: String,
    #[serde(default)]
    pub position: Vec3,
    #[serde(default = "one")]
    pub size: Vec3,
    #[serde(default = "one")]
    pub color: Vec3,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub animations: Vec<Animation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub axis: Vec3,
    pub degrees: f32,
}

/// Time-driven change to an instance's placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Animation {
    /// Uniform size `base + amplitude * cos(t * frequency)`.
    Pulse {
        base: f32,
        amplitude: f32,
        frequency: f32,
    },
    /// Offset `direction * amplitude * sin(t * frequency - phase)`.
    Sway {
        direction: Vec3,
        amplitude: f32,
        frequency: f32,
        #[serde(default)]
        phase_degrees: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightKindConfig {
    Directional,
    Positional,
    Spot,
}

impl From<LightKindConfig> for LightKind {
    fn from(kind: LightKindConfig) -> Self {
        match kind {
            LightKindConfig::Directional => LightKind::Directional,
            LightKindConfig::Positional => LightKind::Positional,
            LightKindConfig::Spot => LightKind::Spot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightConfig {
    pub kind: LightKindConfig,
    #[serde(default)]
    pub direction: Vec3,
    #[serde(default)]
    pub position: Vec3,
    #[serde(default = "one")]
    pub color: Vec3,
    #[serde(default = "default_range")]
    pub range: f32,
    #[serde(default)]
    pub inner_degrees: f32,
    #[serde(default)]
    pub outer_degrees: f32,
    /// Directional lights only: circle the sky instead of holding `direction`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orbit: Option<Orbit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Orbit {
    /// Elevation below the horizon, in degrees.
    pub tilt_degrees: f32,
    /// Degrees per second around the Y axis.
    pub speed_degrees: f32,
}

impl Default for Orbit {
    fn default() -> Self {
        Self {
            tilt_degrees: 45.0,
            speed_degrees: 10.0,
        }
    }
}

fn one() -> Vec3 {
    Vec3::ONE
}

fn default_range() -> f32 {
    100.0
}

impl Default for SceneConfig {
    fn default() -> Self {
        demo_map()
    }
}

impl SceneConfig {
    pub fn from_yaml(text: &str) -> Result<Self, SceneError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_yaml(&self) -> Result<String, SceneError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SceneError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SceneError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Register this scene's OBJ models found under `assets`.
    pub fn register_models(&self, registry: &mut ShapeRegistry, assets: impl AsRef<Path>) {
        for name in &self.models {
            registry.register_obj_dir(assets.as_ref(), name);
        }
    }

    /// Mesh names used by at least one instance, sorted and unique.
    pub fn referenced_meshes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.instances.iter().map(|i| i.mesh.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

fn placed(mesh: &str, position: [f32; 3], size: [f32; 3], color: [f32; 3]) -> InstanceConfig {
    InstanceConfig {
        mesh: mesh.to_string(),
        position: Vec3::from_array(position),
        size: Vec3::from_array(size),
        color: Vec3::from_array(color),
        rotation: None,
        animations: Vec::new(),
    }
}

fn turned(mut instance: InstanceConfig, axis: Vec3, degrees: f32) -> InstanceConfig {
    instance.rotation = Some(Rotation { axis, degrees });
    instance
}

/// The demo map: a tower ringed by wedges, rows of cylinders and spheres,
/// an open box and a pulsing red sphere, lit by an orbiting sun, three spots
/// and two point lights.
fn demo_map() -> SceneConfig {
    const GRAY: [f32; 3] = [0.772, 0.772, 0.772];
    const RED: [f32; 3] = [0.769, 0.157, 0.110];
    const WEDGE: [f32; 3] = [45.0, 30.0, 15.0];
    const COLUMN: [f32; 3] = [15.0, 25.0, 15.0];
    const BALL: [f32; 3] = [50.0, 50.0, 50.0];
    const CORNER: [f32; 3] = [25.0, 15.0, 50.0];

    let mut instances = vec![
        placed("Box", [0.0, -2.5, 0.0], [512.0, 5.0, 512.0], [0.640, 0.636, 0.648]),
        placed("Box", [0.0, 15.0, 0.0], [15.0, 30.0, 15.0], [0.804, 0.330, 0.295]),
    ];
    for (position, degrees, color) in [
        ([30.0, 15.0, 0.0], 0.0, [0.483, 0.714, 0.910]),
        ([0.0, 15.0, -30.0], 90.0, [0.969, 0.946, 0.553]),
        ([-30.0, 15.0, 0.0], 180.0, [0.518, 0.714, 0.553]),
        ([0.0, 15.0, 30.0], 270.0, [0.420, 0.197, 0.487]),
    ] {
        instances.push(turned(placed("Wedge", position, WEDGE, color), Vec3::Y, degrees));
    }
    instances.extend([
        placed("CylinderLQ", [-50.0, 70.0, 50.0], COLUMN, [0.977, 0.914, 0.600]),
        placed("Cylinder", [50.0, 70.0, 50.0], COLUMN, [0.761, 0.855, 0.722]),
        placed("CylinderHQ", [50.0, 70.0, -50.0], COLUMN, [0.502, 0.734, 0.859]),
        placed("IcosphereULQ", [100.0, 70.0, 0.0], BALL, RED),
        placed("IcosphereLQ", [0.0, 70.0, 100.0], BALL, RED),
        placed("Icosphere", [-100.0, 70.0, 0.0], BALL, RED),
        placed("IcosphereHQ", [0.0, 70.0, -100.0], BALL, RED),
        placed("CornerWedgeInner", [-50.0, 70.0, -50.0], CORNER, [0.800, 0.557, 0.412]),
        placed("CornerWedgeOuter", [0.0, 70.0, 0.0], CORNER, [0.632, 0.769, 0.550]),
    ]);

    let mut heart = turned(
        placed("IcosphereLQ", [-70.0, 10.0, -80.0], [5.0, 5.0, 5.0], [0.9, 0.0, 0.0]),
        Vec3::NEG_X,
        90.0,
    );
    heart.animations = vec![
        Animation::Pulse {
            base: 2.5,
            amplitude: 0.125,
            frequency: 6.0,
        },
        Animation::Sway {
            direction: Vec3::X,
            amplitude: 20.0,
            frequency: 2.0,
            phase_degrees: 30.0,
        },
    ];
    instances.push(heart);

    // open box: floor, four walls, lid
    let base = Vec3::new(120.0, 30.0, -80.0);
    for (offset, size) in [
        ([0.0, -25.0, 0.0], [102.0, 5.0, 102.0]),
        ([0.0, 0.0, 50.0], [100.0, 50.0, 5.0]),
        ([0.0, 0.0, -50.0], [100.0, 50.0, 5.0]),
        ([50.0, 0.0, 0.0], [5.0, 50.0, 100.0]),
        ([-50.0, 0.0, 0.0], [5.0, 50.0, 100.0]),
        ([0.0, 25.0, 0.0], [102.0, 5.0, 102.0]),
    ] {
        let position = (base + Vec3::from_array(offset)).to_array();
        instances.push(placed("Box", position, size, GRAY));
    }
    instances.push(placed("Cylinder", [-125.0, 75.0, -150.0], [1.0, 1.0, 1.0], [1.0, 0.5, 0.25]));

    let spot = |direction: Vec3, position: Vec3, color: [f32; 3], range, inner, outer| {
        LightConfig {
            kind: LightKindConfig::Spot,
            direction,
            position,
            color: Vec3::from_array(color),
            range,
            inner_degrees: inner,
            outer_degrees: outer,
            orbit: None,
        }
    };
    let point = |color: [f32; 3]| LightConfig {
        kind: LightKindConfig::Positional,
        direction: Vec3::ZERO,
        position: Vec3::ZERO,
        color: Vec3::from_array(color),
        range: 1500.0,
        inner_degrees: 0.0,
        outer_degrees: 0.0,
        orbit: None,
    };
    let lights = vec![
        LightConfig {
            kind: LightKindConfig::Directional,
            direction: Vec3::new(-0.5, -1.0, -0.5),
            position: Vec3::ZERO,
            color: Vec3::new(1.0, 0.941, 0.914),
            range: 8000.0,
            inner_degrees: 10.0,
            outer_degrees: 12.0,
            orbit: Some(Orbit::default()),
        },
        spot(Vec3::new(-0.5, -1.0, -0.5), Vec3::ZERO, [1.0, 0.96, 0.61], 1500.0, 15.0, 18.0),
        spot(Vec3::ZERO, Vec3::new(2.0, 3.0, 2.0), [0.61, 0.96, 1.0], 1500.0, 15.0, 18.0),
        spot(Vec3::ZERO, Vec3::new(2.0, 3.0, 2.0), [1.0, 1.0, 1.0], 800.0, 25.0, 35.0),
        point([1.0, 0.847, 0.725]),
        point([0.725, 0.847, 1.0]),
    ];

    SceneConfig {
        camera: CameraConfig::default(),
        clear_color: [0.6745, 0.9098, 0.9804, 1.0],
        models: Vec::new(),
        instances,
        lights,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SCENE_FILE: &str = include_str!("../../../scenes/default.yaml");

    #[test]
    fn empty_yaml_is_the_demo_map() {
        let config = SceneConfig::from_yaml("{}").unwrap();
        assert_eq!(config, SceneConfig::default());
        assert_eq!(config.lights.len(), 6);
    }

    #[test]
    fn shipped_scene_matches_demo_layout() {
        let file = SceneConfig::from_yaml(SCENE_FILE).unwrap();
        let demo = SceneConfig::default();
        assert_eq!(file.instances.len(), demo.instances.len());
        assert_eq!(file.referenced_meshes(), demo.referenced_meshes());
        assert_eq!(file.lights.len(), demo.lights.len());
        assert_eq!(file.camera, demo.camera);
        assert!(file.lights[0].orbit.is_some());
    }

    #[test]
    fn partial_instance_uses_defaults() {
        let config = SceneConfig::from_yaml(
            "instances:\n  - mesh: Box\n    position: [1, 2, 3]\nlights: []\n",
        )
        .unwrap();
        let box_ = &config.instances[0];
        assert_eq!(box_.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(box_.size, Vec3::ONE);
        assert_eq!(box_.color, Vec3::ONE);
        assert!(box_.rotation.is_none());
        assert!(config.lights.is_empty());
    }

    #[test]
    fn animations_are_tagged() {
        let yaml = "\
instances:
  - mesh: Icosphere
    animations:
      - type: pulse
        base: 2.0
        amplitude: 0.5
        frequency: 3.0
      - type: sway
        direction: [0, 1, 0]
        amplitude: 4.0
        frequency: 1.0
";
        let config = SceneConfig::from_yaml(yaml).unwrap();
        let animations = &config.instances[0].animations;
        assert_eq!(animations.len(), 2);
        assert!(matches!(
            animations[1],
            Animation::Sway { phase_degrees, .. } if phase_degrees == 0.0
        ));
    }

    #[test]
    fn yaml_round_trip() {
        let demo = SceneConfig::default();
        let text = demo.to_yaml().unwrap();
        assert_eq!(SceneConfig::from_yaml(&text).unwrap(), demo);
    }

    #[test]
    fn bad_yaml_is_an_error() {
        let err = SceneConfig::from_yaml("lights: [{kind: laser}]").unwrap_err();
        assert!(matches!(err, SceneError::Yaml(_)));
    }

    #[test]
    fn load_from_disk_and_register_models() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"models: [heart]\ninstances:\n  - mesh: heart\n").unwrap();
        let config = SceneConfig::load(file.path()).unwrap();
        assert_eq!(config.referenced_meshes(), vec!["heart"]);

        let mut registry = ShapeRegistry::new();
        config.register_models(&mut registry, "/assets");
        assert!(registry.contains("heart"));

        let missing = SceneConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(missing, SceneError::Io { .. }));
    }
}
