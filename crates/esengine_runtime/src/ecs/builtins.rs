//! Builtin component shapes and engine resources
//!
//! Defaults mirror the native engine's component structs.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ComponentDef, ComponentKind, ResourceDef};

fn builtin(name: &str, default: serde_json::Value) -> ComponentDef {
    ComponentDef::from_shape(
        name,
        ComponentKind::Builtin {
            type_name: name.to_string(),
        },
        default,
    )
}

/// Position, rotation, and scale relative to the parent
pub fn local_transform() -> ComponentDef {
    builtin(
        "LocalTransform",
        json!({
            "position": { "x": 0.0, "y": 0.0, "z": 0.0 },
            "rotation": { "w": 1.0, "x": 0.0, "y": 0.0, "z": 0.0 },
            "scale": { "x": 1.0, "y": 1.0, "z": 1.0 },
        }),
    )
}

/// World-space transform written by transform propagation
pub fn world_transform() -> ComponentDef {
    builtin(
        "WorldTransform",
        json!({
            "position": { "x": 0.0, "y": 0.0, "z": 0.0 },
            "rotation": { "w": 1.0, "x": 0.0, "y": 0.0, "z": 0.0 },
            "scale": { "x": 1.0, "y": 1.0, "z": 1.0 },
        }),
    )
}

/// Linear and angular velocity
pub fn velocity() -> ComponentDef {
    builtin(
        "Velocity",
        json!({
            "linear": { "x": 0.0, "y": 0.0, "z": 0.0 },
            "angular": { "x": 0.0, "y": 0.0, "z": 0.0 },
        }),
    )
}

/// Camera projection parameters
pub fn camera() -> ComponentDef {
    builtin(
        "Camera",
        json!({
            "projectionType": 0,
            "fov": 60.0,
            "orthoSize": 5.0,
            "nearPlane": 0.1,
            "farPlane": 1000.0,
            "aspectRatio": 0.0,
            "isActive": false,
            "priority": 0,
        }),
    )
}

/// Textured quad with a color tint
pub fn sprite() -> ComponentDef {
    builtin(
        "Sprite",
        json!({
            "texture": 0,
            "color": { "r": 1.0, "g": 1.0, "b": 1.0, "a": 1.0 },
            "size": { "x": 1.0, "y": 1.0 },
            "uvOffset": { "x": 0.0, "y": 0.0 },
            "uvScale": { "x": 1.0, "y": 1.0 },
            "layer": 0,
            "flipX": false,
            "flipY": false,
        }),
    )
}

/// Physics body settings
pub fn rigid_body() -> ComponentDef {
    builtin(
        "RigidBody",
        json!({
            "bodyType": 2,
            "gravityScale": 1.0,
            "linearDamping": 0.0,
            "angularDamping": 0.0,
            "fixedRotation": false,
            "bullet": false,
            "enabled": true,
        }),
    )
}

/// Every builtin component
pub fn components() -> Vec<ComponentDef> {
    vec![
        local_transform(),
        world_transform(),
        velocity(),
        camera(),
        sprite(),
        rigid_body(),
    ]
}

/// Frame timing, updated by the frame driver before `PreUpdate`
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Time {
    /// Seconds since the previous frame, clamped
    pub delta: f32,
    /// Seconds since the first frame
    pub elapsed: f32,
    /// Frames run so far
    pub frame_count: u64,
}

/// Fixed-step timing, updated before each fixed step
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedTime {
    /// Seconds per fixed step
    pub delta: f32,
    /// Simulated seconds across all fixed steps
    pub elapsed: f32,
}

/// The `Time` resource
pub fn time() -> ResourceDef {
    ResourceDef::new(
        "Time",
        json!({ "delta": 0, "elapsed": 0, "frameCount": 0 }),
    )
}

/// The `FixedTime` resource
pub fn fixed_time() -> ResourceDef {
    ResourceDef::new("FixedTime", json!({ "delta": 0, "elapsed": 0 }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_builtin() {
        for def in components() {
            assert!(def.is_builtin(), "{} should be builtin", def.name());
            assert_eq!(def.type_name(), Some(def.name()));
        }
    }

    #[test]
    fn test_time_default_decodes() {
        let time: Time = serde_json::from_value(super::time().default_value().clone()).unwrap();
        assert_eq!(time, Time::default());
    }
}
