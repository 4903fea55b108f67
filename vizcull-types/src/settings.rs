use glam::{UVec2, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{MAX_ENCODABLE_MESHLET_INSTANCES, MAX_MESHLET_INSTANCES, MAX_MESH_INSTANCES};

/// Fixed capacities of the per-frame GPU buffers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderLimits {
    pub max_mesh_instances: u32,
    pub max_meshlet_instances: u32,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            max_mesh_instances: MAX_MESH_INSTANCES,
            max_meshlet_instances: MAX_MESHLET_INSTANCES,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VsmSettings {
    pub enable: bool,
    /// Half extent in world units of the first clip level.
    pub clip_0_scale: f32,
    pub clip_0_near: f32,
    pub clip_0_far: f32,
    /// Distance of the first clip's eye above the camera, along the sun direction.
    pub clip_0_height_offset: f32,
    /// Direction towards the sun.
    pub sun_direction: Vec3,
}

impl Default for VsmSettings {
    fn default() -> Self {
        Self {
            enable: false,
            clip_0_scale: 2.0,
            clip_0_near: 0.01,
            clip_0_far: 10.0,
            clip_0_height_offset: 5.0,
            sun_direction: Vec3::new(0.3, 0.4, 0.87),
        }
    }
}

/// Renderer configuration. Every field is optional when deserializing.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub render_target_size: UVec2,
    /// Frustum and occlusion cull meshes and meshlets. When off every mesh expands.
    pub cull_meshes: bool,
    /// Cull meshes with their previous transforms against last frame's HiZ.
    pub cull_against_last_frame: bool,
    pub enable_atomic_visbuffer: bool,
    pub enable_prefix_sum_work_expansion: bool,
    /// Enables per-triangle backface culling.
    pub enable_mesh_shader: bool,
    pub limits: RenderLimits,
    pub vsm: VsmSettings,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            render_target_size: UVec2::new(1280, 720),
            cull_meshes: true,
            cull_against_last_frame: false,
            enable_atomic_visbuffer: false,
            enable_prefix_sum_work_expansion: false,
            enable_mesh_shader: false,
            limits: RenderLimits::default(),
            vsm: VsmSettings::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Render target size {size} has a zero dimension")]
    ZeroSizedRenderTarget { size: UVec2 },
    #[error("{name} must be at least one")]
    ZeroCapacity { name: &'static str },
    #[error("max_meshlet_instances is {value} but triangle ids can only address {MAX_ENCODABLE_MESHLET_INSTANCES}")]
    UnencodableMeshletInstances { value: u32 },
    #[error("Virtual shadow map {name} is {value} which is not a positive finite number")]
    InvalidVsmParameter { name: &'static str, value: f32 },
    #[error("Virtual shadow map sun direction must be non zero")]
    ZeroSunDirection,
    #[error("Failed to parse settings")]
    Parse(#[source] serde_json::Error),
}

impl RenderSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.render_target_size.cmpeq(UVec2::ZERO).any() {
            return Err(SettingsError::ZeroSizedRenderTarget {
                size: self.render_target_size,
            });
        }
        if self.limits.max_mesh_instances == 0 {
            return Err(SettingsError::ZeroCapacity {
                name: "max_mesh_instances",
            });
        }
        if self.limits.max_meshlet_instances == 0 {
            return Err(SettingsError::ZeroCapacity {
                name: "max_meshlet_instances",
            });
        }
        if self.limits.max_meshlet_instances > MAX_ENCODABLE_MESHLET_INSTANCES {
            return Err(SettingsError::UnencodableMeshletInstances {
                value: self.limits.max_meshlet_instances,
            });
        }
        if self.vsm.enable {
            for (name, value) in [
                ("clip_0_scale", self.vsm.clip_0_scale),
                ("clip_0_near", self.vsm.clip_0_near),
                ("clip_0_far", self.vsm.clip_0_far),
                ("clip_0_height_offset", self.vsm.clip_0_height_offset),
            ] {
                if !value.is_finite() || value <= 0.0 {
                    return Err(SettingsError::InvalidVsmParameter { name, value });
                }
            }
            if self.vsm.sun_direction.length_squared() == 0.0 || !self.vsm.sun_direction.is_finite() {
                return Err(SettingsError::ZeroSunDirection);
            }
        }
        Ok(())
    }

    /// Parses and validates settings from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json).map_err(SettingsError::Parse)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String, SettingsError> {
        serde_json::to_string_pretty(self).map_err(SettingsError::Parse)
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.render_target_size.x as f32 / self.render_target_size.y as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = RenderSettings::default();
        assert_eq!(settings.render_target_size, UVec2::new(1280, 720));
        assert!(settings.cull_meshes);
        assert!(!settings.enable_atomic_visbuffer);
        assert_eq!(settings.limits.max_mesh_instances, 1 << 16);
        assert_eq!(settings.limits.max_meshlet_instances, 1 << 18);
        settings.validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings = RenderSettings::from_json(
            r#"{ "enable_atomic_visbuffer": true, "limits": { "max_mesh_instances": 128 } }"#,
        )
        .unwrap();
        assert!(settings.enable_atomic_visbuffer);
        assert_eq!(settings.limits.max_mesh_instances, 128);
        assert_eq!(settings.limits.max_meshlet_instances, MAX_MESHLET_INSTANCES);
        assert!(settings.cull_meshes);
    }

    #[test]
    fn json_round_trip() {
        let mut settings = RenderSettings::default();
        settings.vsm.enable = true;
        settings.render_target_size = UVec2::new(64, 32);
        let json = settings.to_json().unwrap();
        assert_eq!(RenderSettings::from_json(&json).unwrap(), settings);
    }

    #[test]
    fn rejects_invalid() {
        let mut settings = RenderSettings::default();
        settings.render_target_size = UVec2::new(0, 10);
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::ZeroSizedRenderTarget { .. })
        ));

        let mut settings = RenderSettings::default();
        settings.limits.max_meshlet_instances = u32::MAX;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::UnencodableMeshletInstances { .. })
        ));

        assert!(matches!(RenderSettings::from_json("{"), Err(SettingsError::Parse(_))));
    }
}
