//! HMD configuration
//!
//! Loaded from TOML and then overridden from the environment.
//!
//! # Example
//!
//! ```toml
//! reference_space = "Stage"   # View, Local, Stage
//! near = 0.01
//! far = 100.0                 # far <= near selects an infinite far plane
//! debug = true
//!
//! [application]
//! name = "Gallery"
//! version = { major = 1, minor = 2 }
//!
//! [swapchain]
//! sample_count = 4
//! ```
//!
//! # Environment
//!
//! - `VOID_HMD_REFERENCE_SPACE`: `View`, `Local` or `Stage`
//! - `VOID_HMD_NEAR` / `VOID_HMD_FAR`: clip distances
//! - `VOID_HMD_DEBUG`: `1` or `true` enables the runtime debug messenger

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HmdError, HmdResult};
use crate::projection::{ClipSpace, CoordinateSystem};
use crate::types::{
    EnvironmentBlendMode, FormFactor, ReferenceSpaceKind, Version, ViewConfigurationType,
};

/// Application identity reported to the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    pub version: Version,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Unknown application".to_string(),
            version: Version::new(0, 0, 0),
        }
    }
}

/// Per-view swapchain overrides; unset fields use the runtime's recommendation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapchainConfig {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_count: Option<u32>,
    /// Preferred graphics format, tried before the built-in preferences
    pub format: Option<i64>,
}

/// Full HMD client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HmdConfig {
    pub application: ApplicationConfig,
    /// Explicit extension list; `None` auto-discovers
    pub extensions: Option<Vec<String>>,
    /// Route runtime debug messages into the log
    pub debug: bool,
    pub form_factor: FormFactor,
    pub view_configuration: ViewConfigurationType,
    pub reference_space: ReferenceSpaceKind,
    pub near: f32,
    pub far: f32,
    pub blend_mode: EnvironmentBlendMode,
    pub clip_space: ClipSpace,
    pub coordinate_system: CoordinateSystem,
    pub swapchain: SwapchainConfig,
}

impl Default for HmdConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            extensions: None,
            debug: false,
            form_factor: FormFactor::HeadMountedDisplay,
            view_configuration: ViewConfigurationType::PrimaryStereo,
            reference_space: ReferenceSpaceKind::Stage,
            near: 0.01,
            far: 100.0,
            blend_mode: EnvironmentBlendMode::Opaque,
            clip_space: ClipSpace::OpenGl,
            coordinate_system: CoordinateSystem::ZUpRightHanded,
            swapchain: SwapchainConfig::default(),
        }
    }
}

impl HmdConfig {
    /// Read a TOML file. Environment overrides are not applied.
    pub fn load(path: impl AsRef<Path>) -> HmdResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| HmdError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        log::info!("Loaded HMD config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> HmdResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| HmdError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> HmdResult<String> {
        toml::to_string_pretty(self).map_err(|e| HmdError::Config(e.to_string()))
    }

    /// Apply `VOID_HMD_*` variables from the process environment
    pub fn apply_env_overrides(&mut self) -> HmdResult<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> HmdResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(space) = lookup("VOID_HMD_REFERENCE_SPACE") {
            self.reference_space = space.trim().parse()?;
            log::info!("Reference space from env: {}", self.reference_space);
        }

        if let Some(near) = lookup("VOID_HMD_NEAR") {
            self.near = parse_distance("VOID_HMD_NEAR", &near)?;
        }

        if let Some(far) = lookup("VOID_HMD_FAR") {
            self.far = parse_distance("VOID_HMD_FAR", &far)?;
        }

        if let Some(debug) = lookup("VOID_HMD_DEBUG") {
            self.debug = matches!(debug.trim(), "1" | "true" | "yes" | "on");
        }

        self.validate()
    }

    pub fn validate(&self) -> HmdResult<()> {
        if !(self.near.is_finite() && self.near > 0.0) {
            return Err(HmdError::Config(format!(
                "near clip distance must be positive, got {}",
                self.near
            )));
        }
        if self.far.is_nan() {
            return Err(HmdError::Config("far clip distance is NaN".to_string()));
        }
        for (name, value) in [
            ("width", self.swapchain.width),
            ("height", self.swapchain.height),
            ("sample_count", self.swapchain.sample_count),
        ] {
            if value == Some(0) {
                return Err(HmdError::Config(format!("swapchain {} must be non-zero", name)));
            }
        }
        Ok(())
    }

    /// True when the far plane is at infinity
    pub fn infinite_far(&self) -> bool {
        self.far <= self.near
    }
}

fn parse_distance(key: &str, value: &str) -> HmdResult<f32> {
    value
        .trim()
        .parse::<f32>()
        .map_err(|e| HmdError::Config(format!("{}='{}': {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = HmdConfig::default();
        assert_eq!(config.application.name, "Unknown application");
        assert_eq!(config.application.version, Version::new(0, 0, 0));
        assert_eq!(config.reference_space, ReferenceSpaceKind::Stage);
        assert_eq!(config.near, 0.01);
        assert_eq!(config.far, 100.0);
        assert!(config.extensions.is_none());
        assert!(!config.infinite_far());
    }

    #[test]
    fn test_parse_toml() {
        let config = HmdConfig::from_toml_str(
            r#"
            reference_space = "Local"
            far = 0.0
            debug = true
            extensions = ["XR_KHR_opengl_enable"]

            [application]
            name = "Gallery"
            version = { major = 1, minor = 2 }

            [swapchain]
            sample_count = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.reference_space, ReferenceSpaceKind::Local);
        assert!(config.infinite_far());
        assert!(config.debug);
        assert_eq!(config.application.name, "Gallery");
        assert_eq!(config.application.version, Version::new(1, 2, 0));
        assert_eq!(config.swapchain.sample_count, Some(4));
        assert_eq!(config.swapchain.width, None);
        assert_eq!(
            config.extensions.as_deref(),
            Some(&["XR_KHR_opengl_enable".to_string()][..])
        );
    }

    #[test]
    fn test_unknown_reference_space_rejected() {
        let err = HmdConfig::from_toml_str(r#"reference_space = "Floor""#).unwrap_err();
        assert!(matches!(err, HmdError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("VOID_HMD_REFERENCE_SPACE", "View"),
            ("VOID_HMD_NEAR", "0.05"),
            ("VOID_HMD_FAR", "500"),
            ("VOID_HMD_DEBUG", "1"),
        ]
        .into_iter()
        .collect();

        let mut config = HmdConfig::default();
        config
            .apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.reference_space, ReferenceSpaceKind::View);
        assert_eq!(config.near, 0.05);
        assert_eq!(config.far, 500.0);
        assert!(config.debug);
    }

    #[test]
    fn test_env_override_errors() {
        let mut config = HmdConfig::default();
        let err = config
            .apply_overrides_from(|key| (key == "VOID_HMD_REFERENCE_SPACE").then(|| "Floor".into()))
            .unwrap_err();
        assert_eq!(err, HmdError::UnknownReferenceSpace("Floor".into()));

        let mut config = HmdConfig::default();
        let err = config
            .apply_overrides_from(|key| (key == "VOID_HMD_NEAR").then(|| "-1".into()))
            .unwrap_err();
        assert!(matches!(err, HmdError::Config(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = HmdConfig::default();
        config.swapchain.format = Some(0x8C43);
        let text = config.to_toml_string().unwrap();
        assert_eq!(HmdConfig::from_toml_str(&text).unwrap(), config);
    }
}
