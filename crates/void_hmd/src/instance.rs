//! Runtime instance bootstrap
//!
//! Negotiates API layers and extensions, optionally installs the debug
//! messenger, and owns the instance handle for the lifetime of the client.

use crate::error::{HmdError, HmdResult};
use crate::handle::InstanceHandle;
use crate::runtime::{DebugSink, SharedRuntime};
use crate::types::{
    ApplicationInfo, DebugMessage, DebugSeverity, ExtensionProperties, InstanceCreateInfo,
    RuntimeProperties, Version,
};

/// OpenGL graphics binding extension
pub const KHR_OPENGL_ENABLE: &str = "XR_KHR_opengl_enable";
/// Debug messenger extension
pub const EXT_DEBUG_UTILS: &str = "XR_EXT_debug_utils";

/// Instance creation options
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub application_name: String,
    pub application_version: Version,
    /// Explicit extension list; `None` auto-discovers
    pub extensions: Option<Vec<String>>,
    pub api_layers: Vec<String>,
    /// Forward runtime debug messages into the log
    pub debug: bool,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            application_name: "Unknown application".to_string(),
            application_version: Version::new(0, 0, 0),
            extensions: None,
            api_layers: Vec::new(),
            debug: false,
        }
    }
}

/// Log level a runtime debug message is reported at
pub fn debug_log_level(severity: DebugSeverity) -> log::Level {
    if severity.contains(DebugSeverity::ERROR) {
        log::Level::Error
    } else if severity.contains(DebugSeverity::WARNING) {
        log::Level::Warn
    } else if severity.contains(DebugSeverity::INFO) {
        log::Level::Info
    } else if severity.contains(DebugSeverity::VERBOSE) {
        log::Level::Debug
    } else {
        log::Level::Error
    }
}

fn log_debug_message(message: &DebugMessage) {
    log::log!(
        debug_log_level(message.severity),
        "{}: {}",
        message.function_name,
        message.message
    );
}

/// Pick the extensions to enable from what the runtime offers
pub fn select_extensions(
    available: &[ExtensionProperties],
    requested: Option<&[String]>,
) -> HmdResult<Vec<String>> {
    let offered = |name: &str| available.iter().any(|e| e.name == name);

    match requested {
        Some(list) => {
            if let Some(missing) = list.iter().find(|name| !offered(name)) {
                return Err(HmdError::MissingExtension(missing.clone()));
            }
            Ok(list.to_vec())
        }
        None => {
            let mut enabled = Vec::new();
            if offered(KHR_OPENGL_ENABLE) {
                enabled.push(KHR_OPENGL_ENABLE.to_string());
                if offered(EXT_DEBUG_UTILS) {
                    enabled.push(EXT_DEBUG_UTILS.to_string());
                }
            }
            Ok(enabled)
        }
    }
}

/// Live connection to the runtime
pub struct Instance {
    runtime: SharedRuntime,
    handle: InstanceHandle,
    extensions: Vec<String>,
    properties: RuntimeProperties,
}

impl Instance {
    pub fn new(runtime: SharedRuntime, config: &InstanceConfig) -> HmdResult<Self> {
        let layers = runtime.enumerate_api_layers()?;
        log::info!("Available API layers: {}", layers.len());
        for layer in &layers {
            log::info!(
                "  {} v{} (spec {}): {}",
                layer.name,
                layer.layer_version,
                layer.spec_version,
                layer.description
            );
            for ext in runtime.enumerate_extensions(Some(&layer.name))? {
                log::debug!("    - {} v{}", ext.name, ext.version);
            }
        }

        let available = runtime.enumerate_extensions(None)?;
        log::info!("Available runtime extensions:");
        for ext in &available {
            log::info!("  - {} v{}", ext.name, ext.version);
        }

        let extensions = select_extensions(&available, config.extensions.as_deref())?;
        if !extensions.iter().any(|e| e == KHR_OPENGL_ENABLE) {
            return Err(HmdError::MissingExtension(KHR_OPENGL_ENABLE.to_string()));
        }
        log::info!("Enabling extensions: {:?}", extensions);

        let debug_utils = config.debug && extensions.iter().any(|e| e == EXT_DEBUG_UTILS);
        let info = InstanceCreateInfo {
            application: ApplicationInfo {
                application_name: config.application_name.clone(),
                application_version: config.application_version,
                engine_name: env!("CARGO_PKG_NAME").to_string(),
                engine_version: Version::new(0, 1, 0),
                api_version: Version::new(1, 0, 0),
            },
            enabled_extensions: extensions.clone(),
            enabled_api_layers: config.api_layers.clone(),
            debug_severities: debug_utils.then_some(DebugSeverity::ALL),
        };
        let sink: Option<DebugSink> = if debug_utils {
            Some(Box::new(log_debug_message) as DebugSink)
        } else {
            None
        };

        let handle = runtime.create_instance(&info, sink)?;
        let properties = runtime.instance_properties(handle)?;
        log::info!(
            "Runtime: {} {}",
            properties.runtime_name,
            properties.runtime_version
        );

        Ok(Self {
            runtime,
            handle,
            extensions,
            properties,
        })
    }

    pub fn handle(&self) -> InstanceHandle {
        self.handle
    }

    pub fn runtime(&self) -> &SharedRuntime {
        &self.runtime
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }

    pub fn properties(&self) -> &RuntimeProperties {
        &self.properties
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        if let Err(e) = self.runtime.destroy_instance(self.handle) {
            log::error!("Failed to destroy instance: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(name: &str) -> ExtensionProperties {
        ExtensionProperties {
            name: name.to_string(),
            version: 1,
        }
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(debug_log_level(DebugSeverity::VERBOSE), log::Level::Debug);
        assert_eq!(debug_log_level(DebugSeverity::INFO), log::Level::Info);
        assert_eq!(debug_log_level(DebugSeverity::WARNING), log::Level::Warn);
        assert_eq!(debug_log_level(DebugSeverity::ERROR), log::Level::Error);
        assert_eq!(debug_log_level(DebugSeverity::empty()), log::Level::Error);
    }

    #[test]
    fn test_auto_discovery() {
        let all = [ext(EXT_DEBUG_UTILS), ext(KHR_OPENGL_ENABLE), ext("XR_EXT_hand_tracking")];
        assert_eq!(
            select_extensions(&all, None).unwrap(),
            vec![KHR_OPENGL_ENABLE.to_string(), EXT_DEBUG_UTILS.to_string()]
        );

        // Debug utils only rides along with the graphics extension
        assert!(select_extensions(&[ext(EXT_DEBUG_UTILS)], None).unwrap().is_empty());
    }

    #[test]
    fn test_explicit_extension_must_exist() {
        let all = [ext(KHR_OPENGL_ENABLE)];
        let requested = vec![KHR_OPENGL_ENABLE.to_string(), EXT_DEBUG_UTILS.to_string()];
        assert_eq!(
            select_extensions(&all, Some(&requested)),
            Err(HmdError::MissingExtension(EXT_DEBUG_UTILS.to_string()))
        );
    }
}
