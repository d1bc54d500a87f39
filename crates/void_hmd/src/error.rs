//! Error types for the HMD integration

use thiserror::Error;

/// HMD integration errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HmdError {
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Missing runtime extension: {0}")]
    MissingExtension(String),

    #[error("View configuration not supported: {0}")]
    ViewConfigurationUnsupported(String),

    #[error("Runtime reported no views for configuration {0}")]
    EmptyViewConfiguration(String),

    #[error("Graphics requirements not met: {0}")]
    GraphicsRequirements(String),

    #[error("Unknown reference space type '{0}'")]
    UnknownReferenceSpace(String),

    #[error("Session is not focused")]
    SessionNotFocused,

    #[error("Frame protocol violation: {0}")]
    FrameOrder(String),

    #[error("Swapchain misuse: {0}")]
    SwapchainState(String),

    #[error("Action set already attached")]
    ActionSetAttached,

    #[error("Action set not attached to the session")]
    ActionSetNotAttached,

    #[error("No pose action bound to subaction path '{0}'")]
    UnknownSubactionPath(String),

    #[error("Invalid {kind} handle")]
    InvalidHandle { kind: &'static str },

    #[error("Index {index} out of range for {len} {what}")]
    OutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Expected {expected} views, got {actual}")]
    ViewCountMismatch { expected: usize, actual: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl HmdError {
    /// Errors that abort startup rather than skip a frame
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedPlatform(_)
                | Self::MissingExtension(_)
                | Self::ViewConfigurationUnsupported(_)
                | Self::EmptyViewConfiguration(_)
                | Self::GraphicsRequirements(_)
        )
    }

    pub(crate) fn runtime(context: &str, err: impl core::fmt::Display) -> Self {
        Self::Runtime(format!("{}: {}", context, err))
    }
}

/// Result alias used throughout the crate
pub type HmdResult<T> = Result<T, HmdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(HmdError::MissingExtension("XR_KHR_opengl_enable".into()).is_fatal());
        assert!(HmdError::EmptyViewConfiguration("PRIMARY_STEREO".into()).is_fatal());
        assert!(!HmdError::SessionNotFocused.is_fatal());
        assert!(!HmdError::FrameOrder("end before begin".into()).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = HmdError::OutOfRange {
            what: "views",
            index: 3,
            len: 2,
        };
        assert_eq!(err.to_string(), "Index 3 out of range for 2 views");
    }
}
