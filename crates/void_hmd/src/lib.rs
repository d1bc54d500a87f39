//! # void_hmd - Head-Mounted Display Client
//!
//! Drives an OpenXR-style runtime for stereo rendering on a head-mounted
//! display:
//! - Instance and extension negotiation, optional debug message routing
//! - System discovery (views, blend modes, graphics requirements)
//! - Session lifecycle driven by runtime state events
//! - The wait/begin/end frame protocol
//! - Per-view swapchains and a projection composition layer
//! - Hand poses from a pose action bound to both hands
//!
//! ## Architecture
//!
//! Everything talks to the runtime through [`XrRuntime`]. The
//! `openxr-backend` feature provides an implementation over the system
//! OpenXR loader; [`MockRuntime`] is a scripted in-process runtime used by
//! the tests and the `hmd_sim` binary.
//!
//! [`HmdDriver`] owns the whole stack and exposes the frame as scheduled
//! steps against a [`HostEngine`].
//!
//! ## Example
//!
//! ```ignore
//! use void_hmd::prelude::*;
//!
//! let runtime: SharedRuntime = Arc::new(MockRuntime::default());
//! let mut config = HmdConfig::default();
//! config.apply_env_overrides()?;
//!
//! let mut driver = HmdDriver::new(runtime, config, GraphicsBinding::headless(), &mut host)?;
//! loop {
//!     if let SessionControl::Exit(_) = driver.run_frame(&mut host, |target| draw(target))? {
//!         break;
//!     }
//! }
//! ```
//!
//! ## Features
//!
//! - `openxr-backend`: [`openxr_backend::OpenXrRuntime`] over the OpenXR loader

pub mod action_set;
pub mod config;
pub mod driver;
pub mod error;
pub mod handle;
pub mod instance;
pub mod layer;
pub mod mock;
pub mod projection;
pub mod runtime;
pub mod session;
pub mod space;
pub mod swapchain;
pub mod system;
pub mod types;

#[cfg(feature = "openxr-backend")]
pub mod openxr_backend;

pub use action_set::{ActionSet, AnchorId, PoseSink};
pub use config::{ApplicationConfig, HmdConfig, SwapchainConfig};
pub use driver::{Anchors, FrameStep, HmdDriver, HostEngine, RenderTarget};
pub use error::{HmdError, HmdResult};
pub use handle::*;
pub use instance::{Instance, InstanceConfig};
pub use layer::ProjectionLayer;
pub use mock::{MockDevice, MockRuntime, RuntimeCall};
pub use projection::{projection_from_fov, ClipSpace, CoordinateSystem, ProjectionView};
pub use runtime::{DebugSink, SharedRuntime, XrRuntime};
pub use session::{ExitReason, FramePhase, Session, SessionControl, SessionState};
pub use space::{Space, SpaceOrigin};
pub use swapchain::Swapchain;
pub use system::{ConfigurationView, System};
pub use types::*;

#[cfg(feature = "openxr-backend")]
pub use openxr_backend::OpenXrRuntime;

/// Prelude for common imports
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::action_set::{AnchorId, PoseSink};
    pub use crate::config::HmdConfig;
    pub use crate::driver::{FrameStep, HmdDriver, HostEngine, RenderTarget};
    pub use crate::error::{HmdError, HmdResult};
    pub use crate::mock::{MockDevice, MockRuntime};
    pub use crate::projection::{ClipSpace, CoordinateSystem};
    pub use crate::runtime::{SharedRuntime, XrRuntime};
    pub use crate::session::{ExitReason, SessionControl, SessionState};
    pub use crate::types::{GraphicsBinding, PlatformBinding, ReferenceSpaceKind};
}
