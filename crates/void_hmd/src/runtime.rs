//! The XR runtime protocol surface
//!
//! [`XrRuntime`] is everything the HMD client asks of a runtime. The protocol
//! logic in [`crate::session`], [`crate::swapchain`], [`crate::layer`] and
//! [`crate::action_set`] only talks to this trait, so the same code drives a
//! real OpenXR loader (`openxr-backend` feature) and the scripted
//! [`crate::mock::MockRuntime`].
//!
//! Implementations are shared as `Arc<dyn XrRuntime>` and take `&self`
//! everywhere; any state they keep sits behind interior mutability.

use std::sync::Arc;

use crate::error::HmdResult;
use crate::handle::{
    ActionHandle, ActionSetHandle, InstanceHandle, SessionHandle, SpaceHandle, SwapchainHandle,
};
use crate::types::*;

/// Shared runtime reference held by every resource wrapper
pub type SharedRuntime = Arc<dyn XrRuntime>;

/// Callback receiving runtime debug messages
pub type DebugSink = Box<dyn Fn(&DebugMessage) + Send + Sync>;

/// Operations consumed from an XR runtime
pub trait XrRuntime: Send + Sync {
    /// Human readable backend name
    fn name(&self) -> &str;

    // ---- Instance -------------------------------------------------------

    fn enumerate_api_layers(&self) -> HmdResult<Vec<ApiLayerProperties>>;

    /// Extensions offered by the runtime, or by `layer` when given
    fn enumerate_extensions(&self, layer: Option<&str>) -> HmdResult<Vec<ExtensionProperties>>;

    /// Create the instance. `debug_sink` receives runtime debug messages when
    /// `info.debug_severities` is set and the debug utils extension is enabled.
    fn create_instance(
        &self,
        info: &InstanceCreateInfo,
        debug_sink: Option<DebugSink>,
    ) -> HmdResult<InstanceHandle>;

    fn destroy_instance(&self, instance: InstanceHandle) -> HmdResult<()>;

    fn instance_properties(&self, instance: InstanceHandle) -> HmdResult<RuntimeProperties>;

    // ---- System ---------------------------------------------------------

    fn get_system(&self, instance: InstanceHandle, form_factor: FormFactor) -> HmdResult<SystemId>;

    fn system_properties(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> HmdResult<SystemProperties>;

    fn enumerate_view_configurations(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> HmdResult<Vec<ViewConfigurationType>>;

    fn enumerate_view_configuration_views(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        view_configuration: ViewConfigurationType,
    ) -> HmdResult<Vec<ViewConfigurationView>>;

    fn enumerate_environment_blend_modes(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        view_configuration: ViewConfigurationType,
    ) -> HmdResult<Vec<EnvironmentBlendMode>>;

    fn graphics_requirements(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> HmdResult<GraphicsRequirements>;

    // ---- Session --------------------------------------------------------

    fn create_session(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        binding: &GraphicsBinding,
    ) -> HmdResult<SessionHandle>;

    fn destroy_session(&self, session: SessionHandle) -> HmdResult<()>;

    fn enumerate_swapchain_formats(&self, session: SessionHandle) -> HmdResult<Vec<i64>>;

    fn enumerate_reference_spaces(&self, session: SessionHandle)
        -> HmdResult<Vec<ReferenceSpaceKind>>;

    fn begin_session(
        &self,
        session: SessionHandle,
        view_configuration: ViewConfigurationType,
    ) -> HmdResult<()>;

    fn end_session(&self, session: SessionHandle) -> HmdResult<()>;

    /// Non-blocking: `Ok(None)` once the event queue is empty
    fn poll_event(&self, instance: InstanceHandle) -> HmdResult<Option<RuntimeEvent>>;

    // ---- Frame ----------------------------------------------------------

    /// Blocks until the runtime wants the next frame
    fn wait_frame(&self, session: SessionHandle) -> HmdResult<FrameState>;

    fn begin_frame(&self, session: SessionHandle) -> HmdResult<()>;

    fn end_frame(&self, session: SessionHandle, submission: &FrameSubmission) -> HmdResult<()>;

    // ---- Spaces ---------------------------------------------------------

    fn create_reference_space(
        &self,
        session: SessionHandle,
        kind: ReferenceSpaceKind,
        pose_in_space: Posef,
    ) -> HmdResult<SpaceHandle>;

    fn destroy_space(&self, space: SpaceHandle) -> HmdResult<()>;

    fn locate_space(
        &self,
        space: SpaceHandle,
        base: SpaceHandle,
        time: XrTime,
    ) -> HmdResult<SpaceLocation>;

    fn locate_views(
        &self,
        session: SessionHandle,
        view_configuration: ViewConfigurationType,
        display_time: XrTime,
        space: SpaceHandle,
    ) -> HmdResult<(ViewStateFlags, Vec<ViewLocation>)>;

    // ---- Swapchains -----------------------------------------------------

    fn create_swapchain(
        &self,
        session: SessionHandle,
        info: &SwapchainCreateInfo,
    ) -> HmdResult<SwapchainHandle>;

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) -> HmdResult<()>;

    /// Graphics object names of the ring, in slot order
    fn enumerate_swapchain_images(&self, swapchain: SwapchainHandle) -> HmdResult<Vec<u64>>;

    /// Returns the ring slot the runtime picked
    fn acquire_swapchain_image(&self, swapchain: SwapchainHandle) -> HmdResult<u32>;

    fn wait_swapchain_image(&self, swapchain: SwapchainHandle, timeout: XrDuration)
        -> HmdResult<()>;

    fn release_swapchain_image(&self, swapchain: SwapchainHandle) -> HmdResult<()>;

    // ---- Actions --------------------------------------------------------

    fn string_to_path(&self, instance: InstanceHandle, path: &str) -> HmdResult<XrPath>;

    fn create_action_set(
        &self,
        instance: InstanceHandle,
        name: &str,
        localized_name: &str,
        priority: u32,
    ) -> HmdResult<ActionSetHandle>;

    fn destroy_action_set(&self, action_set: ActionSetHandle) -> HmdResult<()>;

    fn create_pose_action(
        &self,
        action_set: ActionSetHandle,
        name: &str,
        localized_name: &str,
        subaction_paths: &[XrPath],
    ) -> HmdResult<ActionHandle>;

    fn suggest_interaction_profile_bindings(
        &self,
        instance: InstanceHandle,
        profile: XrPath,
        bindings: &[SuggestedBinding],
    ) -> HmdResult<()>;

    fn create_action_space(
        &self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: XrPath,
        pose_in_action_space: Posef,
    ) -> HmdResult<SpaceHandle>;

    fn attach_action_sets(
        &self,
        session: SessionHandle,
        action_sets: &[ActionSetHandle],
    ) -> HmdResult<()>;

    /// May fail with [`crate::HmdError::SessionNotFocused`] outside the focused state
    fn sync_actions(&self, session: SessionHandle, active: &[ActiveActionSet]) -> HmdResult<()>;

    fn pose_action_state(
        &self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: XrPath,
    ) -> HmdResult<ActionStatePose>;
}
