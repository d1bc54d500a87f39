//! Scripted in-process runtime
//!
//! [`MockRuntime`] plays the part of an XR runtime for tests and the
//! `hmd_sim` binary. The device it reports is described by a [`MockDevice`]
//! script; the protocol rules a conformant runtime enforces (frame ordering,
//! swapchain acquire/wait/release pairing, attach-before-sync, no use of
//! destroyed handles) are checked on every call. Every call is recorded as a
//! [`RuntimeCall`] and every submitted frame is kept for inspection.

use std::collections::VecDeque;

use glam::{Quat, Vec3};
use parking_lot::Mutex;

use crate::error::{HmdError, HmdResult};
use crate::handle::*;
use crate::runtime::{DebugSink, XrRuntime};
use crate::session::SessionState;
use crate::types::*;

/// Device and runtime behavior reported by [`MockRuntime`]
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub runtime_name: String,
    pub runtime_version: Version,
    pub api_layers: Vec<ApiLayerProperties>,
    pub extensions: Vec<String>,
    pub system_name: String,
    pub vendor_id: u32,
    pub view_configurations: Vec<ViewConfigurationType>,
    /// Views reported for the stereo configuration; mono uses the first
    pub views: Vec<ViewConfigurationView>,
    pub blend_modes: Vec<EnvironmentBlendMode>,
    pub graphics_requirements: GraphicsRequirements,
    pub swapchain_formats: Vec<i64>,
    pub reference_spaces: Vec<ReferenceSpaceKind>,
    pub image_count: u32,
    /// Slots handed out by acquire, cycled; empty means round-robin
    pub acquire_order: Vec<u32>,
    pub frame_period: XrDuration,
    pub should_render: bool,
    pub view_state: ViewStateFlags,
    pub view_locations: Vec<ViewLocation>,
    /// Head pose in the stage frame
    pub head_pose: Posef,
    /// Left, right
    pub hand_active: [bool; 2],
    pub hand_location_flags: [SpaceLocationFlags; 2],
    pub hand_poses: [Posef; 2],
    /// Refuse to sync actions unless the session is focused
    pub sync_requires_focus: bool,
    /// Number of upcoming `begin_frame` calls that fail after consuming the wait
    pub begin_frame_failures: u32,
}

impl MockDevice {
    /// Both position and orientation valid and tracked
    pub const FULLY_TRACKED: SpaceLocationFlags = SpaceLocationFlags::from_bits(0b1111);

    pub fn stereo() -> Self {
        let view = ViewConfigurationView {
            recommended_image_rect_width: 1440,
            max_image_rect_width: 2880,
            recommended_image_rect_height: 1600,
            max_image_rect_height: 3200,
            recommended_swapchain_sample_count: 1,
            max_swapchain_sample_count: 4,
        };
        let head = Vec3::new(0.0, 1.6, 0.0);
        let eye = |offset: f32, fov: Fovf| ViewLocation {
            pose: Posef::new(head + Vec3::new(offset, 0.0, 0.0), Quat::IDENTITY),
            fov,
        };

        Self {
            runtime_name: "Void Mock Runtime".to_string(),
            runtime_version: Version::new(1, 0, 0),
            api_layers: Vec::new(),
            extensions: vec![
                "XR_KHR_opengl_enable".to_string(),
                "XR_EXT_debug_utils".to_string(),
            ],
            system_name: "Mock HMD".to_string(),
            vendor_id: 0x1d5c,
            view_configurations: vec![
                ViewConfigurationType::PrimaryMono,
                ViewConfigurationType::PrimaryStereo,
            ],
            views: vec![view, view],
            blend_modes: vec![EnvironmentBlendMode::Opaque],
            graphics_requirements: GraphicsRequirements {
                min_api_version: Version::new(3, 3, 0),
                max_api_version: Version::new(4, 6, 0),
            },
            swapchain_formats: vec![0x8058, 0x8C43, 0x881A],
            reference_spaces: vec![
                ReferenceSpaceKind::View,
                ReferenceSpaceKind::Local,
                ReferenceSpaceKind::Stage,
            ],
            image_count: 3,
            acquire_order: Vec::new(),
            frame_period: XrDuration::from_nanos(11_111_111),
            should_render: true,
            view_state: ViewStateFlags::from_bits(0b1111),
            view_locations: vec![
                eye(-0.032, Fovf::new(-0.96, 0.75, 0.83, -0.94)),
                eye(0.032, Fovf::new(-0.75, 0.96, 0.83, -0.94)),
            ],
            head_pose: Posef::new(head, Quat::IDENTITY),
            hand_active: [true, true],
            hand_location_flags: [Self::FULLY_TRACKED, Self::FULLY_TRACKED],
            hand_poses: [
                Posef::new(Vec3::new(-0.2, 1.0, -0.3), Quat::IDENTITY),
                Posef::new(Vec3::new(0.2, 1.0, -0.3), Quat::IDENTITY),
            ],
            sync_requires_focus: true,
            begin_frame_failures: 0,
        }
    }

    fn views_for(&self, config: ViewConfigurationType) -> Vec<ViewConfigurationView> {
        if !self.view_configurations.contains(&config) {
            return Vec::new();
        }
        match config {
            ViewConfigurationType::PrimaryStereo => self.views.clone(),
            ViewConfigurationType::PrimaryMono => self.views.iter().take(1).copied().collect(),
        }
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::stereo()
    }
}

/// A call received by [`MockRuntime`]
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCall {
    CreateInstance,
    DestroyInstance(InstanceHandle),
    CreateSession(SessionHandle),
    DestroySession(SessionHandle),
    BeginSession(ViewConfigurationType),
    EndSession,
    WaitFrame,
    BeginFrame,
    EndFrame { layers: usize },
    CreateSpace(SpaceHandle),
    DestroySpace(SpaceHandle),
    LocateViews,
    LocateSpace(SpaceHandle),
    CreateSwapchain(SwapchainHandle),
    DestroySwapchain(SwapchainHandle),
    AcquireImage { swapchain: SwapchainHandle, index: u32 },
    WaitImage(SwapchainHandle),
    ReleaseImage(SwapchainHandle),
    CreateActionSet(ActionSetHandle),
    DestroyActionSet(ActionSetHandle),
    SuggestBindings { profile: String, bindings: Vec<String> },
    AttachActionSets,
    SyncActions,
    PoseActionState,
}

struct MockInstance {
    debug_sink: Option<DebugSink>,
}

#[derive(Default)]
struct MockSession {
    state: SessionState,
    running: bool,
    waited: bool,
    in_frame: bool,
    attached: bool,
}

#[derive(Clone, Copy)]
enum MockSpaceOrigin {
    Reference(ReferenceSpaceKind),
    Hand(usize),
}

struct MockSpace {
    origin: MockSpaceOrigin,
}

struct MockSwapchain {
    images: Vec<u64>,
    acquired: Option<u32>,
    waited: bool,
    acquire_count: usize,
}

struct MockActionSet {
    attached: bool,
}

struct MockAction {
    action_set: ActionSetHandle,
}

struct MockState {
    device: MockDevice,
    instances: HandleTable<InstanceKind, MockInstance>,
    sessions: HandleTable<SessionKind, MockSession>,
    spaces: HandleTable<SpaceKind, MockSpace>,
    swapchains: HandleTable<SwapchainKind, MockSwapchain>,
    action_sets: HandleTable<ActionSetKind, MockActionSet>,
    actions: HandleTable<ActionKind, MockAction>,
    paths: Vec<String>,
    events: VecDeque<RuntimeEvent>,
    calls: Vec<RuntimeCall>,
    submissions: Vec<FrameSubmission>,
    now: XrTime,
    next_image_name: u64,
}

fn invalid<K: HandleKind>() -> HmdError {
    HmdError::InvalidHandle { kind: K::NAME }
}

impl MockState {
    fn session(&mut self, handle: SessionHandle) -> HmdResult<&mut MockSession> {
        self.sessions.get_mut(handle).ok_or_else(invalid::<SessionKind>)
    }

    fn swapchain(&mut self, handle: SwapchainHandle) -> HmdResult<&mut MockSwapchain> {
        self.swapchains
            .get_mut(handle)
            .ok_or_else(invalid::<SwapchainKind>)
    }

    fn check_instance(&self, handle: InstanceHandle) -> HmdResult<()> {
        if self.instances.contains(handle) {
            Ok(())
        } else {
            Err(invalid::<InstanceKind>())
        }
    }

    fn path_name(&self, path: XrPath) -> Option<&str> {
        (path.0 as usize)
            .checked_sub(1)
            .and_then(|i| self.paths.get(i))
            .map(String::as_str)
    }

    fn hand_index(&self, path: XrPath) -> Option<usize> {
        match self.path_name(path)? {
            "/user/hand/left" => Some(0),
            "/user/hand/right" => Some(1),
            _ => None,
        }
    }

    /// Pose of a space in the stage frame plus its validity
    fn world_pose(&self, space: SpaceHandle) -> HmdResult<(Posef, SpaceLocationFlags)> {
        let space = self.spaces.get(space).ok_or_else(invalid::<SpaceKind>)?;
        Ok(match space.origin {
            MockSpaceOrigin::Reference(ReferenceSpaceKind::View) => {
                (self.device.head_pose, MockDevice::FULLY_TRACKED)
            }
            MockSpaceOrigin::Reference(_) => (Posef::IDENTITY, MockDevice::FULLY_TRACKED),
            MockSpaceOrigin::Hand(i) => (
                self.device.hand_poses[i],
                self.device.hand_location_flags[i],
            ),
        })
    }
}

fn relative_pose(pose: &Posef, base: &Posef) -> Posef {
    let inv = base.orientation.inverse();
    Posef::new(
        inv * (pose.position - base.position),
        inv * pose.orientation,
    )
}

/// In-process [`XrRuntime`] driven by a [`MockDevice`] script
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new(device: MockDevice) -> Self {
        Self {
            state: Mutex::new(MockState {
                device,
                instances: HandleTable::new(),
                sessions: HandleTable::new(),
                spaces: HandleTable::new(),
                swapchains: HandleTable::new(),
                action_sets: HandleTable::new(),
                actions: HandleTable::new(),
                paths: Vec::new(),
                events: VecDeque::new(),
                calls: Vec::new(),
                submissions: Vec::new(),
                now: XrTime::from_nanos(1_000_000_000),
                next_image_name: 1,
            }),
        }
    }

    /// Change the device script between frames
    pub fn with_device<R>(&self, f: impl FnOnce(&mut MockDevice) -> R) -> R {
        f(&mut self.state.lock().device)
    }

    pub fn push_event(&self, event: RuntimeEvent) {
        self.state.lock().events.push_back(event);
    }

    /// Queue a state change for `session` and remember it as the runtime's view
    /// of that session
    pub fn push_state_change(&self, session: SessionHandle, state: SessionState) {
        let mut s = self.state.lock();
        if let Some(mock) = s.sessions.get_mut(session) {
            mock.state = state;
        }
        let time = s.now;
        s.events.push_back(RuntimeEvent::SessionStateChanged {
            session,
            state,
            time,
        });
    }

    /// Queue the usual startup sequence up to `Focused`
    pub fn push_startup(&self, session: SessionHandle) {
        for state in [
            SessionState::Idle,
            SessionState::Ready,
            SessionState::Synchronized,
            SessionState::Visible,
            SessionState::Focused,
        ] {
            self.push_state_change(session, state);
        }
    }

    /// Queue the shutdown sequence from `Focused` to `Exiting`
    pub fn push_shutdown(&self, session: SessionHandle) {
        for state in [
            SessionState::Visible,
            SessionState::Synchronized,
            SessionState::Stopping,
            SessionState::Idle,
            SessionState::Exiting,
        ] {
            self.push_state_change(session, state);
        }
    }

    /// Deliver a debug message to every instance with a messenger
    pub fn emit_debug_message(&self, message: &DebugMessage) -> usize {
        let s = self.state.lock();
        let mut delivered = 0;
        for (_, instance) in s.instances.iter() {
            if let Some(sink) = &instance.debug_sink {
                sink(message);
                delivered += 1;
            }
        }
        delivered
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn count_calls(&self, predicate: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn submissions(&self) -> Vec<FrameSubmission> {
        self.state.lock().submissions.clone()
    }

    pub fn last_submission(&self) -> Option<FrameSubmission> {
        self.state.lock().submissions.last().cloned()
    }

    /// The single live session, if exactly one exists
    pub fn session_handle(&self) -> Option<SessionHandle> {
        let s = self.state.lock();
        let mut sessions = s.sessions.iter().map(|(h, _)| h);
        match (sessions.next(), sessions.next()) {
            (Some(h), None) => Some(h),
            _ => None,
        }
    }

    /// Number of live runtime objects of every kind
    pub fn live_objects(&self) -> usize {
        let s = self.state.lock();
        s.instances.len()
            + s.sessions.len()
            + s.spaces.len()
            + s.swapchains.len()
            + s.action_sets.len()
            + s.actions.len()
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new(MockDevice::default())
    }
}

impl XrRuntime for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    fn enumerate_api_layers(&self) -> HmdResult<Vec<ApiLayerProperties>> {
        Ok(self.state.lock().device.api_layers.clone())
    }

    fn enumerate_extensions(&self, layer: Option<&str>) -> HmdResult<Vec<ExtensionProperties>> {
        if layer.is_some() {
            return Ok(Vec::new());
        }
        Ok(self
            .state
            .lock()
            .device
            .extensions
            .iter()
            .map(|name| ExtensionProperties {
                name: name.clone(),
                version: 1,
            })
            .collect())
    }

    fn create_instance(
        &self,
        info: &InstanceCreateInfo,
        debug_sink: Option<DebugSink>,
    ) -> HmdResult<InstanceHandle> {
        let mut s = self.state.lock();
        if let Some(missing) = info
            .enabled_extensions
            .iter()
            .find(|e| !s.device.extensions.contains(e))
        {
            return Err(HmdError::MissingExtension(missing.clone()));
        }
        let debug_enabled = info.debug_severities.is_some()
            && info.enabled_extensions.iter().any(|e| e == "XR_EXT_debug_utils");
        let handle = s.instances.insert(MockInstance {
            debug_sink: debug_sink.filter(|_| debug_enabled),
        });
        s.calls.push(RuntimeCall::CreateInstance);
        Ok(handle)
    }

    fn destroy_instance(&self, instance: InstanceHandle) -> HmdResult<()> {
        let mut s = self.state.lock();
        s.instances
            .remove(instance)
            .ok_or_else(invalid::<InstanceKind>)?;
        s.calls.push(RuntimeCall::DestroyInstance(instance));
        Ok(())
    }

    fn instance_properties(&self, instance: InstanceHandle) -> HmdResult<RuntimeProperties> {
        let s = self.state.lock();
        s.check_instance(instance)?;
        Ok(RuntimeProperties {
            runtime_name: s.device.runtime_name.clone(),
            runtime_version: s.device.runtime_version,
        })
    }

    fn get_system(&self, instance: InstanceHandle, form_factor: FormFactor) -> HmdResult<SystemId> {
        self.state.lock().check_instance(instance)?;
        match form_factor {
            FormFactor::HeadMountedDisplay => Ok(SystemId(1)),
            FormFactor::HandheldDisplay => {
                Err(HmdError::Runtime("form factor unsupported".into()))
            }
        }
    }

    fn system_properties(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> HmdResult<SystemProperties> {
        let s = self.state.lock();
        s.check_instance(instance)?;
        let max = s.device.views.first().copied().unwrap_or_default();
        Ok(SystemProperties {
            system_id: system,
            vendor_id: s.device.vendor_id,
            system_name: s.device.system_name.clone(),
            max_swapchain_image_width: max.max_image_rect_width,
            max_swapchain_image_height: max.max_image_rect_height,
            max_layer_count: 16,
            orientation_tracking: true,
            position_tracking: true,
        })
    }

    fn enumerate_view_configurations(
        &self,
        instance: InstanceHandle,
        _system: SystemId,
    ) -> HmdResult<Vec<ViewConfigurationType>> {
        let s = self.state.lock();
        s.check_instance(instance)?;
        Ok(s.device.view_configurations.clone())
    }

    fn enumerate_view_configuration_views(
        &self,
        instance: InstanceHandle,
        _system: SystemId,
        view_configuration: ViewConfigurationType,
    ) -> HmdResult<Vec<ViewConfigurationView>> {
        let s = self.state.lock();
        s.check_instance(instance)?;
        Ok(s.device.views_for(view_configuration))
    }

    fn enumerate_environment_blend_modes(
        &self,
        instance: InstanceHandle,
        _system: SystemId,
        _view_configuration: ViewConfigurationType,
    ) -> HmdResult<Vec<EnvironmentBlendMode>> {
        let s = self.state.lock();
        s.check_instance(instance)?;
        Ok(s.device.blend_modes.clone())
    }

    fn graphics_requirements(
        &self,
        instance: InstanceHandle,
        _system: SystemId,
    ) -> HmdResult<GraphicsRequirements> {
        let s = self.state.lock();
        s.check_instance(instance)?;
        Ok(s.device.graphics_requirements)
    }

    fn create_session(
        &self,
        instance: InstanceHandle,
        _system: SystemId,
        binding: &GraphicsBinding,
    ) -> HmdResult<SessionHandle> {
        let mut s = self.state.lock();
        s.check_instance(instance)?;
        if !s.device.graphics_requirements.accepts(binding.api_version) {
            return Err(HmdError::GraphicsRequirements(format!(
                "context version {}",
                binding.api_version
            )));
        }
        let handle = s.sessions.insert(MockSession::default());
        s.calls.push(RuntimeCall::CreateSession(handle));
        Ok(handle)
    }

    fn destroy_session(&self, session: SessionHandle) -> HmdResult<()> {
        let mut s = self.state.lock();
        s.sessions
            .remove(session)
            .ok_or_else(invalid::<SessionKind>)?;
        s.calls.push(RuntimeCall::DestroySession(session));
        Ok(())
    }

    fn enumerate_swapchain_formats(&self, session: SessionHandle) -> HmdResult<Vec<i64>> {
        let mut s = self.state.lock();
        s.session(session)?;
        Ok(s.device.swapchain_formats.clone())
    }

    fn enumerate_reference_spaces(
        &self,
        session: SessionHandle,
    ) -> HmdResult<Vec<ReferenceSpaceKind>> {
        let mut s = self.state.lock();
        s.session(session)?;
        Ok(s.device.reference_spaces.clone())
    }

    fn begin_session(
        &self,
        session: SessionHandle,
        view_configuration: ViewConfigurationType,
    ) -> HmdResult<()> {
        let mut s = self.state.lock();
        let mock = s.session(session)?;
        if mock.running {
            return Err(HmdError::Runtime("session already running".into()));
        }
        mock.running = true;
        s.calls.push(RuntimeCall::BeginSession(view_configuration));
        Ok(())
    }

    fn end_session(&self, session: SessionHandle) -> HmdResult<()> {
        let mut s = self.state.lock();
        let mock = s.session(session)?;
        if !mock.running {
            return Err(HmdError::Runtime("session not running".into()));
        }
        mock.running = false;
        mock.waited = false;
        mock.in_frame = false;
        s.calls.push(RuntimeCall::EndSession);
        Ok(())
    }

    fn poll_event(&self, instance: InstanceHandle) -> HmdResult<Option<RuntimeEvent>> {
        let mut s = self.state.lock();
        s.check_instance(instance)?;
        Ok(s.events.pop_front())
    }

    fn wait_frame(&self, session: SessionHandle) -> HmdResult<FrameState> {
        let mut s = self.state.lock();
        let mock = s.session(session)?;
        if !mock.running {
            return Err(HmdError::FrameOrder("wait_frame on a session not running".into()));
        }
        if mock.waited {
            return Err(HmdError::FrameOrder("wait_frame twice without begin".into()));
        }
        mock.waited = true;

        let period = s.device.frame_period;
        s.now = s.now + period;
        let state = FrameState {
            predicted_display_time: s.now + period,
            predicted_display_period: period,
            should_render: s.device.should_render,
        };
        s.calls.push(RuntimeCall::WaitFrame);
        Ok(state)
    }

    fn begin_frame(&self, session: SessionHandle) -> HmdResult<()> {
        let mut s = self.state.lock();
        let fail = s.device.begin_frame_failures > 0;
        let mock = s.session(session)?;
        if !mock.waited {
            return Err(HmdError::FrameOrder("begin_frame without wait_frame".into()));
        }
        if mock.in_frame {
            return Err(HmdError::FrameOrder("begin_frame with a frame open".into()));
        }
        mock.waited = false;
        if fail {
            s.device.begin_frame_failures -= 1;
            return Err(HmdError::Runtime("begin_frame failed".into()));
        }
        mock.in_frame = true;
        s.calls.push(RuntimeCall::BeginFrame);
        Ok(())
    }

    fn end_frame(&self, session: SessionHandle, submission: &FrameSubmission) -> HmdResult<()> {
        let mut s = self.state.lock();
        if !s.session(session)?.in_frame {
            return Err(HmdError::FrameOrder("end_frame without begin_frame".into()));
        }
        for layer in &submission.layers {
            let CompositionLayer::Projection(projection) = layer;
            if !s.spaces.contains(projection.space) {
                return Err(invalid::<SpaceKind>());
            }
            for view in &projection.views {
                let swapchain = s
                    .swapchains
                    .get(view.sub_image.swapchain)
                    .ok_or_else(invalid::<SwapchainKind>)?;
                if swapchain.acquired.is_some() {
                    return Err(HmdError::SwapchainState(
                        "submitted swapchain still has an acquired image".into(),
                    ));
                }
                if swapchain.acquire_count == 0 {
                    return Err(HmdError::SwapchainState(
                        "submitted swapchain was never rendered".into(),
                    ));
                }
            }
        }
        s.session(session)?.in_frame = false;
        s.calls.push(RuntimeCall::EndFrame {
            layers: submission.layers.len(),
        });
        s.submissions.push(submission.clone());
        Ok(())
    }

    fn create_reference_space(
        &self,
        session: SessionHandle,
        kind: ReferenceSpaceKind,
        _pose_in_space: Posef,
    ) -> HmdResult<SpaceHandle> {
        let mut s = self.state.lock();
        s.session(session)?;
        if !s.device.reference_spaces.contains(&kind) {
            return Err(HmdError::Runtime(format!("reference space {} unsupported", kind)));
        }
        let handle = s.spaces.insert(MockSpace {
            origin: MockSpaceOrigin::Reference(kind),
        });
        s.calls.push(RuntimeCall::CreateSpace(handle));
        Ok(handle)
    }

    fn destroy_space(&self, space: SpaceHandle) -> HmdResult<()> {
        let mut s = self.state.lock();
        s.spaces.remove(space).ok_or_else(invalid::<SpaceKind>)?;
        s.calls.push(RuntimeCall::DestroySpace(space));
        Ok(())
    }

    fn locate_space(
        &self,
        space: SpaceHandle,
        base: SpaceHandle,
        _time: XrTime,
    ) -> HmdResult<SpaceLocation> {
        let mut s = self.state.lock();
        let (pose, flags) = s.world_pose(space)?;
        let (base_pose, base_flags) = s.world_pose(base)?;
        s.calls.push(RuntimeCall::LocateSpace(space));
        let flags = SpaceLocationFlags::from_bits(flags.bits() & base_flags.bits());
        Ok(SpaceLocation {
            flags,
            pose: if flags.pose_valid() {
                relative_pose(&pose, &base_pose)
            } else {
                Posef::IDENTITY
            },
        })
    }

    fn locate_views(
        &self,
        session: SessionHandle,
        view_configuration: ViewConfigurationType,
        _display_time: XrTime,
        space: SpaceHandle,
    ) -> HmdResult<(ViewStateFlags, Vec<ViewLocation>)> {
        let mut s = self.state.lock();
        s.session(session)?;
        let (base_pose, _) = s.world_pose(space)?;
        let count = s.device.views_for(view_configuration).len();
        let views: Vec<ViewLocation> = s
            .device
            .view_locations
            .iter()
            .take(count)
            .map(|v| ViewLocation {
                pose: relative_pose(&v.pose, &base_pose),
                fov: v.fov,
            })
            .collect();
        s.calls.push(RuntimeCall::LocateViews);
        Ok((s.device.view_state, views))
    }

    fn create_swapchain(
        &self,
        session: SessionHandle,
        info: &SwapchainCreateInfo,
    ) -> HmdResult<SwapchainHandle> {
        let mut s = self.state.lock();
        s.session(session)?;
        if !s.device.swapchain_formats.contains(&info.format) {
            return Err(HmdError::Runtime(format!(
                "swapchain format {:#x} unsupported",
                info.format
            )));
        }
        if info.width == 0 || info.height == 0 || info.sample_count == 0 {
            return Err(HmdError::Runtime("swapchain extent must be non-zero".into()));
        }
        let first = s.next_image_name;
        s.next_image_name += s.device.image_count as u64;
        let images = (first..first + s.device.image_count as u64).collect();
        let handle = s.swapchains.insert(MockSwapchain {
            images,
            acquired: None,
            waited: false,
            acquire_count: 0,
        });
        s.calls.push(RuntimeCall::CreateSwapchain(handle));
        Ok(handle)
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) -> HmdResult<()> {
        let mut s = self.state.lock();
        s.swapchains
            .remove(swapchain)
            .ok_or_else(invalid::<SwapchainKind>)?;
        s.calls.push(RuntimeCall::DestroySwapchain(swapchain));
        Ok(())
    }

    fn enumerate_swapchain_images(&self, swapchain: SwapchainHandle) -> HmdResult<Vec<u64>> {
        let mut s = self.state.lock();
        Ok(s.swapchain(swapchain)?.images.clone())
    }

    fn acquire_swapchain_image(&self, swapchain: SwapchainHandle) -> HmdResult<u32> {
        let mut s = self.state.lock();
        let order = s.device.acquire_order.clone();
        let mock = s.swapchain(swapchain)?;
        if mock.acquired.is_some() {
            return Err(HmdError::SwapchainState(
                "acquire while an image is acquired".into(),
            ));
        }
        let index = if order.is_empty() {
            (mock.acquire_count % mock.images.len().max(1)) as u32
        } else {
            order[mock.acquire_count % order.len()]
        };
        mock.acquired = Some(index);
        mock.waited = false;
        mock.acquire_count += 1;
        s.calls
            .push(RuntimeCall::AcquireImage { swapchain, index });
        Ok(index)
    }

    fn wait_swapchain_image(
        &self,
        swapchain: SwapchainHandle,
        _timeout: XrDuration,
    ) -> HmdResult<()> {
        let mut s = self.state.lock();
        let mock = s.swapchain(swapchain)?;
        if mock.acquired.is_none() || mock.waited {
            return Err(HmdError::SwapchainState(
                "wait without a pending acquire".into(),
            ));
        }
        mock.waited = true;
        s.calls.push(RuntimeCall::WaitImage(swapchain));
        Ok(())
    }

    fn release_swapchain_image(&self, swapchain: SwapchainHandle) -> HmdResult<()> {
        let mut s = self.state.lock();
        let mock = s.swapchain(swapchain)?;
        if mock.acquired.is_none() || !mock.waited {
            return Err(HmdError::SwapchainState(
                "release without a waited image".into(),
            ));
        }
        mock.acquired = None;
        mock.waited = false;
        s.calls.push(RuntimeCall::ReleaseImage(swapchain));
        Ok(())
    }

    fn string_to_path(&self, instance: InstanceHandle, path: &str) -> HmdResult<XrPath> {
        let mut s = self.state.lock();
        s.check_instance(instance)?;
        if !path.starts_with('/') || path.ends_with('/') {
            return Err(HmdError::Runtime(format!("path format invalid: '{}'", path)));
        }
        if let Some(i) = s.paths.iter().position(|p| p == path) {
            return Ok(XrPath(i as u64 + 1));
        }
        s.paths.push(path.to_string());
        Ok(XrPath(s.paths.len() as u64))
    }

    fn create_action_set(
        &self,
        instance: InstanceHandle,
        _name: &str,
        _localized_name: &str,
        _priority: u32,
    ) -> HmdResult<ActionSetHandle> {
        let mut s = self.state.lock();
        s.check_instance(instance)?;
        let handle = s.action_sets.insert(MockActionSet { attached: false });
        s.calls.push(RuntimeCall::CreateActionSet(handle));
        Ok(handle)
    }

    fn destroy_action_set(&self, action_set: ActionSetHandle) -> HmdResult<()> {
        let mut s = self.state.lock();
        s.action_sets
            .remove(action_set)
            .ok_or_else(invalid::<ActionSetKind>)?;
        let owned: Vec<ActionHandle> = s
            .actions
            .iter()
            .filter(|(_, a)| a.action_set == action_set)
            .map(|(h, _)| h)
            .collect();
        for action in owned {
            s.actions.remove(action);
        }
        s.calls.push(RuntimeCall::DestroyActionSet(action_set));
        Ok(())
    }

    fn create_pose_action(
        &self,
        action_set: ActionSetHandle,
        _name: &str,
        _localized_name: &str,
        subaction_paths: &[XrPath],
    ) -> HmdResult<ActionHandle> {
        let mut s = self.state.lock();
        let set = s
            .action_sets
            .get(action_set)
            .ok_or_else(invalid::<ActionSetKind>)?;
        if set.attached {
            return Err(HmdError::ActionSetAttached);
        }
        if subaction_paths.iter().any(|p| s.path_name(*p).is_none()) {
            return Err(HmdError::Runtime("unknown subaction path".into()));
        }
        Ok(s.actions.insert(MockAction { action_set }))
    }

    fn suggest_interaction_profile_bindings(
        &self,
        instance: InstanceHandle,
        profile: XrPath,
        bindings: &[SuggestedBinding],
    ) -> HmdResult<()> {
        let mut s = self.state.lock();
        s.check_instance(instance)?;
        let profile = s
            .path_name(profile)
            .ok_or_else(|| HmdError::Runtime("unknown profile path".into()))?
            .to_string();
        let mut names = Vec::with_capacity(bindings.len());
        for binding in bindings {
            if !s.actions.contains(binding.action) {
                return Err(invalid::<ActionKind>());
            }
            names.push(
                s.path_name(binding.binding)
                    .ok_or_else(|| HmdError::Runtime("unknown binding path".into()))?
                    .to_string(),
            );
        }
        s.calls.push(RuntimeCall::SuggestBindings {
            profile,
            bindings: names,
        });
        Ok(())
    }

    fn create_action_space(
        &self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: XrPath,
        _pose_in_action_space: Posef,
    ) -> HmdResult<SpaceHandle> {
        let mut s = self.state.lock();
        s.session(session)?;
        if !s.actions.contains(action) {
            return Err(invalid::<ActionKind>());
        }
        let hand = s
            .hand_index(subaction_path)
            .ok_or_else(|| HmdError::Runtime("action space needs a hand path".into()))?;
        let handle = s.spaces.insert(MockSpace {
            origin: MockSpaceOrigin::Hand(hand),
        });
        s.calls.push(RuntimeCall::CreateSpace(handle));
        Ok(handle)
    }

    fn attach_action_sets(
        &self,
        session: SessionHandle,
        action_sets: &[ActionSetHandle],
    ) -> HmdResult<()> {
        let mut s = self.state.lock();
        let mock = s.session(session)?;
        if mock.attached {
            return Err(HmdError::ActionSetAttached);
        }
        mock.attached = true;
        for handle in action_sets {
            s.action_sets
                .get_mut(*handle)
                .ok_or_else(invalid::<ActionSetKind>)?
                .attached = true;
        }
        s.calls.push(RuntimeCall::AttachActionSets);
        Ok(())
    }

    fn sync_actions(&self, session: SessionHandle, active: &[ActiveActionSet]) -> HmdResult<()> {
        let mut s = self.state.lock();
        let requires_focus = s.device.sync_requires_focus;
        let mock = s.session(session)?;
        if !mock.attached {
            return Err(HmdError::ActionSetNotAttached);
        }
        let focused = mock.state == SessionState::Focused;
        for set in active {
            let attached = s
                .action_sets
                .get(set.action_set)
                .ok_or_else(invalid::<ActionSetKind>)?
                .attached;
            if !attached {
                return Err(HmdError::ActionSetNotAttached);
            }
        }
        s.calls.push(RuntimeCall::SyncActions);
        if requires_focus && !focused {
            return Err(HmdError::SessionNotFocused);
        }
        Ok(())
    }

    fn pose_action_state(
        &self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: XrPath,
    ) -> HmdResult<ActionStatePose> {
        let mut s = self.state.lock();
        s.session(session)?;
        if !s.actions.contains(action) {
            return Err(invalid::<ActionKind>());
        }
        let hand = s.hand_index(subaction_path);
        s.calls.push(RuntimeCall::PoseActionState);
        Ok(ActionStatePose {
            is_active: hand.map(|i| s.device.hand_active[i]).unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(runtime: &MockRuntime) -> InstanceHandle {
        runtime
            .create_instance(
                &InstanceCreateInfo {
                    application: ApplicationInfo {
                        application_name: "test".into(),
                        application_version: Version::default(),
                        engine_name: "void_hmd".into(),
                        engine_version: Version::default(),
                        api_version: Version::new(1, 0, 0),
                    },
                    enabled_extensions: vec!["XR_KHR_opengl_enable".into()],
                    enabled_api_layers: Vec::new(),
                    debug_severities: None,
                },
                None,
            )
            .unwrap()
    }

    #[test]
    fn test_destroyed_handle_rejected() {
        let runtime = MockRuntime::default();
        let inst = instance(&runtime);
        runtime.destroy_instance(inst).unwrap();
        assert_eq!(
            runtime.destroy_instance(inst),
            Err(HmdError::InvalidHandle { kind: "instance" })
        );
        assert!(runtime.poll_event(inst).is_err());
    }

    #[test]
    fn test_acquire_order_is_runtime_chosen() {
        let runtime = MockRuntime::default();
        runtime.with_device(|d| d.acquire_order = vec![2, 0, 1]);
        let inst = instance(&runtime);
        let session = runtime
            .create_session(inst, SystemId(1), &GraphicsBinding::headless())
            .unwrap();
        let swapchain = runtime
            .create_swapchain(
                session,
                &SwapchainCreateInfo {
                    usage: SwapchainUsageFlags::COLOR_ATTACHMENT,
                    format: 0x8058,
                    sample_count: 1,
                    width: 16,
                    height: 16,
                    face_count: 1,
                    array_size: 1,
                    mip_count: 1,
                },
            )
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(runtime.acquire_swapchain_image(swapchain).unwrap());
            runtime
                .wait_swapchain_image(swapchain, XrDuration::INFINITE)
                .unwrap();
            runtime.release_swapchain_image(swapchain).unwrap();
        }
        assert_eq!(seen, vec![2, 0, 1, 2]);
    }

    #[test]
    fn test_relative_pose() {
        let base = Posef::new(
            Vec3::new(0.0, 1.0, 0.0),
            Quat::from_rotation_y(core::f32::consts::FRAC_PI_2),
        );
        let pose = Posef::new(Vec3::new(1.0, 1.0, 0.0), Quat::IDENTITY);
        let rel = relative_pose(&pose, &base);
        assert!((rel.position - Vec3::new(0.0, 0.0, 1.0)).length() < 1e-5);
    }
}
