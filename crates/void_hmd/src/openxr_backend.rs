//! OpenXR loader backend
//!
//! Implements [`XrRuntime`] on top of the `openxr` crate with an OpenGL
//! graphics binding. Every OpenXR object lives in a handle table behind one
//! mutex; the public handles are the table keys.

use std::ffi::{c_char, c_void, CStr};
use std::ptr;

use glam::{Quat, Vec3};
use openxr as xr;
use parking_lot::Mutex;

use crate::error::{HmdError, HmdResult};
use crate::handle::*;
use crate::runtime::{DebugSink, XrRuntime};
use crate::session::SessionState;
use crate::types::*;

struct DebugMessenger {
    handle: xr::sys::DebugUtilsMessengerEXT,
    // Boxed twice so the callback's user data pointer stays stable
    _sink: Box<DebugSink>,
}

struct InstanceRecord {
    instance: xr::Instance,
    messenger: Option<DebugMessenger>,
}

struct SessionRecord {
    session: xr::Session<xr::OpenGL>,
    frame_waiter: xr::FrameWaiter,
    frame_stream: xr::FrameStream<xr::OpenGL>,
}

struct ActionRecord {
    action: xr::Action<xr::Posef>,
}

#[derive(Default)]
struct BackendState {
    instances: HandleTable<InstanceKind, InstanceRecord>,
    sessions: HandleTable<SessionKind, SessionRecord>,
    spaces: HandleTable<SpaceKind, xr::Space>,
    swapchains: HandleTable<SwapchainKind, xr::Swapchain<xr::OpenGL>>,
    action_sets: HandleTable<ActionSetKind, xr::ActionSet>,
    actions: HandleTable<ActionKind, ActionRecord>,
}

impl BackendState {
    fn instance(&self, handle: InstanceHandle) -> HmdResult<&InstanceRecord> {
        self.instances
            .get(handle)
            .ok_or(HmdError::InvalidHandle { kind: "instance" })
    }

    fn session(&self, handle: SessionHandle) -> HmdResult<&SessionRecord> {
        self.sessions
            .get(handle)
            .ok_or(HmdError::InvalidHandle { kind: "session" })
    }

    fn session_mut(&mut self, handle: SessionHandle) -> HmdResult<&mut SessionRecord> {
        self.sessions
            .get_mut(handle)
            .ok_or(HmdError::InvalidHandle { kind: "session" })
    }

    fn space(&self, handle: SpaceHandle) -> HmdResult<&xr::Space> {
        self.spaces
            .get(handle)
            .ok_or(HmdError::InvalidHandle { kind: "space" })
    }

    fn swapchain(&self, handle: SwapchainHandle) -> HmdResult<&xr::Swapchain<xr::OpenGL>> {
        self.swapchains
            .get(handle)
            .ok_or(HmdError::InvalidHandle { kind: "swapchain" })
    }

    fn swapchain_mut(
        &mut self,
        handle: SwapchainHandle,
    ) -> HmdResult<&mut xr::Swapchain<xr::OpenGL>> {
        self.swapchains
            .get_mut(handle)
            .ok_or(HmdError::InvalidHandle { kind: "swapchain" })
    }

    fn action(&self, handle: ActionHandle) -> HmdResult<&ActionRecord> {
        self.actions
            .get(handle)
            .ok_or(HmdError::InvalidHandle { kind: "action" })
    }

    fn session_by_raw(&self, raw: xr::sys::Session) -> SessionHandle {
        self.sessions
            .iter()
            .find(|(_, record)| record.session.as_raw() == raw)
            .map(|(handle, _)| handle)
            .unwrap_or_else(SessionHandle::null)
    }
}

/// Runtime backed by the system OpenXR loader
pub struct OpenXrRuntime {
    entry: xr::Entry,
    state: Mutex<BackendState>,
}

impl OpenXrRuntime {
    /// Load the OpenXR loader library
    pub fn load() -> HmdResult<Self> {
        // SAFETY: the loader is a trusted system library
        let entry = unsafe { xr::Entry::load() }
            .map_err(|e| HmdError::runtime("Failed to load OpenXR loader", format!("{:?}", e)))?;
        log::info!("OpenXR loader loaded");
        Ok(Self {
            entry,
            state: Mutex::new(BackendState::default()),
        })
    }
}

fn xr_err(context: &str, err: xr::sys::Result) -> HmdError {
    HmdError::runtime(context, format!("{:?}", err))
}

fn extension_names(set: &xr::ExtensionSet) -> Vec<String> {
    let mut names = Vec::new();
    if set.khr_opengl_enable {
        names.push("XR_KHR_opengl_enable".to_string());
    }
    if set.ext_debug_utils {
        names.push("XR_EXT_debug_utils".to_string());
    }
    if set.khr_vulkan_enable2 {
        names.push("XR_KHR_vulkan_enable2".to_string());
    }
    if set.khr_composition_layer_depth {
        names.push("XR_KHR_composition_layer_depth".to_string());
    }
    if set.ext_hand_tracking {
        names.push("XR_EXT_hand_tracking".to_string());
    }
    names.extend(set.other.iter().cloned());
    names
}

fn extension_set(names: &[String]) -> xr::ExtensionSet {
    let mut set = xr::ExtensionSet::default();
    for name in names {
        match name.as_str() {
            "XR_KHR_opengl_enable" => set.khr_opengl_enable = true,
            "XR_EXT_debug_utils" => set.ext_debug_utils = true,
            "XR_KHR_vulkan_enable2" => set.khr_vulkan_enable2 = true,
            "XR_KHR_composition_layer_depth" => set.khr_composition_layer_depth = true,
            "XR_EXT_hand_tracking" => set.ext_hand_tracking = true,
            other => set.other.push(other.to_string()),
        }
    }
    set
}

/// Application and engine versions travel as a single u32
fn pack_version(v: Version) -> u32 {
    ((v.major() as u32) << 22) | ((v.minor() as u32 & 0x3ff) << 12) | (v.patch() & 0xfff)
}

fn from_xr_version(v: xr::Version) -> Version {
    Version::new(v.major(), v.minor(), v.patch())
}

fn to_xr_form_factor(form_factor: FormFactor) -> xr::FormFactor {
    match form_factor {
        FormFactor::HeadMountedDisplay => xr::FormFactor::HEAD_MOUNTED_DISPLAY,
        FormFactor::HandheldDisplay => xr::FormFactor::HANDHELD_DISPLAY,
    }
}

fn to_xr_view_configuration(ty: ViewConfigurationType) -> xr::ViewConfigurationType {
    match ty {
        ViewConfigurationType::PrimaryMono => xr::ViewConfigurationType::PRIMARY_MONO,
        ViewConfigurationType::PrimaryStereo => xr::ViewConfigurationType::PRIMARY_STEREO,
    }
}

fn from_xr_view_configuration(ty: xr::ViewConfigurationType) -> Option<ViewConfigurationType> {
    match ty {
        xr::ViewConfigurationType::PRIMARY_MONO => Some(ViewConfigurationType::PrimaryMono),
        xr::ViewConfigurationType::PRIMARY_STEREO => Some(ViewConfigurationType::PrimaryStereo),
        _ => None,
    }
}

fn to_xr_blend_mode(mode: EnvironmentBlendMode) -> xr::EnvironmentBlendMode {
    match mode {
        EnvironmentBlendMode::Opaque => xr::EnvironmentBlendMode::OPAQUE,
        EnvironmentBlendMode::Additive => xr::EnvironmentBlendMode::ADDITIVE,
        EnvironmentBlendMode::AlphaBlend => xr::EnvironmentBlendMode::ALPHA_BLEND,
    }
}

fn from_xr_blend_mode(mode: xr::EnvironmentBlendMode) -> Option<EnvironmentBlendMode> {
    match mode {
        xr::EnvironmentBlendMode::OPAQUE => Some(EnvironmentBlendMode::Opaque),
        xr::EnvironmentBlendMode::ADDITIVE => Some(EnvironmentBlendMode::Additive),
        xr::EnvironmentBlendMode::ALPHA_BLEND => Some(EnvironmentBlendMode::AlphaBlend),
        _ => None,
    }
}

fn to_xr_reference_space(kind: ReferenceSpaceKind) -> xr::ReferenceSpaceType {
    match kind {
        ReferenceSpaceKind::View => xr::ReferenceSpaceType::VIEW,
        ReferenceSpaceKind::Local => xr::ReferenceSpaceType::LOCAL,
        ReferenceSpaceKind::Stage => xr::ReferenceSpaceType::STAGE,
    }
}

fn from_xr_reference_space(ty: xr::ReferenceSpaceType) -> Option<ReferenceSpaceKind> {
    match ty {
        xr::ReferenceSpaceType::VIEW => Some(ReferenceSpaceKind::View),
        xr::ReferenceSpaceType::LOCAL => Some(ReferenceSpaceKind::Local),
        xr::ReferenceSpaceType::STAGE => Some(ReferenceSpaceKind::Stage),
        _ => None,
    }
}

fn from_xr_session_state(state: xr::SessionState) -> Option<SessionState> {
    Some(match state {
        xr::SessionState::IDLE => SessionState::Idle,
        xr::SessionState::READY => SessionState::Ready,
        xr::SessionState::SYNCHRONIZED => SessionState::Synchronized,
        xr::SessionState::VISIBLE => SessionState::Visible,
        xr::SessionState::FOCUSED => SessionState::Focused,
        xr::SessionState::STOPPING => SessionState::Stopping,
        xr::SessionState::LOSS_PENDING => SessionState::LossPending,
        xr::SessionState::EXITING => SessionState::Exiting,
        _ => return None,
    })
}

fn to_xr_pose(pose: &Posef) -> xr::Posef {
    let q = pose.orientation;
    let p = pose.position;
    xr::Posef {
        orientation: xr::Quaternionf {
            x: q.x,
            y: q.y,
            z: q.z,
            w: q.w,
        },
        position: xr::Vector3f {
            x: p.x,
            y: p.y,
            z: p.z,
        },
    }
}

fn from_xr_pose(pose: &xr::Posef) -> Posef {
    let q = &pose.orientation;
    let p = &pose.position;
    Posef::new(Vec3::new(p.x, p.y, p.z), Quat::from_xyzw(q.x, q.y, q.z, q.w))
}

fn to_xr_fov(fov: &Fovf) -> xr::Fovf {
    xr::Fovf {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

fn from_xr_fov(fov: &xr::Fovf) -> Fovf {
    Fovf::new(fov.angle_left, fov.angle_right, fov.angle_up, fov.angle_down)
}

fn to_xr_rect(rect: &Rect2Di) -> xr::Rect2Di {
    xr::Rect2Di {
        offset: xr::Offset2Di {
            x: rect.offset.x,
            y: rect.offset.y,
        },
        extent: xr::Extent2Di {
            width: rect.extent.width,
            height: rect.extent.height,
        },
    }
}

unsafe extern "system" fn debug_callback(
    severity: xr::sys::DebugUtilsMessageSeverityFlagsEXT,
    _types: xr::sys::DebugUtilsMessageTypeFlagsEXT,
    data: *const xr::sys::DebugUtilsMessengerCallbackDataEXT,
    user_data: *mut c_void,
) -> xr::sys::Bool32 {
    if data.is_null() || user_data.is_null() {
        return xr::sys::FALSE;
    }
    let text = |p: *const c_char| {
        if p.is_null() {
            String::new()
        } else {
            CStr::from_ptr(p).to_string_lossy().into_owned()
        }
    };

    let sink = &*(user_data as *const DebugSink);
    let data = &*data;
    sink(&DebugMessage {
        severity: DebugSeverity::from_bits(severity.into_raw()),
        function_name: text(data.function_name),
        message: text(data.message),
    });
    xr::sys::FALSE
}

fn create_messenger(
    instance: &xr::Instance,
    severities: DebugSeverity,
    sink: DebugSink,
) -> HmdResult<DebugMessenger> {
    let ext = instance
        .exts()
        .ext_debug_utils
        .as_ref()
        .ok_or_else(|| HmdError::MissingExtension("XR_EXT_debug_utils".into()))?;

    let sink = Box::new(sink);
    let info = xr::sys::DebugUtilsMessengerCreateInfoEXT {
        ty: xr::sys::DebugUtilsMessengerCreateInfoEXT::TYPE,
        next: ptr::null(),
        message_severities: xr::sys::DebugUtilsMessageSeverityFlagsEXT::from_raw(
            severities.bits(),
        ),
        message_types: xr::sys::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | xr::sys::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | xr::sys::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
            | xr::sys::DebugUtilsMessageTypeFlagsEXT::CONFORMANCE,
        user_callback: Some(debug_callback),
        user_data: &*sink as *const DebugSink as *mut c_void,
    };

    let mut handle = xr::sys::DebugUtilsMessengerEXT::NULL;
    // SAFETY: `info` is fully initialized and `sink` outlives the messenger
    let result =
        unsafe { (ext.create_debug_utils_messenger)(instance.as_raw(), &info, &mut handle) };
    if result.into_raw() < 0 {
        return Err(xr_err("Failed to create debug messenger", result));
    }
    Ok(DebugMessenger {
        handle,
        _sink: sink,
    })
}

fn destroy_messenger(instance: &xr::Instance, messenger: DebugMessenger) {
    if let Some(ext) = instance.exts().ext_debug_utils.as_ref() {
        // SAFETY: the handle came from this instance and is destroyed once
        let result = unsafe { (ext.destroy_debug_utils_messenger)(messenger.handle) };
        if result.into_raw() < 0 {
            log::warn!("Failed to destroy debug messenger: {:?}", result);
        }
    }
}

impl XrRuntime for OpenXrRuntime {
    fn name(&self) -> &str {
        "OpenXR"
    }

    fn enumerate_api_layers(&self) -> HmdResult<Vec<ApiLayerProperties>> {
        let layers = self
            .entry
            .enumerate_layers()
            .map_err(|e| xr_err("Failed to enumerate API layers", e))?;
        Ok(layers
            .into_iter()
            .map(|l| ApiLayerProperties {
                name: l.layer_name,
                spec_version: from_xr_version(l.spec_version),
                layer_version: l.layer_version,
                description: l.description,
            })
            .collect())
    }

    fn enumerate_extensions(&self, layer: Option<&str>) -> HmdResult<Vec<ExtensionProperties>> {
        if let Some(layer) = layer {
            log::debug!("Per-layer extension listing unavailable for '{}'", layer);
            return Ok(Vec::new());
        }
        let set = self
            .entry
            .enumerate_extensions()
            .map_err(|e| xr_err("Failed to enumerate extensions", e))?;
        Ok(extension_names(&set)
            .into_iter()
            .map(|name| ExtensionProperties { name, version: 1 })
            .collect())
    }

    fn create_instance(
        &self,
        info: &InstanceCreateInfo,
        debug_sink: Option<DebugSink>,
    ) -> HmdResult<InstanceHandle> {
        let app = &info.application;
        let layers: Vec<&str> = info.enabled_api_layers.iter().map(String::as_str).collect();
        let instance = self
            .entry
            .create_instance(
                &xr::ApplicationInfo {
                    application_name: &app.application_name,
                    application_version: pack_version(app.application_version),
                    engine_name: &app.engine_name,
                    engine_version: pack_version(app.engine_version),
                },
                &extension_set(&info.enabled_extensions),
                &layers,
            )
            .map_err(|e| xr_err("Failed to create OpenXR instance", e))?;

        let messenger = match (info.debug_severities, debug_sink) {
            (Some(severities), Some(sink)) => {
                match create_messenger(&instance, severities, sink) {
                    Ok(messenger) => Some(messenger),
                    Err(e) => {
                        log::warn!("Runtime debug messages disabled: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(self.state.lock().instances.insert(InstanceRecord {
            instance,
            messenger,
        }))
    }

    fn destroy_instance(&self, instance: InstanceHandle) -> HmdResult<()> {
        let record = self
            .state
            .lock()
            .instances
            .remove(instance)
            .ok_or(HmdError::InvalidHandle { kind: "instance" })?;
        if let Some(messenger) = record.messenger {
            destroy_messenger(&record.instance, messenger);
        }
        Ok(())
    }

    fn instance_properties(&self, instance: InstanceHandle) -> HmdResult<RuntimeProperties> {
        let state = self.state.lock();
        let props = state
            .instance(instance)?
            .instance
            .properties()
            .map_err(|e| xr_err("Failed to get instance properties", e))?;
        Ok(RuntimeProperties {
            runtime_name: props.runtime_name,
            runtime_version: from_xr_version(props.runtime_version),
        })
    }

    fn get_system(&self, instance: InstanceHandle, form_factor: FormFactor) -> HmdResult<SystemId> {
        let state = self.state.lock();
        let system = state
            .instance(instance)?
            .instance
            .system(to_xr_form_factor(form_factor))
            .map_err(|e| xr_err("Failed to get XR system", e))?;
        Ok(SystemId(system.into_raw()))
    }

    fn system_properties(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> HmdResult<SystemProperties> {
        let state = self.state.lock();
        let props = state
            .instance(instance)?
            .instance
            .system_properties(xr::SystemId::from_raw(system.0))
            .map_err(|e| xr_err("Failed to get system properties", e))?;
        Ok(SystemProperties {
            system_id: system,
            vendor_id: props.vendor_id,
            system_name: props.system_name,
            max_swapchain_image_width: props.graphics_properties.max_swapchain_image_width,
            max_swapchain_image_height: props.graphics_properties.max_swapchain_image_height,
            max_layer_count: props.graphics_properties.max_layer_count,
            orientation_tracking: props.tracking_properties.orientation_tracking,
            position_tracking: props.tracking_properties.position_tracking,
        })
    }

    fn enumerate_view_configurations(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> HmdResult<Vec<ViewConfigurationType>> {
        let state = self.state.lock();
        let configs = state
            .instance(instance)?
            .instance
            .enumerate_view_configurations(xr::SystemId::from_raw(system.0))
            .map_err(|e| xr_err("Failed to enumerate view configurations", e))?;
        Ok(configs
            .into_iter()
            .filter_map(from_xr_view_configuration)
            .collect())
    }

    fn enumerate_view_configuration_views(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        view_configuration: ViewConfigurationType,
    ) -> HmdResult<Vec<ViewConfigurationView>> {
        let state = self.state.lock();
        let views = state
            .instance(instance)?
            .instance
            .enumerate_view_configuration_views(
                xr::SystemId::from_raw(system.0),
                to_xr_view_configuration(view_configuration),
            )
            .map_err(|e| xr_err("Failed to enumerate view configuration views", e))?;
        Ok(views
            .into_iter()
            .map(|v| ViewConfigurationView {
                recommended_image_rect_width: v.recommended_image_rect_width,
                max_image_rect_width: v.max_image_rect_width,
                recommended_image_rect_height: v.recommended_image_rect_height,
                max_image_rect_height: v.max_image_rect_height,
                recommended_swapchain_sample_count: v.recommended_swapchain_sample_count,
                max_swapchain_sample_count: v.max_swapchain_sample_count,
            })
            .collect())
    }

    fn enumerate_environment_blend_modes(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        view_configuration: ViewConfigurationType,
    ) -> HmdResult<Vec<EnvironmentBlendMode>> {
        let state = self.state.lock();
        let modes = state
            .instance(instance)?
            .instance
            .enumerate_environment_blend_modes(
                xr::SystemId::from_raw(system.0),
                to_xr_view_configuration(view_configuration),
            )
            .map_err(|e| xr_err("Failed to enumerate blend modes", e))?;
        Ok(modes.into_iter().filter_map(from_xr_blend_mode).collect())
    }

    fn graphics_requirements(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> HmdResult<GraphicsRequirements> {
        let state = self.state.lock();
        let reqs = state
            .instance(instance)?
            .instance
            .graphics_requirements::<xr::OpenGL>(xr::SystemId::from_raw(system.0))
            .map_err(|e| xr_err("Failed to get OpenGL requirements", e))?;
        Ok(GraphicsRequirements {
            min_api_version: from_xr_version(reqs.min_api_version_supported),
            max_api_version: from_xr_version(reqs.max_api_version_supported),
        })
    }

    fn create_session(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        binding: &GraphicsBinding,
    ) -> HmdResult<SessionHandle> {
        let info = match binding.platform {
            #[cfg(target_os = "linux")]
            PlatformBinding::Xlib {
                x_display,
                visual_id,
                glx_fb_config,
                glx_drawable,
                glx_context,
            } => xr::opengl::SessionCreateInfo::Xlib {
                x_display: x_display as *mut _,
                visualid: visual_id,
                glx_fb_config: glx_fb_config as *mut _,
                glx_drawable,
                glx_context: glx_context as *mut _,
            },
            #[cfg(target_os = "windows")]
            PlatformBinding::Win32 { h_dc, h_glrc } => xr::opengl::SessionCreateInfo::Windows {
                h_dc: h_dc as *mut _,
                h_glrc: h_glrc as *mut _,
            },
            other => {
                return Err(HmdError::UnsupportedPlatform(format!(
                    "OpenGL binding {:?} not available on this host",
                    other
                )))
            }
        };

        let mut state = self.state.lock();
        let xr_instance = state.instance(instance)?.instance.clone();
        // SAFETY: the host guarantees the context handles are valid and current
        let (session, frame_waiter, frame_stream) = unsafe {
            xr_instance.create_session::<xr::OpenGL>(xr::SystemId::from_raw(system.0), &info)
        }
        .map_err(|e| xr_err("Failed to create session", e))?;

        Ok(state.sessions.insert(SessionRecord {
            session,
            frame_waiter,
            frame_stream,
        }))
    }

    fn destroy_session(&self, session: SessionHandle) -> HmdResult<()> {
        self.state
            .lock()
            .sessions
            .remove(session)
            .map(drop)
            .ok_or(HmdError::InvalidHandle { kind: "session" })
    }

    fn enumerate_swapchain_formats(&self, session: SessionHandle) -> HmdResult<Vec<i64>> {
        let state = self.state.lock();
        let formats = state
            .session(session)?
            .session
            .enumerate_swapchain_formats()
            .map_err(|e| xr_err("Failed to enumerate swapchain formats", e))?;
        Ok(formats.into_iter().map(i64::from).collect())
    }

    fn enumerate_reference_spaces(
        &self,
        session: SessionHandle,
    ) -> HmdResult<Vec<ReferenceSpaceKind>> {
        let state = self.state.lock();
        let spaces = state
            .session(session)?
            .session
            .enumerate_reference_spaces()
            .map_err(|e| xr_err("Failed to enumerate reference spaces", e))?;
        Ok(spaces
            .into_iter()
            .filter_map(from_xr_reference_space)
            .collect())
    }

    fn begin_session(
        &self,
        session: SessionHandle,
        view_configuration: ViewConfigurationType,
    ) -> HmdResult<()> {
        let state = self.state.lock();
        state
            .session(session)?
            .session
            .begin(to_xr_view_configuration(view_configuration))
            .map_err(|e| xr_err("Failed to begin session", e))?;
        Ok(())
    }

    fn end_session(&self, session: SessionHandle) -> HmdResult<()> {
        let state = self.state.lock();
        state
            .session(session)?
            .session
            .end()
            .map_err(|e| xr_err("Failed to end session", e))?;
        Ok(())
    }

    fn poll_event(&self, instance: InstanceHandle) -> HmdResult<Option<RuntimeEvent>> {
        let state = self.state.lock();
        let mut buffer = xr::EventDataBuffer::new();
        let event = state
            .instance(instance)?
            .instance
            .poll_event(&mut buffer)
            .map_err(|e| xr_err("Failed to poll events", e))?;

        let Some(event) = event else {
            return Ok(None);
        };
        let event = match event {
            xr::Event::EventsLost(e) => RuntimeEvent::EventsLost {
                lost_event_count: e.lost_event_count(),
            },
            xr::Event::InstanceLossPending(e) => RuntimeEvent::InstanceLossPending {
                loss_time: XrTime::from_nanos(e.loss_time().as_nanos()),
            },
            xr::Event::SessionStateChanged(e) => match from_xr_session_state(e.state()) {
                Some(new_state) => RuntimeEvent::SessionStateChanged {
                    session: state.session_by_raw(e.session()),
                    state: new_state,
                    time: XrTime::from_nanos(e.time().as_nanos()),
                },
                None => RuntimeEvent::Unrecognized {
                    type_name: format!("session state {:?}", e.state()),
                },
            },
            xr::Event::InteractionProfileChanged(e) => RuntimeEvent::InteractionProfileChanged {
                session: state.session_by_raw(e.session()),
            },
            xr::Event::ReferenceSpaceChangePending(e) => {
                match from_xr_reference_space(e.reference_space_type()) {
                    Some(reference_space) => RuntimeEvent::ReferenceSpaceChangePending {
                        session: state.session_by_raw(e.session()),
                        reference_space,
                    },
                    None => RuntimeEvent::Unrecognized {
                        type_name: format!("reference space {:?}", e.reference_space_type()),
                    },
                }
            }
            _ => RuntimeEvent::Unrecognized {
                type_name: "unhandled OpenXR event".into(),
            },
        };
        Ok(Some(event))
    }

    fn wait_frame(&self, session: SessionHandle) -> HmdResult<FrameState> {
        let mut state = self.state.lock();
        let frame = state
            .session_mut(session)?
            .frame_waiter
            .wait()
            .map_err(|e| xr_err("Failed to wait frame", e))?;
        Ok(FrameState {
            predicted_display_time: XrTime::from_nanos(frame.predicted_display_time.as_nanos()),
            predicted_display_period: XrDuration::from_nanos(
                frame.predicted_display_period.as_nanos(),
            ),
            should_render: frame.should_render,
        })
    }

    fn begin_frame(&self, session: SessionHandle) -> HmdResult<()> {
        let mut state = self.state.lock();
        state
            .session_mut(session)?
            .frame_stream
            .begin()
            .map_err(|e| xr_err("Failed to begin frame", e))?;
        Ok(())
    }

    fn end_frame(&self, session: SessionHandle, submission: &FrameSubmission) -> HmdResult<()> {
        let mut guard = self.state.lock();
        let BackendState {
            sessions,
            spaces,
            swapchains,
            ..
        } = &mut *guard;

        // Views first: every layer borrows its view slice
        let mut layer_views = Vec::with_capacity(submission.layers.len());
        for layer in &submission.layers {
            let CompositionLayer::Projection(projection) = layer;
            let views = projection
                .views
                .iter()
                .map(|v| {
                    let swapchain = swapchains
                        .get(v.sub_image.swapchain)
                        .ok_or(HmdError::InvalidHandle { kind: "swapchain" })?;
                    Ok(xr::CompositionLayerProjectionView::new()
                        .pose(to_xr_pose(&v.pose))
                        .fov(to_xr_fov(&v.fov))
                        .sub_image(
                            xr::SwapchainSubImage::new()
                                .swapchain(swapchain)
                                .image_array_index(v.sub_image.image_array_index)
                                .image_rect(to_xr_rect(&v.sub_image.image_rect)),
                        ))
                })
                .collect::<HmdResult<Vec<_>>>()?;
            let space = spaces
                .get(projection.space)
                .ok_or(HmdError::InvalidHandle { kind: "space" })?;
            layer_views.push((space, views));
        }

        let layers: Vec<xr::CompositionLayerProjection<xr::OpenGL>> = layer_views
            .iter()
            .map(|(space, views)| {
                xr::CompositionLayerProjection::new()
                    .space(space)
                    .views(views)
            })
            .collect();
        let layer_refs: Vec<&xr::CompositionLayerBase<xr::OpenGL>> =
            layers.iter().map(|l| &**l).collect();

        let record = sessions
            .get_mut(session)
            .ok_or(HmdError::InvalidHandle { kind: "session" })?;
        record
            .frame_stream
            .end(
                xr::Time::from_nanos(submission.display_time.as_nanos()),
                to_xr_blend_mode(submission.blend_mode),
                &layer_refs,
            )
            .map_err(|e| xr_err("Failed to end frame", e))?;
        Ok(())
    }

    fn create_reference_space(
        &self,
        session: SessionHandle,
        kind: ReferenceSpaceKind,
        pose_in_space: Posef,
    ) -> HmdResult<SpaceHandle> {
        let mut state = self.state.lock();
        let space = state
            .session(session)?
            .session
            .create_reference_space(to_xr_reference_space(kind), to_xr_pose(&pose_in_space))
            .map_err(|e| xr_err("Failed to create reference space", e))?;
        Ok(state.spaces.insert(space))
    }

    fn destroy_space(&self, space: SpaceHandle) -> HmdResult<()> {
        self.state
            .lock()
            .spaces
            .remove(space)
            .map(drop)
            .ok_or(HmdError::InvalidHandle { kind: "space" })
    }

    fn locate_space(
        &self,
        space: SpaceHandle,
        base: SpaceHandle,
        time: XrTime,
    ) -> HmdResult<SpaceLocation> {
        let state = self.state.lock();
        let location = state
            .space(space)?
            .locate(state.space(base)?, xr::Time::from_nanos(time.as_nanos()))
            .map_err(|e| xr_err("Failed to locate space", e))?;
        Ok(SpaceLocation {
            flags: SpaceLocationFlags::from_bits(location.location_flags.into_raw()),
            pose: from_xr_pose(&location.pose),
        })
    }

    fn locate_views(
        &self,
        session: SessionHandle,
        view_configuration: ViewConfigurationType,
        display_time: XrTime,
        space: SpaceHandle,
    ) -> HmdResult<(ViewStateFlags, Vec<ViewLocation>)> {
        let state = self.state.lock();
        let (flags, views) = state
            .session(session)?
            .session
            .locate_views(
                to_xr_view_configuration(view_configuration),
                xr::Time::from_nanos(display_time.as_nanos()),
                state.space(space)?,
            )
            .map_err(|e| xr_err("Failed to locate views", e))?;
        Ok((
            ViewStateFlags::from_bits(flags.into_raw()),
            views
                .iter()
                .map(|v| ViewLocation {
                    pose: from_xr_pose(&v.pose),
                    fov: from_xr_fov(&v.fov),
                })
                .collect(),
        ))
    }

    fn create_swapchain(
        &self,
        session: SessionHandle,
        info: &SwapchainCreateInfo,
    ) -> HmdResult<SwapchainHandle> {
        let format = u32::try_from(info.format)
            .map_err(|_| HmdError::SwapchainState(format!("invalid format {:#x}", info.format)))?;
        let mut state = self.state.lock();
        let swapchain = state
            .session(session)?
            .session
            .create_swapchain(&xr::SwapchainCreateInfo {
                create_flags: xr::SwapchainCreateFlags::EMPTY,
                usage_flags: xr::SwapchainUsageFlags::from_raw(info.usage.bits()),
                format,
                sample_count: info.sample_count,
                width: info.width,
                height: info.height,
                face_count: info.face_count,
                array_size: info.array_size,
                mip_count: info.mip_count,
            })
            .map_err(|e| xr_err("Failed to create swapchain", e))?;
        Ok(state.swapchains.insert(swapchain))
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) -> HmdResult<()> {
        self.state
            .lock()
            .swapchains
            .remove(swapchain)
            .map(drop)
            .ok_or(HmdError::InvalidHandle { kind: "swapchain" })
    }

    fn enumerate_swapchain_images(&self, swapchain: SwapchainHandle) -> HmdResult<Vec<u64>> {
        let state = self.state.lock();
        let images = state
            .swapchain(swapchain)?
            .enumerate_images()
            .map_err(|e| xr_err("Failed to enumerate swapchain images", e))?;
        Ok(images.into_iter().map(u64::from).collect())
    }

    fn acquire_swapchain_image(&self, swapchain: SwapchainHandle) -> HmdResult<u32> {
        let mut state = self.state.lock();
        state
            .swapchain_mut(swapchain)?
            .acquire_image()
            .map_err(|e| xr_err("Failed to acquire swapchain image", e))
    }

    fn wait_swapchain_image(
        &self,
        swapchain: SwapchainHandle,
        timeout: XrDuration,
    ) -> HmdResult<()> {
        let mut state = self.state.lock();
        let timeout = if timeout == XrDuration::INFINITE {
            xr::Duration::INFINITE
        } else {
            xr::Duration::from_nanos(timeout.as_nanos())
        };
        state
            .swapchain_mut(swapchain)?
            .wait_image(timeout)
            .map_err(|e| xr_err("Failed to wait for swapchain image", e))
    }

    fn release_swapchain_image(&self, swapchain: SwapchainHandle) -> HmdResult<()> {
        let mut state = self.state.lock();
        state
            .swapchain_mut(swapchain)?
            .release_image()
            .map_err(|e| xr_err("Failed to release swapchain image", e))
    }

    fn string_to_path(&self, instance: InstanceHandle, path: &str) -> HmdResult<XrPath> {
        let state = self.state.lock();
        let path = state
            .instance(instance)?
            .instance
            .string_to_path(path)
            .map_err(|e| xr_err(&format!("Failed to create path '{}'", path), e))?;
        Ok(XrPath(path.into_raw()))
    }

    fn create_action_set(
        &self,
        instance: InstanceHandle,
        name: &str,
        localized_name: &str,
        priority: u32,
    ) -> HmdResult<ActionSetHandle> {
        let mut state = self.state.lock();
        let set = state
            .instance(instance)?
            .instance
            .create_action_set(name, localized_name, priority)
            .map_err(|e| xr_err("Failed to create action set", e))?;
        Ok(state.action_sets.insert(set))
    }

    fn destroy_action_set(&self, action_set: ActionSetHandle) -> HmdResult<()> {
        self.state
            .lock()
            .action_sets
            .remove(action_set)
            .map(drop)
            .ok_or(HmdError::InvalidHandle { kind: "action set" })
    }

    fn create_pose_action(
        &self,
        action_set: ActionSetHandle,
        name: &str,
        localized_name: &str,
        subaction_paths: &[XrPath],
    ) -> HmdResult<ActionHandle> {
        let mut state = self.state.lock();
        let paths: Vec<xr::Path> = subaction_paths
            .iter()
            .map(|p| xr::Path::from_raw(p.0))
            .collect();
        let action = state
            .action_sets
            .get(action_set)
            .ok_or(HmdError::InvalidHandle { kind: "action set" })?
            .create_action::<xr::Posef>(name, localized_name, &paths)
            .map_err(|e| xr_err("Failed to create pose action", e))?;
        Ok(state.actions.insert(ActionRecord { action }))
    }

    fn suggest_interaction_profile_bindings(
        &self,
        instance: InstanceHandle,
        profile: XrPath,
        bindings: &[SuggestedBinding],
    ) -> HmdResult<()> {
        let state = self.state.lock();
        let bindings = bindings
            .iter()
            .map(|b| {
                Ok(xr::Binding::new(
                    &state.action(b.action)?.action,
                    xr::Path::from_raw(b.binding.0),
                ))
            })
            .collect::<HmdResult<Vec<_>>>()?;
        state
            .instance(instance)?
            .instance
            .suggest_interaction_profile_bindings(xr::Path::from_raw(profile.0), &bindings)
            .map_err(|e| xr_err("Failed to suggest bindings", e))
    }

    fn create_action_space(
        &self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: XrPath,
        pose_in_action_space: Posef,
    ) -> HmdResult<SpaceHandle> {
        let mut state = self.state.lock();
        let xr_session = state.session(session)?.session.clone();
        let space = state
            .action(action)?
            .action
            .create_space(
                xr_session,
                xr::Path::from_raw(subaction_path.0),
                to_xr_pose(&pose_in_action_space),
            )
            .map_err(|e| xr_err("Failed to create action space", e))?;
        Ok(state.spaces.insert(space))
    }

    fn attach_action_sets(
        &self,
        session: SessionHandle,
        action_sets: &[ActionSetHandle],
    ) -> HmdResult<()> {
        let state = self.state.lock();
        let sets = action_sets
            .iter()
            .map(|h| {
                state
                    .action_sets
                    .get(*h)
                    .ok_or(HmdError::InvalidHandle { kind: "action set" })
            })
            .collect::<HmdResult<Vec<_>>>()?;
        state
            .session(session)?
            .session
            .attach_action_sets(&sets)
            .map_err(|e| xr_err("Failed to attach action sets", e))
    }

    fn sync_actions(&self, session: SessionHandle, active: &[ActiveActionSet]) -> HmdResult<()> {
        let state = self.state.lock();
        let active = active
            .iter()
            .map(|a| {
                let set = state
                    .action_sets
                    .get(a.action_set)
                    .ok_or(HmdError::InvalidHandle { kind: "action set" })?;
                Ok(xr::ActiveActionSet::new(set))
            })
            .collect::<HmdResult<Vec<_>>>()?;
        match state.session(session)?.session.sync_actions(&active) {
            Ok(()) => Ok(()),
            Err(xr::sys::Result::SESSION_NOT_FOCUSED) => Err(HmdError::SessionNotFocused),
            Err(e) => Err(xr_err("Failed to sync actions", e)),
        }
    }

    fn pose_action_state(
        &self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: XrPath,
    ) -> HmdResult<ActionStatePose> {
        let state = self.state.lock();
        let is_active = state
            .action(action)?
            .action
            .is_active(
                &state.session(session)?.session,
                xr::Path::from_raw(subaction_path.0),
            )
            .map_err(|e| xr_err("Failed to get pose action state", e))?;
        Ok(ActionStatePose { is_active })
    }
}

impl Drop for OpenXrRuntime {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let live = state.sessions.len() + state.swapchains.len() + state.spaces.len();
        if live > 0 {
            log::warn!("OpenXR runtime dropped with {} live objects", live);
        }

        // Children before their instance
        state.actions = HandleTable::new();
        state.action_sets = HandleTable::new();
        state.swapchains = HandleTable::new();
        state.spaces = HandleTable::new();
        state.sessions = HandleTable::new();

        let handles: Vec<InstanceHandle> = state.instances.iter().map(|(h, _)| h).collect();
        for handle in handles {
            if let Some(record) = state.instances.remove(handle) {
                if let Some(messenger) = record.messenger {
                    destroy_messenger(&record.instance, messenger);
                }
            }
        }
    }
}
