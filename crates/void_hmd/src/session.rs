//! Session lifecycle and frame protocol
//!
//! The runtime drives the session through [`SessionState`] by delivering
//! events; the application never sets the state itself. Entering `Ready`
//! begins the session and entering `Stopping` ends it, once per entry.
//!
//! While the session is active every frame runs
//! [`Session::wait_frame`] → [`Session::begin_frame`] → render →
//! [`Session::end_frame`]. Outside the active states these calls do nothing.

use crate::error::{HmdError, HmdResult};
use crate::handle::{InstanceHandle, SessionHandle};
use crate::instance::Instance;
use crate::layer::ProjectionLayer;
use crate::runtime::SharedRuntime;
use crate::system::System;
use crate::types::{
    CompositionLayer, EnvironmentBlendMode, FrameState, FrameSubmission, GraphicsBinding,
    ReferenceSpaceKind, RuntimeEvent, ViewConfigurationType, XrTime,
};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Created, waiting for the runtime
    #[default]
    Idle,
    /// The runtime wants the session to begin
    Ready,
    /// Frame loop running, nothing visible yet
    Synchronized,
    /// Frames are shown to the user
    Visible,
    /// Frames are shown and input is routed to the application
    Focused,
    /// The runtime wants the session to end
    Stopping,
    /// The application should exit
    Exiting,
    /// The session is about to be lost
    LossPending,
}

impl SessionState {
    /// States in which the frame protocol may run
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Synchronized | Self::Visible | Self::Focused
        )
    }

    /// Whether `next` is an edge of the lifecycle graph
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        if next == LossPending {
            return *self != LossPending;
        }
        matches!(
            (self, next),
            (Idle, Ready)
                | (Idle, Exiting)
                | (Ready, Synchronized)
                | (Synchronized, Visible)
                | (Synchronized, Stopping)
                | (Visible, Focused)
                | (Visible, Synchronized)
                | (Focused, Visible)
                | (Stopping, Idle)
        )
    }
}

/// Why the host should leave its run loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Exiting,
    LossPending,
    InstanceLossPending,
}

/// Outcome of draining the event queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    Continue,
    Exit(ExitReason),
}

/// Where the current frame is in the wait/begin/end sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePhase {
    #[default]
    Idle,
    Waited,
    Begun,
}

/// Rendering session bound to the host's graphics context
pub struct Session {
    runtime: SharedRuntime,
    instance: InstanceHandle,
    handle: SessionHandle,
    view_configuration: ViewConfigurationType,
    graphics_binding: GraphicsBinding,
    blend_mode: EnvironmentBlendMode,
    state: SessionState,
    running: bool,
    frame_state: FrameState,
    phase: FramePhase,
    swapchain_formats: Vec<i64>,
    reference_spaces: Vec<ReferenceSpaceKind>,
}

impl Session {
    pub fn new(
        instance: &Instance,
        system: &System,
        graphics_binding: GraphicsBinding,
        blend_mode: EnvironmentBlendMode,
    ) -> HmdResult<Self> {
        if !graphics_binding.platform.is_supported_on_host() {
            return Err(HmdError::UnsupportedPlatform(format!(
                "{:?} binding on {}",
                graphics_binding.platform,
                std::env::consts::OS
            )));
        }

        let runtime = instance.runtime().clone();
        let handle = runtime.create_session(instance.handle(), system.id(), &graphics_binding)?;
        log::info!("Session created: {:?}", handle);

        let swapchain_formats = runtime.enumerate_swapchain_formats(handle)?;
        log::info!("Supported swapchain formats:");
        for format in &swapchain_formats {
            log::info!("  - {:#x}", format);
        }

        let reference_spaces = runtime.enumerate_reference_spaces(handle)?;
        log::info!("Supported reference spaces: {:?}", reference_spaces);

        let blend_mode = if system.blend_modes().is_empty() || system.supports_blend_mode(blend_mode)
        {
            blend_mode
        } else {
            let fallback = system.blend_modes()[0];
            log::warn!(
                "Blend mode {:?} not supported, using {:?}",
                blend_mode,
                fallback
            );
            fallback
        };

        Ok(Self {
            runtime,
            instance: instance.handle(),
            handle,
            view_configuration: system.view_configuration(),
            graphics_binding,
            blend_mode,
            state: SessionState::Idle,
            running: false,
            frame_state: FrameState::default(),
            phase: FramePhase::Idle,
            swapchain_formats,
            reference_spaces,
        })
    }

    /// Drain the runtime event queue and apply state changes
    pub fn poll_events(&mut self) -> HmdResult<SessionControl> {
        while let Some(event) = self.runtime.poll_event(self.instance)? {
            match event {
                RuntimeEvent::EventsLost { lost_event_count } => {
                    log::warn!("{} runtime events lost", lost_event_count);
                }
                RuntimeEvent::InstanceLossPending { loss_time } => {
                    log::warn!("Instance loss pending at {:?}", loss_time);
                    return Ok(SessionControl::Exit(ExitReason::InstanceLossPending));
                }
                RuntimeEvent::SessionStateChanged {
                    session,
                    state,
                    time,
                } => {
                    if session != self.handle {
                        log::error!("State change for unknown session {:?}", session);
                        continue;
                    }
                    if let SessionControl::Exit(reason) = self.handle_state_change(state, time)? {
                        return Ok(SessionControl::Exit(reason));
                    }
                }
                RuntimeEvent::InteractionProfileChanged { .. } => {
                    log::info!("Interaction profile changed");
                }
                RuntimeEvent::ReferenceSpaceChangePending {
                    reference_space, ..
                } => {
                    log::info!("Reference space change pending: {}", reference_space);
                }
                RuntimeEvent::Unrecognized { type_name } => {
                    log::debug!("Ignoring event {}", type_name);
                }
            }
        }
        Ok(SessionControl::Continue)
    }

    fn handle_state_change(
        &mut self,
        state: SessionState,
        time: XrTime,
    ) -> HmdResult<SessionControl> {
        let previous = self.state;
        log::info!(
            "Session state changed: {:?} -> {:?} at {:.3}s",
            previous,
            state,
            time.as_secs_f64()
        );
        if previous == state {
            return Ok(SessionControl::Continue);
        }
        if !previous.can_transition_to(state) {
            log::warn!("Unexpected session transition {:?} -> {:?}", previous, state);
        }
        self.state = state;

        match state {
            SessionState::Ready => {
                self.runtime
                    .begin_session(self.handle, self.view_configuration)?;
                self.running = true;
                self.phase = FramePhase::Idle;
                log::info!("Session begun ({})", self.view_configuration);
            }
            SessionState::Stopping => {
                self.runtime.end_session(self.handle)?;
                self.running = false;
                self.phase = FramePhase::Idle;
                log::info!("Session ended");
            }
            SessionState::Exiting => return Ok(SessionControl::Exit(ExitReason::Exiting)),
            SessionState::LossPending => {
                return Ok(SessionControl::Exit(ExitReason::LossPending))
            }
            _ => {}
        }
        Ok(SessionControl::Continue)
    }

    /// Wait for the runtime's next frame timing.
    ///
    /// Returns `None` without calling the runtime while the session is inactive.
    pub fn wait_frame(&mut self) -> HmdResult<Option<FrameState>> {
        if !self.is_active() {
            return Ok(None);
        }
        if self.phase != FramePhase::Idle {
            return Err(HmdError::FrameOrder(format!(
                "wait_frame called in phase {:?}",
                self.phase
            )));
        }
        self.frame_state = self.runtime.wait_frame(self.handle)?;
        self.phase = FramePhase::Waited;
        Ok(Some(self.frame_state))
    }

    /// Mark the start of rendering. Must follow [`Session::wait_frame`].
    pub fn begin_frame(&mut self) -> HmdResult<bool> {
        if !self.is_active() {
            return Ok(false);
        }
        if self.phase != FramePhase::Waited {
            return Err(HmdError::FrameOrder(format!(
                "begin_frame called in phase {:?}",
                self.phase
            )));
        }
        if let Err(e) = self.runtime.begin_frame(self.handle) {
            // The wait is consumed either way
            self.phase = FramePhase::Idle;
            return Err(e);
        }
        self.phase = FramePhase::Begun;
        Ok(true)
    }

    /// Submit the frame. The layer is included only if the runtime asked for
    /// rendering and the layer is complete; otherwise nothing is composited.
    ///
    /// Returns `false` when no frame is open, so a second call is harmless.
    pub fn end_frame(&mut self, layer: &ProjectionLayer) -> HmdResult<bool> {
        if self.phase != FramePhase::Begun {
            return Ok(false);
        }

        let mut layers = Vec::new();
        if self.frame_state.should_render && layer.layer_valid() {
            layers.push(CompositionLayer::Projection(layer.to_composition_layer()));
        }
        let submission = FrameSubmission {
            display_time: self.frame_state.predicted_display_time,
            blend_mode: self.blend_mode,
            layers,
        };

        self.phase = FramePhase::Idle;
        self.runtime.end_frame(self.handle, &submission)?;
        log::trace!(
            "Frame submitted at {:?} with {} layer(s)",
            submission.display_time,
            submission.layers.len()
        );
        Ok(true)
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Begun and not yet ended
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn frame_state(&self) -> &FrameState {
        &self.frame_state
    }

    pub fn should_render(&self) -> bool {
        self.frame_state.should_render
    }

    pub fn predicted_display_time(&self) -> XrTime {
        self.frame_state.predicted_display_time
    }

    pub fn frame_phase(&self) -> FramePhase {
        self.phase
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn instance(&self) -> InstanceHandle {
        self.instance
    }

    pub fn runtime(&self) -> &SharedRuntime {
        &self.runtime
    }

    pub fn view_configuration(&self) -> ViewConfigurationType {
        self.view_configuration
    }

    pub fn graphics_binding(&self) -> &GraphicsBinding {
        &self.graphics_binding
    }

    pub fn blend_mode(&self) -> EnvironmentBlendMode {
        self.blend_mode
    }

    pub fn swapchain_formats(&self) -> &[i64] {
        &self.swapchain_formats
    }

    pub fn reference_spaces(&self) -> &[ReferenceSpaceKind] {
        &self.reference_spaces
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.runtime.destroy_session(self.handle) {
            log::error!("Failed to destroy session: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionState; 8] = [
        SessionState::Idle,
        SessionState::Ready,
        SessionState::Synchronized,
        SessionState::Visible,
        SessionState::Focused,
        SessionState::Stopping,
        SessionState::Exiting,
        SessionState::LossPending,
    ];

    #[test]
    fn test_active_states() {
        let active: Vec<_> = ALL.iter().filter(|s| s.is_active()).copied().collect();
        assert_eq!(
            active,
            vec![
                SessionState::Ready,
                SessionState::Synchronized,
                SessionState::Visible,
                SessionState::Focused
            ]
        );
    }

    #[test]
    fn test_lifecycle_path() {
        let path = [
            SessionState::Idle,
            SessionState::Ready,
            SessionState::Synchronized,
            SessionState::Visible,
            SessionState::Focused,
            SessionState::Visible,
            SessionState::Synchronized,
            SessionState::Stopping,
            SessionState::Idle,
            SessionState::Exiting,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_off_graph_transitions() {
        assert!(!SessionState::Idle.can_transition_to(SessionState::Focused));
        assert!(!SessionState::Focused.can_transition_to(SessionState::Stopping));
        assert!(!SessionState::Exiting.can_transition_to(SessionState::Ready));
        for state in ALL {
            if state != SessionState::LossPending {
                assert!(state.can_transition_to(SessionState::LossPending));
            }
        }
    }
}
