//! Per-frame orchestration against the host engine
//!
//! [`HmdDriver`] owns the whole client stack and exposes the frame as a set
//! of steps the host scheduler runs in [`FrameStep`] order:
//!
//! | Step          | Priority | Work                                        |
//! |---------------|----------|---------------------------------------------|
//! | `PollEvents`  | -1000    | drain runtime events, surface exit requests |
//! | `WaitFrame`   | -999     | wait for timing, begin the frame            |
//! | `UpdateViews` | -100     | locate views, update cameras and HMD anchor |
//! | `PollActions` | -40      | sync input, move hand anchors               |
//! | `EndFrame`    | 1000     | submit if the draw hooks did not            |
//!
//! Between `PollActions` and `EndFrame` the host draws each view through
//! [`HmdDriver::render_view`]; the last view submits the frame. A latch keeps
//! `EndFrame` from submitting a second time.

use glam::{Mat4, Quat, Vec3};

use crate::action_set::{ActionSet, AnchorId, PoseSink, LEFT_HAND_PATH, RIGHT_HAND_PATH};
use crate::config::HmdConfig;
use crate::error::{HmdError, HmdResult};
use crate::instance::{Instance, InstanceConfig};
use crate::layer::ProjectionLayer;
use crate::runtime::SharedRuntime;
use crate::session::{ExitReason, Session, SessionControl};
use crate::space::Space;
use crate::swapchain::Swapchain;
use crate::system::System;
use crate::types::{GraphicsBinding, ReferenceSpaceKind, SwapchainImage};

/// Host engine services used by the driver
pub trait HostEngine: PoseSink {
    /// Create a transform node, optionally parented to another anchor
    fn create_anchor(&mut self, name: &str, parent: Option<AnchorId>) -> AnchorId;

    /// Set the projection and pose of the camera rendering `view_index`.
    /// Cameras live in the tracking space.
    fn set_camera(&mut self, view_index: usize, projection: Mat4, position: Vec3, orientation: Quat);

    /// Leave the run loop
    fn request_exit(&mut self, reason: ExitReason);
}

/// Scene-graph nodes created at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchors {
    /// Root of everything tracked in the application space
    pub tracking_space: AnchorId,
    pub hmd: AnchorId,
    pub view_space: AnchorId,
    pub left_hand: AnchorId,
    pub right_hand: AnchorId,
}

/// What a draw hook renders into
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTarget {
    pub view_index: usize,
    pub image: SwapchainImage,
    pub width: u32,
    pub height: u32,
    /// Engine-space projection
    pub projection: Mat4,
    pub position: Vec3,
    pub orientation: Quat,
}

/// Scheduled per-frame steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameStep {
    PollEvents,
    WaitFrame,
    UpdateViews,
    PollActions,
    EndFrame,
}

impl FrameStep {
    pub const ALL: [FrameStep; 5] = [
        FrameStep::PollEvents,
        FrameStep::WaitFrame,
        FrameStep::UpdateViews,
        FrameStep::PollActions,
        FrameStep::EndFrame,
    ];

    /// Scheduler sort key; lower runs first
    pub fn priority(&self) -> i32 {
        match self {
            Self::PollEvents => -1000,
            Self::WaitFrame => -999,
            Self::UpdateViews => -100,
            Self::PollActions => -40,
            Self::EndFrame => 1000,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PollEvents => "hmd_poll_events",
            Self::WaitFrame => "hmd_wait_frame",
            Self::UpdateViews => "hmd_update_views",
            Self::PollActions => "hmd_poll_actions",
            Self::EndFrame => "hmd_end_frame",
        }
    }
}

/// Owns the client stack. Field order is teardown order.
pub struct HmdDriver {
    layer: ProjectionLayer,
    action_set: ActionSet,
    swapchains: Vec<Swapchain>,
    view_space: Space,
    tracking_space: Space,
    session: Session,
    system: System,
    instance: Instance,
    config: HmdConfig,
    anchors: Anchors,
    end_frame_called: bool,
    exit: Option<ExitReason>,
    frame_count: u64,
}

impl HmdDriver {
    pub fn new<H: HostEngine>(
        runtime: SharedRuntime,
        config: HmdConfig,
        graphics_binding: GraphicsBinding,
        host: &mut H,
    ) -> HmdResult<Self> {
        config.validate()?;
        log::info!("Initializing HMD client on {} runtime", runtime.name());

        let instance = Instance::new(
            runtime,
            &InstanceConfig {
                application_name: config.application.name.clone(),
                application_version: config.application.version,
                extensions: config.extensions.clone(),
                api_layers: Vec::new(),
                debug: config.debug,
            },
        )?;
        let system = System::new(
            &instance,
            config.form_factor,
            config.view_configuration,
            graphics_binding.api_version,
        )?;
        let session = Session::new(&instance, &system, graphics_binding, config.blend_mode)?;

        let tracking_space = Space::new(&session, config.reference_space)?;
        let view_space = Space::new(&session, ReferenceSpaceKind::View)?;

        let swapchains = system
            .views()
            .iter()
            .map(|view| Swapchain::new(&session, view, &config.swapchain))
            .collect::<HmdResult<Vec<_>>>()?;
        let layer = ProjectionLayer::new(&tracking_space, swapchains.len());

        let mut action_set = ActionSet::new(
            &instance,
            &session,
            &tracking_space,
            "default",
            "Default action set",
            0,
            config.coordinate_system,
        )?;

        let tracking = host.create_anchor("tracking-space-anchor", None);
        let anchors = Anchors {
            tracking_space: tracking,
            hmd: host.create_anchor("hmd-anchor", Some(tracking)),
            view_space: host.create_anchor("view-space", None),
            left_hand: host.create_anchor("left-hand-anchor", Some(tracking)),
            right_hand: host.create_anchor("right-hand-anchor", Some(tracking)),
        };

        action_set.link_pose(LEFT_HAND_PATH, anchors.left_hand)?;
        action_set.link_pose(RIGHT_HAND_PATH, anchors.right_hand)?;
        action_set.attach(&session)?;

        log::info!(
            "HMD client ready: {} views, {} space, near {} far {}",
            swapchains.len(),
            config.reference_space,
            config.near,
            if config.infinite_far() {
                "inf".to_string()
            } else {
                config.far.to_string()
            }
        );

        Ok(Self {
            layer,
            action_set,
            swapchains,
            view_space,
            tracking_space,
            session,
            system,
            instance,
            config,
            anchors,
            end_frame_called: false,
            exit: None,
            frame_count: 0,
        })
    }

    /// Drain runtime events. An exit request is forwarded to the host once.
    pub fn poll_events<H: HostEngine>(&mut self, host: &mut H) -> HmdResult<SessionControl> {
        let control = self.session.poll_events()?;
        if let SessionControl::Exit(reason) = control {
            if self.exit.is_none() {
                log::info!("Runtime requested exit: {:?}", reason);
                self.exit = Some(reason);
                host.request_exit(reason);
            }
        }
        Ok(control)
    }

    /// Wait for frame timing and begin the frame
    pub fn wait_frame(&mut self) -> HmdResult<bool> {
        if !self.session.is_active() {
            return Ok(false);
        }
        self.session.wait_frame()?;
        self.session.begin_frame()?;
        self.end_frame_called = false;
        Ok(true)
    }

    /// Locate the views and update cameras. Returns whether the pose was valid.
    pub fn update_views<H: HostEngine>(&mut self, host: &mut H) -> HmdResult<bool> {
        if !self.session.is_active() || !self.session.should_render() {
            return Ok(false);
        }

        self.layer.update_views(&self.session, &self.swapchains)?;

        let cs = self.config.coordinate_system;
        let head = self
            .view_space
            .locate(&self.tracking_space, self.session.predicted_display_time())?;
        if head.flags.pose_valid() {
            host.update_pose(
                self.anchors.hmd,
                cs.convert_position(head.pose.position),
                cs.convert_orientation(head.pose.orientation),
            );
        } else {
            host.hide(self.anchors.hmd);
        }

        if !self.layer.pose_valid() {
            return Ok(false);
        }

        self.layer
            .update_projections(self.config.near, self.config.far, self.config.clip_space);
        for view in self.layer.views() {
            host.set_camera(
                view.index(),
                view.engine_projection(cs),
                view.engine_position(cs),
                view.engine_orientation(cs),
            );
        }
        Ok(true)
    }

    /// Sync input and move the hand anchors
    pub fn poll_actions<H: HostEngine>(&mut self, host: &mut H) -> HmdResult<()> {
        match self.action_set.poll_actions(&self.session, host) {
            Err(HmdError::SessionNotFocused) => Ok(()),
            other => other,
        }
    }

    /// Draw hook for one view: acquire, draw, release. The last view ends the
    /// frame. Returns `false` when the frame is not being rendered.
    pub fn render_view<F>(&mut self, index: usize, draw: F) -> HmdResult<bool>
    where
        F: FnOnce(&RenderTarget),
    {
        if !self.session.is_active() || !self.session.should_render() || !self.layer.pose_valid()
        {
            return Ok(false);
        }

        let count = self.swapchains.len();
        let view = *self.layer.view(index).ok_or(HmdError::OutOfRange {
            what: "views",
            index,
            len: count,
        })?;
        let swapchain = &mut self.swapchains[index];

        let image = swapchain.acquire_image_info()?;

        let cs = self.config.coordinate_system;
        draw(&RenderTarget {
            view_index: index,
            image,
            width: swapchain.width(),
            height: swapchain.height(),
            projection: view.engine_projection(cs),
            position: view.engine_position(cs),
            orientation: view.engine_orientation(cs),
        });

        swapchain.release_image_info()?;
        self.layer.render_swapchain(index)?;

        if index + 1 == count {
            if self.session.end_frame(&self.layer)? {
                self.frame_count += 1;
            }
            self.end_frame_called = true;
        }
        Ok(true)
    }

    /// Run the draw hook for every view in order
    pub fn render_views<F>(&mut self, mut draw: F) -> HmdResult<()>
    where
        F: FnMut(&RenderTarget),
    {
        for index in 0..self.swapchains.len() {
            if !self.render_view(index, &mut draw)? {
                break;
            }
        }
        Ok(())
    }

    /// Submit the frame unless a draw hook already did
    pub fn end_frame(&mut self) -> HmdResult<bool> {
        if !self.session.is_active() || self.end_frame_called {
            return Ok(false);
        }
        let submitted = self.session.end_frame(&self.layer)?;
        self.end_frame_called = true;
        if submitted {
            self.frame_count += 1;
        }
        Ok(submitted)
    }

    /// Run one scheduled step
    pub fn run_step<H: HostEngine>(&mut self, step: FrameStep, host: &mut H) -> HmdResult<()> {
        match step {
            FrameStep::PollEvents => self.poll_events(host).map(|_| ()),
            FrameStep::WaitFrame => self.wait_frame().map(|_| ()),
            FrameStep::UpdateViews => self.update_views(host).map(|_| ()),
            FrameStep::PollActions => self.poll_actions(host),
            FrameStep::EndFrame => self.end_frame().map(|_| ()),
        }
    }

    /// One full frame: every step in order with the draw hooks in between
    pub fn run_frame<H, F>(&mut self, host: &mut H, draw: F) -> HmdResult<SessionControl>
    where
        H: HostEngine,
        F: FnMut(&RenderTarget),
    {
        let control = self.poll_events(host)?;
        if let SessionControl::Exit(_) = control {
            return Ok(control);
        }
        self.wait_frame()?;

        // A begun frame is always ended, even when drawing failed
        let drawn = self.draw_frame(host, draw);
        let ended = self.end_frame();
        drawn?;
        ended?;
        Ok(SessionControl::Continue)
    }

    fn draw_frame<H, F>(&mut self, host: &mut H, draw: F) -> HmdResult<()>
    where
        H: HostEngine,
        F: FnMut(&RenderTarget),
    {
        self.update_views(host)?;
        self.poll_actions(host)?;
        self.render_views(draw)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn layer(&self) -> &ProjectionLayer {
        &self.layer
    }

    pub fn swapchains(&self) -> &[Swapchain] {
        &self.swapchains
    }

    pub fn action_set(&self) -> &ActionSet {
        &self.action_set
    }

    pub fn tracking_space(&self) -> &Space {
        &self.tracking_space
    }

    pub fn view_space(&self) -> &Space {
        &self.view_space
    }

    pub fn anchors(&self) -> &Anchors {
        &self.anchors
    }

    pub fn config(&self) -> &HmdConfig {
        &self.config
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit
    }

    /// Frames submitted so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl Drop for HmdDriver {
    fn drop(&mut self) {
        log::debug!("Shutting down HMD client after {} frames", self.frame_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_priorities_are_ordered() {
        let priorities: Vec<i32> = FrameStep::ALL.iter().map(|s| s.priority()).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
        assert_eq!(priorities, vec![-1000, -999, -100, -40, 1000]);
    }
}
