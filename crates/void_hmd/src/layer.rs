//! Projection layer composition
//!
//! A [`ProjectionLayer`] collects one [`ProjectionView`] per swapchain. It is
//! submitted only when the head pose was fully valid this frame and every view
//! was rendered.

use crate::error::{HmdError, HmdResult};
use crate::handle::SpaceHandle;
use crate::projection::{ClipSpace, ProjectionView};
use crate::session::Session;
use crate::space::Space;
use crate::swapchain::Swapchain;
use crate::types::{CompositionLayerProjection, ViewStateFlags};

pub struct ProjectionLayer {
    space: SpaceHandle,
    views: Vec<ProjectionView>,
    render_status: Vec<bool>,
    view_state: ViewStateFlags,
    pose_valid: bool,
}

impl ProjectionLayer {
    pub fn new(space: &Space, view_count: usize) -> Self {
        Self {
            space: space.handle(),
            views: (0..view_count).map(ProjectionView::new).collect(),
            render_status: vec![false; view_count],
            view_state: ViewStateFlags::empty(),
            pose_valid: false,
        }
    }

    /// Locate every view at the frame's predicted display time and reset the
    /// per-view render status.
    pub fn update_views(&mut self, session: &Session, swapchains: &[Swapchain]) -> HmdResult<()> {
        if swapchains.len() != self.views.len() {
            return Err(HmdError::ViewCountMismatch {
                expected: self.views.len(),
                actual: swapchains.len(),
            });
        }

        let (flags, locations) = session.runtime().locate_views(
            session.handle(),
            session.view_configuration(),
            session.predicted_display_time(),
            self.space,
        )?;
        if locations.len() != self.views.len() {
            return Err(HmdError::ViewCountMismatch {
                expected: self.views.len(),
                actual: locations.len(),
            });
        }

        for ((view, location), swapchain) in self.views.iter_mut().zip(&locations).zip(swapchains)
        {
            view.update(
                location.pose,
                location.fov,
                swapchain.handle(),
                swapchain.width(),
                swapchain.height(),
            );
        }

        self.render_status.fill(false);
        self.view_state = flags;
        self.pose_valid = flags.pose_valid();
        if !self.pose_valid {
            log::debug!("View pose not valid this frame: {:?}", flags);
        }
        Ok(())
    }

    /// Recompute every view's projection matrix
    pub fn update_projections(&mut self, near: f32, far: f32, clip: ClipSpace) {
        for view in &mut self.views {
            view.update_projection(near, far, clip);
        }
    }

    /// Mark view `index` as rendered for this frame
    pub fn render_swapchain(&mut self, index: usize) -> HmdResult<()> {
        let len = self.render_status.len();
        let status = self
            .render_status
            .get_mut(index)
            .ok_or(HmdError::OutOfRange {
                what: "views",
                index,
                len,
            })?;
        *status = true;
        Ok(())
    }

    pub fn layer_valid(&self) -> bool {
        self.pose_valid && self.render_status.iter().all(|rendered| *rendered)
    }

    pub fn pose_valid(&self) -> bool {
        self.pose_valid
    }

    pub fn view_state(&self) -> ViewStateFlags {
        self.view_state
    }

    pub fn render_status(&self) -> &[bool] {
        &self.render_status
    }

    pub fn views(&self) -> &[ProjectionView] {
        &self.views
    }

    pub fn view(&self, index: usize) -> Option<&ProjectionView> {
        self.views.get(index)
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn space(&self) -> SpaceHandle {
        self.space
    }

    pub fn to_composition_layer(&self) -> CompositionLayerProjection {
        CompositionLayerProjection {
            space: self.space,
            views: self.views.iter().map(|v| v.to_composition_view()).collect(),
        }
    }
}
