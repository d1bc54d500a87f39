//! Hand pose input
//!
//! One action set with a single pose action scoped to both hands. Each hand
//! gets its own action space, and each frame the located pose is written to
//! the host anchor linked to that hand. A hand whose pose is not fully valid
//! is hidden rather than left at its last position.

use glam::{Quat, Vec3};

use crate::error::{HmdError, HmdResult};
use crate::handle::{ActionHandle, ActionSetHandle, SpaceHandle};
use crate::instance::Instance;
use crate::projection::CoordinateSystem;
use crate::runtime::SharedRuntime;
use crate::session::Session;
use crate::space::Space;
use crate::types::{ActiveActionSet, SuggestedBinding, XrPath};

pub const LEFT_HAND_PATH: &str = "/user/hand/left";
pub const RIGHT_HAND_PATH: &str = "/user/hand/right";
pub const HAND_POSE_ACTION: &str = "hand_pose";
pub const SIMPLE_CONTROLLER_PROFILE: &str = "/interaction_profiles/khr/simple_controller";

const HAND_PATHS: [&str; 2] = [LEFT_HAND_PATH, RIGHT_HAND_PATH];

/// Host-side transform node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnchorId(pub u64);

/// Receives tracked poses, already converted to the engine's axes
pub trait PoseSink {
    /// Show the anchor and move it to the given pose
    fn update_pose(&mut self, anchor: AnchorId, position: Vec3, orientation: Quat);

    /// Hide the anchor until a valid pose arrives again
    fn hide(&mut self, anchor: AnchorId);
}

struct HandPose {
    name: &'static str,
    path: XrPath,
    space: Space,
    anchor: Option<AnchorId>,
}

pub struct ActionSet {
    runtime: SharedRuntime,
    handle: ActionSetHandle,
    pose_action: ActionHandle,
    app_space: SpaceHandle,
    hands: Vec<HandPose>,
    coordinate_system: CoordinateSystem,
    attached: bool,
}

impl ActionSet {
    pub fn new(
        instance: &Instance,
        session: &Session,
        app_space: &Space,
        name: &str,
        localized_name: &str,
        priority: u32,
        coordinate_system: CoordinateSystem,
    ) -> HmdResult<Self> {
        let runtime = instance.runtime().clone();
        let instance_handle = instance.handle();

        let paths = HAND_PATHS
            .iter()
            .map(|p| runtime.string_to_path(instance_handle, p))
            .collect::<HmdResult<Vec<_>>>()?;

        let handle = runtime.create_action_set(instance_handle, name, localized_name, priority)?;
        let pose_action =
            runtime.create_pose_action(handle, HAND_POSE_ACTION, "Hand pose", &paths)?;

        let profile = runtime.string_to_path(instance_handle, SIMPLE_CONTROLLER_PROFILE)?;
        let bindings = HAND_PATHS
            .iter()
            .map(|hand| {
                Ok(SuggestedBinding {
                    action: pose_action,
                    binding: runtime
                        .string_to_path(instance_handle, &format!("{}/input/grip/pose", hand))?,
                })
            })
            .collect::<HmdResult<Vec<_>>>()?;
        runtime.suggest_interaction_profile_bindings(instance_handle, profile, &bindings)?;
        log::info!(
            "Action set '{}' created, bindings suggested for {}",
            name,
            SIMPLE_CONTROLLER_PROFILE
        );

        let mut hands = Vec::with_capacity(HAND_PATHS.len());
        for (name, path) in HAND_PATHS.iter().zip(&paths) {
            hands.push(HandPose {
                name: *name,
                path: *path,
                space: Space::for_action(session, pose_action, *path)?,
                anchor: None,
            });
        }

        Ok(Self {
            runtime,
            handle,
            pose_action,
            app_space: app_space.handle(),
            hands,
            coordinate_system,
            attached: false,
        })
    }

    /// Route the pose for `path` to `anchor`
    pub fn link_pose(&mut self, path: &str, anchor: AnchorId) -> HmdResult<()> {
        let hand = self
            .hands
            .iter_mut()
            .find(|h| h.name == path)
            .ok_or_else(|| HmdError::UnknownSubactionPath(path.to_string()))?;
        hand.anchor = Some(anchor);
        Ok(())
    }

    /// Bind the action set to the session. Allowed once.
    pub fn attach(&mut self, session: &Session) -> HmdResult<()> {
        if self.attached {
            return Err(HmdError::ActionSetAttached);
        }
        self.runtime
            .attach_action_sets(session.handle(), &[self.handle])?;
        self.attached = true;
        log::debug!("Action set attached");
        Ok(())
    }

    /// Sync input and push hand poses to `sink`.
    ///
    /// Returns [`HmdError::SessionNotFocused`] when the runtime refuses to sync
    /// outside the focused state. Every linked hand is hidden first.
    pub fn poll_actions(&self, session: &Session, sink: &mut dyn PoseSink) -> HmdResult<()> {
        if !session.is_active() {
            return Ok(());
        }
        if !self.attached {
            return Err(HmdError::ActionSetNotAttached);
        }

        let synced = self.runtime.sync_actions(
            session.handle(),
            &[ActiveActionSet {
                action_set: self.handle,
                subaction_path: XrPath::NULL,
            }],
        );
        if let Err(e) = synced {
            if e == HmdError::SessionNotFocused {
                self.hide_all(sink);
            }
            return Err(e);
        }

        let time = session.predicted_display_time();
        for hand in &self.hands {
            let Some(anchor) = hand.anchor else {
                continue;
            };

            let state = self
                .runtime
                .pose_action_state(session.handle(), self.pose_action, hand.path)?;
            let location = if state.is_active {
                Some(
                    self.runtime
                        .locate_space(hand.space.handle(), self.app_space, time)?,
                )
            } else {
                None
            };

            match location {
                Some(location) if location.flags.pose_valid() => {
                    let cs = self.coordinate_system;
                    sink.update_pose(
                        anchor,
                        cs.convert_position(location.pose.position),
                        cs.convert_orientation(location.pose.orientation),
                    );
                }
                _ => sink.hide(anchor),
            }
        }
        Ok(())
    }

    /// Hide every linked hand anchor
    pub fn hide_all(&self, sink: &mut dyn PoseSink) {
        for anchor in self.hands.iter().filter_map(|h| h.anchor) {
            sink.hide(anchor);
        }
    }

    pub fn handle(&self) -> ActionSetHandle {
        self.handle
    }

    pub fn pose_action(&self) -> ActionHandle {
        self.pose_action
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Action space tracking `path`
    pub fn hand_space(&self, path: &str) -> Option<&Space> {
        self.hands.iter().find(|h| h.name == path).map(|h| &h.space)
    }
}

impl Drop for ActionSet {
    fn drop(&mut self) {
        // Action spaces go before the set that owns their action
        self.hands.clear();
        if let Err(e) = self.runtime.destroy_action_set(self.handle) {
            log::error!("Failed to destroy action set: {}", e);
        }
    }
}
