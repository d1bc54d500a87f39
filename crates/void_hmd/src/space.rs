//! Reference and action spaces

use crate::error::HmdResult;
use crate::handle::{ActionHandle, SpaceHandle};
use crate::runtime::SharedRuntime;
use crate::session::Session;
use crate::types::{Posef, ReferenceSpaceKind, SpaceLocation, XrPath, XrTime};

/// What a space is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceOrigin {
    Reference(ReferenceSpaceKind),
    /// Pose action for one subaction path
    Action { action: ActionHandle, path: XrPath },
}

/// A coordinate frame poses are expressed in. Destroyed on drop.
pub struct Space {
    runtime: SharedRuntime,
    handle: SpaceHandle,
    origin: SpaceOrigin,
}

impl Space {
    pub fn new(session: &Session, kind: ReferenceSpaceKind) -> HmdResult<Self> {
        let runtime = session.runtime().clone();
        let handle = runtime.create_reference_space(session.handle(), kind, Posef::IDENTITY)?;
        log::debug!("Created {} reference space", kind);
        Ok(Self {
            runtime,
            handle,
            origin: SpaceOrigin::Reference(kind),
        })
    }

    pub(crate) fn for_action(
        session: &Session,
        action: ActionHandle,
        path: XrPath,
    ) -> HmdResult<Self> {
        let runtime = session.runtime().clone();
        let handle =
            runtime.create_action_space(session.handle(), action, path, Posef::IDENTITY)?;
        Ok(Self {
            runtime,
            handle,
            origin: SpaceOrigin::Action { action, path },
        })
    }

    pub fn handle(&self) -> SpaceHandle {
        self.handle
    }

    pub fn origin(&self) -> SpaceOrigin {
        self.origin
    }

    /// Locate this space relative to `base` at `time`
    pub fn locate(&self, base: &Space, time: XrTime) -> HmdResult<SpaceLocation> {
        self.runtime.locate_space(self.handle, base.handle, time)
    }
}

impl Drop for Space {
    fn drop(&mut self) {
        if let Err(e) = self.runtime.destroy_space(self.handle) {
            log::error!("Failed to destroy space {:?}: {}", self.handle, e);
        }
    }
}
