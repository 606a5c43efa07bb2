use crate::{profile::ProfileId, system::ProcessHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Starting(ProfileId),
    Running(ProfileId),
    Stopping(ProfileId),
}

impl ConnectionState {
    pub fn profile_id(&self) -> Option<ProfileId> {
        match *self {
            Self::Idle => None,
            Self::Starting(id) | Self::Running(id) | Self::Stopping(id) => Some(id),
        }
    }
}

/// The active profile and its process always travel together: either both
/// are present or neither is.
#[derive(Default)]
pub struct SupervisorState {
    active: Option<(ProfileId, Box<dyn ProcessHandle>)>,
}

impl SupervisorState {
    pub fn active_profile_id(&self) -> Option<ProfileId> {
        self.active.as_ref().map(|(id, _)| *id)
    }

    pub fn has_process(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_active(&self, id: ProfileId) -> bool {
        self.active_profile_id() == Some(id)
    }

    pub fn activate(&mut self, id: ProfileId, handle: Box<dyn ProcessHandle>) {
        self.active = Some((id, handle));
    }

    pub fn handle_mut(&mut self) -> Option<&mut Box<dyn ProcessHandle>> {
        self.active.as_mut().map(|(_, handle)| handle)
    }

    pub fn take(&mut self) -> Option<(ProfileId, Box<dyn ProcessHandle>)> {
        self.active.take()
    }
}
