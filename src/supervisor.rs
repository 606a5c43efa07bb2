use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc},
    time::Duration,
};

use crate::{
    error::SupervisorError,
    profile::{ConnectionProfile, ProfileData, ProfileId, Settings},
    profile_store::ProfileStore,
    state::{ConnectionState, SupervisorState},
    system::{ChildExit, LaunchRequest, ProcessLauncher},
};

pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Debug)]
pub struct SupervisorOptions {
    pub binary: String,
    pub subcommand: String,
    /// How long a graceful termination may take before the client is killed.
    pub terminate_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            binary: "chisel".into(),
            subcommand: "client".into(),
            terminate_timeout: DEFAULT_TERMINATE_TIMEOUT,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    Connected {
        id: ProfileId,
        name: String,
    },
    Disconnected {
        id: ProfileId,
        exit: ChildExit,
        /// The client exited on its own rather than on request.
        unexpected: bool,
    },
    SpawnFailed {
        id: ProfileId,
        cause: String,
    },
}

/// A profile together with the affordances a UI should offer for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfileView {
    pub profile: ConnectionProfile,
    pub connect_enabled: bool,
    pub disconnect_enabled: bool,
}

pub fn project(active: Option<ProfileId>, profiles: &[ConnectionProfile]) -> Vec<ProfileView> {
    profiles
        .iter()
        .map(|profile| {
            let is_active = active == Some(profile.id);
            ProfileView {
                profile: profile.clone(),
                connect_enabled: !is_active,
                disconnect_enabled: is_active,
            }
        })
        .collect()
}

/// `[binary, subcommand, endpoint, ...arguments split on whitespace]`.
pub fn build_command_line(binary: &str, subcommand: &str, profile: &ProfileData) -> Vec<String> {
    let mut argv = vec![
        binary.to_string(),
        subcommand.to_string(),
        profile.url.clone(),
    ];
    argv.extend(profile.argument_tokens().map(str::to_string));
    argv
}

struct Inner {
    phase: ConnectionState,
    state: SupervisorState,
    store: ProfileStore,
    observers: Vec<mpsc::Sender<Notification>>,
}

impl Inner {
    fn notify(&mut self, notification: Notification) {
        log::debug!("[notify] {notification:?}");
        self.observers
            .retain(|observer| observer.send(notification.clone()).is_ok());
    }
}

/// Owns the single active client process. Every command and every liveness
/// check runs under one mutex, so transitions are totally ordered and never
/// two profiles are active at once.
pub struct ConnectionSupervisor {
    inner: Mutex<Inner>,
    launcher: Arc<dyn ProcessLauncher>,
    options: SupervisorOptions,
}

impl ConnectionSupervisor {
    pub fn new(
        store: ProfileStore,
        launcher: Arc<dyn ProcessLauncher>,
        options: SupervisorOptions,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: ConnectionState::Idle,
                state: SupervisorState::default(),
                store,
                observers: Vec::new(),
            }),
            launcher,
            options,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> mpsc::Receiver<Notification> {
        let (sender, receiver) = mpsc::channel();
        self.lock().observers.push(sender);
        receiver
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().phase
    }

    pub fn active_profile_id(&self) -> Option<ProfileId> {
        self.lock().state.active_profile_id()
    }

    pub fn list_profiles(&self) -> Vec<ProfileView> {
        let inner = self.lock();
        project(inner.state.active_profile_id(), inner.store.profiles())
    }

    pub fn profile(&self, id: ProfileId) -> Option<ConnectionProfile> {
        self.lock().store.profile(id).cloned()
    }

    pub fn add_profile(&self, data: ProfileData) -> Result<ProfileId, SupervisorError> {
        Ok(self.lock().store.add_profile(data)?)
    }

    /// Edits take effect on the next connect; a running client keeps the
    /// arguments it was started with.
    pub fn update_profile(&self, id: ProfileId, data: ProfileData) -> Result<(), SupervisorError> {
        let mut inner = self.lock();
        if inner.store.profile(id).is_none() {
            return Err(SupervisorError::UnknownProfile(id));
        }
        inner.store.update_profile(id, data)?;
        Ok(())
    }

    pub fn delete_profile(&self, id: ProfileId) -> Result<(), SupervisorError> {
        let mut inner = self.lock();
        if inner.store.profile(id).is_none() {
            return Err(SupervisorError::UnknownProfile(id));
        }
        if inner.state.is_active(id) {
            log::info!("[delete] profile {id} is active, disconnecting first");
            self.disconnect_locked(&mut inner);
        }
        inner.store.remove_profile(id)?;
        Ok(())
    }

    pub fn settings(&self) -> Settings {
        self.lock().store.settings()
    }

    pub fn save_settings(&self, settings: Settings) -> Result<(), SupervisorError> {
        Ok(self.lock().store.save_settings(settings)?)
    }

    pub fn connect(&self, id: ProfileId) -> Result<(), SupervisorError> {
        let mut inner = self.lock();
        let profile = inner
            .store
            .profile(id)
            .cloned()
            .ok_or(SupervisorError::UnknownProfile(id))?;

        if inner.state.is_active(id) {
            log::debug!("[connect] profile {id} already active");
            return Ok(());
        }

        log::info!("━━━ CONNECT {} ({id}) ━━━", profile.name());
        if inner.state.has_process() {
            self.disconnect_locked(&mut inner);
        }

        let argv = build_command_line(&self.options.binary, &self.options.subcommand, &profile.data);
        inner.phase = ConnectionState::Starting(id);
        let spawned = self.launcher.spawn(&LaunchRequest {
            session_name: profile.name(),
            argv: &argv,
        });

        match spawned {
            Ok(handle) => {
                inner.state.activate(id, handle);
                inner.phase = ConnectionState::Running(id);
                inner.notify(Notification::Connected {
                    id,
                    name: profile.data.name.clone(),
                });
                Ok(())
            }
            Err(error) => {
                log::error!("[connect] {error}");
                inner.phase = ConnectionState::Idle;
                inner.notify(Notification::SpawnFailed {
                    id,
                    cause: error.to_string(),
                });
                Err(error.into())
            }
        }
    }

    /// Blocks until the client has exited, for at most the configured
    /// termination timeout plus the time to reap a killed process.
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        self.disconnect_locked(&mut inner);
    }

    fn disconnect_locked(&self, inner: &mut Inner) {
        let Some(id) = inner.state.active_profile_id() else {
            log::debug!("[disconnect] nothing to disconnect");
            inner.phase = ConnectionState::Idle;
            return;
        };

        log::info!("━━━ DISCONNECT ({id}) ━━━");
        inner.phase = ConnectionState::Stopping(id);
        let exit = match inner.state.handle_mut() {
            Some(handle) => handle.terminate_and_wait(self.options.terminate_timeout),
            None => ChildExit { code: None },
        };
        inner.state.take();
        inner.phase = ConnectionState::Idle;
        inner.notify(Notification::Disconnected {
            id,
            exit,
            unexpected: false,
        });
    }

    /// One liveness poll of the active client. A client that exited on its
    /// own is reported as `Disconnected`; it is not restarted.
    pub fn check_liveness(&self) {
        let mut inner = self.lock();
        let ConnectionState::Running(id) = inner.phase else {
            return;
        };

        let polled = match inner.state.handle_mut() {
            Some(handle) => handle.poll_exited(),
            None => {
                log::warn!("[poll] running without a process handle, resetting");
                inner.phase = ConnectionState::Idle;
                return;
            }
        };

        match polled {
            Ok(None) => {
                let name = inner
                    .store
                    .profile(id)
                    .map(|profile| profile.data.name.clone())
                    .unwrap_or_default();
                inner.notify(Notification::Connected { id, name });
            }
            Ok(Some(exit)) => {
                log::warn!("[poll] client for profile {id} exited unexpectedly ({exit})");
                inner.state.take();
                inner.phase = ConnectionState::Idle;
                inner.notify(Notification::Disconnected {
                    id,
                    exit,
                    unexpected: true,
                });
            }
            Err(error) => {
                log::warn!("[poll] failed to poll client for profile {id}: {error}");
            }
        }
    }

    /// Host shutdown: terminates the active client, if any.
    pub fn shutdown(&self) {
        log::info!("[shutdown] stopping supervisor");
        self.disconnect();
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some((id, mut handle)) = inner.state.take() {
            log::info!("[drop] terminating client for profile {id}");
            handle.terminate_and_wait(self.options.terminate_timeout);
        }
    }
}
