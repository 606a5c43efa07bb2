pub mod configuration;
pub mod error;
pub mod monitor;
pub mod process_log;
pub mod profile;
pub mod profile_store;
pub mod state;
pub mod supervisor;
pub mod system;

pub use crate::{
    error::{ConfigurationError, SpawnError, StoreError, SupervisorError},
    monitor::LivenessMonitor,
    profile::{
        ConnectionProfile, PersistedStore, ProfileData, ProfileId, Settings, ShutoffPolicy,
        StartupPolicy,
    },
    profile_store::ProfileStore,
    state::ConnectionState,
    supervisor::{ConnectionSupervisor, Notification, ProfileView, SupervisorOptions},
};
