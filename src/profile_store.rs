use std::{
    ffi::OsString,
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::{
    error::StoreError,
    process_log::session_timestamp,
    profile::{ConnectionProfile, PersistedStore, ProfileData, ProfileId, Settings},
};

/// Reads the store without failing: a missing or malformed file yields the
/// default store. An unusable file is moved aside to
/// `<name>.corrupt-<timestamp>` first, so a later save cannot overwrite the
/// only copy of the user's profiles.
pub fn load(path: &Path) -> PersistedStore {
    match load_strict(path) {
        Ok(store) => store,
        Err(error) => {
            log::warn!("[store] {error}; using defaults");
            preserve_unusable_file(path);
            PersistedStore::default()
        }
    }
}

fn preserve_unusable_file(path: &Path) {
    let mut file_name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("store"));
    file_name.push(format!(".corrupt-{}", session_timestamp()));
    let backup = path.with_file_name(file_name);

    match std::fs::rename(path, &backup) {
        Ok(()) => log::warn!("[store] kept unusable store as {}", backup.display()),
        Err(error) => log::error!(
            "[store] failed to move unusable store {} aside: {error}",
            path.display()
        ),
    }
}

/// Like [`load`], but malformed or unreadable content is an error. A missing
/// file is still the first-run default.
pub fn load_strict(path: &Path) -> Result<PersistedStore, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            log::info!("[store] no store file at {}, using defaults", path.display());
            return Ok(PersistedStore::default());
        }
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let store: PersistedStore =
        serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
    log::info!(
        "[store] loaded {} connections from {}",
        store.connections.len(),
        path.display()
    );
    Ok(store)
}

/// Replaces the store file in full. The content is written to a temporary
/// file in the same directory and renamed over the target, so readers see
/// either the old or the new file.
pub fn save(path: &Path, store: &PersistedStore) -> Result<(), StoreError> {
    let write_error = |source: io::Error| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut content = serde_json::to_string_pretty(store).map_err(StoreError::Serialize)?;
    content.push('\n');

    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(directory).map_err(write_error)?;

    let mut temporary = tempfile::NamedTempFile::new_in(directory).map_err(write_error)?;
    temporary.write_all(content.as_bytes()).map_err(write_error)?;
    temporary.as_file().sync_all().map_err(write_error)?;
    temporary.persist(path).map_err(|error| write_error(error.error))?;

    log::debug!(
        "[store] wrote {} connections to {}",
        store.connections.len(),
        path.display()
    );
    Ok(())
}

/// In-memory view of the persisted store. Every mutation is written to disk
/// first and only committed to memory once the write succeeded.
pub struct ProfileStore {
    path: PathBuf,
    profiles: Vec<ConnectionProfile>,
    settings: Settings,
    next_id: u64,
}

impl ProfileStore {
    pub fn open(path: PathBuf, strict: bool) -> Result<Self, StoreError> {
        let persisted = if strict {
            load_strict(&path)?
        } else {
            load(&path)
        };
        Ok(Self::from_persisted(path, persisted))
    }

    pub fn from_persisted(path: PathBuf, persisted: PersistedStore) -> Self {
        let mut store = Self {
            path,
            profiles: Vec::with_capacity(persisted.connections.len()),
            settings: persisted.settings,
            next_id: 1,
        };
        for data in persisted.connections {
            let id = store.allocate_id();
            store.profiles.push(ConnectionProfile { id, data });
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profiles(&self) -> &[ConnectionProfile] {
        &self.profiles
    }

    pub fn profile(&self, id: ProfileId) -> Option<&ConnectionProfile> {
        self.profiles.iter().find(|profile| profile.id == id)
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn snapshot(&self) -> PersistedStore {
        PersistedStore {
            connections: self
                .profiles
                .iter()
                .map(|profile| profile.data.clone())
                .collect(),
            settings: self.settings,
        }
    }

    pub fn add_profile(&mut self, data: ProfileData) -> Result<ProfileId, StoreError> {
        let mut candidate = self.snapshot();
        candidate.connections.push(data.clone());
        save(&self.path, &candidate)?;

        let id = self.allocate_id();
        log::info!("[store] added profile {id} ({})", data.name);
        self.profiles.push(ConnectionProfile { id, data });
        Ok(id)
    }

    pub fn update_profile(&mut self, id: ProfileId, data: ProfileData) -> Result<(), StoreError> {
        let position = self.position(id)?;
        let mut candidate = self.snapshot();
        candidate.connections[position] = data.clone();
        save(&self.path, &candidate)?;

        log::info!("[store] updated profile {id} ({})", data.name);
        self.profiles[position].data = data;
        Ok(())
    }

    /// Removes a profile regardless of whether it is in use; callers that
    /// supervise processes decide what removing an active profile means.
    pub fn remove_profile(&mut self, id: ProfileId) -> Result<ConnectionProfile, StoreError> {
        let position = self.position(id)?;
        let mut candidate = self.snapshot();
        candidate.connections.remove(position);
        save(&self.path, &candidate)?;

        let removed = self.profiles.remove(position);
        log::info!("[store] removed profile {id} ({})", removed.data.name);
        Ok(removed)
    }

    pub fn save_settings(&mut self, settings: Settings) -> Result<(), StoreError> {
        let mut candidate = self.snapshot();
        candidate.settings = settings;
        save(&self.path, &candidate)?;

        log::info!(
            "[store] settings saved (startup={}, shutoff={})",
            settings.startup.label(),
            settings.shutoff.label()
        );
        self.settings = settings;
        Ok(())
    }

    fn position(&self, id: ProfileId) -> Result<usize, StoreError> {
        self.profiles
            .iter()
            .position(|profile| profile.id == id)
            .ok_or(StoreError::UnknownProfile(id))
    }

    fn allocate_id(&mut self) -> ProfileId {
        let id = ProfileId(self.next_id);
        self.next_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ShutoffPolicy, StartupPolicy};

    fn store_path(directory: &tempfile::TempDir) -> PathBuf {
        directory.path().join("config.json")
    }

    #[test]
    fn missing_file_loads_first_run_defaults() {
        let directory = tempfile::tempdir().unwrap();
        let store = load(&store_path(&directory));
        assert!(store.connections.is_empty());
        assert_eq!(store.settings.startup, StartupPolicy::WhenLoggedIn);
        assert_eq!(store.settings.shutoff, ShutoffPolicy::OnLogOff);
        assert_eq!(
            serde_json::to_value(&store).unwrap(),
            serde_json::json!({
                "connections": [],
                "settings": {"startup": "When logged in", "shutoff": "On log off"}
            })
        );
    }

    #[test]
    fn malformed_file_is_lenient_by_default_and_strict_on_request() {
        let directory = tempfile::tempdir().unwrap();
        let path = store_path(&directory);
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(load_strict(&path), Err(StoreError::Corrupt { .. })));
        assert!(ProfileStore::open(path.clone(), true).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");

        assert_eq!(load(&path), PersistedStore::default());
    }

    #[test]
    fn unusable_store_is_moved_aside_before_it_can_be_overwritten() {
        let directory = tempfile::tempdir().unwrap();
        let path = store_path(&directory);
        let original = r#"{
            "connections": [
                {"name": "a", "url": "wss://a.example", "arguments": "socks"},
                {"name": "b", "url": "wss://b.example", "arguments": "socks"}
            ],
            "settings": {"startup": "Sometimes", "shutoff": "Never"}
        }"#;
        std::fs::write(&path, original).unwrap();

        let mut store = ProfileStore::open(path.clone(), false).unwrap();
        assert!(store.profiles().is_empty());
        store
            .add_profile(ProfileData::new("c", "wss://c.example", "socks"))
            .unwrap();

        let backups: Vec<PathBuf> = std::fs::read_dir(directory.path())
            .unwrap()
            .flatten()
            .map(|entry| entry.path())
            .filter(|entry| entry != &path)
            .collect();
        assert_eq!(backups.len(), 1);
        let backup_name = backups[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(backup_name.starts_with("config.json.corrupt-"));
        assert_eq!(std::fs::read_to_string(&backups[0]).unwrap(), original);

        let current = load_strict(&path).unwrap();
        assert_eq!(current.connections.len(), 1);
        assert_eq!(current.connections[0].name, "c");
    }

    #[test]
    fn save_then_load_preserves_content() {
        let directory = tempfile::tempdir().unwrap();
        let path = store_path(&directory);
        std::fs::write(
            &path,
            r#"{
                "connections": [
                    {"name": "home", "url": "wss://h.example:9000", "arguments": "socks"},
                    {"name": "work", "url": "https://w.example", "arguments": "R:8080 --keepalive 10s"}
                ],
                "settings": {"startup": "On lid open", "shutoff": "Never"}
            }"#,
        )
        .unwrap();

        let original = load(&path);
        save(&path, &original).unwrap();
        assert_eq!(load(&path), original);
        assert_eq!(original.connections[1].name, "work");
    }

    #[test]
    fn save_creates_missing_directories_and_leaves_no_temporary_files() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("nested").join("config.json");
        save(&path, &PersistedStore::default()).unwrap();

        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .map(|entry| entry.file_name())
            .collect();
        assert_eq!(entries, [std::ffi::OsString::from("config.json")]);
    }

    #[test]
    fn mutations_persist_in_insertion_order() {
        let directory = tempfile::tempdir().unwrap();
        let path = store_path(&directory);
        let mut store = ProfileStore::open(path.clone(), false).unwrap();

        let home = store
            .add_profile(ProfileData::new("home", "wss://h.example:9000", "socks"))
            .unwrap();
        let work = store
            .add_profile(ProfileData::new("work", "https://w.example", ""))
            .unwrap();
        assert_ne!(home, work);

        store
            .update_profile(work, ProfileData::new("office", "https://w.example", "socks"))
            .unwrap();
        store.remove_profile(home).unwrap();

        let on_disk = load(&path);
        assert_eq!(on_disk.connections.len(), 1);
        assert_eq!(on_disk.connections[0].name, "office");

        let reopened = ProfileStore::open(path, false).unwrap();
        assert_eq!(reopened.profiles().len(), 1);
        assert_eq!(reopened.profiles()[0].name(), "office");
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let directory = tempfile::tempdir().unwrap();
        let mut store = ProfileStore::open(store_path(&directory), false).unwrap();
        assert!(matches!(
            store.remove_profile(ProfileId(42)),
            Err(StoreError::UnknownProfile(ProfileId(42)))
        ));
    }

    #[test]
    fn failed_write_leaves_memory_unchanged() {
        let directory = tempfile::tempdir().unwrap();
        let blocker = directory.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let mut store = ProfileStore::from_persisted(
            blocker.join("config.json"),
            PersistedStore::default(),
        );

        let result = store.add_profile(ProfileData::new("home", "wss://h.example", ""));
        assert!(matches!(result, Err(StoreError::Write { .. })));
        assert!(store.profiles().is_empty());

        let settings = Settings {
            startup: StartupPolicy::Never,
            shutoff: ShutoffPolicy::Never,
        };
        assert!(store.save_settings(settings).is_err());
        assert_eq!(store.settings(), Settings::default());
    }
}
