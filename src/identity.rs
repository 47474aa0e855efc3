//! Local identity of the human behind this process: one stable participant id per room and a
//! display name shared by every room.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
enum IdentityFileError {
    #[error("failed to access identity file")]
    Io(#[from] io::Error),
    #[error("failed to encode identity file")]
    Encode(#[from] serde_json::Error),
}

/// On-disk layout of the identity file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct IdentityFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    /// Participant id per room id.
    #[serde(default)]
    participants: BTreeMap<String, String>,
}

/// Identity backed by a small JSON file.
///
/// Write failures never surface to callers: the value stays in memory for the rest of the
/// session, so the same room still resolves to the same participant id until restart.
#[derive(Debug)]
pub struct IdentityStore {
    path: Option<PathBuf>,
    state: Mutex<IdentityFile>,
}

impl IdentityStore {
    /// Open the identity file at `path`, treating a missing or corrupt file as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "corrupt identity file; starting fresh");
                IdentityFile::default()
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => IdentityFile::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read identity file");
                IdentityFile::default()
            }
        };

        Self {
            path: Some(path),
            state: Mutex::new(state),
        }
    }

    /// Identity that lives for this process only.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            state: Mutex::new(IdentityFile::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IdentityFile> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Participant id used in `room_id`, generated and persisted on first use.
    pub fn resolve_participant_id(&self, room_id: &str) -> String {
        let mut state = self.lock();
        if let Some(id) = state.participants.get(room_id) {
            return id.clone();
        }

        let id = Uuid::new_v4().simple().to_string();
        state.participants.insert(room_id.to_string(), id.clone());
        debug!(room_id, participant_id = %id, "generated participant id");
        self.persist(&state);
        id
    }

    pub fn resolve_display_name(&self) -> Option<String> {
        self.lock().display_name.clone()
    }

    /// Store the display name. Callers validate it beforehand.
    pub fn commit_display_name(&self, name: &str) {
        let mut state = self.lock();
        state.display_name = Some(name.trim().to_string());
        self.persist(&state);
    }

    fn persist(&self, state: &IdentityFile) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(err) = write_file(path, state) {
            warn!(
                path = %path.display(),
                error = %err,
                "failed to persist identity; keeping it for this session only"
            );
        }
    }
}

fn write_file(path: &Path, state: &IdentityFile) -> Result<(), IdentityFileError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(state)?;
    fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_ids_survive_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.json");

        let first = IdentityStore::open(&path);
        let id = first.resolve_participant_id("r1");
        assert_eq!(first.resolve_participant_id("r1"), id);
        assert_ne!(first.resolve_participant_id("r2"), id);

        let reopened = IdentityStore::open(&path);
        assert_eq!(reopened.resolve_participant_id("r1"), id);
    }

    #[test]
    fn display_name_is_global_and_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let store = IdentityStore::open(&path);
        assert_eq!(store.resolve_display_name(), None);
        store.commit_display_name("  Ada  ");

        let reopened = IdentityStore::open(&path);
        assert_eq!(reopened.resolve_display_name().as_deref(), Some("Ada"));
    }

    #[test]
    fn corrupt_files_start_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        fs::write(&path, "{{{").unwrap();

        let store = IdentityStore::open(&path);
        assert_eq!(store.resolve_display_name(), None);
        let id = store.resolve_participant_id("r1");
        assert_eq!(IdentityStore::open(&path).resolve_participant_id("r1"), id);
    }

    #[test]
    fn unwritable_location_keeps_session_identity() {
        let dir = tempfile::tempdir().unwrap();
        // A file where a directory is expected makes every write fail.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let store = IdentityStore::open(blocker.join("identity.json"));

        let id = store.resolve_participant_id("r1");
        assert_eq!(store.resolve_participant_id("r1"), id);
        store.commit_display_name("Ada");
        assert_eq!(store.resolve_display_name().as_deref(), Some("Ada"));
    }

    #[test]
    fn ephemeral_identity_is_stable_in_process() {
        let store = IdentityStore::ephemeral();
        let id = store.resolve_participant_id("r1");
        assert_eq!(store.resolve_participant_id("r1"), id);
    }
}
