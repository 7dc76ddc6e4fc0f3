//! Durable session mirror.
//!
//! The store writes the live session's display fields and access token
//! here on every start/renewal and clears it on every end, so a restarted
//! client can pick the session back up.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use keyward_protocol::{Codec, JsonCodec};

use crate::{MirrorError, PersistedSession};

/// Somewhere a [`PersistedSession`] can outlive the process.
///
/// Calls are synchronous and made while the store holds its slot lock, so
/// implementations should be quick (local disk, not network).
pub trait SessionMirror: Send + Sync + 'static {
    fn load(&self) -> Result<Option<PersistedSession>, MirrorError>;
    fn save(&self, session: &PersistedSession) -> Result<(), MirrorError>;
    /// Removes any stored session. Clearing an empty mirror is not an
    /// error.
    fn clear(&self) -> Result<(), MirrorError>;
}

// ---------------------------------------------------------------------------
// MemoryMirror
// ---------------------------------------------------------------------------

/// Keeps the mirror in memory. Useful in tests and for clients that do not
/// want persistence.
#[derive(Debug, Default)]
pub struct MemoryMirror {
    slot: Mutex<Option<PersistedSession>>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated mirror, as if left behind by a previous run.
    pub fn with_session(session: PersistedSession) -> Self {
        Self {
            slot: Mutex::new(Some(session)),
        }
    }
}

impl SessionMirror for MemoryMirror {
    fn load(&self) -> Result<Option<PersistedSession>, MirrorError> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, session: &PersistedSession) -> Result<(), MirrorError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), MirrorError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileMirror
// ---------------------------------------------------------------------------

/// Stores the mirror as a JSON file.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// target, so a crash mid-write never leaves half a session behind.
#[derive(Debug, Clone)]
pub struct FileMirror {
    path: PathBuf,
}

impl FileMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SessionMirror for FileMirror {
    fn load(&self) -> Result<Option<PersistedSession>, MirrorError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(JsonCodec.decode(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, session: &PersistedSession) -> Result<(), MirrorError> {
        let bytes = JsonCodec.encode(session)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.temp_path();
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), MirrorError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_protocol::SubjectId;

    fn persisted() -> PersistedSession {
        PersistedSession {
            subject_id: SubjectId::new("u1"),
            provider_uid: "mem-1".into(),
            display_name: "Ada".into(),
            email: "a@x.com".into(),
            avatar_ref: "https://avatars.test/ada".into(),
            access_token: "T1".into(),
        }
    }

    #[test]
    fn test_file_mirror_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = FileMirror::new(dir.path().join("session.json"));

        assert!(mirror.load().unwrap().is_none());
    }

    #[test]
    fn test_file_mirror_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = FileMirror::new(dir.path().join("nested/session.json"));

        mirror.save(&persisted()).unwrap();

        assert_eq!(mirror.load().unwrap(), Some(persisted()));
        assert!(!mirror.temp_path().exists(), "temp file must be renamed away");
    }

    #[test]
    fn test_file_mirror_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = FileMirror::new(dir.path().join("session.json"));
        mirror.save(&persisted()).unwrap();

        mirror.clear().unwrap();
        mirror.clear().unwrap();

        assert!(!mirror.path().exists());
    }

    #[test]
    fn test_file_mirror_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{not json").unwrap();

        let result = FileMirror::new(&path).load();

        assert!(matches!(result, Err(MirrorError::Protocol(_))));
    }

    #[test]
    fn test_memory_mirror_clear() {
        let mirror = MemoryMirror::with_session(persisted());
        mirror.clear().unwrap();
        assert!(mirror.load().unwrap().is_none());
    }
}
