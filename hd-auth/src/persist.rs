//! Durable session storage.
//!
//! The session survives process restarts so the token clock and the
//! realtime connection can be re-armed from the persisted expiry.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use hd_core::error::{HdError, HdResult};

use crate::session::Session;

/// Backend for persisting the current session.
pub trait SessionStorage: Send + Sync {
    /// Load the persisted session, if one exists and is marked authenticated.
    fn load(&self) -> HdResult<Option<Session>>;

    /// Persist `session`, replacing anything stored before.
    fn save(&self, session: &Session) -> HdResult<()>;

    /// Remove the persisted session. Succeeds if nothing is stored.
    fn clear(&self) -> HdResult<()>;
}

/// On-disk layout: the session plus the authentication flag.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSession {
    is_authenticated: bool,
    #[serde(flatten)]
    session: Session,
}

/// JSON file storage.
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> HdResult<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let persisted: PersistedSession = serde_json::from_str(&contents)
            .map_err(|e| HdError::Storage(format!("corrupt session file: {e}")))?;
        if !persisted.is_authenticated {
            return Ok(None);
        }
        debug!("loaded persisted session from {}", self.path.display());
        Ok(Some(persisted.session))
    }

    fn save(&self, session: &Session) -> HdResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let persisted = PersistedSession {
            is_authenticated: true,
            session: session.clone(),
        };
        let contents = serde_json::to_string_pretty(&persisted)?;

        // Write-then-rename so a crash never leaves a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> HdResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> HdResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> HdResult<()> {
    Ok(())
}

/// In-process storage for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemorySessionStorage {
    inner: Mutex<Option<Session>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-populated with `session`.
    pub fn with_session(session: Session) -> Self {
        Self {
            inner: Mutex::new(Some(session)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> HdResult<Option<Session>> {
        Ok(self.slot().clone())
    }

    fn save(&self, session: &Session) -> HdResult<()> {
        *self.slot() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> HdResult<()> {
        *self.slot() = None;
        Ok(())
    }
}
