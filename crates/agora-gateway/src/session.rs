//! Persistence of the authenticated user id outside the store, for code
//! that needs it before a store is available (e.g. the next launch).

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GatewayError;

pub trait SessionStore: Send + Sync {
    fn save_user_id(&self, user_id: &str) -> Result<(), GatewayError>;
    fn load_user_id(&self) -> Result<Option<String>, GatewayError>;
    fn clear(&self) -> Result<(), GatewayError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionFile {
    user_id: String,
}

/// Keeps the user id in a small JSON file.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn io_error(err: std::io::Error) -> GatewayError {
    GatewayError::Session(err.to_string())
}

impl SessionStore for FileSessionStore {
    fn save_user_id(&self, user_id: &str) -> Result<(), GatewayError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let body = serde_json::to_vec(&SessionFile {
            user_id: user_id.to_string(),
        })
        .map_err(|e| GatewayError::Session(e.to_string()))?;
        std::fs::write(&self.path, body).map_err(io_error)?;
        debug!("Saved session to {}", self.path.display());
        Ok(())
    }

    fn load_user_id(&self) -> Result<Option<String>, GatewayError> {
        let body = match std::fs::read(&self.path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(e)),
        };
        let session: SessionFile =
            serde_json::from_slice(&body).map_err(|e| GatewayError::Session(e.to_string()))?;
        Ok(Some(session.user_id))
    }

    fn clear(&self) -> Result<(), GatewayError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(e)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    user_id: Mutex<Option<String>>,
}

impl SessionStore for MemorySessionStore {
    fn save_user_id(&self, user_id: &str) -> Result<(), GatewayError> {
        *self.user_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(user_id.to_string());
        Ok(())
    }

    fn load_user_id(&self) -> Result<Option<String>, GatewayError> {
        Ok(self.user_id.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn clear(&self) -> Result<(), GatewayError> {
        *self.user_id.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("nested").join("session.json"));

        assert_eq!(store.load_user_id().unwrap(), None);
        store.save_user_id("u1").unwrap();
        assert_eq!(store.load_user_id().unwrap().as_deref(), Some("u1"));
        store.clear().unwrap();
        assert_eq!(store.load_user_id().unwrap(), None);
        // clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemorySessionStore::default();
        store.save_user_id("u2").unwrap();
        assert_eq!(store.load_user_id().unwrap().as_deref(), Some("u2"));
        store.clear().unwrap();
        assert!(store.load_user_id().unwrap().is_none());
    }
}
