//! Kernel session persistence.
//!
//! Remembers the kernel id in use per server origin, so a restarted client
//! can reattach to the same backend kernel instead of spawning a new one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Where the kernel client keeps its session id.
pub trait SessionStore: Send + Sync {
    fn load_kernel_id(&self) -> Option<String>;
    fn save_kernel_id(&self, kernel_id: &str);
    fn clear(&self);
}

/// On-disk session file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionFile {
    /// Schema version for forward compatibility
    pub schema_version: u32,
    /// RFC 3339 timestamp when the file was last written
    pub saved_at: String,
    /// Kernel id by server origin
    #[serde(default)]
    pub kernels: BTreeMap<String, String>,
}

impl SessionFile {
    pub const CURRENT_SCHEMA_VERSION: u32 = 1;

    /// Maximum age in hours before a session is considered stale
    pub const MAX_AGE_HOURS: i64 = 24;
}

pub fn session_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("plas")
        .join("session.json")
}

/// JSON-file backed store, keyed by origin.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
    origin: String,
}

impl FileSessionStore {
    pub fn new(origin: impl Into<String>) -> Self {
        Self::with_path(session_path(), origin)
    }

    pub fn with_path(path: impl Into<PathBuf>, origin: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            origin: origin.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the session file. Returns None if it is missing, corrupt or stale.
    fn read(&self) -> Option<SessionFile> {
        if !self.path.exists() {
            return None;
        }

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                warn!("[session] Failed to read session file: {}", e);
                return None;
            }
        };

        let session: SessionFile = match serde_json::from_str(&contents) {
            Ok(s) => s,
            Err(e) => {
                warn!("[session] Failed to parse session file: {}", e);
                return None;
            }
        };

        if let Ok(saved_at) = chrono::DateTime::parse_from_rfc3339(&session.saved_at) {
            let age = chrono::Utc::now().signed_duration_since(saved_at);
            if age.num_seconds() > SessionFile::MAX_AGE_HOURS * 3600 {
                info!(
                    "[session] Session too old ({}h), ignoring",
                    age.num_seconds() / 3600
                );
                return None;
            }
        }

        Some(session)
    }

    fn write(&self, mut session: SessionFile) -> Result<(), String> {
        session.schema_version = SessionFile::CURRENT_SCHEMA_VERSION;
        session.saved_at = chrono::Utc::now().to_rfc3339();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let json = serde_json::to_string_pretty(&session).map_err(|e| e.to_string())?;
        std::fs::write(&self.path, format!("{json}\n")).map_err(|e| e.to_string())
    }
}

impl SessionStore for FileSessionStore {
    fn load_kernel_id(&self) -> Option<String> {
        self.read()?.kernels.get(&self.origin).cloned()
    }

    fn save_kernel_id(&self, kernel_id: &str) {
        let mut session = self.read().unwrap_or_default();
        session
            .kernels
            .insert(self.origin.clone(), kernel_id.to_string());
        match self.write(session) {
            Ok(()) => info!("[session] Saved kernel {} for {}", kernel_id, self.origin),
            Err(e) => warn!("[session] Failed to save session file: {}", e),
        }
    }

    fn clear(&self) {
        let Some(mut session) = self.read() else {
            return;
        };
        if session.kernels.remove(&self.origin).is_none() {
            return;
        }
        if session.kernels.is_empty() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("[session] Failed to remove session file: {}", e);
            } else {
                info!("[session] Cleared session file");
            }
        } else if let Err(e) = self.write(session) {
            warn!("[session] Failed to update session file: {}", e);
        }
    }
}

/// In-memory store, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    kernel_id: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kernel_id(kernel_id: impl Into<String>) -> Self {
        Self {
            kernel_id: Mutex::new(Some(kernel_id.into())),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load_kernel_id(&self) -> Option<String> {
        self.kernel_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save_kernel_id(&self, kernel_id: &str) {
        *self.kernel_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(kernel_id.to_string());
    }

    fn clear(&self) {
        self.kernel_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
