//! Durable storage for the session snapshot.
//!
//! The snapshot is two entries in a key-value store: `user` holds the
//! serialized identity record and `token` holds the raw bearer token.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::{debug, warn};

use super::session::User;

/// Key of the serialized user identity
pub const USER_KEY: &str = "user";

/// Key of the raw bearer token
pub const TOKEN_KEY: &str = "token";

/// Service name for OS keychain entries
const KEYRING_SERVICE: &str = "timetrack";

/// String key-value storage backing the session snapshot.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// One file per key under a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.session", key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read session entry: {}", key))?;
        Ok(Some(contents))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir).context("Failed to create session directory")?;
        let path = self.entry_path(key);

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        // Entries hold a bearer credential, owner access only
        #[cfg(unix)]
        {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            options.mode(0o600);
            if path.exists() {
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                    .with_context(|| format!("Failed to restrict session entry: {}", key))?;
            }
        }

        let mut file = options
            .open(&path)
            .with_context(|| format!("Failed to open session entry: {}", key))?;
        file.write_all(value.as_bytes())
            .with_context(|| format!("Failed to write session entry: {}", key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key);
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to delete session entry: {}", key))?;
        }
        Ok(())
    }
}

/// Entries in the OS keychain, one credential per key.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve session entry from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store session entry in keychain")
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session entry from keychain"),
        }
    }
}

/// Process-local storage; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still a consistent map
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

/// What the store held at startup.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Empty,
    Valid { user: User, token: String },
    Malformed(String),
}

/// Reads and writes the session snapshot through a [`KeyValueStore`].
pub struct SessionPersistence {
    store: Box<dyn KeyValueStore>,
}

impl SessionPersistence {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()))
    }

    /// Write both entries after login or registration
    pub fn save(&self, user: &User, token: &str) -> Result<()> {
        let serialized = serde_json::to_string(user).context("Failed to serialize user")?;
        self.store.set(USER_KEY, &serialized)?;
        self.store.set(TOKEN_KEY, token)?;
        debug!("Session snapshot saved");
        Ok(())
    }

    /// Write the token entry after a refresh
    pub fn save_token(&self, token: &str) -> Result<()> {
        self.store.set(TOKEN_KEY, token)
    }

    /// Read the snapshot. A partial snapshot (one entry only) is malformed.
    pub fn load(&self) -> Result<Snapshot> {
        let user = self.store.get(USER_KEY)?;
        let token = self.store.get(TOKEN_KEY)?;

        let (user, token) = match (user, token) {
            (None, None) => return Ok(Snapshot::Empty),
            (Some(user), Some(token)) => (user, token),
            (Some(_), None) => return Ok(Snapshot::Malformed("token entry missing".into())),
            (None, Some(_)) => return Ok(Snapshot::Malformed("user entry missing".into())),
        };

        let token = token.trim().to_string();
        if token.is_empty() || token.contains(char::is_whitespace) {
            return Ok(Snapshot::Malformed("token entry is not a bearer token".into()));
        }

        match serde_json::from_str::<User>(&user) {
            Ok(user) => Ok(Snapshot::Valid { user, token }),
            Err(e) => Ok(Snapshot::Malformed(format!("user entry is not valid JSON: {}", e))),
        }
    }

    /// Delete both entries. Both removals are attempted even if one fails.
    pub fn clear(&self) -> Result<()> {
        let user = self.store.remove(USER_KEY);
        let token = self.store.remove(TOKEN_KEY);
        if let Err(ref e) = user {
            warn!(error = %e, "Failed to delete user entry");
        }
        user.and(token)
    }
}
