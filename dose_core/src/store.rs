//! User aggregate persistence with file locking and optimistic versioning.
//!
//! Each user is one JSON document under `<root>/users/<key>.json`. Saves are
//! compare-and-swap on `UserAggregate::version`: the write only happens if
//! the stored version still matches the one that was loaded.

use crate::{Error, Result, UserAggregate};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// Aggregate store collaborator
pub trait AggregateStore: Send + Sync {
    /// Keys of every stored user, sorted
    fn user_keys(&self) -> Result<Vec<String>>;

    /// Load one user, or `None` if it does not exist
    fn load_user(&self, key: &str) -> Result<Option<UserAggregate>>;

    /// Persist `user` if the stored version equals `user.version`, then bump it
    ///
    /// A user that has never been saved has version 0.
    fn save_user(&self, user: &mut UserAggregate) -> Result<()>;
}

/// Reject keys that could escape the store directory
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::Validation(format!("invalid user key {:?}", key)));
    }
    Ok(())
}

// ============================================================================
// File Store
// ============================================================================

/// JSON document store with file locking
pub struct FileStore {
    users_dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `data_dir`
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            users_dir: data_dir.as_ref().join("users"),
        }
    }

    fn user_path(&self, key: &str) -> PathBuf {
        self.users_dir.join(format!("{}.json", key))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.users_dir.join(format!("{}.lock", key))
    }

    fn read_document(&self, key: &str) -> Result<Option<UserAggregate>> {
        let path = self.user_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(&path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        let read = reader.read_to_string(&mut contents);
        file.unlock()?;
        read?;

        match serde_json::from_str::<UserAggregate>(&contents) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                tracing::warn!("Failed to parse user document {:?}: {}", path, e);
                Err(Error::Json(e))
            }
        }
    }
}

impl AggregateStore for FileStore {
    fn user_keys(&self) -> Result<Vec<String>> {
        if !self.users_dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.users_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn load_user(&self, key: &str) -> Result<Option<UserAggregate>> {
        validate_key(key)?;
        let user = self.read_document(key)?;
        if user.is_some() {
            tracing::debug!("Loaded user {}", key);
        }
        Ok(user)
    }

    fn save_user(&self, user: &mut UserAggregate) -> Result<()> {
        validate_key(&user.key)?;
        std::fs::create_dir_all(&self.users_dir)?;

        // Serialize writers of this user across threads and processes
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path(&user.key))?;
        lock.lock_exclusive()?;

        let result = self.write_if_current(user);
        lock.unlock()?;
        result
    }
}

impl FileStore {
    fn write_if_current(&self, user: &mut UserAggregate) -> Result<()> {
        let found = self.read_document(&user.key)?.map_or(0, |u| u.version);
        if found != user.version {
            return Err(Error::Conflict {
                key: user.key.clone(),
                expected: user.version,
                found,
            });
        }

        let mut next = user.clone();
        next.version = user.version + 1;

        let temp = NamedTempFile::new_in(&self.users_dir)?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(&next)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(self.user_path(&user.key))
            .map_err(|e| Error::Io(e.error))?;

        user.version = next.version;
        tracing::debug!("Saved user {} at version {}", user.key, user.version);
        Ok(())
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-process store with the same versioning contract
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<String, UserAggregate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn users(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, UserAggregate>>> {
        self.users
            .lock()
            .map_err(|_| Error::Other("memory store lock poisoned".into()))
    }
}

impl AggregateStore for MemoryStore {
    fn user_keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.users()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn load_user(&self, key: &str) -> Result<Option<UserAggregate>> {
        validate_key(key)?;
        Ok(self.users()?.get(key).cloned())
    }

    fn save_user(&self, user: &mut UserAggregate) -> Result<()> {
        validate_key(&user.key)?;
        let mut users = self.users()?;
        let found = users.get(&user.key).map_or(0, |u| u.version);
        if found != user.version {
            return Err(Error::Conflict {
                key: user.key.clone(),
                expected: user.version,
                found,
            });
        }

        user.version += 1;
        users.insert(user.key.clone(), user.clone());
        Ok(())
    }
}
