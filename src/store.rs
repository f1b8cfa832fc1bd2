//! Flat JSON entity store.
//!
//! The whole collection is loaded into memory and rewritten on every save.
//! Saves go to a sibling temp file which is then renamed over the store, so
//! a crash mid-write leaves the previous document intact.
//!
//! ```text
//! database.json
//! {
//!   "papers": [ { "id": "2307.09288", "processing_steps": { ... }, ... } ]
//! }
//! ```

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::model::Entity;

/// The persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Database {
    #[serde(default)]
    pub papers: Vec<Entity>,
}

impl Database {
    pub fn find(&self, id: &str) -> Option<&Entity> {
        self.papers.iter().find(|p| p.id == id)
    }
}

/// Location of the persisted document.
#[derive(Debug, Clone)]
pub struct EntityStore {
    path: PathBuf,
}

impl EntityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every entity. A missing or unparsable file yields an empty store.
    pub fn load(&self) -> Database {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "Unreadable entity store, starting empty");
                }
                return Database::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(db) => db,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Unparsable entity store, starting empty");
                Database::default()
            }
        }
    }

    /// Overwrite the persisted collection via temp file + rename.
    pub fn save(&self, db: &Database) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(db).map_err(StoreError::Serialize)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let tmp_path = self.temp_path();
        let write = |path: &Path| -> std::io::Result<()> {
            let mut file = File::create(path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()
        };
        write(&tmp_path).map_err(|source| StoreError::Write {
            path: tmp_path.clone(),
            source,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|source| StoreError::Rename {
            path: self.path.clone(),
            source,
        })
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "database.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "database.json".into());
        name.push(".lock");
        self.path.with_file_name(name)
    }
}

/// The in-memory collection for one pipeline run, holding an exclusive lock
/// on the store until dropped.
pub struct Session {
    store: EntityStore,
    db: Database,
    _lock: File,
}

impl Session {
    /// Lock the store and load its contents.
    pub fn open(store: EntityStore) -> Result<Self, StoreError> {
        let lock_path = store.lock_path();
        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| StoreError::Write {
                path: lock_path.clone(),
                source,
            })?;
        lock.try_lock_exclusive().map_err(|_| StoreError::Locked {
            path: store.path().to_path_buf(),
        })?;

        let db = store.load();
        Ok(Self {
            store,
            db,
            _lock: lock,
        })
    }

    pub fn entities(&self) -> &[Entity] {
        &self.db.papers
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.db.papers.iter().position(|p| p.id == id)
    }

    pub fn entity(&self, idx: usize) -> &Entity {
        &self.db.papers[idx]
    }

    pub fn entity_mut(&mut self, idx: usize) -> &mut Entity {
        &mut self.db.papers[idx]
    }

    /// Replace the entity with the same id, or append it. Returns its index.
    pub fn upsert(&mut self, entity: Entity) -> usize {
        match self.position(&entity.id) {
            Some(idx) => {
                self.db.papers[idx] = entity;
                idx
            }
            None => {
                self.db.papers.push(entity);
                self.db.papers.len() - 1
            }
        }
    }

    /// Persist the full collection.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        self.store.save(&self.db)
    }
}
