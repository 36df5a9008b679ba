use std::sync::Arc;
use std::{fs, path::PathBuf};

use anyhow::{Context, Result};

use crate::collection::CollectionRef;
use crate::config::{self, AppConfig, StoreBackend};

pub mod memory;
pub mod sqlite;

use memory::MemoryStore;
use sqlite::SqliteStore;

#[derive(Clone)]
enum Backend {
    Memory(Arc<MemoryStore>),
    Sqlite(SqliteStore),
}

/// Handle to the configured document backend. Cheap to clone; collections
/// are handed out by name and spring into existence on first use.
#[derive(Clone)]
pub struct Database {
    backend: Backend,
    path: Option<PathBuf>,
}

impl Database {
    const SQLITE_FILE_NAME: &'static str = "lectern.db";

    pub async fn connect(config: &AppConfig) -> Result<Self> {
        match config.store_backend {
            StoreBackend::Memory => Ok(Self::in_memory()),
            StoreBackend::Sqlite => Self::connect_sqlite(config).await,
        }
    }

    /// Process-local store with no durability. The default for tests.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(MemoryStore::new())),
            path: None,
        }
    }

    async fn connect_sqlite(config: &AppConfig) -> Result<Self> {
        let (data_dir, db_file) = Self::resolve_database_paths(&config.database_path)?;
        fs::create_dir_all(&data_dir).with_context(|| {
            format!(
                "failed to create database directory: {}",
                data_dir.display()
            )
        })?;

        let store = SqliteStore::connect(&db_file, config.database_max_connections).await?;
        Ok(Self {
            backend: Backend::Sqlite(store),
            path: Some(data_dir),
        })
    }

    pub fn collection(&self, name: &str) -> CollectionRef {
        match &self.backend {
            Backend::Memory(store) => store.collection(name),
            Backend::Sqlite(store) => store.collection(name),
        }
    }

    pub fn database_path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    fn resolve_database_paths(path: &str) -> Result<(PathBuf, PathBuf)> {
        if config::database_path_is_file(path) {
            let db_file = Self::resolve_db_path(path)?;
            let dir = if let Some(parent) = db_file.parent() {
                parent.to_path_buf()
            } else {
                std::env::current_dir().context("failed to obtain current directory")?
            };
            Ok((dir, db_file))
        } else {
            let data_dir = Self::resolve_db_path(path)?;
            Ok((data_dir.clone(), data_dir.join(Self::SQLITE_FILE_NAME)))
        }
    }

    fn resolve_db_path(path: &str) -> Result<PathBuf> {
        let path = PathBuf::from(path);
        if path.is_absolute() {
            Ok(path)
        } else {
            let cwd = std::env::current_dir().context("failed to obtain current directory")?;
            Ok(cwd.join(path))
        }
    }
}
