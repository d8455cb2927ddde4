//! Data directory layout
//!
//! `LOUPE_DATA_DIR` wins; otherwise the platform data directory
//! (`$XDG_DATA_HOME/loupe`, `~/Library/Application Support/Loupe`,
//! `%APPDATA%\Loupe`), falling back to `./.loupe`. Each storage engine gets
//! its own subdirectory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;

use super::constants::{APP_DOT_FOLDER, APP_NAME, ENV_DATA_DIR};
use crate::utils::file::expand_path;

const WRITE_PROBE: &str = ".write-probe";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSubdir {
    /// Annotations, views, experiments
    Sqlite,
    /// Spans
    Duckdb,
}

impl DataSubdir {
    pub const ALL: [DataSubdir; 2] = [DataSubdir::Sqlite, DataSubdir::Duckdb];

    pub const fn dir_name(self) -> &'static str {
        match self {
            DataSubdir::Sqlite => "sqlite",
            DataSubdir::Duckdb => "duckdb",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppStorage {
    data_dir: PathBuf,
}

impl AppStorage {
    /// Create the layout and make sure the process can write to it
    pub async fn init() -> Result<Self> {
        let root = Self::resolve_data_dir();
        Self::prepare(&root).await?;
        let data_dir = root.canonicalize().unwrap_or(root);
        tracing::debug!(data_dir = %data_dir.display(), "Data directory ready");
        Ok(Self { data_dir })
    }

    pub fn resolve_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR)
            && !dir.trim().is_empty()
        {
            return expand_path(dir.trim());
        }
        match ProjectDirs::from("", "", APP_NAME) {
            Some(dirs) => dirs.data_dir().to_path_buf(),
            None => std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(APP_DOT_FOLDER),
        }
    }

    async fn prepare(root: &Path) -> Result<()> {
        for subdir in DataSubdir::ALL {
            let path = root.join(subdir.dir_name());
            tokio::fs::create_dir_all(&path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?;
        }

        let probe = root.join(WRITE_PROBE);
        if let Err(e) = tokio::fs::write(&probe, b"ok").await {
            bail!("Data directory {} is not writable: {}", root.display(), e);
        }
        if let Err(e) = tokio::fs::remove_file(&probe).await {
            tracing::debug!(error = %e, "Write probe left behind");
        }
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn subdir(&self, subdir: DataSubdir) -> PathBuf {
        self.data_dir.join(subdir.dir_name())
    }

    #[cfg(test)]
    pub fn init_for_test(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prepare_creates_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("nested").join("data");
        AppStorage::prepare(&root).await.unwrap();

        for subdir in DataSubdir::ALL {
            assert!(root.join(subdir.dir_name()).is_dir());
        }
        assert!(!root.join(WRITE_PROBE).exists());

        let storage = AppStorage::init_for_test(root.clone());
        assert_eq!(storage.subdir(DataSubdir::Duckdb), root.join("duckdb"));
    }

    #[test]
    fn test_dir_names_are_distinct() {
        assert_ne!(DataSubdir::Sqlite.dir_name(), DataSubdir::Duckdb.dir_name());
    }
}
