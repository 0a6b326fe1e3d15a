//! On-disk layout of a docmirror installation.
//!
//! ```text
//! <root>/
//!   config.toml      optional engine settings
//!   store.redb       posts and books
//!   indexes/<name>/  one directory per embedded index
//! ```

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV: &str = "DOCMIRROR_DATA_DIR";

const CONFIG_FILE: &str = "config.toml";
const STORE_FILE: &str = "store.redb";
const INDEXES_DIR: &str = "indexes";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Pick the root from `--data-dir`, then `DOCMIRROR_DATA_DIR`, then
    /// `$XDG_DATA_HOME/docmirror`, and create it.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        Self::resolve_from(explicit, |key| std::env::var(key).ok())
    }

    fn resolve_from(
        explicit: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let from_env =
            env(DATA_DIR_ENV).filter(|val| !val.trim().is_empty());
        let root = match (explicit, from_env) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(val)) => PathBuf::from(val),
            (None, None) => xdg::BaseDirectories::with_prefix("docmirror")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config("no XDG data home to put data in".into())
                })?,
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn store_path(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }

    /// Root of the embedded indexes. A configured relative path is taken
    /// from the data directory; without one, `indexes/` is used.
    pub fn indexes_dir(&self, configured: Option<&Path>) -> Result<PathBuf> {
        let path = match configured {
            Some(path) if path.is_relative() => self.root.join(path),
            Some(path) => path.to_path_buf(),
            None => self.root.join(INDEXES_DIR),
        };
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }
}
