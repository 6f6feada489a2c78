// Single-file page store. Every mutation is a full read-modify-write with an
// atomic rename, so readers never observe a partially written file. Concurrent
// processes racing on the same store file are out of contract (single writer).

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("page '{0}' is already used in the registry")]
    DuplicateKey(String),
    #[error("page '{0}' was not found in the registry")]
    NotFound(String),
    #[error("page '{page}' holds a fixed-shape payload and cannot be merged with {mode}")]
    UnsupportedMerge { page: String, mode: &'static str },
    #[error("registry io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("registry encoding failure: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// How `update` combines the new payload with what the page already holds.
/// The caller always states the strategy; it is never inferred from the
/// stored payload's shape.
#[derive(Debug, Clone)]
pub enum UpdateMode {
    Replace,
    AppendToSequence,
    AppendToSet,
    InsertIntoMapping(String),
}

impl UpdateMode {
    fn name(&self) -> &'static str {
        match self {
            UpdateMode::Replace => "replace",
            UpdateMode::AppendToSequence => "append-to-sequence",
            UpdateMode::AppendToSet => "append-to-set",
            UpdateMode::InsertIntoMapping(_) => "insert-into-mapping",
        }
    }
}

pub struct Registry {
    path: PathBuf,
}

impl Registry {
    /// The store location is injected here; there is no process-wide default.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_pages(&self) -> Result<Option<Map<String, Value>>, RegistryError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn write_pages(&self, pages: &Map<String, Value>) -> Result<(), RegistryError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                std::fs::create_dir_all(parent)?;
                parent.to_path_buf()
            }
            _ => PathBuf::from("."),
        };

        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&serde_json::to_vec(pages)?)?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Reads one page. An absent store file and an absent page both yield `None`.
    pub fn load(&self, page_id: &str) -> Result<Option<Value>, RegistryError> {
        let Some(pages) = self.read_pages()? else {
            return Ok(None);
        };
        Ok(pages.get(page_id).cloned())
    }

    pub fn load_as<T: DeserializeOwned>(&self, page_id: &str) -> Result<Option<T>, RegistryError> {
        let Some(value) = self.load(page_id)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Creates a new page, creating the store file on first use.
    pub fn add(&self, page_id: &str, payload: &impl Serialize) -> Result<(), RegistryError> {
        let mut pages = self.read_pages()?.unwrap_or_default();
        if pages.contains_key(page_id) {
            return Err(RegistryError::DuplicateKey(page_id.to_string()));
        }
        pages.insert(page_id.to_string(), serde_json::to_value(payload)?);
        self.write_pages(&pages)
    }

    pub fn update(
        &self,
        page_id: &str,
        payload: &impl Serialize,
        mode: UpdateMode,
    ) -> Result<(), RegistryError> {
        let mut pages = self
            .read_pages()?
            .ok_or_else(|| RegistryError::NotFound(page_id.to_string()))?;
        let Some(stored) = pages.get_mut(page_id) else {
            return Err(RegistryError::NotFound(page_id.to_string()));
        };

        let payload = serde_json::to_value(payload)?;
        match &mode {
            UpdateMode::Replace => {
                *stored = payload;
            }
            UpdateMode::AppendToSequence => {
                let Some(seq) = stored.as_array_mut() else {
                    return Err(unsupported(page_id, &mode));
                };
                seq.push(payload);
            }
            UpdateMode::AppendToSet => {
                let Some(seq) = stored.as_array_mut() else {
                    return Err(unsupported(page_id, &mode));
                };
                if !seq.contains(&payload) {
                    seq.push(payload);
                }
            }
            UpdateMode::InsertIntoMapping(key) => {
                let Some(map) = stored.as_object_mut() else {
                    return Err(unsupported(page_id, &mode));
                };
                map.insert(key.clone(), payload);
            }
        }
        self.write_pages(&pages)
    }

    /// Removes one page, or the whole store when no page id is given.
    /// Removing the last page deletes the store file.
    pub fn remove(&self, page_id: Option<&str>) -> Result<(), RegistryError> {
        let Some(page_id) = page_id else {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        };

        let mut pages = self
            .read_pages()?
            .ok_or_else(|| RegistryError::NotFound(page_id.to_string()))?;
        if pages.shift_remove(page_id).is_none() {
            return Err(RegistryError::NotFound(page_id.to_string()));
        }
        if pages.is_empty() {
            std::fs::remove_file(&self.path)?;
            return Ok(());
        }
        self.write_pages(&pages)
    }
}

fn unsupported(page_id: &str, mode: &UpdateMode) -> RegistryError {
    RegistryError::UnsupportedMerge {
        page: page_id.to_string(),
        mode: mode.name(),
    }
}
