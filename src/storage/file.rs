//! File input for stores and the sink retrieved files are written to

use async_trait::async_trait;
use dashmap::DashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

/// A file handed to `store`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileData {
    pub name: String,
    pub data: Vec<u8>,
}

impl FileData {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Read a file from disk, keeping only its file name
    pub async fn read(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no usable file name in {}", path.display()),
                )
            })?
            .to_string();

        let data = tokio::fs::read(path).await?;
        Ok(Self { name, data })
    }
}

/// Where retrieved files are persisted
#[async_trait]
pub trait FileSink: Send + Sync {
    async fn write_file(&self, name: &str, data: &[u8]) -> io::Result<()>;
}

/// Writes files under a root directory
#[derive(Debug, Clone)]
pub struct FsFileSink {
    root: PathBuf,
}

impl FsFileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Target path for a name; only plain relative names are accepted
    fn target(&self, name: &str) -> io::Result<PathBuf> {
        let relative = Path::new(name);
        let plain = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !plain {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to write outside the sink root: {}", name),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileSink for FsFileSink {
    async fn write_file(&self, name: &str, data: &[u8]) -> io::Result<()> {
        let path = self.target(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        tracing::debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}

/// Keeps written files in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    files: DashMap<String, Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl FileSink for MemorySink {
    async fn write_file(&self, name: &str, data: &[u8]) -> io::Result<()> {
        self.files.insert(name.to_string(), data.to_vec());
        Ok(())
    }
}
