use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

/// Resolves a path to its text content.
#[async_trait]
pub trait ContentLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<String>;
}

/// Reads content from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsContentLoader;

#[async_trait]
impl ContentLoader for FsContentLoader {
    async fn load(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))
    }
}

/// Serves content from memory, keyed by path.
#[derive(Debug, Default, Clone)]
pub struct InMemoryContentLoader {
    files: HashMap<PathBuf, String>,
}

impl InMemoryContentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }
}

#[async_trait]
impl ContentLoader for InMemoryContentLoader {
    async fn load(&self, path: &Path) -> Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("no in-memory content for {}", path.display()))
    }
}

/// A file submitted for scanning together with the loader that resolves its content.
#[derive(Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    loader: Arc<dyn ContentLoader>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, loader: Arc<dyn ContentLoader>) -> Self {
        Self {
            path: path.into(),
            loader,
        }
    }

    pub fn from_fs(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Arc::new(FsContentLoader))
    }

    pub fn in_memory(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        let path = path.into();
        let loader = InMemoryContentLoader::new().with_file(path.clone(), content);
        Self::new(path, Arc::new(loader))
    }

    pub async fn load(&self) -> Result<String> {
        self.loader.load(&self.path).await
    }
}

impl std::fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFile")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_source_resolves_its_own_content() {
        let file = SourceFile::in_memory("Assets/Menu.uxml", "<ui:Button text=\"Play\"/>");
        assert_eq!(file.load().await.unwrap(), "<ui:Button text=\"Play\"/>");
    }

    #[tokio::test]
    async fn fs_loader_reports_missing_path() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("missing.cs");
        let err = SourceFile::from_fs(&missing).load().await.unwrap_err();
        assert!(err.to_string().contains("missing.cs"));
    }

    #[tokio::test]
    async fn fs_loader_reads_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("Hud.cs");
        std::fs::write(&path, "class Hud {}").unwrap();
        assert_eq!(FsContentLoader.load(&path).await.unwrap(), "class Hud {}");
    }
}
