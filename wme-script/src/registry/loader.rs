use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Where compiled scripts come from.
pub trait ScriptLoader {
    fn read(&mut self, filename: &str) -> Result<Vec<u8>>;

    fn exists(&self, filename: &str) -> bool;
}

/// Script filenames are relative to `root`, with either slash direction.
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, filename: &str) -> PathBuf {
        self.root.join(filename.replace('\\', "/"))
    }
}

impl ScriptLoader for DirectoryLoader {
    fn read(&mut self, filename: &str) -> Result<Vec<u8>> {
        let path = self.path(filename);
        std::fs::read(&path).with_context(|| format!("read {path:?}"))
    }

    fn exists(&self, filename: &str) -> bool {
        self.path(filename).is_file()
    }
}

/// In-memory scripts, keyed case-insensitively.
#[derive(Default)]
pub struct MemoryLoader {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, filename: &str, bytes: Vec<u8>) {
        self.files.insert(filename.to_ascii_lowercase(), bytes);
    }
}

impl ScriptLoader for MemoryLoader {
    fn read(&mut self, filename: &str) -> Result<Vec<u8>> {
        self.files
            .get(&filename.to_ascii_lowercase())
            .cloned()
            .with_context(|| format!("no script named '{filename}'"))
    }

    fn exists(&self, filename: &str) -> bool {
        self.files.contains_key(&filename.to_ascii_lowercase())
    }
}
